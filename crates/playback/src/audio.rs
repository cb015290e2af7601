//! Per-source gain nodes and their routing.
//!
//! Each audio-bearing source owns exactly one gain node for its lifetime.
//! Switching between live monitoring and export capture reconnects the
//! existing nodes instead of creating new ones.

use std::collections::HashMap;

use reelcut_common::clock::DriftMeasurement;
use reelcut_timeline::{GainAutomation, SourceId, Timeline};

use crate::media::{MediaRegistry, ReadyState};

/// Destination a gain node feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteTarget {
    /// Speakers.
    Live,
    /// Capture stream feeding the encoder.
    ExportCapture,
}

/// Smoothed gain stage for one source.
#[derive(Debug, Clone, PartialEq)]
pub struct GainNode {
    source: SourceId,
    gain: f64,
    target: f64,
    connected: Option<RouteTarget>,
}

impl GainNode {
    fn new(source: SourceId) -> Self {
        Self {
            source,
            gain: 0.0,
            target: 0.0,
            connected: None,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Current (smoothed) gain.
    pub fn gain(&self) -> f64 {
        self.gain
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn connected(&self) -> Option<RouteTarget> {
        self.connected
    }

    fn connect(&mut self, target: RouteTarget) {
        self.connected = Some(target);
    }

    fn disconnect(&mut self) {
        self.connected = None;
    }
}

/// Consumer of precomputed gain curves.
///
/// Live playback and offline mixdown both schedule envelopes through this
/// trait so they evaluate identical automation.
pub trait EnvelopeScheduler {
    fn schedule(&mut self, source: &str, automation: GainAutomation);

    fn clear_schedule(&mut self, source: &str);
}

/// Owns every gain node and the current routing.
#[derive(Debug)]
pub struct AudioRouter {
    nodes: HashMap<SourceId, GainNode>,
    schedules: HashMap<SourceId, GainAutomation>,
    route: RouteTarget,
    suspended: bool,
    ramp_secs: f64,
    last_update_ms: Option<f64>,
    nodes_created: u64,
}

impl AudioRouter {
    pub fn new(ramp_secs: f64) -> Self {
        Self {
            nodes: HashMap::new(),
            schedules: HashMap::new(),
            route: RouteTarget::Live,
            suspended: false,
            ramp_secs,
            last_update_ms: None,
            nodes_created: 0,
        }
    }

    /// The node for `source`, created and connected on first use.
    pub fn bind(&mut self, source: &str) -> &mut GainNode {
        let route = self.route;
        if !self.nodes.contains_key(source) {
            self.nodes_created += 1;
            tracing::debug!(source = %source, ?route, "Created gain node");
        }
        self.nodes.entry(source.to_string()).or_insert_with(|| {
            let mut node = GainNode::new(source.to_string());
            node.connect(route);
            node
        })
    }

    pub fn node(&self, source: &str) -> Option<&GainNode> {
        self.nodes.get(source)
    }

    /// Disconnect and drop the node for a removed source.
    pub fn release(&mut self, source: &str) -> bool {
        self.schedules.remove(source);
        match self.nodes.remove(source) {
            Some(mut node) => {
                node.disconnect();
                true
            }
            None => false,
        }
    }

    pub fn route(&self) -> RouteTarget {
        self.route
    }

    /// Reconnect every existing node to `target`.
    pub fn set_route(&mut self, target: RouteTarget) {
        if self.route == target {
            return;
        }
        for node in self.nodes.values_mut() {
            node.disconnect();
            node.connect(target);
        }
        tracing::debug!(?target, nodes = self.nodes.len(), "Rerouted audio");
        self.route = target;
    }

    /// Total nodes ever created.
    pub fn nodes_created(&self) -> u64 {
        self.nodes_created
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    pub fn resume(&mut self) {
        if self.suspended {
            self.suspended = false;
            self.last_update_ms = None;
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Ramp towards `value` over the configured ramp time.
    pub fn set_gain_target(&mut self, source: &str, value: f64) {
        self.bind(source).target = value.max(0.0);
    }

    /// Apply scheduled automation at timeline `time` as gain targets.
    pub fn apply_schedules(&mut self, time: f64) {
        for (source, automation) in &self.schedules {
            if let Some(node) = self.nodes.get_mut(source) {
                node.target = automation.value_at(time);
            }
        }
    }

    /// Advance every node's smoothing to `now_ms`.
    pub fn update(&mut self, now_ms: f64) {
        if self.suspended {
            return;
        }
        let dt = match self.last_update_ms {
            Some(last) => ((now_ms - last) / 1000.0).max(0.0),
            None => 0.0,
        };
        self.last_update_ms = Some(now_ms);
        let k = if self.ramp_secs <= 0.0 {
            1.0
        } else {
            1.0 - (-dt / self.ramp_secs).exp()
        };
        for node in self.nodes.values_mut() {
            node.gain += (node.target - node.gain) * k;
            if (node.target - node.gain).abs() < 1e-4 {
                node.gain = node.target;
            }
        }
    }
}

impl EnvelopeScheduler for AudioRouter {
    fn schedule(&mut self, source: &str, automation: GainAutomation) {
        self.bind(source);
        self.schedules.insert(source.to_string(), automation);
    }

    fn clear_schedule(&mut self, source: &str) {
        self.schedules.remove(source);
    }
}

/// Keep background music and narration handles aligned with `time`.
///
/// Each placement's automation is scheduled on its gain node, the same
/// curve the offline mixdown renders. Active tracks are seeked when they
/// drift beyond `drift_threshold` and played or paused to follow
/// `playing`. Inactive tracks are paused. Schedules for sources that no
/// longer have a placement are cleared and their nodes silenced.
pub fn sync_track_handles(
    timeline: &Timeline,
    time: f64,
    playing: bool,
    drift_threshold: f64,
    media: &mut MediaRegistry,
    audio: &mut AudioRouter,
) {
    let total = timeline.total_duration();
    let mut placements = Vec::new();
    if let Some(bgm) = &timeline.background {
        placements.push(bgm.placement());
    }
    placements.extend(timeline.narrations.iter().map(|n| n.placement()));

    let orphaned: Vec<SourceId> = audio
        .schedules
        .keys()
        .filter(|source| !placements.iter().any(|p| &p.source == *source))
        .cloned()
        .collect();
    for source in orphaned {
        audio.clear_schedule(&source);
        audio.set_gain_target(&source, 0.0);
    }

    for placement in &placements {
        if !media.ensure_loaded(&placement.source) {
            continue;
        }
        let Some(handle) = media.get_mut(&placement.source) else {
            continue;
        };
        audio.schedule(&placement.source, placement.automation(total));
        match placement.source_position_at(time) {
            Some(target) if placement.is_active_at(time, total) => {
                if handle.ready_state() >= ReadyState::HaveMetadata && !handle.is_seeking() {
                    let drift = DriftMeasurement::new(target, handle.position());
                    if drift.exceeds(drift_threshold) {
                        handle.seek(target);
                    }
                }
                if playing && handle.is_paused() {
                    handle.play();
                } else if !playing && !handle.is_paused() {
                    handle.pause();
                }
            }
            _ => {
                if !handle.is_paused() {
                    handle.pause();
                }
            }
        }
    }

    audio.apply_schedules(time);
}
