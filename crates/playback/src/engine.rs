//! The playback engine: one mutable context owning the timeline, media
//! handles, audio graph, surface and transport.
//!
//! The host calls [`PlaybackEngine::tick`] from its animation callback.
//! Waits that would block in a callback-driven runtime (metadata before a
//! start, a seek settling before resume) are kept as pending state with a
//! deadline and polled on each tick.

use reelcut_common::clock::{Debounce, DriftMeasurement, SharedClock};
use reelcut_common::config::EngineConfig;
use reelcut_common::error::{EngineError, EngineResult};
use reelcut_timeline::{SourceId, Timeline, VisualItem};

use crate::audio::{sync_track_handles, AudioRouter, RouteTarget};
use crate::compositor::{Compositor, FrameOutcome, RenderMode, Scene};
use crate::media::{MediaHandle, MediaRegistry, ReadyState, StallAction, StallWatchdog, VideoFrame};
use crate::seek::SeekSession;
use crate::surface::RasterSurface;
use crate::transport::{LoopController, LoopMode, LoopPhase, PlaybackState, TickOutcome};
use crate::visibility::VisibilityState;

/// Result of a play request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { generation: u64 },
    /// Waiting for the active item's metadata.
    Pending,
    /// Rejected by the play debounce.
    Debounced,
}

/// Notifications for the host, drained with [`PlaybackEngine::take_events`].
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Started { generation: u64 },
    Paused,
    Ended,
    StartAborted { reason: String },
    StallReload { source: SourceId, attempt: u32 },
    StallGaveUp { source: SourceId },
    ItemResolved { id: String, duration: f64 },
}

#[derive(Debug, Clone)]
struct PendingStart {
    source: SourceId,
    requested_ms: f64,
    deadline_ms: f64,
}

pub struct PlaybackEngine {
    config: EngineConfig,
    clock: SharedClock,
    timeline: Timeline,
    media: MediaRegistry,
    audio: AudioRouter,
    compositor: Compositor,
    transport: LoopController,
    pub(crate) seek: SeekSession,
    pub(crate) visibility: VisibilityState,
    surface: Box<dyn RasterSurface>,
    watchdog: StallWatchdog,
    play_debounce: Debounce,
    pending_start: Option<PendingStart>,
    exporting: bool,
    events: Vec<EngineEvent>,
    last_outcome: Option<FrameOutcome>,
    frames_rendered: u64,
}

impl PlaybackEngine {
    pub fn new(config: EngineConfig, clock: SharedClock, surface: Box<dyn RasterSurface>) -> Self {
        let tuning = config.tuning.clone();
        Self {
            audio: AudioRouter::new(tuning.gain_ramp_secs),
            compositor: Compositor::new(tuning.clone(), config.platform.clone()),
            transport: LoopController::new(),
            seek: SeekSession::new(tuning.seek_throttle_ms),
            visibility: VisibilityState::default(),
            watchdog: StallWatchdog::new(&tuning),
            play_debounce: Debounce::new(tuning.play_debounce_ms),
            media: MediaRegistry::new(),
            timeline: Timeline::new(),
            pending_start: None,
            exporting: false,
            events: Vec::new(),
            last_outcome: None,
            frames_rendered: 0,
            surface,
            clock,
            config,
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn now_ms(&self) -> f64 {
        self.clock.now_ms()
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Direct timeline access for edits that do not remove sources.
    /// Use [`PlaybackEngine::remove_item`] to drop items.
    pub fn timeline_mut(&mut self) -> &mut Timeline {
        &mut self.timeline
    }

    pub fn state(&self) -> PlaybackState {
        self.transport.state()
    }

    pub fn current_time(&self) -> f64 {
        self.transport.current_time()
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_playing()
    }

    pub fn transport(&self) -> &LoopController {
        &self.transport
    }

    pub fn media(&self) -> &MediaRegistry {
        &self.media
    }

    pub fn media_mut(&mut self) -> &mut MediaRegistry {
        &mut self.media
    }

    pub fn audio(&self) -> &AudioRouter {
        &self.audio
    }

    pub fn audio_mut(&mut self) -> &mut AudioRouter {
        &mut self.audio
    }

    pub fn surface(&self) -> &dyn RasterSurface {
        self.surface.as_ref()
    }

    pub fn snapshot(&self) -> VideoFrame {
        self.surface.snapshot()
    }

    pub fn seek_session(&self) -> &SeekSession {
        &self.seek
    }

    pub fn is_exporting(&self) -> bool {
        self.exporting
    }

    pub fn is_start_pending(&self) -> bool {
        self.pending_start.is_some()
    }

    pub fn last_outcome(&self) -> Option<&FrameOutcome> {
        self.last_outcome.as_ref()
    }

    /// Render passes executed so far.
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn take_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn set_position(&mut self, time: f64) {
        self.transport.set_current_time(time);
    }

    pub(crate) fn suspend_loop(&mut self, now: f64, total: f64) {
        self.transport.suspend(now, total);
    }

    pub(crate) fn shift_loop_origin(&mut self, delta_ms: f64) {
        self.transport.shift_origin(delta_ms);
    }

    /// Leave the suspended phase: resume the loop or park it paused.
    pub(crate) fn finish_suspension(&mut self, resume: bool) {
        if self.transport.phase() != LoopPhase::Suspended {
            return;
        }
        if resume {
            self.transport.resume();
        } else {
            self.transport.stop();
        }
    }

    // ------------------------------------------------------------------
    // Timeline and sources
    // ------------------------------------------------------------------

    /// Replace the whole timeline. Playback stops.
    pub fn set_timeline(&mut self, timeline: Timeline) {
        self.halt();
        self.timeline = timeline;
        self.compositor.reset();
        self.transport.set_current_time(0.0);
        self.render_at(0.0, RenderMode::paused());
    }

    /// Register the handle for a source and start loading it.
    pub fn bind_source(&mut self, handle: Box<dyn MediaHandle>) {
        let id = handle.source_id().to_string();
        self.media.bind(handle);
        self.media.ensure_loaded(&id);
        self.watchdog.forget(&id);
    }

    /// Append an item, binding its handle when given.
    pub fn add_item(
        &mut self,
        item: VisualItem,
        handle: Option<Box<dyn MediaHandle>>,
    ) -> EngineResult<()> {
        self.timeline
            .push_item(item)
            .map_err(|e| EngineError::timeline(e.to_string()))?;
        if let Some(handle) = handle {
            self.bind_source(handle);
        }
        Ok(())
    }

    /// Remove an item and release its handle and gain node when no other
    /// part of the timeline still uses the source.
    pub fn remove_item(&mut self, id: &str) -> EngineResult<VisualItem> {
        let item = self
            .timeline
            .remove_item(id)
            .map_err(|e| EngineError::timeline(e.to_string()))?;

        if !self.source_in_use(&item.source) {
            self.media.release(&item.source);
            self.audio.release(&item.source);
            self.compositor.forget_source(&item.source);
            self.watchdog.forget(&item.source);
            tracing::debug!(item = %id, source = %item.source, "Released source");
        }

        let total = self.timeline.total_duration();
        if self.current_time() > total {
            self.transport.set_current_time(total);
        }
        if !self.transport.is_active() {
            self.render_at(self.current_time(), RenderMode::paused());
        }
        Ok(item)
    }

    fn source_in_use(&self, source: &str) -> bool {
        self.timeline.items.iter().any(|i| i.source == source)
            || self
                .timeline
                .background
                .as_ref()
                .is_some_and(|b| b.source == source)
            || self.timeline.narrations.iter().any(|n| n.source == source)
    }

    /// Apply reported source lengths to pending video items.
    pub fn resolve_pending_items(&mut self) {
        let pending: Vec<(String, SourceId)> = self
            .timeline
            .items
            .iter()
            .filter(|i| i.is_pending())
            .map(|i| (i.id.clone(), i.source.clone()))
            .collect();
        for (id, source) in pending {
            let Some(duration) = self.media.get(&source).and_then(|h| h.duration()) else {
                continue;
            };
            match self.timeline.resolve_item_duration(&id, duration) {
                Ok(()) => {
                    tracing::debug!(item = %id, duration, "Resolved item duration");
                    self.events.push(EngineEvent::ItemResolved { id, duration });
                }
                Err(e) => tracing::warn!(item = %id, error = %e, "Could not resolve item"),
            }
        }
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

    /// User play request, debounced.
    pub fn play(&mut self) -> EngineResult<StartOutcome> {
        let now = self.now_ms();
        if !self.play_debounce.accept(now) {
            tracing::debug!("Play request debounced");
            return Ok(StartOutcome::Debounced);
        }
        self.start_playback()
    }

    /// Start playback without the debounce. A start while a loop is live
    /// supersedes it.
    pub fn start_playback(&mut self) -> EngineResult<StartOutcome> {
        if self.exporting {
            return Err(EngineError::invalid_state("export in progress"));
        }
        if self.timeline.is_empty() {
            return Err(EngineError::not_ready("timeline is empty"));
        }
        let now = self.now_ms();
        self.seek.cancel();

        let total = self.timeline.total_duration();
        if self.current_time() >= total - self.config.tuning.end_epsilon_secs {
            self.transport.set_current_time(0.0);
        }

        if let Some(source) = self.active_video_source(self.current_time()) {
            self.media.ensure_loaded(&source);
            let ready = self
                .media
                .get(&source)
                .map(|h| h.ready_state())
                .unwrap_or(ReadyState::HaveNothing);
            if ready < ReadyState::HaveMetadata {
                tracing::debug!(source = %source, "Start waiting for metadata");
                if self.transport.is_active() {
                    self.transport.stop();
                }
                self.pending_start = Some(PendingStart {
                    source,
                    requested_ms: now,
                    deadline_ms: now + self.config.tuning.metadata_timeout_ms,
                });
                return Ok(StartOutcome::Pending);
            }
        }

        let generation = self.begin_loop(now);
        Ok(StartOutcome::Started { generation })
    }

    pub(crate) fn begin_loop(&mut self, now: f64) -> u64 {
        self.pending_start = None;
        self.audio.resume();
        let generation = self.transport.start(now, LoopMode::Playback);
        self.render_at(self.current_time(), RenderMode::playback());
        self.events.push(EngineEvent::Started { generation });
        generation
    }

    pub fn pause(&mut self) {
        if self.exporting {
            return;
        }
        let was_active = self.transport.is_active() || self.pending_start.is_some();
        self.halt();
        if was_active {
            self.render_at(self.current_time(), RenderMode::paused());
            self.events.push(EngineEvent::Paused);
        }
    }

    pub(crate) fn halt(&mut self) {
        self.pending_start = None;
        if self.transport.is_active() {
            self.transport.stop();
        }
        self.media.pause_all();
    }

    /// Drive the current loop from the host's animation callback.
    pub fn tick(&mut self) -> TickOutcome {
        let now = self.now_ms();
        self.poll(now);
        let generation = self.transport.generation();
        self.advance(generation, now)
    }

    /// Drive the loop issued under `generation`; stale callbacks are no-ops.
    pub fn tick_generation(&mut self, generation: u64) -> TickOutcome {
        let now = self.now_ms();
        self.poll(now);
        self.advance(generation, now)
    }

    fn poll(&mut self, now: f64) {
        self.poll_pending_start(now);
        self.poll_seek(now);
        self.poll_stalls(now);
        self.resolve_pending_items();
        self.audio.update(now);
    }

    fn advance(&mut self, generation: u64, now: f64) -> TickOutcome {
        if self.exporting {
            return TickOutcome::Idle;
        }
        let total = self.timeline.total_duration();
        let outcome = self.transport.tick(generation, now, total);
        match outcome {
            TickOutcome::Render(time) => {
                self.render_at(time, RenderMode::playback());
            }
            TickOutcome::Final(time) => {
                self.render_at(time, RenderMode::paused());
                self.media.pause_all();
                tracing::info!(total, "Playback reached end");
                self.events.push(EngineEvent::Ended);
            }
            TickOutcome::ExportHalted(_) | TickOutcome::Stale | TickOutcome::Idle => {}
        }
        outcome
    }

    fn poll_pending_start(&mut self, now: f64) {
        let Some(pending) = self.pending_start.clone() else {
            return;
        };
        let ready = self
            .media
            .get(&pending.source)
            .map_or(true, |h| h.ready_state() >= ReadyState::HaveMetadata);
        if ready {
            self.begin_loop(now);
            return;
        }
        if now >= pending.deadline_ms {
            self.pending_start = None;
            self.media.pause_all();
            let err = EngineError::metadata_timeout(&pending.source, now - pending.requested_ms);
            tracing::warn!(error = %err, "Aborting start");
            self.events.push(EngineEvent::StartAborted {
                reason: err.user_message(),
            });
        }
    }

    fn poll_stalls(&mut self, now: f64) {
        let Some(source) = self.active_video_source(self.current_time()) else {
            return;
        };
        let Some(handle) = self.media.get_mut(&source) else {
            return;
        };
        match self.watchdog.check(handle, now) {
            StallAction::None => {}
            StallAction::Reloaded { attempt } => {
                self.events.push(EngineEvent::StallReload { source, attempt });
            }
            StallAction::GaveUp => {
                self.events.push(EngineEvent::StallGaveUp { source });
            }
        }
    }

    pub(crate) fn active_video_source(&self, time: f64) -> Option<SourceId> {
        let active = self
            .timeline
            .resolve_active(time, self.config.tuning.end_epsilon_secs)?;
        let item = &self.timeline.items[active.index];
        item.is_video().then(|| item.source.clone())
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    /// Composite the timeline at `time` and align audio tracks.
    pub fn render_at(&mut self, time: f64, mode: RenderMode) -> FrameOutcome {
        let outcome = self.compositor.render(
            Scene {
                timeline: &self.timeline,
                media: &mut self.media,
                audio: &mut self.audio,
                surface: self.surface.as_mut(),
            },
            time,
            mode,
        );
        let threshold = self.compositor.drift_threshold(mode);
        sync_track_handles(
            &self.timeline,
            time,
            mode.playing && !mode.scrubbing,
            threshold,
            &mut self.media,
            &mut self.audio,
        );
        self.frames_rendered += 1;
        self.last_outcome = Some(outcome.clone());
        outcome
    }

    /// Redraw the current position without starting anything.
    pub fn redraw(&mut self) -> FrameOutcome {
        let mode = if self.exporting {
            RenderMode::export()
        } else if self.is_playing() {
            RenderMode::playback()
        } else {
            RenderMode::paused()
        };
        self.render_at(self.current_time(), mode)
    }

    /// Re-align every handle with `time` using the direct-seek tolerance.
    pub(crate) fn realign_handles(&mut self, time: f64, playing: bool) {
        let threshold = self.config.tuning.drift_threshold_direct_seek_secs;
        if let Some(active) = self
            .timeline
            .resolve_active(time, self.config.tuning.end_epsilon_secs)
        {
            let item = &self.timeline.items[active.index];
            if item.is_video() {
                self.media.ensure_loaded(&item.source);
                if let Some(handle) = self.media.get_mut(&item.source) {
                    let target = item.source_position(active.local_time);
                    if handle.ready_state() >= ReadyState::HaveMetadata
                        && DriftMeasurement::new(target, handle.position()).exceeds(threshold)
                    {
                        handle.seek(target);
                    }
                }
            }
        }
        sync_track_handles(
            &self.timeline,
            time,
            playing,
            threshold,
            &mut self.media,
            &mut self.audio,
        );
    }

    // ------------------------------------------------------------------
    // Export hooks
    // ------------------------------------------------------------------

    /// Enter export mode: stop playback, rewind, route audio to capture
    /// and start an export loop. Returns the loop generation.
    pub fn begin_export(&mut self) -> EngineResult<u64> {
        if self.exporting {
            return Err(EngineError::invalid_state("export already running"));
        }
        if self.timeline.is_empty() {
            return Err(EngineError::not_ready("timeline is empty"));
        }
        self.halt();
        self.seek.cancel();
        self.transport.set_current_time(0.0);
        self.audio.set_route(RouteTarget::ExportCapture);
        self.exporting = true;
        let now = self.now_ms();
        Ok(self.transport.start(now, LoopMode::Export))
    }

    /// Advance the export loop's clock-derived time without rendering.
    pub fn export_tick(&mut self, generation: u64) -> TickOutcome {
        let now = self.now_ms();
        self.poll_stalls(now);
        self.audio.update(now);
        let total = self.timeline.total_duration();
        self.transport.tick(generation, now, total)
    }

    /// Render one export frame at `time`.
    pub fn render_export_frame(&mut self, time: f64) -> FrameOutcome {
        self.transport.set_current_time(time);
        self.render_at(time, RenderMode::export())
    }

    /// Leave export mode and restore live routing.
    pub fn end_export(&mut self) {
        if !self.exporting {
            return;
        }
        self.exporting = false;
        self.transport.stop();
        self.media.pause_all();
        self.audio.set_route(RouteTarget::Live);
        self.visibility = VisibilityState::default();
        tracing::debug!("Left export mode");
    }

    pub fn loop_phase(&self) -> LoopPhase {
        self.transport.phase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use reelcut_common::clock::ManualClock;

    use crate::media::{SyntheticMedia, SyntheticSpec};
    use crate::surface::FrameBuffer;

    fn engine_with(clock: &ManualClock, specs: Vec<(VisualItem, SyntheticSpec)>) -> PlaybackEngine {
        let mut engine = PlaybackEngine::new(
            EngineConfig::default(),
            Arc::new(clock.clone()),
            Box::new(FrameBuffer::new(32, 18)),
        );
        for (item, spec) in specs {
            let handle = SyntheticMedia::new(item.source.clone(), spec, Arc::new(clock.clone()));
            engine.add_item(item, Some(Box::new(handle))).unwrap();
        }
        engine
    }

    fn two_items(clock: &ManualClock) -> PlaybackEngine {
        engine_with(
            clock,
            vec![
                (VisualItem::video("a", "src-a", 4.0), SyntheticSpec::video(4.0)),
                (VisualItem::image("b", "src-b", 3.0), SyntheticSpec::image()),
            ],
        )
    }

    #[test]
    fn test_play_advances_time() {
        let clock = ManualClock::new(0.0);
        let mut engine = two_items(&clock);
        assert!(matches!(engine.play().unwrap(), StartOutcome::Started { .. }));
        clock.advance_ms(1500.0);
        assert_eq!(engine.tick(), TickOutcome::Render(1.5));
        assert!(engine.last_outcome().unwrap().is_drawn());
    }

    #[test]
    fn test_playback_ends_with_final_frame() {
        let clock = ManualClock::new(0.0);
        let mut engine = two_items(&clock);
        engine.play().unwrap();
        clock.advance_ms(8000.0);
        assert_eq!(engine.tick(), TickOutcome::Final(7.0));
        assert!(!engine.is_playing());
        assert!(engine.take_events().contains(&EngineEvent::Ended));
    }

    #[test]
    fn test_play_at_end_restarts_from_zero() {
        let clock = ManualClock::new(0.0);
        let mut engine = two_items(&clock);
        engine.play().unwrap();
        clock.advance_ms(8000.0);
        engine.tick();
        clock.advance_ms(1000.0);
        engine.play().unwrap();
        assert_eq!(engine.current_time(), 0.0);
    }

    #[test]
    fn test_play_is_debounced() {
        let clock = ManualClock::new(0.0);
        let mut engine = two_items(&clock);
        engine.play().unwrap();
        clock.advance_ms(100.0);
        assert_eq!(engine.play().unwrap(), StartOutcome::Debounced);
    }

    #[test]
    fn test_rapid_double_start_only_latest_loop_runs() {
        let clock = ManualClock::new(0.0);
        let mut engine = two_items(&clock);
        let StartOutcome::Started { generation: first } = engine.start_playback().unwrap() else {
            panic!("expected start");
        };
        let StartOutcome::Started { generation: second } = engine.start_playback().unwrap() else {
            panic!("expected start");
        };
        assert!(second > first);
        clock.advance_ms(500.0);
        assert_eq!(engine.tick_generation(first), TickOutcome::Stale);
        assert_eq!(engine.tick_generation(second), TickOutcome::Render(0.5));
    }

    #[test]
    fn test_start_waits_for_metadata() {
        let clock = ManualClock::new(0.0);
        let mut engine = engine_with(
            &clock,
            vec![(
                VisualItem::video("a", "src-a", 4.0),
                SyntheticSpec::video(4.0).with_latency(200.0, 0.0),
            )],
        );
        assert_eq!(engine.play().unwrap(), StartOutcome::Pending);
        assert!(!engine.is_playing());
        clock.advance_ms(250.0);
        engine.tick();
        assert!(engine.is_playing());
    }

    #[test]
    fn test_metadata_timeout_aborts_start() {
        let clock = ManualClock::new(0.0);
        let mut engine = engine_with(
            &clock,
            vec![(
                VisualItem::video("a", "src-a", 4.0),
                SyntheticSpec::video(4.0).with_latency(60_000.0, 0.0),
            )],
        );
        assert_eq!(engine.play().unwrap(), StartOutcome::Pending);
        clock.advance_ms(5_001.0);
        engine.tick();
        assert!(!engine.is_playing());
        assert!(!engine.is_start_pending());
        let events = engine.take_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::StartAborted { .. })));
    }

    #[test]
    fn test_remove_item_releases_handle_and_node() {
        let clock = ManualClock::new(0.0);
        let mut engine = two_items(&clock);
        engine.play().unwrap();
        clock.advance_ms(100.0);
        engine.tick();
        assert!(engine.audio().node("src-a").is_some());

        let removed = engine.remove_item("a").unwrap();
        assert_eq!(removed.id, "a");
        assert!(!engine.media().contains("src-a"));
        assert!(engine.audio().node("src-a").is_none());
        assert_eq!(engine.timeline().total_duration(), 3.0);
    }

    #[test]
    fn test_empty_timeline_cannot_play() {
        let clock = ManualClock::new(0.0);
        let mut engine = engine_with(&clock, Vec::new());
        assert!(matches!(
            engine.play(),
            Err(EngineError::NotReady { .. })
        ));
    }

    #[test]
    fn test_pending_item_resolves_from_handle() {
        let clock = ManualClock::new(0.0);
        let mut engine = engine_with(
            &clock,
            vec![(VisualItem::video("a", "src-a", 0.0), SyntheticSpec::video(6.0))],
        );
        assert_eq!(engine.timeline().total_duration(), 0.0);
        engine.tick();
        assert_eq!(engine.timeline().total_duration(), 6.0);
    }

    #[test]
    fn test_export_mode_rejects_play() {
        let clock = ManualClock::new(0.0);
        let mut engine = two_items(&clock);
        engine.begin_export().unwrap();
        assert!(matches!(
            engine.start_playback(),
            Err(EngineError::InvalidState { .. })
        ));
        assert_eq!(engine.audio().route(), RouteTarget::ExportCapture);
        engine.end_export();
        assert_eq!(engine.audio().route(), RouteTarget::Live);
    }
}
