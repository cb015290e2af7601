//! Media source capability and the per-source handle registry.

use std::collections::HashMap;
use std::sync::Arc;

use reelcut_common::config::TuningConfig;
use reelcut_timeline::SourceId;

pub mod synthetic;

pub use synthetic::{SyntheticMedia, SyntheticSpec};

/// Loading progress of a media handle, ordered from least to most ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReadyState {
    HaveNothing,
    HaveMetadata,
    HaveCurrentData,
    HaveFutureData,
    HaveEnoughData,
}

/// One decoded RGBA frame.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA, `width * height * 4` bytes.
    pub data: Arc<Vec<u8>>,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), (width as usize) * (height as usize) * 4);
        Self {
            width,
            height,
            data: Arc::new(data),
        }
    }

    /// A frame filled with a single colour.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = (width as usize) * (height as usize);
        let mut data = Vec::with_capacity(pixels * 4);
        for _ in 0..pixels {
            data.extend_from_slice(&rgba);
        }
        Self::new(width, height, data)
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = ((y as usize) * (self.width as usize) + x as usize) * 4;
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }

    /// Mean Rec. 601 luma over all pixels, 0..=255.
    pub fn mean_luma(&self) -> f64 {
        let pixels = (self.width as usize) * (self.height as usize);
        if pixels == 0 {
            return 0.0;
        }
        let sum: f64 = self
            .data
            .chunks_exact(4)
            .map(|p| 0.299 * p[0] as f64 + 0.587 * p[1] as f64 + 0.114 * p[2] as f64)
            .sum();
        sum / pixels as f64
    }
}

/// Capability exposed by a playable media source.
///
/// Mirrors an HTML media element: positions are in source seconds and
/// seeks complete asynchronously. Hosts back this with their decoder.
pub trait MediaHandle {
    fn source_id(&self) -> &str;

    /// Current playback position in seconds.
    fn position(&self) -> f64;

    /// Source length, once metadata has loaded. `None` for stills.
    fn duration(&self) -> Option<f64>;

    fn ready_state(&self) -> ReadyState;

    fn is_seeking(&self) -> bool;

    fn is_paused(&self) -> bool;

    fn has_ended(&self) -> bool;

    fn play(&mut self);

    fn pause(&mut self);

    /// Begin an asynchronous seek.
    fn seek(&mut self, position: f64);

    /// Returns `true` once for every seek that has completed since the
    /// last call (the "seeked" notification).
    fn take_seeked(&mut self) -> bool;

    /// (Re)load the source from scratch.
    fn load(&mut self);

    /// The frame at the current position, if one is decodable.
    fn current_frame(&self) -> Option<VideoFrame>;

    fn has_audio(&self) -> bool {
        true
    }

    /// Whether the handle can present a frame right now.
    fn is_presentable(&self) -> bool {
        self.ready_state() >= ReadyState::HaveCurrentData && !self.is_seeking()
    }
}

struct Slot {
    handle: Box<dyn MediaHandle>,
    load_requested: bool,
}

/// Handles keyed by source id, bound as items arrive and released with
/// their item.
#[derive(Default)]
pub struct MediaRegistry {
    slots: HashMap<SourceId, Slot>,
}

impl MediaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handle for a source, replacing any previous one.
    pub fn bind(&mut self, handle: Box<dyn MediaHandle>) {
        let id = handle.source_id().to_string();
        let slot = Slot {
            handle,
            load_requested: false,
        };
        if let Some(mut old) = self.slots.insert(id.clone(), slot) {
            old.handle.pause();
            tracing::debug!(source = %id, "Replaced media handle");
        }
    }

    pub fn get(&self, source: &str) -> Option<&dyn MediaHandle> {
        self.slots.get(source).map(|s| s.handle.as_ref())
    }

    pub fn get_mut(&mut self, source: &str) -> Option<&mut (dyn MediaHandle + 'static)> {
        self.slots.get_mut(source).map(|s| s.handle.as_mut())
    }

    pub fn contains(&self, source: &str) -> bool {
        self.slots.contains_key(source)
    }

    /// Issue the first `load()` for a source. Later calls are no-ops;
    /// reloads after a stall go through [`StallWatchdog`].
    pub fn ensure_loaded(&mut self, source: &str) -> bool {
        match self.slots.get_mut(source) {
            Some(slot) => {
                if !slot.load_requested {
                    slot.load_requested = true;
                    slot.handle.load();
                }
                true
            }
            None => false,
        }
    }

    /// Drop the handle for a source. Playback is paused first.
    pub fn release(&mut self, source: &str) -> Option<Box<dyn MediaHandle>> {
        let mut slot = self.slots.remove(source)?;
        slot.handle.pause();
        Some(slot.handle)
    }

    pub fn pause_all(&mut self) {
        for slot in self.slots.values_mut() {
            if !slot.handle.is_paused() {
                slot.handle.pause();
            }
        }
    }

    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// What the watchdog decided about a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallAction {
    None,
    /// The handle was reloaded; `attempt` counts from 1.
    Reloaded { attempt: u32 },
    /// Retry limit reached; the handle is left alone.
    GaveUp,
}

#[derive(Debug, Clone, Default)]
struct StallEntry {
    nothing_since_ms: Option<f64>,
    attempts: u32,
    last_attempt_ms: Option<f64>,
    gave_up: bool,
}

/// Reloads handles stuck with no data, within a retry budget.
#[derive(Debug, Clone)]
pub struct StallWatchdog {
    detect_ms: f64,
    retry_limit: u32,
    cooldown_ms: f64,
    entries: HashMap<SourceId, StallEntry>,
}

impl StallWatchdog {
    pub fn new(tuning: &TuningConfig) -> Self {
        Self {
            detect_ms: tuning.stall_detect_ms,
            retry_limit: tuning.stall_retry_limit,
            cooldown_ms: tuning.stall_retry_cooldown_ms,
            entries: HashMap::new(),
        }
    }

    /// Inspect one handle. Only handles that have been asked to load are
    /// checked; callers pass the handle the compositor currently needs.
    pub fn check(&mut self, handle: &mut dyn MediaHandle, now_ms: f64) -> StallAction {
        let entry = self
            .entries
            .entry(handle.source_id().to_string())
            .or_default();

        if handle.ready_state() > ReadyState::HaveNothing {
            entry.nothing_since_ms = None;
            entry.attempts = 0;
            entry.gave_up = false;
            return StallAction::None;
        }

        let since = *entry.nothing_since_ms.get_or_insert(now_ms);
        if entry.gave_up || now_ms - since < self.detect_ms {
            return StallAction::None;
        }
        if let Some(last) = entry.last_attempt_ms {
            if now_ms - last < self.cooldown_ms {
                return StallAction::None;
            }
        }
        if entry.attempts >= self.retry_limit {
            entry.gave_up = true;
            tracing::warn!(
                source = %handle.source_id(),
                attempts = entry.attempts,
                "Media stalled, giving up"
            );
            return StallAction::GaveUp;
        }

        entry.attempts += 1;
        entry.last_attempt_ms = Some(now_ms);
        entry.nothing_since_ms = Some(now_ms);
        tracing::info!(
            source = %handle.source_id(),
            attempt = entry.attempts,
            "Media stalled, reloading"
        );
        handle.load();
        StallAction::Reloaded {
            attempt: entry.attempts,
        }
    }

    pub fn forget(&mut self, source: &str) {
        self.entries.remove(source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelcut_common::clock::{Clock, ManualClock};

    fn stalling(clock: &ManualClock, stall_loads: u32) -> SyntheticMedia {
        let spec = SyntheticSpec {
            stall_loads,
            ..SyntheticSpec::video(10.0)
        };
        SyntheticMedia::new("src", spec, Arc::new(clock.clone()))
    }

    #[test]
    fn test_ready_state_ordering() {
        assert!(ReadyState::HaveNothing < ReadyState::HaveMetadata);
        assert!(ReadyState::HaveCurrentData < ReadyState::HaveEnoughData);
    }

    #[test]
    fn test_solid_frame_luma() {
        let white = VideoFrame::solid(4, 2, [255, 255, 255, 255]);
        assert!((white.mean_luma() - 255.0).abs() < 1e-9);
        let black = VideoFrame::solid(4, 2, [0, 0, 0, 255]);
        assert_eq!(black.mean_luma(), 0.0);
        assert_eq!(white.pixel(3, 1), [255, 255, 255, 255]);
    }

    #[test]
    fn test_registry_release_pauses() {
        let clock = ManualClock::new(0.0);
        let mut registry = MediaRegistry::new();
        registry.bind(Box::new(SyntheticMedia::new(
            "a",
            SyntheticSpec::video(5.0),
            Arc::new(clock),
        )));
        assert!(registry.ensure_loaded("a"));
        registry.get_mut("a").unwrap().play();
        assert!(!registry.get("a").unwrap().is_paused());

        let released = registry.release("a").unwrap();
        assert!(released.is_paused());
        assert!(registry.is_empty());
        assert!(registry.release("a").is_none());
    }

    #[test]
    fn test_watchdog_reloads_then_gives_up() {
        let clock = ManualClock::new(0.0);
        let tuning = TuningConfig::default();
        let mut media = stalling(&clock, u32::MAX);
        media.load();
        let mut dog = StallWatchdog::new(&tuning);

        assert_eq!(dog.check(&mut media, 0.0), StallAction::None);
        let mut now = tuning.stall_detect_ms;
        assert_eq!(
            dog.check(&mut media, now),
            StallAction::Reloaded { attempt: 1 }
        );

        for attempt in 2..=tuning.stall_retry_limit {
            now += tuning.stall_detect_ms.max(tuning.stall_retry_cooldown_ms);
            assert_eq!(dog.check(&mut media, now), StallAction::Reloaded { attempt });
        }
        now += tuning.stall_detect_ms.max(tuning.stall_retry_cooldown_ms);
        assert_eq!(dog.check(&mut media, now), StallAction::GaveUp);
        now += 10_000.0;
        assert_eq!(dog.check(&mut media, now), StallAction::None);
    }

    #[test]
    fn test_watchdog_recovers_after_reload() {
        let clock = ManualClock::new(0.0);
        let tuning = TuningConfig::default();
        let mut media = stalling(&clock, 1);
        media.load();
        let mut dog = StallWatchdog::new(&tuning);

        dog.check(&mut media, 0.0);
        clock.set_ms(tuning.stall_detect_ms);
        assert_eq!(
            dog.check(&mut media, tuning.stall_detect_ms),
            StallAction::Reloaded { attempt: 1 }
        );
        clock.advance_ms(10.0);
        assert!(media.ready_state() > ReadyState::HaveNothing);
        assert_eq!(dog.check(&mut media, clock.now_ms()), StallAction::None);
    }
}
