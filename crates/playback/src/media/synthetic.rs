//! Clock-driven synthetic media used by the CLI and tests.
//!
//! Produces solid frames whose colour drifts with position so frozen or
//! black output is detectable, and models the asynchronous parts of a real
//! decoder: metadata latency, seek latency and stalled loads.

use reelcut_common::clock::SharedClock;

use super::{MediaHandle, ReadyState, VideoFrame};

/// Behaviour of a synthetic source.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticSpec {
    /// Source length; `None` for a still image.
    pub duration: Option<f64>,
    pub width: u32,
    pub height: u32,
    /// Base colour; green/blue channels are modulated by position.
    pub color: [u8; 3],
    pub metadata_delay_ms: f64,
    pub seek_latency_ms: f64,
    /// Number of initial `load()` calls that never become ready.
    pub stall_loads: u32,
    pub has_audio: bool,
}

impl SyntheticSpec {
    pub fn video(duration: f64) -> Self {
        Self {
            duration: Some(duration),
            width: 16,
            height: 9,
            color: [200, 60, 60],
            metadata_delay_ms: 0.0,
            seek_latency_ms: 0.0,
            stall_loads: 0,
            has_audio: true,
        }
    }

    pub fn image() -> Self {
        Self {
            duration: None,
            has_audio: false,
            color: [60, 60, 200],
            ..Self::video(0.0)
        }
    }

    pub fn with_color(mut self, color: [u8; 3]) -> Self {
        self.color = color;
        self
    }

    pub fn with_latency(mut self, metadata_delay_ms: f64, seek_latency_ms: f64) -> Self {
        self.metadata_delay_ms = metadata_delay_ms;
        self.seek_latency_ms = seek_latency_ms;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingSeek {
    target: f64,
    done_at_ms: f64,
}

/// A [`MediaHandle`] whose state is a pure function of a shared clock.
pub struct SyntheticMedia {
    id: String,
    spec: SyntheticSpec,
    clock: SharedClock,

    loaded_at_ms: Option<f64>,
    stalled: bool,
    stalls_left: u32,

    paused: bool,
    anchor_pos: f64,
    anchor_ms: f64,
    seek: Option<PendingSeek>,
    seeked_unreported: bool,

    seek_count: u64,
    load_count: u64,
}

impl SyntheticMedia {
    pub fn new(id: impl Into<String>, spec: SyntheticSpec, clock: SharedClock) -> Self {
        let stalls_left = spec.stall_loads;
        Self {
            id: id.into(),
            spec,
            clock,
            loaded_at_ms: None,
            stalled: false,
            stalls_left,
            paused: true,
            anchor_pos: 0.0,
            anchor_ms: 0.0,
            seek: None,
            seeked_unreported: false,
            seek_count: 0,
            load_count: 0,
        }
    }

    /// Seeks issued so far.
    pub fn seek_count(&self) -> u64 {
        self.seek_count
    }

    pub fn load_count(&self) -> u64 {
        self.load_count
    }

    fn now(&self) -> f64 {
        self.clock.now_ms()
    }

    fn length(&self) -> f64 {
        self.spec.duration.unwrap_or(0.0)
    }

    fn is_still(&self) -> bool {
        self.spec.duration.is_none()
    }

    fn metadata_ready_at(&self) -> Option<f64> {
        if self.stalled {
            return None;
        }
        self.loaded_at_ms.map(|t| t + self.spec.metadata_delay_ms)
    }

    fn has_metadata(&self, now: f64) -> bool {
        self.metadata_ready_at().is_some_and(|t| now >= t)
    }

    /// Effective `(position, since_ms, seeking)` without mutating state.
    fn effective_anchor(&self, now: f64) -> (f64, f64, bool) {
        match self.seek {
            Some(seek) if now < seek.done_at_ms => (seek.target, now, true),
            Some(seek) => (seek.target, seek.done_at_ms, false),
            None => (self.anchor_pos, self.anchor_ms, false),
        }
    }

    fn position_at(&self, now: f64) -> f64 {
        if self.is_still() {
            return 0.0;
        }
        let (pos, since, seeking) = self.effective_anchor(now);
        if self.paused || seeking || !self.has_metadata(now) {
            return pos.min(self.length());
        }
        // Playback only advances once data is available.
        let start = self.metadata_ready_at().map_or(since, |t| since.max(t));
        let advanced = pos + ((now - start).max(0.0)) / 1000.0;
        advanced.min(self.length())
    }

    /// Fold a completed seek into the anchor.
    fn settle(&mut self) {
        let now = self.now();
        if let Some(seek) = self.seek {
            if now >= seek.done_at_ms {
                self.anchor_pos = seek.target;
                self.anchor_ms = seek.done_at_ms;
                self.seek = None;
                self.seeked_unreported = true;
            }
        }
    }

    fn frame_color(&self, position: f64) -> [u8; 4] {
        let [r, g, b] = self.spec.color;
        // Cycle through 64 levels per second so consecutive frames differ.
        let step = ((position * 64.0) as u64 % 64) as u8;
        [r, g.wrapping_add(step), b.wrapping_add(step / 2), 255]
    }
}

impl MediaHandle for SyntheticMedia {
    fn source_id(&self) -> &str {
        &self.id
    }

    fn position(&self) -> f64 {
        self.position_at(self.now())
    }

    fn duration(&self) -> Option<f64> {
        if self.has_metadata(self.now()) {
            self.spec.duration
        } else {
            None
        }
    }

    fn ready_state(&self) -> ReadyState {
        let now = self.now();
        if !self.has_metadata(now) {
            return ReadyState::HaveNothing;
        }
        if self.is_seeking() {
            return ReadyState::HaveMetadata;
        }
        ReadyState::HaveEnoughData
    }

    fn is_seeking(&self) -> bool {
        let now = self.now();
        self.effective_anchor(now).2
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn has_ended(&self) -> bool {
        if self.is_still() || self.is_seeking() {
            return false;
        }
        let length = self.length();
        length > 0.0 && self.position() >= length
    }

    fn play(&mut self) {
        self.settle();
        if self.paused && !self.is_still() {
            let now = self.now();
            self.anchor_pos = self.position_at(now);
            self.anchor_ms = now;
            self.paused = false;
        }
    }

    fn pause(&mut self) {
        self.settle();
        if !self.paused {
            let now = self.now();
            self.anchor_pos = self.position_at(now);
            self.anchor_ms = now;
            self.paused = true;
        }
    }

    fn seek(&mut self, position: f64) {
        self.settle();
        let now = self.now();
        let target = position.clamp(0.0, self.length());
        self.seek_count += 1;
        self.anchor_pos = target;
        self.anchor_ms = now;
        self.seek = Some(PendingSeek {
            target,
            done_at_ms: now + self.spec.seek_latency_ms,
        });
    }

    fn take_seeked(&mut self) -> bool {
        self.settle();
        std::mem::take(&mut self.seeked_unreported)
    }

    fn load(&mut self) {
        self.load_count += 1;
        self.loaded_at_ms = Some(self.now());
        self.seek = None;
        self.anchor_pos = 0.0;
        self.anchor_ms = self.now();
        if self.stalls_left > 0 {
            self.stalls_left -= 1;
            self.stalled = true;
        } else {
            self.stalled = false;
        }
    }

    fn current_frame(&self) -> Option<VideoFrame> {
        if self.ready_state() < ReadyState::HaveCurrentData {
            return None;
        }
        Some(VideoFrame::solid(
            self.spec.width,
            self.spec.height,
            self.frame_color(self.position()),
        ))
    }

    fn has_audio(&self) -> bool {
        self.spec.has_audio
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelcut_common::clock::ManualClock;
    use std::sync::Arc;

    fn media(clock: &ManualClock, spec: SyntheticSpec) -> SyntheticMedia {
        SyntheticMedia::new("m", spec, Arc::new(clock.clone()))
    }

    #[test]
    fn test_not_ready_until_loaded() {
        let clock = ManualClock::new(0.0);
        let mut m = media(&clock, SyntheticSpec::video(5.0).with_latency(100.0, 0.0));
        assert_eq!(m.ready_state(), ReadyState::HaveNothing);
        m.load();
        assert_eq!(m.ready_state(), ReadyState::HaveNothing);
        assert_eq!(m.duration(), None);
        clock.advance_ms(100.0);
        assert_eq!(m.ready_state(), ReadyState::HaveEnoughData);
        assert_eq!(m.duration(), Some(5.0));
    }

    #[test]
    fn test_position_advances_while_playing() {
        let clock = ManualClock::new(0.0);
        let mut m = media(&clock, SyntheticSpec::video(5.0));
        m.load();
        m.play();
        clock.advance_ms(1500.0);
        assert!((m.position() - 1.5).abs() < 1e-9);
        m.pause();
        clock.advance_ms(1000.0);
        assert!((m.position() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_seek_completes_after_latency() {
        let clock = ManualClock::new(0.0);
        let mut m = media(&clock, SyntheticSpec::video(5.0).with_latency(0.0, 40.0));
        m.load();
        m.seek(3.0);
        assert!(m.is_seeking());
        assert!(!m.is_presentable());
        assert!(!m.take_seeked());
        clock.advance_ms(40.0);
        assert!(!m.is_seeking());
        assert!(m.take_seeked());
        assert!(!m.take_seeked());
        assert_eq!(m.position(), 3.0);
        assert_eq!(m.seek_count(), 1);
    }

    #[test]
    fn test_playback_ends_at_length() {
        let clock = ManualClock::new(0.0);
        let mut m = media(&clock, SyntheticSpec::video(1.0));
        m.load();
        m.play();
        clock.advance_ms(2000.0);
        assert_eq!(m.position(), 1.0);
        assert!(m.has_ended());
    }

    #[test]
    fn test_still_image_never_moves() {
        let clock = ManualClock::new(0.0);
        let mut m = media(&clock, SyntheticSpec::image());
        m.load();
        m.play();
        clock.advance_ms(1000.0);
        assert_eq!(m.position(), 0.0);
        assert!(!m.has_ended());
        assert!(m.current_frame().is_some());
        assert!(!m.has_audio());
    }

    #[test]
    fn test_frames_differ_over_time() {
        let clock = ManualClock::new(0.0);
        let mut m = media(&clock, SyntheticSpec::video(5.0));
        m.load();
        m.play();
        let a = m.current_frame().unwrap();
        clock.advance_ms(100.0);
        let b = m.current_frame().unwrap();
        assert_ne!(a, b);
    }
}
