//! Playback loop: maps the clock to timeline time.
//!
//! Every start bumps `loop_generation`. Host frame callbacks carry the
//! generation they were scheduled under and are ignored once a newer loop
//! exists, so at most one loop ever drives rendering.

use serde::{Deserialize, Serialize};

/// Snapshot of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlaybackState {
    /// Seconds from timeline start.
    pub current_time: f64,
    pub is_playing: bool,
    pub loop_generation: u64,
}

/// What the loop is driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopMode {
    Playback,
    Export,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopPhase {
    Idle,
    Playing,
    /// Page hidden; time frozen until the origin is shifted back.
    Suspended,
    /// Reached the end of the timeline.
    Ended,
    Stopped,
}

/// Result of one loop tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// The tick belongs to a superseded loop.
    Stale,
    /// Loop is not running.
    Idle,
    /// Render this time and schedule another tick.
    Render(f64),
    /// Render this final frame at the total duration; playback is over.
    Final(f64),
    /// Export reached the end. No final render, the session finalizes.
    ExportHalted(f64),
}

#[derive(Debug, Clone)]
pub struct LoopController {
    state: PlaybackState,
    origin_ms: f64,
    mode: LoopMode,
    phase: LoopPhase,
}

impl Default for LoopController {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopController {
    pub fn new() -> Self {
        Self {
            state: PlaybackState::default(),
            origin_ms: 0.0,
            mode: LoopMode::Playback,
            phase: LoopPhase::Idle,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn current_time(&self) -> f64 {
        self.state.current_time
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing
    }

    pub fn generation(&self) -> u64 {
        self.state.loop_generation
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn mode(&self) -> LoopMode {
        self.mode
    }

    pub fn origin_ms(&self) -> f64 {
        self.origin_ms
    }

    /// Whether a loop is running or suspended.
    pub fn is_active(&self) -> bool {
        matches!(self.phase, LoopPhase::Playing | LoopPhase::Suspended)
    }

    /// Start a new loop from the current time. Returns its generation.
    pub fn start(&mut self, now_ms: f64, mode: LoopMode) -> u64 {
        self.state.loop_generation += 1;
        self.origin_ms = now_ms - self.state.current_time * 1000.0;
        self.mode = mode;
        self.phase = LoopPhase::Playing;
        self.state.is_playing = mode == LoopMode::Playback;
        tracing::debug!(
            generation = self.state.loop_generation,
            ?mode,
            from = self.state.current_time,
            "Loop started"
        );
        self.state.loop_generation
    }

    /// Advance the loop issued under `generation`.
    pub fn tick(&mut self, generation: u64, now_ms: f64, total_duration: f64) -> TickOutcome {
        if generation != self.state.loop_generation {
            return TickOutcome::Stale;
        }
        if self.phase != LoopPhase::Playing {
            return TickOutcome::Idle;
        }

        let total = total_duration.max(0.0);
        let elapsed = ((now_ms - self.origin_ms) / 1000.0).clamp(0.0, total);
        self.state.current_time = elapsed;

        if elapsed < total {
            return TickOutcome::Render(elapsed);
        }
        match self.mode {
            LoopMode::Playback => {
                self.phase = LoopPhase::Ended;
                self.state.is_playing = false;
                TickOutcome::Final(total)
            }
            LoopMode::Export => {
                self.phase = LoopPhase::Ended;
                TickOutcome::ExportHalted(total)
            }
        }
    }

    /// Stop the loop and invalidate outstanding callbacks.
    pub fn stop(&mut self) {
        if self.phase != LoopPhase::Idle {
            self.phase = LoopPhase::Stopped;
        }
        self.state.is_playing = false;
        self.state.loop_generation += 1;
    }

    /// Freeze time at `now_ms` while the page is hidden.
    ///
    /// Casual playback drops to the paused UI state; export keeps its
    /// session alive.
    pub fn suspend(&mut self, now_ms: f64, total_duration: f64) {
        if self.phase != LoopPhase::Playing {
            return;
        }
        let elapsed = ((now_ms - self.origin_ms) / 1000.0).clamp(0.0, total_duration.max(0.0));
        self.state.current_time = elapsed;
        self.phase = LoopPhase::Suspended;
        if self.mode == LoopMode::Playback {
            self.state.is_playing = false;
        }
    }

    /// Resume a suspended export loop.
    pub fn resume(&mut self) {
        if self.phase == LoopPhase::Suspended {
            self.phase = LoopPhase::Playing;
        }
    }

    /// Move the clock origin forward by a hidden interval.
    pub fn shift_origin(&mut self, delta_ms: f64) {
        self.origin_ms += delta_ms;
    }

    /// Set the position without touching the loop (seek).
    pub fn set_current_time(&mut self, time: f64) {
        self.state.current_time = time.max(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_sets_origin_from_current_time() {
        let mut lc = LoopController::new();
        lc.set_current_time(2.0);
        lc.start(10_000.0, LoopMode::Playback);
        assert_eq!(lc.origin_ms(), 8_000.0);
        assert!(lc.is_playing());
    }

    #[test]
    fn test_tick_maps_clock_to_time() {
        let mut lc = LoopController::new();
        let generation = lc.start(1_000.0, LoopMode::Playback);
        assert_eq!(lc.tick(generation, 2_500.0, 10.0), TickOutcome::Render(1.5));
        assert_eq!(lc.current_time(), 1.5);
    }

    #[test]
    fn test_stale_generation_is_ignored() {
        let mut lc = LoopController::new();
        let first = lc.start(0.0, LoopMode::Playback);
        let second = lc.start(0.0, LoopMode::Playback);
        assert_ne!(first, second);
        assert_eq!(lc.tick(first, 500.0, 10.0), TickOutcome::Stale);
        assert_eq!(lc.current_time(), 0.0);
        assert_eq!(lc.tick(second, 500.0, 10.0), TickOutcome::Render(0.5));
    }

    #[test]
    fn test_playback_renders_final_frame_then_stops() {
        let mut lc = LoopController::new();
        let generation = lc.start(0.0, LoopMode::Playback);
        assert_eq!(lc.tick(generation, 12_000.0, 10.0), TickOutcome::Final(10.0));
        assert_eq!(lc.phase(), LoopPhase::Ended);
        assert!(!lc.is_playing());
        assert_eq!(lc.tick(generation, 13_000.0, 10.0), TickOutcome::Idle);
    }

    #[test]
    fn test_export_halts_without_final_render() {
        let mut lc = LoopController::new();
        let generation = lc.start(0.0, LoopMode::Export);
        assert!(!lc.is_playing());
        assert_eq!(
            lc.tick(generation, 9_000.0, 9.0),
            TickOutcome::ExportHalted(9.0)
        );
    }

    #[test]
    fn test_stop_invalidates_callbacks() {
        let mut lc = LoopController::new();
        let generation = lc.start(0.0, LoopMode::Playback);
        lc.stop();
        assert_eq!(lc.tick(generation, 100.0, 10.0), TickOutcome::Stale);
        assert_eq!(lc.phase(), LoopPhase::Stopped);
    }

    #[test]
    fn test_suspend_and_shift_preserves_time() {
        let mut lc = LoopController::new();
        let generation = lc.start(0.0, LoopMode::Export);
        lc.tick(generation, 3_000.0, 10.0);
        lc.suspend(3_000.0, 10.0);
        assert_eq!(lc.tick(generation, 8_000.0, 10.0), TickOutcome::Idle);
        lc.shift_origin(5_000.0);
        lc.resume();
        assert_eq!(lc.tick(generation, 8_000.0, 10.0), TickOutcome::Render(3.0));
    }
}
