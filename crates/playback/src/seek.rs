//! Scrub gestures: start, change, end.
//!
//! Surface redraws follow every change immediately while handle seeks are
//! throttled, with the latest value held as pending until the interval
//! lapses. On release playback resumes only once the seeked frame is
//! decodable, or after a bounded timeout. Each gesture bumps the seek
//! generation so a superseded settle never resumes anything.

use reelcut_common::clock::Throttle;
use reelcut_common::error::{EngineError, EngineResult};

use crate::compositor::RenderMode;
use crate::engine::PlaybackEngine;
use crate::media::ReadyState;

#[derive(Debug, Clone, Copy)]
struct Settle {
    generation: u64,
    resume: bool,
    deadline_ms: f64,
    next_poll_ms: f64,
}

/// State of the current scrub gesture.
#[derive(Debug, Clone)]
pub struct SeekSession {
    generation: u64,
    dragging: bool,
    pending_value: Option<f64>,
    was_playing_before_seek: bool,
    throttle: Throttle,
    settle: Option<Settle>,
}

impl SeekSession {
    pub fn new(throttle_ms: f64) -> Self {
        Self {
            generation: 0,
            dragging: false,
            pending_value: None,
            was_playing_before_seek: false,
            throttle: Throttle::new(throttle_ms),
            settle: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    /// Latest value not yet applied to the handles.
    pub fn pending_value(&self) -> Option<f64> {
        self.pending_value
    }

    pub fn was_playing_before_seek(&self) -> bool {
        self.was_playing_before_seek
    }

    /// Whether a release is waiting for the seeked frame.
    pub fn is_settling(&self) -> bool {
        self.settle.is_some()
    }

    /// Drop any gesture in flight.
    pub(crate) fn cancel(&mut self) {
        if self.dragging || self.settle.is_some() {
            self.generation += 1;
        }
        self.dragging = false;
        self.pending_value = None;
        self.settle = None;
    }
}

impl PlaybackEngine {
    /// Begin a scrub gesture. Playback pauses; the current time is kept.
    pub fn seek_start(&mut self) -> EngineResult<()> {
        if self.is_exporting() {
            return Err(EngineError::invalid_state("cannot seek during export"));
        }
        let was_playing = self.is_playing() || self.is_start_pending();
        self.halt();

        let session = &mut self.seek;
        session.generation += 1;
        session.dragging = true;
        session.pending_value = None;
        session.settle = None;
        session.was_playing_before_seek = was_playing;
        session.throttle.reset();
        tracing::debug!(generation = session.generation, was_playing, "Seek started");
        Ok(())
    }

    /// Move the scrub position to `value` seconds.
    pub fn seek_change(&mut self, value: f64) -> EngineResult<()> {
        if !self.seek.dragging {
            return self.seek_to(value);
        }
        let now = self.now_ms();
        let value = value.clamp(0.0, self.timeline().total_duration());
        self.set_position(value);
        self.render_at(value, RenderMode::scrub());

        if self.seek.throttle.should_fire(now) {
            self.seek.pending_value = None;
            self.realign_handles(value, false);
        } else {
            self.seek.pending_value = Some(value);
        }
        Ok(())
    }

    /// Release the gesture. Applies any pending value, then resumes
    /// playback once the frame at the new position is ready.
    pub fn seek_end(&mut self) -> EngineResult<()> {
        if self.is_exporting() {
            return Err(EngineError::invalid_state("cannot seek during export"));
        }
        let now = self.now_ms();
        let value = self
            .seek
            .pending_value
            .take()
            .unwrap_or_else(|| self.current_time());
        self.set_position(value);
        self.seek.dragging = false;
        self.seek.throttle.force(now);
        self.realign_handles(value, false);

        let resume = self.seek.was_playing_before_seek;
        self.seek.settle = Some(Settle {
            generation: self.seek.generation,
            resume,
            deadline_ms: now + self.config().tuning.seek_resume_timeout_ms,
            next_poll_ms: now,
        });
        tracing::debug!(value, resume, "Seek released");
        self.poll_seek(now);
        Ok(())
    }

    /// Jump straight to `value` (click on the ruler, keyboard).
    pub fn seek_to(&mut self, value: f64) -> EngineResult<()> {
        self.seek_start()?;
        let value = value.clamp(0.0, self.timeline().total_duration());
        self.set_position(value);
        self.seek.pending_value = Some(value);
        self.seek_end()
    }

    /// Flush throttled values and finish settled releases.
    pub(crate) fn poll_seek(&mut self, now: f64) {
        if self.seek.dragging {
            if let Some(value) = self.seek.pending_value {
                if self.seek.throttle.should_fire(now) {
                    self.seek.pending_value = None;
                    self.realign_handles(value, false);
                }
            }
            return;
        }

        let Some(mut settle) = self.seek.settle else {
            return;
        };
        if settle.generation != self.seek.generation {
            self.seek.settle = None;
            return;
        }
        let timed_out = now >= settle.deadline_ms;
        if now < settle.next_poll_ms && !timed_out {
            return;
        }
        settle.next_poll_ms = now + self.config().tuning.seek_resume_poll_ms;
        self.seek.settle = Some(settle);

        let ready = self.seeked_frame_ready(settle.resume);
        if !ready && !timed_out {
            return;
        }
        if !ready {
            tracing::warn!(
                position = self.current_time(),
                "Seek did not settle in time, continuing"
            );
        }

        self.seek.settle = None;
        let time = self.current_time();
        self.render_at(time, RenderMode::settled_seek());
        if settle.resume {
            self.begin_loop(now);
        }
    }

    /// A completed "seeked" notification, or a handle that is already
    /// past the seek with enough data.
    fn seeked_frame_ready(&mut self, resume: bool) -> bool {
        let Some(source) = self.active_video_source(self.current_time()) else {
            return true;
        };
        let Some(handle) = self.media_mut().get_mut(&source) else {
            return true;
        };
        let seeked = handle.take_seeked();
        let needed = if resume {
            ReadyState::HaveFutureData
        } else {
            ReadyState::HaveCurrentData
        };
        seeked || (!handle.is_seeking() && handle.ready_state() >= needed)
    }
}
