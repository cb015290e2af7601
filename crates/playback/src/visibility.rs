//! Page visibility recovery.
//!
//! While hidden the host stops delivering animation callbacks and media
//! timers may be throttled. Hiding freezes the loop and pauses handles; on
//! show the clock origin moves forward by the hidden span so the timeline
//! continues from where it stopped, handles are re-aligned and exactly one
//! frame is redrawn.

use crate::compositor::RenderMode;
use crate::engine::PlaybackEngine;
use crate::transport::{LoopMode, LoopPhase};

#[derive(Debug, Clone, Default)]
pub struct VisibilityState {
    hidden_at_ms: Option<f64>,
    session_active: bool,
    needs_resync: bool,
    hidden_total_ms: f64,
}

impl VisibilityState {
    pub fn is_hidden(&self) -> bool {
        self.hidden_at_ms.is_some()
    }

    /// Total time spent hidden while a session was running.
    pub fn hidden_total_ms(&self) -> f64 {
        self.hidden_total_ms
    }

    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }
}

impl PlaybackEngine {
    pub fn visibility(&self) -> &VisibilityState {
        &self.visibility
    }

    pub fn on_visibility_change(&mut self, visible: bool) {
        if visible {
            self.on_show();
        } else {
            self.on_hide();
        }
    }

    pub fn on_hide(&mut self) {
        if self.visibility.is_hidden() {
            return;
        }
        let now = self.now_ms();
        let session_active = self.loop_phase() == LoopPhase::Playing;
        self.visibility.hidden_at_ms = Some(now);
        self.visibility.session_active = session_active;

        if session_active {
            let total = self.timeline().total_duration();
            self.suspend_loop(now, total);
            self.media_mut().pause_all();
            self.audio_mut().suspend();
            self.visibility.needs_resync = true;
        }
        tracing::info!(
            session_active,
            exporting = self.is_exporting(),
            position = self.current_time(),
            "Hidden"
        );
    }

    /// Returns the hidden duration in milliseconds.
    pub fn on_show(&mut self) -> Option<f64> {
        let hidden_at = self.visibility.hidden_at_ms.take()?;
        let now = self.now_ms();
        let hidden_ms = (now - hidden_at).max(0.0);
        let session_active = std::mem::take(&mut self.visibility.session_active);

        if session_active {
            self.shift_loop_origin(hidden_ms);
            self.visibility.hidden_total_ms += hidden_ms;
        }
        self.audio_mut().resume();

        if std::mem::take(&mut self.visibility.needs_resync) {
            // Export keeps running; casual playback stays paused.
            let continue_session = session_active && self.transport().mode() == LoopMode::Export;
            self.finish_suspension(continue_session);
            let time = self.current_time();
            self.realign_handles(time, continue_session);
            let mode = if continue_session {
                RenderMode::export()
            } else {
                RenderMode::paused()
            };
            self.render_at(time, mode);
        }

        tracing::info!(hidden_ms, position = self.current_time(), "Visible again");
        Some(hidden_ms)
    }
}
