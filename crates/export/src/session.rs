//! Export session state machine and progress reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use reelcut_common::error::{EngineError, EngineResult};

/// Stages of an export attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportPhase {
    Idle,
    /// Probing the backend and prerendering audio.
    Preparing,
    /// Pumping frames into the backend.
    Encoding,
    /// Flushing encoders and closing the container.
    Finalizing,
    Done,
    /// Stopped by the user; output discarded.
    Aborted,
    Failed,
}

impl ExportPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted | Self::Failed)
    }

    pub fn can_transition_to(self, next: ExportPhase) -> bool {
        use ExportPhase::*;
        match (self, next) {
            (Idle, Preparing) => true,
            (Preparing, Encoding) => true,
            (Encoding, Finalizing) => true,
            (Finalizing, Done) => true,
            (Preparing | Encoding | Finalizing, Aborted | Failed) => true,
            _ => false,
        }
    }
}

/// Progress report for the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportProgress {
    /// Current progress [0.0, 1.0].
    pub progress: f64,

    /// Frames handed to the backend so far.
    pub frames_rendered: u64,

    /// Frames the finished output must contain.
    pub total_frames: u64,

    pub phase: ExportPhase,
}

/// Progress callback for export rendering.
pub type ProgressCallback = Box<dyn Fn(ExportProgress) + Send>;

/// One export attempt. Discarded after it reaches a terminal phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSession {
    id: u64,
    phase: ExportPhase,
    expected_frames: u64,
    frames_emitted: u64,
    frames_backfilled: u64,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl ExportSession {
    pub fn new(id: u64, expected_frames: u64) -> Self {
        Self {
            id,
            phase: ExportPhase::Idle,
            expected_frames,
            frames_emitted: 0,
            frames_backfilled: 0,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn phase(&self) -> ExportPhase {
        self.phase
    }

    /// `round(total_duration × fps)`.
    pub fn expected_frames(&self) -> u64 {
        self.expected_frames
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    /// Frames duplicated at the end to reach the expected count.
    pub fn frames_backfilled(&self) -> u64 {
        self.frames_backfilled
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn transition(&mut self, next: ExportPhase) -> EngineResult<()> {
        if !self.phase.can_transition_to(next) {
            return Err(EngineError::invalid_state(format!(
                "export cannot move from {:?} to {:?}",
                self.phase, next
            )));
        }
        tracing::info!(session = self.id, from = ?self.phase, to = ?next, "Export phase");
        self.phase = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Move to the terminal phase matching `err`.
    pub fn fail(&mut self, err: &EngineError) {
        let next = if err.is_abort() {
            ExportPhase::Aborted
        } else {
            ExportPhase::Failed
        };
        if self.phase.is_terminal() {
            return;
        }
        if !err.is_abort() {
            self.error = Some(err.to_string());
        }
        if let Err(e) = self.transition(next) {
            tracing::warn!(error = %e, "Could not record export failure");
        }
    }

    pub(crate) fn record_frame(&mut self) {
        self.frames_emitted += 1;
    }

    pub(crate) fn record_backfill(&mut self) {
        self.frames_emitted += 1;
        self.frames_backfilled += 1;
    }

    pub fn progress(&self) -> ExportProgress {
        let progress = match self.phase {
            ExportPhase::Done => 1.0,
            _ if self.expected_frames == 0 => 0.0,
            _ => (self.frames_emitted as f64 / self.expected_frames as f64).min(1.0),
        };
        ExportProgress {
            progress,
            frames_rendered: self.frames_emitted,
            total_frames: self.expected_frames,
            phase: self.phase,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut session = ExportSession::new(1, 270);
        session.transition(ExportPhase::Preparing).unwrap();
        session.transition(ExportPhase::Encoding).unwrap();
        session.transition(ExportPhase::Finalizing).unwrap();
        session.transition(ExportPhase::Done).unwrap();
        assert!(session.phase().is_terminal());
        assert!(session.finished_at().is_some());
    }

    #[test]
    fn test_cannot_skip_encoding() {
        let mut session = ExportSession::new(1, 10);
        session.transition(ExportPhase::Preparing).unwrap();
        assert!(session.transition(ExportPhase::Done).is_err());
        assert_eq!(session.phase(), ExportPhase::Preparing);
    }

    #[test]
    fn test_abort_is_not_recorded_as_error() {
        let mut session = ExportSession::new(1, 10);
        session.transition(ExportPhase::Preparing).unwrap();
        session.transition(ExportPhase::Encoding).unwrap();
        session.fail(&EngineError::SessionAborted);
        assert_eq!(session.phase(), ExportPhase::Aborted);
        assert!(session.error().is_none());
    }

    #[test]
    fn test_failure_keeps_message() {
        let mut session = ExportSession::new(1, 10);
        session.transition(ExportPhase::Preparing).unwrap();
        session.fail(&EngineError::EmptyOutput { bytes: 0 });
        assert_eq!(session.phase(), ExportPhase::Failed);
        assert!(session.error().unwrap().contains("empty"));
    }

    #[test]
    fn test_terminal_phase_is_sticky() {
        let mut session = ExportSession::new(1, 10);
        session.transition(ExportPhase::Preparing).unwrap();
        session.fail(&EngineError::SessionAborted);
        session.fail(&EngineError::EmptyOutput { bytes: 0 });
        assert_eq!(session.phase(), ExportPhase::Aborted);
    }

    #[test]
    fn test_progress_fraction() {
        let mut session = ExportSession::new(1, 4);
        session.transition(ExportPhase::Preparing).unwrap();
        session.transition(ExportPhase::Encoding).unwrap();
        session.record_frame();
        let progress = session.progress();
        assert_eq!(progress.progress, 0.25);
        assert_eq!(progress.frames_rendered, 1);
        assert_eq!(progress.phase, ExportPhase::Encoding);
    }
}
