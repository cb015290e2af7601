//! Cross-task signals for a running export.
//!
//! The export future runs on the host's task and owns the engine. The host
//! keeps an [`ExportHandle`] to stop, complete or report visibility from
//! elsewhere; the pump observes those signals between frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reelcut_common::clock::Clock;
use reelcut_common::error::{EngineError, EngineResult};
use tokio::sync::watch;

/// Abort and graceful-completion flags shared with the host.
#[derive(Debug, Clone, Default)]
pub struct ExportControl {
    abort: Arc<AtomicBool>,
    complete: Arc<AtomicBool>,
}

impl ExportControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hard stop: partial output is discarded.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    /// Graceful stop at the current position.
    pub fn complete(&self) {
        self.complete.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    pub fn is_completing(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
    }

    /// `Err(SessionAborted)` once an abort was requested.
    pub fn check(&self) -> EngineResult<()> {
        if self.is_aborted() {
            Err(EngineError::SessionAborted)
        } else {
            Ok(())
        }
    }

    pub(crate) fn reset(&self) {
        self.abort.store(false, Ordering::SeqCst);
        self.complete.store(false, Ordering::SeqCst);
    }

    /// Sleep for `duration`, waking early on abort.
    pub async fn sleep(&self, duration: Duration) -> EngineResult<()> {
        let deadline = tokio::time::Instant::now() + duration;
        loop {
            self.check()?;
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(());
            }
            let step = (deadline - now).min(ABORT_POLL);
            tokio::time::sleep(step).await;
        }
    }
}

const ABORT_POLL: Duration = Duration::from_millis(50);

/// Document visibility as seen by the export pump.
#[derive(Debug)]
pub struct VisibilityGate {
    tx: watch::Sender<bool>,
}

impl Default for VisibilityGate {
    fn default() -> Self {
        Self::new()
    }
}

impl VisibilityGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { tx }
    }

    pub fn set_visible(&self, visible: bool) {
        self.tx.send_if_modified(|current| {
            if *current == visible {
                return false;
            }
            *current = visible;
            true
        });
    }

    pub fn is_visible(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// What the host holds while an export runs.
#[derive(Debug, Clone)]
pub struct ExportHandle {
    control: ExportControl,
    visibility: Arc<VisibilityGate>,
}

impl ExportHandle {
    pub(crate) fn new(control: ExportControl, visibility: Arc<VisibilityGate>) -> Self {
        Self {
            control,
            visibility,
        }
    }

    /// Finish early, keeping what was rendered so far.
    pub fn complete_export(&self) {
        tracing::info!("Export completion requested");
        self.control.complete();
    }

    /// Abort and discard the partial output.
    pub fn stop_export(&self) {
        tracing::info!("Export abort requested");
        self.control.abort();
    }

    pub fn set_visible(&self, visible: bool) {
        self.visibility.set_visible(visible);
    }

    pub fn control(&self) -> &ExportControl {
        &self.control
    }
}

/// [`Clock`] backed by the tokio timer, so paused test runtimes drive
/// media and the export pump from the same virtual time.
#[derive(Debug, Clone)]
pub struct TokioClock {
    epoch: tokio::time::Instant,
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            epoch: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64() * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_is_reported_as_session_aborted() {
        let control = ExportControl::new();
        assert!(control.check().is_ok());
        control.clone().abort();
        assert!(matches!(control.check(), Err(EngineError::SessionAborted)));
    }

    #[test]
    fn test_complete_does_not_abort() {
        let control = ExportControl::new();
        control.complete();
        assert!(control.is_completing());
        assert!(control.check().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_virtual_time() {
        let clock = TokioClock::new();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!((clock.now_ms() - 1500.0).abs() < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_wakes_on_abort() {
        let control = ExportControl::new();
        let remote = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            remote.abort();
        });
        let started = tokio::time::Instant::now();
        let result = control.sleep(Duration::from_secs(10)).await;
        assert!(matches!(result, Err(EngineError::SessionAborted)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_gate_notifies_only_on_change() {
        let gate = VisibilityGate::new();
        let mut rx = gate.subscribe();
        gate.set_visible(true);
        assert!(!rx.has_changed().unwrap());
        gate.set_visible(false);
        assert!(rx.has_changed().unwrap());
        rx.changed().await.unwrap();
        assert!(!*rx.borrow());
    }
}
