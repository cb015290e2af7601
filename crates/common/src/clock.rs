//! Clock and timing utilities for playback synchronization.
//!
//! Every engine component reads time through the [`Clock`] trait so the
//! same code runs against the host's monotonic clock, a manually driven
//! clock in tests, or a runtime's virtual clock. This module provides:
//! - The clock abstraction and two implementations
//! - Throttling and debouncing helpers for user gestures
//! - Drift measurement between a media handle and its timeline target

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A monotonic millisecond clock.
pub trait Clock: Send + Sync {
    /// Milliseconds since an arbitrary fixed epoch.
    fn now_ms(&self) -> f64;
}

/// Shared clock handle passed between components.
pub type SharedClock = Arc<dyn Clock>;

/// Clock anchored to the process's monotonic clock.
#[derive(Debug, Clone)]
pub struct SystemClock {
    epoch: Instant,

    /// Wall-clock time at epoch (ISO 8601 string).
    epoch_wall: String,
}

impl SystemClock {
    /// Create a new clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Wall-clock time at clock start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }

    /// Seconds elapsed since the clock started.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64() * 1000.0
    }
}

/// Manually advanced clock for deterministic tests and offline drivers.
///
/// Clones share the same underlying time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: f64) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(start_ms.to_bits())),
        }
    }

    pub fn set_ms(&self, ms: f64) {
        self.bits.store(ms.to_bits(), Ordering::SeqCst);
    }

    pub fn advance_ms(&self, delta_ms: f64) {
        let now = self.now_ms();
        self.set_ms(now + delta_ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

/// Drift between a media handle's reported position and its target.
#[derive(Debug, Clone, Copy)]
pub struct DriftMeasurement {
    /// Position the timeline says the handle should be at (seconds).
    pub target_secs: f64,
    /// Position the handle reports (seconds).
    pub reported_secs: f64,
}

impl DriftMeasurement {
    pub fn new(target_secs: f64, reported_secs: f64) -> Self {
        Self {
            target_secs,
            reported_secs,
        }
    }

    /// Drift in seconds (positive = handle is ahead).
    pub fn drift_secs(&self) -> f64 {
        self.reported_secs - self.target_secs
    }

    /// Drift in milliseconds.
    pub fn drift_ms(&self) -> f64 {
        self.drift_secs() * 1000.0
    }

    /// Whether drift exceeds an acceptable threshold (seconds).
    pub fn exceeds(&self, threshold_secs: f64) -> bool {
        self.drift_secs().abs() > threshold_secs
    }
}

/// Minimum-interval gate for expensive operations.
///
/// The first call always fires. A forced fire resets the interval.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval_ms: f64,
    last_fire_ms: Option<f64>,
}

impl Throttle {
    pub fn new(interval_ms: f64) -> Self {
        Self {
            interval_ms,
            last_fire_ms: None,
        }
    }

    /// Returns true and records the fire time if the interval has lapsed.
    pub fn should_fire(&mut self, now_ms: f64) -> bool {
        match self.last_fire_ms {
            Some(last) if now_ms < last + self.interval_ms => false,
            _ => {
                self.last_fire_ms = Some(now_ms);
                true
            }
        }
    }

    /// Whether the interval has lapsed, without recording a fire.
    pub fn is_open(&self, now_ms: f64) -> bool {
        self.last_fire_ms
            .map(|last| now_ms >= last + self.interval_ms)
            .unwrap_or(true)
    }

    /// Record an unconditional fire.
    pub fn force(&mut self, now_ms: f64) {
        self.last_fire_ms = Some(now_ms);
    }

    pub fn reset(&mut self) {
        self.last_fire_ms = None;
    }

    pub fn interval_ms(&self) -> f64 {
        self.interval_ms
    }
}

/// Rejects repeated invocations inside a short window.
#[derive(Debug, Clone)]
pub struct Debounce {
    window_ms: f64,
    last_accepted_ms: Option<f64>,
}

impl Debounce {
    pub fn new(window_ms: f64) -> Self {
        Self {
            window_ms,
            last_accepted_ms: None,
        }
    }

    pub fn accept(&mut self, now_ms: f64) -> bool {
        match self.last_accepted_ms {
            Some(last) if now_ms - last < self.window_ms => false,
            _ => {
                self.last_accepted_ms = Some(now_ms);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new(10.0);
        let other = clock.clone();
        clock.advance_ms(5.0);
        assert_eq!(other.now_ms(), 15.0);
    }

    #[test]
    fn test_system_clock_monotonic() {
        let clock = SystemClock::start();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
        assert!(clock.elapsed_secs() < 1.0);
    }

    #[test]
    fn test_drift_measurement() {
        let drift = DriftMeasurement::new(2.0, 2.05);
        assert!((drift.drift_ms() - 50.0).abs() < 1e-9);
        assert!(drift.exceeds(0.04));
        assert!(!drift.exceeds(0.3));
    }

    #[test]
    fn test_throttle() {
        let mut throttle = Throttle::new(100.0);
        assert!(throttle.should_fire(0.0));
        assert!(!throttle.should_fire(50.0));
        assert!(!throttle.is_open(99.0));
        assert!(throttle.should_fire(100.0));
        throttle.force(150.0);
        assert!(!throttle.should_fire(200.0));
    }

    #[test]
    fn test_debounce() {
        let mut debounce = Debounce::new(250.0);
        assert!(debounce.accept(0.0));
        assert!(!debounce.accept(100.0));
        assert!(debounce.accept(300.0));
    }
}
