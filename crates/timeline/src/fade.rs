//! Linear fade envelopes and gain automation.

use serde::{Deserialize, Serialize};

/// A single fade setting: on/off plus ramp length.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Fade {
    pub enabled: bool,
    /// Ramp length in seconds.
    pub duration: f64,
}

impl Fade {
    pub const OFF: Fade = Fade {
        enabled: false,
        duration: 0.0,
    };

    pub fn on(duration: f64) -> Self {
        Self {
            enabled: true,
            duration,
        }
    }

    /// Ramp length if the fade actually applies.
    pub fn active_duration(&self) -> Option<f64> {
        (self.enabled && self.duration > 0.0).then_some(self.duration)
    }
}

/// Fade-in/fade-out envelope over a span of `duration` seconds.
///
/// The factor is `local / fade_in` while ramping in and
/// `(duration - local) / fade_out` while ramping out, each clamped to
/// `[0, 1]`. The two ramps are evaluated independently and multiplied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeEnvelope {
    pub fade_in: Fade,
    pub fade_out: Fade,
    pub duration: f64,
}

impl FadeEnvelope {
    pub fn new(fade_in: Fade, fade_out: Fade, duration: f64) -> Self {
        Self {
            fade_in,
            fade_out,
            duration,
        }
    }

    /// An envelope that is always 1.
    pub fn flat(duration: f64) -> Self {
        Self::new(Fade::OFF, Fade::OFF, duration)
    }

    pub fn fade_in_factor(&self, local: f64) -> f64 {
        match self.fade_in.active_duration() {
            Some(ramp) => (local / ramp).clamp(0.0, 1.0),
            None => 1.0,
        }
    }

    pub fn fade_out_factor(&self, local: f64) -> f64 {
        match self.fade_out.active_duration() {
            Some(ramp) => ((self.duration - local) / ramp).clamp(0.0, 1.0),
            None => 1.0,
        }
    }

    /// Combined factor in `[0, 1]` at `local` seconds into the span.
    pub fn alpha(&self, local: f64) -> f64 {
        self.fade_in_factor(local) * self.fade_out_factor(local)
    }

    /// Envelope applied to a base level (volume or opacity).
    pub fn level(&self, local: f64, base: f64) -> f64 {
        base * self.alpha(local)
    }

    /// Breakpoints `(local_time, level)` describing the envelope as
    /// piecewise-linear automation.
    pub fn breakpoints(&self, base: f64) -> Vec<(f64, f64)> {
        let duration = self.duration.max(0.0);
        let mut times = vec![0.0, duration];
        if let Some(ramp) = self.fade_in.active_duration() {
            times.push(ramp.min(duration));
        }
        if let Some(ramp) = self.fade_out.active_duration() {
            times.push((duration - ramp).max(0.0));
        }
        times.sort_by(|a, b| a.total_cmp(b));
        times.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
        times
            .into_iter()
            .map(|t| (t, self.level(t, base)))
            .collect()
    }
}

/// Piecewise-linear gain automation in timeline time.
///
/// Outside `[start, end)` the gain is zero.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GainAutomation {
    points: Vec<(f64, f64)>,
    start: f64,
    end: f64,
}

impl GainAutomation {
    /// Build automation by placing an envelope at `start` on the timeline.
    pub fn from_envelope(envelope: &FadeEnvelope, base: f64, start: f64) -> Self {
        let points = envelope
            .breakpoints(base)
            .into_iter()
            .map(|(t, v)| (start + t, v))
            .collect();
        Self {
            points,
            start,
            end: start + envelope.duration.max(0.0),
        }
    }

    /// Automation that is silent everywhere.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    /// Gain at timeline time `t`.
    pub fn value_at(&self, t: f64) -> f64 {
        if self.points.is_empty() || t < self.start || t >= self.end {
            return 0.0;
        }
        let idx = self.points.partition_point(|(pt, _)| *pt <= t);
        if idx == 0 {
            return self.points[0].1;
        }
        if idx >= self.points.len() {
            return self.points[self.points.len() - 1].1;
        }
        let (t0, v0) = self.points[idx - 1];
        let (t1, v1) = self.points[idx];
        if t1 - t0 <= f64::EPSILON {
            return v1;
        }
        v0 + (v1 - v0) * ((t - t0) / (t1 - t0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fade_in_starts_at_zero_and_reaches_base() {
        let env = FadeEnvelope::new(Fade::on(1.5), Fade::OFF, 10.0);
        assert_eq!(env.level(0.0, 0.8), 0.0);
        assert!((env.level(1.5, 0.8) - 0.8).abs() < 1e-12);
        assert!((env.level(0.75, 0.8) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_fade_out_reaches_zero_at_end() {
        let env = FadeEnvelope::new(Fade::OFF, Fade::on(2.0), 10.0);
        assert_eq!(env.alpha(10.0), 0.0);
        assert!((env.alpha(9.0) - 0.5).abs() < 1e-12);
        assert_eq!(env.alpha(8.0), 1.0);
    }

    #[test]
    fn test_disabled_fade_ignores_duration() {
        let env = FadeEnvelope::new(
            Fade {
                enabled: false,
                duration: 3.0,
            },
            Fade::OFF,
            5.0,
        );
        assert_eq!(env.alpha(0.0), 1.0);
    }

    #[test]
    fn test_automation_matches_envelope() {
        let env = FadeEnvelope::new(Fade::on(1.0), Fade::on(1.0), 4.0);
        let auto = GainAutomation::from_envelope(&env, 0.5, 2.0);
        assert_eq!(auto.value_at(1.9), 0.0);
        assert_eq!(auto.value_at(2.0), 0.0);
        assert!((auto.value_at(2.5) - 0.25).abs() < 1e-12);
        assert!((auto.value_at(4.0) - 0.5).abs() < 1e-12);
        assert!((auto.value_at(5.5) - 0.25).abs() < 1e-12);
        assert_eq!(auto.value_at(6.0), 0.0);
    }

    #[test]
    fn test_breakpoints_overlapping_ramps() {
        let env = FadeEnvelope::new(Fade::on(3.0), Fade::on(3.0), 4.0);
        let points = env.breakpoints(1.0);
        assert_eq!(points.first().map(|p| p.1), Some(0.0));
        assert_eq!(points.last().map(|p| p.1), Some(0.0));
        assert!(points.windows(2).all(|w| w[0].0 < w[1].0));
    }
}
