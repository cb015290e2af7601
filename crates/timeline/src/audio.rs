//! Audio tracks placed independently of the visual sequence.

use serde::{Deserialize, Serialize};

use crate::fade::{Fade, FadeEnvelope, GainAutomation};
use crate::item::SourceId;

/// Single background music track.
///
/// `start_point` is the offset into the source; `delay` is where the
/// track begins on the timeline. It may start after or extend past the
/// timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundTrack {
    pub source: SourceId,
    #[serde(default)]
    pub start_point: f64,
    #[serde(default)]
    pub delay: f64,
    #[serde(default = "default_volume")]
    pub volume: f64,
    #[serde(default)]
    pub fade_in: Fade,
    #[serde(default)]
    pub fade_out: Fade,
    /// Source length in seconds.
    pub duration: f64,
}

/// Narration clip keyed by its timeline start and a trim window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrationClip {
    pub id: String,
    pub source: SourceId,
    pub start_time: f64,
    #[serde(default)]
    pub trim_start: f64,
    pub trim_end: f64,
    #[serde(default = "default_volume")]
    pub volume: f64,
    #[serde(default)]
    pub fade_in: Fade,
    #[serde(default)]
    pub fade_out: Fade,
    /// Source length in seconds.
    pub duration: f64,
}

fn default_volume() -> f64 {
    1.0
}

/// Where an audio-bearing source sits on the timeline.
///
/// Shared by live playback and offline mixdown so both evaluate the
/// same envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPlacement {
    pub source: SourceId,
    /// Timeline time at which the source starts sounding.
    pub timeline_start: f64,
    /// Source position that plays at `timeline_start`.
    pub source_offset: f64,
    /// Playable length in seconds.
    pub length: f64,
    pub volume: f64,
    pub fade_in: Fade,
    pub fade_out: Fade,
}

impl BackgroundTrack {
    pub fn new(source: impl Into<SourceId>, duration: f64) -> Self {
        Self {
            source: source.into(),
            start_point: 0.0,
            delay: 0.0,
            volume: 1.0,
            fade_in: Fade::OFF,
            fade_out: Fade::OFF,
            duration,
        }
    }

    pub fn placement(&self) -> AudioPlacement {
        AudioPlacement {
            source: self.source.clone(),
            timeline_start: self.delay.max(0.0),
            source_offset: self.start_point.max(0.0),
            length: (self.duration - self.start_point).max(0.0),
            volume: self.volume,
            fade_in: self.fade_in,
            fade_out: self.fade_out,
        }
    }
}

impl NarrationClip {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<SourceId>,
        start_time: f64,
        duration: f64,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            start_time,
            trim_start: 0.0,
            trim_end: duration,
            volume: 1.0,
            fade_in: Fade::OFF,
            fade_out: Fade::OFF,
            duration,
        }
    }

    /// Playable window length.
    pub fn playable(&self) -> f64 {
        (self.trim_end - self.trim_start).max(0.0)
    }

    pub fn placement(&self) -> AudioPlacement {
        AudioPlacement {
            source: self.source.clone(),
            timeline_start: self.start_time.max(0.0),
            source_offset: self.trim_start.max(0.0),
            length: self.playable(),
            volume: self.volume,
            fade_in: self.fade_in,
            fade_out: self.fade_out,
        }
    }
}

impl AudioPlacement {
    /// Timeline time where the source stops sounding, before clipping.
    pub fn end(&self) -> f64 {
        self.timeline_start + self.length
    }

    /// End clipped to the timeline's total duration.
    pub fn clipped_end(&self, total_duration: f64) -> f64 {
        self.end().min(total_duration)
    }

    /// Length actually audible within a timeline of `total_duration`.
    pub fn clipped_length(&self, total_duration: f64) -> f64 {
        (self.clipped_end(total_duration) - self.timeline_start).max(0.0)
    }

    pub fn is_active_at(&self, time: f64, total_duration: f64) -> bool {
        time >= self.timeline_start && time < self.clipped_end(total_duration)
    }

    /// Source position that should be playing at timeline `time`.
    pub fn source_position_at(&self, time: f64) -> Option<f64> {
        if time < self.timeline_start || time >= self.end() {
            return None;
        }
        Some(self.source_offset + (time - self.timeline_start))
    }

    /// Envelope over the audible span. The fade-out anchors at the
    /// clipped end so tracks running past the timeline still fade out.
    pub fn envelope(&self, total_duration: f64) -> FadeEnvelope {
        FadeEnvelope::new(
            self.fade_in,
            self.fade_out,
            self.clipped_length(total_duration),
        )
    }

    /// Gain at timeline `time`; zero outside the audible span.
    pub fn gain_at(&self, time: f64, total_duration: f64) -> f64 {
        if !self.is_active_at(time, total_duration) {
            return 0.0;
        }
        self.envelope(total_duration)
            .level(time - self.timeline_start, self.volume)
    }

    pub fn automation(&self, total_duration: f64) -> GainAutomation {
        if self.clipped_length(total_duration) <= 0.0 {
            return GainAutomation::silent();
        }
        GainAutomation::from_envelope(
            &self.envelope(total_duration),
            self.volume,
            self.timeline_start,
        )
    }
}
