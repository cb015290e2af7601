//! Visual items: the ordered video/image sequence.

use serde::{Deserialize, Serialize};

use crate::audio::AudioPlacement;
use crate::fade::{Fade, FadeEnvelope};
use crate::timeline::TimelineError;

/// Identifier of an underlying media source handle.
pub type SourceId = String;

/// Kind of visual item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualKind {
    Video,
    Image,
}

/// A single item in the visual sequence.
///
/// `duration` is the authoritative playable length. For video it equals
/// `trim_end - trim_start`; a video with `duration == 0` is a
/// metadata-pending placeholder occupying no timeline width.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualItem {
    pub id: String,
    pub kind: VisualKind,
    pub source: SourceId,
    pub duration: f64,

    /// Full source length (video only).
    #[serde(default)]
    pub original_duration: f64,
    #[serde(default)]
    pub trim_start: f64,
    #[serde(default)]
    pub trim_end: f64,

    /// User scale on top of fit-to-surface.
    #[serde(default = "default_unit")]
    pub scale: f64,
    /// Offset from the surface centre, in output pixels.
    #[serde(default)]
    pub offset_x: f64,
    #[serde(default)]
    pub offset_y: f64,

    #[serde(default = "default_unit")]
    pub volume: f64,
    #[serde(default)]
    pub muted: bool,

    #[serde(default)]
    pub fade_in: Fade,
    #[serde(default)]
    pub fade_out: Fade,

    #[serde(default)]
    pub locked: bool,
}

fn default_unit() -> f64 {
    1.0
}

impl VisualItem {
    /// A still image shown for `duration` seconds.
    pub fn image(id: impl Into<String>, source: impl Into<SourceId>, duration: f64) -> Self {
        Self::base(id.into(), VisualKind::Image, source.into(), duration.max(0.0))
    }

    /// A video clip. Pass `0.0` while the source length is still unknown.
    pub fn video(id: impl Into<String>, source: impl Into<SourceId>, original_duration: f64) -> Self {
        let original = original_duration.max(0.0);
        let mut item = Self::base(id.into(), VisualKind::Video, source.into(), original);
        item.original_duration = original;
        item.trim_end = original;
        item
    }

    fn base(id: String, kind: VisualKind, source: SourceId, duration: f64) -> Self {
        Self {
            id,
            kind,
            source,
            duration,
            original_duration: 0.0,
            trim_start: 0.0,
            trim_end: 0.0,
            scale: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
            volume: 1.0,
            muted: false,
            fade_in: Fade::OFF,
            fade_out: Fade::OFF,
            locked: false,
        }
    }

    pub fn is_video(&self) -> bool {
        self.kind == VisualKind::Video
    }

    /// Video whose source has not reported its length yet.
    pub fn is_pending(&self) -> bool {
        self.is_video() && self.duration <= 0.0
    }

    /// Position in the source media for a local time within the item.
    pub fn source_position(&self, local_time: f64) -> f64 {
        match self.kind {
            VisualKind::Video => self.trim_start + local_time,
            VisualKind::Image => 0.0,
        }
    }

    /// Fade envelope over the item's duration.
    pub fn envelope(&self) -> FadeEnvelope {
        FadeEnvelope::new(self.fade_in, self.fade_out, self.duration)
    }

    /// Apply the real source length once metadata arrives.
    ///
    /// Keeps an existing trim window when it still fits the source.
    pub fn resolve_metadata(&mut self, original_duration: f64) -> Result<(), TimelineError> {
        if !self.is_video() {
            return Err(TimelineError::WrongKind {
                id: self.id.clone(),
                expected: VisualKind::Video,
            });
        }
        if !original_duration.is_finite() || original_duration < 0.0 {
            return Err(TimelineError::InvalidDuration {
                id: self.id.clone(),
                duration: original_duration,
            });
        }
        self.original_duration = original_duration;
        if self.trim_end <= 0.0 || self.trim_end > original_duration {
            self.trim_end = original_duration;
        }
        if self.trim_start >= self.trim_end {
            self.trim_start = 0.0;
        }
        self.duration = self.trim_end - self.trim_start;
        Ok(())
    }

    /// Set the playable window of a video.
    pub fn set_trim(&mut self, trim_start: f64, trim_end: f64) -> Result<(), TimelineError> {
        self.ensure_unlocked()?;
        if !self.is_video() {
            return Err(TimelineError::WrongKind {
                id: self.id.clone(),
                expected: VisualKind::Video,
            });
        }
        let upper = if self.original_duration > 0.0 {
            self.original_duration
        } else {
            f64::INFINITY
        };
        if !(0.0..upper).contains(&trim_start) || trim_end <= trim_start || trim_end > upper {
            return Err(TimelineError::InvalidTrim {
                id: self.id.clone(),
                trim_start,
                trim_end,
            });
        }
        self.trim_start = trim_start;
        self.trim_end = trim_end;
        self.duration = trim_end - trim_start;
        Ok(())
    }

    /// Audio placement for a video starting at `offset` on the timeline.
    ///
    /// Images and muted or pending videos carry no audio.
    pub fn audio_placement(&self, offset: f64) -> Option<AudioPlacement> {
        if !self.is_video() || self.muted || self.is_pending() {
            return None;
        }
        Some(AudioPlacement {
            source: self.source.clone(),
            timeline_start: offset,
            source_offset: self.trim_start,
            length: self.duration,
            volume: self.volume,
            fade_in: self.fade_in,
            fade_out: self.fade_out,
        })
    }

    pub(crate) fn ensure_unlocked(&self) -> Result<(), TimelineError> {
        if self.locked {
            return Err(TimelineError::ItemLocked {
                id: self.id.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_duration_follows_trim() {
        let mut item = VisualItem::video("a", "src-a", 10.0);
        assert_eq!(item.duration, 10.0);
        item.set_trim(2.0, 6.5).unwrap();
        assert_eq!(item.duration, 4.5);
        assert_eq!(item.source_position(1.0), 3.0);
    }

    #[test]
    fn test_pending_video_resolves() {
        let mut item = VisualItem::video("a", "src-a", 0.0);
        assert!(item.is_pending());
        item.resolve_metadata(7.0).unwrap();
        assert!(!item.is_pending());
        assert_eq!(item.duration, 7.0);
        assert_eq!(item.trim_end, 7.0);
    }

    #[test]
    fn test_locked_item_rejects_trim() {
        let mut item = VisualItem::video("a", "src-a", 10.0);
        item.locked = true;
        assert!(matches!(
            item.set_trim(1.0, 2.0),
            Err(TimelineError::ItemLocked { .. })
        ));
    }

    #[test]
    fn test_invalid_trim_rejected() {
        let mut item = VisualItem::video("a", "src-a", 10.0);
        assert!(item.set_trim(5.0, 4.0).is_err());
        assert!(item.set_trim(0.0, 11.0).is_err());
    }

    #[test]
    fn test_image_has_no_audio() {
        let image = VisualItem::image("b", "src-b", 3.0);
        assert!(image.audio_placement(0.0).is_none());

        let mut video = VisualItem::video("a", "src-a", 4.0);
        assert!(video.audio_placement(1.0).is_some());
        video.muted = true;
        assert!(video.audio_placement(1.0).is_none());
    }

    #[test]
    fn test_item_deserializes_with_defaults() {
        let item: VisualItem = serde_json::from_str(
            r#"{"id":"i","kind":"image","source":"s","duration":3.0}"#,
        )
        .unwrap();
        assert_eq!(item.scale, 1.0);
        assert_eq!(item.volume, 1.0);
        assert!(!item.locked);
    }
}
