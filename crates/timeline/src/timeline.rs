//! The timeline: ordered visual items plus audio tracks and captions.

use serde::{Deserialize, Serialize};

use crate::audio::{AudioPlacement, BackgroundTrack, NarrationClip};
use crate::caption::{Caption, CaptionSettings};
use crate::item::{VisualItem, VisualKind};

/// Subtracted from the last item's duration when a query lands at or past
/// the end, so the final frame never resolves to nothing.
pub const DEFAULT_END_EPSILON: f64 = 0.001;

/// Complete editing timeline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeline {
    pub items: Vec<VisualItem>,
    pub background: Option<BackgroundTrack>,
    pub narrations: Vec<NarrationClip>,
    pub captions: Vec<Caption>,
    pub caption_settings: CaptionSettings,
}

/// The visual item active at a timeline instant.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveItem {
    pub id: String,
    pub index: usize,
    /// Seconds into the item.
    pub local_time: f64,
}

/// Item position derived from cumulative durations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemSpan {
    pub index: usize,
    pub start: f64,
    pub end: f64,
}

/// Errors raised by timeline edits.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimelineError {
    #[error("Item {id} is locked")]
    ItemLocked { id: String },

    #[error("Unknown item: {id}")]
    UnknownItem { id: String },

    #[error("Duplicate item id: {id}")]
    DuplicateItem { id: String },

    #[error("Item {id} is not a {expected:?}")]
    WrongKind { id: String, expected: VisualKind },

    #[error("Invalid trim for {id}: [{trim_start}, {trim_end})")]
    InvalidTrim {
        id: String,
        trim_start: f64,
        trim_end: f64,
    },

    #[error("Invalid duration for {id}: {duration}")]
    InvalidDuration { id: String, duration: f64 },

    #[error("Index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: Vec<VisualItem>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sum of item durations.
    pub fn total_duration(&self) -> f64 {
        total_duration(&self.items)
    }

    /// Start offset of the item at `index`.
    pub fn offset_of(&self, index: usize) -> Option<f64> {
        if index >= self.items.len() {
            return None;
        }
        Some(self.items[..index].iter().map(|i| i.duration).sum())
    }

    /// Spans of every item in order.
    pub fn spans(&self) -> Vec<ItemSpan> {
        let mut offset = 0.0;
        self.items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let span = ItemSpan {
                    index,
                    start: offset,
                    end: offset + item.duration,
                };
                offset += item.duration;
                span
            })
            .collect()
    }

    pub fn item_span(&self, id: &str) -> Option<ItemSpan> {
        self.spans()
            .into_iter()
            .find(|span| self.items[span.index].id == id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|i| i.id == id)
    }

    pub fn item(&self, id: &str) -> Option<&VisualItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn item_mut(&mut self, id: &str) -> Option<&mut VisualItem> {
        self.items.iter_mut().find(|i| i.id == id)
    }

    /// Resolve the visual item active at `time`.
    ///
    /// Items cover `[offset, offset + duration)`, so an exact boundary
    /// resolves to the next item. At or past the end the last item is
    /// returned `end_epsilon` before its end. A pending video at offset 0
    /// is active exactly at `time == 0`.
    pub fn resolve_active(&self, time: f64, end_epsilon: f64) -> Option<ActiveItem> {
        if self.items.is_empty() || !time.is_finite() || time < 0.0 {
            return None;
        }

        let mut offset = 0.0;
        for (index, item) in self.items.iter().enumerate() {
            if item.is_pending() && offset == 0.0 && time == 0.0 {
                return Some(ActiveItem {
                    id: item.id.clone(),
                    index,
                    local_time: 0.0,
                });
            }
            if time >= offset && time < offset + item.duration {
                return Some(ActiveItem {
                    id: item.id.clone(),
                    index,
                    local_time: time - offset,
                });
            }
            offset += item.duration;
        }

        if time >= offset {
            let index = self.items.len() - 1;
            let last = &self.items[index];
            return Some(ActiveItem {
                id: last.id.clone(),
                index,
                local_time: (last.duration - end_epsilon).max(0.0),
            });
        }

        None
    }

    /// Item following `index`, if any.
    pub fn next_item(&self, index: usize) -> Option<&VisualItem> {
        self.items.get(index + 1)
    }

    /// Captions visible at `time`.
    pub fn captions_at(&self, time: f64) -> impl Iterator<Item = &Caption> {
        self.captions.iter().filter(move |c| c.is_active_at(time))
    }

    /// Every audio-bearing source: video items, background, narrations.
    pub fn audio_placements(&self) -> Vec<AudioPlacement> {
        let mut placements: Vec<AudioPlacement> = self
            .spans()
            .into_iter()
            .filter_map(|span| self.items[span.index].audio_placement(span.start))
            .collect();
        if let Some(bg) = &self.background {
            placements.push(bg.placement());
        }
        placements.extend(self.narrations.iter().map(NarrationClip::placement));
        placements
    }

    pub fn push_item(&mut self, item: VisualItem) -> Result<(), TimelineError> {
        self.insert_item(self.items.len(), item)
    }

    pub fn insert_item(&mut self, index: usize, item: VisualItem) -> Result<(), TimelineError> {
        if index > self.items.len() {
            return Err(TimelineError::IndexOutOfRange {
                index,
                len: self.items.len(),
            });
        }
        if self.index_of(&item.id).is_some() {
            return Err(TimelineError::DuplicateItem { id: item.id });
        }
        if !item.duration.is_finite() || item.duration < 0.0 {
            return Err(TimelineError::InvalidDuration {
                id: item.id,
                duration: item.duration,
            });
        }
        self.items.insert(index, item);
        Ok(())
    }

    /// Remove an item and hand it back so its source can be released.
    pub fn remove_item(&mut self, id: &str) -> Result<VisualItem, TimelineError> {
        let index = self
            .index_of(id)
            .ok_or_else(|| TimelineError::UnknownItem { id: id.to_string() })?;
        self.items[index].ensure_unlocked()?;
        Ok(self.items.remove(index))
    }

    pub fn move_item(&mut self, id: &str, to: usize) -> Result<(), TimelineError> {
        let from = self
            .index_of(id)
            .ok_or_else(|| TimelineError::UnknownItem { id: id.to_string() })?;
        if to >= self.items.len() {
            return Err(TimelineError::IndexOutOfRange {
                index: to,
                len: self.items.len(),
            });
        }
        self.items[from].ensure_unlocked()?;
        let item = self.items.remove(from);
        self.items.insert(to, item);
        Ok(())
    }

    /// Record the real length of a pending video once its source reports it.
    pub fn resolve_item_duration(
        &mut self,
        id: &str,
        original_duration: f64,
    ) -> Result<(), TimelineError> {
        self.item_mut(id)
            .ok_or_else(|| TimelineError::UnknownItem { id: id.to_string() })?
            .resolve_metadata(original_duration)
    }

    pub fn set_trim(
        &mut self,
        id: &str,
        trim_start: f64,
        trim_end: f64,
    ) -> Result<(), TimelineError> {
        self.item_mut(id)
            .ok_or_else(|| TimelineError::UnknownItem { id: id.to_string() })?
            .set_trim(trim_start, trim_end)
    }

    pub fn remove_narration(&mut self, id: &str) -> Option<NarrationClip> {
        let index = self.narrations.iter().position(|n| n.id == id)?;
        Some(self.narrations.remove(index))
    }
}

/// Sum of item durations.
pub fn total_duration(items: &[VisualItem]) -> f64 {
    items.iter().map(|i| i.duration).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Timeline {
        Timeline::with_items(vec![
            VisualItem::video("a", "src-a", 4.0),
            VisualItem::image("b", "src-b", 3.0),
        ])
    }

    #[test]
    fn test_resolve_active_inside_second_item() {
        let active = sample().resolve_active(4.5, DEFAULT_END_EPSILON).unwrap();
        assert_eq!(active.id, "b");
        assert_eq!(active.index, 1);
        assert!((active.local_time - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_boundary_resolves_to_next_item() {
        let active = sample().resolve_active(4.0, DEFAULT_END_EPSILON).unwrap();
        assert_eq!(active.id, "b");
        assert_eq!(active.local_time, 0.0);
    }

    #[test]
    fn test_past_end_holds_last_item() {
        let timeline = sample();
        let active = timeline.resolve_active(7.0, DEFAULT_END_EPSILON).unwrap();
        assert_eq!(active.id, "b");
        assert!((active.local_time - (3.0 - DEFAULT_END_EPSILON)).abs() < 1e-12);
        assert!(timeline.resolve_active(100.0, DEFAULT_END_EPSILON).is_some());
    }

    #[test]
    fn test_empty_and_negative() {
        assert!(Timeline::new().resolve_active(0.0, DEFAULT_END_EPSILON).is_none());
        assert!(sample().resolve_active(-0.5, DEFAULT_END_EPSILON).is_none());
    }

    #[test]
    fn test_pending_first_video_active_at_zero() {
        let timeline = Timeline::with_items(vec![
            VisualItem::video("pending", "src-p", 0.0),
            VisualItem::image("b", "src-b", 3.0),
        ]);
        let at_zero = timeline.resolve_active(0.0, DEFAULT_END_EPSILON).unwrap();
        assert_eq!(at_zero.id, "pending");
        let later = timeline.resolve_active(0.1, DEFAULT_END_EPSILON).unwrap();
        assert_eq!(later.id, "b");
    }

    #[test]
    fn test_offsets_are_derived() {
        let mut timeline = sample();
        assert_eq!(timeline.offset_of(1), Some(4.0));
        timeline.set_trim("a", 1.0, 3.0).unwrap();
        assert_eq!(timeline.offset_of(1), Some(2.0));
        assert_eq!(timeline.total_duration(), 5.0);
    }

    #[test]
    fn test_remove_returns_item_and_respects_lock() {
        let mut timeline = sample();
        timeline.item_mut("b").unwrap().locked = true;
        assert!(matches!(
            timeline.remove_item("b"),
            Err(TimelineError::ItemLocked { .. })
        ));
        let removed = timeline.remove_item("a").unwrap();
        assert_eq!(removed.source, "src-a");
        assert_eq!(timeline.total_duration(), 3.0);
    }

    #[test]
    fn test_move_item_reorders() {
        let mut timeline = sample();
        timeline.move_item("b", 0).unwrap();
        assert_eq!(timeline.items[0].id, "b");
        assert_eq!(timeline.item_span("a").unwrap().start, 3.0);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut timeline = sample();
        assert!(matches!(
            timeline.push_item(VisualItem::image("a", "x", 1.0)),
            Err(TimelineError::DuplicateItem { .. })
        ));
    }

    #[test]
    fn test_audio_placements_cover_all_sources() {
        let mut timeline = sample();
        timeline.background = Some(BackgroundTrack::new("music", 30.0));
        timeline
            .narrations
            .push(NarrationClip::new("n1", "voice", 1.0, 2.0));
        let placements = timeline.audio_placements();
        let sources: Vec<&str> = placements.iter().map(|p| p.source.as_str()).collect();
        assert_eq!(sources, vec!["src-a", "music", "voice"]);
    }

    #[test]
    fn test_timeline_json_roundtrip_defaults() {
        let timeline: Timeline = serde_json::from_str(
            r#"{"items":[{"id":"a","kind":"video","source":"s","duration":2.0,"trim_end":2.0,"original_duration":2.0}]}"#,
        )
        .unwrap();
        assert_eq!(timeline.total_duration(), 2.0);
        assert!(timeline.background.is_none());
        assert_eq!(timeline.caption_settings.font_size, 48.0);
    }
}
