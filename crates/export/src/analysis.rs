//! Output verification.
//!
//! Frame metrics and segment detection used to check exported video for
//! black or frozen stretches. A black run at the very end of an export
//! means the frame-hold rule regressed.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use reelcut_playback::VideoFrame;

/// Thresholds for black and freeze detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Mean luma (0..=255) at or below which a frame counts as black.
    pub black_threshold: f64,

    /// Mean absolute frame difference at or below which a frame counts as frozen.
    pub freeze_threshold: f64,

    pub min_segment_frames: usize,

    /// Length of the `tail` scope.
    pub tail_seconds: f64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            black_threshold: 8.0,
            freeze_threshold: 0.8,
            min_segment_frames: 3,
            tail_seconds: 2.0,
        }
    }
}

/// Which frames a segment analysis looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Full,
    Tail,
}

/// Mean of the RGB channels, 0..=255.
pub fn frame_luma(frame: &VideoFrame) -> f64 {
    let pixels = frame.data.len() / 4;
    if pixels == 0 {
        return 0.0;
    }
    let sum: u64 = frame
        .data
        .chunks_exact(4)
        .map(|p| p[0] as u64 + p[1] as u64 + p[2] as u64)
        .sum();
    sum as f64 / (pixels * 3) as f64
}

/// Mean absolute RGB difference between two frames of the same size.
pub fn frame_diff(prev: &VideoFrame, curr: &VideoFrame) -> Option<f64> {
    if prev.data.len() != curr.data.len() || curr.data.is_empty() {
        return None;
    }
    let sum: u64 = prev
        .data
        .chunks_exact(4)
        .zip(curr.data.chunks_exact(4))
        .map(|(a, b)| (0..3).map(|c| a[c].abs_diff(b[c]) as u64).sum::<u64>())
        .sum();
    Some(sum as f64 / ((curr.data.len() / 4) * 3) as f64)
}

/// Linear-interpolated percentile of sorted values.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    let first = *sorted.first()?;
    let last = *sorted.last()?;
    if p <= 0.0 {
        return Some(first);
    }
    if p >= 100.0 {
        return Some(last);
    }
    let pos = (sorted.len() - 1) as f64 * (p / 100.0);
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        return Some(sorted[lo]);
    }
    let w = pos - lo as f64;
    Some(sorted[lo] * (1.0 - w) + sorted[hi] * w)
}

/// Contiguous runs within `range` where `value <= threshold`, at least
/// `min_frames` long. Returns inclusive `(start, end)` indices.
pub fn detect_segments(
    values: &[Option<f64>],
    threshold: f64,
    min_frames: usize,
    range: Range<usize>,
) -> Vec<(usize, usize)> {
    let mut segments = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    let end = range.end.min(values.len());

    for idx in range.start..end {
        if values[idx].is_some_and(|v| v <= threshold) {
            current = Some(match current {
                Some((start, _)) => (start, idx),
                None => (idx, idx),
            });
            continue;
        }
        if let Some((start, last)) = current.take() {
            if last - start + 1 >= min_frames {
                segments.push((start, last));
            }
        }
    }
    if let Some((start, last)) = current {
        if last - start + 1 >= min_frames {
            segments.push((start, last));
        }
    }
    segments
}

/// Frame index range covered by `scope`.
pub fn scope_range(total_frames: usize, scope: Scope, tail_seconds: f64, fps: f64) -> Range<usize> {
    match scope {
        Scope::Full => 0..total_frames,
        Scope::Tail => {
            let tail = ((tail_seconds.max(0.0) * fps).round() as usize).max(1);
            total_frames.saturating_sub(tail)..total_frames
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p05: f64,
    pub p50: f64,
    pub p95: f64,
}

impl Stats {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        Some(Self {
            min: *sorted.first()?,
            max: *sorted.last()?,
            mean: sorted.iter().sum::<f64>() / sorted.len() as f64,
            p05: percentile(&sorted, 5.0)?,
            p50: percentile(&sorted, 50.0)?,
            p95: percentile(&sorted, 95.0)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start_frame_index: usize,
    pub end_frame_index: usize,
    pub start_time_sec: f64,
    pub end_time_sec: f64,
    pub frame_count: usize,
    pub duration_sec: f64,
}

impl Segment {
    fn new((start, end): (usize, usize), fps: f64) -> Self {
        let frame_count = end - start + 1;
        Self {
            start_frame_index: start,
            end_frame_index: end,
            start_time_sec: start as f64 / fps,
            end_time_sec: end as f64 / fps,
            frame_count,
            duration_sec: frame_count as f64 / fps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub fps: f64,
    pub total_frames: usize,
    pub duration_sec_estimate: f64,
    pub black_threshold: f64,
    pub luma_stats: Option<Stats>,
    pub motion_stats: Option<Stats>,
    pub black_frame_count: usize,
    pub black_frame_ratio: f64,
    /// A black run of at least the minimum length reaches the last frame.
    pub has_black_at_video_end: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SegmentKind {
    BlackSegments,
    FreezeSegments,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentReport {
    pub mode: SegmentKind,
    pub fps: f64,
    pub total_frames: usize,
    pub scope: Scope,
    pub tail_seconds: Option<f64>,
    pub scope_start_frame: usize,
    pub scope_end_frame_exclusive: usize,
    pub threshold: f64,
    pub min_segment_frames: usize,
    pub frame_count_in_scope: usize,
    pub frame_ratio_in_scope: f64,
    pub at_video_end: bool,
    pub segments: Vec<Segment>,
}

/// Luma and motion per frame, accumulated while frames are produced.
#[derive(Debug, Clone, Default)]
pub struct FrameMetrics {
    luma: Vec<f64>,
    motion: Vec<Option<f64>>,
    last: Option<VideoFrame>,
}

impl FrameMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_frames<'a>(frames: impl IntoIterator<Item = &'a VideoFrame>) -> Self {
        let mut metrics = Self::new();
        for frame in frames {
            metrics.push(frame);
        }
        metrics
    }

    pub fn push(&mut self, frame: &VideoFrame) {
        self.luma.push(frame_luma(frame));
        let motion = self.last.as_ref().and_then(|prev| frame_diff(prev, frame));
        self.motion.push(motion);
        self.last = Some(frame.clone());
    }

    pub fn len(&self) -> usize {
        self.luma.len()
    }

    pub fn is_empty(&self) -> bool {
        self.luma.is_empty()
    }

    pub fn luma(&self) -> &[f64] {
        &self.luma
    }

    /// Frame difference to the previous frame; `None` for the first.
    pub fn motion(&self) -> &[Option<f64>] {
        &self.motion
    }

    pub fn summary(&self, fps: f64, settings: &AnalysisSettings) -> Summary {
        let total = self.len();
        let motion: Vec<f64> = self.motion.iter().flatten().copied().collect();
        let black_frame_count = self
            .luma
            .iter()
            .filter(|v| **v <= settings.black_threshold)
            .count();
        let tail = self.black_segments(fps, Scope::Tail, settings);
        Summary {
            fps,
            total_frames: total,
            duration_sec_estimate: total as f64 / fps,
            black_threshold: settings.black_threshold,
            luma_stats: Stats::from_values(&self.luma),
            motion_stats: Stats::from_values(&motion),
            black_frame_count,
            black_frame_ratio: if total > 0 {
                black_frame_count as f64 / total as f64
            } else {
                0.0
            },
            has_black_at_video_end: tail.at_video_end,
        }
    }

    pub fn black_segments(&self, fps: f64, scope: Scope, settings: &AnalysisSettings) -> SegmentReport {
        let values: Vec<Option<f64>> = self.luma.iter().copied().map(Some).collect();
        let range = scope_range(self.len(), scope, settings.tail_seconds, fps);
        self.segment_report(
            SegmentKind::BlackSegments,
            &values,
            range,
            settings.black_threshold,
            fps,
            scope,
            settings,
        )
    }

    pub fn freeze_segments(&self, fps: f64, scope: Scope, settings: &AnalysisSettings) -> SegmentReport {
        let mut range = scope_range(self.len(), scope, settings.tail_seconds, fps);
        // Frame 0 has no motion value.
        range.start = range.start.max(1);
        self.segment_report(
            SegmentKind::FreezeSegments,
            &self.motion,
            range,
            settings.freeze_threshold,
            fps,
            scope,
            settings,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn segment_report(
        &self,
        mode: SegmentKind,
        values: &[Option<f64>],
        range: Range<usize>,
        threshold: f64,
        fps: f64,
        scope: Scope,
        settings: &AnalysisSettings,
    ) -> SegmentReport {
        let raw = detect_segments(values, threshold, settings.min_segment_frames, range.clone());
        let in_scope = range.end.saturating_sub(range.start);
        let hits = range
            .clone()
            .filter(|&i| values.get(i).copied().flatten().is_some_and(|v| v <= threshold))
            .count();
        let total = self.len();
        let at_video_end = raw.last().is_some_and(|&(_, end)| total > 0 && end >= total - 1);

        SegmentReport {
            mode,
            fps,
            total_frames: total,
            scope,
            tail_seconds: (scope == Scope::Tail).then_some(settings.tail_seconds),
            scope_start_frame: range.start,
            scope_end_frame_exclusive: range.end,
            threshold,
            min_segment_frames: settings.min_segment_frames,
            frame_count_in_scope: hits,
            frame_ratio_in_scope: if in_scope > 0 {
                hits as f64 / in_scope as f64
            } else {
                0.0
            },
            at_video_end,
            segments: raw.into_iter().map(|s| Segment::new(s, fps)).collect(),
        }
    }
}
