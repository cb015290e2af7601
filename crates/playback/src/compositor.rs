//! Frame compositor.
//!
//! Renders the timeline at a given time: resolves the active item, keeps
//! its media handle in sync, draws it fit-to-surface with the item's
//! transform and fade, then overlays captions.
//!
//! When the active handle cannot present a frame (metadata pending, seek
//! in flight, ended at an item boundary) the previous pixels are kept
//! rather than cleared, so the output never flashes black between items.

use std::collections::HashSet;
use std::f64::consts::TAU;

use reelcut_common::clock::DriftMeasurement;
use reelcut_common::config::{PlatformProfile, TuningConfig};
use reelcut_timeline::{SourceId, Timeline, VisualItem};

use crate::audio::AudioRouter;
use crate::media::{MediaHandle, MediaRegistry, ReadyState};
use crate::surface::{Composite, DrawTransform, RasterSurface, TextRun};

const BLACK: [u8; 4] = [0, 0, 0, 255];

/// Offset samples in the software glow.
const GLOW_SAMPLES: usize = 8;
const GLOW_SAMPLE_ALPHA: f64 = 0.18;
const GLOW_CORE_ALPHA: f64 = 0.35;
const LINE_HEIGHT: f64 = 1.2;

/// Context a frame is rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderMode {
    /// Handles should be running.
    pub playing: bool,
    pub exporting: bool,
    /// A scrub gesture is in progress; handle seeks are throttled elsewhere.
    pub scrubbing: bool,
    /// Rendering a settled user seek.
    pub direct_seek: bool,
}

impl RenderMode {
    pub fn playback() -> Self {
        Self {
            playing: true,
            ..Self::default()
        }
    }

    pub fn paused() -> Self {
        Self::default()
    }

    pub fn scrub() -> Self {
        Self {
            scrubbing: true,
            ..Self::default()
        }
    }

    pub fn settled_seek() -> Self {
        Self {
            direct_seek: true,
            ..Self::default()
        }
    }

    pub fn export() -> Self {
        Self {
            playing: true,
            exporting: true,
            ..Self::default()
        }
    }
}

/// Why the previous frame was kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldReason {
    MetadataPending,
    Seeking,
    EndedAtBoundary,
    NoFrame,
}

/// Result of one render pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    Drawn { item_id: String },
    /// Surface left untouched.
    Held(HoldReason),
    /// Nothing presentable and nothing drawn yet: surface cleared to black.
    Cleared,
}

impl FrameOutcome {
    pub fn is_drawn(&self) -> bool {
        matches!(self, FrameOutcome::Drawn { .. })
    }
}

/// Mutable state a render pass touches.
pub struct Scene<'a> {
    pub timeline: &'a Timeline,
    pub media: &'a mut MediaRegistry,
    pub audio: &'a mut AudioRouter,
    pub surface: &'a mut dyn RasterSurface,
}

pub struct Compositor {
    tuning: TuningConfig,
    platform: PlatformProfile,
    has_drawn: bool,
    primed: HashSet<SourceId>,
    active_source: Option<SourceId>,
}

impl Compositor {
    pub fn new(tuning: TuningConfig, platform: PlatformProfile) -> Self {
        Self {
            tuning,
            platform,
            has_drawn: false,
            primed: HashSet::new(),
            active_source: None,
        }
    }

    /// Whether any frame has been drawn since the last reset.
    pub fn has_drawn(&self) -> bool {
        self.has_drawn
    }

    /// Forget drawn state, e.g. when the timeline is replaced.
    pub fn reset(&mut self) {
        self.has_drawn = false;
        self.primed.clear();
        self.active_source = None;
    }

    pub fn forget_source(&mut self, source: &str) {
        self.primed.remove(source);
        if self.active_source.as_deref() == Some(source) {
            self.active_source = None;
        }
    }

    /// Drift tolerated before a handle is re-seeked.
    pub fn drift_threshold(&self, mode: RenderMode) -> f64 {
        if mode.exporting {
            self.tuning.drift_threshold_export_secs
        } else if mode.direct_seek {
            self.tuning.drift_threshold_direct_seek_secs
        } else if self.platform.capability_limited {
            self.tuning.drift_threshold_limited_secs
        } else {
            self.tuning.drift_threshold_playback_secs
        }
    }

    pub fn render(&mut self, scene: Scene<'_>, time: f64, mode: RenderMode) -> FrameOutcome {
        let Scene {
            timeline,
            media,
            audio,
            surface,
        } = scene;

        let Some(active) = timeline.resolve_active(time, self.tuning.end_epsilon_secs) else {
            if !mode.scrubbing {
                media.pause_all();
            }
            surface.clear(BLACK);
            self.draw_captions(timeline, time, surface);
            return FrameOutcome::Cleared;
        };
        let item = &timeline.items[active.index];
        let local = active.local_time;

        if self.active_source.as_deref() != Some(item.source.as_str()) {
            self.primed.remove(&item.source);
            self.active_source = Some(item.source.clone());
        }

        self.pause_inactive(timeline, item, media, audio, mode);
        if let Some(next) = timeline.next_item(active.index).filter(|_| !mode.scrubbing) {
            self.preload(item, next, item.duration - local, media);
        }

        media.ensure_loaded(&item.source);
        let alpha = item.envelope().alpha(local);
        let threshold = self.drift_threshold(mode);

        let hold = match media.get_mut(&item.source) {
            None => Some(HoldReason::NoFrame),
            Some(handle) => {
                if item.is_video() {
                    self.sync_video(item, local, handle, mode, threshold);
                    if handle.has_audio() {
                        let gain = if item.muted { 0.0 } else { item.volume * alpha };
                        audio.set_gain_target(&item.source, gain);
                    }
                }
                self.hold_reason(item, local, handle)
            }
        };

        let frame = match hold {
            Some(reason) => Err(reason),
            None => media
                .get(&item.source)
                .and_then(|h| h.current_frame())
                .ok_or(HoldReason::NoFrame),
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(reason) => {
                if self.has_drawn {
                    return FrameOutcome::Held(reason);
                }
                surface.clear(BLACK);
                self.draw_captions(timeline, time, surface);
                return FrameOutcome::Cleared;
            }
        };

        surface.clear(BLACK);
        let sw = surface.width() as f64;
        let sh = surface.height() as f64;
        let fit = (sw / frame.width.max(1) as f64).min(sh / frame.height.max(1) as f64);
        let transform = DrawTransform {
            center_x: sw / 2.0 + item.offset_x,
            center_y: sh / 2.0 + item.offset_y,
            scale: fit * item.scale,
        };
        surface.draw_frame(&frame, &transform, alpha);
        self.draw_captions(timeline, time, surface);
        self.has_drawn = true;

        FrameOutcome::Drawn {
            item_id: item.id.clone(),
        }
    }

    fn sync_video(
        &self,
        item: &VisualItem,
        local: f64,
        handle: &mut dyn MediaHandle,
        mode: RenderMode,
        threshold: f64,
    ) {
        if !mode.scrubbing
            && handle.ready_state() >= ReadyState::HaveMetadata
            && !handle.is_seeking()
        {
            let target = item.source_position(local);
            let drift = DriftMeasurement::new(target, handle.position());
            if drift.exceeds(threshold) {
                tracing::trace!(
                    source = %item.source,
                    target,
                    drift_ms = drift.drift_ms(),
                    "Re-seeking drifted handle"
                );
                handle.seek(target);
            }
        }

        // Mid-drag, play state belongs to the seek session.
        if mode.scrubbing {
            return;
        }
        if mode.playing {
            if handle.is_paused() && !handle.has_ended() {
                handle.play();
            }
        } else if !handle.is_paused() {
            handle.pause();
        }
    }

    fn hold_reason(
        &self,
        item: &VisualItem,
        local: f64,
        handle: &dyn MediaHandle,
    ) -> Option<HoldReason> {
        if handle.is_seeking() {
            return Some(HoldReason::Seeking);
        }
        if handle.ready_state() < ReadyState::HaveCurrentData {
            return Some(HoldReason::MetadataPending);
        }
        if item.is_video()
            && handle.has_ended()
            && item.duration - local <= self.tuning.near_end_window_secs
        {
            return Some(HoldReason::EndedAtBoundary);
        }
        None
    }

    /// Pause every video handle except the active one and silence it.
    /// While scrubbing only the gain is touched.
    fn pause_inactive(
        &self,
        timeline: &Timeline,
        active: &VisualItem,
        media: &mut MediaRegistry,
        audio: &mut AudioRouter,
        mode: RenderMode,
    ) {
        for item in &timeline.items {
            if !item.is_video() || item.source == active.source {
                continue;
            }
            if !mode.scrubbing {
                if let Some(handle) = media.get_mut(&item.source) {
                    if !handle.is_paused() {
                        handle.pause();
                    }
                }
            }
            if audio.node(&item.source).is_some() {
                audio.set_gain_target(&item.source, 0.0);
            }
        }
    }

    /// Prime the following video so the boundary cut has a frame ready.
    fn preload(
        &mut self,
        current: &VisualItem,
        next: &VisualItem,
        remaining: f64,
        media: &mut MediaRegistry,
    ) {
        if !next.is_video()
            || next.source == current.source
            || remaining > self.tuning.preload_window_secs
            || self.primed.contains(&next.source)
        {
            return;
        }
        if !media.ensure_loaded(&next.source) {
            return;
        }
        let Some(handle) = media.get_mut(&next.source) else {
            return;
        };
        if !handle.is_paused() {
            handle.pause();
        }
        if handle.ready_state() >= ReadyState::HaveMetadata {
            handle.seek(next.trim_start);
            self.primed.insert(next.source.clone());
            tracing::debug!(source = %next.source, at = next.trim_start, "Primed next item");
        }
    }

    fn draw_captions(&self, timeline: &Timeline, time: f64, surface: &mut dyn RasterSurface) {
        let width = surface.width() as f64;
        let height = surface.height() as f64;
        for caption in timeline.captions_at(time) {
            let style = caption.resolve_style(&timeline.caption_settings);
            let alpha = caption.alpha_at(time, &style);
            if alpha <= 0.0 {
                continue;
            }
            let lines: Vec<&str> = caption.text.lines().collect();
            let line_step = style.font_size * LINE_HEIGHT;
            let first_y = height * style.vertical_position
                - line_step * (lines.len().saturating_sub(1)) as f64 / 2.0;

            for (i, line) in lines.iter().enumerate() {
                let run = TextRun {
                    text: line.to_string(),
                    x: width / 2.0,
                    y: first_y + line_step * i as f64,
                    font_size: style.font_size,
                    font_family: style.font_family.clone(),
                    fill: style.color,
                    outline: (style.outline_width > 0.0)
                        .then_some((style.outline_color, style.outline_width)),
                    alpha,
                    composite: Composite::SourceOver,
                    blur: 0.0,
                };
                if style.blur_radius > 0.0 {
                    self.draw_glow(&run, style.blur_radius, surface);
                }
                surface.draw_text(&run);
            }
        }
    }

    /// Glow beneath a caption line. Surfaces without a native blur get
    /// additive offset samples plus a dimmer core pass.
    fn draw_glow(&self, run: &TextRun, radius: f64, surface: &mut dyn RasterSurface) {
        if self.platform.native_blur && surface.supports_blur() {
            surface.draw_text(&TextRun {
                outline: None,
                blur: radius,
                ..run.clone()
            });
            return;
        }
        for i in 0..GLOW_SAMPLES {
            let angle = TAU * i as f64 / GLOW_SAMPLES as f64;
            surface.draw_text(&TextRun {
                x: run.x + angle.cos() * radius,
                y: run.y + angle.sin() * radius,
                outline: None,
                alpha: run.alpha * GLOW_SAMPLE_ALPHA,
                composite: Composite::Lighter,
                ..run.clone()
            });
        }
        surface.draw_text(&TextRun {
            outline: None,
            alpha: run.alpha * GLOW_CORE_ALPHA,
            composite: Composite::Lighter,
            ..run.clone()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use reelcut_common::clock::ManualClock;
    use reelcut_timeline::{Caption, Fade};

    use crate::media::{SyntheticMedia, SyntheticSpec};
    use crate::surface::FrameBuffer;

    struct Rig {
        clock: ManualClock,
        timeline: Timeline,
        media: MediaRegistry,
        audio: AudioRouter,
        surface: FrameBuffer,
        compositor: Compositor,
    }

    impl Rig {
        fn new(items: Vec<(VisualItem, SyntheticSpec)>) -> Self {
            let clock = ManualClock::new(0.0);
            let mut media = MediaRegistry::new();
            let mut list = Vec::new();
            for (item, spec) in items {
                media.bind(Box::new(SyntheticMedia::new(
                    item.source.clone(),
                    spec,
                    Arc::new(clock.clone()),
                )));
                list.push(item);
            }
            Self {
                clock,
                timeline: Timeline::with_items(list),
                media,
                audio: AudioRouter::new(0.03),
                surface: FrameBuffer::new(32, 18),
                compositor: Compositor::new(TuningConfig::default(), PlatformProfile::default()),
            }
        }

        fn render(&mut self, time: f64, mode: RenderMode) -> FrameOutcome {
            self.compositor.render(
                Scene {
                    timeline: &self.timeline,
                    media: &mut self.media,
                    audio: &mut self.audio,
                    surface: &mut self.surface,
                },
                time,
                mode,
            )
        }
    }

    fn two_videos() -> Rig {
        Rig::new(vec![
            (VisualItem::video("a", "src-a", 4.0), SyntheticSpec::video(4.0)),
            (
                VisualItem::video("b", "src-b", 4.0),
                SyntheticSpec::video(4.0).with_color([20, 200, 20]),
            ),
        ])
    }

    #[test]
    fn test_drift_thresholds_by_mode() {
        let c = Compositor::new(TuningConfig::default(), PlatformProfile::default());
        assert_eq!(c.drift_threshold(RenderMode::export()), 0.04);
        assert_eq!(c.drift_threshold(RenderMode::settled_seek()), 0.05);
        assert_eq!(c.drift_threshold(RenderMode::playback()), 0.3);

        let limited = PlatformProfile {
            capability_limited: true,
            ..PlatformProfile::default()
        };
        let c = Compositor::new(TuningConfig::default(), limited);
        assert_eq!(c.drift_threshold(RenderMode::playback()), 0.5);
        assert_eq!(c.drift_threshold(RenderMode::export()), 0.04);
    }

    #[test]
    fn test_draws_active_item() {
        let mut rig = two_videos();
        let outcome = rig.render(0.5, RenderMode::paused());
        assert_eq!(
            outcome,
            FrameOutcome::Drawn {
                item_id: "a".to_string()
            }
        );
        assert_eq!(rig.surface.pixel(16, 9)[0], 200);
    }

    #[test]
    fn test_cleared_before_first_frame() {
        let mut rig = Rig::new(vec![(
            VisualItem::video("a", "src-a", 4.0),
            SyntheticSpec::video(4.0).with_latency(500.0, 0.0),
        )]);
        assert_eq!(rig.render(0.0, RenderMode::paused()), FrameOutcome::Cleared);
        assert_eq!(rig.surface.clear_count(), 1);
    }

    #[test]
    fn test_holds_previous_frame_while_seeking() {
        let mut rig = Rig::new(vec![(
            VisualItem::video("a", "src-a", 4.0),
            SyntheticSpec::video(4.0).with_latency(0.0, 100.0),
        )]);
        assert!(rig.render(0.0, RenderMode::paused()).is_drawn());
        let before = rig.surface.snapshot();
        let clears = rig.surface.clear_count();

        // Large jump forces a re-seek that takes 100ms to land.
        let outcome = rig.render(2.0, RenderMode::settled_seek());
        assert_eq!(outcome, FrameOutcome::Held(HoldReason::Seeking));
        assert_eq!(rig.surface.clear_count(), clears);
        assert_eq!(rig.surface.snapshot(), before);

        rig.clock.advance_ms(100.0);
        assert!(rig.render(2.0, RenderMode::settled_seek()).is_drawn());
    }

    #[test]
    fn test_small_drift_is_tolerated_during_playback() {
        let mut rig = two_videos();
        rig.render(0.0, RenderMode::playback());
        rig.clock.advance_ms(1000.0);
        // Handle is at 1.0s; target 1.2s is inside the 0.3s window.
        rig.render(1.2, RenderMode::playback());
        let handle = rig.media.get("src-a").unwrap();
        assert!((handle.position() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_preloads_next_video_near_boundary() {
        let mut rig = two_videos();
        rig.media.ensure_loaded("src-b");
        rig.media.get_mut("src-b").unwrap().seek(2.0);
        rig.render(0.5, RenderMode::paused());
        assert!((rig.media.get("src-b").unwrap().position() - 2.0).abs() < 1e-9);

        rig.render(1.5, RenderMode::paused());
        let next = rig.media.get("src-b").unwrap();
        assert_eq!(next.position(), 0.0);
        assert!(next.is_paused());
    }

    #[test]
    fn test_inactive_video_is_paused() {
        let mut rig = two_videos();
        rig.render(1.0, RenderMode::playback());
        assert!(!rig.media.get("src-a").unwrap().is_paused());
        rig.render(5.0, RenderMode::playback());
        assert!(rig.media.get("src-a").unwrap().is_paused());
        assert!(!rig.media.get("src-b").unwrap().is_paused());
    }

    #[test]
    fn test_scrub_leaves_play_state_alone() {
        let mut rig = two_videos();
        rig.render(1.0, RenderMode::playback());
        rig.render(5.0, RenderMode::playback());
        assert!(!rig.media.get("src-b").unwrap().is_paused());

        // A handle left running by the host stays running while dragging,
        // whether it is the active item or not.
        rig.media.get_mut("src-a").unwrap().play();
        rig.render(5.5, RenderMode::scrub());
        assert!(!rig.media.get("src-a").unwrap().is_paused());
        assert!(!rig.media.get("src-b").unwrap().is_paused());
        rig.render(1.0, RenderMode::scrub());
        assert!(!rig.media.get("src-a").unwrap().is_paused());
        assert!(!rig.media.get("src-b").unwrap().is_paused());
        rig.render(9.0, RenderMode::scrub());
        assert!(!rig.media.get("src-a").unwrap().is_paused());

        rig.render(1.0, RenderMode::paused());
        assert!(rig.media.get("src-a").unwrap().is_paused());
        assert!(rig.media.get("src-b").unwrap().is_paused());
    }

    #[test]
    fn test_fade_in_scales_alpha() {
        let mut item = VisualItem::image("img", "src-img", 4.0);
        item.fade_in = Fade::on(1.0);
        let mut rig = Rig::new(vec![(
            item,
            SyntheticSpec::image().with_color([200, 200, 200]),
        )]);
        rig.render(0.5, RenderMode::paused());
        assert_eq!(rig.surface.pixel(16, 9)[0], 100);
    }

    #[test]
    fn test_glow_fallback_uses_offset_samples() {
        let mut rig = two_videos();
        rig.timeline.caption_settings.blur_radius = 3.0;
        rig.timeline.captions.push(Caption::new("c", "Hi", 0.0, 2.0));
        rig.render(0.5, RenderMode::paused());
        let runs = rig.surface.text_runs();
        assert_eq!(runs.len(), GLOW_SAMPLES + 2);
        assert_eq!(
            runs.iter()
                .filter(|r| r.composite == Composite::Lighter)
                .count(),
            GLOW_SAMPLES + 1
        );
    }

    #[test]
    fn test_native_blur_single_glow_pass() {
        let mut rig = two_videos();
        rig.surface = FrameBuffer::new(32, 18).with_native_blur(true);
        rig.timeline.caption_settings.blur_radius = 3.0;
        rig.timeline.captions.push(Caption::new("c", "Hi", 0.0, 2.0));
        rig.render(0.5, RenderMode::paused());
        let runs = rig.surface.text_runs();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].blur, 3.0);
    }

    #[test]
    fn test_empty_timeline_clears() {
        let mut rig = Rig::new(Vec::new());
        assert_eq!(rig.render(0.0, RenderMode::paused()), FrameOutcome::Cleared);
    }
}
