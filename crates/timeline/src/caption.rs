//! Timed captions with bulk settings and per-caption overrides.

use serde::{Deserialize, Serialize};

use crate::fade::{Fade, FadeEnvelope};

/// A caption shown during `[start_time, end_time)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caption {
    pub id: String,
    pub text: String,
    pub start_time: f64,
    pub end_time: f64,
    #[serde(default)]
    pub overrides: CaptionOverrides,
}

/// Per-caption settings that take precedence over the bulk settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionOverrides {
    pub font_size: Option<f64>,
    pub font_family: Option<String>,
    /// Vertical position as a fraction of surface height.
    pub vertical_position: Option<f64>,
    pub fade_in: Option<Fade>,
    pub fade_out: Option<Fade>,
}

/// Bulk caption settings applied to every caption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionSettings {
    pub font_size: f64,
    pub font_family: String,
    pub vertical_position: f64,
    pub fade_in: Fade,
    pub fade_out: Fade,
    /// RGBA fill colour.
    pub color: [u8; 4],
    pub outline_color: [u8; 4],
    pub outline_width: f64,
    /// Glow radius in pixels; 0 disables the glow.
    pub blur_radius: f64,
}

impl Default for CaptionSettings {
    fn default() -> Self {
        Self {
            font_size: 48.0,
            font_family: "sans-serif".to_string(),
            vertical_position: 0.85,
            fade_in: Fade::OFF,
            fade_out: Fade::OFF,
            color: [255, 255, 255, 255],
            outline_color: [0, 0, 0, 255],
            outline_width: 4.0,
            blur_radius: 0.0,
        }
    }
}

/// Effective style for one caption after resolving overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionStyle {
    pub font_size: f64,
    pub font_family: String,
    pub vertical_position: f64,
    pub fade_in: Fade,
    pub fade_out: Fade,
    pub color: [u8; 4],
    pub outline_color: [u8; 4],
    pub outline_width: f64,
    pub blur_radius: f64,
}

impl Caption {
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        start_time: f64,
        end_time: f64,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            start_time,
            end_time,
            overrides: CaptionOverrides::default(),
        }
    }

    pub fn duration(&self) -> f64 {
        (self.end_time - self.start_time).max(0.0)
    }

    pub fn is_active_at(&self, time: f64) -> bool {
        time >= self.start_time && time < self.end_time
    }

    pub fn resolve_style(&self, bulk: &CaptionSettings) -> CaptionStyle {
        let o = &self.overrides;
        CaptionStyle {
            font_size: o.font_size.unwrap_or(bulk.font_size),
            font_family: o
                .font_family
                .clone()
                .unwrap_or_else(|| bulk.font_family.clone()),
            vertical_position: o
                .vertical_position
                .unwrap_or(bulk.vertical_position)
                .clamp(0.0, 1.0),
            fade_in: o.fade_in.unwrap_or(bulk.fade_in),
            fade_out: o.fade_out.unwrap_or(bulk.fade_out),
            color: bulk.color,
            outline_color: bulk.outline_color,
            outline_width: bulk.outline_width,
            blur_radius: bulk.blur_radius,
        }
    }

    /// Opacity at timeline `time` under the resolved style.
    pub fn alpha_at(&self, time: f64, style: &CaptionStyle) -> f64 {
        if !self.is_active_at(time) {
            return 0.0;
        }
        FadeEnvelope::new(style.fade_in, style.fade_out, self.duration())
            .alpha(time - self.start_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_fade_in_beats_bulk_off() {
        let mut caption = Caption::new("c1", "Hello", 2.0, 6.0);
        caption.overrides.fade_in = Some(Fade::on(1.0));
        let bulk = CaptionSettings::default();
        assert!(!bulk.fade_in.enabled);

        let style = caption.resolve_style(&bulk);
        assert_eq!(caption.alpha_at(2.0, &style), 0.0);
        assert!((caption.alpha_at(2.5, &style) - 0.5).abs() < 1e-12);
        assert_eq!(caption.alpha_at(3.0, &style), 1.0);
    }

    #[test]
    fn test_override_can_disable_bulk_fade() {
        let mut caption = Caption::new("c1", "Hello", 0.0, 4.0);
        caption.overrides.fade_out = Some(Fade::OFF);
        let bulk = CaptionSettings {
            fade_out: Fade::on(1.0),
            ..CaptionSettings::default()
        };
        let style = caption.resolve_style(&bulk);
        assert_eq!(caption.alpha_at(3.9, &style), 1.0);
    }

    #[test]
    fn test_bulk_settings_apply_without_overrides() {
        let caption = Caption::new("c1", "Hello", 0.0, 4.0);
        let bulk = CaptionSettings {
            font_size: 64.0,
            fade_in: Fade::on(2.0),
            ..CaptionSettings::default()
        };
        let style = caption.resolve_style(&bulk);
        assert_eq!(style.font_size, 64.0);
        assert!((caption.alpha_at(1.0, &style) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_caption_window_is_half_open() {
        let caption = Caption::new("c1", "Hello", 1.0, 2.0);
        assert!(caption.is_active_at(1.0));
        assert!(!caption.is_active_at(2.0));
    }
}
