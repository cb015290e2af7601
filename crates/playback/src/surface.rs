//! Raster surface the compositor draws onto.

use crate::media::VideoFrame;

/// Placement of a frame on the surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawTransform {
    /// Centre of the drawn frame in surface pixels.
    pub center_x: f64,
    pub center_y: f64,
    /// Source-pixel to surface-pixel scale.
    pub scale: f64,
}

/// How drawn pixels combine with what is already on the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Composite {
    #[default]
    SourceOver,
    /// Additive blending, used for glow passes.
    Lighter,
}

/// A line of caption text to draw, centred on `(x, y)`.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub font_size: f64,
    pub font_family: String,
    pub fill: [u8; 4],
    /// Stroke colour and width, drawn beneath the fill.
    pub outline: Option<([u8; 4], f64)>,
    pub alpha: f64,
    pub composite: Composite,
    /// Blur radius for surfaces with a native blur filter.
    pub blur: f64,
}

/// Drawing capability used by the compositor.
pub trait RasterSurface {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    fn clear(&mut self, rgba: [u8; 4]);

    fn draw_frame(&mut self, frame: &VideoFrame, transform: &DrawTransform, alpha: f64);

    fn draw_text(&mut self, run: &TextRun);

    /// Whether `TextRun::blur` is honoured natively.
    fn supports_blur(&self) -> bool;

    /// Copy of the current pixels.
    fn snapshot(&self) -> VideoFrame;
}

/// Software RGBA surface.
///
/// Text is rendered as block glyphs; hosts with a font rasterizer provide
/// their own [`RasterSurface`].
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    native_blur: bool,
    text_runs: Vec<TextRun>,
    clear_count: u64,
    frame_draws: u64,
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let mut buffer = Self {
            width,
            height,
            pixels: vec![0; (width as usize) * (height as usize) * 4],
            native_blur: false,
            text_runs: Vec::new(),
            clear_count: 0,
            frame_draws: 0,
        };
        buffer.fill([0, 0, 0, 255]);
        buffer
    }

    pub fn with_native_blur(mut self, native: bool) -> Self {
        self.native_blur = native;
        self
    }

    /// Text runs drawn since the last clear.
    pub fn text_runs(&self) -> &[TextRun] {
        &self.text_runs
    }

    pub fn clear_count(&self) -> u64 {
        self.clear_count
    }

    pub fn frame_draws(&self) -> u64 {
        self.frame_draws
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = self.index(x, y);
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }

    fn index(&self, x: u32, y: u32) -> usize {
        ((y as usize) * (self.width as usize) + x as usize) * 4
    }

    fn fill(&mut self, rgba: [u8; 4]) {
        for px in self.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
    }

    fn blend(&mut self, x: u32, y: u32, src: [u8; 4], alpha: f64, composite: Composite) {
        let a = (alpha * src[3] as f64 / 255.0).clamp(0.0, 1.0);
        if a <= 0.0 {
            return;
        }
        let i = self.index(x, y);
        for c in 0..3 {
            let dst = self.pixels[i + c] as f64;
            let s = src[c] as f64;
            let out = match composite {
                Composite::SourceOver => s * a + dst * (1.0 - a),
                Composite::Lighter => dst + s * a,
            };
            self.pixels[i + c] = out.round().clamp(0.0, 255.0) as u8;
        }
        self.pixels[i + 3] = 255;
    }

    fn fill_rect(&mut self, x0: f64, y0: f64, x1: f64, y1: f64, rgba: [u8; 4], run: &TextRun) {
        let (xa, xb) = self.clip_span(x0, x1, self.width);
        let (ya, yb) = self.clip_span(y0, y1, self.height);
        for y in ya..yb {
            for x in xa..xb {
                self.blend(x, y, rgba, run.alpha, run.composite);
            }
        }
    }

    fn clip_span(&self, lo: f64, hi: f64, limit: u32) -> (u32, u32) {
        let a = lo.floor().clamp(0.0, limit as f64) as u32;
        let b = hi.ceil().clamp(0.0, limit as f64) as u32;
        (a, b)
    }
}

impl RasterSurface for FrameBuffer {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn clear(&mut self, rgba: [u8; 4]) {
        self.fill(rgba);
        self.text_runs.clear();
        self.clear_count += 1;
    }

    fn draw_frame(&mut self, frame: &VideoFrame, transform: &DrawTransform, alpha: f64) {
        self.frame_draws += 1;
        if frame.width == 0 || frame.height == 0 || transform.scale <= 0.0 {
            return;
        }
        let dw = frame.width as f64 * transform.scale;
        let dh = frame.height as f64 * transform.scale;
        let left = transform.center_x - dw / 2.0;
        let top = transform.center_y - dh / 2.0;
        let (xa, xb) = self.clip_span(left, left + dw, self.width);
        let (ya, yb) = self.clip_span(top, top + dh, self.height);

        for y in ya..yb {
            let sy = ((y as f64 + 0.5 - top) / transform.scale).floor();
            if sy < 0.0 || sy >= frame.height as f64 {
                continue;
            }
            for x in xa..xb {
                let sx = ((x as f64 + 0.5 - left) / transform.scale).floor();
                if sx < 0.0 || sx >= frame.width as f64 {
                    continue;
                }
                let src = frame.pixel(sx as u32, sy as u32);
                self.blend(x, y, src, alpha, Composite::SourceOver);
            }
        }
    }

    fn draw_text(&mut self, run: &TextRun) {
        self.text_runs.push(run.clone());

        let glyph_w = run.font_size * 0.55;
        let glyph_h = run.font_size * 0.7;
        let chars = run.text.chars().count() as f64;
        let left = run.x - chars * glyph_w / 2.0;
        let top = run.y - glyph_h / 2.0;

        for (i, ch) in run.text.chars().enumerate() {
            if ch.is_whitespace() {
                continue;
            }
            let x0 = left + i as f64 * glyph_w + glyph_w * 0.1;
            let x1 = x0 + glyph_w * 0.8;
            if let Some((color, width)) = run.outline {
                let w = width / 2.0;
                self.fill_rect(x0 - w, top - w, x1 + w, top + glyph_h + w, color, run);
            }
            self.fill_rect(x0, top, x1, top + glyph_h, run.fill, run);
        }
    }

    fn supports_blur(&self) -> bool {
        self.native_blur
    }

    fn snapshot(&self) -> VideoFrame {
        VideoFrame::new(self.width, self.height, self.pixels.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str) -> TextRun {
        TextRun {
            text: text.to_string(),
            x: 32.0,
            y: 16.0,
            font_size: 10.0,
            font_family: "sans-serif".to_string(),
            fill: [255, 255, 255, 255],
            outline: None,
            alpha: 1.0,
            composite: Composite::SourceOver,
            blur: 0.0,
        }
    }

    #[test]
    fn test_new_buffer_is_black() {
        let fb = FrameBuffer::new(8, 4);
        assert_eq!(fb.pixel(7, 3), [0, 0, 0, 255]);
        assert_eq!(fb.snapshot().mean_luma(), 0.0);
    }

    #[test]
    fn test_draw_frame_scales_to_fill() {
        let mut fb = FrameBuffer::new(8, 4);
        let frame = VideoFrame::solid(2, 1, [255, 0, 0, 255]);
        let transform = DrawTransform {
            center_x: 4.0,
            center_y: 2.0,
            scale: 4.0,
        };
        fb.draw_frame(&frame, &transform, 1.0);
        assert_eq!(fb.pixel(0, 0), [255, 0, 0, 255]);
        assert_eq!(fb.pixel(7, 3), [255, 0, 0, 255]);
        assert_eq!(fb.frame_draws(), 1);
    }

    #[test]
    fn test_half_alpha_blends_with_black() {
        let mut fb = FrameBuffer::new(2, 2);
        let frame = VideoFrame::solid(2, 2, [200, 200, 200, 255]);
        let transform = DrawTransform {
            center_x: 1.0,
            center_y: 1.0,
            scale: 1.0,
        };
        fb.draw_frame(&frame, &transform, 0.5);
        assert_eq!(fb.pixel(0, 0), [100, 100, 100, 255]);
    }

    #[test]
    fn test_clear_drops_text_runs() {
        let mut fb = FrameBuffer::new(64, 32);
        fb.draw_text(&run("Hi"));
        assert_eq!(fb.text_runs().len(), 1);
        assert!(fb.snapshot().mean_luma() > 0.0);
        fb.clear([0, 0, 0, 255]);
        assert!(fb.text_runs().is_empty());
        assert_eq!(fb.clear_count(), 1);
    }

    #[test]
    fn test_lighter_composite_adds() {
        let mut fb = FrameBuffer::new(64, 32);
        let mut glow = run("X");
        glow.fill = [100, 100, 100, 255];
        glow.composite = Composite::Lighter;
        fb.draw_text(&glow);
        fb.draw_text(&glow);
        assert_eq!(fb.pixel(32, 16), [200, 200, 200, 255]);
    }
}
