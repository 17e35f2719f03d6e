//! Time-windowed annotation rendering.
//!
//! Annotations are authored in preview pixel space and painted in ascending
//! z-index order onto the composited frame. Text uses a system font loaded
//! through font-kit and rasterized with fontdue; images are decoded once and
//! cached; figures are drawn directly.

use std::num::NonZeroUsize;
use std::sync::Arc;

use font_kit::family_name::FamilyName;
use font_kit::properties::Properties;
use font_kit::source::SystemSource;
use image::imageops::FilterType;
use image::RgbaImage;
use lru::LruCache;

use crate::project::{AnnotationKind, AnnotationRegion, FigureShape};
use crate::render::background::parse_color;
use crate::render::types::{blend_px, RectF};

/// Decoded annotation images kept across frames.
const IMAGE_CACHE_SIZE: usize = 16;

/// Paints annotations onto composited frames.
pub struct AnnotationPainter {
    /// Annotations sorted by z-index ascending (paint order).
    annotations: Vec<AnnotationRegion>,
    /// Preview -> output pixel scale.
    scale: f32,
    font: Option<fontdue::Font>,
    image_cache: LruCache<String, Arc<RgbaImage>>,
}

impl AnnotationPainter {
    pub fn new(annotations: &[AnnotationRegion], scale: f32) -> Self {
        let mut annotations = annotations.to_vec();
        annotations.sort_by_key(|a| a.z_index);

        let font = load_system_font();
        if font.is_none() && annotations.iter().any(|a| matches!(a.kind, AnnotationKind::Text { .. }))
        {
            log::warn!("[ANNOTATE] no usable system font; text annotations will be skipped");
        }

        Self {
            annotations,
            scale,
            font,
            image_cache: LruCache::new(NonZeroUsize::new(IMAGE_CACHE_SIZE).unwrap()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    /// Paint every annotation active at `time_ms` onto `output`.
    pub fn paint(&mut self, output: &mut [u8], out_w: u32, out_h: u32, time_ms: u64) {
        // Split borrows: the cache and font are needed while iterating.
        let annotations = std::mem::take(&mut self.annotations);
        for annotation in &annotations {
            if time_ms < annotation.start_ms || time_ms >= annotation.end_ms {
                continue;
            }
            let rect = RectF::new(
                annotation.x * out_w as f32,
                annotation.y * out_h as f32,
                annotation.width_px * self.scale,
                annotation.height_px * self.scale,
            );
            let color = parse_color(&annotation.style.color).unwrap_or([255, 255, 255, 255]);
            let opacity = annotation.style.opacity.clamp(0.0, 1.0);
            let stroke = (annotation.style.stroke_width * self.scale).max(1.0);

            match &annotation.kind {
                AnnotationKind::Text {
                    content,
                    font_size_px,
                } => {
                    self.draw_text(
                        output,
                        out_w,
                        out_h,
                        &rect,
                        content,
                        font_size_px * self.scale,
                        color,
                        opacity,
                    );
                }
                AnnotationKind::Image { path } => {
                    self.draw_image(output, out_w, out_h, &rect, path, opacity);
                }
                AnnotationKind::Figure { shape } => {
                    draw_figure(output, out_w, out_h, &rect, *shape, stroke, color, opacity);
                }
            }
        }
        self.annotations = annotations;
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_text(
        &self,
        output: &mut [u8],
        out_w: u32,
        out_h: u32,
        rect: &RectF,
        content: &str,
        size_px: f32,
        color: [u8; 4],
        opacity: f32,
    ) {
        let Some(font) = &self.font else {
            return;
        };
        let baseline = rect.y + size_px;
        let mut pen_x = rect.x;

        for ch in content.chars() {
            let (metrics, bitmap) = font.rasterize(ch, size_px);
            let glyph_x = pen_x + metrics.xmin as f32;
            let glyph_y = baseline - metrics.height as f32 - metrics.ymin as f32;

            for gy in 0..metrics.height {
                for gx in 0..metrics.width {
                    let coverage = bitmap[gy * metrics.width + gx] as f32 / 255.0;
                    if coverage <= 0.0 {
                        continue;
                    }
                    let px = (glyph_x + gx as f32) as i64;
                    let py = (glyph_y + gy as f32) as i64;
                    if px < 0 || py < 0 || px >= out_w as i64 || py >= out_h as i64 {
                        continue;
                    }
                    let idx = ((py as u32 * out_w + px as u32) * 4) as usize;
                    blend_px(&mut output[idx..idx + 4], color, coverage * opacity);
                }
            }
            pen_x += metrics.advance_width;
        }
    }

    fn draw_image(
        &mut self,
        output: &mut [u8],
        out_w: u32,
        out_h: u32,
        rect: &RectF,
        path: &str,
        opacity: f32,
    ) {
        let target_w = (rect.w.round() as u32).max(1);
        let target_h = (rect.h.round() as u32).max(1);
        let key = format!("{}@{}x{}", path, target_w, target_h);

        let scaled = if let Some(cached) = self.image_cache.get(&key) {
            Arc::clone(cached)
        } else {
            let img = match image::open(path) {
                Ok(img) => img,
                Err(e) => {
                    log::warn!("[ANNOTATE] failed to load image '{}': {}", path, e);
                    return;
                }
            };
            let scaled = Arc::new(image::imageops::resize(
                &img.to_rgba8(),
                target_w,
                target_h,
                FilterType::Triangle,
            ));
            self.image_cache.put(key, Arc::clone(&scaled));
            scaled
        };

        for (gx, gy, pixel) in scaled.enumerate_pixels() {
            let px = rect.x as i64 + gx as i64;
            let py = rect.y as i64 + gy as i64;
            if px < 0 || py < 0 || px >= out_w as i64 || py >= out_h as i64 {
                continue;
            }
            let idx = ((py as u32 * out_w + px as u32) * 4) as usize;
            blend_px(&mut output[idx..idx + 4], pixel.0, opacity);
        }
    }
}

/// Load the default sans-serif system font for text annotations.
fn load_system_font() -> Option<fontdue::Font> {
    let handle = SystemSource::new()
        .select_best_match(&[FamilyName::SansSerif], &Properties::new())
        .ok()?;
    let font = handle.load().ok()?;
    let data = font.copy_font_data()?;
    fontdue::Font::from_bytes(data.as_slice(), fontdue::FontSettings::default()).ok()
}

/// Draw a vector figure into the annotation rect.
fn draw_figure(
    output: &mut [u8],
    out_w: u32,
    out_h: u32,
    rect: &RectF,
    shape: FigureShape,
    stroke: f32,
    color: [u8; 4],
    opacity: f32,
) {
    let min_x = (rect.x - stroke).floor().max(0.0) as u32;
    let min_y = (rect.y - stroke).floor().max(0.0) as u32;
    let max_x = ((rect.x + rect.w + stroke).ceil() as u32).min(out_w);
    let max_y = ((rect.y + rect.h + stroke).ceil() as u32).min(out_h);

    for y in min_y..max_y {
        for x in min_x..max_x {
            let px = x as f32 + 0.5;
            let py = y as f32 + 0.5;
            let alpha = figure_coverage(px, py, rect, shape, stroke);
            if alpha <= 0.0 {
                continue;
            }
            let idx = ((y * out_w + x) * 4) as usize;
            blend_px(&mut output[idx..idx + 4], color, alpha * opacity);
        }
    }
}

/// Coverage of a figure at a pixel center, in [0, 1].
fn figure_coverage(px: f32, py: f32, rect: &RectF, shape: FigureShape, stroke: f32) -> f32 {
    match shape {
        FigureShape::Highlight => {
            if rect.contains(px, py) {
                // Translucent marker fill.
                0.35
            } else {
                0.0
            }
        }
        FigureShape::Rectangle => {
            let inner = RectF::new(
                rect.x + stroke,
                rect.y + stroke,
                (rect.w - stroke * 2.0).max(0.0),
                (rect.h - stroke * 2.0).max(0.0),
            );
            if rect.contains(px, py) && !inner.contains(px, py) {
                1.0
            } else {
                0.0
            }
        }
        FigureShape::Ellipse => {
            let (cx, cy) = rect.center();
            let rx = rect.w * 0.5;
            let ry = rect.h * 0.5;
            if rx <= 0.0 || ry <= 0.0 {
                return 0.0;
            }
            // Distance from the ellipse edge, approximated through the
            // normalized radial distance.
            let nx = (px - cx) / rx;
            let ny = (py - cy) / ry;
            let d = (nx * nx + ny * ny).sqrt();
            let edge_px = (1.0 - d).abs() * rx.min(ry);
            if d <= 1.0 + stroke / rx.min(ry) && edge_px <= stroke {
                1.0
            } else {
                0.0
            }
        }
        FigureShape::Arrow => {
            let (ax, ay) = (rect.x, rect.y);
            let (bx, by) = (rect.x + rect.w, rect.y + rect.h);
            let shaft = distance_to_segment(px, py, ax, ay, bx, by);
            if shaft <= stroke * 0.5 {
                return 1.0;
            }
            // Arrow head: two short strokes back from the tip.
            let len = ((bx - ax).powi(2) + (by - ay).powi(2)).sqrt().max(1.0);
            let head = (len * 0.2).clamp(6.0, 48.0);
            let (ux, uy) = ((bx - ax) / len, (by - ay) / len);
            let (nx, ny) = (-uy, ux);
            for side in [1.0, -1.0] {
                let hx = bx - ux * head + nx * head * 0.5 * side;
                let hy = by - uy * head + ny * head * 0.5 * side;
                if distance_to_segment(px, py, bx, by, hx, hy) <= stroke * 0.5 {
                    return 1.0;
                }
            }
            0.0
        }
    }
}

fn distance_to_segment(px: f32, py: f32, ax: f32, ay: f32, bx: f32, by: f32) -> f32 {
    let abx = bx - ax;
    let aby = by - ay;
    let len_sq = abx * abx + aby * aby;
    let t = if len_sq <= f32::EPSILON {
        0.0
    } else {
        (((px - ax) * abx + (py - ay) * aby) / len_sq).clamp(0.0, 1.0)
    };
    let cx = ax + abx * t;
    let cy = ay + aby * t;
    ((px - cx).powi(2) + (py - cy).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::AnnotationStyle;
    use uuid::Uuid;

    fn figure(start_ms: u64, end_ms: u64, z_index: i32, shape: FigureShape) -> AnnotationRegion {
        AnnotationRegion {
            id: Uuid::new_v4(),
            start_ms,
            end_ms,
            x: 0.25,
            y: 0.25,
            width_px: 50.0,
            height_px: 50.0,
            z_index,
            style: AnnotationStyle {
                color: "#ff0000".to_string(),
                stroke_width: 4.0,
                opacity: 1.0,
            },
            kind: AnnotationKind::Figure { shape },
        }
    }

    #[test]
    fn test_inactive_annotation_not_painted() {
        let mut painter = AnnotationPainter::new(&[figure(1_000, 2_000, 0, FigureShape::Highlight)], 1.0);
        let mut output = vec![0u8; 100 * 100 * 4];
        painter.paint(&mut output, 100, 100, 500);
        assert!(output.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_highlight_fills_interior() {
        let mut painter = AnnotationPainter::new(&[figure(0, 1_000, 0, FigureShape::Highlight)], 1.0);
        let mut output = vec![0u8; 100 * 100 * 4];
        painter.paint(&mut output, 100, 100, 500);
        // Center of the 50x50 rect anchored at (25, 25).
        let idx = ((50 * 100 + 50) * 4) as usize;
        assert!(output[idx] > 0, "highlight interior should be tinted red");
    }

    #[test]
    fn test_rectangle_outline_leaves_interior_empty() {
        let mut painter = AnnotationPainter::new(&[figure(0, 1_000, 0, FigureShape::Rectangle)], 1.0);
        let mut output = vec![0u8; 100 * 100 * 4];
        painter.paint(&mut output, 100, 100, 500);
        let edge = ((26 * 100 + 50) * 4) as usize;
        let center = ((50 * 100 + 50) * 4) as usize;
        assert!(output[edge] > 200, "edge should carry the stroke");
        assert_eq!(output[center], 0, "interior must stay untouched");
    }

    #[test]
    fn test_arrow_hits_its_endpoints() {
        let mut painter = AnnotationPainter::new(&[figure(0, 1_000, 0, FigureShape::Arrow)], 1.0);
        let mut output = vec![0u8; 100 * 100 * 4];
        painter.paint(&mut output, 100, 100, 500);
        // Mid-shaft of the diagonal from (25,25) to (75,75).
        let idx = ((50 * 100 + 50) * 4) as usize;
        assert!(output[idx] > 200);
    }

    #[test]
    fn test_z_order_highest_paints_last() {
        // A red highlight at z=1 over a green one at z=0, same rect.
        let mut low = figure(0, 1_000, 0, FigureShape::Highlight);
        low.style.color = "#00ff00".to_string();
        let high = figure(0, 1_000, 1, FigureShape::Highlight);
        // Deliberately insert out of order.
        let mut painter = AnnotationPainter::new(&[high, low], 1.0);
        let mut output = vec![0u8; 100 * 100 * 4];
        painter.paint(&mut output, 100, 100, 500);
        let idx = ((50 * 100 + 50) * 4) as usize;
        assert!(
            output[idx] > output[idx + 1],
            "red (z=1) should dominate green (z=0): r={} g={}",
            output[idx],
            output[idx + 1]
        );
    }

    #[test]
    fn test_preview_scale_applies_to_geometry() {
        // 50px rect authored against a preview half the size of the output.
        let mut painter = AnnotationPainter::new(&[figure(0, 1_000, 0, FigureShape::Highlight)], 2.0);
        let mut output = vec![0u8; 200 * 200 * 4];
        painter.paint(&mut output, 200, 200, 500);
        // Rect spans (50, 50) to (150, 150) after scaling.
        let inside = ((140 * 200 + 140) * 4) as usize;
        assert!(output[inside] > 0);
        let outside = ((160 * 200 + 160) * 4) as usize;
        assert_eq!(output[outside], 0);
    }
}
