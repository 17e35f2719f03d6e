//! Core types for frame rendering.

use crate::project::CropRegion;
use crate::zoom::ZoomSample;

/// A decoded video frame in RGBA.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Frame number (0-indexed within its stream read order).
    pub frame_number: u32,
    /// Timestamp in milliseconds.
    pub timestamp_ms: u64,
    /// RGBA pixel data (width * height * 4 bytes).
    pub data: Vec<u8>,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
}

impl DecodedFrame {
    pub fn new(frame_number: u32, timestamp_ms: u64, data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            frame_number,
            timestamp_ms,
            data,
            width,
            height,
        }
    }

    /// Create an empty black frame.
    pub fn empty(width: u32, height: u32) -> Self {
        let data = vec![0u8; (width * height * 4) as usize];
        Self {
            frame_number: 0,
            timestamp_ms: 0,
            data,
            width,
            height,
        }
    }

    /// Bilinear RGBA sample at fractional pixel coordinates.
    pub fn sample_bilinear(&self, x: f32, y: f32) -> [u8; 4] {
        let max_x = self.width.saturating_sub(1) as f32;
        let max_y = self.height.saturating_sub(1) as f32;
        let x = x.clamp(0.0, max_x);
        let y = y.clamp(0.0, max_y);

        let x0 = x.floor() as u32;
        let y0 = y.floor() as u32;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;

        let px = |xi: u32, yi: u32| -> [f32; 4] {
            let idx = ((yi * self.width + xi) * 4) as usize;
            [
                self.data[idx] as f32,
                self.data[idx + 1] as f32,
                self.data[idx + 2] as f32,
                self.data[idx + 3] as f32,
            ]
        };

        let p00 = px(x0, y0);
        let p10 = px(x1, y0);
        let p01 = px(x0, y1);
        let p11 = px(x1, y1);

        let mut out = [0u8; 4];
        for c in 0..4 {
            let top = p00[c] + (p10[c] - p00[c]) * fx;
            let bottom = p01[c] + (p11[c] - p01[c]) * fx;
            out[c] = (top + (bottom - top) * fy).round().clamp(0.0, 255.0) as u8;
        }
        out
    }
}

/// Axis-aligned rectangle in output pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RectF {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl RectF {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.w * 0.5, self.y + self.h * 0.5)
    }

    pub fn contains(&self, px: f32, py: f32) -> bool {
        px >= self.x && px < self.x + self.w && py >= self.y && py < self.y + self.h
    }
}

/// Static geometry of the video layer within the output frame.
///
/// Computed once per export: the crop window is contain-fit into the padded
/// output area, independent of any zoom.
#[derive(Debug, Clone, Copy)]
pub struct FrameLayout {
    /// Output dimensions.
    pub out_w: u32,
    pub out_h: u32,
    /// Crop window of the source, normalized.
    pub crop: CropRegion,
    /// Where the video layer lands in output pixels.
    pub content: RectF,
}

impl FrameLayout {
    /// Lay out the cropped source inside the output frame.
    ///
    /// `padding_percent` shrinks the usable area by that percentage of the
    /// smaller output dimension on every side. `bounds` restricts the layout
    /// to a sub-rectangle (used by split camera layouts); pass `None` for the
    /// whole output.
    pub fn compute(
        out_w: u32,
        out_h: u32,
        source_w: u32,
        source_h: u32,
        crop: CropRegion,
        padding_percent: f32,
        bounds: Option<RectF>,
    ) -> FrameLayout {
        let crop = crop.clamped();
        let bounds = bounds.unwrap_or_else(|| RectF::new(0.0, 0.0, out_w as f32, out_h as f32));

        let pad = (padding_percent.clamp(0.0, 40.0) / 100.0) * bounds.w.min(bounds.h);
        let avail_w = (bounds.w - pad * 2.0).max(1.0);
        let avail_h = (bounds.h - pad * 2.0).max(1.0);

        // Contain-fit the cropped source region.
        let crop_w_px = crop.width * source_w as f32;
        let crop_h_px = crop.height * source_h as f32;
        let crop_aspect = crop_w_px / crop_h_px.max(1.0);
        let avail_aspect = avail_w / avail_h;

        let (content_w, content_h) = if crop_aspect > avail_aspect {
            (avail_w, avail_w / crop_aspect)
        } else {
            (avail_h * crop_aspect, avail_h)
        };

        let content = RectF::new(
            bounds.x + (bounds.w - content_w) * 0.5,
            bounds.y + (bounds.h - content_h) * 0.5,
            content_w,
            content_h,
        );

        FrameLayout {
            out_w,
            out_h,
            crop,
            content,
        }
    }

    /// Map an output pixel to source pixel coordinates under the current
    /// zoom sample, or `None` when the pixel lies outside the video layer.
    ///
    /// The zoom is a sampling transform: at scale 1 the frame UV passes
    /// through unchanged; zoomed in, the focus point maps to the content
    /// center and the sampled window shrinks to `1/scale` around it.
    pub fn map_to_source(
        &self,
        px: f32,
        py: f32,
        zoom: &ZoomSample,
        source_w: u32,
        source_h: u32,
    ) -> Option<(f32, f32)> {
        if !self.content.contains(px, py) {
            return None;
        }
        let frame_u = (px - self.content.x) / self.content.w;
        let frame_v = (py - self.content.y) / self.content.h;

        let (u, v) = if zoom.scale > 1.0 {
            (
                zoom.focus_x + (frame_u - 0.5) / zoom.scale,
                zoom.focus_y + (frame_v - 0.5) / zoom.scale,
            )
        } else {
            (frame_u, frame_v)
        };
        let u = u.clamp(0.0, 1.0);
        let v = v.clamp(0.0, 1.0);

        let src_x = (self.crop.x + u * self.crop.width) * source_w as f32;
        let src_y = (self.crop.y + v * self.crop.height) * source_h as f32;
        Some((src_x, src_y))
    }
}

/// Signed distance to a rounded rectangle's edge; negative inside.
pub fn rounded_rect_sdf(px: f32, py: f32, rect: &RectF, radius: f32) -> f32 {
    let (cx, cy) = rect.center();
    let half_w = rect.w * 0.5;
    let half_h = rect.h * 0.5;
    let radius = radius.min(half_w).min(half_h);

    let qx = (px - cx).abs() - half_w + radius;
    let qy = (py - cy).abs() - half_h + radius;
    let outside = (qx.max(0.0).powi(2) + qy.max(0.0).powi(2)).sqrt();
    outside + qx.max(qy).min(0.0) - radius
}

/// Blend `src` over `dst` with the given alpha (0-1), leaving dst alpha opaque.
pub fn blend_px(dst: &mut [u8], src: [u8; 4], alpha: f32) {
    let alpha = (alpha * src[3] as f32 / 255.0).clamp(0.0, 1.0);
    let inv = 1.0 - alpha;
    dst[0] = (src[0] as f32 * alpha + dst[0] as f32 * inv).round() as u8;
    dst[1] = (src[1] as f32 * alpha + dst[1] as f32 * inv).round() as u8;
    dst[2] = (src[2] as f32 * alpha + dst[2] as f32 * inv).round() as u8;
    dst[3] = 255;
}
