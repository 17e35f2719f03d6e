//! Camera overlay placement and compositing.
//!
//! Two families of layouts: picture-in-picture (camera floats over the scene
//! in one of six anchor positions, shape-masked) and split (screen and camera
//! each own a pane of the output). Placement is static per export; the camera
//! frame itself changes every output frame.

use crate::project::{CameraLayout, CameraOverlay, CameraShape};
use crate::render::background::parse_color;
use crate::render::types::{blend_px, rounded_rect_sdf, DecodedFrame, RectF};

/// Margin between a PiP camera and the frame edge, in preview pixels.
const PIP_MARGIN_PX: f32 = 16.0;

/// Corner radius of a rectangular PiP camera, in preview pixels.
const PIP_CORNER_RADIUS_PX: f32 = 12.0;

/// Resolved camera placement for one export.
#[derive(Debug, Clone)]
pub enum CameraPlacement {
    Pip {
        rect: RectF,
        shape: CameraShape,
        mirror: bool,
        opacity: f32,
        border_px: f32,
        border_color: [u8; 4],
        corner_radius_px: f32,
    },
    Split {
        /// Pane the screen content is laid out in.
        screen_pane: RectF,
        /// Pane the camera cover-fills.
        camera_pane: RectF,
        mirror: bool,
        opacity: f32,
    },
}

impl CameraPlacement {
    /// Resolve the overlay config against the output dimensions.
    ///
    /// `preview_scale` converts preview-authored pixel values (margins,
    /// border widths) into output pixels.
    pub fn resolve(
        overlay: &CameraOverlay,
        out_w: u32,
        out_h: u32,
        preview_scale: f32,
    ) -> Option<CameraPlacement> {
        if !overlay.enabled {
            return None;
        }
        let out_w_f = out_w as f32;
        let out_h_f = out_h as f32;

        if overlay.layout.is_split() {
            let (screen_pane, camera_pane) = split_panes(overlay.layout, out_w_f, out_h_f);
            return Some(CameraPlacement::Split {
                screen_pane,
                camera_pane,
                mirror: overlay.mirror,
                opacity: overlay.opacity.clamp(0.0, 1.0),
            });
        }

        // PiP cameras are square in pixels, sized as a fraction of width.
        let size_px = (overlay.size.clamp(0.05, 0.5) * out_w_f).round();
        let margin = PIP_MARGIN_PX * preview_scale;

        let (mut left, mut top) = match overlay.layout {
            CameraLayout::TopLeft => (margin, margin),
            CameraLayout::TopCenter => ((out_w_f - size_px) * 0.5, margin),
            CameraLayout::TopRight => (out_w_f - size_px - margin, margin),
            CameraLayout::BottomLeft => (margin, out_h_f - size_px - margin),
            CameraLayout::BottomCenter => ((out_w_f - size_px) * 0.5, out_h_f - size_px - margin),
            CameraLayout::BottomRight => {
                (out_w_f - size_px - margin, out_h_f - size_px - margin)
            }
            _ => unreachable!("split layouts handled above"),
        };

        // Author-supplied nudge from the anchor.
        left += overlay.offset_x * out_w_f;
        top += overlay.offset_y * out_h_f;
        left = left.clamp(0.0, (out_w_f - size_px).max(0.0));
        top = top.clamp(0.0, (out_h_f - size_px).max(0.0));

        Some(CameraPlacement::Pip {
            rect: RectF::new(left, top, size_px, size_px),
            shape: overlay.shape,
            mirror: overlay.mirror,
            opacity: overlay.opacity.clamp(0.0, 1.0),
            border_px: if overlay.border.enabled {
                overlay.border.width * preview_scale
            } else {
                0.0
            },
            border_color: parse_color(&overlay.border.color).unwrap_or([255, 255, 255, 255]),
            corner_radius_px: PIP_CORNER_RADIUS_PX * preview_scale,
        })
    }

    /// The pane the screen video is confined to, when a split layout is
    /// active.
    pub fn screen_bounds(&self) -> Option<RectF> {
        match self {
            CameraPlacement::Split { screen_pane, .. } => Some(*screen_pane),
            CameraPlacement::Pip { .. } => None,
        }
    }
}

fn split_panes(layout: CameraLayout, out_w: f32, out_h: f32) -> (RectF, RectF) {
    let half_w = out_w * 0.5;
    let half_h = out_h * 0.5;
    match layout {
        CameraLayout::SplitLeft => (
            RectF::new(half_w, 0.0, half_w, out_h),
            RectF::new(0.0, 0.0, half_w, out_h),
        ),
        CameraLayout::SplitRight => (
            RectF::new(0.0, 0.0, half_w, out_h),
            RectF::new(half_w, 0.0, half_w, out_h),
        ),
        CameraLayout::SplitTop => (
            RectF::new(0.0, half_h, out_w, half_h),
            RectF::new(0.0, 0.0, out_w, half_h),
        ),
        CameraLayout::SplitBottom => (
            RectF::new(0.0, 0.0, out_w, half_h),
            RectF::new(0.0, half_h, out_w, half_h),
        ),
        _ => unreachable!("not a split layout"),
    }
}

/// Composite the camera frame onto `output` according to the placement.
pub fn draw_camera(
    output: &mut [u8],
    out_w: u32,
    out_h: u32,
    placement: &CameraPlacement,
    camera_frame: &DecodedFrame,
) {
    match placement {
        CameraPlacement::Pip {
            rect,
            shape,
            mirror,
            opacity,
            border_px,
            border_color,
            corner_radius_px,
        } => draw_pip(
            output,
            out_w,
            out_h,
            rect,
            *shape,
            *mirror,
            *opacity,
            *border_px,
            *border_color,
            *corner_radius_px,
            camera_frame,
        ),
        CameraPlacement::Split {
            camera_pane,
            mirror,
            opacity,
            ..
        } => draw_pane_cover(output, out_w, out_h, camera_pane, *mirror, *opacity, camera_frame),
    }
}

/// Sample the camera with cover-crop semantics: the shorter axis fills the
/// destination rect and the excess of the longer axis is center-cropped.
fn sample_cover(frame: &DecodedFrame, u: f32, v: f32, dst_aspect: f32, mirror: bool) -> [u8; 4] {
    let u = if mirror { 1.0 - u } else { u };
    let src_aspect = frame.width as f32 / frame.height as f32;
    let (mut su, mut sv) = (u, v);
    if src_aspect > dst_aspect {
        let visible = dst_aspect / src_aspect;
        su = 0.5 + (u - 0.5) * visible;
    } else {
        let visible = src_aspect / dst_aspect;
        sv = 0.5 + (v - 0.5) * visible;
    }
    frame.sample_bilinear(su * (frame.width - 1) as f32, sv * (frame.height - 1) as f32)
}

#[allow(clippy::too_many_arguments)]
fn draw_pip(
    output: &mut [u8],
    out_w: u32,
    out_h: u32,
    rect: &RectF,
    shape: CameraShape,
    mirror: bool,
    opacity: f32,
    border_px: f32,
    border_color: [u8; 4],
    corner_radius_px: f32,
    camera_frame: &DecodedFrame,
) {
    // The border ring sits outside the mask edge; widen the scan box for it.
    let min_x = (rect.x - border_px).floor().max(0.0) as u32;
    let min_y = (rect.y - border_px).floor().max(0.0) as u32;
    let max_x = ((rect.x + rect.w + border_px).ceil() as u32).min(out_w);
    let max_y = ((rect.y + rect.h + border_px).ceil() as u32).min(out_h);
    let (cx, cy) = rect.center();
    let radius = rect.w * 0.5;

    for y in min_y..max_y {
        for x in min_x..max_x {
            let px = x as f32 + 0.5;
            let py = y as f32 + 0.5;

            // Signed distance to the mask edge; negative inside.
            let dist = match shape {
                CameraShape::Circle => {
                    let dx = px - cx;
                    let dy = py - cy;
                    (dx * dx + dy * dy).sqrt() - radius
                }
                CameraShape::Rectangle => rounded_rect_sdf(px, py, rect, corner_radius_px),
            };

            let idx = ((y * out_w + x) * 4) as usize;

            // Border ring sits just outside the mask edge.
            if border_px > 0.0 && dist > 0.0 && dist <= border_px {
                let edge = 1.0 - (dist - border_px + 1.0).clamp(0.0, 1.0);
                let ring = if dist < 1.0 { dist } else { edge };
                blend_px(&mut output[idx..idx + 4], border_color, ring.clamp(0.0, 1.0) * opacity);
                continue;
            }

            if dist <= 0.5 {
                let coverage = (0.5 - dist).clamp(0.0, 1.0);
                let u = (px - rect.x) / rect.w;
                let v = (py - rect.y) / rect.h;
                let color = sample_cover(camera_frame, u, v, 1.0, mirror);
                blend_px(&mut output[idx..idx + 4], color, coverage * opacity);
            }
        }
    }
}

fn draw_pane_cover(
    output: &mut [u8],
    out_w: u32,
    out_h: u32,
    pane: &RectF,
    mirror: bool,
    opacity: f32,
    camera_frame: &DecodedFrame,
) {
    let min_x = pane.x.max(0.0) as u32;
    let min_y = pane.y.max(0.0) as u32;
    let max_x = ((pane.x + pane.w) as u32).min(out_w);
    let max_y = ((pane.y + pane.h) as u32).min(out_h);
    let aspect = pane.w / pane.h.max(1.0);

    for y in min_y..max_y {
        for x in min_x..max_x {
            let u = (x as f32 + 0.5 - pane.x) / pane.w;
            let v = (y as f32 + 0.5 - pane.y) / pane.h;
            let color = sample_cover(camera_frame, u, v, aspect, mirror);
            let idx = ((y * out_w + x) * 4) as usize;
            blend_px(&mut output[idx..idx + 4], color, opacity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::CameraBorder;

    fn overlay(layout: CameraLayout) -> CameraOverlay {
        CameraOverlay {
            enabled: true,
            video_path: Some("/tmp/camera.mp4".to_string()),
            layout,
            size: 0.2,
            offset_x: 0.0,
            offset_y: 0.0,
            shape: CameraShape::Circle,
            opacity: 1.0,
            mirror: false,
            border: CameraBorder::default(),
        }
    }

    fn pip_rect(layout: CameraLayout) -> RectF {
        match CameraPlacement::resolve(&overlay(layout), 1920, 1080, 1.0).unwrap() {
            CameraPlacement::Pip { rect, .. } => rect,
            other => panic!("expected PiP placement, got {:?}", other),
        }
    }

    #[test]
    fn test_disabled_overlay_resolves_to_none() {
        let mut cam = overlay(CameraLayout::BottomRight);
        cam.enabled = false;
        assert!(CameraPlacement::resolve(&cam, 1920, 1080, 1.0).is_none());
    }

    #[test]
    fn test_pip_corner_positions() {
        let size = 0.2 * 1920.0;
        let rect = pip_rect(CameraLayout::TopLeft);
        assert!((rect.x - 16.0).abs() < 1.0);
        assert!((rect.y - 16.0).abs() < 1.0);

        let rect = pip_rect(CameraLayout::BottomRight);
        assert!((rect.x - (1920.0 - size - 16.0)).abs() < 1.0);
        assert!((rect.y - (1080.0 - size - 16.0)).abs() < 1.0);
    }

    #[test]
    fn test_pip_center_positions() {
        let size = 0.2 * 1920.0;
        let rect = pip_rect(CameraLayout::TopCenter);
        assert!((rect.x - (1920.0 - size) * 0.5).abs() < 1.0);
        assert!((rect.y - 16.0).abs() < 1.0);

        let rect = pip_rect(CameraLayout::BottomCenter);
        assert!((rect.y - (1080.0 - size - 16.0)).abs() < 1.0);
    }

    #[test]
    fn test_pip_is_square_in_pixels() {
        for layout in [
            CameraLayout::TopLeft,
            CameraLayout::TopCenter,
            CameraLayout::TopRight,
            CameraLayout::BottomLeft,
            CameraLayout::BottomCenter,
            CameraLayout::BottomRight,
        ] {
            let rect = pip_rect(layout);
            assert!(
                (rect.w - rect.h).abs() < f32::EPSILON,
                "{:?} produced a non-square PiP: {}x{}",
                layout,
                rect.w,
                rect.h
            );
        }
    }

    #[test]
    fn test_pip_margin_scales_with_preview_ratio() {
        // Authored at 16px against a preview half the output size.
        match CameraPlacement::resolve(&overlay(CameraLayout::TopLeft), 1920, 1080, 2.0).unwrap() {
            CameraPlacement::Pip { rect, .. } => {
                assert!((rect.x - 32.0).abs() < 1.0);
            }
            other => panic!("expected PiP, got {:?}", other),
        }
    }

    #[test]
    fn test_split_panes_partition_output() {
        for layout in [
            CameraLayout::SplitLeft,
            CameraLayout::SplitRight,
            CameraLayout::SplitTop,
            CameraLayout::SplitBottom,
        ] {
            match CameraPlacement::resolve(&overlay(layout), 1920, 1080, 1.0).unwrap() {
                CameraPlacement::Split {
                    screen_pane,
                    camera_pane,
                    ..
                } => {
                    let area = screen_pane.w * screen_pane.h + camera_pane.w * camera_pane.h;
                    assert!(
                        (area - 1920.0 * 1080.0).abs() < 1.0,
                        "{:?} panes do not cover the output",
                        layout
                    );
                    // Panes must not overlap.
                    let (sx, sy) = screen_pane.center();
                    assert!(!camera_pane.contains(sx, sy));
                }
                other => panic!("expected split, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_split_left_puts_camera_on_the_left() {
        match CameraPlacement::resolve(&overlay(CameraLayout::SplitLeft), 1920, 1080, 1.0).unwrap()
        {
            CameraPlacement::Split { camera_pane, .. } => {
                assert_eq!(camera_pane.x, 0.0);
                assert_eq!(camera_pane.w, 960.0);
            }
            other => panic!("expected split, got {:?}", other),
        }
    }

    #[test]
    fn test_draw_pip_circle_masks_corners() {
        let mut output = vec![0u8; 200 * 200 * 4];
        let camera = {
            let mut f = DecodedFrame::empty(64, 64);
            f.data.chunks_exact_mut(4).for_each(|px| {
                px.copy_from_slice(&[255, 0, 0, 255]);
            });
            f
        };
        let placement = CameraPlacement::Pip {
            rect: RectF::new(50.0, 50.0, 100.0, 100.0),
            shape: CameraShape::Circle,
            mirror: false,
            opacity: 1.0,
            border_px: 0.0,
            border_color: [255, 255, 255, 255],
            corner_radius_px: 0.0,
        };
        draw_camera(&mut output, 200, 200, &placement, &camera);

        // Center of the circle is camera-red.
        let center = ((100 * 200 + 100) * 4) as usize;
        assert!(output[center] > 200);
        // The rect's corner lies outside the circular mask and stays black.
        let corner = ((52 * 200 + 52) * 4) as usize;
        assert_eq!(output[corner], 0);
    }

    #[test]
    fn test_draw_split_fills_camera_pane_only() {
        let mut output = vec![0u8; 100 * 100 * 4];
        let camera = {
            let mut f = DecodedFrame::empty(32, 32);
            f.data.chunks_exact_mut(4).for_each(|px| {
                px.copy_from_slice(&[0, 255, 0, 255]);
            });
            f
        };
        let placement = CameraPlacement::Split {
            screen_pane: RectF::new(50.0, 0.0, 50.0, 100.0),
            camera_pane: RectF::new(0.0, 0.0, 50.0, 100.0),
            mirror: false,
            opacity: 1.0,
        };
        draw_camera(&mut output, 100, 100, &placement, &camera);

        let inside = ((50 * 100 + 10) * 4) as usize;
        assert!(output[inside + 1] > 200, "camera pane should be green");
        let outside = ((50 * 100 + 80) * 4) as usize;
        assert_eq!(output[outside + 1], 0, "screen pane must stay untouched");
    }
}
