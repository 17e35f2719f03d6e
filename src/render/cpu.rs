//! Software (CPU) compositor.
//!
//! Reference implementation of the full per-frame pipeline: background,
//! drop shadow, rounded/zoomed video layer, border ring, camera overlay,
//! annotations. The GPU compositor must match this output.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::error::ExportResult;
use crate::render::annotations::AnnotationPainter;
use crate::render::background::gaussian_blur;
use crate::render::camera::draw_camera;
use crate::render::types::{blend_px, rounded_rect_sdf, DecodedFrame};
use crate::render::{Compositor, RenderMode, Scene};
use crate::zoom::ZoomAnimator;

/// Distinct shadow intensities kept alive at once.
const SHADOW_CACHE_SIZE: usize = 4;

/// Derived drop-shadow parameters for a given intensity.
///
/// A single 0-100 intensity drives offset, spread, blur and opacity, the way
/// a "shadow strength" slider behaves in the editor.
#[derive(Debug, Clone, Copy)]
struct ShadowParams {
    offset_y: f32,
    spread: f32,
    sigma: f32,
    opacity: f32,
}

impl ShadowParams {
    fn from_intensity(intensity: f32, min_dim: f32) -> ShadowParams {
        let strength = (intensity / 100.0).clamp(0.0, 1.0);
        ShadowParams {
            offset_y: 0.012 * min_dim * strength,
            spread: 0.008 * min_dim * strength,
            sigma: 0.035 * min_dim * strength,
            opacity: 0.65 * strength,
        }
    }
}

/// CPU implementation of the frame pipeline.
pub struct SoftwareCompositor {
    scene: Arc<Scene>,
    animator: ZoomAnimator,
    painter: AnnotationPainter,
    /// Blurred shadow alpha masks keyed by rounded intensity.
    shadow_cache: LruCache<u32, Arc<Vec<u8>>>,
}

impl SoftwareCompositor {
    pub fn new(scene: Arc<Scene>) -> Self {
        let animator = ZoomAnimator::new(&scene.zoom_regions);
        let painter = AnnotationPainter::new(&scene.annotations, scene.preview_scale);
        Self {
            scene,
            animator,
            painter,
            shadow_cache: LruCache::new(NonZeroUsize::new(SHADOW_CACHE_SIZE).unwrap()),
        }
    }

    /// Build (or fetch) the blurred shadow mask for an intensity.
    ///
    /// The mask is static per export since the video layer geometry never
    /// moves; caching by intensity avoids recomputing the blur per frame.
    fn shadow_mask(&mut self, intensity: f32) -> Arc<Vec<u8>> {
        let key = intensity.round() as u32;
        if let Some(mask) = self.shadow_cache.get(&key) {
            return Arc::clone(mask);
        }

        let scene = &self.scene;
        let out_w = scene.out_w;
        let out_h = scene.out_h;
        let rect = scene.layout.content;
        let params = ShadowParams::from_intensity(intensity, rect.w.min(rect.h));

        let mut shadow_rect = rect;
        shadow_rect.x -= params.spread;
        shadow_rect.y += params.offset_y - params.spread;
        shadow_rect.w += params.spread * 2.0;
        shadow_rect.h += params.spread * 2.0;

        // Hard rounded-rect silhouette, then gaussian blur, alpha channel only.
        let mut mask = vec![0u8; (out_w * out_h) as usize];
        for y in 0..out_h {
            for x in 0..out_w {
                let dist = rounded_rect_sdf(
                    x as f32 + 0.5,
                    y as f32 + 0.5,
                    &shadow_rect,
                    scene.radius_px + params.spread,
                );
                if dist <= 0.0 {
                    mask[(y * out_w + x) as usize] = 255;
                }
            }
        }
        if params.sigma >= 0.5 {
            blur_alpha(&mut mask, out_w, out_h, params.sigma);
        }
        // Fold the opacity into the mask so blending is a single multiply.
        for value in &mut mask {
            *value = (*value as f32 * params.opacity) as u8;
        }

        let mask = Arc::new(mask);
        self.shadow_cache.put(key, Arc::clone(&mask));
        mask
    }

    fn draw_video_layer(&self, output: &mut [u8], screen: &DecodedFrame, zoom: &crate::zoom::ZoomSample) {
        let scene = &self.scene;
        let rect = scene.layout.content;
        let out_w = scene.out_w;

        let min_x = rect.x.floor().max(0.0) as u32;
        let min_y = rect.y.floor().max(0.0) as u32;
        let max_x = ((rect.x + rect.w).ceil() as u32).min(scene.out_w);
        let max_y = ((rect.y + rect.h).ceil() as u32).min(scene.out_h);

        for y in min_y..max_y {
            for x in min_x..max_x {
                let px = x as f32 + 0.5;
                let py = y as f32 + 0.5;

                let dist = rounded_rect_sdf(px, py, &rect, scene.radius_px);
                if dist > 0.5 {
                    continue;
                }
                let coverage = (0.5 - dist).clamp(0.0, 1.0);

                let Some((sx, sy)) =
                    scene
                        .layout
                        .map_to_source(px, py, zoom, screen.width, screen.height)
                else {
                    continue;
                };
                let color = screen.sample_bilinear(sx, sy);
                let idx = ((y * out_w + x) * 4) as usize;
                blend_px(&mut output[idx..idx + 4], color, coverage);
            }
        }
    }

    fn draw_border(&self, output: &mut [u8]) {
        let Some((border_px, color)) = self.scene.border else {
            return;
        };
        let scene = &self.scene;
        let rect = scene.layout.content;

        let min_x = (rect.x - border_px - 1.0).floor().max(0.0) as u32;
        let min_y = (rect.y - border_px - 1.0).floor().max(0.0) as u32;
        let max_x = ((rect.x + rect.w + border_px + 1.0).ceil() as u32).min(scene.out_w);
        let max_y = ((rect.y + rect.h + border_px + 1.0).ceil() as u32).min(scene.out_h);

        for y in min_y..max_y {
            for x in min_x..max_x {
                let px = x as f32 + 0.5;
                let py = y as f32 + 0.5;
                let dist = rounded_rect_sdf(px, py, &rect, scene.radius_px);
                // Ring hugs the outside of the video layer edge.
                if dist > 0.0 && dist <= border_px {
                    let fade_out = (border_px - dist + 0.5).clamp(0.0, 1.0);
                    let fade_in = (dist + 0.5).clamp(0.0, 1.0);
                    let idx = ((y * scene.out_w + x) * 4) as usize;
                    blend_px(&mut output[idx..idx + 4], color, fade_out.min(fade_in));
                }
            }
        }
    }
}

impl Compositor for SoftwareCompositor {
    fn compose(
        &mut self,
        screen: &DecodedFrame,
        camera: Option<&DecodedFrame>,
        effective_ms: u64,
    ) -> ExportResult<Vec<u8>> {
        let zoom = self.animator.tick(effective_ms);
        if zoom.motion > 0.05 {
            log::trace!(
                "[RENDER] high zoom motion {:.3} at {}ms",
                zoom.motion,
                effective_ms
            );
        }

        // 1. Background underneath everything.
        let mut output = self.scene.background.clone();
        let out_w = self.scene.out_w;
        let out_h = self.scene.out_h;

        // 2. Drop shadow behind the video layer.
        if self.scene.shadow_intensity > 0.0 {
            let mask = self.shadow_mask(self.scene.shadow_intensity);
            for (i, &alpha) in mask.iter().enumerate() {
                if alpha > 0 {
                    blend_px(
                        &mut output[i * 4..i * 4 + 4],
                        [0, 0, 0, 255],
                        alpha as f32 / 255.0,
                    );
                }
            }
        }

        // 3. Cropped, padded, rounded, zoomed video layer.
        self.draw_video_layer(&mut output, screen, &zoom);

        // 4. Border ring.
        self.draw_border(&mut output);

        // 5. Camera overlay.
        if let (Some(placement), Some(camera_frame)) = (&self.scene.camera, camera) {
            draw_camera(&mut output, out_w, out_h, placement, camera_frame);
        }

        // 6. Annotations on top.
        self.painter.paint(&mut output, out_w, out_h, effective_ms);

        Ok(output)
    }

    fn settle_animation(&mut self, effective_ms: u64) {
        self.animator.settle_at(effective_ms);
    }

    fn mode(&self) -> RenderMode {
        RenderMode::Software
    }
}

/// Gaussian blur of a single-channel mask, via the RGBA blur on a widened
/// buffer. Masks are small enough that the 4x traffic doesn't matter next to
/// doing this once per export.
fn blur_alpha(mask: &mut [u8], width: u32, height: u32, sigma: f32) {
    let mut rgba = vec![0u8; mask.len() * 4];
    for (i, &a) in mask.iter().enumerate() {
        rgba[i * 4] = a;
        rgba[i * 4 + 3] = a;
    }
    gaussian_blur(&mut rgba, width, height, sigma);
    for (i, a) in mask.iter_mut().enumerate() {
        *a = rgba[i * 4];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::tests_support::minimal_config;
    use crate::project::{WallpaperSpec, ZoomRegion};
    use uuid::Uuid;

    fn small_scene(mutate: impl FnOnce(&mut crate::project::ExportConfig)) -> Arc<Scene> {
        let mut config = minimal_config();
        config.output.width = 128;
        config.output.height = 72;
        config.preview_width = 128;
        config.preview_height = 72;
        config.source_width = 128;
        config.source_height = 72;
        mutate(&mut config);
        Arc::new(Scene::build(&config).unwrap())
    }

    fn gradient_frame(width: u32, height: u32) -> DecodedFrame {
        let mut frame = DecodedFrame::empty(width, height);
        for y in 0..height {
            for x in 0..width {
                let idx = ((y * width + x) * 4) as usize;
                frame.data[idx] = (x * 255 / width.max(1)) as u8;
                frame.data[idx + 1] = (y * 255 / height.max(1)) as u8;
                frame.data[idx + 2] = 128;
                frame.data[idx + 3] = 255;
            }
        }
        frame
    }

    #[test]
    fn test_compose_no_style_passes_frame_through() {
        let scene = small_scene(|_| {});
        let mut compositor = SoftwareCompositor::new(scene);
        let frame = gradient_frame(128, 72);
        let output = compositor.compose(&frame, None, 0).unwrap();
        assert_eq!(output.len(), 128 * 72 * 4);
        // Center pixel matches the source (no padding, no zoom, no crop).
        let idx = ((36 * 128 + 64) * 4) as usize;
        assert!((output[idx] as i32 - frame.data[idx] as i32).abs() <= 2);
    }

    #[test]
    fn test_padding_exposes_background() {
        let scene = small_scene(|config| {
            config.style.padding_percent = 15.0;
            config.style.wallpaper = WallpaperSpec::Css {
                value: "#102030".to_string(),
            };
        });
        let mut compositor = SoftwareCompositor::new(scene);
        let frame = gradient_frame(128, 72);
        let output = compositor.compose(&frame, None, 0).unwrap();
        // Top-left corner is outside the padded video layer.
        assert_eq!(&output[0..3], &[0x10, 0x20, 0x30]);
    }

    #[test]
    fn test_rounded_corners_clip_to_background() {
        let scene = small_scene(|config| {
            config.style.corner_radius = 20.0;
            config.style.wallpaper = WallpaperSpec::Css {
                value: "#ff0000".to_string(),
            };
        });
        let mut compositor = SoftwareCompositor::new(scene);
        // Solid white source so clipped corners are unambiguous.
        let mut frame = DecodedFrame::empty(128, 72);
        frame.data.chunks_exact_mut(4).for_each(|px| px.copy_from_slice(&[255, 255, 255, 255]));
        let output = compositor.compose(&frame, None, 0).unwrap();
        // The very corner pixel is outside the rounded rect.
        assert_eq!(output[0], 0xff, "corner should show background red");
        // Center is video white.
        let idx = ((36 * 128 + 64) * 4) as usize;
        assert_eq!(output[idx], 255);
    }

    #[test]
    fn test_zoom_region_magnifies_center() {
        let scene = small_scene(|config| {
            config.zoom_regions.push(ZoomRegion {
                id: Uuid::new_v4(),
                start_ms: 0,
                end_ms: 10_000,
                depth: 3,
                custom_scale: None,
                focus_x: 0.5,
                focus_y: 0.5,
            });
        });
        let mut compositor = SoftwareCompositor::new(scene);
        compositor.settle_animation(5_000);
        let frame = gradient_frame(128, 72);
        let output = compositor.compose(&frame, None, 5_000).unwrap();

        // At 1.8x centered zoom, the left edge of the output samples source
        // x = 0.5 - 0.5/1.8 ~ 0.222 instead of 0; red channel encodes x.
        let idx = ((36 * 128) * 4) as usize;
        let expected = (0.2222 * 255.0) as i32;
        assert!(
            (output[idx] as i32 - expected).abs() < 12,
            "left edge should sample ~22% into the source, got {} expected ~{}",
            output[idx],
            expected
        );
    }

    #[test]
    fn test_shadow_darkens_outside_video_layer() {
        let scene = small_scene(|config| {
            config.style.padding_percent = 15.0;
            config.style.shadow = 80.0;
            config.style.wallpaper = WallpaperSpec::Css {
                value: "#c0c0c0".to_string(),
            };
        });
        let mut compositor = SoftwareCompositor::new(scene);
        let frame = gradient_frame(128, 72);
        let output = compositor.compose(&frame, None, 0).unwrap();
        // Just below the video layer the shadow darkens the gray background.
        let rect = compositor.scene.layout.content;
        let sample_y = (rect.y + rect.h + 2.0) as u32;
        let idx = ((sample_y * 128 + 64) * 4) as usize;
        assert!(
            output[idx] < 0xc0,
            "shadow should darken the background, got {}",
            output[idx]
        );
        // Far corner stays unshadowed.
        assert_eq!(output[0], 0xc0);
    }

    #[test]
    fn test_shadow_mask_cached_per_intensity() {
        let scene = small_scene(|config| {
            config.style.shadow = 50.0;
            config.style.padding_percent = 10.0;
        });
        let mut compositor = SoftwareCompositor::new(scene);
        let first = compositor.shadow_mask(50.0);
        let second = compositor.shadow_mask(50.0);
        assert!(Arc::ptr_eq(&first, &second), "same intensity must hit the cache");
        let other = compositor.shadow_mask(80.0);
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[test]
    fn test_annotation_painted_during_window_only() {
        use crate::project::{AnnotationKind, AnnotationRegion, AnnotationStyle, FigureShape};
        let scene = small_scene(|config| {
            config.annotations.push(AnnotationRegion {
                id: Uuid::new_v4(),
                start_ms: 1_000,
                end_ms: 2_000,
                x: 0.25,
                y: 0.25,
                width_px: 40.0,
                height_px: 20.0,
                z_index: 0,
                style: AnnotationStyle {
                    color: "#00ff00".to_string(),
                    stroke_width: 2.0,
                    opacity: 1.0,
                },
                kind: AnnotationKind::Figure {
                    shape: FigureShape::Highlight,
                },
            });
        });
        let mut compositor = SoftwareCompositor::new(scene);
        let frame = DecodedFrame::empty(128, 72);

        let during = compositor.compose(&frame, None, 1_500).unwrap();
        let idx = ((27 * 128 + 48) * 4) as usize; // inside the highlight rect
        assert!(during[idx + 1] > 0, "highlight should tint green during its window");

        let after = compositor.compose(&frame, None, 2_500).unwrap();
        assert_eq!(after[idx + 1], 0, "highlight must vanish after its window");
    }
}
