//! Frame compositing.
//!
//! The exporters drive a `Compositor` once per output frame and never care
//! whether pixels come from the CPU path or the GPU path. Everything static
//! for the export (layout, parsed background, camera placement, region lists)
//! lives in a shared `Scene`; everything per-frame (zoom animation state,
//! caches) lives in the compositor instance, one per slot.

pub mod annotations;
pub mod background;
pub mod camera;
pub mod cpu;
pub mod gpu;
pub mod types;

use std::sync::Arc;

use crate::error::ExportResult;
use crate::project::{AnnotationRegion, CropRegion, ExportConfig, ZoomRegion};
use crate::render::background::{render_background, BackgroundPaint};
use crate::render::camera::CameraPlacement;
use crate::render::types::{DecodedFrame, FrameLayout};

/// Which compositor implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Software,
    Gpu,
}

/// One frame's compositing interface.
///
/// Implementations own their animation state exclusively; a compositor
/// instance must never be shared between slots.
pub trait Compositor: Send {
    /// Composite one output frame.
    ///
    /// `screen` is the decoded source frame for this output frame's source
    /// timestamp, `camera` the matching camera frame when an overlay is
    /// active, and `effective_ms` the output-timeline timestamp driving
    /// zoom and annotations. Returns the finished RGBA buffer.
    fn compose(
        &mut self,
        screen: &DecodedFrame,
        camera: Option<&DecodedFrame>,
        effective_ms: u64,
    ) -> ExportResult<Vec<u8>>;

    /// Jump the zoom animation to its settled state at `effective_ms`.
    ///
    /// Called when a slot starts mid-timeline so segment boundaries don't
    /// replay the zoom-in transient.
    fn settle_animation(&mut self, effective_ms: u64);

    fn mode(&self) -> RenderMode;
}

/// Static per-export rendering inputs, shared across slots.
pub struct Scene {
    pub out_w: u32,
    pub out_h: u32,
    pub source_w: u32,
    pub source_h: u32,
    /// Preview -> output pixel scale for authored parameters.
    pub preview_scale: f32,
    pub crop: CropRegion,
    /// Geometry of the screen video layer.
    pub layout: FrameLayout,
    /// Corner radius of the video layer in output pixels.
    pub radius_px: f32,
    /// Drop shadow intensity 0-100 (0 = off).
    pub shadow_intensity: f32,
    /// Border ring (width in output pixels, color) when enabled.
    pub border: Option<(f32, [u8; 4])>,
    /// Pre-rendered opaque background layer, `out_w * out_h * 4` bytes.
    pub background: Vec<u8>,
    /// Camera overlay placement when enabled.
    pub camera: Option<CameraPlacement>,
    pub zoom_regions: Vec<ZoomRegion>,
    pub annotations: Vec<AnnotationRegion>,
}

impl Scene {
    /// Resolve an export config into static rendering inputs.
    pub fn build(config: &ExportConfig) -> ExportResult<Scene> {
        let out_w = config.output.width;
        let out_h = config.output.height;
        let scale = config.preview_scale();

        let camera = CameraPlacement::resolve(&config.camera, out_w, out_h, scale);
        let screen_bounds = camera.as_ref().and_then(|c| c.screen_bounds());

        let layout = FrameLayout::compute(
            out_w,
            out_h,
            config.source_width,
            config.source_height,
            config.crop,
            config.style.padding_percent,
            screen_bounds,
        );

        let paint = BackgroundPaint::from_spec(&config.style.wallpaper)?;
        let background = render_background(
            &paint,
            out_w,
            out_h,
            config.style.background_blur * scale,
        )?;

        let border = if config.style.border_enabled && config.style.border_width > 0.0 {
            Some((
                config.style.border_width * scale,
                background::parse_color(&config.style.border_color)
                    .unwrap_or([255, 255, 255, 255]),
            ))
        } else {
            None
        };

        Ok(Scene {
            out_w,
            out_h,
            source_w: config.source_width,
            source_h: config.source_height,
            preview_scale: scale,
            crop: config.crop.clamped(),
            layout,
            radius_px: config.style.corner_radius.max(0.0) * scale,
            shadow_intensity: config.style.shadow.clamp(0.0, 100.0),
            border,
            background,
            camera,
            zoom_regions: config.zoom_regions.clone(),
            annotations: config.annotations.clone(),
        })
    }
}

/// Construct a compositor for the requested mode.
///
/// GPU initialization failures degrade to the software path with a warning
/// rather than failing the export; the strategy selector's GPU choice is an
/// optimization, not a contract.
pub fn create_compositor(mode: RenderMode, scene: Arc<Scene>) -> ExportResult<Box<dyn Compositor>> {
    match mode {
        RenderMode::Software => Ok(Box::new(cpu::SoftwareCompositor::new(scene))),
        RenderMode::Gpu => match gpu::GpuCompositor::new(Arc::clone(&scene)) {
            Ok(compositor) => Ok(Box::new(compositor)),
            Err(e) => {
                log::warn!("[RENDER] GPU compositor unavailable ({}); using software", e);
                Ok(Box::new(cpu::SoftwareCompositor::new(scene)))
            }
        },
    }
}
