//! Export configuration types.
//!
//! An ExportConfig is the complete, immutable description of one export job:
//! - Source media references (screen recording, optional camera recording)
//! - Edit regions (zoom, trim, crop, annotations)
//! - Scene styling (wallpaper, padding, rounding, shadow, border)
//! - Camera overlay settings
//! - Output parameters (dimensions, frame rate, bitrate, codec, format)
//!
//! The editor UI hands this struct over once per export; the engine treats
//! every field as read-only for the duration of the job.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ExportError, ExportResult};

// ============================================================================
// Regions
// ============================================================================

/// A zoom region on the output timeline.
///
/// Either a discrete depth level (1-6, mapped to a fixed scale table) or an
/// explicit custom scale. The focus point is normalized to the source frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoomRegion {
    /// Unique region identifier.
    pub id: Uuid,
    /// Region start in output (post-trim) milliseconds, inclusive.
    pub start_ms: u64,
    /// Region end in output milliseconds, exclusive.
    pub end_ms: u64,
    /// Discrete zoom depth (1-6). Ignored when `custom_scale` is set.
    pub depth: u8,
    /// Explicit scale factor overriding the depth table.
    pub custom_scale: Option<f32>,
    /// Normalized focus X (0-1).
    pub focus_x: f32,
    /// Normalized focus Y (0-1).
    pub focus_y: f32,
}

/// A span of source time removed from the output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimRegion {
    /// Unique region identifier.
    pub id: Uuid,
    /// Trim start in source milliseconds, inclusive.
    pub start_ms: u64,
    /// Trim end in source milliseconds, exclusive.
    pub end_ms: u64,
}

impl TrimRegion {
    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

/// Normalized crop window of the source frame (zoom-independent).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CropRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Default for CropRegion {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
        }
    }
}

impl CropRegion {
    /// Clamp to the unit square, preserving at least a 1% window.
    pub fn clamped(&self) -> CropRegion {
        let x = self.x.clamp(0.0, 0.99);
        let y = self.y.clamp(0.0, 0.99);
        CropRegion {
            x,
            y,
            width: self.width.clamp(0.01, 1.0 - x),
            height: self.height.clamp(0.01, 1.0 - y),
        }
    }

    pub fn is_full_frame(&self) -> bool {
        self.x <= 0.0 && self.y <= 0.0 && self.width >= 1.0 && self.height >= 1.0
    }
}

// ============================================================================
// Annotations
// ============================================================================

/// Kind of annotation with its type-specific payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum AnnotationKind {
    /// Text label rendered with a system font.
    Text { content: String, font_size_px: f32 },
    /// Image stamp loaded from disk.
    Image { path: String },
    /// Vector figure.
    Figure { shape: FigureShape },
}

/// Figure annotation shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FigureShape {
    Rectangle,
    Ellipse,
    /// Translucent filled highlight box.
    Highlight,
    /// Arrow from the top-left to the bottom-right of the annotation rect.
    Arrow,
}

/// Visual style shared by all annotation kinds.
///
/// Positions, sizes and stroke widths are authored against the editor's
/// preview resolution and rescaled at export time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationStyle {
    /// Stroke/text color as a CSS-like string ("#rrggbb", "rgba(...)").
    pub color: String,
    /// Stroke width in preview pixels (figures).
    pub stroke_width: f32,
    /// Overall opacity (0-1).
    pub opacity: f32,
}

impl Default for AnnotationStyle {
    fn default() -> Self {
        Self {
            color: "#ffffff".to_string(),
            stroke_width: 4.0,
            opacity: 1.0,
        }
    }
}

/// A time-windowed annotation on the output timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationRegion {
    /// Unique region identifier.
    pub id: Uuid,
    /// Visible-from, output milliseconds, inclusive.
    pub start_ms: u64,
    /// Visible-until, output milliseconds, exclusive.
    pub end_ms: u64,
    /// Normalized position of the annotation rect's top-left (0-1).
    pub x: f32,
    pub y: f32,
    /// Size in preview pixels.
    pub width_px: f32,
    pub height_px: f32,
    /// Paint order; higher values paint last (on top).
    pub z_index: i32,
    pub style: AnnotationStyle,
    #[serde(flatten)]
    pub kind: AnnotationKind,
}

// ============================================================================
// Camera overlay
// ============================================================================

/// Placement of the camera overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CameraLayout {
    // Picture-in-picture positions
    TopLeft,
    TopCenter,
    TopRight,
    BottomLeft,
    BottomCenter,
    BottomRight,
    // Split arrangements: camera occupies the named pane, screen the other
    SplitLeft,
    SplitRight,
    SplitTop,
    SplitBottom,
}

impl CameraLayout {
    /// True for the four split arrangements.
    pub fn is_split(&self) -> bool {
        matches!(
            self,
            CameraLayout::SplitLeft
                | CameraLayout::SplitRight
                | CameraLayout::SplitTop
                | CameraLayout::SplitBottom
        )
    }
}

/// Shape mask applied to the picture-in-picture camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CameraShape {
    Circle,
    Rectangle,
}

/// Border ring drawn around the picture-in-picture camera.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraBorder {
    pub enabled: bool,
    /// Width in preview pixels.
    pub width: f32,
    /// CSS-like color string.
    pub color: String,
}

impl Default for CameraBorder {
    fn default() -> Self {
        Self {
            enabled: false,
            width: 3.0,
            color: "#ffffff".to_string(),
        }
    }
}

/// Camera overlay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraOverlay {
    pub enabled: bool,
    /// Path to the camera recording.
    pub video_path: Option<String>,
    pub layout: CameraLayout,
    /// PiP size as a fraction of output width.
    pub size: f32,
    /// Extra offset from the layout anchor, normalized (0-1).
    pub offset_x: f32,
    pub offset_y: f32,
    pub shape: CameraShape,
    /// Overlay opacity (0-1).
    pub opacity: f32,
    /// Mirror the camera horizontally.
    pub mirror: bool,
    pub border: CameraBorder,
}

impl Default for CameraOverlay {
    fn default() -> Self {
        Self {
            enabled: false,
            video_path: None,
            layout: CameraLayout::BottomRight,
            size: 0.2,
            offset_x: 0.0,
            offset_y: 0.0,
            shape: CameraShape::Circle,
            opacity: 1.0,
            mirror: false,
            border: CameraBorder::default(),
        }
    }
}

// ============================================================================
// Scene styling
// ============================================================================

/// Wallpaper behind the (padded) video layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum WallpaperSpec {
    /// No wallpaper; the frame is laid on black.
    None,
    /// Solid color or linear gradient from a CSS-like string
    /// ("#1e1e2e", "rgb(30, 30, 46)", "linear-gradient(135deg, #667eea, #764ba2)").
    Css { value: String },
    /// Image file scaled to cover the output.
    Image { path: String },
}

impl Default for WallpaperSpec {
    fn default() -> Self {
        WallpaperSpec::None
    }
}

/// Static scene styling applied to every frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneStyle {
    pub wallpaper: WallpaperSpec,
    /// Gaussian blur radius for the wallpaper, in preview pixels.
    pub background_blur: f32,
    /// Padding around the video as a percentage (0-40) of the smaller
    /// output dimension.
    pub padding_percent: f32,
    /// Corner radius of the video layer in preview pixels.
    pub corner_radius: f32,
    /// Drop shadow intensity (0-100); 0 disables the shadow.
    pub shadow: f32,
    /// Border around the video layer.
    pub border_enabled: bool,
    /// Border width in preview pixels.
    pub border_width: f32,
    /// Border color as a CSS-like string.
    pub border_color: String,
}

impl Default for SceneStyle {
    fn default() -> Self {
        Self {
            wallpaper: WallpaperSpec::None,
            background_blur: 0.0,
            padding_percent: 0.0,
            corner_radius: 0.0,
            shadow: 0.0,
            border_enabled: false,
            border_width: 2.0,
            border_color: "#ffffff".to_string(),
        }
    }
}

// ============================================================================
// Output parameters
// ============================================================================

/// Output container/format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputFormat {
    Mp4,
    Gif,
}

/// Video codec for MP4 output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VideoCodec {
    H264,
}

/// Output encoding parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Target bitrate in bits/s; 0 selects quality-based rate control.
    pub bitrate: u64,
    pub codec: VideoCodec,
    pub format: OutputFormat,
    /// Quality 0-100, mapped to CRF/CQ.
    pub quality: u32,
    /// Prefer a hardware encoder when one is available.
    pub prefer_hardware_encode: bool,
    /// Keyframe interval in seconds.
    pub keyframe_interval_s: f32,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 30,
            bitrate: 0,
            codec: VideoCodec::H264,
            format: OutputFormat::Mp4,
            quality: 75,
            prefer_hardware_encode: true,
            keyframe_interval_s: 2.0,
        }
    }
}

// ============================================================================
// Strategy / queue knobs
// ============================================================================

/// Export execution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExportStrategy {
    Sequential,
    /// Sequential frame loop with GPU compositing.
    SequentialGpu,
    Parallel,
    /// Parallel segments with GPU compositing in every slot.
    Hybrid,
}

/// In-flight encode queue policy for the sequential exporter.
///
/// The adaptive constants are tuning knobs, not a correctness contract.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum EncodeQueuePolicy {
    Fixed { capacity: usize },
    Adaptive { min: usize, max: usize },
}

impl Default for EncodeQueuePolicy {
    fn default() -> Self {
        EncodeQueuePolicy::Adaptive { min: 2, max: 8 }
    }
}

// ============================================================================
// Export config
// ============================================================================

/// Complete, immutable description of one export job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportConfig {
    /// Path to the screen recording.
    pub source_path: String,
    /// Source duration in milliseconds.
    pub source_duration_ms: u64,
    /// Source recording dimensions.
    pub source_width: u32,
    pub source_height: u32,

    /// Preview canvas dimensions the edits were authored against.
    pub preview_width: u32,
    pub preview_height: u32,

    pub output: OutputSettings,
    pub style: SceneStyle,
    pub crop: CropRegion,
    pub camera: CameraOverlay,

    #[serde(default)]
    pub zoom_regions: Vec<ZoomRegion>,
    #[serde(default)]
    pub trim_regions: Vec<TrimRegion>,
    #[serde(default)]
    pub annotations: Vec<AnnotationRegion>,

    /// Force a specific strategy instead of consulting the selector.
    #[serde(default)]
    pub strategy_override: Option<ExportStrategy>,
    #[serde(default)]
    pub queue_policy: EncodeQueuePolicy,
}

impl ExportConfig {
    /// Validate the config before any decoder or encoder is touched.
    pub fn validate(&self) -> ExportResult<()> {
        if self.output.width == 0 || self.output.height == 0 {
            return Err(ExportError::InvalidConfig(
                "output dimensions must be non-zero".to_string(),
            ));
        }
        if self.output.width % 2 != 0 || self.output.height % 2 != 0 {
            return Err(ExportError::InvalidConfig(format!(
                "output dimensions must be even, got {}x{}",
                self.output.width, self.output.height
            )));
        }
        if self.output.fps == 0 {
            return Err(ExportError::InvalidConfig(
                "output frame rate must be non-zero".to_string(),
            ));
        }
        if self.preview_width == 0 || self.preview_height == 0 {
            return Err(ExportError::InvalidConfig(
                "preview dimensions must be non-zero".to_string(),
            ));
        }
        if self.source_duration_ms == 0 {
            return Err(ExportError::InvalidConfig(
                "source duration must be non-zero".to_string(),
            ));
        }
        for region in &self.zoom_regions {
            if region.end_ms <= region.start_ms {
                return Err(ExportError::InvalidConfig(format!(
                    "zoom region {} has an empty time range",
                    region.id
                )));
            }
            if region.custom_scale.is_none() && !(1..=6).contains(&region.depth) {
                return Err(ExportError::InvalidConfig(format!(
                    "zoom region {} depth {} outside 1-6",
                    region.id, region.depth
                )));
            }
        }
        for trim in &self.trim_regions {
            if trim.end_ms <= trim.start_ms {
                return Err(ExportError::InvalidConfig(format!(
                    "trim region {} has an empty time range",
                    trim.id
                )));
            }
            if trim.end_ms > self.source_duration_ms {
                return Err(ExportError::InvalidConfig(format!(
                    "trim region {} extends past the source duration",
                    trim.id
                )));
            }
        }
        if let EncodeQueuePolicy::Adaptive { min, max } = self.queue_policy {
            if min == 0 || max < min {
                return Err(ExportError::InvalidConfig(
                    "adaptive queue bounds must satisfy 0 < min <= max".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Scale factor from preview pixel space to output pixel space.
    ///
    /// Edits are authored against the preview canvas; pixel-space style
    /// parameters are multiplied by this before rendering.
    pub fn preview_scale(&self) -> f32 {
        let sx = self.output.width as f32 / self.preview_width as f32;
        let sy = self.output.height as f32 / self.preview_height as f32;
        sx.min(sy)
    }
}

/// Test fixture shared across module tests.
#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;

    pub(crate) fn minimal_config() -> ExportConfig {
        ExportConfig {
            source_path: "/tmp/recording.mp4".to_string(),
            source_duration_ms: 10_000,
            source_width: 1920,
            source_height: 1080,
            preview_width: 960,
            preview_height: 540,
            output: OutputSettings::default(),
            style: SceneStyle::default(),
            crop: CropRegion::default(),
            camera: CameraOverlay::default(),
            zoom_regions: vec![],
            trim_regions: vec![],
            annotations: vec![],
            strategy_override: None,
            queue_policy: EncodeQueuePolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::minimal_config;
    use super::*;

    #[test]
    fn test_valid_config_passes() {
        assert!(minimal_config().validate().is_ok());
    }

    #[test]
    fn test_odd_dimensions_rejected() {
        let mut config = minimal_config();
        config.output.width = 1921;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("even"));
    }

    #[test]
    fn test_zoom_depth_out_of_range_rejected() {
        let mut config = minimal_config();
        config.zoom_regions.push(ZoomRegion {
            id: Uuid::new_v4(),
            start_ms: 0,
            end_ms: 1000,
            depth: 7,
            custom_scale: None,
            focus_x: 0.5,
            focus_y: 0.5,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_custom_scale_bypasses_depth_check() {
        let mut config = minimal_config();
        config.zoom_regions.push(ZoomRegion {
            id: Uuid::new_v4(),
            start_ms: 0,
            end_ms: 1000,
            depth: 0,
            custom_scale: Some(2.5),
            focus_x: 0.5,
            focus_y: 0.5,
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_trim_past_duration_rejected() {
        let mut config = minimal_config();
        config.trim_regions.push(TrimRegion {
            id: Uuid::new_v4(),
            start_ms: 9_000,
            end_ms: 11_000,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_crop_clamping() {
        let crop = CropRegion {
            x: 0.5,
            y: 0.5,
            width: 0.9,
            height: 0.9,
        };
        let clamped = crop.clamped();
        assert!(clamped.x + clamped.width <= 1.0 + f32::EPSILON);
        assert!(clamped.y + clamped.height <= 1.0 + f32::EPSILON);
    }

    #[test]
    fn test_preview_scale() {
        let config = minimal_config();
        assert!((config.preview_scale() - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = minimal_config();
        let json = serde_json::to_string(&config).unwrap();
        let back: ExportConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.output.width, config.output.width);
        assert_eq!(back.source_path, config.source_path);
    }
}
