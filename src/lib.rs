//! ReelForge: export and rendering engine for edited screen recordings.
//!
//! The editor UI describes an edit (zoom, trim, crop, camera overlay,
//! annotations, scene styling) as an [`ExportConfig`] and hands it to an
//! [`Exporter`]. The engine reproduces the preview compositing pipeline
//! frame by frame on a deterministic time axis and encodes the result to
//! MP4 (H.264 + AAC) or animated GIF, choosing between sequential,
//! parallel-segmented, and GPU-hybrid execution based on the host's
//! capabilities.
//!
//! ```no_run
//! use reelforge::{null_progress, Exporter, ExportOutcome};
//!
//! # fn load_config() -> reelforge::ExportConfig { unimplemented!() }
//! let exporter = Exporter::new(load_config())?;
//! match exporter.run(null_progress())? {
//!     ExportOutcome::Completed(output) => std::fs::write("out.mp4", &output.bytes)?,
//!     ExportOutcome::Cancelled => println!("export cancelled"),
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod capabilities;
pub mod error;
pub mod export;
pub mod media;
pub mod project;
pub mod render;
pub mod strategy;
pub mod timeline;
pub mod zoom;

pub use capabilities::{get_capabilities, HostCapabilities};
pub use error::{ExportError, ExportResult};
pub use export::{null_progress, ExportOutcome, ExportOutput, ExportPhase, Exporter, ProgressFn};
pub use project::{
    AnnotationKind, AnnotationRegion, AnnotationStyle, CameraLayout, CameraOverlay, CameraShape,
    CropRegion, EncodeQueuePolicy, ExportConfig, ExportStrategy, FigureShape, OutputFormat,
    OutputSettings, SceneStyle, TrimRegion, VideoCodec, WallpaperSpec, ZoomRegion,
};
pub use strategy::{select_strategy, HostProfile, StrategyPlan};
pub use timeline::TimeMapper;
pub use zoom::{ZoomAnimator, ZoomSample};
