//! Central error types for ReelForge.
//!
//! One typed error enum covers the whole export pipeline. Fatal variants
//! abort the export; recoverable conditions (missing audio, hardware encoder
//! unavailable) are handled locally and never surface here.

use thiserror::Error;

/// Main error type for export operations.
#[derive(Error, Debug)]
pub enum ExportError {
    /// Export configuration rejected before any work started
    #[error("Invalid export config: {0}")]
    InvalidConfig(String),

    /// Source media could not be opened or decoded (fatal)
    #[error("Decode error: {0}")]
    Decode(String),

    /// Neither the hardware nor the software encoder could be configured
    #[error("Encoder init failed: {0}")]
    EncoderInit(String),

    /// Encoding a frame failed after any permitted retry
    #[error("Encode error: {0}")]
    Encode(String),

    /// Container muxing failed or the muxer was misused
    #[error("Mux error: {0}")]
    Mux(String),

    /// Frame compositing failed
    #[error("Render error: {0}")]
    Render(String),

    /// GPU initialization or readback failed
    #[error("GPU error: {0}")]
    Gpu(String),

    /// One or more parallel segments failed; the export was aborted
    #[error("Segment failure: {details}")]
    SegmentsFailed { details: String },

    /// Filesystem I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ffmpeg_next::Error> for ExportError {
    fn from(err: ffmpeg_next::Error) -> Self {
        ExportError::Decode(err.to_string())
    }
}

impl From<image::ImageError> for ExportError {
    fn from(err: image::ImageError) -> Self {
        ExportError::Render(err.to_string())
    }
}

/// Type alias for Results using ExportError.
pub type ExportResult<T> = Result<T, ExportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ExportError::Decode("missing moov atom".to_string());
        assert_eq!(err.to_string(), "Decode error: missing moov atom");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ExportError = io_err.into();
        assert!(matches!(err, ExportError::Io(_)));
    }

    #[test]
    fn test_segment_failure_aggregation() {
        let err = ExportError::SegmentsFailed {
            details: "segment 2: decode error; segment 5: encode error".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("segment 2"));
        assert!(msg.contains("segment 5"));
    }
}
