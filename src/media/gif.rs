//! Animated GIF encoding.
//!
//! The GIF path reuses the sequential frame loop but sinks rendered frames
//! into the image crate's GIF encoder instead of H.264 + MP4. GIF timing is
//! in centiseconds, so the effective frame rate is capped at 30fps.

use std::fs::File;
use std::path::PathBuf;

use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame, RgbaImage};
use uuid::Uuid;

use crate::error::{ExportError, ExportResult};

/// Highest frame rate the GIF timebase can represent usefully.
pub const GIF_MAX_FPS: u32 = 30;

/// Streams rendered RGBA frames into an animated GIF file.
pub struct GifSink {
    path: PathBuf,
    encoder: Option<GifEncoder<File>>,
    delay: Delay,
    frames: u64,
}

impl GifSink {
    pub fn new(fps: u32) -> ExportResult<Self> {
        let fps = fps.clamp(1, GIF_MAX_FPS);
        let path = std::env::temp_dir().join(format!("reelforge-{}.gif", Uuid::new_v4()));
        let file = File::create(&path)?;

        let mut encoder = GifEncoder::new_with_speed(file, 10);
        encoder
            .set_repeat(Repeat::Infinite)
            .map_err(|e| ExportError::Encode(format!("gif repeat: {}", e)))?;

        Ok(Self {
            path,
            encoder: Some(encoder),
            delay: Delay::from_numer_denom_ms(1000, fps),
            frames: 0,
        })
    }

    /// The frame rate the sink will actually play back at.
    pub fn effective_fps(fps: u32) -> u32 {
        fps.clamp(1, GIF_MAX_FPS)
    }

    pub fn push_frame(&mut self, rgba: Vec<u8>, width: u32, height: u32) -> ExportResult<()> {
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| ExportError::Encode("gif sink already finished".to_string()))?;
        let image = RgbaImage::from_raw(width, height, rgba).ok_or_else(|| {
            ExportError::Encode("gif frame buffer does not match dimensions".to_string())
        })?;
        encoder
            .encode_frame(Frame::from_parts(image, 0, 0, self.delay))
            .map_err(|e| ExportError::Encode(format!("gif frame {}: {}", self.frames, e)))?;
        self.frames += 1;
        Ok(())
    }

    /// Finish the stream and return the GIF bytes. Single-shot.
    pub fn finish(mut self) -> ExportResult<Vec<u8>> {
        // Dropping the encoder flushes the trailer.
        self.encoder.take();
        let bytes = std::fs::read(&self.path)?;
        let _ = std::fs::remove_file(&self.path);
        log::info!("[GIF] finished: {} frames, {} bytes", self.frames, bytes.len());
        Ok(bytes)
    }
}

impl Drop for GifSink {
    fn drop(&mut self) {
        if self.encoder.is_some() {
            self.encoder.take();
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_capped_for_gif_timebase() {
        assert_eq!(GifSink::effective_fps(60), 30);
        assert_eq!(GifSink::effective_fps(24), 24);
        assert_eq!(GifSink::effective_fps(0), 1);
    }

    #[test]
    fn test_gif_roundtrip_has_header_and_frames() {
        let mut sink = GifSink::new(10).unwrap();
        for shade in [0u8, 128, 255] {
            let frame = vec![shade; 16 * 8 * 4];
            sink.push_frame(frame, 16, 8).unwrap();
        }
        let bytes = sink.finish().unwrap();
        assert!(bytes.starts_with(b"GIF89a") || bytes.starts_with(b"GIF87a"));
        assert!(bytes.len() > 100);
    }

    #[test]
    fn test_mismatched_buffer_rejected() {
        let mut sink = GifSink::new(10).unwrap();
        let err = sink.push_frame(vec![0u8; 10], 16, 8).unwrap_err();
        assert!(matches!(err, ExportError::Encode(_)));
    }
}
