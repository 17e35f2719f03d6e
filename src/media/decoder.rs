//! Seekable video decoder producing RGBA frames.
//!
//! One decoder instance owns one FFmpeg demux/decode/scale chain and is
//! driven by monotonically increasing source timestamps. Small forward steps
//! decode sequentially; jumps (trim boundaries, segment starts) reseek to the
//! nearest prior keyframe. Never shared between threads.

use std::path::Path;

use ffmpeg_next as ffmpeg;

use ffmpeg::format::Pixel;
use ffmpeg::media::Type as MediaType;
use ffmpeg::software::scaling;
use ffmpeg::util::frame::video::Video as VideoFrame;

use crate::error::{ExportError, ExportResult};
use crate::render::types::DecodedFrame;

/// Forward distance beyond which advancing decodes-and-discards would cost
/// more than a keyframe seek.
pub const RESEEK_DRIFT_MS: i64 = 1_500;

/// Streaming decoder for one media file.
pub struct MediaDecoder {
    ictx: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::decoder::Video,
    scaler: Option<scaling::Context>,
    /// Display dimensions (container-reported, excludes codec padding).
    width: u32,
    height: u32,
    /// Seconds per pts unit of the video stream.
    time_base: f64,
    duration_ms: u64,
    /// Timestamp of the most recently returned frame.
    position_ms: i64,
    last_frame: Option<DecodedFrame>,
    frames_read: u32,
    eof: bool,
}

impl MediaDecoder {
    pub fn open(path: &Path) -> ExportResult<Self> {
        ffmpeg::init().map_err(|e| ExportError::Decode(format!("ffmpeg init: {}", e)))?;

        let ictx = ffmpeg::format::input(&path)
            .map_err(|e| ExportError::Decode(format!("open '{}': {}", path.display(), e)))?;

        let stream = ictx
            .streams()
            .best(MediaType::Video)
            .ok_or_else(|| {
                ExportError::Decode(format!("no video stream in '{}'", path.display()))
            })?;
        let stream_index = stream.index();
        let time_base = f64::from(stream.time_base());

        let params = stream.parameters();
        // Container dimensions are the display dimensions; decoded frames may
        // carry codec alignment padding.
        let (width, height) = (params.width() as u32, params.height() as u32);

        let duration_ms = if stream.duration() > 0 {
            (stream.duration() as f64 * time_base * 1000.0) as u64
        } else {
            (ictx.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE) * 1000.0) as u64
        };

        let decoder = ffmpeg::codec::context::Context::from_parameters(params)
            .map_err(|e| ExportError::Decode(format!("decoder context: {}", e)))?
            .decoder()
            .video()
            .map_err(|e| ExportError::Decode(format!("open video decoder: {}", e)))?;

        let (width, height) = if width > 0 && height > 0 {
            (width, height)
        } else {
            (decoder.width(), decoder.height())
        };

        log::debug!(
            "[DECODER] opened '{}': {}x{}, {}ms",
            path.display(),
            width,
            height,
            duration_ms
        );

        Ok(Self {
            ictx,
            stream_index,
            decoder,
            scaler: None,
            width,
            height,
            time_base,
            duration_ms,
            position_ms: i64::MIN,
            last_frame: None,
            frames_read: 0,
            eof: false,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Decode the frame displayed at `source_ms`.
    ///
    /// Backward targets always reseek; forward targets reseek only when the
    /// drift exceeds `RESEEK_DRIFT_MS`, otherwise the decoder reads ahead
    /// sequentially. Returns the last decoded frame when the stream ends
    /// early (sources whose audio outlives their video, rounding at the tail).
    pub fn frame_at(&mut self, source_ms: u64) -> ExportResult<DecodedFrame> {
        let target = source_ms as i64;

        // The current frame still covers the target (including small backward
        // rounding from frame-rate conversion): no decode needed.
        if let Some(last) = &self.last_frame {
            if self.position_ms >= target && self.position_ms - target <= RESEEK_DRIFT_MS {
                return Ok(last.clone());
            }
        }

        let drift = target - self.position_ms;
        if target < self.position_ms || drift > RESEEK_DRIFT_MS {
            self.seek_to(source_ms)?;
        }

        self.decode_until(target)
    }

    /// Keyframe-seek to at-or-before `source_ms` and reset decoder state.
    fn seek_to(&mut self, source_ms: u64) -> ExportResult<()> {
        let ts = (source_ms as i64) * (ffmpeg::ffi::AV_TIME_BASE as i64) / 1000;
        log::trace!("[DECODER] seek to {}ms", source_ms);
        self.ictx
            .seek(ts, ..ts)
            .map_err(|e| ExportError::Decode(format!("seek to {}ms: {}", source_ms, e)))?;
        self.decoder.flush();
        self.position_ms = i64::MIN;
        self.last_frame = None;
        self.eof = false;
        Ok(())
    }

    /// Decode forward until a frame at or past `target_ms` is produced.
    fn decode_until(&mut self, target_ms: i64) -> ExportResult<DecodedFrame> {
        let mut decoded = VideoFrame::empty();

        loop {
            // Drain anything the decoder already holds.
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                let pts_ms = decoded
                    .pts()
                    .map(|pts| (pts as f64 * self.time_base * 1000.0) as i64)
                    .unwrap_or(self.position_ms.max(0));
                let frame = self.convert(&decoded, pts_ms)?;
                self.position_ms = pts_ms;
                self.last_frame = Some(frame.clone());
                if pts_ms >= target_ms {
                    return Ok(frame);
                }
            }

            if self.eof {
                // Stream exhausted: hold the final frame.
                return self.last_frame.clone().ok_or_else(|| {
                    ExportError::Decode(format!(
                        "no frame decodable at {}ms (empty stream)",
                        target_ms
                    ))
                });
            }

            // Feed the next packet of our stream.
            let mut sent = false;
            for (stream, packet) in self.ictx.packets() {
                if stream.index() != self.stream_index {
                    continue;
                }
                self.decoder
                    .send_packet(&packet)
                    .map_err(|e| ExportError::Decode(format!("send packet: {}", e)))?;
                sent = true;
                break;
            }
            if !sent {
                self.decoder
                    .send_eof()
                    .map_err(|e| ExportError::Decode(format!("send eof: {}", e)))?;
                self.eof = true;
            }
        }
    }

    /// Scale/convert a decoded frame to tightly packed RGBA.
    fn convert(&mut self, decoded: &VideoFrame, pts_ms: i64) -> ExportResult<DecodedFrame> {
        if self.scaler.is_none() {
            let scaler = scaling::Context::get(
                decoded.format(),
                self.width,
                self.height,
                Pixel::RGBA,
                self.width,
                self.height,
                scaling::Flags::BILINEAR,
            )
            .map_err(|e| ExportError::Decode(format!("create scaler: {}", e)))?;
            self.scaler = Some(scaler);
        }
        let Some(scaler) = self.scaler.as_mut() else {
            return Err(ExportError::Decode("scaler unavailable".to_string()));
        };

        let mut rgba = VideoFrame::empty();
        scaler
            .run(decoded, &mut rgba)
            .map_err(|e| ExportError::Decode(format!("scale frame: {}", e)))?;

        // De-stride into a tightly packed buffer.
        let stride = rgba.stride(0);
        let row_bytes = (self.width * 4) as usize;
        let src = rgba.data(0);
        let mut data = vec![0u8; row_bytes * self.height as usize];
        for row in 0..self.height as usize {
            data[row * row_bytes..(row + 1) * row_bytes]
                .copy_from_slice(&src[row * stride..row * stride + row_bytes]);
        }

        let frame = DecodedFrame::new(
            self.frames_read,
            pts_ms.max(0) as u64,
            data,
            self.width,
            self.height,
        );
        self.frames_read += 1;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_file_is_decode_error() {
        let err = MediaDecoder::open(Path::new("/nonexistent/recording.mp4")).unwrap_err();
        assert!(matches!(err, ExportError::Decode(_)));
        assert!(err.to_string().contains("/nonexistent/recording.mp4"));
    }

    #[test]
    fn test_reseek_threshold_constant_sane() {
        // Sequential playback advances ~16-33ms per frame; the threshold must
        // comfortably exceed that so normal playback never reseeks.
        assert!(RESEEK_DRIFT_MS > 100);
    }
}
