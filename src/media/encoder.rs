//! H.264 video encoding with hardware fallback.
//!
//! Each encoder instance owns one FFmpeg codec context plus the RGBA -> YUV
//! conversion chain feeding it. Hardware encoders (NVENC, VideoToolbox, QSV)
//! are tried first when requested; libx264 is the fallback, and only when
//! both fail does encoder setup become a fatal error.
//!
//! B-frames are disabled so dts always equals pts; parallel segments can then
//! be concatenated by rebasing timestamps without dts reordering.

use ffmpeg_next as ffmpeg;

use ffmpeg::format::Pixel;
use ffmpeg::software::scaling;
use ffmpeg::util::frame::video::Video as VideoFrame;
use ffmpeg::Rational;

use crate::error::{ExportError, ExportResult};
use crate::media::{EncodedChunk, VideoDecoderConfig};
use crate::project::OutputSettings;

/// Software fallback encoder.
const SOFTWARE_ENCODER: &str = "libx264";

/// Map quality (0-100) to x264 CRF. 100 -> 15 (best), 0 -> 35.
pub fn quality_to_crf(quality: u32) -> u8 {
    (35u8.saturating_sub(((quality as f32 / 100.0) * 20.0) as u8)).clamp(15, 35)
}

/// Map quality (0-100) to NVENC CQ. 100 -> 15, 0 -> 40.
pub fn quality_to_cq(quality: u32) -> u8 {
    let cq = 40.0 - (quality as f32 / 100.0) * 25.0;
    (cq as u8).clamp(15, 40)
}

/// NVENC preset ladder (p1 fastest .. p7 best).
pub fn nvenc_preset(quality: u32) -> &'static str {
    match quality {
        0..=25 => "p1",
        26..=50 => "p3",
        51..=75 => "p4",
        76..=90 => "p5",
        _ => "p7",
    }
}

/// An opened H.264 encoder bound to fixed output dimensions.
pub struct VideoEncoder {
    encoder: ffmpeg::encoder::video::Encoder,
    scaler: scaling::Context,
    width: u32,
    height: u32,
    config: VideoDecoderConfig,
    config_pending: bool,
    encoder_name: &'static str,
}

impl VideoEncoder {
    /// Open the preferred hardware encoder, falling back to software.
    ///
    /// `hardware` names the probed hardware codec, if any.
    pub fn new(settings: &OutputSettings, hardware: Option<&str>) -> ExportResult<Self> {
        ffmpeg::init().map_err(|e| ExportError::EncoderInit(format!("ffmpeg init: {}", e)))?;

        if settings.prefer_hardware_encode {
            if let Some(name) = hardware {
                match Self::open_named(settings, name) {
                    Ok(encoder) => return Ok(encoder),
                    Err(e) => {
                        log::warn!(
                            "[ENCODER] {} failed ({}); falling back to {}",
                            name,
                            e,
                            SOFTWARE_ENCODER
                        );
                    }
                }
            }
        }

        Self::open_named(settings, SOFTWARE_ENCODER)
    }

    fn open_named(settings: &OutputSettings, name: &str) -> ExportResult<Self> {
        let codec = ffmpeg::encoder::find_by_name(name)
            .ok_or_else(|| ExportError::EncoderInit(format!("encoder '{}' not found", name)))?;

        let ctx = ffmpeg::codec::context::Context::new_with_codec(codec);
        let mut video = ctx
            .encoder()
            .video()
            .map_err(|e| ExportError::EncoderInit(format!("{}: context: {}", name, e)))?;

        let fps = settings.fps.max(1);
        let gop = ((settings.keyframe_interval_s.max(0.25)) * fps as f32).round() as u32;

        video.set_width(settings.width);
        video.set_height(settings.height);
        video.set_format(Pixel::YUV420P);
        video.set_time_base(Rational::new(1, fps as i32));
        video.set_frame_rate(Some(Rational::new(fps as i32, 1)));
        video.set_gop(gop.max(1));
        video.set_max_b_frames(0);
        // MP4 wants codec config in the container, not inline in the stream.
        video.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        if settings.bitrate > 0 {
            video.set_bit_rate(settings.bitrate as usize);
        }

        let mut opts = ffmpeg::Dictionary::new();
        match name {
            "h264_nvenc" => {
                opts.set("preset", nvenc_preset(settings.quality));
                opts.set("cq", &quality_to_cq(settings.quality).to_string());
            }
            SOFTWARE_ENCODER => {
                opts.set("crf", &quality_to_crf(settings.quality).to_string());
                opts.set("preset", "superfast");
            }
            _ => {}
        }

        let encoder = video
            .open_with(opts)
            .map_err(|e| ExportError::EncoderInit(format!("open {}: {}", name, e)))?;

        let extradata = extract_extradata(&encoder);
        if extradata.is_empty() {
            log::warn!("[ENCODER] {} produced no global extradata", name);
        }

        let scaler = scaling::Context::get(
            Pixel::RGBA,
            settings.width,
            settings.height,
            Pixel::YUV420P,
            settings.width,
            settings.height,
            scaling::Flags::BILINEAR,
        )
        .map_err(|e| ExportError::EncoderInit(format!("rgba->yuv scaler: {}", e)))?;

        log::info!(
            "[ENCODER] {} ready: {}x{} @ {}fps, gop={}",
            name,
            settings.width,
            settings.height,
            fps,
            gop
        );

        let leaked: &'static str = match name {
            "h264_nvenc" => "h264_nvenc",
            "h264_videotoolbox" => "h264_videotoolbox",
            "h264_qsv" => "h264_qsv",
            _ => SOFTWARE_ENCODER,
        };

        Ok(Self {
            encoder,
            scaler,
            width: settings.width,
            height: settings.height,
            config: VideoDecoderConfig {
                extradata,
                width: settings.width,
                height: settings.height,
            },
            config_pending: true,
            encoder_name: leaked,
        })
    }

    pub fn name(&self) -> &'static str {
        self.encoder_name
    }

    pub fn decoder_config(&self) -> &VideoDecoderConfig {
        &self.config
    }

    /// Encode one RGBA frame stamped with its output frame index.
    pub fn encode_rgba(&mut self, rgba: &[u8], frame_index: i64) -> ExportResult<Vec<EncodedChunk>> {
        let expected = (self.width * self.height * 4) as usize;
        if rgba.len() != expected {
            return Err(ExportError::Encode(format!(
                "frame buffer is {} bytes, expected {}",
                rgba.len(),
                expected
            )));
        }

        let mut input = VideoFrame::new(Pixel::RGBA, self.width, self.height);
        let stride = input.stride(0);
        let row_bytes = (self.width * 4) as usize;
        {
            let data = input.data_mut(0);
            for row in 0..self.height as usize {
                data[row * stride..row * stride + row_bytes]
                    .copy_from_slice(&rgba[row * row_bytes..(row + 1) * row_bytes]);
            }
        }

        let mut yuv = VideoFrame::empty();
        self.scaler
            .run(&input, &mut yuv)
            .map_err(|e| ExportError::Encode(format!("rgba->yuv: {}", e)))?;
        yuv.set_pts(Some(frame_index));

        self.encoder
            .send_frame(&yuv)
            .map_err(|e| ExportError::Encode(format!("send frame {}: {}", frame_index, e)))?;

        Ok(self.drain())
    }

    /// Flush the codec and return everything it was still holding.
    pub fn flush(&mut self) -> ExportResult<Vec<EncodedChunk>> {
        self.encoder
            .send_eof()
            .map_err(|e| ExportError::Encode(format!("send eof: {}", e)))?;
        Ok(self.drain())
    }

    fn drain(&mut self) -> Vec<EncodedChunk> {
        let mut chunks = Vec::new();
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            let pts = packet.pts().unwrap_or(0);
            let config = if self.config_pending {
                self.config_pending = false;
                Some(self.config.clone())
            } else {
                None
            };
            chunks.push(EncodedChunk {
                data: packet.data().map(|d| d.to_vec()).unwrap_or_default(),
                pts,
                dts: packet.dts().unwrap_or(pts),
                keyframe: packet.is_key(),
                config,
            });
        }
        chunks
    }
}

/// Copy the codec's global extradata (avcC / SPS+PPS) out of the context.
///
/// No safe accessor exists for extradata in these bindings, so this reads
/// the raw AVCodecContext the same way the parameter-copy helpers do.
fn extract_extradata(encoder: &ffmpeg::encoder::video::Encoder) -> Vec<u8> {
    unsafe {
        let ctx = encoder.as_ptr();
        let size = (*ctx).extradata_size;
        if size <= 0 || (*ctx).extradata.is_null() {
            return Vec::new();
        }
        std::slice::from_raw_parts((*ctx).extradata, size as usize).to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_to_crf_range() {
        assert_eq!(quality_to_crf(100), 15);
        assert_eq!(quality_to_crf(0), 35);
        let mid = quality_to_crf(50);
        assert!(mid > 15 && mid < 35);
    }

    #[test]
    fn test_quality_to_cq_range() {
        assert_eq!(quality_to_cq(100), 15);
        assert_eq!(quality_to_cq(0), 40);
    }

    #[test]
    fn test_nvenc_preset_ladder() {
        assert_eq!(nvenc_preset(100), "p7");
        assert_eq!(nvenc_preset(60), "p4");
        assert_eq!(nvenc_preset(0), "p1");
    }

    #[test]
    fn test_software_encoder_roundtrip() {
        let settings = OutputSettings {
            width: 128,
            height: 72,
            fps: 30,
            prefer_hardware_encode: false,
            ..OutputSettings::default()
        };
        let mut encoder = match VideoEncoder::new(&settings, None) {
            Ok(encoder) => encoder,
            Err(e) => {
                // Environments without libx264 can't run this test.
                eprintln!("[SKIP] no software encoder: {}", e);
                return;
            }
        };
        assert_eq!(encoder.name(), SOFTWARE_ENCODER);

        let frame = vec![128u8; 128 * 72 * 4];
        let mut chunks = Vec::new();
        for i in 0..10 {
            chunks.extend(encoder.encode_rgba(&frame, i).unwrap());
        }
        chunks.extend(encoder.flush().unwrap());

        assert_eq!(chunks.len(), 10, "10 frames in, 10 chunks out");
        // First chunk carries the decoder config and is a keyframe.
        assert!(chunks[0].config.is_some());
        assert!(chunks[0].keyframe);
        assert!(chunks[1..].iter().all(|c| c.config.is_none()));
        // No B-frames: pts monotonic and equal to dts.
        for pair in chunks.windows(2) {
            assert!(pair[1].pts > pair[0].pts);
        }
        assert!(chunks.iter().all(|c| c.pts == c.dts));
    }

    #[test]
    fn test_wrong_buffer_size_rejected() {
        let settings = OutputSettings {
            width: 128,
            height: 72,
            fps: 30,
            prefer_hardware_encode: false,
            ..OutputSettings::default()
        };
        let Ok(mut encoder) = VideoEncoder::new(&settings, None) else {
            eprintln!("[SKIP] no software encoder");
            return;
        };
        let err = encoder.encode_rgba(&[0u8; 16], 0).unwrap_err();
        assert!(matches!(err, ExportError::Encode(_)));
    }
}
