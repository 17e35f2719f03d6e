//! MP4 container muxing.
//!
//! The muxer accepts ordered encoded chunks per stream and produces one
//! finished MP4 buffer. Video and audio arrive fully asynchronously (audio is
//! usually complete before the last video chunk lands); only each stream's
//! internal order matters. `initialize` and `finalize` are single-shot and
//! misuse is a hard error, not a silent no-op.

use std::path::PathBuf;

use ffmpeg_next as ffmpeg;
use ffmpeg::Rational;
use uuid::Uuid;

use crate::error::{ExportError, ExportResult};
use crate::media::{AudioDecoderConfig, EncodedChunk, VideoDecoderConfig};

/// Microsecond timebase audio chunks are stamped in.
const MICROS_TB: Rational = Rational(1, 1_000_000);

/// Video track description for `initialize`.
pub struct VideoTrackDesc {
    pub config: VideoDecoderConfig,
    pub fps: u32,
}

/// Audio track description for `initialize`.
pub struct AudioTrackDesc {
    pub config: AudioDecoderConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MuxerState {
    Created,
    Initialized,
    Finalized,
}

/// Writes ordered encoded chunks into an MP4 file and returns its bytes.
pub struct Mp4Muxer {
    path: PathBuf,
    octx: Option<ffmpeg::format::context::Output>,
    state: MuxerState,
    video_tb: Rational,
    video_chunks: u64,
    audio_chunks: u64,
    has_audio: bool,
}

impl Mp4Muxer {
    /// Create a muxer backed by a scratch file in the system temp directory.
    pub fn new() -> Self {
        let path = std::env::temp_dir().join(format!("reelforge-{}.mp4", Uuid::new_v4()));
        Self {
            path,
            octx: None,
            state: MuxerState::Created,
            video_tb: Rational(1, 30),
            video_chunks: 0,
            audio_chunks: 0,
            has_audio: false,
        }
    }

    /// Create the output streams and write the container header.
    pub fn initialize(
        &mut self,
        video: VideoTrackDesc,
        audio: Option<AudioTrackDesc>,
    ) -> ExportResult<()> {
        if self.state != MuxerState::Created {
            return Err(ExportError::Mux(format!(
                "initialize called in state {:?}",
                self.state
            )));
        }

        ffmpeg::init().map_err(|e| ExportError::Mux(format!("ffmpeg init: {}", e)))?;

        let mut octx = ffmpeg::format::output(&self.path)
            .map_err(|e| ExportError::Mux(format!("create output: {}", e)))?;

        let fps = video.fps.max(1);
        self.video_tb = Rational(1, fps as i32);

        // Stream 0: H.264 video.
        {
            let h264 = ffmpeg::encoder::find(ffmpeg::codec::Id::H264)
                .ok_or_else(|| ExportError::Mux("H.264 codec not registered".to_string()))?;
            let mut stream = octx
                .add_stream(h264)
                .map_err(|e| ExportError::Mux(format!("add video stream: {}", e)))?;
            stream.set_time_base(self.video_tb);
            unsafe {
                write_video_codecpar(&mut stream, &video.config);
            }
        }

        // Stream 1: AAC audio, when present.
        if let Some(audio) = &audio {
            let aac = ffmpeg::encoder::find(ffmpeg::codec::Id::AAC)
                .ok_or_else(|| ExportError::Mux("AAC codec not registered".to_string()))?;
            let mut stream = octx
                .add_stream(aac)
                .map_err(|e| ExportError::Mux(format!("add audio stream: {}", e)))?;
            stream.set_time_base(Rational(1, audio.config.sample_rate as i32));
            unsafe {
                write_audio_codecpar(&mut stream, &audio.config);
            }
            self.has_audio = true;
        }

        octx.write_header()
            .map_err(|e| ExportError::Mux(format!("write header: {}", e)))?;

        log::debug!(
            "[MUXER] initialized: video {}x{} @ {}fps, audio={}",
            video.config.width,
            video.config.height,
            fps,
            self.has_audio
        );

        self.octx = Some(octx);
        self.state = MuxerState::Initialized;
        Ok(())
    }

    /// Append the next video chunk, in stream order.
    ///
    /// The first chunk must carry the decoder config (the wire contract with
    /// the encoders); it must also match what `initialize` declared.
    pub fn write_video_chunk(&mut self, chunk: &EncodedChunk) -> ExportResult<()> {
        if self.state != MuxerState::Initialized {
            return Err(ExportError::Mux(format!(
                "video chunk in state {:?}",
                self.state
            )));
        }
        if self.video_chunks == 0 && chunk.config.is_none() {
            return Err(ExportError::Mux(
                "first video chunk must carry decoder config".to_string(),
            ));
        }

        let octx = self.octx.as_mut().expect("initialized muxer has output");
        let stream_tb = octx
            .stream(0)
            .map(|s| s.time_base())
            .unwrap_or(self.video_tb);

        let mut packet = ffmpeg::Packet::copy(&chunk.data);
        packet.set_stream(0);
        packet.set_pts(Some(chunk.pts));
        packet.set_dts(Some(chunk.dts));
        packet.set_duration(1);
        if chunk.keyframe {
            packet.set_flags(ffmpeg::packet::Flags::KEY);
        }
        packet.rescale_ts(self.video_tb, stream_tb);
        packet
            .write_interleaved(octx)
            .map_err(|e| ExportError::Mux(format!("write video chunk: {}", e)))?;

        self.video_chunks += 1;
        Ok(())
    }

    /// Append the next audio chunk (timestamps in microseconds), in order.
    pub fn write_audio_chunk(&mut self, chunk: &EncodedChunk) -> ExportResult<()> {
        if self.state != MuxerState::Initialized {
            return Err(ExportError::Mux(format!(
                "audio chunk in state {:?}",
                self.state
            )));
        }
        if !self.has_audio {
            return Err(ExportError::Mux(
                "audio chunk written but no audio track was initialized".to_string(),
            ));
        }

        let octx = self.octx.as_mut().expect("initialized muxer has output");
        let stream_tb = octx
            .stream(1)
            .map(|s| s.time_base())
            .unwrap_or(MICROS_TB);

        let mut packet = ffmpeg::Packet::copy(&chunk.data);
        packet.set_stream(1);
        packet.set_pts(Some(chunk.pts));
        packet.set_dts(Some(chunk.dts));
        packet.set_flags(ffmpeg::packet::Flags::KEY);
        packet.rescale_ts(MICROS_TB, stream_tb);
        packet
            .write_interleaved(octx)
            .map_err(|e| ExportError::Mux(format!("write audio chunk: {}", e)))?;

        self.audio_chunks += 1;
        Ok(())
    }

    /// Write the trailer and return the finished MP4. Single-shot.
    pub fn finalize(&mut self) -> ExportResult<Vec<u8>> {
        match self.state {
            MuxerState::Created => {
                return Err(ExportError::Mux(
                    "finalize called before initialize".to_string(),
                ))
            }
            MuxerState::Finalized => {
                return Err(ExportError::Mux("finalize called twice".to_string()))
            }
            MuxerState::Initialized => {}
        }

        let mut octx = self.octx.take().expect("initialized muxer has output");
        octx.write_trailer()
            .map_err(|e| ExportError::Mux(format!("write trailer: {}", e)))?;
        drop(octx);
        self.state = MuxerState::Finalized;

        let bytes = std::fs::read(&self.path)?;
        let _ = std::fs::remove_file(&self.path);

        log::info!(
            "[MUXER] finalized: {} video + {} audio chunks, {} bytes",
            self.video_chunks,
            self.audio_chunks,
            bytes.len()
        );
        Ok(bytes)
    }
}

impl Default for Mp4Muxer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Mp4Muxer {
    fn drop(&mut self) {
        // Abandoned exports must not leak scratch files.
        if self.state != MuxerState::Finalized {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Fill a stream's codec parameters for H.264 video.
///
/// The bindings expose no safe setters for codecpar, so the fields are
/// written directly, the same way the parameter-copy helpers do internally.
unsafe fn write_video_codecpar(
    stream: &mut ffmpeg::format::stream::StreamMut,
    config: &VideoDecoderConfig,
) {
    let par = (*stream.as_mut_ptr()).codecpar;
    (*par).codec_type = ffmpeg::ffi::AVMediaType::AVMEDIA_TYPE_VIDEO;
    (*par).codec_id = ffmpeg::ffi::AVCodecID::AV_CODEC_ID_H264;
    (*par).width = config.width as i32;
    (*par).height = config.height as i32;
    (*par).format = ffmpeg::ffi::AVPixelFormat::AV_PIX_FMT_YUV420P as i32;
    write_extradata(par, &config.extradata);
}

/// Fill a stream's codec parameters for AAC audio.
unsafe fn write_audio_codecpar(
    stream: &mut ffmpeg::format::stream::StreamMut,
    config: &AudioDecoderConfig,
) {
    let par = (*stream.as_mut_ptr()).codecpar;
    (*par).codec_type = ffmpeg::ffi::AVMediaType::AVMEDIA_TYPE_AUDIO;
    (*par).codec_id = ffmpeg::ffi::AVCodecID::AV_CODEC_ID_AAC;
    (*par).sample_rate = config.sample_rate as i32;
    (*par).format = ffmpeg::ffi::AVSampleFormat::AV_SAMPLE_FMT_FLTP as i32;
    ffmpeg::ffi::av_channel_layout_default(&mut (*par).ch_layout, config.channels as i32);
    write_extradata(par, &config.extradata);
}

/// Copy extradata into libavcodec-owned, padded memory.
unsafe fn write_extradata(par: *mut ffmpeg::ffi::AVCodecParameters, extradata: &[u8]) {
    if extradata.is_empty() {
        return;
    }
    let padded = extradata.len() + ffmpeg::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize;
    let buf = ffmpeg::ffi::av_mallocz(padded) as *mut u8;
    if buf.is_null() {
        return;
    }
    std::ptr::copy_nonoverlapping(extradata.as_ptr(), buf, extradata.len());
    (*par).extradata = buf;
    (*par).extradata_size = extradata.len() as i32;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(pts: i64, keyframe: bool, config: Option<VideoDecoderConfig>) -> EncodedChunk {
        EncodedChunk {
            data: vec![0u8; 16],
            pts,
            dts: pts,
            keyframe,
            config,
        }
    }

    #[test]
    fn test_chunk_before_initialize_is_an_error() {
        let mut muxer = Mp4Muxer::new();
        let err = muxer.write_video_chunk(&chunk(0, true, None)).unwrap_err();
        assert!(err.to_string().contains("Created"));
    }

    #[test]
    fn test_finalize_before_initialize_is_an_error() {
        let mut muxer = Mp4Muxer::new();
        let err = muxer.finalize().unwrap_err();
        assert!(err.to_string().contains("before initialize"));
    }

    #[test]
    fn test_initialize_twice_is_an_error() {
        let mut muxer = Mp4Muxer::new();
        let desc = || VideoTrackDesc {
            config: VideoDecoderConfig {
                // Minimal plausible avcC so the mov muxer accepts the track.
                extradata: vec![
                    0x01, 0x42, 0xc0, 0x1e, 0xff, 0xe1, 0x00, 0x02, 0x67, 0x42, 0x01, 0x00,
                    0x01, 0x68,
                ],
                width: 128,
                height: 72,
            },
            fps: 30,
        };
        if muxer.initialize(desc(), None).is_err() {
            eprintln!("[SKIP] mp4 muxer unavailable in this environment");
            return;
        }
        let err = muxer.initialize(desc(), None).unwrap_err();
        assert!(err.to_string().contains("Initialized"));
    }

    #[test]
    fn test_first_chunk_requires_decoder_config() {
        let mut muxer = Mp4Muxer::new();
        let desc = VideoTrackDesc {
            config: VideoDecoderConfig {
                extradata: vec![
                    0x01, 0x42, 0xc0, 0x1e, 0xff, 0xe1, 0x00, 0x02, 0x67, 0x42, 0x01, 0x00,
                    0x01, 0x68,
                ],
                width: 128,
                height: 72,
            },
            fps: 30,
        };
        if muxer.initialize(desc, None).is_err() {
            eprintln!("[SKIP] mp4 muxer unavailable in this environment");
            return;
        }
        let err = muxer.write_video_chunk(&chunk(0, true, None)).unwrap_err();
        assert!(err.to_string().contains("decoder config"));
    }

    #[test]
    fn test_audio_chunk_without_audio_track_is_an_error() {
        let mut muxer = Mp4Muxer::new();
        let desc = VideoTrackDesc {
            config: VideoDecoderConfig {
                extradata: vec![
                    0x01, 0x42, 0xc0, 0x1e, 0xff, 0xe1, 0x00, 0x02, 0x67, 0x42, 0x01, 0x00,
                    0x01, 0x68,
                ],
                width: 128,
                height: 72,
            },
            fps: 30,
        };
        if muxer.initialize(desc, None).is_err() {
            eprintln!("[SKIP] mp4 muxer unavailable in this environment");
            return;
        }
        let err = muxer.write_audio_chunk(&chunk(0, true, None)).unwrap_err();
        assert!(err.to_string().contains("no audio track"));
    }
}
