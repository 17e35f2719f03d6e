//! Media I/O: decoding, encoding, audio, and container muxing.
//!
//! Everything here rides on the native FFmpeg bindings. Encoded output moves
//! between stages as `EncodedChunk`s so encoders (which may live on worker
//! threads) stay decoupled from the muxer (which lives on the export thread).

pub mod audio;
pub mod decoder;
pub mod encoder;
pub mod gif;
pub mod muxer;

/// Codec initialization data a decoder needs to play a stream.
///
/// For H.264 in MP4 this is the avcC record; for AAC the AudioSpecificConfig.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoDecoderConfig {
    pub extradata: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decoder configuration for the audio track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDecoderConfig {
    pub extradata: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u32,
}

/// One encoded packet plus the metadata the muxer needs.
///
/// Video timestamps count output frames (timebase 1/fps); audio timestamps
/// are microseconds. The first chunk of a video stream must carry the
/// decoder config.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    pub data: Vec<u8>,
    pub pts: i64,
    pub dts: i64,
    pub keyframe: bool,
    pub config: Option<VideoDecoderConfig>,
}
