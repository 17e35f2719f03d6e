//! Audio extraction, trim-aware splicing, and AAC re-encoding.
//!
//! The whole source track is decoded into planar f32 buffers at the output
//! rate, trimmed spans are cut out losslessly per channel, and the result is
//! re-encoded to AAC in encoder-sized batches. Audio problems never abort an
//! export: a missing track exports without audio, an undecodable one exports
//! silence.

use std::path::Path;

use ffmpeg_next as ffmpeg;

use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::Sample;
use ffmpeg::media::Type as MediaType;
use ffmpeg::software::resampling;
use ffmpeg::util::frame::audio::Audio as AudioFrame;
use ffmpeg::ChannelLayout;
use ffmpeg::Rational;

use crate::error::{ExportError, ExportResult};
use crate::media::{AudioDecoderConfig, EncodedChunk};
use crate::timeline::TimeMapper;

/// Output sample rate for all exports.
pub const AUDIO_RATE: u32 = 44_100;

/// AAC bitrate.
const AUDIO_BITRATE: usize = 128_000;

/// Fallback AAC frame size when the encoder reports none.
const DEFAULT_FRAME_SIZE: usize = 1024;

/// The finished audio track: encoded chunks plus decoder config.
///
/// Chunk timestamps are microseconds.
pub struct AudioTrack {
    pub chunks: Vec<EncodedChunk>,
    pub config: AudioDecoderConfig,
}

/// Decode, splice, and re-encode the source's audio track.
///
/// Returns `Ok(None)` when the source has no audio stream; decoding failures
/// downgrade to a silent track of the correct duration.
pub fn extract_audio(path: &Path, mapper: &TimeMapper) -> ExportResult<Option<AudioTrack>> {
    ffmpeg::init().map_err(|e| ExportError::Decode(format!("ffmpeg init: {}", e)))?;

    let effective_ms = mapper.effective_duration_ms();
    let effective_samples = (effective_ms as u128 * AUDIO_RATE as u128 / 1000) as usize;

    let mut channels = match decode_source_audio(path) {
        Ok(None) => {
            log::info!("[AUDIO] no audio track in source; exporting without audio");
            return Ok(None);
        }
        Ok(Some(channels)) => channels,
        Err(e) => {
            log::warn!("[AUDIO] decode failed ({}); exporting silence", e);
            let silent_samples =
                (mapper.effective_duration_ms() as u128 * AUDIO_RATE as u128 / 1000) as usize;
            [vec![0.0; silent_samples], vec![0.0; silent_samples]]
        }
    };

    for channel in channels.iter_mut() {
        splice_trims(channel, mapper);
        // Pin the spliced track to the effective duration: pad a short tail
        // with silence, drop rounding overrun.
        channel.resize(effective_samples, 0.0);
    }

    log::debug!(
        "[AUDIO] spliced to {} samples ({}ms effective)",
        channels[0].len(),
        effective_ms
    );

    encode_aac(channels).map(Some)
}

/// Decode the best audio stream into stereo planar f32 at `AUDIO_RATE`.
///
/// Returns `Ok(None)` when the file has no audio stream at all.
fn decode_source_audio(path: &Path) -> ExportResult<Option<[Vec<f32>; 2]>> {
    let mut ictx = ffmpeg::format::input(&path)
        .map_err(|e| ExportError::Decode(format!("open '{}': {}", path.display(), e)))?;

    let Some(stream) = ictx.streams().best(MediaType::Audio) else {
        return Ok(None);
    };
    let stream_index = stream.index();

    let mut decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
        .map_err(|e| ExportError::Decode(format!("audio decoder context: {}", e)))?
        .decoder()
        .audio()
        .map_err(|e| ExportError::Decode(format!("open audio decoder: {}", e)))?;

    let target_format = Sample::F32(SampleType::Planar);
    let mut resampler: Option<resampling::Context> = None;
    let mut left: Vec<f32> = Vec::new();
    let mut right: Vec<f32> = Vec::new();

    let mut push_frame = |frame: &AudioFrame, left: &mut Vec<f32>, right: &mut Vec<f32>| {
        let samples = frame.samples();
        if samples == 0 {
            return;
        }
        left.extend_from_slice(&frame.plane::<f32>(0)[..samples]);
        if frame.planes() > 1 {
            right.extend_from_slice(&frame.plane::<f32>(1)[..samples]);
        } else {
            // Mono: duplicate into both output channels.
            right.extend_from_slice(&frame.plane::<f32>(0)[..samples]);
        }
    };

    let mut resample_and_push = |raw: &AudioFrame,
                                 resampler: &mut Option<resampling::Context>,
                                 left: &mut Vec<f32>,
                                 right: &mut Vec<f32>|
     -> ExportResult<()> {
        let needs_resample = raw.format() != target_format
            || raw.rate() != AUDIO_RATE
            || raw.channels() != 2;
        if !needs_resample {
            push_frame(raw, left, right);
            return Ok(());
        }
        if resampler.is_none() {
            let src_layout = if raw.channels() >= 2 {
                raw.channel_layout()
            } else {
                ChannelLayout::MONO
            };
            let ctx = resampling::Context::get(
                raw.format(),
                src_layout,
                raw.rate(),
                target_format,
                ChannelLayout::STEREO,
                AUDIO_RATE,
            )
            .map_err(|e| ExportError::Decode(format!("audio resampler: {}", e)))?;
            *resampler = Some(ctx);
        }
        let Some(ctx) = resampler.as_mut() else {
            return Err(ExportError::Decode("audio resampler unavailable".to_string()));
        };
        let mut resampled = AudioFrame::empty();
        ctx.run(raw, &mut resampled)
            .map_err(|e| ExportError::Decode(format!("resample: {}", e)))?;
        if resampled.samples() > 0 {
            push_frame(&resampled, left, right);
        }
        Ok(())
    };

    let mut raw = AudioFrame::empty();
    for (stream, packet) in ictx.packets() {
        if stream.index() != stream_index {
            continue;
        }
        // A corrupt packet downgrades to silence via the caller, not a crash.
        decoder
            .send_packet(&packet)
            .map_err(|e| ExportError::Decode(format!("send audio packet: {}", e)))?;
        while decoder.receive_frame(&mut raw).is_ok() {
            resample_and_push(&raw, &mut resampler, &mut left, &mut right)?;
        }
    }

    let _ = decoder.send_eof();
    while decoder.receive_frame(&mut raw).is_ok() {
        resample_and_push(&raw, &mut resampler, &mut left, &mut right)?;
    }

    Ok(Some([left, right]))
}

/// Remove trimmed source spans from one channel, in place.
///
/// Copies every run of samples between successive trims; the survivors
/// concatenate into the effective timeline.
fn splice_trims(samples: &mut Vec<f32>, mapper: &TimeMapper) {
    if mapper.trims().is_empty() {
        return;
    }
    let total = samples.len();
    let to_sample =
        |ms: u64| -> usize { ((ms as u128 * AUDIO_RATE as u128) / 1000).min(total as u128) as usize };

    let mut kept = Vec::with_capacity(total);
    let mut cursor = 0usize;
    for trim in mapper.trims() {
        let start = to_sample(trim.start_ms);
        let end = to_sample(trim.end_ms);
        if start > cursor {
            kept.extend_from_slice(&samples[cursor..start]);
        }
        cursor = cursor.max(end);
    }
    if cursor < total {
        kept.extend_from_slice(&samples[cursor..]);
    }
    *samples = kept;
}

/// Encode planar stereo f32 to AAC in encoder-sized batches.
fn encode_aac(channels: [Vec<f32>; 2]) -> ExportResult<AudioTrack> {
    let codec = ffmpeg::encoder::find_by_name("aac")
        .ok_or_else(|| ExportError::EncoderInit("AAC encoder not found".to_string()))?;

    let ctx = ffmpeg::codec::context::Context::new_with_codec(codec);
    let mut audio = ctx
        .encoder()
        .audio()
        .map_err(|e| ExportError::EncoderInit(format!("aac context: {}", e)))?;

    audio.set_rate(AUDIO_RATE as i32);
    audio.set_channel_layout(ChannelLayout::STEREO);
    audio.set_format(Sample::F32(SampleType::Planar));
    audio.set_bit_rate(AUDIO_BITRATE);
    audio.set_time_base(Rational::new(1, AUDIO_RATE as i32));
    audio.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);

    let mut encoder = audio
        .open_as_with(codec, ffmpeg::Dictionary::new())
        .map_err(|e| ExportError::EncoderInit(format!("open aac: {}", e)))?;

    let frame_size = {
        let reported = encoder.frame_size() as usize;
        if reported == 0 {
            DEFAULT_FRAME_SIZE
        } else {
            reported
        }
    };

    let config = AudioDecoderConfig {
        extradata: unsafe {
            let ctx = encoder.as_ptr();
            if (*ctx).extradata.is_null() || (*ctx).extradata_size <= 0 {
                Vec::new()
            } else {
                std::slice::from_raw_parts((*ctx).extradata, (*ctx).extradata_size as usize)
                    .to_vec()
            }
        },
        sample_rate: AUDIO_RATE,
        channels: 2,
    };

    let [left, right] = channels;
    let total = left.len();
    let mut chunks = Vec::new();
    let mut sample_idx = 0usize;

    let mut drain =
        |encoder: &mut ffmpeg::encoder::audio::Encoder, chunks: &mut Vec<EncodedChunk>| {
            let mut packet_local = ffmpeg::Packet::empty();
            while encoder.receive_packet(&mut packet_local).is_ok() {
                let pts = packet_local.pts().unwrap_or(0);
                // Stream timebase is 1/AUDIO_RATE; chunks carry microseconds.
                let pts_us = pts * 1_000_000 / AUDIO_RATE as i64;
                chunks.push(EncodedChunk {
                    data: packet_local.data().map(|d| d.to_vec()).unwrap_or_default(),
                    pts: pts_us,
                    dts: pts_us,
                    keyframe: true,
                    config: None,
                });
            }
        };

    while sample_idx < total {
        let batch = frame_size.min(total - sample_idx);
        let mut frame = AudioFrame::new(
            Sample::F32(SampleType::Planar),
            frame_size,
            ChannelLayout::STEREO,
        );
        frame.set_rate(AUDIO_RATE);
        frame.set_pts(Some(sample_idx as i64));

        // Zero-pad the final partial frame so AAC always sees a full input.
        {
            let plane = frame.plane_mut::<f32>(0);
            plane[..batch].copy_from_slice(&left[sample_idx..sample_idx + batch]);
            plane[batch..].fill(0.0);
        }
        {
            let plane = frame.plane_mut::<f32>(1);
            plane[..batch].copy_from_slice(&right[sample_idx..sample_idx + batch]);
            plane[batch..].fill(0.0);
        }

        encoder
            .send_frame(&frame)
            .map_err(|e| ExportError::Encode(format!("send audio frame: {}", e)))?;
        drain(&mut encoder, &mut chunks);

        sample_idx += batch;
    }

    encoder
        .send_eof()
        .map_err(|e| ExportError::Encode(format!("audio eof: {}", e)))?;
    drain(&mut encoder, &mut chunks);

    log::debug!(
        "[AUDIO] encoded {} samples into {} AAC chunks",
        total,
        chunks.len()
    );

    Ok(AudioTrack { chunks, config })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::TrimRegion;
    use uuid::Uuid;

    fn trim(start_ms: u64, end_ms: u64) -> TrimRegion {
        TrimRegion {
            id: Uuid::new_v4(),
            start_ms,
            end_ms,
        }
    }

    /// A 1-second ramp at the audio rate: sample i has value i.
    fn ramp(duration_ms: u64) -> Vec<f32> {
        let n = (duration_ms as usize * AUDIO_RATE as usize) / 1000;
        (0..n).map(|i| i as f32).collect()
    }

    #[test]
    fn test_splice_no_trims_is_noop() {
        let mapper = TimeMapper::new(1_000, &[]);
        let mut samples = ramp(1_000);
        let before = samples.len();
        splice_trims(&mut samples, &mapper);
        assert_eq!(samples.len(), before);
    }

    #[test]
    fn test_splice_removes_exactly_the_trimmed_span() {
        // 10s track, trim [2000, 3000): effective 9s of samples.
        let mapper = TimeMapper::new(10_000, &[trim(2_000, 3_000)]);
        let mut samples = ramp(10_000);
        splice_trims(&mut samples, &mapper);

        let expected = (mapper.effective_duration_ms() as usize * AUDIO_RATE as usize) / 1000;
        assert!(
            (samples.len() as i64 - expected as i64).abs() <= 1,
            "spliced length {} should equal effective {} within one sample",
            samples.len(),
            expected
        );

        // The sample right at the cut jumps from the end of the kept run to
        // the start of the post-trim run.
        let cut = (2_000 * AUDIO_RATE as usize) / 1000;
        let resume = (3_000 * AUDIO_RATE as usize) / 1000;
        assert_eq!(samples[cut - 1], (cut - 1) as f32);
        assert_eq!(samples[cut], resume as f32);
    }

    #[test]
    fn test_splice_multiple_trims() {
        let trims = [trim(1_000, 2_000), trim(5_000, 5_500)];
        let mapper = TimeMapper::new(10_000, &trims);
        let mut samples = ramp(10_000);
        splice_trims(&mut samples, &mapper);

        let expected = (mapper.effective_duration_ms() as usize * AUDIO_RATE as usize) / 1000;
        assert!((samples.len() as i64 - expected as i64).abs() <= 1);
    }

    #[test]
    fn test_splice_channels_independent() {
        let mapper = TimeMapper::new(4_000, &[trim(1_000, 2_000)]);
        let mut left = ramp(4_000);
        let mut right: Vec<f32> = ramp(4_000).iter().map(|v| -v).collect();
        splice_trims(&mut left, &mapper);
        splice_trims(&mut right, &mapper);
        assert_eq!(left.len(), right.len());
        for (l, r) in left.iter().zip(right.iter()) {
            assert_eq!(*l, -*r);
        }
    }

    #[test]
    fn test_trim_to_end_leaves_head_only() {
        let mapper = TimeMapper::new(2_000, &[trim(1_000, 2_000)]);
        let mut samples = ramp(2_000);
        splice_trims(&mut samples, &mapper);
        let expected = AUDIO_RATE as usize; // one second
        assert!((samples.len() as i64 - expected as i64).abs() <= 1);
        assert_eq!(samples[0], 0.0);
    }
}
