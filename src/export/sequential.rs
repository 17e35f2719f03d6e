//! Sequential export: one frame loop, one encoder, concurrent audio.
//!
//! The render loop decodes, composites, and hands rendered frames to a
//! dedicated encode thread over a queue whose depth the governor adapts to
//! recent per-frame times. Audio extraction runs on its own thread the whole
//! time; both join before the muxer assembles the file.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{ExportError, ExportResult};
use crate::export::queue::EncodeQueueGovernor;
use crate::export::{report, ExportPhase, JobContext, ProgressFn, VideoRun};
use crate::media::audio::{extract_audio, AudioTrack};
use crate::media::decoder::MediaDecoder;
use crate::media::encoder::VideoEncoder;
use crate::media::gif::GifSink;
use crate::media::muxer::{AudioTrackDesc, Mp4Muxer, VideoTrackDesc};
use crate::media::EncodedChunk;
use crate::render::types::DecodedFrame;
use crate::render::{create_compositor, Compositor, RenderMode};

/// How long the render loop naps when the encode queue is full.
const BACKPRESSURE_NAP: Duration = Duration::from_millis(2);

/// A rendered frame heading to the encode thread.
struct RenderedFrame {
    frame_index: i64,
    rgba: Vec<u8>,
}

/// Decoders for the screen source and the optional camera source.
pub(crate) struct SourceDecoders {
    pub screen: MediaDecoder,
    pub camera: Option<MediaDecoder>,
    last_camera_frame: Option<DecodedFrame>,
}

impl SourceDecoders {
    pub fn open(job: &JobContext) -> ExportResult<Self> {
        let screen = MediaDecoder::open(Path::new(&job.config.source_path))?;

        let camera = if job.scene.camera.is_some() {
            match job.config.camera.video_path.as_deref() {
                Some(path) if Path::new(path).exists() => match MediaDecoder::open(Path::new(path))
                {
                    Ok(decoder) => Some(decoder),
                    Err(e) => {
                        // A broken camera recording degrades the overlay, not
                        // the whole export.
                        log::warn!("[EXPORT] camera source unavailable ({}); skipping overlay", e);
                        None
                    }
                },
                _ => {
                    log::warn!("[EXPORT] camera overlay enabled but no camera video present");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            screen,
            camera,
            last_camera_frame: None,
        })
    }

    /// Camera frame for a source timestamp, holding the last good frame when
    /// the camera stream hiccups or ends early.
    pub fn camera_frame_at(&mut self, source_ms: u64) -> Option<DecodedFrame> {
        let decoder = self.camera.as_mut()?;
        match decoder.frame_at(source_ms) {
            Ok(frame) => {
                self.last_camera_frame = Some(frame.clone());
                Some(frame)
            }
            Err(e) => {
                log::debug!("[EXPORT] camera decode at {}ms failed: {}", source_ms, e);
                self.last_camera_frame.clone()
            }
        }
    }
}

/// Spawn audio extraction for the job's source.
pub(crate) fn spawn_audio(
    job: &JobContext,
) -> std::thread::JoinHandle<ExportResult<Option<AudioTrack>>> {
    let path = job.config.source_path.clone();
    let mapper = job.mapper.clone();
    std::thread::Builder::new()
        .name("reelforge-audio".to_string())
        .spawn(move || extract_audio(Path::new(&path), &mapper))
        .expect("spawn audio thread")
}

/// Export to MP4 with a single render loop.
pub(crate) fn export_mp4(
    job: &JobContext,
    mode: RenderMode,
    progress: &ProgressFn,
) -> ExportResult<VideoRun> {
    let audio_handle = spawn_audio(job);

    let mut decoders = SourceDecoders::open(job)?;
    let mut compositor = create_compositor(mode, Arc::clone(&job.scene))?;
    let encoder = VideoEncoder::new(&job.config.output, job.hardware_encoder.as_deref())?;
    let encoder_name = encoder.name();

    // Encode thread: pulls rendered frames, pushes encoded chunks. The
    // in-flight counter is the adaptive queue bound.
    let in_flight = Arc::new(AtomicUsize::new(0));
    let (frame_tx, frame_rx) = crossbeam_channel::unbounded::<RenderedFrame>();
    let encode_in_flight = Arc::clone(&in_flight);
    let encode_handle = std::thread::Builder::new()
        .name("reelforge-encode".to_string())
        .spawn(move || -> ExportResult<Vec<EncodedChunk>> {
            let mut encoder = encoder;
            let mut chunks = Vec::new();
            while let Ok(frame) = frame_rx.recv() {
                let result = encoder.encode_rgba(&frame.rgba, frame.frame_index);
                encode_in_flight.fetch_sub(1, Ordering::Release);
                chunks.extend(result?);
            }
            // Channel closed: flush whatever the codec still holds so it is
            // never left configured-but-unflushed.
            chunks.extend(encoder.flush()?);
            Ok(chunks)
        })
        .expect("spawn encode thread");

    let mut governor = EncodeQueueGovernor::new(job.config.queue_policy);
    let mut cancelled = false;

    for frame_index in 0..job.total_frames {
        if job.cancelled() {
            cancelled = true;
            break;
        }
        let frame_started = Instant::now();

        let effective_ms = job.effective_ms(frame_index);
        let source_ms = job.mapper.map_effective_to_source(effective_ms);

        let screen = decoders.screen.frame_at(source_ms)?;
        let camera = decoders.camera_frame_at(source_ms);
        let rgba = compositor.compose(&screen, camera.as_ref(), effective_ms)?;

        // Backpressure: wait for a queue slot, staying cancellable.
        while in_flight.load(Ordering::Acquire) >= governor.capacity() {
            if job.cancelled() {
                cancelled = true;
                break;
            }
            std::thread::sleep(BACKPRESSURE_NAP);
        }
        if cancelled {
            break;
        }

        in_flight.fetch_add(1, Ordering::Release);
        let send = frame_tx.send(RenderedFrame {
            frame_index: frame_index as i64,
            rgba,
        });
        if send.is_err() {
            // Encoder bailed; the join below surfaces its actual error.
            break;
        }

        governor.record_frame(frame_started.elapsed());
        report(progress, frame_index + 1, job.total_frames, ExportPhase::Rendering);
    }

    // Submitted work is encoded and flushed even on cancellation, keeping
    // the codec state consistent before teardown.
    drop(frame_tx);
    let chunks = encode_handle
        .join()
        .map_err(|_| ExportError::Encode("encode thread panicked".to_string()))??;

    let audio = audio_handle
        .join()
        .map_err(|_| ExportError::Decode("audio thread panicked".to_string()))??;

    if cancelled {
        log::info!("[EXPORT] sequential loop cancelled; partial output discarded");
        return Ok(VideoRun::Cancelled);
    }

    report(progress, job.total_frames, job.total_frames, ExportPhase::Muxing);
    let bytes = mux_chunks(job, chunks, audio)?;
    Ok(VideoRun::Finished {
        bytes,
        encoder: encoder_name,
    })
}

/// Assemble ordered video and audio chunks into the finished MP4.
pub(crate) fn mux_chunks(
    job: &JobContext,
    chunks: Vec<EncodedChunk>,
    audio: Option<AudioTrack>,
) -> ExportResult<Vec<u8>> {
    let video_config = chunks
        .first()
        .and_then(|chunk| chunk.config.clone())
        .ok_or_else(|| ExportError::Mux("no video chunks were produced".to_string()))?;

    let mut muxer = Mp4Muxer::new();
    muxer.initialize(
        VideoTrackDesc {
            config: video_config,
            fps: job.fps,
        },
        audio.as_ref().map(|track| AudioTrackDesc {
            config: track.config.clone(),
        }),
    )?;

    for chunk in &chunks {
        muxer.write_video_chunk(chunk)?;
    }
    if let Some(track) = &audio {
        for chunk in &track.chunks {
            muxer.write_audio_chunk(chunk)?;
        }
    }
    muxer.finalize()
}

/// Export to animated GIF: the same loop, no audio, no H.264.
pub(crate) fn export_gif(
    job: &JobContext,
    mode: RenderMode,
    progress: &ProgressFn,
) -> ExportResult<VideoRun> {
    let mut decoders = SourceDecoders::open(job)?;
    let mut compositor = create_compositor(mode, Arc::clone(&job.scene))?;
    let mut sink = GifSink::new(job.fps)?;

    for frame_index in 0..job.total_frames {
        if job.cancelled() {
            log::info!("[EXPORT] gif export cancelled");
            return Ok(VideoRun::Cancelled);
        }
        let effective_ms = job.effective_ms(frame_index);
        let source_ms = job.mapper.map_effective_to_source(effective_ms);

        let screen = decoders.screen.frame_at(source_ms)?;
        let camera = decoders.camera_frame_at(source_ms);
        let rgba = compositor.compose(&screen, camera.as_ref(), effective_ms)?;

        sink.push_frame(rgba, job.scene.out_w, job.scene.out_h)?;
        report(progress, frame_index + 1, job.total_frames, ExportPhase::Rendering);
    }

    report(progress, job.total_frames, job.total_frames, ExportPhase::Muxing);
    let bytes = sink.finish()?;
    Ok(VideoRun::Finished {
        bytes,
        encoder: "gif",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mux_chunks_requires_leading_config() {
        use crate::project::tests_support::minimal_config;
        use crate::render::Scene;
        use crate::timeline::TimeMapper;
        use std::sync::atomic::AtomicBool;

        let config = minimal_config();
        let job = JobContext {
            mapper: TimeMapper::new(config.source_duration_ms, &[]),
            scene: Arc::new(Scene::build(&config).unwrap()),
            total_frames: 10,
            fps: 30,
            cancel: Arc::new(AtomicBool::new(false)),
            hardware_encoder: None,
            config,
        };
        // No chunks at all -> mux error, not a panic.
        let err = mux_chunks(&job, Vec::new(), None).unwrap_err();
        assert!(matches!(err, ExportError::Mux(_)));
    }
}
