//! Parallel / hybrid export: segment slots on OS threads.
//!
//! The frame range is partitioned into ordered segments. A fixed pool of
//! slots (each owning an exclusive decoder, compositor, and encoder chain)
//! pulls segments from a shared queue until it runs dry. Completed segments
//! deposit their chunk lists keyed by segment id; after all slots join, the
//! chunks are concatenated strictly in ascending segment id order — that
//! reordering step is the correctness-critical invariant here.
//!
//! Hybrid is the same machinery with GPU compositors in every slot plus a
//! single best-effort retry of a frame's capture-and-render on transient
//! error.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ExportError, ExportResult};
use crate::export::segments::{plan_segments, Segment, SegmentStatus};
use crate::export::sequential::{mux_chunks, SourceDecoders};
use crate::export::{report, ExportPhase, JobContext, ProgressFn, VideoRun};
use crate::media::encoder::VideoEncoder;
use crate::media::EncodedChunk;
use crate::render::{create_compositor, Compositor, RenderMode};
use crate::strategy::StrategyPlan;

/// One segment's completed output.
struct SegmentResult {
    segment_id: usize,
    chunks: Vec<EncodedChunk>,
}

/// Export to MP4 across concurrent segment slots.
pub(crate) fn export_mp4(
    job: &JobContext,
    mode: RenderMode,
    plan: &StrategyPlan,
    progress: &ProgressFn,
) -> ExportResult<VideoRun> {
    let segments = plan_segments(job.total_frames, job.fps, plan.segment_target_s);
    if segments.is_empty() {
        return Err(ExportError::InvalidConfig("nothing to export".to_string()));
    }
    let slot_count = plan.max_concurrency.max(2).min(segments.len());

    log::info!(
        "[EXPORT] parallel: {} frames in {} segments across {} slots ({:?} rendering)",
        job.total_frames,
        segments.len(),
        slot_count,
        mode
    );

    let audio_handle = super::sequential::spawn_audio(job);

    // Shared state between slots: the pull queue, the result map, the abort
    // flag, and the progress counter. Nothing else crosses threads.
    let work_queue: Arc<Mutex<VecDeque<Segment>>> =
        Arc::new(Mutex::new(segments.iter().cloned().collect()));
    let results: Arc<Mutex<BTreeMap<usize, SegmentResult>>> = Arc::new(Mutex::new(BTreeMap::new()));
    let failures: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let abort = Arc::new(AtomicBool::new(false));
    let frames_done = Arc::new(AtomicU64::new(0));

    std::thread::scope(|scope| {
        for slot_id in 0..slot_count {
            let work_queue = Arc::clone(&work_queue);
            let results = Arc::clone(&results);
            let failures = Arc::clone(&failures);
            let abort = Arc::clone(&abort);
            let frames_done = Arc::clone(&frames_done);
            let progress = Arc::clone(progress);

            scope.spawn(move || {
                slot_main(
                    job,
                    mode,
                    slot_id,
                    &work_queue,
                    &results,
                    &failures,
                    &abort,
                    &frames_done,
                    &progress,
                );
            });
        }
    });

    // Slots have joined. Audio next, then reassembly.
    let audio = audio_handle
        .join()
        .map_err(|_| ExportError::Decode("audio thread panicked".to_string()))??;

    if job.cancelled() {
        log::info!("[EXPORT] parallel export cancelled; partial segments discarded");
        return Ok(VideoRun::Cancelled);
    }

    let failures = failures.lock();
    if !failures.is_empty() {
        return Err(ExportError::SegmentsFailed {
            details: failures.join("; "),
        });
    }
    drop(failures);

    let results = std::mem::take(&mut *results.lock());
    let encoder_name = if mode == RenderMode::Gpu { "hybrid" } else { "parallel" };

    // Reassembly: ascending segment id regardless of completion order, with
    // per-segment timestamps rebased onto the global frame axis.
    let mut ordered = Vec::with_capacity(job.total_frames as usize);
    for (segment_id, segment) in segments.iter().enumerate() {
        let Some(result) = results.get(&segment_id) else {
            return Err(ExportError::SegmentsFailed {
                details: format!("segment {} produced no output", segment_id),
            });
        };
        debug_assert_eq!(result.segment_id, segment_id);
        let base = segment.start_frame as i64;
        for chunk in &result.chunks {
            let mut chunk = chunk.clone();
            chunk.pts += base;
            chunk.dts += base;
            // Only the stream's very first chunk announces the decoder
            // config; later segments repeat it redundantly.
            if segment_id != 0 {
                chunk.config = None;
            }
            ordered.push(chunk);
        }
    }

    if ordered.len() as u64 != job.total_frames {
        return Err(ExportError::SegmentsFailed {
            details: format!(
                "reassembly produced {} chunks for {} frames",
                ordered.len(),
                job.total_frames
            ),
        });
    }

    report(progress, job.total_frames, job.total_frames, ExportPhase::Muxing);
    let bytes = mux_chunks(job, ordered, audio)?;
    Ok(VideoRun::Finished {
        bytes,
        encoder: encoder_name,
    })
}

/// Slot body: pull segments until the queue is dry or the export aborts.
#[allow(clippy::too_many_arguments)]
fn slot_main(
    job: &JobContext,
    mode: RenderMode,
    slot_id: usize,
    work_queue: &Mutex<VecDeque<Segment>>,
    results: &Mutex<BTreeMap<usize, SegmentResult>>,
    failures: &Mutex<Vec<String>>,
    abort: &AtomicBool,
    frames_done: &AtomicU64,
    progress: &ProgressFn,
) {
    // Slot-owned instances, reused across this slot's segments.
    let mut decoders = match SourceDecoders::open(job) {
        Ok(decoders) => decoders,
        Err(e) => {
            failures.lock().push(format!("slot {}: {}", slot_id, e));
            abort.store(true, Ordering::Release);
            return;
        }
    };
    let mut compositor = match create_compositor(mode, Arc::clone(&job.scene)) {
        Ok(compositor) => compositor,
        Err(e) => {
            failures.lock().push(format!("slot {}: {}", slot_id, e));
            abort.store(true, Ordering::Release);
            return;
        }
    };

    loop {
        if abort.load(Ordering::Acquire) || job.cancelled() {
            return;
        }
        let Some(mut segment) = work_queue.lock().pop_front() else {
            return;
        };
        segment.status = SegmentStatus::Processing;
        log::debug!(
            "[EXPORT] slot {} -> segment {} (frames {}..{})",
            slot_id,
            segment.id,
            segment.start_frame,
            segment.end_frame
        );

        match process_segment(
            job,
            mode,
            &segment,
            &mut decoders,
            &mut compositor,
            abort,
            frames_done,
            progress,
        ) {
            Ok(Some(chunks)) => {
                segment.status = SegmentStatus::Completed;
                results.lock().insert(
                    segment.id,
                    SegmentResult {
                        segment_id: segment.id,
                        chunks,
                    },
                );
            }
            Ok(None) => {
                // Cancelled or aborted mid-segment; nothing to record.
                return;
            }
            Err(e) => {
                segment.status = SegmentStatus::Failed;
                log::error!("[EXPORT] segment {} failed: {}", segment.id, e);
                failures
                    .lock()
                    .push(format!("segment {}: {}", segment.id, e));
                abort.store(true, Ordering::Release);
                return;
            }
        }
    }
}

/// Run one segment through the sequential inner loop.
///
/// Returns `Ok(None)` when cancellation/abort interrupted the segment.
#[allow(clippy::too_many_arguments)]
fn process_segment(
    job: &JobContext,
    mode: RenderMode,
    segment: &Segment,
    decoders: &mut SourceDecoders,
    compositor: &mut Box<dyn Compositor>,
    abort: &AtomicBool,
    frames_done: &AtomicU64,
    progress: &ProgressFn,
) -> ExportResult<Option<Vec<EncodedChunk>>> {
    // Fresh encoder per segment: each segment is an independent closed
    // stream whose chunks get rebased at reassembly.
    let mut encoder = VideoEncoder::new(&job.config.output, job.hardware_encoder.as_deref())?;
    let mut chunks = Vec::new();

    // Start the animation settled and the camera decoder seeded at the
    // segment's first source timestamp.
    let start_effective = job.effective_ms(segment.start_frame);
    compositor.settle_animation(start_effective);

    for (local_index, frame) in (segment.start_frame..segment.end_frame).enumerate() {
        if job.cancelled() || abort.load(Ordering::Acquire) {
            // Flush so the codec is never dropped in a configured-but-
            // unflushed state.
            let _ = encoder.flush();
            return Ok(None);
        }

        let effective_ms = job.effective_ms(frame);
        let source_ms = job.mapper.map_effective_to_source(effective_ms);

        let render = |decoders: &mut SourceDecoders,
                      compositor: &mut Box<dyn Compositor>|
         -> ExportResult<Vec<u8>> {
            let screen = decoders.screen.frame_at(source_ms)?;
            let camera = decoders.camera_frame_at(source_ms);
            compositor.compose(&screen, camera.as_ref(), effective_ms)
        };

        let rgba = match render(decoders, compositor) {
            Ok(rgba) => rgba,
            // Hybrid path: one best-effort retry of the frame's capture-and-
            // render; anything else propagates as segment failure.
            Err(e) if mode == RenderMode::Gpu => {
                log::warn!(
                    "[EXPORT] frame {} render failed ({}); retrying once",
                    frame,
                    e
                );
                render(decoders, compositor)?
            }
            Err(e) => return Err(e),
        };

        chunks.extend(encoder.encode_rgba(&rgba, local_index as i64)?);

        let done = frames_done.fetch_add(1, Ordering::Relaxed) + 1;
        report(progress, done, job.total_frames, ExportPhase::Rendering);
    }

    chunks.extend(encoder.flush()?);
    Ok(Some(chunks))
}
