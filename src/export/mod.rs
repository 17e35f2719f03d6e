//! Export orchestration.
//!
//! `Exporter` is the engine's front door: it validates the config, consults
//! the strategy selector, runs the chosen exporter with a progress callback,
//! and returns either the finished media or a distinct cancelled outcome.

pub mod parallel;
pub mod queue;
pub mod segments;
pub mod sequential;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::capabilities::get_capabilities;
use crate::error::ExportResult;
use crate::project::{ExportConfig, ExportStrategy, OutputFormat};
use crate::render::{RenderMode, Scene};
use crate::strategy::{select_strategy, StrategyPlan};
use crate::timeline::TimeMapper;

/// Coarse phase reported alongside frame progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportPhase {
    Preparing,
    Rendering,
    Muxing,
    Finalizing,
}

/// Progress callback: (current_frame, total_frames, percentage, phase).
pub type ProgressFn = Arc<dyn Fn(u64, u64, f32, ExportPhase) + Send + Sync>;

/// A progress callback that ignores everything.
pub fn null_progress() -> ProgressFn {
    Arc::new(|_, _, _, _| {})
}

pub(crate) fn report(progress: &ProgressFn, current: u64, total: u64, phase: ExportPhase) {
    let pct = if total == 0 {
        100.0
    } else {
        (current as f32 / total as f32) * 100.0
    };
    progress(current, total, pct.clamp(0.0, 100.0), phase);
}

/// The finished product of a successful export.
pub struct ExportOutput {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    pub duration_s: f64,
    pub frame_count: u64,
    pub strategy: ExportStrategy,
    pub encoder: &'static str,
}

/// Result union: a finished export or a user cancellation.
///
/// Cancellation is not an error; failures surface as `ExportError`.
pub enum ExportOutcome {
    Completed(Box<ExportOutput>),
    Cancelled,
}

/// Internal result of a video path run.
pub(crate) enum VideoRun {
    Finished { bytes: Vec<u8>, encoder: &'static str },
    Cancelled,
}

/// Everything the exporters share for one job.
pub(crate) struct JobContext {
    pub config: ExportConfig,
    pub mapper: TimeMapper,
    pub scene: Arc<Scene>,
    pub total_frames: u64,
    pub fps: u32,
    pub cancel: Arc<AtomicBool>,
    pub hardware_encoder: Option<String>,
}

impl JobContext {
    /// Output-timeline timestamp of a frame index, in milliseconds.
    pub fn effective_ms(&self, frame: u64) -> u64 {
        frame * 1000 / self.fps.max(1) as u64
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

/// One export job, cancellable, runnable once.
pub struct Exporter {
    config: ExportConfig,
    cancel: Arc<AtomicBool>,
    cancel_used: AtomicBool,
    ran: AtomicBool,
}

impl Exporter {
    /// Validate the config and prepare a job.
    pub fn new(config: ExportConfig) -> ExportResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
            cancel_used: AtomicBool::new(false),
            ran: AtomicBool::new(false),
        })
    }

    /// Request cooperative cancellation. Callable at most once per export;
    /// later calls are ignored with a warning.
    pub fn cancel(&self) {
        if self.cancel_used.swap(true, Ordering::SeqCst) {
            log::warn!("[EXPORT] cancel() called more than once; ignoring");
            return;
        }
        log::info!("[EXPORT] cancellation requested");
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// A handle that can cancel this export from another thread.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Run the export to completion, cancellation, or error.
    pub fn run(&self, progress: ProgressFn) -> ExportResult<ExportOutcome> {
        if self.ran.swap(true, Ordering::SeqCst) {
            return Err(crate::error::ExportError::InvalidConfig(
                "an Exporter instance runs at most once".to_string(),
            ));
        }

        let started = Instant::now();
        report(&progress, 0, 0, ExportPhase::Preparing);

        let caps = get_capabilities();
        let plan = self.resolve_plan(&caps);
        log::info!(
            "[EXPORT] strategy={:?} concurrency={} segment_target={:.0}s ({})",
            plan.strategy,
            plan.max_concurrency,
            plan.segment_target_s,
            plan.reason
        );

        let mapper = TimeMapper::new(self.config.source_duration_ms, &self.config.trim_regions);
        let effective_ms = mapper.effective_duration_ms();

        // GIF can't represent high frame rates; MP4 keeps the configured one.
        let fps = match self.config.output.format {
            OutputFormat::Gif => crate::media::gif::GifSink::effective_fps(self.config.output.fps),
            OutputFormat::Mp4 => self.config.output.fps,
        };
        let total_frames = ((effective_ms as f64 / 1000.0) * fps as f64).ceil() as u64;

        let scene = Arc::new(Scene::build(&self.config)?);

        let hardware_encoder = if self.config.output.prefer_hardware_encode {
            caps.hardware_encoder.clone()
        } else {
            None
        };

        let job = JobContext {
            config: self.config.clone(),
            mapper,
            scene,
            total_frames,
            fps,
            cancel: Arc::clone(&self.cancel),
            hardware_encoder,
        };

        let render_mode = match plan.strategy {
            ExportStrategy::Sequential | ExportStrategy::Parallel => RenderMode::Software,
            ExportStrategy::SequentialGpu | ExportStrategy::Hybrid => RenderMode::Gpu,
        };

        let run = match (self.config.output.format, plan.strategy) {
            (OutputFormat::Gif, _) => sequential::export_gif(&job, render_mode, &progress)?,
            (OutputFormat::Mp4, ExportStrategy::Sequential | ExportStrategy::SequentialGpu) => {
                sequential::export_mp4(&job, render_mode, &progress)?
            }
            (OutputFormat::Mp4, ExportStrategy::Parallel | ExportStrategy::Hybrid) => {
                parallel::export_mp4(&job, render_mode, &plan, &progress)?
            }
        };

        match run {
            VideoRun::Cancelled => {
                log::info!("[EXPORT] cancelled after {:.1}s", started.elapsed().as_secs_f32());
                Ok(ExportOutcome::Cancelled)
            }
            VideoRun::Finished { bytes, encoder } => {
                report(&progress, total_frames, total_frames, ExportPhase::Finalizing);
                log::info!(
                    "[EXPORT] complete in {:.1}s: {} bytes",
                    started.elapsed().as_secs_f32(),
                    bytes.len()
                );
                Ok(ExportOutcome::Completed(Box::new(ExportOutput {
                    bytes,
                    format: self.config.output.format,
                    duration_s: effective_ms as f64 / 1000.0,
                    frame_count: total_frames,
                    strategy: plan.strategy,
                    encoder,
                })))
            }
        }
    }

    /// Consult the selector unless the config pins a strategy.
    fn resolve_plan(&self, caps: &crate::capabilities::HostCapabilities) -> StrategyPlan {
        let mapper = TimeMapper::new(self.config.source_duration_ms, &self.config.trim_regions);
        let duration_s = mapper.effective_duration_ms() as f64 / 1000.0;

        let mut plan = select_strategy(
            duration_s,
            self.config.output.width,
            self.config.output.height,
            &caps.profile(),
        );

        if let Some(strategy) = self.config.strategy_override {
            plan.reason = format!("forced by config (selector said {:?})", plan.strategy);
            plan.strategy = strategy;
            if plan.max_concurrency < 2
                && matches!(strategy, ExportStrategy::Parallel | ExportStrategy::Hybrid)
            {
                plan.max_concurrency = 2;
            }
        }
        plan
    }
}
