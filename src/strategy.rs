//! Export strategy selection.
//!
//! Chooses between sequential, parallel, and hybrid execution from the job's
//! duration and resolution plus host capabilities. Thresholds scale inversely
//! with resolution: a high-megapixel export amortizes parallel overhead
//! sooner, but also supports fewer concurrent slots before frame buffers
//! exhaust memory.

use serde::Serialize;

use crate::project::ExportStrategy;

/// Duration above which a 2-megapixel export goes parallel (seconds).
const PARALLEL_BASE_THRESHOLD_S: f64 = 20.0;

/// Duration above which a 2-megapixel export goes hybrid (seconds).
const HYBRID_BASE_THRESHOLD_S: f64 = 90.0;

/// Reference resolution for threshold scaling (1080p ~ 2.07 MP).
const REFERENCE_MEGAPIXELS: f64 = 2.0;

/// Resolution above which a GPU-assisted sequential export pays off.
const HIGH_RES_MEGAPIXELS: f64 = 2.0;

/// Per-slot frame-buffer memory budget expressed as slot-count at 1 MP.
const MEMORY_SLOT_BUDGET: f64 = 24.0;

/// Target segment length for parallel CPU rendering (seconds).
const SEGMENT_TARGET_S: f64 = 10.0;

/// Target segment length under GPU rendering (seconds).
const SEGMENT_TARGET_GPU_S: f64 = 6.0;

/// Host facts the selector consumes.
#[derive(Debug, Clone, Copy)]
pub struct HostProfile {
    pub gpu_available: bool,
    pub hardware_encode: bool,
    pub cores: usize,
}

/// The chosen execution plan.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyPlan {
    pub strategy: ExportStrategy,
    /// Slot count for parallel/hybrid; 1 for sequential strategies.
    pub max_concurrency: usize,
    /// Target per-segment duration in seconds.
    pub segment_target_s: f64,
    /// Human-readable justification for diagnostics.
    pub reason: String,
}

fn megapixels(width: u32, height: u32) -> f64 {
    (width as f64 * height as f64) / 1_000_000.0
}

/// Parallel duration threshold for a given resolution.
fn parallel_threshold_s(mp: f64) -> f64 {
    PARALLEL_BASE_THRESHOLD_S * (REFERENCE_MEGAPIXELS / mp.max(0.1)).clamp(0.5, 2.0)
}

/// Hybrid duration threshold for a given resolution.
fn hybrid_threshold_s(mp: f64) -> f64 {
    HYBRID_BASE_THRESHOLD_S * (REFERENCE_MEGAPIXELS / mp.max(0.1)).clamp(0.4, 2.0)
}

/// Slot count bounded by both spare cores and the per-resolution memory cap.
fn slot_count(cores: usize, mp: f64) -> usize {
    let spare = cores.saturating_sub(1);
    let memory_cap = (MEMORY_SLOT_BUDGET / mp.max(0.5)).floor() as usize;
    spare.min(memory_cap.max(1)).max(1)
}

/// Select an execution plan for the given job on the given host.
pub fn select_strategy(
    duration_s: f64,
    width: u32,
    height: u32,
    host: &HostProfile,
) -> StrategyPlan {
    let mp = megapixels(width, height);
    let slots = slot_count(host.cores, mp);
    let parallel_viable = slots >= 2;

    if host.gpu_available && parallel_viable && duration_s > hybrid_threshold_s(mp) {
        return StrategyPlan {
            strategy: ExportStrategy::Hybrid,
            max_concurrency: slots,
            segment_target_s: SEGMENT_TARGET_GPU_S,
            reason: format!(
                "{:.0}s at {:.1}MP exceeds the hybrid threshold ({:.0}s); \
                 GPU rendering across {} slots",
                duration_s,
                mp,
                hybrid_threshold_s(mp),
                slots
            ),
        };
    }

    if parallel_viable && duration_s > parallel_threshold_s(mp) {
        return StrategyPlan {
            strategy: ExportStrategy::Parallel,
            max_concurrency: slots,
            segment_target_s: SEGMENT_TARGET_S,
            reason: format!(
                "{:.0}s at {:.1}MP exceeds the parallel threshold ({:.0}s); \
                 {} slots available",
                duration_s,
                mp,
                parallel_threshold_s(mp),
                slots
            ),
        };
    }

    if host.gpu_available && mp > HIGH_RES_MEGAPIXELS {
        return StrategyPlan {
            strategy: ExportStrategy::SequentialGpu,
            max_concurrency: 1,
            segment_target_s: SEGMENT_TARGET_GPU_S,
            reason: format!(
                "short export at {:.1}MP; GPU compositing without segmentation",
                mp
            ),
        };
    }

    StrategyPlan {
        strategy: ExportStrategy::Sequential,
        max_concurrency: 1,
        segment_target_s: SEGMENT_TARGET_S,
        reason: format!(
            "{:.0}s at {:.1}MP is below the parallel threshold ({:.0}s)",
            duration_s,
            mp,
            parallel_threshold_s(mp)
        ),
    }
}
