//! Zoom region selection and smoothed camera animation.
//!
//! For every output frame the animator picks the dominant zoom region, turns
//! it into a target (scale, focus), and advances a smoothed animation state
//! toward that target. Smoothing uses exponential approach with a snap
//! threshold so the state converges in a finite number of ticks instead of
//! drifting asymptotically forever.

use crate::project::ZoomRegion;

/// Scale factor for each discrete zoom depth (1-6).
pub const DEPTH_SCALES: [f32; 6] = [1.25, 1.5, 1.8, 2.2, 2.7, 3.2];

/// How far outside a region's boundary the blend strength ramps to zero.
pub const TRANSITION_MS: u64 = 700;

/// Fraction of the remaining delta applied per tick.
pub const SMOOTHING_FACTOR: f32 = 0.32;

/// Deltas below this snap directly to the target.
pub const MIN_DELTA: f32 = 0.001;

/// Resolve a region's scale factor from its depth or custom override.
pub fn region_scale(region: &ZoomRegion) -> f32 {
    if let Some(custom) = region.custom_scale {
        return custom.max(1.0);
    }
    let depth = region.depth.clamp(1, 6) as usize;
    DEPTH_SCALES[depth - 1]
}

/// Clamp a normalized focus point so the zoomed viewport stays inside the
/// frame. The viewport spans `1/scale` of the frame, so the reachable focus
/// band shrinks by half of that on each side.
pub fn clamp_focus(fx: f32, fy: f32, scale: f32) -> (f32, f32) {
    if scale <= 1.0 {
        return (0.5, 0.5);
    }
    let margin = 0.5 / scale;
    (
        fx.clamp(margin, 1.0 - margin),
        fy.clamp(margin, 1.0 - margin),
    )
}

/// The dominant region at a timestamp with its blend strength.
#[derive(Debug, Clone, Copy)]
pub struct DominantRegion<'a> {
    pub region: &'a ZoomRegion,
    /// 1.0 inside the region, ramping to 0.0 across `TRANSITION_MS`.
    pub strength: f32,
}

/// Animation target derived from the dominant region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomTarget {
    pub scale: f32,
    pub focus_x: f32,
    pub focus_y: f32,
}

impl ZoomTarget {
    pub fn identity() -> Self {
        Self {
            scale: 1.0,
            focus_x: 0.5,
            focus_y: 0.5,
        }
    }
}

/// One evaluated frame of zoom animation.
#[derive(Debug, Clone, Copy)]
pub struct ZoomSample {
    pub scale: f32,
    pub focus_x: f32,
    pub focus_y: f32,
    /// Largest component delta applied this tick; feeds motion-blur decisions.
    pub motion: f32,
}

impl ZoomSample {
    pub fn is_zoomed(&self) -> bool {
        self.scale > 1.001
    }
}

/// Blend strength of a single region at `time_ms`.
fn region_strength(region: &ZoomRegion, time_ms: u64) -> f32 {
    if time_ms >= region.start_ms && time_ms < region.end_ms {
        return 1.0;
    }
    let distance = if time_ms < region.start_ms {
        region.start_ms - time_ms
    } else {
        time_ms - region.end_ms + 1
    };
    if distance >= TRANSITION_MS {
        0.0
    } else {
        1.0 - distance as f32 / TRANSITION_MS as f32
    }
}

/// Per-export zoom animator.
///
/// Owned by exactly one compositor; the smoothed state is re-derived every
/// frame and never persisted across exports.
#[derive(Debug, Clone)]
pub struct ZoomAnimator {
    regions: Vec<ZoomRegion>,
    scale: f32,
    focus_x: f32,
    focus_y: f32,
}

impl ZoomAnimator {
    pub fn new(regions: &[ZoomRegion]) -> Self {
        let mut regions = regions.to_vec();
        regions.sort_by_key(|r| r.start_ms);
        Self {
            regions,
            scale: 1.0,
            focus_x: 0.5,
            focus_y: 0.5,
        }
    }

    /// Find the region most strongly influencing `time_ms`.
    ///
    /// Authors keep regions disjoint, but overlap must still render sanely:
    /// among regions with nonzero strength, the one with the latest start
    /// wins primary strength and the ties go to the stronger one.
    pub fn dominant_region(&self, time_ms: u64) -> Option<DominantRegion<'_>> {
        let mut best: Option<DominantRegion<'_>> = None;
        for region in &self.regions {
            let strength = region_strength(region, time_ms);
            if strength <= 0.0 {
                continue;
            }
            let replace = match best {
                None => true,
                Some(current) => {
                    if (strength - current.strength).abs() < f32::EPSILON {
                        region.start_ms > current.region.start_ms
                    } else if strength >= 1.0 && current.strength >= 1.0 {
                        // Both fully active (overlap): later start wins.
                        region.start_ms > current.region.start_ms
                    } else {
                        strength > current.strength
                    }
                }
            };
            if replace {
                best = Some(DominantRegion { region, strength });
            }
        }
        best
    }

    /// Target (scale, focus) at `time_ms` before smoothing.
    pub fn target_at(&self, time_ms: u64) -> ZoomTarget {
        match self.dominant_region(time_ms) {
            None => ZoomTarget::identity(),
            Some(dominant) => {
                let full_scale = region_scale(dominant.region);
                let scale = 1.0 + (full_scale - 1.0) * dominant.strength;
                let (cx, cy) = clamp_focus(
                    dominant.region.focus_x,
                    dominant.region.focus_y,
                    full_scale,
                );
                ZoomTarget {
                    scale,
                    focus_x: 0.5 + (cx - 0.5) * dominant.strength,
                    focus_y: 0.5 + (cy - 0.5) * dominant.strength,
                }
            }
        }
    }

    /// Advance the smoothed state one frame toward the target at `time_ms`.
    pub fn tick(&mut self, time_ms: u64) -> ZoomSample {
        let target = self.target_at(time_ms);

        let d_scale = step(&mut self.scale, target.scale);
        let d_fx = step(&mut self.focus_x, target.focus_x);
        let d_fy = step(&mut self.focus_y, target.focus_y);

        ZoomSample {
            scale: self.scale,
            focus_x: self.focus_x,
            focus_y: self.focus_y,
            motion: d_scale.max(d_fx).max(d_fy),
        }
    }

    /// Reset the smoothed state as if the export had been running at
    /// `time_ms` long enough to settle. Used when a parallel slot starts
    /// mid-timeline so segment boundaries don't produce a zoom-in pop.
    pub fn settle_at(&mut self, time_ms: u64) {
        let target = self.target_at(time_ms);
        self.scale = target.scale;
        self.focus_x = target.focus_x;
        self.focus_y = target.focus_y;
    }
}

/// Move `current` toward `target` by one smoothing step; returns the
/// magnitude of the applied delta.
fn step(current: &mut f32, target: f32) -> f32 {
    let delta = target - *current;
    if delta.abs() < MIN_DELTA {
        *current = target;
        delta.abs()
    } else {
        let applied = delta * SMOOTHING_FACTOR;
        *current += applied;
        applied.abs()
    }
}
