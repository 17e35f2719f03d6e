//! In-flight encode queue sizing.
//!
//! The sequential exporter keeps a bounded number of rendered frames queued
//! toward the encoder. A fixed policy pins that bound; the adaptive policy
//! watches a rolling window of per-frame times and steps the bound down when
//! frames are slow (bounding memory on struggling machines) and up when the
//! encoder is comfortably keeping up. The watermarks are tuning knobs, not a
//! correctness contract.

use std::collections::VecDeque;
use std::time::Duration;

use crate::project::EncodeQueuePolicy;

/// Frames averaged when judging recent throughput.
const WINDOW: usize = 30;

/// Average per-frame time above which capacity steps down.
const SLOW_FRAME: Duration = Duration::from_millis(90);

/// Average per-frame time below which capacity steps up.
const FAST_FRAME: Duration = Duration::from_millis(25);

/// Frames between capacity adjustments.
const ADJUST_INTERVAL: usize = WINDOW;

/// Tracks recent frame times and derives the current queue capacity.
#[derive(Debug)]
pub struct EncodeQueueGovernor {
    policy: EncodeQueuePolicy,
    capacity: usize,
    window: VecDeque<Duration>,
    since_adjust: usize,
}

impl EncodeQueueGovernor {
    pub fn new(policy: EncodeQueuePolicy) -> Self {
        let capacity = match policy {
            EncodeQueuePolicy::Fixed { capacity } => capacity.max(1),
            EncodeQueuePolicy::Adaptive { min, max } => ((min + max) / 2).clamp(min, max).max(1),
        };
        Self {
            policy,
            capacity,
            window: VecDeque::with_capacity(WINDOW),
            since_adjust: 0,
        }
    }

    /// Current in-flight frame bound.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record one frame's wall time and maybe adjust capacity.
    pub fn record_frame(&mut self, elapsed: Duration) {
        let EncodeQueuePolicy::Adaptive { min, max } = self.policy else {
            return;
        };

        if self.window.len() == WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(elapsed);
        self.since_adjust += 1;

        if self.since_adjust < ADJUST_INTERVAL || self.window.len() < WINDOW / 2 {
            return;
        }
        self.since_adjust = 0;

        let total: Duration = self.window.iter().sum();
        let average = total / self.window.len() as u32;

        let previous = self.capacity;
        if average > SLOW_FRAME && self.capacity > min {
            self.capacity -= 1;
        } else if average < FAST_FRAME && self.capacity < max {
            self.capacity += 1;
        }
        if self.capacity != previous {
            log::debug!(
                "[QUEUE] avg frame {:?} -> capacity {} -> {}",
                average,
                previous,
                self.capacity
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_policy_never_moves() {
        let mut governor = EncodeQueueGovernor::new(EncodeQueuePolicy::Fixed { capacity: 6 });
        assert_eq!(governor.capacity(), 6);
        for _ in 0..500 {
            governor.record_frame(Duration::from_millis(500));
        }
        assert_eq!(governor.capacity(), 6);
    }

    #[test]
    fn test_adaptive_steps_down_under_load() {
        let mut governor = EncodeQueueGovernor::new(EncodeQueuePolicy::Adaptive { min: 2, max: 8 });
        let start = governor.capacity();
        for _ in 0..WINDOW * 3 {
            governor.record_frame(Duration::from_millis(200));
        }
        assert!(
            governor.capacity() < start,
            "slow frames should shrink the queue ({} -> {})",
            start,
            governor.capacity()
        );
        assert!(governor.capacity() >= 2);
    }

    #[test]
    fn test_adaptive_steps_up_when_fast() {
        let mut governor = EncodeQueueGovernor::new(EncodeQueuePolicy::Adaptive { min: 2, max: 8 });
        let start = governor.capacity();
        for _ in 0..WINDOW * 6 {
            governor.record_frame(Duration::from_millis(5));
        }
        assert!(governor.capacity() > start);
        assert!(governor.capacity() <= 8);
    }

    #[test]
    fn test_adaptive_respects_bounds() {
        let mut governor = EncodeQueueGovernor::new(EncodeQueuePolicy::Adaptive { min: 2, max: 4 });
        for _ in 0..WINDOW * 20 {
            governor.record_frame(Duration::from_millis(400));
        }
        assert_eq!(governor.capacity(), 2);
        for _ in 0..WINDOW * 20 {
            governor.record_frame(Duration::from_millis(1));
        }
        assert_eq!(governor.capacity(), 4);
    }

    #[test]
    fn test_adjustment_waits_for_a_full_window() {
        let mut governor = EncodeQueueGovernor::new(EncodeQueuePolicy::Adaptive { min: 1, max: 8 });
        let start = governor.capacity();
        for _ in 0..5 {
            governor.record_frame(Duration::from_millis(400));
        }
        assert_eq!(governor.capacity(), start, "too few samples to react");
    }
}
