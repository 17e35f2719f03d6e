//! Frame-range segmentation for parallel export.
//!
//! Segments partition `[0, total_frames)` exactly: contiguous, sorted,
//! non-overlapping. They exist for one export invocation and are discarded
//! after their chunks are muxed.

use uuid::Uuid;

/// Lifecycle of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A contiguous frame range processed by one slot.
#[derive(Debug, Clone)]
pub struct Segment {
    pub id: usize,
    pub uuid: Uuid,
    /// First frame index, inclusive.
    pub start_frame: u64,
    /// Last frame index, exclusive.
    pub end_frame: u64,
    pub status: SegmentStatus,
}

impl Segment {
    pub fn frame_count(&self) -> u64 {
        self.end_frame - self.start_frame
    }
}

/// Partition `[0, total_frames)` into segments of roughly
/// `target_segment_s` seconds each.
///
/// The remainder spreads one frame at a time across the leading segments so
/// sizes never differ by more than one frame.
pub fn plan_segments(total_frames: u64, fps: u32, target_segment_s: f64) -> Vec<Segment> {
    if total_frames == 0 {
        return Vec::new();
    }
    let target_frames = ((target_segment_s * fps.max(1) as f64).round() as u64).max(1);
    let count = total_frames.div_ceil(target_frames).max(1);
    let base = total_frames / count;
    let remainder = total_frames % count;

    let mut segments = Vec::with_capacity(count as usize);
    let mut cursor = 0u64;
    for id in 0..count {
        let len = base + if id < remainder { 1 } else { 0 };
        segments.push(Segment {
            id: id as usize,
            uuid: Uuid::new_v4(),
            start_frame: cursor,
            end_frame: cursor + len,
            status: SegmentStatus::Pending,
        });
        cursor += len;
    }
    debug_assert_eq!(cursor, total_frames);
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_partition(segments: &[Segment], total_frames: u64) {
        let sum: u64 = segments.iter().map(Segment::frame_count).sum();
        assert_eq!(sum, total_frames, "segments must cover every frame exactly");
        for pair in segments.windows(2) {
            assert_eq!(
                pair[0].end_frame, pair[1].start_frame,
                "segments must be contiguous"
            );
            assert!(pair[0].id < pair[1].id, "segments must be sorted by id");
        }
        if let (Some(first), Some(last)) = (segments.first(), segments.last()) {
            assert_eq!(first.start_frame, 0);
            assert_eq!(last.end_frame, total_frames);
        }
    }

    #[test]
    fn test_exact_partition_typical() {
        // 60s at 30fps in 10s segments -> 6 segments of 300 frames.
        let segments = plan_segments(1800, 30, 10.0);
        assert_eq!(segments.len(), 6);
        assert!(segments.iter().all(|s| s.frame_count() == 300));
        assert_partition(&segments, 1800);
    }

    #[test]
    fn test_partition_with_remainder() {
        let segments = plan_segments(1000, 30, 10.0);
        assert_partition(&segments, 1000);
        // Sizes differ by at most one frame.
        let min = segments.iter().map(Segment::frame_count).min().unwrap();
        let max = segments.iter().map(Segment::frame_count).max().unwrap();
        assert!(max - min <= 1);
    }

    #[test]
    fn test_short_export_single_segment() {
        let segments = plan_segments(90, 30, 10.0);
        assert_eq!(segments.len(), 1);
        assert_partition(&segments, 90);
    }

    #[test]
    fn test_zero_frames_no_segments() {
        assert!(plan_segments(0, 30, 10.0).is_empty());
    }

    #[test]
    fn test_smaller_target_makes_more_segments() {
        let coarse = plan_segments(3600, 30, 10.0);
        let fine = plan_segments(3600, 30, 6.0);
        assert!(fine.len() > coarse.len());
        assert_partition(&fine, 3600);
    }

    #[test]
    fn test_awkward_counts_still_partition() {
        for total in [1u64, 7, 299, 301, 12_345] {
            let segments = plan_segments(total, 30, 10.0);
            assert_partition(&segments, total);
        }
    }
}
