//! Time mapping across trim regions.
//!
//! Two clocks exist during an export: the *output* (effective) timeline the
//! viewer sees, and the *source* timeline of the original recording. Trim
//! regions remove spans of source time, so an effective timestamp must be
//! shifted past every trim that precedes it before the decoder can seek.

use crate::project::TrimRegion;

/// Trim set prepared for repeated effective -> source lookups.
///
/// Regions are sorted by start once at construction. Overlapping trims are
/// not reconciled here; the editor guarantees disjoint regions.
#[derive(Debug, Clone)]
pub struct TimeMapper {
    trims: Vec<TrimRegion>,
    source_duration_ms: u64,
}

impl TimeMapper {
    pub fn new(source_duration_ms: u64, trims: &[TrimRegion]) -> Self {
        let mut trims = trims.to_vec();
        trims.sort_by_key(|t| t.start_ms);
        Self {
            trims,
            source_duration_ms,
        }
    }

    /// Output duration after all trims are removed.
    pub fn effective_duration_ms(&self) -> u64 {
        let trimmed: u64 = self.trims.iter().map(|t| t.duration_ms()).sum();
        self.source_duration_ms.saturating_sub(trimmed)
    }

    /// Map an effective timestamp to the source timestamp it plays from.
    ///
    /// Walks trims in start order, skipping each trim whose start lies at or
    /// before the accumulated source position. Monotonic non-decreasing and
    /// idempotent for a fixed trim set; defined on [0, effective_duration].
    pub fn map_effective_to_source(&self, effective_ms: u64) -> u64 {
        let mut source_ms = effective_ms;
        for trim in &self.trims {
            if trim.start_ms <= source_ms {
                source_ms += trim.duration_ms();
            } else {
                break;
            }
        }
        source_ms.min(self.source_duration_ms)
    }

    /// True when a source timestamp survives trimming (is part of the output).
    pub fn source_visible(&self, source_ms: u64) -> bool {
        !self
            .trims
            .iter()
            .any(|t| source_ms >= t.start_ms && source_ms < t.end_ms)
    }

    pub fn trims(&self) -> &[TrimRegion] {
        &self.trims
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn trim(start_ms: u64, end_ms: u64) -> TrimRegion {
        TrimRegion {
            id: Uuid::new_v4(),
            start_ms,
            end_ms,
        }
    }

    #[test]
    fn test_no_trims_is_identity() {
        let mapper = TimeMapper::new(10_000, &[]);
        assert_eq!(mapper.effective_duration_ms(), 10_000);
        assert_eq!(mapper.map_effective_to_source(0), 0);
        assert_eq!(mapper.map_effective_to_source(4_321), 4_321);
    }

    #[test]
    fn test_single_trim_scenario() {
        // 10s source, one trim [2000, 3000) -> 9s effective;
        // effective 2500ms plays from source 3500ms.
        let mapper = TimeMapper::new(10_000, &[trim(2_000, 3_000)]);
        assert_eq!(mapper.effective_duration_ms(), 9_000);
        assert_eq!(mapper.map_effective_to_source(2_500), 3_500);
        // Before the trim nothing shifts.
        assert_eq!(mapper.map_effective_to_source(1_999), 1_999);
        // Exactly at the trim start the span is skipped.
        assert_eq!(mapper.map_effective_to_source(2_000), 3_000);
    }

    #[test]
    fn test_multiple_trims_accumulate() {
        let mapper = TimeMapper::new(20_000, &[trim(1_000, 2_000), trim(5_000, 8_000)]);
        assert_eq!(mapper.effective_duration_ms(), 16_000);
        assert_eq!(mapper.map_effective_to_source(500), 500);
        assert_eq!(mapper.map_effective_to_source(1_500), 2_500);
        // 4000 effective -> +1000 (first trim) = 5000 source, which lands on
        // the second trim start, so it is skipped too.
        assert_eq!(mapper.map_effective_to_source(4_000), 8_000);
        assert_eq!(mapper.map_effective_to_source(10_000), 14_000);
    }

    #[test]
    fn test_unsorted_input_is_sorted() {
        let mapper = TimeMapper::new(20_000, &[trim(5_000, 8_000), trim(1_000, 2_000)]);
        assert_eq!(mapper.map_effective_to_source(1_500), 2_500);
    }

    #[test]
    fn test_duration_identity() {
        // effective_duration + sum(trim durations) == source_duration
        let trims = [trim(100, 400), trim(1_000, 1_250), trim(6_000, 9_999)];
        let mapper = TimeMapper::new(12_000, &trims);
        let trimmed: u64 = trims.iter().map(|t| t.duration_ms()).sum();
        assert_eq!(mapper.effective_duration_ms() + trimmed, 12_000);
    }

    #[test]
    fn test_mapping_is_monotonic() {
        let mapper = TimeMapper::new(30_000, &[trim(2_000, 4_000), trim(10_000, 15_000)]);
        let mut last = 0u64;
        for t in (0..mapper.effective_duration_ms()).step_by(37) {
            let mapped = mapper.map_effective_to_source(t);
            assert!(
                mapped >= last,
                "mapping decreased at t={}: {} < {}",
                t,
                mapped,
                last
            );
            last = mapped;
        }
    }

    #[test]
    fn test_mapped_time_is_never_inside_a_trim() {
        let trims = [trim(2_000, 4_000), trim(10_000, 15_000)];
        let mapper = TimeMapper::new(30_000, &trims);
        for t in (0..mapper.effective_duration_ms()).step_by(53) {
            let mapped = mapper.map_effective_to_source(t);
            assert!(
                mapper.source_visible(mapped),
                "effective {} mapped into a trimmed span at source {}",
                t,
                mapped
            );
        }
    }

    #[test]
    fn test_result_clamped_to_source_duration() {
        let mapper = TimeMapper::new(10_000, &[trim(9_000, 10_000)]);
        assert_eq!(mapper.map_effective_to_source(9_000), 10_000);
    }
}
