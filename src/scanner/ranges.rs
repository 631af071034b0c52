//! Range algebra (spec §4.2).
//!
//! Pure functions: no I/O, no ordering surprises. Inputs are expected sorted
//! ascending; callers (the scheduler) are responsible for sorting the
//! missing-frame set before calling [`contiguous_ranges`].

use crate::error::FarmError;
use crate::model::FrameRange;

/// Collapse a sorted slice of integers into `(a, b)` pairs where `a..=b` is
/// a maximal run of consecutive integers. Preserves input order; never
/// reorders frames across contiguous boundaries.
pub fn contiguous_ranges(sorted: &[i64]) -> Vec<FrameRange> {
    let mut ranges = Vec::new();
    let mut iter = sorted.iter().copied();
    let Some(first) = iter.next() else {
        return ranges;
    };

    let mut start = first;
    let mut prev = first;
    for value in iter {
        if value == prev + 1 {
            prev = value;
            continue;
        }
        ranges.push(FrameRange::new(start, prev));
        start = value;
        prev = value;
    }
    ranges.push(FrameRange::new(start, prev));
    ranges
}

/// Split each range into chunks of length at most `chunk_size`, advancing
/// the window by `chunk_size` each step. `chunk_size >= 1` or this fails
/// with [`FarmError::InvalidConfig`].
pub fn split_by_chunk(ranges: &[FrameRange], chunk_size: i64) -> Result<Vec<FrameRange>, FarmError> {
    if chunk_size < 1 {
        return Err(FarmError::InvalidConfig(format!(
            "chunk size must be >= 1, got {chunk_size}"
        )));
    }

    let mut chunks = Vec::new();
    for range in ranges {
        let mut a = range.start;
        while a <= range.end {
            let b = std::cmp::min(a + chunk_size - 1, range.end);
            chunks.push(FrameRange::new(a, b));
            a += chunk_size;
        }
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(ranges: &[FrameRange]) -> Vec<(i64, i64)> {
        ranges.iter().map(|r| (r.start, r.end)).collect()
    }

    #[test]
    fn contiguous_ranges_empty() {
        assert!(contiguous_ranges(&[]).is_empty());
    }

    #[test]
    fn contiguous_ranges_single_run() {
        assert_eq!(pairs(&contiguous_ranges(&[1, 2, 3, 4])), vec![(1, 4)]);
    }

    #[test]
    fn contiguous_ranges_with_gaps() {
        // scenario 3: existing {2,3,7} out of 1..10 -> missing 1, 4..6, 8..10
        let missing = [1, 4, 5, 6, 8, 9, 10];
        assert_eq!(pairs(&contiguous_ranges(&missing)), vec![(1, 1), (4, 6), (8, 10)]);
    }

    #[test]
    fn contiguous_ranges_single_value_runs() {
        assert_eq!(pairs(&contiguous_ranges(&[1, 3, 5])), vec![(1, 1), (3, 3), (5, 5)]);
    }

    #[test]
    fn split_by_chunk_exact_division() {
        let ranges = vec![FrameRange::new(1, 5)];
        let chunks = split_by_chunk(&ranges, 2).unwrap();
        assert_eq!(pairs(&chunks), vec![(1, 2), (3, 4), (5, 5)]);
    }

    #[test]
    fn split_by_chunk_preserves_gap_boundaries() {
        // scenario 3: missing ranges (1,1),(4,6),(8,10) with chunk size 3
        let ranges = vec![FrameRange::new(1, 1), FrameRange::new(4, 6), FrameRange::new(8, 10)];
        let chunks = split_by_chunk(&ranges, 3).unwrap();
        assert_eq!(pairs(&chunks), vec![(1, 1), (4, 6), (8, 10)]);
    }

    #[test]
    fn split_by_chunk_rejects_non_positive() {
        let ranges = vec![FrameRange::new(1, 5)];
        assert!(matches!(
            split_by_chunk(&ranges, 0),
            Err(FarmError::InvalidConfig(_))
        ));
    }

    #[test]
    fn split_by_chunk_union_equals_missing() {
        let missing: Vec<i64> = (1..=100).filter(|n| n % 7 != 0).collect();
        let ranges = contiguous_ranges(&missing);
        let chunks = split_by_chunk(&ranges, 10).unwrap();

        let mut covered: Vec<i64> = chunks.iter().flat_map(|c| c.start..=c.end).collect();
        covered.sort_unstable();
        assert_eq!(covered, missing);

        for c in &chunks {
            assert!(c.end - c.start + 1 <= 10);
        }
    }
}
