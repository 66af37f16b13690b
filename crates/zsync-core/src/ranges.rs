//! Known block ranges and byte ranges
//!
//! [`KnownRanges`] records which target blocks are already present in the
//! scratch file. It is a sorted list of inclusive `[first, last]` block
//! spans; inserting a block that touches or falls inside a span merges into
//! it, so no two spans ever touch or overlap.
//!
//! [`ByteRange`] is the half-open byte form used for HTTP requests.

use std::fmt;
use std::ops::Range;

/// Inclusive span of known blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockSpan {
    /// First known block
    pub first: usize,
    /// Last known block (inclusive)
    pub last: usize,
}

impl BlockSpan {
    /// Number of blocks in the span
    pub fn len(&self) -> usize {
        self.last - self.first + 1
    }

    /// Always false; spans hold at least one block
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Where a block falls relative to the known spans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangePosition {
    /// Inside an existing span
    Known,
    /// In the gap before span `n` (`n == spans.len()` means after the last span)
    Gap(usize),
}

/// Sorted, merged set of known blocks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownRanges {
    spans: Vec<BlockSpan>,
}

impl KnownRanges {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Locate `block` by bisection
    pub fn range_before_block(&self, block: usize) -> RangePosition {
        let mut low = 0usize;
        let mut high = self.spans.len();

        while low < high {
            let mid = low + (high - low) / 2;
            let span = self.spans[mid];
            if block > span.last {
                low = mid + 1;
            } else if block < span.first {
                high = mid;
            } else {
                return RangePosition::Known;
            }
        }

        RangePosition::Gap(low)
    }

    /// True if `block` is known
    pub fn contains(&self, block: usize) -> bool {
        self.range_before_block(block) == RangePosition::Known
    }

    /// Mark one block as known
    pub fn add(&mut self, block: usize) {
        let RangePosition::Gap(r) = self.range_before_block(block) else {
            return;
        };

        let joins_below = r > 0 && self.spans[r - 1].last + 1 == block;
        let joins_above = r < self.spans.len() && block + 1 == self.spans[r].first;

        match (joins_below, joins_above) {
            // Fills the hole between two spans exactly
            (true, true) => {
                self.spans[r - 1].last = self.spans[r].last;
                self.spans.remove(r);
            }
            (true, false) => self.spans[r - 1].last = block,
            (false, true) => self.spans[r].first = block,
            (false, false) => self.spans.insert(
                r,
                BlockSpan {
                    first: block,
                    last: block,
                },
            ),
        }
    }

    /// Mark every block in `blocks` as known
    pub fn add_range(&mut self, blocks: Range<usize>) {
        for block in blocks {
            self.add(block);
        }
    }

    /// First known block at or after `block`, or `block_count` if none
    pub fn next_known(&self, block: usize, block_count: usize) -> usize {
        match self.range_before_block(block) {
            RangePosition::Known => block,
            RangePosition::Gap(r) if r == self.spans.len() => block_count,
            RangePosition::Gap(r) => self.spans[r].first,
        }
    }

    /// Unknown blocks within `[from, to)` as half-open block ranges
    pub fn missing(&self, from: usize, to: usize) -> Vec<Range<usize>> {
        let mut gaps = Vec::new();
        let mut cursor = from;

        for span in &self.spans {
            if cursor >= to {
                break;
            }
            if span.last < cursor {
                continue;
            }
            if span.first > cursor {
                gaps.push(cursor..span.first.min(to));
            }
            cursor = cursor.max(span.last + 1);
        }

        if cursor < to {
            gaps.push(cursor..to);
        }
        gaps
    }

    /// Known spans in ascending order
    pub fn spans(&self) -> &[BlockSpan] {
        &self.spans
    }

    /// Total number of known blocks
    pub fn known_blocks(&self) -> usize {
        self.spans.iter().map(BlockSpan::len).sum()
    }

    /// True when nothing is known
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

/// Half-open byte range `[start, end)` of the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteRange {
    /// First byte
    pub start: u64,
    /// One past the last byte
    pub end: u64,
}

impl ByteRange {
    /// Create a range; `end` must not be before `start`
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of bytes
    pub const fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// True for a zero-length range
    pub const fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// HTTP `Range` header value (inclusive end)
    pub fn to_header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end.saturating_sub(1))
    }

    /// Split into pieces of at most `max_len` bytes, cutting only at
    /// multiples of `align`.
    ///
    /// `max_len` is rounded down to a multiple of `align` (minimum one
    /// `align`). A `max_len` of zero returns the range unchanged.
    pub fn split_aligned(&self, max_len: u64, align: u64) -> Vec<Self> {
        if max_len == 0 || self.len() <= max_len {
            return vec![*self];
        }

        let align = align.max(1);
        let step = (max_len / align).max(1) * align;
        let mut pieces = Vec::new();
        let mut start = self.start;
        while start < self.end {
            let end = (start + step).min(self.end);
            pieces.push(Self { start, end });
            start = end;
        }
        pieces
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn spans(ranges: &KnownRanges) -> Vec<(usize, usize)> {
        ranges.spans().iter().map(|s| (s.first, s.last)).collect()
    }

    #[test]
    fn test_merge_cases() {
        let mut ranges = KnownRanges::new();
        ranges.add(5);
        ranges.add(1);
        assert_eq!(spans(&ranges), vec![(1, 1), (5, 5)]);

        // adjoining below
        ranges.add(2);
        // adjoining above
        ranges.add(4);
        assert_eq!(spans(&ranges), vec![(1, 2), (4, 5)]);

        // exact hole between two spans
        ranges.add(3);
        assert_eq!(spans(&ranges), vec![(1, 5)]);

        // already known
        ranges.add(3);
        assert_eq!(spans(&ranges), vec![(1, 5)]);
        assert_eq!(ranges.known_blocks(), 5);
    }

    #[test]
    fn test_range_before_block() {
        let mut ranges = KnownRanges::new();
        ranges.add_range(2..4);
        ranges.add_range(8..10);

        assert_eq!(ranges.range_before_block(0), RangePosition::Gap(0));
        assert_eq!(ranges.range_before_block(3), RangePosition::Known);
        assert_eq!(ranges.range_before_block(5), RangePosition::Gap(1));
        assert_eq!(ranges.range_before_block(9), RangePosition::Known);
        assert_eq!(ranges.range_before_block(12), RangePosition::Gap(2));
    }

    #[test]
    fn test_next_known() {
        let mut ranges = KnownRanges::new();
        ranges.add_range(4..6);
        assert_eq!(ranges.next_known(0, 10), 4);
        assert_eq!(ranges.next_known(5, 10), 5);
        assert_eq!(ranges.next_known(6, 10), 10);
    }

    #[test]
    fn test_missing_window() {
        let mut ranges = KnownRanges::new();
        ranges.add_range(2..4);
        ranges.add_range(6..7);

        assert_eq!(ranges.missing(0, 10), vec![0..2, 4..6, 7..10]);
        assert_eq!(ranges.missing(3, 6), vec![4..6]);
        assert_eq!(ranges.missing(2, 4), Vec::<Range<usize>>::new());
        assert_eq!(KnownRanges::new().missing(0, 3), vec![0..3]);
    }

    #[test]
    fn test_byte_range_header() {
        assert_eq!(ByteRange::new(100, 200).to_header_value(), "bytes=100-199");
        assert_eq!(ByteRange::new(0, 201).to_header_value(), "bytes=0-200");
    }

    #[test]
    fn test_split_aligned() {
        let range = ByteRange::new(4096, 4096 * 10 + 100);
        let pieces = range.split_aligned(4096 * 4, 4096);
        assert_eq!(
            pieces,
            vec![
                ByteRange::new(4096, 4096 * 5),
                ByteRange::new(4096 * 5, 4096 * 9),
                ByteRange::new(4096 * 9, 4096 * 10 + 100),
            ]
        );
        assert_eq!(range.split_aligned(0, 4096), vec![range]);
        assert_eq!(range.split_aligned(10, 4096).len(), 10);
    }

    proptest! {
        #[test]
        fn spans_stay_sorted_and_disjoint(blocks in proptest::collection::vec(0usize..200, 0..300)) {
            let mut ranges = KnownRanges::new();
            for block in &blocks {
                ranges.add(*block);
            }

            for pair in ranges.spans().windows(2) {
                // strictly apart: a gap of at least one block
                prop_assert!(pair[0].last + 1 < pair[1].first);
            }
            for span in ranges.spans() {
                prop_assert!(span.first <= span.last);
            }

            let mut linear = [false; 200];
            for block in &blocks {
                linear[*block] = true;
            }
            for (block, &expected) in linear.iter().enumerate() {
                prop_assert_eq!(ranges.contains(block), expected);
            }
        }

        #[test]
        fn missing_complements_known(blocks in proptest::collection::vec(0usize..64, 0..80)) {
            let mut ranges = KnownRanges::new();
            for block in &blocks {
                ranges.add(*block);
            }

            let mut covered = [0u8; 64];
            for gap in ranges.missing(0, 64) {
                for block in gap {
                    covered[block] += 1;
                }
            }
            for span in ranges.spans() {
                for block in span.first..=span.last {
                    covered[block] += 1;
                }
            }
            prop_assert!(covered.iter().all(|&c| c == 1));
        }
    }
}
