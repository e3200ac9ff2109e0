//! Byte ranges for fixed-size parts
//!
//! Every part but the last covers exactly `part_size` bytes; the last one is
//! clamped to the final byte of the stream.

use tundra_core::ByteRange;

/// Inclusive range of the part starting at `start` in a stream of `total` bytes.
///
/// `part_size` must be non-zero and `total` at least 1; callers advance
/// `start` by `part_size` between calls.
pub fn range(start: u64, part_size: u64, total: u64) -> ByteRange {
    let end = start.saturating_add(part_size).saturating_sub(1);
    let end = if end >= total { total - 1 } else { end };
    ByteRange {
        start,
        end,
        total: Some(total),
    }
}

/// Number of parts needed to cover `total` bytes: `ceil(total / part_size)`
pub fn part_count(total: u64, part_size: u64) -> u64 {
    total.div_ceil(part_size)
}

/// Ranges covering `[0, total)` in increasing offset order
pub fn part_ranges(total: u64, part_size: u64) -> PartRanges {
    PartRanges {
        next_start: 0,
        part_size,
        total,
    }
}

#[derive(Debug, Clone)]
pub struct PartRanges {
    next_start: u64,
    part_size: u64,
    total: u64,
}

impl Iterator for PartRanges {
    type Item = ByteRange;

    fn next(&mut self) -> Option<ByteRange> {
        if self.next_start >= self.total || self.part_size == 0 {
            return None;
        }
        let r = range(self.next_start, self.part_size, self.total);
        self.next_start = r.end + 1;
        Some(r)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.part_size == 0 {
            return (0, Some(0));
        }
        let remaining = part_count(self.total.saturating_sub(self.next_start), self.part_size);
        let n = usize::try_from(remaining).unwrap_or(usize::MAX);
        (n, Some(n))
    }
}
