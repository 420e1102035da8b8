//! Chunk splitter - partitions a byte range into fixed-size numbered parts

use crate::error::{TransferError, TransferResult};
use crate::types::ByteRange;

/// Number of parts a file of `size` bytes needs. An empty file still needs one.
pub fn part_count(size: u64, chunk_size: u64) -> u64 {
    if size == 0 {
        1
    } else {
        size.div_ceil(chunk_size)
    }
}

/// Split `[0, size)` into contiguous ranges of at most `chunk_size` bytes.
///
/// Index `i` of the result is part number `i + 1`. A zero-byte file yields a
/// single empty range; a size that is an exact multiple of `chunk_size` never
/// yields a trailing empty range.
pub fn split(size: u64, chunk_size: u64) -> TransferResult<Vec<ByteRange>> {
    if chunk_size == 0 {
        return Err(TransferError::Config("chunk size must be positive".into()));
    }

    let total_parts = part_count(size, chunk_size);
    let ranges = (0..total_parts)
        .map(|i| {
            let start = i * chunk_size;
            let end = std::cmp::min(start + chunk_size, size);
            ByteRange { start, end }
        })
        .collect();

    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn assert_covers(size: u64, chunk: u64) {
        let ranges = split(size, chunk).unwrap();
        assert_eq!(ranges.len() as u64, part_count(size, chunk));
        assert_eq!(ranges.first().unwrap().start, 0);
        assert_eq!(ranges.last().unwrap().end, size);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start, "ranges must be contiguous");
        }
        for r in &ranges {
            assert!(r.len() <= chunk);
            if size > 0 {
                assert!(!r.is_empty(), "only an empty file may produce an empty chunk");
            }
        }
        let total: u64 = ranges.iter().map(ByteRange::len).sum();
        assert_eq!(total, size);
    }

    #[test]
    fn twelve_mib_in_five_mib_chunks() {
        let ranges = split(12 * MIB, 5 * MIB).unwrap();
        assert_eq!(
            ranges,
            vec![
                ByteRange { start: 0, end: 5 * MIB },
                ByteRange { start: 5 * MIB, end: 10 * MIB },
                ByteRange { start: 10 * MIB, end: 12 * MIB },
            ]
        );
    }

    #[test]
    fn empty_file_is_one_empty_chunk() {
        let ranges = split(0, 5 * MIB).unwrap();
        assert_eq!(ranges, vec![ByteRange { start: 0, end: 0 }]);
    }

    #[test]
    fn exact_multiple_has_no_trailing_chunk() {
        let ranges = split(10 * MIB, 5 * MIB).unwrap();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[1].end, 10 * MIB);
    }

    #[test]
    fn coverage_holds_across_sizes() {
        for chunk in [1, 3, 7, 64] {
            for size in 0..200 {
                assert_covers(size, chunk);
            }
        }
        assert_covers(5 * MIB + 1, 5 * MIB);
        assert_covers(5 * MIB - 1, 5 * MIB);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        assert!(split(10, 0).is_err());
    }
}
