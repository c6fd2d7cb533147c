//! Chunk planning.
//!
//! Every file is split into exactly six contiguous spans. The split is
//! pure arithmetic over the declared size, so the upload and download
//! coordinators always agree on the same boundaries.

use displaydoc::Display;

/// Number of chunks every file is split into.
pub const CHUNK_COUNT: usize = 6;

/// Maximum accepted file size: 10 GiB.
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024 * 1024;

/// A planning error.
#[derive(Debug, Display, PartialEq, Eq)]
pub enum PlanError {
    /// The file is empty.
    Empty,

    /// {size} bytes exceeds the maximum file size of {max} bytes.
    TooLarge { size: u64, max: u64 },
}

impl std::error::Error for PlanError {}

/// One contiguous byte span of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    /// Position within the file, 0 through 5.
    pub index: u32,

    /// Offset of the first byte.
    pub offset: u64,

    /// Length in bytes. May be zero for files smaller than six bytes.
    pub size: u64,
}

/// The six-way split of a file.
///
/// The base span size is `total / 6`; the first `total % 6` spans get
/// one extra byte. All spans are within one byte of each other and
/// their sizes sum to the total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    spans: [ChunkSpan; CHUNK_COUNT],
    total: u64,
}

impl ChunkPlan {
    pub fn for_size(total: u64) -> Result<Self, PlanError> {
        if total == 0 {
            return Err(PlanError::Empty);
        }

        if total > MAX_FILE_SIZE {
            return Err(PlanError::TooLarge {
                size: total,
                max: MAX_FILE_SIZE,
            });
        }

        let base = total / CHUNK_COUNT as u64;
        let remainder = total % CHUNK_COUNT as u64;

        let mut spans = [ChunkSpan {
            index: 0,
            offset: 0,
            size: 0,
        }; CHUNK_COUNT];
        let mut offset = 0;

        for (index, span) in spans.iter_mut().enumerate() {
            let size = if (index as u64) < remainder {
                base + 1
            } else {
                base
            };

            *span = ChunkSpan {
                index: index as u32,
                offset,
                size,
            };
            offset += size;
        }

        Ok(Self { spans, total })
    }

    pub fn spans(&self) -> &[ChunkSpan] {
        &self.spans
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(plan: &ChunkPlan) -> Vec<u64> {
        plan.spans().iter().map(|s| s.size).collect()
    }

    /// Spans are contiguous, non-overlapping, within one byte of each
    /// other and sum to the total.
    fn assert_partition(total: u64) {
        let plan = ChunkPlan::for_size(total).unwrap();
        let spans = plan.spans();

        assert_eq!(spans.len(), CHUNK_COUNT);
        assert_eq!(spans.iter().map(|s| s.size).sum::<u64>(), total);

        let mut expected_offset = 0;
        for span in spans {
            assert_eq!(span.offset, expected_offset);
            expected_offset += span.size;
        }

        let min = spans.iter().map(|s| s.size).min().unwrap();
        let max = spans.iter().map(|s| s.size).max().unwrap();
        assert!(max - min <= 1);
    }

    #[test]
    fn test_partition_invariants() {
        for total in [1, 2, 5, 6, 7, 100, 999, 1_000_003, 64 * 1024 * 1024 + 3] {
            assert_partition(total);
        }
        assert_partition(MAX_FILE_SIZE);
    }

    #[test]
    fn test_remainder_goes_to_leading_spans() {
        // 1 000 003 = 166 667 * 6 + 1: only the first span grows.
        let plan = ChunkPlan::for_size(1_000_003).unwrap();
        assert_eq!(
            sizes(&plan),
            vec![166_668, 166_667, 166_667, 166_667, 166_667, 166_667]
        );
    }

    #[test]
    fn test_exact_six_way_split() {
        // 6 GiB splits into six spans of exactly 1 GiB.
        let plan = ChunkPlan::for_size(6_442_450_944).unwrap();
        assert_eq!(sizes(&plan), vec![1_073_741_824; 6]);
    }

    #[test]
    fn test_small_files_have_empty_spans() {
        let plan = ChunkPlan::for_size(2).unwrap();
        assert_eq!(sizes(&plan), vec![1, 1, 0, 0, 0, 0]);
    }

    #[test]
    fn test_rejects_empty() {
        assert_eq!(ChunkPlan::for_size(0), Err(PlanError::Empty));
    }

    #[test]
    fn test_rejects_oversize() {
        assert_eq!(
            ChunkPlan::for_size(MAX_FILE_SIZE + 1),
            Err(PlanError::TooLarge {
                size: MAX_FILE_SIZE + 1,
                max: MAX_FILE_SIZE,
            })
        );
    }
}
