//! Binary per-block checksum table

use zsync_checksums::{Rsum, StrongChecksum};

use super::header::HashLengths;
use crate::error::{ControlFileError, Result};

/// Stored checksums for one target block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockChecksum {
    /// Weak checksum, `a` already masked to the stored width
    pub weak: Rsum,
    /// Strong checksum prefix
    pub strong: StrongChecksum,
}

/// Checksum records for every block of the target, in block order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumTable {
    entries: Vec<BlockChecksum>,
}

impl ChecksumTable {
    /// Parse `block_count` records from `data`.
    ///
    /// Each record is the last `weak_bytes` bytes of the big-endian weak
    /// checksum followed by `strong_bytes` bytes of MD4. Trailing bytes after
    /// the last record are ignored.
    pub fn parse(data: &[u8], block_count: usize, lengths: HashLengths) -> Result<Self> {
        let record = lengths.record_size();
        let weak_len = usize::from(lengths.weak_bytes);
        let expected = record * block_count;
        if data.len() < expected {
            return Err(ControlFileError::TruncatedChecksumTable {
                expected,
                actual: data.len(),
            });
        }

        let mask = lengths.weak_mask();
        let mut entries = Vec::with_capacity(block_count);
        for chunk in data[..expected].chunks_exact(record) {
            let weak = Rsum::from_be_tail(&chunk[..weak_len]).masked(mask);
            let strong = StrongChecksum::from_slice(&chunk[weak_len..]).map_err(|_| {
                ControlFileError::InvalidHashLengths {
                    seq_matches: u32::from(lengths.seq_matches),
                    weak_bytes: u32::from(lengths.weak_bytes),
                    strong_bytes: u32::from(lengths.strong_bytes),
                }
            })?;
            entries.push(BlockChecksum { weak, strong });
        }

        Ok(Self { entries })
    }

    /// Build a table from already computed checksums
    pub fn from_entries(entries: Vec<BlockChecksum>) -> Self {
        Self { entries }
    }

    /// Serialize records truncated to `lengths`
    pub fn build(&self, lengths: HashLengths) -> Vec<u8> {
        let weak_len = usize::from(lengths.weak_bytes);
        let strong_len = usize::from(lengths.strong_bytes);
        let mut out = Vec::with_capacity(self.entries.len() * lengths.record_size());

        for entry in &self.entries {
            let weak = entry.weak.to_be_bytes();
            out.extend_from_slice(&weak[Rsum::SIZE - weak_len..]);
            let strong = entry.strong.as_bytes();
            out.extend_from_slice(&strong[..strong_len.min(strong.len())]);
        }

        out
    }

    /// All records
    pub fn entries(&self) -> &[BlockChecksum] {
        &self.entries
    }

    /// Consume the table
    pub fn into_entries(self) -> Vec<BlockChecksum> {
        self.entries
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the table has no records
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
