//! Control file builder

use chrono::{DateTime, FixedOffset, Utc};
use zsync_checksums::{Rsum, Sha1Digest, StrongChecksum};

use super::header::{ControlFileHeader, HashLengths, MIN_BLOCK_SIZE};
use super::table::{BlockChecksum, ChecksumTable};
use crate::error::{ControlFileError, Result};

/// Version string written into built control files
pub const BUILDER_VERSION: &str = "0.6.2";

/// Produces a control file describing some target bytes.
///
/// The last block is checksummed as if zero-padded to a full block.
#[derive(Debug, Clone)]
pub struct ControlFileBuilder {
    filename: String,
    url: String,
    block_size: u32,
    hash_lengths: HashLengths,
    mtime: Option<DateTime<FixedOffset>>,
}

impl ControlFileBuilder {
    /// Start a builder for a target with the given file name and URL
    pub fn new(filename: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            url: url.into(),
            block_size: 4096,
            hash_lengths: HashLengths::default(),
            mtime: None,
        }
    }

    /// Set the block size (power of two, at least 1024)
    pub fn block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set consecutive matches and stored checksum widths
    pub fn hash_lengths(mut self, hash_lengths: HashLengths) -> Self {
        self.hash_lengths = hash_lengths;
        self
    }

    /// Set the modification time; defaults to now
    pub fn mtime(mut self, mtime: DateTime<FixedOffset>) -> Self {
        self.mtime = Some(mtime);
        self
    }

    /// Compute header and checksum table for `target`
    pub fn build_parts(&self, target: &[u8]) -> Result<(ControlFileHeader, ChecksumTable)> {
        if self.block_size < MIN_BLOCK_SIZE || !self.block_size.is_power_of_two() {
            return Err(ControlFileError::InvalidParameters(format!(
                "block size {} must be a power of two >= {MIN_BLOCK_SIZE}",
                self.block_size
            )));
        }
        if target.is_empty() {
            return Err(ControlFileError::InvalidParameters(
                "target must not be empty".to_string(),
            ));
        }

        let block_size = self.block_size as usize;
        let mask = self.hash_lengths.weak_mask();
        let strong_len = usize::from(self.hash_lengths.strong_bytes);

        let entries = target
            .chunks(block_size)
            .map(|chunk| {
                let weak = if chunk.len() == block_size {
                    Rsum::of_block(chunk)
                } else {
                    let mut padded = chunk.to_vec();
                    padded.resize(block_size, 0);
                    Rsum::of_block(&padded)
                };
                BlockChecksum {
                    weak: weak.masked(mask),
                    strong: StrongChecksum::compute_padded(chunk, block_size).truncated(strong_len),
                }
            })
            .collect();

        let header = ControlFileHeader {
            version: BUILDER_VERSION.to_string(),
            filename: self.filename.clone(),
            mtime: self.mtime.unwrap_or_else(|| Utc::now().fixed_offset()),
            block_size: self.block_size,
            length: target.len() as u64,
            hash_lengths: self.hash_lengths,
            url: self.url.clone(),
            sha1: Sha1Digest::from_data(target),
        };

        Ok((header, ChecksumTable::from_entries(entries)))
    }

    /// Build the complete control file bytes for `target`
    pub fn build(&self, target: &[u8]) -> Result<Vec<u8>> {
        let (header, table) = self.build_parts(target)?;
        let mut out = header.build();
        out.extend_from_slice(&table.build(self.hash_lengths));
        Ok(out)
    }
}
