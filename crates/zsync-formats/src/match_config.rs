//! Matching configuration derived from a control file

use chrono::{DateTime, FixedOffset};
use url::Url;
use zsync_checksums::{Rsum, Sha1Digest};

use crate::control_file::{BlockChecksum, ControlFile, HashLengths};
use crate::error::{ControlFileError, Result};

/// Everything the block matcher needs to know about the target.
///
/// Built once from a parsed control file and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchConfig {
    /// Block size in bytes (power of two)
    pub block_size: u32,
    /// Number of blocks including a trailing partial block
    pub block_count: usize,
    /// Checksum sizing and consecutive-match requirement
    pub hash_lengths: HashLengths,
    /// Exact target length
    pub target_length: u64,
    /// Expected SHA-1 of the finished target
    pub target_sha1: Sha1Digest,
    /// Absolute URL of the target
    pub target_url: Url,
    /// Stored checksums, one per block
    pub checksums: Vec<BlockChecksum>,
}

/// Descriptive metadata about the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    /// Target file name
    pub filename: String,
    /// Target modification time
    pub mtime: DateTime<FixedOffset>,
    /// Target length in bytes
    pub length: u64,
    /// Expected SHA-1
    pub sha1: Sha1Digest,
    /// Absolute target URL
    pub url: Url,
    /// Version of the tool that produced the control file
    pub generator_version: String,
}

impl MatchConfig {
    /// Split a control file into matching configuration and target metadata.
    ///
    /// A relative `URL:` value is joined onto `control_url`; without a
    /// control URL a relative target is rejected.
    pub fn from_control_file(
        control: ControlFile,
        control_url: Option<&Url>,
    ) -> Result<(Self, TargetDescriptor)> {
        let header = control.header;
        let target_url = resolve_target_url(&header.url, control_url)?;
        let block_count = usize::try_from(header.block_count())
            .map_err(|_| ControlFileError::InvalidLength(header.length.to_string()))?;

        let config = Self {
            block_size: header.block_size,
            block_count,
            hash_lengths: header.hash_lengths,
            target_length: header.length,
            target_sha1: header.sha1,
            target_url: target_url.clone(),
            checksums: control.checksums.into_entries(),
        };

        let descriptor = TargetDescriptor {
            filename: header.filename,
            mtime: header.mtime,
            length: header.length,
            sha1: header.sha1,
            url: target_url,
            generator_version: header.version,
        };

        Ok((config, descriptor))
    }

    /// `log2(block_size)`
    pub fn block_shift(&self) -> u32 {
        self.block_size.trailing_zeros()
    }

    /// Consecutive matches required (1 or 2)
    pub fn seq_matches(&self) -> usize {
        usize::from(self.hash_lengths.seq_matches)
    }

    /// Wire-form mask applied to weak checksums
    pub fn weak_mask(&self) -> u32 {
        Rsum::weak_mask(usize::from(self.hash_lengths.weak_bytes))
    }

    /// Byte offset of a block
    pub fn block_offset(&self, block: usize) -> u64 {
        (block as u64) << self.block_shift()
    }

    /// Length of a block, shorter for the final partial block
    pub fn block_len(&self, block: usize) -> u64 {
        let start = self.block_offset(block);
        (self.target_length.saturating_sub(start)).min(u64::from(self.block_size))
    }
}

fn resolve_target_url(raw: &str, control_url: Option<&Url>) -> Result<Url> {
    match Url::parse(raw) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => control_url
            .and_then(|base| base.join(raw).ok())
            .ok_or_else(|| ControlFileError::InvalidUrl(raw.to_string())),
        Err(_) => Err(ControlFileError::InvalidUrl(raw.to_string())),
    }
}
