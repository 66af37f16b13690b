//! Truncated MD4 strong checksum

use md4::{Digest, Md4};
use std::fmt;

use crate::error::{ChecksumError, Result};

/// Length of a full MD4 digest.
pub const MAX_STRONG_LEN: usize = 16;

/// Strong checksum of one block, truncated to the length the control file
/// declares.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrongChecksum {
    bytes: [u8; MAX_STRONG_LEN],
    len: u8,
}

impl StrongChecksum {
    /// Compute the full 16-byte MD4 of `data`.
    pub fn compute(data: &[u8]) -> Self {
        let digest = Md4::digest(data);
        let mut bytes = [0u8; MAX_STRONG_LEN];
        bytes.copy_from_slice(&digest);
        Self {
            bytes,
            len: MAX_STRONG_LEN as u8,
        }
    }

    /// Compute MD4 of `data` zero-padded to `block_size` bytes.
    ///
    /// The last block of a target is usually short; its stored checksum
    /// covers the block padded with zeros.
    pub fn compute_padded(data: &[u8], block_size: usize) -> Self {
        if data.len() >= block_size {
            return Self::compute(&data[..block_size]);
        }

        let mut hasher = Md4::new();
        hasher.update(data);
        hasher.update(vec![0u8; block_size - data.len()]);
        let digest = hasher.finalize();
        let mut bytes = [0u8; MAX_STRONG_LEN];
        bytes.copy_from_slice(&digest);
        Self {
            bytes,
            len: MAX_STRONG_LEN as u8,
        }
    }

    /// Build a stored checksum from its (possibly truncated) raw bytes.
    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        if raw.is_empty() || raw.len() > MAX_STRONG_LEN {
            return Err(ChecksumError::InvalidStrongLength(raw.len()));
        }
        let mut bytes = [0u8; MAX_STRONG_LEN];
        bytes[..raw.len()].copy_from_slice(raw);
        Ok(Self {
            bytes,
            len: raw.len() as u8,
        })
    }

    /// Keep only the first `len` bytes.
    #[must_use]
    pub fn truncated(mut self, len: usize) -> Self {
        let len = len.clamp(1, MAX_STRONG_LEN);
        self.bytes[len..].fill(0);
        self.len = len as u8;
        self
    }

    /// The significant bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..usize::from(self.len)]
    }

    /// Number of significant bytes.
    pub fn len(&self) -> usize {
        usize::from(self.len)
    }

    /// Always false; a strong checksum carries at least one byte.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Compare the leading bytes of `self` against a stored prefix.
    ///
    /// Only as many bytes as `stored` carries take part.
    pub fn matches_prefix(&self, stored: &Self) -> bool {
        let n = stored.len().min(self.len());
        self.bytes[..n] == stored.bytes[..n]
    }
}

impl fmt::Debug for StrongChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StrongChecksum({})", hex::encode(self.as_bytes()))
    }
}

impl fmt::Display for StrongChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.as_bytes()))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_md4_vectors() {
        // RFC 1320 test suite
        assert_eq!(
            StrongChecksum::compute(b"").to_string(),
            "31d6cfe0d16ae931b73c59d7e0c089c0"
        );
        assert_eq!(
            StrongChecksum::compute(b"abc").to_string(),
            "a448017aaf21d8525fc10ae87aa6729d"
        );
    }

    #[test]
    fn test_truncated_prefix_match() {
        let full = StrongChecksum::compute(b"block data");
        let stored = StrongChecksum::from_slice(&full.as_bytes()[..5]).expect("valid length");
        assert_eq!(stored.len(), 5);
        assert!(full.matches_prefix(&stored));
        assert_eq!(full.truncated(5), stored);

        let other = StrongChecksum::compute(b"other data");
        assert!(!other.matches_prefix(&stored));
    }

    #[test]
    fn test_padded_equals_explicit_padding() {
        let short = b"tail of the file";
        let mut padded = short.to_vec();
        padded.resize(1024, 0);
        assert_eq!(
            StrongChecksum::compute_padded(short, 1024),
            StrongChecksum::compute(&padded)
        );
    }

    #[test]
    fn test_invalid_lengths() {
        assert!(StrongChecksum::from_slice(&[]).is_err());
        assert!(StrongChecksum::from_slice(&[0u8; 17]).is_err());
    }
}
