//! Whole-file SHA-1 digest

use sha1::{Digest, Sha1};
use std::fmt;
use std::io::Read;
use std::str::FromStr;

use crate::error::{ChecksumError, Result};

/// SHA-1 of a complete file.
///
/// Displayed as 40 uppercase hex characters, the form control files use.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sha1Digest([u8; 20]);

impl Sha1Digest {
    /// Create digest from raw bytes
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Hash an in-memory buffer
    pub fn from_data(data: &[u8]) -> Self {
        let mut hasher = Sha1Hasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Hash everything a reader yields
    pub fn from_reader<R: Read>(mut reader: R) -> std::io::Result<Self> {
        let mut hasher = Sha1Hasher::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    }

    /// Parse a 40 character hex digest, any case
    pub fn from_hex(hex: &str) -> Result<Self> {
        let hex = hex.trim();
        if hex.len() != 40 {
            return Err(ChecksumError::InvalidSha1(hex.to_string()));
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(hex, &mut bytes)?;
        Ok(Self(bytes))
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Uppercase hex form
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }
}

impl FromStr for Sha1Digest {
    type Err = ChecksumError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Display for Sha1Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Sha1Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha1Digest({})", self.to_hex())
    }
}

/// Incremental SHA-1 hasher
#[derive(Default, Clone)]
pub struct Sha1Hasher {
    inner: Sha1,
}

impl Sha1Hasher {
    /// Start a new digest
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more data
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finish and return the digest
    pub fn finalize(self) -> Sha1Digest {
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&self.inner.finalize());
        Sha1Digest(bytes)
    }
}
