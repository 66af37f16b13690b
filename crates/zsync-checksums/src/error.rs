//! Error types for checksum operations

use thiserror::Error;

/// Errors that can occur while building or parsing checksums
#[derive(Debug, Error)]
pub enum ChecksumError {
    /// Strong checksum length outside the supported range
    #[error("Invalid strong checksum length: {0} (expected 1..=16)")]
    InvalidStrongLength(usize),

    /// SHA-1 digest was not 40 hex characters
    #[error("Invalid SHA-1 digest: {0}")]
    InvalidSha1(String),

    /// Hex decoding failed
    #[error("Hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Result type for checksum operations
pub type Result<T> = std::result::Result<T, ChecksumError>;
