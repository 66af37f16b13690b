//! Error types for block matching

use std::path::PathBuf;
use thiserror::Error;
use zsync_checksums::Sha1Digest;

/// Errors raised by the block matcher and the scratch target file
#[derive(Debug, Error)]
pub enum MatchError {
    /// Memory for the block hash table could not be reserved
    #[error("Cannot allocate block hash table for {blocks} blocks")]
    HashTableAllocation {
        /// Number of blocks the table was sized for
        blocks: usize,
    },

    /// The first block of a submitted range failed strong checksum verification
    #[error("Strong checksum mismatch at block {block}")]
    ChecksumMismatch {
        /// Block that failed
        block: usize,
    },

    /// A submitted byte range does not describe whole target blocks
    #[error("Byte range {start}..{end} is not block aligned within the target (length {length})")]
    RangeOutOfBounds {
        /// Range start
        start: u64,
        /// Range end (exclusive)
        end: u64,
        /// Target length
        length: u64,
    },

    /// Seed file does not exist
    #[error("Seed file not found: {0}")]
    SourceNotFound(PathBuf),

    /// Seed file exists but is not readable
    #[error("No permission to read seed file: {0}")]
    SourcePermissionDenied(PathBuf),

    /// Seed file could not be opened for another reason
    #[error("Cannot open seed file {path}: {source}")]
    CannotOpenSource {
        /// Seed path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Output directory is not writable
    #[error("No permission to write target file in {0}")]
    TargetPermissionDenied(PathBuf),

    /// Scratch target file could not be created
    #[error("Cannot create target file in {path}: {source}")]
    CannotOpenTarget {
        /// Output directory
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Reconstructed file does not hash to the advertised SHA-1
    #[error("SHA-1 mismatch: expected {expected}, got {actual} (kept at {retained:?})")]
    Sha1Mismatch {
        /// Digest from the control file
        expected: Sha1Digest,
        /// Digest of the reconstructed file
        actual: Sha1Digest,
        /// Location of the reconstructed file
        retained: PathBuf,
    },

    /// Scan interrupted by a cancellation request
    #[error("Scan canceled")]
    Canceled,

    /// I/O failure on seed or target
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for matcher operations
pub type Result<T> = std::result::Result<T, MatchError>;
