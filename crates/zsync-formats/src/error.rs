//! Error types for zsync format parsing

use thiserror::Error;

/// Errors raised while parsing or building a control file
///
/// Every header field has its own variant so callers can tell exactly which
/// line of a malformed control file was rejected.
#[derive(Debug, Error)]
pub enum ControlFileError {
    /// No blank line separating the header from the checksum table
    #[error("No header/checksum marker found in control file")]
    MarkerNotFound,

    /// Header carries fewer lines than required
    #[error("Invalid number of header lines: expected at least {expected}, found {found}")]
    InvalidHeaderCount {
        /// Minimum number of header lines
        expected: usize,
        /// Lines actually present
        found: usize,
    },

    /// Header is not valid UTF-8
    #[error("Control file header is not valid UTF-8")]
    InvalidEncoding,

    /// `zsync:` line missing or empty
    #[error("Invalid zsync version line: {0:?}")]
    InvalidVersion(String),

    /// `Filename:` line missing or empty
    #[error("Invalid target filename line: {0:?}")]
    InvalidFilename(String),

    /// `MTime:` line missing or not an RFC 2822 date
    #[error("Invalid MTime line: {0:?}")]
    InvalidMtime(String),

    /// `Blocksize:` line missing, below 1024 or not a power of two
    #[error("Invalid block size line: {0:?}")]
    InvalidBlockSize(String),

    /// `Length:` line missing, unparsable or zero
    #[error("Invalid target length line: {0:?}")]
    InvalidLength(String),

    /// `Hash-Lengths:` line missing or not three comma separated integers
    #[error("Invalid Hash-Lengths line: {0:?}")]
    InvalidHashLengthLine(String),

    /// Hash lengths outside their permitted ranges
    #[error(
        "Invalid hash lengths: seq_matches={seq_matches} (1..=2), weak={weak_bytes} (1..=4), strong={strong_bytes} (3..=16)"
    )]
    InvalidHashLengths {
        /// Consecutive matches required
        seq_matches: u32,
        /// Weak checksum bytes
        weak_bytes: u32,
        /// Strong checksum bytes
        strong_bytes: u32,
    },

    /// `URL:` line missing or empty
    #[error("Invalid target URL line: {0:?}")]
    InvalidUrl(String),

    /// `SHA-1:` line missing or not a 40 character hex digest
    #[error("Invalid SHA-1 line: {0:?}")]
    InvalidSha1(String),

    /// Checksum table shorter than the header promises
    #[error("Checksum table truncated: expected {expected} bytes, found {actual}")]
    TruncatedChecksumTable {
        /// Bytes required for all blocks
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Builder was asked for an impossible configuration
    #[error("Invalid builder parameters: {0}")]
    InvalidParameters(String),
}

/// Errors raised while parsing an update information string
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UpdateInfoError {
    /// Empty input
    #[error("Update information is empty")]
    Empty,

    /// Transport prefix not recognized
    #[error("Unsupported update transport: {0}")]
    UnsupportedTransport(String),

    /// Wrong number of `|` separated fields for the transport
    #[error("Transport {transport} expects {expected} fields, found {found}")]
    InvalidFieldCount {
        /// Transport prefix
        transport: String,
        /// Required number of fields after the prefix
        expected: usize,
        /// Fields present
        found: usize,
    },

    /// One of the fields is empty
    #[error("Empty field {0} in update information")]
    EmptyField(&'static str),
}

/// Result type for control file operations
pub type Result<T> = std::result::Result<T, ControlFileError>;
