//! Error types for protocol operations

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use zsync_core::MatchError;
use zsync_formats::{ControlFileError, UpdateInfoError};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Control file error: {0}")]
    ControlFile(#[from] ControlFileError),

    #[error("Update information error: {0}")]
    UpdateInfo(#[from] UpdateInfoError),

    #[error("Matcher error: {0}")]
    Match(#[from] MatchError),

    #[error("Rate limited")]
    RateLimited {
        /// Duration from the HTTP Retry-After header, if present
        retry_after: Option<Duration>,
    },

    #[error("No release asset matches {0}")]
    AssetNotFound(String),

    #[error("HTTP status: {0}")]
    HttpStatus(StatusCode),

    #[error("Server error: {0}")]
    ServerError(StatusCode),

    #[error("Invalid range response: {0}")]
    InvalidRangeResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Gave up on {range} after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Range that kept failing
        range: String,
        /// Attempts made
        attempts: u32,
        /// Last error seen
        last: String,
    },

    #[error("Canceled")]
    Canceled,

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Stable classification of failures reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad control file, bad parameters, unusable output directory
    Configuration,
    /// Network, HTTP status or provider failures
    Transport,
    /// Checksum or whole-file hash mismatch
    Integrity,
    /// Seed or target file access failures
    Resource,
    /// Requested by the user
    Canceled,
}

impl ProtocolError {
    /// Check if error is retryable
    pub fn should_retry(&self) -> bool {
        match self {
            // Transient errors that should be retried
            Self::Network(_)
            | Self::ServerError(_)
            | Self::RateLimited { .. }
            | Self::Timeout
            | Self::InvalidRangeResponse(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            Self::HttpStatus(status) => {
                matches!(
                    status,
                    &StatusCode::TOO_MANY_REQUESTS
                        | &StatusCode::INTERNAL_SERVER_ERROR
                        | &StatusCode::BAD_GATEWAY
                        | &StatusCode::SERVICE_UNAVAILABLE
                        | &StatusCode::GATEWAY_TIMEOUT
                )
            }
            _ => false,
        }
    }

    /// Get the Retry-After hint duration, if this is a rate-limited error with one.
    pub fn retry_after_hint(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Map onto the caller-facing error taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ControlFile(_) | Self::UpdateInfo(_) | Self::Parse(_) => ErrorKind::Configuration,
            Self::Match(e) => match e {
                MatchError::HashTableAllocation { .. }
                | MatchError::RangeOutOfBounds { .. }
                | MatchError::TargetPermissionDenied(_)
                | MatchError::CannotOpenTarget { .. } => ErrorKind::Configuration,
                MatchError::ChecksumMismatch { .. } | MatchError::Sha1Mismatch { .. } => {
                    ErrorKind::Integrity
                }
                MatchError::SourceNotFound(_)
                | MatchError::SourcePermissionDenied(_)
                | MatchError::CannotOpenSource { .. }
                | MatchError::Io(_) => ErrorKind::Resource,
                MatchError::Canceled => ErrorKind::Canceled,
            },
            Self::Canceled => ErrorKind::Canceled,
            Self::Join(_) => ErrorKind::Resource,
            Self::Network(_)
            | Self::Http(_)
            | Self::RateLimited { .. }
            | Self::AssetNotFound(_)
            | Self::HttpStatus(_)
            | Self::ServerError(_)
            | Self::InvalidRangeResponse(_)
            | Self::Timeout
            | Self::RetriesExhausted { .. } => ErrorKind::Transport,
        }
    }

    /// True for a user cancellation, wherever it surfaced
    pub fn is_canceled(&self) -> bool {
        self.kind() == ErrorKind::Canceled
    }

    /// Map a non-success response status onto an error
    pub(crate) fn from_status(status: StatusCode) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS {
            Self::RateLimited { retry_after: None }
        } else if status.is_server_error() {
            Self::ServerError(status)
        } else {
            Self::HttpStatus(status)
        }
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
