//! Session events delivered to the presentation layer

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use zsync_checksums::Sha1Digest;

use crate::error::ErrorKind;

/// Phase of an update session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, not started
    Idle,
    /// Locating and downloading the control file
    Resolving,
    /// Comparing the seed against the control file
    CheckingForUpdate,
    /// Asking the target host about range support
    Probing,
    /// Scanning local seeds for reusable blocks
    Scanning,
    /// Fetching missing ranges
    Downloading,
    /// Hashing and moving the target into place
    Finalizing,
    /// Target in place
    Finished,
    /// Stopped on request
    Canceled,
    /// Stopped by an error
    Failed,
}

impl SessionState {
    /// True once the session can make no further progress
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Canceled | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Resolving => "resolving",
            Self::CheckingForUpdate => "checking for update",
            Self::Probing => "probing",
            Self::Scanning => "scanning",
            Self::Downloading => "downloading",
            Self::Finalizing => "finalizing",
            Self::Finished => "finished",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Overall transfer progress
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// `bytes_received / bytes_total` as a percentage
    pub percent: f64,
    /// Target bytes present, from seeds or the network
    pub bytes_received: u64,
    /// Target length
    pub bytes_total: u64,
    /// Network throughput since the download phase began
    pub speed_bytes_per_sec: f64,
}

impl Progress {
    /// Build a progress report, clamping `received` to `total`
    pub fn new(received: u64, total: u64, speed_bytes_per_sec: f64) -> Self {
        let received = received.min(total);
        #[allow(clippy::cast_precision_loss)]
        let percent = if total == 0 {
            100.0
        } else {
            received as f64 * 100.0 / total as f64
        };
        Self {
            percent,
            bytes_received: received,
            bytes_total: total,
            speed_bytes_per_sec,
        }
    }
}

/// Notification from a running session.
///
/// Exactly one of [`Canceled`](Self::Canceled), [`Error`](Self::Error) and
/// [`Finished`](Self::Finished) is sent per run, always last.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateEvent {
    /// The run began
    Started,
    /// The session moved to a new phase
    StateChanged(SessionState),
    /// Transfer progress
    Progress(Progress),
    /// The run was canceled
    Canceled,
    /// The run failed
    Error {
        /// Stable classification
        kind: ErrorKind,
        /// Human readable description
        message: String,
    },
    /// The target is in place
    Finished {
        /// Final location
        path: PathBuf,
        /// Verified SHA-1
        sha1: Sha1Digest,
        /// The seed already matched and nothing was downloaded
        up_to_date: bool,
    },
}

impl UpdateEvent {
    /// True for the closing event of a run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Canceled | Self::Error { .. } | Self::Finished { .. }
        )
    }
}
