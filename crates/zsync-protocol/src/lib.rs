//! # zsync-protocol - Network side of zsync delta updates
//!
//! This crate connects the block matcher in `zsync-core` to HTTP: it finds
//! and downloads control files, decides whether the target host serves
//! partial content, fetches the missing byte ranges concurrently and runs
//! the whole update as a cancellable session.
//!
//! ## Architecture Overview
//!
//! 1. **Control files** ([`ControlFileClient`]): resolves update
//!    information (direct URL, GitHub release asset, legacy
//!    `_latestVersion` redirect), streams and parses the control file and
//!    probes the target for range support
//! 2. **Range downloads** ([`RangeOrchestrator`]): bounded concurrent range
//!    requests with retry, integrity re-requests and cooperative cancel,
//!    falling back to one sequential download when ranges are unsupported
//! 3. **Sessions** ([`DeltaSession`]): the configure → scan → download →
//!    verify → finalize state machine, reporting [`UpdateEvent`]s
//!
//! ## Configuration
//!
//! Every config struct has a `Default` and a `from_env()` constructor
//! reading `ZSYNC_*` variables, for example `ZSYNC_MAX_CONCURRENT`,
//! `ZSYNC_MAX_RETRIES`, `ZSYNC_PROXY` and `ZSYNC_OUTPUT_DIR`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use zsync_protocol::{DeltaSession, SessionConfig, UpdateEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let info = "gh-releases-zsync|owner|app|latest|app-*-x86_64.AppImage.zsync".parse()?;
//!     let session = DeltaSession::new(info, "/opt/app.AppImage", SessionConfig::from_env()?)?;
//!
//!     let mut handle = session.spawn();
//!     while let Some(event) = handle.next_event().await {
//!         match event {
//!             UpdateEvent::Progress(p) => println!("{:.1}%", p.percent),
//!             UpdateEvent::Finished { path, .. } => println!("updated: {}", path.display()),
//!             UpdateEvent::Error { message, .. } => eprintln!("failed: {message}"),
//!             _ => {}
//!         }
//!     }
//!     handle.wait().await?;
//!     Ok(())
//! }
//! ```

#![allow(clippy::cast_possible_truncation)] // Range lengths are bounded by the target length

pub mod config;
pub mod control_file;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod retry;
pub mod session;
pub mod transport;

pub use config::{OrchestratorConfig, ProviderEndpoints, SessionConfig};
pub use control_file::{ControlFileClient, FetchedControlFile, RangeProbe};
pub use error::{ErrorKind, ProtocolError, Result};
pub use events::{Progress, SessionState, UpdateEvent};
pub use orchestrator::{FetchReport, PendingRange, RangeOrchestrator, RangeStatus};
pub use retry::RetryPolicy;
pub use session::{DeltaSession, SessionOutcome, UpdateCheck, UpdateHandle};
pub use transport::{HttpClient, HttpConfig};

pub use zsync_core::ExistingFilePolicy;
pub use zsync_formats::UpdateInfo;
