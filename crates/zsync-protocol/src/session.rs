//! Update session
//!
//! A [`DeltaSession`] drives one update run:
//!
//! 1. resolve and parse the control file
//! 2. compare the seed's SHA-1 with the advertised one and stop early when
//!    they agree
//! 3. probe the target host for range support
//! 4. scan an existing target-named file, leftover `.part` files and the
//!    seed for reusable blocks
//! 5. download whatever is still missing
//! 6. verify the whole file and move it into place
//!
//! Progress and the single terminal outcome are reported as
//! [`UpdateEvent`]s.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use zsync_checksums::Sha1Digest;
use zsync_core::{ChecksumMatcher, MatchError, Placement, TargetFile, open_seed, partial_files};
use zsync_formats::{MatchConfig, TargetDescriptor, UpdateInfo};

use crate::config::SessionConfig;
use crate::control_file::{ControlFileClient, RangeProbe};
use crate::error::{ProtocolError, Result};
use crate::events::{Progress, SessionState, UpdateEvent};
use crate::orchestrator::{FetchReport, RangeOrchestrator};
use crate::transport::HttpClient;

/// Result of comparing the seed with the control file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCheck {
    /// The seed differs from the advertised target
    pub update_available: bool,
    /// SHA-1 of the seed
    pub local_sha1: Sha1Digest,
    /// SHA-1 from the control file
    pub remote_sha1: Sha1Digest,
    /// Target metadata
    pub target: TargetDescriptor,
}

/// Successful end of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Location of the verified target
    pub path: PathBuf,
    /// Its SHA-1
    pub sha1: Sha1Digest,
    /// The seed already was the target
    pub up_to_date: bool,
    /// Blocks reused from local files
    pub blocks_from_seeds: usize,
    /// Network side of the run
    pub fetch: FetchReport,
}

/// A local file to scan for reusable blocks
#[derive(Debug, Clone, PartialEq, Eq)]
struct SeedCandidate {
    path: PathBuf,
    /// Leftover scratch file, deleted once scanned
    leftover: bool,
    /// The caller's seed; failures are fatal
    required: bool,
}

/// Handle to a session running on its own task
#[derive(Debug)]
pub struct UpdateHandle {
    events: Option<mpsc::UnboundedReceiver<UpdateEvent>>,
    cancel: CancellationToken,
    task: JoinHandle<Result<SessionOutcome>>,
}

impl UpdateHandle {
    /// Ask the session to stop; a `Canceled` event follows once every
    /// request has stopped
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Next event, `None` after the terminal one has been received and the
    /// session is gone
    pub async fn next_event(&mut self) -> Option<UpdateEvent> {
        match self.events.as_mut() {
            Some(events) => events.recv().await,
            None => None,
        }
    }

    /// Wait for the session to end
    pub async fn wait(self) -> Result<SessionOutcome> {
        self.task.await?
    }
}

/// One update run
#[derive(Debug)]
pub struct DeltaSession {
    info: UpdateInfo,
    seed: PathBuf,
    seed_sha1: Option<Sha1Digest>,
    config: SessionConfig,
    http: HttpClient,
    client: ControlFileClient,
    cancel: CancellationToken,
    state: SessionState,
    events: mpsc::UnboundedSender<UpdateEvent>,
    receiver: Option<mpsc::UnboundedReceiver<UpdateEvent>>,
    control: Option<(Arc<MatchConfig>, TargetDescriptor)>,
}

impl DeltaSession {
    /// Prepare a session updating `seed` from the location in `info`
    pub fn new(info: UpdateInfo, seed: impl Into<PathBuf>, config: SessionConfig) -> Result<Self> {
        let http = HttpClient::with_config(&config.http)?;
        let client = ControlFileClient::new(http.clone(), config.endpoints.clone());
        let (events, receiver) = mpsc::unbounded_channel();
        Ok(Self {
            info,
            seed: seed.into(),
            seed_sha1: None,
            config,
            http,
            client,
            cancel: CancellationToken::new(),
            state: SessionState::Idle,
            events,
            receiver: Some(receiver),
            control: None,
        })
    }

    /// Use a SHA-1 of the seed computed elsewhere instead of hashing it
    pub fn with_seed_sha1(mut self, sha1: Sha1Digest) -> Self {
        self.seed_sha1 = Some(sha1);
        self
    }

    /// Current phase
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Token canceling this session
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Take the event receiver; only the first call returns it
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<UpdateEvent>> {
        self.receiver.take()
    }

    fn emit(&self, event: UpdateEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            info!(from = %self.state, to = %state, "session state");
            self.state = state;
            self.emit(UpdateEvent::StateChanged(state));
        }
    }

    /// Run `fut` unless the session is canceled first
    async fn cancelable<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ProtocolError::Canceled),
            result = fut => result,
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(ProtocolError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Resolve, download and parse the control file, once per session
    pub async fn configure(&mut self) -> Result<(Arc<MatchConfig>, TargetDescriptor)> {
        if let Some((config, target)) = &self.control {
            return Ok((Arc::clone(config), target.clone()));
        }

        self.set_state(SessionState::Resolving);
        let url = self.cancelable(self.client.resolve(&self.info)).await?;
        let fetched = self.cancelable(self.client.fetch(&url)).await?;
        let (config, target) = fetched.into_config()?;
        let config = Arc::new(config);

        info!(
            filename = %target.filename,
            length = target.length,
            blocks = config.block_count,
            target_url = %target.url,
            "configured"
        );
        self.control = Some((Arc::clone(&config), target.clone()));
        Ok((config, target))
    }

    async fn seed_sha1(&mut self) -> Result<Sha1Digest> {
        if let Some(sha1) = self.seed_sha1 {
            return Ok(sha1);
        }
        let path = self.seed.clone();
        let sha1 = tokio::task::spawn_blocking(move || -> zsync_core::Result<Sha1Digest> {
            let file = open_seed(&path)?;
            Ok(Sha1Digest::from_reader(std::io::BufReader::new(file))?)
        })
        .await??;
        self.seed_sha1 = Some(sha1);
        Ok(sha1)
    }

    /// Compare the seed with the advertised target
    #[instrument(skip(self), fields(seed = %self.seed.display()))]
    pub async fn check_for_update(&mut self) -> Result<UpdateCheck> {
        let (config, target) = self.configure().await?;
        self.set_state(SessionState::CheckingForUpdate);
        let local_sha1 = self.seed_sha1().await?;
        let update_available = local_sha1 != config.target_sha1;
        info!(
            local = %local_sha1,
            remote = %config.target_sha1,
            update_available,
            "update check"
        );
        Ok(UpdateCheck {
            update_available,
            local_sha1,
            remote_sha1: config.target_sha1,
            target,
        })
    }

    fn output_dir(&self) -> PathBuf {
        self.config.output_dir.clone().unwrap_or_else(|| {
            self.seed
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
        })
    }

    /// Files to scan, in order: an existing target-named file, leftover
    /// partial downloads, then the seed
    fn seed_candidates(&self, output_dir: &Path, filename: &str, scratch: &Path) -> Vec<SeedCandidate> {
        let mut candidates = Vec::new();
        let same_as_seed = |path: &Path| {
            path == self.seed
                || matches!(
                    (path.canonicalize(), self.seed.canonicalize()),
                    (Ok(a), Ok(b)) if a == b
                )
        };

        let existing = output_dir.join(filename);
        if !self.config.ignore_existing_target && existing.is_file() && !same_as_seed(&existing) {
            candidates.push(SeedCandidate {
                path: existing,
                leftover: false,
                required: false,
            });
        }

        if !self.config.ignore_partial_files {
            let mut dirs = vec![output_dir.to_path_buf()];
            if let Some(seed_dir) = self.seed.parent().filter(|p| !p.as_os_str().is_empty())
                && seed_dir != output_dir
            {
                dirs.push(seed_dir.to_path_buf());
            }
            for dir in dirs {
                for path in partial_files(&dir, filename, Some(scratch)) {
                    if !candidates.iter().any(|c| c.path == path) {
                        candidates.push(SeedCandidate {
                            path,
                            leftover: true,
                            required: false,
                        });
                    }
                }
            }
        }

        candidates.push(SeedCandidate {
            path: self.seed.clone(),
            leftover: false,
            required: true,
        });
        candidates
    }

    /// Scan one file on the blocking pool, handing the matcher back
    async fn scan_seed(
        &self,
        mut matcher: ChecksumMatcher,
        path: PathBuf,
    ) -> Result<(ChecksumMatcher, zsync_core::Result<usize>)> {
        let cancel = self.cancel.clone();
        Ok(tokio::task::spawn_blocking(move || {
            let result = matcher.scan_path(&path, || cancel.is_cancelled());
            (matcher, result)
        })
        .await?)
    }

    /// Stop a canceled run, keeping what was assembled for the next one
    fn abandon(matcher: ChecksumMatcher) -> ProtocolError {
        if matcher.known().is_empty() {
            return ProtocolError::Canceled;
        }
        match matcher.keep_partial() {
            Ok(path) => info!(path = %path.display(), "kept partial target"),
            Err(e) => warn!(error = %e, "cannot keep partial target"),
        }
        ProtocolError::Canceled
    }

    fn emit_progress(&self, matcher: &ChecksumMatcher) {
        self.emit(UpdateEvent::Progress(Progress::new(
            matcher.known_bytes(),
            matcher.config().target_length,
            0.0,
        )));
    }

    async fn execute(&mut self) -> Result<SessionOutcome> {
        let check = self.check_for_update().await?;
        if !check.update_available {
            info!(seed = %self.seed.display(), "seed is already up to date");
            return Ok(SessionOutcome {
                path: self.seed.clone(),
                sha1: check.local_sha1,
                up_to_date: true,
                blocks_from_seeds: 0,
                fetch: FetchReport::default(),
            });
        }

        let (config, target) = self.configure().await?;
        self.ensure_active()?;

        self.set_state(SessionState::Probing);
        let probe: RangeProbe = self
            .cancelable(self.client.probe_range_support(&config.target_url))
            .await?;

        let output_dir = self.output_dir();
        let file = TargetFile::create(&output_dir, &target.filename, config.target_length)?;
        let matcher_config = Arc::clone(&config);
        let mut matcher =
            tokio::task::spawn_blocking(move || ChecksumMatcher::new(matcher_config, file))
                .await??;

        if probe.supported {
            self.set_state(SessionState::Scanning);
            let candidates = self.seed_candidates(&output_dir, &target.filename, matcher.target_path());
            for candidate in candidates {
                if matcher.is_complete() {
                    break;
                }
                let before = matcher.known().known_blocks();
                let (scanned, result) = self.scan_seed(matcher, candidate.path.clone()).await?;
                matcher = scanned;

                match result {
                    Ok(_) => info!(
                        path = %candidate.path.display(),
                        blocks = matcher.known().known_blocks() - before,
                        "blocks reused"
                    ),
                    Err(MatchError::Canceled) => return Err(Self::abandon(matcher)),
                    Err(e) if candidate.required => return Err(e.into()),
                    Err(e) => warn!(path = %candidate.path.display(), error = %e, "skipping seed"),
                }

                if candidate.leftover {
                    match std::fs::remove_file(&candidate.path) {
                        Ok(()) => debug!(path = %candidate.path.display(), "removed leftover"),
                        Err(e) => warn!(path = %candidate.path.display(), error = %e, "cannot remove leftover"),
                    }
                }
                self.emit_progress(&matcher);
            }
        } else {
            info!("range requests unsupported, downloading the whole target");
        }
        let blocks_from_seeds = matcher.known().known_blocks();

        if self.cancel.is_cancelled() {
            return Err(Self::abandon(matcher));
        }

        self.set_state(SessionState::Downloading);
        let orchestrator = RangeOrchestrator::new(self.http.clone(), self.config.orchestrator.clone())
            .with_cancel_token(self.cancel.clone());
        let events = self.events.clone();
        let fetched = orchestrator
            .fetch(&mut matcher, &probe.final_url, probe.supported, |progress| {
                let _ = events.send(UpdateEvent::Progress(progress));
            })
            .await;
        let fetch = match fetched {
            Ok(report) => report,
            Err(e) if e.is_canceled() => return Err(Self::abandon(matcher)),
            Err(e) => return Err(e),
        };

        self.set_state(SessionState::Finalizing);
        let placement = Placement {
            dir: output_dir,
            filename: target.filename.clone(),
            policy: self.config.existing_file_policy,
            permissions_from: Some(self.seed.clone()),
        };
        let path = tokio::task::spawn_blocking(move || matcher.finalize(&placement)).await??;
        info!(path = %path.display(), sha1 = %config.target_sha1, "update complete");

        Ok(SessionOutcome {
            path,
            sha1: config.target_sha1,
            up_to_date: false,
            blocks_from_seeds,
            fetch,
        })
    }

    /// Run the whole update.
    ///
    /// Sends `Started`, state changes and progress, then exactly one of
    /// `Finished`, `Canceled` or `Error`.
    #[instrument(skip(self), fields(seed = %self.seed.display()))]
    pub async fn run(mut self) -> Result<SessionOutcome> {
        self.emit(UpdateEvent::Started);
        let result = self.execute().await;

        match &result {
            Ok(outcome) => {
                self.set_state(SessionState::Finished);
                self.emit(UpdateEvent::Finished {
                    path: outcome.path.clone(),
                    sha1: outcome.sha1,
                    up_to_date: outcome.up_to_date,
                });
            }
            Err(e) if e.is_canceled() => {
                self.set_state(SessionState::Canceled);
                self.emit(UpdateEvent::Canceled);
            }
            Err(e) => {
                error!(error = %e, kind = ?e.kind(), "update failed");
                self.set_state(SessionState::Failed);
                self.emit(UpdateEvent::Error {
                    kind: e.kind(),
                    message: e.to_string(),
                });
            }
        }
        result
    }

    /// Run on a new task
    pub fn spawn(mut self) -> UpdateHandle {
        let events = self.take_events();
        let cancel = self.cancel_token();
        UpdateHandle {
            events,
            cancel,
            task: tokio::spawn(self.run()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs;

    fn session_for(seed: &Path, config: SessionConfig) -> DeltaSession {
        let info: UpdateInfo = "zsync|http://127.0.0.1:9/app.AppImage.zsync"
            .parse()
            .expect("Operation should succeed");
        DeltaSession::new(info, seed, config).expect("Operation should succeed")
    }

    #[test]
    fn test_output_dir_defaults_to_seed_dir() {
        let dir = tempfile::tempdir().expect("Operation should succeed");
        let seed = dir.path().join("app.AppImage");
        let session = session_for(&seed, SessionConfig::default());
        assert_eq!(session.output_dir(), dir.path());

        let bare = session_for(Path::new("app.AppImage"), SessionConfig::default());
        assert_eq!(bare.output_dir(), PathBuf::from("."));
    }

    #[test]
    fn test_seed_candidates_order() {
        let dir = tempfile::tempdir().expect("Operation should succeed");
        let seed = dir.path().join("old.AppImage");
        fs::write(&seed, b"old").expect("write");
        fs::write(dir.path().join("app.AppImage"), b"existing").expect("write");
        fs::write(dir.path().join("app.AppImage.abcdefghij.part"), b"partial").expect("write");
        let scratch = dir.path().join("app.AppImage.zzzzzzzzzz.part");
        fs::write(&scratch, b"scratch").expect("write");

        let session = session_for(&seed, SessionConfig::default());
        let candidates = session.seed_candidates(dir.path(), "app.AppImage", &scratch);
        let paths: Vec<&Path> = candidates.iter().map(|c| c.path.as_path()).collect();
        assert_eq!(
            paths,
            vec![
                dir.path().join("app.AppImage").as_path(),
                dir.path().join("app.AppImage.abcdefghij.part").as_path(),
                seed.as_path(),
            ]
        );
        assert!(candidates[1].leftover);
        assert!(candidates[2].required);

        let quiet = session_for(
            &seed,
            SessionConfig {
                ignore_partial_files: true,
                ignore_existing_target: true,
                ..SessionConfig::default()
            },
        );
        assert_eq!(quiet.seed_candidates(dir.path(), "app.AppImage", &scratch).len(), 1);
    }

    #[test]
    fn test_seed_named_like_target_scanned_once() {
        let dir = tempfile::tempdir().expect("Operation should succeed");
        let seed = dir.path().join("app.AppImage");
        fs::write(&seed, b"old").expect("write");

        let session = session_for(&seed, SessionConfig::default());
        let candidates = session.seed_candidates(dir.path(), "app.AppImage", Path::new("/none"));
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].required);
    }

    #[tokio::test]
    async fn test_missing_seed_is_resource_error() {
        let dir = tempfile::tempdir().expect("Operation should succeed");
        let mut session = session_for(&dir.path().join("missing"), SessionConfig::default());
        let err = session.seed_sha1().await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Resource);
    }

    #[tokio::test]
    async fn test_canceled_before_start() {
        let dir = tempfile::tempdir().expect("Operation should succeed");
        let mut session = session_for(&dir.path().join("seed"), SessionConfig::default());
        let mut events = session.take_events().expect("Operation should succeed");
        session.cancel_token().cancel();

        let err = session.run().await.unwrap_err();
        assert!(err.is_canceled());

        let mut received = Vec::new();
        while let Ok(event) = events.try_recv() {
            received.push(event);
        }
        assert_eq!(received.first(), Some(&UpdateEvent::Started));
        assert_eq!(received.last(), Some(&UpdateEvent::Canceled));
        assert_eq!(received.iter().filter(|e| e.is_terminal()).count(), 1);
    }
}
