//! Concurrent range downloads
//!
//! [`RangeOrchestrator`] turns the matcher's missing byte ranges into HTTP
//! range requests. Each request runs as its own task and reports back over
//! a channel; the coordinating loop owns the matcher, so every verified
//! write happens on one task in completion order. Requests are bounded by
//! [`OrchestratorConfig::max_concurrent`] and the next queued range starts
//! as soon as one finishes.
//!
//! Without range support the whole target is fetched with one plain GET and
//! streamed into the matcher.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{Response, StatusCode};
use std::collections::{HashMap, VecDeque};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;
use zsync_core::{ByteRange, ChecksumMatcher, MatchError, SubmitOutcome};

use crate::config::OrchestratorConfig;
use crate::error::{ProtocolError, Result};
use crate::events::Progress;
use crate::retry::RetryPolicy;
use crate::transport::HttpClient;

/// Lifecycle of a single range request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeStatus {
    /// Sent, no response yet
    Requested,
    /// Body arriving
    Downloading,
    /// Body complete and handed to the matcher
    Finished,
    /// Failed after retries
    Errored,
    /// Aborted by cancellation
    Canceled,
}

/// A block-aligned byte range scheduled for download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRange {
    /// Bytes to request
    pub range: ByteRange,
    /// First block covered
    pub first_block: usize,
    /// Blocks covered, counting a short final block
    pub block_count: usize,
    /// Times this range came back with data that failed verification
    pub integrity_failures: u32,
}

impl PendingRange {
    /// Describe `range` in blocks of `block_size` bytes
    pub fn new(range: ByteRange, block_size: u32) -> Self {
        let bs = u64::from(block_size.max(1));
        Self {
            range,
            first_block: (range.start / bs) as usize,
            block_count: range.len().div_ceil(bs) as usize,
            integrity_failures: 0,
        }
    }

    fn retry_from(&self, range: ByteRange, block_size: u32) -> Self {
        Self {
            integrity_failures: self.integrity_failures + 1,
            ..Self::new(range, block_size)
        }
    }
}

/// Summary of a finished fetch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchReport {
    /// HTTP requests started, not counting transport retries
    pub requests: usize,
    /// Body bytes received from the network
    pub bytes_downloaded: u64,
    /// Whole target fetched with one plain request
    pub sequential: bool,
    /// Ranges requested again after failing verification
    pub integrity_retries: u32,
}

#[derive(Debug)]
struct RangeUpdate {
    id: u64,
    status: RangeStatus,
    received: u64,
}

#[derive(Debug)]
struct RangeOutcome {
    id: u64,
    pending: PendingRange,
    result: Result<Bytes>,
}

#[derive(Debug)]
struct InFlight {
    pending: PendingRange,
    status: RangeStatus,
    received: u64,
}

/// Queue and in-flight bookkeeping of one range fetch
#[derive(Debug)]
struct Schedule {
    queue: VecDeque<PendingRange>,
    in_flight: HashMap<u64, InFlight>,
    abort: CancellationToken,
    failure: Option<ProtocolError>,
    reported: u64,
}

impl Schedule {
    fn new(plan: Vec<PendingRange>, abort: CancellationToken) -> Self {
        Self {
            queue: plan.into(),
            in_flight: HashMap::new(),
            abort,
            failure: None,
            reported: 0,
        }
    }

    /// Bytes received by requests still running
    fn pending_bytes(&self) -> u64 {
        self.in_flight.values().map(|e| e.received).sum()
    }

    /// Bytes to report as received: verified bytes plus in-flight bytes.
    ///
    /// Never decreases, so a range discarded after failing verification or
    /// restarted by a transport retry does not move progress backwards.
    fn progress_bytes(&mut self, confirmed: u64) -> u64 {
        self.reported = self.reported.max(confirmed + self.pending_bytes());
        self.reported
    }

    /// Record the first fatal error and stop every other request
    fn fail(&mut self, e: ProtocolError) {
        error!(error = %e, in_flight = self.in_flight.len(), "aborting range downloads");
        for entry in self.in_flight.values() {
            debug!(range = %entry.pending.range, status = ?entry.status, "aborting range");
        }
        if self.failure.is_none() {
            self.failure = Some(e);
        }
        self.abort.cancel();
        self.queue.clear();
    }

    /// Retire a finished request, returning its body when it may be trusted
    fn complete(&mut self, id: u64, result: Result<Bytes>) -> Option<Bytes> {
        let range = self.in_flight.remove(&id).map(|entry| entry.pending.range);
        let (status, data) = match result {
            Ok(data) if !self.abort.is_cancelled() => (RangeStatus::Finished, Some(data)),
            Ok(_) => (RangeStatus::Canceled, None),
            Err(e) if e.is_canceled() => (RangeStatus::Canceled, None),
            Err(e) => {
                self.fail(e);
                (RangeStatus::Errored, None)
            }
        };
        if let Some(range) = range {
            debug!(id, range = %range, status = ?status, "range request done");
        }
        data
    }
}

/// One range request task
struct RangeRequest {
    id: u64,
    pending: PendingRange,
    client: HttpClient,
    url: Url,
    target_length: u64,
    policy: RetryPolicy,
    abort: CancellationToken,
    updates: mpsc::UnboundedSender<RangeUpdate>,
}

impl RangeRequest {
    async fn run(self) -> RangeOutcome {
        let result = tokio::select! {
            biased;
            () = self.abort.cancelled() => Err(ProtocolError::Canceled),
            result = self.fetch_with_retry() => result,
        };
        RangeOutcome {
            id: self.id,
            pending: self.pending,
            result,
        }
    }

    async fn fetch_with_retry(&self) -> Result<Bytes> {
        self.policy
            .execute(|| self.fetch_once())
            .await
            .map_err(|e| {
                if e.should_retry() {
                    ProtocolError::RetriesExhausted {
                        range: self.pending.range.to_string(),
                        attempts: self.policy.max_attempts + 1,
                        last: e.to_string(),
                    }
                } else {
                    e
                }
            })
    }

    fn report(&self, status: RangeStatus, received: u64) {
        // Receiver outlives every task
        let _ = self.updates.send(RangeUpdate {
            id: self.id,
            status,
            received,
        });
    }

    async fn fetch_once(&self) -> Result<Bytes> {
        let range = self.pending.range;
        self.report(RangeStatus::Requested, 0);

        let response = self
            .client
            .inner()
            .get(self.url.clone())
            .header(RANGE, range.to_header_value())
            .send()
            .await?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {
                if let Some(value) = response.headers().get(CONTENT_RANGE) {
                    let value = value
                        .to_str()
                        .map_err(|e| ProtocolError::InvalidRangeResponse(e.to_string()))?;
                    if !validate_content_range(value, range.start, range.len()) {
                        return Err(ProtocolError::InvalidRangeResponse(format!(
                            "requested {range}, server sent {value}"
                        )));
                    }
                }
            }
            // A full body is the requested range only when the range is the whole target
            StatusCode::OK if range.start == 0 && range.end == self.target_length => {}
            StatusCode::OK => {
                return Err(ProtocolError::InvalidRangeResponse(format!(
                    "server ignored range {range}"
                )));
            }
            status => return Err(ProtocolError::from_status(status)),
        }

        let expected = range.len() as usize;
        let mut data = BytesMut::with_capacity(expected);
        let mut stream = response.bytes_stream();
        self.report(RangeStatus::Downloading, 0);
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk?);
            self.report(RangeStatus::Downloading, data.len() as u64);
        }

        if data.len() != expected {
            return Err(ProtocolError::InvalidRangeResponse(format!(
                "{range}: expected {expected} bytes, received {}",
                data.len()
            )));
        }
        Ok(data.freeze())
    }
}

/// Validate a `Content-Range` value such as `bytes 200-1023/2048`
fn validate_content_range(value: &str, expected_start: u64, expected_length: u64) -> bool {
    if let Some(bytes_part) = value.strip_prefix("bytes ")
        && let Some((range, _total)) = bytes_part.split_once('/')
        && let Some((start_str, end_str)) = range.split_once('-')
        && let (Ok(start), Ok(end)) = (start_str.parse::<u64>(), end_str.parse::<u64>())
        && end >= start
    {
        return start == expected_start && (end - start + 1) == expected_length;
    }
    false
}

#[allow(clippy::cast_precision_loss)]
fn speed(bytes: u64, since: Instant) -> f64 {
    let secs = since.elapsed().as_secs_f64();
    if secs > 0.0 { bytes as f64 / secs } else { 0.0 }
}

/// Range download scheduler
#[derive(Debug, Clone)]
pub struct RangeOrchestrator {
    http: HttpClient,
    config: OrchestratorConfig,
    cancel: CancellationToken,
}

impl RangeOrchestrator {
    /// Create an orchestrator with its own cancellation token
    pub fn new(http: HttpClient, config: OrchestratorConfig) -> Self {
        Self {
            http,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Share an existing cancellation token
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the fetch when canceled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request cancellation; [`fetch`](Self::fetch) returns
    /// [`ProtocolError::Canceled`] once every request has stopped
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Ranges the next fetch would request, large gaps split at block
    /// boundaries
    pub fn plan(&self, matcher: &ChecksumMatcher) -> Vec<PendingRange> {
        let block_size = matcher.config().block_size;
        matcher
            .all_needed_ranges()
            .into_iter()
            .flat_map(|gap| gap.split_aligned(self.config.max_range_bytes, u64::from(block_size)))
            .map(|range| PendingRange::new(range, block_size))
            .collect()
    }

    /// Download everything `matcher` still needs from `url`.
    ///
    /// `on_progress` is called whenever any request receives data and after
    /// every verified write.
    #[instrument(skip(self, matcher, on_progress), fields(url = %url))]
    pub async fn fetch<F>(
        &self,
        matcher: &mut ChecksumMatcher,
        url: &Url,
        range_supported: bool,
        on_progress: F,
    ) -> Result<FetchReport>
    where
        F: FnMut(Progress),
    {
        if self.cancel.is_cancelled() {
            return Err(ProtocolError::Canceled);
        }
        if matcher.is_complete() {
            debug!("nothing to download");
            return Ok(FetchReport::default());
        }

        if range_supported {
            self.fetch_ranges(matcher, url, on_progress).await
        } else {
            self.fetch_sequential(matcher, url, on_progress).await
        }
    }

    async fn fetch_ranges<F>(
        &self,
        matcher: &mut ChecksumMatcher,
        url: &Url,
        mut on_progress: F,
    ) -> Result<FetchReport>
    where
        F: FnMut(Progress),
    {
        let block_size = matcher.config().block_size;
        let total = matcher.config().target_length;
        let mut schedule = Schedule::new(self.plan(matcher), self.cancel.child_token());
        info!(
            ranges = schedule.queue.len(),
            bytes = schedule.queue.iter().map(|p| p.range.len()).sum::<u64>(),
            max_concurrent = self.config.max_concurrent,
            "requesting missing ranges"
        );

        let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
        let mut tasks: JoinSet<RangeOutcome> = JoinSet::new();
        let mut next_id = 0u64;
        let mut confirmed = matcher.known_bytes();
        let mut report = FetchReport::default();
        let started = Instant::now();
        let max_concurrent = self.config.max_concurrent.max(1);

        loop {
            while !schedule.abort.is_cancelled() && tasks.len() < max_concurrent {
                let Some(pending) = schedule.queue.pop_front() else {
                    break;
                };
                let id = next_id;
                next_id += 1;
                report.requests += 1;
                debug!(id, range = %pending.range, blocks = pending.block_count, "range requested");
                schedule.in_flight.insert(
                    id,
                    InFlight {
                        pending,
                        status: RangeStatus::Requested,
                        received: 0,
                    },
                );
                tasks.spawn(
                    RangeRequest {
                        id,
                        pending,
                        client: self.http.clone(),
                        url: url.clone(),
                        target_length: total,
                        policy: self.config.retry_policy.clone(),
                        abort: schedule.abort.clone(),
                        updates: updates_tx.clone(),
                    }
                    .run(),
                );
            }

            if tasks.is_empty() {
                break;
            }

            // A task's updates are queued before its completion
            tokio::select! {
                biased;
                Some(update) = updates_rx.recv() => {
                    let Some(entry) = schedule.in_flight.get_mut(&update.id) else {
                        continue;
                    };
                    // A smaller count means a transport retry restarted the body
                    let delta = if update.received >= entry.received {
                        update.received - entry.received
                    } else {
                        update.received
                    };
                    report.bytes_downloaded += delta;
                    entry.received = update.received;
                    entry.status = update.status;

                    if !schedule.abort.is_cancelled() {
                        on_progress(Progress::new(
                            schedule.progress_bytes(confirmed),
                            total,
                            speed(report.bytes_downloaded, started),
                        ));
                    }
                }
                Some(joined) = tasks.join_next() => {
                    let outcome = match joined {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            schedule.fail(ProtocolError::Join(e));
                            continue;
                        }
                    };
                    let Some(data) = schedule.complete(outcome.id, outcome.result) else {
                        continue;
                    };
                    let pending = outcome.pending;

                    let retry = match matcher.submit_range(pending.range, &data) {
                        Ok(SubmitOutcome { remainder, .. }) => {
                            remainder.map(|rest| pending.retry_from(rest, block_size))
                        }
                        Err(MatchError::ChecksumMismatch { .. }) => {
                            Some(pending.retry_from(pending.range, block_size))
                        }
                        Err(e) => {
                            schedule.fail(e.into());
                            continue;
                        }
                    };
                    confirmed = matcher.known_bytes();

                    if let Some(retry) = retry {
                        if retry.integrity_failures > self.config.integrity_retries {
                            error!(
                                range = %retry.range,
                                attempts = retry.integrity_failures,
                                "range keeps failing verification"
                            );
                            schedule.fail(MatchError::ChecksumMismatch { block: retry.first_block }.into());
                            continue;
                        }
                        warn!(
                            range = %retry.range,
                            attempt = retry.integrity_failures,
                            "requesting range again after verification failure"
                        );
                        report.integrity_retries += 1;
                        schedule.queue.push_back(retry);
                    }

                    on_progress(Progress::new(
                        schedule.progress_bytes(confirmed),
                        total,
                        speed(report.bytes_downloaded, started),
                    ));
                }
                else => break,
            }
        }

        if self.cancel.is_cancelled() {
            info!(requests = report.requests, "range downloads canceled");
            return Err(ProtocolError::Canceled);
        }
        if let Some(e) = schedule.failure {
            return Err(e);
        }

        info!(
            requests = report.requests,
            bytes = report.bytes_downloaded,
            integrity_retries = report.integrity_retries,
            "range downloads complete"
        );
        Ok(report)
    }

    async fn open_sequential(&self, url: &Url) -> Result<Response> {
        let response = self.http.inner().get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProtocolError::from_status(status));
        }
        Ok(response)
    }

    async fn fetch_sequential<F>(
        &self,
        matcher: &mut ChecksumMatcher,
        url: &Url,
        mut on_progress: F,
    ) -> Result<FetchReport>
    where
        F: FnMut(Progress),
    {
        let total = matcher.config().target_length;
        info!(bytes = total, "downloading whole target");
        let started = Instant::now();

        let response = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(ProtocolError::Canceled),
            response = self.config.retry_policy.execute(|| self.open_sequential(url)) => response?,
        };

        let mut stream = response.bytes_stream();
        let mut received = 0u64;
        loop {
            let chunk = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    info!(received, "sequential download canceled");
                    return Err(ProtocolError::Canceled);
                }
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else {
                break;
            };
            let chunk = chunk?;
            received += chunk.len() as u64;
            matcher.submit_sequential(&chunk, false)?;
            on_progress(Progress::new(received, total, speed(received, started)));
        }

        if received != total {
            warn!(received, expected = total, "sequential body length differs from target length");
        }
        matcher.submit_sequential(&[], true)?;

        Ok(FetchReport {
            requests: 1,
            bytes_downloaded: received,
            sequential: true,
            integrity_retries: 0,
        })
    }
}
