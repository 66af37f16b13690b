//! Shared fixtures for the HTTP integration tests
#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use wiremock::matchers::{method, path};
use wiremock::{Match, Mock, MockServer, Request, Respond, ResponseTemplate};
use zsync_formats::ControlFileBuilder;
use zsync_protocol::{OrchestratorConfig, RetryPolicy, SessionConfig, UpdateEvent, UpdateHandle};

pub const TARGET_NAME: &str = "app.AppImage";
pub const TARGET_PATH: &str = "/app.AppImage";
pub const CONTROL_PATH: &str = "/app.AppImage.zsync";
pub const PROBE_RANGE: &str = "bytes=0-200";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_test_writer()
        .try_init();
}

/// Deterministic bytes that do not repeat at block granularity
pub fn pseudo_random(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

/// Control file for `target` pointing at the relative target URL
pub fn control_for(target: &[u8], block_size: u32) -> Vec<u8> {
    ControlFileBuilder::new(TARGET_NAME, TARGET_NAME)
        .block_size(block_size)
        .build(target)
        .expect("Operation should succeed")
}

/// Parse `bytes=S-E` into a half-open range clamped to `len`
fn parse_range(value: &str, len: usize) -> Option<(usize, usize)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    let start: usize = start.parse().ok()?;
    let end: usize = end.parse().ok()?;
    (start < len).then(|| (start, (end + 1).min(len)))
}

/// Serves a byte buffer, honouring `Range` headers when enabled
#[derive(Clone)]
pub struct RangeServer {
    body: Arc<Vec<u8>>,
    ranges: bool,
    delay: Option<Duration>,
    corrupt_next: Arc<AtomicUsize>,
}

impl RangeServer {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body: Arc::new(body),
            ranges: true,
            delay: None,
            corrupt_next: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Ignore `Range` and never advertise support
    pub fn without_ranges(mut self) -> Self {
        self.ranges = false;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Flip a byte in the next `count` responses
    pub fn corrupting(self, count: usize) -> Self {
        self.corrupt_next.store(count, Ordering::SeqCst);
        self
    }
}

impl Respond for RangeServer {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let len = self.body.len();
        let requested = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_range(v, len));

        let (mut template, mut bytes) = match requested {
            Some((start, end)) if self.ranges => (
                ResponseTemplate::new(206)
                    .insert_header("accept-ranges", "bytes")
                    .insert_header(
                        "content-range",
                        format!("bytes {}-{}/{}", start, end - 1, len).as_str(),
                    ),
                self.body[start..end].to_vec(),
            ),
            _ => {
                let template = ResponseTemplate::new(200);
                let template = if self.ranges {
                    template.insert_header("accept-ranges", "bytes")
                } else {
                    template
                };
                (template, self.body.to_vec())
            }
        };

        let corrupt = self
            .corrupt_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if corrupt && let Some(byte) = bytes.first_mut() {
            *byte ^= 0xff;
        }

        if let Some(delay) = self.delay {
            template = template.set_delay(delay);
        }
        template.set_body_bytes(bytes)
    }
}

/// Requests carrying no `Range` header
pub struct NoRangeHeader;

impl Match for NoRangeHeader {
    fn matches(&self, request: &Request) -> bool {
        !request.headers.contains_key("range")
    }
}

/// Serve `control` and `target` from a fresh mock server
pub async fn serve(control: Vec<u8>, target: RangeServer) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CONTROL_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(control))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(TARGET_PATH))
        .respond_with(target)
        .mount(&server)
        .await;
    server
}

pub fn control_url(server: &MockServer) -> String {
    format!("zsync|{}{}", server.uri(), CONTROL_PATH)
}

/// `Range` header values received for the target, probe excluded
pub async fn range_requests(server: &MockServer) -> Vec<String> {
    target_requests(server)
        .await
        .iter()
        .filter_map(|r| r.headers.get("range"))
        .filter_map(|v| v.to_str().ok())
        .filter(|v| *v != PROBE_RANGE)
        .map(str::to_string)
        .collect()
}

pub async fn target_requests(server: &MockServer) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == TARGET_PATH)
        .collect()
}

/// Session settings for tests: no retry delay, three parallel requests
pub fn test_config() -> SessionConfig {
    SessionConfig {
        orchestrator: OrchestratorConfig {
            max_concurrent: 3,
            retry_policy: RetryPolicy::immediate(2),
            ..OrchestratorConfig::default()
        },
        ..SessionConfig::default()
    }
}

/// Drain every event until the session ends
pub async fn collect_events(handle: &mut UpdateHandle) -> Vec<UpdateEvent> {
    let mut events = Vec::new();
    while let Some(event) = handle.next_event().await {
        events.push(event);
    }
    events
}

pub fn terminal_events(events: &[UpdateEvent]) -> Vec<&UpdateEvent> {
    events.iter().filter(|e| e.is_terminal()).collect()
}
