#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
//! End-to-end update sessions against a mock HTTP server
//!
//! Covers the up-to-date short circuit, single-block deltas, servers
//! without range support, cancellation with requests in flight and
//! malformed control files, plus seed discovery and final naming.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use std::time::Duration;
use zsync_checksums::Sha1Digest;
use zsync_core::partial_files;
use zsync_protocol::{
    DeltaSession, ErrorKind, ExistingFilePolicy, SessionConfig, SessionState, UpdateEvent,
};

const BLOCK: usize = 4096;

fn session(server: &wiremock::MockServer, seed: &Path, config: SessionConfig) -> DeltaSession {
    DeltaSession::new(
        control_url(server).parse().expect("Operation should succeed"),
        seed,
        config,
    )
    .expect("Operation should succeed")
}

fn finished_path(events: &[UpdateEvent]) -> std::path::PathBuf {
    match events.last() {
        Some(UpdateEvent::Finished { path, .. }) => path.clone(),
        other => panic!("expected Finished, got {other:?}"),
    }
}

#[tokio::test]
async fn identical_seed_needs_no_download() {
    init_tracing();
    let target = pseudo_random(256 * BLOCK, 1);
    let server = serve(control_for(&target, 4096), RangeServer::new(target.clone())).await;

    let dir = tempfile::tempdir().expect("Operation should succeed");
    let seed = dir.path().join("app-old.AppImage");
    fs::write(&seed, &target).expect("write");

    let mut handle = session(&server, &seed, test_config()).spawn();
    let events = collect_events(&mut handle).await;
    let outcome = handle.wait().await.expect("Operation should succeed");

    assert!(outcome.up_to_date);
    assert_eq!(outcome.path, seed);
    assert_eq!(outcome.sha1, Sha1Digest::from_data(&target));
    assert_eq!(
        events.last(),
        Some(&UpdateEvent::Finished {
            path: seed.clone(),
            sha1: Sha1Digest::from_data(&target),
            up_to_date: true,
        })
    );
    assert!(target_requests(&server).await.is_empty());
}

#[tokio::test]
async fn identical_seed_scan_requests_nothing() {
    init_tracing();
    let target = pseudo_random(256 * BLOCK, 2);
    let server = serve(control_for(&target, 4096), RangeServer::new(target.clone())).await;

    let dir = tempfile::tempdir().expect("Operation should succeed");
    let seed = dir.path().join("app-old.AppImage");
    fs::write(&seed, &target).expect("write");

    // A wrong local digest forces the full scan path
    let mut handle = session(&server, &seed, test_config())
        .with_seed_sha1(Sha1Digest::from_data(b"stale"))
        .spawn();
    let events = collect_events(&mut handle).await;
    let outcome = handle.wait().await.expect("Operation should succeed");

    assert!(!outcome.up_to_date);
    assert_eq!(outcome.blocks_from_seeds, 256);
    assert_eq!(outcome.fetch.requests, 0);
    assert_eq!(outcome.fetch.bytes_downloaded, 0);
    assert!(range_requests(&server).await.is_empty());
    assert_eq!(finished_path(&events), dir.path().join("app.AppImage"));
    assert_eq!(fs::read(dir.path().join("app.AppImage")).expect("read"), target);
}

#[tokio::test]
async fn flipped_byte_fetches_one_block() {
    init_tracing();
    let target = pseudo_random(256 * BLOCK, 3);
    let server = serve(control_for(&target, 4096), RangeServer::new(target.clone())).await;

    let dir = tempfile::tempdir().expect("Operation should succeed");
    let seed = dir.path().join("app-old.AppImage");
    let mut old = target.clone();
    old[10 * BLOCK + 100] ^= 0x55;
    fs::write(&seed, &old).expect("write");

    let mut handle = session(&server, &seed, test_config()).spawn();
    let events = collect_events(&mut handle).await;
    let outcome = handle.wait().await.expect("Operation should succeed");

    assert_eq!(range_requests(&server).await, vec!["bytes=40960-45055".to_string()]);
    assert_eq!(outcome.blocks_from_seeds, 255);
    assert_eq!(outcome.fetch.bytes_downloaded, BLOCK as u64);
    assert_eq!(fs::read(&outcome.path).expect("read"), target);

    let last_progress = events
        .iter()
        .filter_map(|e| match e {
            UpdateEvent::Progress(p) => Some(*p),
            _ => None,
        })
        .last()
        .expect("progress reported");
    assert_eq!(last_progress.bytes_received, target.len() as u64);
    assert_eq!(terminal_events(&events).len(), 1);
    assert_eq!(events.first(), Some(&UpdateEvent::Started));
}

#[tokio::test]
async fn no_range_support_downloads_sequentially() {
    init_tracing();
    let target = pseudo_random(64 * BLOCK + 123, 4);
    let server = serve(
        control_for(&target, 4096),
        RangeServer::new(target.clone()).without_ranges(),
    )
    .await;

    let dir = tempfile::tempdir().expect("Operation should succeed");
    let seed = dir.path().join("app-old.AppImage");
    fs::write(&seed, &target[..32 * BLOCK]).expect("write");

    let mut handle = session(&server, &seed, test_config()).spawn();
    let events = collect_events(&mut handle).await;
    let outcome = handle.wait().await.expect("Operation should succeed");

    assert!(outcome.fetch.sequential);
    assert_eq!(outcome.blocks_from_seeds, 0);
    assert!(range_requests(&server).await.is_empty());

    let plain: Vec<_> = target_requests(&server)
        .await
        .into_iter()
        .filter(|r| wiremock::Match::matches(&NoRangeHeader, r))
        .collect();
    assert_eq!(plain.len(), 1);

    assert!(!events.contains(&UpdateEvent::StateChanged(SessionState::Scanning)));
    assert_eq!(fs::read(finished_path(&events)).expect("read"), target);
}

#[tokio::test]
async fn cancel_with_ranges_in_flight() {
    init_tracing();
    let target = pseudo_random(64 * BLOCK, 5);
    let server = wiremock::MockServer::start().await;
    wiremock::Mock::given(wiremock::matchers::method("GET"))
        .and(wiremock::matchers::path(CONTROL_PATH))
        .respond_with(wiremock::ResponseTemplate::new(200).set_body_bytes(control_for(&target, 4096)))
        .mount(&server)
        .await;
    wiremock::Mock::given(wiremock::matchers::method("GET"))
        .and(wiremock::matchers::path(TARGET_PATH))
        .and(wiremock::matchers::header("range", PROBE_RANGE))
        .respond_with(RangeServer::new(target.clone()))
        .with_priority(1)
        .mount(&server)
        .await;
    wiremock::Mock::given(wiremock::matchers::method("GET"))
        .and(wiremock::matchers::path(TARGET_PATH))
        .respond_with(RangeServer::new(target.clone()).with_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("Operation should succeed");
    let seed = dir.path().join("app-old.AppImage");
    let mut old = target.clone();
    let damaged = [5usize, 20, 40];
    for block in damaged {
        old[block * BLOCK + 7] ^= 0xaa;
    }
    fs::write(&seed, &old).expect("write");

    let mut handle = session(&server, &seed, test_config()).spawn();
    let mut events = Vec::new();
    loop {
        let event = handle.next_event().await.expect("session still running");
        let downloading = event == UpdateEvent::StateChanged(SessionState::Downloading);
        events.push(event);
        if downloading {
            break;
        }
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while range_requests(&server).await.len() < damaged.len() {
        assert!(tokio::time::Instant::now() < deadline, "ranges never requested");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    handle.cancel();

    events.extend(collect_events(&mut handle).await);
    let err = handle.wait().await.unwrap_err();
    assert!(err.is_canceled());

    assert_eq!(terminal_events(&events), vec![&UpdateEvent::Canceled]);
    assert_eq!(events.last(), Some(&UpdateEvent::Canceled));
    assert_eq!(range_requests(&server).await.len(), damaged.len());

    // Seed blocks survive for the next run, aborted ranges stay empty
    let kept = partial_files(dir.path(), TARGET_NAME, None);
    assert_eq!(kept.len(), 1);
    let bytes = fs::read(&kept[0]).expect("read");
    for block in 0..64 {
        let span = block * BLOCK..(block + 1) * BLOCK;
        if damaged.contains(&block) {
            assert!(bytes[span].iter().all(|&b| b == 0), "block {block} written");
        } else {
            assert_eq!(&bytes[span.clone()], &target[span], "block {block}");
        }
    }
    assert!(!dir.path().join(TARGET_NAME).exists());
}

#[tokio::test]
async fn missing_sha1_line_is_configuration_error() {
    init_tracing();
    let target = pseudo_random(8 * BLOCK, 6);
    let control = control_for(&target, 4096);
    let split = control
        .windows(2)
        .position(|w| w == b"\n\n")
        .expect("header end")
        + 1;
    let header = String::from_utf8(control[..split].to_vec()).expect("utf8");
    let header: String = header
        .lines()
        .filter(|line| !line.starts_with("SHA-1:"))
        .map(|line| format!("{line}\n"))
        .collect();
    let mut broken = header.into_bytes();
    broken.extend_from_slice(&control[split..]);

    let server = serve(broken, RangeServer::new(target)).await;
    let dir = tempfile::tempdir().expect("Operation should succeed");
    let seed = dir.path().join("app-old.AppImage");
    fs::write(&seed, b"old").expect("write");

    let mut handle = session(&server, &seed, test_config()).spawn();
    let events = collect_events(&mut handle).await;
    let err = handle.wait().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Configuration);
    match events.last() {
        Some(UpdateEvent::Error { kind, .. }) => assert_eq!(*kind, ErrorKind::Configuration),
        other => panic!("expected Error, got {other:?}"),
    }
    assert_eq!(terminal_events(&events).len(), 1);
    assert!(target_requests(&server).await.is_empty());
}

#[tokio::test]
async fn existing_target_is_scanned_and_kept() {
    init_tracing();
    let target = pseudo_random(32 * BLOCK, 7);
    let server = serve(control_for(&target, 4096), RangeServer::new(target.clone())).await;

    let dir = tempfile::tempdir().expect("Operation should succeed");
    let seed = dir.path().join("app-old.AppImage");
    fs::write(&seed, pseudo_random(8 * BLOCK, 99)).expect("write");
    let mut existing = target.clone();
    existing[3 * BLOCK] ^= 1;
    fs::write(dir.path().join(TARGET_NAME), &existing).expect("write");

    let mut handle = session(&server, &seed, test_config()).spawn();
    collect_events(&mut handle).await;
    let outcome = handle.wait().await.expect("Operation should succeed");

    assert_eq!(range_requests(&server).await, vec!["bytes=12288-16383".to_string()]);
    let name = outcome
        .path
        .file_name()
        .and_then(|n| n.to_str())
        .expect("file name");
    assert!(name.starts_with("app-revised-on-"), "{name}");
    assert!(name.ends_with(".AppImage"), "{name}");
    assert_eq!(fs::read(&outcome.path).expect("read"), target);
    assert_eq!(fs::read(dir.path().join(TARGET_NAME)).expect("read"), existing);
}

#[tokio::test]
async fn replace_policy_overwrites_existing_target() {
    init_tracing();
    let target = pseudo_random(16 * BLOCK, 8);
    let server = serve(control_for(&target, 4096), RangeServer::new(target.clone())).await;

    let dir = tempfile::tempdir().expect("Operation should succeed");
    let seed = dir.path().join("app-old.AppImage");
    fs::write(&seed, &target[..8 * BLOCK]).expect("write");
    fs::write(dir.path().join(TARGET_NAME), b"previous").expect("write");

    let config = SessionConfig {
        existing_file_policy: ExistingFilePolicy::Replace,
        ..test_config()
    };
    let mut handle = session(&server, &seed, config).spawn();
    collect_events(&mut handle).await;
    let outcome = handle.wait().await.expect("Operation should succeed");

    assert_eq!(outcome.path, dir.path().join(TARGET_NAME));
    assert_eq!(fs::read(&outcome.path).expect("read"), target);
}

#[tokio::test]
async fn leftover_partial_is_reused_and_removed() {
    init_tracing();
    let target = pseudo_random(32 * BLOCK, 9);
    let server = serve(control_for(&target, 4096), RangeServer::new(target.clone())).await;

    let dir = tempfile::tempdir().expect("Operation should succeed");
    let seed = dir.path().join("app-old.AppImage");
    fs::write(&seed, pseudo_random(4 * BLOCK, 77)).expect("write");
    let leftover = dir.path().join("app.AppImage.k3j4h5g6f7.part");
    let mut partial = vec![0u8; target.len()];
    partial[..24 * BLOCK].copy_from_slice(&target[..24 * BLOCK]);
    fs::write(&leftover, &partial).expect("write");

    let mut handle = session(&server, &seed, test_config()).spawn();
    collect_events(&mut handle).await;
    let outcome = handle.wait().await.expect("Operation should succeed");

    assert_eq!(outcome.blocks_from_seeds, 24);
    assert_eq!(range_requests(&server).await, vec!["bytes=98304-131071".to_string()]);
    assert!(!leftover.exists());
    assert_eq!(fs::read(&outcome.path).expect("read"), target);
}

#[tokio::test]
async fn check_for_update_reports_digests() {
    init_tracing();
    let target = pseudo_random(4 * BLOCK, 10);
    let server = serve(control_for(&target, 4096), RangeServer::new(target.clone())).await;

    let dir = tempfile::tempdir().expect("Operation should succeed");
    let seed = dir.path().join("app-old.AppImage");
    fs::write(&seed, b"old version").expect("write");

    let mut session = session(&server, &seed, test_config());
    let check = session.check_for_update().await.expect("Operation should succeed");
    assert!(check.update_available);
    assert_eq!(check.local_sha1, Sha1Digest::from_data(b"old version"));
    assert_eq!(check.remote_sha1, Sha1Digest::from_data(&target));
    assert_eq!(check.target.filename, TARGET_NAME);
    assert_eq!(session.state(), SessionState::CheckingForUpdate);
}
