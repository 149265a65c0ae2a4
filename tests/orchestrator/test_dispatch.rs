// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Fan-out, deadlines, retries and cancellation

use async_trait::async_trait;
use multidetect_node::backends::{BackendError, DetectOptions};
use multidetect_node::detection::{BoundingBox, Detection};
use multidetect_node::orchestrator::{
    Orchestrator, OrchestratorError, OrchestratorSettings, ProcessOptions,
};
use multidetect_node::preview::{
    ArtifactRef, ArtifactStore, MemoryArtifactStore, PreviewRenderer, StoreError,
};
use multidetect_node::DetectionBackend;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::common::{png_bytes, shared, ScriptedBackend};

fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        backend_timeout: Duration::from_secs(5),
        max_retries: 2,
        retry_base_delay: Duration::from_millis(100),
        max_upload_bytes: 1024 * 1024,
        defaults: DetectOptions::default(),
        render_previews_by_default: false,
    }
}

fn orchestrator(
    backends: Vec<Arc<dyn DetectionBackend>>,
    store: Arc<dyn ArtifactStore>,
) -> Orchestrator {
    Orchestrator::new(backends, PreviewRenderer::new(12.0, 1), store, settings())
}

fn no_previews() -> ProcessOptions {
    ProcessOptions {
        render_previews: false,
        ..ProcessOptions::default()
    }
}

fn button() -> Detection {
    let bbox = BoundingBox::from_corners(1.0, 1.0, 5.0, 5.0).unwrap();
    Detection::new("button", 0.9, bbox, "fast")
}

struct FailingStore;

#[async_trait]
impl ArtifactStore for FailingStore {
    async fn put(&self, _bytes: Vec<u8>, _extension: &str) -> Result<ArtifactRef, StoreError> {
        Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only volume",
        )))
    }
}

#[tokio::test(start_paused = true)]
async fn test_backends_run_concurrently() {
    let (_, a) = shared(ScriptedBackend::ok("a", vec![]).with_delay(Duration::from_secs(1)));
    let (_, b) = shared(ScriptedBackend::ok("b", vec![]).with_delay(Duration::from_secs(1)));
    let orch = orchestrator(vec![a, b], Arc::new(MemoryArtifactStore::new()));

    let start = Instant::now();
    let report = orch
        .process(png_bytes(8, 8), no_previews(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.successful().count(), 2);
    assert!(start.elapsed() < Duration::from_millis(1500));
}

#[tokio::test(start_paused = true)]
async fn test_slow_backend_hits_deadline_without_blocking_others() {
    let (_, fast) = shared(ScriptedBackend::ok("fast", vec![button()]));
    let (_, slow) = shared(ScriptedBackend::ok("slow", vec![]).with_delay(Duration::from_secs(600)));
    let orch = orchestrator(vec![fast, slow], Arc::new(MemoryArtifactStore::new()));

    let start = Instant::now();
    let report = orch
        .process(png_bytes(8, 8), no_previews(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.backend("fast").unwrap().detections().unwrap().len(), 1);
    assert_eq!(report.backend("slow").unwrap().reason(), Some("deadline_exceeded"));
    assert!(start.elapsed() < Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_is_retried() {
    let (flaky, backend) = shared(ScriptedBackend::ok("flaky", vec![button()]).flaky(1));
    let orch = orchestrator(vec![backend], Arc::new(MemoryArtifactStore::new()));

    let report = orch
        .process(png_bytes(8, 8), no_previews(), CancellationToken::new())
        .await
        .unwrap();

    assert!(report.backend("flaky").unwrap().is_ok());
    assert_eq!(flaky.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retries_are_bounded() {
    let (flaky, backend) = shared(ScriptedBackend::ok("flaky", vec![]).flaky(10));
    let orch = orchestrator(vec![backend], Arc::new(MemoryArtifactStore::new()));

    let report = orch
        .process(png_bytes(8, 8), no_previews(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.backend("flaky").unwrap().reason(), Some("network_error"));
    assert_eq!(flaky.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_is_not_retried() {
    let (bad, backend) = shared(ScriptedBackend::failing("bad", || {
        BackendError::DecodeError("expected value at line 1".to_string())
    }));
    let orch = orchestrator(vec![backend], Arc::new(MemoryArtifactStore::new()));

    let report = orch
        .process(png_bytes(8, 8), no_previews(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.backend("bad").unwrap().reason(), Some("decode_error"));
    assert_eq!(bad.calls(), 1);
    assert!(report.is_total_failure());
}

#[tokio::test(start_paused = true)]
async fn test_failures_never_leak_into_successes() {
    let (_, ok) = shared(ScriptedBackend::ok("ok", vec![button()]));
    let (_, job) = shared(ScriptedBackend::failing("job", || {
        BackendError::JobFailed("read job reported failure".to_string())
    }));
    let (_, timeout) = shared(ScriptedBackend::failing("poll", || BackendError::PollTimeout {
        attempts: 9,
        elapsed_ms: 60_000,
    }));
    let orch = orchestrator(vec![ok, job, timeout], Arc::new(MemoryArtifactStore::new()));

    let report = orch
        .process(png_bytes(8, 8), no_previews(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.backends.len(), 3);
    assert_eq!(report.backend("ok").unwrap().detections().unwrap(), &[button()]);
    assert_eq!(report.backend("job").unwrap().reason(), Some("job_failed"));
    assert_eq!(report.backend("poll").unwrap().reason(), Some("poll_timeout"));
    assert_eq!(report.failed().count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_waiting() {
    let (_, slow) = shared(ScriptedBackend::ok("slow", vec![]).with_delay(Duration::from_secs(3)));
    let orch = orchestrator(vec![slow], Arc::new(MemoryArtifactStore::new()));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let err = orch
        .process(png_bytes(8, 8), no_previews(), cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Cancelled));
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_upload_persisted_for_url_backends() {
    let store = Arc::new(MemoryArtifactStore::new());
    let (by_url, a) = shared(ScriptedBackend::ok("by-url", vec![]).fetching_by_url());
    let (inline, b) = shared(ScriptedBackend::ok("inline", vec![]));
    let orch = orchestrator(vec![a, b], store.clone());

    orch.process(png_bytes(8, 8), no_previews(), CancellationToken::new())
        .await
        .unwrap();

    let url = by_url.seen_url.lock().unwrap().clone().unwrap();
    assert!(url.starts_with("memory://"));
    assert!(url.ends_with(".png"));
    // every backend sees the same input
    assert_eq!(inline.seen_url.lock().unwrap().clone(), Some(url));
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_store_failure_falls_back_to_inline_bytes() {
    let (by_url, backend) = shared(ScriptedBackend::ok("by-url", vec![]).fetching_by_url());
    let orch = orchestrator(vec![backend], Arc::new(FailingStore));

    let report = orch
        .process(png_bytes(8, 8), no_previews(), CancellationToken::new())
        .await
        .unwrap();

    assert!(report.backend("by-url").unwrap().is_ok());
    assert!(by_url.seen_url.lock().unwrap().is_none());
}

#[tokio::test]
async fn test_oversized_upload_rejected() {
    let (calls, backend) = shared(ScriptedBackend::ok("a", vec![]));
    let mut settings = settings();
    settings.max_upload_bytes = 16;
    let orch = Orchestrator::new(
        vec![backend],
        PreviewRenderer::new(12.0, 1),
        Arc::new(MemoryArtifactStore::new()),
        settings,
    );

    let err = orch
        .process(png_bytes(64, 64), no_previews(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::InvalidImage(_)));
    assert_eq!(calls.calls(), 0);
}
