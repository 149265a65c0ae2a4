// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Read OCR backend: submit, poll, flatten lines

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use multidetect_node::backends::{
    BackendError, DetectOptions, DetectionBackend, OcrBackend, OcrConfig, PollConfig,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::common::{backend_input, closed_port_url};

const KEY: &str = "ocr-key";

const RUNNING: &str = r#"{"status":"running"}"#;
const FAILED: &str = r#"{"status":"failed"}"#;
const OK_LINE: &str = r#"{
    "status": "succeeded",
    "analyzeResult": {"readResults": [{"page": 1, "lines": [
        {"boundingBox": [0,0,10,0,10,5,0,5], "text": "OK", "words": []}
    ]}]}
}"#;

struct MockRead {
    base: String,
    submit_status: StatusCode,
    send_location: bool,
    /// Replies to successive status checks; the last one repeats
    replies: Vec<&'static str>,
    checks: AtomicUsize,
}

async fn submit(State(mock): State<Arc<MockRead>>, headers: HeaderMap) -> Response {
    if headers.get("Ocp-Apim-Subscription-Key").and_then(|v| v.to_str().ok()) != Some(KEY) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if !mock.submit_status.is_success() {
        return mock.submit_status.into_response();
    }
    if !mock.send_location {
        return StatusCode::ACCEPTED.into_response();
    }
    let location = format!("{}/vision/v3.1/read/analyzeResults/job-1", mock.base);
    (StatusCode::ACCEPTED, [("Operation-Location", location)]).into_response()
}

async fn status(State(mock): State<Arc<MockRead>>, headers: HeaderMap) -> Response {
    if headers.get("Ocp-Apim-Subscription-Key").is_none() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let n = mock.checks.fetch_add(1, Ordering::SeqCst);
    let reply = mock.replies[n.min(mock.replies.len() - 1)];
    (StatusCode::OK, reply).into_response()
}

async fn mock_read(
    submit_status: StatusCode,
    send_location: bool,
    replies: Vec<&'static str>,
) -> (String, Arc<MockRead>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let mock = Arc::new(MockRead {
        base: base.clone(),
        submit_status,
        send_location,
        replies,
        checks: AtomicUsize::new(0),
    });
    let router = Router::new()
        .route("/vision/v3.1/read/analyze", post(submit))
        .route("/vision/v3.1/read/analyzeResults/job-1", get(status))
        .with_state(mock.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (base, mock)
}

fn fast_poll() -> PollConfig {
    PollConfig {
        initial_interval: Duration::from_millis(10),
        max_interval: Duration::from_millis(40),
        multiplier: 2.0,
        jitter: 0.0,
        max_elapsed: Duration::from_millis(400),
        max_attempts: 1_000,
    }
}

fn backend(endpoint: String, api_key: &str) -> OcrBackend {
    OcrBackend::new(OcrConfig {
        name: "ocr".to_string(),
        endpoint,
        api_key: api_key.to_string(),
        timeout: Duration::from_secs(5),
        poll: fast_poll(),
    })
    .unwrap()
}

#[tokio::test]
async fn test_immediate_result_becomes_polygon_detection() {
    let (base, mock) = mock_read(StatusCode::ACCEPTED, true, vec![OK_LINE]).await;
    let input = backend_input(64, 32, None);

    let dets = backend(base, KEY)
        .detect(&input, &DetectOptions::new(0.0, None))
        .await
        .unwrap();

    assert_eq!(dets.len(), 1);
    assert_eq!(dets[0].kind(), "OK");
    let b = dets[0].bbox();
    assert_eq!((b.x_min(), b.y_min(), b.x_max(), b.y_max()), (0.0, 0.0, 10.0, 5.0));
    assert_eq!(dets[0].polygon().map(|p| p.len()), Some(4));
    assert_eq!(mock.checks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_polls_until_succeeded() {
    let (base, mock) =
        mock_read(StatusCode::ACCEPTED, true, vec![RUNNING, RUNNING, OK_LINE]).await;
    let input = backend_input(64, 32, Some("http://node.example/previews/u.png"));

    let dets = backend(base, KEY)
        .detect(&input, &DetectOptions::new(0.0, None))
        .await
        .unwrap();

    assert_eq!(dets.len(), 1);
    assert_eq!(mock.checks.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_failed_job() {
    let (base, _) = mock_read(StatusCode::ACCEPTED, true, vec![RUNNING, FAILED]).await;
    let input = backend_input(16, 16, None);

    let err = backend(base, KEY)
        .detect(&input, &DetectOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "job_failed");
}

#[tokio::test]
async fn test_job_that_never_finishes_times_out() {
    let (base, mock) = mock_read(StatusCode::ACCEPTED, true, vec![RUNNING]).await;
    let input = backend_input(16, 16, None);

    let err = backend(base, KEY)
        .detect(&input, &DetectOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, BackendError::PollTimeout { .. }), "got {:?}", err);
    assert_eq!(err.reason(), "poll_timeout");
    assert!(mock.checks.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_rejected_submission() {
    let (base, mock) = mock_read(StatusCode::ACCEPTED, true, vec![OK_LINE]).await;
    let input = backend_input(16, 16, None);

    let err = backend(base, "wrong-key")
        .detect(&input, &DetectOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.reason(), "submit_error");
    assert_eq!(mock.checks.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_operation_location() {
    let (base, _) = mock_read(StatusCode::ACCEPTED, false, vec![OK_LINE]).await;
    let input = backend_input(16, 16, None);

    let err = backend(base, KEY)
        .detect(&input, &DetectOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "submit_error");
}

#[tokio::test]
async fn test_unreachable_service() {
    let input = backend_input(16, 16, None);

    let err = backend(closed_port_url().await, KEY)
        .detect(&input, &DetectOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "submit_error");
    assert!(!err.is_retryable());
}
