// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Hosted detector backend against a mock HTTP endpoint

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::post,
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use multidetect_node::backends::{DetectOptions, DetectionBackend, RemoteBackend, RemoteConfig};
use multidetect_node::detection::ConfidenceScale;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::common::{backend_input, closed_port_url, spawn_server};

const INPUT_FIELD_BODY: &str = r#"{"predictions":[{"class":"input","confidence":42,"x":100,"y":50,"width":40,"height":20}]}"#;

#[derive(Default)]
struct Captured {
    query: HashMap<String, String>,
    body: String,
}

type Shared = Arc<Mutex<Captured>>;

async fn mock_detector(status: StatusCode, reply: &'static str) -> (String, Shared) {
    let captured: Shared = Arc::default();
    let router = Router::new()
        .route(
            "/ui-elements/3",
            post(
                move |State(captured): State<Shared>,
                      Query(query): Query<HashMap<String, String>>,
                      body: String| async move {
                    *captured.lock().unwrap() = Captured { query, body };
                    (status, reply)
                },
            ),
        )
        .with_state(captured.clone());

    let base = spawn_server(router).await;
    (format!("{}/ui-elements/3", base), captured)
}

fn backend(predict_url: String) -> RemoteBackend {
    RemoteBackend::new(RemoteConfig {
        name: "remote".to_string(),
        predict_url,
        api_key: "secret".to_string(),
        timeout: Duration::from_secs(5),
        confidence_scale: ConfidenceScale::Percent,
    })
    .unwrap()
}

#[tokio::test]
async fn test_center_form_prediction_by_url() {
    let (url, captured) = mock_detector(StatusCode::OK, INPUT_FIELD_BODY).await;
    let input = backend_input(400, 300, Some("http://node.example/previews/a.png"));

    let dets = backend(url)
        .detect(&input, &DetectOptions::new(0.4, Some(0.3)))
        .await
        .unwrap();

    assert_eq!(dets.len(), 1);
    let b = dets[0].bbox();
    assert_eq!((b.x_min(), b.y_min(), b.x_max(), b.y_max()), (80.0, 40.0, 120.0, 60.0));
    assert_eq!(dets[0].kind(), "input");
    assert_eq!(dets[0].rounded_confidence(), 0.42);
    assert_eq!(dets[0].source(), "remote");

    let c = captured.lock().unwrap();
    assert_eq!(c.query.get("api_key").map(String::as_str), Some("secret"));
    assert_eq!(c.query.get("confidence").map(String::as_str), Some("40"));
    assert_eq!(c.query.get("overlap").map(String::as_str), Some("30"));
    assert_eq!(
        c.query.get("image").map(String::as_str),
        Some("http://node.example/previews/a.png")
    );
    assert!(c.body.is_empty());
}

#[tokio::test]
async fn test_one_percent_confidence() {
    let body = r#"{"predictions":[{"class":"link","confidence":1,"x":10,"y":10,"width":4,"height":4}]}"#;
    let (url, _) = mock_detector(StatusCode::OK, body).await;
    let input = backend_input(32, 32, None);

    let dets = backend(url)
        .detect(&input, &DetectOptions::new(0.0, None))
        .await
        .unwrap();

    assert_eq!(dets.len(), 1);
    assert!((dets[0].confidence() - 0.01).abs() < 1e-6);
}

#[tokio::test]
async fn test_inline_base64_without_url() {
    let (url, captured) = mock_detector(StatusCode::OK, r#"{"predictions":[]}"#).await;
    let input = backend_input(16, 16, None);

    let dets = backend(url)
        .detect(&input, &DetectOptions::default())
        .await
        .unwrap();
    assert!(dets.is_empty());

    let c = captured.lock().unwrap();
    assert!(!c.query.contains_key("image"));
    assert_eq!(STANDARD.decode(&c.body).unwrap(), input.bytes.to_vec());
}

#[tokio::test]
async fn test_server_error_is_remote_error() {
    let (url, _) = mock_detector(StatusCode::INTERNAL_SERVER_ERROR, "model offline").await;
    let input = backend_input(16, 16, None);

    let err = backend(url)
        .detect(&input, &DetectOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.reason(), "remote_error");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_rejected_key_is_not_retryable() {
    let (url, _) = mock_detector(StatusCode::FORBIDDEN, "bad key").await;
    let input = backend_input(16, 16, None);

    let err = backend(url)
        .detect(&input, &DetectOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.reason(), "remote_error");
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_malformed_body_is_decode_error() {
    let (url, _) = mock_detector(StatusCode::OK, r#"{"predictions": "soon"}"#).await;
    let input = backend_input(16, 16, None);

    let err = backend(url)
        .detect(&input, &DetectOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "decode_error");
}

#[tokio::test]
async fn test_unreachable_endpoint_is_network_error() {
    let url = format!("{}/ui-elements/3", closed_port_url().await);
    let input = backend_input(16, 16, None);

    let err = backend(url)
        .detect(&input, &DetectOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.reason(), "network_error");
    assert!(err.is_retryable());
}
