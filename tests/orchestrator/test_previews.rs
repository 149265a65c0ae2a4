// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// End-to-end runs that render previews to disk

use multidetect_node::backends::{DetectionBackend, LocalBackend};
use multidetect_node::detection::{polygon_from_flat, Detection};
use multidetect_node::inference::RawDetection;
use multidetect_node::orchestrator::{Orchestrator, OrchestratorSettings, ProcessOptions};
use multidetect_node::preview::{FsArtifactStore, PreviewRenderer};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::common::{png_bytes, shared, FixedDetector, ScriptedBackend};

async fn fs_orchestrator(
    dir: &std::path::Path,
    backends: Vec<Arc<dyn DetectionBackend>>,
) -> Orchestrator {
    let store = FsArtifactStore::new(dir, "http://localhost:8080/previews")
        .await
        .unwrap();
    Orchestrator::new(
        backends,
        PreviewRenderer::new(14.0, 2),
        Arc::new(store),
        OrchestratorSettings::default(),
    )
}

#[tokio::test]
async fn test_local_backend_report_with_preview() {
    let dir = tempfile::tempdir().unwrap();
    let local: Arc<dyn DetectionBackend> = Arc::new(LocalBackend::new(
        "local",
        Arc::new(FixedDetector(vec![RawDetection::new(
            "button",
            0.87,
            [10.0, 10.0, 50.0, 40.0],
        )])),
    ));
    let orch = fs_orchestrator(dir.path(), vec![local]).await;

    let report = orch
        .process(png_bytes(400, 300), ProcessOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!((report.image.width, report.image.height), (400, 300));
    assert_eq!(report.image.format, "png");

    let result = report.backend("local").unwrap();
    let dets = result.detections().unwrap();
    assert_eq!(dets.len(), 1);
    assert_eq!(dets[0].kind(), "button");
    assert_eq!(dets[0].rounded_confidence(), 0.87);

    let preview = result.preview().unwrap();
    assert_eq!(
        preview.url,
        format!("http://localhost:8080/previews/{}", preview.name)
    );

    let written = tokio::fs::read(dir.path().join(&preview.name)).await.unwrap();
    let rendered = image::load_from_memory(&written).unwrap();
    assert_eq!((rendered.width(), rendered.height()), (400, 300));
}

#[tokio::test]
async fn test_every_successful_backend_gets_its_own_preview() {
    let dir = tempfile::tempdir().unwrap();
    let polygon = polygon_from_flat(&[0.0, 0.0, 10.0, 0.0, 10.0, 5.0, 0.0, 5.0]).unwrap();
    let ok_line = Detection::from_polygon("OK", 1.0, polygon, "ocr").unwrap();

    let (_, ocr) = shared(ScriptedBackend::ok("ocr", vec![ok_line]));
    let (_, empty) = shared(ScriptedBackend::ok("empty", vec![]));
    let (_, broken) = shared(ScriptedBackend::failing("broken", || {
        multidetect_node::BackendError::SubmitError("status 401".to_string())
    }));
    let orch = fs_orchestrator(dir.path(), vec![ocr, empty, broken]).await;

    let report = orch
        .process(png_bytes(32, 16), ProcessOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    let a = report.backend("ocr").unwrap().preview().unwrap();
    let b = report.backend("empty").unwrap().preview().unwrap();
    assert_ne!(a.name, b.name);
    assert!(report.backend("broken").unwrap().preview().is_none());

    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
}

#[tokio::test]
async fn test_report_serializes_camel_case() {
    let dir = tempfile::tempdir().unwrap();
    let (_, a) = shared(ScriptedBackend::failing("a", || {
        multidetect_node::BackendError::DeadlineExceeded
    }));
    let orch = fs_orchestrator(dir.path(), vec![a]).await;

    let report = orch
        .process(png_bytes(8, 8), ProcessOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&serde_json::to_string(&report).unwrap()).unwrap();
    assert!(json["requestId"].is_string());
    assert!(json["createdAt"].is_string());
    assert!(json["processingTimeMs"].is_u64());
    assert_eq!(json["image"]["width"], 8);
    assert_eq!(json["backends"]["a"]["status"], "error");
    assert_eq!(json["backends"]["a"]["reason"], "deadline_exceeded");
}
