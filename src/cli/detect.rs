// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Offline detection of image files

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::load_config;
use crate::config::NodeConfig;
use crate::detection::ConfidenceScale;
use crate::orchestrator::{build_backends, Orchestrator, OrchestratorSettings};
use crate::preview::{ArtifactStore, FsArtifactStore, MemoryArtifactStore, PreviewRenderer};

#[derive(Args, Debug)]
pub struct DetectArgs {
    /// Image file to analyze
    #[arg(long)]
    pub image: PathBuf,

    /// TOML configuration file (environment variables when omitted)
    #[arg(long, env = "MULTIDETECT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory for preview images; previews are skipped when omitted
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Confidence threshold for every backend, as a percentage 0-100
    #[arg(long)]
    pub confidence: Option<f32>,

    /// Only run these backends
    #[arg(long, value_delimiter = ',')]
    pub backends: Option<Vec<String>>,
}

#[derive(Args, Debug)]
pub struct BackendsArgs {
    /// TOML configuration file (environment variables when omitted)
    #[arg(long, env = "MULTIDETECT_CONFIG")]
    pub config: Option<PathBuf>,
}

pub async fn run_detect(args: DetectArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;

    let upload = tokio::fs::read(&args.image)
        .await
        .with_context(|| format!("Failed to read {}", args.image.display()))?;

    let store: Arc<dyn ArtifactStore> = match &args.out {
        Some(dir) => {
            let dir = if dir.is_absolute() {
                dir.clone()
            } else {
                std::env::current_dir()?.join(dir)
            };
            let base_url = format!("file://{}", dir.display());
            Arc::new(FsArtifactStore::new(&dir, &base_url).await?)
        }
        None => Arc::new(MemoryArtifactStore::new()),
    };

    let settings = OrchestratorSettings::from_config(&config);
    let orchestrator = Orchestrator::new(
        build_backends(&config)?,
        PreviewRenderer::from_config(&config.preview),
        store,
        settings,
    );

    let mut options = orchestrator.settings().default_options();
    options.render_previews = args.out.is_some();
    options.backends = args.backends;
    if let Some(confidence) = args.confidence {
        options.defaults.confidence = ConfidenceScale::Percent.normalize(confidence);
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling backends");
            on_interrupt.cancel();
        }
    });

    let report = orchestrator
        .process(Bytes::from(upload), options, cancel)
        .await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn configured_backends(config: &NodeConfig) -> Vec<(String, &'static str)> {
    config
        .local
        .iter()
        .map(|l| (l.name.clone(), "local"))
        .chain(config.remote.iter().map(|r| (r.name.clone(), "remote")))
        .chain(config.ocr.iter().map(|o| (o.name.clone(), "ocr")))
        .collect()
}

pub fn list_backends(args: BackendsArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let backends = configured_backends(&config);

    if backends.is_empty() {
        println!("No backends configured");
    }
    for (name, kind) in backends {
        println!("{:<20} {}", name, kind);
    }
    Ok(())
}
