// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::{Context, Result};
use clap::Parser;
use multidetect_node::{
    api::{create_router, serve, AppState},
    cli::load_config,
    orchestrator::{build_backends, Orchestrator, OrchestratorSettings},
    preview::{FsArtifactStore, PreviewRenderer},
    version,
};
use std::{env, path::PathBuf, sync::Arc};
use tracing::info;

/// Multi-backend detection node
#[derive(Parser, Debug)]
#[command(name = "multidetect-node", version)]
struct Args {
    /// TOML configuration file (environment variables when omitted)
    #[arg(long, env = "MULTIDETECT_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides server.host/server.port
    #[arg(long, env = "LISTEN_ADDR")]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    info!("Starting {}", version::get_version_string());

    let config = load_config(args.config.as_deref())?;

    // Artifact store backs both previews and uploads fetched by URL
    let public_previews = format!(
        "{}/previews",
        config.server.public_base_url.trim_end_matches('/')
    );
    let store = FsArtifactStore::new(&config.preview.dir, &public_previews)
        .await
        .with_context(|| format!("Failed to open preview dir {}", config.preview.dir.display()))?;
    info!("Artifacts stored in {}", store.dir().display());

    let backends = build_backends(&config)?;
    info!(
        "Backends: {:?}",
        backends.iter().map(|b| b.name()).collect::<Vec<_>>()
    );

    let orchestrator = Orchestrator::new(
        backends,
        PreviewRenderer::from_config(&config.preview),
        Arc::new(store),
        OrchestratorSettings::from_config(&config),
    );

    let state = AppState::new(Arc::new(orchestrator), config.server.request_timeout());
    let app = create_router(state, &config.preview.dir);

    let addr = args.listen.unwrap_or_else(|| config.server.listen_addr());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    serve(listener, app).await
}
