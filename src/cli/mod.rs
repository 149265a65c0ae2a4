// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod detect;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::Path;

use crate::config::NodeConfig;

/// Multidetect Node CLI
#[derive(Parser, Debug)]
#[command(name = "detect-cli")]
#[command(version)]
#[command(about = "Run detection backends against local image files", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Detect elements in an image file and print the JSON report
    Detect(detect::DetectArgs),

    /// List the backends the configuration defines
    Backends(detect::BackendsArgs),
}

/// Execute CLI command
pub async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Detect(args) => detect::run_detect(args).await,
        Commands::Backends(args) => detect::list_backends(args),
    }
}

/// TOML file when given, otherwise environment variables
pub fn load_config(path: Option<&Path>) -> Result<NodeConfig> {
    match path {
        Some(path) => NodeConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => NodeConfig::from_env().context("Invalid configuration in environment"),
    }
}
