// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod api;
pub mod backends;
pub mod cli;
pub mod config;
pub mod detection;
pub mod inference;
pub mod orchestrator;
pub mod preview;
pub mod version;
pub mod vision;

// Re-export main types
pub use backends::{BackendError, BackendInput, DetectOptions, DetectionBackend};
pub use config::NodeConfig;
pub use detection::{BackendResult, BoundingBox, Detection, DetectionReport};
pub use orchestrator::{Orchestrator, OrchestratorError, OrchestratorSettings, ProcessOptions};
