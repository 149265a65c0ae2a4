// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Per-request options and orchestrator settings

use std::collections::HashMap;
use std::time::Duration;

use crate::backends::DetectOptions;
use crate::config::NodeConfig;

/// What one `process` call should do
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub defaults: DetectOptions,
    /// Overrides keyed by backend name
    pub per_backend: HashMap<String, DetectOptions>,
    /// Subset of backends to run; all of them when `None`
    pub backends: Option<Vec<String>>,
    pub render_previews: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            defaults: DetectOptions::default(),
            per_backend: HashMap::new(),
            backends: None,
            render_previews: true,
        }
    }
}

impl ProcessOptions {
    pub fn for_backend(&self, name: &str) -> DetectOptions {
        self.per_backend.get(name).copied().unwrap_or(self.defaults)
    }
}

/// Timing and retry policy, fixed at startup
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub backend_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub max_upload_bytes: usize,
    pub defaults: DetectOptions,
    pub render_previews_by_default: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&NodeConfig::default())
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            backend_timeout: config.orchestrator.backend_timeout(),
            max_retries: config.orchestrator.max_retries,
            retry_base_delay: config.orchestrator.retry_base_delay(),
            max_upload_bytes: config.server.max_upload_bytes,
            defaults: DetectOptions::new(
                config.orchestrator.default_confidence,
                Some(config.orchestrator.default_overlap),
            ),
            render_previews_by_default: config.preview.enabled_by_default,
        }
    }

    /// Backoff before retry number `attempt` (0-based)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.retry_base_delay * 2u32.saturating_pow(attempt)
    }

    /// Options for a request that sets nothing
    pub fn default_options(&self) -> ProcessOptions {
        ProcessOptions {
            defaults: self.defaults,
            per_backend: HashMap::new(),
            backends: None,
            render_previews: self.render_previews_by_default,
        }
    }
}
