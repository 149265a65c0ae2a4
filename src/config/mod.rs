// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Node configuration
//!
//! Loaded either from a TOML file or from environment variables (after
//! `.env`). Every field has a default so a partial file is valid.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::backends::{OcrConfig, PollConfig, RemoteConfig};
use crate::detection::ConfidenceScale;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted upload in bytes (default: 10MB)
    pub max_upload_bytes: usize,
    /// Whole-request deadline in seconds (default: 120)
    pub request_timeout_secs: u64,
    /// Base URL under which this node is reachable by backends
    pub public_base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_upload_bytes: crate::vision::DEFAULT_MAX_IMAGE_SIZE,
            request_timeout_secs: 120,
            public_base_url: "http://localhost:8080".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Deadline for one backend call, retries included (default: 90)
    pub backend_timeout_secs: u64,
    /// Extra attempts for retryable backend errors (default: 0)
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    /// Used when the request does not set one (0.0-1.0)
    pub default_confidence: f32,
    pub default_overlap: f32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            backend_timeout_secs: 90,
            max_retries: 0,
            retry_base_delay_ms: 500,
            default_confidence: 0.4,
            default_overlap: 0.3,
        }
    }
}

impl OrchestratorConfig {
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Render previews when the request does not say
    pub enabled_by_default: bool,
    /// Artifact directory, served at `/previews`
    pub dir: PathBuf,
    pub font_path: Option<String>,
    pub font_size: f32,
    pub line_thickness: u32,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            enabled_by_default: true,
            dir: PathBuf::from("./previews"),
            font_path: None,
            font_size: 16.0,
            line_thickness: 2,
        }
    }
}

/// One in-process model; each becomes its own backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalModelConfig {
    pub name: String,
    pub model_path: PathBuf,
    #[serde(default)]
    pub labels_path: Option<PathBuf>,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
}

fn default_input_size() -> u32 {
    crate::inference::DEFAULT_INPUT_SIZE
}

fn default_iou_threshold() -> f32 {
    crate::inference::DEFAULT_IOU_THRESHOLD
}

fn default_remote_name() -> String {
    "remote".to_string()
}

fn default_ocr_name() -> String {
    "ocr".to_string()
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_remote_confidence_scale() -> ConfidenceScale {
    ConfidenceScale::Percent
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSection {
    #[serde(default = "default_remote_name")]
    pub name: String,
    pub predict_url: String,
    pub api_key: String,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    /// Scale the hosted model reports confidences on
    #[serde(default = "default_remote_confidence_scale")]
    pub confidence_scale: ConfidenceScale,
}

impl RemoteSection {
    pub fn to_backend_config(&self) -> RemoteConfig {
        RemoteConfig {
            name: self.name.clone(),
            predict_url: self.predict_url.clone(),
            api_key: self.api_key.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            confidence_scale: self.confidence_scale,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrSection {
    #[serde(default = "default_ocr_name")]
    pub name: String,
    pub endpoint: String,
    pub api_key: String,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub poll: PollSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSection {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub multiplier: f64,
    pub jitter: f64,
    /// Poll ceiling (default: 60)
    pub max_elapsed_secs: u64,
    pub max_attempts: u32,
}

impl Default for PollSection {
    fn default() -> Self {
        let poll = PollConfig::default();
        Self {
            initial_interval_ms: poll.initial_interval.as_millis() as u64,
            max_interval_ms: poll.max_interval.as_millis() as u64,
            multiplier: poll.multiplier,
            jitter: poll.jitter,
            max_elapsed_secs: poll.max_elapsed.as_secs(),
            max_attempts: poll.max_attempts,
        }
    }
}

impl PollSection {
    pub fn to_poll_config(&self) -> PollConfig {
        PollConfig {
            initial_interval: Duration::from_millis(self.initial_interval_ms),
            max_interval: Duration::from_millis(self.max_interval_ms),
            multiplier: self.multiplier,
            jitter: self.jitter,
            max_elapsed: Duration::from_secs(self.max_elapsed_secs),
            max_attempts: self.max_attempts,
        }
    }
}

impl OcrSection {
    pub fn to_backend_config(&self) -> OcrConfig {
        OcrConfig {
            name: self.name.clone(),
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            poll: self.poll.to_poll_config(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub server: ServerConfig,
    pub orchestrator: OrchestratorConfig,
    pub preview: PreviewConfig,
    pub local: Vec<LocalModelConfig>,
    pub remote: Option<RemoteSection>,
    pub ocr: Option<OcrSection>,
}

impl NodeConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables, reading `.env` first
    ///
    /// A backend section is only present when its URL and key are both set.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let defaults = NodeConfig::default();

        let server = ServerConfig {
            host: env::var("API_HOST").unwrap_or(defaults.server.host),
            port: env_parse("API_PORT").unwrap_or(defaults.server.port),
            max_upload_bytes: env_parse("MAX_UPLOAD_BYTES")
                .unwrap_or(defaults.server.max_upload_bytes),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS")
                .unwrap_or(defaults.server.request_timeout_secs),
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or(defaults.server.public_base_url),
        };

        let orchestrator = OrchestratorConfig {
            backend_timeout_secs: env_parse("BACKEND_TIMEOUT_SECS")
                .unwrap_or(defaults.orchestrator.backend_timeout_secs),
            max_retries: env_parse("BACKEND_MAX_RETRIES")
                .unwrap_or(defaults.orchestrator.max_retries),
            retry_base_delay_ms: env_parse("BACKEND_RETRY_BASE_DELAY_MS")
                .unwrap_or(defaults.orchestrator.retry_base_delay_ms),
            default_confidence: env_parse("DEFAULT_CONFIDENCE")
                .unwrap_or(defaults.orchestrator.default_confidence),
            default_overlap: env_parse("DEFAULT_OVERLAP")
                .unwrap_or(defaults.orchestrator.default_overlap),
        };

        let preview = PreviewConfig {
            enabled_by_default: env::var("PREVIEW_ENABLED")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(defaults.preview.enabled_by_default),
            dir: env::var("PREVIEW_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.preview.dir),
            font_path: env::var("PREVIEW_FONT_PATH").ok(),
            font_size: env_parse("PREVIEW_FONT_SIZE").unwrap_or(defaults.preview.font_size),
            line_thickness: env_parse("PREVIEW_LINE_THICKNESS")
                .unwrap_or(defaults.preview.line_thickness),
        };

        let local = match env::var("LOCAL_MODEL_PATH") {
            Ok(path) => vec![LocalModelConfig {
                name: env::var("LOCAL_MODEL_NAME").unwrap_or_else(|_| "local".to_string()),
                model_path: PathBuf::from(path),
                labels_path: env::var("LOCAL_LABELS_PATH").ok().map(PathBuf::from),
                input_size: env_parse("LOCAL_INPUT_SIZE").unwrap_or_else(default_input_size),
                iou_threshold: env_parse("LOCAL_IOU_THRESHOLD")
                    .unwrap_or_else(default_iou_threshold),
            }],
            Err(_) => Vec::new(),
        };

        let remote = match (env::var("REMOTE_DETECT_URL"), env::var("REMOTE_API_KEY")) {
            (Ok(predict_url), Ok(api_key)) => Some(RemoteSection {
                name: default_remote_name(),
                predict_url,
                api_key,
                timeout_secs: env_parse("REMOTE_TIMEOUT_SECS")
                    .unwrap_or_else(default_http_timeout_secs),
                confidence_scale: default_remote_confidence_scale(),
            }),
            _ => None,
        };

        let ocr = match (env::var("OCR_ENDPOINT"), env::var("OCR_API_KEY")) {
            (Ok(endpoint), Ok(api_key)) => {
                let mut poll = PollSection::default();
                if let Some(secs) = env_parse("OCR_POLL_MAX_ELAPSED_SECS") {
                    poll.max_elapsed_secs = secs;
                }
                if let Some(attempts) = env_parse("OCR_POLL_MAX_ATTEMPTS") {
                    poll.max_attempts = attempts;
                }
                Some(OcrSection {
                    name: default_ocr_name(),
                    endpoint,
                    api_key,
                    timeout_secs: env_parse("OCR_TIMEOUT_SECS")
                        .unwrap_or_else(default_http_timeout_secs),
                    poll,
                })
            }
            _ => None,
        };

        let config = Self {
            server,
            orchestrator,
            preview,
            local,
            remote,
            ocr,
        };
        config.validate()?;
        Ok(config)
    }

    /// Names of every configured backend, in dispatch order
    pub fn backend_names(&self) -> Vec<&str> {
        self.local
            .iter()
            .map(|l| l.name.as_str())
            .chain(self.remote.iter().map(|r| r.name.as_str()))
            .chain(self.ocr.iter().map(|o| o.name.as_str()))
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.server.request_timeout_secs == 0 {
            return invalid("server.request_timeout_secs must be at least 1".to_string());
        }
        if self.server.max_upload_bytes == 0 {
            return invalid("server.max_upload_bytes must be greater than zero".to_string());
        }
        if self.orchestrator.backend_timeout_secs == 0 {
            return invalid("orchestrator.backend_timeout_secs must be at least 1".to_string());
        }
        for (field, value) in [
            ("default_confidence", self.orchestrator.default_confidence),
            ("default_overlap", self.orchestrator.default_overlap),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("orchestrator.{} must be in 0..=1, got {}", field, value));
            }
        }

        check_http_url("server.public_base_url", &self.server.public_base_url)?;
        if let Some(remote) = &self.remote {
            check_http_url("remote.predict_url", &remote.predict_url)?;
        }
        if let Some(ocr) = &self.ocr {
            check_http_url("ocr.endpoint", &ocr.endpoint)?;
        }

        let mut seen = HashSet::new();
        for name in self.backend_names() {
            if name.trim().is_empty() {
                return invalid("backend names must not be empty".to_string());
            }
            if !seen.insert(name) {
                return invalid(format!("duplicate backend name: {}", name));
            }
        }

        if let Some(ocr) = &self.ocr {
            if ocr.poll.max_elapsed_secs == 0 {
                return invalid("ocr.poll.max_elapsed_secs must be at least 1".to_string());
            }
            ocr.poll
                .to_poll_config()
                .validate()
                .map_err(ConfigError::Invalid)?;
        }

        Ok(())
    }
}

fn check_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value)
        .map_err(|e| ConfigError::Invalid(format!("{} is not a valid URL ({}): {}", field, e, value)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::Invalid(format!(
            "{} must use http or https, got {}",
            field, other
        ))),
    }
}
