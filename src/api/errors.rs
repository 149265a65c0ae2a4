// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::error;

use crate::orchestrator::OrchestratorError;
use crate::vision::ImageError;

const INTERNAL_MESSAGE: &str = "Internal server error";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub error_type: String,
    pub message: String,
    pub request_id: Option<String>,
    pub details: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone)]
pub enum ApiError {
    InvalidRequest(String),
    ValidationError {
        field: String,
        message: String,
    },
    InvalidImage(String),
    UnknownBackend {
        backend: String,
        available_backends: Vec<String>,
    },
    ServiceUnavailable(String),
    /// Detail is logged, never returned
    InternalError(String),
    Timeout,
}

impl ApiError {
    pub fn to_response(&self, request_id: Option<String>) -> ErrorResponse {
        let (error_type, message, details) = match self {
            ApiError::InvalidRequest(msg) => ("invalid_request", msg.clone(), None),
            ApiError::ValidationError { field, message } => {
                let mut details = HashMap::new();
                details.insert(
                    "field".to_string(),
                    serde_json::Value::String(field.clone()),
                );
                ("validation_error", message.clone(), Some(details))
            }
            ApiError::InvalidImage(msg) => ("invalid_image", msg.clone(), None),
            ApiError::UnknownBackend {
                backend,
                available_backends,
            } => {
                let mut details = HashMap::new();
                details.insert(
                    "available_backends".to_string(),
                    serde_json::Value::Array(
                        available_backends
                            .iter()
                            .map(|b| serde_json::Value::String(b.clone()))
                            .collect(),
                    ),
                );
                (
                    "unknown_backend",
                    format!("Backend '{}' is not configured", backend),
                    Some(details),
                )
            }
            ApiError::ServiceUnavailable(msg) => ("service_unavailable", msg.clone(), None),
            ApiError::InternalError(_) => ("internal_error", INTERNAL_MESSAGE.to_string(), None),
            ApiError::Timeout => ("timeout", "Request timed out".to_string(), None),
        };

        ErrorResponse {
            error_type: error_type.to_string(),
            message,
            request_id,
            details,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::InvalidRequest(_)
            | ApiError::ValidationError { .. }
            | ApiError::InvalidImage(_)
            | ApiError::UnknownBackend { .. } => 400,
            ApiError::ServiceUnavailable(_) => 503,
            ApiError::InternalError(_) => 500,
            ApiError::Timeout => 504,
        }
    }

    /// Map a request-fatal orchestrator error
    pub fn from_orchestrator(err: OrchestratorError, available_backends: Vec<String>) -> Self {
        match err {
            OrchestratorError::InvalidImage(e) => {
                ApiError::InvalidImage(invalid_image_message(&e).to_string())
            }
            OrchestratorError::UnknownBackend(backend) => ApiError::UnknownBackend {
                backend,
                available_backends,
            },
            OrchestratorError::NoBackends => {
                ApiError::ServiceUnavailable("No detection backends available".to_string())
            }
            OrchestratorError::Cancelled => {
                ApiError::ServiceUnavailable("Request cancelled".to_string())
            }
        }
    }
}

/// Fixed client-facing text; decoder detail stays in the logs
fn invalid_image_message(err: &ImageError) -> &'static str {
    match err {
        ImageError::TooLarge(..) => "Image exceeds the upload size limit",
        ImageError::UnsupportedFormat => "Unsupported image format",
        ImageError::EmptyData => "Image is empty",
        ImageError::DecodeFailed(_) | ImageError::ZeroDimensions => "Image could not be decoded",
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ApiError::ValidationError { field, message } => {
                write!(f, "Validation error for {}: {}", field, message)
            }
            ApiError::InvalidImage(msg) => write!(f, "Invalid image: {}", msg),
            ApiError::UnknownBackend { backend, .. } => {
                write!(f, "Backend '{}' is not configured", backend)
            }
            ApiError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            ApiError::Timeout => write!(f, "Request timed out"),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::InternalError(detail) = &self {
            error!("Internal error: {}", detail);
        }
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_response(None))).into_response()
    }
}
