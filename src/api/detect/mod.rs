// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Detection API endpoint module
//!
//! Provides POST /v1/detect and GET /v1/backends.

pub mod handler;
pub mod request;
pub mod response;

pub use handler::{backends_handler, detect_handler};
pub use request::DetectRequest;
pub use response::{BackendInfo, BackendsResponse, DetectResponse};
