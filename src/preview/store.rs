// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Write-once artifact persistence
//!
//! Holds rendered previews and, when a backend needs to fetch the upload
//! itself, a copy of the upload.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Artifact I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Artifact already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid artifact extension: {0}")]
    InvalidExtension(String),
}

/// A retrievable reference to a stored artifact
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactRef {
    pub name: String,
    pub url: String,
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist `bytes` under a freshly generated unique name
    async fn put(&self, bytes: Vec<u8>, extension: &str) -> Result<ArtifactRef, StoreError>;
}

fn artifact_name(extension: &str) -> Result<String, StoreError> {
    if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(StoreError::InvalidExtension(extension.to_string()));
    }
    Ok(format!("{}.{}", uuid::Uuid::new_v4(), extension))
}

/// Stores artifacts as files in one directory, served over HTTP at
/// `public_base_url`
pub struct FsArtifactStore {
    dir: PathBuf,
    public_base_url: String,
}

impl FsArtifactStore {
    /// Create the store, making the directory if needed
    pub async fn new(dir: impl AsRef<Path>, public_base_url: &str) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        Ok(Self {
            dir,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, bytes: Vec<u8>, extension: &str) -> Result<ArtifactRef, StoreError> {
        let name = artifact_name(extension)?;
        let path = self.dir.join(&name);

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => StoreError::AlreadyExists(name.clone()),
                _ => StoreError::Io(e),
            })?;
        file.write_all(&bytes).await?;
        file.flush().await?;

        debug!("Stored artifact {} ({} bytes)", path.display(), bytes.len());

        Ok(ArtifactRef {
            url: format!("{}/{}", self.public_base_url, name),
            name,
        })
    }
}

/// In-process store, used by the CLI when no directory is given
#[derive(Default)]
pub struct MemoryArtifactStore {
    artifacts: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.artifacts.read().await.get(name).cloned()
    }

    pub async fn len(&self) -> usize {
        self.artifacts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.artifacts.read().await.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, bytes: Vec<u8>, extension: &str) -> Result<ArtifactRef, StoreError> {
        let name = artifact_name(extension)?;
        let mut artifacts = self.artifacts.write().await;
        if artifacts.contains_key(&name) {
            return Err(StoreError::AlreadyExists(name));
        }
        artifacts.insert(name.clone(), bytes);

        Ok(ArtifactRef {
            url: format!("memory://{}", name),
            name,
        })
    }
}
