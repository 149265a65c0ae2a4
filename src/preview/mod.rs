// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Annotated previews and the artifact store they are written to

pub mod renderer;
pub mod store;

pub use renderer::{Artifact, PreviewError, PreviewRenderer};
pub use store::{ArtifactRef, ArtifactStore, FsArtifactStore, MemoryArtifactStore, StoreError};
