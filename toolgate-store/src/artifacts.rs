use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use toolgate_types::ArtifactRef;

use crate::{ArtifactStore, StoreError};

#[derive(Default)]
pub struct InMemoryArtifactStore {
    blobs: Mutex<HashMap<ArtifactRef, Vec<u8>>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.lock().await.len()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<ArtifactRef, StoreError> {
        let artifact = ArtifactRef::for_bytes(&bytes);
        let mut blobs = self.blobs.lock().await;
        blobs.entry(artifact.clone()).or_insert(bytes);
        Ok(artifact)
    }

    async fn get(&self, artifact: &ArtifactRef) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.blobs.lock().await.get(artifact).cloned())
    }
}

/// Filesystem store: `sha256/<hex>` maps to `<root>/sha256/<hex>`.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, artifact: &ArtifactRef) -> Result<PathBuf, StoreError> {
        let raw = artifact.as_str();
        if raw.starts_with('/') || raw.split('/').any(|seg| seg.is_empty() || seg == "..") {
            return Err(StoreError::new(format!("unsafe artifact ref: {raw}")));
        }
        Ok(self.root.join(raw))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<ArtifactRef, StoreError> {
        let artifact = ArtifactRef::for_bytes(&bytes);
        let path = self.path_for(&artifact)?;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(artifact);
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::new(e.to_string()))?;
        }
        // Each writer gets its own temp file; readers never observe a partial blob.
        let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| StoreError::new(e.to_string()))?;
        if let Err(err) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            // Same address means same bytes: a concurrent writer that got there first is fine.
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Err(StoreError::new(err.to_string()));
            }
        }
        Ok(artifact)
    }

    async fn get(&self, artifact: &ArtifactRef) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(artifact)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::new(e.to_string())),
        }
    }
}
