use async_trait::async_trait;
use thiserror::Error;

use toolgate_types::{ArtifactRef, Episode};

pub mod artifacts;
pub use artifacts::{FsArtifactStore, InMemoryArtifactStore};

pub mod episodes;
pub use episodes::{EpisodeQuery, InMemoryEpisodeIndex, SortOrder, MAX_SEARCH_LIMIT};

pub mod kv;
pub use kv::InMemoryKvStore;

#[derive(Debug, Error)]
#[error("store error: {message}")]
pub struct StoreError {
    pub message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Read-heavy registry for policies, routes and schemas.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn put(&self, namespace: &str, key: &str, value: Vec<u8>) -> Result<(), StoreError>;
}

/// Write-once, content-addressed blob storage.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Stores `bytes` and returns their content address. Storing the same bytes twice is a no-op.
    async fn put(&self, bytes: Vec<u8>) -> Result<ArtifactRef, StoreError>;

    async fn get(&self, artifact: &ArtifactRef) -> Result<Option<Vec<u8>>, StoreError>;
}

/// Append-only, queryable episode log.
#[async_trait]
pub trait EpisodeIndex: Send + Sync {
    async fn append(&self, episode: Episode) -> Result<(), StoreError>;

    async fn search(&self, query: &EpisodeQuery) -> Result<Vec<Episode>, StoreError>;
}
