use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{KvStore, StoreError};

/// In-memory registry store. Not durable; seeded at startup.
#[derive(Default)]
pub struct InMemoryKvStore {
    entries: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let inner = self.entries.read().await;
        Ok(inner.get(&(namespace.to_string(), key.to_string())).cloned())
    }

    async fn put(&self, namespace: &str, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut inner = self.entries.write().await;
        inner.insert((namespace.to_string(), key.to_string()), value);
        Ok(())
    }
}
