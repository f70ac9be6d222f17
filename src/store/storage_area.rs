use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

pub type StorageItems = Map<String, Value>;

/// Persistent string-keyed JSON storage owned by the host.
///
/// `get` returns only the keys that are present; absent keys are simply
/// missing from the returned map.
#[async_trait]
pub trait StorageArea: Send + Sync {
    async fn get(&self, keys: &[&str]) -> Result<StorageItems>;

    async fn set(&self, items: StorageItems) -> Result<()>;
}

/// In-memory storage area for tests and ephemeral runs.
#[derive(Clone, Default)]
pub struct MemoryStorageArea {
    items: Arc<RwLock<HashMap<String, Value>>>,
}

impl MemoryStorageArea {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageArea for MemoryStorageArea {
    async fn get(&self, keys: &[&str]) -> Result<StorageItems> {
        let items = self.items.read().await;
        Ok(keys
            .iter()
            .filter_map(|key| items.get(*key).map(|value| (key.to_string(), value.clone())))
            .collect())
    }

    async fn set(&self, items: StorageItems) -> Result<()> {
        let mut guard = self.items.write().await;
        guard.extend(items);
        Ok(())
    }
}
