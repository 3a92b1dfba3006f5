//! Map-backed sync points.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use knowflow::storage::sync_point::SyncPointStore;
use knowflow::Result;
use parking_lot::RwLock;
use serde_json::Value;

/// Sync points held in a plain map.
#[derive(Clone, Default)]
pub struct MemorySyncPointStore {
    entries: Arc<RwLock<HashMap<String, Value>>>,
}

impl MemorySyncPointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw entry, `None` when the key was never written.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }
}

#[async_trait]
impl SyncPointStore for MemorySyncPointStore {
    async fn read(&self, key: &str) -> Result<Value> {
        Ok(self
            .entries
            .read()
            .get(key)
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new())))
    }

    async fn update(&self, key: &str, value: Value) -> Result<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }
}
