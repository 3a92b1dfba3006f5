//! Slash-path configuration store.
//!
//! Connector configs, migration flags, sync points, and model settings all
//! live behind this one contract: `get`/`set` of small JSON values under
//! paths like `/services/connectors/<instance>/config`.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::core::error::{Error, Result};

/// Durable key -> small-JSON store with read-modify-write semantics.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Read the value at `path`, `None` when absent.
    async fn get(&self, path: &str) -> Result<Option<Value>>;

    /// Write the value at `path`, replacing any previous value.
    async fn set(&self, path: &str, value: Value) -> Result<()>;
}

/// In-memory store. The default for tests and single-process setups.
#[derive(Default)]
pub struct MemoryConfigStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryConfigStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a path, builder style.
    #[must_use]
    pub fn with_entry(self, path: &str, value: Value) -> Self {
        self.entries.write().insert(path.to_string(), value);
        self
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().get(path).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        self.entries.write().insert(path.to_string(), value);
        Ok(())
    }
}

/// JSON-file-backed store. Loads the full map on open, rewrites it on `set`.
pub struct FileConfigStore {
    path: PathBuf,
    entries: tokio::sync::Mutex<HashMap<String, Value>>,
}

impl FileConfigStore {
    /// Open (or create) the store at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| Error::config(format!("corrupt config file {}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(Error::config(format!(
                    "failed to read config file {}: {e}",
                    path.display()
                )))
            }
        };
        debug!(path = %path.display(), "opened config store");
        Ok(Self {
            path,
            entries: tokio::sync::Mutex::new(entries),
        })
    }

    async fn persist(&self, entries: &HashMap<String, Value>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(entries)?;
        tokio::fs::write(&self.path, bytes).await.map_err(|e| {
            Error::config(format!(
                "failed to write config file {}: {e}",
                self.path.display()
            ))
        })
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        Ok(self.entries.lock().await.get(path).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(path.to_string(), value);
        self.persist(&entries).await
    }
}

/// Config path for a connector instance.
#[must_use]
pub fn connector_config_path(connector_instance: &str) -> String {
    format!("/services/connectors/{connector_instance}/config")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryConfigStore::new();
        assert_eq!(store.get("/a/b").await.unwrap(), None);
        store.set("/a/b", json!({"x": 1})).await.unwrap();
        assert_eq!(store.get("/a/b").await.unwrap(), Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let store = FileConfigStore::open(&path).await.unwrap();
        store.set("/migrations/x_v1", json!({"done": true})).await.unwrap();
        drop(store);

        let store = FileConfigStore::open(&path).await.unwrap();
        assert_eq!(
            store.get("/migrations/x_v1").await.unwrap(),
            Some(json!({"done": true}))
        );
    }
}
