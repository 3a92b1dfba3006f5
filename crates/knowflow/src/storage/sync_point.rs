//! Durable per-connector cursors.
//!
//! Small JSON blobs keyed by `{kind}|{connector_instance}|{resource}`.
//! Reads that find nothing return an empty object so callers can probe for
//! fields without special-casing the first run.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::config::ConfigStore;
use crate::core::error::Result;

/// Which entity family a sync point tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDataPointType {
    Records,
    Users,
    Groups,
}

impl SyncDataPointType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDataPointType::Records => "records",
            SyncDataPointType::Users => "users",
            SyncDataPointType::Groups => "groups",
        }
    }
}

/// Durable map of sync keys to small JSON blobs.
#[async_trait]
pub trait SyncPointStore: Send + Sync {
    /// The stored blob, or an empty object when nothing is stored.
    async fn read(&self, key: &str) -> Result<Value>;

    /// Replace the stored blob. Last write wins per key.
    async fn update(&self, key: &str, value: Value) -> Result<()>;
}

/// Sync points persisted through the config store under `/sync_points/`.
pub struct ConfigSyncPointStore {
    config: Arc<dyn ConfigStore>,
}

impl ConfigSyncPointStore {
    #[must_use]
    pub fn new(config: Arc<dyn ConfigStore>) -> Self {
        Self { config }
    }

    fn path(key: &str) -> String {
        format!("/sync_points/{key}")
    }
}

#[async_trait]
impl SyncPointStore for ConfigSyncPointStore {
    async fn read(&self, key: &str) -> Result<Value> {
        Ok(self
            .config
            .get(&Self::path(key))
            .await?
            .unwrap_or_else(|| Value::Object(serde_json::Map::new())))
    }

    async fn update(&self, key: &str, value: Value) -> Result<()> {
        self.config.set(&Self::path(key), value).await
    }
}

/// Composes sync keys for one connector instance and entity family.
#[derive(Clone)]
pub struct SyncPoint {
    connector_id: String,
    kind: SyncDataPointType,
    store: Arc<dyn SyncPointStore>,
}

impl SyncPoint {
    #[must_use]
    pub fn new(
        connector_id: impl Into<String>,
        kind: SyncDataPointType,
        store: Arc<dyn SyncPointStore>,
    ) -> Self {
        Self {
            connector_id: connector_id.into(),
            kind,
            store,
        }
    }

    /// `{kind}|{connector_instance}|{resource}`.
    #[must_use]
    pub fn key(&self, resource: &str) -> String {
        format!("{}|{}|{}", self.kind.as_str(), self.connector_id, resource)
    }

    pub async fn read_sync_point(&self, resource: &str) -> Result<Value> {
        self.store.read(&self.key(resource)).await
    }

    pub async fn update_sync_point(&self, resource: &str, value: Value) -> Result<()> {
        self.store.update(&self.key(resource), value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::MemoryConfigStore;
    use serde_json::json;

    #[tokio::test]
    async fn missing_sync_point_reads_as_empty_object() {
        let store = ConfigSyncPointStore::new(Arc::new(MemoryConfigStore::new()));
        let sync_point = SyncPoint::new("inst-1", SyncDataPointType::Records, Arc::new(store));
        let value = sync_point.read_sync_point("DRV").await.unwrap();
        assert_eq!(value, json!({}));
    }

    #[tokio::test]
    async fn updates_are_keyed_per_resource() {
        let store: Arc<dyn SyncPointStore> =
            Arc::new(ConfigSyncPointStore::new(Arc::new(MemoryConfigStore::new())));
        let sync_point = SyncPoint::new("inst-1", SyncDataPointType::Records, store.clone());

        sync_point
            .update_sync_point("DRV", json!({"pageToken": "t-1"}))
            .await
            .unwrap();

        assert_eq!(
            sync_point.read_sync_point("DRV").await.unwrap(),
            json!({"pageToken": "t-1"})
        );
        assert_eq!(sync_point.read_sync_point("OTHER").await.unwrap(), json!({}));
        assert_eq!(
            store.read("records|inst-1|DRV").await.unwrap(),
            json!({"pageToken": "t-1"})
        );
    }
}
