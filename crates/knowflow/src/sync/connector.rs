//! Connector capability set and registry.
//!
//! A connector is a value type implementing [`Connector`]; instances are
//! created through factories registered in a name-keyed map. No inheritance,
//! no decorators: capabilities a source does not support keep their default
//! implementations.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde_json::Value;
use tracing::info;

use crate::core::auth::TokenManager;
use crate::core::config::ConfigStore;
use crate::core::error::{Error, Result};
use crate::core::rate_limit::RateLimiterRegistry;
use crate::models::entities::Record;
use crate::processor::EntitiesProcessor;
use crate::storage::sync_point::SyncPointStore;
use crate::transformer::BlobTransformer;

/// Everything a connector factory needs to assemble an instance.
#[derive(Clone)]
pub struct ConnectorContext {
    pub connector_id: String,
    pub processor: Arc<EntitiesProcessor>,
    pub config: Arc<dyn ConfigStore>,
    pub sync_points: Arc<dyn SyncPointStore>,
    pub tokens: Arc<TokenManager>,
    pub rate_limiters: Arc<RateLimiterRegistry>,
    /// When present, record payloads are written to blob storage as part of
    /// every sync.
    pub transformer: Option<Arc<BlobTransformer>>,
}

/// The capability set of one connector instance.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Source name, e.g. "DRIVE".
    fn name(&self) -> &str;

    /// Load config and credentials, construct the source client.
    async fn init(&mut self) -> Result<()>;

    /// Full sync: principals, then containers, then records.
    async fn run_sync(&mut self) -> Result<()>;

    /// Delta sync from the stored cursor.
    async fn run_incremental_sync(&mut self) -> Result<()>;

    /// Lightweight connectivity probe.
    async fn test_connection_and_access(&self) -> Result<bool>;

    /// Best-effort per-record signed URL.
    async fn get_signed_url(&self, _record: &Record) -> Result<Option<String>> {
        Ok(None)
    }

    /// Stream the raw record content from the source.
    async fn stream_record(&self, record: &Record) -> Result<Vec<u8>> {
        Err(Error::invalid_input(format!(
            "{} does not support streaming record {}",
            self.name(),
            record.external_record_id
        )))
    }

    /// React to a push notification from the source.
    async fn handle_webhook(&self, _notification: Value) -> Result<()> {
        Ok(())
    }

    /// Release source clients and caches.
    async fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }
}

type ConnectorFactory = Arc<
    dyn Fn(ConnectorContext) -> Pin<Box<dyn Future<Output = Result<Box<dyn Connector>>> + Send>>
        + Send
        + Sync,
>;

/// Keeps one sync-run slot per connector instance; dropping the guard frees
/// the slot.
pub struct SyncRunGuard {
    running: Arc<DashSet<String>>,
    connector_id: String,
}

impl Drop for SyncRunGuard {
    fn drop(&mut self) {
        self.running.remove(&self.connector_id);
    }
}

/// Name-keyed connector factories plus the per-instance run lock.
#[derive(Default)]
pub struct ConnectorRegistry {
    factories: DashMap<String, ConnectorFactory>,
    running: Arc<DashSet<String>>,
}

impl ConnectorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a source name.
    pub fn register<F, Fut>(&self, name: &str, factory: F)
    where
        F: Fn(ConnectorContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Box<dyn Connector>>> + Send + 'static,
    {
        self.factories.insert(
            name.to_string(),
            Arc::new(move |ctx| Box::pin(factory(ctx))),
        );
        info!(name, "registered connector");
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.factories.iter().map(|e| e.key().clone()).collect()
    }

    /// Build a connector instance for `name`.
    pub async fn create(&self, name: &str, ctx: ConnectorContext) -> Result<Box<dyn Connector>> {
        let factory = self
            .factories
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::invalid_input(format!("unknown connector: {name}")))?;
        factory(ctx).await
    }

    /// Claim the single sync-run slot for an instance. Returns `None` when a
    /// run is already in flight (the scheduler must not start a second one).
    #[must_use]
    pub fn try_begin_run(&self, connector_id: &str) -> Option<SyncRunGuard> {
        if self.running.insert(connector_id.to_string()) {
            Some(SyncRunGuard {
                running: self.running.clone(),
                connector_id: connector_id.to_string(),
            })
        } else {
            None
        }
    }
}
