//! At-least-once publication of record events.
//!
//! One logical topic, keyed by the record's internal key so consumers see
//! per-record FIFO. The producer behind the trait may be Kafka, NATS, or the
//! in-memory fake; the [`ReliableProducer`] wrapper owns the retry budget and
//! turns an exhausted budget into a messaging error.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::error::{Error, Result};
use crate::core::retry::{with_retry_or, RetryPolicy};
use crate::core::time::epoch_ms;
use crate::models::entities::Record;

/// The topic all record events are published on.
pub const RECORD_EVENTS_TOPIC: &str = "record-events";

/// Lifecycle event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordEventType {
    NewRecord,
    UpdateRecord,
    DeleteRecord,
}

/// One message on `record-events`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordEvent {
    pub event_type: RecordEventType,
    /// Epoch milliseconds at publish time.
    pub timestamp: i64,
    pub payload: Value,
    /// Partition key: the record's internal key.
    pub key: String,
}

impl RecordEvent {
    #[must_use]
    pub fn for_record(event_type: RecordEventType, record: &Record) -> Self {
        Self {
            event_type,
            timestamp: epoch_ms(),
            payload: record.to_event_payload(),
            key: record.key.clone(),
        }
    }
}

/// Something that can publish record events.
#[async_trait]
pub trait MessagingProducer: Send + Sync {
    async fn send(&self, topic: &str, event: RecordEvent) -> Result<()>;
}

/// Wraps a producer with bounded exponential retry; a budget exhausted on
/// transient broker failures surfaces as [`Error::Messaging`].
pub struct ReliableProducer {
    inner: Arc<dyn MessagingProducer>,
    policy: RetryPolicy,
}

impl ReliableProducer {
    #[must_use]
    pub fn new(inner: Arc<dyn MessagingProducer>) -> Self {
        Self {
            inner,
            policy: RetryPolicy::exponential(4),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl MessagingProducer for ReliableProducer {
    async fn send(&self, topic: &str, event: RecordEvent) -> Result<()> {
        let result = with_retry_or(&self.policy, Error::Messaging, || {
            let event = event.clone();
            async move { self.inner.send(topic, event).await }
        })
        .await;
        if result.is_ok() {
            debug!(topic, key = %event.key, event_type = ?event.event_type, "published record event");
        }
        result
    }
}
