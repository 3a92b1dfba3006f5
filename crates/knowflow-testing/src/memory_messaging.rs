//! Captures published record events for assertions.

use std::sync::Arc;

use async_trait::async_trait;
use knowflow::messaging::{MessagingProducer, RecordEvent, RecordEventType};
use knowflow::Result;
use parking_lot::Mutex;

/// Collects every event instead of publishing it.
#[derive(Clone, Default)]
pub struct MemoryProducer {
    events: Arc<Mutex<Vec<(String, RecordEvent)>>>,
}

impl MemoryProducer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured `(topic, event)` pairs.
    #[must_use]
    pub fn events(&self) -> Vec<(String, RecordEvent)> {
        self.events.lock().clone()
    }

    /// Events for a given record key, in publish order.
    #[must_use]
    pub fn events_for_key(&self, key: &str) -> Vec<RecordEvent> {
        self.events
            .lock()
            .iter()
            .filter(|(_, event)| event.key == key)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Count of events with the given type.
    #[must_use]
    pub fn count_of(&self, event_type: RecordEventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(_, event)| event.event_type == event_type)
            .count()
    }
}

#[async_trait]
impl MessagingProducer for MemoryProducer {
    async fn send(&self, topic: &str, event: RecordEvent) -> Result<()> {
        self.events.lock().push((topic.to_string(), event));
        Ok(())
    }
}
