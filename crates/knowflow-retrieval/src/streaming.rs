//! Event frames for the caller's real-time channel.
//!
//! Stages emit `{event, data}` frames: status updates, a single `error`
//! frame on failure, and provider events passed through verbatim. The
//! non-streaming variant discards them via [`NullSink`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known status values.
pub mod status {
    pub const STARTED: &str = "started";
    pub const TRANSFORMING: &str = "transforming";
    pub const ANALYZING: &str = "analyzing";
    pub const SEARCHING: &str = "searching";
    pub const PROCESSING: &str = "processing";
    pub const RANKING: &str = "ranking";
    pub const RETRIEVING: &str = "retrieving";
}

/// One frame on the event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamFrame {
    pub event: String,
    pub data: Value,
}

impl StreamFrame {
    #[must_use]
    pub fn status(status: &str, message: &str) -> Self {
        Self {
            event: "status".to_string(),
            data: serde_json::json!({"status": status, "message": message}),
        }
    }

    #[must_use]
    pub fn error(data: Value) -> Self {
        Self {
            event: "error".to_string(),
            data,
        }
    }
}

/// Receives frames from the pipeline.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, frame: StreamFrame);
}

/// Discards all frames.
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn emit(&self, _frame: StreamFrame) {}
}

/// Forwards frames into an unbounded channel, e.g. an SSE writer task.
pub struct ChannelSink {
    tx: tokio::sync::mpsc::UnboundedSender<StreamFrame>,
}

impl ChannelSink {
    #[must_use]
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<StreamFrame>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, frame: StreamFrame) {
        // A disconnected consumer just means nobody is listening anymore.
        let _ = self.tx.send(frame);
    }
}
