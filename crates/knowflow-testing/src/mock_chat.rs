//! Scripted chat model for orchestrator tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use knowflow_retrieval::error::{Error, Result};
use knowflow_retrieval::language_models::{AiReply, ChatModel, ChatRequest};
use knowflow_retrieval::messages::ToolCall;
use parking_lot::Mutex;

enum Scripted {
    Reply(AiReply),
    Failure(String),
}

/// Replays a fixed sequence of replies and records every request.
///
/// When the script runs dry the model answers with a fixed fallback text, so
/// open-ended loops still terminate.
#[derive(Clone)]
pub struct MockChatModel {
    name: String,
    script: Arc<Mutex<VecDeque<Scripted>>>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
    fallback: String,
}

impl MockChatModel {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            fallback: "{\"answer\": \"fallback\", \"blockNumbers\": []}".to_string(),
        }
    }

    /// Queue a plain text reply.
    #[must_use]
    pub fn with_reply(self, content: impl Into<String>) -> Self {
        self.script
            .lock()
            .push_back(Scripted::Reply(AiReply::text(content)));
        self
    }

    /// Queue a reply carrying tool calls.
    #[must_use]
    pub fn with_tool_call_reply(self, tool_calls: Vec<ToolCall>) -> Self {
        self.script.lock().push_back(Scripted::Reply(AiReply {
            content: String::new(),
            tool_calls,
        }));
        self
    }

    /// Queue a provider failure with the given message.
    #[must_use]
    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.script
            .lock()
            .push_back(Scripted::Failure(message.into()));
        self
    }

    /// Override the text returned once the script is exhausted.
    #[must_use]
    pub fn with_fallback(mut self, content: impl Into<String>) -> Self {
        self.fallback = content.into();
        self
    }

    /// Every request the model has seen so far.
    #[must_use]
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    /// Number of generate calls made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: ChatRequest) -> Result<AiReply> {
        self.requests.lock().push(request);
        match self.script.lock().pop_front() {
            Some(Scripted::Reply(reply)) => Ok(reply),
            Some(Scripted::Failure(message)) => Err(Error::Model(message)),
            None => Ok(AiReply::text(self.fallback.clone())),
        }
    }
}
