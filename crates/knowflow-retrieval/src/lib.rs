//! Knowflow retrieval orchestrator
//!
//! A staged question-answering pipeline over the ingested knowledge graph:
//! query rewrite and decomposition, permission-scoped vector search, block
//! flattening and reranking, citation numbering, synthetic tool-result
//! injection, and a bounded tool-use loop against a provider-agnostic
//! [`language_models::ChatModel`].
//!
//! Each stage emits status frames to an [`streaming::EventSink`]; the
//! non-streaming caller passes [`streaming::NullSink`].

pub mod citations;
pub mod error;
pub mod flatten;
pub mod language_models;
pub mod messages;
pub mod models;
pub mod modes;
pub mod orchestrator;
pub mod query_transform;
pub mod reranker;
pub mod search;
pub mod streaming;
pub mod tools;

pub use error::{Error, Result};
pub use orchestrator::{ChatAnswer, ChatQuery, RetrievalOrchestrator, MAX_TOOL_HOPS};
