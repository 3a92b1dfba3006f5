// Allow unwrap in testing utilities - test code should panic on errors
#![allow(clippy::unwrap_used)]

//! # Knowflow Testing Utilities
//!
//! In-memory implementations of every contract the core consumes, plus
//! scripted mocks for the retrieval side:
//!
//! - [`MemoryGraphStore`]: transactional graph fake (snapshot per tx,
//!   last committer wins)
//! - [`MemoryBlobStore`]: placeholder/signed-URL blob fake with an optional
//!   redirect mode
//! - [`MemoryProducer`]: captures published record events
//! - [`MemorySyncPointStore`]: plain map-backed sync points
//! - [`MockChatModel`]: scripted replies, recorded requests
//! - [`MockSearchService`]: preset search results

mod memory_blob;
mod memory_graph;
mod memory_messaging;
mod memory_sync_points;
mod mock_chat;
mod mock_search;

pub use memory_blob::MemoryBlobStore;
pub use memory_graph::MemoryGraphStore;
pub use memory_messaging::MemoryProducer;
pub use memory_sync_points::MemorySyncPointStore;
pub use mock_chat::MockChatModel;
pub use mock_search::MockSearchService;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        MemoryBlobStore, MemoryGraphStore, MemoryProducer, MemorySyncPointStore, MockChatModel,
        MockSearchService,
    };
}
