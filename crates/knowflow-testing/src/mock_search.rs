//! Preset search results for orchestrator tests.

use std::sync::Arc;

use async_trait::async_trait;
use knowflow_retrieval::error::Result;
use knowflow_retrieval::search::{SearchBlock, SearchService};
use parking_lot::Mutex;
use serde_json::Value;

/// Returns a fixed block list and records the queries it was asked.
#[derive(Clone, Default)]
pub struct MockSearchService {
    results: Arc<Mutex<Vec<SearchBlock>>>,
    queries: Arc<Mutex<Vec<Vec<String>>>>,
    limits: Arc<Mutex<Vec<usize>>>,
}

impl MockSearchService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_results(self, results: Vec<SearchBlock>) -> Self {
        *self.results.lock() = results;
        self
    }

    /// Convenience: a text block for a virtual record.
    #[must_use]
    pub fn block(virtual_record_id: &str, block_index: i64, content: &str) -> SearchBlock {
        SearchBlock {
            virtual_record_id: Some(virtual_record_id.to_string()),
            block_index,
            content: content.to_string(),
            block_type: "text".to_string(),
            score: None,
            metadata: Value::Null,
        }
    }

    /// The query lists passed to each search call.
    #[must_use]
    pub fn seen_queries(&self) -> Vec<Vec<String>> {
        self.queries.lock().clone()
    }

    /// The limits passed to each search call.
    #[must_use]
    pub fn seen_limits(&self) -> Vec<usize> {
        self.limits.lock().clone()
    }
}

#[async_trait]
impl SearchService for MockSearchService {
    async fn search_with_filters(
        &self,
        queries: &[String],
        _org_id: &str,
        _user_id: &str,
        limit: usize,
        _filter_groups: Option<&Value>,
    ) -> Result<Vec<SearchBlock>> {
        self.queries.lock().push(queries.to_vec());
        self.limits.lock().push(limit);
        Ok(self.results.lock().clone())
    }
}
