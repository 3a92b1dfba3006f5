//! Contract of the permission-scoped retrieval service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

fn default_block_type() -> String {
    "text".to_string()
}

/// One block returned by vector search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchBlock {
    #[serde(default)]
    pub virtual_record_id: Option<String>,
    #[serde(default)]
    pub block_index: i64,
    pub content: String,
    #[serde(default = "default_block_type")]
    pub block_type: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub metadata: Value,
}

impl SearchBlock {
    /// The virtual record id, falling back to the metadata field.
    #[must_use]
    pub fn resolve_virtual_record_id(&self) -> Option<String> {
        self.virtual_record_id.clone().or_else(|| {
            self.metadata
                .get("virtualRecordId")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
    }
}

/// Filtered vector search over the caller's permission scope.
#[async_trait]
pub trait SearchService: Send + Sync {
    async fn search_with_filters(
        &self,
        queries: &[String],
        org_id: &str,
        user_id: &str,
        limit: usize,
        filter_groups: Option<&Value>,
    ) -> Result<Vec<SearchBlock>>;
}
