//! Reranking of flattened blocks before the final listing.

use async_trait::async_trait;

use crate::error::Result;
use crate::flatten::FlattenedBlock;

/// Reorders blocks by relevance to the query and truncates to `top_k`.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        documents: Vec<FlattenedBlock>,
        top_k: usize,
    ) -> Result<Vec<FlattenedBlock>>;
}

/// Keeps the retrieval order; used in quick mode and in tests.
pub struct NoopReranker;

#[async_trait]
impl Reranker for NoopReranker {
    async fn rerank(
        &self,
        _query: &str,
        mut documents: Vec<FlattenedBlock>,
        top_k: usize,
    ) -> Result<Vec<FlattenedBlock>> {
        documents.truncate(top_k);
        Ok(documents)
    }
}

/// Orders by the vector-search score when present.
pub struct ScoreReranker;

#[async_trait]
impl Reranker for ScoreReranker {
    async fn rerank(
        &self,
        _query: &str,
        mut documents: Vec<FlattenedBlock>,
        top_k: usize,
    ) -> Result<Vec<FlattenedBlock>> {
        documents.sort_by(|a, b| {
            b.score
                .unwrap_or(f64::MIN)
                .partial_cmp(&a.score.unwrap_or(f64::MIN))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        documents.truncate(top_k);
        Ok(documents)
    }
}
