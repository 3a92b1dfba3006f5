//! Flattening of raw search results into citation-ready blocks.
//!
//! Each block is joined with its parent record's metadata (fetched once per
//! virtual record through the blob read path) and later labeled with a
//! `R{record}-{block_index}` citation identity.

use std::collections::HashMap;

use knowflow::transformer::BlobTransformer;
use serde_json::Value;
use tracing::warn;

use crate::error::Result;
use crate::search::SearchBlock;

/// Per-request map from virtual record id to the record payload, kept for
/// citation assembly.
pub type RecordMap = HashMap<String, Value>;

/// A search block joined with record context.
#[derive(Debug, Clone)]
pub struct FlattenedBlock {
    pub virtual_record_id: String,
    pub block_index: i64,
    pub content: String,
    pub block_type: String,
    pub score: Option<f64>,
    /// Citation identity, assigned after the final ordering is known.
    pub block_number: Option<String>,
    pub metadata: Value,
}

/// Join each block with its record payload. Blocks without a resolvable
/// virtual record id are dropped; a failed record fetch keeps the block but
/// leaves no citation metadata behind.
pub async fn flatten_results(
    blocks: Vec<SearchBlock>,
    transformer: &BlobTransformer,
    record_map: &mut RecordMap,
) -> Result<Vec<FlattenedBlock>> {
    let mut flattened = Vec::with_capacity(blocks.len());
    for block in blocks {
        let Some(virtual_record_id) = block.resolve_virtual_record_id() else {
            warn!("search block without virtual record id; dropping");
            continue;
        };

        if !record_map.contains_key(&virtual_record_id) {
            match transformer.fetch_record(&virtual_record_id).await {
                Ok(record) => {
                    record_map.insert(virtual_record_id.clone(), record);
                }
                Err(err) => {
                    warn!(virtual_record_id, error = %err, "failed to fetch record for block");
                }
            }
        }

        flattened.push(FlattenedBlock {
            virtual_record_id,
            block_index: block.block_index,
            content: block.content,
            block_type: block.block_type,
            score: block.score,
            block_number: None,
            metadata: block.metadata,
        });
    }
    Ok(flattened)
}

/// Stable order for the final listing: `(virtual_record_id, block_index)`.
pub fn sort_blocks(blocks: &mut [FlattenedBlock]) {
    blocks.sort_by(|a, b| {
        (a.virtual_record_id.as_str(), a.block_index)
            .cmp(&(b.virtual_record_id.as_str(), b.block_index))
    });
}

/// Number each virtual record in first-seen order and stamp every block with
/// its `R{record}-{block_index}` citation identity. Returns record number ->
/// virtual record id.
pub fn assign_block_numbers(blocks: &mut [FlattenedBlock]) -> HashMap<usize, String> {
    let mut record_numbers: HashMap<String, usize> = HashMap::new();
    let mut by_number = HashMap::new();
    let mut next = 1usize;

    for block in blocks.iter_mut() {
        let number = *record_numbers
            .entry(block.virtual_record_id.clone())
            .or_insert_with(|| {
                let n = next;
                by_number.insert(n, block.virtual_record_id.clone());
                next += 1;
                n
            });
        block.block_number = Some(format!("R{number}-{}", block.block_index));
    }
    by_number
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(vrid: &str, index: i64) -> FlattenedBlock {
        FlattenedBlock {
            virtual_record_id: vrid.to_string(),
            block_index: index,
            content: format!("content {index}"),
            block_type: "text".to_string(),
            score: None,
            block_number: None,
            metadata: Value::Null,
        }
    }

    #[test]
    fn numbering_follows_first_seen_record_order() {
        let mut blocks = vec![block("v-b", 0), block("v-b", 1), block("v-a", 3)];
        let by_number = assign_block_numbers(&mut blocks);

        assert_eq!(blocks[0].block_number.as_deref(), Some("R1-0"));
        assert_eq!(blocks[1].block_number.as_deref(), Some("R1-1"));
        assert_eq!(blocks[2].block_number.as_deref(), Some("R2-3"));
        assert_eq!(by_number[&1], "v-b");
        assert_eq!(by_number[&2], "v-a");
    }

    #[test]
    fn sorting_is_stable_by_record_and_index() {
        let mut blocks = vec![block("v-b", 1), block("v-a", 2), block("v-b", 0)];
        sort_blocks(&mut blocks);
        assert_eq!(
            blocks
                .iter()
                .map(|b| (b.virtual_record_id.as_str(), b.block_index))
                .collect::<Vec<_>>(),
            vec![("v-a", 2), ("v-b", 0), ("v-b", 1)]
        );
    }
}
