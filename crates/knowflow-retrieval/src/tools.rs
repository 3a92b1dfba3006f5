//! Tools the model may call during the answer loop.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use knowflow::transformer::BlobTransformer;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::flatten::RecordMap;
use crate::language_models::ToolDefinition;

/// Name of the record-fetch tool bound on every answer loop.
pub const FETCH_FULL_RECORD: &str = "fetch_full_record";

/// Upper bound on tool output fed back to the model.
const MAX_TOOL_RESULT_CHARS: usize = 24_000;

/// A callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn call(&self, args: Value) -> Result<String>;

    /// The schema handed to the model.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Fetches the full payload of a record already present in the result set.
pub struct FetchFullRecordTool {
    transformer: Arc<BlobTransformer>,
    /// Snapshot of the records visible to this request.
    records: RecordMap,
    /// Record internal key -> virtual record id, for calls by record id.
    key_to_virtual: HashMap<String, String>,
}

impl FetchFullRecordTool {
    #[must_use]
    pub fn new(transformer: Arc<BlobTransformer>, records: &RecordMap) -> Self {
        let key_to_virtual = records
            .iter()
            .filter_map(|(vrid, record)| {
                record
                    .get("_key")
                    .or_else(|| record.get("recordKey"))
                    .and_then(Value::as_str)
                    .map(|key| (key.to_string(), vrid.clone()))
            })
            .collect();
        Self {
            transformer,
            records: records.clone(),
            key_to_virtual,
        }
    }

    fn resolve_virtual_id(&self, args: &Value) -> Result<String> {
        if let Some(vrid) = args.get("virtualRecordId").and_then(Value::as_str) {
            if self.records.contains_key(vrid) {
                return Ok(vrid.to_string());
            }
            return Err(Error::invalid_response(format!(
                "virtual record {vrid} is not part of this result set"
            )));
        }
        if let Some(record_id) = args.get("recordId").and_then(Value::as_str) {
            if let Some(vrid) = self.key_to_virtual.get(record_id) {
                return Ok(vrid.clone());
            }
            return Err(Error::invalid_response(format!(
                "record {record_id} is not part of this result set"
            )));
        }
        Err(Error::invalid_response(
            "expected 'virtualRecordId' or 'recordId' argument",
        ))
    }
}

#[async_trait]
impl Tool for FetchFullRecordTool {
    fn name(&self) -> &str {
        FETCH_FULL_RECORD
    }

    fn description(&self) -> &str {
        "Fetch the full content of a record from the retrieved result set. \
         Use when the provided blocks are insufficient to answer."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "virtualRecordId": {
                    "type": "string",
                    "description": "Virtual record id of a record from the result set"
                },
                "recordId": {
                    "type": "string",
                    "description": "Internal record id, as shown in the record header"
                }
            }
        })
    }

    async fn call(&self, args: Value) -> Result<String> {
        let virtual_record_id = self.resolve_virtual_id(&args)?;
        let record = self.transformer.fetch_record(&virtual_record_id).await?;
        let mut rendered = serde_json::to_string_pretty(&record)?;
        if rendered.len() > MAX_TOOL_RESULT_CHARS {
            let mut cut = MAX_TOOL_RESULT_CHARS;
            while !rendered.is_char_boundary(cut) {
                cut -= 1;
            }
            rendered.truncate(cut);
            rendered.push_str("\n... (truncated)");
        }
        Ok(rendered)
    }
}

