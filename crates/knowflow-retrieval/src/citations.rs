//! The structured-citation envelope and its resolution back to records.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::flatten::RecordMap;

/// The JSON envelope the model must answer with once knowledge is injected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerEnvelope {
    pub answer: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub confidence: Option<String>,
    #[serde(default)]
    pub answer_match_type: Option<String>,
    #[serde(default)]
    pub block_numbers: Vec<String>,
    #[serde(default)]
    pub citations: Vec<Value>,
}

/// A cited block resolved to its record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CitedRecord {
    pub block_number: String,
    pub virtual_record_id: String,
    pub record: Value,
}

fn block_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::unwrap_used)] // pattern is a literal
    RE.get_or_init(|| Regex::new(r"^R(\d+)-(\d+)$").unwrap())
}

fn inline_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::unwrap_used)] // pattern is a literal
    RE.get_or_init(|| Regex::new(r"\[(R\d+-\d+)\]").unwrap())
}

/// Locate the JSON object inside model output that may carry markdown fences
/// or prose around it.
#[must_use]
pub fn extract_json(content: &str) -> Option<&str> {
    let trimmed = content.trim();
    if let Some(stripped) = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
    {
        let inner = stripped.strip_suffix("```").unwrap_or(stripped).trim();
        if !inner.is_empty() {
            return Some(inner);
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// Strictly parse the answer envelope out of model output.
pub fn parse_envelope(content: &str) -> Result<AnswerEnvelope> {
    let json = extract_json(content)
        .ok_or_else(|| Error::invalid_response("no JSON object in model output"))?;
    serde_json::from_str(json)
        .map_err(|e| Error::invalid_response(format!("bad answer envelope: {e}")))
}

/// Inline `[R#-#]` markers found in an answer body.
#[must_use]
pub fn inline_citation_markers(answer: &str) -> Vec<String> {
    inline_marker_re()
        .captures_iter(answer)
        .map(|cap| cap[1].to_string())
        .collect()
}

/// Resolve the envelope's block numbers to the records they cite.
///
/// `record_by_number` maps the sequential record number to a virtual record
/// id; unknown or malformed block numbers are skipped.
#[must_use]
pub fn resolve_citations(
    envelope: &AnswerEnvelope,
    record_by_number: &HashMap<usize, String>,
    records: &RecordMap,
) -> Vec<CitedRecord> {
    let mut cited = Vec::new();
    for block_number in &envelope.block_numbers {
        let Some(caps) = block_number_re().captures(block_number) else {
            continue;
        };
        let Ok(record_number) = caps[1].parse::<usize>() else {
            continue;
        };
        let Some(virtual_record_id) = record_by_number.get(&record_number) else {
            continue;
        };
        let record = records
            .get(virtual_record_id)
            .cloned()
            .unwrap_or(Value::Null);
        cited.push(CitedRecord {
            block_number: block_number.clone(),
            virtual_record_id: virtual_record_id.clone(),
            record,
        });
    }
    cited
}
