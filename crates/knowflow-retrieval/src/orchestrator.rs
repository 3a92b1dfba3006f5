//! The staged answer pipeline.
//!
//! Model selection, query rewrite, decomposition, filtered search, flatten,
//! rerank, block numbering, synthetic tool-result injection, and a bounded
//! tool-use loop. Every stage suspends at its external call, so dropping the
//! returned future between stages cancels the run; a canceled run emits no
//! final answer frame.

use std::collections::HashMap;
use std::sync::Arc;

use knowflow::transformer::BlobTransformer;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::citations::{parse_envelope, resolve_citations, CitedRecord};
use crate::error::{Error, Result};
use crate::flatten::{assign_block_numbers, flatten_results, sort_blocks, FlattenedBlock, RecordMap};
use crate::language_models::{AiReply, ChatModel, ChatRequest, ToolDefinition};
use crate::messages::Message;
use crate::models::ModelRegistry;
use crate::modes::{ChatMode, ModeConfig};
use crate::query_transform::{decompose_query, rewrite_followup, Conversation};
use crate::reranker::Reranker;
use crate::search::SearchService;
use crate::streaming::{status, EventSink, StreamFrame};
use crate::tools::{FetchFullRecordTool, Tool};

/// Upper bound on (LLM call -> tool execution -> re-call) iterations.
pub const MAX_TOOL_HOPS: usize = 4;

/// Name of the synthetic retrieval tool call carrying injected knowledge.
pub const RETRIEVAL_TOOL_NAME: &str = "internal_knowledge_retrieval";

/// Search limits double for complex queries, capped here.
const COMPLEX_QUERY_LIMIT_CAP: usize = 100;

/// Rows rendered per table block in the knowledge listing.
const TABLE_ROW_LIMIT: usize = 5;

/// Provider error fragments that mean "the tool call itself failed".
/// A safety net only; providers do not guarantee these strings.
const TOOL_FAILURE_MARKERS: &[&str] = &[
    "tool_use_failed",
    "tool use failed",
    "failed to call a function",
    "invalid tool",
    "function call failed",
];

fn is_provider_tool_failure(err: &Error) -> bool {
    let msg = err.to_string().to_lowercase();
    TOOL_FAILURE_MARKERS.iter().any(|m| msg.contains(m))
}

/// One retrieval question.
#[derive(Debug, Clone)]
pub struct ChatQuery {
    pub query: String,
    pub limit: usize,
    pub previous_conversations: Vec<Conversation>,
    pub filters: Option<Value>,
    pub model_key: Option<String>,
    pub model_name: Option<String>,
    pub chat_mode: ChatMode,
}

impl ChatQuery {
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: 50,
            previous_conversations: Vec::new(),
            filters: None,
            model_key: None,
            model_name: None,
            chat_mode: ChatMode::default(),
        }
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ChatMode) -> Self {
        self.chat_mode = mode;
        self
    }

    #[must_use]
    pub fn with_history(mut self, history: Vec<Conversation>) -> Self {
        self.previous_conversations = history;
        self
    }

    #[must_use]
    pub fn with_filters(mut self, filters: Value) -> Self {
        self.filters = Some(filters);
        self
    }

    #[must_use]
    pub fn with_model(mut self, model_key: impl Into<String>, model_name: impl Into<String>) -> Self {
        self.model_key = Some(model_key.into());
        self.model_name = Some(model_name.into());
        self
    }
}

/// The final, citation-resolved answer.
#[derive(Debug, Clone)]
pub struct ChatAnswer {
    pub answer: String,
    pub reason: Option<String>,
    pub confidence: Option<String>,
    pub answer_match_type: Option<String>,
    pub block_numbers: Vec<String>,
    pub citations: Vec<CitedRecord>,
}

/// Drives the staged pipeline against pluggable services.
pub struct RetrievalOrchestrator {
    models: ModelRegistry,
    search: Arc<dyn SearchService>,
    reranker: Arc<dyn Reranker>,
    transformer: Arc<BlobTransformer>,
    max_hops: usize,
}

impl RetrievalOrchestrator {
    #[must_use]
    pub fn new(
        models: ModelRegistry,
        search: Arc<dyn SearchService>,
        reranker: Arc<dyn Reranker>,
        transformer: Arc<BlobTransformer>,
    ) -> Self {
        Self {
            models,
            search,
            reranker,
            transformer,
            max_hops: MAX_TOOL_HOPS,
        }
    }

    #[must_use]
    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    /// Answer a query, emitting stage events to `sink`. On failure a single
    /// `error` frame is emitted and no partial answer is produced.
    pub async fn answer(
        &self,
        query: ChatQuery,
        org_id: &str,
        user_id: &str,
        sink: &dyn EventSink,
    ) -> Result<ChatAnswer> {
        sink.emit(StreamFrame::status(status::STARTED, "Processing your query..."))
            .await;
        match self.run(query, org_id, user_id, sink).await {
            Ok(answer) => Ok(answer),
            Err(err) => {
                sink.emit(StreamFrame::error(serde_json::json!({
                    "status_code": 500,
                    "message": err.to_string(),
                })))
                .await;
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        query: ChatQuery,
        org_id: &str,
        user_id: &str,
        sink: &dyn EventSink,
    ) -> Result<ChatAnswer> {
        let (model_info, model) =
            self.models.select(query.model_key.as_deref(), query.model_name.as_deref())?;
        let mode_config = query.chat_mode.config();
        info!(model = %model_info.model_name, mode = ?query.chat_mode, "starting retrieval run");

        // Stage: follow-up transformation.
        let mut user_query = query.query.clone();
        if !query.previous_conversations.is_empty() {
            sink.emit(StreamFrame::status(
                status::TRANSFORMING,
                "Understanding conversation context...",
            ))
            .await;
            user_query =
                rewrite_followup(model.as_ref(), &user_query, &query.previous_conversations)
                    .await?;
        }

        // Stage: decomposition.
        let mut sub_queries = vec![user_query.clone()];
        if !query.chat_mode.is_quick() {
            sink.emit(StreamFrame::status(status::ANALYZING, "Analyzing your question..."))
                .await;
            sub_queries = decompose_query(model.as_ref(), &user_query).await?;
            if sub_queries.is_empty() {
                sub_queries = vec![user_query.clone()];
            }
        }
        let is_complex = sub_queries.len() > 1;
        let limit = if is_complex {
            (query.limit * 2).min(COMPLEX_QUERY_LIMIT_CAP)
        } else {
            query.limit
        };

        // Stage: filtered search.
        sink.emit(StreamFrame::status(status::SEARCHING, "Searching knowledge base..."))
            .await;
        let blocks = self
            .search
            .search_with_filters(&sub_queries, org_id, user_id, limit, query.filters.as_ref())
            .await?;
        debug!(count = blocks.len(), "search returned blocks");

        // Stage: flatten.
        sink.emit(StreamFrame::status(status::PROCESSING, "Processing search results..."))
            .await;
        let mut records: RecordMap = HashMap::new();
        let mut flattened = flatten_results(blocks, &self.transformer, &mut records).await?;

        // Stage: rerank.
        if !query.chat_mode.is_quick() && flattened.len() > 1 {
            sink.emit(StreamFrame::status(status::RANKING, "Ranking relevant information..."))
                .await;
            flattened = self.reranker.rerank(&user_query, flattened, limit).await?;
        }
        sort_blocks(&mut flattened);
        flattened.truncate(limit);

        // Stage: block numbering.
        let record_by_number = assign_block_numbers(&mut flattened);

        // Stage: message assembly + injection.
        let mut messages = vec![Message::system(mode_config.system_prompt)];
        for turn in &query.previous_conversations {
            if turn.role == "user_query" {
                messages.push(Message::human(turn.content.clone()));
            } else {
                messages.push(Message::ai(turn.content.clone()));
            }
        }
        messages.push(Message::human(user_query.clone()));

        let knowledge_injected = !flattened.is_empty();
        if knowledge_injected {
            let tool_call_id = format!(
                "call_knowledge_retrieval_{}",
                &uuid::Uuid::new_v4().simple().to_string()[..8]
            );
            let listing = render_knowledge_listing(&flattened, &records);
            messages.push(Message::ai_with_tool_calls(
                "",
                vec![crate::messages::ToolCall {
                    id: tool_call_id.clone(),
                    name: RETRIEVAL_TOOL_NAME.to_string(),
                    args: serde_json::json!({
                        "query": user_query,
                        "result_count": flattened.len(),
                    }),
                }],
            ));
            messages.push(Message::tool(listing, tool_call_id));
            info!(blocks = flattened.len(), "injected knowledge as tool result");
        }

        // Stage: tool-use loop.
        let tools: Vec<Box<dyn Tool>> = vec![Box::new(FetchFullRecordTool::new(
            self.transformer.clone(),
            &records,
        ))];
        let reply = self
            .tool_loop(model.as_ref(), &mode_config, messages, &tools, sink)
            .await?;

        // Stage: citation assembly.
        Ok(self.assemble_answer(&reply, &record_by_number, &records, knowledge_injected))
    }

    async fn tool_loop(
        &self,
        model: &dyn ChatModel,
        mode_config: &ModeConfig,
        mut messages: Vec<Message>,
        tools: &[Box<dyn Tool>],
        sink: &dyn EventSink,
    ) -> Result<AiReply> {
        let tool_defs: Vec<ToolDefinition> = tools.iter().map(|t| t.definition()).collect();
        let tool_names: Vec<&str> = tools.iter().map(|t| t.name()).collect();

        let request = |messages: &[Message], with_tools: bool| {
            let mut request = ChatRequest::new(messages.to_vec())
                .with_temperature(mode_config.temperature)
                .with_max_tokens(mode_config.max_tokens);
            if with_tools {
                request = request.with_tools(tool_defs.clone());
            }
            request
        };

        let mut reply = match model.generate(request(&messages, true)).await {
            Ok(reply) => reply,
            Err(err) if is_provider_tool_failure(&err) => {
                warn!(error = %err, "provider rejected tool use; reflecting without tools");
                messages.push(Message::human(provider_failure_reflection(&tool_names)));
                return model.generate(request(&messages, false)).await;
            }
            Err(err) => return Err(err),
        };

        let mut hops = 0;
        while reply.has_tool_calls() && hops < self.max_hops {
            let mut tool_messages = Vec::new();
            for call in &reply.tool_calls {
                match tools.iter().find(|t| t.name() == call.name) {
                    None => {
                        warn!(tool = %call.name, "model called unknown tool");
                        tool_messages.push(Message::tool(
                            unknown_tool_reflection(&call.name, &tool_names),
                            call.id.clone(),
                        ));
                    }
                    Some(tool) => {
                        sink.emit(StreamFrame::status(
                            status::RETRIEVING,
                            "Gathering full record content...",
                        ))
                        .await;
                        let result = match tool.call(call.args.clone()).await {
                            Ok(result) => result,
                            Err(err) => serde_json::json!({
                                "ok": false,
                                "error": err.to_string(),
                            })
                            .to_string(),
                        };
                        tool_messages.push(Message::tool(result, call.id.clone()));
                    }
                }
            }

            messages.push(Message::ai_with_tool_calls(
                reply.content.clone(),
                reply.tool_calls.clone(),
            ));
            messages.append(&mut tool_messages);

            reply = match model.generate(request(&messages, true)).await {
                Ok(reply) => reply,
                Err(err) if is_provider_tool_failure(&err) => {
                    warn!(error = %err, "provider rejected tool use mid-loop; reflecting without tools");
                    messages.push(Message::human(
                        "Error: the provider rejected the function call. Provide your final \
                         answer directly as a JSON object without using any tools, based only \
                         on the blocks already provided."
                            .to_string(),
                    ));
                    return model.generate(request(&messages, false)).await;
                }
                Err(err) => return Err(err),
            };
            hops += 1;
        }
        Ok(reply)
    }

    fn assemble_answer(
        &self,
        reply: &AiReply,
        record_by_number: &HashMap<usize, String>,
        records: &RecordMap,
        knowledge_injected: bool,
    ) -> ChatAnswer {
        match parse_envelope(&reply.content) {
            Ok(envelope) => {
                let citations = resolve_citations(&envelope, record_by_number, records);
                ChatAnswer {
                    answer: envelope.answer,
                    reason: envelope.reason,
                    confidence: envelope.confidence,
                    answer_match_type: envelope.answer_match_type,
                    block_numbers: envelope.block_numbers,
                    citations,
                }
            }
            Err(err) => {
                if knowledge_injected {
                    warn!(error = %err, "model did not return the citation envelope; passing raw answer through");
                }
                ChatAnswer {
                    answer: reply.content.clone(),
                    reason: None,
                    confidence: None,
                    answer_match_type: None,
                    block_numbers: Vec::new(),
                    citations: Vec::new(),
                }
            }
        }
    }
}

fn provider_failure_reflection(tool_names: &[&str]) -> String {
    format!(
        "Error: the AI provider rejected the function call. This usually means invalid \
         arguments, a non-existent tool, or a malformed call.\n\nAvailable tools: {}.\n\n\
         Provide your final answer directly as a JSON object with this structure: \
         {{\"answer\": \"...\", \"reason\": \"...\", \"confidence\": \"High/Medium/Low\", \
         \"answerMatchType\": \"Derived From Chunks\", \"blockNumbers\": [\"R1-1\"]}}. \
         Do NOT attempt to call any tools.",
        tool_names.join(", ")
    )
}

fn unknown_tool_reflection(name: &str, tool_names: &[&str]) -> String {
    format!(
        "Error: tool '{name}' is not a valid tool. Available tools are: {}. Provide your \
         final answer directly as a JSON object with this structure: {{\"answer\": \"...\", \
         \"reason\": \"...\", \"confidence\": \"High/Medium/Low\", \"answerMatchType\": \
         \"Derived From Chunks\", \"blockNumbers\": [\"R1-1\"]}}. Do NOT wrap your response \
         in any tool call.",
        tool_names.join(", ")
    )
}

/// The strictly formatted block listing injected as the synthetic tool
/// result: record headers, then numbered blocks, tables rendered with rows.
fn render_knowledge_listing(blocks: &[FlattenedBlock], records: &RecordMap) -> String {
    let mut parts: Vec<String> = vec![
        "## Internal Knowledge Retrieval Results".to_string(),
        String::new(),
        "Internal knowledge has been retrieved. You MUST use this information to answer \
         the query, and you MUST respond as structured JSON with citations."
            .to_string(),
        String::new(),
        "Required JSON format:".to_string(),
        "```json".to_string(),
        "{".to_string(),
        "  \"answer\": \"Your answer in markdown with citations like [R1-1][R2-3]\",".to_string(),
        "  \"reason\": \"How you derived the answer from the blocks\",".to_string(),
        "  \"confidence\": \"Very High | High | Medium | Low\",".to_string(),
        "  \"answerMatchType\": \"Derived From Chunks\",".to_string(),
        "  \"blockNumbers\": [\"R1-1\", \"R2-3\"],".to_string(),
        "  \"citations\": []".to_string(),
        "}".to_string(),
        "```".to_string(),
        String::new(),
        "Citation rules: cite with the exact block numbers shown below, one per bracket \
         ([R1-1][R2-3], never [R1-1, R2-3]), immediately after each claim, and list every \
         referenced block number in blockNumbers."
            .to_string(),
        String::new(),
        "---".to_string(),
        String::new(),
    ];

    let mut seen_records = std::collections::HashSet::new();
    let mut open = false;
    for block in blocks {
        if seen_records.insert(block.virtual_record_id.clone()) {
            if open {
                parts.push("</record>".to_string());
            }
            open = true;

            let record = records.get(&block.virtual_record_id);
            let record_id = record
                .and_then(|r| r.get("_key").or_else(|| r.get("recordKey")))
                .and_then(Value::as_str)
                .unwrap_or("Not available");
            let record_name = record
                .and_then(|r| r.get("recordName"))
                .and_then(Value::as_str)
                .unwrap_or("Not available");

            parts.push("<record>".to_string());
            parts.push(format!("* Record Id: {record_id}"));
            parts.push(format!("* Record Name: {record_name}"));
            parts.push(String::new());
        }

        let block_number = block.block_number.as_deref().unwrap_or("R?-?");
        if block.block_type == "table" {
            let summary = block
                .metadata
                .get("tableSummary")
                .and_then(Value::as_str)
                .unwrap_or(&block.content);
            parts.push(format!("* Block Group Number: {block_number}"));
            parts.push("* Block Group Type: table".to_string());
            parts.push(format!("* Table Summary: {summary}"));
            parts.push("* Table Rows/Blocks:".to_string());
            if let Some(rows) = block.metadata.get("rows").and_then(Value::as_array) {
                for row in rows.iter().take(TABLE_ROW_LIMIT) {
                    let row_index = row
                        .get("blockIndex")
                        .and_then(Value::as_i64)
                        .unwrap_or(block.block_index);
                    let row_content = row.get("content").and_then(Value::as_str).unwrap_or("");
                    let row_number = block_number
                        .split('-')
                        .next()
                        .map(|record_part| format!("{record_part}-{row_index}"))
                        .unwrap_or_else(|| block_number.to_string());
                    parts.push(format!("  - Block Number: {row_number}"));
                    parts.push(format!("  - Block Content: {row_content}"));
                }
            }
        } else {
            parts.push(format!("* Block Number: {block_number}"));
            parts.push(format!("* Block Type: {}", block.block_type));
            parts.push(format!("* Block Content: {}", block.content));
        }
        parts.push(String::new());
    }
    if open {
        parts.push("</record>".to_string());
    }

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_failure_markers_match_case_insensitively() {
        assert!(is_provider_tool_failure(&Error::model(
            "Provider said: TOOL_USE_FAILED at hop 2"
        )));
        assert!(!is_provider_tool_failure(&Error::model("rate limited")));
    }

    #[test]
    fn listing_renders_records_and_blocks() {
        let blocks = vec![
            FlattenedBlock {
                virtual_record_id: "v1".into(),
                block_index: 0,
                content: "Q3 forecast is 12M".into(),
                block_type: "text".into(),
                score: None,
                block_number: Some("R1-0".into()),
                metadata: Value::Null,
            },
            FlattenedBlock {
                virtual_record_id: "v1".into(),
                block_index: 1,
                content: "Risks: fx exposure".into(),
                block_type: "text".into(),
                score: None,
                block_number: Some("R1-1".into()),
                metadata: Value::Null,
            },
        ];
        let records: RecordMap = [(
            "v1".to_string(),
            serde_json::json!({"_key": "rk-1", "recordName": "q3.xlsx"}),
        )]
        .into_iter()
        .collect();

        let listing = render_knowledge_listing(&blocks, &records);
        assert!(listing.contains("<record>"));
        assert!(listing.contains("* Record Name: q3.xlsx"));
        assert!(listing.contains("* Block Number: R1-0"));
        assert!(listing.contains("* Block Number: R1-1"));
        assert_eq!(listing.matches("</record>").count(), 1);
    }

    #[test]
    fn listing_renders_table_rows() {
        let blocks = vec![FlattenedBlock {
            virtual_record_id: "v1".into(),
            block_index: 2,
            content: "quarterly numbers".into(),
            block_type: "table".into(),
            score: None,
            block_number: Some("R1-2".into()),
            metadata: serde_json::json!({
                "tableSummary": "Revenue by quarter",
                "rows": [
                    {"blockIndex": 3, "content": "Q1, 10M"},
                    {"blockIndex": 4, "content": "Q2, 11M"}
                ]
            }),
        }];
        let records: RecordMap = HashMap::new();

        let listing = render_knowledge_listing(&blocks, &records);
        assert!(listing.contains("* Block Group Number: R1-2"));
        assert!(listing.contains("* Table Summary: Revenue by quarter"));
        assert!(listing.contains("  - Block Number: R1-3"));
        assert!(listing.contains("  - Block Content: Q2, 11M"));
    }
}
