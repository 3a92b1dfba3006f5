//! Orchestrator pipeline against scripted model, search, and stores.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;

use knowflow::models::{Record, RecordGroupType, RecordType};
use knowflow::transformer::BlobTransformer;
use knowflow_retrieval::messages::{Message, ToolCall};
use knowflow_retrieval::models::{ModelInfo, ModelRegistry};
use knowflow_retrieval::modes::ChatMode;
use knowflow_retrieval::orchestrator::{ChatQuery, RetrievalOrchestrator, RETRIEVAL_TOOL_NAME};
use knowflow_retrieval::reranker::NoopReranker;
use knowflow_retrieval::streaming::{ChannelSink, NullSink};
use knowflow_retrieval::tools::FETCH_FULL_RECORD;
use knowflow_testing::{MemoryBlobStore, MemoryGraphStore, MockChatModel, MockSearchService};

const DECOMPOSE_SINGLE: &str = r#"{"queries": ["summarize the Q3 forecast"]}"#;

fn registry(model: &MockChatModel) -> ModelRegistry {
    ModelRegistry::new().with_model(
        ModelInfo {
            model_key: "k1".into(),
            model_name: "mock-1".into(),
            provider: "mock".into(),
            is_multimodal: false,
        },
        Arc::new(model.clone()),
    )
}

/// Store one record payload and return its transformer.
async fn seeded_transformer(virtual_record_id: &str) -> Arc<BlobTransformer> {
    let blob = MemoryBlobStore::new();
    let graph = MemoryGraphStore::with_org("org-1");
    let transformer = BlobTransformer::new(Arc::new(blob), Arc::new(graph));

    let record = Record::new(
        "org-1",
        "q3.xlsx",
        RecordType::File,
        "DRIVE",
        "inst-1",
        "F1",
        "DRV",
        RecordGroupType::Drive,
    )
    .with_revision("r1")
    .with_virtual_record_id(virtual_record_id);
    transformer.store_record(&record).await.unwrap();
    Arc::new(transformer)
}

fn two_block_search(virtual_record_id: &str) -> MockSearchService {
    MockSearchService::new().with_results(vec![
        MockSearchService::block(virtual_record_id, 0, "Q3 forecast is 12M"),
        MockSearchService::block(virtual_record_id, 1, "Risks: fx exposure"),
    ])
}

#[tokio::test]
async fn citation_flow_labels_blocks_and_resolves_records() {
    let answer_envelope = r#"{"answer": "Forecast is 12M [R1-0], risk is fx [R1-1]",
        "reason": "from the forecast blocks",
        "confidence": "High",
        "answerMatchType": "Derived From Chunks",
        "blockNumbers": ["R1-0", "R1-1"]}"#;
    let model = MockChatModel::new("mock-1")
        .with_reply(DECOMPOSE_SINGLE)
        .with_reply(answer_envelope);
    let search = two_block_search("v-1");
    let orchestrator = RetrievalOrchestrator::new(
        registry(&model),
        Arc::new(search),
        Arc::new(NoopReranker),
        seeded_transformer("v-1").await,
    );

    let answer = orchestrator
        .answer(
            ChatQuery::new("summarize the Q3 forecast"),
            "org-1",
            "user-1",
            &NullSink,
        )
        .await
        .unwrap();

    assert_eq!(answer.block_numbers, vec!["R1-0", "R1-1"]);
    assert_eq!(answer.citations.len(), 2);
    assert!(answer
        .citations
        .iter()
        .all(|c| c.virtual_record_id == "v-1"));
    assert_eq!(answer.citations[0].record["recordName"], "q3.xlsx");
    assert_eq!(answer.confidence.as_deref(), Some("High"));

    // The knowledge went in as a synthetic tool call + tool result, with
    // both blocks labeled.
    let final_request = model.requests().pop().unwrap();
    let has_synthetic_call = final_request.messages.iter().any(|m| match m {
        Message::Ai { tool_calls, .. } => {
            tool_calls.iter().any(|c| c.name == RETRIEVAL_TOOL_NAME)
        }
        _ => false,
    });
    assert!(has_synthetic_call);
    let listing = final_request
        .messages
        .iter()
        .find_map(|m| match m {
            Message::Tool { content, .. } => Some(content.clone()),
            _ => None,
        })
        .unwrap();
    assert!(listing.contains("* Block Number: R1-0"));
    assert!(listing.contains("* Block Number: R1-1"));
    // Retrieved content rides in the tool result, not the system prompt.
    let system = final_request
        .messages
        .iter()
        .find_map(|m| match m {
            Message::System { content } => Some(content.clone()),
            _ => None,
        })
        .unwrap();
    assert!(!system.contains("R1-0"));
}

#[tokio::test]
async fn quick_mode_skips_decomposition_and_keeps_limit() {
    let model = MockChatModel::new("mock-1")
        .with_reply(r#"{"answer": "quick answer", "blockNumbers": []}"#);
    let search = two_block_search("v-1");
    let orchestrator = RetrievalOrchestrator::new(
        registry(&model),
        Arc::new(search.clone()),
        Arc::new(NoopReranker),
        seeded_transformer("v-1").await,
    );

    orchestrator
        .answer(
            ChatQuery::new("quick question").with_mode(ChatMode::Quick),
            "org-1",
            "user-1",
            &NullSink,
        )
        .await
        .unwrap();

    // One model call: the answer itself. No decomposition round.
    assert_eq!(model.call_count(), 1);
    assert_eq!(search.seen_limits(), vec![50]);
}

#[tokio::test]
async fn complex_queries_double_the_limit_up_to_the_cap() {
    let model = MockChatModel::new("mock-1")
        .with_reply(r#"{"queries": ["forecast revenue", "forecast costs"]}"#)
        .with_reply(r#"{"answer": "done", "blockNumbers": []}"#);
    let search = MockSearchService::new();
    let orchestrator = RetrievalOrchestrator::new(
        registry(&model),
        Arc::new(search.clone()),
        Arc::new(NoopReranker),
        seeded_transformer("v-1").await,
    );

    orchestrator
        .answer(
            ChatQuery::new("compare forecast revenue and costs").with_limit(60),
            "org-1",
            "user-1",
            &NullSink,
        )
        .await
        .unwrap();

    assert_eq!(search.seen_limits(), vec![100]);
    assert_eq!(
        search.seen_queries(),
        vec![vec!["forecast revenue".to_string(), "forecast costs".to_string()]]
    );
}

#[tokio::test]
async fn unknown_tool_call_gets_a_reflection_message() {
    let model = MockChatModel::new("mock-1")
        .with_reply(DECOMPOSE_SINGLE)
        .with_tool_call_reply(vec![ToolCall {
            id: "c1".into(),
            name: "database_query".into(),
            args: serde_json::json!({}),
        }])
        .with_reply(r#"{"answer": "direct answer", "blockNumbers": ["R1-0"]}"#);
    let orchestrator = RetrievalOrchestrator::new(
        registry(&model),
        Arc::new(two_block_search("v-1")),
        Arc::new(NoopReranker),
        seeded_transformer("v-1").await,
    );

    let answer = orchestrator
        .answer(ChatQuery::new("question"), "org-1", "user-1", &NullSink)
        .await
        .unwrap();
    assert_eq!(answer.answer, "direct answer");

    // The reflection went back as the tool's result.
    let requests = model.requests();
    assert_eq!(requests.len(), 3);
    let reflection = requests[2]
        .messages
        .iter()
        .find_map(|m| match m {
            Message::Tool { content, tool_call_id } if tool_call_id == "c1" => {
                Some(content.clone())
            }
            _ => None,
        })
        .unwrap();
    assert!(reflection.contains("not a valid tool"));
    assert!(reflection.contains(FETCH_FULL_RECORD));
}

#[tokio::test]
async fn fetch_full_record_hop_feeds_content_back() {
    let model = MockChatModel::new("mock-1")
        .with_reply(DECOMPOSE_SINGLE)
        .with_tool_call_reply(vec![ToolCall {
            id: "c1".into(),
            name: FETCH_FULL_RECORD.into(),
            args: serde_json::json!({"virtualRecordId": "v-1"}),
        }])
        .with_reply(r#"{"answer": "full answer [R1-0]", "blockNumbers": ["R1-0"]}"#);
    let orchestrator = RetrievalOrchestrator::new(
        registry(&model),
        Arc::new(two_block_search("v-1")),
        Arc::new(NoopReranker),
        seeded_transformer("v-1").await,
    );

    let answer = orchestrator
        .answer(ChatQuery::new("question"), "org-1", "user-1", &NullSink)
        .await
        .unwrap();
    assert_eq!(answer.block_numbers, vec!["R1-0"]);

    let requests = model.requests();
    assert_eq!(requests.len(), 3);
    let tool_result = requests[2]
        .messages
        .iter()
        .find_map(|m| match m {
            Message::Tool { content, tool_call_id } if tool_call_id == "c1" => {
                Some(content.clone())
            }
            _ => None,
        })
        .unwrap();
    assert!(tool_result.contains("q3.xlsx"));
}

#[tokio::test]
async fn provider_tool_failure_falls_back_to_a_tool_free_call() {
    let model = MockChatModel::new("mock-1")
        .with_reply(DECOMPOSE_SINGLE)
        .with_failure("provider returned tool_use_failed for this request")
        .with_reply(r#"{"answer": "salvaged", "blockNumbers": []}"#);
    let orchestrator = RetrievalOrchestrator::new(
        registry(&model),
        Arc::new(two_block_search("v-1")),
        Arc::new(NoopReranker),
        seeded_transformer("v-1").await,
    );

    let answer = orchestrator
        .answer(ChatQuery::new("question"), "org-1", "user-1", &NullSink)
        .await
        .unwrap();
    assert_eq!(answer.answer, "salvaged");

    let requests = model.requests();
    assert_eq!(requests.len(), 3);
    // The fallback re-invoke binds no tools.
    assert!(requests[2].tools.is_empty());
    assert!(requests[1].tools.iter().any(|t| t.name == FETCH_FULL_RECORD));
}

#[tokio::test]
async fn failures_emit_a_single_error_frame_and_no_answer() {
    let model = MockChatModel::new("mock-1").with_failure("model exploded");
    let orchestrator = RetrievalOrchestrator::new(
        registry(&model),
        Arc::new(MockSearchService::new()),
        Arc::new(NoopReranker),
        seeded_transformer("v-1").await,
    );

    let (sink, mut rx) = ChannelSink::new();
    let result = orchestrator
        .answer(ChatQuery::new("question"), "org-1", "user-1", &sink)
        .await;
    assert!(result.is_err());

    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    assert_eq!(frames.first().unwrap().event, "status");
    assert_eq!(frames.first().unwrap().data["status"], "started");
    let errors: Vec<_> = frames.iter().filter(|f| f.event == "error").collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].data["message"]
        .as_str()
        .unwrap()
        .contains("model exploded"));
}

#[tokio::test]
async fn followup_queries_are_rewritten_first() {
    let model = MockChatModel::new("mock-1")
        .with_reply("what is the Q3 forecast for EMEA?") // rewrite
        .with_reply(DECOMPOSE_SINGLE)
        .with_reply(r#"{"answer": "answered", "blockNumbers": []}"#);
    let search = MockSearchService::new();
    let orchestrator = RetrievalOrchestrator::new(
        registry(&model),
        Arc::new(search.clone()),
        Arc::new(NoopReranker),
        seeded_transformer("v-1").await,
    );

    let query = ChatQuery::new("and for EMEA?").with_history(vec![
        knowflow_retrieval::query_transform::Conversation::user("what is the Q3 forecast?"),
        knowflow_retrieval::query_transform::Conversation::bot("Forecast is 12M."),
    ]);
    orchestrator
        .answer(query, "org-1", "user-1", &NullSink)
        .await
        .unwrap();

    assert_eq!(model.call_count(), 3);
    // History lands in the final message list as plain turns.
    let final_request = model.requests().pop().unwrap();
    assert!(final_request.messages.iter().any(|m| matches!(
        m,
        Message::Ai { content, .. } if content == "Forecast is 12M."
    )));
}
