//! Mailbox connector sync runs against a scripted source API.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;

use async_trait::async_trait;
use knowflow::core::auth::TokenManager;
use knowflow::core::config::MemoryConfigStore;
use knowflow::core::rate_limit::RateLimiterRegistry;
use knowflow::messaging::RecordEventType;
use knowflow::processor::EntitiesProcessor;
use knowflow::storage::graph::{collections, edges, node_id};
use knowflow::sync::{Connector, ConnectorContext};
use knowflow::Result;
use knowflow_mail::api::{HistoryPage, MailApi, MailAttachment, MailLabel, MailMessage, MailProfile, MessagePage};
use knowflow_mail::{MailConnector, CONNECTOR_NAME};
use knowflow_testing::{MemoryGraphStore, MemoryProducer, MemorySyncPointStore};
use parking_lot::Mutex;

const ORG: &str = "org-1";
const INSTANCE: &str = "mail-inst-1";

struct FakeMailApi {
    history_id: String,
    labels: Vec<MailLabel>,
    messages: Mutex<Vec<MailMessage>>,
    history: Mutex<Vec<HistoryPage>>,
}

impl FakeMailApi {
    fn new(history_id: &str, labels: Vec<MailLabel>) -> Self {
        Self {
            history_id: history_id.to_string(),
            labels,
            messages: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MailApi for FakeMailApi {
    async fn profile(&self) -> Result<MailProfile> {
        Ok(MailProfile {
            user_id: "uid-1".into(),
            email_address: "owner@example.com".into(),
            history_id: self.history_id.clone(),
        })
    }

    async fn list_labels(&self) -> Result<Vec<MailLabel>> {
        Ok(self.labels.clone())
    }

    async fn list_messages(
        &self,
        _label_id: &str,
        _page_token: Option<&str>,
    ) -> Result<MessagePage> {
        Ok(MessagePage {
            messages: self.messages.lock().drain(..).collect(),
            next_page_token: None,
        })
    }

    async fn list_history(
        &self,
        _start_history_id: &str,
        _page_token: Option<&str>,
    ) -> Result<HistoryPage> {
        Ok(self.history.lock().pop().unwrap_or_default())
    }
}

fn message_with_attachment(id: &str, subject: &str, attachment_id: &str) -> MailMessage {
    MailMessage {
        id: id.to_string(),
        thread_id: Some(format!("t-{id}")),
        label_ids: vec!["INBOX".into()],
        subject: Some(subject.to_string()),
        snippet: Some("snippet".into()),
        internal_date_ms: Some(1_758_000_000_000),
        attachments: vec![MailAttachment {
            id: attachment_id.to_string(),
            filename: "q3.xlsx".into(),
            mime_type: Some("application/vnd.spreadsheet".into()),
            size: Some(2048),
        }],
    }
}

struct Harness {
    graph: MemoryGraphStore,
    producer: MemoryProducer,
    sync_points: Arc<MemorySyncPointStore>,
    connector: MailConnector,
    api: Arc<FakeMailApi>,
}

async fn harness(history_id: &str) -> Harness {
    let graph = MemoryGraphStore::with_org(ORG);
    let producer = MemoryProducer::new();
    let processor = Arc::new(
        EntitiesProcessor::initialize(Arc::new(graph.clone()), Arc::new(producer.clone()))
            .await
            .unwrap(),
    );
    let sync_points = Arc::new(MemorySyncPointStore::new());
    let api = Arc::new(FakeMailApi::new(
        history_id,
        vec![MailLabel {
            id: "INBOX".into(),
            name: "Inbox".into(),
        }],
    ));
    let ctx = ConnectorContext {
        connector_id: INSTANCE.to_string(),
        processor,
        config: Arc::new(MemoryConfigStore::new().with_entry(
            &knowflow::core::config::connector_config_path(INSTANCE),
            serde_json::json!({"auth": {"clientId": "cid", "clientSecret": "secret"}}),
        )),
        sync_points: sync_points.clone(),
        tokens: Arc::new(TokenManager::new()),
        rate_limiters: Arc::new(RateLimiterRegistry::new()),
        transformer: None,
    };
    let connector = MailConnector::new(ctx, api.clone()).with_batch_size(10);
    Harness {
        graph,
        producer,
        sync_points,
        connector,
        api,
    }
}

fn record_key(graph: &MemoryGraphStore, external_id: &str) -> String {
    graph
        .nodes(collections::RECORDS)
        .into_iter()
        .find(|doc| doc["externalRecordId"] == external_id)
        .map(|doc| doc["_key"].as_str().unwrap().to_string())
        .unwrap()
}

#[tokio::test]
async fn full_sync_creates_label_groups_and_attachment_edges() {
    let mut h = harness("h-100").await;
    h.connector.init().await.unwrap();
    h.api
        .messages
        .lock()
        .push(message_with_attachment("M1", "Quarterly numbers", "A1"));

    h.connector.run_sync().await.unwrap();

    // Label became a record group.
    let groups = h.graph.nodes(collections::RECORD_GROUPS);
    assert!(groups.iter().any(|g| g["externalGroupId"] == "INBOX"));

    // Mail record and its attachment, joined by an ATTACHMENT edge.
    let mail_key = record_key(&h.graph, "M1");
    let attachment_key = record_key(&h.graph, "A1");
    let mail = h.graph.node(collections::RECORDS, &mail_key).unwrap();
    assert_eq!(mail["recordType"], "MAIL");
    let relations = h.graph.edges(edges::RECORD_RELATIONS);
    assert_eq!(relations.len(), 1);
    assert_eq!(relations[0].from, node_id(collections::RECORDS, &mail_key));
    assert_eq!(
        relations[0].to,
        node_id(collections::RECORDS, &attachment_key)
    );
    assert_eq!(relations[0].attrs["relationType"], "ATTACHMENT");

    // The mail's type document lives in the mail collection.
    assert!(h.graph.node(collections::MAILS, &mail_key).is_some());

    // Cursor captured from the profile before listing.
    let stored = h
        .sync_points
        .raw(&format!("records|{INSTANCE}|mailbox"))
        .unwrap();
    assert_eq!(stored["historyId"], "h-100");
}

#[tokio::test]
async fn incremental_sync_adds_and_deletes_from_history() {
    let mut h = harness("h-100").await;
    h.connector.init().await.unwrap();
    h.api
        .messages
        .lock()
        .push(message_with_attachment("M1", "Quarterly numbers", "A1"));
    h.connector.run_sync().await.unwrap();
    let m1_key = record_key(&h.graph, "M1");

    h.api.history.lock().push(HistoryPage {
        messages_added: vec![message_with_attachment("M2", "Follow-up", "A2")],
        messages_deleted: vec!["M1".into()],
        next_page_token: None,
        history_id: Some("h-200".into()),
    });
    h.connector.run_incremental_sync().await.unwrap();

    assert!(h.graph.node(collections::RECORDS, &m1_key).is_none());
    assert!(h
        .graph
        .edges_touching(&node_id(collections::RECORDS, &m1_key))
        .is_empty());
    let m2 = record_key(&h.graph, "M2");
    assert_eq!(
        h.graph.node(collections::RECORDS, &m2).unwrap()["recordName"],
        "Follow-up"
    );
    assert_eq!(h.producer.count_of(RecordEventType::DeleteRecord), 1);

    let stored = h
        .sync_points
        .raw(&format!("records|{INSTANCE}|mailbox"))
        .unwrap();
    assert_eq!(stored["historyId"], "h-200");
}

#[tokio::test]
async fn missing_cursor_falls_back_to_full_sync() {
    let mut h = harness("h-100").await;
    h.connector.init().await.unwrap();
    h.api
        .messages
        .lock()
        .push(message_with_attachment("M1", "Quarterly numbers", "A1"));

    // Incremental without a stored cursor runs the full listing instead.
    h.connector.run_incremental_sync().await.unwrap();
    assert!(h.graph.nodes(collections::RECORDS).len() >= 2);
}
