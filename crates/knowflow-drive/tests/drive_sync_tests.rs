//! Drive connector sync runs against a scripted source API.

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
use knowflow_drive::api::{
    ChangeList, DriveAbout, DriveApi, DriveChange, DriveFile, DrivePermissionEntry, FileList,
};
use knowflow::transformer::BlobTransformer;
use knowflow_drive::{DriveConnector, CONNECTOR_NAME};
use knowflow_testing::{MemoryBlobStore, MemoryGraphStore, MemoryProducer, MemorySyncPointStore};
use parking_lot::Mutex;

const ORG: &str = "org-1";
const INSTANCE: &str = "drive-inst-1";

struct FakeDriveApi {
    files: Mutex<Vec<DriveFile>>,
    changes: Mutex<Vec<DriveChange>>,
    start_token: String,
    new_start_token: String,
}

impl FakeDriveApi {
    fn new(start_token: &str) -> Self {
        Self {
            files: Mutex::new(Vec::new()),
            changes: Mutex::new(Vec::new()),
            start_token: start_token.to_string(),
            new_start_token: format!("{start_token}-next"),
        }
    }

    fn push_file(&self, file: DriveFile) {
        self.files.lock().push(file);
    }

    fn push_change(&self, change: DriveChange) {
        self.changes.lock().push(change);
    }
}

#[async_trait]
impl DriveApi for FakeDriveApi {
    async fn about(&self) -> Result<DriveAbout> {
        Ok(DriveAbout {
            user_id: "uid-1".into(),
            email: "owner@example.com".into(),
            display_name: "Owner".into(),
        })
    }

    async fn start_page_token(&self) -> Result<String> {
        Ok(self.start_token.clone())
    }

    async fn list_files(&self, _page_token: Option<&str>) -> Result<FileList> {
        Ok(FileList {
            files: self.files.lock().drain(..).collect(),
            next_page_token: None,
        })
    }

    async fn list_changes(&self, _page_token: &str) -> Result<ChangeList> {
        Ok(ChangeList {
            changes: self.changes.lock().drain(..).collect(),
            next_page_token: None,
            new_start_page_token: Some(self.new_start_token.clone()),
        })
    }

    async fn create_signed_url(&self, file_id: &str) -> Result<String> {
        Ok(format!("https://signed.example/{file_id}"))
    }
}

fn drive_file(id: &str, name: &str, revision: &str) -> DriveFile {
    DriveFile {
        id: id.to_string(),
        name: name.to_string(),
        mime_type: Some("application/vnd.spreadsheet".into()),
        head_revision_id: Some(revision.to_string()),
        parents: Vec::new(),
        size: Some(1024),
        file_extension: Some("xlsx".into()),
        web_view_link: Some(format!("https://drive.example/{id}")),
        created_time: Some("2026-01-05T10:00:00Z".into()),
        modified_time: Some("2026-01-06T10:00:00Z".into()),
        shared: false,
        md5_checksum: None,
        sha1_checksum: None,
        sha256_checksum: None,
        permissions: vec![DrivePermissionEntry {
            id: "uid-1".into(),
            grantee_type: "user".into(),
            role: "owner".into(),
            email: Some("owner@example.com".into()),
        }],
    }
}

struct Harness {
    graph: MemoryGraphStore,
    producer: MemoryProducer,
    sync_points: Arc<MemorySyncPointStore>,
    blob: MemoryBlobStore,
    connector: DriveConnector,
    api: Arc<FakeDriveApi>,
}

async fn harness(start_token: &str) -> Harness {
    let graph = MemoryGraphStore::with_org(ORG);
    let producer = MemoryProducer::new();
    let processor = Arc::new(
        EntitiesProcessor::initialize(Arc::new(graph.clone()), Arc::new(producer.clone()))
            .await
            .unwrap(),
    );
    let sync_points = Arc::new(MemorySyncPointStore::new());
    let blob = MemoryBlobStore::new();
    let transformer = Arc::new(BlobTransformer::new(
        Arc::new(blob.clone()),
        Arc::new(graph.clone()),
    ));
    let api = Arc::new(FakeDriveApi::new(start_token));
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
        transformer: Some(transformer),
    };
    let connector = DriveConnector::new(ctx, api.clone()).with_batch_size(10);
    Harness {
        graph,
        producer,
        sync_points,
        blob,
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
async fn full_sync_ingests_files_and_stores_the_prefetched_cursor() {
    let mut h = harness("spt-1").await;
    h.connector.init().await.unwrap();
    h.api.push_file(drive_file("F1", "q3.xlsx", "r1"));

    h.connector.run_sync().await.unwrap();

    // Record, group, and app user all landed.
    let key = record_key(&h.graph, "F1");
    let node = h.graph.node(collections::RECORDS, &key).unwrap();
    assert_eq!(node["version"], 0);
    assert_eq!(node["connectorName"], CONNECTOR_NAME);
    assert!(h
        .graph
        .nodes(collections::RECORD_GROUPS)
        .iter()
        .any(|g| g["externalGroupId"] == "uid-1"));
    assert!(h
        .graph
        .nodes(collections::USERS)
        .iter()
        .any(|u| u["email"] == "owner@example.com"));

    // One owner permission edge.
    let perms = h
        .graph
        .edges_to(&node_id(collections::RECORDS, &key), edges::PERMISSIONS);
    assert_eq!(perms.len(), 1);
    assert_eq!(perms[0].attrs["type"], "OWNER");

    // One newRecord event.
    assert_eq!(h.producer.count_of(RecordEventType::NewRecord), 1);

    // The cursor captured *before* the listing is what got stored.
    let stored = h
        .sync_points
        .raw(&format!("records|{INSTANCE}|uid-1"))
        .unwrap();
    assert_eq!(stored["pageToken"], "spt-1");

    // The record payload reached blob storage, addressed by its virtual id.
    assert_eq!(h.blob.len(), 1);
    let virtual_record_id = node["virtualRecordId"].as_str().unwrap();
    assert!(h
        .graph
        .node(
            knowflow::storage::graph::collections::VIRTUAL_RECORD_MAPPINGS,
            virtual_record_id
        )
        .is_some());
}

#[tokio::test]
async fn incremental_sync_applies_changes_and_tombstones() {
    let mut h = harness("spt-1").await;
    h.connector.init().await.unwrap();
    h.api.push_file(drive_file("F1", "q3.xlsx", "r1"));
    h.api.push_file(drive_file("F2", "old.doc", "r1"));
    h.connector.run_sync().await.unwrap();
    let f2_key = record_key(&h.graph, "F2");

    // Revision bump for F1, tombstone for F2.
    h.api.push_change(DriveChange {
        file_id: "F1".into(),
        removed: false,
        file: Some(drive_file("F1", "q3.xlsx", "r2")),
    });
    h.api.push_change(DriveChange {
        file_id: "F2".into(),
        removed: true,
        file: None,
    });
    h.connector.run_incremental_sync().await.unwrap();

    let f1 = h
        .graph
        .node(collections::RECORDS, &record_key(&h.graph, "F1"))
        .unwrap();
    assert_eq!(f1["version"], 1);
    assert_eq!(f1["externalRevisionId"], "r2");
    assert!(h.graph.node(collections::RECORDS, &f2_key).is_none());

    assert_eq!(h.producer.count_of(RecordEventType::UpdateRecord), 1);
    assert_eq!(h.producer.count_of(RecordEventType::DeleteRecord), 1);

    // Cursor advanced to the feed's new start token.
    let stored = h
        .sync_points
        .raw(&format!("records|{INSTANCE}|uid-1"))
        .unwrap();
    assert_eq!(stored["pageToken"], "spt-1-next");
}

#[tokio::test]
async fn acl_change_replaces_permission_edges() {
    let mut h = harness("spt-1").await;
    h.connector.init().await.unwrap();
    let mut shared = drive_file("F1", "q3.xlsx", "r1");
    shared.permissions.push(DrivePermissionEntry {
        id: "perm-2".into(),
        grantee_type: "user".into(),
        role: "reader".into(),
        email: Some("guest@partner.example".into()),
    });
    h.api.push_file(shared);
    h.connector.run_sync().await.unwrap();

    let key = record_key(&h.graph, "F1");
    assert_eq!(
        h.graph
            .edges_to(&node_id(collections::RECORDS, &key), edges::PERMISSIONS)
            .len(),
        2
    );

    // The guest disappears from the source ACL; same revision.
    h.api.push_change(DriveChange {
        file_id: "F1".into(),
        removed: false,
        file: Some(drive_file("F1", "q3.xlsx", "r1")),
    });
    h.connector.run_incremental_sync().await.unwrap();

    let perms = h
        .graph
        .edges_to(&node_id(collections::RECORDS, &key), edges::PERMISSIONS);
    assert_eq!(perms.len(), 1);
    assert_eq!(perms[0].attrs["email"], "owner@example.com");
    // No version change without a revision change.
    let node = h.graph.node(collections::RECORDS, &key).unwrap();
    assert_eq!(node["version"], 0);
}

#[tokio::test]
async fn unchanged_reobservation_produces_no_new_events() {
    let mut h = harness("spt-1").await;
    h.connector.init().await.unwrap();
    h.api.push_file(drive_file("F1", "q3.xlsx", "r1"));
    h.connector.run_sync().await.unwrap();
    let events_before = h.producer.events().len();

    h.api.push_change(DriveChange {
        file_id: "F1".into(),
        removed: false,
        file: Some(drive_file("F1", "q3.xlsx", "r1")),
    });
    h.connector.run_incremental_sync().await.unwrap();

    assert_eq!(h.producer.events().len(), events_before);
}
