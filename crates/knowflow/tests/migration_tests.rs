//! Migration runner gating and the folder-hierarchy repair pass.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;

use knowflow::core::config::{ConfigStore, MemoryConfigStore};
use knowflow::migrations::{
    FolderHierarchyMigration, MigrationContext, MigrationOutcome, MigrationRunner,
};
use knowflow::models::{Record, RecordGroupType, RecordType};
use knowflow::storage::graph::{collections, edges, GraphStore};
use knowflow_testing::MemoryGraphStore;

fn folder_child(external_id: &str, parent: &str) -> Record {
    Record::new(
        "org-1",
        external_id,
        RecordType::File,
        "DRIVE",
        "inst-1",
        external_id,
        "DRV",
        RecordGroupType::Drive,
    )
    .with_parent(parent, RecordType::File)
}

fn plain_record(external_id: &str) -> Record {
    Record::new(
        "org-1",
        external_id,
        RecordType::File,
        "DRIVE",
        "inst-1",
        external_id,
        "DRV",
        RecordGroupType::Drive,
    )
}

async fn seed_records(graph: &MemoryGraphStore, records: &[Record]) {
    let mut tx = graph.begin().await.unwrap();
    for record in records {
        tx.batch_upsert_nodes(vec![record.to_node().unwrap()], collections::RECORDS)
            .await
            .unwrap();
    }
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn repairs_missing_parent_edges_and_skips_orphans() {
    let graph = MemoryGraphStore::with_org("org-1");
    let parent = plain_record("P1");
    let child = folder_child("C1", "P1");
    let orphan = folder_child("C2", "P-gone");
    seed_records(&graph, &[parent, child, orphan]).await;
    assert!(graph.edges(edges::RECORD_RELATIONS).is_empty());

    let ctx = MigrationContext {
        graph: Arc::new(graph.clone()),
        config: Arc::new(MemoryConfigStore::new()),
    };
    let outcome = MigrationRunner::new(ctx)
        .run(&FolderHierarchyMigration::new())
        .await
        .unwrap();

    match outcome {
        MigrationOutcome::Completed(result) => {
            assert_eq!(result["repaired"], 1);
            assert_eq!(result["orphaned"], 1);
        }
        MigrationOutcome::Skipped => panic!("first run must execute"),
    }
    assert_eq!(graph.edges(edges::RECORD_RELATIONS).len(), 1);
}

#[tokio::test]
async fn second_run_is_gated_by_the_completion_flag() {
    let graph = MemoryGraphStore::with_org("org-1");
    seed_records(&graph, &[plain_record("P1"), folder_child("C1", "P1")]).await;

    let config = Arc::new(MemoryConfigStore::new());
    let ctx = MigrationContext {
        graph: Arc::new(graph.clone()),
        config: config.clone(),
    };
    let runner = MigrationRunner::new(ctx);
    let migration = FolderHierarchyMigration::new();

    assert!(matches!(
        runner.run(&migration).await.unwrap(),
        MigrationOutcome::Completed(_)
    ));
    let flag = config
        .get("/migrations/folder_hierarchy_v1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(flag["done"], true);

    assert_eq!(
        runner.run(&migration).await.unwrap(),
        MigrationOutcome::Skipped
    );
}
