//! Idempotent data migrations gated by a persisted completion flag.
//!
//! A migration runs at most once: the runner reads
//! `/migrations/<name>_v1` first and skips when the flag says `done`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::core::config::ConfigStore;
use crate::core::error::Result;
use crate::core::time::epoch_ms;
use crate::storage::graph::{GraphStore, RelationType};

/// Shared state handed to every migration.
#[derive(Clone)]
pub struct MigrationContext {
    pub graph: Arc<dyn GraphStore>,
    pub config: Arc<dyn ConfigStore>,
}

/// One idempotent migration.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Short name used in the completion-flag key.
    fn name(&self) -> &str;

    /// Execute; the returned value is stored alongside the completion flag.
    async fn run(&self, ctx: &MigrationContext) -> Result<Value>;
}

/// What the runner did for a given migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The completion flag was already set.
    Skipped,
    /// The migration ran; carries its result summary.
    Completed(Value),
}

/// Runs migrations behind their completion flags.
pub struct MigrationRunner {
    ctx: MigrationContext,
}

impl MigrationRunner {
    #[must_use]
    pub fn new(ctx: MigrationContext) -> Self {
        Self { ctx }
    }

    fn flag_key(migration: &dyn Migration) -> String {
        format!("/migrations/{}_v1", migration.name())
    }

    /// Run `migration` unless its flag is already set.
    pub async fn run(&self, migration: &dyn Migration) -> Result<MigrationOutcome> {
        let flag_key = Self::flag_key(migration);
        let already_done = match self.ctx.config.get(&flag_key).await {
            Ok(Some(flag)) => flag.get("done").and_then(Value::as_bool).unwrap_or(false),
            Ok(None) => false,
            Err(err) => {
                warn!(migration = migration.name(), error = %err, "unable to read migration flag; assuming not done");
                false
            }
        };
        if already_done {
            info!(migration = migration.name(), "already completed; skipping");
            return Ok(MigrationOutcome::Skipped);
        }

        info!(migration = migration.name(), "running migration");
        let result = migration.run(&self.ctx).await?;

        let flag = serde_json::json!({
            "done": true,
            "completedAtTimestamp": epoch_ms(),
            "result": result.clone(),
        });
        if let Err(err) = self.ctx.config.set(&flag_key, flag).await {
            // The migration itself succeeded; a missing flag only means the
            // next run re-checks and no-ops on already-migrated data.
            warn!(migration = migration.name(), error = %err, "failed to persist completion flag");
        }
        Ok(MigrationOutcome::Completed(result))
    }
}

/// Recreates missing parent-child edges for records that name a parent
/// external id whose edge never landed (early syncs dropped them when the
/// parent arrived after the child).
pub struct FolderHierarchyMigration {
    batch_size: usize,
}

impl Default for FolderHierarchyMigration {
    fn default() -> Self {
        Self { batch_size: 250 }
    }
}

impl FolderHierarchyMigration {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Migration for FolderHierarchyMigration {
    fn name(&self) -> &str {
        "folder_hierarchy"
    }

    async fn run(&self, ctx: &MigrationContext) -> Result<Value> {
        let mut repaired = 0usize;
        let mut orphaned = 0usize;
        let mut scanned = 0usize;

        let candidates = {
            let tx = ctx.graph.begin().await?;
            let records = tx.get_records_with_parent().await?;
            tx.abort().await?;
            records
        };

        for chunk in candidates.chunks(self.batch_size) {
            let mut tx = ctx.graph.begin().await?;
            let result: Result<()> = async {
                for record in chunk {
                    scanned += 1;
                    let Some(parent_external_id) = record.parent_external_record_id.as_deref()
                    else {
                        continue;
                    };
                    let parent = tx
                        .get_record_by_external_id(&record.connector_name, parent_external_id)
                        .await?;
                    match parent {
                        Some(parent) => {
                            tx.create_record_relation(
                                &parent.key,
                                &record.key,
                                RelationType::ParentChild,
                            )
                            .await?;
                            repaired += 1;
                        }
                        None => {
                            // Parent never ingested; left for a later sync.
                            orphaned += 1;
                        }
                    }
                }
                Ok(())
            }
            .await;
            match result {
                Ok(()) => tx.commit().await?,
                Err(err) => {
                    tx.abort().await?;
                    return Err(err);
                }
            }
        }

        info!(scanned, repaired, orphaned, "folder hierarchy migration finished");
        Ok(serde_json::json!({
            "scanned": scanned,
            "repaired": repaired,
            "orphaned": orphaned,
        }))
    }
}
