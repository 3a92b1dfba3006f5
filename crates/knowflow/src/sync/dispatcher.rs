//! Routing of classified source entries into the entities processor.
//!
//! New records accumulate into bounded batches; updates and tombstones are
//! applied immediately. Pending new records are always flushed before a
//! non-new entry so parents reach the graph before updates or deletions that
//! may reference them.

use std::sync::Arc;

use tracing::debug;

use crate::core::error::Result;
use crate::models::entities::Record;
use crate::models::permission::Permission;
use crate::models::update::RecordUpdate;
use crate::processor::EntitiesProcessor;
use crate::transformer::BlobTransformer;

/// Default batch size for new-record flushes.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Accumulates [`RecordUpdate`]s for one connector and drives the processor.
///
/// With a transformer attached, record payloads reach blob storage before
/// the graph writes publish their events, so a consumer can always resolve
/// a record's virtual id the moment it hears about it.
pub struct RecordDispatcher {
    processor: Arc<EntitiesProcessor>,
    connector_name: String,
    batch: Vec<(Record, Vec<Permission>)>,
    batch_size: usize,
    transformer: Option<Arc<BlobTransformer>>,
}

impl RecordDispatcher {
    #[must_use]
    pub fn new(processor: Arc<EntitiesProcessor>, connector_name: impl Into<String>) -> Self {
        Self {
            processor,
            connector_name: connector_name.into(),
            batch: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            transformer: None,
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn with_transformer(mut self, transformer: Arc<BlobTransformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    async fn store_payload(&self, record: &Record) -> Result<()> {
        if let Some(transformer) = &self.transformer {
            if record.virtual_record_id.is_some() {
                transformer.store_record(record).await?;
            }
        }
        Ok(())
    }

    /// Route one classified entry.
    pub async fn dispatch(&mut self, update: RecordUpdate) -> Result<()> {
        if update.is_deleted {
            self.flush().await?;
            return self
                .processor
                .on_record_deleted(&self.connector_name, &update.external_record_id)
                .await;
        }

        if update.is_new {
            if let Some(record) = update.record {
                self.batch.push((record, update.new_permissions));
                if self.batch.len() >= self.batch_size {
                    self.flush().await?;
                }
            }
            return Ok(());
        }

        if update.is_updated {
            let Some(record) = update.record else {
                return Ok(());
            };
            // Parents created earlier in this page must land first.
            self.flush().await?;

            if update.metadata_changed {
                debug!(record = %record.record_name, "metadata changed");
                self.processor.on_record_metadata_update(record.clone()).await?;
            }
            if update.permissions_changed {
                debug!(record = %record.record_name, "permissions changed");
                self.processor
                    .on_updated_record_permissions(&record, &update.new_permissions)
                    .await?;
            }
            if update.content_changed {
                debug!(record = %record.record_name, "content changed");
                self.store_payload(&record).await?;
                self.processor.on_record_content_update(record).await?;
            }
        }
        Ok(())
    }

    /// Push any pending new records through the processor, storing their
    /// payloads first.
    pub async fn flush(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.batch);
        debug!(count = batch.len(), connector = %self.connector_name, "flushing record batch");
        for (record, _) in &batch {
            self.store_payload(record).await?;
        }
        self.processor.on_new_records(batch).await
    }

    /// Flush and consume the dispatcher at the end of a sync run.
    pub async fn finish(mut self) -> Result<()> {
        self.flush().await
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.batch.len()
    }
}
