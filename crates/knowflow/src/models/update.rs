//! Transient classification of one observed source entry.

use crate::models::entities::Record;
use crate::models::permission::Permission;

/// What a sync loop learned about a single source entry.
///
/// `is_updated` may carry any combination of the three change flags; the
/// dispatcher fires the matching processor entry points sequentially.
#[derive(Debug, Clone, Default)]
pub struct RecordUpdate {
    pub record: Option<Record>,
    pub is_new: bool,
    pub is_updated: bool,
    pub is_deleted: bool,
    pub metadata_changed: bool,
    pub content_changed: bool,
    pub permissions_changed: bool,
    pub old_permissions: Vec<Permission>,
    pub new_permissions: Vec<Permission>,
    pub external_record_id: String,
}

impl RecordUpdate {
    /// A brand-new record with its permission set.
    #[must_use]
    pub fn new_record(record: Record, permissions: Vec<Permission>) -> Self {
        Self {
            external_record_id: record.external_record_id.clone(),
            record: Some(record),
            is_new: true,
            new_permissions: permissions,
            ..Self::default()
        }
    }

    /// A deletion entry observed in a change feed.
    #[must_use]
    pub fn tombstone(external_record_id: impl Into<String>) -> Self {
        Self {
            external_record_id: external_record_id.into(),
            is_deleted: true,
            ..Self::default()
        }
    }

    /// An update to an already-ingested record; change flags are set from the
    /// diff against the stored record.
    #[must_use]
    pub fn changed(
        record: Record,
        metadata_changed: bool,
        content_changed: bool,
        permissions_changed: bool,
        old_permissions: Vec<Permission>,
        new_permissions: Vec<Permission>,
    ) -> Self {
        Self {
            external_record_id: record.external_record_id.clone(),
            record: Some(record),
            is_updated: metadata_changed || content_changed || permissions_changed,
            metadata_changed,
            content_changed,
            permissions_changed,
            old_permissions,
            new_permissions,
            ..Self::default()
        }
    }
}
