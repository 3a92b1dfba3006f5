//! Records, record groups, and principals.
//!
//! Field names serialize in the graph-store convention (camelCase, `_key`
//! for the internal key) so a struct can be upserted as a node document and
//! read back without a mapping layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::core::time::epoch_ms;

/// Mime type assigned to synthesized placeholder folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.folder";

/// What kind of content a record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordType {
    File,
    Mail,
    Message,
    Webpage,
    Ticket,
    Project,
    SqlTable,
    SqlView,
    Drive,
    Folder,
}

/// Container kinds a record group can represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordGroupType {
    Drive,
    Mailbox,
    Channel,
    Project,
    KnowledgeBase,
}

/// Where a record entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OriginType {
    Connector,
    Upload,
}

/// Indexing pipeline status for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexingStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
    FileTypeNotSupported,
    AutoIndexOff,
    Empty,
    Queued,
    ConnectorDisabled,
    Paused,
}

/// Content-extraction status for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtractionStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
    FileTypeNotSupported,
    AutoIndexOff,
    Empty,
    Paused,
}

/// One unit of indexable content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    #[serde(rename = "_key")]
    pub key: String,
    pub org_id: String,
    pub record_name: String,
    pub record_type: RecordType,
    pub connector_name: String,
    /// Connector instance this record was synced through.
    pub connector_id: String,
    pub external_record_id: String,
    #[serde(default)]
    pub external_revision_id: Option<String>,
    #[serde(default)]
    pub parent_external_record_id: Option<String>,
    #[serde(default)]
    pub parent_record_type: Option<RecordType>,
    pub external_record_group_id: String,
    pub record_group_type: RecordGroupType,
    pub origin: OriginType,
    pub version: u64,
    pub created_at_timestamp: i64,
    pub updated_at_timestamp: i64,
    #[serde(default)]
    pub source_created_at_timestamp: Option<i64>,
    #[serde(default)]
    pub source_last_modified_timestamp: Option<i64>,
    #[serde(default)]
    pub last_sync_timestamp: Option<i64>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub web_url: Option<String>,
    #[serde(default)]
    pub signed_url: Option<String>,
    #[serde(default)]
    pub md5_hash: Option<String>,
    #[serde(default)]
    pub sha1_hash: Option<String>,
    #[serde(default)]
    pub sha256_hash: Option<String>,
    #[serde(default)]
    pub quick_xor_hash: Option<String>,
    #[serde(default)]
    pub crc32_hash: Option<String>,
    #[serde(default)]
    pub size_in_bytes: u64,
    #[serde(default)]
    pub extension: Option<String>,
    pub indexing_status: IndexingStatus,
    pub extraction_status: ExtractionStatus,
    #[serde(default = "default_true")]
    pub is_latest_version: bool,
    #[serde(default)]
    pub is_dirty: bool,
    #[serde(default)]
    pub virtual_record_id: Option<String>,
    #[serde(default = "default_true")]
    pub is_file: bool,
    #[serde(default)]
    pub is_shared: bool,
    #[serde(default)]
    pub is_deleted: bool,
}

fn default_true() -> bool {
    true
}

impl Record {
    /// A record with a fresh key and the mandatory identity fields; everything
    /// else starts from defaults and is filled in builder style.
    #[must_use]
    pub fn new(
        org_id: impl Into<String>,
        record_name: impl Into<String>,
        record_type: RecordType,
        connector_name: impl Into<String>,
        connector_id: impl Into<String>,
        external_record_id: impl Into<String>,
        external_record_group_id: impl Into<String>,
        record_group_type: RecordGroupType,
    ) -> Self {
        let now = epoch_ms();
        Self {
            key: Uuid::new_v4().to_string(),
            org_id: org_id.into(),
            record_name: record_name.into(),
            record_type,
            connector_name: connector_name.into(),
            connector_id: connector_id.into(),
            external_record_id: external_record_id.into(),
            external_revision_id: None,
            parent_external_record_id: None,
            parent_record_type: None,
            external_record_group_id: external_record_group_id.into(),
            record_group_type,
            origin: OriginType::Connector,
            version: 0,
            created_at_timestamp: now,
            updated_at_timestamp: now,
            source_created_at_timestamp: None,
            source_last_modified_timestamp: None,
            last_sync_timestamp: Some(now),
            mime_type: None,
            web_url: None,
            signed_url: None,
            md5_hash: None,
            sha1_hash: None,
            sha256_hash: None,
            quick_xor_hash: None,
            crc32_hash: None,
            size_in_bytes: 0,
            extension: None,
            indexing_status: IndexingStatus::NotStarted,
            extraction_status: ExtractionStatus::NotStarted,
            is_latest_version: true,
            is_dirty: false,
            virtual_record_id: None,
            is_file: true,
            is_shared: false,
            is_deleted: false,
        }
    }

    #[must_use]
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.external_revision_id = Some(revision.into());
        self
    }

    #[must_use]
    pub fn with_parent(mut self, external_id: impl Into<String>, parent_type: RecordType) -> Self {
        self.parent_external_record_id = Some(external_id.into());
        self.parent_record_type = Some(parent_type);
        self
    }

    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    #[must_use]
    pub fn with_web_url(mut self, url: impl Into<String>) -> Self {
        self.web_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_size(mut self, size_in_bytes: u64) -> Self {
        self.size_in_bytes = size_in_bytes;
        self
    }

    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    #[must_use]
    pub fn with_virtual_record_id(mut self, virtual_record_id: impl Into<String>) -> Self {
        self.virtual_record_id = Some(virtual_record_id.into());
        self
    }

    #[must_use]
    pub fn with_indexing_status(mut self, status: IndexingStatus) -> Self {
        self.indexing_status = status;
        self
    }

    #[must_use]
    pub fn with_source_timestamps(mut self, created: Option<i64>, modified: Option<i64>) -> Self {
        self.source_created_at_timestamp = created;
        self.source_last_modified_timestamp = modified;
        self
    }

    #[must_use]
    pub fn as_folder(mut self) -> Self {
        self.is_file = false;
        self.mime_type = Some(FOLDER_MIME_TYPE.to_string());
        self
    }

    /// Stable content fingerprint: identical payloads yield the same id, so
    /// logical duplicates share one blob. Prefers source content hashes and
    /// falls back to the record's identity plus revision.
    #[must_use]
    pub fn content_fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        if let Some(hash) = self
            .sha256_hash
            .as_deref()
            .or(self.md5_hash.as_deref())
            .or(self.sha1_hash.as_deref())
        {
            hasher.update(hash.as_bytes());
        } else {
            hasher.update(self.connector_name.as_bytes());
            hasher.update(self.external_record_id.as_bytes());
            if let Some(revision) = &self.external_revision_id {
                hasher.update(revision.as_bytes());
            }
        }
        hex::encode(&hasher.finalize()[..16])
    }

    /// The node document written to the graph.
    pub fn to_node(&self) -> crate::Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Payload published on `record-events`.
    #[must_use]
    pub fn to_event_payload(&self) -> Value {
        serde_json::json!({
            "recordKey": self.key,
            "orgId": self.org_id,
            "recordName": self.record_name,
            "recordType": self.record_type,
            "connectorName": self.connector_name,
            "connectorId": self.connector_id,
            "externalRecordId": self.external_record_id,
            "externalRevisionId": self.external_revision_id,
            "version": self.version,
            "origin": self.origin,
            "mimeType": self.mime_type,
            "extension": self.extension,
            "sizeInBytes": self.size_in_bytes,
            "virtualRecordId": self.virtual_record_id,
            "webUrl": self.web_url,
            "updatedAtTimestamp": self.updated_at_timestamp,
        })
    }
}

/// A logical container owning records: a drive, mailbox, label, or channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordGroup {
    #[serde(rename = "_key")]
    pub key: String,
    #[serde(default)]
    pub org_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub group_type: RecordGroupType,
    pub connector_name: String,
    pub connector_id: String,
    pub external_group_id: String,
    #[serde(default)]
    pub parent_external_group_id: Option<String>,
    pub created_at_timestamp: i64,
    pub updated_at_timestamp: i64,
    #[serde(default)]
    pub is_deleted_at_source: bool,
}

impl RecordGroup {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        group_type: RecordGroupType,
        connector_name: impl Into<String>,
        connector_id: impl Into<String>,
        external_group_id: impl Into<String>,
    ) -> Self {
        let now = epoch_ms();
        Self {
            key: Uuid::new_v4().to_string(),
            org_id: String::new(),
            name: name.into(),
            description: None,
            group_type,
            connector_name: connector_name.into(),
            connector_id: connector_id.into(),
            external_group_id: external_group_id.into(),
            parent_external_group_id: None,
            created_at_timestamp: now,
            updated_at_timestamp: now,
            is_deleted_at_source: false,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_parent_group(mut self, external_group_id: impl Into<String>) -> Self {
        self.parent_external_group_id = Some(external_group_id.into());
        self
    }

    pub fn to_node(&self) -> crate::Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// A user principal in a source system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppUser {
    #[serde(rename = "_key")]
    pub key: String,
    #[serde(default)]
    pub org_id: String,
    pub app_name: String,
    #[serde(default)]
    pub connector_id: String,
    pub source_user_id: String,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    pub created_at_timestamp: i64,
    pub updated_at_timestamp: i64,
}

impl AppUser {
    #[must_use]
    pub fn new(
        app_name: impl Into<String>,
        connector_id: impl Into<String>,
        source_user_id: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        let now = epoch_ms();
        Self {
            key: Uuid::new_v4().to_string(),
            org_id: String::new(),
            app_name: app_name.into(),
            connector_id: connector_id.into(),
            source_user_id: source_user_id.into(),
            email: email.into(),
            full_name: None,
            title: None,
            is_active: true,
            created_at_timestamp: now,
            updated_at_timestamp: now,
        }
    }

    #[must_use]
    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }

    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn to_node(&self) -> crate::Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// A group principal in a source system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppUserGroup {
    #[serde(rename = "_key")]
    pub key: String,
    #[serde(default)]
    pub org_id: String,
    pub app_name: String,
    #[serde(default)]
    pub connector_id: String,
    pub source_user_group_id: String,
    pub name: String,
    #[serde(default)]
    pub mail: Option<String>,
    pub created_at_timestamp: i64,
    pub updated_at_timestamp: i64,
}

impl AppUserGroup {
    #[must_use]
    pub fn new(
        app_name: impl Into<String>,
        connector_id: impl Into<String>,
        source_user_group_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let now = epoch_ms();
        Self {
            key: Uuid::new_v4().to_string(),
            org_id: String::new(),
            app_name: app_name.into(),
            connector_id: connector_id.into(),
            source_user_group_id: source_user_group_id.into(),
            name: name.into(),
            mail: None,
            created_at_timestamp: now,
            updated_at_timestamp: now,
        }
    }

    pub fn to_node(&self) -> crate::Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}
