//! Graph transaction store contract.
//!
//! Typed node collections and typed edge collections with upsert semantics.
//! Every mutation goes through a transaction handle; a record's node and all
//! of its edges commit or abort together. Concrete backends live outside the
//! core; `knowflow-testing` ships an in-memory implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::Result;
use crate::models::entities::{AppUser, AppUserGroup, Record, RecordGroup, RecordType};

/// Node collection names.
pub mod collections {
    pub const RECORDS: &str = "records";
    pub const FILES: &str = "files";
    pub const MAILS: &str = "mails";
    pub const MESSAGES: &str = "messages";
    pub const WEBPAGES: &str = "webpages";
    pub const TICKETS: &str = "tickets";
    pub const PROJECTS: &str = "projects";
    pub const SQL_DOCS: &str = "sqlDocuments";
    pub const RECORD_GROUPS: &str = "recordGroups";
    pub const USERS: &str = "users";
    pub const GROUPS: &str = "groups";
    pub const ORGS: &str = "organizations";
    pub const APPS: &str = "apps";
    pub const DOMAINS: &str = "domains";
    pub const ANYONE: &str = "anyone";
    pub const ANYONE_WITH_LINK: &str = "anyoneWithLink";
    pub const VIRTUAL_RECORD_MAPPINGS: &str = "virtualRecordToDocumentId";
}

/// Edge collection names.
pub mod edges {
    pub const IS_OF_TYPE: &str = "isOfType";
    pub const RECORD_RELATIONS: &str = "recordRelations";
    pub const BELONGS_TO: &str = "belongsTo";
    pub const PERMISSIONS: &str = "permissions";
}

/// Statically keyed synthetic principals for uniform ACL traversal.
pub mod anchors {
    pub const ANYONE_KEY: &str = "anyone";
    pub const ANYONE_WITH_LINK_KEY: &str = "anyoneWithLink";
    pub const DEFAULT_DOMAIN_KEY: &str = "domain";
}

/// `collection/key` node id used on edge endpoints.
#[must_use]
pub fn node_id(collection: &str, key: &str) -> String {
    format!("{collection}/{key}")
}

/// The type-specific document collection a record links to via IS_OF_TYPE.
#[must_use]
pub fn type_collection(record_type: RecordType) -> &'static str {
    match record_type {
        RecordType::File | RecordType::Folder | RecordType::Drive => collections::FILES,
        RecordType::Mail => collections::MAILS,
        RecordType::Message => collections::MESSAGES,
        RecordType::Webpage => collections::WEBPAGES,
        RecordType::Ticket => collections::TICKETS,
        RecordType::Project => collections::PROJECTS,
        RecordType::SqlTable | RecordType::SqlView => collections::SQL_DOCS,
    }
}

/// Parent-child edge kinds in the record-relations collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    ParentChild,
    Attachment,
}

/// An edge document: endpoints plus free-form attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    #[serde(rename = "_from")]
    pub from: String,
    #[serde(rename = "_to")]
    pub to: String,
    #[serde(flatten)]
    pub attrs: serde_json::Map<String, Value>,
}

impl Edge {
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            attrs: serde_json::Map::new(),
        }
    }

    /// Attach attributes from a JSON object; non-objects are ignored.
    #[must_use]
    pub fn with_attrs(mut self, attrs: Value) -> Self {
        if let Value::Object(map) = attrs {
            self.attrs.extend(map);
        }
        self
    }
}

/// One open transaction. Reads observe writes buffered in the same
/// transaction; nothing is visible to others until `commit`.
#[async_trait]
pub trait GraphTx: Send + Sync {
    async fn batch_upsert_nodes(&mut self, docs: Vec<Value>, collection: &str) -> Result<()>;

    /// Upsert edges on `(from, to)` within `collection`.
    async fn batch_create_edges(&mut self, edges: Vec<Edge>, collection: &str) -> Result<()>;

    async fn get_node(&self, collection: &str, key: &str) -> Result<Option<Value>>;

    async fn get_record(&self, key: &str) -> Result<Option<Record>>;

    async fn get_record_by_external_id(
        &self,
        connector_name: &str,
        external_id: &str,
    ) -> Result<Option<Record>>;

    async fn get_record_group_by_external_id(
        &self,
        connector_name: &str,
        external_id: &str,
    ) -> Result<Option<RecordGroup>>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<AppUser>>;

    async fn get_user_group_by_external_id(
        &self,
        connector_name: &str,
        external_id: &str,
    ) -> Result<Option<AppUserGroup>>;

    async fn get_edge(&self, from: &str, to: &str, collection: &str) -> Result<Option<Edge>>;

    /// All edges in `collection` pointing at `to`.
    async fn get_edges_to(&self, to: &str, collection: &str) -> Result<Vec<Edge>>;

    /// All records that name a parent external id. Used by reconciliation
    /// migrations.
    async fn get_records_with_parent(&self) -> Result<Vec<Record>>;

    async fn create_record_relation(
        &mut self,
        parent_key: &str,
        child_key: &str,
        relation: RelationType,
    ) -> Result<()>;

    async fn create_record_group_relation(
        &mut self,
        record_key: &str,
        group_key: &str,
    ) -> Result<()>;

    /// Delete every edge in `collection` pointing at `to`; returns the count.
    async fn delete_edges_to(&mut self, to: &str, collection: &str) -> Result<usize>;

    async fn delete_edges_from(&mut self, from: &str, collection: &str) -> Result<usize>;

    async fn delete_edge(&mut self, from: &str, to: &str, collection: &str) -> Result<bool>;

    /// Delete the named nodes and every edge incident to them, in any edge
    /// collection.
    async fn delete_nodes_and_edges(&mut self, keys: Vec<String>, collection: &str) -> Result<()>;

    async fn get_all_orgs(&self) -> Result<Vec<Value>>;

    async fn get_users(&self, org_key: &str, active_only: bool) -> Result<Vec<AppUser>>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn abort(self: Box<Self>) -> Result<()>;
}

/// Handle to the graph database.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn GraphTx>>;
}
