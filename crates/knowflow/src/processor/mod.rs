//! The single funnel through which every connector pushes normalized
//! entities into the graph and onto the message bus.
//!
//! Each entry point is idempotent: records are addressed by
//! `(connector, external id)`, edges upsert on `(from, to)`, and a batch is
//! processed inside one graph transaction so a record's node and edges commit
//! or abort together. Events are published only after the commit.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::core::error::{Error, Result};
use crate::core::time::epoch_ms;
use crate::messaging::{MessagingProducer, RecordEvent, RecordEventType, RECORD_EVENTS_TOPIC};
use crate::models::entities::{AppUser, AppUserGroup, Record, RecordGroup, RecordType};
use crate::models::permission::{EntityType, Permission, PermissionType};
use crate::storage::graph::{
    anchors, collections, edges, node_id, type_collection, Edge, GraphStore, GraphTx, RelationType,
};

/// How a processed record was classified against the stored graph state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordOutcome {
    New,
    Updated,
    Unchanged,
}

/// Processor over a graph store and a messaging producer.
pub struct EntitiesProcessor {
    graph: Arc<dyn GraphStore>,
    producer: Arc<dyn MessagingProducer>,
    org_key: String,
}

impl EntitiesProcessor {
    /// Build a processor bound to the first (and only) organization in the
    /// graph.
    pub async fn initialize(
        graph: Arc<dyn GraphStore>,
        producer: Arc<dyn MessagingProducer>,
    ) -> Result<Self> {
        let tx = graph.begin().await?;
        let orgs = tx.get_all_orgs().await?;
        tx.abort().await?;

        let org_key = orgs
            .first()
            .and_then(|org| org.get("_key"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::config("no organizations found; cannot initialize processor"))?;

        Ok(Self {
            graph,
            producer,
            org_key,
        })
    }

    #[must_use]
    pub fn org_key(&self) -> &str {
        &self.org_key
    }

    /// Read-only lookup used by sync loops to classify observed entries.
    pub async fn find_record(
        &self,
        connector_name: &str,
        external_id: &str,
    ) -> Result<Option<Record>> {
        let tx = self.graph.begin().await?;
        let record = tx.get_record_by_external_id(connector_name, external_id).await?;
        tx.abort().await?;
        Ok(record)
    }

    /// The permission set currently attached to a record, reconstructed from
    /// its incoming permission edges. Sync loops diff this against the
    /// source ACL to decide whether a permission re-sync is needed.
    pub async fn get_record_permissions(&self, record_key: &str) -> Result<Vec<Permission>> {
        let tx = self.graph.begin().await?;
        let edge_docs = tx
            .get_edges_to(&node_id(collections::RECORDS, record_key), edges::PERMISSIONS)
            .await?;
        tx.abort().await?;

        let mut permissions = Vec::with_capacity(edge_docs.len());
        for edge in edge_docs {
            let entity_type = edge
                .attrs
                .get("entityType")
                .cloned()
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or(EntityType::User);
            let permission_type = edge
                .attrs
                .get("type")
                .cloned()
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or(PermissionType::Read);
            permissions.push(Permission {
                entity_type,
                permission_type,
                external_id: edge
                    .attrs
                    .get("externalPermissionId")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                email: edge.attrs.get("email").and_then(Value::as_str).map(str::to_string),
            });
        }
        Ok(permissions)
    }

    /// Ingest a batch of new records with their permission sets: one
    /// transaction for the whole batch, events after commit.
    pub async fn on_new_records(&self, batch: Vec<(Record, Vec<Permission>)>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut tx = self.graph.begin().await?;
        let to_publish = match self.process_batch(tx.as_mut(), batch).await {
            Ok(records) => records,
            Err(err) => {
                tx.abort().await?;
                return Err(err);
            }
        };
        tx.commit().await?;

        for record in &to_publish {
            self.producer
                .send(
                    RECORD_EVENTS_TOPIC,
                    RecordEvent::for_record(RecordEventType::NewRecord, record),
                )
                .await?;
        }
        Ok(())
    }

    /// Re-ingest a record whose content changed. Permissions are left alone.
    pub async fn on_record_content_update(&self, mut record: Record) -> Result<()> {
        let mut tx = self.graph.begin().await?;
        match self.process_record(tx.as_mut(), &mut record).await {
            Ok(_) => tx.commit().await?,
            Err(err) => {
                tx.abort().await?;
                return Err(err);
            }
        }
        self.producer
            .send(
                RECORD_EVENTS_TOPIC,
                RecordEvent::for_record(RecordEventType::UpdateRecord, &record),
            )
            .await
    }

    /// Upsert the record node only; no edges are rewritten.
    pub async fn on_record_metadata_update(&self, mut record: Record) -> Result<()> {
        let mut tx = self.graph.begin().await?;
        let result = async {
            if let Some(existing) = tx
                .get_record_by_external_id(&record.connector_name, &record.external_record_id)
                .await?
            {
                record.key = existing.key;
                record.version = existing.version;
            }
            record.org_id = self.org_key.clone();
            record.updated_at_timestamp = epoch_ms();
            let node = record.to_node()?;
            tx.batch_upsert_nodes(vec![node], collections::RECORDS).await
        }
        .await;
        match result {
            Ok(()) => tx.commit().await?,
            Err(err) => {
                tx.abort().await?;
                return Err(err);
            }
        }
        self.producer
            .send(
                RECORD_EVENTS_TOPIC,
                RecordEvent::for_record(RecordEventType::UpdateRecord, &record),
            )
            .await
    }

    /// Replace the record's permission edges in place: delete every incoming
    /// permission edge, then re-resolve and re-insert the new set.
    pub async fn on_updated_record_permissions(
        &self,
        record: &Record,
        permissions: &[Permission],
    ) -> Result<()> {
        let mut tx = self.graph.begin().await?;
        let result = async {
            let key = match tx
                .get_record_by_external_id(&record.connector_name, &record.external_record_id)
                .await?
            {
                Some(existing) => existing.key,
                None => record.key.clone(),
            };
            let deleted = tx
                .delete_edges_to(&node_id(collections::RECORDS, &key), edges::PERMISSIONS)
                .await?;
            info!(record = %key, deleted, "replaced permission edges");

            if permissions.is_empty() {
                return Ok(());
            }
            let mut resolved = record.clone();
            resolved.key = key;
            self.handle_record_permissions(tx.as_mut(), &resolved, permissions)
                .await
        }
        .await;
        match result {
            Ok(()) => tx.commit().await,
            Err(err) => {
                tx.abort().await?;
                Err(err)
            }
        }
    }

    /// Remove the record node and every incident edge, then emit
    /// `deleteRecord`. Unknown external ids are a no-op.
    pub async fn on_record_deleted(
        &self,
        connector_name: &str,
        external_record_id: &str,
    ) -> Result<()> {
        let mut tx = self.graph.begin().await?;
        let record = match tx
            .get_record_by_external_id(connector_name, external_record_id)
            .await?
        {
            Some(record) => record,
            None => {
                tx.abort().await?;
                return Ok(());
            }
        };
        let result = async {
            tx.delete_nodes_and_edges(vec![record.key.clone()], collections::RECORDS)
                .await?;
            tx.delete_nodes_and_edges(
                vec![record.key.clone()],
                type_collection(record.record_type),
            )
            .await
        }
        .await;
        match result {
            Ok(()) => tx.commit().await?,
            Err(err) => {
                tx.abort().await?;
                return Err(err);
            }
        }
        self.producer
            .send(
                RECORD_EVENTS_TOPIC,
                RecordEvent::for_record(RecordEventType::DeleteRecord, &record),
            )
            .await
    }

    /// Upsert record groups with their permission sets and anchor each group
    /// under the organization.
    pub async fn on_new_record_groups(
        &self,
        groups: Vec<(RecordGroup, Vec<Permission>)>,
    ) -> Result<()> {
        if groups.is_empty() {
            return Ok(());
        }
        let mut tx = self.graph.begin().await?;
        let result = self.process_record_groups(tx.as_mut(), groups).await;
        match result {
            Ok(()) => tx.commit().await,
            Err(err) => {
                tx.abort().await?;
                Err(err)
            }
        }
    }

    /// Upsert app users that are not already known by email.
    pub async fn on_new_app_users(&self, users: Vec<AppUser>) -> Result<()> {
        if users.is_empty() {
            return Ok(());
        }
        let mut tx = self.graph.begin().await?;
        let result = async {
            let existing = tx.get_users(&self.org_key, false).await?;
            let known: std::collections::HashSet<String> =
                existing.into_iter().map(|u| u.email).collect();
            for mut user in users {
                if known.contains(&user.email) {
                    continue;
                }
                user.org_id = self.org_key.clone();
                let node = user.to_node()?;
                tx.batch_upsert_nodes(vec![node], collections::USERS).await?;
            }
            Ok(())
        }
        .await;
        match result {
            Ok(()) => tx.commit().await,
            Err(err) => {
                tx.abort().await?;
                Err(err)
            }
        }
    }

    /// Upsert user groups and their membership permission edges.
    pub async fn on_new_user_groups(
        &self,
        groups: Vec<(AppUserGroup, Vec<Permission>)>,
    ) -> Result<()> {
        if groups.is_empty() {
            return Ok(());
        }
        let mut tx = self.graph.begin().await?;
        let result = async {
            for (mut group, permissions) in groups {
                group.org_id = self.org_key.clone();
                if let Some(existing) = tx
                    .get_user_group_by_external_id(&group.app_name, &group.source_user_group_id)
                    .await?
                {
                    group.key = existing.key;
                    group.updated_at_timestamp = epoch_ms();
                }
                let node = group.to_node()?;
                tx.batch_upsert_nodes(vec![node], collections::GROUPS).await?;

                let mut membership = Vec::new();
                let to = node_id(collections::GROUPS, &group.key);
                for permission in &permissions {
                    if permission.entity_type != EntityType::User {
                        continue;
                    }
                    let Some(email) = permission.email.as_deref() else {
                        continue;
                    };
                    match tx.get_user_by_email(email).await? {
                        Some(user) => membership.push(
                            Edge::new(node_id(collections::USERS, &user.key), to.clone())
                                .with_attrs(permission.to_edge_attrs()),
                        ),
                        None => {
                            warn!(email, group = %group.name, "member not found for user group");
                        }
                    }
                }
                if !membership.is_empty() {
                    tx.batch_create_edges(membership, edges::PERMISSIONS).await?;
                }
            }
            Ok(())
        }
        .await;
        match result {
            Ok(()) => tx.commit().await,
            Err(err) => {
                tx.abort().await?;
                Err(err)
            }
        }
    }

    /// Add one member to a user group; returns false when the user or group
    /// is unknown, or when the membership edge already exists.
    pub async fn on_user_group_member_added(
        &self,
        external_group_id: &str,
        user_email: &str,
        permission_type: PermissionType,
        connector_name: &str,
    ) -> Result<bool> {
        let mut tx = self.graph.begin().await?;
        let result = async {
            let Some(user) = tx.get_user_by_email(user_email).await? else {
                warn!(user_email, external_group_id, "cannot add member: user not found");
                return Ok(false);
            };
            let Some(group) = tx
                .get_user_group_by_external_id(connector_name, external_group_id)
                .await?
            else {
                warn!(external_group_id, "cannot add member: group not found");
                return Ok(false);
            };

            let from = node_id(collections::USERS, &user.key);
            let to = node_id(collections::GROUPS, &group.key);
            if tx.get_edge(&from, &to, edges::PERMISSIONS).await?.is_some() {
                return Ok(false);
            }

            let permission = Permission {
                entity_type: EntityType::User,
                permission_type,
                external_id: Some(user.key.clone()),
                email: Some(user_email.to_string()),
            };
            tx.batch_create_edges(
                vec![Edge::new(from, to).with_attrs(permission.to_edge_attrs())],
                edges::PERMISSIONS,
            )
            .await?;
            Ok(true)
        }
        .await;
        match result {
            Ok(added) => {
                tx.commit().await?;
                Ok(added)
            }
            Err(err) => {
                tx.abort().await?;
                Err(err)
            }
        }
    }

    /// Remove one member from a user group; returns whether an edge existed.
    pub async fn on_user_group_member_removed(
        &self,
        external_group_id: &str,
        user_email: &str,
        connector_name: &str,
    ) -> Result<bool> {
        let mut tx = self.graph.begin().await?;
        let result = async {
            let Some(user) = tx.get_user_by_email(user_email).await? else {
                warn!(user_email, external_group_id, "cannot remove member: user not found");
                return Ok(false);
            };
            let Some(group) = tx
                .get_user_group_by_external_id(connector_name, external_group_id)
                .await?
            else {
                warn!(external_group_id, "cannot remove member: group not found");
                return Ok(false);
            };
            tx.delete_edge(
                &node_id(collections::USERS, &user.key),
                &node_id(collections::GROUPS, &group.key),
                edges::PERMISSIONS,
            )
            .await
        }
        .await;
        match result {
            Ok(removed) => {
                tx.commit().await?;
                Ok(removed)
            }
            Err(err) => {
                tx.abort().await?;
                Err(err)
            }
        }
    }

    /// Delete a user group and all of its edges.
    pub async fn on_user_group_deleted(
        &self,
        external_group_id: &str,
        connector_name: &str,
    ) -> Result<bool> {
        let mut tx = self.graph.begin().await?;
        let group = tx
            .get_user_group_by_external_id(connector_name, external_group_id)
            .await?;
        let Some(group) = group else {
            tx.abort().await?;
            warn!(external_group_id, "cannot delete group: not found");
            return Ok(false);
        };
        match tx
            .delete_nodes_and_edges(vec![group.key.clone()], collections::GROUPS)
            .await
        {
            Ok(()) => {
                tx.commit().await?;
                info!(group = %group.name, external_group_id, "deleted user group");
                Ok(true)
            }
            Err(err) => {
                tx.abort().await?;
                Err(err)
            }
        }
    }

    /// Active users of the organization.
    pub async fn get_all_active_users(&self) -> Result<Vec<AppUser>> {
        let tx = self.graph.begin().await?;
        let users = tx.get_users(&self.org_key, true).await?;
        tx.abort().await?;
        Ok(users)
    }

    // --- internals -------------------------------------------------------

    async fn process_batch(
        &self,
        tx: &mut dyn GraphTx,
        batch: Vec<(Record, Vec<Permission>)>,
    ) -> Result<Vec<Record>> {
        let mut to_publish = Vec::new();
        for (mut record, permissions) in batch {
            let outcome = self.process_record(tx, &mut record).await?;
            if !permissions.is_empty() {
                self.handle_record_permissions(tx, &record, &permissions).await?;
            }
            if outcome != RecordOutcome::Unchanged {
                to_publish.push(record);
            }
        }
        Ok(to_publish)
    }

    /// The single-record ingestion path shared by `on_new_records` and
    /// `on_record_content_update`.
    async fn process_record(
        &self,
        tx: &mut dyn GraphTx,
        record: &mut Record,
    ) -> Result<RecordOutcome> {
        record.org_id = self.org_key.clone();

        let existing = tx
            .get_record_by_external_id(&record.connector_name, &record.external_record_id)
            .await?;

        let outcome = match existing {
            None => {
                record.version = 0;
                let node = record.to_node()?;
                tx.batch_upsert_nodes(vec![node], collections::RECORDS).await?;
                info!(record = %record.record_name, key = %record.key, "ingested new record");
                RecordOutcome::New
            }
            Some(existing) => {
                record.key = existing.key.clone();
                if record.external_revision_id != existing.external_revision_id {
                    record.version = existing.version + 1;
                    record.updated_at_timestamp = epoch_ms();
                    let node = record.to_node()?;
                    tx.batch_upsert_nodes(vec![node], collections::RECORDS).await?;
                    info!(
                        record = %record.record_name,
                        from = existing.version,
                        to = record.version,
                        "updated record"
                    );
                    RecordOutcome::Updated
                } else {
                    record.version = existing.version;
                    RecordOutcome::Unchanged
                }
            }
        };

        self.handle_type_document(tx, record).await?;
        self.handle_parent_record(tx, record).await?;
        self.handle_record_group(tx, record).await?;
        Ok(outcome)
    }

    /// Keep the IS_OF_TYPE edge from the record to its type-specific document.
    async fn handle_type_document(&self, tx: &mut dyn GraphTx, record: &Record) -> Result<()> {
        let collection = type_collection(record.record_type);
        let doc = serde_json::json!({
            "_key": record.key,
            "orgId": record.org_id,
            "recordType": record.record_type,
            "name": record.record_name,
            "isFile": record.is_file,
            "extension": record.extension,
            "mimeType": record.mime_type,
            "sizeInBytes": record.size_in_bytes,
        });
        tx.batch_upsert_nodes(vec![doc], collection).await?;
        tx.batch_create_edges(
            vec![Edge::new(
                node_id(collections::RECORDS, &record.key),
                node_id(collection, &record.key),
            )],
            edges::IS_OF_TYPE,
        )
        .await
    }

    /// Link the record under its parent, synthesizing a placeholder folder
    /// when a FILE's FILE parent has not been ingested yet. A missing parent
    /// of any other type defers the edge to a later sync or reconciliation.
    async fn handle_parent_record(&self, tx: &mut dyn GraphTx, record: &Record) -> Result<()> {
        let Some(parent_external_id) = record.parent_external_record_id.as_deref() else {
            return Ok(());
        };

        let mut parent = tx
            .get_record_by_external_id(&record.connector_name, parent_external_id)
            .await?;

        if parent.is_none()
            && record.parent_record_type == Some(RecordType::File)
            && record.record_type == RecordType::File
        {
            let placeholder = Record::new(
                self.org_key.clone(),
                parent_external_id,
                RecordType::File,
                record.connector_name.clone(),
                record.connector_id.clone(),
                parent_external_id,
                record.external_record_group_id.clone(),
                record.record_group_type,
            )
            .as_folder();
            let node = placeholder.to_node()?;
            tx.batch_upsert_nodes(vec![node], collections::RECORDS).await?;
            self.handle_type_document(tx, &placeholder).await?;
            self.handle_record_group(tx, &placeholder).await?;
            info!(parent = parent_external_id, "synthesized placeholder parent folder");
            parent = Some(placeholder);
        }

        if let Some(parent) = parent {
            let relation = if record.record_type == RecordType::File
                && record.parent_record_type == Some(RecordType::Mail)
            {
                RelationType::Attachment
            } else {
                RelationType::ParentChild
            };
            tx.create_record_relation(&parent.key, &record.key, relation).await?;
        }
        Ok(())
    }

    /// Link the record to its group, creating the group on first sight.
    async fn handle_record_group(&self, tx: &mut dyn GraphTx, record: &Record) -> Result<()> {
        let group = match tx
            .get_record_group_by_external_id(&record.connector_name, &record.external_record_group_id)
            .await?
        {
            Some(group) => group,
            None => {
                let mut group = RecordGroup::new(
                    record.external_record_group_id.clone(),
                    record.record_group_type,
                    record.connector_name.clone(),
                    record.connector_id.clone(),
                    record.external_record_group_id.clone(),
                );
                group.org_id = self.org_key.clone();
                let node = group.to_node()?;
                tx.batch_upsert_nodes(vec![node], collections::RECORD_GROUPS).await?;
                group
            }
        };
        tx.create_record_group_relation(&record.key, &group.key).await
    }

    async fn process_record_groups(
        &self,
        tx: &mut dyn GraphTx,
        groups: Vec<(RecordGroup, Vec<Permission>)>,
    ) -> Result<()> {
        for (mut group, permissions) in groups {
            group.org_id = self.org_key.clone();
            if let Some(existing) = tx
                .get_record_group_by_external_id(&group.connector_name, &group.external_group_id)
                .await?
            {
                group.key = existing.key;
                group.updated_at_timestamp = epoch_ms();
            }
            let node = group.to_node()?;
            tx.batch_upsert_nodes(vec![node], collections::RECORD_GROUPS).await?;

            // Anchor the group under the organization.
            tx.batch_create_edges(
                vec![Edge::new(
                    node_id(collections::RECORD_GROUPS, &group.key),
                    node_id(collections::ORGS, &self.org_key),
                )
                .with_attrs(serde_json::json!({
                    "entityType": "ORGANIZATION",
                    "createdAtTimestamp": group.created_at_timestamp,
                    "updatedAtTimestamp": group.updated_at_timestamp,
                }))],
                edges::BELONGS_TO,
            )
            .await?;

            let to = node_id(collections::RECORD_GROUPS, &group.key);
            let mut resolved = Vec::new();
            for permission in &permissions {
                match permission.entity_type {
                    EntityType::User => {
                        let Some(email) = permission.email.as_deref() else {
                            continue;
                        };
                        match tx.get_user_by_email(email).await? {
                            Some(user) => resolved.push(
                                Edge::new(node_id(collections::USERS, &user.key), to.clone())
                                    .with_attrs(permission.to_edge_attrs()),
                            ),
                            None => warn!(email, group = %group.name, "user not found for group permission"),
                        }
                    }
                    EntityType::Group => {
                        let Some(external_id) = permission.external_id.as_deref() else {
                            continue;
                        };
                        match tx
                            .get_user_group_by_external_id(&group.connector_name, external_id)
                            .await?
                        {
                            Some(user_group) => resolved.push(
                                Edge::new(node_id(collections::GROUPS, &user_group.key), to.clone())
                                    .with_attrs(permission.to_edge_attrs()),
                            ),
                            None => warn!(external_id, group = %group.name, "group not found for group permission"),
                        }
                    }
                    _ => {}
                }
            }
            if !resolved.is_empty() {
                tx.batch_create_edges(resolved, edges::PERMISSIONS).await?;
            }

            if let Some(parent_external_id) = group.parent_external_group_id.as_deref() {
                if let Some(parent) = tx
                    .get_record_group_by_external_id(&group.connector_name, parent_external_id)
                    .await?
                {
                    tx.batch_create_edges(
                        vec![Edge::new(
                            node_id(collections::RECORD_GROUPS, &group.key),
                            node_id(collections::RECORD_GROUPS, &parent.key),
                        )
                        .with_attrs(serde_json::json!({"entityType": "RECORD_GROUP"}))],
                        edges::BELONGS_TO,
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }

    /// Resolve each permission entry to a principal node and emit the edge
    /// `principal -> record`.
    async fn handle_record_permissions(
        &self,
        tx: &mut dyn GraphTx,
        record: &Record,
        permissions: &[Permission],
    ) -> Result<()> {
        let to = node_id(collections::RECORDS, &record.key);
        let mut resolved = Vec::new();
        for permission in permissions {
            if let Some(from) = self.resolve_principal(tx, record, permission).await? {
                resolved.push(Edge::new(from, to.clone()).with_attrs(permission.to_edge_attrs()));
            }
        }
        if !resolved.is_empty() {
            tx.batch_create_edges(resolved, edges::PERMISSIONS).await?;
        }
        Ok(())
    }

    async fn resolve_principal(
        &self,
        tx: &mut dyn GraphTx,
        record: &Record,
        permission: &Permission,
    ) -> Result<Option<String>> {
        match permission.entity_type {
            EntityType::User => {
                let Some(email) = permission.email.as_deref() else {
                    warn!("user permission without email; skipping");
                    return Ok(None);
                };
                let user = match tx.get_user_by_email(email).await? {
                    Some(user) => user,
                    None => self.create_external_user(tx, email, record).await?,
                };
                Ok(Some(node_id(collections::USERS, &user.key)))
            }
            EntityType::Group => {
                let Some(external_id) = permission.external_id.as_deref() else {
                    warn!("group permission without external id; skipping");
                    return Ok(None);
                };
                match tx
                    .get_user_group_by_external_id(&record.connector_name, external_id)
                    .await?
                {
                    Some(group) => Ok(Some(node_id(collections::GROUPS, &group.key))),
                    None => {
                        warn!(external_id, "group principal not found; skipping permission");
                        Ok(None)
                    }
                }
            }
            EntityType::Org => Ok(Some(node_id(collections::ORGS, &self.org_key))),
            EntityType::Domain => {
                let key = permission
                    .external_id
                    .as_deref()
                    .unwrap_or(anchors::DEFAULT_DOMAIN_KEY);
                self.ensure_anchor(tx, collections::DOMAINS, key).await?;
                Ok(Some(node_id(collections::DOMAINS, key)))
            }
            EntityType::Anyone => {
                self.ensure_anchor(tx, collections::ANYONE, anchors::ANYONE_KEY).await?;
                Ok(Some(node_id(collections::ANYONE, anchors::ANYONE_KEY)))
            }
            EntityType::AnyoneWithLink => {
                self.ensure_anchor(
                    tx,
                    collections::ANYONE_WITH_LINK,
                    anchors::ANYONE_WITH_LINK_KEY,
                )
                .await?;
                Ok(Some(node_id(
                    collections::ANYONE_WITH_LINK,
                    anchors::ANYONE_WITH_LINK_KEY,
                )))
            }
        }
    }

    /// Synthesize an inactive external user for an email the source shared
    /// with. The key is stable: UUIDv5 over the email in the DNS namespace.
    async fn create_external_user(
        &self,
        tx: &mut dyn GraphTx,
        email: &str,
        record: &Record,
    ) -> Result<AppUser> {
        let stable_id = uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_DNS, email.as_bytes()).to_string();
        let local_part = email.split('@').next().unwrap_or(email);
        let mut user = AppUser::new(
            record.connector_name.clone(),
            record.connector_id.clone(),
            stable_id.clone(),
            email,
        )
        .with_full_name(local_part)
        .inactive();
        user.key = stable_id;
        user.org_id = self.org_key.clone();

        let node = user.to_node()?;
        tx.batch_upsert_nodes(vec![node], collections::USERS).await?;
        info!(email, "created inactive external user");
        Ok(user)
    }

    async fn ensure_anchor(&self, tx: &mut dyn GraphTx, collection: &str, key: &str) -> Result<()> {
        if tx.get_node(collection, key).await?.is_none() {
            tx.batch_upsert_nodes(
                vec![serde_json::json!({"_key": key, "orgId": self.org_key})],
                collection,
            )
            .await?;
        }
        Ok(())
    }
}
