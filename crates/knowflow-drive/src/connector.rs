//! The drive connector proper.

use std::sync::Arc;

use async_trait::async_trait;
use knowflow::core::config::connector_config_path;
use knowflow::core::error::{Error, Result};
use knowflow::core::time::parse_rfc3339_ms;
use knowflow::models::{
    AppUser, IndexingStatus, Permission, PermissionType, Record, RecordGroup, RecordGroupType,
    RecordType, RecordUpdate,
};
use knowflow::models::permission::EntityType;
use knowflow::sync::{Connector, ConnectorContext, RecordDispatcher, DEFAULT_BATCH_SIZE};
use knowflow::storage::sync_point::{SyncDataPointType, SyncPoint};
use serde_json::Value;
use tracing::{info, warn};

use crate::api::{DriveApi, DriveFile, DrivePermissionEntry};

/// Connector name recorded on every entity this connector produces.
pub const CONNECTOR_NAME: &str = "DRIVE";

/// Personal-drive connector instance.
pub struct DriveConnector {
    ctx: ConnectorContext,
    api: Arc<dyn DriveApi>,
    records_sync_point: SyncPoint,
    batch_size: usize,
    initialized: bool,
}

impl DriveConnector {
    #[must_use]
    pub fn new(ctx: ConnectorContext, api: Arc<dyn DriveApi>) -> Self {
        let records_sync_point = SyncPoint::new(
            ctx.connector_id.clone(),
            SyncDataPointType::Records,
            ctx.sync_points.clone(),
        );
        Self {
            ctx,
            api,
            records_sync_point,
            batch_size: DEFAULT_BATCH_SIZE,
            initialized: false,
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    fn map_permissions(&self, entries: &[DrivePermissionEntry], owner: &OwnerIdentity) -> Vec<Permission> {
        let mut permissions: Vec<Permission> = entries
            .iter()
            .filter_map(|entry| {
                let permission_type = match entry.role.as_str() {
                    "owner" => PermissionType::Owner,
                    "writer" => PermissionType::Write,
                    "commenter" => PermissionType::Comment,
                    "reader" => PermissionType::Read,
                    other => {
                        warn!(role = other, "unknown drive role; treating as reader");
                        PermissionType::Read
                    }
                };
                match entry.grantee_type.as_str() {
                    "user" => Some(Permission {
                        entity_type: EntityType::User,
                        permission_type,
                        external_id: Some(entry.id.clone()),
                        email: entry.email.clone(),
                    }),
                    "group" => Some(Permission {
                        entity_type: EntityType::Group,
                        permission_type,
                        external_id: Some(entry.id.clone()),
                        email: entry.email.clone(),
                    }),
                    "domain" => Some(Permission {
                        entity_type: EntityType::Domain,
                        permission_type,
                        external_id: Some(entry.id.clone()),
                        email: None,
                    }),
                    "anyone" => Some(Permission {
                        entity_type: EntityType::Anyone,
                        permission_type,
                        external_id: None,
                        email: None,
                    }),
                    other => {
                        warn!(grantee = other, "unknown drive grantee type; skipping");
                        None
                    }
                }
            })
            .collect();

        // Sources that revoke our ACL read return nothing; fall back to the
        // drive owner so the record never goes unguarded.
        if permissions.is_empty() {
            permissions.push(Permission::owner(owner.user_id.clone(), owner.email.clone()));
        }
        permissions
    }

    async fn process_file(
        &self,
        file: &DriveFile,
        owner: &OwnerIdentity,
        record_group_id: &str,
    ) -> Result<RecordUpdate> {
        let existing = self
            .ctx
            .processor
            .find_record(CONNECTOR_NAME, &file.id)
            .await?;

        let is_folder =
            file.mime_type.as_deref() == Some(knowflow::models::entities::FOLDER_MIME_TYPE);
        let status = if file.shared {
            IndexingStatus::AutoIndexOff
        } else {
            IndexingStatus::NotStarted
        };
        let extension = file.file_extension.clone().or_else(|| {
            file.name
                .rsplit_once('.')
                .map(|(_, ext)| ext.to_ascii_lowercase())
        });

        let mut record = Record::new(
            String::new(),
            file.name.clone(),
            RecordType::File,
            CONNECTOR_NAME,
            self.ctx.connector_id.clone(),
            file.id.clone(),
            record_group_id,
            RecordGroupType::Drive,
        )
        .with_mime_type(file.mime_type.clone().unwrap_or_else(|| "application/octet-stream".into()))
        .with_size(file.size.unwrap_or(0))
        .with_indexing_status(status)
        .with_source_timestamps(
            file.created_time.as_deref().and_then(parse_rfc3339_ms),
            file.modified_time.as_deref().and_then(parse_rfc3339_ms),
        );
        if let Some(revision) = &file.head_revision_id {
            record = record.with_revision(revision.clone());
        }
        if let Some(extension) = extension {
            record = record.with_extension(extension);
        }
        if let Some(link) = &file.web_view_link {
            record = record.with_web_url(link.clone());
        }
        if let Some(parent) = file.parents.first() {
            record = record.with_parent(parent.clone(), RecordType::File);
        }
        if is_folder {
            record = record.as_folder();
        }
        record.is_shared = file.shared;
        record.md5_hash = file.md5_checksum.clone();
        record.sha1_hash = file.sha1_checksum.clone();
        record.sha256_hash = file.sha256_checksum.clone();
        record.virtual_record_id = Some(record.content_fingerprint());

        let new_permissions = self.map_permissions(&file.permissions, owner);

        match existing {
            None => Ok(RecordUpdate::new_record(record, new_permissions)),
            Some(existing_record) => {
                record.key = existing_record.key.clone();
                let metadata_changed = existing_record.record_name != file.name;
                let content_changed =
                    existing_record.external_revision_id != file.head_revision_id;
                let old_permissions = self
                    .ctx
                    .processor
                    .get_record_permissions(&existing_record.key)
                    .await?;
                let permissions_changed =
                    !Permission::sets_equal(&old_permissions, &new_permissions);
                Ok(RecordUpdate::changed(
                    record,
                    metadata_changed,
                    content_changed,
                    permissions_changed,
                    old_permissions,
                    new_permissions,
                ))
            }
        }
    }

    async fn owner_identity(&self) -> Result<OwnerIdentity> {
        let about = self.api.about().await?;
        Ok(OwnerIdentity {
            user_id: about.user_id,
            email: about.email,
            display_name: about.display_name,
        })
    }

    async fn sync_personal_drive(&self, owner: &OwnerIdentity) -> Result<()> {
        let sync_point = self
            .records_sync_point
            .read_sync_point(&owner.user_id)
            .await?;
        let page_token = sync_point
            .get("pageToken")
            .and_then(Value::as_str)
            .map(str::to_string);

        match page_token {
            None => {
                info!("no sync point found; starting full drive sync");
                self.full_sync(owner).await
            }
            Some(token) => {
                info!("replaying drive changes from stored cursor");
                self.incremental_sync(owner, token).await
            }
        }
    }

    fn dispatcher(&self) -> RecordDispatcher {
        let mut dispatcher = RecordDispatcher::new(self.ctx.processor.clone(), CONNECTOR_NAME)
            .with_batch_size(self.batch_size);
        if let Some(transformer) = &self.ctx.transformer {
            dispatcher = dispatcher.with_transformer(transformer.clone());
        }
        dispatcher
    }

    async fn full_sync(&self, owner: &OwnerIdentity) -> Result<()> {
        // Fetched before the listing so the first incremental run replays
        // anything written while the full listing was in flight.
        let start_page_token = self.api.start_page_token().await?;

        let mut dispatcher = self.dispatcher();

        let mut page_token: Option<String> = None;
        let mut total = 0usize;
        loop {
            let page = self.api.list_files(page_token.as_deref()).await?;
            for file in &page.files {
                let update = self.process_file(file, owner, &owner.user_id).await?;
                dispatcher.dispatch(update).await?;
                total += 1;
            }
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        dispatcher.finish().await?;

        self.records_sync_point
            .update_sync_point(
                &owner.user_id,
                serde_json::json!({"pageToken": start_page_token}),
            )
            .await?;
        info!(total, "full drive sync completed");
        Ok(())
    }

    async fn incremental_sync(&self, owner: &OwnerIdentity, cursor: String) -> Result<()> {
        let mut dispatcher = self.dispatcher();

        let mut current = cursor;
        let mut total = 0usize;
        let next_cursor = loop {
            let page = self.api.list_changes(&current).await?;
            for change in &page.changes {
                if change.removed {
                    dispatcher
                        .dispatch(RecordUpdate::tombstone(change.file_id.clone()))
                        .await?;
                    total += 1;
                    continue;
                }
                let Some(file) = &change.file else {
                    warn!(file_id = %change.file_id, "change entry without file metadata; skipping");
                    continue;
                };
                let update = self.process_file(file, owner, &owner.user_id).await?;
                dispatcher.dispatch(update).await?;
                total += 1;
            }
            match page.next_page_token {
                Some(token) => current = token,
                None => break page.new_start_page_token.unwrap_or(current),
            }
        };
        dispatcher.finish().await?;

        self.records_sync_point
            .update_sync_point(&owner.user_id, serde_json::json!({"pageToken": next_cursor}))
            .await?;
        info!(total, "incremental drive sync completed");
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct OwnerIdentity {
    user_id: String,
    email: String,
    display_name: String,
}

#[async_trait]
impl Connector for DriveConnector {
    fn name(&self) -> &str {
        CONNECTOR_NAME
    }

    async fn init(&mut self) -> Result<()> {
        let config = self
            .ctx
            .config
            .get(&connector_config_path(&self.ctx.connector_id))
            .await?
            .ok_or_else(|| Error::config("drive connector config not found"))?;

        let auth = config.get("auth").cloned().unwrap_or(Value::Null);
        if auth.get("clientId").and_then(Value::as_str).is_none()
            || auth.get("clientSecret").and_then(Value::as_str).is_none()
        {
            return Err(Error::config(
                "incomplete drive credentials: clientId and clientSecret are required",
            ));
        }
        self.initialized = true;
        info!(connector_id = %self.ctx.connector_id, "drive connector initialized");
        Ok(())
    }

    async fn run_sync(&mut self) -> Result<()> {
        let owner = self.owner_identity().await?;

        let user = AppUser::new(
            CONNECTOR_NAME,
            self.ctx.connector_id.clone(),
            owner.user_id.clone(),
            owner.email.clone(),
        )
        .with_full_name(owner.display_name.clone());
        self.ctx.processor.on_new_app_users(vec![user]).await?;

        let group = RecordGroup::new(
            format!("Drive - {}", owner.email),
            RecordGroupType::Drive,
            CONNECTOR_NAME,
            self.ctx.connector_id.clone(),
            owner.user_id.clone(),
        );
        let group_permissions =
            vec![Permission::owner(owner.user_id.clone(), owner.email.clone())];
        self.ctx
            .processor
            .on_new_record_groups(vec![(group, group_permissions)])
            .await?;

        self.sync_personal_drive(&owner).await
    }

    async fn run_incremental_sync(&mut self) -> Result<()> {
        let owner = self.owner_identity().await?;
        self.sync_personal_drive(&owner).await
    }

    async fn test_connection_and_access(&self) -> Result<bool> {
        match self.api.about().await {
            Ok(_) => Ok(true),
            Err(Error::Auth(_)) | Err(Error::PermissionDenied(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn get_signed_url(&self, record: &Record) -> Result<Option<String>> {
        match self.api.create_signed_url(&record.external_record_id).await {
            Ok(url) => Ok(Some(url)),
            Err(err) => {
                // Best effort: a missing link never fails the sync.
                warn!(record = %record.external_record_id, error = %err, "signed url fetch failed");
                Ok(None)
            }
        }
    }

    async fn cleanup(&mut self) -> Result<()> {
        self.initialized = false;
        Ok(())
    }
}
