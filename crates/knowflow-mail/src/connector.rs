//! The mailbox connector proper.

use std::sync::Arc;

use async_trait::async_trait;
use knowflow::core::config::connector_config_path;
use knowflow::core::error::{Error, Result};
use knowflow::models::{
    AppUser, Permission, Record, RecordGroup, RecordGroupType, RecordType, RecordUpdate,
};
use knowflow::sync::{Connector, ConnectorContext, RecordDispatcher, DEFAULT_BATCH_SIZE};
use knowflow::storage::sync_point::{SyncDataPointType, SyncPoint};
use serde_json::Value;
use tracing::{info, warn};

use crate::api::{MailApi, MailMessage, MailProfile};

/// Connector name recorded on every entity this connector produces.
pub const CONNECTOR_NAME: &str = "MAIL";

/// Resource key the mailbox cursor is stored under.
const MAILBOX_RESOURCE: &str = "mailbox";

/// Mailbox connector instance.
pub struct MailConnector {
    ctx: ConnectorContext,
    api: Arc<dyn MailApi>,
    records_sync_point: SyncPoint,
    batch_size: usize,
    initialized: bool,
}

impl MailConnector {
    #[must_use]
    pub fn new(ctx: ConnectorContext, api: Arc<dyn MailApi>) -> Self {
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

    fn dispatcher(&self) -> RecordDispatcher {
        let mut dispatcher = RecordDispatcher::new(self.ctx.processor.clone(), CONNECTOR_NAME)
            .with_batch_size(self.batch_size);
        if let Some(transformer) = &self.ctx.transformer {
            dispatcher = dispatcher.with_transformer(transformer.clone());
        }
        dispatcher
    }

    /// The mail record plus one FILE record per attachment, classified
    /// against the stored graph state.
    async fn process_message(
        &self,
        message: &MailMessage,
        profile: &MailProfile,
        label_id: &str,
    ) -> Result<Vec<RecordUpdate>> {
        let mut updates = Vec::with_capacity(1 + message.attachments.len());
        let owner_permissions = vec![Permission::owner(
            profile.user_id.clone(),
            profile.email_address.clone(),
        )];

        let subject = message
            .subject
            .clone()
            .unwrap_or_else(|| "(no subject)".to_string());
        let mut mail_record = Record::new(
            String::new(),
            subject.clone(),
            RecordType::Mail,
            CONNECTOR_NAME,
            self.ctx.connector_id.clone(),
            message.id.clone(),
            label_id,
            RecordGroupType::Mailbox,
        )
        .with_mime_type("message/rfc822")
        .with_source_timestamps(message.internal_date_ms, message.internal_date_ms);
        mail_record.is_file = false;
        mail_record.virtual_record_id = Some(mail_record.content_fingerprint());

        let existing = self
            .ctx
            .processor
            .find_record(CONNECTOR_NAME, &message.id)
            .await?;
        match existing {
            None => updates.push(RecordUpdate::new_record(
                mail_record,
                owner_permissions.clone(),
            )),
            Some(existing_record) => {
                mail_record.key = existing_record.key.clone();
                let metadata_changed = existing_record.record_name != subject;
                if metadata_changed {
                    updates.push(RecordUpdate::changed(
                        mail_record,
                        true,
                        false,
                        false,
                        Vec::new(),
                        owner_permissions.clone(),
                    ));
                }
                // Messages are immutable; nothing else to re-sync.
            }
        }

        for attachment in &message.attachments {
            let existing = self
                .ctx
                .processor
                .find_record(CONNECTOR_NAME, &attachment.id)
                .await?;
            if existing.is_some() {
                continue;
            }
            let extension = attachment
                .filename
                .rsplit_once('.')
                .map(|(_, ext)| ext.to_ascii_lowercase());
            let mut record = Record::new(
                String::new(),
                attachment.filename.clone(),
                RecordType::File,
                CONNECTOR_NAME,
                self.ctx.connector_id.clone(),
                attachment.id.clone(),
                label_id,
                RecordGroupType::Mailbox,
            )
            .with_parent(message.id.clone(), RecordType::Mail)
            .with_mime_type(
                attachment
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".into()),
            )
            .with_size(attachment.size.unwrap_or(0));
            if let Some(extension) = extension {
                record = record.with_extension(extension);
            }
            record.virtual_record_id = Some(record.content_fingerprint());
            updates.push(RecordUpdate::new_record(record, owner_permissions.clone()));
        }

        Ok(updates)
    }

    async fn full_sync(&self, profile: &MailProfile) -> Result<()> {
        // The profile's history id predates the listing below, so the first
        // incremental run replays anything that arrived mid-listing.
        let start_history_id = profile.history_id.clone();

        let labels = self.api.list_labels().await?;
        let groups = labels
            .iter()
            .map(|label| {
                let group = RecordGroup::new(
                    label.name.clone(),
                    RecordGroupType::Mailbox,
                    CONNECTOR_NAME,
                    self.ctx.connector_id.clone(),
                    label.id.clone(),
                );
                let permissions = vec![Permission::owner(
                    profile.user_id.clone(),
                    profile.email_address.clone(),
                )];
                (group, permissions)
            })
            .collect();
        self.ctx.processor.on_new_record_groups(groups).await?;

        let mut dispatcher = self.dispatcher();
        let mut total = 0usize;
        for label in &labels {
            let mut page_token: Option<String> = None;
            loop {
                let page = self.api.list_messages(&label.id, page_token.as_deref()).await?;
                for message in &page.messages {
                    for update in self.process_message(message, profile, &label.id).await? {
                        dispatcher.dispatch(update).await?;
                        total += 1;
                    }
                }
                match page.next_page_token {
                    Some(token) => page_token = Some(token),
                    None => break,
                }
            }
        }
        dispatcher.finish().await?;

        self.records_sync_point
            .update_sync_point(
                MAILBOX_RESOURCE,
                serde_json::json!({"historyId": start_history_id}),
            )
            .await?;
        info!(total, "full mailbox sync completed");
        Ok(())
    }

    async fn incremental_sync(&self, profile: &MailProfile, cursor: String) -> Result<()> {
        let mut dispatcher = self.dispatcher();

        let mut page_token: Option<String> = None;
        let mut latest_history_id = cursor.clone();
        let mut total = 0usize;
        loop {
            let page = self
                .api
                .list_history(&cursor, page_token.as_deref())
                .await?;
            for message in &page.messages_added {
                // History entries do not say which label changed; file the
                // message under its first label.
                let label_id = message
                    .label_ids
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "INBOX".to_string());
                for update in self.process_message(message, profile, &label_id).await? {
                    dispatcher.dispatch(update).await?;
                    total += 1;
                }
            }
            for deleted_id in &page.messages_deleted {
                dispatcher
                    .dispatch(RecordUpdate::tombstone(deleted_id.clone()))
                    .await?;
                total += 1;
            }
            if let Some(history_id) = page.history_id {
                latest_history_id = history_id;
            }
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        dispatcher.finish().await?;

        self.records_sync_point
            .update_sync_point(
                MAILBOX_RESOURCE,
                serde_json::json!({"historyId": latest_history_id}),
            )
            .await?;
        info!(total, "incremental mailbox sync completed");
        Ok(())
    }
}

#[async_trait]
impl Connector for MailConnector {
    fn name(&self) -> &str {
        CONNECTOR_NAME
    }

    async fn init(&mut self) -> Result<()> {
        let config = self
            .ctx
            .config
            .get(&connector_config_path(&self.ctx.connector_id))
            .await?
            .ok_or_else(|| Error::config("mail connector config not found"))?;
        if config.get("auth").is_none() {
            return Err(Error::config("mail connector auth config missing"));
        }
        self.initialized = true;
        info!(connector_id = %self.ctx.connector_id, "mail connector initialized");
        Ok(())
    }

    async fn run_sync(&mut self) -> Result<()> {
        let profile = self.api.profile().await?;

        let user = AppUser::new(
            CONNECTOR_NAME,
            self.ctx.connector_id.clone(),
            profile.user_id.clone(),
            profile.email_address.clone(),
        );
        self.ctx.processor.on_new_app_users(vec![user]).await?;

        self.full_sync(&profile).await
    }

    async fn run_incremental_sync(&mut self) -> Result<()> {
        let profile = self.api.profile().await?;
        let sync_point = self
            .records_sync_point
            .read_sync_point(MAILBOX_RESOURCE)
            .await?;
        match sync_point.get("historyId").and_then(Value::as_str) {
            Some(cursor) => self.incremental_sync(&profile, cursor.to_string()).await,
            None => {
                warn!("no mailbox cursor stored; falling back to full sync");
                self.full_sync(&profile).await
            }
        }
    }

    async fn test_connection_and_access(&self) -> Result<bool> {
        match self.api.profile().await {
            Ok(_) => Ok(true),
            Err(Error::Auth(_)) | Err(Error::PermissionDenied(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn cleanup(&mut self) -> Result<()> {
        self.initialized = false;
        Ok(())
    }
}
