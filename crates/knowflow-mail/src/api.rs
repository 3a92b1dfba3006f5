//! Mailbox source API.

use std::sync::Arc;

use async_trait::async_trait;
use knowflow::core::auth::TokenManager;
use knowflow::core::error::{error_for_status, Error, Result};
use knowflow::core::rate_limit::RateLimiter;
use serde::{Deserialize, Serialize};

/// The mailbox owner.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailProfile {
    pub user_id: String,
    pub email_address: String,
    /// Mailbox history cursor as of this call.
    pub history_id: String,
}

/// A label (folder-as-container).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailLabel {
    pub id: String,
    pub name: String,
}

/// An attachment on a message.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailAttachment {
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// A message as listed by the source.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub internal_date_ms: Option<i64>,
    #[serde(default)]
    pub attachments: Vec<MailAttachment>,
}

/// One page of a label's message listing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    #[serde(default)]
    pub messages: Vec<MailMessage>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// One page of the history feed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    #[serde(default)]
    pub messages_added: Vec<MailMessage>,
    #[serde(default)]
    pub messages_deleted: Vec<String>,
    #[serde(default)]
    pub next_page_token: Option<String>,
    /// Cursor for the next incremental run, set on the last page.
    #[serde(default)]
    pub history_id: Option<String>,
}

/// The mailbox operations the connector needs.
#[async_trait]
pub trait MailApi: Send + Sync {
    async fn profile(&self) -> Result<MailProfile>;

    async fn list_labels(&self) -> Result<Vec<MailLabel>>;

    async fn list_messages(&self, label_id: &str, page_token: Option<&str>)
        -> Result<MessagePage>;

    async fn list_history(
        &self,
        start_history_id: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryPage>;
}

/// REST client for the mailbox API.
pub struct HttpMailApi {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenManager>,
    limiter: Arc<dyn RateLimiter>,
    instance: String,
    principal: String,
}

impl HttpMailApi {
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        tokens: Arc<TokenManager>,
        limiter: Arc<dyn RateLimiter>,
        instance: impl Into<String>,
        principal: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            tokens,
            limiter,
            instance: instance.into(),
            principal: principal.into(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        self.limiter.acquire().await;
        let token = self.tokens.get_token(&self.instance, &self.principal).await?;
        let url = format!("{}{path}", self.base_url.trim_end_matches('/'));
        let resp = self
            .http
            .get(&url)
            .query(query)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::transient(format!("mail request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(error_for_status(status, path));
        }
        resp.json()
            .await
            .map_err(|e| Error::serialization(format!("bad mail response for {path}: {e}")))
    }
}

#[async_trait]
impl MailApi for HttpMailApi {
    async fn profile(&self) -> Result<MailProfile> {
        self.get_json("/v1/profile", &[]).await
    }

    async fn list_labels(&self) -> Result<Vec<MailLabel>> {
        #[derive(Deserialize)]
        struct Labels {
            #[serde(default)]
            labels: Vec<MailLabel>,
        }
        let labels: Labels = self.get_json("/v1/labels", &[]).await?;
        Ok(labels.labels)
    }

    async fn list_messages(
        &self,
        label_id: &str,
        page_token: Option<&str>,
    ) -> Result<MessagePage> {
        let mut query = vec![("labelId", label_id), ("pageSize", "500")];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        self.get_json("/v1/messages", &query).await
    }

    async fn list_history(
        &self,
        start_history_id: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryPage> {
        let mut query = vec![("startHistoryId", start_history_id)];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        self.get_json("/v1/history", &query).await
    }
}
