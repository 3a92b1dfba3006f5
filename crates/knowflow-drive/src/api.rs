//! Drive source API: the narrow surface the connector consumes.

use std::sync::Arc;

use async_trait::async_trait;
use knowflow::core::auth::TokenManager;
use knowflow::core::error::{error_for_status, Error, Result};
use knowflow::core::rate_limit::RateLimiter;
use serde::{Deserialize, Serialize};

/// The authenticated user behind the connector instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveAbout {
    pub user_id: String,
    pub email: String,
    pub display_name: String,
}

/// One source-side ACL entry on a file.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrivePermissionEntry {
    pub id: String,
    /// `user`, `group`, `domain`, or `anyone`.
    pub grantee_type: String,
    /// `owner`, `writer`, `commenter`, or `reader`.
    pub role: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// File metadata as listed by the source.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub head_revision_id: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub file_extension: Option<String>,
    #[serde(default)]
    pub web_view_link: Option<String>,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub modified_time: Option<String>,
    #[serde(default)]
    pub shared: bool,
    #[serde(default)]
    pub md5_checksum: Option<String>,
    #[serde(default)]
    pub sha1_checksum: Option<String>,
    #[serde(default)]
    pub sha256_checksum: Option<String>,
    #[serde(default)]
    pub permissions: Vec<DrivePermissionEntry>,
}

/// One entry in the change feed.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveChange {
    pub file_id: String,
    #[serde(default)]
    pub removed: bool,
    #[serde(default)]
    pub file: Option<DriveFile>,
}

/// A page of the full listing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// A page of the change feed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeList {
    #[serde(default)]
    pub changes: Vec<DriveChange>,
    #[serde(default)]
    pub next_page_token: Option<String>,
    /// Set on the last page: the cursor for the next incremental run.
    #[serde(default)]
    pub new_start_page_token: Option<String>,
}

/// The drive operations the connector needs.
#[async_trait]
pub trait DriveApi: Send + Sync {
    async fn about(&self) -> Result<DriveAbout>;

    /// The change cursor valid from "now"; fetched before a full listing.
    async fn start_page_token(&self) -> Result<String>;

    async fn list_files(&self, page_token: Option<&str>) -> Result<FileList>;

    async fn list_changes(&self, page_token: &str) -> Result<ChangeList>;

    /// Best-effort signed download URL for a file.
    async fn create_signed_url(&self, file_id: &str) -> Result<String>;
}

/// REST client for the drive API.
pub struct HttpDriveApi {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenManager>,
    limiter: Arc<dyn RateLimiter>,
    instance: String,
    principal: String,
}

impl HttpDriveApi {
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
            .map_err(|e| Error::transient(format!("drive request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(error_for_status(status, path));
        }
        resp.json()
            .await
            .map_err(|e| Error::serialization(format!("bad drive response for {path}: {e}")))
    }
}

#[async_trait]
impl DriveApi for HttpDriveApi {
    async fn about(&self) -> Result<DriveAbout> {
        self.get_json("/v3/about", &[("fields", "userId,email,displayName")])
            .await
    }

    async fn start_page_token(&self) -> Result<String> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct StartToken {
            start_page_token: String,
        }
        let token: StartToken = self.get_json("/v3/changes/startPageToken", &[]).await?;
        Ok(token.start_page_token)
    }

    async fn list_files(&self, page_token: Option<&str>) -> Result<FileList> {
        let mut query = vec![("pageSize", "1000")];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        self.get_json("/v3/files", &query).await
    }

    async fn list_changes(&self, page_token: &str) -> Result<ChangeList> {
        self.get_json(
            "/v3/changes",
            &[
                ("pageToken", page_token),
                ("pageSize", "1000"),
                ("includeRemoved", "true"),
            ],
        )
        .await
    }

    async fn create_signed_url(&self, file_id: &str) -> Result<String> {
        self.limiter.acquire().await;
        let token = self.tokens.get_token(&self.instance, &self.principal).await?;
        let url = format!(
            "{}/v3/files/{file_id}/signedUrl",
            self.base_url.trim_end_matches('/')
        );
        let resp = self
            .http
            .post(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::transient(format!("signed url request failed: {e}")))?;
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::serialization(format!("bad signed-url response: {e}")))?;

        // A conflict means the link already exists; the payload carries it.
        if status.is_success() || status.as_u16() == 409 {
            return body
                .get("signedUrl")
                .or_else(|| body.pointer("/error/existingUrl"))
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::blob(format!("no signed url in response for {file_id}")));
        }
        Err(error_for_status(status, "create signed url"))
    }
}
