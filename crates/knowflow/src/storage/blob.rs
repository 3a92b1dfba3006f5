//! Blob store client contract and HTTP implementation.
//!
//! Uploads follow the placeholder-then-PUT protocol: create a placeholder
//! document carrying metadata, request a signed URL for it, PUT the payload.
//! Downloads return either the payload inline or a `signedUrl` redirect that
//! must be re-fetched.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::error::{error_for_status, Error, Result};

/// Free-form metadata field on a placeholder document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomField {
    pub key: String,
    pub value: Value,
}

/// Metadata sent when creating a placeholder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub document_name: String,
    pub document_path: String,
    pub extension: String,
    #[serde(default)]
    pub custom_metadata: Vec<CustomField>,
}

/// Response to placeholder creation.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaceholderDocument {
    #[serde(rename = "_id")]
    pub id: String,
}

/// Result of a download call.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DownloadResponse {
    /// The store redirected us to a signed URL.
    #[serde(rename_all = "camelCase")]
    Redirect { signed_url: String },
    /// Payload returned inline.
    #[serde(rename_all = "camelCase")]
    Inline {
        #[serde(default)]
        is_compressed: bool,
        record: Value,
    },
}

/// The blob store operations the core depends on.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn create_placeholder(&self, metadata: DocumentMetadata) -> Result<PlaceholderDocument>;

    /// Request a signed upload URL for an existing placeholder.
    async fn direct_upload(&self, document_id: &str, virtual_record_id: &str) -> Result<String>;

    /// PUT the payload body to a signed URL.
    async fn put(&self, signed_url: &str, body: Value) -> Result<()>;

    async fn download(&self, document_id: &str) -> Result<DownloadResponse>;

    /// Follow a `signedUrl` redirect returned by [`BlobStore::download`].
    async fn fetch_signed_url(&self, signed_url: &str) -> Result<DownloadResponse>;
}

/// HTTP client against the document-storage service.
pub struct HttpBlobStore {
    http: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpBlobStore {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            bearer_token: None,
        }
    }

    /// Attach a service token sent as `Authorization: Bearer ...`.
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn create_placeholder(&self, metadata: DocumentMetadata) -> Result<PlaceholderDocument> {
        let url = self.url("/api/v1/document/placeholder");
        let resp = self
            .request(reqwest::Method::POST, &url)
            .json(&metadata)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(error_for_status(status, "create placeholder"));
        }
        let document: PlaceholderDocument = resp
            .json()
            .await
            .map_err(|e| Error::blob(format!("bad placeholder response: {e}")))?;
        debug!(document_id = %document.id, "created placeholder");
        Ok(document)
    }

    async fn direct_upload(&self, document_id: &str, virtual_record_id: &str) -> Result<String> {
        let url = self.url(&format!("/api/v1/document/{document_id}/directUpload"));
        let resp = self
            .request(reqwest::Method::POST, &url)
            .json(&serde_json::json!({"virtualRecordId": virtual_record_id}))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(error_for_status(status, "direct upload"));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| Error::blob(format!("bad direct-upload response: {e}")))?;
        body.get("signedUrl")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::blob(format!("no signed URL for document {document_id}")))
    }

    async fn put(&self, signed_url: &str, body: Value) -> Result<()> {
        let resp = self
            .request(reqwest::Method::PUT, signed_url)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(error_for_status(status, "signed upload"));
        }
        Ok(())
    }

    async fn download(&self, document_id: &str) -> Result<DownloadResponse> {
        let url = self.url(&format!("/api/v1/document/{document_id}/download"));
        let resp = self.request(reqwest::Method::GET, &url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(error_for_status(status, "download"));
        }
        resp.json()
            .await
            .map_err(|e| Error::blob(format!("bad download response: {e}")))
    }

    async fn fetch_signed_url(&self, signed_url: &str) -> Result<DownloadResponse> {
        let resp = self.http.get(signed_url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(error_for_status(status, "signed download"));
        }
        resp.json()
            .await
            .map_err(|e| Error::blob(format!("bad signed-download response: {e}")))
    }
}
