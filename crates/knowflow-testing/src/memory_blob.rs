//! In-memory blob store speaking the placeholder/signed-URL protocol.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use knowflow::storage::blob::{
    BlobStore, DocumentMetadata, DownloadResponse, PlaceholderDocument,
};
use knowflow::{Error, Result};
use parking_lot::Mutex;
use serde_json::Value;

#[derive(Default)]
struct BlobState {
    next_id: u64,
    metadata: HashMap<String, DocumentMetadata>,
    payloads: HashMap<String, Value>,
}

/// Stores payloads in a map; signed URLs are `memory://` tokens carrying the
/// document id.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    state: Arc<Mutex<BlobState>>,
    /// When set, `download` answers with a signed-URL redirect so callers
    /// exercise the two-step read path.
    redirect_downloads: bool,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_redirect_downloads(mut self) -> Self {
        self.redirect_downloads = true;
        self
    }

    fn document_id_from_url(url: &str) -> Result<String> {
        url.rsplit('/')
            .next()
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::blob(format!("malformed memory signed url: {url}")))
    }

    /// Metadata recorded for a document.
    #[must_use]
    pub fn metadata(&self, document_id: &str) -> Option<DocumentMetadata> {
        self.state.lock().metadata.get(document_id).cloned()
    }

    /// Raw payload PUT for a document.
    #[must_use]
    pub fn payload(&self, document_id: &str) -> Option<Value> {
        self.state.lock().payloads.get(document_id).cloned()
    }

    /// Number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().metadata.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn inline(&self, document_id: &str) -> Result<DownloadResponse> {
        let state = self.state.lock();
        let payload = state
            .payloads
            .get(document_id)
            .ok_or_else(|| Error::not_found(format!("no payload for document {document_id}")))?;
        serde_json::from_value(payload.clone())
            .map_err(|e| Error::blob(format!("stored payload is not a download response: {e}")))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn create_placeholder(&self, metadata: DocumentMetadata) -> Result<PlaceholderDocument> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = format!("doc-{}", state.next_id);
        state.metadata.insert(id.clone(), metadata);
        Ok(PlaceholderDocument { id })
    }

    async fn direct_upload(&self, document_id: &str, _virtual_record_id: &str) -> Result<String> {
        let state = self.state.lock();
        if !state.metadata.contains_key(document_id) {
            return Err(Error::not_found(format!(
                "no placeholder for document {document_id}"
            )));
        }
        Ok(format!("memory://upload/{document_id}"))
    }

    async fn put(&self, signed_url: &str, body: Value) -> Result<()> {
        let document_id = Self::document_id_from_url(signed_url)?;
        let mut state = self.state.lock();
        if !state.metadata.contains_key(&document_id) {
            return Err(Error::not_found(format!(
                "signed url names unknown document {document_id}"
            )));
        }
        state.payloads.insert(document_id, body);
        Ok(())
    }

    async fn download(&self, document_id: &str) -> Result<DownloadResponse> {
        if self.redirect_downloads {
            let state = self.state.lock();
            if !state.payloads.contains_key(document_id) {
                return Err(Error::not_found(format!(
                    "no payload for document {document_id}"
                )));
            }
            return Ok(DownloadResponse::Redirect {
                signed_url: format!("memory://download/{document_id}"),
            });
        }
        self.inline(document_id)
    }

    async fn fetch_signed_url(&self, signed_url: &str) -> Result<DownloadResponse> {
        let document_id = Self::document_id_from_url(signed_url)?;
        self.inline(&document_id)
    }
}
