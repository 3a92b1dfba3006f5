//! Blob transformer: compressed, content-addressed record payloads.
//!
//! Records serialize to MessagePack, compress with zstd, and travel
//! base64-encoded through the placeholder → signed-URL upload protocol. The
//! `(virtualRecordId -> documentId)` mapping row makes the payload reachable
//! from any logical record sharing the same content fingerprint. Compression
//! failure falls back to an uncompressed JSON upload; the read path handles
//! both forms plus the signed-URL redirect.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::error::{Error, Result};
use crate::core::time::epoch_ms;
use crate::models::entities::Record;
use crate::storage::blob::{
    BlobStore, CustomField, DocumentMetadata, DownloadResponse,
};
use crate::storage::compression::{
    Compression, ZstdCompression, DEFAULT_MAX_DECOMPRESSED_SIZE,
};
use crate::storage::graph::{collections, GraphStore};

/// Compression level for record payloads.
pub const RECORD_COMPRESSION_LEVEL: i32 = 10;

/// The only compression metadata version written today.
pub const COMPRESSION_VERSION: &str = "v0";

/// Writes records to blob storage and reads them back by virtual record id.
pub struct BlobTransformer {
    blob: Arc<dyn BlobStore>,
    graph: Arc<dyn GraphStore>,
    compression: Arc<dyn Compression>,
    compression_level: i32,
}

impl BlobTransformer {
    #[must_use]
    pub fn new(blob: Arc<dyn BlobStore>, graph: Arc<dyn GraphStore>) -> Self {
        Self {
            blob,
            graph,
            compression: Arc::new(ZstdCompression::new(RECORD_COMPRESSION_LEVEL)),
            compression_level: RECORD_COMPRESSION_LEVEL,
        }
    }

    /// Swap the compression implementation (tests, alternative codecs).
    #[must_use]
    pub fn with_compression(mut self, compression: Arc<dyn Compression>, level: i32) -> Self {
        self.compression = compression;
        self.compression_level = level;
        self
    }

    /// Upload the record payload and upsert the virtual-record mapping.
    /// Returns the blob document id.
    pub async fn store_record(&self, record: &Record) -> Result<String> {
        let virtual_record_id = record
            .virtual_record_id
            .as_deref()
            .ok_or_else(|| Error::invalid_input("record has no virtual record id"))?;
        let record_value = serde_json::to_value(record)?;

        let (metadata, payload) = match self.compress(&record_value) {
            Ok((encoded, original_size)) => {
                let metadata = DocumentMetadata {
                    document_name: format!("record_{}", record.key),
                    document_path: format!("records/{virtual_record_id}"),
                    extension: "msgpack".to_string(),
                    custom_metadata: vec![
                        CustomField {
                            key: "compression".to_string(),
                            value: serde_json::json!({
                                "algorithm": self.compression.name(),
                                "level": self.compression_level,
                                "format": "msgpack",
                                "version": COMPRESSION_VERSION,
                                "originalSize": original_size,
                                "compressed": true,
                            }),
                        },
                        CustomField {
                            key: "virtualRecordId".to_string(),
                            value: Value::String(virtual_record_id.to_string()),
                        },
                    ],
                };
                let payload = serde_json::json!({
                    "isCompressed": true,
                    "record": encoded,
                });
                (metadata, payload)
            }
            Err(err) => {
                warn!(error = %err, "compression failed; uploading uncompressed");
                let metadata = DocumentMetadata {
                    document_name: format!("record_{}", record.key),
                    document_path: format!("records/{virtual_record_id}"),
                    extension: "json".to_string(),
                    custom_metadata: vec![CustomField {
                        key: "virtualRecordId".to_string(),
                        value: Value::String(virtual_record_id.to_string()),
                    }],
                };
                let payload = serde_json::json!({
                    "record": record_value,
                    "virtualRecordId": virtual_record_id,
                });
                (metadata, payload)
            }
        };

        let placeholder = self.blob.create_placeholder(metadata).await?;
        let signed_url = self
            .blob
            .direct_upload(&placeholder.id, virtual_record_id)
            .await?;
        self.blob.put(&signed_url, payload).await?;
        debug!(document_id = %placeholder.id, virtual_record_id, "uploaded record payload");

        self.store_mapping(virtual_record_id, &placeholder.id).await?;
        info!(document_id = %placeholder.id, virtual_record_id, "stored record in blob storage");
        Ok(placeholder.id)
    }

    /// Resolve a virtual record id to its blob document id through the
    /// mapping collection.
    pub async fn document_id_for(&self, virtual_record_id: &str) -> Result<Option<String>> {
        let tx = self.graph.begin().await?;
        let mapping = tx
            .get_node(collections::VIRTUAL_RECORD_MAPPINGS, virtual_record_id)
            .await?;
        tx.abort().await?;
        Ok(mapping
            .and_then(|m| m.get("documentId").and_then(Value::as_str).map(str::to_string)))
    }

    /// Fetch and decode the record payload for a virtual record id.
    pub async fn fetch_record(&self, virtual_record_id: &str) -> Result<Value> {
        let document_id = self
            .document_id_for(virtual_record_id)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("no mapping for virtual record {virtual_record_id}"))
            })?;

        let mut response = self.blob.download(&document_id).await?;
        if let DownloadResponse::Redirect { signed_url } = response {
            debug!(document_id, "following signed-url redirect");
            response = self.blob.fetch_signed_url(&signed_url).await?;
        }

        match response {
            DownloadResponse::Inline {
                is_compressed: true,
                record,
            } => self.decode_compressed(&record),
            DownloadResponse::Inline {
                is_compressed: false,
                record,
            } => Ok(record),
            DownloadResponse::Redirect { .. } => Err(Error::blob(format!(
                "signed url for document {document_id} redirected again"
            ))),
        }
    }

    fn compress(&self, record_value: &Value) -> Result<(String, usize)> {
        let packed = rmp_serde::to_vec_named(record_value)
            .map_err(|e| Error::serialization(format!("msgpack encoding failed: {e}")))?;
        let original_size = packed.len();
        let compressed = self.compression.compress(&packed)?;
        debug!(
            original_size,
            compressed_size = compressed.len(),
            "compressed record payload"
        );
        Ok((BASE64.encode(compressed), original_size))
    }

    fn decode_compressed(&self, record: &Value) -> Result<Value> {
        let encoded = record
            .as_str()
            .ok_or_else(|| Error::blob("compressed payload is not a base64 string"))?;
        let compressed = BASE64
            .decode(encoded)
            .map_err(|e| Error::serialization(format!("base64 decode failed: {e}")))?;
        let packed = self
            .compression
            .decompress_with_limit(&compressed, DEFAULT_MAX_DECOMPRESSED_SIZE)?;
        rmp_serde::from_slice(&packed)
            .map_err(|e| Error::serialization(format!("msgpack decoding failed: {e}")))
    }

    async fn store_mapping(&self, virtual_record_id: &str, document_id: &str) -> Result<()> {
        let mut tx = self.graph.begin().await?;
        let mapping = serde_json::json!({
            "_key": virtual_record_id,
            "documentId": document_id,
            "updatedAt": epoch_ms(),
        });
        let result = tx
            .batch_upsert_nodes(vec![mapping], collections::VIRTUAL_RECORD_MAPPINGS)
            .await;
        match result {
            Ok(()) => tx.commit().await,
            Err(err) => {
                tx.abort().await?;
                Err(err)
            }
        }
    }
}
