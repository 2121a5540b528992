//! Decoding, naming and storing uploaded files

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use rand::RngCore;
use std::sync::Arc;
use uuid::Uuid;

use super::validation::{validate_file, FileRejection};
use crate::models::FilePayload;
use crate::storage::{ObjectStore, StorageError, StoredObject};

/// Replaces anything outside `[A-Za-z0-9.-]` with `_`
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `{category}/{owner}/{millis}-{random}-{name}`
pub fn build_storage_key(
    category: &str,
    owner: Uuid,
    timestamp_millis: i64,
    random_suffix: &str,
    file_name: &str,
) -> String {
    format!(
        "{}/{}/{}-{}-{}",
        category,
        owner,
        timestamp_millis,
        random_suffix,
        sanitize_file_name(file_name)
    )
}

/// Strips an optional `data:<type>;base64,` prefix and decodes
pub fn decode_payload(file_data: &str) -> Result<Vec<u8>, FileRejection> {
    let encoded = match file_data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => file_data,
    };
    STANDARD
        .decode(encoded.trim())
        .map_err(|_| FileRejection::InvalidEncoding)
}

/// Checked and decoded upload, ready to store
#[derive(Debug)]
pub struct PreparedFile {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub content_type: String,
}

#[derive(Clone)]
pub struct UploadPipeline {
    store: Arc<dyn ObjectStore>,
}

impl UploadPipeline {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Decodes and validates without touching storage. Empty files are refused
    /// here rather than by the content checks.
    pub fn prepare(
        &self,
        payload: &FilePayload,
        allowed: &[&str],
        max_mb: u64,
    ) -> Result<PreparedFile, FileRejection> {
        let bytes = decode_payload(&payload.file_data)?;
        if bytes.is_empty() {
            return Err(FileRejection::Empty);
        }
        validate_file(&payload.content_type, bytes.len() as u64, allowed, max_mb)?;
        Ok(PreparedFile {
            bytes,
            file_name: payload.file_name.clone(),
            content_type: payload.content_type.clone(),
        })
    }

    pub async fn upload(
        &self,
        category: &str,
        owner: Uuid,
        file: PreparedFile,
    ) -> Result<StoredObject, StorageError> {
        let mut suffix = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut suffix);
        let key = build_storage_key(
            category,
            owner,
            Utc::now().timestamp_millis(),
            &hex::encode(suffix),
            &file.file_name,
        );
        let stored = self.store.put(&key, file.bytes, &file.content_type).await?;
        tracing::info!(key = %stored.key, category, "File stored");
        Ok(stored)
    }

    /// Best-effort removal of an object whose database row was never written
    pub async fn discard(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            tracing::warn!(key, error = %e, "Failed to remove orphaned upload");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("my passport (1).pdf"), "my_passport__1_.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_file_name("comprovante-ç.png"), "comprovante-_.png");
    }

    #[test]
    fn test_storage_key_layout() {
        let owner = Uuid::nil();
        let key = build_storage_key("customer-documents", owner, 1700000000000, "abcd", "a b.pdf");
        assert_eq!(
            key,
            "customer-documents/00000000-0000-0000-0000-000000000000/1700000000000-abcd-a_b.pdf"
        );
    }

    #[test]
    fn test_decode_accepts_data_urls() {
        assert_eq!(decode_payload("aGk=").unwrap(), b"hi");
        assert_eq!(decode_payload("data:application/pdf;base64,aGk=").unwrap(), b"hi");
        assert_eq!(decode_payload("not base64!"), Err(FileRejection::InvalidEncoding));
    }

    #[test]
    fn test_prepare_refuses_empty_files() {
        let pipeline = UploadPipeline::new(Arc::new(crate::storage::MemoryObjectStore::new()));
        let payload = FilePayload {
            file_data: "data:application/pdf;base64,".to_string(),
            file_name: "empty.pdf".to_string(),
            content_type: "application/pdf".to_string(),
        };
        assert_eq!(
            pipeline
                .prepare(&payload, &crate::documents::DOCUMENT_TYPES, 10)
                .unwrap_err(),
            FileRejection::Empty
        );
    }
}
