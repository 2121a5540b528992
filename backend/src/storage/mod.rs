//! Object storage for uploaded files

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::Config;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object storage is not configured")]
    NotConfigured,

    #[error("Storage request failed: {0}")]
    Transient(String),

    #[error("Storage rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Unexpected storage response: {0}")]
    Decode(String),
}

impl StorageError {
    fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }
}

/// Where an object ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

fn request_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(200))
        .with_max_delay(Duration::from_secs(2))
        .with_max_times(3)
        .with_jitter()
}

fn classify(err: reqwest::Error) -> StorageError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        StorageError::Transient(err.to_string())
    } else {
        StorageError::Decode(err.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(StorageError::Transient(format!("{}: {}", status, message)))
    } else {
        Err(StorageError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

/// Storage proxy reached over HTTP with a bearer key
pub struct HttpObjectStore {
    client: Client,
    base_url: Option<String>,
    api_key: Option<String>,
}

impl HttpObjectStore {
    pub fn new(base_url: Option<String>, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            api_key,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.storage_api_url.clone(), config.storage_api_key.clone())
    }

    fn endpoint(&self) -> Result<(&str, &str), StorageError> {
        match (&self.base_url, &self.api_key) {
            (Some(url), Some(key)) => Ok((url, key)),
            _ => Err(StorageError::NotConfigured),
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, StorageError> {
        let (base, api_key) = self.endpoint()?;
        let url = format!("{}/v1/storage/upload", base);

        #[derive(Deserialize)]
        struct UploadResponse {
            url: String,
        }

        let upload = || async {
            let response = self
                .client
                .post(&url)
                .query(&[("path", key)])
                .bearer_auth(api_key)
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(bytes.clone())
                .send()
                .await
                .map_err(classify)?;
            let response = check_status(response).await?;
            response
                .json::<UploadResponse>()
                .await
                .map_err(|e| StorageError::Decode(e.to_string()))
        };

        let body = upload
            .retry(request_backoff())
            .when(StorageError::is_transient)
            .notify(|err, delay| {
                tracing::warn!(error = %err, retry_in_ms = %delay.as_millis(), "Storage upload failed, retrying");
            })
            .await?;

        Ok(StoredObject {
            key: key.to_string(),
            url: body.url,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let (base, api_key) = self.endpoint()?;
        let url = format!("{}/v1/storage/delete", base);

        (|| async {
            let response = self
                .client
                .delete(&url)
                .query(&[("path", key)])
                .bearer_auth(api_key)
                .send()
                .await
                .map_err(classify)?;
            check_status(response).await.map(|_| ())
        })
        .retry(request_backoff())
        .when(StorageError::is_transient)
        .await
    }
}

/// Keeps objects in memory. Used by tests and when running without a
/// storage proxy.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, (Vec<u8>, String)>>,
    fail_puts: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `put` fail with a transient error
    pub fn fail_uploads(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, StorageError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Transient("simulated outage".to_string()));
        }
        self.objects
            .write()
            .await
            .insert(key.to_string(), (bytes, content_type.to_string()));
        Ok(StoredObject {
            key: key.to_string(),
            url: format!("memory://{}", key),
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.objects.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_http_store_refuses() {
        let store = HttpObjectStore::new(None, Some("key".to_string()));
        let err = store.put("a/b.pdf", vec![1], "application/pdf").await.unwrap_err();
        assert!(matches!(err, StorageError::NotConfigured));
    }

    #[tokio::test]
    async fn test_memory_store_put_and_delete() {
        let store = MemoryObjectStore::new();
        let stored = store.put("docs/a.pdf", vec![1, 2], "application/pdf").await.unwrap();
        assert_eq!(stored.url, "memory://docs/a.pdf");
        assert!(store.contains("docs/a.pdf").await);

        store.delete("docs/a.pdf").await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_memory_store_failure_injection() {
        let store = MemoryObjectStore::new();
        store.fail_uploads(true);
        assert!(store.put("k", vec![], "image/png").await.is_err());
        assert!(store.is_empty().await);
    }

    #[test]
    fn test_stored_object_serializes_for_responses() {
        let stored = StoredObject {
            key: "cotista/1/a.pdf".to_string(),
            url: "memory://cotista/1/a.pdf".to_string(),
        };
        let value = serde_json::to_value(&stored).unwrap();
        assert_eq!(value["key"], "cotista/1/a.pdf");
        assert_eq!(value["url"], "memory://cotista/1/a.pdf");
    }
}
