//! Content-addressed blob storage for user file payloads.
//!
//! Blobs are named by the SHA-256 of their content under
//! `{tenant_uid}/{folder}/`, so identical payloads dedupe and re-uploads
//! are no-ops. Payloads above 20 MiB are rejected.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use tracing::debug;

use anotherai::domain::File;
use anotherai::error::{Error, Result};

/// Upload size ceiling.
pub const MAX_FILE_SIZE_BYTES: usize = 20 * 1024 * 1024;

/// Capability of storing a file payload and returning its public url.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Store the file's data under `folder`, returning the blob url.
    async fn store_file(&self, tenant_uid: i64, file: &File, folder: &str) -> Result<String>;
}

fn decoded_payload(file: &File) -> Result<(Vec<u8>, String)> {
    let data = file
        .data
        .as_deref()
        .ok_or_else(|| Error::InvalidFile("file data is required for storage".into()))?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|_| Error::InvalidFile("file data is not valid base64".into()))?;
    if bytes.len() > MAX_FILE_SIZE_BYTES {
        return Err(Error::EntityTooLarge(format!(
            "file is {} bytes, the maximum is {MAX_FILE_SIZE_BYTES}",
            bytes.len()
        )));
    }
    let digest = hex::encode(Sha256::digest(&bytes));
    Ok((bytes, digest))
}

fn extension_for(content_type: Option<&str>) -> &'static str {
    match content_type {
        Some("image/png") => ".png",
        Some("image/jpeg") => ".jpg",
        Some("image/gif") => ".gif",
        Some("image/webp") => ".webp",
        Some("application/pdf") => ".pdf",
        Some("audio/mpeg") => ".mp3",
        Some("audio/wav") => ".wav",
        _ => "",
    }
}

fn blob_name(tenant_uid: i64, folder: &str, digest: &str, content_type: Option<&str>) -> String {
    format!(
        "{tenant_uid}/{folder}/{digest}{}",
        extension_for(content_type)
    )
}

/// S3-compatible implementation. The DSN names the endpoint and
/// credentials (`s3://key:secret@host:9000`); the bucket comes from
/// `FILE_STORAGE_CONTAINER_NAME`.
pub struct S3FileStorage {
    client: aws_sdk_s3::Client,
    bucket: String,
    public_base: String,
}

impl S3FileStorage {
    pub async fn from_dsn(dsn: &str, bucket: &str) -> Result<Self> {
        let parsed =
            url::Url::parse(dsn).map_err(|e| Error::fatal(format!("invalid FILE_STORAGE_DSN: {e}")))?;
        let endpoint = format!(
            "http{}://{}:{}",
            if parsed.scheme() == "s3s" { "s" } else { "" },
            parsed.host_str().unwrap_or("localhost"),
            parsed.port().unwrap_or(9000),
        );
        let credentials = aws_sdk_s3::config::Credentials::new(
            parsed.username().to_string(),
            parsed.password().unwrap_or_default().to_string(),
            None,
            None,
            "file-storage-dsn",
        );
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .credentials_provider(credentials)
            .load()
            .await;
        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .endpoint_url(&endpoint)
            .force_path_style(true)
            .build();
        Ok(S3FileStorage {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: bucket.to_string(),
            public_base: format!("{endpoint}/{bucket}"),
        })
    }
}

#[async_trait]
impl FileStorage for S3FileStorage {
    async fn store_file(&self, tenant_uid: i64, file: &File, folder: &str) -> Result<String> {
        let (bytes, digest) = decoded_payload(file)?;
        let key = blob_name(tenant_uid, folder, &digest, file.content_type.as_deref());
        let url = format!("{}/{key}", self.public_base);

        // Content addressing: an existing object is already the payload.
        let exists = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .is_ok();
        if exists {
            debug!(key, "blob already stored");
            return Ok(url);
        }

        let mut put = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(bytes.into());
        if let Some(content_type) = &file.content_type {
            put = put.content_type(content_type);
        }
        put.send()
            .await
            .map_err(|e| Error::internal(format!("failed to upload blob: {e}")))?;
        Ok(url)
    }
}

/// In-memory implementation for tests and storage-less local runs.
#[derive(Default)]
pub struct InMemoryFileStorage {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryFileStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FileStorage for InMemoryFileStorage {
    async fn store_file(&self, tenant_uid: i64, file: &File, folder: &str) -> Result<String> {
        let (bytes, digest) = decoded_payload(file)?;
        let key = blob_name(tenant_uid, folder, &digest, file.content_type.as_deref());
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.insert(key.clone(), bytes);
        }
        Ok(format!("memory://{key}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_file(payload: &[u8]) -> File {
        File {
            data: Some(base64::engine::general_purpose::STANDARD.encode(payload)),
            content_type: Some("image/png".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn identical_payloads_share_a_blob() {
        let storage = InMemoryFileStorage::new();
        let a = storage.store_file(1, &png_file(b"same"), "inputs/x").await.unwrap();
        let b = storage.store_file(1, &png_file(b"same"), "inputs/x").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(storage.len(), 1);

        let c = storage.store_file(1, &png_file(b"other"), "inputs/x").await.unwrap();
        assert_ne!(a, c);
        assert_eq!(storage.len(), 2);
    }

    #[tokio::test]
    async fn blob_names_are_tenant_prefixed() {
        let storage = InMemoryFileStorage::new();
        let url = storage.store_file(42, &png_file(b"x"), "inputs/abc").await.unwrap();
        assert!(url.starts_with("memory://42/inputs/abc/"));
        assert!(url.ends_with(".png"));
    }

    #[tokio::test]
    async fn oversized_payloads_are_rejected() {
        let storage = InMemoryFileStorage::new();
        let file = png_file(&vec![0u8; MAX_FILE_SIZE_BYTES + 1]);
        let err = storage.store_file(1, &file, "inputs/x").await.err().unwrap();
        assert!(matches!(err, Error::EntityTooLarge(_)));
    }

    #[tokio::test]
    async fn files_without_data_are_invalid() {
        let storage = InMemoryFileStorage::new();
        let err = storage
            .store_file(1, &File::default(), "inputs/x")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidFile(_)));
    }
}
