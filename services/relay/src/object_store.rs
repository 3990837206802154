//! Object storage abstraction and the local-directory backend.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, instrument};
use url::Url;

/// Errors raised by an object storage backend
#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Failed to resolve object URL: {0}")]
    Url(String),

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Object storage operations used by the relay
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key` and return a URL the receiver can dereference
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ObjectStoreError>;
}

/// Sanitize a key component to prevent path traversal
pub fn sanitize_path_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// Get content type for an image extension
pub fn get_content_type(extension: &str) -> &'static str {
    match extension.to_lowercase().as_str() {
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

/// Object store writing into a local directory.
///
/// Stands in for hosted storage in the offline backend: the returned URL is a
/// `file://` URL of the written copy.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        let mut path = self.root.clone();

        for component in key.split('/') {
            if component.is_empty() || component == "." || component == ".." {
                return Err(ObjectStoreError::InvalidKey(key.to_string()));
            }
            path.push(component);
        }

        Ok(path)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    #[instrument(skip(self, bytes), fields(size_bytes = bytes.len()))]
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ObjectStoreError> {
        let path = self.object_path(key)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;

        let absolute = tokio::fs::canonicalize(&path).await?;
        let url = Url::from_file_path(&absolute)
            .map_err(|_| ObjectStoreError::Url(absolute.display().to_string()))?;

        debug!(content_type = %content_type, "Object written");
        info!(key = %key, url = %url, "Image copied to shared directory");

        Ok(url.to_string())
    }
}
