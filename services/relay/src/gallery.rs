//! Writing received images into a local gallery album.

use crate::config::GalleryConfig;
use crate::error::{RelayError, RelayResult};
use crate::inbox::ReceivedImage;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};
use url::Url;

/// Whether the user allowed writes to the gallery
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PermissionState {
    #[default]
    Undetermined,
    Granted,
    Denied,
}

/// Local photo gallery
pub struct Gallery {
    root: PathBuf,
    album: String,
    permission: PermissionState,
    http: reqwest::Client,
}

impl Gallery {
    pub fn new(config: &GalleryConfig) -> Self {
        Self {
            root: config.dir.clone(),
            album: config.album.clone(),
            permission: PermissionState::Undetermined,
            http: reqwest::Client::new(),
        }
    }

    /// Set the permission state obtained elsewhere
    pub fn with_permission(mut self, permission: PermissionState) -> Self {
        self.permission = permission;
        self
    }

    pub fn permission(&self) -> PermissionState {
        self.permission
    }

    /// Request write access: granted when the album directory can be created
    pub async fn request_permission(&mut self) -> PermissionState {
        self.permission = match tokio::fs::create_dir_all(self.album_dir()).await {
            Ok(()) => PermissionState::Granted,
            Err(e) => {
                warn!(dir = %self.album_dir().display(), error = %e, "Gallery not writable");
                PermissionState::Denied
            }
        };
        self.permission
    }

    pub fn album_dir(&self) -> PathBuf {
        self.root.join(&self.album)
    }

    /// Copy `image` into the album and return the written path.
    ///
    /// The caller flips `saved` (see `Inbox::mark_saved`) after this succeeds.
    #[instrument(skip(self, image), fields(id = %image.id))]
    pub async fn save(&self, image: &ReceivedImage) -> RelayResult<PathBuf> {
        if self.permission != PermissionState::Granted {
            return Err(RelayError::PermissionDenied(
                "You need to grant permission to save photos".to_string(),
            ));
        }

        let bytes = self.fetch(&image.uri).await?;

        let dir = self.album_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| RelayError::TransportFailure(format!("Cannot access device storage: {}", e)))?;

        let path = dir.join(format!(
            "{}_{}.jpg",
            Utc::now().timestamp_millis(),
            image.id.simple()
        ));
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| RelayError::TransportFailure(format!("Failed to save image: {}", e)))?;

        metrics::counter!("relay.images.saved").increment(1);
        info!(path = %path.display(), size_bytes = bytes.len(), "Image saved to gallery");

        Ok(path)
    }

    async fn fetch(&self, uri: &str) -> RelayResult<Vec<u8>> {
        if let Some(data) = uri.strip_prefix("data:") {
            return decode_data_uri(data);
        }

        match Url::parse(uri) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                let response = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| RelayError::TransportFailure(format!("Failed to download image: {}", e)))?;

                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| RelayError::TransportFailure(format!("Failed to download image: {}", e)))?;

                Ok(bytes.to_vec())
            }
            Ok(url) if url.scheme() == "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| RelayError::InvalidInput(format!("Unsupported file URI {}", uri)))?;
                read_local(&path).await
            }
            Ok(url) => Err(RelayError::InvalidInput(format!(
                "Unsupported image URI scheme {:?}",
                url.scheme()
            ))),
            Err(_) => read_local(Path::new(uri)).await,
        }
    }
}

async fn read_local(path: &Path) -> RelayResult<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| RelayError::TransportFailure(format!("Failed to read {}: {}", path.display(), e)))
}

/// Decode the part of a `data:` URI after the scheme
fn decode_data_uri(data: &str) -> RelayResult<Vec<u8>> {
    let (meta, payload) = data
        .split_once(',')
        .ok_or_else(|| RelayError::InvalidInput("Malformed data URI".to_string()))?;

    if !meta.ends_with(";base64") {
        return Err(RelayError::InvalidInput(
            "Only base64 data URIs are supported".to_string(),
        ));
    }

    STANDARD
        .decode(payload)
        .map_err(|e| RelayError::InvalidInput(format!("Invalid base64 image data: {}", e)))
}
