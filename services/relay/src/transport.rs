//! Sender side: upload an image and append its record for a receiver.

use crate::error::{RelayError, RelayResult};
use crate::identity::ReceiverIdentity;
use crate::models::{receiver_images_path, ImageRecord, ANONYMOUS_SENDER};
use crate::object_store::{get_content_type, sanitize_path_component, ObjectStore};
use crate::realtime_db::RealtimeDatabase;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use url::Url;
use uuid::Uuid;

/// Outcome of a successful send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentImage {
    pub receiver_id: ReceiverIdentity,
    /// Object storage key of the upload
    pub object_key: String,
    /// Store-assigned key of the metadata record
    pub record_key: String,
    pub record: ImageRecord,
}

/// Uploads images and writes their metadata records.
///
/// Sends are never retried. If the upload succeeds but the metadata write
/// fails, the uploaded object stays behind unreferenced.
pub struct TransportClient {
    object_store: Arc<dyn ObjectStore>,
    database: Arc<dyn RealtimeDatabase>,
    sender: String,
    image_extension: String,
}

impl TransportClient {
    pub fn new(object_store: Arc<dyn ObjectStore>, database: Arc<dyn RealtimeDatabase>) -> Self {
        Self {
            object_store,
            database,
            sender: ANONYMOUS_SENDER.to_string(),
            image_extension: "jpg".to_string(),
        }
    }

    /// Set the sender label written into records
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    /// Set the extension of uploaded object keys
    pub fn with_image_extension(mut self, extension: impl Into<String>) -> Self {
        self.image_extension = extension.into();
        self
    }

    /// Send image bytes to `receiver_id`, stamped with the current time
    pub async fn send(&self, image: Vec<u8>, receiver_id: &str) -> RelayResult<SentImage> {
        self.send_at(image, receiver_id, Utc::now().timestamp_millis())
            .await
    }

    /// Read an image from a local path or `file://` URI and send it
    pub async fn send_file(&self, source: &str, receiver_id: &str) -> RelayResult<SentImage> {
        // Validate before touching the filesystem
        ReceiverIdentity::parse(receiver_id)?;

        let image = read_image_source(source).await?;
        self.send(image, receiver_id).await
    }

    /// Send image bytes to `receiver_id` with an explicit record timestamp
    #[instrument(skip(self, image), fields(size_bytes = image.len()))]
    pub async fn send_at(
        &self,
        image: Vec<u8>,
        receiver_id: &str,
        timestamp: i64,
    ) -> RelayResult<SentImage> {
        let receiver_id = ReceiverIdentity::parse(receiver_id)?;

        if image.is_empty() {
            return Err(RelayError::InputMissing(
                "No image captured".to_string(),
            ));
        }

        let result = self.upload_and_record(image, &receiver_id, timestamp).await;

        match &result {
            Ok(sent) => {
                metrics::counter!("relay.images.sent").increment(1);
                info!(
                    receiver_id = %receiver_id,
                    object_key = %sent.object_key,
                    record_key = %sent.record_key,
                    "Image sent"
                );
            }
            Err(e) => {
                metrics::counter!("relay.images.send_failed", "reason" => e.code()).increment(1);
                error!(receiver_id = %receiver_id, error = %e, "Error sending image");
            }
        }

        result
    }

    async fn upload_and_record(
        &self,
        image: Vec<u8>,
        receiver_id: &ReceiverIdentity,
        timestamp: i64,
    ) -> RelayResult<SentImage> {
        let object_key = object_key(receiver_id, timestamp, Uuid::new_v4(), &self.image_extension);
        let content_type = get_content_type(&self.image_extension);
        let size_bytes = image.len();

        let started = Instant::now();
        let url = self
            .object_store
            .upload(&object_key, image, content_type)
            .await
            .map_err(|e| RelayError::TransportFailure(e.to_string()))?;
        metrics::histogram!("relay.upload.duration_seconds").record(started.elapsed().as_secs_f64());

        debug!(object_key = %object_key, size_bytes, "Upload finished");

        let record = ImageRecord {
            url,
            timestamp,
            sender: self.sender.clone(),
        };

        let record_key = self
            .database
            .append(&receiver_images_path(receiver_id), &record)
            .await
            .map_err(|e| {
                warn!(
                    object_key = %object_key,
                    "Metadata write failed; uploaded object is left unreferenced"
                );
                RelayError::TransportFailure(e.to_string())
            })?;

        Ok(SentImage {
            receiver_id: receiver_id.clone(),
            object_key,
            record_key,
            record,
        })
    }
}

/// Object key for an upload.
///
/// Format: `{receiverId}/{timestamp}_{uniqueId}.{extension}`; the unique id
/// keeps sends within the same millisecond apart.
pub fn object_key(
    receiver_id: &ReceiverIdentity,
    timestamp: i64,
    unique_id: Uuid,
    extension: &str,
) -> String {
    format!(
        "{receiver}/{timestamp}_{unique}.{extension}",
        receiver = sanitize_path_component(receiver_id.as_str()),
        timestamp = timestamp,
        unique = unique_id.simple(),
        extension = sanitize_path_component(&extension.to_lowercase()),
    )
}

/// Load image bytes from a local path or `file://` URI
pub async fn read_image_source(source: &str) -> RelayResult<Vec<u8>> {
    let source = source.trim();

    if source.is_empty() {
        return Err(RelayError::InputMissing("No image selected".to_string()));
    }

    let path = match Url::parse(source) {
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .map_err(|_| RelayError::InvalidInput(format!("Unsupported file URI {}", source)))?,
        _ => PathBuf::from(source),
    };

    tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            RelayError::InputMissing(format!("Image not found: {}", path.display()))
        }
        _ => RelayError::TransportFailure(format!(
            "Failed to read image {}: {}",
            path.display(),
            e
        )),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::{MockObjectStore, ObjectStoreError};
    use crate::realtime_db::{DatabaseError, MockRealtimeDatabase};

    fn client(store: MockObjectStore, db: MockRealtimeDatabase) -> TransportClient {
        TransportClient::new(Arc::new(store), Arc::new(db))
    }

    #[test]
    fn test_object_key_format() {
        let id = ReceiverIdentity::parse("ab12cd34").unwrap();
        let unique = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();

        assert_eq!(
            object_key(&id, 1000, unique, "JPG"),
            "ab12cd34/1000_550e8400e29b41d4a716446655440000.jpg"
        );
    }

    #[tokio::test]
    async fn test_send_uploads_then_appends() {
        let mut store = MockObjectStore::new();
        store
            .expect_upload()
            .withf(|key, bytes, content_type| {
                key.starts_with("ab12cd34/1000_")
                    && key.ends_with(".jpg")
                    && bytes == &vec![0xFF, 0xD8]
                    && content_type == "image/jpeg"
            })
            .times(1)
            .returning(|_, _, _| Ok("https://cdn.example/ab12cd34/1000.jpg".to_string()));

        let mut db = MockRealtimeDatabase::new();
        db.expect_append()
            .withf(|path, record| {
                path == "receivers/ab12cd34/images"
                    && record.url == "https://cdn.example/ab12cd34/1000.jpg"
                    && record.timestamp == 1000
                    && record.sender == "anonymous"
            })
            .times(1)
            .returning(|_, _| Ok("-Nkey".to_string()));

        let sent = client(store, db)
            .send_at(vec![0xFF, 0xD8], "ab12cd34", 1000)
            .await
            .unwrap();

        assert_eq!(sent.record_key, "-Nkey");
        assert_eq!(sent.record.timestamp, 1000);
    }

    #[tokio::test]
    async fn test_custom_sender_label() {
        let mut store = MockObjectStore::new();
        store
            .expect_upload()
            .returning(|_, _, _| Ok("u".to_string()));

        let mut db = MockRealtimeDatabase::new();
        db.expect_append()
            .withf(|_, record| record.sender == "kitchen-tablet")
            .returning(|_, _| Ok("k".to_string()));

        let sent = client(store, db)
            .with_sender("kitchen-tablet")
            .send(vec![1], "ab12cd34")
            .await
            .unwrap();
        assert_eq!(sent.record.sender, "kitchen-tablet");
    }

    #[tokio::test]
    async fn test_empty_receiver_id_makes_no_calls() {
        let mut store = MockObjectStore::new();
        store.expect_upload().never();
        let mut db = MockRealtimeDatabase::new();
        db.expect_append().never();

        let result = client(store, db).send(vec![1, 2, 3], "  ").await;
        assert!(matches!(result, Err(RelayError::InputMissing(_))));
    }

    #[tokio::test]
    async fn test_empty_image_is_input_missing() {
        let mut store = MockObjectStore::new();
        store.expect_upload().never();
        let db = MockRealtimeDatabase::new();

        let result = client(store, db).send(vec![], "ab12cd34").await;
        assert!(matches!(result, Err(RelayError::InputMissing(_))));
    }

    #[tokio::test]
    async fn test_upload_failure_skips_metadata_write() {
        let mut store = MockObjectStore::new();
        store
            .expect_upload()
            .returning(|_, _, _| Err(ObjectStoreError::Upload("connection reset".to_string())));
        let mut db = MockRealtimeDatabase::new();
        db.expect_append().never();

        let err = client(store, db)
            .send(vec![1], "ab12cd34")
            .await
            .unwrap_err();

        match err {
            RelayError::TransportFailure(message) => {
                assert!(message.contains("connection reset"));
            }
            other => panic!("Expected TransportFailure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_metadata_failure_leaves_upload_in_place() {
        let mut store = MockObjectStore::new();
        store
            .expect_upload()
            .times(1)
            .returning(|_, _, _| Ok("https://cdn.example/orphan.jpg".to_string()));
        let mut db = MockRealtimeDatabase::new();
        db.expect_append().times(1).returning(|_, _| {
            Err(DatabaseError::Status {
                status: 401,
                message: "Permission denied".to_string(),
            })
        });

        let err = client(store, db)
            .send(vec![1], "ab12cd34")
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::TransportFailure(_)));
        assert!(!err.to_string().is_empty());
    }

    #[tokio::test]
    async fn test_send_file_reads_file_uri() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        std::fs::write(&path, [7u8, 8, 9]).unwrap();
        let uri = Url::from_file_path(&path).unwrap().to_string();

        let mut store = MockObjectStore::new();
        store
            .expect_upload()
            .withf(|_, bytes, _| bytes == &vec![7u8, 8, 9])
            .returning(|_, _, _| Ok("u".to_string()));
        let mut db = MockRealtimeDatabase::new();
        db.expect_append().returning(|_, _| Ok("k".to_string()));

        assert!(client(store, db).send_file(&uri, "ab12cd34").await.is_ok());
    }

    #[tokio::test]
    async fn test_send_file_missing_file() {
        let mut store = MockObjectStore::new();
        store.expect_upload().never();
        let db = MockRealtimeDatabase::new();

        let result = client(store, db)
            .send_file("/definitely/not/here.jpg", "ab12cd34")
            .await;
        assert!(matches!(result, Err(RelayError::InputMissing(_))));
    }
}
