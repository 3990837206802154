//! Selection and wiring of the object store and realtime database pair.

use crate::config::Config;
use crate::error::{RelayError, RelayResult};
use crate::firebase_db::FirebaseDatabase;
use crate::memory_db::MemoryDatabase;
use crate::models::ANONYMOUS_SENDER;
use crate::object_store::{LocalObjectStore, ObjectStore};
use crate::realtime_db::RealtimeDatabase;
use crate::s3_uploader::S3Uploader;
use crate::subscription::{ReceiverEvent, ReceiverSession};
use crate::transport::TransportClient;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Which storage and database pair the relay talks to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// S3-compatible object storage plus a Firebase Realtime Database
    #[default]
    Hosted,
    /// Local directory plus an in-process database; sender and receiver must
    /// share the process
    Offline,
}

/// A connected backend pair, shared by senders and receiver sessions
#[derive(Clone)]
pub struct Transport {
    object_store: Arc<dyn ObjectStore>,
    database: Arc<dyn RealtimeDatabase>,
    sender: String,
    image_extension: String,
}

impl Transport {
    /// Build the backend pair named by `config.transport.backend`
    pub async fn from_config(config: &Config) -> RelayResult<Self> {
        let transport = match config.transport.backend {
            Backend::Hosted => {
                let storage = config.storage.as_ref().ok_or_else(|| {
                    RelayError::Config("[storage] section is required for the hosted backend".to_string())
                })?;
                let database = config.database.as_ref().ok_or_else(|| {
                    RelayError::Config("[database] section is required for the hosted backend".to_string())
                })?;

                let object_store = S3Uploader::new(storage)
                    .await
                    .map_err(|e| RelayError::Config(e.to_string()))?;
                let database =
                    FirebaseDatabase::new(database).map_err(|e| RelayError::Config(e.to_string()))?;

                Self::new(Arc::new(object_store), Arc::new(database))
            }
            Backend::Offline => Self::offline(config.offline.shared_dir.clone()),
        };

        info!(backend = ?config.transport.backend, "Transport ready");

        Ok(transport
            .with_sender(config.transport.sender.clone())
            .with_image_extension(config.transport.image_extension.clone()))
    }

    pub fn new(object_store: Arc<dyn ObjectStore>, database: Arc<dyn RealtimeDatabase>) -> Self {
        Self {
            object_store,
            database,
            sender: ANONYMOUS_SENDER.to_string(),
            image_extension: "jpg".to_string(),
        }
    }

    /// Offline pair writing images under `shared_dir`
    pub fn offline(shared_dir: impl Into<PathBuf>) -> Self {
        Self::new(
            Arc::new(LocalObjectStore::new(shared_dir)),
            Arc::new(MemoryDatabase::new()),
        )
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub fn with_image_extension(mut self, extension: impl Into<String>) -> Self {
        self.image_extension = extension.into();
        self
    }

    /// Sender-side client
    pub fn client(&self) -> TransportClient {
        TransportClient::new(self.object_store.clone(), self.database.clone())
            .with_sender(self.sender.clone())
            .with_image_extension(self.image_extension.clone())
    }

    /// Idle receiver session and the channel its events arrive on
    pub fn session(&self) -> (ReceiverSession, mpsc::UnboundedReceiver<ReceiverEvent>) {
        ReceiverSession::new(self.database.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(toml: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[tokio::test]
    async fn test_hosted_requires_storage_section() {
        let result = Transport::from_config(&config("")).await;
        assert!(matches!(result, Err(RelayError::Config(_))));
    }

    #[tokio::test]
    async fn test_hosted_requires_database_section() {
        let result = Transport::from_config(&config(
            r#"
            [storage]
            bucket = "photos"
            "#,
        ))
        .await;

        match result {
            Err(RelayError::Config(message)) => assert!(message.contains("[database]")),
            _ => panic!("Expected a configuration error"),
        }
    }

    #[tokio::test]
    async fn test_offline_pair_connects_client_and_session() {
        let dir = tempfile::tempdir().unwrap();
        let toml = format!(
            r#"
            [transport]
            backend = "offline"
            sender = "porch-camera"

            [offline]
            shared_dir = "{}"
            "#,
            dir.path().display()
        );
        let transport = Transport::from_config(&config(&toml)).await.unwrap();

        let (mut session, mut images) = transport.session();
        let receiver = crate::identity::ReceiverIdentity::parse("ab12cd34").unwrap();
        session.start_listening(&receiver).await.unwrap();

        let sent = transport
            .client()
            .send_at(vec![1, 2, 3], "ab12cd34", 1000)
            .await
            .unwrap();
        assert_eq!(sent.record.sender, "porch-camera");

        let event = tokio::time::timeout(std::time::Duration::from_secs(1), images.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            ReceiverEvent::Image(incoming) => assert_eq!(incoming.url, sent.record.url),
            other => panic!("Expected an image, got {:?}", other),
        }

        session.stop_listening().await;
    }
}
