use crate::models::IncomingImage;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

/// Client-local record of a surfaced image. Never synced back to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceivedImage {
    pub id: Uuid,
    /// URL the image can be fetched from
    pub uri: String,
    /// Local receipt time in epoch milliseconds
    pub timestamp: i64,
    /// Set once the image has been written to the gallery
    pub saved: bool,
}

/// Received images, newest first
#[derive(Debug, Default)]
pub struct Inbox {
    images: Vec<ReceivedImage>,
    last_key: Option<String>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a surfaced image.
    ///
    /// Returns `None` when `incoming` repeats the record that was surfaced last,
    /// which happens when the store redelivers a snapshot.
    pub fn record(&mut self, incoming: &IncomingImage) -> Option<&ReceivedImage> {
        if self.last_key.as_deref() == Some(incoming.key.as_str()) {
            return None;
        }
        self.last_key = Some(incoming.key.clone());

        self.images.insert(
            0,
            ReceivedImage {
                id: Uuid::new_v4(),
                uri: incoming.url.clone(),
                timestamp: Utc::now().timestamp_millis(),
                saved: false,
            },
        );

        self.images.first()
    }

    /// Flag an image as saved; returns false for an unknown id
    pub fn mark_saved(&mut self, id: Uuid) -> bool {
        match self.images.iter_mut().find(|image| image.id == id) {
            Some(image) => {
                image.saved = true;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: Uuid) -> Option<&ReceivedImage> {
        self.images.iter().find(|image| image.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReceivedImage> {
        self.images.iter()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}
