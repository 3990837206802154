use crate::identity::ReceiverIdentity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Sender name written when no sender is configured
pub const ANONYMOUS_SENDER: &str = "anonymous";

/// Metadata record pointing at an uploaded image.
///
/// Written once by the sender under `receivers/{receiverId}/images/{autoKey}`
/// and never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Dereferenceable URL of the uploaded image
    pub url: String,
    /// Sender wall-clock time in epoch milliseconds
    pub timestamp: i64,
    /// Sender label
    #[serde(default = "default_sender")]
    pub sender: String,
}

fn default_sender() -> String {
    ANONYMOUS_SENDER.to_string()
}

/// One child of a watched collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    /// Store-assigned child key
    pub key: String,
    pub record: ImageRecord,
}

/// Full contents of a watched collection at one point in time, ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: Vec<SnapshotEntry>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from keyed records
    pub fn from_records<I, K>(records: I) -> Self
    where
        I: IntoIterator<Item = (K, ImageRecord)>,
        K: Into<String>,
    {
        let map: BTreeMap<String, ImageRecord> = records
            .into_iter()
            .map(|(key, record)| (key.into(), record))
            .collect();

        Self {
            entries: map
                .into_iter()
                .map(|(key, record)| SnapshotEntry { key, record })
                .collect(),
        }
    }

    /// Interpret a JSON collection value as a snapshot.
    ///
    /// `null` and non-object values are an empty collection. Children that do
    /// not look like an `ImageRecord` are skipped.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let Some(children) = value.as_object() else {
            return Self::empty();
        };

        let records = children.iter().filter_map(|(key, child)| {
            match serde_json::from_value::<ImageRecord>(child.clone()) {
                Ok(record) => Some((key.clone(), record)),
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping malformed image record");
                    None
                }
            }
        });

        Self::from_records(records)
    }

    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Newest record surfaced by a receiver session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingImage {
    pub receiver_id: ReceiverIdentity,
    pub key: String,
    pub url: String,
    pub timestamp: i64,
    pub sender: String,
}

/// Logical database path of a receiver's image collection
pub fn receiver_images_path(receiver_id: &ReceiverIdentity) -> String {
    format!("receivers/{}/images", receiver_id)
}
