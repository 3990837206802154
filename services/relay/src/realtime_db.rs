//! Realtime database abstraction.
//!
//! The database stores image records under logical paths and pushes the full
//! contents of a watched path on every change. Delivery is at-least-once and
//! may be coalesced.

use crate::models::{ImageRecord, Snapshot};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tracing::debug;

/// Errors raised by a realtime database backend
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Invalid database path: {0}")]
    InvalidPath(String),

    #[error("Database request failed: {0}")]
    Request(String),

    #[error("Database returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Failed to decode database response: {0}")]
    Decode(String),

    #[error("Subscription closed by server: {0}")]
    Cancelled(String),

    #[error("Database configuration error: {0}")]
    Config(String),
}

/// Stream of full collection snapshots
pub type SnapshotStream = BoxStream<'static, Result<Snapshot, DatabaseError>>;

/// Live watch on a collection path.
///
/// Yields a snapshot for every change until dropped. Dropping the handle
/// releases the underlying watch.
pub struct Subscription {
    path: String,
    snapshots: SnapshotStream,
}

impl Subscription {
    pub fn new(path: impl Into<String>, snapshots: SnapshotStream) -> Self {
        Self {
            path: path.into(),
            snapshots,
        }
    }

    /// Watched path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Release the watch
    pub fn unsubscribe(self) {
        debug!(path = %self.path, "Releasing subscription");
    }
}

impl Stream for Subscription {
    type Item = Result<Snapshot, DatabaseError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.snapshots.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Hosted realtime database operations used by the relay
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RealtimeDatabase: Send + Sync {
    /// Append `record` as a new child of `path`; returns the store-assigned key
    async fn append(&self, path: &str, record: &ImageRecord) -> Result<String, DatabaseError>;

    /// Watch `path`, receiving its full contents on every change
    async fn subscribe(&self, path: &str) -> Result<Subscription, DatabaseError>;
}

/// Check a logical path and return its segments.
///
/// Segments must be non-empty and free of the characters hosted databases
/// reserve for keys (`.`, `#`, `$`, `[`, `]`).
pub fn path_segments(path: &str) -> Result<Vec<&str>, DatabaseError> {
    let trimmed = path.trim_matches('/');

    if trimmed.is_empty() {
        return Err(DatabaseError::InvalidPath("path is empty".to_string()));
    }

    let segments: Vec<&str> = trimmed.split('/').collect();

    for segment in &segments {
        if segment.is_empty() {
            return Err(DatabaseError::InvalidPath(format!(
                "empty segment in {:?}",
                path
            )));
        }
        if segment
            .chars()
            .any(|c| matches!(c, '.' | '#' | '$' | '[' | ']') || c.is_control())
        {
            return Err(DatabaseError::InvalidPath(format!(
                "reserved character in segment {:?}",
                segment
            )));
        }
    }

    Ok(segments)
}
