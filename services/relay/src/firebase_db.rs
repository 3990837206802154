//! Hosted realtime database over the Firebase Realtime Database REST API.
//!
//! Appends are `POST {url}/{path}.json`; the server answers `{"name": key}`.
//! Subscriptions are a streaming `GET` with `Accept: text/event-stream`. The
//! server sends `put` and `patch` events relative to the watched path, and this
//! client keeps its own copy of the collection so every change can be surfaced
//! as a full snapshot.

use crate::config::DatabaseConfig;
use crate::event_stream::{EventStreamParser, ServerEvent};
use crate::models::{ImageRecord, Snapshot};
use crate::realtime_db::{
    path_segments, DatabaseError, RealtimeDatabase, SnapshotStream, Subscription,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Firebase Realtime Database client
pub struct FirebaseDatabase {
    client: Client,
    base_url: Url,
    auth_token: Option<String>,
    request_timeout: std::time::Duration,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct EventPayload {
    path: String,
    data: Value,
}

impl FirebaseDatabase {
    /// Create a new database client
    pub fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let mut base = config.url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }

        let base_url = Url::parse(&base)
            .map_err(|e| DatabaseError::Config(format!("invalid database url {:?}: {}", base, e)))?;

        // No client-wide timeout: it would also cut off streaming subscriptions
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| DatabaseError::Config(e.to_string()))?;

        info!(url = %base_url, "Realtime database client initialized");

        Ok(Self {
            client,
            base_url,
            auth_token: config.auth_token.clone(),
            request_timeout: config.request_timeout(),
        })
    }

    /// REST endpoint for a logical path
    fn endpoint(&self, path: &str) -> Result<Url, DatabaseError> {
        let segments = path_segments(path)?;
        let mut url = self
            .base_url
            .join(&format!("{}.json", segments.join("/")))
            .map_err(|e| DatabaseError::InvalidPath(e.to_string()))?;

        if let Some(ref token) = self.auth_token {
            url.query_pairs_mut().append_pair("auth", token);
        }

        Ok(url)
    }
}

async fn check_status(response: Response) -> Result<Response, DatabaseError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(String::from))
        .unwrap_or(body);

    Err(DatabaseError::Status {
        status: status.as_u16(),
        message: if message.is_empty() {
            status.to_string()
        } else {
            message
        },
    })
}

#[async_trait]
impl RealtimeDatabase for FirebaseDatabase {
    #[instrument(skip(self, record), fields(timestamp = record.timestamp))]
    async fn append(&self, path: &str, record: &ImageRecord) -> Result<String, DatabaseError> {
        let url = self.endpoint(path)?;

        let response = self
            .client
            .post(url)
            .timeout(self.request_timeout)
            .json(record)
            .send()
            .await
            .map_err(|e| DatabaseError::Request(e.to_string()))?;

        let pushed: PushResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| DatabaseError::Decode(e.to_string()))?;

        debug!(key = %pushed.name, "Record appended");

        Ok(pushed.name)
    }

    #[instrument(skip(self))]
    async fn subscribe(&self, path: &str) -> Result<Subscription, DatabaseError> {
        let url = self.endpoint(path)?;

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| DatabaseError::Request(e.to_string()))?;

        let response = check_status(response).await?;

        info!(path = %path, "Streaming subscription opened");

        let snapshots = snapshot_stream(response.bytes_stream().boxed());

        Ok(Subscription::new(path, snapshots))
    }
}

/// Turn an event-stream response body into collection snapshots.
///
/// Ends after a body error or a `cancel`/`auth_revoked` event, each of which
/// is yielded as one `Err` first.
fn snapshot_stream(body: BoxStream<'static, reqwest::Result<Bytes>>) -> SnapshotStream {
    let state = StreamState {
        body,
        parser: EventStreamParser::new(),
        tree: CollectionTree::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    for event in state.parser.feed(&chunk) {
                        if let Some(item) = state.handle(event) {
                            state.pending.push_back(item);
                        }
                        if state.finished {
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state
                        .pending
                        .push_back(Err(DatabaseError::Request(e.to_string())));
                }
                None => state.finished = true,
            }
        }
    })
    .boxed()
}

struct StreamState {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    parser: EventStreamParser,
    tree: CollectionTree,
    pending: VecDeque<Result<Snapshot, DatabaseError>>,
    finished: bool,
}

impl StreamState {
    /// Apply one server event; returns what the subscription should yield
    fn handle(&mut self, event: ServerEvent) -> Option<Result<Snapshot, DatabaseError>> {
        match event.event.as_str() {
            "put" | "patch" => {
                let payload: EventPayload = match serde_json::from_str(&event.data) {
                    Ok(payload) => payload,
                    Err(e) => return Some(Err(DatabaseError::Decode(e.to_string()))),
                };

                if event.event == "put" {
                    self.tree.put(&payload.path, payload.data);
                } else {
                    self.tree.patch(&payload.path, payload.data);
                }

                Some(Ok(self.tree.snapshot()))
            }
            "keep-alive" => None,
            "cancel" => {
                self.finished = true;
                Some(Err(DatabaseError::Cancelled(event.data)))
            }
            "auth_revoked" => {
                self.finished = true;
                Some(Err(DatabaseError::Cancelled("auth revoked".to_string())))
            }
            other => {
                warn!(event = %other, "Ignoring unknown stream event");
                None
            }
        }
    }
}

/// Local copy of a watched collection, updated from `put`/`patch` events
#[derive(Debug, Default)]
pub struct CollectionTree {
    root: Value,
}

impl CollectionTree {
    /// Replace the value at `path` (relative to the watched location)
    pub fn put(&mut self, path: &str, data: Value) {
        set_at(&mut self.root, &relative_segments(path), data);
    }

    /// Merge the children of `data` into the value at `path`
    pub fn patch(&mut self, path: &str, data: Value) {
        let base = relative_segments(path);

        match data {
            Value::Object(children) => {
                for (child_path, value) in children {
                    let mut segments = base.clone();
                    segments.extend(relative_segments(&child_path));
                    set_at(&mut self.root, &segments, value);
                }
            }
            other => set_at(&mut self.root, &base, other),
        }
    }

    pub fn value(&self) -> &Value {
        &self.root
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::from_json(&self.root)
    }
}

fn relative_segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Write `data` at `segments` below `node`; `null` deletes and prunes empty parents
fn set_at(node: &mut Value, segments: &[String], data: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = data;
        return;
    };

    if !node.is_object() {
        if data.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }

    let Value::Object(map) = node else {
        return;
    };

    let prune = {
        let child = map.entry(head.clone()).or_insert(Value::Null);
        set_at(child, rest, data);
        match child {
            Value::Null => true,
            Value::Object(m) => m.is_empty(),
            _ => false,
        }
    };

    if prune {
        map.remove(head);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(url: &str, token: Option<&str>) -> DatabaseConfig {
        DatabaseConfig {
            url: url.to_string(),
            auth_token: token.map(String::from),
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }

    #[test]
    fn test_endpoint_with_auth() {
        let db = FirebaseDatabase::new(&config(
            "https://demo-default-rtdb.firebaseio.com",
            Some("tok"),
        ))
        .unwrap();

        let url = db.endpoint("receivers/ab12cd34/images").unwrap();
        assert_eq!(
            url.as_str(),
            "https://demo-default-rtdb.firebaseio.com/receivers/ab12cd34/images.json?auth=tok"
        );
    }

    #[test]
    fn test_endpoint_rejects_bad_path() {
        let db = FirebaseDatabase::new(&config("https://demo.firebaseio.com/", None)).unwrap();
        assert!(db.endpoint("receivers/../images").is_err());
    }

    #[test]
    fn test_invalid_url_is_config_error() {
        assert!(matches!(
            FirebaseDatabase::new(&config("not a url", None)),
            Err(DatabaseError::Config(_))
        ));
    }

    #[test]
    fn test_tree_initial_put_and_child_put() {
        let mut tree = CollectionTree::default();
        tree.put("/", Value::Null);
        assert!(tree.snapshot().is_empty());

        tree.put("/", json!({"-a": {"url": "u1", "timestamp": 5, "sender": "anonymous"}}));
        tree.put("/-b", json!({"url": "u2", "timestamp": 20, "sender": "anonymous"}));

        let snapshot = tree.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.entries()[1].record.url, "u2");
    }

    #[test]
    fn test_tree_delete_prunes_parents() {
        let mut tree = CollectionTree::default();
        tree.put("/-a", json!({"url": "u1", "timestamp": 5}));
        tree.put("/-a", Value::Null);

        assert_eq!(tree.value(), &json!({}));
        assert!(tree.snapshot().is_empty());
    }

    #[test]
    fn test_tree_patch_merges_children() {
        let mut tree = CollectionTree::default();
        tree.put("/", json!({"-a": {"url": "u1", "timestamp": 5}}));
        tree.patch(
            "/",
            json!({
                "-b": {"url": "u2", "timestamp": 6},
                "-a/url": "u1-moved"
            }),
        );

        assert_eq!(tree.value()["-a"]["url"], "u1-moved");
        assert_eq!(tree.value()["-a"]["timestamp"], 5);
        assert_eq!(tree.snapshot().len(), 2);
    }

    fn state() -> StreamState {
        StreamState {
            body: stream::empty().boxed(),
            parser: EventStreamParser::new(),
            tree: CollectionTree::default(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    #[test]
    fn test_stream_state_events() {
        let mut state = state();

        let put = ServerEvent {
            event: "put".to_string(),
            data: r#"{"path":"/","data":{"-a":{"url":"u1","timestamp":1000,"sender":"anonymous"}}}"#
                .to_string(),
        };
        let snapshot = state.handle(put).unwrap().unwrap();
        assert_eq!(snapshot.entries()[0].record.timestamp, 1000);

        let keep_alive = ServerEvent {
            event: "keep-alive".to_string(),
            data: "null".to_string(),
        };
        assert!(state.handle(keep_alive).is_none());

        let cancel = ServerEvent {
            event: "cancel".to_string(),
            data: "Permission denied".to_string(),
        };
        assert!(matches!(
            state.handle(cancel),
            Some(Err(DatabaseError::Cancelled(_)))
        ));
        assert!(state.finished);
    }

    #[test]
    fn test_stream_state_malformed_payload() {
        let mut state = state();
        let event = ServerEvent {
            event: "put".to_string(),
            data: "not json".to_string(),
        };
        assert!(matches!(
            state.handle(event),
            Some(Err(DatabaseError::Decode(_)))
        ));
    }

    fn chunks(parts: &[&'static str]) -> BoxStream<'static, reqwest::Result<Bytes>> {
        stream::iter(
            parts
                .iter()
                .copied()
                .map(|part| Ok(Bytes::from_static(part.as_bytes())))
                .collect::<Vec<_>>(),
        )
        .boxed()
    }

    #[tokio::test]
    async fn test_snapshot_stream_events_in_one_chunk() {
        let body = chunks(&[concat!(
            "event: put\n",
            "data: {\"path\":\"/\",\"data\":{\"-a\":{\"url\":\"u1\",\"timestamp\":5}}}\n",
            "\n",
            "event: keep-alive\n",
            "data: null\n",
            "\n",
            "event: put\n",
            "data: {\"path\":\"/-b\",\"data\":{\"url\":\"u2\",\"timestamp\":20}}\n",
            "\n",
        )]);

        let snapshots: Vec<_> = snapshot_stream(body).collect().await;

        assert_eq!(snapshots.len(), 2);
        let first = snapshots[0].as_ref().unwrap();
        let second = snapshots[1].as_ref().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 2);
        assert_eq!(second.entries()[1].record.url, "u2");
    }

    #[tokio::test]
    async fn test_snapshot_stream_event_split_across_chunks() {
        let body = chunks(&[
            "event: put\ndata: {\"path\":\"/\",\"da",
            "ta\":{\"-a\":{\"url\":\"u1\",\"timestamp\":1000}}}\r\n",
            "\r\n",
        ]);

        let mut snapshots = snapshot_stream(body);

        let snapshot = snapshots.next().await.unwrap().unwrap();
        assert_eq!(snapshot.entries()[0].record.timestamp, 1000);
        assert!(snapshots.next().await.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_stream_stops_at_cancel() {
        let body = chunks(&[
            concat!(
                "event: put\n",
                "data: {\"path\":\"/\",\"data\":{\"-a\":{\"url\":\"u1\",\"timestamp\":5}}}\n",
                "\n",
                "event: cancel\n",
                "data: Permission denied\n",
                "\n",
                "event: put\n",
                "data: {\"path\":\"/-b\",\"data\":{\"url\":\"u2\",\"timestamp\":6}}\n",
                "\n",
            ),
            "event: put\ndata: {\"path\":\"/-c\",\"data\":{\"url\":\"u3\",\"timestamp\":7}}\n\n",
        ]);

        let mut snapshots = snapshot_stream(body);

        assert!(matches!(snapshots.next().await, Some(Ok(_))));
        match snapshots.next().await {
            Some(Err(DatabaseError::Cancelled(message))) => {
                assert_eq!(message, "Permission denied")
            }
            other => panic!("Expected a cancellation, got {:?}", other),
        }
        assert!(snapshots.next().await.is_none());
    }
}
