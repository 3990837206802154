//! In-process realtime database used by the offline backend and tests.

use crate::models::{ImageRecord, Snapshot};
use crate::realtime_db::{path_segments, DatabaseError, RealtimeDatabase, Subscription};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, instrument};

/// Alphabet of store-assigned keys, in ASCII order so keys sort by time
const PUSH_CHARS: &[u8] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

const PUSH_TIME_CHARS: usize = 8;
const PUSH_RANDOM_CHARS: usize = 12;

/// Generates 20-character child keys that sort in append order.
///
/// The first 8 characters encode the millisecond timestamp. The remaining 12
/// are random, and are incremented instead of re-rolled when two keys are
/// generated within the same millisecond.
#[derive(Debug, Default)]
pub struct PushKeyGenerator {
    last_millis: i64,
    last_random: [u8; PUSH_RANDOM_CHARS],
}

impl PushKeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_key(&mut self, now_millis: i64) -> String {
        if now_millis == self.last_millis {
            for slot in self.last_random.iter_mut().rev() {
                if *slot == 63 {
                    *slot = 0;
                } else {
                    *slot += 1;
                    break;
                }
            }
        } else {
            let mut rng = rand::thread_rng();
            for slot in self.last_random.iter_mut() {
                *slot = rng.gen_range(0..64);
            }
            self.last_millis = now_millis;
        }

        let mut time_chars = [0u8; PUSH_TIME_CHARS];
        let mut remaining = now_millis.max(0) as u64;
        for slot in time_chars.iter_mut().rev() {
            *slot = PUSH_CHARS[(remaining % 64) as usize];
            remaining /= 64;
        }

        time_chars
            .iter()
            .copied()
            .chain(self.last_random.iter().map(|i| PUSH_CHARS[*i as usize]))
            .map(char::from)
            .collect()
    }
}

struct Collection {
    records: BTreeMap<String, ImageRecord>,
    watchers: watch::Sender<Snapshot>,
}

impl Collection {
    fn new() -> Self {
        let (watchers, _) = watch::channel(Snapshot::empty());
        Self {
            records: BTreeMap::new(),
            watchers,
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot::from_records(
            self.records
                .iter()
                .map(|(key, record)| (key.clone(), record.clone())),
        )
    }
}

#[derive(Default)]
struct State {
    collections: HashMap<String, Collection>,
    keys: PushKeyGenerator,
}

/// Realtime database held entirely in process memory.
///
/// Subscribers receive the current contents immediately and then every later
/// change. Rapid changes may be coalesced into one snapshot.
#[derive(Default)]
pub struct MemoryDatabase {
    state: Mutex<State>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current contents of `path`
    pub fn snapshot(&self, path: &str) -> Snapshot {
        let key = normalize(path);
        self.lock()
            .collections
            .get(&key)
            .map(Collection::snapshot)
            .unwrap_or_default()
    }

    /// Number of live subscriptions on `path`
    pub fn subscriber_count(&self, path: &str) -> usize {
        let key = normalize(path);
        self.lock()
            .collections
            .get(&key)
            .map(|c| c.watchers.receiver_count())
            .unwrap_or(0)
    }
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

#[async_trait]
impl RealtimeDatabase for MemoryDatabase {
    #[instrument(skip(self, record), fields(timestamp = record.timestamp))]
    async fn append(&self, path: &str, record: &ImageRecord) -> Result<String, DatabaseError> {
        path_segments(path)?;

        let mut state = self.lock();
        let key = state.keys.next_key(Utc::now().timestamp_millis());

        let collection = state
            .collections
            .entry(normalize(path))
            .or_insert_with(Collection::new);
        collection.records.insert(key.clone(), record.clone());
        collection.watchers.send_replace(collection.snapshot());

        debug!(key = %key, "Record appended");

        Ok(key)
    }

    #[instrument(skip(self))]
    async fn subscribe(&self, path: &str) -> Result<Subscription, DatabaseError> {
        path_segments(path)?;

        let receiver = {
            let mut state = self.lock();
            state
                .collections
                .entry(normalize(path))
                .or_insert_with(Collection::new)
                .watchers
                .subscribe()
        };

        let snapshots = WatchStream::new(receiver).map(Ok).boxed();

        Ok(Subscription::new(path, snapshots))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(url: &str, timestamp: i64) -> ImageRecord {
        ImageRecord {
            url: url.to_string(),
            timestamp,
            sender: "anonymous".to_string(),
        }
    }

    #[test]
    fn test_push_keys_sort_in_append_order() {
        let mut keys = PushKeyGenerator::new();

        let a = keys.next_key(1_000);
        let b = keys.next_key(1_000);
        let c = keys.next_key(1_001);
        let d = keys.next_key(90_000_000);

        assert_eq!(a.len(), 20);
        assert!(a < b);
        assert!(b < c);
        assert!(c < d);
    }

    #[tokio::test]
    async fn test_subscribe_receives_current_then_changes() {
        let db = MemoryDatabase::new();
        let path = "receivers/ab12cd34/images";

        db.append(path, &record("first", 1)).await.unwrap();

        let mut subscription = db.subscribe(path).await.unwrap();
        let initial = subscription.next().await.unwrap().unwrap();
        assert_eq!(initial.len(), 1);

        db.append(path, &record("second", 2)).await.unwrap();
        let updated = subscription.next().await.unwrap().unwrap();
        assert_eq!(updated.len(), 2);
    }

    #[tokio::test]
    async fn test_subscribe_to_empty_path_yields_empty_snapshot() {
        let db = MemoryDatabase::new();
        let mut subscription = db.subscribe("receivers/nobody/images").await.unwrap();

        assert!(subscription.next().await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dropping_subscription_releases_watch() {
        let db = MemoryDatabase::new();
        let path = "receivers/ab12cd34/images";

        let subscription = db.subscribe(path).await.unwrap();
        assert_eq!(db.subscriber_count(path), 1);

        subscription.unsubscribe();
        assert_eq!(db.subscriber_count(path), 0);
    }

    #[tokio::test]
    async fn test_rejects_invalid_path() {
        let db = MemoryDatabase::new();
        let result = db.append("receivers/a.b/images", &record("x", 1)).await;
        assert!(matches!(result, Err(DatabaseError::InvalidPath(_))));
    }
}
