//! Selection of the record to surface from a collection snapshot.

use crate::models::{Snapshot, SnapshotEntry};
use std::cmp::Ordering;

/// Decision on what a snapshot should surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionDecision<'a> {
    /// Surface this entry as the most recent image
    Surface(&'a SnapshotEntry),
    /// Nothing to surface
    Skip { reason: &'static str },
}

/// Decide what `snapshot` surfaces
pub fn decide(snapshot: &Snapshot) -> SelectionDecision<'_> {
    match select_most_recent(snapshot) {
        Some(entry) => SelectionDecision::Surface(entry),
        None => SelectionDecision::Skip {
            reason: "Empty snapshot",
        },
    }
}

/// Pick the entry with the greatest `timestamp`.
///
/// Equal timestamps are broken by the greatest child key. Store-assigned keys
/// sort in append order, so the later append wins. Ordering is only as good as
/// the senders' clocks.
pub fn select_most_recent(snapshot: &Snapshot) -> Option<&SnapshotEntry> {
    snapshot.entries().iter().max_by(|a, b| compare_recency(a, b))
}

fn compare_recency(a: &SnapshotEntry, b: &SnapshotEntry) -> Ordering {
    a.record
        .timestamp
        .cmp(&b.record.timestamp)
        .then_with(|| a.key.cmp(&b.key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ImageRecord;

    fn record(url: &str, timestamp: i64) -> ImageRecord {
        ImageRecord {
            url: url.to_string(),
            timestamp,
            sender: "anonymous".to_string(),
        }
    }

    #[test]
    fn test_selects_max_timestamp() {
        let snapshot = Snapshot::from_records([
            ("-k1", record("five", 5)),
            ("-k2", record("twenty", 20)),
            ("-k3", record("three", 3)),
        ]);

        let entry = select_most_recent(&snapshot).unwrap();
        assert_eq!(entry.record.timestamp, 20);
        assert_eq!(entry.record.url, "twenty");
    }

    #[test]
    fn test_empty_snapshot_selects_nothing() {
        let snapshot = Snapshot::empty();
        assert!(select_most_recent(&snapshot).is_none());
        assert!(matches!(decide(&snapshot), SelectionDecision::Skip { .. }));
    }

    #[test]
    fn test_tie_break_is_greatest_key() {
        let snapshot = Snapshot::from_records([
            ("-NaaaB", record("later", 100)),
            ("-NaaaA", record("earlier", 100)),
        ]);

        assert_eq!(select_most_recent(&snapshot).unwrap().key, "-NaaaB");
    }
}
