//! Persistence wrapper, change-log entries and operation outcomes

use std::fmt;
use std::ops::AddAssign;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::RecordError;
use crate::{RecordCategory, Timestamp};

/// Compute the payload fingerprint used for diff suppression.
///
/// The fingerprint is the SHA-256 of the compact JSON rendering. Object keys
/// render in sorted order, so two structurally equal payloads always share a
/// fingerprint.
pub fn fingerprint(payload: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// A record as held by the durable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    /// Assigned by the store, bumped on every effective write.
    pub revision: u64,
    /// Source that last wrote the record.
    pub source_name: String,
    pub payload: Value,
    pub fingerprint: String,
    pub updated_at: Timestamp,
}

impl StoredRecord {
    /// Whether `payload` is structurally equal to the stored payload.
    pub fn same_payload(&self, payload: &Value) -> bool {
        self.fingerprint == fingerprint(payload)
    }
}

/// Kind of mutation recorded in the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// First write of an id (or first write after a delete).
    Created,
    Updated,
    Deleted,
}

impl ChangeKind {
    pub fn is_upsert(&self) -> bool {
        !matches!(self, ChangeKind::Deleted)
    }
}

/// One change-log entry.
///
/// Entries carry no payload; consumers re-read the current record so that
/// re-delivery is harmless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// Strictly increasing, gapless per collection, starting at 1.
    pub seq: u64,
    pub id: String,
    pub kind: ChangeKind,
    /// Revision written (or removed, for deletes).
    pub revision: u64,
    pub recorded_at: Timestamp,
}

/// Position in a collection's change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeCursor {
    /// Replay the whole retained log.
    Beginning,
    /// Only changes appended after the moment the cursor is resolved.
    Now,
    /// Changes with a sequence number greater than the given one.
    After(u64),
}

impl ChangeCursor {
    /// Resolve to a concrete sequence number given the current log head.
    pub fn resolve(&self, head: u64) -> u64 {
        match self {
            ChangeCursor::Beginning => 0,
            ChangeCursor::Now => head,
            ChangeCursor::After(seq) => *seq,
        }
    }
}

impl Default for ChangeCursor {
    fn default() -> Self {
        ChangeCursor::Beginning
    }
}

impl fmt::Display for ChangeCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeCursor::Beginning => f.write_str("0"),
            ChangeCursor::Now => f.write_str("now"),
            ChangeCursor::After(seq) => write!(f, "{}", seq),
        }
    }
}

impl FromStr for ChangeCursor {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "now" => Ok(ChangeCursor::Now),
            "" | "0" => Ok(ChangeCursor::Beginning),
            other => other
                .parse::<u64>()
                .map(ChangeCursor::After)
                .map_err(|e| RecordError::InvalidField {
                    field: "cursor".to_string(),
                    reason: e.to_string(),
                }),
        }
    }
}

/// A slice of the change log returned by `changes_since`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChangeBatch {
    pub entries: Vec<ChangeEntry>,
    /// Sequence number to resume from; equals the last entry's `seq` when
    /// entries were returned, otherwise the resolved starting point.
    pub last_seq: u64,
}

impl ChangeBatch {
    pub fn next_cursor(&self) -> ChangeCursor {
        ChangeCursor::After(self.last_seq)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of a single upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Written {
        revision: u64,
        seq: u64,
        kind: ChangeKind,
    },
    /// Payload equal to the stored one; nothing written, nothing logged.
    Unchanged { revision: u64 },
    /// The stored revision moved underneath the caller.
    Conflict {
        expected: Option<u64>,
        actual: Option<u64>,
    },
}

impl UpsertOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, UpsertOutcome::Written { .. })
    }
}

/// Result of a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted { seq: u64, revision: u64 },
    NotFound,
}

/// Aggregate result of a bulk upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkReport {
    pub written: u64,
    pub unchanged: u64,
    pub failed: u64,
}

impl BulkReport {
    pub fn total(&self) -> u64 {
        self.written + self.unchanged + self.failed
    }

    pub fn record(&mut self, outcome: &UpsertOutcome) {
        match outcome {
            UpsertOutcome::Written { .. } => self.written += 1,
            UpsertOutcome::Unchanged { .. } => self.unchanged += 1,
            UpsertOutcome::Conflict { .. } => self.failed += 1,
        }
    }
}

impl AddAssign for BulkReport {
    fn add_assign(&mut self, rhs: Self) {
        self.written += rhs.written;
        self.unchanged += rhs.unchanged;
        self.failed += rhs.failed;
    }
}

/// Result of a single-record existence check against a remote source.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(Value),
    NotFound,
    /// The source does not expose this record family at all.
    CapabilityAbsent,
}

impl Lookup {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

/// Event emitted for every durable mutation, for an external pub/sub bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub category: RecordCategory,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// Current payload; absent for deletions.
    pub payload: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"id":"x","idShort":"y"}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"idShort":"y","id":"x"}"#).unwrap();
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_ne!(fingerprint(&a), fingerprint(&json!({"id": "x"})));
    }

    #[test]
    fn test_cursor_parse() {
        assert_eq!("now".parse::<ChangeCursor>().unwrap(), ChangeCursor::Now);
        assert_eq!("0".parse::<ChangeCursor>().unwrap(), ChangeCursor::Beginning);
        assert_eq!("42".parse::<ChangeCursor>().unwrap(), ChangeCursor::After(42));
        assert!("later".parse::<ChangeCursor>().is_err());
    }

    #[test]
    fn test_cursor_resolve() {
        assert_eq!(ChangeCursor::Beginning.resolve(10), 0);
        assert_eq!(ChangeCursor::Now.resolve(10), 10);
        assert_eq!(ChangeCursor::After(3).resolve(10), 3);
    }

    #[test]
    fn test_bulk_report_accumulates() {
        let mut report = BulkReport::default();
        report.record(&UpsertOutcome::Written {
            revision: 1,
            seq: 1,
            kind: ChangeKind::Created,
        });
        report.record(&UpsertOutcome::Unchanged { revision: 1 });
        report.record(&UpsertOutcome::Conflict {
            expected: Some(1),
            actual: Some(2),
        });
        let mut total = BulkReport::default();
        total += report;
        total += report;
        assert_eq!(total.written, 2);
        assert_eq!(total.unchanged, 2);
        assert_eq!(total.failed, 2);
        assert_eq!(total.total(), 6);
    }

    #[test]
    fn test_notification_serializes_type_field() {
        let note = ChangeNotification {
            category: RecordCategory::Shell,
            id: "urn:a".to_string(),
            kind: ChangeKind::Deleted,
            payload: None,
        };
        let value = serde_json::to_value(&note).unwrap();
        assert_eq!(value["type"], "deleted");
        assert_eq!(value["category"], "shell");
    }

    proptest! {
        #[test]
        fn prop_cursor_display_roundtrip(seq in 1u64..u64::MAX) {
            let cursor = ChangeCursor::After(seq);
            prop_assert_eq!(cursor.to_string().parse::<ChangeCursor>().unwrap(), cursor);
        }
    }
}
