//! In-memory store for testing and ephemeral deployments.
//!
//! Uses tokio::sync::RwLock for safe async access. Semantics match the LMDB
//! backend, including revision continuity across deletes and change-log
//! pruning.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{watch, RwLock};
use twinmesh_core::{
    fingerprint, ChangeBatch, ChangeCursor, ChangeEntry, ChangeKind, DeleteOutcome,
    RecordCategory, StoreError, StoredRecord, UpsertOutcome,
};

use crate::config::DEFAULT_BULK_CAP;
use crate::store::{DurableStore, StoreRef, Stores};

#[derive(Debug, Default)]
struct Collection {
    records: BTreeMap<String, StoredRecord>,
    /// Last revision ever assigned per id, kept after deletes.
    revisions: HashMap<String, u64>,
    by_source: BTreeSet<(String, String)>,
    log: BTreeMap<u64, ChangeEntry>,
    last_seq: u64,
    /// Highest sequence number removed by pruning.
    pruned_through: u64,
}

impl Collection {
    fn append(&mut self, id: &str, kind: ChangeKind, revision: u64) -> u64 {
        self.last_seq += 1;
        let seq = self.last_seq;
        self.log.insert(
            seq,
            ChangeEntry {
                seq,
                id: id.to_string(),
                kind,
                revision,
                recorded_at: Utc::now(),
            },
        );
        seq
    }
}

/// In-memory [`DurableStore`].
#[derive(Debug)]
pub struct InMemoryStore {
    category: RecordCategory,
    collection: RwLock<Collection>,
    head: watch::Sender<u64>,
    available: AtomicBool,
    bulk_cap: usize,
}

impl InMemoryStore {
    pub fn new(category: RecordCategory) -> Self {
        Self {
            category,
            collection: RwLock::new(Collection::default()),
            head: watch::Sender::new(0),
            available: AtomicBool::new(true),
            bulk_cap: DEFAULT_BULK_CAP,
        }
    }

    pub fn with_bulk_cap(mut self, bulk_cap: usize) -> Self {
        self.bulk_cap = bulk_cap.max(1);
        self
    }

    /// Simulate loss of the backing store: every operation fails with
    /// `StoreError::Unavailable` until re-enabled.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable {
                collection: self.category.collection_name().to_string(),
                reason: "store marked unavailable".to_string(),
            })
        }
    }

    fn conflict(&self, id: &str, expected: Option<u64>, actual: Option<u64>) -> StoreError {
        StoreError::Conflict {
            collection: self.category.collection_name().to_string(),
            id: id.to_string(),
            expected,
            actual,
        }
    }
}

#[async_trait]
impl DurableStore for InMemoryStore {
    fn category(&self) -> RecordCategory {
        self.category
    }

    async fn get(&self, id: &str) -> Result<Option<StoredRecord>, StoreError> {
        self.check_available()?;
        let collection = self.collection.read().await;
        Ok(collection.records.get(id).cloned())
    }

    async fn put(
        &self,
        id: &str,
        payload: &Value,
        source_name: &str,
        expected_revision: Option<u64>,
    ) -> Result<UpsertOutcome, StoreError> {
        self.check_available()?;
        let mut collection = self.collection.write().await;

        let actual = collection.records.get(id).map(|record| record.revision);
        if actual != expected_revision {
            return Ok(UpsertOutcome::Conflict {
                expected: expected_revision,
                actual,
            });
        }

        let previous = collection.records.get(id).map(|r| r.source_name.clone());
        let revision = collection.revisions.get(id).copied().unwrap_or(0) + 1;
        let kind = if actual.is_some() {
            ChangeKind::Updated
        } else {
            ChangeKind::Created
        };

        if let Some(previous) = previous {
            collection.by_source.remove(&(previous, id.to_string()));
        }
        collection
            .by_source
            .insert((source_name.to_string(), id.to_string()));
        collection.revisions.insert(id.to_string(), revision);
        collection.records.insert(
            id.to_string(),
            StoredRecord {
                id: id.to_string(),
                revision,
                source_name: source_name.to_string(),
                payload: payload.clone(),
                fingerprint: fingerprint(payload),
                updated_at: Utc::now(),
            },
        );
        let seq = collection.append(id, kind, revision);
        drop(collection);

        self.head.send_replace(seq);
        Ok(UpsertOutcome::Written {
            revision,
            seq,
            kind,
        })
    }

    async fn delete(
        &self,
        id: &str,
        expected_revision: Option<u64>,
    ) -> Result<DeleteOutcome, StoreError> {
        self.check_available()?;
        let mut collection = self.collection.write().await;

        let Some(record) = collection.records.get(id) else {
            return Ok(DeleteOutcome::NotFound);
        };
        if let Some(expected) = expected_revision {
            if record.revision != expected {
                return Err(self.conflict(id, Some(expected), Some(record.revision)));
            }
        }

        let revision = record.revision;
        let source_name = record.source_name.clone();
        collection.records.remove(id);
        collection.by_source.remove(&(source_name, id.to_string()));
        let seq = collection.append(id, ChangeKind::Deleted, revision);
        drop(collection);

        self.head.send_replace(seq);
        Ok(DeleteOutcome::Deleted { seq, revision })
    }

    async fn changes_since(
        &self,
        cursor: ChangeCursor,
        limit: usize,
    ) -> Result<ChangeBatch, StoreError> {
        self.check_available()?;
        let collection = self.collection.read().await;

        let from = cursor.resolve(collection.last_seq);
        if from < collection.pruned_through {
            return Err(StoreError::CursorExpired {
                collection: self.category.collection_name().to_string(),
                requested: from,
                oldest: collection.pruned_through + 1,
            });
        }

        let entries: Vec<ChangeEntry> = collection
            .log
            .range(from + 1..)
            .take(limit)
            .map(|(_, entry)| entry.clone())
            .collect();
        let last_seq = entries.last().map(|e| e.seq).unwrap_or(from);
        Ok(ChangeBatch { entries, last_seq })
    }

    async fn head(&self) -> Result<u64, StoreError> {
        self.check_available()?;
        Ok(self.collection.read().await.last_seq)
    }

    async fn scan(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        use std::ops::Bound;

        self.check_available()?;
        let collection = self.collection.read().await;
        let lower = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        Ok(collection
            .records
            .range::<str, _>((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn list_by_source(&self, source_name: &str) -> Result<Vec<StoredRecord>, StoreError> {
        self.check_available()?;
        let collection = self.collection.read().await;
        Ok(collection
            .by_source
            .range((source_name.to_string(), String::new())..)
            .take_while(|(source, _)| source == source_name)
            .filter_map(|(_, id)| collection.records.get(id).cloned())
            .collect())
    }

    async fn prune_changes(&self, before_seq: u64) -> Result<u64, StoreError> {
        self.check_available()?;
        let mut collection = self.collection.write().await;

        let limit = before_seq.min(collection.last_seq + 1);
        let retained = collection.log.split_off(&limit);
        let removed = std::mem::replace(&mut collection.log, retained);
        collection.pruned_through = collection.pruned_through.max(limit.saturating_sub(1));
        Ok(removed.len() as u64)
    }

    fn change_signal(&self) -> watch::Receiver<u64> {
        self.head.subscribe()
    }

    fn bulk_cap(&self) -> usize {
        self.bulk_cap
    }
}

/// Four fresh in-memory collections.
pub fn in_memory_stores() -> Stores {
    let store = |category| -> StoreRef { Arc::new(InMemoryStore::new(category)) };
    Stores::new(
        store(RecordCategory::ShellDescriptor),
        store(RecordCategory::Shell),
        store(RecordCategory::SubmodelDescriptor),
        store(RecordCategory::Submodel),
    )
}
