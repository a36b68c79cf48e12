//! LMDB-backed durable store.
//!
//! Uses the heed crate (Rust bindings for LMDB). All four collections share
//! one environment; each collection owns five named databases:
//!
//! - `{collection}.records`: id -> JSON `StoredRecord`
//! - `{collection}.revisions`: id -> last assigned revision (survives deletes)
//! - `{collection}.by_source`: `source\0id` -> ()
//! - `{collection}.changes`: big-endian seq -> JSON `ChangeEntry`
//! - `{collection}.meta`: `last_seq`, `pruned_through`
//!
//! Every mutation (record, index, revision and log entry) commits in a single
//! write transaction, so the change log never disagrees with the records.

use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use heed::byteorder::BigEndian;
use heed::types::{Bytes, Str, Unit, U64};
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use serde_json::Value;
use tokio::sync::watch;
use twinmesh_core::{
    fingerprint, ChangeBatch, ChangeCursor, ChangeEntry, ChangeKind, DeleteOutcome,
    RecordCategory, StoreError, StoredRecord, UpsertOutcome,
};

use crate::config::StoreConfig;
use crate::store::{DurableStore, StoreRef, Stores};

const LAST_SEQ: &str = "last_seq";
const PRUNED_THROUGH: &str = "pruned_through";
const DBS_PER_COLLECTION: u32 = 5;
/// LMDB's compiled-in key limit.
const MAX_KEY_BYTES: usize = 511;

type Seq = U64<BigEndian>;

fn source_key(source_name: &str, id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(source_name.len() + 1 + id.len());
    key.extend_from_slice(source_name.as_bytes());
    key.push(0);
    key.extend_from_slice(id.as_bytes());
    key
}

/// Open (or create) the LMDB environment and its four collections.
pub fn open_lmdb_stores(config: &StoreConfig) -> Result<Stores, StoreError> {
    let env = open_env(&config.path, config.map_size_mb)?;
    let open = |category| -> Result<StoreRef, StoreError> {
        Ok(Arc::new(
            LmdbStore::open(&env, category)?.with_bulk_cap(config.bulk_cap),
        ))
    };

    let stores = Stores::new(
        open(RecordCategory::ShellDescriptor)?,
        open(RecordCategory::Shell)?,
        open(RecordCategory::SubmodelDescriptor)?,
        open(RecordCategory::Submodel)?,
    );
    tracing::info!(
        path = %config.path.display(),
        map_size_mb = config.map_size_mb,
        "LMDB store opened"
    );
    Ok(stores)
}

fn open_env(path: &Path, map_size_mb: usize) -> Result<Env, StoreError> {
    let env_error = |reason: String| StoreError::Unavailable {
        collection: "*".to_string(),
        reason,
    };

    std::fs::create_dir_all(path).map_err(|e| env_error(e.to_string()))?;

    unsafe {
        EnvOpenOptions::new()
            .map_size(map_size_mb * 1024 * 1024)
            .max_dbs(DBS_PER_COLLECTION * RecordCategory::ALL.len() as u32)
            .open(path)
    }
    .map_err(|e| env_error(format!("failed to open LMDB environment: {}", e)))
}

/// One collection inside a shared LMDB environment.
pub struct LmdbStore {
    category: RecordCategory,
    env: Env,
    records: Database<Bytes, Bytes>,
    revisions: Database<Bytes, Seq>,
    by_source: Database<Bytes, Unit>,
    changes: Database<Seq, Bytes>,
    meta: Database<Str, Seq>,
    head: watch::Sender<u64>,
    bulk_cap: usize,
}

impl LmdbStore {
    /// Open the databases of `category` inside `env`, creating them if needed.
    pub fn open(env: &Env, category: RecordCategory) -> Result<Self, StoreError> {
        let name = category.collection_name();
        let fail = |e: heed::Error| StoreError::Unavailable {
            collection: name.to_string(),
            reason: e.to_string(),
        };

        let mut wtxn = env.write_txn().map_err(fail)?;
        let records = env
            .create_database(&mut wtxn, Some(format!("{}.records", name).as_str()))
            .map_err(fail)?;
        let revisions = env
            .create_database(&mut wtxn, Some(format!("{}.revisions", name).as_str()))
            .map_err(fail)?;
        let by_source = env
            .create_database(&mut wtxn, Some(format!("{}.by_source", name).as_str()))
            .map_err(fail)?;
        let changes = env
            .create_database(&mut wtxn, Some(format!("{}.changes", name).as_str()))
            .map_err(fail)?;
        let meta: Database<Str, Seq> = env
            .create_database(&mut wtxn, Some(format!("{}.meta", name).as_str()))
            .map_err(fail)?;
        let last_seq = meta.get(&wtxn, LAST_SEQ).map_err(fail)?.unwrap_or(0);
        wtxn.commit().map_err(fail)?;

        Ok(Self {
            category,
            env: env.clone(),
            records,
            revisions,
            by_source,
            changes,
            meta,
            head: watch::Sender::new(last_seq),
            bulk_cap: crate::config::DEFAULT_BULK_CAP,
        })
    }

    pub fn with_bulk_cap(mut self, bulk_cap: usize) -> Self {
        self.bulk_cap = bulk_cap.max(1);
        self
    }

    fn collection(&self) -> String {
        self.category.collection_name().to_string()
    }

    fn unavailable(&self, e: heed::Error) -> StoreError {
        StoreError::Unavailable {
            collection: self.collection(),
            reason: e.to_string(),
        }
    }

    /// Like [`Self::unavailable`], but a value LMDB refuses to hold is the
    /// record's fault, not the store's.
    fn write_error(&self, id: &str, e: heed::Error) -> StoreError {
        match e {
            heed::Error::Mdb(heed::MdbError::BadValSize) => self.rejected(id, e.to_string()),
            e => self.unavailable(e),
        }
    }

    fn rejected(&self, id: &str, reason: String) -> StoreError {
        StoreError::Rejected {
            collection: self.collection(),
            id: id.to_string(),
            reason,
        }
    }

    fn check_keys(&self, id: &str, source_name: &str) -> Result<(), StoreError> {
        let longest = id.len().max(source_name.len() + 1 + id.len());
        if longest > MAX_KEY_BYTES {
            return Err(self.rejected(
                id,
                format!("key of {} bytes exceeds the {} byte limit", longest, MAX_KEY_BYTES),
            ));
        }
        Ok(())
    }

    fn serialization(&self, e: serde_json::Error) -> StoreError {
        StoreError::Serialization {
            collection: self.collection(),
            reason: e.to_string(),
        }
    }

    fn read_record(&self, txn: &RoTxn, id: &str) -> Result<Option<StoredRecord>, StoreError> {
        match self
            .records
            .get(txn, id.as_bytes())
            .map_err(|e| self.unavailable(e))?
        {
            Some(bytes) => serde_json::from_slice(bytes)
                .map(Some)
                .map_err(|e| self.serialization(e)),
            None => Ok(None),
        }
    }

    fn meta_value(&self, txn: &RoTxn, key: &str) -> Result<u64, StoreError> {
        Ok(self
            .meta
            .get(txn, key)
            .map_err(|e| self.unavailable(e))?
            .unwrap_or(0))
    }

    fn append(
        &self,
        wtxn: &mut RwTxn,
        id: &str,
        kind: ChangeKind,
        revision: u64,
    ) -> Result<u64, StoreError> {
        let seq = self.meta_value(wtxn, LAST_SEQ)? + 1;
        let entry = ChangeEntry {
            seq,
            id: id.to_string(),
            kind,
            revision,
            recorded_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&entry).map_err(|e| self.serialization(e))?;
        self.changes
            .put(wtxn, &seq, bytes.as_slice())
            .map_err(|e| self.unavailable(e))?;
        self.meta
            .put(wtxn, LAST_SEQ, &seq)
            .map_err(|e| self.unavailable(e))?;
        Ok(seq)
    }

    fn get_sync(&self, id: &str) -> Result<Option<StoredRecord>, StoreError> {
        if id.len() > MAX_KEY_BYTES {
            return Ok(None);
        }
        let rtxn = self.env.read_txn().map_err(|e| self.unavailable(e))?;
        self.read_record(&rtxn, id)
    }

    fn put_sync(
        &self,
        id: &str,
        payload: &Value,
        source_name: &str,
        expected_revision: Option<u64>,
    ) -> Result<UpsertOutcome, StoreError> {
        self.check_keys(id, source_name)?;
        let mut wtxn = self.env.write_txn().map_err(|e| self.unavailable(e))?;

        let current = self.read_record(&wtxn, id)?;
        let actual = current.as_ref().map(|record| record.revision);
        if actual != expected_revision {
            // dropping the transaction aborts it
            return Ok(UpsertOutcome::Conflict {
                expected: expected_revision,
                actual,
            });
        }

        let revision = self
            .revisions
            .get(&wtxn, id.as_bytes())
            .map_err(|e| self.unavailable(e))?
            .unwrap_or(0)
            + 1;
        let kind = if current.is_some() {
            ChangeKind::Updated
        } else {
            ChangeKind::Created
        };

        let record = StoredRecord {
            id: id.to_string(),
            revision,
            source_name: source_name.to_string(),
            payload: payload.clone(),
            fingerprint: fingerprint(payload),
            updated_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&record).map_err(|e| self.serialization(e))?;

        if let Some(previous) = &current {
            self.by_source
                .delete(&mut wtxn, source_key(&previous.source_name, id).as_slice())
                .map_err(|e| self.unavailable(e))?;
        }
        self.by_source
            .put(&mut wtxn, source_key(source_name, id).as_slice(), &())
            .map_err(|e| self.write_error(id, e))?;
        self.revisions
            .put(&mut wtxn, id.as_bytes(), &revision)
            .map_err(|e| self.write_error(id, e))?;
        self.records
            .put(&mut wtxn, id.as_bytes(), bytes.as_slice())
            .map_err(|e| self.write_error(id, e))?;
        let seq = self.append(&mut wtxn, id, kind, revision)?;
        wtxn.commit().map_err(|e| self.unavailable(e))?;

        self.head.send_replace(seq);
        Ok(UpsertOutcome::Written {
            revision,
            seq,
            kind,
        })
    }

    fn delete_sync(
        &self,
        id: &str,
        expected_revision: Option<u64>,
    ) -> Result<DeleteOutcome, StoreError> {
        if id.len() > MAX_KEY_BYTES {
            return Ok(DeleteOutcome::NotFound);
        }
        let mut wtxn = self.env.write_txn().map_err(|e| self.unavailable(e))?;

        let Some(current) = self.read_record(&wtxn, id)? else {
            return Ok(DeleteOutcome::NotFound);
        };
        if let Some(expected) = expected_revision {
            if current.revision != expected {
                return Err(StoreError::Conflict {
                    collection: self.collection(),
                    id: id.to_string(),
                    expected: Some(expected),
                    actual: Some(current.revision),
                });
            }
        }

        self.records
            .delete(&mut wtxn, id.as_bytes())
            .map_err(|e| self.unavailable(e))?;
        self.by_source
            .delete(&mut wtxn, source_key(&current.source_name, id).as_slice())
            .map_err(|e| self.unavailable(e))?;
        let seq = self.append(&mut wtxn, id, ChangeKind::Deleted, current.revision)?;
        wtxn.commit().map_err(|e| self.unavailable(e))?;

        self.head.send_replace(seq);
        Ok(DeleteOutcome::Deleted {
            seq,
            revision: current.revision,
        })
    }

    fn changes_since_sync(
        &self,
        cursor: ChangeCursor,
        limit: usize,
    ) -> Result<ChangeBatch, StoreError> {
        let rtxn = self.env.read_txn().map_err(|e| self.unavailable(e))?;

        let from = cursor.resolve(self.meta_value(&rtxn, LAST_SEQ)?);
        let pruned_through = self.meta_value(&rtxn, PRUNED_THROUGH)?;
        if from < pruned_through {
            return Err(StoreError::CursorExpired {
                collection: self.collection(),
                requested: from,
                oldest: pruned_through + 1,
            });
        }

        let mut entries = Vec::new();
        let range = from.saturating_add(1)..;
        for item in self
            .changes
            .range(&rtxn, &range)
            .map_err(|e| self.unavailable(e))?
            .take(limit)
        {
            let (_, bytes) = item.map_err(|e| self.unavailable(e))?;
            let entry: ChangeEntry =
                serde_json::from_slice(bytes).map_err(|e| self.serialization(e))?;
            entries.push(entry);
        }

        let last_seq = entries.last().map(|e| e.seq).unwrap_or(from);
        Ok(ChangeBatch { entries, last_seq })
    }

    fn head_sync(&self) -> Result<u64, StoreError> {
        let rtxn = self.env.read_txn().map_err(|e| self.unavailable(e))?;
        self.meta_value(&rtxn, LAST_SEQ)
    }

    fn scan_sync(&self, after: Option<&str>, limit: usize) -> Result<Vec<StoredRecord>, StoreError> {
        let rtxn = self.env.read_txn().map_err(|e| self.unavailable(e))?;
        let lower = match after {
            Some(id) => Bound::Excluded(id.as_bytes()),
            None => Bound::Unbounded,
        };
        let range: (Bound<&[u8]>, Bound<&[u8]>) = (lower, Bound::Unbounded);

        let mut records = Vec::new();
        for item in self
            .records
            .range(&rtxn, &range)
            .map_err(|e| self.unavailable(e))?
            .take(limit)
        {
            let (_, bytes) = item.map_err(|e| self.unavailable(e))?;
            records.push(serde_json::from_slice(bytes).map_err(|e| self.serialization(e))?);
        }
        Ok(records)
    }

    fn list_by_source_sync(&self, source_name: &str) -> Result<Vec<StoredRecord>, StoreError> {
        let rtxn = self.env.read_txn().map_err(|e| self.unavailable(e))?;
        let prefix = source_key(source_name, "");

        let mut ids = Vec::new();
        for item in self
            .by_source
            .prefix_iter(&rtxn, prefix.as_slice())
            .map_err(|e| self.unavailable(e))?
        {
            let (key, _) = item.map_err(|e| self.unavailable(e))?;
            ids.push(String::from_utf8_lossy(&key[prefix.len()..]).into_owned());
        }

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.read_record(&rtxn, &id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn prune_changes_sync(&self, before_seq: u64) -> Result<u64, StoreError> {
        let mut wtxn = self.env.write_txn().map_err(|e| self.unavailable(e))?;

        let limit = before_seq.min(self.meta_value(&wtxn, LAST_SEQ)? + 1);
        let removed = self
            .changes
            .delete_range(&mut wtxn, &(..limit))
            .map_err(|e| self.unavailable(e))?;
        let pruned_through = self
            .meta_value(&wtxn, PRUNED_THROUGH)?
            .max(limit.saturating_sub(1));
        self.meta
            .put(&mut wtxn, PRUNED_THROUGH, &pruned_through)
            .map_err(|e| self.unavailable(e))?;
        wtxn.commit().map_err(|e| self.unavailable(e))?;

        Ok(removed as u64)
    }
}

#[async_trait]
impl DurableStore for LmdbStore {
    fn category(&self) -> RecordCategory {
        self.category
    }

    async fn get(&self, id: &str) -> Result<Option<StoredRecord>, StoreError> {
        self.get_sync(id)
    }

    async fn put(
        &self,
        id: &str,
        payload: &Value,
        source_name: &str,
        expected_revision: Option<u64>,
    ) -> Result<UpsertOutcome, StoreError> {
        self.put_sync(id, payload, source_name, expected_revision)
    }

    async fn delete(
        &self,
        id: &str,
        expected_revision: Option<u64>,
    ) -> Result<DeleteOutcome, StoreError> {
        self.delete_sync(id, expected_revision)
    }

    async fn changes_since(
        &self,
        cursor: ChangeCursor,
        limit: usize,
    ) -> Result<ChangeBatch, StoreError> {
        self.changes_since_sync(cursor, limit)
    }

    async fn head(&self) -> Result<u64, StoreError> {
        self.head_sync()
    }

    async fn scan(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        self.scan_sync(after, limit)
    }

    async fn list_by_source(&self, source_name: &str) -> Result<Vec<StoredRecord>, StoreError> {
        self.list_by_source_sync(source_name)
    }

    async fn prune_changes(&self, before_seq: u64) -> Result<u64, StoreError> {
        self.prune_changes_sync(before_seq)
    }

    fn change_signal(&self) -> watch::Receiver<u64> {
        self.head.subscribe()
    }

    fn bulk_cap(&self) -> usize {
        self.bulk_cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_stores() -> (Stores, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let config = StoreConfig {
            path: temp_dir.path().to_path_buf(),
            map_size_mb: 10,
            bulk_cap: 4,
        };
        let stores = open_lmdb_stores(&config).expect("store creation should succeed");
        (stores, temp_dir)
    }

    #[tokio::test]
    async fn test_upsert_and_diff_suppression() {
        let (stores, _dir) = create_test_stores();
        let store = stores.get(RecordCategory::Submodel);
        let payload = json!({"id": "urn:sm:1", "submodelElements": []});

        let first = store.upsert("urn:sm:1", &payload, "factory-a").await.unwrap();
        assert_eq!(
            first,
            UpsertOutcome::Written {
                revision: 1,
                seq: 1,
                kind: ChangeKind::Created
            }
        );
        let second = store.upsert("urn:sm:1", &payload, "factory-a").await.unwrap();
        assert_eq!(second, UpsertOutcome::Unchanged { revision: 1 });

        let record = store.get("urn:sm:1").await.unwrap().unwrap();
        assert_eq!(record.revision, 1);
        assert_eq!(record.source_name, "factory-a");
        assert_eq!(record.payload, payload);
        assert_eq!(store.head().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_collections_are_independent() {
        let (stores, _dir) = create_test_stores();
        stores
            .get(RecordCategory::Shell)
            .upsert("urn:a", &json!({"id": "urn:a"}), "s")
            .await
            .unwrap();

        assert!(stores
            .get(RecordCategory::ShellDescriptor)
            .get("urn:a")
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            stores.get(RecordCategory::ShellDescriptor).head().await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_delete_and_change_log() {
        let (stores, _dir) = create_test_stores();
        let store = stores.get(RecordCategory::Shell);
        store.upsert("urn:a", &json!({"v": 1}), "s").await.unwrap();
        store.upsert("urn:a", &json!({"v": 2}), "s").await.unwrap();

        assert_eq!(
            store.delete("urn:a", Some(2)).await.unwrap(),
            DeleteOutcome::Deleted { seq: 3, revision: 2 }
        );
        assert_eq!(store.delete("urn:a", None).await.unwrap(), DeleteOutcome::NotFound);

        let batch = store.changes_since(ChangeCursor::Beginning, 10).await.unwrap();
        let kinds: Vec<ChangeKind> = batch.entries.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![ChangeKind::Created, ChangeKind::Updated, ChangeKind::Deleted]
        );
        assert_eq!(batch.last_seq, 3);

        let page = store.changes_since(ChangeCursor::After(1), 1).await.unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.last_seq, 2);
    }

    #[tokio::test]
    async fn test_scan_and_source_index() {
        let (stores, _dir) = create_test_stores();
        let store = stores.get(RecordCategory::ShellDescriptor);
        for id in ["urn:c", "urn:a", "urn:b"] {
            store.upsert(id, &json!({"id": id}), "factory-a").await.unwrap();
        }
        store.upsert("urn:d", &json!({"id": "urn:d"}), "factory-ab").await.unwrap();

        let page: Vec<String> = store
            .scan(Some("urn:a"), 2)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(page, vec!["urn:b", "urn:c"]);

        let by_source: Vec<String> = store
            .list_by_source("factory-a")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(by_source, vec!["urn:a", "urn:b", "urn:c"]);

        // moving a record to another source updates the index
        store.upsert("urn:a", &json!({"id": "urn:a", "v": 2}), "factory-ab").await.unwrap();
        assert_eq!(store.list_by_source("factory-a").await.unwrap().len(), 2);
        assert_eq!(store.list_by_source("factory-ab").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_bulk_upsert_over_cap() {
        let (stores, _dir) = create_test_stores();
        let store = stores.get(RecordCategory::Submodel);
        let records: Vec<crate::NewRecord> = (0..11)
            .map(|i| crate::NewRecord::new(format!("urn:{:02}", i), json!({"i": i}), "s"))
            .collect();

        let report = store.bulk_upsert(records).await.unwrap();
        assert_eq!(report.written, 11);
        assert_eq!(store.list_all().await.unwrap().len(), 11);
        assert_eq!(store.head().await.unwrap(), 11);
    }

    #[tokio::test]
    async fn test_oversized_id_fails_only_its_record() {
        let (stores, _dir) = create_test_stores();
        let store = stores.get(RecordCategory::Shell);
        let long_id = format!("urn:{}", "x".repeat(600));
        let records = vec![
            crate::NewRecord::new(long_id.clone(), json!({"id": long_id}), "factory-a"),
            crate::NewRecord::new("urn:ok", json!({"id": "urn:ok"}), "factory-a"),
        ];

        let report = store.bulk_upsert(records).await.unwrap();
        assert_eq!(report.written, 1);
        assert_eq!(report.failed, 1);
        assert!(store.get("urn:ok").await.unwrap().is_some());
        assert_eq!(store.get(&long_id).await.unwrap(), None);
        assert_eq!(store.delete(&long_id, None).await.unwrap(), DeleteOutcome::NotFound);

        let err = store
            .upsert(&long_id, &json!({"id": long_id}), "factory-a")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected { .. }));
        assert_eq!(store.head().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_prune_expires_old_cursors() {
        let (stores, _dir) = create_test_stores();
        let store = stores.get(RecordCategory::Shell);
        for i in 0..4 {
            store
                .upsert(&format!("urn:{}", i), &json!({"i": i}), "s")
                .await
                .unwrap();
        }
        assert_eq!(store.prune_changes(3).await.unwrap(), 2);
        assert!(matches!(
            store.changes_since(ChangeCursor::Beginning, 10).await,
            Err(StoreError::CursorExpired { oldest: 3, .. })
        ));
        let batch = store.changes_since(ChangeCursor::After(2), 10).await.unwrap();
        assert_eq!(batch.entries.len(), 2);
    }

    #[tokio::test]
    async fn test_reopen_keeps_records_and_sequence() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let config = StoreConfig {
            path: temp_dir.path().to_path_buf(),
            map_size_mb: 10,
            bulk_cap: 100,
        };

        {
            let stores = open_lmdb_stores(&config).unwrap();
            let store = stores.get(RecordCategory::Shell);
            store.upsert("urn:a", &json!({"v": 1}), "s").await.unwrap();
            store.upsert("urn:a", &json!({"v": 2}), "s").await.unwrap();
            store.delete("urn:a", None).await.unwrap();
        }

        let stores = open_lmdb_stores(&config).unwrap();
        let store = stores.get(RecordCategory::Shell);
        assert_eq!(store.head().await.unwrap(), 3);
        assert_eq!(*store.change_signal().borrow(), 3);

        let outcome = store.upsert("urn:a", &json!({"v": 3}), "s").await.unwrap();
        assert_eq!(
            outcome,
            UpsertOutcome::Written {
                revision: 3,
                seq: 4,
                kind: ChangeKind::Created
            }
        );
    }
}
