//! Durable store abstraction
//!
//! A [`DurableStore`] holds one record collection: revisioned records keyed
//! by id, a secondary index by source name, and a gapless change log.
//! Backends implement the primitives; diff-aware upsert, conflict retry and
//! bulk partitioning are provided on top of them.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::watch;
use twinmesh_core::{
    BulkReport, ChangeBatch, ChangeCursor, DeleteOutcome, RecordCategory, StoreError,
    StoredRecord, UpsertOutcome,
};

use crate::config::DEFAULT_BULK_CAP;

/// A record to be written by a bulk upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub id: String,
    pub payload: Value,
    pub source_name: String,
}

impl NewRecord {
    pub fn new(id: impl Into<String>, payload: Value, source_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload,
            source_name: source_name.into(),
        }
    }
}

/// Durable, revisioned storage for one record collection.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Category of the records held by this collection.
    fn category(&self) -> RecordCategory;

    /// Fetch the current record.
    async fn get(&self, id: &str) -> Result<Option<StoredRecord>, StoreError>;

    /// Write `payload` if the stored revision equals `expected_revision`
    /// (`None` meaning the id must not currently exist).
    ///
    /// Returns `Written` with the new revision and change-log sequence, or
    /// `Conflict` when the revision guard fails. Never returns `Unchanged`.
    async fn put(
        &self,
        id: &str,
        payload: &Value,
        source_name: &str,
        expected_revision: Option<u64>,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Remove a record. With `Some(revision)` the delete only happens if the
    /// stored revision still matches, otherwise `StoreError::Conflict`.
    async fn delete(
        &self,
        id: &str,
        expected_revision: Option<u64>,
    ) -> Result<DeleteOutcome, StoreError>;

    /// Change-log entries after `cursor`, oldest first, at most `limit`.
    async fn changes_since(
        &self,
        cursor: ChangeCursor,
        limit: usize,
    ) -> Result<ChangeBatch, StoreError>;

    /// Sequence number of the newest change-log entry (0 when empty).
    async fn head(&self) -> Result<u64, StoreError>;

    /// Records in id order, strictly after `after`, at most `limit`.
    async fn scan(&self, after: Option<&str>, limit: usize)
        -> Result<Vec<StoredRecord>, StoreError>;

    /// Records last written by `source_name`, in id order.
    async fn list_by_source(&self, source_name: &str) -> Result<Vec<StoredRecord>, StoreError>;

    /// Drop change-log entries with `seq < before_seq`. Returns the number removed.
    async fn prune_changes(&self, before_seq: u64) -> Result<u64, StoreError>;

    /// Receiver updated with the log head after every append.
    fn change_signal(&self) -> watch::Receiver<u64>;

    /// Maximum records per sub-batch of [`DurableStore::bulk_upsert`].
    fn bulk_cap(&self) -> usize {
        DEFAULT_BULK_CAP
    }

    /// Diff-aware write.
    ///
    /// Returns `Unchanged` without touching the store when the payload equals
    /// the stored one. Only the payload is compared: an equal payload arriving
    /// from another source is `Unchanged` and the record keeps the
    /// `source_name` of whoever wrote it first. A revision conflict is retried
    /// once with a fresh read.
    async fn upsert(
        &self,
        id: &str,
        payload: &Value,
        source_name: &str,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut retried = false;
        loop {
            let current = self.get(id).await?;
            if let Some(record) = &current {
                if record.same_payload(payload) {
                    return Ok(UpsertOutcome::Unchanged {
                        revision: record.revision,
                    });
                }
            }

            let expected = current.map(|record| record.revision);
            match self.put(id, payload, source_name, expected).await? {
                UpsertOutcome::Conflict { .. } if !retried => {
                    tracing::debug!(
                        collection = %self.category(),
                        id = %id,
                        "Revision conflict, retrying with fresh read"
                    );
                    retried = true;
                }
                outcome => return Ok(outcome),
            }
        }
    }

    /// Upsert many records.
    ///
    /// Batches above [`DurableStore::bulk_cap`] are split into sub-batches
    /// that run concurrently. Conflicts left after the retry and records the
    /// backend rejects (see [`StoreError::is_record_error`]) count as failed.
    /// Any other store error aborts its sub-batch; the first such error is
    /// returned once every sub-batch has finished.
    async fn bulk_upsert(&self, records: Vec<NewRecord>) -> Result<BulkReport, StoreError> {
        let cap = self.bulk_cap().max(1);
        let sub_batches = records.chunks(cap).map(|chunk| async move {
            let mut report = BulkReport::default();
            for record in chunk {
                let outcome = match self
                    .upsert(&record.id, &record.payload, &record.source_name)
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(e) if e.is_record_error() => {
                        tracing::warn!(
                            collection = %self.category(),
                            id = %record.id,
                            error = %e,
                            "Record rejected by store"
                        );
                        report.failed += 1;
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                if let UpsertOutcome::Conflict { expected, actual } = &outcome {
                    tracing::warn!(
                        collection = %self.category(),
                        id = %record.id,
                        expected = ?expected,
                        actual = ?actual,
                        "Revision conflict persisted after retry"
                    );
                }
                report.record(&outcome);
            }
            Ok::<_, StoreError>(report)
        });

        let mut total = BulkReport::default();
        let mut first_error = None;
        for result in join_all(sub_batches).await {
            match result {
                Ok(report) => total += report,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }

    /// Every record in id order.
    async fn list_all(&self) -> Result<Vec<StoredRecord>, StoreError> {
        const PAGE: usize = 1_000;
        let mut records: Vec<StoredRecord> = Vec::new();
        loop {
            let after = records.last().map(|record| record.id.clone());
            let page = self.scan(after.as_deref(), PAGE).await?;
            let done = page.len() < PAGE;
            records.extend(page);
            if done {
                return Ok(records);
            }
        }
    }
}

/// Shared handle to a store collection.
pub type StoreRef = Arc<dyn DurableStore>;

/// The four collections, one per record category.
#[derive(Clone)]
pub struct Stores {
    shell_descriptors: StoreRef,
    shells: StoreRef,
    submodel_descriptors: StoreRef,
    submodels: StoreRef,
}

impl Stores {
    pub fn new(
        shell_descriptors: StoreRef,
        shells: StoreRef,
        submodel_descriptors: StoreRef,
        submodels: StoreRef,
    ) -> Self {
        let stores = Self {
            shell_descriptors,
            shells,
            submodel_descriptors,
            submodels,
        };
        for category in RecordCategory::ALL {
            debug_assert_eq!(stores.get(category).category(), category);
        }
        stores
    }

    pub fn get(&self, category: RecordCategory) -> &StoreRef {
        match category {
            RecordCategory::ShellDescriptor => &self.shell_descriptors,
            RecordCategory::Shell => &self.shells,
            RecordCategory::SubmodelDescriptor => &self.submodel_descriptors,
            RecordCategory::Submodel => &self.submodels,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (RecordCategory, &StoreRef)> {
        RecordCategory::ALL
            .into_iter()
            .map(move |category| (category, self.get(category)))
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
