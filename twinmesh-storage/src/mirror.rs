//! Live in-memory mirror of one store collection.
//!
//! The mirror is bootstrapped by a full scan and then kept current by a
//! [`ChangeSubscription`]. Every change-log entry is applied by re-reading the
//! record from the store, so re-delivered or coalesced entries converge to
//! the store's current state.
//!
//! # Concurrency
//!
//! The collection lives behind an `Arc` snapshot. Readers clone the `Arc`
//! under a short read lock and never see a half-applied change; writers
//! serialize on a mutation lock and publish a new snapshot with
//! copy-on-write.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use twinmesh_core::document::endpoints_contain;
use twinmesh_core::{ChangeCursor, ChangeEntry, RecordCategory, StoreError, StoredRecord};

use crate::config::MirrorConfig;
use crate::store::{StoreRef, Stores};
use crate::subscription::{ChangeSubscription, SubscriptionEvent};

/// Immutable view of a mirror at one point in time, keyed by id.
pub type Snapshot = Arc<BTreeMap<String, Arc<StoredRecord>>>;

/// Counters for one mirror.
#[derive(Debug, Default)]
pub struct MirrorMetrics {
    pub changes_applied: AtomicU64,
    pub resyncs: AtomicU64,
    pub fetch_failures: AtomicU64,
}

impl MirrorMetrics {
    pub fn snapshot(&self) -> MirrorMetricsSnapshot {
        MirrorMetricsSnapshot {
            changes_applied: self.changes_applied.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorMetricsSnapshot {
    pub changes_applied: u64,
    pub resyncs: u64,
    pub fetch_failures: u64,
}

struct Shared {
    store: StoreRef,
    records: RwLock<Snapshot>,
    mutation: Mutex<()>,
    applied: watch::Sender<u64>,
    metrics: MirrorMetrics,
}

impl Shared {
    fn publish(&self, f: impl FnOnce(&mut BTreeMap<String, Arc<StoredRecord>>)) {
        let mut guard = self.records.write().unwrap_or_else(PoisonError::into_inner);
        f(Arc::make_mut(&mut guard));
    }

    fn mark_applied(&self, seq: u64) {
        self.applied.send_if_modified(|applied| {
            if seq > *applied {
                *applied = seq;
                true
            } else {
                false
            }
        });
    }

    async fn apply_change(&self, entry: &ChangeEntry) -> Result<(), StoreError> {
        let _guard = self.mutation.lock().await;
        let current = if entry.kind.is_upsert() {
            self.store.get(&entry.id).await?
        } else {
            None
        };

        self.publish(|records| match current {
            Some(record) => {
                records.insert(record.id.clone(), Arc::new(record));
            }
            None => {
                records.remove(&entry.id);
            }
        });
        self.mark_applied(entry.seq);
        self.metrics.changes_applied.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn reload(&self, head: u64) -> Result<usize, StoreError> {
        let _guard = self.mutation.lock().await;
        let records = self.store.list_all().await?;
        let count = records.len();
        let map: BTreeMap<String, Arc<StoredRecord>> = records
            .into_iter()
            .map(|record| (record.id.clone(), Arc::new(record)))
            .collect();

        *self.records.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(map);
        self.mark_applied(head);
        Ok(count)
    }
}

/// In-process replica of one [`crate::DurableStore`] collection.
pub struct LiveMirror {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LiveMirror {
    /// Bootstrap from a full scan and start following the change log.
    ///
    /// Returns once the initial scan is loaded; the store error is returned
    /// if the scan cannot be taken.
    pub async fn start(store: StoreRef, config: MirrorConfig) -> Result<Self, StoreError> {
        let category = store.category();
        let head = store.head().await?;

        let shared = Arc::new(Shared {
            store: store.clone(),
            records: RwLock::new(Arc::new(BTreeMap::new())),
            mutation: Mutex::new(()),
            applied: watch::channel(0).0,
            metrics: MirrorMetrics::default(),
        });
        let count = shared.reload(head).await?;

        tracing::info!(
            collection = %category,
            records = count,
            cursor = head,
            "Live mirror bootstrapped"
        );

        let subscription = ChangeSubscription::spawn(store, ChangeCursor::After(head), config.clone());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(shared.clone(), subscription, config, shutdown_rx));

        Ok(Self {
            shared,
            shutdown,
            task,
        })
    }

    pub fn category(&self) -> RecordCategory {
        self.shared.store.category()
    }

    /// Current snapshot of the whole collection.
    pub fn snapshot(&self) -> Snapshot {
        self.shared
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_by_id(&self, id: &str) -> Option<Arc<StoredRecord>> {
        self.snapshot().get(id).cloned()
    }

    /// All records in id order.
    pub fn list_all(&self) -> Vec<Arc<StoredRecord>> {
        self.snapshot().values().cloned().collect()
    }

    /// Records last written by `source_name`, in id order.
    pub fn list_by_source(&self, source_name: &str) -> Vec<Arc<StoredRecord>> {
        self.snapshot()
            .values()
            .filter(|record| record.source_name == source_name)
            .cloned()
            .collect()
    }

    /// Records with at least one endpoint href containing `base_url`.
    pub fn filter_by_source_url(&self, base_url: &str) -> Vec<Arc<StoredRecord>> {
        self.snapshot()
            .values()
            .filter(|record| endpoints_contain(&record.payload, base_url))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Highest change-log sequence number reflected in the mirror.
    pub fn applied_seq(&self) -> u64 {
        *self.shared.applied.borrow()
    }

    /// Wait until the mirror reflects every change up to `seq`.
    pub async fn wait_for_seq(&self, seq: u64) {
        let mut applied = self.shared.applied.subscribe();
        let _ = applied.wait_for(|current| *current >= seq).await;
    }

    /// Wait until the mirror has caught up with the store's current head.
    pub async fn catch_up(&self) -> Result<(), StoreError> {
        let head = self.shared.store.head().await?;
        self.wait_for_seq(head).await;
        Ok(())
    }

    pub fn metrics(&self) -> MirrorMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Stop following the change log. The last snapshot stays readable
    /// through clones taken before the call.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        let _ = (&mut self.task).await;
    }
}

impl Drop for LiveMirror {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn pause(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => !*shutdown.borrow(),
        _ = shutdown.changed() => false,
    }
}

async fn run(
    shared: Arc<Shared>,
    mut subscription: ChangeSubscription,
    config: MirrorConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let collection = shared.store.category().collection_name();

    'events: loop {
        let event = tokio::select! {
            event = subscription.next_event() => event,
            _ = shutdown.changed() => None,
        };
        let Some(event) = event else {
            break;
        };

        let mut backoff = config.reconnect_initial_backoff;
        loop {
            let result = match &event {
                SubscriptionEvent::Change(entry) => shared.apply_change(entry).await,
                SubscriptionEvent::Resync { head } => {
                    shared.metrics.resyncs.fetch_add(1, Ordering::Relaxed);
                    shared.reload(*head).await.map(|count| {
                        tracing::info!(collection, records = count, head, "Live mirror resynchronized");
                    })
                }
            };
            match result {
                Ok(()) => break,
                Err(e) => {
                    shared.metrics.fetch_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        collection,
                        error = %e,
                        retry_in_ms = backoff.as_millis() as u64,
                        "Failed to apply change to live mirror"
                    );
                    if !pause(backoff, &mut shutdown).await {
                        break 'events;
                    }
                    backoff = config.next_backoff(backoff);
                }
            }
        }
    }

    subscription.stop().await;
    let metrics = shared.metrics.snapshot();
    tracing::info!(
        collection,
        changes_applied = metrics.changes_applied,
        resyncs = metrics.resyncs,
        fetch_failures = metrics.fetch_failures,
        "Live mirror stopped"
    );
}

/// One live mirror per record category.
pub struct Mirrors {
    shell_descriptors: LiveMirror,
    shells: LiveMirror,
    submodel_descriptors: LiveMirror,
    submodels: LiveMirror,
}

impl Mirrors {
    /// Bootstrap all four mirrors. Returns only once every initial scan is
    /// loaded, so readers never see a half-populated view.
    pub async fn start(stores: &Stores, config: MirrorConfig) -> Result<Self, StoreError> {
        let (shell_descriptors, shells, submodel_descriptors, submodels) = tokio::try_join!(
            LiveMirror::start(stores.get(RecordCategory::ShellDescriptor).clone(), config.clone()),
            LiveMirror::start(stores.get(RecordCategory::Shell).clone(), config.clone()),
            LiveMirror::start(stores.get(RecordCategory::SubmodelDescriptor).clone(), config.clone()),
            LiveMirror::start(stores.get(RecordCategory::Submodel).clone(), config),
        )?;
        Ok(Self {
            shell_descriptors,
            shells,
            submodel_descriptors,
            submodels,
        })
    }

    pub fn get(&self, category: RecordCategory) -> &LiveMirror {
        match category {
            RecordCategory::ShellDescriptor => &self.shell_descriptors,
            RecordCategory::Shell => &self.shells,
            RecordCategory::SubmodelDescriptor => &self.submodel_descriptors,
            RecordCategory::Submodel => &self.submodels,
        }
    }

    /// Wait until every mirror has caught up with its store.
    pub async fn catch_up(&self) -> Result<(), StoreError> {
        tokio::try_join!(
            self.shell_descriptors.catch_up(),
            self.shells.catch_up(),
            self.submodel_descriptors.catch_up(),
            self.submodels.catch_up(),
        )?;
        Ok(())
    }

    pub async fn stop(self) {
        tokio::join!(
            self.shell_descriptors.stop(),
            self.shells.stop(),
            self.submodel_descriptors.stop(),
            self.submodels.stop(),
        );
    }
}
