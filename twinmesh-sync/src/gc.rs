//! Garbage Collector
//!
//! Periodically removes records whose upstream no longer has them. Every
//! sweep examines the four categories concurrently. For each stored record
//! the configured sources are asked, one after another, whether the id still
//! exists; the first confirmation ends the search.
//!
//! A record is kept when:
//!
//! - a source confirms it
//! - a stored Shell references it (submodels and submodel descriptors)
//! - a stored ShellDescriptor embeds it (submodel descriptors)
//! - any source failed to answer, since silence from an unreachable source is
//!   not evidence of absence
//!
//! Deletes are guarded by the revision seen at examination time, so a record
//! rewritten by a poller mid-sweep survives until the next sweep.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::{interval_at, MissedTickBehavior};
use twinmesh_core::document::{embedded_submodel_descriptors, record_id, submodel_reference_ids};
use twinmesh_core::{
    DeleteOutcome, Lookup, MeshError, RecordCategory, StoreError, StoredRecord,
};
use twinmesh_sources::SourceRef;
use twinmesh_storage::Stores;

use crate::constants::{DEFAULT_GC_FIRST_SWEEP_DELAY_SECS, DEFAULT_GC_SWEEP_INTERVAL_SECS};
use crate::supervisor::SourceSet;
use crate::task_group::TaskGroup;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the garbage-collection background task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcConfig {
    /// Time between two sweeps (default: 300 seconds)
    pub sweep_interval: Duration,
    /// Delay before the first sweep (default: 60 seconds)
    pub first_sweep_delay: Duration,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(DEFAULT_GC_SWEEP_INTERVAL_SECS),
            first_sweep_delay: Duration::from_secs(DEFAULT_GC_FIRST_SWEEP_DELAY_SECS),
        }
    }
}

impl GcConfig {
    /// Create GcConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `TWINMESH_GC_SWEEP_INTERVAL_SECS`: time between sweeps (default: 300)
    /// - `TWINMESH_GC_FIRST_SWEEP_DELAY_SECS`: delay before the first sweep (default: 60)
    pub fn from_env() -> Self {
        let sweep_interval = Duration::from_secs(
            std::env::var("TWINMESH_GC_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs: &u64| *secs > 0)
                .unwrap_or(DEFAULT_GC_SWEEP_INTERVAL_SECS),
        );

        let first_sweep_delay = Duration::from_secs(
            std::env::var("TWINMESH_GC_FIRST_SWEEP_DELAY_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_GC_FIRST_SWEEP_DELAY_SECS),
        );

        Self {
            sweep_interval,
            first_sweep_delay,
        }
    }

    /// Short intervals for development and tests.
    pub fn development() -> Self {
        Self {
            sweep_interval: Duration::from_secs(10),
            first_sweep_delay: Duration::from_secs(1),
        }
    }

    /// Longer intervals to keep the load on upstreams low.
    pub fn production() -> Self {
        Self {
            sweep_interval: Duration::from_secs(900),
            first_sweep_delay: Duration::from_secs(120),
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for garbage collection since startup.
#[derive(Debug, Default)]
pub struct GcMetrics {
    pub sweeps: AtomicU64,
    pub records_examined: AtomicU64,
    pub records_deleted: AtomicU64,
    /// Kept because a source had no answer
    pub records_undecided: AtomicU64,
    pub categories_failed: AtomicU64,
}

impl GcMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> GcMetricsSnapshot {
        GcMetricsSnapshot {
            sweeps: self.sweeps.load(Ordering::Relaxed),
            records_examined: self.records_examined.load(Ordering::Relaxed),
            records_deleted: self.records_deleted.load(Ordering::Relaxed),
            records_undecided: self.records_undecided.load(Ordering::Relaxed),
            categories_failed: self.categories_failed.load(Ordering::Relaxed),
        }
    }

    fn record_sweep(&self, report: &GcReport) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        for sweep in &report.categories {
            self.records_examined
                .fetch_add(sweep.examined, Ordering::Relaxed);
            self.records_deleted.fetch_add(sweep.deleted, Ordering::Relaxed);
            self.records_undecided
                .fetch_add(sweep.undecided, Ordering::Relaxed);
            if sweep.error.is_some() {
                self.categories_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcMetricsSnapshot {
    pub sweeps: u64,
    pub records_examined: u64,
    pub records_deleted: u64,
    pub records_undecided: u64,
    pub categories_failed: u64,
}

// ============================================================================
// VERDICTS AND REPORTS
// ============================================================================

/// Decision for one stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// A source still has the record.
    Confirmed { by: String },
    /// A stored shell or shell descriptor points at the record.
    Referenced,
    /// Every source answered and none has it.
    Absent,
    /// No source confirmed, but these sources could not be asked.
    Undecided { failed: Vec<String> },
}

impl Verdict {
    pub fn is_delete(&self) -> bool {
        matches!(self, Verdict::Absent)
    }
}

/// Result of sweeping one category.
#[derive(Debug)]
pub struct CategorySweep {
    pub category: RecordCategory,
    pub examined: u64,
    pub deleted: u64,
    pub kept: u64,
    pub undecided: u64,
    /// Set when the store failed and the category was abandoned.
    pub error: Option<MeshError>,
}

impl CategorySweep {
    fn new(category: RecordCategory) -> Self {
        Self {
            category,
            examined: 0,
            deleted: 0,
            kept: 0,
            undecided: 0,
            error: None,
        }
    }
}

#[derive(Debug)]
pub struct GcReport {
    pub categories: Vec<CategorySweep>,
    pub elapsed: Duration,
}

impl GcReport {
    pub fn category(&self, category: RecordCategory) -> Option<&CategorySweep> {
        self.categories.iter().find(|sweep| sweep.category == category)
    }

    pub fn deleted(&self) -> u64 {
        self.categories.iter().map(|sweep| sweep.deleted).sum()
    }
}

// ============================================================================
// COLLECTOR
// ============================================================================

/// Sweeps the durable stores against the configured sources.
#[derive(Clone)]
pub struct GarbageCollector {
    stores: Stores,
    sources: SourceSet,
    metrics: Arc<GcMetrics>,
}

impl GarbageCollector {
    pub fn new(stores: Stores, sources: SourceSet) -> Self {
        Self {
            stores,
            sources,
            metrics: Arc::new(GcMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<GcMetrics> {
        self.metrics.clone()
    }

    /// Run one sweep over all four categories.
    pub async fn sweep(&self) -> GcReport {
        let started = Instant::now();
        let sources = self.sources.snapshot();

        let mut group = TaskGroup::new("gc");
        for category in RecordCategory::ALL {
            let collector = self.clone();
            let sources = sources.clone();
            group.spawn(category.collection_name(), async move {
                collector.sweep_category(category, &sources).await
            });
        }

        let categories = RecordCategory::ALL
            .into_iter()
            .zip(group.join_all().await)
            .map(|(category, task)| {
                task.result.unwrap_or_else(|e| CategorySweep {
                    error: Some(e),
                    ..CategorySweep::new(category)
                })
            })
            .collect();

        let report = GcReport {
            categories,
            elapsed: started.elapsed(),
        };
        self.metrics.record_sweep(&report);

        tracing::info!(
            sources = sources.len(),
            deleted = report.deleted(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Garbage collection sweep finished"
        );
        report
    }

    async fn sweep_category(&self, category: RecordCategory, sources: &[SourceRef]) -> CategorySweep {
        let mut sweep = CategorySweep::new(category);
        if let Err(e) = self.sweep_records(category, sources, &mut sweep).await {
            tracing::warn!(
                category = %category,
                error = %e,
                "Garbage collection abandoned for category"
            );
            sweep.error = Some(e.into());
        } else {
            tracing::info!(
                category = %category,
                examined = sweep.examined,
                deleted = sweep.deleted,
                undecided = sweep.undecided,
                "Category swept"
            );
        }
        sweep
    }

    async fn sweep_records(
        &self,
        category: RecordCategory,
        sources: &[SourceRef],
        sweep: &mut CategorySweep,
    ) -> Result<(), StoreError> {
        let references = self.references(category).await?;
        let store = self.stores.get(category);

        for record in store.list_all().await? {
            sweep.examined += 1;
            let verdict = if references.contains(&record.id) {
                Verdict::Referenced
            } else {
                verdict(sources, category, &record.id).await
            };
            tracing::debug!(category = %category, id = %record.id, verdict = ?verdict, "Record examined");

            match verdict {
                Verdict::Absent => {
                    if self.delete(category, &record).await? {
                        sweep.deleted += 1;
                    } else {
                        sweep.kept += 1;
                    }
                }
                Verdict::Undecided { .. } => {
                    sweep.undecided += 1;
                    sweep.kept += 1;
                }
                Verdict::Confirmed { .. } | Verdict::Referenced => sweep.kept += 1,
            }
        }
        Ok(())
    }

    /// Delete `record` if it still has the examined revision. Returns whether
    /// a delete happened.
    async fn delete(&self, category: RecordCategory, record: &StoredRecord) -> Result<bool, StoreError> {
        let store = self.stores.get(category);
        match store.delete(&record.id, Some(record.revision)).await {
            Ok(DeleteOutcome::Deleted { .. }) => {
                tracing::info!(
                    category = %category,
                    id = %record.id,
                    source = %record.source_name,
                    "Record no longer upstream, deleted"
                );
                Ok(true)
            }
            Ok(DeleteOutcome::NotFound) => Ok(false),
            Err(StoreError::Conflict { .. }) => {
                tracing::debug!(category = %category, id = %record.id, "Record rewritten during sweep, kept");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Ids kept alive by other stored records.
    async fn references(&self, category: RecordCategory) -> Result<HashSet<String>, StoreError> {
        let mut references = HashSet::new();
        if !category.is_submodel_family() {
            return Ok(references);
        }

        for shell in self.stores.get(RecordCategory::Shell).list_all().await? {
            references.extend(submodel_reference_ids(&shell.payload).map(str::to_string));
        }

        if category == RecordCategory::SubmodelDescriptor {
            let descriptors = self
                .stores
                .get(RecordCategory::ShellDescriptor)
                .list_all()
                .await?;
            for descriptor in descriptors {
                references.extend(
                    embedded_submodel_descriptors(&descriptor.payload)
                        .iter()
                        .filter_map(|embedded| {
                            record_id(RecordCategory::SubmodelDescriptor, embedded).ok()
                        }),
                );
            }
        }
        Ok(references)
    }
}

/// Ask `sources` in order whether `id` still exists upstream.
pub async fn verdict(sources: &[SourceRef], category: RecordCategory, id: &str) -> Verdict {
    let mut failed = Vec::new();
    for source in sources {
        match source.fetch_single(category, id).await {
            Ok(Lookup::Found(_)) => {
                return Verdict::Confirmed {
                    by: source.name().to_string(),
                }
            }
            Ok(Lookup::NotFound) | Ok(Lookup::CapabilityAbsent) => {}
            Err(e) => {
                tracing::debug!(
                    source = %source.name(),
                    category = %category,
                    id = %id,
                    error = %e,
                    "Existence check failed, source casts no vote"
                );
                failed.push(source.name().to_string());
            }
        }
    }

    if failed.is_empty() {
        Verdict::Absent
    } else {
        Verdict::Undecided { failed }
    }
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Background task that sweeps on a fixed interval until shutdown.
///
/// The first sweep runs after [`GcConfig::first_sweep_delay`]. Returns the
/// collector's metrics.
pub async fn gc_task(
    collector: GarbageCollector,
    config: GcConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<GcMetrics> {
    let metrics = collector.metrics();

    let start = tokio::time::Instant::now() + config.first_sweep_delay;
    let mut sweep_interval = interval_at(start, config.sweep_interval);
    sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        sweep_interval_secs = config.sweep_interval.as_secs(),
        first_sweep_delay_secs = config.first_sweep_delay.as_secs(),
        "Garbage collection task started"
    );

    loop {
        tokio::select! {
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Garbage collection task received shutdown signal");
                    break;
                }
            }
            _ = sweep_interval.tick() => {
                collector.sweep().await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        sweeps = snapshot.sweeps,
        records_examined = snapshot.records_examined,
        records_deleted = snapshot.records_deleted,
        records_undecided = snapshot.records_undecided,
        categories_failed = snapshot.categories_failed,
        "Garbage collection task stopped"
    );

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use twinmesh_storage::{in_memory_stores, InMemoryStore, StoreRef};
    use twinmesh_test_utils::{fixtures, MockSource};

    async fn store_with(stores: &Stores, category: RecordCategory, ids: &[&str]) {
        for id in ids {
            let payload = match category {
                RecordCategory::Submodel => fixtures::submodel(id),
                RecordCategory::Shell => fixtures::shell(id, &[]),
                RecordCategory::ShellDescriptor => fixtures::shell_descriptor(id, "http://up"),
                RecordCategory::SubmodelDescriptor => fixtures::submodel_descriptor(id, "http://up"),
            };
            stores.get(category).upsert(id, &payload, "factory-a").await.unwrap();
        }
    }

    async fn ids(stores: &Stores, category: RecordCategory) -> Vec<String> {
        stores
            .get(category)
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.id)
            .collect()
    }

    #[test]
    fn test_config_presets() {
        assert_eq!(GcConfig::default().sweep_interval, Duration::from_secs(300));
        assert!(GcConfig::development().sweep_interval < GcConfig::production().sweep_interval);
    }

    #[tokio::test]
    async fn test_verdict_rules() {
        let has = Arc::new(MockSource::new("has"));
        has.insert(RecordCategory::Shell, fixtures::shell("urn:s:1", &[]));
        let lacks = Arc::new(MockSource::new("lacks"));
        let down = Arc::new(MockSource::new("down"));
        down.set_reachable(false);
        let blind = Arc::new(MockSource::new("blind").without_capability(RecordCategory::Shell));

        let sources: Vec<SourceRef> = vec![down.clone(), has.clone()];
        assert_eq!(
            verdict(&sources, RecordCategory::Shell, "urn:s:1").await,
            Verdict::Confirmed { by: "has".into() }
        );

        let sources: Vec<SourceRef> = vec![lacks.clone(), blind.clone()];
        assert_eq!(verdict(&sources, RecordCategory::Shell, "urn:s:1").await, Verdict::Absent);

        let sources: Vec<SourceRef> = vec![lacks, down];
        assert_eq!(
            verdict(&sources, RecordCategory::Shell, "urn:s:1").await,
            Verdict::Undecided { failed: vec!["down".into()] }
        );

        assert_eq!(verdict(&[], RecordCategory::Shell, "urn:s:1").await, Verdict::Absent);
    }

    #[tokio::test]
    async fn test_confirmation_short_circuits() {
        let first = Arc::new(MockSource::new("first"));
        first.insert(RecordCategory::Shell, fixtures::shell("urn:s:1", &[]));
        let second = Arc::new(MockSource::new("second"));
        let sources: Vec<SourceRef> = vec![first, second.clone()];

        verdict(&sources, RecordCategory::Shell, "urn:s:1").await;
        assert_eq!(second.lookup_calls(), 0);
    }

    #[tokio::test]
    async fn test_sweep_deletes_only_absent_records() {
        let stores = in_memory_stores();
        store_with(&stores, RecordCategory::Shell, &["urn:s:1", "urn:s:2"]).await;

        let source = Arc::new(MockSource::new("factory-a"));
        source.insert(RecordCategory::Shell, fixtures::shell("urn:s:1", &[]));
        let collector = GarbageCollector::new(stores.clone(), SourceSet::new(vec![source]));

        let report = collector.sweep().await;
        let shells = report.category(RecordCategory::Shell).unwrap();
        assert_eq!(shells.examined, 2);
        assert_eq!(shells.deleted, 1);
        assert_eq!(ids(&stores, RecordCategory::Shell).await, vec!["urn:s:1"]);

        let again = collector.sweep().await;
        assert_eq!(again.deleted(), 0);
        assert_eq!(collector.metrics().snapshot().records_deleted, 1);
        assert_eq!(collector.metrics().snapshot().sweeps, 2);
    }

    #[tokio::test]
    async fn test_shell_reference_keeps_submodel() {
        let stores = in_memory_stores();
        store_with(&stores, RecordCategory::Submodel, &["urn:sm:1", "urn:sm:2"]).await;
        stores
            .get(RecordCategory::Shell)
            .upsert("urn:s:1", &fixtures::shell("urn:s:1", &["urn:sm:1"]), "factory-a")
            .await
            .unwrap();

        // The source knows the shell but exposes no submodel repository.
        let source = Arc::new(
            MockSource::new("factory-a").without_capability(RecordCategory::Submodel),
        );
        source.insert(RecordCategory::Shell, fixtures::shell("urn:s:1", &["urn:sm:1"]));
        let collector = GarbageCollector::new(stores.clone(), SourceSet::new(vec![source]));

        collector.sweep().await;
        assert_eq!(ids(&stores, RecordCategory::Submodel).await, vec!["urn:sm:1"]);
        assert_eq!(ids(&stores, RecordCategory::Shell).await, vec!["urn:s:1"]);
    }

    #[tokio::test]
    async fn test_embedded_summary_keeps_submodel_descriptor() {
        let stores = in_memory_stores();
        store_with(&stores, RecordCategory::SubmodelDescriptor, &["urn:sm:1", "urn:sm:2"]).await;
        let parent = fixtures::shell_descriptor_with_submodels("urn:s:1", "http://up", &["urn:sm:1"]);
        stores
            .get(RecordCategory::ShellDescriptor)
            .upsert("urn:s:1", &parent, "factory-a")
            .await
            .unwrap();

        let source = Arc::new(MockSource::new("factory-a"));
        source.insert(RecordCategory::ShellDescriptor, parent);
        let collector = GarbageCollector::new(stores.clone(), SourceSet::new(vec![source]));

        collector.sweep().await;
        assert_eq!(ids(&stores, RecordCategory::SubmodelDescriptor).await, vec!["urn:sm:1"]);
    }

    #[tokio::test]
    async fn test_unreachable_source_prevents_deletion() {
        let stores = in_memory_stores();
        store_with(&stores, RecordCategory::Submodel, &["urn:sm:1"]).await;

        let down = Arc::new(MockSource::new("factory-b"));
        down.set_reachable(false);
        let lacks = Arc::new(MockSource::new("factory-a"));
        let collector = GarbageCollector::new(stores.clone(), SourceSet::new(vec![lacks, down]));

        let report = collector.sweep().await;
        assert_eq!(report.category(RecordCategory::Submodel).unwrap().undecided, 1);
        assert_eq!(ids(&stores, RecordCategory::Submodel).await, vec!["urn:sm:1"]);
    }

    #[tokio::test]
    async fn test_store_outage_is_contained_to_category() {
        let shells = Arc::new(InMemoryStore::new(RecordCategory::Shell));
        let submodels = Arc::new(InMemoryStore::new(RecordCategory::Submodel));
        let stores = Stores::new(
            Arc::new(InMemoryStore::new(RecordCategory::ShellDescriptor)),
            shells.clone(),
            Arc::new(InMemoryStore::new(RecordCategory::SubmodelDescriptor)),
            submodels.clone(),
        );
        store_with(&stores, RecordCategory::ShellDescriptor, &["urn:s:1"]).await;
        shells.set_available(false);

        let collector = GarbageCollector::new(stores.clone(), SourceSet::default());
        let report = collector.sweep().await;

        assert!(report.category(RecordCategory::Shell).unwrap().error.is_some());
        // Submodel references come from the shell store, so that category is abandoned too.
        assert!(report.category(RecordCategory::Submodel).unwrap().error.is_some());
        assert!(report.category(RecordCategory::ShellDescriptor).unwrap().error.is_none());
        assert!(ids(&stores, RecordCategory::ShellDescriptor).await.is_empty());
        assert_eq!(collector.metrics().snapshot().categories_failed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_sweeps_until_shutdown() {
        let stores = in_memory_stores();
        store_with(&stores, RecordCategory::Shell, &["urn:s:1"]).await;
        let collector = GarbageCollector::new(stores.clone(), SourceSet::default());
        let config = GcConfig {
            sweep_interval: Duration::from_secs(10),
            first_sweep_delay: Duration::from_secs(1),
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(gc_task(collector, config, shutdown_rx));

        tokio::time::sleep(Duration::from_secs(25)).await;
        shutdown_tx.send(true).unwrap();
        let metrics = task.await.unwrap();

        assert_eq!(metrics.snapshot().sweeps, 3);
        assert!(ids(&stores, RecordCategory::Shell).await.is_empty());
    }
}
