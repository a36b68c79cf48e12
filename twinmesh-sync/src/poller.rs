//! Source Poller
//!
//! One poller per configured remote source. Every cycle fans out one task
//! per record category, fetches the full listing from the source and
//! reconciles it into the durable stores with diff-aware bulk upserts.
//!
//! Failures are contained per category: an unreachable registry skips that
//! category for the cycle while the others proceed. A malformed record is
//! logged and skipped without affecting the rest of its batch.
//!
//! Shell descriptors and submodel descriptors gain a local endpoint pointing
//! at this service before they are written. Submodel descriptors embedded in
//! shell descriptors are also written as standalone records.
//!
//! With registration enabled, every polled shell or submodel is also
//! advertised in the local registry as a descriptor pointing at this service.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use twinmesh_core::document::{embedded_submodel_descriptors, record_id};
use twinmesh_core::{
    BulkReport, LocalEndpoints, MeshError, PollCategories, RecordCategory,
};
use twinmesh_sources::{RegistrationReport, RegistryRef, SourceRef};
use twinmesh_storage::{NewRecord, Stores};

use crate::constants::{DEFAULT_POLL_INTERVAL_SECS, DEFAULT_POLL_PAGE_SIZE};
use crate::task_group::TaskGroup;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Poller tunables shared by every source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    /// Sleep between cycles for sources without their own interval
    pub default_interval: Duration,
    /// Categories polled at all; capability absence is checked separately
    pub categories: PollCategories,
    /// Page size requested from sources
    pub page_size: usize,
    /// Advertise polled shells in the local shell registry
    pub register_shells: bool,
    /// Advertise polled submodels in the local submodel registry
    pub register_submodels: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            default_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            categories: PollCategories::default(),
            page_size: DEFAULT_POLL_PAGE_SIZE,
            register_shells: false,
            register_submodels: false,
        }
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| match s.to_lowercase().as_str() {
            "false" | "0" => false,
            "true" | "1" => true,
            _ => default,
        })
        .unwrap_or(default)
}

impl PollerConfig {
    /// Create PollerConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `TWINMESH_POLL_INTERVAL_SECS`: default sleep between cycles (default: 60)
    /// - `TWINMESH_POLL_PAGE_SIZE`: page size requested from sources (default: 100)
    /// - `TWINMESH_POLL_SHELL_DESCRIPTORS`, `TWINMESH_POLL_SHELLS`,
    ///   `TWINMESH_POLL_SUBMODEL_DESCRIPTORS`, `TWINMESH_POLL_SUBMODELS`:
    ///   set to `false` to disable a category (default: true)
    /// - `TWINMESH_REGISTER_SHELLS`, `TWINMESH_REGISTER_SUBMODELS`: set to
    ///   `true` to advertise polled records in the local registry (default: false)
    pub fn from_env() -> Self {
        let default_interval = Duration::from_secs(
            std::env::var("TWINMESH_POLL_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
        );

        let page_size = std::env::var("TWINMESH_POLL_PAGE_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|size: &usize| *size > 0)
            .unwrap_or(DEFAULT_POLL_PAGE_SIZE);

        let categories = PollCategories {
            shell_descriptors: env_flag("TWINMESH_POLL_SHELL_DESCRIPTORS", true),
            shells: env_flag("TWINMESH_POLL_SHELLS", true),
            submodel_descriptors: env_flag("TWINMESH_POLL_SUBMODEL_DESCRIPTORS", true),
            submodels: env_flag("TWINMESH_POLL_SUBMODELS", true),
        };

        Self {
            default_interval,
            categories,
            page_size,
            register_shells: env_flag("TWINMESH_REGISTER_SHELLS", false),
            register_submodels: env_flag("TWINMESH_REGISTER_SUBMODELS", false),
        }
    }

    /// Whether any polled record is advertised in a local registry.
    pub fn registers_any(&self) -> bool {
        self.register_shells || self.register_submodels
    }

    /// Short interval for development and tests.
    pub fn development() -> Self {
        Self {
            default_interval: Duration::from_secs(5),
            ..Default::default()
        }
    }
}

// ============================================================================
// STATE AND METRICS
// ============================================================================

/// Lifecycle of a poller: `Idle -> Polling -> Sleeping -> Polling -> ... -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
    Sleeping,
    Stopped,
}

#[derive(Debug, Default)]
pub struct PollerMetrics {
    pub cycles: AtomicU64,
    pub records_written: AtomicU64,
    pub records_unchanged: AtomicU64,
    pub records_failed: AtomicU64,
    pub malformed_records: AtomicU64,
    pub categories_failed: AtomicU64,
    pub descriptors_registered: AtomicU64,
    pub registrations_failed: AtomicU64,
}

impl PollerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> PollerMetricsSnapshot {
        PollerMetricsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            records_unchanged: self.records_unchanged.load(Ordering::Relaxed),
            records_failed: self.records_failed.load(Ordering::Relaxed),
            malformed_records: self.malformed_records.load(Ordering::Relaxed),
            categories_failed: self.categories_failed.load(Ordering::Relaxed),
            descriptors_registered: self.descriptors_registered.load(Ordering::Relaxed),
            registrations_failed: self.registrations_failed.load(Ordering::Relaxed),
        }
    }

    fn record_cycle(&self, cycle: &CycleReport) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        let mut total = cycle.denormalized;
        for outcome in cycle.categories.values() {
            match outcome {
                CategoryOutcome::Synced {
                    malformed,
                    report,
                    registration,
                    ..
                } => {
                    total += *report;
                    self.malformed_records
                        .fetch_add(*malformed as u64, Ordering::Relaxed);
                    self.descriptors_registered
                        .fetch_add(registration.registered(), Ordering::Relaxed);
                    self.registrations_failed
                        .fetch_add(registration.failed, Ordering::Relaxed);
                }
                CategoryOutcome::Failed(_) => {
                    self.categories_failed.fetch_add(1, Ordering::Relaxed);
                }
                CategoryOutcome::Disabled | CategoryOutcome::NoCapability => {}
            }
        }
        self.records_written.fetch_add(total.written, Ordering::Relaxed);
        self.records_unchanged.fetch_add(total.unchanged, Ordering::Relaxed);
        self.records_failed.fetch_add(total.failed, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerMetricsSnapshot {
    pub cycles: u64,
    pub records_written: u64,
    pub records_unchanged: u64,
    pub records_failed: u64,
    pub malformed_records: u64,
    pub categories_failed: u64,
    pub descriptors_registered: u64,
    pub registrations_failed: u64,
}

// ============================================================================
// CYCLE REPORT
// ============================================================================

/// What happened to one category during a cycle.
#[derive(Debug)]
pub enum CategoryOutcome {
    Synced {
        fetched: usize,
        malformed: usize,
        report: BulkReport,
        /// Local registry advertisements; empty unless registration is on.
        registration: RegistrationReport,
    },
    /// Turned off in [`PollerConfig::categories`].
    Disabled,
    /// The source does not expose this family.
    NoCapability,
    /// Fetch or write failed; retried next cycle.
    Failed(MeshError),
}

#[derive(Debug)]
pub struct CycleReport {
    pub source_name: String,
    pub categories: BTreeMap<RecordCategory, CategoryOutcome>,
    /// Standalone submodel descriptors written from shell descriptor summaries.
    pub denormalized: BulkReport,
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn outcome(&self, category: RecordCategory) -> Option<&CategoryOutcome> {
        self.categories.get(&category)
    }

    pub fn failed_categories(&self) -> Vec<RecordCategory> {
        self.categories
            .iter()
            .filter(|(_, outcome)| matches!(outcome, CategoryOutcome::Failed(_)))
            .map(|(category, _)| *category)
            .collect()
    }

    pub fn written(&self) -> u64 {
        self.denormalized.written
            + self
                .categories
                .values()
                .map(|outcome| match outcome {
                    CategoryOutcome::Synced { report, .. } => report.written,
                    _ => 0,
                })
                .sum::<u64>()
    }
}

// ============================================================================
// CATEGORY SYNC
// ============================================================================

/// Everything one category task needs, cheap to clone into the task.
#[derive(Clone)]
struct CategorySync {
    source: SourceRef,
    stores: Stores,
    local: LocalEndpoints,
    page_size: usize,
    registry: Option<RegistryRef>,
    register_shells: bool,
    register_submodels: bool,
}

impl CategorySync {
    fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Turn fetched documents into store records, skipping malformed ones.
    fn prepare(&self, category: RecordCategory, documents: Vec<Value>) -> (Vec<NewRecord>, usize) {
        let mut records = Vec::with_capacity(documents.len());
        let mut malformed = 0;
        for document in documents {
            match record_id(category, &document) {
                Ok(id) => records.push(NewRecord::new(id, document, self.source_name())),
                Err(e) => {
                    malformed += 1;
                    tracing::warn!(
                        source = %self.source_name(),
                        category = %category,
                        error = %e,
                        "Skipping malformed record"
                    );
                }
            }
        }
        (records, malformed)
    }

    /// Descriptor category and registry that polled records of `category`
    /// are advertised to, if any.
    fn registration_target(&self, category: RecordCategory) -> Option<(RecordCategory, RegistryRef)> {
        let registry = self.registry.clone()?;
        match category {
            RecordCategory::Shell if self.register_shells => {
                Some((RecordCategory::ShellDescriptor, registry))
            }
            RecordCategory::Submodel if self.register_submodels => {
                Some((RecordCategory::SubmodelDescriptor, registry))
            }
            _ => None,
        }
    }

    fn local_descriptors(&self, category: RecordCategory, records: &[NewRecord]) -> Vec<(String, Value)> {
        if self.registration_target(category).is_none() {
            return Vec::new();
        }
        records
            .iter()
            .filter_map(|record| {
                let descriptor = match category {
                    RecordCategory::Shell => self.local.shell_descriptor_for(&record.payload),
                    _ => self.local.submodel_descriptor_for(&record.payload),
                };
                match descriptor {
                    Ok(descriptor) => Some((record.id.clone(), descriptor)),
                    Err(e) => {
                        tracing::error!(
                            source = %self.source_name(),
                            id = %record.id,
                            error = %e,
                            "Cannot build local descriptor"
                        );
                        None
                    }
                }
            })
            .collect()
    }

    /// Advertise descriptors one by one; failures are logged and counted.
    async fn register(
        &self,
        category: RecordCategory,
        descriptors: Vec<(String, Value)>,
    ) -> RegistrationReport {
        let mut report = RegistrationReport::default();
        let Some((target, registry)) = self.registration_target(category) else {
            return report;
        };
        for (id, descriptor) in &descriptors {
            let result = registry.register(target, id, descriptor).await;
            if let Err(e) = &result {
                tracing::error!(
                    source = %self.source_name(),
                    category = %target,
                    id = %id,
                    error = %e,
                    "Failed to register descriptor in local registry"
                );
            }
            report.record(&result);
        }
        report
    }

    async fn run(self, category: RecordCategory) -> (CategoryOutcome, BulkReport) {
        match self.sync(category).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    source = %self.source_name(),
                    category = %category,
                    error = %e,
                    "Category skipped this cycle"
                );
                (CategoryOutcome::Failed(e), BulkReport::default())
            }
        }
    }

    async fn sync(&self, category: RecordCategory) -> Result<(CategoryOutcome, BulkReport), MeshError> {
        let mut documents = self.source.fetch_all(category, self.page_size).await?;
        let fetched = documents.len();

        if category.is_descriptor() {
            for document in documents.iter_mut() {
                match category {
                    RecordCategory::ShellDescriptor => {
                        self.local.apply_to_shell_descriptor(document);
                    }
                    _ => {
                        self.local.apply_to_submodel_descriptor(document);
                    }
                }
            }
        }

        let (records, mut malformed) = self.prepare(category, documents);
        let descriptors = self.local_descriptors(category, &records);
        let store = self.stores.get(category);

        let (report, denormalized) = if category == RecordCategory::ShellDescriptor {
            let embedded: Vec<Value> = records
                .iter()
                .flat_map(|record| embedded_submodel_descriptors(&record.payload).iter().cloned())
                .collect();
            let (embedded, embedded_malformed) =
                self.prepare(RecordCategory::SubmodelDescriptor, embedded);
            malformed += embedded_malformed;

            let submodel_descriptors = self.stores.get(RecordCategory::SubmodelDescriptor);
            let (report, denormalized) = tokio::join!(
                store.bulk_upsert(records),
                submodel_descriptors.bulk_upsert(embedded),
            );
            let denormalized = denormalized.unwrap_or_else(|e| {
                tracing::warn!(
                    source = %self.source_name(),
                    error = %e,
                    "Failed to write embedded submodel descriptors"
                );
                BulkReport::default()
            });
            (report?, denormalized)
        } else {
            (store.bulk_upsert(records).await?, BulkReport::default())
        };
        let registration = self.register(category, descriptors).await;

        tracing::info!(
            source = %self.source_name(),
            category = %category,
            count = fetched,
            written = report.written,
            unchanged = report.unchanged,
            failed = report.failed,
            malformed,
            registered = registration.registered(),
            "Category synchronized"
        );

        Ok((
            CategoryOutcome::Synced {
                fetched,
                malformed,
                report,
                registration,
            },
            denormalized,
        ))
    }
}

// ============================================================================
// POLLER
// ============================================================================

pub struct SourcePoller {
    sync: CategorySync,
    interval: Duration,
    categories: PollCategories,
    metrics: Arc<PollerMetrics>,
}

impl SourcePoller {
    pub fn new(
        source: SourceRef,
        stores: Stores,
        local: LocalEndpoints,
        interval: Duration,
        config: &PollerConfig,
    ) -> Self {
        Self {
            sync: CategorySync {
                source,
                stores,
                local,
                page_size: config.page_size.max(1),
                registry: None,
                register_shells: config.register_shells,
                register_submodels: config.register_submodels,
            },
            interval,
            categories: config.categories,
            metrics: Arc::new(PollerMetrics::new()),
        }
    }

    /// Registry used when [`PollerConfig::register_shells`] or
    /// [`PollerConfig::register_submodels`] is set.
    pub fn with_registry(mut self, registry: RegistryRef) -> Self {
        self.sync.registry = Some(registry);
        self
    }

    pub fn source_name(&self) -> &str {
        self.sync.source_name()
    }

    pub fn metrics(&self) -> Arc<PollerMetrics> {
        self.metrics.clone()
    }

    /// Run one reconcile cycle: every category concurrently, joined before
    /// returning.
    pub async fn run_cycle(&self) -> CycleReport {
        let started = Instant::now();
        let source = &self.sync.source;
        let mut categories = BTreeMap::new();
        let mut group = TaskGroup::new(format!("poll:{}", source.name()));

        for category in RecordCategory::ALL {
            if !self.categories.is_enabled(category) {
                categories.insert(category, CategoryOutcome::Disabled);
            } else if !source.has_capability(category) {
                tracing::debug!(source = %source.name(), category = %category, "No capability, skipping");
                categories.insert(category, CategoryOutcome::NoCapability);
            } else {
                let sync = self.sync.clone();
                group.spawn(category.collection_name(), async move {
                    (category, sync.run(category).await)
                });
            }
        }

        let mut denormalized = BulkReport::default();
        for task in group.join_all().await {
            match task.result {
                Ok((category, (outcome, embedded))) => {
                    denormalized += embedded;
                    categories.insert(category, outcome);
                }
                Err(e) => {
                    // Tasks are named after their category's collection.
                    if let Ok(category) = task.name.parse::<RecordCategory>() {
                        categories.insert(category, CategoryOutcome::Failed(e));
                    }
                }
            }
        }

        let report = CycleReport {
            source_name: source.name().to_string(),
            categories,
            denormalized,
            elapsed: started.elapsed(),
        };
        self.metrics.record_cycle(&report);

        tracing::info!(
            source = %report.source_name,
            written = report.written(),
            failed_categories = report.failed_categories().len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Poll cycle completed"
        );
        report
    }

    /// Start the poll loop in the background.
    pub fn spawn(self) -> PollerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(PollerState::Idle);
        let (cycles_tx, cycles_rx) = watch::channel(0u64);
        let source_name = self.source_name().to_string();
        let metrics = self.metrics.clone();
        let task = tokio::spawn(self.run(stop_rx, state_tx, cycles_tx));

        PollerHandle {
            source_name,
            stop: stop_tx,
            state: state_rx,
            cycles: cycles_rx,
            metrics,
            task,
        }
    }

    async fn run(
        self,
        mut stop_rx: watch::Receiver<bool>,
        state: watch::Sender<PollerState>,
        cycles: watch::Sender<u64>,
    ) {
        tracing::info!(
            source = %self.source_name(),
            interval_secs = self.interval.as_secs(),
            "Source poller started"
        );

        loop {
            if *stop_rx.borrow() {
                break;
            }

            state.send_replace(PollerState::Polling);
            // A started cycle always runs to completion.
            self.run_cycle().await;
            cycles.send_modify(|count| *count += 1);

            if *stop_rx.borrow() {
                break;
            }

            state.send_replace(PollerState::Sleeping);
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = stop_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        state.send_replace(PollerState::Stopped);
        let snapshot = self.metrics.snapshot();
        tracing::info!(
            source = %self.source_name(),
            cycles = snapshot.cycles,
            records_written = snapshot.records_written,
            records_unchanged = snapshot.records_unchanged,
            categories_failed = snapshot.categories_failed,
            "Source poller stopped"
        );
    }
}

/// Handle to a running poller.
pub struct PollerHandle {
    source_name: String,
    stop: watch::Sender<bool>,
    state: watch::Receiver<PollerState>,
    cycles: watch::Receiver<u64>,
    metrics: Arc<PollerMetrics>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    pub fn metrics(&self) -> PollerMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Wait until at least `count` cycles have completed.
    pub async fn wait_for_cycles(&self, count: u64) {
        let mut cycles = self.cycles.clone();
        let _ = cycles.wait_for(|done| *done >= count).await;
    }

    /// Ask the poller to stop and wait for it. A cycle in progress finishes
    /// first; a sleep is cut short.
    pub async fn stop(mut self) {
        let _ = self.stop.send(true);
        if let Err(e) = (&mut self.task).await {
            tracing::error!(source = %self.source_name, error = %e, "Source poller task failed");
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        let _ = self.stop.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use twinmesh_core::document::{endpoint_hrefs, LOCAL_INTERFACE};
    use twinmesh_core::{SourceError, StoreError};
    use twinmesh_sources::{DescriptorRegistry, Registration};
    use twinmesh_storage::{in_memory_stores, InMemoryStore};
    use twinmesh_test_utils::{fixtures, MockSource};

    const UPSTREAM: &str = "http://factory-a.example";
    const LOCAL: &str = "http://twinmesh.local";

    fn factory_a() -> Arc<MockSource> {
        Arc::new(
            MockSource::new("factory-a")
                .with_records(
                    RecordCategory::ShellDescriptor,
                    vec![fixtures::shell_descriptor_with_submodels(
                        "urn:s:1",
                        UPSTREAM,
                        &["urn:sm:1"],
                    )],
                )
                .with_records(RecordCategory::Shell, vec![fixtures::shell("urn:s:1", &["urn:sm:1"])])
                .with_records(RecordCategory::Submodel, vec![fixtures::submodel("urn:sm:1")]),
        )
    }

    fn poller(source: Arc<MockSource>, stores: &Stores, config: &PollerConfig) -> SourcePoller {
        SourcePoller::new(
            source,
            stores.clone(),
            LocalEndpoints::new(LOCAL),
            Duration::from_millis(20),
            config,
        )
    }

    #[tokio::test]
    async fn test_cycle_writes_every_category() {
        let stores = in_memory_stores();
        let report = poller(factory_a(), &stores, &PollerConfig::default())
            .run_cycle()
            .await;

        assert!(report.failed_categories().is_empty());
        assert_eq!(report.denormalized.written, 1);

        let descriptor = stores
            .get(RecordCategory::ShellDescriptor)
            .get("urn:s:1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(descriptor.source_name, "factory-a");
        assert_eq!(descriptor.payload["endpoints"][0]["interface"], LOCAL_INTERFACE);
        assert!(endpoint_hrefs(&descriptor.payload).any(|href| href.starts_with(UPSTREAM)));

        let denormalized = stores
            .get(RecordCategory::SubmodelDescriptor)
            .get("urn:sm:1")
            .await
            .unwrap()
            .expect("embedded descriptor written");
        assert_eq!(denormalized.payload["endpoints"][0]["interface"], LOCAL_INTERFACE);
    }

    #[tokio::test]
    async fn test_second_cycle_is_unchanged() {
        let stores = in_memory_stores();
        let poller = poller(factory_a(), &stores, &PollerConfig::default());
        poller.run_cycle().await;
        let second = poller.run_cycle().await;

        assert_eq!(second.written(), 0);
        let submodel = stores
            .get(RecordCategory::Submodel)
            .get("urn:sm:1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(submodel.revision, 1);
        assert_eq!(poller.metrics().snapshot().cycles, 2);
    }

    #[tokio::test]
    async fn test_failing_category_does_not_abort_others() {
        let stores = in_memory_stores();
        let source = factory_a();
        source.set_category_failing(RecordCategory::Shell, true);

        let report = poller(source, &stores, &PollerConfig::default()).run_cycle().await;

        assert_eq!(report.failed_categories(), vec![RecordCategory::Shell]);
        assert!(matches!(
            report.outcome(RecordCategory::Shell),
            Some(CategoryOutcome::Failed(MeshError::Source(SourceError::Unavailable { .. })))
        ));
        assert!(stores.get(RecordCategory::Submodel).get("urn:sm:1").await.unwrap().is_some());
        assert!(stores.get(RecordCategory::Shell).get("urn:s:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unavailable_store_skips_only_its_category() {
        let shells = Arc::new(InMemoryStore::new(RecordCategory::Shell));
        let stores = Stores::new(
            Arc::new(InMemoryStore::new(RecordCategory::ShellDescriptor)),
            shells.clone(),
            Arc::new(InMemoryStore::new(RecordCategory::SubmodelDescriptor)),
            Arc::new(InMemoryStore::new(RecordCategory::Submodel)),
        );
        let poller = poller(factory_a(), &stores, &PollerConfig::default());

        shells.set_available(false);
        let report = poller.run_cycle().await;
        assert_eq!(report.failed_categories(), vec![RecordCategory::Shell]);
        assert!(matches!(
            report.outcome(RecordCategory::Shell),
            Some(CategoryOutcome::Failed(MeshError::Store(StoreError::Unavailable { .. })))
        ));
        for category in [
            RecordCategory::ShellDescriptor,
            RecordCategory::SubmodelDescriptor,
            RecordCategory::Submodel,
        ] {
            assert!(matches!(
                report.outcome(category),
                Some(CategoryOutcome::Synced { .. })
            ));
        }
        assert!(stores.get(RecordCategory::Submodel).get("urn:sm:1").await.unwrap().is_some());

        shells.set_available(true);
        let report = poller.run_cycle().await;
        assert!(report.failed_categories().is_empty());
        assert!(matches!(
            report.outcome(RecordCategory::Shell),
            Some(CategoryOutcome::Synced { .. })
        ));
        assert!(stores.get(RecordCategory::Shell).get("urn:s:1").await.unwrap().is_some());
        assert_eq!(poller.metrics().snapshot().categories_failed, 1);
    }

    #[derive(Default)]
    struct RecordingRegistry {
        calls: std::sync::Mutex<Vec<(RecordCategory, String, Value)>>,
        reject: bool,
    }

    #[async_trait::async_trait]
    impl DescriptorRegistry for RecordingRegistry {
        async fn register(
            &self,
            category: RecordCategory,
            id: &str,
            descriptor: &Value,
        ) -> Result<Registration, SourceError> {
            self.calls
                .lock()
                .unwrap()
                .push((category, id.to_string(), descriptor.clone()));
            if self.reject {
                return Err(SourceError::Rejected {
                    source_name: "local-registry".to_string(),
                    path: "/shell-descriptors".to_string(),
                    status: 400,
                });
            }
            Ok(Registration::Created)
        }
    }

    #[tokio::test]
    async fn test_polled_shells_are_registered_locally() {
        let stores = in_memory_stores();
        let registry = Arc::new(RecordingRegistry::default());
        let config = PollerConfig {
            register_shells: true,
            ..PollerConfig::default()
        };

        let report = poller(factory_a(), &stores, &config)
            .with_registry(registry.clone())
            .run_cycle()
            .await;

        let calls = registry.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        let (category, id, descriptor) = &calls[0];
        assert_eq!(*category, RecordCategory::ShellDescriptor);
        assert_eq!(id, "urn:s:1");
        assert!(endpoint_hrefs(descriptor).all(|href| href.starts_with(LOCAL)));
        assert_eq!(descriptor["submodelDescriptors"][0]["id"], "urn:sm:1");

        match report.outcome(RecordCategory::Shell) {
            Some(CategoryOutcome::Synced { registration, .. }) => {
                assert_eq!(registration.created, 1)
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        match report.outcome(RecordCategory::Submodel) {
            Some(CategoryOutcome::Synced { registration, .. }) => {
                assert_eq!(*registration, RegistrationReport::default())
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_registration_is_off_by_default() {
        let stores = in_memory_stores();
        let registry = Arc::new(RecordingRegistry::default());

        poller(factory_a(), &stores, &PollerConfig::default())
            .with_registry(registry.clone())
            .run_cycle()
            .await;

        assert!(registry.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_registry_failure_keeps_category_synced() {
        let stores = in_memory_stores();
        let registry = Arc::new(RecordingRegistry {
            reject: true,
            ..Default::default()
        });
        let config = PollerConfig {
            register_submodels: true,
            ..PollerConfig::default()
        };
        let poller = poller(factory_a(), &stores, &config).with_registry(registry.clone());

        let report = poller.run_cycle().await;

        assert!(report.failed_categories().is_empty());
        let calls = registry.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, RecordCategory::SubmodelDescriptor);
        assert!(stores.get(RecordCategory::Submodel).get("urn:sm:1").await.unwrap().is_some());
        assert_eq!(poller.metrics().snapshot().registrations_failed, 1);
    }

    #[tokio::test]
    async fn test_disabled_and_absent_categories_are_skipped() {
        let stores = in_memory_stores();
        let source = Arc::new(
            MockSource::new("registry-only")
                .without_capability(RecordCategory::Submodel)
                .with_records(RecordCategory::Shell, vec![fixtures::shell("urn:s:1", &[])]),
        );
        let mut config = PollerConfig::default();
        config.categories.shells = false;

        let report = poller(source.clone(), &stores, &config).run_cycle().await;

        assert!(matches!(report.outcome(RecordCategory::Shell), Some(CategoryOutcome::Disabled)));
        assert!(matches!(
            report.outcome(RecordCategory::Submodel),
            Some(CategoryOutcome::NoCapability)
        ));
        assert!(stores.get(RecordCategory::Shell).get("urn:s:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_records_are_skipped() {
        let stores = in_memory_stores();
        let source = Arc::new(MockSource::new("sloppy").with_records(
            RecordCategory::Submodel,
            vec![json!({"id": ""}), fixtures::submodel("urn:sm:ok")],
        ));

        let report = poller(source, &stores, &PollerConfig::default()).run_cycle().await;

        match report.outcome(RecordCategory::Submodel) {
            Some(CategoryOutcome::Synced {
                fetched,
                malformed,
                report,
                ..
            }) => {
                assert_eq!(*fetched, 2);
                assert_eq!(*malformed, 1);
                assert_eq!(report.written, 1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stop_waits_for_running_cycle() {
        let stores = in_memory_stores();
        let source = factory_a();
        source.set_latency(Duration::from_millis(150));

        let handle = poller(source, &stores, &PollerConfig::default()).spawn();
        let mut state = handle.state.clone();
        let _ = state.wait_for(|s| *s == PollerState::Polling).await;

        let metrics = handle.metrics.clone();
        handle.stop().await;

        assert_eq!(metrics.snapshot().cycles, 1);
        assert!(stores.get(RecordCategory::Shell).get("urn:s:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_poller_keeps_cycling_until_stopped() {
        let stores = in_memory_stores();
        let handle = poller(factory_a(), &stores, &PollerConfig::default()).spawn();

        tokio::time::timeout(Duration::from_secs(5), handle.wait_for_cycles(3))
            .await
            .unwrap();
        assert!(matches!(
            handle.state(),
            PollerState::Polling | PollerState::Sleeping
        ));

        let mut state = handle.state.clone();
        handle.stop().await;
        assert_eq!(*state.borrow_and_update(), PollerState::Stopped);
    }
}
