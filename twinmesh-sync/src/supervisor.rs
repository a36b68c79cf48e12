//! Poller supervision
//!
//! [`PollerSupervisor::reconcile`] brings the set of running pollers in line
//! with a [`MeshConfig`]: allow-listed sources get a poller, removed or
//! changed sources have theirs stopped (and restarted when changed). The
//! shared [`SourceSet`] seen by garbage collection always holds every
//! configured source, allow-listed or not.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use twinmesh_core::{ConfigError, LocalEndpoints, MeshConfig, PollCategories, SourceConfig};
use twinmesh_sources::{RegistryRef, SourceFactory, SourceRef};
use twinmesh_storage::Stores;

use crate::poller::{PollerConfig, PollerHandle, SourcePoller};

/// Currently configured remote sources, shared between the supervisor and
/// the garbage collector.
#[derive(Clone, Default)]
pub struct SourceSet {
    sources: Arc<RwLock<Vec<SourceRef>>>,
}

impl SourceSet {
    pub fn new(sources: Vec<SourceRef>) -> Self {
        Self {
            sources: Arc::new(RwLock::new(sources)),
        }
    }

    pub fn replace(&self, sources: Vec<SourceRef>) {
        *self.sources.write().unwrap_or_else(PoisonError::into_inner) = sources;
    }

    /// Sources at this moment, in configuration order.
    pub fn snapshot(&self) -> Vec<SourceRef> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .map(|source| source.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SourceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSet").field("sources", &self.names()).finish()
    }
}

/// Everything that, when changed, requires a poller restart.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PollerSpec {
    source: SourceConfig,
    service_base_url: String,
    categories: PollCategories,
    page_size: usize,
}

struct Running {
    spec: PollerSpec,
    handle: PollerHandle,
}

/// Changes applied by one [`PollerSupervisor::reconcile`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
    pub restarted: Vec<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty() && self.restarted.is_empty()
    }
}

pub struct PollerSupervisor {
    factory: Arc<dyn SourceFactory>,
    stores: Stores,
    config: PollerConfig,
    registry: Option<RegistryRef>,
    sources: SourceSet,
    built: HashMap<String, (SourceConfig, SourceRef)>,
    running: HashMap<String, Running>,
}

impl PollerSupervisor {
    pub fn new(factory: Arc<dyn SourceFactory>, stores: Stores, config: PollerConfig) -> Self {
        Self {
            factory,
            stores,
            config,
            registry: None,
            sources: SourceSet::default(),
            built: HashMap::new(),
            running: HashMap::new(),
        }
    }

    /// Local registry handed to every poller started from now on.
    pub fn with_registry(mut self, registry: RegistryRef) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Shared handle to the configured sources.
    pub fn sources(&self) -> SourceSet {
        self.sources.clone()
    }

    /// Names of sources with a running poller, sorted.
    pub fn running(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .running
            .values()
            .map(|running| running.handle.source_name().to_string())
            .collect();
        names.sort();
        names
    }

    pub fn handle(&self, source_name: &str) -> Option<&PollerHandle> {
        self.running
            .get(&source_name.to_lowercase())
            .map(|running| &running.handle)
    }

    /// Apply `mesh`. Invalid configuration is rejected before anything
    /// changes.
    pub async fn reconcile(&mut self, mesh: &MeshConfig) -> Result<ReconcileReport, ConfigError> {
        mesh.validate()?;

        // Build every adapter first so a failing one leaves the old state intact.
        let mut built = HashMap::new();
        let mut sources = Vec::with_capacity(mesh.sources.len());
        for config in &mesh.sources {
            let key = config.name.to_lowercase();
            let source = match self.built.get(&key) {
                Some((previous, source)) if previous == config => source.clone(),
                _ => self.factory.build(config, mesh.request_timeout())?,
            };
            sources.push(source.clone());
            built.insert(key, (config.clone(), source));
        }
        self.built = built;
        self.sources.replace(sources);

        let mut desired: HashMap<String, PollerSpec> = mesh
            .polled_sources()
            .map(|config| {
                (
                    config.name.to_lowercase(),
                    PollerSpec {
                        source: config.clone(),
                        service_base_url: mesh.service_base_url.clone(),
                        categories: self.config.categories.intersect(&mesh.poll_categories),
                        page_size: mesh.page_size,
                    },
                )
            })
            .collect();

        let mut report = ReconcileReport::default();

        let keys: Vec<String> = self.running.keys().cloned().collect();
        for key in keys {
            let keep = matches!(desired.get(&key), Some(spec) if self.running[&key].spec == *spec);
            if keep {
                desired.remove(&key);
                continue;
            }
            if let Some(running) = self.running.remove(&key) {
                let name = running.spec.source.name.clone();
                running.handle.stop().await;
                if desired.contains_key(&key) {
                    report.restarted.push(name);
                } else {
                    tracing::info!(source = %name, "Poller stopped, source no longer polled");
                    report.stopped.push(name);
                }
            }
        }

        let mut to_start: Vec<(String, PollerSpec)> = desired.into_iter().collect();
        to_start.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, spec) in to_start {
            let Some((_, source)) = self.built.get(&key) else {
                continue;
            };
            let handle = self.start_poller(source.clone(), &spec);
            let name = spec.source.name.clone();
            if !report.restarted.contains(&name) {
                report.started.push(name);
            }
            self.running.insert(key, Running { spec, handle });
        }

        tracing::info!(
            sources = self.sources.len(),
            pollers = self.running.len(),
            started = report.started.len(),
            stopped = report.stopped.len(),
            restarted = report.restarted.len(),
            "Pollers reconciled"
        );
        Ok(report)
    }

    fn start_poller(&self, source: SourceRef, spec: &PollerSpec) -> PollerHandle {
        let config = PollerConfig {
            categories: spec.categories,
            page_size: spec.page_size,
            ..self.config.clone()
        };
        let interval = spec.source.polling_interval(self.config.default_interval);
        let poller = SourcePoller::new(
            source,
            self.stores.clone(),
            LocalEndpoints::new(spec.service_base_url.clone()),
            interval,
            &config,
        );
        let poller = match &self.registry {
            Some(registry) => poller.with_registry(registry.clone()),
            None => poller,
        };
        poller.spawn()
    }

    /// Stop every poller and wait for them.
    pub async fn shutdown(mut self) {
        let handles: Vec<PollerHandle> = self
            .running
            .drain()
            .map(|(_, running)| running.handle)
            .collect();
        futures_util::future::join_all(handles.into_iter().map(PollerHandle::stop)).await;
        tracing::info!("All pollers stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twinmesh_storage::in_memory_stores;
    use twinmesh_test_utils::{fixtures, MockSource, MockSourceFactory};

    fn mesh(names: &[&str]) -> MeshConfig {
        MeshConfig::new(
            "http://twinmesh.local",
            names
                .iter()
                .map(|name| fixtures::source_config(name, &format!("http://{}.example", name)))
                .collect(),
        )
    }

    fn supervisor(names: &[&str]) -> (PollerSupervisor, Arc<MockSourceFactory>) {
        let factory = Arc::new(MockSourceFactory::new());
        for name in names {
            factory.register(Arc::new(MockSource::new(*name)));
        }
        let supervisor =
            PollerSupervisor::new(factory.clone(), in_memory_stores(), PollerConfig::development());
        (supervisor, factory)
    }

    #[tokio::test]
    async fn test_reconcile_starts_and_stops_pollers() {
        let (mut supervisor, _) = supervisor(&["factory-a", "factory-b"]);

        let report = supervisor.reconcile(&mesh(&["factory-a", "factory-b"])).await.unwrap();
        assert_eq!(report.started, vec!["factory-a", "factory-b"]);
        assert_eq!(supervisor.running(), vec!["factory-a", "factory-b"]);

        let report = supervisor.reconcile(&mesh(&["factory-a"])).await.unwrap();
        assert_eq!(report.stopped, vec!["factory-b"]);
        assert_eq!(supervisor.running(), vec!["factory-a"]);
        assert_eq!(supervisor.sources().names(), vec!["factory-a"]);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_unchanged_config_is_a_noop() {
        let (mut supervisor, factory) = supervisor(&["factory-a"]);
        supervisor.reconcile(&mesh(&["factory-a"])).await.unwrap();
        let report = supervisor.reconcile(&mesh(&["factory-a"])).await.unwrap();

        assert!(report.is_noop());
        assert_eq!(factory.builds(), 1);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_allow_list_limits_pollers_not_sources() {
        let (mut supervisor, _) = supervisor(&["factory-a", "factory-b"]);
        let mut config = mesh(&["factory-a", "factory-b"]);
        config.polling_allow_list = vec!["FACTORY-B".to_string()];

        supervisor.reconcile(&config).await.unwrap();
        assert_eq!(supervisor.running(), vec!["factory-b"]);
        assert_eq!(supervisor.sources().len(), 2);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_changed_source_is_restarted() {
        let (mut supervisor, _) = supervisor(&["factory-a"]);
        supervisor.reconcile(&mesh(&["factory-a"])).await.unwrap();

        let mut changed = mesh(&["factory-a"]);
        changed.sources[0].polling_interval_secs = Some(5);
        let report = supervisor.reconcile(&changed).await.unwrap();

        assert_eq!(report.restarted, vec!["factory-a"]);
        assert!(report.started.is_empty());
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_config_changes_nothing() {
        let (mut supervisor, _) = supervisor(&["factory-a"]);
        supervisor.reconcile(&mesh(&["factory-a"])).await.unwrap();

        let duplicate = mesh(&["factory-a", "Factory-A"]);
        assert!(matches!(
            supervisor.reconcile(&duplicate).await,
            Err(ConfigError::DuplicateSource { .. })
        ));
        assert_eq!(supervisor.running(), vec!["factory-a"]);
        supervisor.shutdown().await;
    }
}
