//! Sync engine
//!
//! Wires the long-lived pieces together for one process. Start-up order:
//!
//! 1. live mirrors bootstrap from the stores (the read API is usable once
//!    [`SyncEngine::start`] returns)
//! 2. the supervisor builds the sources and starts the pollers
//! 3. the garbage-collection task is spawned
//!
//! Shutdown runs the same steps in reverse.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use twinmesh_core::{ConfigError, MeshConfig, MeshError};
use twinmesh_sources::{HttpRegistry, LocalRegistryConfig, RegistryRef, SourceFactory};
use twinmesh_storage::{MirrorConfig, Mirrors, Stores};

use crate::gc::{gc_task, GarbageCollector, GcConfig, GcMetrics};
use crate::poller::PollerConfig;
use crate::read_api::ReadApi;
use crate::supervisor::{PollerSupervisor, ReconcileReport, SourceSet};

/// Tunables for every background component.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub poller: PollerConfig,
    pub gc: GcConfig,
    pub mirror: MirrorConfig,
    /// Only used when the poller config enables registration.
    pub registry: LocalRegistryConfig,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            poller: PollerConfig::from_env(),
            gc: GcConfig::from_env(),
            mirror: MirrorConfig::from_env(),
            registry: LocalRegistryConfig::from_env(),
        }
    }

    pub fn development() -> Self {
        Self {
            poller: PollerConfig::development(),
            gc: GcConfig::development(),
            mirror: MirrorConfig::fast(),
            registry: LocalRegistryConfig::default(),
        }
    }

    fn local_registry(&self) -> Result<Option<RegistryRef>, ConfigError> {
        if !self.poller.registers_any() {
            return Ok(None);
        }
        self.registry
            .validate(self.poller.register_shells, self.poller.register_submodels)?;
        Ok(Some(Arc::new(HttpRegistry::from_config(&self.registry)?)))
    }
}

pub struct SyncEngine {
    stores: Stores,
    mirrors: Arc<Mirrors>,
    supervisor: PollerSupervisor,
    collector: GarbageCollector,
    gc_shutdown: watch::Sender<bool>,
    gc_task: JoinHandle<Arc<GcMetrics>>,
}

impl SyncEngine {
    pub async fn start(
        mesh: &MeshConfig,
        stores: Stores,
        factory: Arc<dyn SourceFactory>,
        config: EngineConfig,
    ) -> Result<Self, MeshError> {
        mesh.validate()?;
        let registry = config.local_registry()?;

        let mirrors = Arc::new(Mirrors::start(&stores, config.mirror.clone()).await?);
        tracing::info!("Live mirrors bootstrapped");

        let mut supervisor = PollerSupervisor::new(factory, stores.clone(), config.poller.clone());
        if let Some(registry) = registry {
            tracing::info!(
                shells = config.poller.register_shells,
                submodels = config.poller.register_submodels,
                "Local registry registration enabled"
            );
            supervisor = supervisor.with_registry(registry);
        }
        if let Err(e) = supervisor.reconcile(mesh).await {
            supervisor.shutdown().await;
            stop_mirrors(mirrors).await;
            return Err(e.into());
        }

        let collector = GarbageCollector::new(stores.clone(), supervisor.sources());
        let (gc_shutdown, shutdown_rx) = watch::channel(false);
        let gc_task = tokio::spawn(gc_task(collector.clone(), config.gc.clone(), shutdown_rx));

        tracing::info!(
            sources = supervisor.sources().len(),
            pollers = supervisor.running().len(),
            "Sync engine started"
        );

        Ok(Self {
            stores,
            mirrors,
            supervisor,
            collector,
            gc_shutdown,
            gc_task,
        })
    }

    pub fn read_api(&self) -> ReadApi {
        ReadApi::new(self.mirrors.clone())
    }

    pub fn mirrors(&self) -> &Mirrors {
        &self.mirrors
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn sources(&self) -> SourceSet {
        self.supervisor.sources()
    }

    pub fn supervisor(&self) -> &PollerSupervisor {
        &self.supervisor
    }

    /// The collector used by the background task, for on-demand sweeps.
    pub fn collector(&self) -> &GarbageCollector {
        &self.collector
    }

    /// Apply a new configuration to the running engine.
    pub async fn reconcile(&mut self, mesh: &MeshConfig) -> Result<ReconcileReport, ConfigError> {
        self.supervisor.reconcile(mesh).await
    }

    pub async fn shutdown(self) {
        let _ = self.gc_shutdown.send(true);
        if let Err(e) = self.gc_task.await {
            tracing::error!(error = %e, "Garbage collection task failed");
        }
        self.supervisor.shutdown().await;
        stop_mirrors(self.mirrors).await;
        tracing::info!("Sync engine stopped");
    }
}

async fn stop_mirrors(mirrors: Arc<Mirrors>) {
    match Arc::try_unwrap(mirrors) {
        Ok(mirrors) => mirrors.stop().await,
        // Read handles still alive; their mirrors stop when the last one drops.
        Err(_) => tracing::debug!("Mirrors still shared, leaving them to drop"),
    }
}
