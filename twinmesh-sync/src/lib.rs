//! twinmesh Sync - Pollers, Garbage Collection and the Local Read API
//!
//! Background machinery that keeps the durable stores in step with the
//! configured remote sources:
//! - [`SourcePoller`]: one per allow-listed source, pulls all four categories
//!   every cycle and writes them with diff-aware upserts
//! - [`PollerSupervisor`]: reconciles running pollers with a [`MeshConfig`]
//! - [`GarbageCollector`]: deletes records no source still has
//! - [`ReadApi`]: paginated queries over the live mirrors
//!
//! [`SyncEngine`] starts all of them in order for one process.
//!
//! [`MeshConfig`]: twinmesh_core::MeshConfig

pub mod constants;
pub mod engine;
pub mod gc;
pub mod poller;
pub mod read_api;
pub mod supervisor;
pub mod task_group;
pub mod telemetry;

pub use constants::*;
pub use engine::{EngineConfig, SyncEngine};
pub use gc::{
    gc_task, verdict, CategorySweep, GarbageCollector, GcConfig, GcMetrics, GcMetricsSnapshot,
    GcReport, Verdict,
};
pub use poller::{
    CategoryOutcome, CycleReport, PollerConfig, PollerHandle, PollerMetrics, PollerMetricsSnapshot,
    PollerState, SourcePoller,
};
pub use read_api::{ListPage, ListQuery, ReadApi};
pub use supervisor::{PollerSupervisor, ReconcileReport, SourceSet};
pub use task_group::{TaskGroup, TaskOutcome};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
