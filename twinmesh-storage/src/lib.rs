//! twinmesh Storage - Durable Stores and Live Mirrors
//!
//! One [`DurableStore`] collection per record category, each with a
//! gapless change log. The LMDB backend is the production store; the
//! in-memory backend backs tests and ephemeral deployments.
//! [`LiveMirror`] keeps an in-process replica of a collection current by
//! following its change log.

pub mod config;
pub mod lmdb;
pub mod memory;
pub mod mirror;
pub mod notifier;
pub mod store;
pub mod subscription;

pub use config::{
    MirrorConfig, StoreConfig, DEFAULT_BULK_CAP, DEFAULT_CHANGE_BATCH_SIZE,
    DEFAULT_IDLE_POLL_INTERVAL_MS, DEFAULT_MAP_SIZE_MB, DEFAULT_RECONNECT_INITIAL_BACKOFF_MS,
    DEFAULT_RECONNECT_MAX_BACKOFF_MS, DEFAULT_STORE_PATH,
};
pub use lmdb::{open_lmdb_stores, LmdbStore};
pub use memory::{in_memory_stores, InMemoryStore};
pub use mirror::{LiveMirror, MirrorMetrics, MirrorMetricsSnapshot, Mirrors, Snapshot};
pub use notifier::{ChangeNotifier, DEFAULT_NOTIFICATION_CAPACITY};
pub use store::{DurableStore, NewRecord, StoreRef, Stores};
pub use subscription::{ChangeSubscription, SubscriptionEvent};
