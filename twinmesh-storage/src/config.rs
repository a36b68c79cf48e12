//! Storage and mirror tunables
//!
//! Both configs follow the same pattern: `Default` uses the constants below,
//! `from_env()` overrides individual values from `TWINMESH_*` variables and
//! silently keeps the default for unset or unparsable ones.

use std::path::PathBuf;
use std::time::Duration;

/// Maximum records per sub-batch of a bulk upsert.
pub const DEFAULT_BULK_CAP: usize = 25_000;

/// Default LMDB map size in megabytes.
pub const DEFAULT_MAP_SIZE_MB: usize = 4096;

/// Default directory of the LMDB environment.
pub const DEFAULT_STORE_PATH: &str = "./data/twinmesh";

/// Change-log entries fetched per subscription round trip.
pub const DEFAULT_CHANGE_BATCH_SIZE: usize = 500;

/// Maximum wait for a change signal before re-reading the log.
pub const DEFAULT_IDLE_POLL_INTERVAL_MS: u64 = 1_000;

/// First delay after a failed change-log read.
pub const DEFAULT_RECONNECT_INITIAL_BACKOFF_MS: u64 = 100;

/// Upper bound of the delay between failed change-log reads.
pub const DEFAULT_RECONNECT_MAX_BACKOFF_MS: u64 = 30_000;

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Configuration of the durable store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Directory of the LMDB environment.
    pub path: PathBuf,
    pub map_size_mb: usize,
    /// Bulk upserts above this size are split into concurrent sub-batches.
    pub bulk_cap: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STORE_PATH),
            map_size_mb: DEFAULT_MAP_SIZE_MB,
            bulk_cap: DEFAULT_BULK_CAP,
        }
    }
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Create StoreConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `TWINMESH_STORE_PATH`: LMDB directory (default: ./data/twinmesh)
    /// - `TWINMESH_STORE_MAP_SIZE_MB`: LMDB map size (default: 4096)
    /// - `TWINMESH_STORE_BULK_CAP`: bulk sub-batch size (default: 25000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            path: std::env::var("TWINMESH_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.path),
            map_size_mb: env_parse("TWINMESH_STORE_MAP_SIZE_MB").unwrap_or(defaults.map_size_mb),
            bulk_cap: env_parse::<usize>("TWINMESH_STORE_BULK_CAP")
                .filter(|cap| *cap > 0)
                .unwrap_or(defaults.bulk_cap),
        }
    }
}

/// Configuration of change subscriptions and live mirrors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorConfig {
    pub batch_size: usize,
    pub idle_poll_interval: Duration,
    pub reconnect_initial_backoff: Duration,
    pub reconnect_max_backoff: Duration,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_CHANGE_BATCH_SIZE,
            idle_poll_interval: Duration::from_millis(DEFAULT_IDLE_POLL_INTERVAL_MS),
            reconnect_initial_backoff: Duration::from_millis(DEFAULT_RECONNECT_INITIAL_BACKOFF_MS),
            reconnect_max_backoff: Duration::from_millis(DEFAULT_RECONNECT_MAX_BACKOFF_MS),
        }
    }
}

impl MirrorConfig {
    /// Create MirrorConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `TWINMESH_MIRROR_BATCH_SIZE` (default: 500)
    /// - `TWINMESH_MIRROR_IDLE_POLL_MS` (default: 1000)
    /// - `TWINMESH_MIRROR_BACKOFF_INITIAL_MS` (default: 100)
    /// - `TWINMESH_MIRROR_BACKOFF_MAX_MS` (default: 30000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_size: env_parse::<usize>("TWINMESH_MIRROR_BATCH_SIZE")
                .filter(|size| *size > 0)
                .unwrap_or(defaults.batch_size),
            idle_poll_interval: env_parse("TWINMESH_MIRROR_IDLE_POLL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.idle_poll_interval),
            reconnect_initial_backoff: env_parse("TWINMESH_MIRROR_BACKOFF_INITIAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnect_initial_backoff),
            reconnect_max_backoff: env_parse("TWINMESH_MIRROR_BACKOFF_MAX_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnect_max_backoff),
        }
    }

    /// Short intervals for tests.
    pub fn fast() -> Self {
        Self {
            batch_size: 64,
            idle_poll_interval: Duration::from_millis(20),
            reconnect_initial_backoff: Duration::from_millis(5),
            reconnect_max_backoff: Duration::from_millis(50),
        }
    }

    /// Next reconnect delay after `current`, doubling up to the maximum.
    pub fn next_backoff(&self, current: Duration) -> Duration {
        (current * 2).min(self.reconnect_max_backoff)
    }
}
