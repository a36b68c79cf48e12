//! Constants for twinmesh sync
//!
//! Defaults for every tunable read by the `from_env()` constructors.

// ============================================================================
// POLLING
// ============================================================================

/// Default sleep between two poll cycles of one source (seconds)
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = twinmesh_core::DEFAULT_POLLING_INTERVAL_SECS;

/// Default page size requested from remote sources
pub const DEFAULT_POLL_PAGE_SIZE: usize = twinmesh_core::DEFAULT_PAGE_SIZE;

// ============================================================================
// GARBAGE COLLECTION
// ============================================================================

/// Default interval between two garbage-collection sweeps (seconds)
pub const DEFAULT_GC_SWEEP_INTERVAL_SECS: u64 = 300;

/// Default delay before the first sweep, giving pollers time to fill the store (seconds)
pub const DEFAULT_GC_FIRST_SWEEP_DELAY_SECS: u64 = 60;

// ============================================================================
// READ API
// ============================================================================

/// Page size used when a list request does not specify one
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Upper bound for a single list page
pub const MAX_LIST_LIMIT: usize = 1_000;

// ============================================================================
// LOGGING
// ============================================================================

/// Filter applied when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "warn,twinmesh=info";
