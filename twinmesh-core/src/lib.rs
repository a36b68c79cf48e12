//! twinmesh Core - Record, Change-Log and Configuration Types
//!
//! Shared vocabulary for the federation engine:
//! - [`RecordCategory`]: the four independently stored record families
//! - [`StoredRecord`]: the persistence wrapper `{id, revision, source_name, payload}`
//! - [`ChangeEntry`] / [`ChangeCursor`]: the per-collection change log
//! - [`MeshError`]: the error taxonomy shared by every crate
//! - [`MeshConfig`] / [`SourceConfig`]: configuration surface (loading is external)
//!
//! Payloads are kept as `serde_json::Value`; the helpers in [`document`] and
//! [`value_only`] know just enough of the asset administration shell layout
//! to read ids, endpoints and submodel references.

pub mod category;
pub mod config;
pub mod document;
pub mod error;
pub mod ident;
pub mod record;
pub mod value_only;

pub use category::RecordCategory;
pub use config::{
    AuthMethod, MeshConfig, PollCategories, ServiceUrls, SourceConfig, SourceKind,
    DEFAULT_PAGE_SIZE, DEFAULT_POLLING_INTERVAL_SECS, DEFAULT_REQUEST_TIMEOUT_SECS,
};
pub use document::LocalEndpoints;
pub use error::{
    ConfigError, MeshError, MeshResult, RecordError, SourceError, StoreError,
};
pub use ident::{decode_id, encode_id};
pub use record::{
    fingerprint, BulkReport, ChangeBatch, ChangeCursor, ChangeEntry, ChangeKind,
    ChangeNotification, DeleteOutcome, Lookup, StoredRecord, UpsertOutcome,
};
pub use value_only::{submodel_value_only, ValueOnly};

/// Timestamp type used across twinmesh.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
