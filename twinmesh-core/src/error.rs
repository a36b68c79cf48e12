//! Error types for twinmesh operations

use crate::RecordCategory;
use thiserror::Error;

/// Errors talking to a remote source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("Source {source_name} unavailable: {reason}")]
    Unavailable { source_name: String, reason: String },

    #[error("Source {source_name} rejected request to {path} with status {status}")]
    Rejected {
        source_name: String,
        path: String,
        status: u16,
    },

    #[error("Source {source_name} has no {category} capability")]
    CapabilityAbsent {
        source_name: String,
        category: RecordCategory,
    },

    #[error("Malformed response from {source_name}: {reason}")]
    MalformedResponse { source_name: String, reason: String },
}

impl SourceError {
    /// Name of the source that produced this error.
    pub fn source_name(&self) -> &str {
        match self {
            SourceError::Unavailable { source_name, .. }
            | SourceError::Rejected { source_name, .. }
            | SourceError::CapabilityAbsent { source_name, .. }
            | SourceError::MalformedResponse { source_name, .. } => source_name,
        }
    }
}

/// Durable store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store {collection} unavailable: {reason}")]
    Unavailable { collection: String, reason: String },

    #[error("Revision conflict on {collection}/{id}: expected {expected:?}, found {actual:?}")]
    Conflict {
        collection: String,
        id: String,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    #[error("Change cursor {requested} expired in {collection}, oldest retained is {oldest}")]
    CursorExpired {
        collection: String,
        requested: u64,
        oldest: u64,
    },

    #[error("Serialization failed in {collection}: {reason}")]
    Serialization { collection: String, reason: String },

    /// The backend refuses this one record (e.g. an id longer than its key limit).
    #[error("Record {id} rejected by {collection}: {reason}")]
    Rejected {
        collection: String,
        id: String,
        reason: String,
    },
}

impl StoreError {
    /// Errors confined to a single record; the rest of a batch can proceed.
    pub fn is_record_error(&self) -> bool {
        matches!(
            self,
            StoreError::Rejected { .. } | StoreError::Serialization { .. }
        )
    }
}

/// Errors for records whose payload does not have the expected shape.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("{category} record has no string id")]
    MissingId { category: RecordCategory },

    #[error("{category} record is not a JSON object")]
    NotAnObject { category: RecordCategory },

    #[error("Invalid value for {field}: {reason}")]
    InvalidField { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Duplicate source name: {name}")]
    DuplicateSource { name: String },
}

/// Master error type for all twinmesh errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MeshError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Task {label} failed: {reason}")]
    Task { label: String, reason: String },
}

impl MeshError {
    /// Whether the next poll cycle or sweep is expected to clear this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MeshError::Source(SourceError::Unavailable { .. })
                | MeshError::Store(StoreError::Unavailable { .. })
                | MeshError::Store(StoreError::Conflict { .. })
        )
    }
}

/// Result type alias for twinmesh operations.
pub type MeshResult<T> = Result<T, MeshError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_error_display_unavailable() {
        let err = SourceError::Unavailable {
            source_name: "factory-a".to_string(),
            reason: "connect timeout".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("factory-a"));
        assert!(msg.contains("connect timeout"));
        assert_eq!(err.source_name(), "factory-a");
    }

    #[test]
    fn test_store_error_display_conflict() {
        let err = StoreError::Conflict {
            collection: "shells".to_string(),
            id: "urn:shell:1".to_string(),
            expected: Some(2),
            actual: Some(3),
        };
        let msg = err.to_string();
        assert!(msg.contains("Revision conflict"));
        assert!(msg.contains("urn:shell:1"));
    }

    #[test]
    fn test_record_error_display_missing_id() {
        let err = RecordError::MissingId {
            category: RecordCategory::Submodel,
        };
        assert!(err.to_string().contains("submodels"));
    }

    #[test]
    fn test_mesh_error_from_variants() {
        let source = MeshError::from(SourceError::MalformedResponse {
            source_name: "s".to_string(),
            reason: "bad json".to_string(),
        });
        assert!(matches!(source, MeshError::Source(_)));

        let store = MeshError::from(StoreError::Serialization {
            collection: "shells".to_string(),
            reason: "bad utf-8".to_string(),
        });
        assert!(matches!(store, MeshError::Store(_)));

        let record = MeshError::from(RecordError::NotAnObject {
            category: RecordCategory::Shell,
        });
        assert!(matches!(record, MeshError::Record(_)));

        let config = MeshError::from(ConfigError::DuplicateSource {
            name: "a".to_string(),
        });
        assert!(matches!(config, MeshError::Config(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(MeshError::from(SourceError::Unavailable {
            source_name: "s".to_string(),
            reason: "timeout".to_string(),
        })
        .is_transient());
        assert!(MeshError::from(StoreError::Unavailable {
            collection: "shells".to_string(),
            reason: "io".to_string(),
        })
        .is_transient());
        assert!(!MeshError::from(RecordError::MissingId {
            category: RecordCategory::Shell,
        })
        .is_transient());
        assert!(!MeshError::from(StoreError::CursorExpired {
            collection: "shells".to_string(),
            requested: 1,
            oldest: 5,
        })
        .is_transient());
    }

    #[test]
    fn test_record_level_store_errors() {
        let rejected = StoreError::Rejected {
            collection: "shells".to_string(),
            id: "urn:long".to_string(),
            reason: "key exceeds 511 bytes".to_string(),
        };
        assert!(rejected.is_record_error());
        assert!(!MeshError::from(rejected).is_transient());
        assert!(!StoreError::Unavailable {
            collection: "shells".to_string(),
            reason: "io".to_string(),
        }
        .is_record_error());
    }
}
