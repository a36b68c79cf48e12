//! Record categories

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// The four record families mirrored from every source.
///
/// Each category lives in its own durable collection with its own change log;
/// there is no ordering relationship between categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordCategory {
    ShellDescriptor,
    Shell,
    SubmodelDescriptor,
    Submodel,
}

impl RecordCategory {
    /// All categories in a fixed order.
    pub const ALL: [RecordCategory; 4] = [
        RecordCategory::ShellDescriptor,
        RecordCategory::Shell,
        RecordCategory::SubmodelDescriptor,
        RecordCategory::Submodel,
    ];

    /// Collection name used by storage backends.
    pub fn collection_name(&self) -> &'static str {
        match self {
            RecordCategory::ShellDescriptor => "shell_descriptors",
            RecordCategory::Shell => "shells",
            RecordCategory::SubmodelDescriptor => "submodel_descriptors",
            RecordCategory::Submodel => "submodels",
        }
    }

    /// Path segment of the remote REST family serving this category.
    pub fn remote_path(&self) -> &'static str {
        match self {
            RecordCategory::ShellDescriptor => "shell-descriptors",
            RecordCategory::Shell => "shells",
            RecordCategory::SubmodelDescriptor => "submodel-descriptors",
            RecordCategory::Submodel => "submodels",
        }
    }

    /// Whether records of this category are discovery advertisements.
    pub fn is_descriptor(&self) -> bool {
        matches!(
            self,
            RecordCategory::ShellDescriptor | RecordCategory::SubmodelDescriptor
        )
    }

    /// Whether records of this category describe submodels.
    pub fn is_submodel_family(&self) -> bool {
        matches!(
            self,
            RecordCategory::Submodel | RecordCategory::SubmodelDescriptor
        )
    }
}

impl fmt::Display for RecordCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection_name())
    }
}

impl FromStr for RecordCategory {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordCategory::ALL
            .into_iter()
            .find(|c| c.collection_name() == s || c.remote_path() == s)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "category".to_string(),
                value: s.to_string(),
                reason: "unknown record category".to_string(),
            })
    }
}
