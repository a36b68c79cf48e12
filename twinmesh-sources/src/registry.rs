//! Local registry registration
//!
//! When enabled, records served by this instance are advertised in external
//! shell/submodel registries. A descriptor is POSTed to the registry's
//! collection; a `409 Conflict` means it is already known and is replaced
//! with a PUT to `{collection}/{b64url(id)}`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use twinmesh_core::{
    encode_id, ConfigError, RecordCategory, SourceError, DEFAULT_REQUEST_TIMEOUT_SECS,
};

/// Name used in errors raised by the local registry client.
pub const LOCAL_REGISTRY: &str = "local-registry";

/// How a descriptor ended up in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Created,
    /// The registry already knew the id; the descriptor was replaced.
    Updated,
}

/// Counts of one registration pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrationReport {
    pub created: u64,
    pub updated: u64,
    pub failed: u64,
}

impl RegistrationReport {
    pub fn registered(&self) -> u64 {
        self.created + self.updated
    }

    pub fn record(&mut self, result: &Result<Registration, SourceError>) {
        match result {
            Ok(Registration::Created) => self.created += 1,
            Ok(Registration::Updated) => self.updated += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// A registry that accepts shell and submodel descriptors.
#[async_trait]
pub trait DescriptorRegistry: Send + Sync {
    /// Create or replace the descriptor `id` of `category`, which must be a
    /// descriptor category.
    async fn register(
        &self,
        category: RecordCategory,
        id: &str,
        descriptor: &Value,
    ) -> Result<Registration, SourceError>;
}

pub type RegistryRef = Arc<dyn DescriptorRegistry>;

/// Where the local registries live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRegistryConfig {
    pub shell_registry_url: Option<String>,
    pub submodel_registry_url: Option<String>,
    pub timeout: Duration,
}

impl Default for LocalRegistryConfig {
    fn default() -> Self {
        Self {
            shell_registry_url: None,
            submodel_registry_url: None,
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl LocalRegistryConfig {
    /// Create LocalRegistryConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `TWINMESH_SHELL_REGISTRY_URL`: base URL of the shell registry
    /// - `TWINMESH_SUBMODEL_REGISTRY_URL`: base URL of the submodel registry
    /// - `TWINMESH_REGISTRY_TIMEOUT_SECS`: request timeout (default: 30)
    pub fn from_env() -> Self {
        let url = |key: &str| std::env::var(key).ok().filter(|s| !s.trim().is_empty());
        Self {
            shell_registry_url: url("TWINMESH_SHELL_REGISTRY_URL"),
            submodel_registry_url: url("TWINMESH_SUBMODEL_REGISTRY_URL"),
            timeout: Duration::from_secs(
                std::env::var("TWINMESH_REGISTRY_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .filter(|secs: &u64| *secs > 0)
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
        }
    }

    /// Check that every enabled registration has a registry to go to.
    pub fn validate(&self, shells: bool, submodels: bool) -> Result<(), ConfigError> {
        let check = |enabled: bool, url: &Option<String>, field: &str| match url {
            _ if !enabled => Ok(()),
            None => Err(ConfigError::MissingRequired {
                field: field.to_string(),
            }),
            Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: url.clone(),
                    reason: "expected an http(s) URL".to_string(),
                })
            }
            Some(_) => Ok(()),
        };
        check(shells, &self.shell_registry_url, "shell_registry_url")?;
        check(submodels, &self.submodel_registry_url, "submodel_registry_url")?;
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "registry_timeout".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Registry client speaking the descriptor REST contract.
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    client: reqwest::Client,
    shell_registry_url: Option<String>,
    submodel_registry_url: Option<String>,
}

impl HttpRegistry {
    pub fn from_config(config: &LocalRegistryConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: LOCAL_REGISTRY.to_string(),
                value: String::new(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            shell_registry_url: config.shell_registry_url.clone(),
            submodel_registry_url: config.submodel_registry_url.clone(),
        })
    }

    fn collection_url(&self, category: RecordCategory) -> Result<String, SourceError> {
        let base = match category {
            RecordCategory::ShellDescriptor => self.shell_registry_url.as_deref(),
            RecordCategory::SubmodelDescriptor => self.submodel_registry_url.as_deref(),
            _ => None,
        };
        let base = base.ok_or_else(|| SourceError::CapabilityAbsent {
            source_name: LOCAL_REGISTRY.to_string(),
            category,
        })?;
        Ok(format!("{}/{}", base.trim_end_matches('/'), category.remote_path()))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, SourceError> {
        request.send().await.map_err(|e| SourceError::Unavailable {
            source_name: LOCAL_REGISTRY.to_string(),
            reason: e.to_string(),
        })
    }
}

fn status_error(url: &str, status: StatusCode) -> SourceError {
    if status.is_server_error() {
        SourceError::Unavailable {
            source_name: LOCAL_REGISTRY.to_string(),
            reason: format!("{} answered {}", url, status),
        }
    } else {
        SourceError::Rejected {
            source_name: LOCAL_REGISTRY.to_string(),
            path: url.to_string(),
            status: status.as_u16(),
        }
    }
}

#[async_trait]
impl DescriptorRegistry for HttpRegistry {
    async fn register(
        &self,
        category: RecordCategory,
        id: &str,
        descriptor: &Value,
    ) -> Result<Registration, SourceError> {
        let url = self.collection_url(category)?;
        let response = self.send(self.client.post(&url).json(descriptor)).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(Registration::Created);
        }
        if status != StatusCode::CONFLICT {
            return Err(status_error(&url, status));
        }

        let url = format!("{}/{}", url, encode_id(id));
        let response = self.send(self.client.put(&url).json(descriptor)).await?;
        let status = response.status();
        if status.is_success() {
            Ok(Registration::Updated)
        } else {
            Err(status_error(&url, status))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LocalRegistryConfig {
        LocalRegistryConfig {
            shell_registry_url: Some("http://registry.local/api/v3/".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_collection_url_per_descriptor_family() {
        let registry = HttpRegistry::from_config(&config()).unwrap();
        assert_eq!(
            registry.collection_url(RecordCategory::ShellDescriptor).unwrap(),
            "http://registry.local/api/v3/shell-descriptors"
        );
        assert!(matches!(
            registry.collection_url(RecordCategory::SubmodelDescriptor),
            Err(SourceError::CapabilityAbsent { .. })
        ));
        assert!(matches!(
            registry.collection_url(RecordCategory::Shell),
            Err(SourceError::CapabilityAbsent { .. })
        ));
    }

    #[test]
    fn test_validate_requires_url_for_enabled_registration() {
        let config = config();
        assert!(config.validate(true, false).is_ok());
        assert!(config.validate(false, false).is_ok());
        assert!(matches!(
            config.validate(false, true),
            Err(ConfigError::MissingRequired { .. })
        ));

        let bad = LocalRegistryConfig {
            shell_registry_url: Some("registry.local".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            bad.validate(true, false),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_report_counts_outcomes() {
        let mut report = RegistrationReport::default();
        report.record(&Ok(Registration::Created));
        report.record(&Ok(Registration::Updated));
        report.record(&Err(SourceError::Unavailable {
            source_name: LOCAL_REGISTRY.to_string(),
            reason: "down".to_string(),
        }));
        assert_eq!(report.registered(), 2);
        assert_eq!(report.failed, 1);
    }
}
