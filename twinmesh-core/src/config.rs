//! Configuration types
//!
//! These types describe the deployment (which sources exist, how to reach
//! them, how to authenticate). Reading them from a file or the environment is
//! left to the embedding process; everything here is plain serde data plus
//! validation.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::error::ConfigError;
use crate::RecordCategory;

/// Default page size requested from remote sources.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Default delay between two poll cycles of one source, in seconds.
pub const DEFAULT_POLLING_INTERVAL_SECS: u64 = 60;

/// Default timeout for a single request to a remote source, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

/// Per-capability base URLs of a registry+repository source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceUrls {
    #[serde(default, alias = "shell-registry")]
    pub shell_registry: Option<String>,
    #[serde(default, alias = "shell-repository")]
    pub shell_repository: Option<String>,
    #[serde(default, alias = "submodel-registry")]
    pub submodel_registry: Option<String>,
    #[serde(default, alias = "submodel-repository")]
    pub submodel_repository: Option<String>,
}

impl ServiceUrls {
    fn for_category(&self, category: RecordCategory) -> Option<&str> {
        match category {
            RecordCategory::ShellDescriptor => self.shell_registry.as_deref(),
            RecordCategory::Shell => self.shell_repository.as_deref(),
            RecordCategory::SubmodelDescriptor => self.submodel_registry.as_deref(),
            RecordCategory::Submodel => self.submodel_repository.as_deref(),
        }
    }
}

/// Shape of a remote source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    /// Separate registry and repository services, any of which may be absent.
    #[serde(alias = "registry-repository-pair")]
    RegistryRepositoryPair { urls: ServiceUrls },
    /// One base URL serving all four endpoint families.
    #[serde(alias = "combined-service")]
    CombinedService { url: String },
}

impl SourceKind {
    /// Base URL serving `category`, or `None` when the capability is absent.
    pub fn base_url(&self, category: RecordCategory) -> Option<&str> {
        match self {
            SourceKind::RegistryRepositoryPair { urls } => urls.for_category(category),
            SourceKind::CombinedService { url } => Some(url.as_str()),
        }
    }

    pub fn has_capability(&self, category: RecordCategory) -> bool {
        self.base_url(category).is_some()
    }
}

/// How requests to a source are authenticated.
///
/// Credentials arrive already acquired; token refresh happens outside.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "auth_type", rename_all = "snake_case")]
pub enum AuthMethod {
    #[default]
    None,
    /// Raw key sent in `header` (default `Authorization`).
    #[serde(alias = "apikey")]
    ApiKey {
        #[serde(alias = "api-key")]
        api_key: String,
        #[serde(default)]
        header: Option<String>,
    },
    Bearer { token: String },
}

impl AuthMethod {
    /// Header name and value to attach to every request.
    pub fn header(&self) -> Option<(String, String)> {
        match self {
            AuthMethod::None => None,
            AuthMethod::ApiKey { api_key, header } => Some((
                header.clone().unwrap_or_else(|| "Authorization".to_string()),
                api_key.clone(),
            )),
            AuthMethod::Bearer { token } => {
                Some(("Authorization".to_string(), format!("Bearer {}", token)))
            }
        }
    }
}

/// Negative intervals are accepted and mean "use the default".
fn deserialize_interval<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<i64>::deserialize(deserializer)?;
    Ok(raw.and_then(|secs| u64::try_from(secs).ok()))
}

/// One configured remote source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: SourceKind,
    #[serde(default)]
    pub auth: AuthMethod,
    #[serde(
        default,
        alias = "polling-interval",
        deserialize_with = "deserialize_interval"
    )]
    pub polling_interval_secs: Option<u64>,
}

impl SourceConfig {
    /// Effective polling interval, falling back to `default` when unset.
    pub fn polling_interval(&self, default: Duration) -> Duration {
        self.polling_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(default)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "sources[].name".to_string(),
            });
        }

        let urls: Vec<&str> = RecordCategory::ALL
            .into_iter()
            .filter_map(|c| self.kind.base_url(c))
            .collect();
        if urls.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("sources.{}.urls", self.name),
                value: "none".to_string(),
                reason: "source must expose at least one capability".to_string(),
            });
        }
        for url in urls {
            validate_http_url(&format!("sources.{}.url", self.name), url)?;
        }

        if self.polling_interval_secs == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: format!("sources.{}.polling_interval_secs", self.name),
                value: "0".to_string(),
                reason: "polling interval must be greater than 0".to_string(),
            });
        }

        match &self.auth {
            AuthMethod::ApiKey { api_key, .. } if api_key.is_empty() => {
                Err(ConfigError::MissingRequired {
                    field: format!("sources.{}.auth.api_key", self.name),
                })
            }
            AuthMethod::Bearer { token } if token.is_empty() => {
                Err(ConfigError::MissingRequired {
                    field: format!("sources.{}.auth.token", self.name),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Global switches for the four record categories a poller may fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollCategories {
    #[serde(default = "enabled")]
    pub shell_descriptors: bool,
    #[serde(default = "enabled")]
    pub shells: bool,
    #[serde(default = "enabled")]
    pub submodel_descriptors: bool,
    #[serde(default = "enabled")]
    pub submodels: bool,
}

fn enabled() -> bool {
    true
}

impl Default for PollCategories {
    fn default() -> Self {
        Self {
            shell_descriptors: true,
            shells: true,
            submodel_descriptors: true,
            submodels: true,
        }
    }
}

impl PollCategories {
    pub fn is_enabled(&self, category: RecordCategory) -> bool {
        match category {
            RecordCategory::ShellDescriptor => self.shell_descriptors,
            RecordCategory::Shell => self.shells,
            RecordCategory::SubmodelDescriptor => self.submodel_descriptors,
            RecordCategory::Submodel => self.submodels,
        }
    }

    /// Categories enabled in both sets.
    pub fn intersect(&self, other: &PollCategories) -> PollCategories {
        PollCategories {
            shell_descriptors: self.shell_descriptors && other.shell_descriptors,
            shells: self.shells && other.shells,
            submodel_descriptors: self.submodel_descriptors && other.submodel_descriptors,
            submodels: self.submodels && other.submodels,
        }
    }
}

/// Deployment-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Base URL under which this service is reachable; used for local endpoints.
    #[serde(alias = "service-base-url")]
    pub service_base_url: String,
    pub sources: Vec<SourceConfig>,
    /// Names of sources that get a live poller. Empty allows every source.
    #[serde(default, alias = "polling-allow-list")]
    pub polling_allow_list: Vec<String>,
    #[serde(default, alias = "poll-categories")]
    pub poll_categories: PollCategories,
    #[serde(default = "default_request_timeout_secs", alias = "request-timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_page_size", alias = "page-size")]
    pub page_size: usize,
}

impl MeshConfig {
    pub fn new(service_base_url: impl Into<String>, sources: Vec<SourceConfig>) -> Self {
        Self {
            service_base_url: service_base_url.into(),
            sources,
            polling_allow_list: Vec::new(),
            poll_categories: PollCategories::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Whether the source named `name` may run a poller (case-insensitive).
    pub fn is_polling_allowed(&self, name: &str) -> bool {
        self.polling_allow_list.is_empty()
            || self
                .polling_allow_list
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(name))
    }

    /// Sources that pass the allow-list, in configuration order.
    pub fn polled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources
            .iter()
            .filter(move |s| self.is_polling_allowed(&s.name))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_http_url("service_base_url", &self.service_base_url)?;

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_secs".to_string(),
                value: "0".to_string(),
                reason: "request timeout must be greater than 0".to_string(),
            });
        }

        if self.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "page_size".to_string(),
                value: "0".to_string(),
                reason: "page size must be greater than 0".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            source.validate()?;
            if !seen.insert(source.name.to_lowercase()) {
                return Err(ConfigError::DuplicateSource {
                    name: source.name.clone(),
                });
            }
        }

        Ok(())
    }
}

fn validate_http_url(field: &str, url: &str) -> Result<(), ConfigError> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"));
    match rest {
        Some(host) if !host.is_empty() && !host.starts_with('/') => Ok(()),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: url.to_string(),
            reason: "must be an absolute http(s) URL".to_string(),
        }),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn combined(name: &str) -> SourceConfig {
        SourceConfig {
            name: name.to_string(),
            kind: SourceKind::CombinedService {
                url: "http://factory-a:8081".to_string(),
            },
            auth: AuthMethod::None,
            polling_interval_secs: None,
        }
    }

    #[test]
    fn test_source_config_deserializes_kebab_case() {
        let source: SourceConfig = serde_json::from_value(json!({
            "name": "factory-a",
            "kind": "registry-repository-pair",
            "urls": {
                "shell-registry": "http://registry:8080",
                "submodel-repository": "http://repo:8081"
            },
            "auth": {"auth_type": "apikey", "api-key": "secret"},
            "polling-interval": -1
        }))
        .unwrap();

        assert!(source.kind.has_capability(RecordCategory::ShellDescriptor));
        assert!(!source.kind.has_capability(RecordCategory::Shell));
        assert!(!source.kind.has_capability(RecordCategory::SubmodelDescriptor));
        assert!(source.kind.has_capability(RecordCategory::Submodel));
        assert_eq!(source.polling_interval_secs, None);
        assert_eq!(
            source.auth.header(),
            Some(("Authorization".to_string(), "secret".to_string()))
        );
        source.validate().unwrap();
    }

    #[test]
    fn test_combined_service_has_every_capability() {
        let source = combined("a");
        for category in RecordCategory::ALL {
            assert_eq!(source.kind.base_url(category), Some("http://factory-a:8081"));
        }
    }

    #[test]
    fn test_polling_interval_fallback() {
        let mut source = combined("a");
        assert_eq!(
            source.polling_interval(Duration::from_secs(60)),
            Duration::from_secs(60)
        );
        source.polling_interval_secs = Some(5);
        assert_eq!(
            source.polling_interval(Duration::from_secs(60)),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_bearer_header() {
        let auth = AuthMethod::Bearer {
            token: "abc".to_string(),
        };
        assert_eq!(
            auth.header(),
            Some(("Authorization".to_string(), "Bearer abc".to_string()))
        );
        assert_eq!(AuthMethod::None.header(), None);
    }

    #[test]
    fn test_validate_rejects_source_without_capability() {
        let source = SourceConfig {
            name: "empty".to_string(),
            kind: SourceKind::RegistryRepositoryPair {
                urls: ServiceUrls::default(),
            },
            auth: AuthMethod::None,
            polling_interval_secs: None,
        };
        assert!(matches!(
            source.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_names_case_insensitive() {
        let config = MeshConfig::new(
            "http://localhost:8000",
            vec![combined("Factory-A"), combined("factory-a")],
        );
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateSource {
                name: "factory-a".to_string()
            })
        );
    }

    #[test]
    fn test_validate_rejects_bad_urls_and_zero_values() {
        let mut config = MeshConfig::new("localhost:8000", vec![combined("a")]);
        assert!(config.validate().is_err());

        config.service_base_url = "http://localhost:8000".to_string();
        config.validate().unwrap();

        config.page_size = 0;
        assert!(config.validate().is_err());
        config.page_size = 10;

        config.request_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_allow_list_is_case_insensitive() {
        let mut config = MeshConfig::new(
            "http://localhost:8000",
            vec![combined("Factory-A"), combined("factory-b")],
        );
        assert_eq!(config.polled_sources().count(), 2);

        config.polling_allow_list = vec!["FACTORY-a".to_string()];
        let polled: Vec<_> = config.polled_sources().map(|s| s.name.as_str()).collect();
        assert_eq!(polled, vec!["Factory-A"]);
    }

    #[test]
    fn test_poll_categories_intersect() {
        let all = PollCategories::default();
        let no_shells = PollCategories {
            shells: false,
            ..PollCategories::default()
        };
        let merged = all.intersect(&no_shells);
        assert!(!merged.is_enabled(RecordCategory::Shell));
        assert!(merged.is_enabled(RecordCategory::Submodel));
    }
}
