//! HTTP adapter for registry/repository services

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use twinmesh_core::{
    encode_id, ConfigError, Lookup, RecordCategory, SourceConfig, SourceError, SourceKind,
};

use crate::source::{Page, RemoteSource, SourceFactory, SourceRef};

#[derive(Debug, Default, Deserialize)]
struct PagingMetadata {
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PagedBody {
    #[serde(default)]
    result: Vec<Value>,
    #[serde(default, rename = "pagingMetadata", alias = "paging_metadata")]
    paging_metadata: Option<PagingMetadata>,
}

/// Some repositories answer with a bare array instead of a paged envelope.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PageBody {
    Bare(Vec<Value>),
    Paged(PagedBody),
}

impl From<PageBody> for Page {
    fn from(body: PageBody) -> Self {
        match body {
            PageBody::Bare(records) => Page::last(records),
            PageBody::Paged(body) => Page {
                records: body.result,
                next_cursor: body.paging_metadata.and_then(|meta| meta.cursor),
            },
        }
    }
}

/// Remote source reached over HTTP.
#[derive(Clone)]
pub struct HttpSource {
    name: String,
    kind: SourceKind,
    client: reqwest::Client,
    headers: HeaderMap,
}

impl HttpSource {
    pub fn from_config(config: &SourceConfig, timeout: Duration) -> Result<Self, ConfigError> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: format!("sources.{}", config.name),
                value: String::new(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            name: config.name.clone(),
            kind: config.kind.clone(),
            client,
            headers: build_auth_headers(config)?,
        })
    }

    pub fn kind(&self) -> &SourceKind {
        &self.kind
    }

    fn collection_url(&self, category: RecordCategory) -> Result<String, SourceError> {
        let base = self
            .kind
            .base_url(category)
            .ok_or_else(|| SourceError::CapabilityAbsent {
                source_name: self.name.clone(),
                category,
            })?;
        Ok(format!("{}/{}", base.trim_end_matches('/'), category.remote_path()))
    }

    fn transport_error(&self, error: reqwest::Error) -> SourceError {
        let reason = if error.is_timeout() {
            format!("request timed out: {}", error)
        } else if error.is_connect() {
            format!("connection failed: {}", error)
        } else {
            error.to_string()
        };
        SourceError::Unavailable {
            source_name: self.name.clone(),
            reason,
        }
    }

    fn status_error(&self, url: &str, status: StatusCode) -> SourceError {
        if status.is_server_error() {
            SourceError::Unavailable {
                source_name: self.name.clone(),
                reason: format!("{} answered {}", url, status),
            }
        } else {
            SourceError::Rejected {
                source_name: self.name.clone(),
                path: url.to_string(),
                status: status.as_u16(),
            }
        }
    }

    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<reqwest::Response, SourceError> {
        self.client
            .get(url)
            .headers(self.headers.clone())
            .query(query)
            .send()
            .await
            .map_err(|e| self.transport_error(e))
    }
}

#[async_trait]
impl RemoteSource for HttpSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_capability(&self, category: RecordCategory) -> bool {
        self.kind.has_capability(category)
    }

    async fn fetch_page(
        &self,
        category: RecordCategory,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Page, SourceError> {
        let url = self.collection_url(category)?;
        let mut query = vec![("limit", limit.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        let response = self.get(&url, &query).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.status_error(&url, status));
        }

        let body: PageBody = response
            .json()
            .await
            .map_err(|e| SourceError::MalformedResponse {
                source_name: self.name.clone(),
                reason: format!("{}: {}", url, e),
            })?;
        Ok(body.into())
    }

    async fn fetch_one(&self, category: RecordCategory, id: &str) -> Result<Lookup, SourceError> {
        let url = format!("{}/{}", self.collection_url(category)?, encode_id(id));
        let response = self.get(&url, &[]).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Lookup::NotFound);
        }
        if !status.is_success() {
            return Err(self.status_error(&url, status));
        }

        let record = response
            .json::<Value>()
            .await
            .map_err(|e| SourceError::MalformedResponse {
                source_name: self.name.clone(),
                reason: format!("{}: {}", url, e),
            })?;
        Ok(Lookup::Found(record))
    }
}

impl std::fmt::Debug for HttpSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSource")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("headers", &"[REDACTED]")
            .finish()
    }
}

fn build_auth_headers(config: &SourceConfig) -> Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::new();
    if let Some((name, value)) = config.auth.header() {
        let invalid = |reason: String| ConfigError::InvalidValue {
            field: format!("sources.{}.auth", config.name),
            value: name.clone(),
            reason,
        };
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
        let mut header_value = HeaderValue::from_str(&value).map_err(|e| invalid(e.to_string()))?;
        header_value.set_sensitive(true);
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

/// Builds [`HttpSource`] adapters.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpSourceFactory;

impl SourceFactory for HttpSourceFactory {
    fn build(&self, config: &SourceConfig, timeout: Duration) -> Result<SourceRef, ConfigError> {
        Ok(Arc::new(HttpSource::from_config(config, timeout)?))
    }
}
