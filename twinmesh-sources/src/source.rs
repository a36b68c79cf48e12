//! Remote source capability interface

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use twinmesh_core::document::record_id;
use twinmesh_core::{ConfigError, Lookup, RecordCategory, SourceConfig, SourceError};

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<Value>,
    /// Cursor for the next page, `None` on the last page.
    pub next_cursor: Option<String>,
}

impl Page {
    pub fn last(records: Vec<Value>) -> Self {
        Self {
            records,
            next_cursor: None,
        }
    }
}

/// Uniform access to one upstream registry/repository.
///
/// Any of the four record families may be absent. Listing an absent family
/// fails with [`SourceError::CapabilityAbsent`]; single-record lookups report
/// [`Lookup::CapabilityAbsent`] instead of failing.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Configured source name, used as `source_name` on written records.
    fn name(&self) -> &str;

    fn has_capability(&self, category: RecordCategory) -> bool;

    /// Fetch one page starting at `cursor` (`None` for the first page).
    async fn fetch_page(
        &self,
        category: RecordCategory,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Page, SourceError>;

    /// Single-record read. `Lookup::NotFound` is the expected answer for a
    /// missing id.
    async fn fetch_one(&self, category: RecordCategory, id: &str) -> Result<Lookup, SourceError>;

    /// Follow the pagination cursor until exhausted.
    ///
    /// Records are deduplicated by id, keeping the first occurrence. Records
    /// without an id are passed through for the caller to reject. A cursor
    /// seen twice is reported as a malformed response rather than looping.
    async fn fetch_all(
        &self,
        category: RecordCategory,
        page_size: usize,
    ) -> Result<Vec<Value>, SourceError> {
        if !self.has_capability(category) {
            return Err(SourceError::CapabilityAbsent {
                source_name: self.name().to_string(),
                category,
            });
        }

        let mut records = Vec::new();
        let mut seen_ids = HashSet::new();
        let mut seen_cursors = HashSet::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self
                .fetch_page(category, cursor.as_deref(), page_size.max(1))
                .await?;
            pages += 1;

            for record in page.records {
                match record_id(category, &record) {
                    Ok(id) => {
                        if seen_ids.insert(id) {
                            records.push(record);
                        }
                    }
                    Err(_) => records.push(record),
                }
            }

            match page.next_cursor.filter(|next| !next.is_empty()) {
                Some(next) => {
                    if !seen_cursors.insert(next.clone()) {
                        return Err(SourceError::MalformedResponse {
                            source_name: self.name().to_string(),
                            reason: format!("pagination cursor {} repeated for {}", next, category),
                        });
                    }
                    cursor = Some(next);
                }
                None => break,
            }
        }

        tracing::debug!(
            source = %self.name(),
            category = %category,
            count = records.len(),
            pages,
            "Fetched all records"
        );
        Ok(records)
    }

    async fn fetch_shell_descriptors(&self, page_size: usize) -> Result<Vec<Value>, SourceError> {
        self.fetch_all(RecordCategory::ShellDescriptor, page_size).await
    }

    async fn fetch_shells(&self, page_size: usize) -> Result<Vec<Value>, SourceError> {
        self.fetch_all(RecordCategory::Shell, page_size).await
    }

    async fn fetch_submodel_descriptors(&self, page_size: usize) -> Result<Vec<Value>, SourceError> {
        self.fetch_all(RecordCategory::SubmodelDescriptor, page_size).await
    }

    async fn fetch_submodels(&self, page_size: usize) -> Result<Vec<Value>, SourceError> {
        self.fetch_all(RecordCategory::Submodel, page_size).await
    }

    /// Existence check used by garbage collection.
    async fn fetch_single(&self, category: RecordCategory, id: &str) -> Result<Lookup, SourceError> {
        if !self.has_capability(category) {
            return Ok(Lookup::CapabilityAbsent);
        }
        self.fetch_one(category, id).await
    }

    async fn fetch_single_shell_descriptor(&self, id: &str) -> Result<Lookup, SourceError> {
        self.fetch_single(RecordCategory::ShellDescriptor, id).await
    }

    async fn fetch_single_shell(&self, id: &str) -> Result<Lookup, SourceError> {
        self.fetch_single(RecordCategory::Shell, id).await
    }

    async fn fetch_single_submodel_descriptor(&self, id: &str) -> Result<Lookup, SourceError> {
        self.fetch_single(RecordCategory::SubmodelDescriptor, id).await
    }

    async fn fetch_single_submodel(&self, id: &str) -> Result<Lookup, SourceError> {
        self.fetch_single(RecordCategory::Submodel, id).await
    }
}

/// Shared handle to a remote source.
pub type SourceRef = Arc<dyn RemoteSource>;

/// Builds adapters from configuration.
pub trait SourceFactory: Send + Sync {
    fn build(&self, config: &SourceConfig, timeout: Duration) -> Result<SourceRef, ConfigError>;
}
