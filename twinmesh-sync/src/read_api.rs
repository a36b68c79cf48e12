//! Local read API
//!
//! Read-only queries served from the live mirrors. Listings are in id order
//! and paginated with an opaque cursor (the encoded id of the last record of
//! the previous page). Every call reads one snapshot, so a page never mixes
//! two mirror states.

use std::ops::Bound;
use std::sync::Arc;

use twinmesh_core::{
    decode_id, encode_id, submodel_value_only, RecordCategory, RecordError, StoredRecord,
    ValueOnly,
};
use twinmesh_storage::Mirrors;

use crate::constants::{DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};

/// Parameters of a list request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// Only records last written by this source.
    pub source_name: Option<String>,
    /// Page size; 0 means the default, larger values are capped.
    pub limit: usize,
    /// Continuation cursor from a previous page.
    pub cursor: Option<String>,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(mut self, source_name: impl Into<String>) -> Self {
        self.source_name = Some(source_name.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn cursor(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }

    fn effective_limit(&self) -> usize {
        match self.limit {
            0 => DEFAULT_LIST_LIMIT,
            limit => limit.min(MAX_LIST_LIMIT),
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone)]
pub struct ListPage<T> {
    pub records: Vec<T>,
    /// `None` on the last page.
    pub next_cursor: Option<String>,
}

impl<T> ListPage<T> {
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}

#[derive(Clone)]
pub struct ReadApi {
    mirrors: Arc<Mirrors>,
}

impl ReadApi {
    pub fn new(mirrors: Arc<Mirrors>) -> Self {
        Self { mirrors }
    }

    pub fn get(&self, category: RecordCategory, id: &str) -> Option<Arc<StoredRecord>> {
        self.mirrors.get(category).get_by_id(id)
    }

    pub fn list(
        &self,
        category: RecordCategory,
        query: &ListQuery,
    ) -> Result<ListPage<Arc<StoredRecord>>, RecordError> {
        let after = query.cursor.as_deref().map(decode_id).transpose()?;
        let limit = query.effective_limit();
        let snapshot = self.mirrors.get(category).snapshot();

        let lower = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        let mut matching = snapshot
            .range::<String, _>((lower, Bound::Unbounded))
            .map(|(_, record)| record)
            .filter(|record| match &query.source_name {
                Some(source_name) => record.source_name == *source_name,
                None => true,
            });

        let records: Vec<Arc<StoredRecord>> = matching.by_ref().take(limit).cloned().collect();
        let next_cursor = match (matching.next(), records.last()) {
            (Some(_), Some(last)) => Some(encode_id(&last.id)),
            _ => None,
        };

        Ok(ListPage {
            records,
            next_cursor,
        })
    }

    /// Records whose endpoints point at `base_url`, in id order.
    pub fn list_by_source_url(&self, category: RecordCategory, base_url: &str) -> Vec<Arc<StoredRecord>> {
        self.mirrors.get(category).filter_by_source_url(base_url)
    }

    pub fn get_shell_descriptor(&self, id: &str) -> Option<Arc<StoredRecord>> {
        self.get(RecordCategory::ShellDescriptor, id)
    }

    pub fn list_shell_descriptors(
        &self,
        query: &ListQuery,
    ) -> Result<ListPage<Arc<StoredRecord>>, RecordError> {
        self.list(RecordCategory::ShellDescriptor, query)
    }

    pub fn get_shell(&self, id: &str) -> Option<Arc<StoredRecord>> {
        self.get(RecordCategory::Shell, id)
    }

    pub fn list_shells(&self, query: &ListQuery) -> Result<ListPage<Arc<StoredRecord>>, RecordError> {
        self.list(RecordCategory::Shell, query)
    }

    pub fn get_submodel_descriptor(&self, id: &str) -> Option<Arc<StoredRecord>> {
        self.get(RecordCategory::SubmodelDescriptor, id)
    }

    pub fn list_submodel_descriptors(
        &self,
        query: &ListQuery,
    ) -> Result<ListPage<Arc<StoredRecord>>, RecordError> {
        self.list(RecordCategory::SubmodelDescriptor, query)
    }

    pub fn get_submodel(&self, id: &str) -> Option<Arc<StoredRecord>> {
        self.get(RecordCategory::Submodel, id)
    }

    pub fn list_submodels(&self, query: &ListQuery) -> Result<ListPage<Arc<StoredRecord>>, RecordError> {
        self.list(RecordCategory::Submodel, query)
    }

    /// Value-only projection of one submodel. `Ok(None)` when unknown.
    pub fn submodel_value_only(&self, id: &str) -> Result<Option<ValueOnly>, RecordError> {
        self.get_submodel(id)
            .map(|record| submodel_value_only(&record.payload))
            .transpose()
    }

    /// Value-only projection of a page of submodels.
    pub fn list_submodels_value_only(
        &self,
        query: &ListQuery,
    ) -> Result<ListPage<ValueOnly>, RecordError> {
        let page = self.list_submodels(query)?;
        let records = page
            .records
            .iter()
            .map(|record| submodel_value_only(&record.payload))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ListPage {
            records,
            next_cursor: page.next_cursor,
        })
    }
}

impl std::fmt::Debug for ReadApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadApi").finish_non_exhaustive()
    }
}
