//! twinmesh Test Utilities
//!
//! Shared test infrastructure for the twinmesh workspace:
//! - [`MockSource`]: scriptable in-memory remote source
//! - Proptest generators for ids, payloads and store operations
//! - AAS document fixtures

pub use twinmesh_core::{
    encode_id, Lookup, RecordCategory, SourceConfig, SourceError, SourceKind,
};
pub use twinmesh_sources::{Page, RemoteSource, SourceFactory, SourceRef};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use twinmesh_core::ConfigError;

// ============================================================================
// MOCK SOURCE
// ============================================================================

#[derive(Debug)]
struct MockState {
    records: HashMap<RecordCategory, BTreeMap<String, Value>>,
    absent: HashSet<RecordCategory>,
    failing: HashSet<RecordCategory>,
    reachable: bool,
    latency: Duration,
}

/// In-memory remote source.
///
/// Pages are served in id order with the last id of a page as cursor.
/// Reachability can be toggled for the whole source or per category.
#[derive(Debug)]
pub struct MockSource {
    name: String,
    state: Mutex<MockState>,
    page_calls: AtomicU64,
    lookup_calls: AtomicU64,
}

impl MockSource {
    /// Reachable source with all four capabilities and no records.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MockState {
                records: HashMap::new(),
                absent: HashSet::new(),
                failing: HashSet::new(),
                reachable: true,
                latency: Duration::ZERO,
            }),
            page_calls: AtomicU64::new(0),
            lookup_calls: AtomicU64::new(0),
        }
    }

    pub fn with_records(self, category: RecordCategory, records: Vec<Value>) -> Self {
        for record in records {
            self.insert(category, record);
        }
        self
    }

    pub fn without_capability(self, category: RecordCategory) -> Self {
        self.state().absent.insert(category);
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or replace a record. Records without a string id are ignored.
    pub fn insert(&self, category: RecordCategory, record: Value) {
        if let Some(id) = record.get("id").and_then(Value::as_str).map(str::to_string) {
            self.state()
                .records
                .entry(category)
                .or_default()
                .insert(id, record);
        }
    }

    pub fn remove(&self, category: RecordCategory, id: &str) -> Option<Value> {
        self.state()
            .records
            .get_mut(&category)
            .and_then(|records| records.remove(id))
    }

    pub fn records(&self, category: RecordCategory) -> Vec<Value> {
        self.state()
            .records
            .get(&category)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
    }

    /// Make one category fail as if its service were down.
    pub fn set_category_failing(&self, category: RecordCategory, failing: bool) {
        let mut state = self.state();
        if failing {
            state.failing.insert(category);
        } else {
            state.failing.remove(&category);
        }
    }

    /// Delay applied to every request before it is answered.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    pub fn page_calls(&self) -> u64 {
        self.page_calls.load(Ordering::Relaxed)
    }

    pub fn lookup_calls(&self) -> u64 {
        self.lookup_calls.load(Ordering::Relaxed)
    }

    async fn answer(&self, category: RecordCategory) -> Result<(), SourceError> {
        let latency = self.state().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let state = self.state();
        if !state.reachable || state.failing.contains(&category) {
            return Err(SourceError::Unavailable {
                source_name: self.name.clone(),
                reason: "mock source unreachable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteSource for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_capability(&self, category: RecordCategory) -> bool {
        !self.state().absent.contains(&category)
    }

    async fn fetch_page(
        &self,
        category: RecordCategory,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Page, SourceError> {
        self.page_calls.fetch_add(1, Ordering::Relaxed);
        self.answer(category).await?;

        let state = self.state();
        let Some(records) = state.records.get(&category) else {
            return Ok(Page::default());
        };
        let lower = match cursor {
            Some(cursor) => Bound::Excluded(cursor.to_string()),
            None => Bound::Unbounded,
        };
        let mut remaining = records.range((lower, Bound::Unbounded));
        let page: Vec<(&String, &Value)> = remaining.by_ref().take(limit.max(1)).collect();
        let next_cursor = match (remaining.next(), page.last()) {
            (Some(_), Some((id, _))) => Some((*id).clone()),
            _ => None,
        };

        Ok(Page {
            records: page.into_iter().map(|(_, record)| record.clone()).collect(),
            next_cursor,
        })
    }

    async fn fetch_one(&self, category: RecordCategory, id: &str) -> Result<Lookup, SourceError> {
        self.lookup_calls.fetch_add(1, Ordering::Relaxed);
        self.answer(category).await?;

        Ok(self
            .state()
            .records
            .get(&category)
            .and_then(|records| records.get(id))
            .map(|record| Lookup::Found(record.clone()))
            .unwrap_or(Lookup::NotFound))
    }
}

/// Factory handing out pre-registered [`MockSource`]s by name.
#[derive(Debug, Default)]
pub struct MockSourceFactory {
    sources: Mutex<HashMap<String, Arc<MockSource>>>,
    builds: AtomicU64,
}

impl MockSourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, source: Arc<MockSource>) {
        self.sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source.name().to_string(), source);
    }

    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }
}

impl SourceFactory for MockSourceFactory {
    fn build(&self, config: &SourceConfig, _timeout: Duration) -> Result<SourceRef, ConfigError> {
        self.builds.fetch_add(1, Ordering::Relaxed);
        let source = self
            .sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&config.name)
            .cloned()
            .ok_or_else(|| ConfigError::MissingRequired {
                field: format!("mock source {}", config.name),
            })?;
        Ok(source)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for twinmesh inputs.

    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    /// A single write against one collection.
    #[derive(Debug, Clone, PartialEq)]
    pub enum StoreOp {
        Upsert { id: String, payload: Value },
        Delete { id: String },
    }

    pub fn arb_category() -> impl Strategy<Value = RecordCategory> {
        prop_oneof![
            Just(RecordCategory::ShellDescriptor),
            Just(RecordCategory::Shell),
            Just(RecordCategory::SubmodelDescriptor),
            Just(RecordCategory::Submodel),
        ]
    }

    /// Arbitrary URN-style record id.
    pub fn arb_record_id() -> impl Strategy<Value = String> {
        "urn:[a-z]{1,8}:[a-z0-9]{1,12}".prop_map(|s| s)
    }

    /// Small JSON object with a few scalar fields.
    pub fn arb_payload() -> impl Strategy<Value = Value> {
        prop::collection::btree_map("[a-z]{1,6}", any::<i32>(), 0..5).prop_map(|fields| {
            let mut object = serde_json::Map::new();
            for (key, value) in fields {
                object.insert(key, json!(value));
            }
            Value::Object(object)
        })
    }

    /// Writes drawn from a pool of eight ids so that updates and deletes
    /// hit existing records.
    pub fn arb_store_op() -> impl Strategy<Value = StoreOp> {
        let id = (0u8..8).prop_map(|n| format!("urn:op:{}", n));
        prop_oneof![
            3 => (id.clone(), arb_payload()).prop_map(|(id, payload)| StoreOp::Upsert { id, payload }),
            1 => id.prop_map(|id| StoreOp::Delete { id }),
        ]
    }

    pub fn arb_store_ops(max: usize) -> impl Strategy<Value = Vec<StoreOp>> {
        prop::collection::vec(arb_store_op(), 0..max)
    }

    /// Leaf `Property` element.
    pub fn arb_property() -> impl Strategy<Value = Value> {
        ("[a-zA-Z][a-zA-Z0-9]{0,10}", prop::option::of("[a-z0-9 ]{0,12}")).prop_map(
            |(id_short, value)| {
                let mut element = json!({"idShort": id_short, "modelType": "Property"});
                if let Some(value) = value {
                    element["value"] = json!(value);
                }
                element
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! AAS documents shaped like what registries and repositories return.

    use super::*;
    use serde_json::json;

    fn endpoint(interface: &str, href: String) -> Value {
        json!({
            "interface": interface,
            "protocolInformation": { "href": href }
        })
    }

    pub fn submodel_descriptor(id: &str, upstream: &str) -> Value {
        json!({
            "id": id,
            "idShort": id.rsplit(':').next().unwrap_or(id),
            "endpoints": [endpoint(
                "SUBMODEL-3.0",
                format!("{}/submodels/{}", upstream, encode_id(id)),
            )]
        })
    }

    pub fn shell_descriptor(id: &str, upstream: &str) -> Value {
        shell_descriptor_with_submodels(id, upstream, &[])
    }

    /// Shell descriptor embedding one submodel-descriptor summary per id.
    pub fn shell_descriptor_with_submodels(id: &str, upstream: &str, submodel_ids: &[&str]) -> Value {
        let summaries: Vec<Value> = submodel_ids
            .iter()
            .map(|sm| submodel_descriptor(sm, upstream))
            .collect();
        json!({
            "id": id,
            "idShort": id.rsplit(':').next().unwrap_or(id),
            "endpoints": [endpoint(
                "AAS-3.0",
                format!("{}/shells/{}", upstream, encode_id(id)),
            )],
            "submodelDescriptors": summaries
        })
    }

    /// Shell referencing each submodel id with a one-key reference.
    pub fn shell(id: &str, submodel_ids: &[&str]) -> Value {
        let references: Vec<Value> = submodel_ids
            .iter()
            .map(|sm| {
                json!({
                    "type": "ModelReference",
                    "keys": [{ "type": "Submodel", "value": sm }]
                })
            })
            .collect();
        json!({
            "id": id,
            "modelType": "AssetAdministrationShell",
            "assetInformation": {
                "assetKind": "Instance",
                "globalAssetId": format!("{}:asset", id)
            },
            "submodels": references
        })
    }

    /// Submodel with one element of every projected kind.
    pub fn submodel(id: &str) -> Value {
        json!({
            "id": id,
            "idShort": "TechnicalData",
            "modelType": "Submodel",
            "submodelElements": [
                {
                    "idShort": "MaxTemperature",
                    "modelType": "Property",
                    "valueType": "xs:double",
                    "value": "85.5"
                },
                {
                    "idShort": "Manufacturer",
                    "modelType": "MultiLanguageProperty",
                    "value": [
                        { "language": "en", "text": "ACME" },
                        { "language": "de", "text": "ACME GmbH" }
                    ]
                },
                {
                    "idShort": "Dimensions",
                    "modelType": "SubmodelElementCollection",
                    "value": [
                        { "idShort": "Width", "modelType": "Property", "value": "10" },
                        { "idShort": "Height", "modelType": "Property", "value": "20" }
                    ]
                },
                {
                    "idShort": "Ports",
                    "modelType": "SubmodelElementList",
                    "value": [
                        { "modelType": "Property", "value": "eth0" },
                        { "modelType": "Property", "value": "eth1" }
                    ]
                }
            ]
        })
    }

    /// Combined-service source config pointing at `url`.
    pub fn source_config(name: &str, url: &str) -> SourceConfig {
        SourceConfig {
            name: name.to_string(),
            kind: SourceKind::CombinedService {
                url: url.to_string(),
            },
            auth: Default::default(),
            polling_interval_secs: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use twinmesh_core::document::{embedded_submodel_descriptors, submodel_reference_ids};

    #[tokio::test]
    async fn test_mock_source_pages_in_id_order() {
        let source = MockSource::new("mock").with_records(
            RecordCategory::Shell,
            (0..7).map(|i| fixtures::shell(&format!("urn:s:{}", i), &[])).collect(),
        );

        let first = source.fetch_page(RecordCategory::Shell, None, 3).await.unwrap();
        assert_eq!(first.records.len(), 3);
        assert_eq!(first.next_cursor.as_deref(), Some("urn:s:2"));

        let all = source.fetch_shells(3).await.unwrap();
        assert_eq!(all.len(), 7);
        assert_eq!(source.page_calls(), 4);
    }

    #[tokio::test]
    async fn test_mock_source_reachability() {
        let source = MockSource::new("mock")
            .with_records(RecordCategory::Submodel, vec![fixtures::submodel("urn:sm:1")]);

        assert!(source.fetch_single_submodel("urn:sm:1").await.unwrap().is_found());
        source.set_reachable(false);
        assert!(source.fetch_single_submodel("urn:sm:1").await.is_err());
        source.set_reachable(true);
        source.set_category_failing(RecordCategory::Submodel, true);
        assert!(source.fetch_submodels(10).await.is_err());
        assert!(source.fetch_shells(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mock_source_capability_absent() {
        let source = MockSource::new("mock").without_capability(RecordCategory::SubmodelDescriptor);
        assert_eq!(
            source.fetch_single_submodel_descriptor("urn:x").await.unwrap(),
            Lookup::CapabilityAbsent
        );
        assert_eq!(source.lookup_calls(), 0);
    }

    #[test]
    fn test_fixture_shapes() {
        let descriptor = fixtures::shell_descriptor_with_submodels(
            "urn:s:1",
            "http://factory-a",
            &["urn:sm:1", "urn:sm:2"],
        );
        assert_eq!(embedded_submodel_descriptors(&descriptor).len(), 2);

        let shell = fixtures::shell("urn:s:1", &["urn:sm:1"]);
        assert_eq!(submodel_reference_ids(&shell).collect::<Vec<_>>(), vec!["urn:sm:1"]);
    }

    #[test]
    fn test_factory_hands_out_registered_sources() {
        let factory = MockSourceFactory::new();
        factory.register(Arc::new(MockSource::new("factory-a")));

        let config = fixtures::source_config("factory-a", "http://factory-a");
        assert!(factory.build(&config, Duration::from_secs(1)).is_ok());
        let unknown = fixtures::source_config("factory-b", "http://factory-b");
        assert!(factory.build(&unknown, Duration::from_secs(1)).is_err());
        assert_eq!(factory.builds(), 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_generated_ids_are_urns(id in generators::arb_record_id()) {
            prop_assert!(id.starts_with("urn:"));
        }

        #[test]
        fn prop_generated_payloads_are_objects(payload in generators::arb_payload()) {
            prop_assert!(payload.is_object());
        }
    }
}
