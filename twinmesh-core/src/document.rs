//! Helpers over raw AAS JSON documents
//!
//! Records stay `serde_json::Value`; these functions read the handful of
//! fields the engine relies on (ids, endpoint hrefs, submodel references) and
//! insert the synthesized local endpoint.

use serde_json::{json, Map, Value};

use crate::error::RecordError;
use crate::ident::encode_id;
use crate::RecordCategory;

/// Interface name of synthesized endpoints.
pub const LOCAL_INTERFACE: &str = "local";

const ENDPOINTS: &str = "endpoints";
const SUBMODEL_DESCRIPTORS: &str = "submodelDescriptors";

/// Extract the `id` of a record.
pub fn record_id(category: RecordCategory, doc: &Value) -> Result<String, RecordError> {
    let object = doc
        .as_object()
        .ok_or(RecordError::NotAnObject { category })?;
    match object.get("id").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(RecordError::MissingId { category }),
    }
}

/// All `endpoints[].protocolInformation.href` values of a descriptor.
pub fn endpoint_hrefs(doc: &Value) -> impl Iterator<Item = &str> {
    doc.get(ENDPOINTS)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|endpoint| {
            endpoint
                .get("protocolInformation")
                .and_then(|info| info.get("href"))
                .and_then(Value::as_str)
        })
}

/// Whether any endpoint href of `doc` contains `base_url`.
pub fn endpoints_contain(doc: &Value, base_url: &str) -> bool {
    endpoint_hrefs(doc).any(|href| href.contains(base_url))
}

/// Submodel descriptor summaries embedded in a shell descriptor.
pub fn embedded_submodel_descriptors(shell_descriptor: &Value) -> &[Value] {
    shell_descriptor
        .get(SUBMODEL_DESCRIPTORS)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Ids of the submodels a shell references (`submodels[].keys[].value`).
pub fn submodel_reference_ids(shell: &Value) -> impl Iterator<Item = &str> {
    shell
        .get("submodels")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|reference| reference.get("keys").and_then(Value::as_array))
        .flatten()
        .filter_map(|key| key.get("value").and_then(Value::as_str))
}

const SHELL_DESCRIPTOR_FIELDS: &[&str] =
    &["idShort", "description", "displayName", "administration", "extensions"];
const ASSET_INFORMATION_FIELDS: &[&str] =
    &["assetKind", "assetType", "globalAssetId", "specificAssetIds"];
const SUBMODEL_DESCRIPTOR_FIELDS: &[&str] = &[
    "idShort",
    "description",
    "displayName",
    "administration",
    "semanticId",
    "supplementalSemanticIds",
    "extensions",
];

fn copy_fields(doc: &Value, fields: &[&str]) -> Map<String, Value> {
    fields
        .iter()
        .filter_map(|field| doc.get(*field).map(|value| (field.to_string(), value.clone())))
        .collect()
}

fn local_endpoint(href: String) -> Value {
    json!({
        "interface": LOCAL_INTERFACE,
        "protocolInformation": { "href": href },
    })
}

/// Builder for the endpoint pointing at this service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEndpoints {
    base_url: String,
}

impl LocalEndpoints {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn shell_href(&self, id: &str) -> String {
        format!("{}/api/shell_repo/shells/{}", self.base_url, encode_id(id))
    }

    pub fn submodel_href(&self, id: &str) -> String {
        format!(
            "{}/api/submodel_repo/submodels/{}",
            self.base_url,
            encode_id(id)
        )
    }

    /// Prepend the local endpoint to a shell descriptor and to every embedded
    /// submodel descriptor summary. Returns how many endpoints were inserted.
    pub fn apply_to_shell_descriptor(&self, doc: &mut Value) -> usize {
        let mut inserted = 0;
        if let Some(id) = doc.get("id").and_then(Value::as_str).map(str::to_string) {
            let href = self.shell_href(&id);
            if self.prepend(doc, href) {
                inserted += 1;
            }
        }
        if let Some(summaries) = doc.get_mut(SUBMODEL_DESCRIPTORS).and_then(Value::as_array_mut) {
            for summary in summaries {
                inserted += usize::from(self.apply_to_submodel_descriptor(summary));
            }
        }
        inserted
    }

    /// Prepend the local endpoint to a submodel descriptor.
    pub fn apply_to_submodel_descriptor(&self, doc: &mut Value) -> bool {
        match doc.get("id").and_then(Value::as_str).map(str::to_string) {
            Some(id) => {
                let href = self.submodel_href(&id);
                self.prepend(doc, href)
            }
            None => false,
        }
    }

    /// Descriptor advertising a shell served from this instance, for
    /// registration with an external shell registry. Each submodel reference
    /// becomes a submodel descriptor summary pointing at the local repository.
    pub fn shell_descriptor_for(&self, shell: &Value) -> Result<Value, RecordError> {
        let id = record_id(RecordCategory::Shell, shell)?;
        let mut descriptor = copy_fields(shell, SHELL_DESCRIPTOR_FIELDS);
        if let Some(asset) = shell.get("assetInformation") {
            descriptor.extend(copy_fields(asset, ASSET_INFORMATION_FIELDS));
        }

        let summaries: Vec<Value> = shell
            .get("submodels")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|reference| reference.pointer("/keys/0/value").and_then(Value::as_str))
            .map(|submodel_id| {
                json!({
                    "id": submodel_id,
                    "endpoints": [local_endpoint(self.submodel_href(submodel_id))],
                })
            })
            .collect();

        descriptor.insert(
            ENDPOINTS.to_string(),
            json!([local_endpoint(self.shell_href(&id))]),
        );
        descriptor.insert(SUBMODEL_DESCRIPTORS.to_string(), Value::Array(summaries));
        descriptor.insert("id".to_string(), Value::String(id));
        Ok(Value::Object(descriptor))
    }

    /// Descriptor advertising a submodel served from this instance.
    pub fn submodel_descriptor_for(&self, submodel: &Value) -> Result<Value, RecordError> {
        let id = record_id(RecordCategory::Submodel, submodel)?;
        let mut descriptor = copy_fields(submodel, SUBMODEL_DESCRIPTOR_FIELDS);
        descriptor.insert(
            ENDPOINTS.to_string(),
            json!([local_endpoint(self.submodel_href(&id))]),
        );
        descriptor.insert("id".to_string(), Value::String(id));
        Ok(Value::Object(descriptor))
    }

    fn prepend(&self, doc: &mut Value, href: String) -> bool {
        if endpoints_contain(doc, &self.base_url) {
            return false;
        }
        let Some(object) = doc.as_object_mut() else {
            return false;
        };
        let endpoint = local_endpoint(href);
        match object.get_mut(ENDPOINTS) {
            Some(Value::Array(endpoints)) => endpoints.insert(0, endpoint),
            _ => {
                object.insert(ENDPOINTS.to_string(), Value::Array(vec![endpoint]));
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> Value {
        json!({
            "id": "urn:shell:1",
            "endpoints": [
                {"interface": "AAS-3.0", "protocolInformation": {"href": "http://factory-a/shells/1"}}
            ],
            "submodelDescriptors": [
                {"id": "urn:sm:1", "endpoints": []},
                {"id": "urn:sm:2"}
            ]
        })
    }

    #[test]
    fn test_record_id() {
        assert_eq!(
            record_id(RecordCategory::Shell, &json!({"id": "x"})).unwrap(),
            "x"
        );
        assert_eq!(
            record_id(RecordCategory::Shell, &json!({"idShort": "x"})),
            Err(RecordError::MissingId {
                category: RecordCategory::Shell
            })
        );
        assert_eq!(
            record_id(RecordCategory::Shell, &json!([1, 2])),
            Err(RecordError::NotAnObject {
                category: RecordCategory::Shell
            })
        );
    }

    #[test]
    fn test_local_endpoint_prepended_once() {
        let local = LocalEndpoints::new("http://mesh:8000/");
        let mut doc = descriptor();

        assert_eq!(local.apply_to_shell_descriptor(&mut doc), 3);
        let hrefs: Vec<&str> = endpoint_hrefs(&doc).collect();
        assert_eq!(hrefs.len(), 2);
        assert_eq!(hrefs[0], local.shell_href("urn:shell:1"));
        assert_eq!(doc["endpoints"][0]["interface"], "local");

        let summaries = embedded_submodel_descriptors(&doc);
        assert_eq!(
            endpoint_hrefs(&summaries[1]).next(),
            Some(local.submodel_href("urn:sm:2").as_str())
        );

        let snapshot = doc.clone();
        assert_eq!(local.apply_to_shell_descriptor(&mut doc), 0);
        assert_eq!(doc, snapshot);
    }

    #[test]
    fn test_local_hrefs_use_encoded_id() {
        let local = LocalEndpoints::new("http://mesh:8000");
        assert_eq!(
            local.shell_href("urn:a"),
            "http://mesh:8000/api/shell_repo/shells/dXJuOmE"
        );
        assert_eq!(
            local.submodel_href("urn:a"),
            "http://mesh:8000/api/submodel_repo/submodels/dXJuOmE"
        );
    }

    #[test]
    fn test_endpoints_contain() {
        let doc = descriptor();
        assert!(endpoints_contain(&doc, "http://factory-a"));
        assert!(!endpoints_contain(&doc, "http://factory-b"));
        assert!(!endpoints_contain(&json!({"id": "x"}), "http://factory-a"));
    }

    #[test]
    fn test_submodel_reference_ids() {
        let shell = json!({
            "id": "urn:shell:1",
            "submodels": [
                {"type": "ModelReference", "keys": [{"type": "Submodel", "value": "urn:sm:1"}]},
                {"keys": [{"type": "Submodel", "value": "urn:sm:2"}]},
                {"keys": []}
            ]
        });
        let ids: Vec<&str> = submodel_reference_ids(&shell).collect();
        assert_eq!(ids, vec!["urn:sm:1", "urn:sm:2"]);
        assert_eq!(submodel_reference_ids(&json!({"id": "x"})).count(), 0);
    }

    #[test]
    fn test_shell_descriptor_for_local_shell() {
        let local = LocalEndpoints::new("http://mesh:8000");
        let shell = json!({
            "id": "urn:shell:1",
            "idShort": "Press",
            "assetInformation": {"assetKind": "Instance", "globalAssetId": "urn:asset:1"},
            "submodels": [
                {"keys": [{"type": "Submodel", "value": "urn:sm:1"}]},
                {"keys": []}
            ]
        });

        let descriptor = local.shell_descriptor_for(&shell).unwrap();
        assert_eq!(descriptor["id"], "urn:shell:1");
        assert_eq!(descriptor["idShort"], "Press");
        assert_eq!(descriptor["globalAssetId"], "urn:asset:1");
        assert_eq!(descriptor["assetKind"], "Instance");
        assert_eq!(
            endpoint_hrefs(&descriptor).collect::<Vec<_>>(),
            vec![local.shell_href("urn:shell:1")]
        );

        let summaries = embedded_submodel_descriptors(&descriptor);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0]["id"], "urn:sm:1");
        assert_eq!(summaries[0]["endpoints"][0]["interface"], LOCAL_INTERFACE);
        assert_eq!(
            endpoint_hrefs(&summaries[0]).next(),
            Some(local.submodel_href("urn:sm:1").as_str())
        );
    }

    #[test]
    fn test_submodel_descriptor_for_local_submodel() {
        let local = LocalEndpoints::new("http://mesh:8000");
        let submodel = json!({
            "id": "urn:sm:1",
            "idShort": "Nameplate",
            "semanticId": {"type": "ExternalReference", "keys": []},
            "submodelElements": [{"idShort": "Speed", "value": "42"}]
        });

        let descriptor = local.submodel_descriptor_for(&submodel).unwrap();
        assert_eq!(descriptor["idShort"], "Nameplate");
        assert!(descriptor.get("semanticId").is_some());
        assert!(descriptor.get("submodelElements").is_none());
        assert_eq!(descriptor["endpoints"][0]["interface"], LOCAL_INTERFACE);

        assert!(matches!(
            local.submodel_descriptor_for(&json!({"idShort": "anonymous"})),
            Err(RecordError::MissingId { .. })
        ));
    }
}
