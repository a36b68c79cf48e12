//! Value-only projection of submodels
//!
//! Strips a submodel down to `{idShort: value}` pairs, recursing into lists
//! and collections. Elements without a value are omitted at the top level and
//! rendered as `null` inside lists and collections.

use serde_json::{Map, Value};

use crate::error::RecordError;
use crate::RecordCategory;

/// Projected submodel: element `idShort` to projected value.
pub type ValueOnly = Map<String, Value>;

/// Project a submodel document. A submodel without elements projects to an
/// empty object.
pub fn submodel_value_only(submodel: &Value) -> Result<ValueOnly, RecordError> {
    let object = submodel.as_object().ok_or(RecordError::NotAnObject {
        category: RecordCategory::Submodel,
    })?;

    let mut projected = Map::new();
    let elements = object
        .get("submodelElements")
        .and_then(Value::as_array)
        .into_iter()
        .flatten();
    for element in elements {
        let Some(id_short) = element.get("idShort").and_then(Value::as_str) else {
            continue;
        };
        if let Some(value) = element_value(element) {
            projected.insert(id_short.to_string(), value);
        }
    }
    Ok(projected)
}

fn element_value(element: &Value) -> Option<Value> {
    let value = element.get("value")?;
    let model_type = element
        .get("modelType")
        .and_then(Value::as_str)
        .unwrap_or_default();

    match model_type {
        "SubmodelElementList" => Some(Value::Array(
            value
                .as_array()?
                .iter()
                .map(|item| element_value(item).unwrap_or(Value::Null))
                .collect(),
        )),
        "SubmodelElementCollection" => {
            let mut collection = Map::new();
            for item in value.as_array()? {
                if let Some(id_short) = item.get("idShort").and_then(Value::as_str) {
                    collection.insert(
                        id_short.to_string(),
                        element_value(item).unwrap_or(Value::Null),
                    );
                }
            }
            Some(Value::Object(collection))
        }
        "MultiLanguageProperty" => Some(Value::Array(
            value
                .as_array()?
                .iter()
                .filter_map(|entry| {
                    let language = entry.get("language")?.as_str()?;
                    let text = entry.get("text")?.clone();
                    let mut pair = Map::new();
                    pair.insert(language.to_string(), text);
                    Some(Value::Object(pair))
                })
                .collect(),
        )),
        _ if value.is_null() => None,
        _ => Some(value.clone()),
    }
}
