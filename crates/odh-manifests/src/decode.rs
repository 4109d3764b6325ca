//! Strict decoding of rendered YAML into unstructured objects
//!
//! A document that does not look like a Kubernetes object fails the whole
//! render. Dropping it would deploy an incomplete set of resources.

use kube::api::DynamicObject;
use odh_common::resources::from_value;
use odh_common::yaml::parse_yaml_multi;
use serde_json::Value;

use crate::error::ManifestError;

/// Parse a YAML stream and decode every document
pub fn decode_documents(source_name: &str, text: &str) -> Result<Vec<DynamicObject>, ManifestError> {
    let docs = parse_yaml_multi(text)
        .map_err(|e| ManifestError::decode(source_name, e.to_string()))?;
    docs.into_iter()
        .enumerate()
        .map(|(i, doc)| decode_object(&format!("{source_name}[{i}]"), doc))
        .collect()
}

/// Decode one JSON document into an unstructured object
pub fn decode_object(source_name: &str, doc: Value) -> Result<DynamicObject, ManifestError> {
    let map = doc
        .as_object()
        .ok_or_else(|| ManifestError::decode(source_name, "document is not a mapping"))?;

    for field in ["apiVersion", "kind"] {
        match map.get(field).and_then(Value::as_str) {
            Some(s) if !s.is_empty() => {}
            _ => {
                return Err(ManifestError::decode(
                    source_name,
                    format!("missing or empty {field}"),
                ))
            }
        }
    }

    let metadata = map
        .get("metadata")
        .and_then(Value::as_object)
        .ok_or_else(|| ManifestError::decode(source_name, "missing metadata"))?;
    let has_name = ["name", "generateName"]
        .iter()
        .any(|k| metadata.get(*k).and_then(Value::as_str).is_some_and(|s| !s.is_empty()));
    if !has_name {
        return Err(ManifestError::decode(source_name, "missing metadata.name"));
    }

    from_value(doc).map_err(|e| ManifestError::decode(source_name, e.to_string()))
}
