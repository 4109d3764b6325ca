//! YAML parsing utilities using yaml-rust2
//!
//! Manifests, kustomization files and rendered templates are YAML. They are
//! converted to `serde_json::Value` so the rest of the operator only deals
//! with JSON-shaped objects.

use serde_json::{Map, Number, Value};
use yaml_rust2::{Yaml, YamlLoader};

/// Error type for YAML parsing
#[derive(Debug, Clone, PartialEq)]
pub struct YamlError(String);

impl std::fmt::Display for YamlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for YamlError {}

/// Parse a YAML string into a serde_json::Value.
///
/// For multi-document YAML, returns only the first document.
/// Returns `Value::Null` for empty input.
pub fn parse_yaml(input: &str) -> Result<Value, YamlError> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| YamlError(e.to_string()))?;
    match docs.into_iter().next() {
        Some(doc) => yaml_to_json(doc),
        None => Ok(Value::Null),
    }
}

/// Parse a multi-document YAML stream into its non-empty documents.
///
/// Empty documents (a leading `---`, a trailing separator, a file that is
/// only comments) are dropped. A document that is a list is flattened into
/// its items, and a `kind: List` document into its `items`, which is how
/// tools like `helm template` and `kubectl` emit several objects at once.
pub fn parse_yaml_multi(input: &str) -> Result<Vec<Value>, YamlError> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| YamlError(e.to_string()))?;
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        match yaml_to_json(doc)? {
            Value::Null => {}
            Value::Array(items) => out.extend(items.into_iter().filter(|v| !v.is_null())),
            Value::Object(mut map) if map.get("kind").and_then(Value::as_str) == Some("List") => {
                if let Some(Value::Array(items)) = map.remove("items") {
                    out.extend(items);
                }
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Convert a yaml_rust2::Yaml value to serde_json::Value
fn yaml_to_json(yaml: Yaml) -> Result<Value, YamlError> {
    match yaml {
        Yaml::Null => Ok(Value::Null),
        Yaml::Boolean(b) => Ok(Value::Bool(b)),
        Yaml::Integer(i) => Ok(Value::Number(i.into())),
        Yaml::Real(s) => {
            let f: f64 = s
                .parse()
                .map_err(|e: std::num::ParseFloatError| YamlError(e.to_string()))?;
            Ok(Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null))
        }
        Yaml::String(s) => Ok(Value::String(s)),
        Yaml::Array(arr) => arr
            .into_iter()
            .map(yaml_to_json)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Yaml::Hash(map) => map
            .into_iter()
            .map(|(k, v)| {
                let key = match k {
                    Yaml::String(s) => s,
                    Yaml::Integer(i) => i.to_string(),
                    Yaml::Real(r) => r,
                    Yaml::Boolean(b) => b.to_string(),
                    Yaml::Null => "null".to_string(),
                    _ => return Err(YamlError("unsupported YAML key type".to_string())),
                };
                yaml_to_json(v).map(|v| (key, v))
            })
            .collect::<Result<Map<String, Value>, _>>()
            .map(Value::Object),
        Yaml::Alias(_) => Err(YamlError("YAML aliases not supported".to_string())),
        Yaml::BadValue => Err(YamlError("bad YAML value".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml_nested() {
        let yaml = r#"
metadata:
  name: odh-dashboard
  namespace: opendatahub
spec:
  replicas: 2
"#;
        let result = parse_yaml(yaml).unwrap();
        assert_eq!(result["metadata"]["name"], "odh-dashboard");
        assert_eq!(result["spec"]["replicas"], 2);
    }

    #[test]
    fn test_parse_yaml_empty_is_null() {
        assert_eq!(parse_yaml("").unwrap(), Value::Null);
    }

    #[test]
    fn test_multi_document_skips_empty_documents() {
        let yaml = r#"---
apiVersion: v1
kind: ConfigMap
metadata:
  name: one
---
# only a comment
---
apiVersion: v1
kind: Service
metadata:
  name: two
---
"#;
        let docs = parse_yaml_multi(yaml).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["kind"], "ConfigMap");
        assert_eq!(docs[1]["metadata"]["name"], "two");
    }

    #[test]
    fn test_multi_document_flattens_lists() {
        let yaml = r#"
apiVersion: v1
kind: List
items:
  - apiVersion: v1
    kind: ConfigMap
    metadata:
      name: a
  - apiVersion: v1
    kind: ConfigMap
    metadata:
      name: b
"#;
        let docs = parse_yaml_multi(yaml).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1]["metadata"]["name"], "b");
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        let err = parse_yaml_multi("key: [unclosed").unwrap_err();
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn test_boolean_and_float_values() {
        let result = parse_yaml("enabled: true\nratio: 0.5").unwrap();
        assert_eq!(result["enabled"], true);
        assert_eq!(result["ratio"], 0.5);
    }
}
