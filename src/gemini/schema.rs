//! JSON Schema -> Gemini function parameter schema.
//!
//! Gemini accepts an OpenAPI subset. Keywords outside it are rejected by the
//! API, so they are dropped (or folded into the description) here.

use serde_json::{json, Map, Value};

/// Keywords Gemini understands on a schema object.
const SUPPORTED_KEYWORDS: [&str; 18] = [
    "type",
    "format",
    "title",
    "description",
    "nullable",
    "enum",
    "properties",
    "required",
    "items",
    "minItems",
    "maxItems",
    "minimum",
    "maximum",
    "minLength",
    "maxLength",
    "pattern",
    "anyOf",
    "propertyOrdering",
];

/// Parameters for a function without any.
pub fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

/// Clean a tool's parameter schema. A missing or non-object schema becomes
/// the empty object schema.
pub fn clean_parameters(parameters: Option<&Value>) -> Value {
    match parameters {
        Some(Value::Object(_)) => {
            let mut value = parameters.cloned().unwrap_or_default();
            clean_schema(&mut value);
            value
        }
        _ => empty_object_schema(),
    }
}

fn clean_schema(value: &mut Value) {
    let Value::Object(map) = value else {
        return;
    };

    if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
        let name = reference.rsplit('/').next().unwrap_or(reference).to_string();
        let hint = match map.get("description").and_then(Value::as_str) {
            Some(existing) if !existing.is_empty() => format!("{} (See: {})", existing, name),
            _ => format!("See: {}", name),
        };
        *value = json!({"type": "object", "description": hint});
        return;
    }

    if let Some(constant) = map.remove("const") {
        map.entry("enum").or_insert_with(|| Value::Array(vec![constant]));
    }
    if let Some(Value::Array(values)) = map.get_mut("enum") {
        for v in values.iter_mut() {
            if !v.is_string() {
                *v = Value::String(value_to_string(v));
            }
        }
    }

    merge_all_of(map);
    flatten_one_of(map);
    flatten_type_array(map);

    map.retain(|key, _| SUPPORTED_KEYWORDS.contains(&key.as_str()));

    if let Some(Value::Object(properties)) = map.get_mut("properties") {
        for child in properties.values_mut() {
            clean_schema(child);
        }
    }
    if let Some(items) = map.get_mut("items") {
        clean_schema(items);
    }
    if let Some(Value::Array(variants)) = map.get_mut("anyOf") {
        for variant in variants.iter_mut() {
            clean_schema(variant);
        }
    }

    cleanup_required(map);
}

/// Fold `allOf` members into the parent object.
fn merge_all_of(map: &mut Map<String, Value>) {
    let Some(Value::Array(members)) = map.remove("allOf") else {
        return;
    };
    for member in members {
        let Value::Object(member) = member else {
            continue;
        };
        for (key, val) in member {
            match (key.as_str(), map.get_mut(&key)) {
                ("properties", Some(Value::Object(existing))) => {
                    if let Value::Object(props) = val {
                        existing.extend(props);
                    }
                }
                ("required", Some(Value::Array(existing))) => {
                    if let Value::Array(req) = val {
                        for r in req {
                            if !existing.contains(&r) {
                                existing.push(r);
                            }
                        }
                    }
                }
                (_, None) => {
                    map.insert(key, val);
                }
                _ => {}
            }
        }
    }
}

/// `oneOf` is not supported; it becomes `anyOf`.
fn flatten_one_of(map: &mut Map<String, Value>) {
    if let Some(one_of) = map.remove("oneOf") {
        map.entry("anyOf").or_insert(one_of);
    }
}

/// `"type": ["string", "null"]` becomes `"type": "string", "nullable": true`.
fn flatten_type_array(map: &mut Map<String, Value>) {
    let Some(Value::Array(types)) = map.get("type") else {
        return;
    };
    let nullable = types.iter().any(|t| t.as_str() == Some("null"));
    let first = types
        .iter()
        .filter_map(Value::as_str)
        .find(|t| *t != "null")
        .unwrap_or("string")
        .to_string();

    map.insert("type".to_string(), Value::String(first));
    if nullable {
        map.insert("nullable".to_string(), Value::Bool(true));
    }
}

/// Drop `required` entries that name no property.
fn cleanup_required(map: &mut Map<String, Value>) {
    let known: Vec<String> = match map.get("properties") {
        Some(Value::Object(props)) => props.keys().cloned().collect(),
        _ => Vec::new(),
    };
    let Some(Value::Array(required)) = map.get_mut("required") else {
        return;
    };
    required.retain(|r| r.as_str().is_some_and(|name| known.iter().any(|k| k == name)));
    if required.is_empty() {
        map.remove("required");
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_parameters_become_empty_object() {
        assert_eq!(clean_parameters(None), json!({"type": "object", "properties": {}}));
        assert_eq!(
            clean_parameters(Some(&json!(null))),
            json!({"type": "object", "properties": {}})
        );
    }

    #[test]
    fn drops_unsupported_keywords_recursively() {
        let cleaned = clean_parameters(Some(&json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "query": {"type": "string", "default": "x", "examples": ["a"]},
                "tags": {"type": "array", "items": {"type": "string", "x-internal": true}}
            },
            "required": ["query", "ghost"]
        })));

        assert_eq!(
            cleaned,
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "tags": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["query"]
            })
        );
    }

    #[test]
    fn flattens_nullable_type_arrays_and_const() {
        let cleaned = clean_parameters(Some(&json!({
            "type": "object",
            "properties": {
                "limit": {"type": ["integer", "null"]},
                "mode": {"const": "fast"},
                "level": {"enum": [1, 2]}
            }
        })));

        assert_eq!(
            cleaned["properties"]["limit"],
            json!({"type": "integer", "nullable": true})
        );
        assert_eq!(cleaned["properties"]["mode"], json!({"enum": ["fast"]}));
        assert_eq!(cleaned["properties"]["level"], json!({"enum": ["1", "2"]}));
    }

    #[test]
    fn refs_become_described_objects() {
        let cleaned = clean_parameters(Some(&json!({
            "type": "object",
            "properties": {"owner": {"$ref": "#/$defs/User", "description": "Owner"}},
            "$defs": {"User": {"type": "object"}}
        })));

        assert_eq!(
            cleaned["properties"]["owner"],
            json!({"type": "object", "description": "Owner (See: User)"})
        );
        assert!(cleaned.get("$defs").is_none());
    }

    #[test]
    fn merges_all_of_and_renames_one_of() {
        let cleaned = clean_parameters(Some(&json!({
            "allOf": [
                {"type": "object", "properties": {"a": {"type": "string"}}, "required": ["a"]},
                {"properties": {"b": {"oneOf": [{"type": "string"}, {"type": "number"}]}}}
            ]
        })));

        assert_eq!(
            cleaned,
            json!({
                "type": "object",
                "properties": {
                    "a": {"type": "string"},
                    "b": {"anyOf": [{"type": "string"}, {"type": "number"}]}
                },
                "required": ["a"]
            })
        );
    }
}
