//! JSON-schema derivation for strict structured output.
//!
//! OpenAI's `json_schema` response format requires:
//! 1. `additionalProperties: false` on every object schema
//! 2. ALL properties listed in `required`, nullable ones included
//! 3. a fully inlined schema (no `$ref`)
//!
//! `schemars` produces none of those by default, so the derived schema is
//! post-processed here.

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;

/// Types usable as a strict structured-output target.
///
/// Blanket-implemented for anything that is `JsonSchema + DeserializeOwned`.
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    fn response_schema() -> serde_json::Value {
        let mut value = serde_json::to_value(schema_for!(Self)).unwrap_or_default();

        let definitions = value.get("definitions").cloned();
        if let Some(defs) = &definitions {
            resolve_refs(&mut value, defs);
        }
        strictify(&mut value);

        if let serde_json::Value::Object(map) = &mut value {
            map.remove("definitions");
            map.remove("$schema");
        }

        value
    }
}

impl<T: JsonSchema + DeserializeOwned> StructuredOutput for T {}

/// Add `additionalProperties: false` and an exhaustive `required` list to
/// every object schema, recursively.
fn strictify(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            if map.get("type") == Some(&serde_json::Value::String("object".to_string())) {
                map.insert(
                    "additionalProperties".to_string(),
                    serde_json::Value::Bool(false),
                );
                if let Some(serde_json::Value::Object(props)) = map.get("properties") {
                    let keys: Vec<serde_json::Value> = props
                        .keys()
                        .map(|k| serde_json::Value::String(k.clone()))
                        .collect();
                    map.insert("required".to_string(), serde_json::Value::Array(keys));
                }
            }
            for (_, v) in map.iter_mut() {
                strictify(v);
            }
        }
        serde_json::Value::Array(arr) => {
            for item in arr.iter_mut() {
                strictify(item);
            }
        }
        _ => {}
    }
}

/// Replace `#/definitions/...` references (and single-element `allOf`
/// wrappers schemars emits around them) with the referenced schema.
fn resolve_refs(value: &mut serde_json::Value, definitions: &serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(path)) = map.get("$ref").cloned() {
                if let Some(name) = path.strip_prefix("#/definitions/") {
                    if let Some(def) = definitions.get(name) {
                        *value = def.clone();
                        resolve_refs(value, definitions);
                        return;
                    }
                }
            }
            if let Some(serde_json::Value::Array(all_of)) = map.get("allOf").cloned() {
                if all_of.len() == 1 {
                    *value = all_of.into_iter().next().unwrap();
                    resolve_refs(value, definitions);
                    return;
                }
            }
            for (_, v) in map.iter_mut() {
                resolve_refs(v, definitions);
            }
        }
        serde_json::Value::Array(arr) => {
            for item in arr.iter_mut() {
                resolve_refs(item, definitions);
            }
        }
        _ => {}
    }
}
