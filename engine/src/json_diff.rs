//! Structural delta primitive for JSON attribute documents.
//!
//! A delta mirrors the shape of the documents it describes. Objects are
//! compared key by key and nested objects are recursed into; every other
//! change is recorded as a small array:
//!
//! - `[new]`: key added
//! - `[old, new]`: value replaced
//! - `[old, 0, 0]`: key removed
//!
//! Arrays and scalars are replaced wholesale. Equal documents produce `{}`.

use crate::{diff::AttributeDiffer, error::Result, Error};
use serde_json::{Map, Value};

/// Attribute differ producing structural JSON deltas.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDeltaDiffer;

impl JsonDeltaDiffer {
    pub fn new() -> Self {
        Self
    }
}

impl AttributeDiffer for JsonDeltaDiffer {
    fn diff(&self, before: &Value, after: &Value) -> Result<String> {
        let delta = delta(before, after).unwrap_or_else(|| Value::Object(Map::new()));
        Ok(serde_json::to_string(&delta)?)
    }

    fn patch(&self, before: &Value, delta: &str) -> Result<Value> {
        let delta: Value = serde_json::from_str(delta)
            .map_err(|e| Error::InvalidDiff(format!("attribute delta is not JSON: {e}")))?;
        if is_removal(&delta) {
            return Err(Error::InvalidDiff(
                "removal marker outside of an object".into(),
            ));
        }
        apply(before, &delta)
    }
}

fn delta(before: &Value, after: &Value) -> Option<Value> {
    if before == after {
        return None;
    }

    match (before, after) {
        (Value::Object(old), Value::Object(new)) => {
            let mut changes = Map::new();
            for (key, old_value) in old {
                match new.get(key) {
                    None => {
                        changes.insert(key.clone(), removal(old_value));
                    }
                    Some(new_value) => {
                        if let Some(d) = delta(old_value, new_value) {
                            changes.insert(key.clone(), d);
                        }
                    }
                }
            }
            for (key, new_value) in new {
                if !old.contains_key(key) {
                    changes.insert(key.clone(), Value::Array(vec![new_value.clone()]));
                }
            }
            Some(Value::Object(changes))
        }
        _ => Some(Value::Array(vec![before.clone(), after.clone()])),
    }
}

fn removal(old: &Value) -> Value {
    Value::Array(vec![old.clone(), Value::from(0), Value::from(0)])
}

fn is_removal(delta: &Value) -> bool {
    matches!(delta, Value::Array(items)
        if items.len() == 3 && items[1] == Value::from(0) && items[2] == Value::from(0))
}

fn apply(base: &Value, delta: &Value) -> Result<Value> {
    match delta {
        Value::Array(items) => match items.as_slice() {
            [new] | [_, new] => Ok(new.clone()),
            _ => Err(Error::InvalidDiff(format!(
                "unrecognised change marker with {} elements",
                items.len()
            ))),
        },
        Value::Object(changes) if changes.is_empty() => Ok(base.clone()),
        Value::Object(changes) => {
            let mut target = base
                .as_object()
                .cloned()
                .ok_or_else(|| Error::InvalidDiff("object delta applied to a non-object".into()))?;

            for (key, change) in changes {
                if is_removal(change) {
                    target.remove(key);
                    continue;
                }
                let next = match change {
                    Value::Object(_) => {
                        let current = target.get(key).ok_or_else(|| {
                            Error::InvalidDiff(format!("nested delta for missing key '{key}'"))
                        })?;
                        apply(current, change)?
                    }
                    _ => apply(&Value::Null, change)?,
                };
                target.insert(key.clone(), next);
            }
            Ok(Value::Object(target))
        }
        other => Err(Error::InvalidDiff(format!(
            "unexpected delta node {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roundtrip(before: Value, after: Value) -> String {
        let differ = JsonDeltaDiffer::new();
        let delta = differ.diff(&before, &after).unwrap();
        assert_eq!(differ.patch(&before, &delta).unwrap(), after, "delta {delta}");
        delta
    }

    #[test]
    fn changed_field() {
        let delta = roundtrip(json!({"id": 1, "name": "v1"}), json!({"id": 1, "name": "v2"}));
        assert_eq!(delta, r#"{"name":["v1","v2"]}"#);
    }

    #[test]
    fn added_and_removed_fields() {
        let delta = roundtrip(json!({"a": 1, "b": 2}), json!({"b": 2, "c": 3}));
        let parsed: Value = serde_json::from_str(&delta).unwrap();
        assert_eq!(parsed, json!({"a": [1, 0, 0], "c": [3]}));
    }

    #[test]
    fn nested_objects_are_recursed() {
        let delta = roundtrip(
            json!({"meta": {"source": "survey", "year": 2019}}),
            json!({"meta": {"source": "survey", "year": 2020}}),
        );
        assert_eq!(delta, r#"{"meta":{"year":[2019,2020]}}"#);
    }

    #[test]
    fn arrays_and_type_changes_replace_wholesale() {
        roundtrip(json!({"tags": [1, 2]}), json!({"tags": [1, 2, 3]}));
        roundtrip(json!({"v": {"x": 1}}), json!({"v": "flat"}));
        roundtrip(json!([1]), json!({"now": "object"}));
    }

    #[test]
    fn null_values_survive() {
        roundtrip(json!({"a": 1}), json!({"a": null}));
        roundtrip(json!({"a": null}), json!({"a": null, "b": null}));
    }

    #[test]
    fn equal_documents_produce_empty_delta() {
        assert_eq!(roundtrip(json!({"a": 1}), json!({"a": 1})), "{}");
        assert_eq!(roundtrip(json!(5), json!(5)), "{}");
    }

    #[test]
    fn malformed_deltas_rejected() {
        let differ = JsonDeltaDiffer::new();
        let base = json!({"a": 1});
        assert!(differ.patch(&base, "not json").is_err());
        assert!(differ.patch(&base, "[1, 0, 0]").is_err());
        assert!(differ.patch(&base, "[1, 2, 3, 4]").is_err());
        assert!(differ.patch(&base, r#"{"missing": {"x": [1]}}"#).is_err());
        assert!(differ.patch(&json!(3), r#"{"a": [1]}"#).is_err());
        assert!(differ.patch(&base, "17").is_err());
    }
}
