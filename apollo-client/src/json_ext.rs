//! Performance oriented JSON manipulation.

use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
pub use serde_json_bytes::Value;

/// A JSON object.
pub type Object = Map<ByteString, Value>;

/// The name of the field holding the concrete type of an object.
pub(crate) const TYPENAME: &str = "__typename";

pub(crate) trait ValueExt {
    /// Returns a copy of the value where the keys of every nested object are sorted.
    fn sorted(&self) -> Value;

    /// Serializes the value as compact JSON with sorted object keys.
    ///
    /// Two values that only differ by the insertion order of their keys produce the same string.
    fn to_canonical_string(&self) -> String;

    /// Renders a scalar the way it appears inside a cache key: strings without quotes, numbers and
    /// booleans with their JSON representation. Other values have no key representation.
    fn as_key_fragment(&self) -> Option<String>;
}

impl ValueExt for Value {
    fn sorted(&self) -> Value {
        match self {
            Value::Object(object) => {
                let mut entries: Vec<_> = object.iter().collect();
                entries.sort_by(|(a, _), (b, _)| a.as_str().cmp(b.as_str()));
                Value::Object(
                    entries
                        .into_iter()
                        .map(|(key, value)| (key.clone(), value.sorted()))
                        .collect(),
                )
            }
            Value::Array(items) => Value::Array(items.iter().map(ValueExt::sorted).collect()),
            other => other.clone(),
        }
    }

    fn to_canonical_string(&self) -> String {
        // serializing a JSON value with string keys cannot fail
        serde_json::to_string(&self.sorted()).unwrap_or_default()
    }

    fn as_key_fragment(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.as_str().to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn canonical_string_sorts_nested_keys() {
        let a = json!({"b": 1, "a": {"d": true, "c": [{"z": 1, "y": 2}]}});
        let b = json!({"a": {"c": [{"y": 2, "z": 1}], "d": true}, "b": 1});

        assert_eq!(a.to_canonical_string(), b.to_canonical_string());
        assert_eq!(
            a.to_canonical_string(),
            r#"{"a":{"c":[{"y":2,"z":1}],"d":true},"b":1}"#
        );
    }

    #[test]
    fn key_fragments() {
        assert_eq!(json!("1000").as_key_fragment().as_deref(), Some("1000"));
        assert_eq!(json!(42).as_key_fragment().as_deref(), Some("42"));
        assert_eq!(json!(null).as_key_fragment(), None);
        assert_eq!(json!({"id": 1}).as_key_fragment(), None);
    }
}
