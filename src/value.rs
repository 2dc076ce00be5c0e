//! Runtime values and the `$param` / `$raw` markers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Marker key for a runtime parameter reference: `{"$param": "ids"}`.
pub const PARAM_KEY: &str = "$param";

/// Marker key for an inline raw SQL fragment: `{"$raw": "COUNT(*)"}`.
pub const RAW_KEY: &str = "$raw";

/// Flat map of runtime parameter values, supplied once per execution.
///
/// Reads go through [`ParamMap::get`], which returns `None` for a missing
/// name. Absence is a value of its own here, not an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamMap(Map<String, Value>);

impl ParamMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a parameter. `None` means the caller never supplied it.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Builder-style insert, mostly for tests and the CLI.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for ParamMap {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for ParamMap {
    type Error = crate::error::QdefError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            other => Err(crate::error::QdefError::InvalidQuery(format!(
                "params must be an object, got {}",
                type_name(&other)
            ))),
        }
    }
}

/// Name referenced by a `{"$param": name}` marker.
pub fn param_ref(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) => map.get(PARAM_KEY).and_then(Value::as_str),
        _ => None,
    }
}

/// Payload of a `{"$raw": ...}` marker, whatever its shape.
pub fn raw_ref(value: &Value) -> Option<&Value> {
    match value {
        Value::Object(map) => map.get(RAW_KEY),
        _ => None,
    }
}

/// True for either marker object.
pub fn is_marker(value: &Value) -> bool {
    param_ref(value).is_some() || raw_ref(value).is_some()
}

/// Strings, numbers and booleans.
pub fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

/// Text used when a scalar is spliced into a string template.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Emptiness as the condition evaluator sees it.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Number(_) | Value::Bool(_) => false,
    }
}

/// Short JSON type name for messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_param_map_absence() {
        let params = ParamMap::new().with("ids", json!([1, 2]));
        assert_eq!(params.get("ids"), Some(&json!([1, 2])));
        assert_eq!(params.get("missing"), None);
    }

    #[test]
    fn test_markers() {
        assert_eq!(param_ref(&json!({"$param": "ids"})), Some("ids"));
        assert_eq!(param_ref(&json!({"$param": 3})), None);
        assert!(raw_ref(&json!({"$raw": {"sql": "1"}})).is_some());
        assert!(!is_marker(&json!({"column": "id"})));
    }

    #[test]
    fn test_params_from_non_object_fails() {
        assert!(ParamMap::try_from(json!([1])).is_err());
        assert!(ParamMap::try_from(Value::Null).unwrap().is_empty());
    }
}
