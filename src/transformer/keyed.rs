//! Keyed struct projection: rows folded into an object keyed by one column.

use serde_json::{Map, Value};

use crate::error::{QdefError, QdefResult};
use crate::value::scalar_text;

/// Fold rows into `{ row[column_key]: value }`.
///
/// The value is the whole row when `value_keys` is empty, the single cell
/// for one key, or a sub-object for several. Keys are checked against the
/// first row only; later duplicates overwrite earlier ones.
pub fn to_keyed_struct(rows: &[Value], column_key: &str, value_keys: &[String]) -> QdefResult<Map<String, Value>> {
    let mut keyed = Map::new();
    let Some(first) = rows.first() else {
        return Ok(keyed);
    };

    let first = first
        .as_object()
        .ok_or_else(|| QdefError::InvalidColumnKey(column_key.to_string()))?;
    if !first.contains_key(column_key) {
        return Err(QdefError::InvalidColumnKey(column_key.to_string()));
    }
    if let Some(missing) = value_keys.iter().find(|k| !first.contains_key(k.as_str())) {
        return Err(QdefError::InvalidValueKey(missing.clone()));
    }

    for row in rows {
        let Value::Object(map) = row else { continue };
        let key = match map.get(column_key) {
            Some(v) => key_text(v),
            None => continue,
        };
        let value = match value_keys {
            [] => row.clone(),
            [single] => map.get(single).cloned().unwrap_or(Value::Null),
            many => Value::Object(
                many.iter()
                    .map(|k| (k.clone(), map.get(k).cloned().unwrap_or(Value::Null)))
                    .collect(),
            ),
        };
        keyed.insert(key, value);
    }

    Ok(keyed)
}

fn key_text(value: &Value) -> String {
    scalar_text(value).unwrap_or_else(|| value.to_string())
}
