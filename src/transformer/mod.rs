//! Result shaping: return formats, tabular conversion and keyed projection.

pub mod keyed;
pub mod tabular;

pub use keyed::to_keyed_struct;
pub use tabular::{Column, ColumnType, TabularResult};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::builder::QueryOutput;
use crate::error::{QdefError, QdefResult};

/// Requested result shape.
///
/// Written as a bare string (`"array"`, `"query"`, `"tabular"`) or as
/// `["struct", columnKey, valueKeys?]` where `valueKeys` is a string or a
/// list of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum ReturnFormat {
    #[default]
    Array,
    Query,
    Tabular,
    Struct {
        column_key: String,
        value_keys: Vec<String>,
    },
}

impl ReturnFormat {
    pub fn parse(value: &Value) -> QdefResult<Self> {
        match value {
            Value::String(name) => match name.as_str() {
                "array" => Ok(Self::Array),
                "query" => Ok(Self::Query),
                "tabular" => Ok(Self::Tabular),
                "struct" => Err(QdefError::InvalidFormat(
                    "struct requires a column key: [\"struct\", columnKey, valueKeys?]".to_string(),
                )),
                other => Err(QdefError::InvalidFormat(format!("unknown format '{}'", other))),
            },
            Value::Array(parts) => parse_tuple(parts),
            other => Err(QdefError::InvalidFormat(format!("unexpected format value {}", other))),
        }
    }

    /// Formats that want the builder's native result set.
    pub fn wants_native(&self) -> bool {
        matches!(self, Self::Query | Self::Tabular)
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Array => Value::from("array"),
            Self::Query => Value::from("query"),
            Self::Tabular => Value::from("tabular"),
            Self::Struct { column_key, value_keys } => {
                let mut parts = vec![Value::from("struct"), Value::from(column_key.as_str())];
                if !value_keys.is_empty() {
                    parts.push(Value::from(value_keys.clone()));
                }
                Value::Array(parts)
            }
        }
    }
}

fn parse_tuple(parts: &[Value]) -> QdefResult<ReturnFormat> {
    let (head, rest) = match parts.split_first() {
        Some((head, rest)) => (head, rest),
        None => return Err(QdefError::InvalidFormat("empty format tuple".to_string())),
    };
    match head.as_str() {
        Some("struct") => {}
        Some(_) if rest.is_empty() => return ReturnFormat::parse(head),
        _ => {
            return Err(QdefError::InvalidFormat(format!(
                "only struct takes arguments, got {}",
                head
            )));
        }
    }

    let column_key = rest
        .first()
        .and_then(Value::as_str)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| QdefError::InvalidFormat("struct requires a string column key".to_string()))?
        .to_string();

    let value_keys = match rest.get(1) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(key)) => key
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::Array(keys)) => keys
            .iter()
            .map(|k| {
                k.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| QdefError::InvalidFormat(format!("value key must be a string, got {}", k)))
            })
            .collect::<QdefResult<Vec<_>>>()?,
        Some(other) => {
            return Err(QdefError::InvalidFormat(format!("unexpected value keys {}", other)));
        }
    };

    Ok(ReturnFormat::Struct { column_key, value_keys })
}

impl TryFrom<Value> for ReturnFormat {
    type Error = QdefError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ReturnFormat> for Value {
    fn from(format: ReturnFormat) -> Self {
        format.to_value()
    }
}

impl FromStr for ReturnFormat {
    type Err = QdefError;

    /// Bare names, or JSON for the tuple form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.starts_with('[') {
            let value: Value = serde_json::from_str(trimmed)?;
            Self::parse(&value)
        } else {
            Self::parse(&Value::from(trimmed))
        }
    }
}

impl fmt::Display for ReturnFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_value() {
            Value::String(s) => f.write_str(&s),
            other => write!(f, "{}", other),
        }
    }
}

/// Shape an executor's output.
///
/// Only row lists are reshaped; scalars, single rows and `null` pass
/// through whatever the format.
pub fn transform(output: QueryOutput, format: &ReturnFormat) -> QdefResult<Value> {
    match (output, format) {
        (QueryOutput::Native(set), ReturnFormat::Query | ReturnFormat::Tabular) => {
            tabular_value(&TabularResult::from_native(&set))
        }
        (output, format) => transform_value(output.into_value(), format),
    }
}

/// Shape the row list held under `data_key` of a pagination envelope,
/// leaving the rest of the envelope as is.
pub fn transform_paginated(mut envelope: Value, format: &ReturnFormat, data_key: &str) -> QdefResult<Value> {
    if let Value::Object(map) = &mut envelope {
        if let Some(slot) = map.get_mut(data_key) {
            let rows = std::mem::take(slot);
            *slot = transform_value(rows, format)?;
        }
    }
    Ok(envelope)
}

fn transform_value(data: Value, format: &ReturnFormat) -> QdefResult<Value> {
    let rows = match &data {
        Value::Array(rows) if rows.iter().all(Value::is_object) => rows,
        _ => return Ok(data),
    };
    match format {
        ReturnFormat::Array => Ok(data),
        ReturnFormat::Query | ReturnFormat::Tabular => tabular_value(&TabularResult::from_array(rows)),
        ReturnFormat::Struct { column_key, value_keys } => {
            to_keyed_struct(rows, column_key, value_keys).map(Value::Object)
        }
    }
}

fn tabular_value(result: &TabularResult) -> QdefResult<Value> {
    Ok(serde_json::to_value(result)?)
}
