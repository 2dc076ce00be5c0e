//! Columnar ("tabular") result representation.
//!
//! ```json
//! {
//!   "columns": [{"name": "id", "type": "integer"}, {"name": "email", "type": "varchar"}],
//!   "rows": [[1, "a@x.io"], [2, "b@x.io"]]
//! }
//! ```

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use uuid::Uuid;

use crate::builder::NativeResultSet;

/// Column type vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Bigint,
    Decimal,
    Varchar,
    Boolean,
    Datetime,
    Uuid,
    Object,
    Array,
    Binary,
    Unknown,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Bigint => "bigint",
            Self::Decimal => "decimal",
            Self::Varchar => "varchar",
            Self::Boolean => "boolean",
            Self::Datetime => "datetime",
            Self::Uuid => "uuid",
            Self::Object => "object",
            Self::Array => "array",
            Self::Binary => "binary",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Bigint | Self::Decimal)
    }

    /// Detect the type of one value. `None` for null.
    pub fn detect(value: &Value) -> Option<Self> {
        let detected = match value {
            Value::Null => return None,
            Value::Bool(_) => Self::Boolean,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
            Value::String(s) if is_datetime(s) => Self::Datetime,
            Value::String(s) if is_uuid(s) => Self::Uuid,
            Value::String(_) => Self::Varchar,
            Value::Number(n) => number_type(n),
        };
        Some(detected)
    }

    /// Map a builder's native type name (`INT4`, `VARCHAR(255)`, `_TEXT`...).
    pub fn from_native(type_name: &str) -> Self {
        let upper = type_name.trim().to_ascii_uppercase();
        if upper.starts_with('_') || upper.ends_with("[]") || upper.starts_with("ARRAY") {
            return Self::Array;
        }
        let base = upper.split('(').next().unwrap_or(&upper).trim();
        match base {
            "INT" | "INT2" | "INT4" | "INTEGER" | "SMALLINT" | "TINYINT" | "MEDIUMINT" | "SERIAL" | "SMALLSERIAL" => {
                Self::Integer
            }
            "INT8" | "BIGINT" | "BIGSERIAL" => Self::Bigint,
            "FLOAT" | "FLOAT4" | "FLOAT8" | "REAL" | "DOUBLE" | "DOUBLE PRECISION" | "NUMERIC" | "DECIMAL" | "MONEY"
            | "NUMBER" => Self::Decimal,
            "BOOL" | "BOOLEAN" | "BIT" => Self::Boolean,
            "DATE" | "TIME" | "TIMETZ" | "TIMESTAMP" | "TIMESTAMPTZ" | "DATETIME" | "DATETIME2" | "SMALLDATETIME"
            | "DATETIMEOFFSET" => Self::Datetime,
            "UUID" | "UNIQUEIDENTIFIER" => Self::Uuid,
            "JSON" | "JSONB" => Self::Object,
            "CHAR" | "NCHAR" | "VARCHAR" | "NVARCHAR" | "CHARACTER" | "CHARACTER VARYING" | "BPCHAR" | "TEXT"
            | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" | "NTEXT" | "CLOB" | "NCLOB" | "CITEXT" | "NAME" | "ENUM"
            | "VARCHAR2" | "NVARCHAR2" | "XML" => Self::Varchar,
            "BYTEA" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" | "IMAGE" | "RAW" => {
                Self::Binary
            }
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One output column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

/// Column list plus positional rows; every row has one cell per column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabularResult {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
}

impl TabularResult {
    /// Build from row objects with deep type inference.
    ///
    /// Column order is first-seen key order across all rows. Types are
    /// tallied over every row, then resolved per column, then rows are
    /// flattened in column order with missing keys as `null`.
    pub fn from_array(rows: &[Value]) -> Self {
        let mut names: Vec<&str> = Vec::new();
        let mut tallies: Vec<TypeTally> = Vec::new();

        for row in rows {
            let Value::Object(map) = row else { continue };
            for (key, value) in map {
                let index = match names.iter().position(|n| *n == key.as_str()) {
                    Some(i) => i,
                    None => {
                        names.push(key);
                        tallies.push(TypeTally::default());
                        names.len() - 1
                    }
                };
                if let Some(detected) = ColumnType::detect(value) {
                    tallies[index].add(detected);
                }
            }
        }

        let columns = names
            .iter()
            .zip(&tallies)
            .map(|(name, tally)| Column {
                name: name.to_string(),
                column_type: tally.resolve(),
            })
            .collect();

        let rows = rows
            .iter()
            .map(|row| {
                names
                    .iter()
                    .map(|name| row.get(*name).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }

    /// Build from a native result set. No inference: the builder's type
    /// names are mapped directly.
    pub fn from_native(set: &NativeResultSet) -> Self {
        let columns: Vec<Column> = set
            .columns
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                column_type: ColumnType::from_native(&c.type_name),
            })
            .collect();
        let width = columns.len();
        let rows = set
            .rows
            .iter()
            .map(|row| {
                let mut cells: Vec<Value> = row.iter().take(width).cloned().collect();
                cells.resize(width, Value::Null);
                cells
            })
            .collect();
        Self { columns, rows }
    }

    /// Back to row objects.
    pub fn to_array(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| {
                let map: Map<String, Value> = self
                    .columns
                    .iter()
                    .zip(row)
                    .map(|(column, value)| (column.name.clone(), value.clone()))
                    .collect();
                Value::Object(map)
            })
            .collect()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Per-column type counts in first-seen order.
#[derive(Debug, Clone, Default)]
struct TypeTally {
    counts: Vec<(ColumnType, usize)>,
}

impl TypeTally {
    fn add(&mut self, column_type: ColumnType) {
        match self.counts.iter_mut().find(|(t, _)| *t == column_type) {
            Some((_, count)) => *count += 1,
            None => self.counts.push((column_type, 1)),
        }
    }

    /// Promotion: a single type wins; numeric mixes widen to decimal or
    /// bigint; any number next to text makes the column varchar; anything
    /// else goes to the most frequent type (first seen on a tie).
    fn resolve(&self) -> ColumnType {
        match self.counts.as_slice() {
            [] => ColumnType::Varchar,
            [(only, _)] => *only,
            counts => {
                let types = || counts.iter().map(|(t, _)| *t);
                let has_numeric = types().any(ColumnType::is_numeric);
                if types().all(ColumnType::is_numeric) {
                    if types().any(|t| t == ColumnType::Decimal) {
                        ColumnType::Decimal
                    } else {
                        ColumnType::Bigint
                    }
                } else if has_numeric && types().any(|t| t == ColumnType::Varchar) {
                    ColumnType::Varchar
                } else {
                    let mut best = counts[0];
                    for &(t, count) in &counts[1..] {
                        if count > best.1 {
                            best = (t, count);
                        }
                    }
                    best.0
                }
            }
        }
    }
}

fn number_type(n: &Number) -> ColumnType {
    const INT_MAX: u64 = i32::MAX as u64;
    if let Some(i) = n.as_i64() {
        if i.unsigned_abs() > INT_MAX {
            ColumnType::Bigint
        } else {
            ColumnType::Integer
        }
    } else if n.is_u64() {
        ColumnType::Bigint
    } else {
        ColumnType::Decimal
    }
}

fn is_datetime(s: &str) -> bool {
    // Cheap reject before trying formats.
    if s.len() < 10 || !s.as_bytes()[0].is_ascii_digit() {
        return false;
    }
    DateTime::parse_from_rfc3339(s).is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

fn is_uuid(s: &str) -> bool {
    s.len() == 36 && Uuid::parse_str(s).is_ok()
}
