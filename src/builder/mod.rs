//! Query builder seam.
//!
//! The engine never writes SQL. It drives a [`QueryBuilder`] with one call
//! per action, passing the action name exactly as written so the builder's
//! own `and`/`or`/`not` handling applies. Nested queries are handed over as
//! continuations the builder runs against a fresh sub-builder.

pub mod recording;

pub use recording::RecordingBuilder;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::action::Executor;
use crate::error::QdefResult;

/// Builds a nested query on the sub-builder it is given.
pub type SubQuery<'a> = &'a mut dyn FnMut(&mut dyn QueryBuilder) -> QdefResult<()>;

/// Applies `on` clauses to a join.
pub type JoinOn<'a> = &'a mut dyn FnMut(&mut dyn JoinClause) -> QdefResult<()>;

/// Builder-native raw SQL fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawExpression {
    pub sql: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bindings: Vec<Value>,
}

impl RawExpression {
    pub fn new(sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            bindings,
        }
    }
}

/// One resolved argument. Raw fragments may sit anywhere in a value tree,
/// so lists and maps containing one are kept structured.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Value(Value),
    Raw(RawExpression),
    List(Vec<Arg>),
    Map(Vec<(String, Arg)>),
}

impl Arg {
    /// Plain value, if no raw fragment is involved.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Raw(_))
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<RawExpression> for Arg {
    fn from(raw: RawExpression) -> Self {
        Self::Raw(raw)
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{}", v),
            Self::Raw(raw) if raw.bindings.is_empty() => write!(f, "raw({})", Value::from(raw.sql.as_str())),
            Self::Raw(raw) => write!(
                f,
                "raw({},{})",
                Value::from(raw.sql.as_str()),
                Value::Array(raw.bindings.clone())
            ),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Self::Map(entries) => {
                f.write_str("{")?;
                for (i, (key, item)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}:{}", Value::from(key.as_str()), item)?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Column of a native result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeColumn {
    pub name: String,
    /// Builder-specific type name, e.g. `INT4`, `VARCHAR`, `TIMESTAMP`.
    #[serde(rename = "type")]
    pub type_name: String,
}

/// Column-ordered result set in the builder's own representation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NativeResultSet {
    pub columns: Vec<NativeColumn>,
    pub rows: Vec<Vec<Value>>,
}

impl NativeResultSet {
    /// Rows as column-name keyed objects.
    pub fn to_rows(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| {
                let map: Map<String, Value> = self
                    .columns
                    .iter()
                    .zip(row.iter().cloned().chain(std::iter::repeat(Value::Null)))
                    .map(|(column, value)| (column.name.clone(), value))
                    .collect();
                Value::Object(map)
            })
            .collect()
    }
}

/// What an executor returned.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    /// Native result set, only produced when `ExecutionOptions::native` is set.
    Native(NativeResultSet),
    /// Rows, a scalar, or a pagination envelope.
    Value(Value),
}

impl QueryOutput {
    pub fn into_value(self) -> Value {
        match self {
            Self::Native(set) => Value::Array(set.to_rows()),
            Self::Value(v) => v,
        }
    }
}

/// Options handed to the executor.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutionOptions {
    pub datasource: Option<String>,
    /// Seconds.
    pub timeout: Option<u64>,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Ask for a [`NativeResultSet`] instead of row objects.
    pub native: bool,
}

impl ExecutionOptions {
    /// Overlay `higher` onto `self`; every field `higher` sets wins.
    pub fn merge(mut self, higher: &ExecutionOptions) -> Self {
        if higher.datasource.is_some() {
            self.datasource = higher.datasource.clone();
        }
        if higher.timeout.is_some() {
            self.timeout = higher.timeout;
        }
        if higher.username.is_some() {
            self.username = higher.username.clone();
        }
        if higher.password.is_some() {
            self.password = higher.password.clone();
        }
        self.native |= higher.native;
        self
    }
}

impl fmt::Debug for ExecutionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionOptions")
            .field("datasource", &self.datasource)
            .field("timeout", &self.timeout)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("native", &self.native)
            .finish()
    }
}

/// Receives `on` clauses for one join.
pub trait JoinClause {
    /// `method` is `on`, `andOn` or `orOn`; `args` is `[first, operator?, second]`.
    fn on(&mut self, method: &str, args: Vec<Arg>) -> QdefResult<()>;
}

/// The query builder collaborator.
///
/// Every method receives the action name as written (`orWhereNotIn`,
/// `leftJoin`, `take`...) and the positional arguments for it.
pub trait QueryBuilder {
    /// Wrap a validated SQL fragment in the builder's raw type.
    fn raw(&self, sql: &str, bindings: Vec<Value>) -> QdefResult<RawExpression> {
        Ok(RawExpression::new(sql, bindings))
    }

    /// `from`/`table` with an already validated table reference.
    fn from(&mut self, method: &str, table: &str) -> QdefResult<()>;

    fn from_raw(&mut self, method: &str, args: Vec<Arg>) -> QdefResult<()>;

    fn from_sub(&mut self, method: &str, alias: &str, sub: SubQuery<'_>) -> QdefResult<()>;

    /// `select`, `addSelect`, `distinct`, `selectRaw`, `addSelectRaw`.
    fn select(&mut self, method: &str, args: Vec<Arg>) -> QdefResult<()>;

    fn sub_select(&mut self, method: &str, alias: &str, sub: SubQuery<'_>) -> QdefResult<()>;

    /// Table and raw joins. The first argument is the table.
    fn join(&mut self, method: &str, args: Vec<Arg>, on: Option<JoinOn<'_>>) -> QdefResult<()>;

    fn join_sub(
        &mut self,
        method: &str,
        alias: &str,
        sub: SubQuery<'_>,
        args: Vec<Arg>,
        on: Option<JoinOn<'_>>,
    ) -> QdefResult<()>;

    /// Every where-family and `whereRaw` variant.
    fn where_clause(&mut self, method: &str, args: Vec<Arg>) -> QdefResult<()>;

    /// Parenthesised group of clauses.
    fn where_nested(&mut self, method: &str, group: SubQuery<'_>) -> QdefResult<()>;

    /// Where clause against a subquery, e.g. `whereIn("id", <sub>)`.
    fn where_sub(&mut self, method: &str, args: Vec<Arg>, sub: SubQuery<'_>) -> QdefResult<()>;

    fn where_exists(&mut self, method: &str, sub: SubQuery<'_>) -> QdefResult<()>;

    fn group_by(&mut self, method: &str, args: Vec<Arg>) -> QdefResult<()>;

    /// `having` and `havingRaw` variants.
    fn having(&mut self, method: &str, args: Vec<Arg>) -> QdefResult<()>;

    /// `orderBy*` and `orderByRaw`.
    fn order_by(&mut self, method: &str, args: Vec<Arg>) -> QdefResult<()>;

    /// `reorder` / `clearOrders`.
    fn clear_orders(&mut self, method: &str) -> QdefResult<()>;

    /// `limit`, `take`, `offset`, `skip` and `forPage`.
    fn limit(&mut self, method: &str, args: Vec<Arg>) -> QdefResult<()>;

    fn lock(&mut self, method: &str, args: Vec<Arg>) -> QdefResult<()>;

    fn union(&mut self, method: &str, sub: SubQuery<'_>) -> QdefResult<()>;

    /// Register a CTE.
    fn with(&mut self, method: &str, name: &str, sub: SubQuery<'_>) -> QdefResult<()>;

    /// Run the query.
    fn execute(&mut self, executor: Executor, args: Vec<Arg>, options: &ExecutionOptions) -> QdefResult<QueryOutput>;
}
