//! Conversion of action values into positional argument lists.
//!
//! An action value is one of:
//! - an array, passed through as the positional list
//! - an object of named arguments, reordered by the table below
//! - a scalar, wrapped as a one-element list (`true`/`null` mean "no args")

use serde_json::{Map, Value};

use super::kind::{ActionKind, Executor};
use crate::value::is_marker;

/// One named argument: key and whether it is required.
type ArgSpec = (&'static str, bool);

const COLUMN_OPERATOR_VALUE: &[ArgSpec] = &[("column", true), ("operator", false), ("value", true)];
const FIRST_OPERATOR_SECOND: &[ArgSpec] = &[("first", true), ("operator", false), ("second", true)];
const TABLE_FIRST_OPERATOR_SECOND: &[ArgSpec] = &[
    ("table", true),
    ("first", false),
    ("operator", false),
    ("second", false),
];
const SQL_BINDINGS: &[ArgSpec] = &[("sql", true), ("bindings", false)];
const COLUMN: &[ArgSpec] = &[("column", true)];
const COLUMNS: &[ArgSpec] = &[("columns", true)];

/// Named-argument layout for a base action.
fn action_spec(base_action: &str, kind: ActionKind) -> Option<&'static [ArgSpec]> {
    let spec: &'static [ArgSpec] = match base_action {
        "whereColumn" => FIRST_OPERATOR_SECOND,
        "whereIn" => &[("column", true), ("values", true)],
        "whereBetween" => &[("column", true), ("start", true), ("end", true)],
        "whereLike" => &[("column", true), ("value", true)],
        "whereNull" => COLUMN,
        "orderBy" => &[("column", true), ("direction", false)],
        "orderByAsc" | "orderByDesc" => COLUMN,
        "forPage" => &[("page", true), ("size", true)],
        _ => match kind {
            ActionKind::Where | ActionKind::Having => COLUMN_OPERATOR_VALUE,
            ActionKind::Join => TABLE_FIRST_OPERATOR_SECOND,
            ActionKind::JoinRaw => TABLE_FIRST_OPERATOR_SECOND,
            ActionKind::FromRaw
            | ActionKind::SelectRaw
            | ActionKind::WhereRaw
            | ActionKind::HavingRaw
            | ActionKind::OrderByRaw => SQL_BINDINGS,
            ActionKind::From => &[("table", true)],
            ActionKind::Select | ActionKind::GroupBy => COLUMNS,
            ActionKind::Limit | ActionKind::Offset => &[("value", true)],
            ActionKind::Lock => &[("type", false)],
            _ => return None,
        },
    };
    Some(spec)
}

/// Named-argument layout for an executor.
fn executor_spec(executor: Executor) -> &'static [ArgSpec] {
    match executor {
        Executor::Find => &[("id", true), ("idColumn", false)],
        Executor::Value | Executor::Values => &[("column", true), ("key", false)],
        Executor::Count | Executor::Sum | Executor::Min | Executor::Max => &[("column", false)],
        Executor::Avg => &[("column", true), ("default", false)],
        Executor::Paginate | Executor::SimplePaginate => &[("page", true), ("maxRows", false)],
        Executor::Get | Executor::First | Executor::Exists | Executor::ToSql | Executor::Dump => {
            &[("columns", false)]
        }
    }
}

/// Positional arguments for an action value.
pub fn action_args(base_action: &str, kind: ActionKind, value: &Value) -> Vec<Value> {
    match value {
        // A column list is one argument, not a spread.
        Value::Array(_) if kind.takes_column_list() => vec![value.clone()],
        Value::Object(map) if !is_marker(value) => match action_spec(base_action, kind) {
            Some(spec) => named_to_positional(map, spec),
            None => vec![value.clone()],
        },
        other => scalar_args(other),
    }
}

/// Positional arguments for an executor value.
pub fn executor_args(executor: Executor, value: &Value) -> Vec<Value> {
    match value {
        Value::Object(map) if !is_marker(value) => named_to_positional(map, executor_spec(executor)),
        other => scalar_args(other),
    }
}

fn scalar_args(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Null | Value::Bool(true) => Vec::new(),
        other => vec![other.clone()],
    }
}

/// Missing optional keys are dropped; missing required keys become `null`
/// so positions stay aligned.
fn named_to_positional(map: &Map<String, Value>, spec: &[ArgSpec]) -> Vec<Value> {
    // Optional keys only matter when something after them is present.
    let last_present = spec.iter().rposition(|(key, _)| map.contains_key(*key));
    let Some(last_present) = last_present else {
        return Vec::new();
    };

    let mut args = Vec::with_capacity(spec.len());
    for (key, required) in &spec[..=last_present] {
        match map.get(*key) {
            Some(v) => args.push(v.clone()),
            None if *required => args.push(Value::Null),
            None => {}
        }
    }
    args
}
