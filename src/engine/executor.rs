//! Terminal executor item: parsing, option declaration and `avg`.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Number, Value};
use tracing::warn;

use crate::action::{ActionRegistry, Executor, executor_args};
use crate::builder::{Arg, ExecutionOptions, QueryBuilder, QueryOutput};
use crate::definition::{ItemKey, item_key};
use crate::error::{QdefError, QdefResult};
use crate::resolver::resolve_param_refs;
use crate::transformer::ReturnFormat;
use crate::value::ParamMap;

/// Plain, optionally dotted column identifier accepted by `avg`.
static AVG_COLUMN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").expect("avg column pattern is valid")
});

/// Alias of the synthesized `avg` projection.
pub(crate) const AGGREGATE_ALIAS: &str = "aggregate";

/// The executor item of a definition, ready to run.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ExecutorCall {
    pub executor: Executor,
    pub args: Vec<Value>,
    /// Options declared next to the executor key.
    pub options: ExecutionOptions,
    pub return_format: Option<ReturnFormat>,
}

impl ExecutorCall {
    /// Used when a definition has no executor item.
    pub fn get() -> Self {
        Self {
            executor: Executor::Get,
            args: Vec::new(),
            options: ExecutionOptions::default(),
            return_format: None,
        }
    }

    /// Find and parse the first executor item. Later executor items are
    /// ignored with a warning.
    pub fn find(registry: &ActionRegistry, items: &[Value], params: &ParamMap) -> QdefResult<Option<Self>> {
        let mut found: Option<Self> = None;
        for item in items {
            let Value::Object(map) = item else { continue };
            let Some(ItemKey::Executor(name)) = item_key(registry, map) else {
                continue;
            };
            let Some(executor) = registry.executor(name) else {
                continue;
            };
            if let Some(first) = &found {
                warn!(used = %first.executor, ignored = %executor, "Ignoring additional executor");
                continue;
            }
            found = Some(Self::parse(executor, name, map, params)?);
        }
        Ok(found)
    }

    fn parse(executor: Executor, name: &str, map: &Map<String, Value>, params: &ParamMap) -> QdefResult<Self> {
        let resolved = match resolve_param_refs(&Value::Object(map.clone()), params) {
            Value::Object(resolved) => resolved,
            _ => Map::new(),
        };
        let value = resolved.get(name).cloned().unwrap_or(Value::Null);

        let options = ExecutionOptions {
            datasource: string_option(&resolved, "datasource")?,
            timeout: timeout_option(&resolved)?,
            username: string_option(&resolved, "username")?,
            password: string_option(&resolved, "password")?,
            native: false,
        };
        let return_format = match resolved.get("returnFormat") {
            None | Some(Value::Null) => None,
            Some(format) => Some(ReturnFormat::parse(format)?),
        };

        Ok(Self {
            executor,
            args: executor_args(executor, &value),
            options,
            return_format,
        })
    }

    /// Fill in `maxRows` for the pagination executors when none was given.
    pub fn apply_page_ceiling(&mut self, max_rows: u64) {
        if !self.executor.is_paginated() {
            return;
        }
        if self.args.is_empty() {
            self.args.push(Value::from(1));
        }
        match self.args.get_mut(1) {
            Some(slot @ Value::Null) => *slot = Value::from(max_rows),
            Some(_) => {}
            None => self.args.push(Value::from(max_rows)),
        }
    }
}

fn string_option(map: &Map<String, Value>, key: &str) -> QdefResult<Option<String>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(QdefError::InvalidQuery(format!(
            "'{}' must be a string, got {}",
            key,
            crate::value::type_name(other)
        ))),
    }
}

fn timeout_option(map: &Map<String, Value>) -> QdefResult<Option<u64>> {
    let invalid = || QdefError::InvalidQuery("'timeout' must be a non-negative number of seconds".to_string());
    match map.get("timeout") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(invalid),
        Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

/// `avg(column, default)` as `COALESCE(AVG(column), default) AS aggregate`
/// read back through `value`.
pub(crate) fn run_avg(
    builder: &mut dyn QueryBuilder,
    args: &[Value],
    options: &ExecutionOptions,
) -> QdefResult<QueryOutput> {
    let column = args
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| QdefError::InvalidArgument("avg requires a column name".to_string()))?;
    if !AVG_COLUMN.is_match(column) {
        return Err(QdefError::InvalidArgument(format!(
            "avg column '{}' is not a plain identifier",
            column
        )));
    }
    let default = avg_default(args.get(1))?;

    let sql = format!("COALESCE(AVG({}), {}) AS {}", column, default, AGGREGATE_ALIAS);
    let raw = builder.raw(&sql, Vec::new())?;
    builder.select("selectRaw", vec![Arg::Raw(raw)])?;
    builder.execute(Executor::Value, vec![Arg::Value(Value::from(AGGREGATE_ALIAS))], options)
}

fn avg_default(value: Option<&Value>) -> QdefResult<Number> {
    let invalid = |v: &Value| QdefError::InvalidArgument(format!("avg default must be numeric, got {}", v));
    match value {
        None | Some(Value::Null) => Ok(Number::from(0)),
        Some(Value::Number(n)) => Ok(n.clone()),
        Some(v @ Value::String(s)) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(Number::from(i));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .ok_or_else(|| invalid(v))
        }
        Some(other) => Err(invalid(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::RecordingBuilder;
    use serde_json::json;

    fn find(definition: Value, params: &ParamMap) -> Option<ExecutorCall> {
        ExecutorCall::find(&ActionRegistry::new(), definition.as_array().unwrap(), params).unwrap()
    }

    #[test]
    fn test_find_parses_options() {
        let params = ParamMap::new().with("ds", "replica");
        let call = find(
            json!([
                {"from": "users"},
                {"paginate": {"page": 2}, "datasource": {"$param": "ds"}, "timeout": "15", "returnFormat": "tabular"},
                {"get": true}
            ]),
            &params,
        )
        .unwrap();
        assert_eq!(call.executor, Executor::Paginate);
        assert_eq!(call.args, vec![json!(2)]);
        assert_eq!(call.options.datasource.as_deref(), Some("replica"));
        assert_eq!(call.options.timeout, Some(15));
        assert_eq!(call.return_format, Some(ReturnFormat::Tabular));
    }

    #[test]
    fn test_no_executor() {
        assert!(find(json!([{"from": "users"}]), &ParamMap::new()).is_none());
    }

    #[test]
    fn test_bad_options() {
        let registry = ActionRegistry::new();
        let items = json!([{"get": true, "timeout": -1}]);
        assert!(ExecutorCall::find(&registry, items.as_array().unwrap(), &ParamMap::new()).is_err());
        let items = json!([{"get": true, "returnFormat": "csv"}]);
        assert!(matches!(
            ExecutorCall::find(&registry, items.as_array().unwrap(), &ParamMap::new()),
            Err(QdefError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_page_ceiling() {
        let mut call = find(json!([{"paginate": true}]), &ParamMap::new()).unwrap();
        call.apply_page_ceiling(100);
        assert_eq!(call.args, vec![json!(1), json!(100)]);

        let mut call = find(json!([{"paginate": [3, 10]}]), &ParamMap::new()).unwrap();
        call.apply_page_ceiling(100);
        assert_eq!(call.args, vec![json!(3), json!(10)]);

        let mut call = find(json!([{"get": true}]), &ParamMap::new()).unwrap();
        call.apply_page_ceiling(100);
        assert!(call.args.is_empty());
    }

    #[test]
    fn test_avg_synthesis() {
        let mut builder = RecordingBuilder::new().with_rows(vec![json!({"aggregate": 4.5})]);
        let output = run_avg(&mut builder, &[json!("orders.total"), json!(0)], &ExecutionOptions::default()).unwrap();
        assert_eq!(output, QueryOutput::Value(json!(4.5)));
        assert_eq!(
            builder.calls(),
            &[
                r#"selectRaw(raw("COALESCE(AVG(orders.total), 0) AS aggregate"))"#.to_string(),
                r#"value("aggregate")"#.to_string(),
            ]
        );
    }

    #[test]
    fn test_avg_rejects_expressions() {
        let mut builder = RecordingBuilder::new();
        let options = ExecutionOptions::default();
        assert!(matches!(
            run_avg(&mut builder, &[json!("total); DROP TABLE x; --")], &options),
            Err(QdefError::InvalidArgument(_))
        ));
        assert!(matches!(
            run_avg(&mut builder, &[json!("total"), json!("0) OR (1")], &options),
            Err(QdefError::InvalidArgument(_))
        ));
        assert!(builder.calls().is_empty());
    }
}
