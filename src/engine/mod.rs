//! Query definition engine.
//!
//! ```text
//! validate whole tree ─► CTEs ─► per item: when/else ─► $param ─► args
//!                                           ─► $raw ─► validate ─► builder
//!                        executor ─► options merge ─► builder ─► transform
//! ```

mod assemble;
mod executor;

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::action::{ActionRegistry, Executor};
use crate::builder::{Arg, ExecutionOptions, QueryBuilder};
use crate::config::QdefConfig;
use crate::definition::{CteAliases, definition_items};
use crate::error::QdefResult;
use crate::resolver::RawResolver;
use crate::security::SecurityValidator;
use crate::transformer::{ReturnFormat, transform, transform_paginated};
use crate::value::ParamMap;

use assemble::{Assembler, AssemblyState, Scope};
use executor::{ExecutorCall, run_avg};

/// Envelope key holding the rows of a pagination result.
pub const PAGINATION_DATA_KEY: &str = "results";

/// Caller-supplied inputs for one execution. These win over anything the
/// definition or the configuration declares.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecuteOptions {
    pub params: ParamMap,
    pub return_format: Option<ReturnFormat>,
    #[serde(flatten)]
    pub execution: ExecutionOptions,
}

impl ExecuteOptions {
    pub fn with_params(params: ParamMap) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    pub fn return_format(mut self, format: ReturnFormat) -> Self {
        self.return_format = Some(format);
        self
    }
}

/// Interprets query definitions against a [`QueryBuilder`].
///
/// Immutable after construction and safe to share between threads.
#[derive(Debug, Clone)]
pub struct QdefEngine {
    registry: Arc<ActionRegistry>,
    validator: SecurityValidator,
    config: QdefConfig,
}

impl QdefEngine {
    /// Compile policies and the pattern catalog. Bad patterns surface here
    /// as configuration errors.
    pub fn new(config: QdefConfig) -> QdefResult<Self> {
        let registry = Arc::new(ActionRegistry::new());
        let validator = SecurityValidator::new(&config.security, Arc::clone(&registry))?;
        Ok(Self {
            registry,
            validator,
            config,
        })
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn validator(&self) -> &SecurityValidator {
        &self.validator
    }

    pub fn config(&self) -> &QdefConfig {
        &self.config
    }

    /// Whole-definition security check, without touching a builder.
    pub fn validate(&self, definition: &Value) -> QdefResult<()> {
        self.validator.validate_query(definition)
    }

    /// Validate and apply every non-executor action to `builder`.
    pub fn build(&self, builder: &mut dyn QueryBuilder, definition: &Value, params: &ParamMap) -> QdefResult<()> {
        self.build_state(builder, definition, params).map(|_| ())
    }

    fn build_state(
        &self,
        builder: &mut dyn QueryBuilder,
        definition: &Value,
        params: &ParamMap,
    ) -> QdefResult<AssemblyState> {
        let items = definition_items(definition)?;
        self.validator.validate_query(definition)?;

        let ctes = CteAliases::collect(&self.registry, items);
        let scope = Scope {
            params,
            ctes: &ctes,
        };
        let mut state = AssemblyState::default();
        Assembler::new(&self.validator).assemble(builder, items, scope, &mut state)?;
        Ok(state)
    }

    /// Build and run a definition, returning the shaped result.
    ///
    /// Definitions without an executor item run `get`.
    pub fn execute(&self, builder: &mut dyn QueryBuilder, definition: &Value, options: &ExecuteOptions) -> QdefResult<Value> {
        let items = definition_items(definition)?;
        let mut call = ExecutorCall::find(&self.registry, items, &options.params)?.unwrap_or_else(ExecutorCall::get);
        info!(actions = items.len(), executor = %call.executor, "Executing query definition");

        self.validator.validate_executor(call.executor.name())?;
        let state = self.build_state(builder, definition, &options.params)?;

        let format = self.resolve_format(&call, options);
        let mut exec_options = self.resolve_options(&call, options);
        exec_options.native = call.executor == Executor::Get && format.wants_native();
        debug!(
            datasource = ?exec_options.datasource,
            timeout = ?exec_options.timeout,
            native = exec_options.native,
            format = %format,
            "Resolved execution options"
        );

        if let Some(max_rows) = self.config.defaults.max_rows {
            if call.executor.returns_rows() && !state.limited {
                builder.limit("limit", vec![Arg::Value(Value::from(max_rows))])?;
            }
            call.apply_page_ceiling(max_rows);
        }

        let output = match call.executor {
            Executor::Avg => run_avg(builder, &call.args, &exec_options)?,
            executor => {
                let args = RawResolver::new(&self.validator).resolve_args(call.args, &*builder)?;
                builder.execute(executor, args, &exec_options)?
            }
        };

        let result = match call.executor {
            Executor::Get => transform(output, &format)?,
            Executor::Paginate | Executor::SimplePaginate => {
                transform_paginated(output.into_value(), &format, PAGINATION_DATA_KEY)?
            }
            _ => output.into_value(),
        };
        info!(executor = %call.executor, "Query executed");
        Ok(result)
    }

    /// Config default < definition < caller.
    fn resolve_format(&self, call: &ExecutorCall, options: &ExecuteOptions) -> ReturnFormat {
        options
            .return_format
            .clone()
            .or_else(|| call.return_format.clone())
            .or_else(|| self.config.defaults.return_format.clone())
            .unwrap_or_default()
    }

    /// Config default < definition < caller.
    fn resolve_options(&self, call: &ExecutorCall, options: &ExecuteOptions) -> ExecutionOptions {
        self.config
            .defaults
            .execution_options()
            .merge(&call.options)
            .merge(&options.execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::RecordingBuilder;
    use crate::error::QdefError;
    use crate::security::PolicyDef;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn engine() -> QdefEngine {
        QdefEngine::new(QdefConfig::default()).unwrap()
    }

    fn trace(engine: &QdefEngine, definition: Value, params: ParamMap) -> Vec<String> {
        let mut builder = RecordingBuilder::new();
        engine.build(&mut builder, &definition, &params).unwrap();
        builder.calls().to_vec()
    }

    #[test]
    fn test_when_else() {
        let definition = json!([
            {"from": "users"},
            {"whereIn": ["id", {"$param": "ids"}], "when": "hasValues", "else": [{"whereRaw": "1 = 0"}]}
        ]);
        assert_eq!(
            trace(&engine(), definition.clone(), ParamMap::new().with("ids", json!([1]))),
            vec![r#"from("users")"#, r#"whereIn("id",[1])"#]
        );
        assert_eq!(
            trace(&engine(), definition, ParamMap::new().with("ids", json!([]))),
            vec![r#"from("users")"#, r#"whereRaw("1 = 0")"#]
        );
    }

    #[test]
    fn test_ctes_are_applied_first() {
        let definition = json!([
            {"from": "recent"},
            {"with": "recent", "query": [{"from": "orders"}, {"where": ["total", ">", 100]}]}
        ]);
        assert_eq!(
            trace(&engine(), definition, ParamMap::new()),
            vec![
                r#"with("recent",{from("orders").where("total",">",100)})"#,
                r#"from("recent")"#,
            ]
        );
    }

    #[test]
    fn test_unknown_keys_are_skipped() {
        let definition = json!([{"from": "users"}, {"frobnicate": 1}, "noise", {"orderByDesc": "id"}]);
        assert_eq!(
            trace(&engine(), definition, ParamMap::new()),
            vec![r#"from("users")"#, r#"orderByDesc("id")"#]
        );
    }

    #[test]
    fn test_nested_clauses_and_where_sub() {
        let definition = json!([
            {"from": "users"},
            {"where": true, "clauses": [{"where": ["a", 1]}, {"orWhere": ["b", 2]}]},
            {"whereIn": "id", "query": [{"from": "admins"}, {"select": ["user_id"]}]}
        ]);
        assert_eq!(
            trace(&engine(), definition, ParamMap::new()),
            vec![
                r#"from("users")"#,
                r#"where({where("a",1).orWhere("b",2)})"#,
                r#"whereIn("id",{from("admins").select(["user_id"])})"#,
            ]
        );
    }

    #[test]
    fn test_joins() {
        let params = ParamMap::new().with("tenant", 7);
        let definition = json!([
            {"from": "users u"},
            {"leftJoin": "orders o", "on": [["o.user_id", "=", "u.id"], {"andOn": ["o.tenant_id", "=", {"$param": "tenant"}]}]},
            {"joinSub": {"alias": "t", "query": [{"from": "totals"}], "first": "t.user_id", "operator": "=", "second": "u.id"}}
        ]);
        assert_eq!(
            trace(&engine(), definition, params),
            vec![
                r#"from("users u")"#,
                r#"leftJoin("orders o",{on("o.user_id","=","u.id").andOn("o.tenant_id","=",7)})"#,
                r#"joinSub({from("totals")},"t","t.user_id","=","u.id")"#,
            ]
        );
    }

    #[test]
    fn test_missing_sub_parts() {
        let engine = engine();
        let mut builder = RecordingBuilder::new();
        let err = engine
            .build(&mut builder, &json!([{"fromSub": {"query": [{"from": "x"}]}}]), &ParamMap::new())
            .unwrap_err();
        assert!(matches!(err, QdefError::InvalidFromSub(_)));

        let err = engine
            .build(&mut builder, &json!([{"whereExists": true}]), &ParamMap::new())
            .unwrap_err();
        assert!(matches!(err, QdefError::InvalidWhereExists(_)));

        let err = engine
            .build(&mut builder, &json!([{"with": "x"}]), &ParamMap::new())
            .unwrap_err();
        assert!(matches!(err, QdefError::InvalidCte(_)));
    }

    #[test]
    fn test_template_injection_is_caught_after_resolution() {
        let params = ParamMap::new().with("col", "1; DROP TABLE users");
        let mut builder = RecordingBuilder::new();
        let err = engine()
            .build(&mut builder, &json!([{"from": "users"}, {"whereRaw": "id = $col$"}]), &params)
            .unwrap_err();
        assert!(matches!(err, QdefError::InvalidRawExpression { .. }));
    }

    #[test]
    fn test_table_alias_rewrite() {
        let config = QdefConfig::builder()
            .tables(PolicyDef::allow(["hr.employees"]))
            .table_alias("people", "hr.employees")
            .build();
        let engine = QdefEngine::new(config).unwrap();
        assert_eq!(
            trace(&engine, json!([{"from": "people p"}]), ParamMap::new()),
            vec![r#"from("hr.employees p")"#]
        );
    }

    #[test]
    fn test_max_rows_ceiling() {
        let engine = QdefEngine::new(QdefConfig::builder().max_rows(50).build()).unwrap();

        let mut builder = RecordingBuilder::new();
        engine
            .execute(&mut builder, &json!([{"from": "users"}]), &ExecuteOptions::default())
            .unwrap();
        assert_eq!(builder.calls(), &[r#"from("users")"#, "limit(50)", "get()"]);

        let mut builder = RecordingBuilder::new();
        engine
            .execute(&mut builder, &json!([{"from": "users"}, {"take": 5}, {"get": true}]), &ExecuteOptions::default())
            .unwrap();
        assert_eq!(builder.calls(), &[r#"from("users")"#, "take(5)", "get()"]);

        let mut builder = RecordingBuilder::new();
        engine
            .execute(&mut builder, &json!([{"from": "users"}, {"count": true}]), &ExecuteOptions::default())
            .unwrap();
        assert_eq!(builder.calls(), &[r#"from("users")"#, "count()"]);
    }

    #[test]
    fn test_executor_policy_blocks_before_building() {
        let config = QdefConfig::builder().executors(PolicyDef::block(["dump"])).build();
        let engine = QdefEngine::new(config).unwrap();
        let mut builder = RecordingBuilder::new();
        let err = engine
            .execute(&mut builder, &json!([{"from": "users"}, {"dump": true}]), &ExecuteOptions::default())
            .unwrap_err();
        assert!(matches!(err, QdefError::ExecutorNotAllowed(_)));
        assert!(builder.calls().is_empty());
    }

    #[test]
    fn test_option_priority() {
        let config = QdefConfig::builder().datasource("main").timeout(30).build();
        let engine = QdefEngine::new(config).unwrap();
        let mut builder = RecordingBuilder::new();
        let options = ExecuteOptions {
            execution: ExecutionOptions {
                username: Some("caller".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        engine
            .execute(
                &mut builder,
                &json!([{"from": "users"}, {"get": true, "timeout": 5, "username": "declared"}]),
                &options,
            )
            .unwrap();
        let used = builder.last_options().unwrap();
        assert_eq!(used.datasource.as_deref(), Some("main"));
        assert_eq!(used.timeout, Some(5));
        assert_eq!(used.username.as_deref(), Some("caller"));
    }

    #[test]
    fn test_execute_options_deserialize() {
        let options: ExecuteOptions = serde_json::from_value(json!({
            "params": {"ids": [1]},
            "returnFormat": ["struct", "id"],
            "datasource": "replica"
        }))
        .unwrap();
        assert_eq!(options.params.get("ids"), Some(&json!([1])));
        assert!(matches!(options.return_format, Some(ReturnFormat::Struct { .. })));
        assert_eq!(options.execution.datasource.as_deref(), Some("replica"));
    }
}
