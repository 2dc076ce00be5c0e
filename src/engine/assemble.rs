//! Per-item assembly: `when`/`else`, resolution, argument conversion and
//! dispatch onto the builder.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::action::{ActionKind, ActionRegistry, NormalizedAction, action_args};
use crate::builder::{Arg, JoinClause, JoinOn, QueryBuilder};
use crate::condition;
use crate::definition::{CteAliases, ItemKey, as_definition, item_key, sub_target};
use crate::error::{QdefError, QdefResult};
use crate::resolver::{RawResolver, resolve_param_refs};
use crate::security::SecurityValidator;
use crate::value::{ParamMap, is_marker};

/// Values every nested assembly shares.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Scope<'s> {
    pub params: &'s ParamMap,
    pub ctes: &'s CteAliases,
}

/// What the top-level assembly learned about the query.
#[derive(Debug, Default)]
pub(crate) struct AssemblyState {
    /// A `limit`/`take`/`forPage` was applied.
    pub limited: bool,
}

/// One action being dispatched.
struct Item<'i> {
    action: NormalizedAction,
    kind: ActionKind,
    map: &'i Map<String, Value>,
    /// Value as written; nested definitions are read from here so they are
    /// resolved once, by their own assembly.
    written: &'i Value,
    /// Value after `$param` resolution.
    resolved: Value,
    args: Vec<Value>,
}

impl Item<'_> {
    fn method(&self) -> &str {
        &self.action.qb_method
    }
}

/// A join `on` clause ready to replay: method and resolved arguments.
type OnClause = (String, Vec<Arg>);

pub(crate) struct Assembler<'e> {
    registry: &'e ActionRegistry,
    validator: &'e SecurityValidator,
    resolver: RawResolver<'e>,
}

impl<'e> Assembler<'e> {
    pub fn new(validator: &'e SecurityValidator) -> Self {
        Self {
            registry: validator.registry(),
            validator,
            resolver: RawResolver::new(validator),
        }
    }

    /// Apply one definition to `builder`: CTEs first, then every other
    /// action in order. Executor items are left for the caller.
    pub fn assemble(
        &self,
        builder: &mut dyn QueryBuilder,
        items: &[Value],
        scope: Scope<'_>,
        state: &mut AssemblyState,
    ) -> QdefResult<()> {
        for item in items {
            let Value::Object(map) = item else { continue };
            if let Some(ItemKey::Action(key)) = item_key(self.registry, map) {
                if self.is_cte(key) {
                    self.apply(builder, key, map, scope, state)?;
                }
            }
        }

        for item in items {
            let Value::Object(map) = item else {
                warn!(kind = crate::value::type_name(item), "Skipping non-object action");
                continue;
            };
            match item_key(self.registry, map) {
                Some(ItemKey::Action(key)) if !self.is_cte(key) => self.apply(builder, key, map, scope, state)?,
                Some(_) => {}
                None => debug!(keys = ?map.keys().collect::<Vec<_>>(), "Skipping item without a known action"),
            }
        }
        Ok(())
    }

    fn is_cte(&self, key: &str) -> bool {
        matches!(self.registry.route(key), Some((_, ActionKind::With)))
    }

    fn apply(
        &self,
        builder: &mut dyn QueryBuilder,
        key: &str,
        map: &Map<String, Value>,
        scope: Scope<'_>,
        state: &mut AssemblyState,
    ) -> QdefResult<()> {
        let (Some((action, kind)), Some(written)) = (self.registry.route(key), map.get(key)) else {
            return Ok(());
        };
        let resolved = resolve_param_refs(written, scope.params);
        let args = action_args(&action.base_action, kind, &resolved);

        if let Some(when) = map.get("when") {
            if !condition::evaluate(when, &args, scope.params) {
                debug!(action = %key, "Condition not met");
                if let Some(otherwise) = map.get("else").and_then(as_definition) {
                    self.assemble(builder, otherwise, scope, state)?;
                }
                return Ok(());
            }
        }

        self.validator.validate_action(key)?;
        debug!(
            method = %action.qb_method,
            base = %action.base_action,
            combinator = %action.combinator,
            negated = action.negated,
            "Dispatching action"
        );

        let item = Item {
            action,
            kind,
            map,
            written,
            resolved,
            args,
        };
        self.dispatch(builder, item, scope, state)
    }

    fn dispatch(
        &self,
        builder: &mut dyn QueryBuilder,
        item: Item<'_>,
        scope: Scope<'_>,
        state: &mut AssemblyState,
    ) -> QdefResult<()> {
        let method = item.method();
        match item.kind {
            ActionKind::From => {
                let table = self.table_arg(&item.args, scope)?;
                builder.from(method, &table)
            }
            ActionKind::FromRaw => {
                let args = self.raw_args(builder, item.args.clone())?;
                builder.from_raw(method, args)
            }
            ActionKind::FromSub => {
                let target = sub_target(item.map, item.written);
                let (Some(alias), Some(query)) = (target.name, target.query) else {
                    return Err(QdefError::InvalidFromSub("requires an alias and a query".to_string()));
                };
                let mut sub = |b: &mut dyn QueryBuilder| self.assemble(b, query, scope, &mut AssemblyState::default());
                builder.from_sub(method, alias, &mut sub)
            }
            ActionKind::Select | ActionKind::GroupBy | ActionKind::Lock => {
                let args = self.resolver.resolve_args(item.args.clone(), &*builder)?;
                match item.kind {
                    ActionKind::Select => builder.select(method, args),
                    ActionKind::GroupBy => builder.group_by(method, args),
                    _ => builder.lock(method, args),
                }
            }
            ActionKind::SelectRaw => {
                let args = self.raw_args(builder, item.args.clone())?;
                builder.select(method, args)
            }
            ActionKind::SubSelect => {
                let target = sub_target(item.map, item.written);
                let (Some(alias), Some(query)) = (target.name, target.query) else {
                    return Err(QdefError::InvalidSubSelect("requires an alias and a query".to_string()));
                };
                let mut sub = |b: &mut dyn QueryBuilder| self.assemble(b, query, scope, &mut AssemblyState::default());
                builder.sub_select(method, alias, &mut sub)
            }
            ActionKind::Join | ActionKind::JoinRaw => {
                let mut args = item.args.clone();
                if item.kind == ActionKind::Join {
                    let table = self.table_arg(&args, scope)?;
                    args[0] = Value::String(table);
                } else {
                    self.check_raw_sql(&args)?;
                }
                let clauses = self.on_clauses(builder, &item, scope)?;
                let args = self.resolver.resolve_args(args, &*builder)?;
                join_with(builder, method, args, clauses)
            }
            ActionKind::JoinSub => self.join_sub(builder, &item, scope),
            ActionKind::Where | ActionKind::Having => self.where_like(builder, &item, scope),
            ActionKind::WhereRaw | ActionKind::HavingRaw | ActionKind::OrderByRaw => {
                let args = self.raw_args(builder, item.args.clone())?;
                match item.kind {
                    ActionKind::WhereRaw => builder.where_clause(method, args),
                    ActionKind::HavingRaw => builder.having(method, args),
                    _ => builder.order_by(method, args),
                }
            }
            ActionKind::WhereExists => {
                let query = sub_target(item.map, item.written)
                    .query
                    .ok_or_else(|| QdefError::InvalidWhereExists("requires a query".to_string()))?;
                let mut sub = |b: &mut dyn QueryBuilder| self.assemble(b, query, scope, &mut AssemblyState::default());
                builder.where_exists(method, &mut sub)
            }
            ActionKind::OrderBy => {
                let args = self.resolver.resolve_args(item.args.clone(), &*builder)?;
                builder.order_by(method, args)
            }
            ActionKind::ClearOrders => builder.clear_orders(method),
            ActionKind::Limit | ActionKind::Offset | ActionKind::ForPage => {
                if item.kind.sets_limit() {
                    state.limited = true;
                }
                let args = self.resolver.resolve_args(item.args.clone(), &*builder)?;
                builder.limit(method, args)
            }
            ActionKind::Union => {
                let query = sub_target(item.map, item.written)
                    .query
                    .ok_or_else(|| QdefError::InvalidUnion("requires a query".to_string()))?;
                let mut sub = |b: &mut dyn QueryBuilder| self.assemble(b, query, scope, &mut AssemblyState::default());
                builder.union(method, &mut sub)
            }
            ActionKind::With => {
                let target = sub_target(item.map, item.written);
                let (Some(name), Some(query)) = (target.name, target.query) else {
                    return Err(QdefError::InvalidCte("requires a name and a query".to_string()));
                };
                let mut sub = |b: &mut dyn QueryBuilder| self.assemble(b, query, scope, &mut AssemblyState::default());
                builder.with(method, name, &mut sub)
            }
        }
    }

    /// Where/having family: legacy `clauses` groups, subquery operands, or
    /// a plain clause.
    fn where_like(&self, builder: &mut dyn QueryBuilder, item: &Item<'_>, scope: Scope<'_>) -> QdefResult<()> {
        let method = item.method();
        let group = item
            .map
            .get("clauses")
            .or_else(|| item.written.get("clauses"))
            .and_then(as_definition);
        if let Some(group) = group {
            let mut sub = |b: &mut dyn QueryBuilder| self.assemble(b, group, scope, &mut AssemblyState::default());
            return builder.where_nested(method, &mut sub);
        }

        let args = self.resolver.resolve_args(item.args.clone(), &*builder)?;
        if item.kind == ActionKind::Having {
            return builder.having(method, args);
        }
        match item.map.get("query").and_then(Value::as_array) {
            Some(query) => {
                let mut sub = |b: &mut dyn QueryBuilder| self.assemble(b, query, scope, &mut AssemblyState::default());
                builder.where_sub(method, args, &mut sub)
            }
            None => builder.where_clause(method, args),
        }
    }

    /// `joinSub` as `{alias, query, first, operator?, second}`,
    /// `["alias", first, operator?, second]` with an item-level `query`, or
    /// a bare alias with item-level `query` and `on`.
    fn join_sub(&self, builder: &mut dyn QueryBuilder, item: &Item<'_>, scope: Scope<'_>) -> QdefResult<()> {
        let target = sub_target(item.map, item.written);
        let (alias, extra) = match &item.resolved {
            Value::Object(value) => (
                target.name.map(str::to_string),
                ["first", "operator", "second"]
                    .iter()
                    .filter_map(|k| value.get(*k).cloned())
                    .collect(),
            ),
            Value::Array(parts) if parts.first().is_some_and(Value::is_string) => (
                parts.first().and_then(Value::as_str).map(str::to_string),
                parts[1..].to_vec(),
            ),
            _ => (target.name.map(str::to_string), Vec::new()),
        };
        let (Some(alias), Some(query)) = (alias, target.query) else {
            return Err(QdefError::InvalidJoinSub("requires an alias and a query".to_string()));
        };

        let clauses = self.on_clauses(builder, item, scope)?;
        let args = self.resolver.resolve_args(extra, &*builder)?;
        let mut sub = |b: &mut dyn QueryBuilder| self.assemble(b, query, scope, &mut AssemblyState::default());
        if clauses.is_empty() {
            return builder.join_sub(item.method(), &alias, &mut sub, args, None);
        }
        let mut replay = |join: &mut dyn JoinClause| replay_on(join, &clauses);
        let on: JoinOn<'_> = &mut replay;
        builder.join_sub(item.method(), &alias, &mut sub, args, Some(on))
    }

    /// Resolve the `on` clauses of a join up front; the builder replays
    /// them inside its join continuation.
    fn on_clauses(&self, builder: &dyn QueryBuilder, item: &Item<'_>, scope: Scope<'_>) -> QdefResult<Vec<OnClause>> {
        let Some(on) = item.map.get("on").or_else(|| item.written.get("on")) else {
            return Ok(Vec::new());
        };
        parse_on(on)?
            .into_iter()
            .map(|(method, args)| -> QdefResult<OnClause> {
                let resolved = args.iter().map(|a| resolve_param_refs(a, scope.params)).collect();
                Ok((method, self.resolver.resolve_args(resolved, builder)?))
            })
            .collect()
    }

    fn table_arg(&self, args: &[Value], scope: Scope<'_>) -> QdefResult<String> {
        match args.first() {
            Some(Value::String(name)) => self.validator.validate_table(name, scope.ctes),
            Some(other) => Err(QdefError::table(other.to_string(), "table name must be a string")),
            None => Err(QdefError::table("", "missing table name")),
        }
    }

    /// Raw actions: validate the SQL text after parameter substitution,
    /// then resolve any inline `$raw` markers among the bindings.
    fn raw_args(&self, builder: &dyn QueryBuilder, args: Vec<Value>) -> QdefResult<Vec<Arg>> {
        self.check_raw_sql(&args)?;
        self.resolver.resolve_args(args, builder)
    }

    fn check_raw_sql(&self, args: &[Value]) -> QdefResult<()> {
        match args.first() {
            Some(Value::String(sql)) => self.validator.validate_raw_expression(sql),
            _ => Ok(()),
        }
    }
}

fn join_with(builder: &mut dyn QueryBuilder, method: &str, args: Vec<Arg>, clauses: Vec<OnClause>) -> QdefResult<()> {
    if clauses.is_empty() {
        return builder.join(method, args, None);
    }
    let mut replay = |join: &mut dyn JoinClause| replay_on(join, &clauses);
    let on: JoinOn<'_> = &mut replay;
    builder.join(method, args, Some(on))
}

fn replay_on(join: &mut dyn JoinClause, clauses: &[OnClause]) -> QdefResult<()> {
    for (method, args) in clauses {
        join.on(method, args.clone())?;
    }
    Ok(())
}

/// Join `on` forms:
///
/// ```text
/// ["a.id", "=", "b.a_id"]                      one clause
/// [["a.id", "=", "b.a_id"], {"orOn": [...]}]   several
/// {"first": "a.id", "operator": "=", "second": "b.a_id"}
/// {"andOn": ["a.kind", "b.kind"]}
/// ```
fn parse_on(on: &Value) -> QdefResult<Vec<(String, Vec<Value>)>> {
    match on {
        Value::Array(items) if items.iter().all(|v| !v.is_array() && (!v.is_object() || is_marker(v))) => {
            Ok(vec![("on".to_string(), items.clone())])
        }
        Value::Array(items) => items
            .iter()
            .map(|clause| match clause {
                Value::Array(args) => Ok(("on".to_string(), args.clone())),
                Value::Object(map) => parse_on_object(map),
                other => Err(QdefError::InvalidQuery(format!("unrecognized join clause {}", other))),
            })
            .collect(),
        Value::Object(map) => Ok(vec![parse_on_object(map)?]),
        other => Err(QdefError::InvalidQuery(format!("unrecognized join 'on' value {}", other))),
    }
}

fn parse_on_object(map: &Map<String, Value>) -> QdefResult<(String, Vec<Value>)> {
    for method in ["on", "andOn", "orOn"] {
        if let Some(args) = map.get(method) {
            let args = match args {
                Value::Array(items) => items.clone(),
                other => vec![other.clone()],
            };
            return Ok((method.to_string(), args));
        }
    }
    match (map.get("first"), map.get("second")) {
        (Some(first), Some(second)) => {
            let mut args = vec![first.clone()];
            if let Some(operator) = map.get("operator") {
                args.push(operator.clone());
            }
            args.push(second.clone());
            Ok(("on".to_string(), args))
        }
        _ => Err(QdefError::InvalidQuery(
            "join clause needs 'first' and 'second', or one of on/andOn/orOn".to_string(),
        )),
    }
}
