//! Security validator.
//!
//! Gates every table, action, executor and raw SQL fragment against the
//! configured policies. `validate_query` walks a whole definition before any
//! builder call is made; the per-item checks run again during assembly on
//! resolved values.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::warn;

use super::patterns::{PatternCatalog, PatternMatch};
use super::policy::{PolicyMode, SecurityPolicy};
use super::table::parse_table_ref;
use crate::action::{ActionKind, ActionRegistry, is_reserved_key, normalize};
use crate::config::SecurityConfig;
use crate::definition::{CteAliases, as_definition, definition_items, nested_definitions};
use crate::error::{QdefError, QdefResult};
use crate::value::raw_ref;

/// Compiled security policy set.
#[derive(Debug, Clone)]
pub struct SecurityValidator {
    registry: Arc<ActionRegistry>,
    tables: SecurityPolicy,
    actions: SecurityPolicy,
    executors: SecurityPolicy,
    /// Lowercased friendly name -> actual table name.
    aliases: HashMap<String, String>,
    catalog: PatternCatalog,
}

impl SecurityValidator {
    pub fn new(config: &SecurityConfig, registry: Arc<ActionRegistry>) -> QdefResult<Self> {
        let mut aliases = HashMap::with_capacity(config.table_aliases.len());
        for (friendly, actual) in &config.table_aliases {
            let target = parse_table_ref(actual)
                .map_err(|e| QdefError::Config(format!("table alias '{}': {}", friendly, e)))?;
            if target.alias.is_some() {
                return Err(QdefError::Config(format!(
                    "table alias '{}' must map to a bare table name, got '{}'",
                    friendly, actual
                )));
            }
            aliases.insert(friendly.to_ascii_lowercase(), target.name);
        }

        let catalog = if config.replace_default_patterns {
            PatternCatalog::compile(&config.raw_patterns)?
        } else {
            PatternCatalog::with_extra(&config.raw_patterns)?
        };

        Ok(Self {
            registry,
            tables: SecurityPolicy::compile(&config.tables)?,
            actions: SecurityPolicy::compile(&config.actions)?,
            executors: SecurityPolicy::compile(&config.executors)?,
            aliases,
            catalog,
        })
    }

    /// Permit-all policies with the built-in pattern catalog.
    pub fn permissive(registry: Arc<ActionRegistry>) -> QdefResult<Self> {
        Self::new(&SecurityConfig::default(), registry)
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &PatternCatalog {
        &self.catalog
    }

    /// Validate a table reference and return the name to hand the builder.
    ///
    /// CTE names pass untouched; aliased names are rewritten to the actual
    /// table, keeping any SQL alias suffix.
    pub fn validate_table(&self, name: &str, ctes: &CteAliases) -> QdefResult<String> {
        let table = parse_table_ref(name)?;

        if ctes.contains(&table.name) {
            return Ok(table.with_name(&table.name));
        }

        if let Some(actual) = self.aliases.get(&table.name.to_ascii_lowercase()) {
            tracing::debug!(friendly = %table.name, actual = %actual, "Resolved table alias");
            return Ok(table.with_name(actual));
        }

        if let Some(reason) = self.tables.rejection(&table.name) {
            warn!(table = %table.name, %reason, "Rejected table");
            return Err(QdefError::table(name, reason));
        }

        Ok(table.with_name(&table.name))
    }

    /// Check an action name against the action policy.
    ///
    /// Both the written name and its base are checked, so blocking
    /// `whereRaw` also blocks `orWhereRaw`.
    pub fn validate_action(&self, name: &str) -> QdefResult<()> {
        let base = normalize(name).base_action;
        let permitted = match self.actions.mode() {
            PolicyMode::None => true,
            PolicyMode::Allow => self.actions.permits(name) || self.actions.permits(&base),
            PolicyMode::Block => self.actions.permits(name) && self.actions.permits(&base),
        };
        if permitted {
            Ok(())
        } else {
            warn!(action = %name, "Rejected action");
            Err(QdefError::ActionNotAllowed(name.to_string()))
        }
    }

    pub fn validate_executor(&self, name: &str) -> QdefResult<()> {
        if self.executors.permits(name) {
            Ok(())
        } else {
            warn!(executor = %name, "Rejected executor");
            Err(QdefError::ExecutorNotAllowed(name.to_string()))
        }
    }

    /// First dangerous-pattern hit in a raw SQL fragment.
    pub fn inspect_raw_expression(&self, expr: &str) -> Option<PatternMatch> {
        self.catalog.find_match(expr)
    }

    pub fn validate_raw_expression(&self, expr: &str) -> QdefResult<()> {
        match self.inspect_raw_expression(expr) {
            None => Ok(()),
            Some(hit) => {
                warn!(
                    category = %hit.category,
                    rule = %hit.name,
                    matched = %hit.matched,
                    "Rejected raw expression"
                );
                Err(QdefError::InvalidRawExpression {
                    category: hit.category.to_string(),
                    pattern: hit.name,
                })
            }
        }
    }

    /// Pre-flight check of a whole definition.
    ///
    /// Collects CTE names first so a later `from` may reference a CTE
    /// declared anywhere in the tree. Any failure is reported as a
    /// security violation.
    pub fn validate_query(&self, definition: &Value) -> QdefResult<()> {
        let items = definition_items(definition)?;
        let ctes = CteAliases::collect(&self.registry, items);
        self.validate_items(items, &ctes).map_err(QdefError::security)
    }

    fn validate_items(&self, items: &[Value], ctes: &CteAliases) -> QdefResult<()> {
        for item in items {
            let Value::Object(map) = item else { continue };
            for (key, value) in map {
                if !is_reserved_key(key) {
                    self.validate_action_value(key, value, ctes)?;
                }
            }
            self.validate_inline_raw(map)?;
            for nested in nested_definitions(&self.registry, map) {
                self.validate_items(nested, ctes)?;
            }
        }
        Ok(())
    }

    fn validate_action_value(&self, key: &str, value: &Value, ctes: &CteAliases) -> QdefResult<()> {
        let Some((_, kind)) = self.registry.route(key) else {
            return Ok(());
        };
        if kind.takes_table() {
            if let Some(table) = literal_table(value) {
                self.validate_table(table, ctes)?;
            }
        }
        if kind.is_raw() {
            if let Some(sql) = literal_sql(value) {
                self.validate_raw_expression(sql)?;
            }
        }
        if let ActionKind::Join = kind {
            if let Some(on) = value.get("on").and_then(as_definition) {
                for clause in on {
                    if let Value::Object(clause) = clause {
                        self.validate_inline_raw(clause)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate every `$raw` marker under an object, skipping nested
    /// definitions which are walked on their own.
    fn validate_inline_raw(&self, map: &Map<String, Value>) -> QdefResult<()> {
        for (key, value) in map {
            if matches!(key.as_str(), "query" | "else" | "clauses") {
                continue;
            }
            self.validate_raw_value(value)?;
        }
        Ok(())
    }

    fn validate_raw_value(&self, value: &Value) -> QdefResult<()> {
        if let Some(payload) = raw_ref(value) {
            return self.validate_raw_expression(raw_sql(payload)?);
        }
        match value {
            Value::Array(items) => items.iter().try_for_each(|v| self.validate_raw_value(v)),
            Value::Object(map) => self.validate_inline_raw(map),
            _ => Ok(()),
        }
    }
}

/// SQL text of a `$raw` payload.
pub(crate) fn raw_sql(payload: &Value) -> QdefResult<&str> {
    match payload {
        Value::String(sql) => Ok(sql),
        Value::Object(map) => map
            .get("sql")
            .and_then(Value::as_str)
            .ok_or_else(|| QdefError::InvalidRaw("object form requires a string 'sql' field".to_string())),
        other => Err(QdefError::InvalidRaw(format!(
            "expected a string or an object, got {}",
            crate::value::type_name(other)
        ))),
    }
}

/// Table name written directly in an action value. Parameterized names are
/// checked after resolution.
fn literal_table(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s),
        Value::Array(items) => items.first().and_then(Value::as_str),
        Value::Object(map) => map.get("table").and_then(Value::as_str),
        _ => None,
    }
}

fn literal_sql(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s),
        Value::Array(items) => items.first().and_then(Value::as_str),
        Value::Object(map) => map.get("sql").and_then(Value::as_str),
        _ => None,
    }
}
