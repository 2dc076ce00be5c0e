//! `$param` and `$raw` resolution.
//!
//! Both passes build new values; the definition they read from is never
//! modified.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::builder::{Arg, QueryBuilder};
use crate::error::{QdefError, QdefResult};
use crate::security::SecurityValidator;
use crate::security::validator::raw_sql;
use crate::value::{ParamMap, param_ref, raw_ref, scalar_text};

/// Inline `$name$` template marker.
static TEMPLATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Za-z_]\w*)\$").expect("template pattern is valid"));

/// Replace every `{"$param": name}` with the param's value (`null` when
/// absent) and splice scalar params into `$name$` string templates.
pub fn resolve_param_refs(value: &Value, params: &ParamMap) -> Value {
    if let Some(name) = param_ref(value) {
        return params.get(name).cloned().unwrap_or(Value::Null);
    }
    match value {
        Value::String(s) => Value::String(substitute_template(s, params)),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_param_refs(v, params)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_param_refs(v, params)))
                .collect::<Map<_, _>>(),
        ),
        other => other.clone(),
    }
}

/// Unknown names and non-scalar values are left as written.
fn substitute_template(text: &str, params: &ParamMap) -> String {
    if !text.contains('$') {
        return text.to_string();
    }
    TEMPLATE
        .replace_all(text, |caps: &Captures| {
            params
                .get(&caps[1])
                .and_then(scalar_text)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Cheap check for any `$raw` marker in a value tree.
pub fn contains_raw_refs(value: &Value) -> bool {
    if raw_ref(value).is_some() {
        return true;
    }
    match value {
        Value::Array(items) => items.iter().any(contains_raw_refs),
        Value::Object(map) => map.values().any(contains_raw_refs),
        _ => false,
    }
}

/// Turns `$raw` markers into builder raw expressions after validating
/// their SQL.
#[derive(Debug, Clone, Copy)]
pub struct RawResolver<'a> {
    validator: &'a SecurityValidator,
}

impl<'a> RawResolver<'a> {
    pub fn new(validator: &'a SecurityValidator) -> Self {
        Self { validator }
    }

    /// Resolve one value. Marker-free subtrees come back as plain values.
    pub fn resolve(&self, value: &Value, builder: &dyn QueryBuilder) -> QdefResult<Arg> {
        if let Some(payload) = raw_ref(value) {
            let sql = raw_sql(payload)?;
            let bindings = raw_bindings(payload)?;
            self.validator.validate_raw_expression(sql)?;
            return builder.raw(sql, bindings).map(Arg::Raw);
        }
        if !contains_raw_refs(value) {
            return Ok(Arg::Value(value.clone()));
        }
        match value {
            Value::Array(items) => items
                .iter()
                .map(|v| self.resolve(v, builder))
                .collect::<QdefResult<Vec<_>>>()
                .map(Arg::List),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.resolve(v, builder)?)))
                .collect::<QdefResult<Vec<_>>>()
                .map(Arg::Map),
            other => Ok(Arg::Value(other.clone())),
        }
    }

    /// Resolve a positional argument list, skipping the walk when no
    /// marker is present.
    pub fn resolve_args(&self, args: Vec<Value>, builder: &dyn QueryBuilder) -> QdefResult<Vec<Arg>> {
        if !args.iter().any(contains_raw_refs) {
            return Ok(args.into_iter().map(Arg::Value).collect());
        }
        args.iter().map(|v| self.resolve(v, builder)).collect()
    }
}

fn raw_bindings(payload: &Value) -> QdefResult<Vec<Value>> {
    match payload.get("bindings") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(_) => Err(QdefError::InvalidRaw("'bindings' must be an array".to_string())),
    }
}
