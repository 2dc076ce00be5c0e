//! Query definition shape helpers.
//!
//! A definition is a JSON array of action objects. These helpers find the
//! action key of an object and the nested definitions hanging off it; they
//! never interpret values.

use std::collections::HashSet;
use std::slice;

use serde_json::{Map, Value};

use crate::action::{ActionKind, ActionRegistry, is_reserved_key};
use crate::error::{QdefError, QdefResult};

/// Borrow the action list of a definition.
pub fn definition_items(definition: &Value) -> QdefResult<&[Value]> {
    match definition {
        Value::Array(items) => Ok(items),
        other => Err(QdefError::InvalidQuery(format!(
            "expected an array of actions, got {}",
            crate::value::type_name(other)
        ))),
    }
}

/// Treat an array as a definition and a single object as a one-item one.
pub fn as_definition(value: &Value) -> Option<&[Value]> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(_) => Some(slice::from_ref(value)),
        _ => None,
    }
}

/// What an action object asks the engine to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKey<'a> {
    Action(&'a str),
    Executor(&'a str),
}

/// First recognized key of an action object. Reserved and unknown keys are
/// skipped; `None` means the item is inert.
pub fn item_key<'a>(registry: &ActionRegistry, item: &'a Map<String, Value>) -> Option<ItemKey<'a>> {
    item.keys().find_map(|key| {
        if is_reserved_key(key) {
            None
        } else if registry.is_valid_action(key) {
            Some(ItemKey::Action(key.as_str()))
        } else if registry.is_valid_executor(key) {
            Some(ItemKey::Executor(key.as_str()))
        } else {
            None
        }
    })
}

/// Name and nested query of a subquery-style action.
///
/// The name comes from a string value or the value's `alias`/`name`; the
/// query from the item's `query`, the value's `query`, or an array value.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubTarget<'a> {
    pub name: Option<&'a str>,
    pub query: Option<&'a [Value]>,
}

pub fn sub_target<'a>(item: &'a Map<String, Value>, value: &'a Value) -> SubTarget<'a> {
    let name = match value {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map
            .get("alias")
            .or_else(|| map.get("name"))
            .and_then(Value::as_str),
        _ => None,
    }
    .or_else(|| item.get("alias").and_then(Value::as_str));

    let query = item
        .get("query")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .or_else(|| match value {
            Value::Object(map) => map.get("query").and_then(Value::as_array).map(Vec::as_slice),
            Value::Array(items) if items.iter().all(Value::is_object) && !items.is_empty() => Some(items),
            _ => None,
        });

    SubTarget { name, query }
}

/// Every nested definition reachable from one action object: `query`,
/// `else`, `clauses`, queries carried by a subquery action's value and
/// clauses carried by a where/having value.
pub fn nested_definitions<'a>(registry: &ActionRegistry, item: &'a Map<String, Value>) -> Vec<&'a [Value]> {
    let mut nested = Vec::new();
    for key in ["query", "else", "clauses"] {
        if let Some(items) = item.get(key).and_then(as_definition) {
            nested.push(items);
        }
    }
    for (key, value) in item {
        if is_reserved_key(key) {
            continue;
        }
        let Some((_, kind)) = registry.route(key) else {
            continue;
        };
        match value {
            Value::Object(map) if kind.needs_subquery() => {
                if let Some(items) = map.get("query").and_then(Value::as_array) {
                    nested.push(items);
                }
            }
            Value::Object(map) if kind.accepts_clauses() => {
                if let Some(items) = map.get("clauses").and_then(as_definition) {
                    nested.push(items);
                }
            }
            Value::Array(items) if kind.needs_subquery() && items.iter().all(Value::is_object) => {
                nested.push(items)
            }
            _ => {}
        }
    }
    nested
}

/// Case-insensitive set of CTE names visible to a definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CteAliases(HashSet<String>);

impl CteAliases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str) {
        self.0.insert(name.to_ascii_lowercase());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Gather every `with`/`withRecursive` name in a definition tree.
    pub fn collect(registry: &ActionRegistry, items: &[Value]) -> Self {
        let mut aliases = Self::new();
        aliases.collect_into(registry, items);
        aliases
    }

    fn collect_into(&mut self, registry: &ActionRegistry, items: &[Value]) {
        for item in items {
            let Value::Object(map) = item else { continue };
            if let Some(ItemKey::Action(key)) = item_key(registry, map) {
                if let Some((_, ActionKind::With)) = registry.route(key) {
                    if let Some(name) = sub_target(map, &map[key]).name {
                        self.insert(name);
                    }
                }
            }
            for nested in nested_definitions(registry, map) {
                self.collect_into(registry, nested);
            }
        }
    }
}
