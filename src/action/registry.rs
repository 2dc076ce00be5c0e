//! Action registry and name normalizer.
//!
//! The registry is built once and never mutated, so one instance can be
//! shared across threads behind an `Arc`.
//!
//! ```text
//! orWhereNotIn
//! ─┬ ──┬─ ─┬ ─┬
//!  │   │   │  └── rest of the base
//!  │   │   └── negation infix
//!  │   └── base family
//!  └── combinator (only before an uppercase letter)
//! ```

use std::collections::HashMap;
use std::fmt;

use super::kind::{ActionKind, BASE_ACTIONS, COMBINATOR_ELIGIBLE, Executor, NEGATABLE};

/// How a clause joins the clauses before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Combinator {
    #[default]
    None,
    And,
    Or,
}

impl Combinator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "",
            Self::And => "and",
            Self::Or => "or",
        }
    }
}

impl fmt::Display for Combinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An action name split into its routing parts.
///
/// `qb_method` is always the untouched input: normalization picks the route,
/// the builder still receives the name the author wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedAction {
    pub base_action: String,
    pub combinator: Combinator,
    pub negated: bool,
    pub qb_method: String,
}

/// Lookup tables for action and executor names.
#[derive(Debug, Clone)]
pub struct ActionRegistry {
    base: HashMap<String, ActionKind>,
    /// Generated `and`/`or` variant -> base name.
    combined: HashMap<String, String>,
    /// Generated `whereNot*` variant (with or without combinator) -> base name.
    negated: HashMap<String, String>,
    executors: HashMap<String, Executor>,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        let base: HashMap<String, ActionKind> = BASE_ACTIONS
            .iter()
            .map(|(name, kind)| (name.to_string(), *kind))
            .collect();

        let mut combined = HashMap::new();
        for name in COMBINATOR_ELIGIBLE {
            for prefix in ["and", "or"] {
                combined.insert(format!("{}{}", prefix, capitalize(name)), name.to_string());
            }
        }

        let mut negated = HashMap::new();
        for name in NEGATABLE {
            let not_name = negate(name);
            for prefix in ["and", "or"] {
                negated.insert(format!("{}{}", prefix, capitalize(&not_name)), name.to_string());
            }
            negated.insert(not_name, name.to_string());
        }

        let executors = Executor::ALL
            .into_iter()
            .map(|e| (e.name().to_string(), e))
            .collect();

        Self {
            base,
            combined,
            negated,
            executors,
        }
    }

    pub fn is_valid_action(&self, name: &str) -> bool {
        self.base.contains_key(name) || self.combined.contains_key(name) || self.negated.contains_key(name)
    }

    pub fn is_valid_executor(&self, name: &str) -> bool {
        self.executors.contains_key(name)
    }

    pub fn executor(&self, name: &str) -> Option<Executor> {
        self.executors.get(name).copied()
    }

    /// Routing kind of a base action name.
    pub fn kind(&self, base_action: &str) -> Option<ActionKind> {
        self.base.get(base_action).copied()
    }

    /// Normalize and resolve the routing kind in one step.
    pub fn route(&self, name: &str) -> Option<(NormalizedAction, ActionKind)> {
        if !self.is_valid_action(name) {
            return None;
        }
        let normalized = normalize(name);
        let kind = self.kind(&normalized.base_action)?;
        Some((normalized, kind))
    }

    pub fn normalize(&self, name: &str) -> NormalizedAction {
        normalize(name)
    }

    /// Every valid action name, sorted. Used by the CLI listing.
    pub fn action_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .base
            .keys()
            .chain(self.combined.keys())
            .chain(self.negated.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names
    }

    pub fn base_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.base.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Split an action name into combinator, negation and base.
pub fn normalize(name: &str) -> NormalizedAction {
    let (combinator, rest) = split_combinator(name);
    let rest = decapitalize(rest);

    let lower = rest.to_ascii_lowercase();
    let (base_action, negated) = if lower.starts_with("wherenot") && lower != "wherenull" {
        // "where" + "Not" is 8 ASCII bytes; drop the infix.
        (format!("{}{}", &rest[..5], &rest[8..]), true)
    } else {
        (rest, false)
    };

    NormalizedAction {
        base_action,
        combinator,
        negated,
        qb_method: name.to_string(),
    }
}

/// A prefix only counts as a combinator on a camelCase boundary, so
/// `orderBy` stays `orderBy`.
fn split_combinator(name: &str) -> (Combinator, &str) {
    for (prefix, combinator) in [("and", Combinator::And), ("or", Combinator::Or)] {
        if let Some(rest) = name.strip_prefix(prefix) {
            if rest.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
                return (combinator, rest);
            }
        }
    }
    (Combinator::None, name)
}

/// `whereIn` -> `whereNotIn`, `where` -> `whereNot`.
fn negate(base: &str) -> String {
    format!("whereNot{}", &base["where".len()..])
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

fn decapitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}
