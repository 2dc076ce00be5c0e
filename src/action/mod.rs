//! Action vocabulary: registry, normalization and argument conversion.

pub mod args;
pub mod kind;
pub mod registry;

pub use args::{action_args, executor_args};
pub use kind::{ActionKind, Executor};
pub use registry::{ActionRegistry, Combinator, NormalizedAction, normalize};

/// Keys of an action object that never name an action.
pub const RESERVED_KEYS: &[&str] = &[
    "when",
    "else",
    "query",
    "on",
    "clauses",
    "alias",
    "datasource",
    "timeout",
    "username",
    "password",
    "returnFormat",
];

pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}
