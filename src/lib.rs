//! # qdef: JSON query definitions
//!
//! > **Declare the query. Keep the SQL out of the payload.**
//!
//! A query definition is an ordered JSON array of actions. qdef validates
//! the whole tree against a security policy, resolves parameters, gates
//! actions on conditions and replays them onto a [`QueryBuilder`](builder::QueryBuilder), then
//! shapes what the builder returns.
//!
//! ## Quick Example
//!
//! ```rust
//! use qdef::prelude::*;
//! use serde_json::json;
//!
//! let engine = QdefEngine::new(QdefConfig::default()).unwrap();
//! let mut builder = RecordingBuilder::new();
//!
//! let definition = json!([
//!     {"from": "users"},
//!     {"select": ["id", "name"]},
//!     {"where": ["status", "active"]},
//!     {"whereIn": ["id", {"$param": "ids"}], "when": "hasValues"},
//!     {"get": true}
//! ]);
//! let options = ExecuteOptions::with_params(ParamMap::new().with("ids", json!([1, 2, 3])));
//!
//! engine.execute(&mut builder, &definition, &options).unwrap();
//! assert_eq!(
//!     builder.trace(),
//!     r#"from("users").select(["id","name"]).where("status","active").whereIn("id",[1,2,3]).get()"#
//! );
//! ```
//!
//! ## Markers
//!
//! | Marker               | Meaning                                      |
//! |----------------------|----------------------------------------------|
//! | `{"$param": "name"}` | Caller parameter, `null` when missing        |
//! | `"... $name$ ..."`   | Inline template, scalar parameters only      |
//! | `{"$raw": "sql"}`    | Raw fragment, screened before use            |
//! | `"when": ...`        | Condition gating the action                  |
//! | `"else": [...]`      | Applied instead when the condition fails     |

pub mod action;
pub mod builder;
pub mod condition;
pub mod config;
pub mod definition;
pub mod engine;
pub mod error;
pub mod resolver;
pub mod security;
pub mod transformer;
pub mod value;

pub mod prelude {
    pub use crate::action::{ActionKind, ActionRegistry, Executor, NormalizedAction};
    pub use crate::builder::{
        Arg, ExecutionOptions, JoinClause, NativeColumn, NativeResultSet, QueryBuilder, QueryOutput,
        RawExpression, RecordingBuilder,
    };
    pub use crate::config::QdefConfig;
    pub use crate::engine::{ExecuteOptions, QdefEngine};
    pub use crate::error::*;
    pub use crate::security::{PolicyDef, SecurityValidator};
    pub use crate::transformer::ReturnFormat;
    pub use crate::value::ParamMap;
}

/// Run the whole-definition security check with a permissive policy and
/// the default pattern catalog.
///
/// # Example
///
/// ```
/// use serde_json::json;
///
/// assert!(qdef::validate(&json!([{"from": "users"}, {"whereRaw": "age > 18"}])).is_ok());
/// assert!(qdef::validate(&json!([{"whereRaw": "1; DROP TABLE users"}])).is_err());
/// ```
pub fn validate(definition: &serde_json::Value) -> error::QdefResult<()> {
    let registry = std::sync::Arc::new(action::ActionRegistry::new());
    security::SecurityValidator::permissive(registry)?.validate_query(definition)
}
