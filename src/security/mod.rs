//! Security layer: name policies, table reference parsing, the raw SQL
//! pattern catalog and the validator tying them together.

pub mod patterns;
pub mod policy;
pub mod table;
pub mod validator;

pub use patterns::{PatternCatalog, PatternCategory, PatternDef, PatternMatch, default_patterns};
pub use policy::{NamePattern, PolicyDef, PolicyMode, SecurityPolicy};
pub use table::{TableRef, parse_table_ref};
pub use validator::SecurityValidator;
