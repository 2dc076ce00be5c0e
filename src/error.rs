//! Error types for qdef.

use thiserror::Error;

/// The main error type for qdef operations.
///
/// Every variant is fatal: the engine stops at the first one and never
/// executes a partially assembled builder.
#[derive(Debug, Error)]
pub enum QdefError {
    /// Whole-query pre-flight validation failed.
    #[error("Security violation: {source}")]
    SecurityViolation {
        #[source]
        source: Box<QdefError>,
    },

    /// Action rejected by the action policy.
    #[error("Action not allowed: '{0}'")]
    ActionNotAllowed(String),

    /// Executor rejected by the executor policy.
    #[error("Executor not allowed: '{0}'")]
    ExecutorNotAllowed(String),

    /// Table reference is malformed or rejected by the table policy.
    #[error("Invalid table '{table}': {reason}")]
    InvalidTable { table: String, reason: String },

    /// Raw SQL fragment matched the dangerous-pattern catalog.
    #[error("Invalid raw expression: matched {category} pattern '{pattern}'")]
    InvalidRawExpression { category: String, pattern: String },

    /// `$raw` marker that is neither a string nor an object with `sql`.
    #[error("Invalid $raw reference: {0}")]
    InvalidRaw(String),

    #[error("Invalid fromSub: {0}")]
    InvalidFromSub(String),

    #[error("Invalid subSelect: {0}")]
    InvalidSubSelect(String),

    #[error("Invalid joinSub: {0}")]
    InvalidJoinSub(String),

    #[error("Invalid whereExists: {0}")]
    InvalidWhereExists(String),

    #[error("Invalid union: {0}")]
    InvalidUnion(String),

    /// CTE item without a name or a query.
    #[error("Invalid CTE: {0}")]
    InvalidCte(String),

    /// Struct projection references a column absent from the result.
    #[error("Invalid column key: '{0}' is not a column of the result")]
    InvalidColumnKey(String),

    /// Struct projection value key absent from the result.
    #[error("Invalid value key: '{0}' is not a column of the result")]
    InvalidValueKey(String),

    /// Query definition has the wrong shape.
    #[error("Invalid query definition: {0}")]
    InvalidQuery(String),

    /// Unknown or malformed return format.
    #[error("Invalid return format: {0}")]
    InvalidFormat(String),

    /// Argument rejected before it reached the builder.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The query builder collaborator failed.
    #[error("Builder error: {0}")]
    Builder(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl QdefError {
    /// Create an invalid table error.
    pub fn table(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTable {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a validation failure raised during whole-query validation.
    pub fn security(source: QdefError) -> Self {
        match source {
            already @ Self::SecurityViolation { .. } => already,
            other => Self::SecurityViolation {
                source: Box::new(other),
            },
        }
    }

    /// Stable machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SecurityViolation { .. } => "SECURITY_VIOLATION",
            Self::ActionNotAllowed(_) => "ACTION_NOT_ALLOWED",
            Self::ExecutorNotAllowed(_) => "EXECUTOR_NOT_ALLOWED",
            Self::InvalidTable { .. } => "INVALID_TABLE",
            Self::InvalidRawExpression { .. } => "INVALID_RAW_EXPRESSION",
            Self::InvalidRaw(_) => "INVALID_RAW",
            Self::InvalidFromSub(_) => "INVALID_FROM_SUB",
            Self::InvalidSubSelect(_) => "INVALID_SUB_SELECT",
            Self::InvalidJoinSub(_) => "INVALID_JOIN_SUB",
            Self::InvalidWhereExists(_) => "INVALID_WHERE_EXISTS",
            Self::InvalidUnion(_) => "INVALID_UNION",
            Self::InvalidCte(_) => "INVALID_CTE",
            Self::InvalidColumnKey(_) => "INVALID_COLUMN_KEY",
            Self::InvalidValueKey(_) => "INVALID_VALUE_KEY",
            Self::InvalidQuery(_) => "INVALID_QUERY",
            Self::InvalidFormat(_) => "INVALID_FORMAT",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::Builder(_) => "BUILDER_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// True for rejections raised by the security layer.
    pub fn is_security(&self) -> bool {
        matches!(
            self,
            Self::SecurityViolation { .. }
                | Self::ActionNotAllowed(_)
                | Self::ExecutorNotAllowed(_)
                | Self::InvalidTable { .. }
                | Self::InvalidRawExpression { .. }
        )
    }
}

/// Result type alias for qdef operations.
pub type QdefResult<T> = Result<T, QdefError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QdefError::table("secrets", "not in allow list");
        assert_eq!(err.to_string(), "Invalid table 'secrets': not in allow list");
        assert_eq!(err.code(), "INVALID_TABLE");
    }

    #[test]
    fn test_security_wraps_once() {
        let inner = QdefError::InvalidRawExpression {
            category: "statement".to_string(),
            pattern: "stacked_ddl".to_string(),
        };
        let wrapped = QdefError::security(QdefError::security(inner));
        assert_eq!(wrapped.code(), "SECURITY_VIOLATION");
        assert!(wrapped.is_security());
        assert_eq!(
            wrapped.to_string(),
            "Security violation: Invalid raw expression: matched statement pattern 'stacked_ddl'"
        );
    }
}
