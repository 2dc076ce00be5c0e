//! Interpreter configuration.
//!
//! Loaded from `qdef.toml`:
//!
//! ```toml
//! [security.tables]
//! mode = "allow"
//! list = ["users", "orders", "reporting.*"]
//!
//! [security.executors]
//! mode = "block"
//! list = ["dump"]
//!
//! [security.table_aliases]
//! people = "hr.employees"
//!
//! [[security.raw_patterns]]
//! category = "tenant"
//! name = "tenant_override"
//! pattern = '\bset_tenant\s*\('
//! keywords = ["set_tenant"]
//!
//! [defaults]
//! return_format = "array"
//! max_rows = 1000
//! timeout = 30
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::builder::ExecutionOptions;
use crate::error::{QdefError, QdefResult};
use crate::security::{PatternDef, PolicyDef};
use crate::transformer::ReturnFormat;

/// File name looked up in the working directory.
pub const CONFIG_FILE: &str = "qdef.toml";

/// Main interpreter configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QdefConfig {
    pub security: SecurityConfig,
    pub defaults: DefaultsConfig,
}

/// Security policy section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub tables: PolicyDef,
    pub actions: PolicyDef,
    pub executors: PolicyDef,
    /// Friendly table name -> actual table name.
    pub table_aliases: BTreeMap<String, String>,
    /// Extra dangerous-pattern rules appended to the built-in catalog.
    pub raw_patterns: Vec<PatternDef>,
    /// Use only `raw_patterns`, dropping the built-in catalog.
    pub replace_default_patterns: bool,
}

/// Lowest-priority execution defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub return_format: Option<ReturnFormat>,
    /// Row ceiling for result-set executors without an explicit limit.
    pub max_rows: Option<u64>,
    pub datasource: Option<String>,
    pub timeout: Option<u64>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl DefaultsConfig {
    pub fn execution_options(&self) -> ExecutionOptions {
        ExecutionOptions {
            datasource: self.datasource.clone(),
            timeout: self.timeout,
            username: self.username.clone(),
            password: self.password.clone(),
            ..ExecutionOptions::default()
        }
    }
}

impl QdefConfig {
    /// Create a new configuration builder.
    pub fn builder() -> QdefConfigBuilder {
        QdefConfigBuilder::default()
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> QdefResult<Self> {
        toml::from_str(content).map_err(|e| QdefError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> QdefResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            QdefError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from `explicit`, else `./qdef.toml`, else the user config
    /// directory, else defaults.
    pub fn discover(explicit: Option<&Path>) -> QdefResult<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        for candidate in Self::candidate_paths() {
            if candidate.is_file() {
                return Self::load(candidate);
            }
        }
        tracing::debug!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("qdef").join("config.toml"));
        }
        paths
    }
}

/// Builder for QdefConfig.
#[derive(Debug, Default)]
pub struct QdefConfigBuilder {
    config: QdefConfig,
}

impl QdefConfigBuilder {
    /// Set the table policy.
    pub fn tables(mut self, policy: PolicyDef) -> Self {
        self.config.security.tables = policy;
        self
    }

    /// Set the action policy.
    pub fn actions(mut self, policy: PolicyDef) -> Self {
        self.config.security.actions = policy;
        self
    }

    /// Set the executor policy.
    pub fn executors(mut self, policy: PolicyDef) -> Self {
        self.config.security.executors = policy;
        self
    }

    /// Map a friendly table name onto an actual one.
    pub fn table_alias(mut self, friendly: impl Into<String>, actual: impl Into<String>) -> Self {
        self.config.security.table_aliases.insert(friendly.into(), actual.into());
        self
    }

    /// Add a dangerous-pattern rule.
    pub fn raw_pattern(mut self, pattern: PatternDef) -> Self {
        self.config.security.raw_patterns.push(pattern);
        self
    }

    pub fn return_format(mut self, format: ReturnFormat) -> Self {
        self.config.defaults.return_format = Some(format);
        self
    }

    pub fn max_rows(mut self, max_rows: u64) -> Self {
        self.config.defaults.max_rows = Some(max_rows);
        self
    }

    pub fn datasource(mut self, datasource: impl Into<String>) -> Self {
        self.config.defaults.datasource = Some(datasource.into());
        self
    }

    pub fn timeout(mut self, seconds: u64) -> Self {
        self.config.defaults.timeout = Some(seconds);
        self
    }

    /// Build the configuration
    pub fn build(self) -> QdefConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::PolicyMode;

    #[test]
    fn test_parse_toml() {
        let config = QdefConfig::from_toml_str(
            r#"
            [security.tables]
            mode = "allow"
            list = ["users", "reporting.*"]

            [security.table_aliases]
            people = "hr.employees"

            [[security.raw_patterns]]
            category = "tenant"
            name = "tenant_override"
            pattern = '\bset_tenant\s*\('
            keywords = ["set_tenant"]

            [defaults]
            return_format = ["struct", "id"]
            max_rows = 500
            datasource = "reporting"
            "#,
        )
        .unwrap();

        assert_eq!(config.security.tables.mode, PolicyMode::Allow);
        assert_eq!(config.security.tables.list.len(), 2);
        assert_eq!(config.security.actions.mode, PolicyMode::None);
        assert_eq!(config.security.table_aliases["people"], "hr.employees");
        assert_eq!(config.security.raw_patterns[0].category.to_string(), "tenant");
        assert_eq!(config.defaults.max_rows, Some(500));
        assert_eq!(
            config.defaults.return_format,
            Some(ReturnFormat::Struct {
                column_key: "id".to_string(),
                value_keys: Vec::new(),
            })
        );
        assert_eq!(config.defaults.execution_options().datasource.as_deref(), Some("reporting"));
    }

    #[test]
    fn test_bad_format_is_rejected() {
        let err = QdefConfig::from_toml_str("[defaults]\nreturn_format = \"csv\"\n").unwrap_err();
        assert!(matches!(err, QdefError::Config(_)));
    }

    #[test]
    fn test_builder() {
        let config = QdefConfig::builder()
            .tables(PolicyDef::block(["secrets"]))
            .table_alias("people", "hr.employees")
            .max_rows(100)
            .timeout(5)
            .build();
        assert_eq!(config.security.tables.mode, PolicyMode::Block);
        assert_eq!(config.defaults.timeout, Some(5));
    }

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(QdefConfig::from_toml_str("").unwrap(), QdefConfig::default());
    }
}
