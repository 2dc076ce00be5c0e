//! Dangerous SQL pattern catalog.
//!
//! Checking a fragment is two-phase:
//! 1. Keyword screen. The lowercased fragment is split into word tokens and
//!    each token is looked up in a hash set (or prefix list). Symbolic markers
//!    such as `--` are substring checks. No hit means the fragment is safe.
//! 2. Regex pass. Only after a hit, every rule's regex runs in catalog order
//!    and the first match is reported.
//!
//! Rules are plain data ([`PatternDef`]), so deployments can add dialect
//! functions from configuration without touching code.

use std::collections::HashSet;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{QdefError, QdefResult};

/// Catalog category, reported alongside the rule name.
///
/// Serialized as its display name; unknown names become `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PatternCategory {
    Statement,
    Comment,
    SqlServer,
    Mysql,
    Postgres,
    Oracle,
    Timing,
    Injection,
    Encoding,
    Custom(String),
}

impl fmt::Display for PatternCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Statement => f.write_str("statement"),
            Self::Comment => f.write_str("comment"),
            Self::SqlServer => f.write_str("sqlserver"),
            Self::Mysql => f.write_str("mysql"),
            Self::Postgres => f.write_str("postgres"),
            Self::Oracle => f.write_str("oracle"),
            Self::Timing => f.write_str("timing"),
            Self::Injection => f.write_str("injection"),
            Self::Encoding => f.write_str("encoding"),
            Self::Custom(name) => f.write_str(name),
        }
    }
}

impl From<String> for PatternCategory {
    fn from(name: String) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "statement" => Self::Statement,
            "comment" => Self::Comment,
            "sqlserver" => Self::SqlServer,
            "mysql" => Self::Mysql,
            "postgres" => Self::Postgres,
            "oracle" => Self::Oracle,
            "timing" => Self::Timing,
            "injection" => Self::Injection,
            "encoding" => Self::Encoding,
            _ => Self::Custom(name),
        }
    }
}

impl From<PatternCategory> for String {
    fn from(category: PatternCategory) -> Self {
        category.to_string()
    }
}

/// One catalog rule as data.
///
/// `keywords` feed the phase-1 screen:
/// - a plain word (`sleep`) matches a whole token
/// - a word ending in `*` (`xp_*`) matches any token with that prefix
/// - anything with non-word characters (`--`, `@@`) is a substring marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternDef {
    pub category: PatternCategory,
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl PatternDef {
    pub fn new(category: PatternCategory, name: &str, pattern: &str, keywords: &[&str]) -> Self {
        Self {
            category,
            name: name.to_string(),
            pattern: pattern.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// A rule that matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    pub category: PatternCategory,
    pub name: String,
    pub matched: String,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    category: PatternCategory,
    name: String,
    regex: Regex,
}

/// Phase-1 keyword screen.
#[derive(Debug, Clone, Default)]
struct KeywordScreen {
    words: HashSet<String>,
    prefixes: Vec<String>,
    markers: Vec<String>,
}

impl KeywordScreen {
    fn add(&mut self, keyword: &str) {
        let keyword = keyword.trim().to_ascii_lowercase();
        if keyword.is_empty() {
            return;
        }
        if let Some(prefix) = keyword.strip_suffix('*') {
            if !self.prefixes.iter().any(|p| p == prefix) {
                self.prefixes.push(prefix.to_string());
            }
        } else if keyword.chars().all(is_word_char) {
            self.words.insert(keyword);
        } else if !self.markers.contains(&keyword) {
            self.markers.push(keyword);
        }
    }

    fn hits(&self, lowered: &str) -> bool {
        if self.markers.iter().any(|m| lowered.contains(m.as_str())) {
            return true;
        }
        lowered
            .split(|c: char| !is_word_char(c))
            .filter(|token| !token.is_empty())
            .any(|token| {
                self.words.contains(token) || self.prefixes.iter().any(|p| token.starts_with(p.as_str()))
            })
    }

    fn len(&self) -> usize {
        self.words.len() + self.prefixes.len() + self.markers.len()
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Immutable, compiled catalog.
#[derive(Debug, Clone)]
pub struct PatternCatalog {
    rules: Vec<CompiledRule>,
    screen: KeywordScreen,
}

impl PatternCatalog {
    /// Compile a catalog from rule definitions.
    pub fn compile(defs: &[PatternDef]) -> QdefResult<Self> {
        let mut rules = Vec::with_capacity(defs.len());
        let mut screen = KeywordScreen::default();

        for def in defs {
            if def.keywords.is_empty() {
                return Err(QdefError::Config(format!(
                    "raw pattern '{}' has no screening keywords",
                    def.name
                )));
            }
            let regex = Regex::new(&format!("(?i){}", def.pattern)).map_err(|e| {
                QdefError::Config(format!("invalid raw pattern '{}': {}", def.name, e))
            })?;
            for keyword in &def.keywords {
                screen.add(keyword);
            }
            rules.push(CompiledRule {
                category: def.category.clone(),
                name: def.name.clone(),
                regex,
            });
        }

        Ok(Self { rules, screen })
    }

    /// The built-in catalog.
    pub fn builtin() -> QdefResult<Self> {
        Self::compile(&default_patterns())
    }

    /// Built-in rules followed by `extra`.
    pub fn with_extra(extra: &[PatternDef]) -> QdefResult<Self> {
        let mut defs = default_patterns();
        defs.extend_from_slice(extra);
        Self::compile(&defs)
    }

    /// Phase 1 only: could this fragment be dangerous?
    pub fn screen(&self, expr: &str) -> bool {
        self.screen.hits(&expr.to_ascii_lowercase())
    }

    /// First matching rule, or `None` if the fragment is safe.
    pub fn find_match(&self, expr: &str) -> Option<PatternMatch> {
        if !self.screen(expr) {
            return None;
        }
        self.rules.iter().find_map(|rule| {
            rule.regex.find(expr).map(|m| PatternMatch {
                category: rule.category.clone(),
                name: rule.name.clone(),
                matched: m.as_str().to_string(),
            })
        })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn keyword_count(&self) -> usize {
        self.screen.len()
    }
}

/// Built-in rule set.
pub fn default_patterns() -> Vec<PatternDef> {
    use PatternCategory::*;

    vec![
        // Stacked statements and DDL/DML
        PatternDef::new(
            Statement,
            "stacked_statement",
            r";\s*(drop|delete|insert|update|alter|create|truncate|exec|execute|grant|revoke|merge|replace|rename|shutdown|declare|call)\b",
            &[";"],
        ),
        PatternDef::new(
            Statement,
            "ddl",
            r"\b(drop|truncate|alter|create)\s+(table|database|schema|index|view|user|role|procedure|function|trigger|sequence)\b",
            &["drop", "truncate", "alter", "create"],
        ),
        PatternDef::new(
            Statement,
            "dcl",
            r"\b(grant|revoke)\s+\w+",
            &["grant", "revoke"],
        ),
        PatternDef::new(
            Statement,
            "dml",
            r"\b(insert\s+into|delete\s+from|update\s+[\w.]+\s+set|merge\s+into)\b",
            &["insert", "delete", "update", "merge"],
        ),
        PatternDef::new(
            Statement,
            "exec",
            r"\bexec(ute)?(\s+|\s*\()",
            &["exec", "execute"],
        ),
        // Comments
        PatternDef::new(Comment, "line_comment", r"--", &["--"]),
        PatternDef::new(Comment, "block_comment", r"/\*|\*/", &["/*", "*/"]),
        // SQL Server
        PatternDef::new(SqlServer, "xp_procedure", r"\bxp_\w+", &["xp_*"]),
        PatternDef::new(
            SqlServer,
            "sp_procedure",
            r"\bsp_(executesql|oacreate|oamethod|configure|addextendedproc|makewebtask)\b",
            &["sp_executesql", "sp_oacreate", "sp_oamethod", "sp_configure", "sp_addextendedproc", "sp_makewebtask"],
        ),
        PatternDef::new(
            SqlServer,
            "openrowset",
            r"\b(openrowset|opendatasource|openquery|openxml)\b",
            &["openrowset", "opendatasource", "openquery", "openxml"],
        ),
        PatternDef::new(SqlServer, "bulk_insert", r"\bbulk\s+insert\b", &["bulk"]),
        // MySQL
        PatternDef::new(Mysql, "load_file", r"\bload_file\s*\(", &["load_file"]),
        PatternDef::new(
            Mysql,
            "into_outfile",
            r"\binto\s+(out|dump)file\b",
            &["outfile", "dumpfile"],
        ),
        PatternDef::new(
            Mysql,
            "load_data",
            r"\bload\s+data\s+(local\s+)?infile\b",
            &["infile"],
        ),
        PatternDef::new(Mysql, "benchmark", r"\bbenchmark\s*\(", &["benchmark"]),
        PatternDef::new(Mysql, "sleep", r"\bsleep\s*\(", &["sleep"]),
        // PostgreSQL
        PatternDef::new(
            Postgres,
            "file_access",
            r"\bpg_(read_file|read_binary_file|ls_dir|stat_file)\b",
            &["pg_read_file", "pg_read_binary_file", "pg_ls_dir", "pg_stat_file"],
        ),
        PatternDef::new(
            Postgres,
            "large_object",
            r"\blo_(import|export|from_bytea|put)\b",
            &["lo_import", "lo_export", "lo_from_bytea", "lo_put"],
        ),
        PatternDef::new(
            Postgres,
            "copy",
            r"\bcopy\s+[\w.]+(\s*\([^)]*\))?\s+(from|to)\b",
            &["copy"],
        ),
        // Oracle
        PatternDef::new(
            Oracle,
            "utl_package",
            r"\butl_(file|http|tcp|smtp|inaddr|mail)\b",
            &["utl_*"],
        ),
        PatternDef::new(Oracle, "dbms_package", r"\bdbms_\w+", &["dbms_*"]),
        // Timing attacks
        PatternDef::new(Timing, "waitfor_delay", r"\bwaitfor\s+(delay|time)\b", &["waitfor"]),
        PatternDef::new(Timing, "pg_sleep", r"\bpg_sleep(_for|_until)?\s*\(", &["pg_sleep*"]),
        PatternDef::new(Timing, "dbms_lock_sleep", r"\bdbms_lock\s*\.\s*sleep\b", &["dbms_*"]),
        // Injection markers
        PatternDef::new(Injection, "stacked_select", r";\s*select\b", &[";"]),
        PatternDef::new(
            Injection,
            "union_select",
            r"\bunion(\s+all)?\s+select\b",
            &["union"],
        ),
        PatternDef::new(Injection, "server_variable", r"@@\w+", &["@@"]),
        PatternDef::new(
            Injection,
            "system_catalog",
            r"\b(information_schema|pg_catalog|pg_shadow|pg_authid|mysql\s*\.\s*user|sys\s*\.\s*\w+|sysobjects|syscolumns|syslogins|all_tables|all_users|dba_\w+)\b",
            &[
                "information_schema",
                "pg_catalog",
                "pg_shadow",
                "pg_authid",
                "mysql",
                "sys",
                "sysobjects",
                "syscolumns",
                "syslogins",
                "all_tables",
                "all_users",
                "dba_*",
            ],
        ),
        // Encoding bypasses
        PatternDef::new(Encoding, "hex_literal", r"\b0x[0-9a-f]+\b", &["0x*"]),
        PatternDef::new(
            Encoding,
            "char_function",
            r"\b(n?char|chr)\s*\(\s*\d+",
            &["char", "nchar", "chr"],
        ),
        PatternDef::new(Encoding, "unhex", r"\bunhex\s*\(", &["unhex"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category_of(expr: &str) -> Option<String> {
        PatternCatalog::builtin()
            .unwrap()
            .find_match(expr)
            .map(|m| m.category.to_string())
    }

    #[test]
    fn test_builtin_compiles() {
        let catalog = PatternCatalog::builtin().unwrap();
        assert_eq!(catalog.rule_count(), default_patterns().len());
        assert!(catalog.keyword_count() > 30);
    }

    #[test]
    fn test_vendor_categories() {
        assert_eq!(category_of("xp_cmdshell 'dir'").as_deref(), Some("sqlserver"));
        assert_eq!(category_of("name, sp_executesql").as_deref(), Some("sqlserver"));
        assert_eq!(category_of("LOAD_FILE('/etc/passwd')").as_deref(), Some("mysql"));
        assert_eq!(category_of("pg_read_file('x')").as_deref(), Some("postgres"));
        assert_eq!(category_of("UTL_HTTP.REQUEST('http://x')").as_deref(), Some("oracle"));
        assert_eq!(category_of("pg_sleep(5)").as_deref(), Some("timing"));
        assert_eq!(category_of("WAITFOR DELAY '0:0:5'").as_deref(), Some("timing"));
        assert_eq!(category_of("0x44524F50").as_deref(), Some("encoding"));
        assert_eq!(category_of("CHAR(68)").as_deref(), Some("encoding"));
    }

    #[test]
    fn test_statement_and_comment() {
        assert_eq!(category_of("1; DROP TABLE users").as_deref(), Some("statement"));
        assert_eq!(category_of("id -- comment").as_deref(), Some("comment"));
        assert_eq!(category_of("a /* b */").as_deref(), Some("comment"));
        assert_eq!(category_of("1 UNION ALL SELECT password").as_deref(), Some("injection"));
        assert_eq!(category_of("@@version").as_deref(), Some("injection"));
        assert_eq!(category_of("x IN (SELECT name FROM information_schema.tables)").as_deref(), Some("injection"));
    }

    #[test]
    fn test_safe_fragments() {
        for expr in [
            "COUNT(*)",
            "COALESCE(name, 'x')",
            "CASE WHEN status = 'a' THEN 1 ELSE 0 END",
            "SUM(amount) AS total",
            "LOWER(email) = ?",
            "created_at > NOW() - INTERVAL '7 days'",
            "updated_at",
            "description",
        ] {
            assert_eq!(category_of(expr), None, "{expr}");
        }
    }

    #[test]
    fn test_keyword_hit_without_regex_match_is_safe() {
        let catalog = PatternCatalog::builtin().unwrap();
        // "union" passes the screen but not the union-select rule.
        assert!(catalog.screen("label = 'union'"));
        assert!(catalog.find_match("label = 'union'").is_none());
        // Identifiers containing keywords are single tokens.
        assert!(!catalog.screen("trade_union_id = 1 OR updated_at IS NULL"));
    }

    #[test]
    fn test_extra_patterns() {
        let extra = PatternDef {
            category: PatternCategory::Custom("tenant".to_string()),
            name: "tenant_override".to_string(),
            pattern: r"\bset_tenant\s*\(".to_string(),
            keywords: vec!["set_tenant".to_string()],
        };
        let catalog = PatternCatalog::with_extra(&[extra]).unwrap();
        let m = catalog.find_match("SET_TENANT(42)").unwrap();
        assert_eq!(m.category.to_string(), "tenant");
        assert_eq!(m.name, "tenant_override");
    }

    #[test]
    fn test_bad_extra_pattern_is_config_error() {
        let bad = PatternDef::new(PatternCategory::Custom("x".into()), "bad", "(", &["x"]);
        assert!(matches!(PatternCatalog::with_extra(&[bad]), Err(QdefError::Config(_))));

        let no_keywords = PatternDef::new(PatternCategory::Custom("x".into()), "quiet", "x", &[]);
        assert!(matches!(PatternCatalog::compile(&[no_keywords]), Err(QdefError::Config(_))));
    }
}
