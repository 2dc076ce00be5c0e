//! Allow/block policies for tables, actions and executors.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{QdefError, QdefResult};

/// How a policy list is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Permit everything.
    #[default]
    None,
    /// Permit only names matching the list.
    Allow,
    /// Permit everything except names matching the list.
    Block,
}

/// Policy as written in configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyDef {
    #[serde(default)]
    pub mode: PolicyMode,
    #[serde(default)]
    pub list: Vec<String>,
}

impl PolicyDef {
    pub fn allow<I, S>(list: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode: PolicyMode::Allow,
            list: list.into_iter().map(Into::into).collect(),
        }
    }

    pub fn block<I, S>(list: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode: PolicyMode::Block,
            list: list.into_iter().map(Into::into).collect(),
        }
    }
}

/// Case-insensitive name pattern. `*` matches within one dotted segment.
#[derive(Debug, Clone)]
pub struct NamePattern {
    source: String,
    matcher: Matcher,
}

#[derive(Debug, Clone)]
enum Matcher {
    Exact(String),
    Glob(Regex),
}

impl NamePattern {
    pub fn new(pattern: &str) -> QdefResult<Self> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(QdefError::Config("empty policy pattern".to_string()));
        }

        let matcher = if pattern.contains('*') {
            let body = pattern
                .split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join("[^.]*");
            let regex = Regex::new(&format!("(?i)^{}$", body))
                .map_err(|e| QdefError::Config(format!("invalid policy pattern '{}': {}", pattern, e)))?;
            Matcher::Glob(regex)
        } else {
            Matcher::Exact(pattern.to_ascii_lowercase())
        };

        Ok(Self {
            source: pattern.to_string(),
            matcher,
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        match &self.matcher {
            Matcher::Exact(exact) => name.eq_ignore_ascii_case(exact),
            Matcher::Glob(regex) => regex.is_match(name),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Compiled policy for one category.
#[derive(Debug, Clone, Default)]
pub struct SecurityPolicy {
    mode: PolicyMode,
    patterns: Vec<NamePattern>,
}

impl SecurityPolicy {
    /// Permit-all policy.
    pub fn permit_all() -> Self {
        Self::default()
    }

    pub fn compile(def: &PolicyDef) -> QdefResult<Self> {
        let patterns = def
            .list
            .iter()
            .map(|p| NamePattern::new(p))
            .collect::<QdefResult<Vec<_>>>()?;
        Ok(Self {
            mode: def.mode,
            patterns,
        })
    }

    pub fn mode(&self) -> PolicyMode {
        self.mode
    }

    /// First pattern matching `name`, if any.
    pub fn matching(&self, name: &str) -> Option<&NamePattern> {
        self.patterns.iter().find(|p| p.matches(name))
    }

    pub fn permits(&self, name: &str) -> bool {
        match self.mode {
            PolicyMode::None => true,
            PolicyMode::Allow => self.matching(name).is_some(),
            PolicyMode::Block => self.matching(name).is_none(),
        }
    }

    /// Why `name` is rejected, or `None` if permitted.
    pub fn rejection(&self, name: &str) -> Option<String> {
        match self.mode {
            PolicyMode::None => None,
            PolicyMode::Allow => match self.matching(name) {
                Some(_) => None,
                None => Some("not in allow list".to_string()),
            },
            PolicyMode::Block => self
                .matching(name)
                .map(|p| format!("matches blocked pattern '{}'", p.as_str())),
        }
    }
}
