//! Closed action and executor vocabularies.

use std::fmt;

/// Routing category of a base action.
///
/// Every base action name maps to exactly one kind; the engine switches on
/// the kind and calls the matching [`crate::builder::QueryBuilder`] method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    From,
    FromRaw,
    FromSub,
    Select,
    SelectRaw,
    SubSelect,
    Join,
    JoinRaw,
    JoinSub,
    Where,
    WhereRaw,
    WhereExists,
    GroupBy,
    Having,
    HavingRaw,
    OrderBy,
    OrderByRaw,
    ClearOrders,
    Limit,
    Offset,
    ForPage,
    Lock,
    Union,
    With,
}

/// Base action names and their routing kinds.
pub(crate) const BASE_ACTIONS: &[(&str, ActionKind)] = &[
    ("from", ActionKind::From),
    ("table", ActionKind::From),
    ("fromRaw", ActionKind::FromRaw),
    ("fromSub", ActionKind::FromSub),
    ("select", ActionKind::Select),
    ("addSelect", ActionKind::Select),
    ("distinct", ActionKind::Select),
    ("selectRaw", ActionKind::SelectRaw),
    ("addSelectRaw", ActionKind::SelectRaw),
    ("subSelect", ActionKind::SubSelect),
    ("join", ActionKind::Join),
    ("innerJoin", ActionKind::Join),
    ("leftJoin", ActionKind::Join),
    ("rightJoin", ActionKind::Join),
    ("leftOuterJoin", ActionKind::Join),
    ("rightOuterJoin", ActionKind::Join),
    ("fullJoin", ActionKind::Join),
    ("crossJoin", ActionKind::Join),
    ("joinRaw", ActionKind::JoinRaw),
    ("leftJoinRaw", ActionKind::JoinRaw),
    ("rightJoinRaw", ActionKind::JoinRaw),
    ("crossJoinRaw", ActionKind::JoinRaw),
    ("joinSub", ActionKind::JoinSub),
    ("leftJoinSub", ActionKind::JoinSub),
    ("rightJoinSub", ActionKind::JoinSub),
    ("crossJoinSub", ActionKind::JoinSub),
    ("where", ActionKind::Where),
    ("whereColumn", ActionKind::Where),
    ("whereIn", ActionKind::Where),
    ("whereBetween", ActionKind::Where),
    ("whereLike", ActionKind::Where),
    ("whereNull", ActionKind::Where),
    ("whereRaw", ActionKind::WhereRaw),
    ("whereExists", ActionKind::WhereExists),
    ("groupBy", ActionKind::GroupBy),
    ("having", ActionKind::Having),
    ("havingRaw", ActionKind::HavingRaw),
    ("orderBy", ActionKind::OrderBy),
    ("orderByAsc", ActionKind::OrderBy),
    ("orderByDesc", ActionKind::OrderBy),
    ("orderByRaw", ActionKind::OrderByRaw),
    ("reorder", ActionKind::ClearOrders),
    ("clearOrders", ActionKind::ClearOrders),
    ("limit", ActionKind::Limit),
    ("take", ActionKind::Limit),
    ("offset", ActionKind::Offset),
    ("skip", ActionKind::Offset),
    ("forPage", ActionKind::ForPage),
    ("lock", ActionKind::Lock),
    ("lockForUpdate", ActionKind::Lock),
    ("sharedLock", ActionKind::Lock),
    ("noLock", ActionKind::Lock),
    ("union", ActionKind::Union),
    ("unionAll", ActionKind::Union),
    ("with", ActionKind::With),
    ("withRecursive", ActionKind::With),
];

/// Bases that get generated `and`/`or` variants.
pub(crate) const COMBINATOR_ELIGIBLE: &[&str] = &[
    "where",
    "whereColumn",
    "whereIn",
    "whereBetween",
    "whereLike",
    "whereNull",
    "whereRaw",
    "whereExists",
    "having",
    "havingRaw",
];

/// Bases that get generated `whereNot*` variants.
pub(crate) const NEGATABLE: &[&str] = &[
    "where",
    "whereIn",
    "whereBetween",
    "whereLike",
    "whereNull",
    "whereExists",
];

impl ActionKind {
    /// Actions whose first argument is a literal SQL fragment.
    pub fn is_raw(self) -> bool {
        matches!(
            self,
            Self::FromRaw | Self::SelectRaw | Self::JoinRaw | Self::WhereRaw | Self::HavingRaw | Self::OrderByRaw
        )
    }

    /// Actions whose first argument names a table.
    pub fn takes_table(self) -> bool {
        matches!(self, Self::From | Self::Join)
    }

    /// Actions that take a list of columns as a single argument.
    pub fn takes_column_list(self) -> bool {
        matches!(self, Self::Select | Self::GroupBy)
    }

    /// Actions built from a nested query definition.
    pub fn needs_subquery(self) -> bool {
        matches!(
            self,
            Self::FromSub | Self::SubSelect | Self::JoinSub | Self::WhereExists | Self::Union | Self::With
        )
    }

    /// Actions that accept legacy `clauses` grouping.
    pub fn accepts_clauses(self) -> bool {
        matches!(self, Self::Where | Self::Having)
    }

    /// Actions that put an explicit row cap on the query.
    pub fn sets_limit(self) -> bool {
        matches!(self, Self::Limit | Self::ForPage)
    }
}

/// Terminal actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Executor {
    Get,
    First,
    Find,
    Value,
    Values,
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Exists,
    Paginate,
    SimplePaginate,
    ToSql,
    Dump,
}

impl Executor {
    pub const ALL: [Executor; 15] = [
        Self::Get,
        Self::First,
        Self::Find,
        Self::Value,
        Self::Values,
        Self::Count,
        Self::Sum,
        Self::Avg,
        Self::Min,
        Self::Max,
        Self::Exists,
        Self::Paginate,
        Self::SimplePaginate,
        Self::ToSql,
        Self::Dump,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::First => "first",
            Self::Find => "find",
            Self::Value => "value",
            Self::Values => "values",
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::Exists => "exists",
            Self::Paginate => "paginate",
            Self::SimplePaginate => "simplePaginate",
            Self::ToSql => "toSQL",
            Self::Dump => "dump",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.name() == name)
    }

    /// Executors that return a row set.
    pub fn returns_rows(self) -> bool {
        matches!(self, Self::Get | Self::Values)
    }

    /// Executors that return a pagination envelope.
    pub fn is_paginated(self) -> bool {
        matches!(self, Self::Paginate | Self::SimplePaginate)
    }
}

impl fmt::Display for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_names_round_trip() {
        for executor in Executor::ALL {
            assert_eq!(Executor::from_name(executor.name()), Some(executor));
        }
        assert_eq!(Executor::from_name("toSql"), None);
    }

    #[test]
    fn test_whitelists_are_bases() {
        for name in COMBINATOR_ELIGIBLE.iter().chain(NEGATABLE) {
            assert!(BASE_ACTIONS.iter().any(|(base, _)| base == name), "{name}");
        }
    }
}
