//! `when` condition evaluator.
//!
//! Accepted forms:
//!
//! ```text
//! "hasValues" | "notEmpty" | "isEmpty" | "true" | "false" | true | false
//! {"notEmpty": true}            any array argument is non-empty
//! {"isEmpty": 2}                argument 2 (1-based) is empty
//! {"gt": [1, 10]}               argument 1 > 10
//! {"op": "gte", "index": 1, "value": 10}
//! {"param": "ids", "notEmpty": true}
//! {"param": "limit", "op": "lte", "value": 100}
//! {"and": [..]} | {"or": [..]} | {"not": {..}}
//! {"op": "and", "operands": [..]}
//! ```
//!
//! Anything unrecognized evaluates to true: a condition the evaluator cannot
//! read never blocks an action. Comparisons are the exception and fail
//! closed when their target is missing.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::value::{ParamMap, is_empty_value};

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Neq,
}

impl CompareOp {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            "eq" => Some(Self::Eq),
            "neq" => Some(Self::Neq),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Eq => "eq",
            Self::Neq => "neq",
        }
    }

    /// Apply to two values. Incomparable values only satisfy `neq`.
    pub fn apply(self, left: &Value, right: &Value) -> bool {
        let ordering = || compare_values(left, right);
        match self {
            Self::Eq => values_equal(left, right),
            Self::Neq => !values_equal(left, right),
            Self::Gt => ordering() == Some(Ordering::Greater),
            Self::Gte => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
            Self::Lt => ordering() == Some(Ordering::Less),
            Self::Lte => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
        }
    }
}

/// What a param-based condition checks.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamTest {
    HasValue,
    NotEmpty,
    IsEmpty,
    Compare(CompareOp, Value),
}

/// Parsed `when` condition.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionExpr {
    Literal(bool),
    /// `"hasValues"` / `"notEmpty"` shorthand.
    HasValues,
    /// `"isEmpty"` shorthand.
    IsEmpty,
    /// `{"notEmpty"|"isEmpty": true|index}`. `index: None` checks the first
    /// array argument.
    ArgEmptiness { index: Option<usize>, expect_empty: bool },
    /// Comparison against a 1-based argument. A `None` target means the
    /// condition was malformed and evaluates to false.
    ArgCompare { op: CompareOp, target: Option<(usize, Value)> },
    Param { name: String, test: ParamTest },
    And(Vec<ConditionExpr>),
    Or(Vec<ConditionExpr>),
    Not(Box<ConditionExpr>),
    Unknown,
}

impl ConditionExpr {
    /// Parse a condition. Never fails: unreadable input becomes `Unknown`.
    pub fn parse(value: &Value) -> Self {
        match value {
            Value::Bool(b) => Self::Literal(*b),
            Value::String(s) => match s.as_str() {
                "hasValues" | "notEmpty" => Self::HasValues,
                "isEmpty" => Self::IsEmpty,
                "true" => Self::Literal(true),
                "false" => Self::Literal(false),
                _ => Self::Unknown,
            },
            Value::Object(map) => parse_object(map),
            _ => Self::Unknown,
        }
    }

    pub fn evaluate(&self, args: &[Value], params: &ParamMap) -> bool {
        match self {
            Self::Literal(b) => *b,
            Self::HasValues => first_array(args).is_none_or(|items| !items.is_empty()),
            Self::IsEmpty => first_array(args).is_some_and(|items| items.is_empty()),
            Self::ArgEmptiness { index, expect_empty } => {
                let target = match index {
                    Some(i) => arg_at(args, *i),
                    None => args.iter().find(|a| a.is_array()),
                };
                match target {
                    Some(value) => is_empty_value(value) == *expect_empty,
                    // Nothing to inspect: apply unless emptiness was demanded.
                    None => !*expect_empty,
                }
            }
            Self::ArgCompare { op, target } => match target {
                Some((index, expected)) => arg_at(args, *index).is_some_and(|actual| op.apply(actual, expected)),
                None => false,
            },
            Self::Param { name, test } => match params.get(name) {
                None => matches!(test, ParamTest::IsEmpty),
                Some(value) => match test {
                    ParamTest::HasValue => !value.is_null(),
                    ParamTest::NotEmpty => !is_empty_value(value),
                    ParamTest::IsEmpty => is_empty_value(value),
                    ParamTest::Compare(op, expected) => op.apply(value, expected),
                },
            },
            Self::And(operands) => operands.iter().all(|c| c.evaluate(args, params)),
            Self::Or(operands) => operands.iter().any(|c| c.evaluate(args, params)),
            Self::Not(inner) => !inner.evaluate(args, params),
            Self::Unknown => true,
        }
    }
}

impl From<&Value> for ConditionExpr {
    fn from(value: &Value) -> Self {
        Self::parse(value)
    }
}

/// Parse and evaluate in one step.
pub fn evaluate(condition: &Value, args: &[Value], params: &ParamMap) -> bool {
    ConditionExpr::parse(condition).evaluate(args, params)
}

fn parse_object(map: &Map<String, Value>) -> ConditionExpr {
    if let Some(name) = map.get("param").and_then(Value::as_str) {
        return ConditionExpr::Param {
            name: name.to_string(),
            test: parse_param_test(map),
        };
    }

    if let Some(operands) = map.get("and").and_then(Value::as_array) {
        return ConditionExpr::And(operands.iter().map(ConditionExpr::parse).collect());
    }
    if let Some(operands) = map.get("or").and_then(Value::as_array) {
        return ConditionExpr::Or(operands.iter().map(ConditionExpr::parse).collect());
    }
    if let Some(inner) = map.get("not") {
        return ConditionExpr::Not(Box::new(ConditionExpr::parse(inner)));
    }

    if let Some(op) = map.get("op").and_then(Value::as_str) {
        return parse_op_form(op, map);
    }

    for (key, expect_empty) in [("notEmpty", false), ("isEmpty", true)] {
        if let Some(flag) = map.get(key) {
            return match flag {
                Value::Bool(true) => ConditionExpr::ArgEmptiness { index: None, expect_empty },
                Value::Bool(false) => ConditionExpr::Literal(true),
                other => match one_based(other) {
                    Some(index) => ConditionExpr::ArgEmptiness {
                        index: Some(index),
                        expect_empty,
                    },
                    None => ConditionExpr::Unknown,
                },
            };
        }
    }

    for (key, value) in map {
        if let Some(op) = CompareOp::from_name(key) {
            let target = match value {
                Value::Array(spec) if spec.len() >= 2 => one_based(&spec[0]).map(|i| (i, spec[1].clone())),
                _ => None,
            };
            return ConditionExpr::ArgCompare { op, target };
        }
    }

    ConditionExpr::Unknown
}

/// `{"op": ..., ...}` form: logical with `operands`, or a comparison with
/// `index` and `value`.
fn parse_op_form(op: &str, map: &Map<String, Value>) -> ConditionExpr {
    let operands = || {
        map.get("operands")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(ConditionExpr::parse).collect::<Vec<_>>())
    };
    match op {
        "and" => operands().map_or(ConditionExpr::Unknown, ConditionExpr::And),
        "or" => operands().map_or(ConditionExpr::Unknown, ConditionExpr::Or),
        "not" => match operands().and_then(|mut ops| ops.pop()) {
            Some(inner) => ConditionExpr::Not(Box::new(inner)),
            None => ConditionExpr::Unknown,
        },
        other => match CompareOp::from_name(other) {
            Some(op) => {
                let index = map.get("index").and_then(one_based);
                let value = map.get("value").cloned();
                ConditionExpr::ArgCompare {
                    op,
                    target: index.zip(value),
                }
            }
            None => ConditionExpr::Unknown,
        },
    }
}

fn parse_param_test(map: &Map<String, Value>) -> ParamTest {
    if let Some(op) = map.get("op").and_then(Value::as_str).and_then(CompareOp::from_name) {
        return ParamTest::Compare(op, map.get("value").cloned().unwrap_or(Value::Null));
    }
    for (key, value) in map {
        match key.as_str() {
            "hasValue" => return ParamTest::HasValue,
            "notEmpty" => return ParamTest::NotEmpty,
            "isEmpty" => return ParamTest::IsEmpty,
            other => {
                if let Some(op) = CompareOp::from_name(other) {
                    return ParamTest::Compare(op, value.clone());
                }
            }
        }
    }
    ParamTest::HasValue
}

fn one_based(value: &Value) -> Option<usize> {
    value.as_u64().filter(|i| *i >= 1).map(|i| i as usize)
}

fn arg_at(args: &[Value], index: usize) -> Option<&Value> {
    index.checked_sub(1).and_then(|i| args.get(i))
}

fn first_array(args: &[Value]) -> Option<&Vec<Value>> {
    args.iter().find_map(Value::as_array)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), _) | (_, Value::Number(_)) => match (as_number(left), as_number(right)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        _ => left == right,
    }
}

/// Native ordering: numbers numerically (numeric strings included), strings
/// lexically, booleans false < true.
fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => as_number(left)?.partial_cmp(&as_number(right)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(condition: Value, args: Value) -> bool {
        evaluate(&condition, args.as_array().unwrap(), &ParamMap::new())
    }

    #[test]
    fn test_shorthand() {
        assert!(eval(json!("hasValues"), json!(["id", [1, 2]])));
        assert!(!eval(json!("hasValues"), json!(["id", []])));
        assert!(eval(json!("notEmpty"), json!(["id", 5])));
        assert!(!eval(json!("isEmpty"), json!(["id", 5])));
        assert!(eval(json!("isEmpty"), json!(["id", []])));
        assert!(eval(json!(true), json!([])));
        assert!(!eval(json!("false"), json!([])));
    }

    #[test]
    fn test_unknown_defaults_to_apply() {
        assert!(eval(json!("sometimes"), json!([])));
        assert!(eval(json!({}), json!([])));
        assert!(eval(json!({"whatever": 1}), json!([])));
        assert!(eval(json!(42), json!([])));
    }

    #[test]
    fn test_indexed_emptiness() {
        assert!(eval(json!({"notEmpty": 2}), json!(["id", "x"])));
        assert!(!eval(json!({"notEmpty": 2}), json!(["id", ""])));
        assert!(eval(json!({"isEmpty": 2}), json!(["id", null])));
        assert!(eval(json!({"notEmpty": true}), json!(["id", [1]])));
        assert!(eval(json!({"notEmpty": false}), json!(["id", []])));
        // Missing target
        assert!(eval(json!({"notEmpty": 5}), json!(["id"])));
        assert!(!eval(json!({"isEmpty": 5}), json!(["id"])));
    }

    #[test]
    fn test_comparisons_fail_closed() {
        assert!(eval(json!({"gt": [2, 10]}), json!(["age", 18])));
        assert!(!eval(json!({"lt": [2, 10]}), json!(["age", 18])));
        assert!(eval(json!({"eq": [1, "age"]}), json!(["age", 18])));
        assert!(eval(json!({"neq": [2, 17]}), json!(["age", 18])));
        // Out of range, short spec, zero index
        assert!(!eval(json!({"gt": [3, 1]}), json!(["age", 18])));
        assert!(!eval(json!({"gt": [2]}), json!(["age", 18])));
        assert!(!eval(json!({"gt": [0, 1]}), json!(["age", 18])));
    }

    #[test]
    fn test_op_form() {
        assert!(eval(json!({"op": "gte", "index": 2, "value": 18}), json!(["age", 18])));
        assert!(!eval(json!({"op": "gte", "index": 2}), json!(["age", 18])));
        assert!(eval(
            json!({"op": "or", "operands": [false, {"op": "eq", "index": 1, "value": "age"}]}),
            json!(["age", 1])
        ));
        assert!(!eval(json!({"op": "not", "operands": [true]}), json!([])));
    }

    #[test]
    fn test_numeric_strings_compare_numerically() {
        assert!(eval(json!({"gt": [1, 9]}), json!(["10"])));
        assert!(eval(json!({"eq": [1, 10]}), json!(["10"])));
    }

    #[test]
    fn test_param_conditions() {
        let params = ParamMap::new()
            .with("ids", json!([1, 2]))
            .with("empty", json!([]))
            .with("nothing", Value::Null)
            .with("limit", json!(50));

        let check = |c: Value| evaluate(&c, &[], &params);

        assert!(check(json!({"param": "ids", "notEmpty": true})));
        assert!(check(json!({"param": "empty", "isEmpty": true})));
        assert!(check(json!({"param": "ids", "hasValue": true})));
        assert!(!check(json!({"param": "nothing", "hasValue": true})));
        assert!(check(json!({"param": "limit", "lte": 100})));
        assert!(check(json!({"param": "limit", "op": "gt", "value": 10})));

        // Absent param: false except isEmpty
        assert!(!check(json!({"param": "missing", "notEmpty": true})));
        assert!(!check(json!({"param": "missing", "hasValue": true})));
        assert!(!check(json!({"param": "missing", "gt": 0})));
        assert!(check(json!({"param": "missing", "isEmpty": true})));
    }

    #[test]
    fn test_logical() {
        let params = ParamMap::new().with("a", 1);
        let c = json!({"and": [{"param": "a", "eq": 1}, {"not": {"param": "b", "hasValue": true}}]});
        assert!(evaluate(&c, &[], &params));
        let c = json!({"or": [{"param": "b", "hasValue": true}, false]});
        assert!(!evaluate(&c, &[], &params));
        assert!(evaluate(&json!({"and": []}), &[], &params));
        assert!(!evaluate(&json!({"or": []}), &[], &params));
    }
}
