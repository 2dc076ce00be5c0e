//! In-memory query builder.
//!
//! Records every call as `method(arg,...)` and answers executors from a
//! fixed row set. Used by the CLI for dry runs and throughout the tests.
//!
//! ```text
//! from("users")
//! select(["id","name"])
//! whereIn("id",[1,2,3])
//! joinSub({from("orders")},"t","t.user_id","=","users.id")
//! get()
//! ```

use serde_json::{Map, Number, Value, json};

use super::{Arg, ExecutionOptions, JoinClause, JoinOn, NativeResultSet, QueryBuilder, QueryOutput, SubQuery};
use crate::action::Executor;
use crate::error::{QdefError, QdefResult};

/// Default page size for the pagination executors.
const DEFAULT_PAGE_SIZE: u64 = 25;

/// Recording, in-memory builder.
#[derive(Debug, Clone, Default)]
pub struct RecordingBuilder {
    calls: Vec<String>,
    rows: Vec<Value>,
    native: Option<NativeResultSet>,
    limit: Option<usize>,
    offset: usize,
    last_options: Option<ExecutionOptions>,
}

impl RecordingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows (JSON objects) the executors answer from.
    pub fn with_rows(mut self, rows: Vec<Value>) -> Self {
        self.rows = rows;
        self
    }

    /// Native set returned when native output is requested. Its rows also
    /// become the row set.
    pub fn with_native(mut self, native: NativeResultSet) -> Self {
        self.rows = native.to_rows();
        self.native = Some(native);
        self
    }

    /// Recorded calls, in order.
    pub fn calls(&self) -> &[String] {
        &self.calls
    }

    /// Calls joined with `.`.
    pub fn trace(&self) -> String {
        self.calls.join(".")
    }

    /// Options the last executor ran with.
    pub fn last_options(&self) -> Option<&ExecutionOptions> {
        self.last_options.as_ref()
    }

    fn record(&mut self, method: &str, args: &[Arg]) {
        let rendered: Vec<String> = args.iter().map(ToString::to_string).collect();
        self.calls.push(format!("{}({})", method, rendered.join(",")));
    }

    fn record_parts(&mut self, method: &str, parts: Vec<String>) {
        self.calls.push(format!("{}({})", method, parts.join(",")));
    }

    /// Run a continuation on a fresh builder and render its trace as `{...}`.
    fn nested(sub: SubQuery<'_>) -> QdefResult<String> {
        let mut builder = RecordingBuilder::new();
        sub(&mut builder)?;
        Ok(format!("{{{}}}", builder.trace()))
    }

    fn nested_on(on: Option<JoinOn<'_>>) -> QdefResult<Vec<String>> {
        let Some(on) = on else {
            return Ok(Vec::new());
        };
        let mut clauses = RecordedJoin::default();
        on(&mut clauses)?;
        Ok(clauses.calls)
    }

    fn visible_rows(&self) -> Vec<&Value> {
        let rows = self.rows.iter().skip(self.offset);
        match self.limit {
            Some(limit) => rows.take(limit).collect(),
            None => rows.collect(),
        }
    }

    fn column_values(&self, column: &str) -> Vec<&Value> {
        self.visible_rows()
            .into_iter()
            .filter_map(|row| row.get(column))
            .collect()
    }

    fn paginate(&self, args: &[Arg], simple: bool) -> QdefResult<Value> {
        let page = arg_u64(args, 0)?.unwrap_or(1).max(1);
        let max_rows = arg_u64(args, 1)?.unwrap_or(DEFAULT_PAGE_SIZE).max(1);
        let total = self.rows.len() as u64;
        let results: Vec<Value> = self
            .rows
            .iter()
            .skip(page_offset(page, max_rows))
            .take(to_usize(max_rows))
            .cloned()
            .collect();

        let pagination = if simple {
            json!({"page": page, "maxRows": max_rows})
        } else {
            json!({
                "page": page,
                "maxRows": max_rows,
                "totalRecords": total,
                "totalPages": total.div_ceil(max_rows),
            })
        };
        Ok(json!({"results": results, "pagination": pagination}))
    }
}

impl QueryBuilder for RecordingBuilder {
    fn from(&mut self, method: &str, table: &str) -> QdefResult<()> {
        self.record_parts(method, vec![Value::from(table).to_string()]);
        Ok(())
    }

    fn from_raw(&mut self, method: &str, args: Vec<Arg>) -> QdefResult<()> {
        self.record(method, &args);
        Ok(())
    }

    fn from_sub(&mut self, method: &str, alias: &str, sub: SubQuery<'_>) -> QdefResult<()> {
        let nested = Self::nested(sub)?;
        self.record_parts(method, vec![nested, Value::from(alias).to_string()]);
        Ok(())
    }

    fn select(&mut self, method: &str, args: Vec<Arg>) -> QdefResult<()> {
        self.record(method, &args);
        Ok(())
    }

    fn sub_select(&mut self, method: &str, alias: &str, sub: SubQuery<'_>) -> QdefResult<()> {
        let nested = Self::nested(sub)?;
        self.record_parts(method, vec![nested, Value::from(alias).to_string()]);
        Ok(())
    }

    fn join(&mut self, method: &str, args: Vec<Arg>, on: Option<JoinOn<'_>>) -> QdefResult<()> {
        let mut parts: Vec<String> = args.iter().map(ToString::to_string).collect();
        let clauses = Self::nested_on(on)?;
        if !clauses.is_empty() {
            parts.push(format!("{{{}}}", clauses.join(".")));
        }
        self.record_parts(method, parts);
        Ok(())
    }

    fn join_sub(
        &mut self,
        method: &str,
        alias: &str,
        sub: SubQuery<'_>,
        args: Vec<Arg>,
        on: Option<JoinOn<'_>>,
    ) -> QdefResult<()> {
        let mut parts = vec![Self::nested(sub)?, Value::from(alias).to_string()];
        parts.extend(args.iter().map(ToString::to_string));
        let clauses = Self::nested_on(on)?;
        if !clauses.is_empty() {
            parts.push(format!("{{{}}}", clauses.join(".")));
        }
        self.record_parts(method, parts);
        Ok(())
    }

    fn where_clause(&mut self, method: &str, args: Vec<Arg>) -> QdefResult<()> {
        self.record(method, &args);
        Ok(())
    }

    fn where_nested(&mut self, method: &str, group: SubQuery<'_>) -> QdefResult<()> {
        let nested = Self::nested(group)?;
        self.record_parts(method, vec![nested]);
        Ok(())
    }

    fn where_sub(&mut self, method: &str, args: Vec<Arg>, sub: SubQuery<'_>) -> QdefResult<()> {
        let mut parts: Vec<String> = args.iter().map(ToString::to_string).collect();
        parts.push(Self::nested(sub)?);
        self.record_parts(method, parts);
        Ok(())
    }

    fn where_exists(&mut self, method: &str, sub: SubQuery<'_>) -> QdefResult<()> {
        let nested = Self::nested(sub)?;
        self.record_parts(method, vec![nested]);
        Ok(())
    }

    fn group_by(&mut self, method: &str, args: Vec<Arg>) -> QdefResult<()> {
        self.record(method, &args);
        Ok(())
    }

    fn having(&mut self, method: &str, args: Vec<Arg>) -> QdefResult<()> {
        self.record(method, &args);
        Ok(())
    }

    fn order_by(&mut self, method: &str, args: Vec<Arg>) -> QdefResult<()> {
        self.record(method, &args);
        Ok(())
    }

    fn clear_orders(&mut self, method: &str) -> QdefResult<()> {
        self.record(method, &[]);
        Ok(())
    }

    fn limit(&mut self, method: &str, args: Vec<Arg>) -> QdefResult<()> {
        match method {
            "limit" | "take" => {
                self.limit = arg_u64(&args, 0)?.map(to_usize);
            }
            "offset" | "skip" => {
                self.offset = to_usize(arg_u64(&args, 0)?.unwrap_or(0));
            }
            "forPage" => {
                let page = arg_u64(&args, 0)?.unwrap_or(1).max(1);
                let size = arg_u64(&args, 1)?.unwrap_or(DEFAULT_PAGE_SIZE);
                self.offset = page_offset(page, size);
                self.limit = Some(to_usize(size));
            }
            _ => {}
        }
        self.record(method, &args);
        Ok(())
    }

    fn lock(&mut self, method: &str, args: Vec<Arg>) -> QdefResult<()> {
        self.record(method, &args);
        Ok(())
    }

    fn union(&mut self, method: &str, sub: SubQuery<'_>) -> QdefResult<()> {
        let nested = Self::nested(sub)?;
        self.record_parts(method, vec![nested]);
        Ok(())
    }

    fn with(&mut self, method: &str, name: &str, sub: SubQuery<'_>) -> QdefResult<()> {
        let nested = Self::nested(sub)?;
        self.record_parts(method, vec![Value::from(name).to_string(), nested]);
        Ok(())
    }

    fn execute(&mut self, executor: Executor, args: Vec<Arg>, options: &ExecutionOptions) -> QdefResult<QueryOutput> {
        self.record(executor.name(), &args);
        self.last_options = Some(options.clone());

        let output = match executor {
            Executor::Get => {
                if options.native {
                    if let Some(native) = &self.native {
                        return Ok(QueryOutput::Native(native.clone()));
                    }
                }
                Value::Array(self.visible_rows().into_iter().cloned().collect())
            }
            Executor::First => self.visible_rows().first().map(|r| (*r).clone()).unwrap_or(Value::Null),
            Executor::Find => {
                let id = args.first().and_then(Arg::as_value).cloned().unwrap_or(Value::Null);
                let column = args.get(1).and_then(Arg::as_str).unwrap_or("id");
                self.rows
                    .iter()
                    .find(|row| row.get(column) == Some(&id))
                    .cloned()
                    .unwrap_or(Value::Null)
            }
            Executor::Value => {
                let column = required_column(&args, executor)?;
                self.visible_rows()
                    .first()
                    .and_then(|row| row.get(column))
                    .cloned()
                    .unwrap_or(Value::Null)
            }
            Executor::Values => {
                let column = required_column(&args, executor)?;
                match args.get(1).and_then(Arg::as_str) {
                    Some(key) => {
                        let map: Map<String, Value> = self
                            .visible_rows()
                            .into_iter()
                            .filter_map(|row| {
                                let k = row.get(key).and_then(crate::value::scalar_text)?;
                                Some((k, row.get(column).cloned().unwrap_or(Value::Null)))
                            })
                            .collect();
                        Value::Object(map)
                    }
                    None => Value::Array(self.column_values(column).into_iter().cloned().collect()),
                }
            }
            Executor::Count => Value::from(self.visible_rows().len()),
            Executor::Exists => Value::Bool(!self.visible_rows().is_empty()),
            Executor::Sum | Executor::Min | Executor::Max => {
                let column = required_column(&args, executor)?;
                aggregate(executor, &self.column_values(column))
            }
            // The engine rewrites avg into selectRaw + value before it gets here.
            Executor::Avg => Value::Null,
            Executor::Paginate => self.paginate(&args, false)?,
            Executor::SimplePaginate => self.paginate(&args, true)?,
            Executor::ToSql | Executor::Dump => {
                let mut calls = self.calls.clone();
                calls.pop();
                Value::String(calls.join("."))
            }
        };
        Ok(QueryOutput::Value(output))
    }
}

/// Join clauses recorded as `on("a","=","b")`.
#[derive(Debug, Default)]
struct RecordedJoin {
    calls: Vec<String>,
}

impl JoinClause for RecordedJoin {
    fn on(&mut self, method: &str, args: Vec<Arg>) -> QdefResult<()> {
        let rendered: Vec<String> = args.iter().map(ToString::to_string).collect();
        self.calls.push(format!("{}({})", method, rendered.join(",")));
        Ok(())
    }
}

fn to_usize(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

/// Rows skipped before a 1-based page, clamped instead of overflowing.
fn page_offset(page: u64, size: u64) -> usize {
    to_usize(page.saturating_sub(1).saturating_mul(size))
}

fn arg_u64(args: &[Arg], index: usize) -> QdefResult<Option<u64>> {
    match args.get(index).and_then(Arg::as_value) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| QdefError::Builder(format!("expected a non-negative integer, got {}", n))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| QdefError::Builder(format!("expected a non-negative integer, got '{}'", s))),
        Some(other) => Err(QdefError::Builder(format!("expected a non-negative integer, got {}", other))),
    }
}

fn required_column(args: &[Arg], executor: Executor) -> QdefResult<&str> {
    args.first()
        .and_then(Arg::as_str)
        .ok_or_else(|| QdefError::Builder(format!("{} requires a column name", executor)))
}

fn aggregate(executor: Executor, values: &[&Value]) -> Value {
    let numbers: Vec<&Number> = values.iter().filter_map(|v| v.as_number()).collect();
    if numbers.is_empty() {
        return match executor {
            Executor::Sum => Value::from(0),
            _ => Value::Null,
        };
    }

    let all_integers = numbers.iter().all(|n| n.is_i64());
    match executor {
        Executor::Sum if all_integers => Value::from(numbers.iter().filter_map(|n| n.as_i64()).sum::<i64>()),
        Executor::Sum => float_value(numbers.iter().filter_map(|n| n.as_f64()).sum()),
        _ => {
            let pick_max = executor == Executor::Max;
            numbers
                .iter()
                .copied()
                .reduce(|best, n| {
                    let (a, b) = (best.as_f64().unwrap_or(0.0), n.as_f64().unwrap_or(0.0));
                    if (pick_max && b > a) || (!pick_max && b < a) { n } else { best }
                })
                .map(|n| Value::Number(n.clone()))
                .unwrap_or(Value::Null)
        }
    }
}

fn float_value(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::NativeColumn;
    use pretty_assertions::assert_eq;

    fn users() -> Vec<Value> {
        vec![
            json!({"id": 1, "name": "ada", "score": 10}),
            json!({"id": 2, "name": "brian", "score": 7}),
            json!({"id": 3, "name": "cleo", "score": 12}),
        ]
    }

    fn run(builder: &mut RecordingBuilder, executor: Executor, args: Vec<Value>) -> Value {
        builder
            .execute(executor, args.into_iter().map(Arg::Value).collect(), &ExecutionOptions::default())
            .unwrap()
            .into_value()
    }

    #[test]
    fn test_records_calls() {
        let mut b = RecordingBuilder::new();
        b.from("from", "users").unwrap();
        b.where_clause("orWhereNotIn", vec![Arg::Value(json!("id")), Arg::Value(json!([1, 2]))])
            .unwrap();
        b.where_exists("whereExists", &mut |sub: &mut dyn QueryBuilder| {
            sub.from("from", "orders")?;
            sub.where_clause("whereColumn", vec![Arg::Value(json!("orders.user_id")), Arg::Value(json!("users.id"))])
        })
        .unwrap();
        assert_eq!(
            b.calls(),
            &[
                r#"from("users")"#.to_string(),
                r#"orWhereNotIn("id",[1,2])"#.to_string(),
                r#"whereExists({from("orders").whereColumn("orders.user_id","users.id")})"#.to_string(),
            ]
        );
    }

    #[test]
    fn test_join_with_on_clauses() {
        let mut b = RecordingBuilder::new();
        b.join(
            "leftJoin",
            vec![Arg::Value(json!("orders o"))],
            Some(&mut |j: &mut dyn JoinClause| {
                j.on("on", vec![Arg::Value(json!("o.user_id")), Arg::Value(json!("=")), Arg::Value(json!("users.id"))])?;
                j.on("orOn", vec![Arg::Value(json!("o.alt_id")), Arg::Value(json!("users.id"))])
            }),
        )
        .unwrap();
        assert_eq!(
            b.trace(),
            r#"leftJoin("orders o",{on("o.user_id","=","users.id").orOn("o.alt_id","users.id")})"#
        );
    }

    #[test]
    fn test_executors() {
        let mut b = RecordingBuilder::new().with_rows(users());
        assert_eq!(run(&mut b, Executor::Count, vec![]), json!(3));
        assert_eq!(run(&mut b, Executor::Value, vec![json!("name")]), json!("ada"));
        assert_eq!(run(&mut b, Executor::Values, vec![json!("name")]), json!(["ada", "brian", "cleo"]));
        assert_eq!(
            run(&mut b, Executor::Values, vec![json!("name"), json!("id")]),
            json!({"1": "ada", "2": "brian", "3": "cleo"})
        );
        assert_eq!(run(&mut b, Executor::Find, vec![json!(2)])["name"], json!("brian"));
        assert_eq!(run(&mut b, Executor::Sum, vec![json!("score")]), json!(29));
        assert_eq!(run(&mut b, Executor::Max, vec![json!("score")]), json!(12));
        assert_eq!(run(&mut b, Executor::Min, vec![json!("score")]), json!(7));
        assert_eq!(run(&mut b, Executor::Exists, vec![]), json!(true));
    }

    #[test]
    fn test_limit_and_offset_shape_rows() {
        let mut b = RecordingBuilder::new().with_rows(users());
        b.limit("forPage", vec![Arg::Value(json!(2)), Arg::Value(json!(2))]).unwrap();
        assert_eq!(run(&mut b, Executor::Get, vec![]), json!([users()[2]]));
    }

    #[test]
    fn test_count_and_exists_honor_limit() {
        let mut b = RecordingBuilder::new().with_rows(users());
        b.limit("take", vec![Arg::Value(json!(2))]).unwrap();
        assert_eq!(run(&mut b, Executor::Count, vec![]), json!(2));

        let mut b = RecordingBuilder::new().with_rows(users());
        b.limit("offset", vec![Arg::Value(json!(3))]).unwrap();
        assert_eq!(run(&mut b, Executor::Count, vec![]), json!(0));
        assert_eq!(run(&mut b, Executor::Exists, vec![]), json!(false));
    }

    #[test]
    fn test_huge_page_numbers_clamp() {
        let mut b = RecordingBuilder::new().with_rows(users());
        b.limit("forPage", vec![Arg::Value(json!(i64::MAX)), Arg::Value(json!(10))])
            .unwrap();
        assert_eq!(run(&mut b, Executor::Get, vec![]), json!([]));

        let mut b = RecordingBuilder::new().with_rows(users());
        let page = run(&mut b, Executor::Paginate, vec![json!(i64::MAX), json!(10)]);
        assert_eq!(page["results"], json!([]));
        assert_eq!(page["pagination"]["totalRecords"], json!(3));
    }

    #[test]
    fn test_paginate_envelope() {
        let mut b = RecordingBuilder::new().with_rows(users());
        let page = run(&mut b, Executor::Paginate, vec![json!(2), json!(2)]);
        assert_eq!(page["results"], json!([users()[2]]));
        assert_eq!(
            page["pagination"],
            json!({"page": 2, "maxRows": 2, "totalRecords": 3, "totalPages": 2})
        );
    }

    #[test]
    fn test_native_only_when_requested() {
        let native = NativeResultSet {
            columns: vec![NativeColumn { name: "id".into(), type_name: "INT4".into() }],
            rows: vec![vec![json!(1)]],
        };
        let mut b = RecordingBuilder::new().with_native(native.clone());
        let options = ExecutionOptions { native: true, ..Default::default() };
        assert_eq!(b.execute(Executor::Get, vec![], &options).unwrap(), QueryOutput::Native(native));
        assert_eq!(run(&mut b, Executor::Get, vec![]), json!([{"id": 1}]));
    }

    #[test]
    fn test_to_sql_returns_trace() {
        let mut b = RecordingBuilder::new();
        b.from("table", "users").unwrap();
        b.limit("take", vec![Arg::Value(json!(5))]).unwrap();
        assert_eq!(run(&mut b, Executor::ToSql, vec![]), json!(r#"table("users").take(5)"#));
    }
}
