//! End-to-end runs of query definitions against the recording builder.

use pretty_assertions::assert_eq;
use qdef::prelude::*;
use serde_json::{Value, json};

fn engine() -> QdefEngine {
    QdefEngine::new(QdefConfig::default()).unwrap()
}

fn users() -> Vec<Value> {
    vec![
        json!({"id": 1, "name": "ada", "role": "admin", "score": 9.5}),
        json!({"id": 2, "name": "brian", "role": "user", "score": 7}),
        json!({"id": 3, "name": "cleo", "role": "user", "score": null}),
    ]
}

#[test]
fn test_simple_select_trace() {
    let definition = json!([
        {"from": "users"},
        {"select": ["id", "name"]},
        {"where": ["status", "active"]},
        {"whereIn": ["id", {"$param": "ids"}], "when": "hasValues"},
        {"get": true}
    ]);
    let mut builder = RecordingBuilder::new();
    let options = ExecuteOptions::with_params(ParamMap::new().with("ids", json!([1, 2, 3])));
    engine().execute(&mut builder, &definition, &options).unwrap();

    assert_eq!(
        builder.calls(),
        &[
            r#"from("users")"#,
            r#"select(["id","name"])"#,
            r#"where("status","active")"#,
            r#"whereIn("id",[1,2,3])"#,
            "get()",
        ]
    );
}

#[test]
fn test_missing_param_skips_gated_action() {
    let definition = json!([
        {"from": "users"},
        {"where": ["role", {"$param": "role"}], "when": {"param": "role", "hasValue": true}},
        {"orderBy": ["name", "asc"]}
    ]);
    let mut builder = RecordingBuilder::new();
    engine().build(&mut builder, &definition, &ParamMap::new()).unwrap();
    assert_eq!(builder.calls(), &[r#"from("users")"#, r#"orderBy("name","asc")"#]);
}

#[test]
fn test_named_arguments_and_templates() {
    let definition = json!([
        {"from": "users"},
        {"where": {"column": "name", "operator": "like", "value": "$prefix$%"}},
        {"limit": {"value": {"$param": "n"}}}
    ]);
    let params = ParamMap::new().with("prefix", "ad").with("n", 10);
    let mut builder = RecordingBuilder::new();
    engine().build(&mut builder, &definition, &params).unwrap();
    assert_eq!(
        builder.calls(),
        &[r#"from("users")"#, r#"where("name","like","ad%")"#, "limit(10)"]
    );
}

#[test]
fn test_raw_marker_inside_select() {
    let definition = json!([
        {"from": "orders"},
        {"select": ["id", {"$raw": {"sql": "total * ? AS taxed", "bindings": [1.2]}}]}
    ]);
    let mut builder = RecordingBuilder::new();
    engine().build(&mut builder, &definition, &ParamMap::new()).unwrap();
    assert_eq!(
        builder.calls(),
        &[r#"from("orders")"#, r#"select(["id",raw("total * ? AS taxed",[1.2])])"#]
    );
}

#[test]
fn test_cte_and_subqueries() {
    let definition = json!([
        {"from": "top_users"},
        {"whereExists": true, "query": [{"from": "orders"}, {"whereColumn": ["orders.user_id", "top_users.id"]}]},
        {"with": "top_users", "query": [{"from": "users"}, {"where": ["score", ">", 8]}]},
        {"union": true, "query": [{"from": "archived_users"}]}
    ]);
    let mut builder = RecordingBuilder::new();
    engine().build(&mut builder, &definition, &ParamMap::new()).unwrap();
    assert_eq!(
        builder.calls(),
        &[
            r#"with("top_users",{from("users").where("score",">",8)})"#,
            r#"from("top_users")"#,
            r#"whereExists({from("orders").whereColumn("orders.user_id","top_users.id")})"#,
            r#"union({from("archived_users")})"#,
        ]
    );
}

#[test]
fn test_tabular_result() {
    let mut builder = RecordingBuilder::new().with_rows(users());
    let result = engine()
        .execute(
            &mut builder,
            &json!([{"from": "users"}, {"get": true, "returnFormat": "tabular"}]),
            &ExecuteOptions::default(),
        )
        .unwrap();
    assert_eq!(
        result["columns"],
        json!([
            {"name": "id", "type": "integer"},
            {"name": "name", "type": "varchar"},
            {"name": "role", "type": "varchar"},
            {"name": "score", "type": "decimal"}
        ])
    );
    assert_eq!(result["rows"][2], json!([3, "cleo", "user", null]));
}

#[test]
fn test_return_format_priority() {
    let config = QdefConfig::builder().return_format(ReturnFormat::Tabular).build();
    let engine = QdefEngine::new(config).unwrap();
    let definition = json!([{"from": "users"}, {"get": true, "returnFormat": "array"}]);

    // Caller beats the definition.
    let mut builder = RecordingBuilder::new().with_rows(users());
    let options = ExecuteOptions::default().return_format(ReturnFormat::Tabular);
    let result = engine.execute(&mut builder, &definition, &options).unwrap();
    assert!(result.get("columns").is_some());

    // Definition beats the config default.
    let mut builder = RecordingBuilder::new().with_rows(users());
    let result = engine.execute(&mut builder, &definition, &ExecuteOptions::default()).unwrap();
    assert_eq!(result, Value::Array(users()));

    // Config default applies when nothing else is declared.
    let mut builder = RecordingBuilder::new().with_rows(users());
    let result = engine
        .execute(&mut builder, &json!([{"from": "users"}]), &ExecuteOptions::default())
        .unwrap();
    assert!(result.get("rows").is_some());
}

#[test]
fn test_native_result_set() {
    let native = NativeResultSet {
        columns: vec![
            NativeColumn {
                name: "id".into(),
                type_name: "BIGINT".into(),
            },
            NativeColumn {
                name: "created_at".into(),
                type_name: "TIMESTAMP".into(),
            },
        ],
        rows: vec![vec![json!(1), json!("2024-01-01 10:00:00")]],
    };
    let mut builder = RecordingBuilder::new().with_native(native);
    let options = ExecuteOptions::default().return_format(ReturnFormat::Query);
    let result = engine()
        .execute(&mut builder, &json!([{"from": "users"}]), &options)
        .unwrap();
    assert!(builder.last_options().unwrap().native);
    assert_eq!(
        result,
        json!({
            "columns": [{"name": "id", "type": "bigint"}, {"name": "created_at", "type": "datetime"}],
            "rows": [[1, "2024-01-01 10:00:00"]]
        })
    );
}

#[test]
fn test_struct_format() {
    let mut builder = RecordingBuilder::new().with_rows(users());
    let options = ExecuteOptions::default().return_format(ReturnFormat::Struct {
        column_key: "name".into(),
        value_keys: vec!["role".into()],
    });
    let result = engine()
        .execute(&mut builder, &json!([{"from": "users"}]), &options)
        .unwrap();
    assert_eq!(result, json!({"ada": "admin", "brian": "user", "cleo": "user"}));

    let mut builder = RecordingBuilder::new().with_rows(users());
    let options = ExecuteOptions::default().return_format(ReturnFormat::Struct {
        column_key: "email".into(),
        value_keys: vec![],
    });
    let err = engine()
        .execute(&mut builder, &json!([{"from": "users"}]), &options)
        .unwrap_err();
    assert!(matches!(err, QdefError::InvalidColumnKey(_)));
}

#[test]
fn test_paginate_shapes_results_only() {
    let mut builder = RecordingBuilder::new().with_rows(users());
    let result = engine()
        .execute(
            &mut builder,
            &json!([{"from": "users"}, {"paginate": {"page": 1, "maxRows": 2}, "returnFormat": ["struct", "id", "name"]}]),
            &ExecuteOptions::default(),
        )
        .unwrap();
    assert_eq!(
        result,
        json!({
            "results": {"1": "ada", "2": "brian"},
            "pagination": {"page": 1, "maxRows": 2, "totalRecords": 3, "totalPages": 2}
        })
    );
}

#[test]
fn test_max_rows_pads_pagination() {
    let engine = QdefEngine::new(QdefConfig::builder().max_rows(2).build()).unwrap();
    let mut builder = RecordingBuilder::new().with_rows(users());
    let result = engine
        .execute(&mut builder, &json!([{"from": "users"}, {"simplePaginate": true}]), &ExecuteOptions::default())
        .unwrap();
    assert_eq!(builder.calls(), &[r#"from("users")"#, "simplePaginate(1,2)"]);
    assert_eq!(result["pagination"], json!({"page": 1, "maxRows": 2}));
}

#[test]
fn test_page_past_the_end_is_empty() {
    let huge = 9_223_372_036_854_775_807_i64;
    let mut builder = RecordingBuilder::new().with_rows(users());
    let result = engine()
        .execute(
            &mut builder,
            &json!([{"from": "users"}, {"forPage": [huge, 10]}, {"get": true}]),
            &ExecuteOptions::default(),
        )
        .unwrap();
    assert_eq!(result, json!([]));

    let mut builder = RecordingBuilder::new().with_rows(users());
    let result = engine()
        .execute(
            &mut builder,
            &json!([{"from": "users"}, {"paginate": {"page": huge, "maxRows": 10}}]),
            &ExecuteOptions::default(),
        )
        .unwrap();
    assert_eq!(result["results"], json!([]));
    assert_eq!(result["pagination"]["totalRecords"], json!(3));
}

#[test]
fn test_scalar_executors_pass_through() {
    let cases = [
        (json!({"count": true}), json!(3)),
        (json!({"exists": true}), json!(true)),
        (json!({"value": "name"}), json!("ada")),
        (json!({"values": ["name", "id"]}), json!({"1": "ada", "2": "brian", "3": "cleo"})),
        (json!({"find": 2}), json!({"id": 2, "name": "brian", "role": "user", "score": 7})),
        (json!({"max": "id"}), json!(3)),
    ];
    for (executor, expected) in cases {
        let mut builder = RecordingBuilder::new().with_rows(users());
        let options = ExecuteOptions::default().return_format(ReturnFormat::Tabular);
        let result = engine()
            .execute(&mut builder, &json!([{"from": "users"}, executor]), &options)
            .unwrap();
        assert_eq!(result, expected);
    }
}

#[test]
fn test_avg_executor() {
    let mut builder = RecordingBuilder::new().with_rows(vec![json!({"aggregate": 8.25})]);
    let result = engine()
        .execute(
            &mut builder,
            &json!([{"from": "users"}, {"avg": {"column": "score", "default": 0}}]),
            &ExecuteOptions::default(),
        )
        .unwrap();
    assert_eq!(result, json!(8.25));
    assert_eq!(
        builder.calls(),
        &[
            r#"from("users")"#,
            r#"selectRaw(raw("COALESCE(AVG(score), 0) AS aggregate"))"#,
            r#"value("aggregate")"#,
        ]
    );
}

#[test]
fn test_to_sql_returns_trace() {
    let mut builder = RecordingBuilder::new();
    let result = engine()
        .execute(
            &mut builder,
            &json!([{"from": "users"}, {"orWhereNotIn": ["id", [4, 5]]}, {"toSQL": true}]),
            &ExecuteOptions::default(),
        )
        .unwrap();
    assert_eq!(result, json!(r#"from("users").orWhereNotIn("id",[4,5])"#));
}

#[test]
fn test_extra_executors_are_ignored() {
    let mut builder = RecordingBuilder::new().with_rows(users());
    let result = engine()
        .execute(
            &mut builder,
            &json!([{"from": "users"}, {"count": true}, {"exists": true}]),
            &ExecuteOptions::default(),
        )
        .unwrap();
    assert_eq!(result, json!(3));
    assert_eq!(builder.calls(), &[r#"from("users")"#, "count()"]);
}
