//! Tests for the in-memory columnar store.

use super::*;
use crate::query::{DiscoverQuery, QueryLimits};
use crate::Timestamp;
use serde_json::json;

fn now() -> Timestamp {
    Timestamp::parse_lenient("2018-05-10T00:00:00").unwrap()
}

fn event(id: &str, project: u64, datetime: &str, message: &str, data: serde_json::Value) -> EventPayload {
    serde_json::from_value(json!({
        "event_id": id,
        "primary_hash": "0cc175b9c0f1b6a831c399e269772661",
        "project_id": project,
        "message": message,
        "platform": "python",
        "datetime": datetime,
        "data": data,
    }))
    .unwrap()
}

fn exception(types: &[&str]) -> serde_json::Value {
    json!({
        "exception": {"values": types.iter().map(|t| json!({
            "type": t,
            "stacktrace": {"frames": [{"function": "handler", "in_app": true}]}
        })).collect::<Vec<_>>()}
    })
}

async fn seeded_store() -> MemoryEventStore {
    let store = MemoryEventStore::new();
    store
        .insert(vec![
            event(
                "00000000000000000000000000000001",
                1,
                "2018-05-09T23:00:00",
                "first",
                exception(&["ValidationError"]),
            ),
            event(
                "00000000000000000000000000000002",
                1,
                "2018-05-09T22:00:00",
                "second",
                exception(&["KeyError", "ValidationError"]),
            ),
            event(
                "00000000000000000000000000000003",
                1,
                "2018-05-09T21:00:00",
                "third",
                json!({"user": {"id": "u1"}}),
            ),
            event(
                "00000000000000000000000000000004",
                2,
                "2018-05-09T23:30:00",
                "other project",
                json!({}),
            ),
            event(
                "00000000000000000000000000000005",
                1,
                "2018-04-01T00:00:00",
                "too old",
                json!({}),
            ),
        ])
        .await
        .unwrap();
    store
}

async fn run(store: &MemoryEventStore, body: serde_json::Value) -> QueryResult {
    let query: DiscoverQuery = serde_json::from_value(body).unwrap();
    let plan = query.translate(now(), &QueryLimits::default()).unwrap();
    store.query(&plan).await.unwrap()
}

fn column(result: &QueryResult, name: &str) -> Vec<serde_json::Value> {
    result.data.iter().map(|row| row[name].clone()).collect()
}

#[test]
fn test_insert_counts_events() {
    let store = tokio_test::block_on(seeded_store());
    assert_eq!(tokio_test::block_on(store.event_count()).unwrap(), 5);
}

#[tokio::test]
async fn test_insert_rejects_whole_batch() {
    let store = MemoryEventStore::new();
    let mut bad = event("00000000000000000000000000000009", 1, "2018-05-09T00:00:00", "bad", json!({}));
    bad.datetime = "yesterday".to_string();

    let result = store
        .insert(vec![
            event("00000000000000000000000000000008", 1, "2018-05-09T00:00:00", "good", json!({})),
            bad,
        ])
        .await;

    assert!(matches!(result, Err(StoreError::InvalidEvent(_))));
    assert_eq!(store.event_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_filters_by_project_and_window() {
    let store = seeded_store().await;

    let result = run(
        &store,
        json!({"projects": [1], "fields": ["message"], "range": "1d", "orderby": "-timestamp"}),
    )
    .await;

    assert_eq!(column(&result, "message"), vec![json!("first"), json!("second"), json!("third")]);
    assert_eq!(
        result.meta,
        vec![ColumnMeta {
            name: "message".to_string(),
            type_name: "String".to_string()
        }]
    );
}

#[tokio::test]
async fn test_window_end_is_exclusive() {
    let store = seeded_store().await;

    let result = run(
        &store,
        json!({
            "projects": [1],
            "fields": ["message"],
            "start": "2018-05-09T22:00:00",
            "end": "2018-05-09T23:00:00"
        }),
    )
    .await;

    assert_eq!(column(&result, "message"), vec![json!("second")]);
}

#[tokio::test]
async fn test_rows_contain_only_requested_fields() {
    let store = seeded_store().await;

    let result = run(
        &store,
        json!({"projects": [1], "fields": ["message", "platform"], "range": "1d", "limit": 1, "orderby": "timestamp"}),
    )
    .await;

    assert_eq!(result.data.len(), 1);
    let row = &result.data[0];
    assert_eq!(row.len(), 2);
    assert_eq!(row["message"], json!("third"));
    assert_eq!(row["platform"], json!("python"));
}

#[tokio::test]
async fn test_array_condition_any_and_all() {
    let store = seeded_store().await;

    let equal = run(
        &store,
        json!({
            "projects": [1],
            "fields": ["message"],
            "conditions": [["exception_stacks.type", "=", "KeyError"]],
            "range": "1d"
        }),
    )
    .await;
    let not_equal = run(
        &store,
        json!({
            "projects": [1],
            "fields": ["message"],
            "conditions": [["exception_stacks.type", "!=", "KeyError"]],
            "range": "1d",
            "orderby": "-timestamp"
        }),
    )
    .await;

    assert_eq!(column(&equal, "message"), vec![json!("second")]);
    assert_eq!(column(&not_equal, "message"), vec![json!("first"), json!("third")]);
}

#[tokio::test]
async fn test_array_join_yields_row_per_element() {
    let store = seeded_store().await;

    let result = run(
        &store,
        json!({
            "projects": [1],
            "fields": ["message", "exception_stacks.type"],
            "range": "1d",
            "orderby": "-timestamp"
        }),
    )
    .await;

    assert_eq!(
        column(&result, "exception_stacks.type"),
        vec![json!("ValidationError"), json!("KeyError"), json!("ValidationError")]
    );
    assert_eq!(
        column(&result, "message"),
        vec![json!("first"), json!("second"), json!("second")]
    );
}

#[tokio::test]
async fn test_joined_condition_filters_elements() {
    let store = seeded_store().await;

    let result = run(
        &store,
        json!({
            "projects": [1],
            "fields": ["message", "exception_stacks.type"],
            "conditions": [["exception_stacks.type", "=", "KeyError"]],
            "range": "1d"
        }),
    )
    .await;

    assert_eq!(result.data.len(), 1);
    assert_eq!(result.data[0]["exception_stacks.type"], json!("KeyError"));
}

#[tokio::test]
async fn test_grouped_aggregation() {
    let store = seeded_store().await;

    let result = run(
        &store,
        json!({
            "projects": [1],
            "aggregations": [["count()", null, "count"]],
            "groupby": ["exception_stacks.type"],
            "range": "1d",
            "orderby": "-count"
        }),
    )
    .await;

    assert_eq!(result.data.len(), 2);
    assert_eq!(result.data[0]["exception_stacks.type"], json!("ValidationError"));
    assert_eq!(result.data[0]["count"], json!(2));
    assert_eq!(result.data[1]["count"], json!(1));
}

#[tokio::test]
async fn test_ungrouped_aggregation_on_no_rows() {
    let store = MemoryEventStore::new();

    let result = run(
        &store,
        json!({
            "projects": [1],
            "aggregations": [["count()", null, "count"], ["uniq", "user_id", "users"], ["max", "timestamp", "last"]],
            "range": "1d"
        }),
    )
    .await;

    assert_eq!(result.data.len(), 1);
    assert_eq!(result.data[0]["count"], json!(0));
    assert_eq!(result.data[0]["users"], json!(0));
    assert_eq!(result.data[0]["last"], json!(null));
}

#[tokio::test]
async fn test_aggregates_skip_nulls() {
    let store = seeded_store().await;

    let result = run(
        &store,
        json!({
            "projects": [1],
            "aggregations": [["count", "user_id", "with_user"], ["count()", null, "events"], ["min", "message", "first_message"]],
            "range": "1d"
        }),
    )
    .await;

    assert_eq!(result.data[0]["with_user"], json!(1));
    assert_eq!(result.data[0]["events"], json!(3));
    assert_eq!(result.data[0]["first_message"], json!("first"));
}

#[tokio::test]
async fn test_rows_keep_insertion_order_without_orderby() {
    let store = seeded_store().await;

    let result = run(&store, json!({"projects": [1], "fields": ["message"], "range": "1d"})).await;

    assert_eq!(column(&result, "message"), vec![json!("first"), json!("second"), json!("third")]);
}

#[tokio::test]
async fn test_nulls_sort_first_ascending() {
    let store = seeded_store().await;

    let result = run(
        &store,
        json!({"projects": [1], "fields": ["message", "user_id"], "range": "1d", "orderby": "user_id"}),
    )
    .await;

    assert_eq!(column(&result, "user_id"), vec![json!(null), json!(null), json!("u1")]);
    assert_eq!(column(&result, "message"), vec![json!("first"), json!("second"), json!("third")]);
}

#[tokio::test]
async fn test_nulls_sort_last_descending() {
    let store = seeded_store().await;

    let result = run(
        &store,
        json!({"projects": [1], "fields": ["message", "user_id"], "range": "1d", "orderby": "-user_id"}),
    )
    .await;

    assert_eq!(column(&result, "user_id"), vec![json!("u1"), json!(null), json!(null)]);
    assert_eq!(column(&result, "message"), vec![json!("third"), json!("first"), json!("second")]);
}
