//! Integration tests for the discover query endpoint
//!
//! Each test seeds one event from a second ago, shaped like a client error
//! report with a single `ValidationError` exception and one in-app frame.

mod common;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use common::{
    create_app, create_test_app, directory, event_with_exceptions, exception, format_date,
    post_query, recent_window, rows, validation_error_event, ORGANIZATION, OTHER_PROJECT, PROJECT,
};
use discover_core::{EventStore, MemoryEventStore};
use serde_json::json;

// ============================================================================
// Date scoping
// ============================================================================

#[tokio::test]
async fn test_explicit_window_returns_requested_fields() {
    // Arrange
    let app = create_test_app().await;
    let (start, end) = recent_window();

    // Act
    let (status, body) = post_query(
        app,
        ORGANIZATION,
        json!({
            "projects": [PROJECT],
            "fields": ["message", "platform"],
            "start": start,
            "end": end,
            "orderby": "-timestamp"
        }),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::OK, "{}", body);
    let data = rows(&body);
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["message"], "message!");
    assert_eq!(data[0]["platform"], "python");
    assert_eq!(data[0].as_object().unwrap().len(), 2);
}

#[tokio::test]
async fn test_relative_range_returns_same_row() {
    // Arrange
    let app = create_test_app().await;

    // Act
    let (status, body) = post_query(
        app,
        ORGANIZATION,
        json!({
            "projects": [PROJECT],
            "fields": ["message", "platform"],
            "range": "1d",
            "orderby": "-timestamp"
        }),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::OK, "{}", body);
    let data = rows(&body);
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["message"], "message!");
    assert_eq!(data[0]["platform"], "python");
}

#[tokio::test]
async fn test_range_with_explicit_dates_is_rejected() {
    // Arrange
    let app = create_test_app().await;
    let (start, end) = recent_window();

    // Act
    let (status, body) = post_query(
        app,
        ORGANIZATION,
        json!({
            "projects": [PROJECT],
            "fields": ["message", "platform"],
            "range": "1d",
            "start": start,
            "end": end,
            "orderby": "-timestamp"
        }),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
}

#[tokio::test]
async fn test_invalid_range_unit_is_rejected() {
    // Arrange
    let app = create_test_app().await;

    // Act
    let (status, body) = post_query(
        app,
        ORGANIZATION,
        json!({
            "projects": [PROJECT],
            "fields": ["message", "platform"],
            "range": "1x",
            "orderby": "-timestamp"
        }),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn test_window_excludes_older_events() {
    // Arrange
    let store = MemoryEventStore::new();
    store
        .insert(vec![validation_error_event(Utc::now() - Duration::hours(2))])
        .await
        .unwrap();
    let app = create_app(directory(true), store);

    // Act
    let (status, body) = post_query(
        app,
        ORGANIZATION,
        json!({"projects": [PROJECT], "fields": ["message"], "range": "1h"}),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert!(rows(&body).is_empty());
}

// ============================================================================
// Conditions and array columns
// ============================================================================

#[tokio::test]
async fn test_boolean_condition_on_frames() {
    // Arrange
    let app = create_test_app().await;
    let (start, end) = recent_window();

    // Act
    let (status, body) = post_query(
        app,
        ORGANIZATION,
        json!({
            "projects": [PROJECT],
            "fields": ["message", "platform", "exception_frames.in_app"],
            "conditions": [["exception_frames.in_app", "=", true]],
            "start": start,
            "end": end,
            "orderby": "-timestamp"
        }),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::OK, "{}", body);
    let data = rows(&body);
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["message"], "message!");
    assert_eq!(data[0]["platform"], "python");
    assert_eq!(data[0]["exception_frames.in_app"], true);
}

#[tokio::test]
async fn test_array_field_is_joined() {
    // Arrange
    let app = create_test_app().await;
    let now = Utc::now();

    // Act
    let (status, body) = post_query(
        app,
        ORGANIZATION,
        json!({
            "projects": [PROJECT],
            "fields": ["message", "exception_stacks.type"],
            "start": format_date(now - Duration::seconds(10)),
            "end": format_date(now + Duration::seconds(10)),
            "orderby": "-timestamp"
        }),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::OK, "{}", body);
    let data = rows(&body);
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["exception_stacks.type"], "ValidationError");
}

#[tokio::test]
async fn test_array_condition_equals() {
    // Arrange
    let app = create_test_app().await;
    let (start, end) = recent_window();

    // Act
    let (status, body) = post_query(
        app,
        ORGANIZATION,
        json!({
            "projects": [PROJECT],
            "conditions": [["exception_stacks.type", "=", "ValidationError"]],
            "fields": ["message"],
            "start": start,
            "end": end,
            "orderby": "-timestamp"
        }),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(rows(&body).len(), 1);
}

#[tokio::test]
async fn test_array_condition_not_equals() {
    // Arrange
    let app = create_test_app().await;
    let (start, end) = recent_window();

    // Act
    let (status, body) = post_query(
        app,
        ORGANIZATION,
        json!({
            "projects": [PROJECT],
            "conditions": [["exception_stacks.type", "!=", "ValidationError"]],
            "fields": ["message"],
            "start": start,
            "end": end,
            "orderby": "-timestamp"
        }),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(rows(&body).len(), 0);
}

#[tokio::test]
async fn test_chained_exceptions_join_one_row_each() {
    // Arrange
    let store = MemoryEventStore::new();
    store
        .insert(vec![event_with_exceptions(
            Utc::now() - Duration::seconds(1),
            json!([exception("KeyError", false), exception("ValidationError", true)]),
        )])
        .await
        .unwrap();
    let app = create_app(directory(true), store);

    // Act
    let (status, body) = post_query(
        app,
        ORGANIZATION,
        json!({
            "projects": [PROJECT],
            "fields": ["exception_stacks.type"],
            "range": "1d",
            "orderby": "exception_stacks.type"
        }),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(
        body["data"],
        json!([
            {"exception_stacks.type": "KeyError"},
            {"exception_stacks.type": "ValidationError"}
        ])
    );
}

#[tokio::test]
async fn test_unknown_field_is_rejected() {
    // Arrange
    let app = create_test_app().await;

    // Act
    let (status, body) = post_query(
        app,
        ORGANIZATION,
        json!({"projects": [PROJECT], "fields": ["nope"], "range": "1d"}),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Unknown column 'nope'");
}

#[tokio::test]
async fn test_unknown_operator_is_rejected() {
    // Arrange
    let app = create_test_app().await;

    // Act
    let (status, _) = post_query(
        app,
        ORGANIZATION,
        json!({
            "projects": [PROJECT],
            "fields": ["message"],
            "conditions": [["message", "~", "x"]],
            "range": "1d"
        }),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_limit_above_maximum_is_rejected() {
    // Arrange
    let app = create_test_app().await;

    // Act
    let (status, _) = post_query(
        app,
        ORGANIZATION,
        json!({"projects": [PROJECT], "fields": ["message"], "range": "1d", "limit": 100000}),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ============================================================================
// Aggregations
// ============================================================================

#[tokio::test]
async fn test_grouped_count_ordered_by_alias() {
    // Arrange
    let store = MemoryEventStore::new();
    let at = Utc::now() - Duration::seconds(1);
    store
        .insert(vec![
            validation_error_event(at),
            validation_error_event(at),
            event_with_exceptions(at, json!([exception("KeyError", false)])),
        ])
        .await
        .unwrap();
    let app = create_app(directory(true), store);

    // Act
    let (status, body) = post_query(
        app,
        ORGANIZATION,
        json!({
            "projects": [PROJECT],
            "aggregations": [["count()", null, "count"]],
            "groupby": ["exception_stacks.type"],
            "range": "1d",
            "orderby": "-count"
        }),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(
        body["data"],
        json!([
            {"exception_stacks.type": "ValidationError", "count": 2},
            {"exception_stacks.type": "KeyError", "count": 1}
        ])
    );
    assert_eq!(body["meta"][1], json!({"name": "count", "type": "UInt64"}));
}

// ============================================================================
// Tenancy
// ============================================================================

#[tokio::test]
async fn test_unknown_organization_is_not_found() {
    // Arrange
    let app = create_test_app().await;

    // Act
    let (status, _) = post_query(
        app,
        "missing",
        json!({"projects": [PROJECT], "fields": ["message"], "range": "1d"}),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_organization_without_feature_is_not_found() {
    // Arrange
    let app = create_app(directory(false), MemoryEventStore::new());

    // Act
    let (status, _) = post_query(
        app,
        ORGANIZATION,
        json!({"projects": [PROJECT], "fields": ["message"], "range": "1d"}),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_foreign_project_is_forbidden() {
    // Arrange
    let app = create_test_app().await;

    // Act
    let (status, _) = post_query(
        app,
        ORGANIZATION,
        json!({"projects": [PROJECT, OTHER_PROJECT], "fields": ["message"], "range": "1d"}),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::FORBIDDEN);
}
