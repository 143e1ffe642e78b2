//! Common test utilities for discover-api integration tests
//!
//! This module provides:
//! - An application state seeded with the standard organization and event
//! - Request builders for the discover endpoint
//! - Date helpers matching the second-precision format clients send

#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use discover_api::{create_router, AppState, ServiceConfig, ServiceMetrics};
use discover_core::{
    EventPayload, EventStore, MemoryEventStore, MemoryOrganizationDirectory, Organization,
    OrganizationSlug, ProjectId, DISCOVER_FEATURE,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

pub const ORGANIZATION: &str = "foo";
pub const PROJECT: u64 = 1;
pub const OTHER_PROJECT: u64 = 2;

// ============================================================================
// Fixtures
// ============================================================================

/// Organization `foo` owning project `bar` (id 1), optionally with the discover feature
pub fn directory(with_feature: bool) -> MemoryOrganizationDirectory {
    let mut organization = Organization::new(
        OrganizationSlug::new(ORGANIZATION).unwrap(),
        "foo",
    )
    .with_project(ProjectId::new(PROJECT));
    if with_feature {
        organization = organization.with_feature(DISCOVER_FEATURE);
    }

    let directory = MemoryOrganizationDirectory::new();
    directory.register(organization).unwrap();
    directory
}

/// An event shaped like a client error report with a single exception
pub fn validation_error_event(at: DateTime<Utc>) -> EventPayload {
    event_with_exceptions(at, json!([exception("ValidationError", true)]))
}

/// An event with the given exception values
pub fn event_with_exceptions(at: DateTime<Utc>, exceptions: Value) -> EventPayload {
    serde_json::from_value(json!({
        "event_id": uuid::Uuid::new_v4().simple().to_string(),
        "primary_hash": uuid::Uuid::new_v4().simple().to_string(),
        "project_id": PROJECT,
        "message": "message!",
        "platform": "python",
        "datetime": at.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
        "data": {
            "received": at.timestamp() as f64,
            "exception": {"values": exceptions}
        }
    }))
    .unwrap()
}

/// One exception value with a single frame
pub fn exception(exception_type: &str, in_app: bool) -> Value {
    json!({
        "type": exception_type,
        "value": "Bad request",
        "mechanism": {"type": "1", "value": "1"},
        "stacktrace": {
            "frames": [{
                "function": "?",
                "filename": "http://localhost:1337/error.js",
                "lineno": 29,
                "colno": 3,
                "in_app": in_app
            }]
        }
    })
}

/// Create an app seeded with the standard event from one second ago
pub async fn create_test_app() -> Router {
    let store = MemoryEventStore::new();
    store
        .insert(vec![validation_error_event(Utc::now() - Duration::seconds(1))])
        .await
        .unwrap();
    create_app(directory(true), store)
}

/// Create an app over the given directory and store
pub fn create_app(directory: MemoryOrganizationDirectory, store: MemoryEventStore) -> Router {
    let state = AppState::new(
        ServiceConfig::default(),
        Arc::new(directory),
        Arc::new(store),
        ServiceMetrics::new().unwrap(),
    );
    create_router(state)
}

// ============================================================================
// Requests
// ============================================================================

/// Second-precision timestamp as sent by clients
pub fn format_date(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Explicit window from ten seconds ago until now
pub fn recent_window() -> (String, String) {
    let now = Utc::now();
    (format_date(now - Duration::seconds(10)), format_date(now))
}

/// POST a discover query for `organization` and decode the JSON response
pub async fn post_query(app: Router, organization: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(format!(
            "/api/0/organizations/{}/discover/query/",
            organization
        ))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

/// Rows of a successful response
pub fn rows(body: &Value) -> &Vec<Value> {
    body["data"].as_array().expect("response should carry a data array")
}
