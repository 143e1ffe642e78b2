//! # Discover HTTP Service
//!
//! HTTP server answering discover queries over stored error events.
//!
//! This service provides:
//! - The organization-scoped discover query endpoint
//! - Health and readiness endpoints
//! - A Prometheus metrics endpoint

pub mod config;
pub mod errors;
pub mod metrics;
pub mod responses;

pub use config::{
    DiscoverConfig, LoggingConfig, OrganizationConfig, ServerConfig, ServiceConfig, StoreConfig,
};
pub use errors::{ConfigError, DiscoverHandlerError, ServiceError};
pub use metrics::ServiceMetrics;
pub use responses::{HealthResponse, ReadinessResponse};

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
    http::StatusCode,
    middleware,
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use discover_core::{
    DiscoverQuery, EventStore, Organization, OrganizationDirectory, OrganizationSlug, ProjectId,
    QueryResult, Timestamp,
};
use std::{
    future::{Future, IntoFuture},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, instrument, warn};

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration for the service
    pub config: ServiceConfig,

    /// Organizations and the projects they own
    pub directory: Arc<dyn OrganizationDirectory>,

    /// Event store queries run against
    pub event_store: Arc<dyn EventStore>,

    /// Metrics collector for observability
    pub metrics: Arc<ServiceMetrics>,
}

impl AppState {
    /// Create new application state
    pub fn new(
        config: ServiceConfig,
        directory: Arc<dyn OrganizationDirectory>,
        event_store: Arc<dyn EventStore>,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            config,
            directory,
            event_store,
            metrics,
        }
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

/// Create HTTP router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let discover_routes = Router::new()
        .route(
            "/api/0/organizations/{organization_slug}/discover/query/",
            post(handle_discover_query),
        )
        .route(
            "/api/0/organizations/{organization_slug}/discover/query",
            post(handle_discover_query),
        );

    let health_routes = Router::new()
        .route("/health", get(handle_health_check))
        .route("/ready", get(handle_readiness_check));

    let observability_routes = Router::new().route("/metrics", get(metrics_endpoint));

    let mut router = Router::new()
        .merge(discover_routes)
        .merge(health_routes)
        .merge(observability_routes)
        .layer(DefaultBodyLimit::max(state.config.server.max_body_size));

    if state.config.server.enable_compression {
        router = router.layer(CompressionLayer::new());
    }
    if state.config.server.enable_cors {
        router = router.layer(CorsLayer::permissive());
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(request_logging_middleware))
                .into_inner(),
        )
        .with_state(state)
}

/// Start HTTP server
pub async fn start_server(
    config: ServiceConfig,
    directory: Arc<dyn OrganizationDirectory>,
    event_store: Arc<dyn EventStore>,
) -> Result<(), ServiceError> {
    let metrics = ServiceMetrics::new().map_err(|e| {
        ServiceError::Configuration(ConfigError::Invalid {
            message: format!("Failed to initialize metrics: {}", e),
        })
    })?;
    if let Ok(count) = event_store.event_count().await {
        metrics.set_events_stored(count);
    }

    let address = format!("{}:{}", config.server.host, config.server.port);
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_seconds);

    let state = AppState::new(config, directory, event_store, metrics);
    let app = create_router(state);

    let listener =
        tokio::net::TcpListener::bind(&address)
            .await
            .map_err(|e| ServiceError::BindFailed {
                address: address.clone(),
                message: e.to_string(),
            })?;

    info!("Starting HTTP server on {}", address);

    let (shutdown_started, shutdown_observed) = oneshot::channel();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!(
                "Initiating graceful shutdown with {}s timeout",
                shutdown_timeout.as_secs()
            );
            let _ = shutdown_started.send(());
        })
        .into_future();

    drain_with_timeout(server, shutdown_observed, shutdown_timeout).await?;

    info!("HTTP server shutdown complete");
    Ok(())
}

/// Run the server until it stops
///
/// Once shutdown has started, in-flight requests get `timeout` to complete
/// before they are abandoned.
async fn drain_with_timeout<F>(
    server: F,
    shutdown_started: oneshot::Receiver<()>,
    timeout: Duration,
) -> Result<(), ServiceError>
where
    F: Future<Output = std::io::Result<()>>,
{
    let deadline = async {
        match shutdown_started.await {
            Ok(()) => tokio::time::sleep(timeout).await,
            Err(_) => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = server => result.map_err(|e| ServiceError::ServerFailed {
            message: e.to_string(),
        }),
        _ = deadline => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "Graceful shutdown timed out; abandoning in-flight requests"
            );
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

// ============================================================================
// Discover Handlers
// ============================================================================

/// Handle discover query requests
///
/// Checks run in a fixed order: the organization must exist and have the
/// discover feature (404), the body must parse (400), every project must
/// belong to the organization (403), and the query must translate (400)
/// before anything touches the store.
#[instrument(skip(state, payload), fields(organization = %organization_slug))]
pub async fn handle_discover_query(
    State(state): State<AppState>,
    Path(organization_slug): Path<String>,
    payload: Result<Json<DiscoverQuery>, JsonRejection>,
) -> Result<Json<QueryResult>, DiscoverHandlerError> {
    let start = Instant::now();
    let result = run_discover_query(&state, &organization_slug, payload).await;

    match &result {
        Ok(query_result) => {
            state
                .metrics
                .record_query(start.elapsed(), query_result.data.len());
            info!(
                rows = query_result.data.len(),
                duration_ms = %start.elapsed().as_millis(),
                "Discover query completed"
            );
        }
        Err(e) => state.metrics.record_failure(start.elapsed(), e.reason()),
    }

    result.map(Json)
}

async fn run_discover_query(
    state: &AppState,
    organization_slug: &str,
    payload: Result<Json<DiscoverQuery>, JsonRejection>,
) -> Result<QueryResult, DiscoverHandlerError> {
    let organization = resolve_organization(state, organization_slug).await?;

    let Json(query) = payload.map_err(|rejection| DiscoverHandlerError::InvalidBody {
        message: rejection.body_text(),
    })?;

    if let Some(project) = query
        .projects
        .iter()
        .copied()
        .find(|project| !organization.owns_project(ProjectId::new(*project)))
    {
        return Err(DiscoverHandlerError::ProjectAccessDenied { project });
    }

    let plan = query.translate(Timestamp::now(), &state.config.limits())?;
    debug!(
        window_start = %plan.window.start,
        window_end = %plan.window.end,
        conditions = plan.conditions.len(),
        aggregated = plan.is_aggregated(),
        "Translated discover query"
    );

    Ok(state.event_store.query(&plan).await?)
}

/// Find the organization, treating a missing discover feature as not found
async fn resolve_organization(
    state: &AppState,
    organization_slug: &str,
) -> Result<Organization, DiscoverHandlerError> {
    let not_found = || DiscoverHandlerError::OrganizationNotFound {
        slug: organization_slug.to_string(),
    };

    let slug = OrganizationSlug::new(organization_slug).map_err(|_| not_found())?;
    let organization = state
        .directory
        .get_organization(&slug)
        .await
        .ok_or_else(not_found)?;

    if !organization.has_feature(&state.config.discover.feature) {
        return Err(not_found());
    }
    Ok(organization)
}

// ============================================================================
// Health Check Handlers
// ============================================================================

/// Basic health check endpoint
#[instrument(skip(state))]
async fn handle_health_check(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, StatusCode> {
    match state.event_store.event_count().await {
        Ok(events_stored) => Ok(Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Timestamp::now(),
            events_stored,
            version: env!("CARGO_PKG_VERSION").to_string(),
        })),
        Err(e) => {
            warn!(error = %e, "Health check failed");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

/// Readiness check for Kubernetes
#[instrument(skip(state))]
async fn handle_readiness_check(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, StatusCode> {
    let is_ready = state.event_store.event_count().await.is_ok();

    let response = ReadinessResponse {
        ready: is_ready,
        timestamp: Timestamp::now(),
    };

    if is_ready {
        Ok(Json(response))
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

// ============================================================================
// Observability Handlers
// ============================================================================

/// Prometheus metrics endpoint
#[instrument(skip_all)]
async fn metrics_endpoint(State(state): State<AppState>) -> Result<String, StatusCode> {
    if let Ok(count) = state.event_store.event_count().await {
        state.metrics.set_events_stored(count);
    }

    state
        .metrics
        .encode()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// ============================================================================
// Middleware
// ============================================================================

/// Request logging middleware with correlation ID tracking
///
/// Reuses the caller's `x-correlation-id` or generates one, records it on the
/// span, and echoes it in the response headers.
#[instrument(skip(request, next), fields(
    method = %request.method(),
    uri = %request.uri(),
    correlation_id
))]
async fn request_logging_middleware(
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let correlation_id = request
        .headers()
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    tracing::Span::current().record("correlation_id", correlation_id.as_str());
    request.extensions_mut().insert(correlation_id.clone());

    let mut response = next.run(request).await;
    let duration = start.elapsed();

    if let Ok(header_value) = correlation_id.parse() {
        response
            .headers_mut()
            .insert("x-correlation-id", header_value);
    }

    let status = response.status();

    if status.is_server_error() {
        error!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with server error"
        );
    } else if status.is_client_error() {
        warn!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with client error"
        );
    } else {
        info!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed successfully"
        );
    }

    response
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
