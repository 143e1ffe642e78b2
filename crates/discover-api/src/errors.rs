//! Error types for the HTTP service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use discover_core::{QueryError, StoreError};
use tracing::{error, warn};

/// Discover handler errors with HTTP status code mapping
///
/// - `400 Bad Request`: the body is not a valid query
/// - `403 Forbidden`: the query names a project outside the organization
/// - `404 Not Found`: the organization is unknown or lacks the discover feature
/// - `500 Internal Server Error`: the event store failed
///
/// Responses carry a `{"detail": "..."}` body. Store failures are logged
/// server-side and answered with a generic message.
#[derive(Debug, thiserror::Error)]
pub enum DiscoverHandlerError {
    /// Unknown organization, or one without the discover feature
    ///
    /// Both cases answer 404 so organization existence is not disclosed.
    #[error("The requested resource does not exist")]
    OrganizationNotFound { slug: String },

    /// Body could not be parsed into a query
    #[error("{message}")]
    InvalidBody { message: String },

    /// Requested project is not owned by the organization
    #[error("You do not have permission to perform this action.")]
    ProjectAccessDenied { project: u64 },

    /// Query failed validation or translation
    #[error(transparent)]
    InvalidQuery(#[from] QueryError),

    /// Event store failure
    #[error("Query execution failed: {0}")]
    StoreFailed(#[from] StoreError),
}

impl DiscoverHandlerError {
    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            Self::OrganizationNotFound { .. } => StatusCode::NOT_FOUND,
            Self::InvalidBody { .. } | Self::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            Self::ProjectAccessDenied { .. } => StatusCode::FORBIDDEN,
            Self::StoreFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Metric label for this error
    pub fn reason(&self) -> &'static str {
        match self {
            Self::OrganizationNotFound { .. } => "not_found",
            Self::InvalidBody { .. } => "invalid_body",
            Self::ProjectAccessDenied { .. } => "forbidden",
            Self::InvalidQuery(_) => "invalid_query",
            Self::StoreFailed(_) => "store",
        }
    }
}

impl IntoResponse for DiscoverHandlerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            Self::StoreFailed(e) => {
                // Log detailed error server-side but return generic message to client
                error!(error = %e, "Event store failed while executing query");
                "Internal server error occurred. Please try again later.".to_string()
            }
            Self::OrganizationNotFound { slug } => {
                warn!(organization = %slug, "Discover query for unavailable organization");
                self.to_string()
            }
            Self::ProjectAccessDenied { project } => {
                warn!(project = project, "Discover query for foreign project");
                self.to_string()
            }
            Self::InvalidBody { .. } | Self::InvalidQuery(_) => self.to_string(),
        };

        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration loading failed: {0}")]
    Loading(#[from] config::ConfigError),
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;
