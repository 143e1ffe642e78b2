//! # Discover Core
//!
//! Core business logic for the Discover event query service.
//!
//! This crate contains the domain logic for storing error events in a columnar
//! layout and answering structured discover queries against them: resolving
//! date windows, validating requested columns, translating conditions and
//! aggregations into an execution plan, and evaluating that plan.
//!
//! ## Architecture
//!
//! The core follows clean architecture principles:
//! - Business logic depends only on trait abstractions ([`EventStore`],
//!   [`OrganizationDirectory`])
//! - In-memory implementations are provided for both seams
//! - The HTTP layer lives in `discover-api` and only talks to these traits
//!
//! ## Usage
//!
//! ```rust
//! use discover_core::{OrganizationSlug, ProjectId};
//!
//! let slug = OrganizationSlug::new("acme").unwrap();
//! let project = ProjectId::new(42);
//! assert_eq!(slug.as_str(), "acme");
//! assert_eq!(project.as_u64(), 42);
//! ```

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use uuid::Uuid;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Unique identifier of a stored event
///
/// Always held as 32 lowercase hex characters (a UUID without hyphens),
/// which is the representation returned in query results.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventId(String);

impl EventId {
    /// Generate a new random event ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Get string representation of event ID
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::parse_str(s).map_err(|_| ParseError::InvalidFormat {
            expected: "32 hex characters or hyphenated UUID".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(uuid.simple().to_string()))
    }
}

impl TryFrom<String> for EventId {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EventId> for String {
    fn from(value: EventId) -> Self {
        value.0
    }
}

/// Numeric project identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(u64);

impl ProjectId {
    /// Create new project ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProjectId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.parse::<u64>().map_err(|_| ParseError::InvalidFormat {
            expected: "positive integer".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self::new(id))
    }
}

/// URL-safe organization identifier
///
/// Appears as the `{organization_slug}` segment of the discover route.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrganizationSlug(String);

impl OrganizationSlug {
    /// Create new organization slug with validation
    ///
    /// # Validation Rules
    /// - Must be 1-50 characters
    /// - Must contain only lowercase ASCII letters, digits, hyphens, and underscores
    /// - Must not start with a hyphen
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();

        if value.is_empty() {
            return Err(ValidationError::Required {
                field: "organization_slug".to_string(),
            });
        }

        if value.len() > 50 {
            return Err(ValidationError::TooLong {
                field: "organization_slug".to_string(),
                max_length: 50,
            });
        }

        if !value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidCharacters {
                field: "organization_slug".to_string(),
                invalid_chars: "anything but lowercase letters, digits, '-' and '_'".to_string(),
            });
        }

        if value.starts_with('-') {
            return Err(ValidationError::InvalidFormat {
                field: "organization_slug".to_string(),
                message: "cannot start with a hyphen".to_string(),
            });
        }

        Ok(Self(value))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrganizationSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OrganizationSlug {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for OrganizationSlug {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<OrganizationSlug> for String {
    fn from(value: OrganizationSlug) -> Self {
        value.0
    }
}

// ============================================================================
// Time Types
// ============================================================================

/// UTC timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Wrap an existing chrono datetime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Build a timestamp from fractional unix seconds
    pub fn from_unix_seconds(seconds: f64) -> Option<Self> {
        if !seconds.is_finite() {
            return None;
        }
        let whole = seconds.floor();
        let nanos = ((seconds - whole) * 1_000_000_000.0).round() as u32;
        Utc.timestamp_opt(whole as i64, nanos.min(999_999_999))
            .single()
            .map(Self)
    }

    /// Parse timestamp from RFC3339 string
    pub fn from_rfc3339(s: &str) -> Result<Self, ParseError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|_| ParseError::InvalidFormat {
                expected: "RFC3339 datetime".to_string(),
                actual: s.to_string(),
            })?
            .with_timezone(&Utc);
        Ok(Self(dt))
    }

    /// Parse a timestamp as sent by API clients
    ///
    /// Accepts RFC3339 as well as naive `YYYY-MM-DDTHH:MM:SS[.ffffff][Z]`
    /// strings, which are interpreted as UTC.
    pub fn parse_lenient(s: &str) -> Result<Self, ParseError> {
        let trimmed = s.trim();
        if let Ok(ts) = Self::from_rfc3339(trimmed) {
            return Ok(ts);
        }

        let naive = trimmed.strip_suffix('Z').unwrap_or(trimmed);
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(dt) = NaiveDateTime::parse_from_str(naive, format) {
                return Ok(Self(dt.and_utc()));
            }
        }

        Err(ParseError::InvalidFormat {
            expected: "ISO 8601 datetime (YYYY-MM-DDTHH:MM:SS)".to_string(),
            actual: s.to_string(),
        })
    }

    /// Convert to RFC3339 string
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Subtract a chrono duration, saturating at the earliest representable instant
    pub fn saturating_sub(&self, duration: chrono::Duration) -> Self {
        Self(self.0.checked_sub_signed(duration).unwrap_or(DateTime::<Utc>::MIN_UTC))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Error type for input validation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    TooLong { field: String, max_length: usize },

    #[error("Field '{field}' contains invalid characters: {invalid_chars}")]
    InvalidCharacters {
        field: String,
        invalid_chars: String,
    },
}

/// Error type for string parsing failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: expected {expected}, got '{actual}'")]
    InvalidFormat { expected: String, actual: String },
}

// ============================================================================
// Module declarations
// ============================================================================

/// Column catalog of the events dataset
pub mod columns;

/// Event payloads and their flattening into rows
pub mod event;

/// Relative and explicit date windows
pub mod range;

/// Discover query requests and their translation into plans
pub mod query;

/// Columnar event storage and plan execution
pub mod store;

/// Organizations and the projects they own
pub mod tenancy;

/// Typed cell values
pub mod value;

pub use columns::{ColumnCatalog, ColumnDef, ColumnType, ScalarType};
pub use event::{EventError, EventPayload, EventRow};
pub use query::{
    Aggregation, AggregateFunction, Condition, DiscoverQuery, Operator, OrderBy, QueryError,
    QueryLimits, QueryPlan,
};
pub use range::{parse_relative_range, DateWindow, RangeError};
pub use store::{ColumnMeta, EventStore, MemoryEventStore, QueryResult, StoreError};
pub use tenancy::{
    DirectoryError, MemoryOrganizationDirectory, Organization, OrganizationDirectory,
    DISCOVER_FEATURE,
};
pub use value::Value;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
