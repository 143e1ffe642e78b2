//! Configuration types for the HTTP service

use crate::errors::ConfigError;
use discover_core::{
    MemoryOrganizationDirectory, Organization, OrganizationSlug, ProjectId, QueryLimits,
    DISCOVER_FEATURE,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::info;

/// Environment variable naming an explicit configuration file
pub const CONFIG_FILE_ENV: &str = "DISCOVER_CONFIG_FILE";

/// Prefix of environment variable overrides (`DISCOVER__SERVER__PORT=9090`)
pub const ENV_PREFIX: &str = "DISCOVER";

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Query settings
    pub discover: DiscoverConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Event store settings
    pub store: StoreConfig,

    /// Organizations allowed to query, with the projects they own
    pub organizations: Vec<OrganizationConfig>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,

    /// Maximum request size in bytes
    pub max_body_size: usize,

    /// Enable CORS
    pub enable_cors: bool,

    /// Enable compression
    pub enable_compression: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_seconds: 30,
            max_body_size: 1024 * 1024, // 1MB
            enable_cors: true,
            enable_compression: true,
        }
    }
}

/// Discover query configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverConfig {
    /// Row limit applied when a request does not name one
    pub default_limit: u64,

    /// Largest limit a request may ask for
    pub max_limit: u64,

    /// Feature an organization needs to use the endpoint
    pub feature: String,
}

impl Default for DiscoverConfig {
    fn default() -> Self {
        let limits = QueryLimits::default();
        Self {
            default_limit: limits.default_limit,
            max_limit: limits.max_limit,
            feature: DISCOVER_FEATURE.to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Event store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON-lines file of events loaded at startup
    pub seed_file: Option<PathBuf>,
}

/// An organization entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizationConfig {
    pub slug: String,
    pub name: String,
    pub projects: Vec<u64>,
    pub features: Vec<String>,
}

impl OrganizationConfig {
    /// Convert into a directory entry
    pub fn to_organization(&self) -> Result<Organization, ConfigError> {
        let slug = OrganizationSlug::new(self.slug.clone()).map_err(|e| ConfigError::Invalid {
            message: format!("organization '{}': {}", self.slug, e),
        })?;
        let name = if self.name.is_empty() {
            self.slug.clone()
        } else {
            self.name.clone()
        };

        let organization = self
            .projects
            .iter()
            .fold(Organization::new(slug, name), |org, project| {
                org.with_project(ProjectId::new(*project))
            });
        Ok(self
            .features
            .iter()
            .fold(organization, |org, feature| org.with_feature(feature.clone())))
    }
}

impl ServiceConfig {
    /// Load configuration from the standard sources
    ///
    /// Sources, later ones overriding earlier ones:
    ///  1. `/etc/discover/service.yaml`
    ///  2. `./config/service.yaml`
    ///  3. the file named by `DISCOVER_CONFIG_FILE` (required when set)
    ///  4. `DISCOVER__` environment variables, `__` separating sections
    ///
    /// Every field carries a default, so an unconfigured environment yields a
    /// valid configuration.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var(CONFIG_FILE_ENV)
            .ok()
            .filter(|path| !path.is_empty());

        let mut builder = config::Config::builder()
            .add_source(
                config::File::with_name("/etc/discover/service")
                    .required(false)
                    .format(config::FileFormat::Yaml),
            )
            .add_source(
                config::File::with_name("config/service")
                    .required(false)
                    .format(config::FileFormat::Yaml),
            );

        if let Some(path) = explicit {
            info!(path = %path, "Loading configuration from explicit path");
            builder = builder.add_source(
                config::File::with_name(&path)
                    .required(true)
                    .format(config::FileFormat::Yaml),
            );
        }

        let config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Check the configuration for values the service cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discover.default_limit == 0 || self.discover.max_limit == 0 {
            return Err(ConfigError::Invalid {
                message: "discover limits must be greater than zero".to_string(),
            });
        }

        if self.discover.default_limit > self.discover.max_limit {
            return Err(ConfigError::Invalid {
                message: format!(
                    "discover.default_limit ({}) exceeds discover.max_limit ({})",
                    self.discover.default_limit, self.discover.max_limit
                ),
            });
        }

        if self.discover.feature.trim().is_empty() {
            return Err(ConfigError::Missing {
                key: "discover.feature".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for organization in &self.organizations {
            organization.to_organization()?;
            if !seen.insert(organization.slug.as_str()) {
                return Err(ConfigError::Invalid {
                    message: format!("organization '{}' is listed twice", organization.slug),
                });
            }
        }

        Ok(())
    }

    /// Row limits for query translation
    pub fn limits(&self) -> QueryLimits {
        QueryLimits {
            default_limit: self.discover.default_limit,
            max_limit: self.discover.max_limit,
        }
    }

    /// Build the organization directory from the configured organizations
    pub fn organization_directory(&self) -> Result<MemoryOrganizationDirectory, ConfigError> {
        let directory = MemoryOrganizationDirectory::new();
        for organization in &self.organizations {
            directory
                .register(organization.to_organization()?)
                .map_err(|e| ConfigError::Invalid {
                    message: e.to_string(),
                })?;
        }
        Ok(directory)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
