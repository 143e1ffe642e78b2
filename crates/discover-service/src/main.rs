//! # Discover Service
//!
//! Binary entry point for the Discover HTTP service.
//!
//! This executable:
//! - Loads configuration from files and the environment
//! - Initializes logging
//! - Builds the organization directory and the event store
//! - Starts the HTTP server from discover-api

mod seed;

use discover_api::{start_server, LoggingConfig, ServiceConfig, ServiceError};
use discover_core::{EventStore, MemoryEventStore, OrganizationDirectory};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The logging section shapes the subscriber, so load errors are only
    // reported once it is installed.
    let loaded = ServiceConfig::load();
    let logging = loaded
        .as_ref()
        .map(|config| config.logging.clone())
        .unwrap_or_default();
    init_tracing(&logging);

    info!("Starting Discover Service");

    let service_config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!(
                error = %e,
                "Could not load service configuration; aborting. \
                 Fix the configuration and restart."
            );
            std::process::exit(3);
        }
    };

    if let Err(e) = service_config.validate() {
        error!(error = %e, "Service configuration is invalid; aborting");
        std::process::exit(3);
    }

    let directory: Arc<dyn OrganizationDirectory> =
        match service_config.organization_directory() {
            Ok(directory) => {
                info!(
                    organizations = directory.len(),
                    "Registered organizations from config"
                );
                Arc::new(directory)
            }
            Err(e) => {
                error!(error = %e, "Failed to build organization directory; aborting");
                std::process::exit(3);
            }
        };

    let store = MemoryEventStore::new();
    if let Some(path) = &service_config.store.seed_file {
        seed::seed_store(&store, path).await?;
    }
    let event_store: Arc<dyn EventStore> = Arc::new(store);

    info!(
        host = %service_config.server.host,
        port = service_config.server.port,
        "Starting HTTP server"
    );

    if let Err(e) = start_server(service_config, directory, event_store).await {
        error!("Failed to start server: {}", e);

        let exit_code = match e {
            ServiceError::BindFailed { .. } => 1,
            ServiceError::ServerFailed { .. } => 2,
            ServiceError::Configuration(_) => 3,
        };

        std::process::exit(exit_code);
    }

    Ok(())
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "discover_service={level},discover_api={level},discover_core={level},tower_http=debug",
            level = logging.level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json_format {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
