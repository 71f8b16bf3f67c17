//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate the final configuration (after command-line overrides)
//! - Initialize subsystems in dependency order: metrics, site, server
//! - Bind the listener and serve until a termination signal
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The listener binds last, so traffic only arrives once routes exist

use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::{validation::validate_config, ConfigError, SiteConfig};
use crate::http::{HttpServer, LiveReload};
use crate::lifecycle::{signals, Shutdown};
use crate::observability::metrics;
use crate::routing::RoutingError;
use crate::site::Site;

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to load routes: {0}")]
    Routing(#[from] RoutingError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Build the site from `config` and serve it until Ctrl-C or SIGTERM.
pub async fn start(config: SiteConfig) -> Result<(), StartupError> {
    validate_config(&config).map_err(|errors| StartupError::Config(ConfigError::Validation(errors)))?;

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let address = config.listener.bind_address.clone();
    let shutdown = Shutdown::new();
    let server = build_server(config, &shutdown)?;

    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| StartupError::Bind { address, source })?;

    signals::spawn_signal_handler(shutdown.clone());
    server.run(listener, shutdown).await.map_err(StartupError::Serve)?;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Build the site and its server. In development the live-reload
/// transport is wired as the route reload callback.
pub fn build_server(config: SiteConfig, shutdown: &Shutdown) -> Result<HttpServer, StartupError> {
    let live_reload = LiveReload::new();

    let mut site = Site::new(config, shutdown)?;
    if site.config().site.env.is_dev() {
        let live = live_reload.clone();
        site = site.on_reload(move || live.notify());
    }

    Ok(HttpServer::new(Arc::new(site), live_reload))
}
