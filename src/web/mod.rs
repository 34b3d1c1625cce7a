//! JSON API over the controller.
//!
//! A thin layer: every handler delegates to [`ThermoService`] and maps its
//! errors to status codes. No pages or static assets are served.

pub mod config;
pub mod handlers;
pub mod router;

// Re-export commonly used items
pub use config::WebConfig;
pub use router::create_app;

use crate::error::{Result, ThermoError};
use crate::service::ThermoService;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Serve the API until `shutdown` resolves.
pub async fn start_web_server<F>(
    config: WebConfig,
    service: Arc<ThermoService>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_app(&config, service);

    let addr = config
        .bind_address()
        .parse::<SocketAddr>()
        .map_err(|e| ThermoError::config_error(format!("Invalid bind address: {}", e)))?;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ThermoError::web_server_error(format!("Failed to bind to address: {}", e)))?;

    info!("Starting thermo_pi API server on http://{}", addr);
    info!("Status endpoint: http://{}/api/status", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ThermoError::web_server_error(format!("Server error: {}", e)))?;

    Ok(())
}
