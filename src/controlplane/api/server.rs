//! API Server
//!
//! Serves the REST router with graceful shutdown.

use crate::error::{Error, Result};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

use super::rest::RestRouter;
use crate::controlplane::ControlPlane;

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// REST API bind address
    pub rest_addr: SocketAddr,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            rest_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 9860)),
            request_timeout_secs: 30,
        }
    }
}

// =============================================================================
// API Server
// =============================================================================

/// REST API server for the control plane
pub struct ApiServer {
    config: ApiServerConfig,
    control_plane: Arc<ControlPlane>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(config: ApiServerConfig, control_plane: Arc<ControlPlane>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            control_plane,
            shutdown_tx,
        }
    }

    /// Run until [`ApiServer::shutdown`] is called
    pub async fn run(&self) -> Result<()> {
        let addr = self.config.rest_addr;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let app = RestRouter::new(
            self.control_plane.clone(),
            Duration::from_secs(self.config.request_timeout_secs),
        )
        .build();

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind REST server: {}", e)))?;

        info!("REST API listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("REST server shutting down");
            })
            .await
            .map_err(|e| Error::Internal(format!("REST server error: {}", e)))?;

        Ok(())
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScmConfig;
    use crate::node::NodeRegistry;

    #[test]
    fn test_default_config() {
        let config = ApiServerConfig::default();
        assert_eq!(config.rest_addr.port(), 9860);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[tokio::test]
    async fn test_shutdown_stops_server() {
        let control_plane = ControlPlane::new(ScmConfig::default(), NodeRegistry::new()).unwrap();
        let server = Arc::new(ApiServer::new(
            ApiServerConfig {
                rest_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
                request_timeout_secs: 5,
            },
            control_plane,
        ));

        let running = server.clone();
        let handle = tokio::spawn(async move { running.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(result.is_ok());
    }
}
