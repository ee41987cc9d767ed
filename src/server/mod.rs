//! HTTP server components for hostsync
//!
//! This module provides the HTTP server infrastructure: router
//! configuration, route handlers, and server lifecycle management.

pub mod router;

pub use router::{build_router, AppState, HealthResponse};

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::database::Database;

/// HTTP server for hostsync
///
/// Manages the axum server lifecycle: binding to the configured address,
/// applying middleware layers, and graceful shutdown.
pub struct Server<D: Database + 'static> {
    config: ServerConfig,
    state: AppState<D>,
}

impl<D: Database + 'static> Server<D> {
    /// Create a new server instance
    pub fn new(config: ServerConfig, state: AppState<D>) -> Self {
        Self { config, state }
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(
            self.config.host.parse().unwrap_or([0, 0, 0, 0].into()),
            self.config.port,
        )
    }

    /// Run the server until the shutdown future resolves
    pub async fn run(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = self.bind_addr();
        let app = build_router(self.state)
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .layer(tower_http::compression::CompressionLayer::new());

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(e.to_string()))?;

        tracing::info!("Server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

/// Server error types
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to address
    #[error("Failed to bind to address: {0}")]
    Bind(String),

    /// Failed to serve requests
    #[error("Server error: {0}")]
    Serve(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{OauthHandler, TokenCipher};
    use crate::database::MockDatabase;
    use crate::marketplace::{client::ClientConfig, MarketplaceClient, RetryPolicy};
    use crate::webhooks::WebhookIngester;
    use std::sync::Arc;
    use std::time::Duration;

    fn create_test_state() -> AppState<MockDatabase> {
        let db = Arc::new(MockDatabase::new());
        let client = Arc::new(MarketplaceClient::with_retry(
            ClientConfig {
                base_url: "http://127.0.0.1:9".to_string(),
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
                request_timeout_secs: 1,
            },
            RetryPolicy::with_max_retries(0),
        ));
        let cipher = Arc::new(TokenCipher::new(&[7u8; 32]));
        let oauth = Arc::new(OauthHandler::new(
            Arc::clone(&db),
            client,
            cipher,
            "marketplace",
        ));
        let ingester = Arc::new(WebhookIngester::new(Arc::clone(&db)));

        AppState {
            database: db,
            oauth,
            ingester,
            platform: "marketplace".to_string(),
        }
    }

    // Test 1: Server can be created with config
    #[test]
    fn test_server_new() {
        let server = Server::new(ServerConfig::default(), create_test_state());
        assert_eq!(server.bind_addr().port(), 8080);
    }

    // Test 2: Server bind address calculation
    #[test]
    fn test_server_bind_addr() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 9090,
        };
        let server = Server::new(config, create_test_state());
        assert_eq!(server.bind_addr().to_string(), "127.0.0.1:9090");
    }

    // Test 3: Server graceful shutdown
    #[tokio::test]
    async fn test_server_graceful_shutdown() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Let the OS assign a port
        };
        let server = Server::new(config, create_test_state());

        let shutdown = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
        };

        let handle = tokio::spawn(async move { server.run(shutdown).await });

        let result = handle.await.unwrap();
        assert!(result.is_ok());
    }

    // Test 4: ServerError display messages
    #[test]
    fn test_server_error_display() {
        let bind_err = ServerError::Bind("address in use".to_string());
        assert_eq!(
            bind_err.to_string(),
            "Failed to bind to address: address in use"
        );

        let serve_err = ServerError::Serve("connection reset".to_string());
        assert_eq!(serve_err.to_string(), "Server error: connection reset");
    }
}
