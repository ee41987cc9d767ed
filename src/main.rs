//! hostsync - marketplace synchronization for short-term-rental properties
//!
//! This is the main entry point for the hostsync service.

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hostsync::auth::{InMemoryTokenCache, OauthHandler, TokenCipher, TokenManager};
use hostsync::config::Config;
use hostsync::database::SqliteDatabase;
use hostsync::marketplace::{client::ClientConfig, MarketplaceClient};
use hostsync::server::{AppState, Server};
use hostsync::sync::{PollerSettings, QueuePoller, SyncEngine};
use hostsync::webhooks::WebhookIngester;

/// hostsync - marketplace synchronization for short-term-rental properties
#[derive(Parser, Debug)]
#[command(name = "hostsync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "HOSTSYNC_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_config(&args)?;
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone())),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting hostsync");

    // Storage
    let database = Arc::new(SqliteDatabase::new(&config.database.path).await?);
    info!(path = %config.database.path, "Database initialized");

    // Marketplace client and token plumbing
    let client = Arc::new(MarketplaceClient::new(ClientConfig::from(
        &config.marketplace,
    )));
    let cipher = Arc::new(TokenCipher::from_base64(
        &config.security.token_encryption_key,
    )?);
    let cache = Arc::new(InMemoryTokenCache::new());
    let tokens = Arc::new(TokenManager::new(
        Arc::clone(&database),
        Arc::clone(&client),
        Arc::clone(&cipher),
        cache,
    ));

    // Sync engine and poller
    let engine = Arc::new(SyncEngine::new(
        Arc::clone(&database),
        Arc::clone(&client),
        Arc::clone(&tokens),
    ));
    let poller = QueuePoller::new(
        Arc::clone(&database),
        Arc::clone(&engine),
        PollerSettings {
            page_size: config.poller.page_size,
            deadline: std::time::Duration::from_millis(config.poller.deadline_ms),
            tick_interval: std::time::Duration::from_secs(config.poller.tick_interval_secs),
            ..Default::default()
        },
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let poller_handle = tokio::spawn(poller.run(shutdown_tx.subscribe()));
    info!(
        tick_secs = config.poller.tick_interval_secs,
        "Queue poller started"
    );

    // HTTP surface
    let state = AppState {
        database: Arc::clone(&database),
        oauth: Arc::new(OauthHandler::new(
            Arc::clone(&database),
            Arc::clone(&client),
            cipher,
            config.marketplace.platform.clone(),
        )),
        ingester: Arc::new(WebhookIngester::new(Arc::clone(&database))),
        platform: config.marketplace.platform.clone(),
    };

    let server = Server::new(config.server.clone(), state);
    info!(
        host = %config.server.host,
        port = config.server.port,
        "Starting HTTP server"
    );

    let result = server.run(shutdown_signal()).await;

    // Stop the poller once the server is down
    let _ = shutdown_tx.send(());
    let _ = poller_handle.await;

    info!("hostsync shutdown complete");

    result.map_err(Into::into)
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
        None => {
            eprintln!("Loading configuration from environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
    }
}

/// Create a future that resolves when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
