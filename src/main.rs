mod config;
mod game;
mod metrics;
mod net;
mod util;

use std::sync::Arc;

use anyhow::{anyhow, Context};
use tokio::sync::RwLock;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{load_names, GameConfig, ServerConfig};
use crate::metrics::Metrics;
use crate::net::game_session::{start_game_loop, GameSession};
use crate::net::transport::WebTransportServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Spider Arena Server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load_or_default();
    config.validate().map_err(|e| anyhow!("Invalid server config: {}", e))?;
    let game_config = GameConfig::load_or_default();
    game_config.validate().map_err(|e| anyhow!("Invalid game config: {}", e))?;
    info!(
        "Configuration loaded: {}:{}, arena {}, {} flies max",
        config.bind_address, config.port, game_config.arena_size, game_config.max_flies
    );

    let names = load_names(&config.names_path)
        .with_context(|| format!("Failed to load names from {}", config.names_path))?;
    info!("Loaded {} spider names", names.len());

    let metrics = Arc::new(Metrics::new());
    let metrics_clone = metrics.clone();
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    let tick_interval = game_config.tick_interval;
    let game_session = Arc::new(RwLock::new(GameSession::new(
        game_config,
        names.into(),
        config.outbound_queue_capacity,
        metrics,
    )));
    let game_loop = start_game_loop(game_session.clone(), tick_interval);

    let server = WebTransportServer::new(config.clone(), game_session).await?;
    info!("Server ready on https://{}:{}", config.bind_address, config.port);
    info!(
        "Chrome flag: --ignore-certificate-errors-spki-list={}",
        server.cert_hash()
    );

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Shutting down...");
        }
    }

    game_loop.abort();
    info!("Server stopped");
    Ok(())
}
