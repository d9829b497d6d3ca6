pub mod error;
mod models;
mod modules;
pub mod proxy; // Relay service module
mod utils;

use anyhow::Context;
use modules::logger;
use tracing::{error, info};

use proxy::server::AppState;
use proxy::AxumServer;

pub async fn run() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    let config =
        modules::config::load_app_config().context("Failed to load configuration")?;

    logger::init_logger(config.log_dir.as_deref());

    match config.proxy.backend_base_url() {
        Some(url) => info!("Relaying to backend {}", url),
        None => error!("No valid API_BASE_URL; /api/bff will answer 500"),
    }

    let state = AppState::from_config(&config.proxy);
    let (server, handle) = AxumServer::start(&config.proxy, state)
        .await
        .map_err(anyhow::Error::msg)?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    server.stop();
    handle.await.context("Server task panicked")?;
    Ok(())
}
