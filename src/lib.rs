pub mod error;
pub mod models;
pub mod modules;
pub mod proxy; // Gateway service module
mod utils;

use anyhow::Context;
use std::path::PathBuf;
use tracing::info;

use proxy::{AppState, GatewayServer, RouteTable};

/// Load configuration, start the gateway and serve until ctrl-c
pub async fn run(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let data_dir = modules::get_data_dir().ok();
    let _log_guard = modules::init_logger(data_dir.as_deref());

    let config_path = match config_path {
        Some(path) => path,
        None => modules::default_config_path().context("Failed to resolve config path")?,
    };
    let config = modules::load_app_config(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;

    let routes = RouteTable::standard(&config.proxy).context("Invalid route table")?;
    for rule in routes.rules() {
        info!(
            "Route {} -> {} ({:?}, {}ms)",
            rule.mount_prefix, rule.target_origin, rule.rewrite_policy, rule.timeout_millis
        );
    }

    let host = config.proxy.get_bind_address().to_string();
    let port = config.proxy.port;
    let state = AppState::new(config.proxy, routes);

    let (server, handle) = GatewayServer::start(host, port, state)
        .await
        .map_err(anyhow::Error::msg)?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");
    server.stop();
    handle.await.context("Gateway task failed")?;
    Ok(())
}
