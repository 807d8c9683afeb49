//! QRM broker server.
//!
//! Serves the client surface and the management surface on separate listeners
//! over one shared engine.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use qrm_broker::builders::{build_manager, open_store};
use qrm_broker::config::BrokerConfig;
use qrm_broker::core::{AppResult, QrmIfc};
use qrm_broker::runtime::{http, management_http, spawn_maintenance, TokioSpawner};
use qrm_broker::util::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "qrm-broker")]
#[command(version)]
#[command(about = "Queue resource manager for shared lab resources")]
struct Args {
    /// JSON configuration file. Without it, `QRM_*` environment variables are used.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_config(args: &Args) -> AppResult<BrokerConfig> {
    let cfg = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            BrokerConfig::from_json_str(&raw).map_err(anyhow::Error::msg)?
        }
        None => BrokerConfig::from_env().map_err(anyhow::Error::msg)?,
    };
    Ok(cfg)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown requested");
}

#[tokio::main]
async fn main() -> AppResult<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = load_config(&args)?;
    tracing::info!(http = %cfg.http_addr, management = %cfg.management_addr, store = ?cfg.store, "starting broker");

    let manager = build_manager(&cfg, open_store)?;
    let report = manager.recover()?;
    tracing::info!(?report, "store reconciled");

    let maintenance = spawn_maintenance(
        manager.clone(),
        cfg.maintenance_interval(),
        &TokioSpawner::current(),
    );

    let backend: Arc<dyn QrmIfc> = Arc::new(manager.clone());
    let client_app = http::router(backend);
    let management_app = management_http::router(manager);

    let client_listener = tokio::net::TcpListener::bind(cfg.http_addr)
        .await
        .with_context(|| format!("binding {}", cfg.http_addr))?;
    let management_listener = tokio::net::TcpListener::bind(cfg.management_addr)
        .await
        .with_context(|| format!("binding {}", cfg.management_addr))?;
    tracing::info!(addr = %cfg.http_addr, "client surface listening");
    tracing::info!(addr = %cfg.management_addr, "management surface listening");

    let client = async {
        axum::serve(client_listener, client_app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("client surface failed")
    };
    let management = async {
        axum::serve(management_listener, management_app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("management surface failed")
    };
    tokio::try_join!(client, management)?;

    maintenance.shutdown();
    tracing::info!("broker stopped");
    Ok(())
}
