//! The HTTP gateway binary.

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use anotherai_broker::use_in_memory_broker;
use anotherai_server::api;
use anotherai_server::config::{setup_logs, AppConfig};
use anotherai_server::lifecycle::AppState;

#[derive(Debug, Parser)]
#[command(name = "server", about = "AnotherAI inference gateway")]
struct Args {
    /// Override the listen port (defaults to PORT or 8000).
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logs();
    let args = Args::parse();
    let mut config = AppConfig::from_env()?;
    if let Some(port) = args.port {
        config.port = port;
    }

    if let Some(metrics_port) = config.metrics_port {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], metrics_port))
            .install()?;
        info!(port = metrics_port, "prometheus exporter listening");
    }

    let state = AppState::startup(config.clone()).await?;

    // Without an external queue the gateway drains its own tasks.
    if use_in_memory_broker(config.jobs_broker_url.as_deref()) {
        let worker = state.build_worker();
        tokio::spawn(worker.run());
        info!("in-memory broker: background worker running in process");
    }

    if let Some(model) = config.healthcheck_model.clone() {
        info!(%model, "inference healthcheck scheduled");
        anotherai_server::healthcheck::spawn(Arc::clone(&state.runner), model);
    }

    let router = api::router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "gateway listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
