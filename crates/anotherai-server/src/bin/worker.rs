//! The background worker binary: drains the external queue.

use clap::Parser;
use tracing::info;

use anotherai_server::config::{setup_logs, AppConfig};
use anotherai_server::lifecycle::AppState;

#[derive(Debug, Parser)]
#[command(name = "worker", about = "AnotherAI background worker")]
struct Args {}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logs();
    let _args = Args::parse();
    let config = AppConfig::from_env()?;

    if let Some(metrics_port) = config.metrics_port {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], metrics_port))
            .install()?;
        info!(port = metrics_port, "prometheus exporter listening");
    }

    let state = AppState::startup(config).await?;
    state.build_worker().run().await;
    Ok(())
}
