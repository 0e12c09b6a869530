//! Apply schema migrations to both stores. Exits non-zero on any
//! discrepancy between recorded and embedded migrations.

use clap::Parser;
use tracing::{error, info};

use anotherai_clickhouse::ClickhouseStore;
use anotherai_postgres::PostgresStore;
use anotherai_server::config::{setup_logs, AppConfig};

#[derive(Debug, Parser)]
#[command(name = "migrate", about = "Apply AnotherAI schema migrations")]
struct Args {
    /// Only migrate the relational store.
    #[arg(long)]
    postgres_only: bool,
    /// Only migrate the analytical store.
    #[arg(long)]
    clickhouse_only: bool,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    setup_logs();
    let args = Args::parse();
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return std::process::ExitCode::FAILURE;
        }
    };

    if !args.clickhouse_only {
        let result = async {
            let store = PostgresStore::connect(&config.postgres_dsn).await?;
            store.migrate().await
        }
        .await;
        match result {
            Ok(()) => info!("postgres migrations applied"),
            Err(e) => {
                error!(error = %e, "postgres migration failed");
                return std::process::ExitCode::FAILURE;
            }
        }
    }

    if !args.postgres_only {
        let result = async {
            let store =
                ClickhouseStore::connect(&config.clickhouse_dsn, &config.clickhouse_password_salt)?;
            store.migrate().await
        }
        .await;
        match result {
            Ok(()) => info!("clickhouse migrations applied"),
            Err(e) => {
                error!(error = %e, "clickhouse migration failed");
                return std::process::ExitCode::FAILURE;
            }
        }
    }

    std::process::ExitCode::SUCCESS
}
