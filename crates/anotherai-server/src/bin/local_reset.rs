//! Drop and recreate the local databases. Refuses to touch anything that
//! does not look local, and exits non-zero when it does.

use clap::Parser;
use tracing::{error, info};

use anotherai_server::config::{setup_logs, AppConfig};

#[derive(Debug, Parser)]
#[command(name = "local-reset", about = "Reset local AnotherAI databases")]
struct Args {}

fn ensure_local(dsn: &str) -> Result<(), String> {
    if dsn.contains("localhost") || dsn.contains("127.0.0.1") {
        return Ok(());
    }
    Err(format!("refusing to reset a non-local database: {dsn}"))
}

async fn reset_postgres(dsn: &str) -> Result<(), String> {
    ensure_local(dsn)?;
    let (base, db_name) = dsn
        .rsplit_once('/')
        .ok_or_else(|| format!("POSTGRES_DSN has no database: {dsn}"))?;
    let (client, connection) = tokio_postgres::connect(base, tokio_postgres::NoTls)
        .await
        .map_err(|e| e.to_string())?;
    tokio::spawn(connection);
    client
        .batch_execute(&format!("DROP DATABASE IF EXISTS {db_name} WITH (FORCE)"))
        .await
        .map_err(|e| e.to_string())?;
    client
        .batch_execute(&format!("CREATE DATABASE {db_name}"))
        .await
        .map_err(|e| e.to_string())?;
    Ok(())
}

async fn reset_clickhouse(dsn: &str) -> Result<(), String> {
    ensure_local(dsn)?;
    let parsed = url::Url::parse(dsn).map_err(|e| e.to_string())?;
    let db_name = parsed.path().trim_start_matches('/').to_string();
    if db_name.is_empty() {
        return Err(format!("CLICKHOUSE_DSN has no database: {dsn}"));
    }
    let base = format!(
        "{}://{}:{}",
        parsed.scheme(),
        parsed.host_str().unwrap_or("localhost"),
        parsed.port_or_known_default().unwrap_or(8123),
    );
    let mut client = clickhouse::Client::default().with_url(base);
    if !parsed.username().is_empty() {
        client = client.with_user(parsed.username());
    }
    if let Some(password) = parsed.password() {
        client = client.with_password(password);
    }
    client
        .query(&format!("DROP DATABASE IF EXISTS {db_name}"))
        .execute()
        .await
        .map_err(|e| e.to_string())?;
    client
        .query(&format!("CREATE DATABASE {db_name}"))
        .execute()
        .await
        .map_err(|e| e.to_string())?;
    Ok(())
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    setup_logs();
    let _args = Args::parse();
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return std::process::ExitCode::FAILURE;
        }
    };

    if let Err(e) = reset_postgres(&config.postgres_dsn).await {
        error!(error = %e, "postgres reset failed");
        return std::process::ExitCode::FAILURE;
    }
    if let Err(e) = reset_clickhouse(&config.clickhouse_dsn).await {
        error!(error = %e, "clickhouse reset failed");
        return std::process::ExitCode::FAILURE;
    }
    info!("local databases reset");
    std::process::ExitCode::SUCCESS
}
