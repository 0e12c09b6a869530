//! Process configuration from the environment.

use anotherai::error::{Error, Result};

/// Public url of the companion web app, used for display urls.
pub const APP_URL: &str = "https://app.anotherai.dev";
/// Public url of this API, used in well-known descriptors.
pub const API_URL: &str = "https://api.anotherai.dev";
/// Upstream OAuth authorization server.
pub const AUTHORIZATION_SERVER: &str = "https://auth.anotherai.dev";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub postgres_dsn: String,
    pub clickhouse_dsn: String,
    pub clickhouse_password_salt: String,
    pub file_storage_dsn: Option<String>,
    pub file_storage_container_name: String,
    pub jobs_broker_url: Option<String>,
    pub jwks_url: Option<String>,
    pub jwk: Option<String>,
    /// Model the periodic inference self-test runs against, when set.
    pub healthcheck_model: Option<String>,
    pub env_name: String,
    pub port: u16,
    pub metrics_port: Option<u16>,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let postgres_dsn = env_opt("POSTGRES_DSN")
            .ok_or_else(|| Error::fatal("POSTGRES_DSN is not set"))?;
        let clickhouse_dsn = env_opt("CLICKHOUSE_DSN")
            .ok_or_else(|| Error::fatal("CLICKHOUSE_DSN is not set"))?;
        Ok(AppConfig {
            postgres_dsn,
            clickhouse_dsn,
            clickhouse_password_salt: env_opt("CLICKHOUSE_PASSWORD_SALT").unwrap_or_default(),
            file_storage_dsn: env_opt("FILE_STORAGE_DSN"),
            file_storage_container_name: env_opt("FILE_STORAGE_CONTAINER_NAME")
                .unwrap_or_else(|| "anotherai-files".into()),
            jobs_broker_url: env_opt("JOBS_BROKER_URL"),
            jwks_url: env_opt("JWKS_URL"),
            jwk: env_opt("JWK"),
            healthcheck_model: env_opt("HEALTHCHECK_MODEL"),
            env_name: env_opt("ENV_NAME").unwrap_or_else(|| "local".into()),
            port: env_opt("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),
            metrics_port: env_opt("METRICS_PORT").and_then(|p| p.parse().ok()),
        })
    }
}

/// Initialize tracing from `LOG_LEVEL` / `JSON_LOGS`. Called once per
/// binary.
pub fn setup_logs() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter);
    if std::env::var("JSON_LOGS").as_deref() == Ok("1") {
        builder.json().init();
    } else {
        builder.init();
    }
}
