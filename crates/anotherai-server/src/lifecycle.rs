//! Process wiring: stores, broker, provider factory, runner and security
//! are built once at startup and torn down explicitly. No import-time
//! side effects.

use std::sync::Arc;

use tracing::info;

use anotherai::error::Result;
use anotherai::events::EventRouter;
use anotherai::providers::AdapterFactory;
use anotherai::runner::CompletionRunner;
use anotherai::templates::TemplateManager;
use anotherai_blob::{FileStorage, InMemoryFileStorage, S3FileStorage};
use anotherai_broker::{broker_from_url, BrokerEventRouter, TaskBroker, Worker};
use anotherai_clickhouse::ClickhouseStore;
use anotherai_factories::LocalAdapterFactory;
use anotherai_postgres::PostgresStore;

use crate::config::AppConfig;
use crate::security::{default_verifier, SecurityService};
use crate::tasks;

/// Everything a request handler needs.
pub struct AppState {
    pub config: AppConfig,
    pub postgres: PostgresStore,
    pub clickhouse: ClickhouseStore,
    pub files: Arc<dyn FileStorage>,
    pub broker: Arc<dyn TaskBroker>,
    pub events: Arc<dyn EventRouter>,
    pub runner: Arc<CompletionRunner>,
    pub security: Arc<SecurityService>,
    pub templates: Arc<TemplateManager>,
}

impl AppState {
    pub async fn startup(config: AppConfig) -> Result<Arc<Self>> {
        info!(env = config.env_name, "starting up");

        let postgres = PostgresStore::connect(&config.postgres_dsn).await?;
        let clickhouse =
            ClickhouseStore::connect(&config.clickhouse_dsn, &config.clickhouse_password_salt)?;

        let files: Arc<dyn FileStorage> = match &config.file_storage_dsn {
            Some(dsn) => Arc::new(
                S3FileStorage::from_dsn(dsn, &config.file_storage_container_name).await?,
            ),
            None => Arc::new(InMemoryFileStorage::new()),
        };

        let broker = broker_from_url(config.jobs_broker_url.as_deref()).await?;
        let events: Arc<dyn EventRouter> = Arc::new(BrokerEventRouter::new(Arc::clone(&broker)));

        let factory: Arc<dyn AdapterFactory> = Arc::new(LocalAdapterFactory::from_env().await);
        let templates = Arc::new(TemplateManager::new());
        let runner = Arc::new(CompletionRunner::new(
            factory,
            Arc::new(clickhouse.clone()),
            Arc::clone(&events),
            Arc::clone(&templates),
        ));

        let verifier = default_verifier(config.jwks_url.as_deref(), config.jwk.as_deref())?;
        let security = Arc::new(SecurityService::new(
            postgres.clone(),
            verifier,
            Arc::clone(&events),
        ));

        Ok(Arc::new(AppState {
            config,
            postgres,
            clickhouse,
            files,
            broker,
            events,
            runner,
            security,
            templates,
        }))
    }

    /// Build the background worker over this state's broker and stores.
    pub fn build_worker(self: &Arc<Self>) -> Worker {
        Worker::new(Arc::clone(&self.broker))
            .register(Arc::new(tasks::StoreCompletionHandler::new(
                self.clickhouse.clone(),
                Arc::clone(&self.files),
            )))
            .register(Arc::new(tasks::DecrementCreditsHandler::new(
                self.postgres.clone(),
            )))
            .register(Arc::new(tasks::StartExperimentCompletionHandler::new(
                self.postgres.clone(),
                Arc::clone(&self.runner),
            )))
            .register(Arc::new(tasks::UserConnectedHandler::new(
                self.postgres.clone(),
            )))
            .register(Arc::new(tasks::PaymentUpdatedHandler::new(
                self.postgres.clone(),
            )))
    }
}
