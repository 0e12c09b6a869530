//! Background task handlers. All idempotent: the broker delivers at
//! least once.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use anotherai::domain::{AgentCompletion, CacheUsage, CompletionSource, FallbackOption};
use anotherai::error::{Error, Result};
use anotherai::events::{Event, EventPayload};
use anotherai::runner::{CompletionRequest, CompletionRunner, RunnerReply};
use anotherai_blob::FileStorage;
use anotherai_broker::EventHandler;
use anotherai_clickhouse::ClickhouseStore;
use anotherai_postgres::PostgresStore;

/// Persist completions and their inputs to the analytical store, moving
/// inline file payloads to blob storage first.
pub struct StoreCompletionHandler {
    clickhouse: ClickhouseStore,
    files: Arc<dyn FileStorage>,
}

impl StoreCompletionHandler {
    pub fn new(clickhouse: ClickhouseStore, files: Arc<dyn FileStorage>) -> Self {
        StoreCompletionHandler { clickhouse, files }
    }

    /// Swap inline `data` payloads for blob urls. Upload failures are
    /// logged and the payload kept; persistence never fails on blobs.
    async fn offload_files(&self, tenant_uid: i64, completion: &mut AgentCompletion) {
        let folder = format!("inputs/{}", completion.agent_input.id);
        let mut messages: Vec<_> = completion
            .agent_input
            .messages
            .as_mut()
            .map(|m| m.iter_mut().collect())
            .unwrap_or_default();
        messages.extend(completion.messages.iter_mut());

        for message in messages {
            for file in message.files_mut() {
                if file.data.is_none() || file.storage_url.is_some() {
                    continue;
                }
                match self.files.store_file(tenant_uid, file, &folder).await {
                    Ok(url) => {
                        file.storage_url = Some(url.clone());
                        if file.url.is_none() {
                            file.url = Some(url);
                        }
                        file.data = None;
                    }
                    Err(e) => warn!(error = %e, "failed to offload file payload"),
                }
            }
        }
    }
}

#[async_trait]
impl EventHandler for StoreCompletionHandler {
    fn name(&self) -> &'static str {
        "store_completion"
    }

    fn accepts(&self, payload: &EventPayload) -> bool {
        matches!(payload, EventPayload::StoreCompletion { .. })
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        let EventPayload::StoreCompletion { completion } = &event.payload else {
            return Ok(());
        };
        let mut completion = (**completion).clone();
        self.offload_files(event.tenant_uid, &mut completion).await;

        let store = self.clickhouse.for_tenant(event.tenant_uid);
        store
            .store_input(
                &completion.agent.id,
                &completion.agent_input,
                completion.created_at(),
            )
            .await?;
        store.store_completion(&completion).await?;
        debug!(completion_id = %completion.id, "completion stored");
        Ok(())
    }
}

/// Debit the completion cost exactly once per completion id.
pub struct DecrementCreditsHandler {
    postgres: PostgresStore,
}

impl DecrementCreditsHandler {
    pub fn new(postgres: PostgresStore) -> Self {
        DecrementCreditsHandler { postgres }
    }

    /// Amount to debit for a completion, `None` when nothing is owed:
    /// zero cost, or a completion marked `preserve_credits`.
    fn debit_amount(completion: &AgentCompletion) -> Option<f64> {
        if completion.preserve_credits {
            return None;
        }
        completion.cost_usd.filter(|cost| *cost > 0.0)
    }
}

#[async_trait]
impl EventHandler for DecrementCreditsHandler {
    fn name(&self) -> &'static str {
        "decrement_credits"
    }

    fn accepts(&self, payload: &EventPayload) -> bool {
        matches!(payload, EventPayload::StoreCompletion { .. })
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        let EventPayload::StoreCompletion { completion } = &event.payload else {
            return Ok(());
        };
        let Some(cost) = Self::debit_amount(completion) else {
            return Ok(());
        };
        // The idempotency insert guards against handler retries; only the
        // first writer for this completion id performs the debit.
        if self
            .postgres
            .debit_once(event.tenant_uid, completion.id, cost)
            .await?
        {
            self.postgres
                .decrement_credits(event.tenant_uid, cost)
                .await?;
        }
        Ok(())
    }
}

/// Run one pre-registered completion inside an experiment and record its
/// output.
pub struct StartExperimentCompletionHandler {
    postgres: PostgresStore,
    runner: Arc<CompletionRunner>,
}

impl StartExperimentCompletionHandler {
    pub fn new(postgres: PostgresStore, runner: Arc<CompletionRunner>) -> Self {
        StartExperimentCompletionHandler { postgres, runner }
    }
}

#[async_trait]
impl EventHandler for StartExperimentCompletionHandler {
    fn name(&self) -> &'static str {
        "start_experiment_completion"
    }

    fn accepts(&self, payload: &EventPayload) -> bool {
        matches!(payload, EventPayload::StartExperimentCompletion { .. })
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        let EventPayload::StartExperimentCompletion {
            experiment_id,
            completion_id,
            version_id,
            input_id,
        } = &event.payload
        else {
            return Ok(());
        };
        let store = self.postgres.for_tenant(event.tenant_uid);

        match store
            .start_experiment_completion(experiment_id, *completion_id)
            .await
        {
            Ok(()) => {}
            // A redelivered message raced an in-flight run; nothing to do.
            Err(Error::DuplicateValue(_)) => return Ok(()),
            Err(e) => return Err(e),
        }

        let experiment = store.get_experiment(experiment_id, true).await?;
        let version = experiment
            .versions
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|v| v.version.id == *version_id)
            .cloned()
            .ok_or(Error::ObjectNotFound {
                object_type: "version",
            })?;
        let input = experiment
            .inputs
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|i| i.input.id == *input_id)
            .cloned()
            .ok_or(Error::ObjectNotFound {
                object_type: "input",
            })?;
        let agent = store.agent_by_id(&experiment.agent_id).await?;

        let request = CompletionRequest {
            model: version.version.model.clone(),
            provider: version.version.provider,
            messages: version
                .version
                .prompt
                .clone()
                .or_else(|| input.input.messages.clone())
                .unwrap_or_default(),
            variables: input.input.variables.clone(),
            tools: version.version.tools.clone(),
            tool_choice: version.version.tool_choice.clone(),
            output_schema: version.version.output_schema.clone(),
            temperature: version.version.temperature,
            top_p: version.version.top_p,
            max_output_tokens: version.version.max_output_tokens,
            presence_penalty: version.version.presence_penalty,
            frequency_penalty: version.version.frequency_penalty,
            parallel_tool_calls: version.version.parallel_tool_calls,
            reasoning_effort: version.version.reasoning_effort,
            reasoning_budget: version.version.reasoning_budget,
            use_cache: experiment.use_cache.unwrap_or(CacheUsage::Auto),
            use_fallback: version
                .version
                .use_fallback
                .clone()
                .unwrap_or(FallbackOption::Auto),
            stream: false,
            source: CompletionSource::Web,
            metadata: Default::default(),
            preserve_credits: None,
            timeout: None,
        };

        let completion = match self.runner.run(event.tenant_uid, agent, request).await {
            Ok(RunnerReply::Completion(completion)) => *completion,
            Ok(RunnerReply::Stream(_)) => {
                return Err(Error::fatal("experiment run unexpectedly streamed"))
            }
            Err(e) => {
                // The failed completion record was already emitted; the
                // cell keeps the error as its terminal output.
                warn!(error = %e, experiment_id, "experiment completion failed");
                store
                    .add_experiment_completion_output(
                        experiment_id,
                        *completion_id,
                        &anotherai::domain::AgentOutput {
                            messages: vec![],
                            error: Some(e.to_payload()),
                        },
                        None,
                        None,
                    )
                    .await?;
                return Ok(());
            }
        };

        store
            .add_experiment_completion_output(
                experiment_id,
                *completion_id,
                &completion.agent_output,
                completion.cost_usd,
                completion.duration_seconds,
            )
            .await?;
        Ok(())
    }
}

/// Track the last organization each user authenticated against.
pub struct UserConnectedHandler {
    postgres: PostgresStore,
}

impl UserConnectedHandler {
    pub fn new(postgres: PostgresStore) -> Self {
        UserConnectedHandler { postgres }
    }
}

#[async_trait]
impl EventHandler for UserConnectedHandler {
    fn name(&self) -> &'static str {
        "user_connected"
    }

    fn accepts(&self, payload: &EventPayload) -> bool {
        matches!(payload, EventPayload::UserConnected { .. })
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        let EventPayload::UserConnected {
            user_id,
            organization_id,
        } = &event.payload
        else {
            return Ok(());
        };
        self.postgres
            .set_last_used_organization(user_id, organization_id.as_deref())
            .await
    }
}

/// A zero-value decrement runs the payment hook, which tops up tenants
/// with automatic payment enabled.
pub struct PaymentUpdatedHandler {
    postgres: PostgresStore,
}

impl PaymentUpdatedHandler {
    pub fn new(postgres: PostgresStore) -> Self {
        PaymentUpdatedHandler { postgres }
    }
}

#[async_trait]
impl EventHandler for PaymentUpdatedHandler {
    fn name(&self) -> &'static str {
        "payment_updated"
    }

    fn accepts(&self, payload: &EventPayload) -> bool {
        matches!(payload, EventPayload::PaymentUpdated {})
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        self.postgres
            .decrement_credits(event.tenant_uid, 0.0)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anotherai::domain::{Agent, AgentInput, AgentOutput, CompletionStatus, Version};
    use anotherai::utils::uuid7;

    fn completion(cost_usd: Option<f64>, preserve_credits: bool) -> AgentCompletion {
        AgentCompletion {
            id: uuid7::uuid7(),
            agent: Agent::default(),
            agent_input: AgentInput::default(),
            agent_output: AgentOutput::default(),
            messages: vec![],
            version: Version::default(),
            status: CompletionStatus::Success,
            duration_seconds: Some(1.0),
            cost_usd,
            traces: vec![],
            from_cache: false,
            preserve_credits,
            source: CompletionSource::Api,
            metadata: None,
        }
    }

    #[test]
    fn costly_completions_are_debited() {
        assert_eq!(
            DecrementCreditsHandler::debit_amount(&completion(Some(0.25), false)),
            Some(0.25)
        );
    }

    #[test]
    fn free_completions_are_not_debited() {
        assert_eq!(
            DecrementCreditsHandler::debit_amount(&completion(Some(0.0), false)),
            None
        );
        assert_eq!(
            DecrementCreditsHandler::debit_amount(&completion(None, false)),
            None
        );
    }

    #[test]
    fn preserve_credits_suppresses_the_debit() {
        // A health-check completion costs money upstream but never
        // touches the tenant balance.
        assert_eq!(
            DecrementCreditsHandler::debit_amount(&completion(Some(0.25), true)),
            None
        );
    }
}
