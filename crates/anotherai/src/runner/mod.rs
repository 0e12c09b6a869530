//! The completion runner: renders the prompt, walks the provider fallback
//! chain, and always emits exactly one completion record per run.

pub mod builder;
mod output;

pub use builder::CompletionBuilder;
pub use output::{RunnerOutput, RunnerOutputChunk};

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_stream::try_stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::warn;

use crate::domain::{
    metadata_keys, Agent, AgentCompletion, AgentInput, CacheUsage, CompletionSource,
    FallbackOption, Message, Provider, ReasoningEffort, Tool, ToolChoice, Version,
};
use crate::error::{Error, ErrorPayload, Result};
use crate::events::{Event, EventRouter};
use crate::models::{self, ModelData, ModelReasoningBudget};
use crate::providers::{
    AdapterFactory, LlmCompletion, ProviderCompletion, ProviderRequest, StreamingContext,
};
use crate::templates::TemplateManager;
use crate::utils::uuid7;

/// How long a cache lookup may hold up the request path.
const CACHE_LOOKUP_TIMEOUT: Duration = Duration::from_millis(1500);

/// A fully sanitized run request, produced by the HTTP layer from the
/// OpenAI-compatible body plus the extension fields.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub model: String,
    pub provider: Option<Provider>,
    /// Templated (or plain) conversation messages.
    pub messages: Vec<Message>,
    /// Template variables; when present the messages are treated as the
    /// version prompt and rendered against them.
    pub variables: Option<Value>,
    pub tools: Option<Vec<Tool>>,
    pub tool_choice: Option<ToolChoice>,
    pub output_schema: Option<Value>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_output_tokens: Option<u32>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub parallel_tool_calls: Option<bool>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub reasoning_budget: Option<u32>,
    pub use_cache: CacheUsage,
    pub use_fallback: FallbackOption,
    pub stream: bool,
    pub source: CompletionSource,
    pub metadata: BTreeMap<String, Value>,
    /// Suppress credit debits (internal traffic, health checks).
    pub preserve_credits: Option<bool>,
    pub timeout: Option<Duration>,
}

impl CompletionRequest {
    /// Whether the request is exempt from billing and the credit gate.
    pub fn non_billable(&self) -> bool {
        self.preserve_credits == Some(true)
    }
}

/// Lookup of previously stored completions by `(version_id, input_id)`.
#[async_trait]
pub trait CompletionCache: Send + Sync {
    async fn cached_completion(
        &self,
        tenant_uid: i64,
        version_id: &str,
        input_id: &str,
        timeout: Duration,
    ) -> Result<Option<AgentCompletion>>;
}

/// Cache that never hits, for tests and cache-less deployments.
pub struct NoCompletionCache;

#[async_trait]
impl CompletionCache for NoCompletionCache {
    async fn cached_completion(
        &self,
        _tenant_uid: i64,
        _version_id: &str,
        _input_id: &str,
        _timeout: Duration,
    ) -> Result<Option<AgentCompletion>> {
        Ok(None)
    }
}

/// Stream of runner chunks.
pub type RunnerChunkStream = Pin<Box<dyn Stream<Item = Result<RunnerOutputChunk>> + Send>>;

/// The reply of a run: buffered, or a stream whose completion record is
/// emitted through the event router once the terminal chunk is produced.
pub enum RunnerReply {
    Completion(Box<AgentCompletion>),
    Stream(RunnerChunkStream),
}

/// Orchestrates template rendering, provider selection, fallback and
/// completion emission.
pub struct CompletionRunner {
    factory: Arc<dyn AdapterFactory>,
    cache: Arc<dyn CompletionCache>,
    events: Arc<dyn EventRouter>,
    templates: Arc<TemplateManager>,
}

impl CompletionRunner {
    pub fn new(
        factory: Arc<dyn AdapterFactory>,
        cache: Arc<dyn CompletionCache>,
        events: Arc<dyn EventRouter>,
        templates: Arc<TemplateManager>,
    ) -> Self {
        CompletionRunner {
            factory,
            cache,
            events,
            templates,
        }
    }

    /// Run one completion for a tenant's agent.
    pub async fn run(
        &self,
        tenant_uid: i64,
        agent: Agent,
        request: CompletionRequest,
    ) -> Result<RunnerReply> {
        let model_data = resolve_model(&request.model)?;
        let candidates = self.candidate_providers(model_data, request.provider)?;

        // Version identity is computed over the template and variables, not
        // the rendered product.
        let version = build_version(&request, model_data).assign_id();
        let (rendered, input) = self.render(&request).await?;

        let mut metadata = request.metadata.clone();
        if models::is_alias(&request.model) {
            metadata.insert(
                metadata_keys::USED_MODEL.to_string(),
                Value::String(model_data.id.to_string()),
            );
        }
        let mut builder = CompletionBuilder::new(
            agent,
            version.clone(),
            input.clone(),
            rendered.clone(),
            request.source,
            metadata,
        );
        builder.preserve_credits = request.preserve_credits.unwrap_or(false);

        if use_cache(&request) {
            if let Some(cached) = self.lookup_cache(tenant_uid, &version.id, &input.id).await {
                let mut completion = synthesize_cached(cached, builder.elapsed_seconds());
                completion.preserve_credits = request.preserve_credits.unwrap_or(false);
                self.events
                    .send(Event::store_completion(tenant_uid, completion.clone()));
                return Ok(RunnerReply::Completion(Box::new(completion)));
            }
        }

        let provider_request = build_provider_request(&request, model_data, rendered);
        if request.stream {
            Ok(RunnerReply::Stream(self.run_streaming(
                tenant_uid,
                builder,
                provider_request,
                candidates,
                request,
                model_data,
            )))
        } else {
            self.run_buffered(
                tenant_uid,
                &mut Some(builder),
                provider_request,
                candidates,
                &request,
                model_data,
            )
            .await
        }
    }

    fn candidate_providers(
        &self,
        model_data: &'static ModelData,
        explicit: Option<Provider>,
    ) -> Result<Vec<Provider>> {
        if let Some(provider) = explicit {
            if self.factory.adapter(provider).is_none() {
                return Err(Error::InvalidRunOptions(format!(
                    "Provider {provider} is not configured"
                )));
            }
            if !model_data.providers.contains(&provider) {
                return Err(Error::InvalidRunOptions(format!(
                    "Provider {provider} does not serve model {}",
                    model_data.id
                )));
            }
            return Ok(vec![provider]);
        }
        let candidates: Vec<Provider> = model_data
            .providers
            .iter()
            .copied()
            .filter(|p| self.factory.adapter(*p).is_some())
            .collect();
        if candidates.is_empty() {
            return Err(Error::InvalidRunOptions(format!(
                "No configured provider supports model {}",
                model_data.id
            )));
        }
        Ok(candidates)
    }

    async fn render(&self, request: &CompletionRequest) -> Result<(Vec<Message>, AgentInput)> {
        match &request.variables {
            Some(variables) if !variables.is_null() => {
                let rendered = self
                    .templates
                    .render_messages(&request.messages, variables)
                    .await?;
                let input = AgentInput {
                    variables: Some(variables.clone()),
                    ..Default::default()
                }
                .normalized();
                Ok((rendered, input))
            }
            _ => {
                let input = AgentInput {
                    messages: Some(request.messages.clone()),
                    ..Default::default()
                }
                .normalized();
                Ok((request.messages.clone(), input))
            }
        }
    }

    async fn lookup_cache(
        &self,
        tenant_uid: i64,
        version_id: &str,
        input_id: &str,
    ) -> Option<AgentCompletion> {
        match self
            .cache
            .cached_completion(tenant_uid, version_id, input_id, CACHE_LOOKUP_TIMEOUT)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "cache lookup failed, running live");
                None
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_buffered(
        &self,
        tenant_uid: i64,
        builder_slot: &mut Option<CompletionBuilder>,
        provider_request: ProviderRequest,
        candidates: Vec<Provider>,
        request: &CompletionRequest,
        model_data: &'static ModelData,
    ) -> Result<RunnerReply> {
        let mut last_error: Option<Error> = None;
        let total = candidates.len();

        for (index, provider) in candidates.into_iter().enumerate() {
            let Some(adapter) = self.factory.adapter(provider) else {
                continue;
            };
            let mut attempt = LlmCompletion::new(provider, model_data.id);
            attempt.preserve_credits = request.preserve_credits;
            let started = Instant::now();

            match adapter.complete(&provider_request).await {
                Ok(completion) => {
                    attempt.duration_seconds = Some(started.elapsed().as_secs_f64());
                    attempt.response = completion.text.clone();
                    attempt.usage = completion.usage.clone();
                    // Billing heuristic applies per attempt: empty or
                    // flagged responses get a zero cost.
                    attempt.apply_pricing(&model_data.pricing);
                    let builder = take_builder(builder_slot)?;
                    return self.finish_buffered(tenant_uid, builder, attempt, completion, request);
                }
                Err(e) => {
                    attempt.duration_seconds = Some(started.elapsed().as_secs_f64());
                    attempt.error = Some(e.to_payload());
                    if let Some(builder) = builder_slot.as_mut() {
                        builder.add_attempt(attempt);
                    }
                    let has_next = index + 1 < total;
                    if e.retryable() && request.use_fallback != FallbackOption::Never && has_next {
                        warn!(provider = %provider, error = %e, "provider failed, falling back");
                        last_error = Some(e);
                        continue;
                    }
                    let builder = take_builder(builder_slot)?;
                    let completion = builder.build(RunnerOutput::default(), Some(e.to_payload()));
                    self.events.send(Event::store_completion(tenant_uid, completion));
                    return Err(e);
                }
            }
        }

        let e = last_error.unwrap_or_else(|| {
            Error::InvalidRunOptions(format!(
                "No configured provider supports model {}",
                model_data.id
            ))
        });
        let builder = take_builder(builder_slot)?;
        let completion = builder.build(RunnerOutput::default(), Some(e.to_payload()));
        self.events.send(Event::store_completion(tenant_uid, completion));
        Err(e)
    }

    fn finish_buffered(
        &self,
        tenant_uid: i64,
        mut builder: CompletionBuilder,
        attempt: LlmCompletion,
        completion: ProviderCompletion,
        request: &CompletionRequest,
    ) -> Result<RunnerReply> {
        let provider = attempt.provider;
        builder.add_attempt(attempt);
        match build_output(provider, completion, request.output_schema.as_ref()) {
            Ok(output) => {
                let record = builder.build(output, None);
                self.events
                    .send(Event::store_completion(tenant_uid, record.clone()));
                Ok(RunnerReply::Completion(Box::new(record)))
            }
            Err(e) => {
                let record = builder.build(RunnerOutput::default(), Some(e.to_payload()));
                self.events.send(Event::store_completion(tenant_uid, record));
                Err(e)
            }
        }
    }

    fn run_streaming(
        &self,
        tenant_uid: i64,
        builder: CompletionBuilder,
        provider_request: ProviderRequest,
        candidates: Vec<Provider>,
        request: CompletionRequest,
        model_data: &'static ModelData,
    ) -> RunnerChunkStream {
        let factory = Arc::clone(&self.factory);
        let events = Arc::clone(&self.events);

        let stream = try_stream! {
            let mut guard = EmitGuard::new(tenant_uid, builder, events);
            let mut last_error: Option<Error> = None;
            let total = candidates.len();

            for (index, provider) in candidates.into_iter().enumerate() {
                let Some(adapter) = factory.adapter(provider) else { continue };
                let mut attempt = LlmCompletion::new(provider, model_data.id);
                attempt.preserve_credits = request.preserve_credits;
                let started = Instant::now();
                let has_next = index + 1 < total;

                let mut chunks = match adapter.stream(&provider_request).await {
                    Ok(chunks) => chunks,
                    Err(e) => {
                        attempt.duration_seconds = Some(started.elapsed().as_secs_f64());
                        attempt.error = Some(e.to_payload());
                        guard.builder_mut().add_attempt(attempt);
                        if e.retryable()
                            && request.use_fallback != FallbackOption::Never
                            && has_next
                        {
                            warn!(provider = %provider, error = %e, "provider failed, falling back");
                            last_error = Some(e);
                            continue;
                        }
                        guard.fail(e.to_payload());
                        Err(e)?;
                        return;
                    }
                };

                let mut ctx = StreamingContext::new();
                let mut emitted = false;
                let mut stream_error: Option<Error> = None;
                while let Some(item) = chunks.next().await {
                    match item {
                        Ok(chunk) => {
                            let out = ctx.add_chunk(chunk);
                            if !out.is_empty() {
                                emitted = true;
                                yield out;
                            }
                        }
                        Err(e) => {
                            stream_error = Some(e);
                            break;
                        }
                    }
                }

                if let Some(e) = stream_error {
                    attempt.duration_seconds = Some(started.elapsed().as_secs_f64());
                    attempt.error = Some(e.to_payload());
                    guard.builder_mut().add_attempt(attempt);
                    // Fallback is only possible while nothing reached the
                    // client.
                    if !emitted
                        && e.retryable()
                        && request.use_fallback != FallbackOption::Never
                        && has_next
                    {
                        warn!(provider = %provider, error = %e, "stream failed before output, falling back");
                        last_error = Some(e);
                        continue;
                    }
                    guard.fail(e.to_payload());
                    Err(e)?;
                    return;
                }

                let completion = ctx.finalize();
                attempt.duration_seconds = Some(started.elapsed().as_secs_f64());
                attempt.response = completion.text.clone();
                attempt.usage = completion.usage.clone();
                attempt.apply_pricing(&model_data.pricing);
                guard.builder_mut().add_attempt(attempt);

                match build_output(provider, completion, request.output_schema.as_ref()) {
                    Ok(output) => {
                        let tool_calls = output.tool_call_requests.clone();
                        guard.complete(output);
                        yield RunnerOutputChunk {
                            delta: None,
                            reasoning: None,
                            tool_call_requests: (!tool_calls.is_empty()).then_some(tool_calls),
                            final_chunk: true,
                        };
                    }
                    Err(e) => {
                        guard.fail(e.to_payload());
                        Err(e)?;
                    }
                }
                return;
            }

            let e = last_error.unwrap_or_else(|| {
                Error::InvalidRunOptions(format!(
                    "No configured provider supports model {}",
                    model_data.id
                ))
            });
            guard.fail(e.to_payload());
            Err(e)?;
        };
        Box::pin(stream)
    }
}

fn take_builder(slot: &mut Option<CompletionBuilder>) -> Result<CompletionBuilder> {
    slot.take()
        .ok_or_else(|| Error::internal("completion builder consumed twice"))
}

fn resolve_model(model: &str) -> Result<&'static ModelData> {
    if model.is_empty() {
        return Err(Error::InvalidRunOptions("Model is required".into()));
    }
    models::resolve(model).ok_or_else(|| match models::suggest(model) {
        Some(suggestion) => Error::InvalidRunOptions(format!(
            "Model {model} is not valid. Did you mean {suggestion}?"
        )),
        None => Error::InvalidRunOptions(format!("Model {model} is not valid")),
    })
}

fn build_version(request: &CompletionRequest, model_data: &ModelData) -> Version {
    let templated = request
        .variables
        .as_ref()
        .is_some_and(|v| !v.is_null());
    Version {
        id: String::new(),
        model: model_data.id.to_string(),
        provider: request.provider,
        temperature: request.temperature,
        top_p: request.top_p,
        max_output_tokens: request.max_output_tokens,
        presence_penalty: request.presence_penalty,
        frequency_penalty: request.frequency_penalty,
        parallel_tool_calls: request.parallel_tool_calls,
        tools: request.tools.clone(),
        tool_choice: request.tool_choice.clone(),
        output_schema: request.output_schema.clone(),
        reasoning_effort: request.reasoning_effort,
        reasoning_budget: request.reasoning_budget,
        prompt: templated.then(|| request.messages.clone()),
        use_cache: None,
        use_fallback: None,
    }
}

/// Clamp requested reasoning options into the model's supported window.
/// A missing per-effort entry means the effort is unsupported and dropped.
fn clamp_reasoning(
    budget: Option<&ModelReasoningBudget>,
    effort: Option<ReasoningEffort>,
    requested_budget: Option<u32>,
) -> (Option<ReasoningEffort>, Option<u32>) {
    let Some(budget) = budget else {
        return (None, None);
    };
    let final_budget = match (requested_budget, effort) {
        (Some(b), _) => Some(budget.clamp(b)),
        (None, Some(e)) => budget.budget_for_effort(e),
        (None, None) => None,
    };
    let final_effort = match (effort, requested_budget) {
        (Some(e), _) => budget.budget_for_effort(e).map(|_| e),
        (None, Some(b)) => Some(budget.effort_for_budget(budget.clamp(b))),
        (None, None) => None,
    };
    (final_effort, final_budget)
}

fn build_provider_request(
    request: &CompletionRequest,
    model_data: &'static ModelData,
    rendered: Vec<Message>,
) -> ProviderRequest {
    let (reasoning_effort, reasoning_budget) = clamp_reasoning(
        model_data.reasoning.as_ref(),
        request.reasoning_effort,
        request.reasoning_budget,
    );
    ProviderRequest {
        model: model_data.id.to_string(),
        messages: rendered,
        tools: request.tools.clone(),
        tool_choice: request.tool_choice.clone(),
        output_schema: request.output_schema.clone(),
        temperature: request.temperature,
        top_p: request.top_p,
        max_output_tokens: request.max_output_tokens,
        presence_penalty: request.presence_penalty,
        frequency_penalty: request.frequency_penalty,
        parallel_tool_calls: request.parallel_tool_calls,
        reasoning_effort,
        reasoning_budget,
        timeout: request.timeout,
    }
}

fn use_cache(request: &CompletionRequest) -> bool {
    match request.use_cache {
        CacheUsage::Never => false,
        CacheUsage::Always => true,
        // Sampling at zero temperature is deterministic enough to reuse.
        CacheUsage::Auto => request.temperature.unwrap_or(0.0) == 0.0,
    }
}

/// Clone a cached completion into a fresh record: new id, no new traces,
/// zero cost.
fn synthesize_cached(cached: AgentCompletion, elapsed_seconds: f64) -> AgentCompletion {
    AgentCompletion {
        id: uuid7::uuid7(),
        from_cache: true,
        traces: Vec::new(),
        cost_usd: Some(0.0),
        duration_seconds: Some(elapsed_seconds),
        ..cached
    }
}

/// Turn a provider completion into the runner output, parsing and
/// validating structured output when a schema was requested.
fn build_output(
    provider: Provider,
    completion: ProviderCompletion,
    output_schema: Option<&Value>,
) -> Result<RunnerOutput> {
    let output = match output_schema {
        Some(schema) => {
            let text = completion.text.as_deref().unwrap_or_default();
            if text.is_empty() && !completion.tool_call_requests.is_empty() {
                Value::Null
            } else {
                let value: Value =
                    serde_json::from_str(text).map_err(|e| Error::ProviderTerminal {
                        provider,
                        message: format!("model returned invalid JSON for the output schema: {e}"),
                        provider_status: None,
                    })?;
                if let Ok(validator) = jsonschema::validator_for(schema) {
                    if !validator.is_valid(&value) {
                        return Err(Error::ProviderTerminal {
                            provider,
                            message: "model output does not match the requested schema".into(),
                            provider_status: None,
                        });
                    }
                }
                value
            }
        }
        None => completion
            .text
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
    };
    Ok(RunnerOutput {
        output,
        tool_call_requests: completion.tool_call_requests,
        reasoning: completion.reasoning,
    })
}

/// Guarantees the one-completion-per-run contract on every exit path:
/// normal completion, failure, and cancellation (drop mid-stream).
struct EmitGuard {
    tenant_uid: i64,
    builder: Option<CompletionBuilder>,
    events: Arc<dyn EventRouter>,
}

impl EmitGuard {
    fn new(tenant_uid: i64, builder: CompletionBuilder, events: Arc<dyn EventRouter>) -> Self {
        EmitGuard {
            tenant_uid,
            builder: Some(builder),
            events,
        }
    }

    fn builder_mut(&mut self) -> &mut CompletionBuilder {
        // The builder is only taken on terminal paths, after which the
        // generator returns; reaching this afterwards is a logic error we
        // paper over with a throwaway builder rather than panicking.
        if self.builder.is_none() {
            self.builder = Some(CompletionBuilder::new(
                Agent::default(),
                Version::default(),
                AgentInput::default(),
                vec![],
                CompletionSource::Api,
                BTreeMap::new(),
            ));
        }
        #[allow(clippy::unwrap_used)] // just ensured above
        let builder = self.builder.as_mut().unwrap();
        builder
    }

    fn complete(&mut self, output: RunnerOutput) {
        if let Some(builder) = self.builder.take() {
            let completion = builder.build(output, None);
            self.events
                .send(Event::store_completion(self.tenant_uid, completion));
        }
    }

    fn fail(&mut self, error: ErrorPayload) {
        if let Some(builder) = self.builder.take() {
            let completion = builder.build(RunnerOutput::default(), Some(error));
            self.events
                .send(Event::store_completion(self.tenant_uid, completion));
        }
    }
}

impl Drop for EmitGuard {
    fn drop(&mut self) {
        if self.builder.is_some() {
            self.fail(ErrorPayload {
                code: "cancelled".into(),
                message: "the request was cancelled before the stream completed".into(),
                status_code: 499,
            });
        }
    }
}

#[cfg(test)]
mod tests;
