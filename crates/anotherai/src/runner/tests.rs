use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use serde_json::json;

use crate::domain::{
    Agent, CacheUsage, CompletionSource, CompletionStatus, FallbackOption, Message, Provider,
    ReasoningEffort, Role, Trace,
};
use crate::error::{Error, Result};
use crate::events::{Event, EventPayload, EventRouter};
use crate::models::ModelReasoningBudget;
use crate::providers::{
    AdapterFactory, ChunkStream, LlmUsage, ParsedChunk, ProviderAdapter, ProviderCompletion,
    ProviderRequest,
};
use crate::templates::TemplateManager;

use super::*;

#[derive(Clone)]
enum Behavior {
    Succeed(&'static str),
    /// Terminal success with no output and zero completion tokens.
    SucceedEmpty,
    FailTransient,
    FailTerminal,
    StreamChunks(Vec<ParsedChunk>),
    StreamFailMidway,
}

struct MockAdapter {
    provider: Provider,
    behavior: Behavior,
}

fn usage() -> LlmUsage {
    LlmUsage {
        prompt_token_count: Some(10.0),
        completion_token_count: Some(5.0),
        ..Default::default()
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for MockAdapter {
    fn name(&self) -> Provider {
        self.provider
    }

    fn default_model(&self) -> &'static str {
        "gpt-4.1-mini"
    }

    fn required_env(&self) -> &'static [&'static str] {
        &[]
    }

    async fn complete(&self, _request: &ProviderRequest) -> Result<ProviderCompletion> {
        match &self.behavior {
            Behavior::Succeed(text) => Ok(ProviderCompletion {
                text: Some((*text).to_string()),
                usage: usage(),
                finish_reason: Some("stop".into()),
                ..Default::default()
            }),
            Behavior::SucceedEmpty => Ok(ProviderCompletion {
                text: None,
                usage: LlmUsage {
                    prompt_token_count: Some(10.0),
                    completion_token_count: Some(0.0),
                    ..Default::default()
                },
                finish_reason: Some("stop".into()),
                ..Default::default()
            }),
            Behavior::FailTransient => Err(Error::ProviderTransient {
                provider: self.provider,
                message: "rate limited".into(),
                provider_status: Some(429),
            }),
            Behavior::FailTerminal => Err(Error::ProviderTerminal {
                provider: self.provider,
                message: "content policy".into(),
                provider_status: Some(422),
            }),
            Behavior::StreamChunks(_) | Behavior::StreamFailMidway => {
                Err(Error::internal("buffered call on streaming mock"))
            }
        }
    }

    async fn stream(&self, _request: &ProviderRequest) -> Result<ChunkStream> {
        match &self.behavior {
            Behavior::StreamChunks(chunks) => {
                let chunks = chunks.clone();
                Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))))
            }
            Behavior::StreamFailMidway => {
                let provider = self.provider;
                let items: Vec<Result<ParsedChunk>> = vec![
                    Ok(ParsedChunk {
                        delta: Some("par".into()),
                        ..Default::default()
                    }),
                    Err(Error::ProviderTransient {
                        provider,
                        message: "connection reset".into(),
                        provider_status: None,
                    }),
                ];
                Ok(Box::pin(futures::stream::iter(items)))
            }
            Behavior::FailTransient => Err(Error::ProviderTransient {
                provider: self.provider,
                message: "rate limited".into(),
                provider_status: Some(429),
            }),
            _ => Err(Error::internal("stream call on buffered mock")),
        }
    }
}

struct MockFactory {
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
}

impl MockFactory {
    fn new(behaviors: Vec<(Provider, Behavior)>) -> Self {
        let adapters = behaviors
            .into_iter()
            .map(|(provider, behavior)| {
                (
                    provider,
                    Arc::new(MockAdapter { provider, behavior }) as Arc<dyn ProviderAdapter>,
                )
            })
            .collect();
        MockFactory { adapters }
    }
}

impl AdapterFactory for MockFactory {
    fn adapter(&self, provider: Provider) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }
}

#[derive(Clone, Default)]
struct CaptureRouter {
    events: Arc<Mutex<Vec<Event>>>,
}

impl CaptureRouter {
    fn completions(&self) -> Vec<AgentCompletion> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::StoreCompletion { completion } => Some((**completion).clone()),
                _ => None,
            })
            .collect()
    }
}

impl EventRouter for CaptureRouter {
    fn send(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

fn runner(factory: MockFactory) -> (CompletionRunner, CaptureRouter) {
    let router = CaptureRouter::default();
    let runner = CompletionRunner::new(
        Arc::new(factory),
        Arc::new(NoCompletionCache),
        Arc::new(router.clone()),
        Arc::new(TemplateManager::new()),
    );
    (runner, router)
}

fn request(model: &str) -> CompletionRequest {
    CompletionRequest {
        model: model.to_string(),
        messages: vec![Message::with_text(Role::User, "What is the meaning of life?")],
        use_cache: CacheUsage::Never,
        source: CompletionSource::Api,
        ..Default::default()
    }
}

fn agent() -> Agent {
    Agent {
        id: "test-agent".into(),
        uid: 7,
        ..Default::default()
    }
}

#[tokio::test]
async fn buffered_success_emits_one_completion_with_one_llm_trace() {
    let (runner, router) = runner(MockFactory::new(vec![(
        Provider::OpenAi,
        Behavior::Succeed("42."),
    )]));
    let mut req = request("gpt-4.1-mini");
    req.provider = Some(Provider::OpenAi);

    let reply = runner.run(1, agent(), req).await.unwrap();
    let RunnerReply::Completion(completion) = reply else {
        panic!("expected buffered reply");
    };
    assert_eq!(completion.status, CompletionStatus::Success);
    assert!(completion.cost_usd.unwrap() > 0.0);
    assert_eq!(completion.traces.len(), 1);
    match &completion.traces[0] {
        Trace::Llm(t) => assert_eq!(t.provider, Provider::OpenAi),
        Trace::Tool(_) => panic!("expected llm trace"),
    }

    let stored = router.completions();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, completion.id);
    assert_eq!(stored[0].agent_output.messages[0].text(), "42.");
}

#[tokio::test]
async fn empty_responses_incur_no_cost() {
    let (runner, router) = runner(MockFactory::new(vec![(
        Provider::OpenAi,
        Behavior::SucceedEmpty,
    )]));
    let mut req = request("gpt-4.1-mini");
    req.provider = Some(Provider::OpenAi);

    let RunnerReply::Completion(completion) = runner.run(1, agent(), req).await.unwrap() else {
        panic!("expected buffered reply");
    };
    // Prompt tokens were consumed but nothing came back: the attempt is
    // free, as a known zero rather than a missing value.
    assert_eq!(completion.cost_usd, Some(0.0));
    match &completion.traces[0] {
        Trace::Llm(t) => {
            assert_eq!(t.cost_usd, 0.0);
            let usage = t.usage.as_ref().unwrap();
            assert_eq!(usage.prompt.cost_usd, 0.0);
            assert_eq!(usage.prompt.text_token_count, Some(10.0));
        }
        Trace::Tool(_) => panic!("expected llm trace"),
    }
    assert_eq!(router.completions().len(), 1);
}

#[tokio::test]
async fn preserve_credits_flows_to_the_emitted_completion() {
    let (runner, router) = runner(MockFactory::new(vec![(
        Provider::OpenAi,
        Behavior::Succeed("pong"),
    )]));
    let mut req = request("gpt-4.1-mini");
    req.provider = Some(Provider::OpenAi);
    req.preserve_credits = Some(true);
    assert!(req.non_billable());

    let RunnerReply::Completion(completion) = runner.run(1, agent(), req).await.unwrap() else {
        panic!("expected buffered reply");
    };
    // The upstream call is still priced and recorded; only the debit is
    // suppressed downstream through the flag.
    assert!(completion.cost_usd.unwrap() > 0.0);
    assert!(completion.preserve_credits);

    let stored = router.completions();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].preserve_credits);
}

#[tokio::test]
async fn transient_failure_falls_back_to_the_next_candidate() {
    let (runner, router) = runner(MockFactory::new(vec![
        (Provider::Groq, Behavior::FailTransient),
        (Provider::Fireworks, Behavior::Succeed("fallback says hi")),
    ]));
    let reply = runner.run(1, agent(), request("llama-3.3-70b")).await.unwrap();
    let RunnerReply::Completion(completion) = reply else {
        panic!("expected buffered reply");
    };
    assert_eq!(completion.status, CompletionStatus::Success);
    // The failed attempt is kept as a trace alongside the successful one.
    assert_eq!(completion.traces.len(), 2);
    let providers = &completion.metadata.as_ref().unwrap()["anotherai.providers"];
    assert_eq!(providers, &json!(["groq", "fireworks"]));
    assert_eq!(router.completions().len(), 1);
}

#[tokio::test]
async fn terminal_failure_stops_the_chain_and_still_emits() {
    let (runner, router) = runner(MockFactory::new(vec![
        (Provider::Groq, Behavior::FailTerminal),
        (Provider::Fireworks, Behavior::Succeed("never reached")),
    ]));
    let err = runner
        .run(1, agent(), request("llama-3.3-70b"))
        .await
        .err()
        .unwrap();
    assert!(!err.retryable());

    let stored = router.completions();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, CompletionStatus::Failure);
    assert_eq!(stored[0].agent_output.error.as_ref().unwrap().status_code, 422);
}

#[tokio::test]
async fn fallback_never_surfaces_the_first_error() {
    let (runner, router) = runner(MockFactory::new(vec![
        (Provider::Groq, Behavior::FailTransient),
        (Provider::Fireworks, Behavior::Succeed("never reached")),
    ]));
    let mut req = request("llama-3.3-70b");
    req.use_fallback = FallbackOption::Never;
    let err = runner.run(1, agent(), req).await.err().unwrap();
    assert!(err.retryable());
    assert_eq!(router.completions().len(), 1);
}

#[tokio::test]
async fn unknown_model_suggests_the_nearest_catalog_entry() {
    let (runner, router) = runner(MockFactory::new(vec![(
        Provider::OpenAi,
        Behavior::Succeed("unused"),
    )]));
    let err = runner
        .run(1, agent(), request("gpt-4.1-minii"))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::InvalidRunOptions(_)));
    assert!(err.to_string().contains("gpt-4.1-mini"));
    // Sanitization failures happen before the builder exists: no record.
    assert!(router.completions().is_empty());
}

#[tokio::test]
async fn structured_output_is_parsed_and_validated() {
    let (runner, _router) = runner(MockFactory::new(vec![(
        Provider::OpenAi,
        Behavior::Succeed(r#"{"capital": "Paris", "country": "France"}"#),
    )]));
    let mut req = request("gpt-4.1-mini");
    req.output_schema = Some(json!({
        "type": "object",
        "properties": {"capital": {"type": "string"}, "country": {"type": "string"}},
        "required": ["capital", "country"],
    }));
    let RunnerReply::Completion(completion) = runner.run(1, agent(), req).await.unwrap() else {
        panic!("expected buffered reply");
    };
    let object = completion.agent_output.messages[0].content[0].object.as_ref().unwrap();
    assert_eq!(object, &json!({"capital": "Paris", "country": "France"}));
}

#[tokio::test]
async fn invalid_structured_output_fails_the_completion() {
    let (runner, router) = runner(MockFactory::new(vec![(
        Provider::OpenAi,
        Behavior::Succeed("not json at all"),
    )]));
    let mut req = request("gpt-4.1-mini");
    req.output_schema = Some(json!({"type": "object"}));
    let err = runner.run(1, agent(), req).await.err().unwrap();
    assert!(err.to_string().contains("invalid JSON"));
    let stored = router.completions();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, CompletionStatus::Failure);
}

#[tokio::test]
async fn streaming_forwards_deltas_and_ends_with_a_single_final_chunk() {
    let chunks = vec![
        ParsedChunk {
            delta: Some("Hel".into()),
            ..Default::default()
        },
        ParsedChunk {
            delta: Some("lo".into()),
            ..Default::default()
        },
        ParsedChunk {
            usage: Some(usage()),
            finish_reason: Some("stop".into()),
            ..Default::default()
        },
    ];
    let (runner, router) = runner(MockFactory::new(vec![(
        Provider::OpenAi,
        Behavior::StreamChunks(chunks),
    )]));
    let mut req = request("gpt-4.1-mini");
    req.stream = true;

    let RunnerReply::Stream(mut stream) = runner.run(1, agent(), req).await.unwrap() else {
        panic!("expected stream reply");
    };
    let mut collected = Vec::new();
    while let Some(chunk) = stream.next().await {
        collected.push(chunk.unwrap());
    }
    let finals: Vec<_> = collected.iter().filter(|c| c.final_chunk).collect();
    assert_eq!(finals.len(), 1);
    assert!(collected.last().unwrap().final_chunk);
    let text: String = collected.iter().filter_map(|c| c.delta.clone()).collect();
    assert_eq!(text, "Hello");

    // The completion is emitted after the terminal chunk.
    let stored = router.completions();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, CompletionStatus::Success);
    assert!(stored[0].cost_usd.unwrap() > 0.0);
}

#[tokio::test]
async fn dropping_the_stream_emits_a_cancelled_failure() {
    let chunks = vec![
        ParsedChunk {
            delta: Some("partial".into()),
            ..Default::default()
        },
        ParsedChunk {
            delta: Some("more".into()),
            ..Default::default()
        },
    ];
    let (runner, router) = runner(MockFactory::new(vec![(
        Provider::OpenAi,
        Behavior::StreamChunks(chunks),
    )]));
    let mut req = request("gpt-4.1-mini");
    req.stream = true;

    let RunnerReply::Stream(mut stream) = runner.run(1, agent(), req).await.unwrap() else {
        panic!("expected stream reply");
    };
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.delta.as_deref(), Some("partial"));
    drop(stream);

    let stored = router.completions();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, CompletionStatus::Failure);
    assert_eq!(stored[0].agent_output.error.as_ref().unwrap().code, "cancelled");
}

#[tokio::test]
async fn stream_error_before_output_falls_back() {
    let (runner, router) = runner(MockFactory::new(vec![
        (Provider::Groq, Behavior::FailTransient),
        (
            Provider::Fireworks,
            Behavior::StreamChunks(vec![
                ParsedChunk {
                    delta: Some("ok".into()),
                    ..Default::default()
                },
                ParsedChunk {
                    usage: Some(usage()),
                    finish_reason: Some("stop".into()),
                    ..Default::default()
                },
            ]),
        ),
    ]));
    let mut req = request("llama-3.3-70b");
    req.stream = true;
    let RunnerReply::Stream(mut stream) = runner.run(1, agent(), req).await.unwrap() else {
        panic!("expected stream reply");
    };
    let mut deltas = String::new();
    while let Some(chunk) = stream.next().await {
        if let Some(d) = chunk.unwrap().delta {
            deltas.push_str(&d);
        }
    }
    assert_eq!(deltas, "ok");
    let stored = router.completions();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].traces.len(), 2);
}

#[tokio::test]
async fn stream_error_after_output_is_surfaced() {
    let (runner, router) = runner(MockFactory::new(vec![
        (Provider::Fireworks, Behavior::StreamFailMidway),
        (Provider::Groq, Behavior::Succeed("unused")),
    ]));
    let mut req = request("deepseek-r1");
    req.stream = true;
    let RunnerReply::Stream(mut stream) = runner.run(1, agent(), req).await.unwrap() else {
        panic!("expected stream reply");
    };
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.delta.as_deref(), Some("par"));
    let err = stream.next().await.unwrap().err().unwrap();
    assert!(err.retryable());
    assert!(stream.next().await.is_none());

    let stored = router.completions();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, CompletionStatus::Failure);
}

struct FixedCache {
    completion: AgentCompletion,
}

#[async_trait::async_trait]
impl CompletionCache for FixedCache {
    async fn cached_completion(
        &self,
        _tenant_uid: i64,
        _version_id: &str,
        _input_id: &str,
        _timeout: std::time::Duration,
    ) -> Result<Option<AgentCompletion>> {
        Ok(Some(self.completion.clone()))
    }
}

#[tokio::test]
async fn cache_hit_synthesizes_a_fresh_record_without_traces() {
    let (base_runner, _router) = runner(MockFactory::new(vec![(
        Provider::OpenAi,
        Behavior::Succeed("live"),
    )]));
    let RunnerReply::Completion(original) = base_runner
        .run(1, agent(), request("gpt-4.1-mini"))
        .await
        .unwrap()
    else {
        panic!("expected buffered reply");
    };

    let router = CaptureRouter::default();
    let cached_runner = CompletionRunner::new(
        Arc::new(MockFactory::new(vec![(
            Provider::OpenAi,
            Behavior::FailTerminal,
        )])),
        Arc::new(FixedCache {
            completion: (*original).clone(),
        }),
        Arc::new(router.clone()),
        Arc::new(TemplateManager::new()),
    );
    let mut req = request("gpt-4.1-mini");
    req.use_cache = CacheUsage::Always;
    let RunnerReply::Completion(hit) = cached_runner.run(1, agent(), req).await.unwrap() else {
        panic!("expected buffered reply");
    };
    assert!(hit.from_cache);
    assert!(hit.traces.is_empty());
    assert_eq!(hit.cost_usd, Some(0.0));
    assert_ne!(hit.id, original.id);
    // The cache hit is itself recorded.
    assert_eq!(router.completions().len(), 1);
}

#[tokio::test]
async fn variables_render_the_prompt_and_shape_the_input() {
    let (runner, _router) = runner(MockFactory::new(vec![(
        Provider::OpenAi,
        Behavior::Succeed("Paris"),
    )]));
    let mut req = request("gpt-4.1-mini");
    req.messages = vec![Message::with_text(
        Role::User,
        "What is the capital of {{ country }}?",
    )];
    req.variables = Some(json!({"country": "France"}));
    let RunnerReply::Completion(completion) = runner.run(1, agent(), req).await.unwrap() else {
        panic!("expected buffered reply");
    };
    assert_eq!(completion.messages[0].text(), "What is the capital of France?");
    // The version keeps the template; the input keeps the variables.
    assert_eq!(
        completion.version.prompt.as_ref().unwrap()[0].text(),
        "What is the capital of {{ country }}?"
    );
    assert_eq!(
        completion.agent_input.variables,
        Some(json!({"country": "France"}))
    );
    assert!(completion.agent_input.messages.is_none());
    assert!(!completion.agent_input.id.is_empty());
}

#[tokio::test]
async fn missing_template_variable_is_a_bad_request() {
    let (runner, _router) = runner(MockFactory::new(vec![(
        Provider::OpenAi,
        Behavior::Succeed("unused"),
    )]));
    let mut req = request("gpt-4.1-mini");
    req.messages = vec![Message::with_text(Role::User, "Hello {{ name }}")];
    req.variables = Some(json!({"other": 1}));
    let err = runner.run(1, agent(), req).await.err().unwrap();
    assert!(matches!(err, Error::BadRequest(_)));
}

#[test]
fn reasoning_clamps_to_the_model_window() {
    let budget = ModelReasoningBudget {
        min: 1024,
        max: 32_768,
        low: Some(2048),
        medium: Some(8192),
        high: None,
    };
    // Explicit budget is clamped.
    let (effort, clamped) = clamp_reasoning(Some(&budget), None, Some(64_000));
    assert_eq!(clamped, Some(32_768));
    assert_eq!(effort, Some(ReasoningEffort::Medium));
    // Unsupported effort is dropped.
    let (effort, clamped) = clamp_reasoning(Some(&budget), Some(ReasoningEffort::High), None);
    assert_eq!(effort, None);
    assert_eq!(clamped, None);
    // Supported effort maps to its budget.
    let (effort, clamped) = clamp_reasoning(Some(&budget), Some(ReasoningEffort::Low), None);
    assert_eq!(effort, Some(ReasoningEffort::Low));
    assert_eq!(clamped, Some(2048));
    // No reasoning support: both dropped.
    assert_eq!(clamp_reasoning(None, Some(ReasoningEffort::High), Some(1)), (None, None));
}

#[test]
fn version_id_is_computed_before_rendering() {
    let mut req = request("gpt-4.1-mini");
    req.messages = vec![Message::with_text(Role::User, "Hello {{ name }}")];
    req.variables = Some(json!({"name": "Ada"}));
    let model = crate::models::resolve("gpt-4.1-mini").unwrap();
    let a = build_version(&req, model).assign_id();
    req.variables = Some(json!({"name": "Marie"}));
    let b = build_version(&req, model).assign_id();
    // Different variables, same template: same version.
    assert_eq!(a.id, b.id);
}
