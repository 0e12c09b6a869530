//! Groq provider adapter.
//!
//! Groq serves open-weight models behind an OpenAI-compatible endpoint;
//! the wire work is delegated to [`anotherai::providers::openai_compat`].

use async_trait::async_trait;

use anotherai::domain::Provider;
use anotherai::error::Result;
use anotherai::providers::http::create_llm_client;
use anotherai::providers::openai_compat::{self, AuthStyle, OpenAiCompatConfig};
use anotherai::providers::{ChunkStream, ProviderAdapter, ProviderCompletion, ProviderRequest};

/// Groq chat-completions endpoint.
pub const GROQ_API_BASE: &str = "https://api.groq.com/openai/v1/chat/completions";

#[derive(Debug, Clone)]
pub struct GroqAdapter {
    config: OpenAiCompatConfig,
    client: reqwest::Client,
}

impl GroqAdapter {
    pub fn new(api_key: impl Into<String>, url: Option<String>) -> Result<Self> {
        Ok(GroqAdapter {
            config: OpenAiCompatConfig {
                provider: Provider::Groq,
                url: url.unwrap_or_else(|| GROQ_API_BASE.to_string()),
                api_key: api_key.into(),
                auth: AuthStyle::Bearer,
            },
            client: create_llm_client()?,
        })
    }

    /// Build from `GROQ_API_KEY` (and optional `GROQ_URL`).
    pub fn from_env() -> Option<Result<Self>> {
        let api_key = std::env::var("GROQ_API_KEY").ok()?;
        Some(Self::new(api_key, std::env::var("GROQ_URL").ok()))
    }
}

#[async_trait]
impl ProviderAdapter for GroqAdapter {
    fn name(&self) -> Provider {
        Provider::Groq
    }

    fn default_model(&self) -> &'static str {
        "llama-3.3-70b"
    }

    fn required_env(&self) -> &'static [&'static str] {
        &["GROQ_API_KEY"]
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderCompletion> {
        openai_compat::complete(&self.client, &self.config, request).await
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<ChunkStream> {
        openai_compat::stream(&self.client, &self.config, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anotherai::domain::{Message, Role};
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn groq_reasoning_field_is_captured() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer gsk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": "4",
                        "reasoning": "2 + 2 is 4",
                    },
                    "finish_reason": "stop",
                }],
                "usage": {"prompt_tokens": 9, "completion_tokens": 1},
            })))
            .mount(&server)
            .await;

        let adapter = GroqAdapter::new(
            "gsk-test",
            Some(format!("{}/chat/completions", server.uri())),
        )
        .unwrap();
        let result = adapter
            .complete(&ProviderRequest {
                model: "llama-3.3-70b".into(),
                messages: vec![Message::with_text(Role::User, "2+2?")],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(result.text.as_deref(), Some("4"));
        assert_eq!(result.reasoning.as_deref(), Some("2 + 2 is 4"));
    }
}
