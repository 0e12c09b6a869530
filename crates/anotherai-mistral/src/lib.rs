//! Mistral provider adapter (OpenAI-compatible endpoint).

use async_trait::async_trait;

use anotherai::domain::Provider;
use anotherai::error::Result;
use anotherai::providers::http::create_llm_client;
use anotherai::providers::openai_compat::{self, AuthStyle, OpenAiCompatConfig};
use anotherai::providers::{ChunkStream, ProviderAdapter, ProviderCompletion, ProviderRequest};

/// Mistral chat-completions endpoint.
pub const MISTRAL_API_BASE: &str = "https://api.mistral.ai/v1/chat/completions";

#[derive(Debug, Clone)]
pub struct MistralAdapter {
    config: OpenAiCompatConfig,
    client: reqwest::Client,
}

impl MistralAdapter {
    pub fn new(api_key: impl Into<String>, url: Option<String>) -> Result<Self> {
        Ok(MistralAdapter {
            config: OpenAiCompatConfig {
                provider: Provider::MistralAi,
                url: url.unwrap_or_else(|| MISTRAL_API_BASE.to_string()),
                api_key: api_key.into(),
                auth: AuthStyle::Bearer,
            },
            client: create_llm_client()?,
        })
    }

    /// Build from `MISTRAL_API_KEY` (and optional `MISTRAL_URL`).
    pub fn from_env() -> Option<Result<Self>> {
        let api_key = std::env::var("MISTRAL_API_KEY").ok()?;
        Some(Self::new(api_key, std::env::var("MISTRAL_URL").ok()))
    }
}

#[async_trait]
impl ProviderAdapter for MistralAdapter {
    fn name(&self) -> Provider {
        Provider::MistralAi
    }

    fn default_model(&self) -> &'static str {
        "mistral-large-2"
    }

    fn required_env(&self) -> &'static [&'static str] {
        &["MISTRAL_API_KEY"]
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderCompletion> {
        openai_compat::complete(&self.client, &self.config, request).await
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<ChunkStream> {
        openai_compat::stream(&self.client, &self.config, request).await
    }
}
