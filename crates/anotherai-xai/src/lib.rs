//! xAI provider adapter (OpenAI-compatible endpoint).

use async_trait::async_trait;

use anotherai::domain::Provider;
use anotherai::error::Result;
use anotherai::providers::http::create_llm_client;
use anotherai::providers::openai_compat::{self, AuthStyle, OpenAiCompatConfig};
use anotherai::providers::{ChunkStream, ProviderAdapter, ProviderCompletion, ProviderRequest};

/// xAI chat-completions endpoint.
pub const XAI_API_BASE: &str = "https://api.x.ai/v1/chat/completions";

#[derive(Debug, Clone)]
pub struct XaiAdapter {
    config: OpenAiCompatConfig,
    client: reqwest::Client,
}

impl XaiAdapter {
    pub fn new(api_key: impl Into<String>, url: Option<String>) -> Result<Self> {
        Ok(XaiAdapter {
            config: OpenAiCompatConfig {
                provider: Provider::XAi,
                url: url.unwrap_or_else(|| XAI_API_BASE.to_string()),
                api_key: api_key.into(),
                auth: AuthStyle::Bearer,
            },
            client: create_llm_client()?,
        })
    }

    /// Build from `XAI_API_KEY` (and optional `XAI_URL`).
    pub fn from_env() -> Option<Result<Self>> {
        let api_key = std::env::var("XAI_API_KEY").ok()?;
        Some(Self::new(api_key, std::env::var("XAI_URL").ok()))
    }
}

#[async_trait]
impl ProviderAdapter for XaiAdapter {
    fn name(&self) -> Provider {
        Provider::XAi
    }

    fn default_model(&self) -> &'static str {
        "grok-3-mini"
    }

    fn required_env(&self) -> &'static [&'static str] {
        &["XAI_API_KEY"]
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderCompletion> {
        openai_compat::complete(&self.client, &self.config, request).await
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<ChunkStream> {
        openai_compat::stream(&self.client, &self.config, request).await
    }
}
