//! OpenAI and Azure OpenAI provider adapters.
//!
//! Both speak the OpenAI chat-completions dialect and delegate the wire
//! work to [`anotherai::providers::openai_compat`]; they differ in
//! endpoint, auth header and environment.

use async_trait::async_trait;

use anotherai::domain::Provider;
use anotherai::error::Result;
use anotherai::providers::http::create_llm_client;
use anotherai::providers::openai_compat::{self, AuthStyle, OpenAiCompatConfig};
use anotherai::providers::{ChunkStream, ProviderAdapter, ProviderCompletion, ProviderRequest};

/// OpenAI chat-completions endpoint.
pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI adapter.
#[derive(Debug, Clone)]
pub struct OpenAiAdapter {
    config: OpenAiCompatConfig,
    client: reqwest::Client,
}

impl OpenAiAdapter {
    pub fn new(api_key: impl Into<String>, url: Option<String>) -> Result<Self> {
        Ok(OpenAiAdapter {
            config: OpenAiCompatConfig {
                provider: Provider::OpenAi,
                url: url.unwrap_or_else(|| OPENAI_API_BASE.to_string()),
                api_key: api_key.into(),
                auth: AuthStyle::Bearer,
            },
            client: create_llm_client()?,
        })
    }

    /// Build from `OPENAI_API_KEY` (and optional `OPENAI_URL`). Returns
    /// `None` when the key is unset.
    pub fn from_env() -> Option<Result<Self>> {
        let api_key = std::env::var("OPENAI_API_KEY").ok()?;
        Some(Self::new(api_key, std::env::var("OPENAI_URL").ok()))
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> Provider {
        Provider::OpenAi
    }

    fn default_model(&self) -> &'static str {
        "gpt-4.1-nano"
    }

    fn required_env(&self) -> &'static [&'static str] {
        &["OPENAI_API_KEY"]
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderCompletion> {
        openai_compat::complete(&self.client, &self.config, request).await
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<ChunkStream> {
        openai_compat::stream(&self.client, &self.config, request).await
    }
}

/// Azure OpenAI adapter. Azure routes by deployment url and authenticates
/// with an `api-key` header instead of a bearer token.
#[derive(Debug, Clone)]
pub struct AzureOpenAiAdapter {
    config: OpenAiCompatConfig,
    client: reqwest::Client,
}

impl AzureOpenAiAdapter {
    pub fn new(api_key: impl Into<String>, url: impl Into<String>) -> Result<Self> {
        Ok(AzureOpenAiAdapter {
            config: OpenAiCompatConfig {
                provider: Provider::AzureOpenai,
                url: url.into(),
                api_key: api_key.into(),
                auth: AuthStyle::Header("api-key"),
            },
            client: create_llm_client()?,
        })
    }

    /// Build from `AZURE_OPENAI_API_KEY` + `AZURE_OPENAI_URL`. Returns
    /// `None` unless both are set.
    pub fn from_env() -> Option<Result<Self>> {
        let api_key = std::env::var("AZURE_OPENAI_API_KEY").ok()?;
        let url = std::env::var("AZURE_OPENAI_URL").ok()?;
        Some(Self::new(api_key, url))
    }
}

#[async_trait]
impl ProviderAdapter for AzureOpenAiAdapter {
    fn name(&self) -> Provider {
        Provider::AzureOpenai
    }

    fn default_model(&self) -> &'static str {
        "gpt-4.1-nano"
    }

    fn required_env(&self) -> &'static [&'static str] {
        &["AZURE_OPENAI_API_KEY", "AZURE_OPENAI_URL"]
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderCompletion> {
        openai_compat::complete(&self.client, &self.config, request).await
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<ChunkStream> {
        openai_compat::stream(&self.client, &self.config, request).await
    }
}
