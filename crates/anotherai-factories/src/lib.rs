//! Builds provider adapters from the process environment.
//!
//! A provider is "available" when its required environment variables are
//! set and its adapter constructed; the completion runner intersects this
//! set with each model's supported providers.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use anotherai::domain::Provider;
use anotherai::error::Result;
use anotherai::providers::{AdapterFactory, ProviderAdapter};

use anotherai_anthropic::AnthropicAdapter;
use anotherai_bedrock::BedrockAdapter;
use anotherai_fireworks::FireworksAdapter;
use anotherai_gemini::GeminiAdapter;
use anotherai_groq::GroqAdapter;
use anotherai_mistral::MistralAdapter;
use anotherai_openai::{AzureOpenAiAdapter, OpenAiAdapter};
use anotherai_xai::XaiAdapter;

/// Factory over the adapters whose environment is configured.
#[derive(Default)]
pub struct LocalAdapterFactory {
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
}

impl LocalAdapterFactory {
    /// Probe every provider's environment and build what is configured.
    pub async fn from_env() -> Self {
        let mut factory = LocalAdapterFactory::default();

        factory.insert_built(Provider::OpenAi, OpenAiAdapter::from_env());
        factory.insert_built(Provider::AzureOpenai, AzureOpenAiAdapter::from_env());
        factory.insert_built(Provider::Groq, GroqAdapter::from_env());
        factory.insert_built(Provider::Fireworks, FireworksAdapter::from_env());
        factory.insert_built(Provider::XAi, XaiAdapter::from_env());
        factory.insert_built(Provider::MistralAi, MistralAdapter::from_env());
        factory.insert_built(Provider::Anthropic, AnthropicAdapter::from_env());
        factory.insert_built(Provider::GoogleGemini, GeminiAdapter::gemini_from_env());
        factory.insert_built(Provider::Google, GeminiAdapter::google_from_env());
        match BedrockAdapter::from_env().await {
            Some(Ok(adapter)) => {
                factory
                    .adapters
                    .insert(Provider::AmazonBedrock, Arc::new(adapter));
            }
            Some(Err(e)) => warn!(provider = %Provider::AmazonBedrock, error = %e, "skipping misconfigured provider"),
            None => {}
        }

        info!(
            providers = ?factory.available_providers(),
            "provider adapters configured"
        );
        factory
    }

    fn insert_built<A: ProviderAdapter + 'static>(
        &mut self,
        provider: Provider,
        built: Option<Result<A>>,
    ) {
        match built {
            Some(Ok(adapter)) => {
                self.adapters.insert(provider, Arc::new(adapter));
            }
            Some(Err(e)) => {
                warn!(provider = %provider, error = %e, "skipping misconfigured provider");
            }
            None => {}
        }
    }

    /// Register an adapter explicitly (tests, custom endpoints).
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.name(), adapter);
        self
    }
}

impl AdapterFactory for LocalAdapterFactory {
    fn adapter(&self, provider: Provider) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_registration_makes_a_provider_available() {
        let adapter = GroqAdapter::new("gsk-test", None).unwrap();
        let factory = LocalAdapterFactory::default().with_adapter(Arc::new(adapter));
        assert!(factory.adapter(Provider::Groq).is_some());
        assert!(factory.adapter(Provider::OpenAi).is_none());
        assert_eq!(factory.available_providers(), vec![Provider::Groq]);
    }
}
