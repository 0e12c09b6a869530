//! Fireworks AI provider adapter.
//!
//! Fireworks speaks the OpenAI chat-completions dialect. Reasoning models
//! hosted there (DeepSeek R1 family) stream their chain of thought inside
//! `<think>…</think>` tags at the head of the output; the adapter splits
//! those into reasoning deltas so the rest of the pipeline never sees the
//! tags.

use async_trait::async_trait;
use futures::StreamExt;
use tracing::warn;

use anotherai::domain::Provider;
use anotherai::error::Result;
use anotherai::providers::http::create_llm_client;
use anotherai::providers::openai_compat::{self, AuthStyle, OpenAiCompatConfig};
use anotherai::providers::{
    ChunkStream, ParsedChunk, ProviderAdapter, ProviderCompletion, ProviderRequest,
};

/// Fireworks chat-completions endpoint.
pub const FIREWORKS_API_BASE: &str = "https://api.fireworks.ai/inference/v1/chat/completions";

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Splits `<think>` tagged reasoning out of content deltas.
///
/// State: `None` until the opening tag is seen (content before any tag
/// passes through), `Some(true)` while inside the tag, `Some(false)` once
/// the closing tag went by.
#[derive(Debug, Default)]
struct ThinkTagSplitter {
    thinking: Option<bool>,
}

impl ThinkTagSplitter {
    fn split(&mut self, mut chunk: ParsedChunk) -> ParsedChunk {
        let Some(delta) = chunk.delta.take() else {
            return chunk;
        };
        if self.thinking == Some(false) {
            chunk.delta = Some(delta);
            return chunk;
        }

        if self.thinking.is_none() {
            match delta.find(THINK_OPEN) {
                None => {
                    chunk.delta = Some(delta);
                    return chunk;
                }
                Some(index) => {
                    let pre = delta[..index].trim();
                    if !pre.is_empty() {
                        warn!(content = pre, "unexpected content before think tag");
                    }
                    self.thinking = Some(true);
                    return self.split_close(&delta[index + THINK_OPEN.len()..], chunk);
                }
            }
        }

        // Inside the tag: everything is reasoning until the closing tag.
        self.split_close(&delta, chunk)
    }

    fn split_close(&mut self, text: &str, mut chunk: ParsedChunk) -> ParsedChunk {
        match text.find(THINK_CLOSE) {
            None => {
                chunk.reasoning = merge(chunk.reasoning, text);
                chunk
            }
            Some(index) => {
                self.thinking = Some(false);
                chunk.reasoning = merge(chunk.reasoning, &text[..index]);
                let rest = &text[index + THINK_CLOSE.len()..];
                if !rest.is_empty() {
                    chunk.delta = Some(rest.to_string());
                }
                chunk
            }
        }
    }
}

fn merge(existing: Option<String>, addition: &str) -> Option<String> {
    if addition.is_empty() {
        return existing.filter(|s| !s.is_empty());
    }
    match existing {
        Some(mut s) => {
            s.push_str(addition);
            Some(s)
        }
        None => Some(addition.to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct FireworksAdapter {
    config: OpenAiCompatConfig,
    client: reqwest::Client,
}

impl FireworksAdapter {
    pub fn new(api_key: impl Into<String>, url: Option<String>) -> Result<Self> {
        Ok(FireworksAdapter {
            config: OpenAiCompatConfig {
                provider: Provider::Fireworks,
                url: url.unwrap_or_else(|| FIREWORKS_API_BASE.to_string()),
                api_key: api_key.into(),
                auth: AuthStyle::Bearer,
            },
            client: create_llm_client()?,
        })
    }

    /// Build from `FIREWORKS_API_KEY` (and optional `FIREWORKS_URL`).
    pub fn from_env() -> Option<Result<Self>> {
        let api_key = std::env::var("FIREWORKS_API_KEY").ok()?;
        Some(Self::new(api_key, std::env::var("FIREWORKS_URL").ok()))
    }
}

#[async_trait]
impl ProviderAdapter for FireworksAdapter {
    fn name(&self) -> Provider {
        Provider::Fireworks
    }

    fn default_model(&self) -> &'static str {
        "llama-4-maverick"
    }

    fn required_env(&self) -> &'static [&'static str] {
        &["FIREWORKS_API_KEY"]
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderCompletion> {
        let mut completion = openai_compat::complete(&self.client, &self.config, request).await?;
        // Buffered responses can carry the tags too.
        if let Some(text) = completion.text.take() {
            let mut splitter = ThinkTagSplitter::default();
            let split = splitter.split(ParsedChunk {
                delta: Some(text),
                ..Default::default()
            });
            completion.text = split.delta;
            if completion.reasoning.is_none() {
                completion.reasoning = split.reasoning;
            }
        }
        Ok(completion)
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<ChunkStream> {
        let inner = openai_compat::stream(&self.client, &self.config, request).await?;
        let mut splitter = ThinkTagSplitter::default();
        Ok(Box::pin(inner.map(move |item| {
            item.map(|chunk| splitter.split(chunk))
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(text: &str) -> ParsedChunk {
        ParsedChunk {
            delta: Some(text.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn reasoning_is_split_from_content() {
        let mut splitter = ThinkTagSplitter::default();
        let a = splitter.split(delta("<think>let me th"));
        assert_eq!(a.reasoning.as_deref(), Some("let me th"));
        assert_eq!(a.delta, None);

        let b = splitter.split(delta("ink</think>The answer"));
        assert_eq!(b.reasoning.as_deref(), Some("ink"));
        assert_eq!(b.delta.as_deref(), Some("The answer"));

        let c = splitter.split(delta(" is 42"));
        assert_eq!(c.reasoning, None);
        assert_eq!(c.delta.as_deref(), Some(" is 42"));
    }

    #[test]
    fn whole_think_block_in_one_chunk() {
        let mut splitter = ThinkTagSplitter::default();
        let out = splitter.split(delta("<think>short</think>done"));
        assert_eq!(out.reasoning.as_deref(), Some("short"));
        assert_eq!(out.delta.as_deref(), Some("done"));
    }

    #[test]
    fn untagged_streams_pass_through() {
        let mut splitter = ThinkTagSplitter::default();
        let out = splitter.split(delta("plain content"));
        assert_eq!(out.delta.as_deref(), Some("plain content"));
        assert_eq!(out.reasoning, None);
    }

    #[test]
    fn empty_chunks_are_untouched() {
        let mut splitter = ThinkTagSplitter::default();
        let out = splitter.split(ParsedChunk::default());
        assert_eq!(out.delta, None);
        assert_eq!(out.reasoning, None);
    }
}
