//! Upstream model access: open a token stream for a set of prompt messages.
//!
//! The relay only depends on the [`TokenSource`] trait, so tests drive it
//! with scripted token sequences and the service never touches provider
//! details. [`ProviderTokenSource`] is the production implementation on top
//! of `edgequake_llm`.

use crate::config::StreamConfig;
use crate::error::{DocStreamError, UpstreamError};
use crate::stream::{TokenStream, UpstreamFuture};
use edgequake_llm::traits::StreamChunk as LlmChunk;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use futures::{future, FutureExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info};

/// Something that can start a streamed model response.
pub trait TokenSource: Send + Sync {
    /// Start a response for `messages`.
    ///
    /// The returned future resolves once the upstream call is open; its
    /// stream then yields one item per streamed delta.
    fn open(&self, messages: Vec<ChatMessage>) -> UpstreamFuture;
}

/// [`TokenSource`] backed by an `edgequake_llm` provider.
pub struct ProviderTokenSource {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl ProviderTokenSource {
    pub fn new(provider: Arc<dyn LLMProvider>, options: CompletionOptions) -> Self {
        Self { provider, options }
    }

    /// Resolve the provider from `config` (see [`resolve_provider`]) and
    /// take the sampling options from it.
    pub fn from_config(config: &StreamConfig) -> Result<Self, DocStreamError> {
        Ok(Self::new(resolve_provider(config)?, build_options(config)))
    }
}

impl TokenSource for ProviderTokenSource {
    fn open(&self, messages: Vec<ChatMessage>) -> UpstreamFuture {
        let provider = Arc::clone(&self.provider);
        let options = self.options.clone();
        async move {
            info!(
                "Opening upstream stream: provider={}, model={}, {} messages, {} prompt chars",
                provider.name(),
                provider.model(),
                messages.len(),
                messages.iter().map(|m| m.content.chars().count()).sum::<usize>()
            );
            let chunks = provider
                .chat_with_tools_stream(&messages, &[], None, Some(&options))
                .await
                .map_err(|e| UpstreamError::Connect(e.to_string()))?;

            // Only non-empty content deltas become tokens; reasoning text,
            // tool-call deltas and finish markers are not part of the answer.
            let tokens: TokenStream = chunks
                .filter_map(|chunk| {
                    future::ready(match chunk {
                        Ok(LlmChunk::Content(text)) if !text.is_empty() => Some(Ok(text)),
                        Ok(_) => None,
                        Err(e) => Some(Err(UpstreamError::Stream(e.to_string()))),
                    })
                })
                .boxed();
            Ok(tokens)
        }
        .boxed()
    }
}

/// Build `CompletionOptions` from the stream config.
pub fn build_options(config: &StreamConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`).
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI** when `OPENAI_API_KEY` is set, with the configured model.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(config: &StreamConfig) -> Result<Arc<dyn LLMProvider>, DocStreamError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        return create_provider(name, config.model_or_default());
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_provider("openai", config.model_or_default());
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| DocStreamError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    debug!("Auto-detected provider {}", llm_provider.name());
    Ok(llm_provider)
}

fn create_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, DocStreamError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        DocStreamError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::translation_messages;
    use edgequake_llm::providers::{MockAgentProvider, MockProvider};

    async fn collect(source: &ProviderTokenSource) -> Result<Vec<String>, UpstreamError> {
        let tokens = source.open(translation_messages("Selam")).await?;
        tokens.collect::<Vec<_>>().await.into_iter().collect()
    }

    #[test]
    fn build_options_defaults() {
        let opts = build_options(&StreamConfig::default());
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(4096));
    }

    #[test]
    fn build_options_follows_config() {
        let config = StreamConfig::builder()
            .temperature(0.7)
            .max_tokens(512)
            .build()
            .unwrap();
        let opts = build_options(&config);
        assert_eq!(opts.temperature, Some(0.7));
        assert_eq!(opts.max_tokens, Some(512));
    }

    #[tokio::test]
    async fn content_deltas_become_tokens() {
        let provider = MockAgentProvider::new();
        provider.add_response("Hello there").await;
        let source = ProviderTokenSource::new(Arc::new(provider), CompletionOptions::default());

        // The finish marker is dropped; only the content delta remains.
        assert_eq!(collect(&source).await.unwrap(), vec!["Hello there".to_string()]);
    }

    #[tokio::test]
    async fn provider_without_streaming_fails_to_connect() {
        let source =
            ProviderTokenSource::new(Arc::new(MockProvider::new()), CompletionOptions::default());
        let err = collect(&source).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Connect(_)), "got {err:?}");
    }
}
