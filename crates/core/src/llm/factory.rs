// crates/core/src/llm/factory.rs
//! Builds an LlmProvider from configuration.

use std::sync::Arc;

use super::openai::OpenAiProvider;
use super::provider::{LlmProvider, UnconfiguredProvider};
use super::types::LlmError;
use crate::config::LlmConfig;

/// Create an LLM provider based on the given configuration.
///
/// Returns `NotAvailable` when no API key is configured.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.api_key.as_deref().map(str::trim) {
        Some(key) if !key.is_empty() => Ok(Arc::new(OpenAiProvider::new(config, key)?)),
        _ => Err(LlmError::NotAvailable(
            "no API key configured (set OPENAI_API_KEY)".to_string(),
        )),
    }
}

/// Like [`create_provider`], but falls back to [`UnconfiguredProvider`].
pub fn provider_or_unconfigured(config: &LlmConfig) -> Arc<dyn LlmProvider> {
    match create_provider(config) {
        Ok(provider) => provider,
        Err(err) => {
            tracing::warn!(error = %err, "text-generation provider unavailable, research stages will fail");
            Arc::new(UnconfiguredProvider)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CompletionRequest;

    #[test]
    fn test_missing_key_is_not_available() {
        let result = create_provider(&LlmConfig::default());
        assert!(matches!(result, Err(LlmError::NotAvailable(_))));
    }

    #[test]
    fn test_key_creates_openai_provider() {
        let config = LlmConfig {
            api_key: Some("sk-test".into()),
            ..LlmConfig::default()
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.model(), "gpt-4o");
    }

    #[tokio::test]
    async fn test_unconfigured_fallback_fails_calls() {
        let provider = provider_or_unconfigured(&LlmConfig::default());
        assert_eq!(provider.name(), "unconfigured");
        let err = provider.complete(CompletionRequest::new("hi")).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Provider not available: text-generation provider not configured"
        );
    }
}
