// crates/core/src/llm/provider.rs
//! LlmProvider trait defining the interface for text generation.

use async_trait::async_trait;

use super::types::{CompletionRequest, CompletionResponse, LlmError};

/// Trait for text-generation backends used by the built-in stages.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Run a completion with an optional system prompt and a user prompt.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Provider name for logging/display (e.g. "openai").
    fn name(&self) -> &str;

    /// Model identifier (e.g. "gpt-4o").
    fn model(&self) -> &str;
}

/// Stand-in used when no API key is configured. Every call fails.
#[derive(Debug, Default)]
pub struct UnconfiguredProvider;

#[async_trait]
impl LlmProvider for UnconfiguredProvider {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        Err(LlmError::NotAvailable(
            "text-generation provider not configured".to_string(),
        ))
    }

    fn name(&self) -> &str {
        "unconfigured"
    }

    fn model(&self) -> &str {
        "none"
    }
}
