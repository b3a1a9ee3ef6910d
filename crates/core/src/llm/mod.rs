// crates/core/src/llm/mod.rs
//! Text-generation integration used by the built-in research stages.
//!
//! Provides the `LlmProvider` trait and an OpenAI-compatible implementation.

pub mod factory;
pub mod openai;
pub mod provider;
pub mod types;

pub use factory::{create_provider, provider_or_unconfigured};
pub use openai::OpenAiProvider;
pub use provider::{LlmProvider, UnconfiguredProvider};
pub use types::{CompletionRequest, CompletionResponse, LlmError};
