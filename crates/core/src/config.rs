// crates/core/src/config.rs
//! Engine configuration.

use crate::jobs::broadcast::DEFAULT_SUBSCRIBER_BUFFER;

pub const DEFAULT_LLM_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o";

/// Configuration for the job engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-subscriber queue capacity. Values below 1 are raised to 1.
    pub subscriber_buffer: usize,
    pub llm: LlmConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            llm: LlmConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_subscriber_buffer(mut self, capacity: usize) -> Self {
        self.subscriber_buffer = capacity.max(1);
        self
    }
}

/// Configuration for the text-generation provider.
#[derive(Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_LLM_ENDPOINT.into(),
            model: DEFAULT_LLM_MODEL.into(),
            temperature: 0.7,
            timeout_secs: 120,
        }
    }
}

impl LlmConfig {
    /// True when a non-blank API key is present.
    pub fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

// Keeps the key out of logs.
impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.subscriber_buffer, 64);
        assert_eq!(config.llm.endpoint, "https://api.openai.com/v1");
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.timeout_secs, 120);
        assert!(!config.llm.is_configured());
    }

    #[test]
    fn test_subscriber_buffer_minimum() {
        assert_eq!(EngineConfig::default().with_subscriber_buffer(0).subscriber_buffer, 1);
    }

    #[test]
    fn test_blank_key_is_not_configured() {
        let llm = LlmConfig {
            api_key: Some("  ".into()),
            ..LlmConfig::default()
        };
        assert!(!llm.is_configured());
        let llm = LlmConfig {
            api_key: Some("sk-test".into()),
            ..LlmConfig::default()
        };
        assert!(llm.is_configured());
        assert!(!format!("{llm:?}").contains("sk-test"));
    }
}
