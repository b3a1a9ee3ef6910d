// crates/server/src/config.rs
//! Command-line and environment configuration.

use std::net::{IpAddr, SocketAddr};

use clap::Parser;
use intelcraft_core::config::{DEFAULT_LLM_ENDPOINT, DEFAULT_LLM_MODEL};
use intelcraft_core::{EngineConfig, LlmConfig, DEFAULT_SUBSCRIBER_BUFFER};

/// Default port for the server.
pub const DEFAULT_PORT: u16 = 8000;

#[derive(Parser, Debug, Clone)]
#[command(name = "intelcraft")]
#[command(about = "Company research job server with live status streaming", version)]
pub struct ServerArgs {
    /// Address to bind
    #[arg(long, env = "INTELCRAFT_HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Port to listen on (falls back to PORT)
    #[arg(short, long, env = "INTELCRAFT_PORT")]
    pub port: Option<u16>,

    /// Per-subscriber status event buffer
    #[arg(long, env = "INTELCRAFT_SUBSCRIBER_BUFFER", default_value_t = DEFAULT_SUBSCRIBER_BUFFER)]
    pub subscriber_buffer: usize,

    /// API key for the text-generation provider
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// OpenAI-compatible API base URL
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_LLM_ENDPOINT)]
    pub llm_endpoint: String,

    /// Model used by the research stages
    #[arg(long, env = "INTELCRAFT_MODEL", default_value = DEFAULT_LLM_MODEL)]
    pub model: String,

    /// Text-generation request timeout in seconds
    #[arg(long, env = "INTELCRAFT_LLM_TIMEOUT", default_value_t = 120)]
    pub llm_timeout_secs: u64,
}

impl ServerArgs {
    pub fn port(&self) -> u16 {
        self.port
            .or_else(|| std::env::var("PORT").ok().and_then(|p| p.parse().ok()))
            .unwrap_or(DEFAULT_PORT)
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            llm: LlmConfig {
                api_key: self.api_key.clone(),
                endpoint: self.llm_endpoint.clone(),
                model: self.model.clone(),
                timeout_secs: self.llm_timeout_secs,
                ..LlmConfig::default()
            },
            ..EngineConfig::default()
        }
        .with_subscriber_buffer(self.subscriber_buffer)
    }
}
