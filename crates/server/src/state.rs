// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use intelcraft_core::llm::provider_or_unconfigured;
use intelcraft_core::stages::default_stages;
use intelcraft_core::{EngineConfig, JobSupervisor, Stage};

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Owns the job registry and status broadcaster.
    pub supervisor: JobSupervisor,
}

impl AppState {
    /// State running the built-in research stages against the configured provider.
    pub fn new(config: &EngineConfig) -> Arc<Self> {
        let provider = provider_or_unconfigured(&config.llm);
        tracing::info!(provider = provider.name(), model = provider.model(), "text-generation provider ready");
        Self::with_stages(config, default_stages(provider))
    }

    /// State running a caller-supplied stage list.
    pub fn with_stages(config: &EngineConfig, stages: Vec<Arc<dyn Stage>>) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            supervisor: JobSupervisor::from_config(config, stages),
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
