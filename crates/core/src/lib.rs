// crates/core/src/lib.rs
pub mod config;
pub mod error;
pub mod jobs;
pub mod llm;
pub mod stages;

pub use config::{EngineConfig, LlmConfig};
pub use error::{JobError, StageError};
pub use jobs::*;
