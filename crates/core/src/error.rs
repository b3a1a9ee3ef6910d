// crates/core/src/error.rs
use thiserror::Error;

use crate::jobs::types::JobId;

/// Errors surfaced by the job engine.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Research job not found: {job_id}")]
    NotFound { job_id: JobId },

    #[error("Research job already exists: {job_id}")]
    AlreadyExists { job_id: JobId },

    #[error("Stage '{stage}' failed: {message}")]
    StageFailure { stage: String, message: String },

    #[error("Sanitized state is not transport-safe: {0}")]
    SanitizationDefect(String),

    #[error("Subscriber buffer overflowed, {dropped} event(s) dropped")]
    DeliveryOverflow { dropped: u64 },
}

impl JobError {
    pub fn not_found(job_id: JobId) -> Self {
        Self::NotFound { job_id }
    }

    /// Text recorded as the job's `errorMessage`.
    ///
    /// Stage failures report the stage's own message verbatim so callers see
    /// exactly what the stage said (e.g. `"timeout"`).
    pub fn error_message(&self) -> String {
        match self {
            JobError::StageFailure { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Error returned by a stage function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StageError {
    pub message: String,
}

impl StageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<crate::llm::LlmError> for StageError {
    fn from(err: crate::llm::LlmError) -> Self {
        Self::new(err.to_string())
    }
}
