// crates/core/src/jobs/types.rs
//! Types for the research job engine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a research job (128-bit random UUID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle status of a research job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    /// Internal failure outside any stage (panic, registry inconsistency).
    Failed,
    /// A stage reported an error.
    Error,
}

impl JobStatus {
    /// `completed`, `failed` and `error` are final; nothing follows them.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input parameters of a research task, echoed back for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchParams {
    pub company: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hq_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_description: Option<String>,
}

impl ResearchParams {
    pub fn new(company: impl Into<String>) -> Self {
        Self {
            company: company.into(),
            ..Self::default()
        }
    }
}

/// Status record of one submitted job, as stored in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub status: JobStatus,
    #[serde(flatten)]
    pub params: ResearchParams,
    /// Transport-safe artifact tree; set only when the job completes.
    pub result: Option<serde_json::Value>,
    /// Set only when the job ends in `failed` or `error`.
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl JobRecord {
    /// A fresh `pending` record.
    pub fn new(id: JobId, params: ResearchParams) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobStatus::Pending,
            params,
            result: None,
            error_message: None,
            created_at: now,
            last_update: now,
        }
    }

    /// Merge the present fields of `update` and refresh `last_update`.
    pub fn apply(&mut self, update: JobUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(result) = update.result {
            self.result = Some(result);
        }
        if let Some(error_message) = update.error_message {
            self.error_message = Some(error_message);
        }
        self.last_update = Utc::now();
    }
}

/// Partial set of record fields for [`JobRegistry::update`](super::JobRegistry::update).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// Status update broadcast to the subscribers of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(job_id: JobId, status: JobStatus, message: impl Into<String>) -> Self {
        Self {
            job_id,
            status,
            message: message.into(),
            error: None,
            result: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Replay event describing a registry record to a late subscriber.
    pub fn from_record(record: &JobRecord) -> Self {
        Self {
            job_id: record.id,
            status: record.status,
            message: format!("Research job for {} is {}", record.params.company, record.status),
            error: record.error_message.clone(),
            result: record.result.clone(),
            timestamp: record.last_update,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_round_trips_through_display() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }

    #[test]
    fn test_job_ids_are_unique() {
        assert_ne!(JobId::new(), JobId::new());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Error.is_terminal());
    }

    #[test]
    fn test_record_apply_merges_present_fields() {
        let mut record = JobRecord::new(JobId::new(), ResearchParams::new("Acme"));
        let before = record.last_update;

        record.apply(JobUpdate::status(JobStatus::Processing));
        assert_eq!(record.status, JobStatus::Processing);
        assert!(record.result.is_none());
        assert!(record.last_update >= before);

        record.apply(JobUpdate::status(JobStatus::Error).with_error("timeout"));
        assert_eq!(record.status, JobStatus::Error);
        assert_eq!(record.error_message.as_deref(), Some("timeout"));
        assert_eq!(record.params.company, "Acme");
    }

    #[test]
    fn test_record_serializes_flat_params() {
        let mut params = ResearchParams::new("Acme");
        params.industry = Some("Robotics".to_string());
        let record = JobRecord::new(JobId::new(), params);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["company"], "Acme");
        assert_eq!(json["industry"], "Robotics");
        assert!(json.get("hq_location").is_none());
        assert!(json["result"].is_null());
    }

    #[test]
    fn test_status_event_skips_empty_optionals() {
        let event = StatusEvent::new(JobId::new(), JobStatus::Processing, "working");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"status\":\"processing\""));
        assert!(!json.contains("\"error\""));
        assert!(!json.contains("\"result\""));
    }

    #[test]
    fn test_replay_event_mirrors_record() {
        let mut record = JobRecord::new(JobId::new(), ResearchParams::new("Acme"));
        record.apply(JobUpdate::status(JobStatus::Failed).with_error("boom"));
        let event = StatusEvent::from_record(&record);
        assert_eq!(event.job_id, record.id);
        assert_eq!(event.status, JobStatus::Failed);
        assert_eq!(event.error.as_deref(), Some("boom"));
        assert!(event.is_terminal());
    }
}
