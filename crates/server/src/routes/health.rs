// crates/server/src/routes/health.rs
//! Liveness plus a snapshot of the job engine.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use intelcraft_core::{JobRecord, JobStatus};
use serde::Serialize;

use crate::state::AppState;

/// Jobs known to the registry, split by phase.
#[derive(Debug, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct JobCounts {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub finished: usize,
}

impl JobCounts {
    fn tally(records: &[JobRecord]) -> Self {
        records.iter().fold(Self::default(), |mut counts, record| {
            counts.total += 1;
            match record.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Processing => counts.processing += 1,
                _ => counts.finished += 1,
            }
            counts
        })
    }
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub stages: Vec<String>,
    pub jobs: JobCounts,
}

/// GET /api/health - engine status, configured stages and job counts.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        stages: state.supervisor.stage_names(),
        jobs: JobCounts::tally(&state.supervisor.list()),
    })
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}
