// crates/server/src/routes/research.rs
//! Research job submission and status endpoints.
//!
//! - POST /research — submit a job, returns 202 with its id
//! - GET /research — every job, most recent first
//! - GET /research/{job_id} — one job's record

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use intelcraft_core::{JobId, JobRecord, ResearchParams};
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Body returned when a job is accepted.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct SubmitResponse {
    pub status: String,
    pub job_id: JobId,
    pub message: String,
    pub company: String,
}

/// Parse a path segment into a [`JobId`], rejecting anything that is not a UUID.
pub(crate) fn parse_job_id(raw: &str) -> ApiResult<JobId> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid job id: {raw}")))
}

fn normalize(mut params: ResearchParams) -> ApiResult<ResearchParams> {
    params.company = params.company.trim().to_string();
    if params.company.is_empty() {
        return Err(ApiError::BadRequest("company is required".into()));
    }
    for field in [
        &mut params.company_url,
        &mut params.industry,
        &mut params.hq_location,
        &mut params.help_description,
    ] {
        *field = field
            .take()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
    }
    Ok(params)
}

/// POST /api/research — submit a research job.
async fn submit_research(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ResearchParams>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let Json(params) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let params = normalize(params)?;
    let company = params.company.clone();

    let job_id = state.supervisor.submit(params)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            status: "accepted".to_string(),
            job_id,
            message: format!("Research started for {company}"),
            company,
        }),
    ))
}

/// GET /api/research — list all jobs.
async fn list_research(State(state): State<Arc<AppState>>) -> Json<Vec<JobRecord>> {
    Json(state.supervisor.list())
}

/// GET /api/research/{job_id} — one job's status record.
async fn get_research(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobRecord>> {
    let job_id = parse_job_id(&job_id)?;
    Ok(Json(state.supervisor.get_status(job_id)?))
}

/// Build the research router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/research", get(list_research).post(submit_research))
        .route("/research/{job_id}", get(get_research))
}
