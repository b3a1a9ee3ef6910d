// crates/server/src/routes/mod.rs
//! API route handlers for the intelcraft server.

pub mod health;
pub mod metrics;
pub mod research;
pub mod stream;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined API router with all routes under /api prefix.
///
/// Routes:
/// - GET  /api/health - Health check
/// - POST /api/research - Submit a research job
/// - GET  /api/research - List all jobs, most recent first
/// - GET  /api/research/{job_id} - One job's status record
/// - GET  /api/research/{job_id}/stream - SSE stream of status events
/// - GET  /api/research/{job_id}/ws - WebSocket stream of status events
/// - GET  /api/metrics - Prometheus metrics
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", research::router())
        .nest("/api", stream::router())
        .nest("/api", metrics::router())
        .with_state(state)
}
