// crates/server/src/lib.rs
//! Intelcraft server library.
//!
//! Axum HTTP server exposing research job submission, status lookup and
//! live status streams (SSE and WebSocket).

pub mod config;
pub mod error;
pub mod metrics;
pub mod routes;
pub mod state;

use std::sync::Arc;

pub use config::ServerArgs;
pub use error::*;
pub use metrics::{init_metrics, render_metrics};
pub use routes::api_routes;
pub use state::AppState;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes (health, research, streams, metrics)
/// - CORS (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
