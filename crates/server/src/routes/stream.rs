// crates/server/src/routes/stream.rs
//! Live status streams for one research job.
//!
//! - GET /research/{job_id}/stream — SSE, one `status`-named event per update
//! - GET /research/{job_id}/ws — WebSocket, one JSON text frame per update
//!
//! Both start with a replay of the job's current status and end after the
//! terminal event. A client disconnect only drops its subscription.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::ws::{close_code, CloseFrame, Message, WebSocket},
    extract::{Path, State, WebSocketUpgrade},
    response::sse::{Event, KeepAlive, Sse},
    response::Response,
    routing::get,
    Router,
};
use intelcraft_core::{StatusEvent, Subscription};

use super::research::parse_job_id;
use crate::error::ApiResult;
use crate::state::AppState;

fn sse_event(event: &StatusEvent) -> Option<Event> {
    match Event::default().event(event.status.as_str()).json_data(event) {
        Ok(sse) => Some(sse),
        Err(e) => {
            tracing::warn!(job_id = %event.job_id, error = %e, "Failed to encode status event");
            None
        }
    }
}

/// GET /api/research/{job_id}/stream — SSE stream of status events.
async fn stream_research(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    let job_id = parse_job_id(&job_id)?;
    let subscription = state.supervisor.subscribe(job_id)?;
    tracing::debug!(job_id = %job_id, subscriber = subscription.id(), "SSE client subscribed");

    let stream = async_stream::stream! {
        let mut subscription = subscription;
        while let Some(event) = subscription.recv().await {
            if let Some(sse) = sse_event(&event) {
                yield Ok(sse);
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

/// GET /api/research/{job_id}/ws — WebSocket stream of status events.
async fn ws_research(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let job_id = parse_job_id(&job_id)?;
    let subscription = state.supervisor.subscribe(job_id)?;
    Ok(ws.on_upgrade(move |socket| forward_events(socket, subscription)))
}

async fn forward_events(mut socket: WebSocket, mut subscription: Subscription) {
    let job_id = subscription.job_id();
    tracing::debug!(job_id = %job_id, subscriber = subscription.id(), "WebSocket client subscribed");

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else {
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::NORMAL,
                            reason: "job finished".into(),
                        })))
                        .await;
                    return;
                };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, error = %e, "Failed to encode status event");
                        continue;
                    }
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    tracing::debug!(job_id = %job_id, "Client disconnected during status stream");
                    return;
                }
            }

            client_msg = socket.recv() => {
                match client_msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        tracing::debug!(job_id = %job_id, "WebSocket client closed");
                        return;
                    }
                    // Pings are answered by axum; other client frames are ignored.
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Build the stream router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/research/{job_id}/stream", get(stream_research))
        .route("/research/{job_id}/ws", get(ws_research))
}
