//! HTTP front-end: one request in, one WAV reply out.

use crate::audio::encode_wav;
use crate::error::AgentError;
use crate::relay::{CollectingSink, RelayOutcome, RequestHandler, Session, NOT_READY_MESSAGE};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

pub fn router(handler: Arc<RequestHandler>) -> Router {
    Router::new()
        .route("/process_audio", post(process_audio))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(handler)
}

/// Serve until the shutdown token fires
pub async fn serve(
    listener: TcpListener,
    handler: Arc<RequestHandler>,
    shutdown: CancellationToken,
) -> Result<(), AgentError> {
    log::info!("🌐 HTTP server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(handler))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    log::info!("🛑 HTTP server stopped");
    Ok(())
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn status_for(message: &str) -> StatusCode {
    if message == NOT_READY_MESSAGE {
        StatusCode::SERVICE_UNAVAILABLE
    } else if message.starts_with("Failed to process audio") {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

async fn health(State(handler): State<Arc<RequestHandler>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "agent_ready": handler.manager().is_initialized(),
    }))
}

async fn process_audio(State(handler): State<Arc<RequestHandler>>, body: Bytes) -> Response {
    if body.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "No audio data received");
    }

    let session = Session::new(format!("http-{}", &Uuid::new_v4().to_string()[..8]));
    let mut sink = CollectingSink::new();

    let outcome = match handler.handle_audio(&session, body.to_vec(), &mut sink).await {
        Ok(outcome) => outcome,
        Err(e) => {
            log::error!("❌ [{}] {}", session.client_id(), e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
        }
    };

    match outcome {
        RelayOutcome::Completed { .. } => {}
        RelayOutcome::Errored { cause, .. } => {
            let message = sink.errors.first().cloned().unwrap_or(cause);
            return error_response(status_for(&message), &message);
        }
        RelayOutcome::Cancelled { .. } => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Request was cancelled");
        }
    }

    match encode_wav(&sink.samples, handler.sample_rate()) {
        Ok(wav) => {
            log::info!(
                "📤 [{}] Returning {} samples as WAV",
                session.client_id(),
                sink.samples.len()
            );
            ([(header::CONTENT_TYPE, "audio/wav")], wav).into_response()
        }
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("Failed to assemble audio: {}", e),
        ),
    }
}
