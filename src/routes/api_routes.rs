use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};

use crate::errors::AppError;
use crate::service::chat_service::ChatService;

// ── Handlers ─────────────────────────────────────────────────────────────────

/// POST `/api/chat` — validates the conversation and streams the model reply
/// as server-sent events.
///
/// The body is taken as raw bytes so that malformed JSON and a wrong shape
/// get their own responses instead of the extractor's.
pub async fn chat_handler(
    State(svc): State<ChatService>,
    body: Bytes,
) -> Result<Response, AppError> {
    let reply = svc.open_reply(&body).await?;
    Ok(reply.into_response())
}
