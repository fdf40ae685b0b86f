use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

/// Every way a chat request can fail before or while it is streamed.
///
/// The `Display` text carries diagnostic detail for the logs; the body sent
/// to the caller comes from [`AppError::client_message`] and is stable per
/// cause.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Configuration errors ─────────────────────────────────────────────────
    #[error("Credential '{var}' is not set")]
    MissingCredential { var: &'static str },

    // ── Client input errors ──────────────────────────────────────────────────
    #[error("Request body is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("Request body is not an object with a 'messages' array")]
    InvalidBody,

    #[error("Message {index} is malformed: {reason}")]
    InvalidMessage { index: usize, reason: String },

    #[error("Conversation has no message the model can answer")]
    EmptyConversation,

    // ── Upstream errors ──────────────────────────────────────────────────────
    #[error("Gemini client could not be built: {message}")]
    ClientSetup { message: String },

    #[error("Inference error: {message}")]
    InferenceError { message: String },
}

impl AppError {
    pub fn inference(message: impl Into<String>) -> Self {
        AppError::InferenceError { message: message.into() }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppError::InvalidJson(_)
                | AppError::InvalidBody
                | AppError::InvalidMessage { .. }
                | AppError::EmptyConversation
        )
    }

    pub fn status(&self) -> StatusCode {
        if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }

    /// The plain-text body returned to the caller.
    pub fn client_message(&self) -> String {
        match self {
            AppError::MissingCredential { var } => format!("Missing {var}"),
            AppError::InvalidJson(_) => "Invalid JSON payload".to_string(),
            AppError::InvalidBody
            | AppError::InvalidMessage { .. }
            | AppError::EmptyConversation => "Invalid request body".to_string(),
            AppError::ClientSetup { .. } | AppError::InferenceError { .. } => {
                "Failed to generate response".to_string()
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if self.is_client_error() {
            warn!(error = %self, "rejected chat request");
        } else {
            error!(error = %self, "chat request failed");
        }
        (status, self.client_message()).into_response()
    }
}
