use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use tracing::{debug, info};

use crate::agent::{ChunkStream, TextGenerator};
use crate::config::CredentialSource;
use crate::errors::AppError;
use crate::models::{ChatRequest, ModelInvocation, StreamChunk};

/// Field the chat widget adds for list keying; never sent to the model.
const CLIENT_ID_FIELD: &str = "id";

/// Parses and normalizes a raw chat request body.
///
/// Checks run in order and stop at the first failure: JSON syntax, then the
/// top-level object, then the `messages` array. The input is only read; the
/// normalized messages are copies.
pub fn parse_chat_request(body: &[u8]) -> Result<ChatRequest, AppError> {
    let value: Value = serde_json::from_slice(body).map_err(AppError::InvalidJson)?;

    let object = value.as_object().ok_or(AppError::InvalidBody)?;
    let messages = object
        .get("messages")
        .and_then(Value::as_array)
        .ok_or(AppError::InvalidBody)?;

    Ok(ChatRequest {
        messages: messages.iter().map(strip_client_id).collect(),
    })
}

fn strip_client_id(message: &Value) -> Value {
    match message {
        Value::Object(fields) => {
            let mut fields = fields.clone();
            fields.remove(CLIENT_ID_FIELD);
            Value::Object(fields)
        }
        other => other.clone(),
    }
}

/// A reply that has produced its first chunk (or finished empty) and is ready
/// to be streamed to the caller.
pub struct ReplyStream {
    pub first: Option<StreamChunk>,
    pub rest: ChunkStream,
}

#[derive(Clone)]
pub struct ChatService {
    credentials: Arc<dyn CredentialSource>,
    generator: Arc<dyn TextGenerator>,
    model: String,
}

impl ChatService {
    pub fn new(
        credentials: Arc<dyn CredentialSource>,
        generator: Arc<dyn TextGenerator>,
        model: impl Into<String>,
    ) -> Self {
        Self { credentials, generator, model: model.into() }
    }

    /// Validates `body`, starts the remote call, and waits for its first chunk.
    ///
    /// The credential is checked before the body is looked at. An upstream
    /// failure before the first chunk is returned as an error rather than an
    /// empty stream.
    pub async fn open_reply(&self, body: &[u8]) -> Result<ReplyStream, AppError> {
        let api_key = self
            .credentials
            .api_key()
            .ok_or_else(|| AppError::MissingCredential { var: self.credentials.name() })?;

        let request = parse_chat_request(body)?;
        let invocation = ModelInvocation::new(&self.model, request)?;
        info!(
            model = %invocation.model,
            messages = invocation.messages.len(),
            "starting chat reply"
        );

        let mut rest = self.generator.stream(&api_key, invocation).await?;
        let first = match rest.next().await {
            Some(Ok(chunk)) => Some(chunk),
            Some(Err(e)) => return Err(e),
            None => {
                debug!("upstream stream ended without output");
                None
            }
        };

        Ok(ReplyStream { first, rest })
    }
}
