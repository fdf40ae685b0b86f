use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::AppError;

/// Sampling temperature used for every chat turn.
pub const TEMPERATURE: f64 = 0.3;
/// Output token budget for every chat turn.
pub const MAX_OUTPUT_TOKENS: u64 = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One typed piece of a structured message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        #[serde(default, alias = "args")]
        input: Value,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_call_id: String,
        #[serde(default)]
        tool_name: Option<String>,
        #[serde(default, alias = "result")]
        output: Value,
    },
    StepStart,
    /// Part types this service does not forward (files, sources, data parts).
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// A single conversation turn as accepted on the wire.
///
/// The client-side `id` is stripped during normalization and is never part of
/// this type. Clients that send `parts` instead of `content` are accepted as
/// well.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "WireMessage")]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: MessageContent,
}

#[derive(Deserialize)]
struct WireMessage {
    role: MessageRole,
    #[serde(default)]
    content: Option<MessageContent>,
    #[serde(default)]
    parts: Option<Vec<ContentPart>>,
}

impl TryFrom<WireMessage> for ChatMessage {
    type Error = String;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let content = match (wire.content, wire.parts) {
            (Some(MessageContent::Text(text)), Some(parts))
                if text.is_empty() && !parts.is_empty() =>
            {
                MessageContent::Parts(parts)
            }
            (Some(content), _) => content,
            (None, Some(parts)) => MessageContent::Parts(parts),
            (None, None) => return Err("message has neither 'content' nor 'parts'".to_string()),
        };
        Ok(Self { role: wire.role, content })
    }
}

impl ChatMessage {
    /// Concatenated plain text of the message; reasoning and tool parts are skipped.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }
}

/// Inbound payload after normalization.
///
/// Each element is the client's message with `id` removed and every other
/// field untouched, in conversation order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<Value>,
}

/// Everything the remote model needs for one chat turn. Lives for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInvocation {
    pub model: String,
    pub temperature: f64,
    pub max_output_tokens: u64,
    pub messages: Vec<ChatMessage>,
}

impl ModelInvocation {
    /// Decodes the normalized messages into [`ChatMessage`]s.
    ///
    /// Fails with [`AppError::EmptyConversation`] when no user or assistant
    /// message carries text, since the model would have nothing to answer.
    pub fn new(model: impl Into<String>, request: ChatRequest) -> Result<Self, AppError> {
        let messages = request
            .messages
            .into_iter()
            .enumerate()
            .map(|(index, raw)| {
                serde_json::from_value::<ChatMessage>(raw).map_err(|e| AppError::InvalidMessage {
                    index,
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let answerable = messages
            .iter()
            .any(|m| m.role != MessageRole::System && !m.text().is_empty());
        if !answerable {
            return Err(AppError::EmptyConversation);
        }

        Ok(Self {
            model: model.into(),
            temperature: TEMPERATURE,
            max_output_tokens: MAX_OUTPUT_TOKENS,
            messages,
        })
    }
}

/// An incremental unit of model output, in generation order.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    TextDelta(String),
    /// Model "thinking" text, streamed separately from the answer.
    ReasoningDelta(String),
    /// A function call chosen by the model.
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    /// Upstream reported the end of generation.
    Finish,
}
