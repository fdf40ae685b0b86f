//! Server-sent event encoding of a model reply, in the UI message stream
//! format the chat widget consumes.
//!
//! A spawned forwarder pulls chunks from the upstream stream, encodes them
//! and hands them to the response body through a bounded channel. When the
//! client goes away the channel closes, the forwarder stops, and the upstream
//! stream is dropped.

use std::convert::Infallible;

use axum::http::HeaderValue;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};

use crate::agent::ChunkStream;
use crate::models::StreamChunk;
use crate::service::chat_service::ReplyStream;

const CHANNEL_CAPACITY: usize = 64;
const STREAM_HEADER: &str = "x-vercel-ai-ui-message-stream";
const STREAM_ERROR_TEXT: &str = "Failed to generate response";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiEvent {
    Start {
        #[serde(rename = "messageId")]
        message_id: String,
    },
    StartStep,
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    ReasoningStart {
        id: String,
    },
    ReasoningDelta {
        id: String,
        delta: String,
    },
    ReasoningEnd {
        id: String,
    },
    ToolInputAvailable {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        input: Value,
    },
    FinishStep,
    Finish,
    Error {
        #[serde(rename = "errorText")]
        error_text: String,
    },
    /// Stream terminator, sent as the literal `[DONE]`.
    #[serde(skip)]
    Done,
}

impl UiEvent {
    fn into_sse(self) -> Event {
        if matches!(self, UiEvent::Done) {
            return Event::default().data("[DONE]");
        }
        match serde_json::to_string(&self) {
            Ok(json) => Event::default().data(json),
            Err(e) => {
                error!("failed to encode stream event: {e}");
                Event::default().data("{\"type\":\"error\",\"errorText\":\"encoding failed\"}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Reasoning,
}

impl BlockKind {
    fn prefix(self) -> &'static str {
        match self {
            BlockKind::Text => "text",
            BlockKind::Reasoning => "reasoning",
        }
    }

    fn start(self, id: String) -> UiEvent {
        match self {
            BlockKind::Text => UiEvent::TextStart { id },
            BlockKind::Reasoning => UiEvent::ReasoningStart { id },
        }
    }

    fn delta(self, id: String, delta: String) -> UiEvent {
        match self {
            BlockKind::Text => UiEvent::TextDelta { id, delta },
            BlockKind::Reasoning => UiEvent::ReasoningDelta { id, delta },
        }
    }

    fn end(self, id: String) -> UiEvent {
        match self {
            BlockKind::Text => UiEvent::TextEnd { id },
            BlockKind::Reasoning => UiEvent::ReasoningEnd { id },
        }
    }
}

/// Turns chunks into [`UiEvent`]s, keeping track of the open text or
/// reasoning block. At most one block is open at a time.
#[derive(Debug)]
pub struct UiMessageEncoder {
    message_id: String,
    open_block: Option<(BlockKind, String)>,
    next_part: usize,
    finished: bool,
}

impl UiMessageEncoder {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            open_block: None,
            next_part: 0,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn start(&self) -> Vec<UiEvent> {
        vec![
            UiEvent::Start { message_id: self.message_id.clone() },
            UiEvent::StartStep,
        ]
    }

    pub fn push(&mut self, chunk: StreamChunk) -> Vec<UiEvent> {
        if self.finished {
            return Vec::new();
        }
        match chunk {
            StreamChunk::TextDelta(delta) => self.delta(BlockKind::Text, delta),
            StreamChunk::ReasoningDelta(delta) => self.delta(BlockKind::Reasoning, delta),
            StreamChunk::ToolCall { id, name, arguments } => {
                let mut events = self.close_block();
                events.push(UiEvent::ToolInputAvailable {
                    tool_call_id: id,
                    tool_name: name,
                    input: arguments,
                });
                events
            }
            StreamChunk::Finish => self.finish(),
        }
    }

    /// Closes the message. Does nothing once the message is finished.
    pub fn finish(&mut self) -> Vec<UiEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let mut events = self.close_block();
        events.extend([UiEvent::FinishStep, UiEvent::Finish, UiEvent::Done]);
        events
    }

    /// Reports a mid-stream failure. Events already emitted stay delivered.
    pub fn fail(&mut self, error_text: impl Into<String>) -> Vec<UiEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let mut events = self.close_block();
        events.push(UiEvent::Error { error_text: error_text.into() });
        events.push(UiEvent::Done);
        events
    }

    fn delta(&mut self, kind: BlockKind, delta: String) -> Vec<UiEvent> {
        let mut events = Vec::new();
        let reusable = match &self.open_block {
            Some((open, id)) if *open == kind => Some(id.clone()),
            _ => None,
        };
        let id = match reusable {
            Some(id) => id,
            None => {
                events.extend(self.close_block());
                let id = format!("{}-{}", kind.prefix(), self.next_part);
                self.next_part += 1;
                self.open_block = Some((kind, id.clone()));
                events.push(kind.start(id.clone()));
                id
            }
        };
        events.push(kind.delta(id, delta));
        events
    }

    fn close_block(&mut self) -> Vec<UiEvent> {
        self.open_block
            .take()
            .map(|(kind, id)| vec![kind.end(id)])
            .unwrap_or_default()
    }
}

async fn send_all(
    tx: &mpsc::Sender<UiEvent>,
    events: Vec<UiEvent>,
) -> Result<(), mpsc::error::SendError<UiEvent>> {
    for event in events {
        tx.send(event).await?;
    }
    Ok(())
}

async fn forward(
    first: Option<StreamChunk>,
    mut upstream: ChunkStream,
    mut encoder: UiMessageEncoder,
    tx: mpsc::Sender<UiEvent>,
) {
    if send_all(&tx, encoder.start()).await.is_err() {
        debug!("client disconnected before the stream started");
        return;
    }
    if let Some(chunk) = first {
        if send_all(&tx, encoder.push(chunk)).await.is_err() {
            debug!("client disconnected; dropping upstream stream");
            return;
        }
    }

    while !encoder.is_finished() {
        let next = tokio::select! {
            biased;
            _ = tx.closed() => {
                debug!("client disconnected; dropping upstream stream");
                return;
            }
            next = upstream.next() => next,
        };

        let events = match next {
            Some(Ok(chunk)) => encoder.push(chunk),
            Some(Err(e)) => {
                error!("upstream stream failed mid-reply: {e}");
                encoder.fail(STREAM_ERROR_TEXT)
            }
            None => encoder.finish(),
        };
        if send_all(&tx, events).await.is_err() {
            debug!("client disconnected; dropping upstream stream");
            return;
        }
    }
}

/// Spawns the forwarder and returns the receiving end of its event channel.
pub fn spawn_forwarder(
    first: Option<StreamChunk>,
    upstream: ChunkStream,
    encoder: UiMessageEncoder,
) -> ReceiverStream<UiEvent> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(forward(first, upstream, encoder, tx));
    ReceiverStream::new(rx)
}

impl IntoResponse for ReplyStream {
    fn into_response(self) -> Response {
        let encoder = UiMessageEncoder::new(uuid::Uuid::new_v4().to_string());
        let events = spawn_forwarder(self.first, self.rest, encoder)
            .map(|event| Ok::<Event, Infallible>(event.into_sse()));

        let mut response = Sse::new(events)
            .keep_alive(KeepAlive::default())
            .into_response();
        let headers = response.headers_mut();
        headers.insert(STREAM_HEADER, HeaderValue::from_static("v1"));
        headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
        response
    }
}
