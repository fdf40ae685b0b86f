use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{stream, Stream, StreamExt};
use rig::completion::{CompletionError, CompletionModel};
use rig::message::Message as RigMessage;
use rig::prelude::CompletionClient;
use rig::providers::gemini;
use rig::streaming::StreamedAssistantContent;
use serde_json::Value;
use tracing::{debug, error};

use crate::errors::AppError;
use crate::models::{
    ChatMessage, ContentPart, MessageContent, MessageRole, ModelInvocation, StreamChunk,
};

#[cfg(test)]
pub mod mock;

/// Forward-only sequence of model output, in generation order.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, AppError>> + Send>>;

/// Remote text-generation boundary.
///
/// Implementations start the call and hand back the live chunk stream.
/// Dropping the stream must release the underlying connection.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn stream(
        &self,
        api_key: &str,
        invocation: ModelInvocation,
    ) -> Result<ChunkStream, AppError>;
}

/// A conversation in rig's shape: system text, replayed turns, and the turn
/// the model answers.
struct RigConversation {
    preamble: Option<String>,
    history: Vec<RigMessage>,
    prompt: RigMessage,
}

/// Builds the rig message list from normalized [`ChatMessage`]s.
///
/// System messages become the preamble. Tool and reasoning parts are not
/// replayed because no tools are registered with the model.
fn to_rig_conversation(messages: &[ChatMessage]) -> Result<RigConversation, AppError> {
    let mut system = Vec::new();
    let mut turns = Vec::new();

    for (index, message) in messages.iter().enumerate() {
        if let MessageContent::Parts(parts) = &message.content {
            for part in parts {
                if let ContentPart::ToolCall { tool_call_id, tool_name, .. } = part {
                    debug!(index, %tool_call_id, %tool_name, "skipping tool-call part");
                }
            }
        }

        let text = message.text();
        if text.is_empty() {
            debug!(index, role = %message.role, "skipping message with no text");
            continue;
        }
        match message.role {
            MessageRole::System => system.push(text),
            MessageRole::User => turns.push(RigMessage::user(text)),
            MessageRole::Assistant => turns.push(RigMessage::assistant(text)),
        }
    }

    let prompt = turns.pop().ok_or(AppError::EmptyConversation)?;
    let preamble = (!system.is_empty()).then(|| system.join("\n\n"));

    Ok(RigConversation { preamble, history: turns, prompt })
}

/// Maps rig's streamed content onto [`StreamChunk`]s and appends
/// [`StreamChunk::Finish`] once upstream ends. Usage reports are dropped.
fn into_chunks<S, R>(upstream: S) -> ChunkStream
where
    S: Stream<Item = Result<StreamedAssistantContent<R>, CompletionError>> + Send + 'static,
    R: Clone + Unpin + Send + 'static,
{
    let chunks = upstream
        .filter_map(|item| async move {
            match item {
                Ok(content) => to_chunk(content).map(Ok),
                Err(e) => Some(Err(AppError::inference(e.to_string()))),
            }
        })
        .chain(stream::once(async { Ok(StreamChunk::Finish) }));
    Box::pin(chunks)
}

fn to_chunk<R>(content: StreamedAssistantContent<R>) -> Option<StreamChunk>
where
    R: Clone + Unpin,
{
    match content {
        StreamedAssistantContent::Text(text) => Some(StreamChunk::TextDelta(text.text)),
        StreamedAssistantContent::ReasoningDelta { reasoning, .. } => {
            Some(StreamChunk::ReasoningDelta(reasoning))
        }
        StreamedAssistantContent::Reasoning(reasoning) => {
            let text = serde_json::to_value(&reasoning)
                .map(|value| reasoning_text(&value))
                .unwrap_or_default();
            (!text.is_empty()).then_some(StreamChunk::ReasoningDelta(text))
        }
        StreamedAssistantContent::ToolCall { tool_call, .. } => Some(StreamChunk::ToolCall {
            id: tool_call.id,
            name: tool_call.function.name,
            arguments: tool_call.function.arguments,
        }),
        _ => None,
    }
}

/// Text of a serialized rig `Reasoning` block, either `reasoning: [String]`
/// or `content: [{ "text": .. }]`.
fn reasoning_text(value: &Value) -> String {
    value
        .get("reasoning")
        .or_else(|| value.get("content"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|item| item.as_str().or_else(|| item.get("text").and_then(Value::as_str)))
        .collect()
}

/// Streams chat turns from Google Gemini through rig's provider.
///
/// A client is built per request from the key read for that request, so a
/// rotated key takes effect immediately.
#[derive(Clone, Debug, Default)]
pub struct GeminiAgentService {
    base_url: Option<String>,
}

impl GeminiAgentService {
    pub fn new(base_url: Option<String>) -> Self {
        Self { base_url }
    }

    fn client(&self, api_key: &str) -> Result<gemini::Client, AppError> {
        let mut builder = gemini::Client::builder().api_key(api_key);
        if let Some(url) = &self.base_url {
            builder = builder.base_url(url);
        }
        builder
            .build()
            .map_err(|e| AppError::ClientSetup { message: e.to_string() })
    }
}

#[async_trait]
impl TextGenerator for GeminiAgentService {
    async fn stream(
        &self,
        api_key: &str,
        invocation: ModelInvocation,
    ) -> Result<ChunkStream, AppError> {
        let conversation = to_rig_conversation(&invocation.messages)?;
        let client = self.client(api_key)?;
        let model = client.completion_model(&invocation.model);

        let mut request = model
            .completion_request(conversation.prompt)
            .messages(conversation.history)
            .temperature(invocation.temperature)
            .max_tokens(invocation.max_output_tokens);
        if let Some(preamble) = conversation.preamble {
            request = request.preamble(preamble);
        }

        let response = request.stream().await.map_err(|e| {
            error!(model = %invocation.model, "Gemini stream failed to start: {e}");
            AppError::inference(e.to_string())
        })?;

        Ok(into_chunks(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rig::message::{Text, ToolCall};
    use serde_json::json;

    async fn map_items(
        items: Vec<Result<StreamedAssistantContent<()>, CompletionError>>,
    ) -> Vec<Result<StreamChunk, AppError>> {
        into_chunks(stream::iter(items)).collect().await
    }

    fn text(text: &str) -> StreamedAssistantContent<()> {
        StreamedAssistantContent::Text(Text { text: text.to_string() })
    }

    fn messages(raw: serde_json::Value) -> Vec<ChatMessage> {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn last_turn_becomes_the_prompt() {
        let conv = to_rig_conversation(&messages(json!([
            { "role": "user", "content": "first" },
            { "role": "assistant", "content": "reply" },
            { "role": "user", "content": "second" }
        ])))
        .unwrap();

        assert_eq!(conv.history.len(), 2);
        assert_eq!(conv.prompt, RigMessage::user("second"));
        assert_eq!(conv.history[1], RigMessage::assistant("reply"));
        assert!(conv.preamble.is_none());
    }

    #[test]
    fn system_messages_are_joined_into_the_preamble() {
        let conv = to_rig_conversation(&messages(json!([
            { "role": "system", "content": "Be brief." },
            { "role": "user", "content": "hi" },
            { "role": "system", "parts": [{ "type": "text", "text": "Answer in English." }] }
        ])))
        .unwrap();

        assert_eq!(conv.preamble.as_deref(), Some("Be brief.\n\nAnswer in English."));
        assert!(conv.history.is_empty());
        assert_eq!(conv.prompt, RigMessage::user("hi"));
    }

    #[test]
    fn messages_without_text_are_skipped() {
        let conv = to_rig_conversation(&messages(json!([
            { "role": "user", "content": "run it" },
            { "role": "assistant", "content": [
                { "type": "step-start" },
                { "type": "tool-call", "toolCallId": "c1", "toolName": "run", "input": {} }
            ] }
        ])))
        .unwrap();

        assert!(conv.history.is_empty());
        assert_eq!(conv.prompt, RigMessage::user("run it"));
    }

    #[test]
    fn empty_conversation_is_rejected() {
        assert!(matches!(
            to_rig_conversation(&[]),
            Err(AppError::EmptyConversation)
        ));
        let only_system = messages(json!([{ "role": "system", "content": "rules" }]));
        assert!(matches!(
            to_rig_conversation(&only_system),
            Err(AppError::EmptyConversation)
        ));
    }

    #[tokio::test]
    async fn text_deltas_map_in_order_and_end_with_finish() {
        let chunks = map_items(vec![
            Ok(text("Hel")),
            Ok(text("lo")),
            Ok(StreamedAssistantContent::Final(())),
        ])
        .await;

        let chunks: Vec<StreamChunk> = chunks.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            chunks,
            vec![
                StreamChunk::TextDelta("Hel".into()),
                StreamChunk::TextDelta("lo".into()),
                StreamChunk::Finish,
            ]
        );
    }

    #[tokio::test]
    async fn empty_upstream_still_finishes() {
        let chunks = map_items(vec![]).await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap(), &StreamChunk::Finish);
    }

    #[tokio::test]
    async fn upstream_errors_become_inference_errors() {
        let chunks = map_items(vec![
            Ok(text("partial")),
            Err(CompletionError::ProviderError("quota exceeded".into())),
        ])
        .await;

        assert_eq!(chunks[0].as_ref().unwrap(), &StreamChunk::TextDelta("partial".into()));
        let err = chunks[1].as_ref().unwrap_err();
        assert!(matches!(err, AppError::InferenceError { .. }));
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn reasoning_and_tool_calls_are_forwarded() {
        let call: ToolCall = serde_json::from_value(json!({
            "id": "call_1",
            "function": { "name": "lookup", "arguments": { "q": "rust" } }
        }))
        .unwrap();
        let chunks = map_items(vec![
            Ok(StreamedAssistantContent::ReasoningDelta {
                id: None,
                reasoning: "checking".into(),
            }),
            Ok(StreamedAssistantContent::ToolCall {
                tool_call: call,
                internal_call_id: "internal-1".into(),
            }),
        ])
        .await;

        let chunks: Vec<StreamChunk> = chunks.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            chunks,
            vec![
                StreamChunk::ReasoningDelta("checking".into()),
                StreamChunk::ToolCall {
                    id: "call_1".into(),
                    name: "lookup".into(),
                    arguments: json!({ "q": "rust" }),
                },
                StreamChunk::Finish,
            ]
        );
    }

    #[test]
    fn reasoning_text_reads_both_block_shapes() {
        assert_eq!(reasoning_text(&json!({ "id": null, "reasoning": ["a", "b"] })), "ab");
        assert_eq!(
            reasoning_text(&json!({ "content": [{ "type": "text", "text": "plan" }] })),
            "plan"
        );
        assert_eq!(reasoning_text(&json!({ "signature": "x" })), "");
    }
}
