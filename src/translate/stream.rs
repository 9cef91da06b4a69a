//! Streaming direction: Responses API SSE events -> `chat.completion.chunk` events.

use crate::openai::responses::{
    OutputItem, ResponsesStreamEvent, ResponsesUsage, StreamResponseHeader,
};
use crate::openai::{
    ChatCompletionChunk, ChunkChoice, ChunkDelta, FinishReason, FunctionCallDelta, ToolCallDelta,
    Usage, ROLE_ASSISTANT,
};
use crate::sse::{done_event, error_event, json_event, SseEvent, SseParser, DONE};
use async_stream::stream;
use axum::response::sse::Event;
use futures::{Stream, StreamExt};
use std::collections::BTreeMap;
use std::convert::Infallible;

/// One translated unit of output.
#[derive(Debug, Clone)]
pub enum StreamItem {
    Chunk(ChatCompletionChunk),
    Error(String),
}

impl StreamItem {
    pub fn into_event(self) -> Event {
        match self {
            Self::Chunk(chunk) => json_event(&chunk),
            Self::Error(message) => error_event(&message),
        }
    }
}

/// Per-stream translation state. Chat streams have a single choice, so every
/// chunk uses index 0 and tool calls are numbered in order of appearance.
#[derive(Debug, Clone)]
pub struct ResponsesStreamTranslator {
    id: String,
    model: String,
    created: i64,
    role_sent: bool,
    /// Output index -> tool call index.
    tool_calls: BTreeMap<usize, usize>,
    refused: bool,
    finished: bool,
}

impl Default for ResponsesStreamTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponsesStreamTranslator {
    pub fn new() -> Self {
        Self {
            id: "response".to_string(),
            model: String::new(),
            created: chrono::Utc::now().timestamp(),
            role_sent: false,
            tool_calls: BTreeMap::new(),
            refused: false,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Translate one raw SSE event from the upstream.
    pub fn push_sse(&mut self, event: &SseEvent) -> Vec<StreamItem> {
        let data = event.data.trim();
        if data.is_empty() || data == DONE {
            return Vec::new();
        }
        match serde_json::from_str::<ResponsesStreamEvent>(data) {
            Ok(event) => self.transform_event(event),
            Err(e) => {
                tracing::error!("Failed to decode responses stream event: {}", e);
                vec![StreamItem::Error(format!(
                    "failed to decode responses API stream event: {}",
                    e
                ))]
            }
        }
    }

    pub fn transform_event(&mut self, event: ResponsesStreamEvent) -> Vec<StreamItem> {
        if self.finished {
            return Vec::new();
        }
        match event {
            ResponsesStreamEvent::Created { response } => {
                self.update_from_response(&response);
                Vec::new()
            }
            ResponsesStreamEvent::OutputItemAdded { output_index, item } => {
                self.handle_output_item_added(output_index, item)
            }
            ResponsesStreamEvent::OutputTextDelta { delta } => self.emit(
                ChunkDelta {
                    content: Some(delta),
                    ..Default::default()
                },
                None,
            ),
            ResponsesStreamEvent::RefusalDelta { delta } => {
                self.refused = true;
                self.emit(
                    ChunkDelta {
                        refusal: Some(delta),
                        ..Default::default()
                    },
                    None,
                )
            }
            ResponsesStreamEvent::FunctionCallArgumentsDelta {
                output_index,
                delta,
            } => {
                let index = self.tool_index(output_index);
                self.emit(
                    ChunkDelta {
                        tool_calls: vec![ToolCallDelta {
                            index,
                            function: FunctionCallDelta {
                                name: None,
                                arguments: Some(delta),
                            },
                            ..Default::default()
                        }],
                        ..Default::default()
                    },
                    None,
                )
            }
            ResponsesStreamEvent::Completed { response } => {
                let reason = if !self.tool_calls.is_empty() {
                    FinishReason::ToolCalls
                } else if self.refused {
                    FinishReason::ContentFilter
                } else {
                    FinishReason::Stop
                };
                self.finish(&response, reason)
            }
            ResponsesStreamEvent::Incomplete { response } => {
                self.finish(&response, FinishReason::Length)
            }
            ResponsesStreamEvent::Failed { response } => {
                self.finished = true;
                let message = response
                    .error
                    .map(|e| e.message)
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "response failed".to_string());
                vec![StreamItem::Error(message)]
            }
            ResponsesStreamEvent::Error { message, code } => {
                self.finished = true;
                let message = match code {
                    Some(code) => format!("{} ({})", message, code),
                    None => message,
                };
                vec![StreamItem::Error(message)]
            }
            ResponsesStreamEvent::Other => Vec::new(),
        }
    }

    fn update_from_response(&mut self, response: &StreamResponseHeader) {
        if !response.id.is_empty() {
            self.id = response.id.clone();
        }
        if !response.model.is_empty() {
            self.model = response.model.clone();
        }
        if response.created_at > 0.0 {
            self.created = response.created_at as i64;
        }
    }

    fn handle_output_item_added(&mut self, output_index: usize, item: OutputItem) -> Vec<StreamItem> {
        match item {
            OutputItem::FunctionCall {
                call_id,
                name,
                arguments,
                ..
            } => {
                let index = self.tool_index(output_index);
                self.emit(
                    ChunkDelta {
                        tool_calls: vec![ToolCallDelta {
                            index,
                            id: Some(call_id),
                            kind: Some("function".to_string()),
                            function: FunctionCallDelta {
                                name: Some(name),
                                arguments: Some(arguments),
                            },
                        }],
                        ..Default::default()
                    },
                    None,
                )
            }
            _ => Vec::new(),
        }
    }

    fn tool_index(&mut self, output_index: usize) -> usize {
        let next = self.tool_calls.len();
        *self.tool_calls.entry(output_index).or_insert(next)
    }

    fn finish(&mut self, response: &StreamResponseHeader, reason: FinishReason) -> Vec<StreamItem> {
        self.update_from_response(response);
        self.finished = true;

        let mut items = self.emit(ChunkDelta::default(), Some(reason));
        if let (Some(StreamItem::Chunk(chunk)), Some(usage)) = (items.last_mut(), &response.usage) {
            chunk.usage = Some(usage_from(usage));
        }
        items
    }

    fn emit(&mut self, mut delta: ChunkDelta, finish_reason: Option<FinishReason>) -> Vec<StreamItem> {
        if !self.role_sent {
            delta.role = Some(ROLE_ASSISTANT.to_string());
            self.role_sent = true;
        }
        vec![StreamItem::Chunk(ChatCompletionChunk::new(
            &self.id,
            self.created,
            &self.model,
            vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        ))]
    }
}

fn usage_from(usage: &ResponsesUsage) -> Usage {
    Usage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.total_tokens,
    }
}

/// Translate a streaming Responses API body into chat completion SSE events,
/// one output event per upstream event, terminated by `[DONE]`.
pub fn translate_stream(
    upstream: reqwest::Response,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    stream! {
        let mut parser = SseParser::new();
        let mut translator = ResponsesStreamTranslator::new();
        let mut bytes = upstream.bytes_stream();

        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    for event in parser.push(&chunk) {
                        for item in translator.push_sse(&event) {
                            yield Ok(item.into_event());
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("Upstream stream failed: {}", e);
                    yield Ok(error_event(&format!("upstream stream failed: {}", e)));
                    break;
                }
            }
        }
        for event in parser.finish() {
            for item in translator.push_sse(&event) {
                yield Ok(item.into_event());
            }
        }
        yield Ok(done_event());
    }
}
