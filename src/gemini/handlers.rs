//! HTTP handlers of the Gemini server.

use super::client::GeminiClient;
use super::mapping::{build_generate_request, to_chat_chunk, to_chat_completion, to_embedding_response};
use super::types::GenerateContentResponse;
use super::{static_models, GeminiState};
use crate::error::ProxyError;
use crate::logger::{log_exchange, Exchange};
use crate::openai::{ChatCompletionRequest, EmbeddingRequest};
use crate::sse::{done_event, error_event, json_event, SseEvent, SseParser, DONE};
use async_stream::stream;
use axum::{
    body::Bytes,
    extract::State,
    http::Method,
    response::{sse::Event, IntoResponse, Response, Sse},
    Json,
};
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

pub async fn healthz(State(state): State<Arc<GeminiState>>) -> String {
    format!("http://127.0.0.1:{}", state.port)
}

pub async fn list_models() -> impl IntoResponse {
    Json(static_models())
}

pub async fn chat_completions(State(state): State<Arc<GeminiState>>, body: Bytes) -> Response {
    let started = Instant::now();
    let request: ChatCompletionRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    let method = if request.stream {
        "streamGenerateContent"
    } else {
        "generateContent"
    };
    let response = match chat(&state, &request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("[{}] {}", state.name, e);
            e.into_response()
        }
    };

    state.log(
        "/v1/chat/completions",
        &GeminiClient::method_path(&request.model, method),
        Some(&request.model),
        response.status().as_u16(),
        started,
    );
    response
}

async fn chat(state: &GeminiState, request: &ChatCompletionRequest) -> Result<Response, ProxyError> {
    let native = build_generate_request(request, state.client.backend().is_vertex())?;
    let id = format!("chatcmpl-{}", uuid::Uuid::new_v4().simple());
    let created = chrono::Utc::now().timestamp();

    if request.stream {
        let upstream = state.client.stream_generate(&request.model, &native).await?;
        let events = chunk_stream(upstream, id, created, request.model.clone());
        return Ok(Sse::new(events).into_response());
    }

    let response = state.client.generate(&request.model, &native).await?;
    Ok(Json(to_chat_completion(&response, &id, created, &request.model)).into_response())
}

/// Relay each upstream SSE event as one chat completion chunk.
fn chunk_stream(
    upstream: reqwest::Response,
    id: String,
    created: i64,
    model: String,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    stream! {
        let mut parser = SseParser::new();
        let mut bytes = upstream.bytes_stream();
        let mut ended = false;

        while !ended {
            let events = match bytes.next().await {
                Some(Ok(chunk)) => parser.push(&chunk),
                Some(Err(e)) => {
                    tracing::error!("Gemini stream failed: {}", e);
                    yield Ok(error_event(&format!("upstream stream failed: {}", e)));
                    break;
                }
                None => {
                    ended = true;
                    parser.finish()
                }
            };
            for event in events {
                if let Some(event) = chunk_event(&event, &id, created, &model) {
                    yield Ok(event);
                }
            }
        }
        yield Ok(done_event());
    }
}

fn chunk_event(event: &SseEvent, id: &str, created: i64, model: &str) -> Option<Event> {
    let data = event.data.trim();
    if data.is_empty() || data == DONE {
        return None;
    }
    match serde_json::from_str::<GenerateContentResponse>(data) {
        Ok(response) => Some(json_event(&to_chat_chunk(&response, id, created, model))),
        Err(e) => {
            tracing::warn!("Undecodable Gemini event: {}", e);
            Some(error_event(&format!("failed to decode Gemini event: {}", e)))
        }
    }
}

pub async fn embeddings(State(state): State<Arc<GeminiState>>, body: Bytes) -> Response {
    let started = Instant::now();
    let request: EmbeddingRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };
    let model = request.model.clone();

    let response = match state.client.embed(&model, request.input.into_vec()).await {
        Ok((vectors, tokens)) => Json(to_embedding_response(&model, vectors, tokens)).into_response(),
        Err(e) => {
            tracing::error!("[{}] {}", state.name, e);
            e.into_response()
        }
    };

    let method = if state.client.backend().is_vertex() {
        "predict"
    } else {
        "batchEmbedContents"
    };
    state.log(
        "/v1/embeddings",
        &GeminiClient::method_path(&model, method),
        Some(&model),
        response.status().as_u16(),
        started,
    );
    response
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ProxyError> {
    serde_json::from_slice(body)
        .map_err(|e| ProxyError::BadRequest(format!("invalid request body: {}", e)))
}

impl GeminiState {
    fn log(&self, path: &str, upstream_path: &str, model: Option<&str>, status: u16, started: Instant) {
        log_exchange(
            &Exchange {
                provider: &self.name,
                method: Method::POST.as_str(),
                path,
                upstream_path,
                model,
                status,
                elapsed: started.elapsed(),
                translated: true,
            },
            self.log_verbosity,
        );
    }
}
