//! The `/v1/` handler that puts translation in front of the default proxy.

use super::{
    is_chat_completions_path, rewrite_upstream_response, translate_request, translate_stream,
    Translation,
};
use crate::error::ProxyError;
use crate::logger::extract_model;
use crate::proxy::{
    forward, proxy_passthrough, stream_back, CustomHandler, SharedState, UpstreamResponse,
    MAX_BODY_BYTES,
};
use axum::{
    body::to_bytes,
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    response::{sse::Sse, IntoResponse, Response},
    routing::any,
};
use std::sync::Arc;
use std::time::Instant;

/// Translates chat completions for prefixed models to the Responses API and
/// forwards everything else unchanged.
#[derive(Debug, Clone)]
pub struct ResponsesTranslator {
    model_prefix: Arc<str>,
}

impl ResponsesTranslator {
    pub fn new(model_prefix: impl Into<String>) -> Self {
        Self {
            model_prefix: Arc::from(model_prefix.into()),
        }
    }

    pub fn model_prefix(&self) -> &str {
        &self.model_prefix
    }

    /// Route to register as the custom `/v1/` handler.
    pub fn into_route(self) -> CustomHandler {
        any(
            move |State(state): State<SharedState>, request: Request| {
                let translator = self.clone();
                async move { translator.handle(state, request).await }
            },
        )
    }

    /// Only chat completions bodies are buffered; every other path streams
    /// through the default passthrough.
    pub async fn handle(&self, state: SharedState, request: Request) -> Response {
        if !is_chat_completions_path(request.uri().path()) {
            return proxy_passthrough(State(state), request).await;
        }

        let started = Instant::now();
        let (parts, body) = request.into_parts();
        let path = parts.uri.path().to_string();

        let body = match to_bytes(body, MAX_BODY_BYTES).await {
            Ok(body) => body,
            Err(e) => {
                return ProxyError::BadRequest(format!("failed to read request body: {}", e))
                    .into_response()
            }
        };
        let model = extract_model(&body);

        let translation = translate_request(body, &path, &self.model_prefix);
        let translated = translation.is_translated();
        let streaming = matches!(
            translation,
            Translation::Translated {
                streaming: true,
                ..
            }
        );

        let mut headers = parts.headers.clone();
        if translated {
            // Compressed SSE cannot be translated incrementally.
            headers.remove(header::ACCEPT_ENCODING);
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }

        let (body, upstream_path) = translation.into_parts();
        let result = forward(
            &state,
            parts.method.clone(),
            &upstream_path,
            parts.uri.query(),
            &headers,
            body,
        )
        .await;

        let response = match result {
            Err(e) => {
                tracing::error!("[{}] {}", state.name, e);
                e.into_response()
            }
            Ok(upstream) if !translated || upstream.status() != StatusCode::OK => {
                stream_back(upstream)
            }
            Ok(upstream) if streaming => Sse::new(translate_stream(upstream)).into_response(),
            Ok(upstream) => match buffered_translation(upstream).await {
                Ok(response) => response.into_response(),
                Err(e) => {
                    tracing::error!("[{}] {}", state.name, e);
                    e.into_response()
                }
            },
        };

        state.log(
            parts.method.as_str(),
            &path,
            state.upstream_url(&upstream_path, None).path(),
            model.as_deref(),
            response.status().as_u16(),
            started,
            translated,
        );
        response
    }
}

async fn buffered_translation(upstream: reqwest::Response) -> Result<UpstreamResponse, ProxyError> {
    let mut response = UpstreamResponse::read(upstream).await?;
    rewrite_upstream_response(&mut response)?;
    Ok(response)
}
