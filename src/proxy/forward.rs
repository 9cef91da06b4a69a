//! Request forwarding and buffered upstream responses.

use super::SharedState;
use crate::error::ProxyError;
use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use flate2::read::GzDecoder;
use std::io::Read;
use std::time::Instant;

/// Largest inbound body buffered for translation. Passthrough bodies are streamed.
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

fn is_hop_by_hop_header(name_lower: &str) -> bool {
    matches!(
        name_lower,
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Header names listed in `Connection` are hop-by-hop too.
fn connection_tokens(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn filter_headers(src: &HeaderMap, drop: &[&str]) -> HeaderMap {
    let extra = connection_tokens(src);
    let mut out = HeaderMap::new();
    for (name, value) in src {
        let name_lower = name.as_str();
        if is_hop_by_hop_header(name_lower)
            || drop.contains(&name_lower)
            || extra.iter().any(|t| t == name_lower)
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Headers sent upstream: inbound minus hop-by-hop and framing, with the
/// bearer token replacing any client credentials, then the header hook.
pub(crate) fn outbound_headers(state: &SharedState, inbound: &HeaderMap) -> HeaderMap {
    let mut headers = filter_headers(inbound, &["host", "content-length", "authorization"]);
    if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", state.api_key)) {
        headers.insert(header::AUTHORIZATION, value);
    }
    if let Some(rewrite) = &state.rewrite_header {
        rewrite(&mut headers);
    }
    headers
}

fn response_headers(upstream: &HeaderMap) -> HeaderMap {
    filter_headers(upstream, &[])
}

/// Send one request upstream. `path` is the inbound `/v1/...` path.
pub async fn forward(
    state: &SharedState,
    method: Method,
    path: &str,
    query: Option<&str>,
    inbound: &HeaderMap,
    body: impl Into<reqwest::Body>,
) -> Result<reqwest::Response, ProxyError> {
    let url = state.upstream_url(path, query);
    tracing::debug!("Forwarding {} {} → {}", method, path, url);

    let body = body.into();
    let mut headers = outbound_headers(state, inbound);
    if body.as_bytes().is_none() {
        // Streamed bodies keep the caller's declared length.
        if let Some(length) = inbound.get(header::CONTENT_LENGTH) {
            headers.insert(header::CONTENT_LENGTH, length.clone());
        }
    }

    state
        .client
        .request(method, url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| ProxyError::Upstream(format!("request to upstream failed: {}", e)))
}

/// Relay an upstream response to the caller without buffering.
pub fn stream_back(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let headers = response_headers(upstream.headers());

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// A fully buffered upstream response, open to rewriting.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub async fn read(upstream: reqwest::Response) -> Result<Self, ProxyError> {
        let status = upstream.status();
        let headers = response_headers(upstream.headers());
        let body = upstream
            .bytes()
            .await
            .map_err(|e| ProxyError::Upstream(format!("failed to read upstream body: {}", e)))?;
        Ok(Self {
            status,
            headers,
            body,
        })
    }

    pub fn is_gzipped(&self) -> bool {
        self.headers
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("gzip"))
    }

    /// Decompress a gzip body in place and drop the encoding header.
    pub fn decode_content(&mut self) -> Result<(), ProxyError> {
        if !self.is_gzipped() {
            return Ok(());
        }
        let mut decoded = Vec::new();
        GzDecoder::new(self.body.as_ref())
            .read_to_end(&mut decoded)
            .map_err(|e| ProxyError::Translation(format!("failed to decompress body: {}", e)))?;
        self.headers.remove(header::CONTENT_ENCODING);
        self.replace_body(decoded);
        Ok(())
    }

    /// Swap the body and recompute `content-length`.
    pub fn replace_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
        self.headers
            .insert(header::CONTENT_LENGTH, HeaderValue::from(self.body.len()));
    }
}

impl IntoResponse for UpstreamResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Default `/v1/` handler: stream the request upstream verbatim apart from auth.
pub async fn proxy_passthrough(State(state): State<SharedState>, request: Request) -> Response {
    let started = Instant::now();
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();

    let response = match forward(
        &state,
        parts.method.clone(),
        &path,
        parts.uri.query(),
        &parts.headers,
        reqwest::Body::wrap_stream(body.into_data_stream()),
    )
    .await
    {
        Ok(upstream) => stream_back(upstream),
        Err(e) => {
            tracing::error!("[{}] {}", state.name, e);
            e.into_response()
        }
    };

    state.log(
        parts.method.as_str(),
        &path,
        state.upstream_url(&path, None).path(),
        None,
        response.status().as_u16(),
        started,
        false,
    );
    response
}

/// Default `/v1/models` handler: forward, buffer, then apply the rewrite hook.
pub async fn proxy_models(State(state): State<SharedState>, request: Request) -> Response {
    let started = Instant::now();
    let (parts, _) = request.into_parts();
    let path = parts.uri.path().to_string();

    let result = async {
        let upstream = forward(
            &state,
            parts.method.clone(),
            &path,
            parts.uri.query(),
            &parts.headers,
            Bytes::new(),
        )
        .await?;
        let mut response = UpstreamResponse::read(upstream).await?;
        (state.rewrite_models)(&mut response)?;
        Ok::<_, ProxyError>(response)
    }
    .await;

    let response = match result {
        Ok(response) => response.into_response(),
        Err(e) => {
            tracing::error!("[{}] {}", state.name, e);
            e.into_response()
        }
    };

    state.log(
        parts.method.as_str(),
        &path,
        state.upstream_url(&path, None).path(),
        None,
        response.status().as_u16(),
        started,
        false,
    );
    response
}
