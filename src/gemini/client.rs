//! HTTP client for the Gemini Developer API and Vertex AI.

use super::types::{
    BatchEmbedContentsRequest, BatchEmbedContentsResponse, Content, EmbedContentRequest,
    GenerateContentRequest, GenerateContentResponse, GoogleErrorBody, PredictInstance,
    PredictRequest, PredictResponse, ROLE_USER,
};
use crate::error::ProxyError;
use crate::proxy::normalize_upstream;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::fmt;

pub const DEVELOPER_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Where requests go and how they are authenticated.
#[derive(Clone, PartialEq)]
pub enum GeminiBackend {
    /// Gemini Developer API, authenticated with an API key.
    DeveloperApi { api_key: String },
    /// Vertex AI, authenticated with an OAuth access token.
    Vertex {
        project: String,
        location: String,
        access_token: String,
    },
}

impl GeminiBackend {
    pub fn is_vertex(&self) -> bool {
        matches!(self, Self::Vertex { .. })
    }

    /// Base URL that `models/{model}:{method}` is appended to.
    pub fn default_base_url(&self) -> String {
        match self {
            Self::DeveloperApi { .. } => DEVELOPER_API_BASE_URL.to_string(),
            Self::Vertex {
                project, location, ..
            } => format!(
                "https://{location}-aiplatform.googleapis.com/v1/projects/{project}/locations/{location}/publishers/google"
            ),
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Self::DeveloperApi { api_key } => request.header(API_KEY_HEADER, api_key),
            Self::Vertex { access_token, .. } => request.bearer_auth(access_token),
        }
    }
}

impl fmt::Debug for GeminiBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeveloperApi { .. } => f
                .debug_struct("DeveloperApi")
                .field("api_key", &"<redacted>")
                .finish(),
            Self::Vertex {
                project, location, ..
            } => f
                .debug_struct("Vertex")
                .field("project", project)
                .field("location", location)
                .field("access_token", &"<redacted>")
                .finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    backend: GeminiBackend,
    base_url: String,
}

impl GeminiClient {
    /// `base_url` overrides the backend's default endpoint.
    pub fn new(
        http: Client,
        backend: GeminiBackend,
        base_url: Option<&str>,
    ) -> Result<Self, ProxyError> {
        let base = match base_url {
            Some(url) => url.to_string(),
            None => backend.default_base_url(),
        };
        let base_url = normalize_upstream(&base)?
            .as_str()
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            http,
            backend,
            base_url,
        })
    }

    pub fn backend(&self) -> &GeminiBackend {
        &self.backend
    }

    /// Path of a model method relative to the base URL, for logs.
    pub fn method_path(model: &str, method: &str) -> String {
        format!("models/{}:{}", model.trim_start_matches("models/"), method)
    }

    fn method_url(&self, model: &str, method: &str) -> String {
        format!("{}/{}", self.base_url, Self::method_path(model, method))
    }

    pub async fn generate(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, ProxyError> {
        let response = self
            .post(self.method_url(model, "generateContent"), request)
            .await?;
        decode(response).await
    }

    /// Start a streamed generation. The returned response carries SSE events
    /// with one `GenerateContentResponse` each.
    pub async fn stream_generate(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<Response, ProxyError> {
        let url = format!("{}?alt=sse", self.method_url(model, "streamGenerateContent"));
        self.post(url, request).await
    }

    /// Embed each input. Returns one vector per input and the prompt token
    /// count when the backend reports it.
    pub async fn embed(
        &self,
        model: &str,
        inputs: Vec<String>,
    ) -> Result<(Vec<Vec<f32>>, u64), ProxyError> {
        match &self.backend {
            GeminiBackend::DeveloperApi { .. } => {
                let name = format!("models/{}", model.trim_start_matches("models/"));
                let request = BatchEmbedContentsRequest {
                    requests: inputs
                        .into_iter()
                        .map(|text| EmbedContentRequest {
                            model: name.clone(),
                            content: Content::text("", text),
                        })
                        .collect(),
                };
                let response = self
                    .post(self.method_url(model, "batchEmbedContents"), &request)
                    .await?;
                let body: BatchEmbedContentsResponse = decode(response).await?;
                Ok((body.embeddings.into_iter().map(|e| e.values).collect(), 0))
            }
            GeminiBackend::Vertex { .. } => {
                let request = PredictRequest {
                    instances: inputs
                        .into_iter()
                        .map(|content| PredictInstance { content })
                        .collect(),
                };
                let response = self.post(self.method_url(model, "predict"), &request).await?;
                let body: PredictResponse = decode(response).await?;
                let tokens = body
                    .predictions
                    .iter()
                    .filter_map(|p| p.embeddings.statistics.as_ref())
                    .map(|s| s.token_count as u64)
                    .sum();
                Ok((
                    body.predictions
                        .into_iter()
                        .map(|p| p.embeddings.values)
                        .collect(),
                    tokens,
                ))
            }
        }
    }

    /// Cheap authenticated call used to check credentials.
    pub async fn count_tokens(&self, model: &str) -> Result<(), ProxyError> {
        let request = json!({"contents": [Content::text(ROLE_USER, "ping")]});
        self.post(self.method_url(model, "countTokens"), &request)
            .await
            .map(|_| ())
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        url: String,
        body: &T,
    ) -> Result<Response, ProxyError> {
        let response = self
            .backend
            .authorize(self.http.post(&url))
            .json(body)
            .send()
            .await
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;
        check_status(response).await
    }
}

/// Turn a non-2xx answer into an error carrying Google's message.
async fn check_status(response: Response) -> Result<Response, ProxyError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<GoogleErrorBody>(&body)
        .map(|b| b.error.message)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or(body);
    Err(ProxyError::UpstreamStatus {
        status: status.as_u16(),
        message,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ProxyError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ProxyError::Upstream(format!("failed to read response: {}", e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ProxyError::Translation(format!("failed to decode Gemini response: {}", e)))
}
