//! OpenAI-compatible server in front of Gemini.
//!
//! Routes:
//! - GET / - Local base URL
//! - GET /v1/models - Static list of supported Gemini models
//! - POST /v1/chat/completions - Translated to `generateContent`, streamed or not
//! - POST /v1/embeddings - Translated to `batchEmbedContents` (or `predict` on Vertex)

mod client;
mod handlers;
pub mod mapping;
pub mod schema;
pub mod types;


pub use client::{GeminiBackend, GeminiClient, DEVELOPER_API_BASE_URL};

use crate::config::{
    Config, ConfigError, LogVerbosity, ProviderKind, DEFAULT_GEMINI_LOCATION, GEMINI_PROJECT_ENV,
};
use crate::error::ProxyError;
use crate::http::{create_client, create_proxy_client};
use crate::openai::{ModelEntry, ModelList};
use crate::proxy::{serve_on_loopback, MAX_BODY_BYTES};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Sent as the system instruction and as the opening user turn.
pub const SYSTEM_PROMPT: &str = "You are a task oriented system.
Be as brief as possible when answering the user.
Only give the required answer.
Do not give your thought process.
Use functions or tools as needed to complete the tasks given to you.
You are referred to as a tool.
Do not call functions or tools unless you need to.
Ensure you are passing the correct arguments to the functions or tools you call.
Do not move on to the next task until the current task is completed.
Do not make up arguments for tools.
Call functions one at a time to make sure you have the correct inputs.";

/// Model used to check credentials.
pub const VALIDATION_MODEL: &str = "gemini-2.5-flash";

const MODELS: [(&str, &str); 17] = [
    ("gemini-2.5-pro", "Gemini 2.5 Pro"),
    ("gemini-2.5-flash", "Gemini 2.5 Flash"),
    ("gemini-2.0-flash-001", "Gemini 2.0 Flash (001)"),
    ("gemini-1.5-flash-001", "Gemini 1.5 Flash (001)"),
    ("gemini-1.5-flash-002", "Gemini 1.5 Flash (002)"),
    ("gemini-1.5-pro-001", "Gemini 1.5 Pro (001)"),
    ("gemini-1.5-pro-002", "Gemini 1.5 Pro (002)"),
    ("gemini-1.0-pro-vision-001", "Gemini 1.0 Pro Vision (001)"),
    ("gemini-1.0-pro", "Gemini 1.0 Pro"),
    ("gemini-1.0-pro-001", "Gemini 1.0 Pro (001)"),
    ("gemini-1.0-pro-002", "Gemini 1.0 Pro (002)"),
    ("textembedding-gecko@001", "Text Embedding Gecko (001) [EN]"),
    ("textembedding-gecko@003", "Text Embedding Gecko (003) [EN]"),
    ("text-embedding-004", "Text Embedding 004 [EN]"),
    ("text-embedding-005", "Text Embedding 005 [EN]"),
    ("textembedding-gecko-multilingual@001", "Text Embedding Gecko Multilingual (001)"),
    ("text-multilingual-embedding-002", "Text Multilingual Embedding 002"),
];

pub fn static_models() -> ModelList {
    ModelList {
        object: "list".to_string(),
        data: MODELS
            .iter()
            .map(|(id, name)| ModelEntry {
                id: id.to_string(),
                object: "model".to_string(),
                name: Some(name.to_string()),
                owned_by: Some("google".to_string()),
            })
            .collect(),
    }
}

/// Runtime settings of the Gemini server.
#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub name: String,
    pub port: u16,
    pub log_verbosity: LogVerbosity,
    pub backend: GeminiBackend,
    /// Overrides the backend's default endpoint.
    pub base_url: Option<String>,
}

impl GeminiSettings {
    /// An access token selects Vertex AI (and then requires a project);
    /// otherwise the Developer API key is required.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let gemini = &config.gemini;
        let backend = match gemini.access_token.clone().filter(|t| !t.trim().is_empty()) {
            Some(access_token) => GeminiBackend::Vertex {
                project: gemini
                    .project
                    .clone()
                    .filter(|p| !p.trim().is_empty())
                    .ok_or(ConfigError::MissingValue(GEMINI_PROJECT_ENV))?,
                location: gemini
                    .location
                    .clone()
                    .filter(|l| !l.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_GEMINI_LOCATION.to_string()),
                access_token,
            },
            None => GeminiBackend::DeveloperApi {
                api_key: config.api_key()?,
            },
        };

        Ok(Self {
            name: config.provider_name(),
            port: config.server.port,
            log_verbosity: config.app.log_verbosity,
            backend,
            base_url: config
                .provider
                .base_url
                .clone()
                .filter(|u| !u.trim().is_empty()),
        })
    }

    pub fn new(port: u16, backend: GeminiBackend) -> Self {
        Self {
            name: ProviderKind::Gemini.display_name().to_string(),
            port,
            log_verbosity: LogVerbosity::default(),
            backend,
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

pub struct GeminiState {
    pub name: String,
    pub port: u16,
    pub log_verbosity: LogVerbosity,
    pub client: GeminiClient,
}

pub fn create_router(settings: &GeminiSettings) -> Result<Router, ProxyError> {
    let client = GeminiClient::new(
        create_proxy_client()?,
        settings.backend.clone(),
        settings.base_url.as_deref(),
    )?;
    let state = Arc::new(GeminiState {
        name: settings.name.clone(),
        port: settings.port,
        log_verbosity: settings.log_verbosity,
        client,
    });

    Ok(Router::new()
        .route("/", get(handlers::healthz))
        .route("/v1/models", get(handlers::list_models))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/embeddings", post(handlers::embeddings))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

/// Check the credentials with an authenticated token count.
pub async fn validate(settings: &GeminiSettings) -> Result<(), ProxyError> {
    let client = GeminiClient::new(
        create_client()?,
        settings.backend.clone(),
        settings.base_url.as_deref(),
    )?;
    client
        .count_tokens(VALIDATION_MODEL)
        .await
        .map_err(|e| ProxyError::Validation(format!("Invalid Google Credentials: {}", e)))
}

/// Serve until a shutdown signal arrives. Credentials are checked by `validate`.
pub async fn run(settings: GeminiSettings) -> Result<(), ProxyError> {
    let router = create_router(&settings)?;

    tracing::info!(
        "[model-provider: {}] Starting Gemini proxy on port {} ({:?})",
        settings.name,
        settings.port,
        settings.backend
    );

    serve_on_loopback(router, settings.port).await
}
