//! Generic OpenAI-style reverse proxy.
//!
//! Routes:
//! - GET / - Local base URL, used by the parent process for discovery
//! - /v1/models - Upstream model list, passed through the rewrite hook
//! - /v1/{*rest} - Everything else, forwarded with the configured API key
//!
//! Any of these can be replaced by registering a custom handler for the same path.

mod forward;
pub mod models;


use crate::config::LogVerbosity;
use crate::error::ProxyError;
use crate::http::create_proxy_client;
use crate::logger::{log_exchange, Exchange};
use axum::{
    extract::State,
    http::HeaderMap,
    routing::{any, get, MethodRouter},
    Router,
};
use futures::future::BoxFuture;
use reqwest::{Client, Url};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tower_http::trace::TraceLayer;

pub use forward::{
    forward, proxy_models, proxy_passthrough, stream_back, UpstreamResponse, MAX_BODY_BYTES,
};

pub const HEALTH_PATH: &str = "/";
pub const MODELS_PATH: &str = "/v1/models";
pub const CATCH_ALL_PATH: &str = "/v1/";
pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Rewrites a buffered `/v1/models` response in place.
pub type RewriteResponseFn =
    Arc<dyn Fn(&mut UpstreamResponse) -> Result<(), ProxyError> + Send + Sync>;

/// Adjusts outbound headers after the `Authorization` header is set.
pub type RewriteHeaderFn = Arc<dyn Fn(&mut HeaderMap) + Send + Sync>;

/// Checks the configuration (usually the credentials) before serving.
pub type ValidateFn =
    Arc<dyn Fn(&ProxyConfig) -> BoxFuture<'static, Result<(), ProxyError>> + Send + Sync>;

/// A handler that fully replaces the default behavior for a path.
pub type CustomHandler = MethodRouter<SharedState>;

pub type SharedState = Arc<ProxyState>;

/// Immutable proxy configuration, built once at startup.
#[derive(Clone, Default)]
pub struct ProxyConfig {
    /// Provider name, used in logs.
    pub name: String,
    pub listen_port: u16,
    /// Upstream base URL including its base path, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub api_key: String,
    pub log_verbosity: LogVerbosity,
    pub validate: Option<ValidateFn>,
    pub rewrite_models: Option<RewriteResponseFn>,
    pub rewrite_header: Option<RewriteHeaderFn>,
    /// Path (or prefix, when it ends in `/`) to handler overrides.
    pub custom_routes: HashMap<String, CustomHandler>,
}

impl ProxyConfig {
    pub fn new(
        name: impl Into<String>,
        listen_port: u16,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            listen_port,
            base_url: base_url.into(),
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    pub fn with_log_verbosity(mut self, verbosity: LogVerbosity) -> Self {
        self.log_verbosity = verbosity;
        self
    }

    pub fn with_validate(mut self, validate: ValidateFn) -> Self {
        self.validate = Some(validate);
        self
    }

    pub fn with_rewrite_models(mut self, rewrite: RewriteResponseFn) -> Self {
        self.rewrite_models = Some(rewrite);
        self
    }

    pub fn with_rewrite_header(mut self, rewrite: RewriteHeaderFn) -> Self {
        self.rewrite_header = Some(rewrite);
        self
    }

    pub fn with_custom_route(mut self, path: impl Into<String>, handler: CustomHandler) -> Self {
        self.custom_routes.insert(path.into(), handler);
        self
    }

    /// Run the validation hook, if one is configured.
    pub async fn validate(&self) -> Result<(), ProxyError> {
        match &self.validate {
            Some(validate) => validate(self).await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut routes: Vec<_> = self.custom_routes.keys().collect();
        routes.sort();
        f.debug_struct("ProxyConfig")
            .field("name", &self.name)
            .field("listen_port", &self.listen_port)
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("log_verbosity", &self.log_verbosity)
            .field("validate", &self.validate.is_some())
            .field("rewrite_models", &self.rewrite_models.is_some())
            .field("rewrite_header", &self.rewrite_header.is_some())
            .field("custom_routes", &routes)
            .finish()
    }
}

/// State shared by every handler of one proxy.
pub struct ProxyState {
    pub name: String,
    pub listen_port: u16,
    pub api_key: String,
    pub log_verbosity: LogVerbosity,
    pub upstream: Url,
    pub client: Client,
    pub rewrite_models: RewriteResponseFn,
    pub rewrite_header: Option<RewriteHeaderFn>,
}

impl ProxyState {
    /// Normalize the upstream URL and resolve defaults. Custom routes are not kept.
    pub fn from_config(config: &ProxyConfig) -> Result<Self, ProxyError> {
        Ok(Self {
            name: config.name.clone(),
            listen_port: config.listen_port,
            api_key: config.api_key.clone(),
            log_verbosity: config.log_verbosity,
            upstream: normalize_upstream(&config.base_url)?,
            client: create_proxy_client()?,
            rewrite_models: config
                .rewrite_models
                .clone()
                .unwrap_or_else(models::default_rewrite),
            rewrite_header: config.rewrite_header.clone(),
        })
    }

    /// Local base URL announced on the health path.
    pub fn local_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.listen_port)
    }

    /// Upstream URL for an inbound `/v1/...` path.
    pub fn upstream_url(&self, request_path: &str, query: Option<&str>) -> Url {
        upstream_url(&self.upstream, request_path, query)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log(
        &self,
        method: &str,
        path: &str,
        upstream_path: &str,
        model: Option<&str>,
        status: u16,
        started: Instant,
        translated: bool,
    ) {
        log_exchange(
            &Exchange {
                provider: &self.name,
                method,
                path,
                upstream_path,
                model,
                status,
                elapsed: started.elapsed(),
                translated,
            },
            self.log_verbosity,
        );
    }
}

/// Parse the configured base URL, trimming trailing slashes and adding a
/// scheme when missing (`http` for loopback hosts, `https` otherwise).
pub fn normalize_upstream(raw: &str) -> Result<Url, ProxyError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ProxyError::InvalidUpstream("base URL is empty".to_string()));
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        let host = trimmed.split(['/', ':']).next().unwrap_or_default();
        let scheme = if host == "localhost" || host == "127.0.0.1" {
            "http"
        } else {
            "https"
        };
        format!("{}://{}", scheme, trimmed)
    };

    let url = Url::parse(&with_scheme)
        .map_err(|e| ProxyError::InvalidUpstream(format!("{}: {}", raw, e)))?;
    if url.host_str().is_none() {
        return Err(ProxyError::InvalidUpstream(format!("{}: missing host", raw)));
    }
    Ok(url)
}

/// Join the upstream base path with the part of `request_path` after `/v1`.
pub fn upstream_url(base: &Url, request_path: &str, query: Option<&str>) -> Url {
    let suffix = request_path.strip_prefix("/v1").unwrap_or(request_path);
    let mut url = base.clone();
    url.set_path(&format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        suffix.trim_start_matches('/')
    ));
    url.set_query(query);
    url
}

async fn health(State(state): State<SharedState>) -> String {
    state.local_url()
}

/// Build the router: defaults first, with custom handlers replacing them.
pub fn create_router(config: &ProxyConfig) -> Result<Router, ProxyError> {
    let state = Arc::new(ProxyState::from_config(config)?);
    let custom = &config.custom_routes;

    let mut router: Router<SharedState> = Router::new();

    if !custom.contains_key(HEALTH_PATH) {
        router = router.route(HEALTH_PATH, get(health));
    }
    if !custom.contains_key(MODELS_PATH) {
        router = router.route(MODELS_PATH, any(proxy_models));
    }
    if !custom.contains_key(CATCH_ALL_PATH) {
        router = router
            .route(CATCH_ALL_PATH, any(proxy_passthrough))
            .route("/v1/{*rest}", any(proxy_passthrough));
    }

    for (path, handler) in custom {
        router = match path.strip_suffix('/') {
            Some(prefix) if !prefix.is_empty() => router
                .route(path, handler.clone())
                .route(&format!("{}/{{*rest}}", prefix), handler.clone()),
            _ => router.route(path, handler.clone()),
        };
    }

    Ok(router.layer(TraceLayer::new_for_http()).with_state(state))
}

/// Validate the configuration and serve until a shutdown signal arrives.
pub async fn run(config: ProxyConfig) -> Result<(), ProxyError> {
    let upstream = normalize_upstream(&config.base_url)?;

    if let Err(e) = config.validate().await {
        return Err(match e {
            ProxyError::Validation(_) => e,
            other => ProxyError::Validation(other.to_string()),
        });
    }

    let router = create_router(&config)?;

    tracing::info!(
        "[model-provider: {}] Starting OpenAI-style API proxy on port {} → baseURL={}",
        config.name,
        config.listen_port,
        upstream.as_str().trim_end_matches('/')
    );

    serve_on_loopback(router, config.listen_port).await
}

/// Bind `127.0.0.1:<port>` and serve with graceful shutdown.
pub async fn serve_on_loopback(router: Router, port: u16) -> Result<(), ProxyError> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ProxyError::Server(format!("failed to bind {}: {}", addr, e)))?;
    tracing::debug!("Listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ProxyError::Server(e.to_string()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
