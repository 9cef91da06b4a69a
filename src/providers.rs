//! Provider presets: how each supported vendor is wired from the configuration.

use crate::config::{Config, ConfigError, ProviderKind};
use crate::error::ProxyError;
use crate::gemini::{self, GeminiSettings};
use crate::proxy::models::{rewrite_all_models_with_usage, USAGE_LLM};
use crate::proxy::{self, ProxyConfig, CATCH_ALL_PATH};
use crate::translate::{ResponsesTranslator, DEFAULT_MODEL_PREFIX};
use crate::validate::models_endpoint_hook;

/// A fully configured server, ready to validate or run.
#[derive(Debug)]
pub enum ProviderRuntime {
    /// OpenAI-style reverse proxy (OpenAI, vLLM, DeepSeek).
    Proxy(ProxyConfig),
    /// Chat Completions translated to Gemini.
    Gemini(GeminiSettings),
}

impl ProviderRuntime {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let runtime = match config.provider.kind {
            ProviderKind::Gemini => Self::Gemini(GeminiSettings::from_config(config)?),
            ProviderKind::OpenAi => {
                let prefix = config
                    .provider
                    .model_prefix
                    .clone()
                    .filter(|p| !p.is_empty())
                    .unwrap_or_else(|| DEFAULT_MODEL_PREFIX.to_string());
                Self::Proxy(base_proxy(config)?.with_custom_route(
                    CATCH_ALL_PATH,
                    ResponsesTranslator::new(prefix).into_route(),
                ))
            }
            ProviderKind::Vllm | ProviderKind::DeepSeek => Self::Proxy(
                base_proxy(config)?.with_rewrite_models(rewrite_all_models_with_usage(USAGE_LLM)),
            ),
        };
        Ok(runtime)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Proxy(config) => &config.name,
            Self::Gemini(settings) => &settings.name,
        }
    }

    /// Check the credentials without serving.
    pub async fn validate(&self) -> Result<(), ProxyError> {
        match self {
            Self::Proxy(config) => models_endpoint_hook()(config).await,
            Self::Gemini(settings) => gemini::validate(settings).await,
        }
    }

    /// Serve until shutdown. Credentials are not checked here, so a brief
    /// upstream outage does not keep the provider from starting.
    pub async fn run(self) -> Result<(), ProxyError> {
        match self {
            Self::Proxy(config) => proxy::run(config).await,
            Self::Gemini(settings) => gemini::run(settings).await,
        }
    }
}

/// Proxy settings shared by every OpenAI-style preset.
fn base_proxy(config: &Config) -> Result<ProxyConfig, ConfigError> {
    Ok(ProxyConfig::new(
        config.provider_name(),
        config.server.port,
        config.base_url()?,
        config.api_key()?,
    )
    .with_log_verbosity(config.app.log_verbosity))
}
