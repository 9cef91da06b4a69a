//! Configuration management for the model provider proxy.
//!
//! Loads settings from `~/.config/model-provider-proxy/config.toml` with
//! environment overrides. The result is converted once at startup into the
//! immutable runtime configuration used by the servers.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_GEMINI_LOCATION: &str = "us-central1";

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";

pub const GEMINI_ACCESS_TOKEN_ENV: &str = "OBOT_GEMINI_VERTEX_MODEL_PROVIDER_ACCESS_TOKEN";
pub const GEMINI_PROJECT_ENV: &str = "OBOT_GEMINI_VERTEX_MODEL_PROVIDER_GOOGLE_CLOUD_PROJECT";
pub const GEMINI_LOCATION_ENV: &str = "OBOT_GEMINI_VERTEX_MODEL_PROVIDER_GOOGLE_CLOUD_LOCATION";

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Which upstream vendor this process fronts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    Vllm,
    DeepSeek,
    Gemini,
}

impl ProviderKind {
    /// Environment variable holding the upstream API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Self::OpenAi => "OBOT_OPENAI_MODEL_PROVIDER_API_KEY",
            Self::Vllm => "OBOT_VLLM_MODEL_PROVIDER_API_KEY",
            Self::DeepSeek => "OBOT_DEEPSEEK_MODEL_PROVIDER_API_KEY",
            Self::Gemini => "OBOT_GEMINI_VERTEX_MODEL_PROVIDER_API_KEY",
        }
    }

    /// Environment variable overriding the upstream endpoint.
    pub fn base_url_env(&self) -> &'static str {
        match self {
            Self::OpenAi => "OBOT_OPENAI_MODEL_PROVIDER_BASE_URL",
            Self::Vllm => "OBOT_VLLM_MODEL_PROVIDER_ENDPOINT",
            Self::DeepSeek => "OBOT_DEEPSEEK_MODEL_PROVIDER_BASE_URL",
            Self::Gemini => "OBOT_GEMINI_VERTEX_MODEL_PROVIDER_BASE_URL",
        }
    }

    /// Display name used in logs.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAI",
            Self::Vllm => "vLLM",
            Self::DeepSeek => "DeepSeek",
            Self::Gemini => "Gemini Vertex",
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "vllm" => Ok(Self::Vllm),
            "deepseek" => Ok(Self::DeepSeek),
            "gemini" | "gemini-vertex" => Ok(Self::Gemini),
            other => Err(ConfigError::InvalidValue {
                key: "provider.kind",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Models whose name starts with this prefix are sent to the Responses API.
    #[serde(default)]
    pub model_prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GeminiConfig {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub log_verbosity: LogVerbosity,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogVerbosity {
    Minimal,
    #[default]
    Compact,
    Verbose,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// Read an environment variable, treating empty values as unset.
fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Get the default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("model-provider-proxy")
            .join("config.toml")
    }

    /// Load config from file, falling back to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::default_path())
    }

    /// Load config from a specific path.
    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Io(e)),
        }
    }

    /// Apply environment variable overrides for the configured provider kind.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(val) = non_empty_env("PORT") {
            if let Ok(port) = val.trim().parse() {
                self.server.port = port;
            }
        }

        let kind = self.provider.kind;
        if let Some(key) = non_empty_env(kind.api_key_env()) {
            self.provider.api_key = Some(key);
        }
        if let Some(url) = non_empty_env(kind.base_url_env()) {
            self.provider.base_url = Some(url);
        }

        if kind == ProviderKind::Gemini {
            if let Some(token) = non_empty_env(GEMINI_ACCESS_TOKEN_ENV) {
                self.gemini.access_token = Some(token);
            }
            if let Some(project) = non_empty_env(GEMINI_PROJECT_ENV) {
                self.gemini.project = Some(project);
            }
            if let Some(location) = non_empty_env(GEMINI_LOCATION_ENV) {
                self.gemini.location = Some(location);
            }
        }
        self
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: PathBuf) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(&path, content).map_err(ConfigError::Io)
    }

    /// The upstream API key. Required for every provider except a Vertex-backed Gemini.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        self.provider
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingValue(self.provider.kind.api_key_env()))
    }

    /// The upstream base URL, including any base path such as `/v1`.
    pub fn base_url(&self) -> Result<String, ConfigError> {
        let kind = self.provider.kind;
        let configured = self
            .provider
            .base_url
            .as_deref()
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty());

        match (kind, configured) {
            (ProviderKind::Vllm, Some(endpoint)) => {
                if endpoint.ends_with("/v1") {
                    Ok(endpoint)
                } else {
                    Ok(format!("{}/v1", endpoint))
                }
            }
            (ProviderKind::Vllm, None) => Err(ConfigError::MissingValue(kind.base_url_env())),
            (_, Some(url)) => Ok(url),
            (ProviderKind::OpenAi, None) => Ok(OPENAI_BASE_URL.to_string()),
            (ProviderKind::DeepSeek, None) => Ok(DEEPSEEK_BASE_URL.to_string()),
            (ProviderKind::Gemini, None) => Err(ConfigError::MissingValue(kind.base_url_env())),
        }
    }

    /// Provider display name, defaulting to the vendor name.
    pub fn provider_name(&self) -> String {
        self.provider
            .name
            .clone()
            .unwrap_or_else(|| self.provider.kind.display_name().to_string())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
    /// A required setting (named by its environment variable) is not set.
    MissingValue(&'static str),
    InvalidValue { key: &'static str, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Serialize(e) => write!(f, "Serialize error: {}", e),
            ConfigError::MissingValue(key) => write!(f, "{} environment variable not set", key),
            ConfigError::InvalidValue { key, value } => {
                write!(f, "Invalid value {:?} for {}", value, key)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn loads_config_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");

        fs::write(
            &config_path,
            r#"
[server]
port = 9090

[provider]
kind = "deepseek"
api_key = "sk-test-key"
model_prefix = "cu-"
"#,
        )
        .unwrap();

        let config = Config::load_from(config_path).unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.provider.kind, ProviderKind::DeepSeek);
        assert_eq!(config.provider.api_key, Some("sk-test-key".to_string()));
        assert_eq!(config.provider.model_prefix, Some("cu-".to_string()));
    }

    #[test]
    fn returns_defaults_when_file_missing() {
        let config = Config::load_from(PathBuf::from("/nonexistent/path/config.toml")).unwrap();

        assert_eq!(config.server.port, 8000);
        assert_eq!(config.provider.kind, ProviderKind::OpenAi);
        assert_eq!(config.app.log_verbosity, LogVerbosity::Compact);
    }

    #[test]
    fn rejects_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(&config_path, "[server\nport = ").unwrap();

        let result = Config::load_from(config_path);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn overrides_api_key_from_provider_specific_environment() {
        std::env::set_var("OBOT_DEEPSEEK_MODEL_PROVIDER_API_KEY", "env-deepseek-key");

        let mut config = Config::default();
        config.provider.kind = ProviderKind::DeepSeek;
        let config = config.with_env_overrides();

        assert_eq!(config.api_key().unwrap(), "env-deepseek-key");

        std::env::remove_var("OBOT_DEEPSEEK_MODEL_PROVIDER_API_KEY");
    }

    #[test]
    fn reads_gemini_vertex_settings_from_environment() {
        std::env::set_var(GEMINI_PROJECT_ENV, "my-project");
        std::env::set_var(GEMINI_ACCESS_TOKEN_ENV, "ya29.token");

        let mut config = Config::default();
        config.provider.kind = ProviderKind::Gemini;
        let config = config.with_env_overrides();

        assert_eq!(config.gemini.project.as_deref(), Some("my-project"));
        assert_eq!(config.gemini.access_token.as_deref(), Some("ya29.token"));

        std::env::remove_var(GEMINI_PROJECT_ENV);
        std::env::remove_var(GEMINI_ACCESS_TOKEN_ENV);
    }

    #[test]
    fn missing_api_key_names_the_environment_variable() {
        let config = Config::default();
        let err = config.api_key().unwrap_err();
        assert!(err
            .to_string()
            .contains("OBOT_OPENAI_MODEL_PROVIDER_API_KEY"));
    }

    #[test]
    fn default_base_urls_per_provider() {
        let mut config = Config::default();
        assert_eq!(config.base_url().unwrap(), OPENAI_BASE_URL);

        config.provider.kind = ProviderKind::DeepSeek;
        assert_eq!(config.base_url().unwrap(), DEEPSEEK_BASE_URL);

        config.provider.kind = ProviderKind::Vllm;
        assert!(matches!(
            config.base_url(),
            Err(ConfigError::MissingValue("OBOT_VLLM_MODEL_PROVIDER_ENDPOINT"))
        ));
    }

    #[test]
    fn vllm_endpoint_is_cleaned_and_gets_v1_base_path() {
        let mut config = Config::default();
        config.provider.kind = ProviderKind::Vllm;

        config.provider.base_url = Some("http://localhost:8001//".to_string());
        assert_eq!(config.base_url().unwrap(), "http://localhost:8001/v1");

        config.provider.base_url = Some("https://vllm.internal/v1/".to_string());
        assert_eq!(config.base_url().unwrap(), "https://vllm.internal/v1");
    }

    #[test]
    fn parses_provider_kind_names() {
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!("gemini-vertex".parse::<ProviderKind>().unwrap(), ProviderKind::Gemini);
        assert!("anthropic".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn saves_and_reloads_config() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.server.port = 3000;
        config.app.log_verbosity = LogVerbosity::Verbose;
        config.save_to(config_path.clone()).unwrap();

        let loaded = Config::load_from(config_path).unwrap();
        assert_eq!(loaded, config);
    }
}
