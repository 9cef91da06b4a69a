//! model-provider-proxy CLI - serve a local OpenAI-compatible endpoint for one provider.

use clap::{Parser, Subcommand};
use model_provider_proxy::config::{Config, LogVerbosity, ProviderKind};
use model_provider_proxy::providers::ProviderRuntime;
use model_provider_proxy::validate::error_json;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "model-provider-proxy")]
#[command(about = "Local OpenAI-compatible proxy for model providers")]
#[command(version)]
struct Cli {
    /// Provider to front (openai, vllm, deepseek, gemini)
    #[arg(long, global = true, env = "MODEL_PROVIDER")]
    provider: Option<ProviderKind>,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log verbosity level
    #[arg(short, long, global = true, value_enum)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy server
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check the provider credentials and exit
    Validate,

    /// Show current configuration
    Config {
        /// Show config file path
        #[arg(long)]
        path: bool,

        /// Write the current settings, without secrets, to the config file
        #[arg(long, conflicts_with = "path")]
        init: bool,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum LogLevel {
    Minimal,
    Compact,
    Verbose,
}

impl From<LogLevel> for LogVerbosity {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Minimal => LogVerbosity::Minimal,
            LogLevel::Compact => LogVerbosity::Compact,
            LogLevel::Verbose => LogVerbosity::Verbose,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Config { path, init }) => show_config(&cli, *path, *init),
        Some(Commands::Validate) => {
            init_tracing();
            validate(&cli).await
        }
        Some(Commands::Serve { port }) => {
            init_tracing();
            run_server(&cli, *port).await
        }
        None => {
            // Default: run server
            init_tracing();
            run_server(&cli, None).await
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
}

/// File config, then the CLI provider choice, then environment overrides.
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path.clone())?,
        None => Config::load()?,
    };
    if let Some(kind) = cli.provider {
        config.provider.kind = kind;
    }
    let mut config = config.with_env_overrides();
    if let Some(level) = cli.log_level {
        config.app.log_verbosity = level.into();
    }
    Ok(config)
}

async fn run_server(cli: &Cli, port_override: Option<u16>) -> anyhow::Result<()> {
    let mut config = load_config(cli)?;
    if let Some(port) = port_override {
        config.server.port = port;
    }

    let runtime = ProviderRuntime::from_config(&config)?;
    let port = config.server.port;

    match config.app.log_verbosity {
        LogVerbosity::Minimal => {
            println!("model-provider-proxy:{}", port);
        }
        LogVerbosity::Compact => {
            println!("→ {} proxy starting on http://127.0.0.1:{}", runtime.name(), port);
        }
        LogVerbosity::Verbose => {
            println!("────────────────────────────────────────");
            println!("model-provider-proxy v{}", env!("CARGO_PKG_VERSION"));
            println!("────────────────────────────────────────");
            println!("Provider:   {}", runtime.name());
            println!("API Base:   http://127.0.0.1:{}/v1", port);
            println!("Models:     http://127.0.0.1:{}/v1/models", port);
            println!("────────────────────────────────────────");
        }
    }

    runtime.run().await?;

    println!("\nProxy stopped.");
    Ok(())
}

/// Prints `Credentials are valid`, or `{"error": ...}` and exits non-zero.
async fn validate(cli: &Cli) -> anyhow::Result<()> {
    let result = match load_config(cli) {
        Ok(config) => match ProviderRuntime::from_config(&config) {
            Ok(runtime) => runtime.validate().await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        },
        Err(e) => Err(e.to_string()),
    };

    match result {
        Ok(()) => {
            println!("Credentials are valid");
            Ok(())
        }
        Err(message) => {
            println!("{}", error_json(&message));
            std::process::exit(1);
        }
    }
}

fn show_config(cli: &Cli, show_path: bool, init: bool) -> anyhow::Result<()> {
    let path = cli.config.clone().unwrap_or_else(Config::default_path);
    if show_path {
        println!("{}", path.display());
        return Ok(());
    }

    let mut config = load_config(cli)?;
    if init {
        if path.exists() {
            anyhow::bail!("{} already exists", path.display());
        }
        config.provider.api_key = None;
        config.gemini.access_token = None;
        config.save_to(path.clone())?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    if config.provider.api_key.is_some() {
        config.provider.api_key = Some("<redacted>".to_string());
    }
    if config.gemini.access_token.is_some() {
        config.gemini.access_token = Some("<redacted>".to_string());
    }
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
