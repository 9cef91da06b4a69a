//! Terminal logging of proxied exchanges with configurable verbosity levels.
//!
//! Supports three verbosity levels:
//! - Minimal: One-liner nginx-style
//! - Compact: Two lines, request and response
//! - Verbose: Full block including upstream path and translation mode

use crate::config::LogVerbosity;
use std::time::Duration;

/// One request/response pair as seen by the proxy.
#[derive(Debug, Clone)]
pub struct Exchange<'a> {
    pub provider: &'a str,
    pub method: &'a str,
    pub path: &'a str,
    pub upstream_path: &'a str,
    pub model: Option<&'a str>,
    pub status: u16,
    pub elapsed: Duration,
    pub translated: bool,
}

/// Extract the model name from a JSON request body, if any.
pub fn extract_model(body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()?
        .get("model")?
        .as_str()
        .map(str::to_string)
}

/// Format duration in human-readable form.
fn format_duration(elapsed: Duration) -> String {
    let ms = elapsed.as_millis();
    if ms >= 1000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}ms", ms)
    }
}

/// Format an exchange for terminal output.
pub fn format_exchange(ex: &Exchange<'_>, verbosity: LogVerbosity) -> String {
    let model = ex.model.unwrap_or("-");
    match verbosity {
        LogVerbosity::Minimal => format!(
            "{} {} {} {} {}",
            ex.method,
            ex.path,
            ex.status,
            format_duration(ex.elapsed),
            model
        ),
        LogVerbosity::Compact => {
            let mode = if ex.translated { " (translated)" } else { "" };
            format!(
                "→ {} {} [{}]{}\n← {} ({})",
                ex.method,
                ex.path,
                model,
                mode,
                ex.status,
                format_duration(ex.elapsed)
            )
        }
        LogVerbosity::Verbose => {
            let separator = "────────────────────────────────────────";
            let mode = if ex.translated { "translated" } else { "passthrough" };
            format!(
                "{separator}\n\
                 [{provider}] {method} {path}\n\
                 Upstream: {upstream}\n\
                 Model: {model}\n\
                 Mode: {mode}\n\
                 Status: {status}\n\
                 Timing: {duration}\n\
                 {separator}",
                separator = separator,
                provider = ex.provider,
                method = ex.method,
                path = ex.path,
                upstream = ex.upstream_path,
                model = model,
                mode = mode,
                status = ex.status,
                duration = format_duration(ex.elapsed),
            )
        }
    }
}

/// Emit an exchange through `tracing`.
pub fn log_exchange(ex: &Exchange<'_>, verbosity: LogVerbosity) {
    let line = format_exchange(ex, verbosity);
    if ex.status >= 500 {
        tracing::warn!("{}", line);
    } else {
        tracing::info!("{}", line);
    }
}
