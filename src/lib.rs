//! Model provider proxy - a local OpenAI-compatible endpoint for model providers.
//!
//! Features:
//! - Reverse proxy to OpenAI-compatible upstreams with auth injection
//! - Pluggable model-list rewriting and per-path handler overrides
//! - Chat Completions <-> Responses API translation (streaming included)
//! - Chat Completions <-> Gemini generateContent translation

pub mod config;
pub mod error;
pub mod gemini;
pub mod http;
pub mod logger;
pub mod openai;
pub mod providers;
pub mod proxy;
pub mod sse;
pub mod translate;
pub mod validate;
