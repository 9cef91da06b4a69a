//! OpenAI wire formats.
//!
//! `chat` is the Chat Completions shape this proxy exposes to its callers;
//! `responses` is the Responses API shape used as a native upstream format.

pub mod chat;
pub mod responses;

pub use chat::*;
