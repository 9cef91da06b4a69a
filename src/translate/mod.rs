//! Chat Completions <-> Responses API translation.
//!
//! Requests for models carrying the configured prefix (default `computer-use-`)
//! are rewritten to `/v1/responses`, and the upstream answer is converted back
//! into the Chat Completions shape, streamed or not. Everything else is
//! forwarded untouched.

mod handler;
mod request;
mod response;
mod stream;


pub use handler::ResponsesTranslator;
pub use request::{build_responses_request, is_chat_completions_path, translate_request};
pub use response::{rewrite_upstream_response, to_chat_completion};
pub use stream::{translate_stream, ResponsesStreamTranslator, StreamItem};

use axum::body::Bytes;

pub const DEFAULT_MODEL_PREFIX: &str = "computer-use-";
pub const RESPONSES_PATH: &str = "/v1/responses";

/// Outcome of request translation. The response side switches on this.
#[derive(Debug, Clone, PartialEq)]
pub enum Translation {
    /// Rewritten into a Responses API request.
    Translated {
        body: Bytes,
        path: String,
        streaming: bool,
    },
    /// Forward the original request as is.
    Passthrough { body: Bytes, path: String },
}

impl Translation {
    pub fn body(&self) -> &Bytes {
        match self {
            Self::Translated { body, .. } | Self::Passthrough { body, .. } => body,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Translated { path, .. } | Self::Passthrough { path, .. } => path,
        }
    }

    pub fn is_translated(&self) -> bool {
        matches!(self, Self::Translated { .. })
    }

    pub fn into_parts(self) -> (Bytes, String) {
        match self {
            Self::Translated { body, path, .. } | Self::Passthrough { body, path } => (body, path),
        }
    }
}
