//! Rewriters for upstream `/v1/models` responses.
//!
//! Both normalize the list to the OpenAI shape and tag each entry with
//! `metadata.usage`, which the parent process uses to group models.

use super::{RewriteResponseFn, UpstreamResponse};
use crate::error::ProxyError;
use axum::http::StatusCode;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::{Arc, LazyLock};

pub const USAGE_LLM: &str = "llm";
pub const USAGE_TEXT_EMBEDDING: &str = "text-embedding";
pub const USAGE_IMAGE_GENERATION: &str = "image-generation";

static EMBEDDING_MODEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(^|[-_/])embed").expect("valid regex"));

static IMAGE_MODEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(dall-e|gpt-image)").expect("valid regex"));

/// Guess a model's usage from its id.
pub fn classify_model(id: &str) -> &'static str {
    if EMBEDDING_MODEL.is_match(id) {
        USAGE_TEXT_EMBEDDING
    } else if IMAGE_MODEL.is_match(id) {
        USAGE_IMAGE_GENERATION
    } else {
        USAGE_LLM
    }
}

/// Tag every model with the usage inferred from its id.
pub fn default_rewrite() -> RewriteResponseFn {
    Arc::new(|response: &mut UpstreamResponse| {
        rewrite_models(response, classify_model)
    })
}

/// Tag every model with the same usage.
pub fn rewrite_all_models_with_usage(usage: &'static str) -> RewriteResponseFn {
    Arc::new(move |response: &mut UpstreamResponse| {
        rewrite_models(response, |_| usage)
    })
}

fn rewrite_models(
    response: &mut UpstreamResponse,
    usage_for: impl Fn(&str) -> &'static str,
) -> Result<(), ProxyError> {
    if response.status != StatusCode::OK {
        return Ok(());
    }
    response.decode_content()?;

    let mut list: Value = serde_json::from_slice(&response.body)
        .map_err(|e| ProxyError::Translation(format!("failed to decode model list: {}", e)))?;

    let Some(object) = list.as_object_mut() else {
        return Err(ProxyError::Translation(
            "model list is not a JSON object".to_string(),
        ));
    };
    object.insert("object".to_string(), Value::from("list"));

    if let Some(models) = object.get_mut("data").and_then(Value::as_array_mut) {
        for model in models.iter_mut().filter_map(Value::as_object_mut) {
            tag_model(model, &usage_for);
        }
    }

    let body = serde_json::to_vec(&list)
        .map_err(|e| ProxyError::Translation(format!("failed to encode model list: {}", e)))?;
    response.replace_body(body);
    Ok(())
}

fn tag_model(model: &mut Map<String, Value>, usage_for: &impl Fn(&str) -> &'static str) {
    model.insert("object".to_string(), Value::from("model"));

    let usage = model
        .get("id")
        .and_then(Value::as_str)
        .map(usage_for)
        .unwrap_or(USAGE_LLM);

    let metadata = model
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    if !metadata.is_object() {
        *metadata = Value::Object(Map::new());
    }
    if let Some(metadata) = metadata.as_object_mut() {
        metadata
            .entry("usage")
            .or_insert_with(|| Value::from(usage));
    }
}
