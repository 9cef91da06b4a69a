//! Response direction: buffered Responses API payload -> Chat Completions.

use crate::error::ProxyError;
use crate::openai::responses::{OutputContent, OutputItem, ResponsesResponse};
use crate::openai::{
    ChatChoice, ChatCompletionResponse, FinishReason, FunctionCall, ResponseMessage, ToolCall,
    Usage, ROLE_ASSISTANT,
};
use crate::proxy::UpstreamResponse;
use axum::http::{header, HeaderValue};

/// Convert a decoded Responses payload. One choice per message or function
/// call item, indexed by its position in `output`.
pub fn to_chat_completion(response: ResponsesResponse) -> ChatCompletionResponse {
    let choices = response
        .output
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| choice_for(index, item))
        .collect();

    let usage = response
        .usage
        .map(|u| Usage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.total_tokens,
        })
        .unwrap_or_default();

    ChatCompletionResponse {
        id: response.id,
        object: "chat.completion".to_string(),
        created: response.created_at as i64,
        model: response.model,
        choices,
        usage,
        system_fingerprint: None,
    }
}

fn choice_for(index: usize, item: OutputItem) -> Option<ChatChoice> {
    match item {
        OutputItem::Message { content, .. } => {
            let mut text = String::new();
            let mut refusal: Option<String> = None;
            for part in content {
                match part {
                    OutputContent::OutputText { text: t } => text.push_str(&t),
                    OutputContent::Refusal { refusal: r } => {
                        refusal.get_or_insert_with(String::new).push_str(&r)
                    }
                    OutputContent::Other => {}
                }
            }

            let (content, finish_reason) = match &refusal {
                Some(r) if text.is_empty() => (r.clone(), FinishReason::ContentFilter),
                Some(_) => (text, FinishReason::ContentFilter),
                None => (text, FinishReason::Stop),
            };
            Some(ChatChoice {
                index,
                message: ResponseMessage {
                    role: ROLE_ASSISTANT.to_string(),
                    content: Some(content),
                    refusal,
                    tool_calls: Vec::new(),
                },
                finish_reason,
            })
        }
        OutputItem::FunctionCall {
            call_id,
            name,
            arguments,
            ..
        } => Some(ChatChoice {
            index,
            message: ResponseMessage {
                role: ROLE_ASSISTANT.to_string(),
                content: None,
                refusal: None,
                tool_calls: vec![ToolCall {
                    index: None,
                    id: call_id,
                    kind: "function".to_string(),
                    function: FunctionCall { name, arguments },
                }],
            },
            finish_reason: FinishReason::ToolCalls,
        }),
        OutputItem::Other => None,
    }
}

/// Rewrite a buffered 200 response from `/v1/responses` in place.
/// Leaves the response untouched when the payload cannot be decoded.
pub fn rewrite_upstream_response(response: &mut UpstreamResponse) -> Result<(), ProxyError> {
    let mut decoded = response.clone();
    decoded.decode_content()?;

    let native: ResponsesResponse = serde_json::from_slice(&decoded.body).map_err(|e| {
        ProxyError::Translation(format!("failed to decode responses API response: {}", e))
    })?;
    let body = serde_json::to_vec(&to_chat_completion(native)).map_err(|e| {
        ProxyError::Translation(format!("failed to encode chat completion response: {}", e))
    })?;

    decoded.replace_body(body);
    *response = decoded;
    response.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    Ok(())
}
