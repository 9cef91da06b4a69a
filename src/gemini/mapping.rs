//! Chat Completions <-> Gemini `generateContent` mapping.

use super::schema::clean_parameters;
use super::types::{
    Candidate, Content, FunctionCall as GeminiFunctionCall, FunctionDeclaration, FunctionResponse,
    GenerateContentRequest, GenerateContentResponse, GenerationConfig, Part, SafetySetting, Tool,
    UsageMetadata, ROLE_FUNCTION, ROLE_MODEL, ROLE_USER,
};
use super::SYSTEM_PROMPT;
use crate::error::ProxyError;
use crate::openai::{
    ChatChoice, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatMessage,
    ChatTool, ChunkChoice, ChunkDelta, Embedding, EmbeddingResponse, EmbeddingUsage, FinishReason,
    FunctionCall, FunctionCallDelta, ResponseMessage, ToolCall, ToolCallDelta, Usage,
    ROLE_ASSISTANT, ROLE_SYSTEM, ROLE_TOOL, ROLE_USER as OPENAI_ROLE_USER,
};
use serde_json::{json, Value};
use std::collections::HashMap;

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_HARASSMENT",
];

/// OpenAI role -> Gemini role.
pub fn role_to_gemini(role: &str) -> &'static str {
    match role {
        ROLE_SYSTEM | OPENAI_ROLE_USER => ROLE_USER,
        ROLE_ASSISTANT | ROLE_MODEL => ROLE_MODEL,
        ROLE_TOOL => ROLE_FUNCTION,
        _ => ROLE_USER,
    }
}

/// Gemini role -> OpenAI role.
pub fn role_from_gemini(role: &str) -> &'static str {
    match role {
        ROLE_MODEL => ROLE_ASSISTANT,
        ROLE_FUNCTION => ROLE_TOOL,
        _ => OPENAI_ROLE_USER,
    }
}

/// Block only high-probability harm in the four standard categories.
/// `method` is a Vertex-only field.
pub fn safety_settings(vertex: bool) -> Vec<SafetySetting> {
    HARM_CATEGORIES
        .iter()
        .map(|category| SafetySetting {
            category: category.to_string(),
            threshold: "BLOCK_ONLY_HIGH".to_string(),
            method: vertex.then(|| "SEVERITY".to_string()),
        })
        .collect()
}

/// Build the native request. Fails when a tool call carries arguments that
/// are not a JSON object.
pub fn build_generate_request(
    request: &ChatCompletionRequest,
    vertex: bool,
) -> Result<GenerateContentRequest, ProxyError> {
    let config = generation_config(request);
    Ok(GenerateContentRequest {
        contents: map_messages(&request.messages)?,
        system_instruction: Some(Content::text(ROLE_USER, SYSTEM_PROMPT)),
        tools: map_tools(request.tools.as_deref().unwrap_or_default()),
        generation_config: (!config.is_empty()).then_some(config),
        safety_settings: safety_settings(vertex),
    })
}

pub fn generation_config(request: &ChatCompletionRequest) -> GenerationConfig {
    GenerationConfig {
        temperature: request.temperature,
        top_p: request.top_p.filter(|p| *p > 0.0),
        max_output_tokens: request.output_token_limit().filter(|m| *m > 0),
        candidate_count: request.n.filter(|n| *n > 0),
    }
}

/// Map the conversation. A non-empty conversation starts with the system
/// prompt as a user turn; messages that map to no parts are dropped.
pub fn map_messages(messages: &[ChatMessage]) -> Result<Vec<Content>, ProxyError> {
    if messages.is_empty() {
        return Ok(Vec::new());
    }

    let mut contents = vec![Content::text(ROLE_USER, SYSTEM_PROMPT)];
    // Tool results often omit the function name; recover it from the call.
    let mut call_names: HashMap<&str, &str> = HashMap::new();

    for message in messages {
        let mut parts = Vec::new();
        let tool_result = message.tool_call_id.as_deref().filter(|id| !id.is_empty());

        if let Some(call_id) = tool_result {
            let name = message
                .name
                .as_deref()
                .filter(|n| !n.is_empty())
                .or_else(|| call_names.get(call_id).copied())
                .unwrap_or_default();
            parts.push(Part {
                function_response: Some(FunctionResponse {
                    id: Some(call_id.to_string()),
                    name: name.to_string(),
                    response: json!({"name": name, "content": message.text()}),
                }),
                ..Default::default()
            });
        }

        for call in message.tool_calls() {
            if !call.id.is_empty() {
                call_names.insert(&call.id, &call.function.name);
            }
            parts.push(Part {
                function_call: Some(GeminiFunctionCall {
                    id: (!call.id.is_empty()).then(|| call.id.clone()),
                    name: call.function.name.clone(),
                    args: parse_arguments(call)?,
                }),
                ..Default::default()
            });
        }

        // The text of a tool result already travels in the function response.
        let text = message.text();
        if !text.is_empty() && tool_result.is_none() {
            parts.push(Part::text(text));
        }

        if parts.is_empty() {
            continue;
        }
        contents.push(Content {
            role: role_to_gemini(&message.role).to_string(),
            parts,
        });
    }

    Ok(contents)
}

fn parse_arguments(call: &ToolCall) -> Result<Option<Value>, ProxyError> {
    let raw = call.function.arguments.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(args @ Value::Object(_)) => Ok(Some(args)),
        Ok(_) => Err(ProxyError::Internal(format!(
            "arguments for tool call {} are not a JSON object",
            call.function.name
        ))),
        Err(e) => Err(ProxyError::Internal(format!(
            "failed to parse arguments for tool call {}: {}",
            call.function.name, e
        ))),
    }
}

/// One Gemini tool per function definition.
pub fn map_tools(tools: &[ChatTool]) -> Vec<Tool> {
    tools
        .iter()
        .filter_map(|tool| tool.function.as_ref())
        .map(|function| Tool {
            function_declarations: vec![FunctionDeclaration {
                name: function.name.clone(),
                description: function.description.clone(),
                parameters: clean_parameters(function.parameters.as_ref()),
            }],
        })
        .collect()
}

pub fn map_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason.unwrap_or_default() {
        "MAX_TOKENS" => FinishReason::Length,
        "BLOCKLIST" | "RECITATION" | "SAFETY" | "SPII" | "PROHIBITED_CONTENT" => {
            FinishReason::ContentFilter
        }
        _ => FinishReason::Stop,
    }
}

pub fn map_usage(usage: Option<&UsageMetadata>) -> Usage {
    usage
        .map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        })
        .unwrap_or_default()
}

/// Text and tool calls of one candidate.
struct CandidateOutput {
    role: &'static str,
    text: Option<String>,
    tool_calls: Vec<ToolCall>,
}

fn candidate_output(candidate: &Candidate) -> CandidateOutput {
    let content = candidate.content.clone().unwrap_or_default();
    let role = if content.role.is_empty() {
        ROLE_ASSISTANT
    } else {
        role_from_gemini(&content.role)
    };

    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();
    for part in content.parts.iter().filter(|p| !p.is_thought()) {
        if let Some(text) = &part.text {
            texts.push(text.as_str());
        }
        if let Some(call) = &part.function_call {
            let id = call
                .id
                .clone()
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
            let arguments = call
                .args
                .as_ref()
                .map(Value::to_string)
                .unwrap_or_else(|| "{}".to_string());
            tool_calls.push(ToolCall {
                index: Some(tool_calls.len()),
                id,
                kind: "function".to_string(),
                function: FunctionCall {
                    name: call.name.clone(),
                    arguments,
                },
            });
        }
    }

    CandidateOutput {
        role,
        text: (!texts.is_empty()).then(|| texts.join("\n")),
        tool_calls,
    }
}

fn finish_reason_for(candidate: &Candidate, output: &CandidateOutput) -> FinishReason {
    if output.tool_calls.is_empty() {
        map_finish_reason(candidate.finish_reason.as_deref())
    } else {
        FinishReason::FunctionCall
    }
}

pub fn to_chat_completion(
    response: &GenerateContentResponse,
    id: &str,
    created: i64,
    model: &str,
) -> ChatCompletionResponse {
    let choices = response
        .candidates
        .iter()
        .enumerate()
        .map(|(position, candidate)| {
            let output = candidate_output(candidate);
            let finish_reason = finish_reason_for(candidate, &output);
            let content = match output.text {
                Some(text) => Some(text),
                None if output.tool_calls.is_empty() => Some(String::new()),
                None => None,
            };
            ChatChoice {
                index: candidate.index.unwrap_or(position),
                message: ResponseMessage {
                    role: output.role.to_string(),
                    content,
                    refusal: None,
                    tool_calls: output.tool_calls,
                },
                finish_reason,
            }
        })
        .collect();

    ChatCompletionResponse {
        id: id.to_string(),
        object: "chat.completion".to_string(),
        created,
        model: model.to_string(),
        choices,
        usage: map_usage(response.usage_metadata.as_ref()),
        system_fingerprint: None,
    }
}

/// One streamed Gemini event as a chunk. The finish reason is only set on
/// candidates that carry one (or that call tools).
pub fn to_chat_chunk(
    response: &GenerateContentResponse,
    id: &str,
    created: i64,
    model: &str,
) -> ChatCompletionChunk {
    let choices = response
        .candidates
        .iter()
        .enumerate()
        .map(|(position, candidate)| {
            let output = candidate_output(candidate);
            let finish_reason = match (&candidate.finish_reason, output.tool_calls.is_empty()) {
                (None, true) => None,
                _ => Some(finish_reason_for(candidate, &output)),
            };
            let tool_calls = output
                .tool_calls
                .into_iter()
                .enumerate()
                .map(|(index, call)| ToolCallDelta {
                    index,
                    id: Some(call.id),
                    kind: Some(call.kind),
                    function: FunctionCallDelta {
                        name: Some(call.function.name),
                        arguments: Some(call.function.arguments),
                    },
                })
                .collect();
            ChunkChoice {
                index: candidate.index.unwrap_or(position),
                delta: ChunkDelta {
                    role: Some(output.role.to_string()),
                    content: output.text,
                    refusal: None,
                    tool_calls,
                },
                finish_reason,
            }
        })
        .collect();

    let mut chunk = ChatCompletionChunk::new(id, created, model, choices);
    chunk.usage = response
        .usage_metadata
        .as_ref()
        .map(|u| map_usage(Some(u)));
    chunk
}

pub fn to_embedding_response(
    model: &str,
    vectors: Vec<Vec<f32>>,
    prompt_tokens: u64,
) -> EmbeddingResponse {
    EmbeddingResponse {
        object: "list".to_string(),
        data: vectors
            .into_iter()
            .enumerate()
            .map(|(index, embedding)| Embedding {
                object: "embedding".to_string(),
                index,
                embedding,
            })
            .collect(),
        model: model.to_string(),
        usage: EmbeddingUsage {
            prompt_tokens,
            total_tokens: prompt_tokens,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request(value: Value) -> ChatCompletionRequest {
        serde_json::from_value(value).unwrap()
    }

    fn response(value: Value) -> GenerateContentResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn role_tables_cover_both_directions() {
        assert_eq!(role_to_gemini("system"), "user");
        assert_eq!(role_to_gemini("assistant"), "model");
        assert_eq!(role_to_gemini("tool"), "function");
        assert_eq!(role_to_gemini("narrator"), "user");

        assert_eq!(role_from_gemini("model"), "assistant");
        assert_eq!(role_from_gemini("function"), "tool");
        assert_eq!(role_from_gemini("user"), "user");
        assert_eq!(role_from_gemini("other"), "user");
    }

    #[test]
    fn safety_method_is_vertex_only() {
        let vertex = safety_settings(true);
        assert_eq!(vertex.len(), 4);
        assert!(vertex
            .iter()
            .all(|s| s.threshold == "BLOCK_ONLY_HIGH" && s.method.as_deref() == Some("SEVERITY")));
        assert!(safety_settings(false).iter().all(|s| s.method.is_none()));
    }

    #[test]
    fn conversation_starts_with_system_prompt() {
        let native = build_generate_request(
            &request(json!({
                "model": "gemini-pro",
                "messages": [
                    {"role": "system", "content": "Be nice."},
                    {"role": "user", "content": "Hi"}
                ]
            })),
            false,
        )
        .unwrap();

        assert_eq!(native.contents.len(), 3);
        assert_eq!(native.contents[0], Content::text("user", SYSTEM_PROMPT));
        assert_eq!(native.contents[1], Content::text("user", "Be nice."));
        assert_eq!(native.contents[2], Content::text("user", "Hi"));
        assert_eq!(
            native.system_instruction,
            Some(Content::text("user", SYSTEM_PROMPT))
        );
        assert!(native.generation_config.is_none());
    }

    #[test]
    fn empty_conversation_has_no_contents() {
        assert!(map_messages(&[]).unwrap().is_empty());
    }

    #[test]
    fn tool_round_trip_maps_calls_and_responses() {
        let native = build_generate_request(
            &request(json!({
                "model": "gemini-pro",
                "messages": [
                    {"role": "user", "content": "Weather?"},
                    {"role": "assistant", "content": null, "tool_calls": [
                        {"id": "call_1", "type": "function", "function": {"name": "weather", "arguments": "{\"city\":\"Oslo\"}"}}
                    ]},
                    {"role": "tool", "tool_call_id": "call_1", "content": "Rainy"}
                ]
            })),
            true,
        )
        .unwrap();

        let call = native.contents[2].parts[0].function_call.as_ref().unwrap();
        assert_eq!(native.contents[2].role, "model");
        assert_eq!(call.id.as_deref(), Some("call_1"));
        assert_eq!(call.args, Some(json!({"city": "Oslo"})));

        let result = &native.contents[3];
        assert_eq!(result.role, "function");
        assert_eq!(result.parts.len(), 1);
        assert_eq!(
            result.parts[0].function_response,
            Some(FunctionResponse {
                id: Some("call_1".to_string()),
                name: "weather".to_string(),
                response: json!({"name": "weather", "content": "Rainy"}),
            })
        );
    }

    #[test]
    fn invalid_tool_arguments_are_an_error() {
        let err = build_generate_request(
            &request(json!({
                "model": "gemini-pro",
                "messages": [{"role": "assistant", "tool_calls": [
                    {"id": "c", "function": {"name": "f", "arguments": "{not json"}}
                ]}]
            })),
            false,
        )
        .unwrap_err();

        assert!(matches!(err, ProxyError::Internal(_)));
    }

    #[test]
    fn tools_and_generation_config_are_mapped() {
        let native = build_generate_request(
            &request(json!({
                "model": "gemini-pro",
                "messages": [{"role": "user", "content": "x"}],
                "tools": [
                    {"type": "function", "function": {"name": "a"}},
                    {"type": "function", "function": {"name": "b", "description": "B", "parameters": {"type": "object", "properties": {"q": {"type": "string"}}}}}
                ],
                "temperature": 0.0,
                "top_p": 0.0,
                "max_tokens": 256,
                "n": 2
            })),
            false,
        )
        .unwrap();

        assert_eq!(native.tools.len(), 2);
        assert_eq!(
            native.tools[0].function_declarations[0].parameters,
            json!({"type": "object", "properties": {}})
        );
        assert_eq!(native.tools[1].function_declarations[0].description.as_deref(), Some("B"));
        assert_eq!(
            native.generation_config,
            Some(GenerationConfig {
                temperature: Some(0.0),
                top_p: None,
                max_output_tokens: Some(256),
                candidate_count: Some(2),
            })
        );
    }

    #[test]
    fn finish_reasons_map_to_openai() {
        assert_eq!(map_finish_reason(Some("STOP")), FinishReason::Stop);
        assert_eq!(map_finish_reason(Some("MAX_TOKENS")), FinishReason::Length);
        assert_eq!(map_finish_reason(Some("SAFETY")), FinishReason::ContentFilter);
        assert_eq!(map_finish_reason(Some("SPII")), FinishReason::ContentFilter);
        assert_eq!(map_finish_reason(Some("OTHER")), FinishReason::Stop);
        assert_eq!(map_finish_reason(None), FinishReason::Stop);
    }

    #[test]
    fn completion_joins_text_and_maps_usage() {
        let completion = to_chat_completion(
            &response(json!({
                "candidates": [{"content": {"role": "model", "parts": [
                    {"text": "Line one"}, {"text": "Line two"}
                ]}, "finishReason": "MAX_TOKENS"}],
                "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 6, "totalTokenCount": 10}
            })),
            "chatcmpl-1",
            42,
            "gemini-pro",
        );

        let choice = &completion.choices[0];
        assert_eq!(completion.object, "chat.completion");
        assert_eq!(choice.message.role, "assistant");
        assert_eq!(choice.message.content.as_deref(), Some("Line one\nLine two"));
        assert_eq!(choice.finish_reason, FinishReason::Length);
        assert_eq!(
            completion.usage,
            Usage {
                prompt_tokens: 4,
                completion_tokens: 6,
                total_tokens: 10
            }
        );
    }

    #[test]
    fn function_calls_become_tool_calls() {
        let completion = to_chat_completion(
            &response(json!({
                "candidates": [{"content": {"role": "model", "parts": [
                    {"functionCall": {"id": "fc-1", "name": "weather", "args": {"city": "Oslo"}}},
                    {"functionCall": {"name": "time"}}
                ]}, "finishReason": "STOP"}]
            })),
            "chatcmpl-2",
            0,
            "gemini-pro",
        );

        let message = &completion.choices[0].message;
        assert_eq!(completion.choices[0].finish_reason, FinishReason::FunctionCall);
        assert_eq!(message.content, None);
        assert_eq!(message.tool_calls[0].id, "fc-1");
        assert_eq!(message.tool_calls[0].function.arguments, r#"{"city":"Oslo"}"#);
        assert_eq!(message.tool_calls[1].index, Some(1));
        assert!(message.tool_calls[1].id.starts_with("call_"));
        assert_eq!(message.tool_calls[1].function.arguments, "{}");
    }

    #[test]
    fn chunks_only_finish_when_told() {
        let partial = to_chat_chunk(
            &response(json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "Hel"}]}}]})),
            "chatcmpl-3",
            0,
            "gemini-pro",
        );
        assert_eq!(partial.object, "chat.completion.chunk");
        assert_eq!(partial.choices[0].delta.content.as_deref(), Some("Hel"));
        assert_eq!(partial.choices[0].finish_reason, None);
        assert!(partial.usage.is_none());

        let last = to_chat_chunk(
            &response(json!({
                "candidates": [{"content": {"role": "model", "parts": [{"text": "lo"}]}, "finishReason": "STOP"}],
                "usageMetadata": {"promptTokenCount": 1, "candidatesTokenCount": 2, "totalTokenCount": 3}
            })),
            "chatcmpl-3",
            0,
            "gemini-pro",
        );
        assert_eq!(last.choices[0].finish_reason, Some(FinishReason::Stop));
        assert_eq!(last.usage.unwrap().total_tokens, 3);
    }
}
