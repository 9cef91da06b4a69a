//! Request direction: Chat Completions -> Responses API.

use super::{Translation, RESPONSES_PATH};
use crate::openai::responses::{
    InputItem, InputRole, ResponsesRequest, ResponsesTool, TextConfig, TextFormat,
};
use crate::openai::{
    ChatCompletionRequest, ChatMessage, ChatTool, ROLE_DEVELOPER, ROLE_FUNCTION, ROLE_SYSTEM,
    ROLE_TOOL,
};
use crate::proxy::CHAT_COMPLETIONS_PATH;
use axum::body::Bytes;
use serde_json::{json, Value};

/// Case-insensitive match on the chat completions path, ignoring trailing slashes.
pub fn is_chat_completions_path(path: &str) -> bool {
    path.trim_end_matches('/')
        .eq_ignore_ascii_case(CHAT_COMPLETIONS_PATH)
}

/// Translate a chat completions request for a prefixed model, or hand back the
/// original bytes and path. Never fails.
pub fn translate_request(body: Bytes, path: &str, model_prefix: &str) -> Translation {
    let passthrough = |body: Bytes| Translation::Passthrough {
        body,
        path: path.to_string(),
    };

    if body.is_empty() || !is_chat_completions_path(path) {
        return passthrough(body);
    }

    let request: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("Failed to parse chat completion request: {}", e);
            return passthrough(body);
        }
    };
    if !request.model.starts_with(model_prefix) {
        return passthrough(body);
    }

    let streaming = request.stream;
    let translated = match serde_json::to_vec(&build_responses_request(request)) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("Failed to serialize responses request: {}", e);
            return passthrough(body);
        }
    };

    tracing::debug!("Translated {} to {}", path, RESPONSES_PATH);
    Translation::Translated {
        body: Bytes::from(translated),
        path: RESPONSES_PATH.to_string(),
        streaming,
    }
}

/// Build the Responses API request for a chat completions request.
pub fn build_responses_request(request: ChatCompletionRequest) -> ResponsesRequest {
    let mut native = ResponsesRequest::new(&request.model);
    let max_output_tokens = request.output_token_limit();

    let mut messages = request.messages.as_slice();
    if let Some((first, rest)) = messages.split_first() {
        if first.role == ROLE_SYSTEM || first.role == ROLE_DEVELOPER {
            native.instructions = first.text();
            messages = rest;
        }
    }

    native.input = messages.iter().flat_map(input_items).collect();
    native.tools = request
        .tools
        .unwrap_or_default()
        .into_iter()
        .filter_map(function_tool)
        .collect();
    native.text = request.response_format.and_then(|format| {
        match format.kind.as_str() {
            "text" => Some(TextConfig {
                format: TextFormat::Text,
            }),
            "json_object" => Some(TextConfig {
                format: TextFormat::JsonObject,
            }),
            other => {
                tracing::warn!("Unsupported response format type: {}", other);
                None
            }
        }
    });

    native.temperature = request.temperature;
    native.top_p = request.top_p;
    native.max_output_tokens = max_output_tokens;
    native.user = request.user;
    if request.stream {
        native.stream = Some(true);
    }
    native
}

fn input_items(message: &ChatMessage) -> Vec<InputItem> {
    if !message.tool_calls().is_empty() {
        return message
            .tool_calls()
            .iter()
            .map(|call| InputItem::FunctionCall {
                call_id: call.id.clone(),
                name: call.function.name.clone(),
                arguments: call.function.arguments.clone(),
            })
            .collect();
    }

    if message.role == ROLE_TOOL || message.role == ROLE_FUNCTION {
        return vec![InputItem::FunctionCallOutput {
            call_id: message.tool_call_id.clone().unwrap_or_default(),
            output: message.text(),
        }];
    }

    match InputRole::from_chat_role(&message.role) {
        Some(role) => vec![InputItem::Message {
            role,
            content: message.text(),
        }],
        None => {
            tracing::warn!("Unsupported message role: {}", message.role);
            Vec::new()
        }
    }
}

fn function_tool(tool: ChatTool) -> Option<ResponsesTool> {
    let Some(function) = tool.function else {
        tracing::warn!("Skipping tool of type {} without a function", tool.kind);
        return None;
    };
    let strict = function.strict.unwrap_or(false);
    let mut parameters = function
        .parameters
        .filter(Value::is_object)
        .unwrap_or_else(|| json!({"type": "object", "properties": {}}));
    if strict {
        require_all_properties(&mut parameters);
    }

    Some(ResponsesTool::Function {
        name: function.name,
        description: function.description,
        parameters,
        strict,
    })
}

/// Strict schemas must list every property as required and forbid extras.
fn require_all_properties(schema: &mut Value) {
    let Some(object) = schema.as_object_mut() else {
        return;
    };

    let names: Vec<Value> = object
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| props.keys().cloned().map(Value::from).collect())
        .unwrap_or_default();
    object.insert("required".to_string(), Value::Array(names));
    object.insert("additionalProperties".to_string(), Value::Bool(false));

    if let Some(props) = object.get_mut("properties").and_then(Value::as_object_mut) {
        props
            .values_mut()
            .filter(|p| p.get("type").and_then(Value::as_str) == Some("object"))
            .for_each(require_all_properties);
    }
    object
        .entry("type")
        .or_insert_with(|| Value::from("object"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::DEFAULT_MODEL_PREFIX;
    use pretty_assertions::assert_eq;

    fn translate(body: Value, path: &str) -> Translation {
        translate_request(
            Bytes::from(serde_json::to_vec(&body).unwrap()),
            path,
            DEFAULT_MODEL_PREFIX,
        )
    }

    fn translated_json(translation: &Translation) -> Value {
        assert!(translation.is_translated(), "expected translation");
        serde_json::from_slice(translation.body()).unwrap()
    }

    #[test]
    fn non_prefixed_model_passes_through_unchanged() {
        let raw = br#"{"model":"gpt-4","messages":[{"role":"user","content":"hello"}]}"#;
        let translation = translate_request(
            Bytes::from_static(raw),
            "/v1/chat/completions",
            DEFAULT_MODEL_PREFIX,
        );

        assert_eq!(
            translation,
            Translation::Passthrough {
                body: Bytes::from_static(raw),
                path: "/v1/chat/completions".to_string(),
            }
        );
    }

    #[test]
    fn other_paths_pass_through() {
        let translation = translate(
            json!({"model": "computer-use-preview", "input": "x"}),
            "/v1/embeddings",
        );
        assert!(!translation.is_translated());
        assert_eq!(translation.path(), "/v1/embeddings");
    }

    #[test]
    fn malformed_body_passes_through_byte_identical() {
        let raw = Bytes::from_static(b"{\"model\": \"computer-use-x\", ");
        let translation =
            translate_request(raw.clone(), "/v1/chat/completions", DEFAULT_MODEL_PREFIX);

        assert!(!translation.is_translated());
        assert_eq!(translation.body(), &raw);
    }

    #[test]
    fn empty_body_passes_through() {
        let translation =
            translate_request(Bytes::new(), "/v1/chat/completions", DEFAULT_MODEL_PREFIX);
        assert!(!translation.is_translated());
    }

    #[test]
    fn path_match_ignores_case_and_trailing_slashes() {
        for path in ["/v1/chat/completions", "/V1/Chat/Completions/", "/v1/chat/completions//"] {
            let translation = translate(
                json!({"model": "computer-use-alpha", "messages": []}),
                path,
            );
            assert_eq!(translation.path(), RESPONSES_PATH, "path {}", path);
        }
    }

    #[test]
    fn simple_user_message_becomes_input_message() {
        let translation = translate(
            json!({
                "model": "computer-use-alpha",
                "messages": [{"role": "user", "content": "hello"}],
                "stream": false
            }),
            "/v1/chat/completions",
        );

        assert_eq!(
            translation,
            Translation::Translated {
                body: translation.body().clone(),
                path: RESPONSES_PATH.to_string(),
                streaming: false,
            }
        );
        let body = translated_json(&translation);
        assert_eq!(
            body["input"],
            json!([{"type": "message", "role": "user", "content": "hello"}])
        );
        assert!(body.get("instructions").is_none());
        assert!(body.get("stream").is_none());
        assert_eq!(body["parallel_tool_calls"], true);
        assert_eq!(body["truncation"], "disabled");
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["store"], false);
    }

    #[test]
    fn leading_system_message_becomes_instructions() {
        let request: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "computer-use-alpha",
            "messages": [
                {"role": "system", "content": "Be terse."},
                {"role": "user", "content": "hi"},
                {"role": "system", "content": "Later system note"}
            ]
        }))
        .unwrap();

        let native = build_responses_request(request);

        assert_eq!(native.instructions, "Be terse.");
        assert_eq!(
            native.input,
            vec![
                InputItem::Message {
                    role: InputRole::User,
                    content: "hi".to_string()
                },
                InputItem::Message {
                    role: InputRole::System,
                    content: "Later system note".to_string()
                },
            ]
        );
    }

    #[test]
    fn leading_developer_message_becomes_instructions() {
        let request: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "computer-use-alpha",
            "messages": [
                {"role": "developer", "content": [{"type": "text", "text": "Rules"}]},
                {"role": "user", "content": "go"}
            ]
        }))
        .unwrap();

        let native = build_responses_request(request);
        assert_eq!(native.instructions, "Rules");
        assert_eq!(native.input.len(), 1);
    }

    #[test]
    fn no_messages_are_dropped_without_leading_system() {
        let request: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "computer-use-alpha",
            "messages": [
                {"role": "user", "content": "a"},
                {"role": "assistant", "content": "b"},
                {"role": "user", "content": "c"}
            ]
        }))
        .unwrap();

        let native = build_responses_request(request);
        assert_eq!(native.instructions, "");
        assert_eq!(native.input.len(), 3);
    }

    #[test]
    fn tool_calls_become_one_function_call_item_each() {
        let request: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "computer-use-alpha",
            "messages": [
                {"role": "user", "content": "weather?"},
                {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_1", "type": "function", "function": {"name": "weather", "arguments": "{\"city\":\"Paris\"}"}},
                    {"id": "call_2", "type": "function", "function": {"name": "time", "arguments": "{ }"}}
                ]},
                {"role": "tool", "tool_call_id": "call_1", "content": "sunny"},
                {"role": "function", "tool_call_id": "call_2", "content": "noon"}
            ]
        }))
        .unwrap();

        let native = build_responses_request(request);

        assert_eq!(
            native.input[1..],
            [
                InputItem::FunctionCall {
                    call_id: "call_1".to_string(),
                    name: "weather".to_string(),
                    arguments: "{\"city\":\"Paris\"}".to_string(),
                },
                InputItem::FunctionCall {
                    call_id: "call_2".to_string(),
                    name: "time".to_string(),
                    arguments: "{ }".to_string(),
                },
                InputItem::FunctionCallOutput {
                    call_id: "call_1".to_string(),
                    output: "sunny".to_string(),
                },
                InputItem::FunctionCallOutput {
                    call_id: "call_2".to_string(),
                    output: "noon".to_string(),
                },
            ]
        );
    }

    #[test]
    fn unsupported_roles_are_skipped() {
        let request: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "computer-use-alpha",
            "messages": [
                {"role": "critic", "content": "x"},
                {"role": "user", "content": "y"}
            ]
        }))
        .unwrap();

        assert_eq!(build_responses_request(request).input.len(), 1);
    }

    #[test]
    fn tools_map_to_function_tools() {
        let request: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "computer-use-alpha",
            "messages": [],
            "tools": [
                {"type": "function", "function": {
                    "name": "lookup",
                    "description": "Look something up",
                    "parameters": {"type": "object", "properties": {"q": {"type": "string"}}}
                }},
                {"type": "function", "function": {"name": "ping"}}
            ]
        }))
        .unwrap();

        let body = serde_json::to_value(build_responses_request(request)).unwrap();

        assert_eq!(
            body["tools"],
            json!([
                {
                    "type": "function",
                    "name": "lookup",
                    "description": "Look something up",
                    "parameters": {"type": "object", "properties": {"q": {"type": "string"}}},
                    "strict": false
                },
                {
                    "type": "function",
                    "name": "ping",
                    "parameters": {"type": "object", "properties": {}},
                    "strict": false
                }
            ])
        );
    }

    #[test]
    fn strict_tools_require_every_property() {
        let request: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "computer-use-alpha",
            "messages": [],
            "tools": [{"type": "function", "function": {
                "name": "book",
                "strict": true,
                "parameters": {
                    "type": "object",
                    "properties": {
                        "date": {"type": "string"},
                        "guest": {"type": "object", "properties": {"name": {"type": "string"}}}
                    },
                    "required": ["date"]
                }
            }}]
        }))
        .unwrap();

        let body = serde_json::to_value(build_responses_request(request)).unwrap();
        let parameters = &body["tools"][0]["parameters"];

        assert_eq!(body["tools"][0]["strict"], true);
        assert_eq!(parameters["required"], json!(["date", "guest"]));
        assert_eq!(parameters["additionalProperties"], false);
        assert_eq!(parameters["properties"]["guest"]["required"], json!(["name"]));
    }

    #[test]
    fn response_formats_map_to_text_config() {
        let translation = translate(
            json!({
                "model": "computer-use-alpha",
                "messages": [],
                "response_format": {"type": "json_object"}
            }),
            "/v1/chat/completions",
        );
        assert_eq!(
            translated_json(&translation)["text"],
            json!({"format": {"type": "json_object"}})
        );

        let translation = translate(
            json!({
                "model": "computer-use-alpha",
                "messages": [],
                "response_format": {"type": "json_schema", "json_schema": {"name": "x"}}
            }),
            "/v1/chat/completions",
        );
        assert!(translated_json(&translation).get("text").is_none());
    }

    #[test]
    fn sampling_parameters_are_copied() {
        let translation = translate(
            json!({
                "model": "computer-use-alpha",
                "messages": [],
                "temperature": 0.2,
                "top_p": 0.9,
                "max_tokens": 256,
                "user": "u-1"
            }),
            "/v1/chat/completions",
        );
        let body = translated_json(&translation);

        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["top_p"], 0.9);
        assert_eq!(body["max_output_tokens"], 256);
        assert_eq!(body["user"], "u-1");
    }

    #[test]
    fn streaming_sets_typed_stream_field() {
        let translation = translate(
            json!({"model": "computer-use-alpha", "messages": [], "stream": true}),
            "/v1/chat/completions",
        );

        assert!(matches!(
            translation,
            Translation::Translated {
                streaming: true,
                ..
            }
        ));
        assert_eq!(translated_json(&translation)["stream"], true);
    }

    #[test]
    fn custom_prefix_is_honored() {
        let translation = translate_request(
            Bytes::from_static(br#"{"model":"cu-large","messages":[]}"#),
            "/v1/chat/completions",
            "cu-",
        );
        assert!(translation.is_translated());
    }
}
