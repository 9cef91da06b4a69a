//! Credential validation against an OpenAI-style `/models` endpoint.

use crate::error::ProxyError;
use crate::http::create_client;
use crate::proxy::{normalize_upstream, upstream_url, ProxyConfig, ValidateFn, MODELS_PATH};
use futures::FutureExt;
use reqwest::{header, Client, Url};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ModelsBody {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

/// List the upstream models with the configured key. Valid credentials
/// answer 200 with at least one model.
pub async fn check_models_endpoint(
    client: &Client,
    base: &Url,
    api_key: &str,
) -> Result<(), ProxyError> {
    let url = upstream_url(base, MODELS_PATH, None);
    let response = client
        .get(url)
        .bearer_auth(api_key)
        .header(header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| ProxyError::Validation(format!("failed to connect to upstream: {}", e)))?;

    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| ProxyError::Validation(format!("failed to read upstream response: {}", e)))?;

    if !status.is_success() {
        return Err(match serde_json::from_slice::<ErrorBody>(&body) {
            Ok(err) if !err.error.message.is_empty() => ProxyError::Validation(format!(
                "authentication failed: {}",
                err.error.message
            )),
            _ => {
                tracing::debug!(
                    "Unexpected validation response {}: {}",
                    status,
                    String::from_utf8_lossy(&body)
                );
                ProxyError::Validation(format!("API validation failed with status {}", status))
            }
        });
    }

    let models: ModelsBody = serde_json::from_slice(&body).map_err(|e| {
        ProxyError::Validation(format!("failed to process API response: {}", e))
    })?;
    if models.data.is_empty() {
        return Err(ProxyError::Validation(
            "invalid API response: no models returned".to_string(),
        ));
    }
    Ok(())
}

/// Validation hook that checks the proxy's own upstream and key.
pub fn models_endpoint_hook() -> ValidateFn {
    Arc::new(|config: &ProxyConfig| {
        let base_url = config.base_url.clone();
        let api_key = config.api_key.clone();
        async move {
            let base = normalize_upstream(&base_url)?;
            let client = create_client()?;
            check_models_endpoint(&client, &base, &api_key).await
        }
        .boxed()
    })
}

/// `{"error": "<message>"}`, the line printed when validation fails.
pub fn error_json(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn validate_against(server: &mockito::ServerGuard, key: &str) -> Result<(), ProxyError> {
        let config = ProxyConfig::new("DeepSeek", 8000, format!("{}/v1", server.url()), key);
        models_endpoint_hook()(&config).await
    }

    #[tokio::test]
    async fn accepts_key_that_lists_models() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/models")
            .match_header("authorization", "Bearer sk-good")
            .with_status(200)
            .with_body(r#"{"object":"list","data":[{"id":"deepseek-chat","object":"model"}]}"#)
            .create_async()
            .await;

        validate_against(&server, "sk-good").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn surfaces_upstream_error_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/models")
            .with_status(401)
            .with_body(r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#)
            .create_async()
            .await;

        let err = validate_against(&server, "sk-bad").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation failed: authentication failed: Incorrect API key provided"
        );
    }

    #[tokio::test]
    async fn rejects_empty_model_list() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/models")
            .with_status(200)
            .with_body(r#"{"object":"list","data":[]}"#)
            .create_async()
            .await;

        let err = validate_against(&server, "sk-any").await.unwrap_err();
        assert!(err.to_string().contains("no models"));
    }

    #[tokio::test]
    async fn unexpected_status_without_error_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/models")
            .with_status(503)
            .with_body("upstream down")
            .create_async()
            .await;

        let err = validate_against(&server, "sk-any").await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn error_json_escapes_message() {
        assert_eq!(error_json(r#"bad "key""#), r#"{"error":"bad \"key\""}"#);
    }
}
