//! OpenAI-compatible LLM provider.
//!
//! Supports OpenAI and any endpoint that follows the chat completions API
//! format.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::types::{ChatMessage, CompletionRequest, CompletionResponse, Role, TokenUsage};

use super::LlmProvider;

/// OpenAI-compatible chat completion provider.
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

impl OpenAiProvider {
    /// Create a new provider from configuration.
    ///
    /// Reads the API key from the environment variable named in
    /// `config.api_key_env`.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key =
            std::env::var(&config.api_key_env).map_err(|_| LlmError::AuthFailed {
                provider: format!("OpenAI-compatible: env var '{}' not set", config.api_key_env),
            })?;
        Ok(Self::with_key(config, api_key))
    }

    /// Create a new provider with an explicitly provided API key.
    pub fn with_key(config: &LlmConfig, api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key,
            model: config.model.clone(),
            timeout_secs: config.timeout_secs,
        }
    }

    fn messages_to_json(messages: &[ChatMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                json!({ "role": role, "content": msg.content })
            })
            .collect()
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> LlmError {
        match status.as_u16() {
            401 | 403 => LlmError::AuthFailed {
                provider: "openai".to_string(),
            },
            429 => {
                // Best effort: pull retry-after out of the error body.
                let retry_after_secs = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| v["error"]["retry_after"].as_u64())
                    .unwrap_or(1);
                LlmError::RateLimited { retry_after_secs }
            }
            500..=599 => LlmError::Connection {
                message: format!("Server error HTTP {status}"),
            },
            _ => LlmError::ApiRequest {
                message: format!("HTTP {status}: {}", truncate(body, 200)),
            },
        }
    }

    fn parse_response(json: &Value, fallback_model: &str) -> Result<CompletionResponse, LlmError> {
        let text = json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::ResponseParse {
                message: "Missing choices[0].message.content".to_string(),
            })?
            .to_string();

        let usage = TokenUsage {
            prompt_tokens: json["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as usize,
            completion_tokens: json["usage"]["completion_tokens"].as_u64().unwrap_or(0) as usize,
        };

        let model = json["model"]
            .as_str()
            .unwrap_or(fallback_model)
            .to_string();

        Ok(CompletionResponse { text, usage, model })
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "messages": Self::messages_to_json(&request.messages),
            "temperature": request.temperature,
            "stream": false,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        debug!(url = %url, model = %self.model, "Sending chat completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        timeout_secs: self.timeout_secs,
                    }
                } else {
                    LlmError::Connection {
                        message: format!("Request failed: {e}"),
                    }
                }
            })?;

        let status = response.status();
        let response_body = response.text().await.map_err(|e| LlmError::ApiRequest {
            message: format!("Failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &response_body));
        }

        let json: Value =
            serde_json::from_str(&response_body).map_err(|e| LlmError::ResponseParse {
                message: format!("Invalid JSON: {e}"),
            })?;

        Self::parse_response(&json, &self.model)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAiProvider {
        OpenAiProvider::with_key(&LlmConfig::default(), "test-key".to_string())
    }

    #[test]
    fn test_messages_to_json_roles() {
        let messages = vec![
            ChatMessage::system("be terse"),
            ChatMessage::user("hello"),
            ChatMessage::assistant("hi"),
        ];
        let json = OpenAiProvider::messages_to_json(&messages);
        assert_eq!(json[0]["role"], "system");
        assert_eq!(json[1]["role"], "user");
        assert_eq!(json[2]["role"], "assistant");
        assert_eq!(json[1]["content"], "hello");
    }

    #[test]
    fn test_parse_response_extracts_text_and_usage() {
        let body = serde_json::json!({
            "model": "gpt-4o-mini",
            "choices": [{"message": {"role": "assistant", "content": "30 days."}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 8, "total_tokens": 128}
        });
        let resp = OpenAiProvider::parse_response(&body, "fallback").unwrap();
        assert_eq!(resp.text, "30 days.");
        assert_eq!(resp.usage.prompt_tokens, 120);
        assert_eq!(resp.usage.completion_tokens, 8);
        assert_eq!(resp.usage.total(), 128);
        assert_eq!(resp.model, "gpt-4o-mini");
    }

    #[test]
    fn test_parse_response_missing_content_is_error() {
        let body = serde_json::json!({"choices": []});
        assert!(matches!(
            OpenAiProvider::parse_response(&body, "m"),
            Err(LlmError::ResponseParse { .. })
        ));
    }

    #[test]
    fn test_parse_response_missing_usage_zeroes() {
        let body = serde_json::json!({
            "choices": [{"message": {"content": "ok"}}]
        });
        let resp = OpenAiProvider::parse_response(&body, "m").unwrap();
        assert_eq!(resp.usage, TokenUsage::default());
        assert_eq!(resp.model, "m");
    }

    #[test]
    fn test_map_http_error_auth() {
        let err = OpenAiProvider::map_http_error(reqwest::StatusCode::UNAUTHORIZED, "");
        assert!(matches!(err, LlmError::AuthFailed { .. }));
    }

    #[test]
    fn test_map_http_error_rate_limited() {
        let err = OpenAiProvider::map_http_error(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            r#"{"error": {"retry_after": 7}}"#,
        );
        assert!(matches!(
            err,
            LlmError::RateLimited {
                retry_after_secs: 7
            }
        ));
    }

    #[test]
    fn test_map_http_error_server() {
        let err = OpenAiProvider::map_http_error(reqwest::StatusCode::BAD_GATEWAY, "oops");
        assert!(matches!(err, LlmError::Connection { .. }));
    }

    #[test]
    fn test_model_name() {
        assert_eq!(provider().model_name(), "gpt-4o-mini");
    }
}
