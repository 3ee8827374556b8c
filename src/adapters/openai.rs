//! OpenAI chat completion adapter
//!
//! `DecisionOraclePort` implementation over the chat completions
//! endpoint. Returns the assistant message verbatim; the application
//! layer owns turning that text into a decision.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::ports::oracle::{DecisionOraclePort, OracleError};

/// OpenAI client configuration
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Base URL for the OpenAI API
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Request timeout; completions are slow, so this is generous
    pub timeout: Duration,
    /// Number of retry attempts
    pub max_retries: u32,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(60),
            max_retries: 2,
            temperature: 0.2,
            max_tokens: 400,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: String,
}

/// OpenAI-backed decision oracle
#[derive(Debug, Clone)]
pub struct OpenAiOracle {
    config: OpenAiConfig,
    http: Client,
}

impl OpenAiOracle {
    pub fn new(config: OpenAiConfig) -> Result<Self, OracleError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| OracleError::Request(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { config, http })
    }
}

#[async_trait]
impl DecisionOraclePort for OpenAiOracle {
    async fn complete(&self, system: &str, user: &str) -> Result<String, OracleError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(&request)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        last_error = Some(OracleError::Request(format!("status {status}")));
                        tokio::time::sleep(Duration::from_secs(2u64.pow(attempt + 1))).await;
                        continue;
                    }
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(OracleError::Request(format!("{status}: {body}")));
                    }
                    let parsed: ChatResponse = response
                        .json()
                        .await
                        .map_err(|e| OracleError::Malformed(e.to_string()))?;
                    return parsed
                        .choices
                        .into_iter()
                        .next()
                        .map(|c| c.message.content)
                        .ok_or_else(|| OracleError::Malformed("no choices in response".into()));
                }
                Err(e) => {
                    last_error = Some(OracleError::Request(e.to_string()));
                    tokio::time::sleep(Duration::from_millis(500 * (attempt as u64 + 1))).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| OracleError::Request("max retries exceeded".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_chat_shape() {
        let request = ChatRequest {
            model: "gpt-4o-mini",
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "You are a trading analyst.",
                },
                ChatMessage {
                    role: "user",
                    content: "SPY briefing",
                },
            ],
            temperature: 0.2,
            max_tokens: 400,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "gpt-4o-mini");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "SPY briefing");
    }

    #[test]
    fn response_extracts_first_choice() {
        let json = r#"{
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "{\"action\":\"buy\"}"}, "finish_reason": "stop"}
            ],
            "usage": {"prompt_tokens": 120, "completion_tokens": 12}
        }"#;
        let response: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.choices[0].message.content, "{\"action\":\"buy\"}");
    }

    #[test]
    fn default_config() {
        let config = OpenAiConfig::default();
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.base_url, "https://api.openai.com/v1");
    }
}
