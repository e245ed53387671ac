// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! LLM client abstraction for judge models

use crate::config::LLMJudgeConfig;
use crate::prompts::JUDGE_SYSTEM_PROMPT;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Trait for LLM clients used as judges
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Send a prompt and get the raw completion back
    async fn evaluate(&self, prompt: String) -> Result<LLMResponse, LLMError>;

    fn model_name(&self) -> &str;

    /// Where requests go; verdicts are cached per model and endpoint
    fn endpoint(&self) -> &str {
        ""
    }
}

/// Response from LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
}

impl LLMResponse {
    /// Parse response as JSON
    pub fn as_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.content)
    }
}

/// Token usage information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Errors from LLM clients
#[derive(Debug, Error)]
pub enum LLMError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid judge configuration: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible chat completions client
pub struct OpenAIClient {
    api_key: String,
    model: String,
    base_url: String,
    system_prompt: String,
    client: reqwest::Client,
}

impl OpenAIClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
            system_prompt: JUDGE_SYSTEM_PROMPT.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: String) -> Self {
        self.system_prompt = system_prompt;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl LLMClient for OpenAIClient {
    async fn evaluate(&self, prompt: String) -> Result<LLMResponse, LLMError> {
        let request = serde_json::json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": self.system_prompt
                },
                {
                    "role": "user",
                    "content": prompt
                }
            ],
            "temperature": 0.0,
            "response_format": { "type": "json_object" }
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(LLMError::RateLimitExceeded);
            }
            return Err(LLMError::ApiError(format!("{}: {}", status, error_text)));
        }

        let response_data: serde_json::Value = response.json().await?;

        let content = response_data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or(LLMError::InvalidResponse("Missing content".to_string()))?
            .to_string();

        let usage_data = &response_data["usage"];
        let usage = TokenUsage {
            prompt_tokens: usage_data["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: usage_data["completion_tokens"].as_u64().unwrap_or(0) as u32,
            total_tokens: usage_data["total_tokens"].as_u64().unwrap_or(0) as u32,
        };

        Ok(LLMResponse {
            content,
            usage,
            model: self.model.clone(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> &str {
        &self.base_url
    }
}

/// Builds judge clients from resolved judge configuration
pub trait JudgeClientFactory: Send + Sync {
    fn create(&self, config: &LLMJudgeConfig) -> Result<Arc<dyn LLMClient>, LLMError>;
}

/// Factory producing [`OpenAIClient`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAIClientFactory;

impl JudgeClientFactory for OpenAIClientFactory {
    fn create(&self, config: &LLMJudgeConfig) -> Result<Arc<dyn LLMClient>, LLMError> {
        if config.model_name.trim().is_empty() {
            return Err(LLMError::Config("model name is empty".to_string()));
        }
        let api_key = config
            .usable_api_key()
            .ok_or_else(|| LLMError::Config(format!("no API key for model {}", config.model_name)))?;

        let mut client = OpenAIClient::new(api_key.to_string(), config.model_name.clone());
        if let Some(base_url) = config.base_url.as_deref().filter(|u| !u.trim().is_empty()) {
            client = client.with_base_url(base_url.to_string());
        }
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn completion(content: &str) -> String {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150}
        })
        .to_string()
    }

    #[test]
    fn test_endpoint_is_base_url() {
        let client = OpenAIClient::new("sk-test".to_string(), "gpt-4o".to_string())
            .with_base_url("http://judge.local/v1/".to_string());
        assert_eq!(client.endpoint(), "http://judge.local/v1");
    }

    #[tokio::test]
    async fn test_openai_client_parses_completion() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "judge-model",
                "temperature": 0.0
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion(r#"{"metric_score": 1, "score_reasoning": "ok"}"#))
            .create_async()
            .await;

        let client = OpenAIClient::new("test-key".to_string(), "judge-model".to_string())
            .with_base_url(format!("{}/", server.url()));
        let response = client.evaluate("grade this".to_string()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.model, "judge-model");
        assert_eq!(response.usage.total_tokens, 150);
        assert_eq!(response.as_json().unwrap()["metric_score"], 1);
    }

    #[tokio::test]
    async fn test_openai_client_rate_limit() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body("slow down")
            .create_async()
            .await;

        let client = OpenAIClient::new("k".to_string(), "m".to_string()).with_base_url(server.url());
        let err = client.evaluate("p".to_string()).await.unwrap_err();
        assert!(matches!(err, LLMError::RateLimitExceeded));
    }

    #[tokio::test]
    async fn test_openai_client_missing_content() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices": []}"#)
            .create_async()
            .await;

        let client = OpenAIClient::new("k".to_string(), "m".to_string()).with_base_url(server.url());
        let err = client.evaluate("p".to_string()).await.unwrap_err();
        assert!(matches!(err, LLMError::InvalidResponse(_)));
    }

    #[test]
    fn test_factory_rejects_placeholder_key() {
        let config = LLMJudgeConfig {
            model_name: "gpt-4o".to_string(),
            base_url: None,
            api_key: Some("sk-...".to_string()),
        };
        assert!(matches!(
            OpenAIClientFactory.create(&config),
            Err(LLMError::Config(_))
        ));

        let config = LLMJudgeConfig {
            api_key: Some("real-key".to_string()),
            base_url: Some("http://localhost:4000/v1".to_string()),
            ..config
        };
        let client = OpenAIClientFactory.create(&config).unwrap();
        assert_eq!(client.model_name(), "gpt-4o");
    }
}
