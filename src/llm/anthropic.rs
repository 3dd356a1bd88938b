use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Backend, Completion, http_client};
use crate::config::ProviderConfig;

pub struct AnthropicBackend {
    client: Client,
    api_key: String,
    available: bool,
    model: String,
    base_url: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Option<Duration>,
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

impl AnthropicBackend {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            client: http_client(config.timeout_secs),
            api_key: config.api_key.clone(),
            available: config.has_credentials(),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "claude-sonnet-4-20250514".to_string()),
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or("https://api.anthropic.com")
                .trim_end_matches('/')
                .to_string(),
            temperature: config.temperature_or_default(),
            max_tokens: config.max_tokens_or_default(),
            timeout: config.timeout_secs.map(Duration::from_secs),
        }
    }
}

#[async_trait]
impl Backend for AnthropicBackend {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn query(&self, prompt: &str) -> Result<Completion> {
        let request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Anthropic API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Anthropic API error ({}): {}", status, error_text);
        }

        let response: AnthropicResponse = response
            .json()
            .await
            .context("Failed to parse Anthropic response")?;

        let tokens_used = response
            .usage
            .map(|u| u.input_tokens.unwrap_or(0) + u.output_tokens.unwrap_or(0));

        // Multiple text blocks are concatenated; tool/thinking blocks carry no text.
        let text: String = response
            .content
            .into_iter()
            .filter_map(|c| c.text)
            .collect::<Vec<_>>()
            .join("\n");

        if text.is_empty() {
            anyhow::bail!("No text content in Anthropic response");
        }

        Ok(Completion { text, tokens_used })
    }
}
