use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Backend, Completion, http_client};
use crate::config::ProviderConfig;

pub struct OpenAIBackend {
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
struct OpenAIRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: Option<u32>,
}

impl OpenAIBackend {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            client: http_client(config.timeout_secs),
            api_key: config.api_key.clone(),
            available: config.has_credentials(),
            model: config.model.clone().unwrap_or_else(|| "gpt-4o".to_string()),
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            temperature: config.temperature_or_default(),
            max_tokens: config.max_tokens_or_default(),
            timeout: config.timeout_secs.map(Duration::from_secs),
        }
    }
}

#[async_trait]
impl Backend for OpenAIBackend {
    fn id(&self) -> &str {
        "openai"
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
        let request = OpenAIRequest {
            model: self.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Failed to send request to OpenAI API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI API error ({}): {}", status, error_text);
        }

        let response: OpenAIResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI response")?;

        let tokens_used = response.usage.and_then(|u| u.total_tokens);
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("No content in OpenAI response")?;

        Ok(Completion { text, tokens_used })
    }
}
