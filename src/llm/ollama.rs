use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Backend, Completion};
use crate::config::ProviderConfig;

pub struct OllamaBackend {
    client: Client,
    base_url: String,
    model: Option<String>,
    temperature: f32,
    timeout: Option<Duration>,
}

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<i32>,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: ResponseMessage,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

impl OllamaBackend {
    pub fn new(config: &ProviderConfig) -> Self {
        // Local models are slow; the pipeline timeout still bounds each call.
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or("http://localhost:11434")
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone(),
            temperature: config.temperature.unwrap_or(0.1),
            timeout: config.timeout_secs.map(Duration::from_secs),
        }
    }
}

#[async_trait]
impl Backend for OllamaBackend {
    fn id(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        self.model.as_deref().unwrap_or("")
    }

    /// Ollama needs no key; an explicitly configured model opts it in.
    fn is_available(&self) -> bool {
        self.model.as_deref().is_some_and(|m| !m.trim().is_empty())
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn query(&self, prompt: &str) -> Result<Completion> {
        let request = OllamaChatRequest {
            model: self.model().to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
                top_p: Some(0.9),
                top_k: Some(40),
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .context(
                "Failed to send request to Ollama API. Is Ollama running? (try: ollama serve)",
            )?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama API error ({}): {}", status, error_text);
        }

        let response: OllamaChatResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        let tokens_used = match (response.prompt_eval_count, response.eval_count) {
            (None, None) => None,
            (p, e) => Some(p.unwrap_or(0) + e.unwrap_or(0)),
        };

        Ok(Completion {
            text: response.message.content,
            tokens_used,
        })
    }
}
