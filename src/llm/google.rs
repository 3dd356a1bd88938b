use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Backend, Completion, http_client};
use crate::config::ProviderConfig;

pub struct GoogleBackend {
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
struct GoogleRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "topK")]
    top_k: u32,
}

#[derive(Deserialize)]
struct GoogleResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<GoogleError>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct GoogleError {
    message: String,
}

#[derive(Deserialize)]
struct UsageMetadata {
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<u32>,
}

impl GoogleBackend {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            client: http_client(config.timeout_secs),
            api_key: config.api_key.clone(),
            available: config.has_credentials(),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "gemini-2.0-flash".to_string()),
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or("https://generativelanguage.googleapis.com/v1beta")
                .trim_end_matches('/')
                .to_string(),
            temperature: config.temperature_or_default(),
            max_tokens: config.max_tokens_or_default(),
            timeout: config.timeout_secs.map(Duration::from_secs),
        }
    }
}

#[async_trait]
impl Backend for GoogleBackend {
    fn id(&self) -> &str {
        "google"
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
        let request = GoogleRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
                top_p: 0.8,
                top_k: 10,
            },
        };

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Google API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Google API error ({}): {}", status, error_text);
        }

        let response: GoogleResponse = response
            .json()
            .await
            .context("Failed to parse Google response")?;

        if let Some(error) = response.error {
            anyhow::bail!("Google API error: {}", error.message);
        }

        let tokens_used = response.usage_metadata.and_then(|u| u.total_token_count);
        let text = response
            .candidates
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.content.parts.into_iter().next())
            .and_then(|p| p.text)
            .context("No content in Google response")?;

        Ok(Completion { text, tokens_used })
    }
}
