mod anthropic;
mod google;
#[cfg(test)]
pub(crate) mod mock;
mod ollama;
mod openai;
pub(crate) mod parsing;
pub mod prompts;
pub mod registry;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use clap::ValueEnum;
use serde::Serialize;

use crate::config::Config;

pub use registry::BackendRegistry;

/// Text returned by a backend for one prompt.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub tokens_used: Option<u32>,
}

/// Uniform interface to an LLM backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Stable backend identifier (e.g. "openai")
    fn id(&self) -> &str;

    /// Model used for every query
    fn model(&self) -> &str;

    /// Whether credentials are present
    fn is_available(&self) -> bool;

    /// Send a single prompt and return the raw answer
    async fn query(&self, prompt: &str) -> Result<Completion>;

    /// Per-call timeout override
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

/// Model metadata shown by `sourcelens providers`.
#[derive(Debug, Clone, Serialize)]
pub struct BackendInfo {
    pub id: String,
    pub model: String,
    pub available: bool,
}

/// Static table of known backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum BackendKind {
    #[value(name = "openai")]
    OpenAI,
    Anthropic,
    #[value(alias = "gemini")]
    Google,
    Ollama,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::OpenAI,
        BackendKind::Anthropic,
        BackendKind::Google,
        BackendKind::Ollama,
    ];

    pub fn id(self) -> &'static str {
        match self {
            BackendKind::OpenAI => "openai",
            BackendKind::Anthropic => "anthropic",
            BackendKind::Google => "google",
            BackendKind::Ollama => "ollama",
        }
    }

    /// Build the adapter for this backend if it has a config section.
    pub fn build(self, config: &Config) -> Option<Box<dyn Backend>> {
        let provider = config.get_provider(self.id())?;
        let backend: Box<dyn Backend> = match self {
            BackendKind::OpenAI => Box::new(openai::OpenAIBackend::new(provider)),
            BackendKind::Anthropic => Box::new(anthropic::AnthropicBackend::new(provider)),
            BackendKind::Google => Box::new(google::GoogleBackend::new(provider)),
            BackendKind::Ollama => Box::new(ollama::OllamaBackend::new(provider)),
        };
        Some(backend)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Shared reqwest client builder for hosted backends.
pub(crate) fn http_client(timeout: Option<u64>) -> reqwest::Client {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(90));
    if let Some(secs) = timeout {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    builder.build().unwrap_or_else(|_| reqwest::Client::new())
}
