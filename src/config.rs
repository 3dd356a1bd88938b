use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub openai: Option<ProviderConfig>,
    pub anthropic: Option<ProviderConfig>,
    pub google: Option<ProviderConfig>,
    pub ollama: Option<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Overrides `pipeline.request_timeout_secs` for this backend.
    pub timeout_secs: Option<u64>,
}

impl ProviderConfig {
    pub fn has_credentials(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub fn temperature_or_default(&self) -> f32 {
        self.temperature.unwrap_or(0.3)
    }

    pub fn max_tokens_or_default(&self) -> u32 {
        self.max_tokens.unwrap_or(4000)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_deadline")]
    pub deadline_secs: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_exploitable_threshold")]
    pub exploitable_threshold: usize,
    #[serde(default)]
    pub check_reachability: bool,
    #[serde(default = "default_reachability_timeout")]
    pub reachability_timeout_secs: u64,
    #[serde(default = "default_sentiment_excerpt")]
    pub sentiment_excerpt_chars: usize,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_deadline() -> u64 {
    300
}

fn default_max_concurrency() -> usize {
    4
}

fn default_exploitable_threshold() -> usize {
    2
}

fn default_reachability_timeout() -> u64 {
    5
}

fn default_sentiment_excerpt() -> usize {
    1500
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            deadline_secs: default_deadline(),
            max_concurrency: default_max_concurrency(),
            exploitable_threshold: default_exploitable_threshold(),
            check_reachability: false,
            reachability_timeout_secs: default_reachability_timeout(),
            sentiment_excerpt_chars: default_sentiment_excerpt(),
        }
    }
}

impl PipelineSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Overall run deadline; `deadline_secs = 0` runs without one.
    pub fn deadline(&self) -> Option<Duration> {
        (self.deadline_secs > 0).then(|| Duration::from_secs(self.deadline_secs))
    }
}

impl Config {
    /// Built-in configuration: hosted backends read their keys from the
    /// environment, local ollama stays opt-in.
    pub fn builtin() -> Self {
        Self {
            providers: ProvidersConfig {
                openai: Some(ProviderConfig {
                    api_key: "${OPENAI_API_KEY}".to_string(),
                    model: Some("gpt-4o".to_string()),
                    ..Default::default()
                }),
                anthropic: Some(ProviderConfig {
                    api_key: "${ANTHROPIC_API_KEY}".to_string(),
                    model: Some("claude-sonnet-4-20250514".to_string()),
                    ..Default::default()
                }),
                google: Some(ProviderConfig {
                    api_key: "${GOOGLE_API_KEY}".to_string(),
                    model: Some("gemini-2.0-flash".to_string()),
                    ..Default::default()
                }),
                ollama: None,
            },
            pipeline: PipelineSettings::default(),
        }
    }

    /// Get the configuration directory path
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("sourcelens");
        Ok(config_dir)
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, falling back to [`Config::builtin`]
    /// when no file exists.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file at {}", config_path.display())
            })?;
            Self::from_toml(&content).with_context(|| {
                format!("Failed to parse config file at {}", config_path.display())
            })?
        } else {
            tracing::debug!(
                "No config file at {}, using built-in defaults",
                config_path.display()
            );
            Self::builtin()
        };

        config.expand_env_vars();
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Expand environment variables in API keys
    fn expand_env_vars(&mut self) {
        for provider in [
            &mut self.providers.openai,
            &mut self.providers.anthropic,
            &mut self.providers.google,
            &mut self.providers.ollama,
        ]
        .into_iter()
        .flatten()
        {
            provider.api_key = expand_env_var(&provider.api_key);
        }
    }

    /// Get provider configuration by name
    pub fn get_provider(&self, name: &str) -> Option<&ProviderConfig> {
        match name.to_lowercase().as_str() {
            "openai" => self.providers.openai.as_ref(),
            "anthropic" => self.providers.anthropic.as_ref(),
            "google" | "gemini" => self.providers.google.as_ref(),
            "ollama" => self.providers.ollama.as_ref(),
            _ => None,
        }
    }
}

/// Expand environment variable references like ${VAR_NAME}
fn expand_env_var(value: &str) -> String {
    if value.starts_with("${") && value.ends_with('}') {
        let var_name = &value[2..value.len() - 1];
        std::env::var(var_name).unwrap_or_default()
    } else if let Some(var_name) = value.strip_prefix('$') {
        std::env::var(var_name).unwrap_or_default()
    } else {
        value.to_string()
    }
}
