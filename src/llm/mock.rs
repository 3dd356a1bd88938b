//! Scripted in-memory backend for tests.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use super::{Backend, Completion};

/// Answers prompts from a rule table: the first rule whose marker occurs in
/// the prompt wins, otherwise the default answer is used.
pub struct MockBackend {
    id: String,
    model: String,
    available: bool,
    failing: bool,
    delay: Option<Duration>,
    slow_rules: Vec<(String, Duration)>,
    default_answer: Option<String>,
    rules: Vec<(String, Option<String>)>,
    prompts: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            model: format!("mock-{}", id),
            available: true,
            failing: false,
            delay: None,
            slow_rules: Vec::new(),
            default_answer: None,
            rules: Vec::new(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Default answer for prompts matching no rule.
    pub fn answer(mut self, text: &str) -> Self {
        self.default_answer = Some(text.to_string());
        self
    }

    /// Answer prompts containing `marker` with `text`.
    pub fn on(mut self, marker: &str, text: &str) -> Self {
        self.rules.push((marker.to_string(), Some(text.to_string())));
        self
    }

    /// Fail prompts containing `marker`.
    pub fn fail_on(mut self, marker: &str) -> Self {
        self.rules.push((marker.to_string(), None));
        self
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Delay only prompts containing `marker`.
    pub fn slow_on(mut self, marker: &str, delay: Duration) -> Self {
        self.slow_rules.push((marker.to_string(), delay));
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn calls_containing(&self, marker: &str) -> usize {
        self.prompts().iter().filter(|p| p.contains(marker)).count()
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn query(&self, prompt: &str) -> Result<Completion> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        let delay = self
            .slow_rules
            .iter()
            .find(|(marker, _)| prompt.contains(marker.as_str()))
            .map(|(_, delay)| *delay)
            .or(self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing {
            anyhow::bail!("{} is down", self.id);
        }

        let answer = self
            .rules
            .iter()
            .find(|(marker, _)| prompt.contains(marker.as_str()))
            .map(|(_, answer)| answer.clone())
            .unwrap_or_else(|| self.default_answer.clone());

        match answer {
            Some(text) => Ok(Completion {
                tokens_used: Some(text.split_whitespace().count() as u32 + 4),
                text,
            }),
            None => anyhow::bail!("{} refused the prompt", self.id),
        }
    }
}
