use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{Backend, BackendInfo, BackendKind};
use crate::config::{Config, PipelineSettings};
use crate::error::{BackendError, BackendFailure, FailureStage};
use crate::models::BackendResponse;

/// The set of usable backends, probed once at construction.
pub struct BackendRegistry {
    backends: Vec<Arc<dyn Backend>>,
    default_timeout: Duration,
    max_concurrency: usize,
}

impl BackendRegistry {
    /// Build every configured backend and keep those with credentials.
    pub fn from_config(config: &Config) -> Self {
        Self::from_config_filtered(config, &BackendKind::ALL)
    }

    /// Like [`BackendRegistry::from_config`] but restricted to `kinds`.
    pub fn from_config_filtered(config: &Config, kinds: &[BackendKind]) -> Self {
        let backends = BackendKind::ALL
            .iter()
            .filter(|kind| kinds.contains(kind))
            .filter_map(|kind| kind.build(config))
            .map(Arc::from)
            .collect();
        Self::from_backends(backends, &config.pipeline)
    }

    pub fn from_backends(candidates: Vec<Arc<dyn Backend>>, settings: &PipelineSettings) -> Self {
        let mut backends = Vec::new();
        for backend in candidates {
            if backend.is_available() {
                info!("Backend {} available (model {})", backend.id(), backend.model());
                backends.push(backend);
            } else {
                debug!("Backend {} has no credentials, skipping", backend.id());
            }
        }

        Self {
            backends,
            default_timeout: settings.request_timeout(),
            max_concurrency: settings.max_concurrency.max(1),
        }
    }

    pub fn ids(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Model metadata of every usable backend.
    pub fn describe(&self) -> Vec<BackendInfo> {
        self.backends
            .iter()
            .map(|b| BackendInfo {
                id: b.id().to_string(),
                model: b.model().to_string(),
                available: true,
            })
            .collect()
    }

    fn get(&self, id: &str) -> Option<&Arc<dyn Backend>> {
        self.backends.iter().find(|b| b.id() == id)
    }

    /// Query one backend with its per-call timeout.
    pub async fn query_one(&self, id: &str, prompt: &str) -> Result<BackendResponse, BackendError> {
        let backend = self
            .get(id)
            .ok_or_else(|| BackendError::UnknownBackend(id.to_string()))?;
        timed_query(backend.as_ref(), prompt, self.default_timeout).await
    }

    /// Query every available backend concurrently. Failures are returned
    /// separately and never abort the other calls.
    pub async fn query_all(&self, prompt: &str) -> (Vec<BackendResponse>, Vec<BackendFailure>) {
        self.broadcast(prompt, None).await
    }

    /// Like [`BackendRegistry::query_all`], but calls still running at
    /// `deadline` are aborted and reported as `DeadlineExceeded`.
    pub async fn query_all_until(
        &self,
        prompt: &str,
        deadline: Instant,
    ) -> (Vec<BackendResponse>, Vec<BackendFailure>) {
        self.broadcast(prompt, Some(deadline)).await
    }

    async fn broadcast(
        &self,
        prompt: &str,
        deadline: Option<Instant>,
    ) -> (Vec<BackendResponse>, Vec<BackendFailure>) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let prompt: Arc<str> = Arc::from(prompt);
        let mut tasks = Vec::with_capacity(self.backends.len());

        for backend in &self.backends {
            let backend = backend.clone();
            let semaphore = semaphore.clone();
            let prompt = prompt.clone();
            let timeout = self.default_timeout;
            let id = backend.id().to_string();

            let task = tokio::spawn(async move {
                // The semaphore is never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                timed_query(backend.as_ref(), &prompt, timeout).await
            });
            tasks.push((id, task));
        }

        let mut responses = Vec::new();
        let mut failures = Vec::new();

        for (id, mut task) in tasks {
            let joined = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, &mut task).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        task.abort();
                        warn!("{} still running at the pipeline deadline, aborted", id);
                        failures.push(BackendFailure::deadline(&id, FailureStage::Query));
                        continue;
                    }
                },
                None => task.await,
            };

            match joined {
                Ok(Ok(response)) => {
                    info!(
                        "{} answered ({} chars, {} ms)",
                        id,
                        response.response_text.len(),
                        response.latency_ms
                    );
                    responses.push(response);
                }
                Ok(Err(e)) => {
                    warn!("{}", e);
                    failures.push(BackendFailure::from_error(&id, FailureStage::Query, &e));
                }
                Err(e) => {
                    let err = BackendError::QueryFailed {
                        backend: id.clone(),
                        source: anyhow::anyhow!("task panicked: {}", e),
                    };
                    warn!("{}", err);
                    failures.push(BackendFailure::from_error(&id, FailureStage::Query, &err));
                }
            }
        }

        (responses, failures)
    }
}

/// List every configured backend with its availability, including the
/// ones the registry would skip.
pub fn describe_configured(config: &Config) -> Vec<BackendInfo> {
    BackendKind::ALL
        .iter()
        .filter_map(|kind| kind.build(config))
        .map(|b| BackendInfo {
            id: b.id().to_string(),
            model: b.model().to_string(),
            available: b.is_available(),
        })
        .collect()
}

async fn timed_query(
    backend: &dyn Backend,
    prompt: &str,
    default_timeout: Duration,
) -> Result<BackendResponse, BackendError> {
    let id = backend.id().to_string();
    let timeout = backend.timeout().unwrap_or(default_timeout);
    let started = Instant::now();

    let completion = match tokio::time::timeout(timeout, backend.query(prompt)).await {
        Ok(Ok(completion)) => completion,
        Ok(Err(source)) => return Err(BackendError::QueryFailed { backend: id, source }),
        Err(_) => {
            return Err(BackendError::Timeout {
                backend: id,
                after: timeout,
            });
        }
    };

    if completion.text.trim().is_empty() {
        return Err(BackendError::EmptyResponse { backend: id });
    }

    Ok(BackendResponse {
        backend_id: id,
        model_name: backend.model().to_string(),
        prompt: prompt.to_string(),
        response_text: completion.text,
        tokens_used: completion.tokens_used,
        latency_ms: started.elapsed().as_millis() as u64,
        timestamp: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::llm::mock::MockBackend;

    fn settings(timeout_secs: u64) -> PipelineSettings {
        PipelineSettings {
            request_timeout_secs: timeout_secs,
            ..Default::default()
        }
    }

    #[test]
    fn test_registry_probes_availability_once() {
        let registry = BackendRegistry::from_backends(
            vec![
                Arc::new(MockBackend::new("alpha").answer("a")),
                Arc::new(MockBackend::new("beta").unavailable()),
                Arc::new(MockBackend::new("gamma").answer("c")),
            ],
            &settings(5),
        );
        assert_eq!(registry.ids(), vec!["alpha", "gamma"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_query_one_unknown_backend() {
        let registry = BackendRegistry::from_backends(vec![], &settings(5));
        let result = tokio_test::block_on(registry.query_one("nope", "hi"));
        assert!(matches!(result, Err(BackendError::UnknownBackend(id)) if id == "nope"));
    }

    #[tokio::test]
    async fn test_query_one_records_metadata() {
        let registry = BackendRegistry::from_backends(
            vec![Arc::new(MockBackend::new("alpha").answer("hello"))],
            &settings(5),
        );
        let response = registry.query_one("alpha", "prompt text").await.unwrap();
        assert_eq!(response.backend_id, "alpha");
        assert_eq!(response.model_name, "mock-alpha");
        assert_eq!(response.prompt, "prompt text");
        assert_eq!(response.response_text, "hello");
        assert_eq!(response.tokens_used, Some(5));
    }

    #[tokio::test]
    async fn test_query_all_absorbs_failures() {
        let registry = BackendRegistry::from_backends(
            vec![
                Arc::new(MockBackend::new("ok").answer("fine")),
                Arc::new(MockBackend::new("broken").failing()),
                Arc::new(MockBackend::new("blank").answer("   ")),
            ],
            &settings(5),
        );

        let (responses, failures) = registry.query_all("q").await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].backend_id, "ok");
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].backend, "broken");
        assert_eq!(failures[0].kind, FailureKind::QueryFailed);
        assert_eq!(failures[1].backend, "blank");
        assert_eq!(failures[1].kind, FailureKind::EmptyResponse);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_all_times_out_slow_backend() {
        let registry = BackendRegistry::from_backends(
            vec![
                Arc::new(MockBackend::new("fast").answer("quick")),
                Arc::new(
                    MockBackend::new("slow")
                        .answer("late")
                        .delay(Duration::from_secs(60)),
                ),
            ],
            &settings(2),
        );

        let (responses, failures) = registry.query_all("q").await;
        assert_eq!(responses.len(), 1);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].backend, "slow");
        assert_eq!(failures[0].kind, FailureKind::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_all_until_aborts_at_deadline() {
        let registry = BackendRegistry::from_backends(
            vec![
                Arc::new(MockBackend::new("fast").answer("quick")),
                Arc::new(
                    MockBackend::new("slow")
                        .answer("late")
                        .delay(Duration::from_secs(60)),
                ),
            ],
            &settings(600),
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        let (responses, failures) = registry.query_all_until("q", deadline).await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].backend_id, "fast");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, FailureKind::DeadlineExceeded);
    }

    #[test]
    fn test_describe_configured_lists_unavailable() {
        let config = Config::default();
        assert!(describe_configured(&config).is_empty());

        let mut config = Config::default();
        config.providers.google = Some(crate::config::ProviderConfig::default());
        let infos = describe_configured(&config);
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].id, "google");
        assert!(!infos[0].available);
    }
}
