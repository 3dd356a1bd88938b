//! Top-level run: query every backend, extract per backend, rate sentiment
//! per backend, then consolidate.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::{
    RunStatistics, SentimentAnalysis, SentimentAnalyzer, build_consensus, consolidate_entities,
    consolidate_sources,
};
use crate::config::PipelineSettings;
use crate::error::{BackendError, BackendFailure, FailureStage, PipelineError};
use crate::extract::{BackendExtraction, SourceExtractor};
use crate::llm::{BackendRegistry, prompts};
use crate::models::{
    BackendResponse, ConsensusResult, ExtractedEntity, ExtractedSource, Query, SentimentRecord,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    QueryingBackends,
    ExtractingPerBackend,
    AnalyzingSentimentPerBackend,
    Consolidating,
    Done,
    Failed,
}

/// What one backend contributed to the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendContribution {
    pub responded: bool,
    pub sources: usize,
    pub entities: usize,
    pub sentiment_records: usize,
    pub fallback_records: usize,
    pub prompts_issued: usize,
    pub tokens_used: u64,
}

/// Aggregate result of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub run_id: Uuid,
    pub query: Query,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stages: Vec<PipelineState>,
    pub backends_attempted: Vec<String>,
    pub backends_used: Vec<String>,
    pub failures: Vec<BackendFailure>,
    pub contributions: BTreeMap<String, BackendContribution>,
    pub responses: Vec<BackendResponse>,
    pub extractions: Vec<BackendExtraction>,
    pub sentiment: Vec<SentimentRecord>,
    pub sentiment_responses: Vec<BackendResponse>,
    pub sources: Vec<ExtractedSource>,
    pub entities: Vec<ExtractedEntity>,
    pub entity_consensus: BTreeMap<String, ConsensusResult>,
    pub source_consensus: BTreeMap<String, ConsensusResult>,
    pub statistics: RunStatistics,
}

pub struct Pipeline {
    registry: Arc<BackendRegistry>,
    extractor: SourceExtractor,
    analyzer: SentimentAnalyzer,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(registry: BackendRegistry, settings: &PipelineSettings) -> Self {
        let registry = Arc::new(registry);
        Self {
            extractor: SourceExtractor::new(registry.clone(), settings),
            analyzer: SentimentAnalyzer::new(registry.clone(), settings),
            registry,
            settings: settings.clone(),
        }
    }

    pub async fn run(&self, query: &Query) -> Result<AnalysisReport, PipelineError> {
        if query.question.trim().is_empty() {
            return Err(PipelineError::InvalidInput("the question is empty".to_string()));
        }

        let started_at = Utc::now();
        let deadline = self.settings.deadline().map(|d| Instant::now() + d);
        let mut stages = vec![PipelineState::Idle];
        let attempted = self.registry.ids();
        let query = Arc::new(query.clone());

        // Initial research round
        enter(&mut stages, PipelineState::QueryingBackends);
        let prompt = prompts::research_prompt(&query);
        let (responses, mut failures) = match deadline {
            Some(deadline) => self.registry.query_all_until(&prompt, deadline).await,
            None => self.registry.query_all(&prompt).await,
        };

        if responses.is_empty() {
            enter(&mut stages, PipelineState::Failed);
            return Err(PipelineError::NoBackendsResponded {
                attempted: attempted.len(),
                failures,
            });
        }

        // Extraction. Entity and ranking passes work on answers already
        // received; only the source cascade talks to backends again, and it
        // stops by itself at the deadline.
        enter(&mut stages, PipelineState::ExtractingPerBackend);
        let mut extractions: Vec<BackendExtraction> =
            responses.iter().map(BackendExtraction::from_response).collect();

        let semaphore = Arc::new(Semaphore::new(self.registry.max_concurrency()));
        let mut tasks = Vec::with_capacity(responses.len());
        for response in &responses {
            let extractor = self.extractor.clone();
            let query = query.clone();
            let response = response.clone();
            let semaphore = semaphore.clone();
            tasks.push((response.backend_id.clone(), async move {
                let _permit = semaphore.acquire_owned().await.ok();
                extractor.extract(&query, &response, deadline).await
            }));
        }
        for (backend, cascade) in fan_out(tasks, None, FailureStage::Extraction, &mut failures).await {
            if cascade.trace.deadline_reached {
                failures.push(BackendFailure::deadline(&backend, FailureStage::Extraction));
            }
            if let Some(extraction) = extractions.iter_mut().find(|e| e.backend_id == backend) {
                extraction.attach_sources(cascade);
            }
        }

        // Sentiment, one task per backend with its own subjects
        enter(&mut stages, PipelineState::AnalyzingSentimentPerBackend);
        let mut tasks = Vec::with_capacity(extractions.len());
        for extraction in &extractions {
            let Some(response) = responses
                .iter()
                .find(|r| r.backend_id == extraction.backend_id)
                .cloned()
            else {
                continue;
            };
            let analyzer = self.analyzer.clone();
            let query = query.clone();
            let entities = extraction.entities.clone();
            let sources = extraction.sources.clone();
            let semaphore = semaphore.clone();
            tasks.push((extraction.backend_id.clone(), async move {
                let _permit = semaphore.acquire_owned().await.ok();
                analyzer.analyze(&query, &response, &entities, &sources).await
            }));
        }
        let analyses: Vec<SentimentAnalysis> =
            fan_out(tasks, deadline, FailureStage::Sentiment, &mut failures)
                .await
                .into_iter()
                .map(|(_, analysis)| analysis)
                .collect();

        // Consolidation is pure and synchronous.
        enter(&mut stages, PipelineState::Consolidating);
        failures.extend(analyses.iter().filter_map(|a| a.failure.clone()));

        let sources = consolidate_sources(extractions.iter().map(|e| e.sources.as_slice()));
        let entities = consolidate_entities(extractions.iter().map(|e| e.entities.as_slice()));
        let sentiment: Vec<SentimentRecord> =
            analyses.iter().flat_map(|a| a.records.iter().cloned()).collect();
        let consensus = build_consensus(&sentiment);

        let backends_used: Vec<String> = responses.iter().map(|r| r.backend_id.clone()).collect();
        let backends_failed: Vec<String> = failures
            .iter()
            .map(|f| f.backend.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let contributions = contributions(&attempted, &responses, &extractions, &analyses);
        let statistics = RunStatistics::build(
            &backends_used,
            &backends_failed,
            &extractions,
            &sources,
            &entities,
            &consensus.entities,
            &consensus.sources,
        );

        enter(&mut stages, PipelineState::Done);
        info!(
            "Run finished: {} backend(s), {} sources, {} entities, {} failure(s)",
            backends_used.len(),
            sources.len(),
            entities.len(),
            failures.len()
        );

        Ok(AnalysisReport {
            run_id: Uuid::new_v4(),
            query: (*query).clone(),
            started_at,
            finished_at: Utc::now(),
            stages,
            backends_attempted: attempted,
            backends_used,
            failures,
            contributions,
            responses,
            sentiment_responses: analyses.iter().filter_map(|a| a.response.clone()).collect(),
            extractions,
            sentiment,
            sources,
            entities,
            entity_consensus: consensus.entities,
            source_consensus: consensus.sources,
            statistics,
        })
    }
}

fn enter(stages: &mut Vec<PipelineState>, state: PipelineState) {
    info!("Pipeline state: {:?}", state);
    stages.push(state);
}

/// Spawn one task per backend and collect the results in spawn order.
///
/// Tasks still running at `deadline` are aborted and recorded as
/// `DeadlineExceeded`. A round that would start after the deadline is not
/// spawned at all.
async fn fan_out<T, F>(
    tasks: Vec<(String, F)>,
    deadline: Option<Instant>,
    stage: FailureStage,
    failures: &mut Vec<BackendFailure>,
) -> Vec<(String, T)>
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
{
    if deadline.is_some_and(|d| Instant::now() >= d) {
        for (backend, _) in tasks {
            warn!("{}: {:?} stage skipped, pipeline deadline already reached", backend, stage);
            failures.push(BackendFailure::deadline(&backend, stage));
        }
        return Vec::new();
    }

    let handles: Vec<(String, JoinHandle<T>)> = tasks
        .into_iter()
        .map(|(backend, task)| (backend, tokio::spawn(task)))
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (backend, mut handle) in handles {
        let joined = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, &mut handle).await,
            None => Ok((&mut handle).await),
        };
        match joined {
            Ok(Ok(value)) => results.push((backend, value)),
            Ok(Err(e)) => {
                let err = BackendError::QueryFailed {
                    backend: backend.clone(),
                    source: anyhow::anyhow!("task failed: {}", e),
                };
                warn!("{}", err);
                failures.push(BackendFailure::from_error(&backend, stage, &err));
            }
            Err(_) => {
                handle.abort();
                warn!("{}: {:?} stage aborted at the pipeline deadline", backend, stage);
                failures.push(BackendFailure::deadline(&backend, stage));
            }
        }
    }
    results
}

fn contributions(
    attempted: &[String],
    responses: &[BackendResponse],
    extractions: &[BackendExtraction],
    analyses: &[SentimentAnalysis],
) -> BTreeMap<String, BackendContribution> {
    let mut map: BTreeMap<String, BackendContribution> = attempted
        .iter()
        .map(|id| (id.clone(), BackendContribution::default()))
        .collect();

    let tokens = |r: &BackendResponse| u64::from(r.tokens_used.unwrap_or(0));

    for response in responses {
        let entry = map.entry(response.backend_id.clone()).or_default();
        entry.responded = true;
        entry.prompts_issued += 1;
        entry.tokens_used += tokens(response);
    }
    for extraction in extractions {
        let entry = map.entry(extraction.backend_id.clone()).or_default();
        entry.sources = extraction.sources.len();
        entry.entities = extraction.entities.len();
        entry.prompts_issued += extraction.cascade.prompts_issued();
        entry.tokens_used += extraction.follow_ups.iter().map(tokens).sum::<u64>();
    }
    for analysis in analyses {
        let entry = map.entry(analysis.backend_id.clone()).or_default();
        entry.sentiment_records = analysis.records.len();
        entry.fallback_records = analysis.records.iter().filter(|r| r.is_fallback()).count();
        if let Some(response) = &analysis.response {
            entry.prompts_issued += 1;
            entry.tokens_used += tokens(response);
        }
    }
    map
}
