//! Escalating source extraction for one backend.
//!
//! The cascade starts from the backend's original answer and, while too few
//! exploitable URLs have been found, asks the same backend increasingly
//! directive follow-up questions. Candidates accumulate across tiers.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::urls::{self, Candidate};
use crate::config::PipelineSettings;
use crate::llm::{BackendRegistry, prompts};
use crate::models::{BackendResponse, CascadeTier, ExtractedSource, Query};

/// Cumulative state the escalation decision looks at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeProgress {
    /// Distinct normalised URLs seen so far, before validation
    pub raw_candidates: usize,
    /// Validated sources that are exploitable
    pub exploitable: usize,
}

/// Decide which tier runs after `tier`, or `None` to stop.
pub fn next_tier(
    tier: CascadeTier,
    progress: &CascadeProgress,
    threshold: usize,
) -> Option<CascadeTier> {
    if progress.exploitable >= threshold {
        return None;
    }
    match tier {
        CascadeTier::DirectParse if progress.raw_candidates < 2 => {
            Some(CascadeTier::ExplicitFollowUp)
        }
        CascadeTier::DirectParse => Some(CascadeTier::SpecificityEscalation),
        CascadeTier::ExplicitFollowUp if progress.raw_candidates == 0 => {
            Some(CascadeTier::ForcedCitation)
        }
        CascadeTier::ExplicitFollowUp => Some(CascadeTier::SpecificityEscalation),
        CascadeTier::ForcedCitation => Some(CascadeTier::SpecificityEscalation),
        CascadeTier::SpecificityEscalation => None,
    }
}

/// What happened at one tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierTrace {
    pub tier: CascadeTier,
    pub prompt_issued: bool,
    pub candidates_found: usize,
    pub accepted: usize,
    pub exploitable_after: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CascadeTrace {
    pub tiers: Vec<TierTrace>,
    /// The run deadline stopped the cascade before it would have ended
    #[serde(default)]
    pub deadline_reached: bool,
}

impl CascadeTrace {
    pub fn prompts_issued(&self) -> usize {
        self.tiers.iter().filter(|t| t.prompt_issued).count()
    }

    /// Exploitable counts after each tier, in execution order.
    pub fn exploitable_progression(&self) -> Vec<usize> {
        self.tiers.iter().map(|t| t.exploitable_after).collect()
    }
}

/// Result of running the cascade for one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceExtraction {
    pub backend_id: String,
    pub sources: Vec<ExtractedSource>,
    pub trace: CascadeTrace,
    /// Follow-up responses, one per prompt-issuing tier that succeeded
    pub follow_ups: Vec<BackendResponse>,
}

#[derive(Clone)]
pub struct SourceExtractor {
    registry: Arc<BackendRegistry>,
    threshold: usize,
    reachability_timeout: Option<Duration>,
}

impl SourceExtractor {
    pub fn new(registry: Arc<BackendRegistry>, settings: &PipelineSettings) -> Self {
        Self {
            registry,
            threshold: settings.exploitable_threshold.max(1),
            reachability_timeout: settings
                .check_reachability
                .then(|| Duration::from_secs(settings.reachability_timeout_secs)),
        }
    }

    /// Run the cascade over `response`, issuing follow-ups to the same backend.
    ///
    /// No follow-up is issued at or past `deadline`, and one still pending
    /// when it passes is dropped. Either way the sources gathered so far
    /// are kept and the trace is flagged.
    pub async fn extract(
        &self,
        query: &Query,
        response: &BackendResponse,
        deadline: Option<Instant>,
    ) -> SourceExtraction {
        let backend = response.backend_id.as_str();
        let mut accumulator = Accumulator::default();
        let mut trace = CascadeTrace::default();
        let mut follow_ups = Vec::new();
        let mut tier = CascadeTier::DirectParse;

        loop {
            let (text, error) = if tier.issues_prompt() {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    warn!("{}: deadline reached, {} round not issued", backend, tier);
                    trace.deadline_reached = true;
                    break;
                }
                let prompt = self.prompt_for(tier, query, response, &accumulator);
                info!("{}: escalating source extraction to {}", backend, tier);
                let call = self.registry.query_one(backend, &prompt);
                let outcome = match deadline {
                    Some(deadline) => tokio::time::timeout_at(deadline, call).await.ok(),
                    None => Some(call.await),
                };
                match outcome {
                    Some(Ok(reply)) => {
                        let text = reply.response_text.clone();
                        follow_ups.push(reply);
                        (Some(text), None)
                    }
                    Some(Err(e)) => {
                        warn!("{}: {} round failed: {}", backend, tier, e);
                        (None, Some(e.to_string()))
                    }
                    None => {
                        warn!("{}: {} round dropped at the deadline", backend, tier);
                        trace.deadline_reached = true;
                        trace.tiers.push(TierTrace {
                            tier,
                            prompt_issued: true,
                            candidates_found: 0,
                            accepted: 0,
                            exploitable_after: accumulator.progress().exploitable,
                            error: Some("pipeline deadline reached".to_string()),
                        });
                        break;
                    }
                }
            } else {
                (Some(response.response_text.clone()), None)
            };

            let candidates = text
                .as_deref()
                .map(|t| urls::find_candidates(t, tier))
                .unwrap_or_default();
            let accepted = accumulator.absorb(&candidates, tier, backend);
            let progress = accumulator.progress();

            debug!(
                "{}: {} found {} candidates, {} accepted, {} exploitable so far",
                backend,
                tier,
                candidates.len(),
                accepted,
                progress.exploitable
            );

            trace.tiers.push(TierTrace {
                tier,
                prompt_issued: tier.issues_prompt(),
                candidates_found: candidates.len(),
                accepted,
                exploitable_after: progress.exploitable,
                error,
            });

            match next_tier(tier, &progress, self.threshold) {
                Some(next) => tier = next,
                None => break,
            }
        }

        let mut sources = accumulator.into_sources();
        if let Some(timeout) = self.reachability_timeout {
            let checks = check_reachability(&mut sources, timeout);
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, checks).await.is_err() {
                        warn!("{}: reachability checks cut short by the deadline", backend);
                    }
                }
                None => checks.await,
            }
        }

        info!(
            "{}: {} sources ({} exploitable) after {} tier(s), progression {:?}",
            backend,
            sources.len(),
            sources.iter().filter(|s| s.seo_exploitable).count(),
            trace.tiers.len(),
            trace.exploitable_progression()
        );

        SourceExtraction {
            backend_id: backend.to_string(),
            sources,
            trace,
            follow_ups,
        }
    }

    fn prompt_for(
        &self,
        tier: CascadeTier,
        query: &Query,
        response: &BackendResponse,
        accumulator: &Accumulator,
    ) -> String {
        match tier {
            CascadeTier::ExplicitFollowUp => {
                prompts::explicit_sources_prompt(query, &response.response_text)
            }
            CascadeTier::ForcedCitation => prompts::forced_citation_prompt(query),
            CascadeTier::SpecificityEscalation => {
                prompts::specific_pages_prompt(query, &accumulator.generic_urls())
            }
            CascadeTier::DirectParse => String::new(),
        }
    }
}

/// Cumulative candidate and source sets across tiers.
#[derive(Default)]
struct Accumulator {
    seen: BTreeSet<String>,
    sources: BTreeMap<String, ExtractedSource>,
    next_order: usize,
}

impl Accumulator {
    /// Validate and merge `candidates`; returns how many were accepted.
    fn absorb(&mut self, candidates: &[Candidate], tier: CascadeTier, backend: &str) -> usize {
        let mut accepted = 0;
        for candidate in candidates {
            let Some(key) = urls::normalize_url(&candidate.raw_url) else {
                continue;
            };
            self.seen.insert(key);

            let order = self.next_order + 1;
            let Some(source) = urls::validate(candidate, tier, order, backend) else {
                continue;
            };
            accepted += 1;

            match self.sources.get_mut(&source.url) {
                Some(existing) => {
                    if source.extraction_confidence > existing.extraction_confidence {
                        let citation_order = existing.citation_order;
                        *existing = ExtractedSource {
                            citation_order,
                            ..source
                        };
                    }
                }
                None => {
                    self.next_order = order;
                    self.sources.insert(source.url.clone(), source);
                }
            }
        }
        accepted
    }

    fn progress(&self) -> CascadeProgress {
        CascadeProgress {
            raw_candidates: self.seen.len(),
            exploitable: self.sources.values().filter(|s| s.seo_exploitable).count(),
        }
    }

    fn generic_urls(&self) -> Vec<String> {
        self.sources
            .values()
            .filter(|s| !s.seo_exploitable)
            .map(|s| s.url.clone())
            .collect()
    }

    fn into_sources(self) -> Vec<ExtractedSource> {
        let mut sources: Vec<ExtractedSource> = self.sources.into_values().collect();
        sort_sources(&mut sources);
        sources
    }
}

/// Order by exploitable, trust tier and confidence (all descending), then URL.
pub fn sort_sources(sources: &mut [ExtractedSource]) {
    sources.sort_by(|a, b| {
        b.seo_exploitable
            .cmp(&a.seo_exploitable)
            .then_with(|| b.domain_trust_tier.cmp(&a.domain_trust_tier))
            .then_with(|| b.extraction_confidence.total_cmp(&a.extraction_confidence))
            .then_with(|| a.url.cmp(&b.url))
    });
}

/// HEAD every source; `status < 400` after redirects counts as reachable.
async fn check_reachability(sources: &mut [ExtractedSource], timeout: Duration) {
    let client = crate::llm::http_client(Some(timeout.as_secs().max(1)));
    let checks = sources.iter().map(|source| {
        let client = client.clone();
        let url = source.url.clone();
        async move {
            match client.head(&url).send().await {
                Ok(resp) => resp.status().as_u16() < 400,
                Err(e) => {
                    debug!("{} unreachable: {}", url, e);
                    false
                }
            }
        }
    });
    let results = join_all(checks).await;
    for (source, reachable) in sources.iter_mut().zip(results) {
        source.reachable = Some(reachable);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Backend;
    use crate::llm::mock::MockBackend;
    use crate::llm::prompts::{
        EXPLICIT_SOURCES_MARKER, FORCED_CITATION_MARKER, SPECIFIC_PAGES_MARKER,
    };

    fn progress(raw: usize, exploitable: usize) -> CascadeProgress {
        CascadeProgress {
            raw_candidates: raw,
            exploitable,
        }
    }

    fn response(backend: &str, text: &str) -> BackendResponse {
        BackendResponse {
            backend_id: backend.to_string(),
            model_name: format!("mock-{}", backend),
            prompt: "research".to_string(),
            response_text: text.to_string(),
            tokens_used: None,
            latency_ms: 1,
            timestamp: chrono::Utc::now(),
        }
    }

    fn extractor(mock: MockBackend) -> (SourceExtractor, Arc<MockBackend>) {
        let mock = Arc::new(mock);
        let settings = PipelineSettings::default();
        let registry = BackendRegistry::from_backends(vec![mock.clone() as Arc<dyn Backend>], &settings);
        (SourceExtractor::new(Arc::new(registry), &settings), mock)
    }

    #[test]
    fn test_next_tier_decisions() {
        use CascadeTier::*;
        assert_eq!(next_tier(DirectParse, &progress(5, 2), 2), None);
        assert_eq!(next_tier(DirectParse, &progress(1, 0), 2), Some(ExplicitFollowUp));
        assert_eq!(
            next_tier(DirectParse, &progress(3, 1), 2),
            Some(SpecificityEscalation)
        );
        assert_eq!(next_tier(ExplicitFollowUp, &progress(0, 0), 2), Some(ForcedCitation));
        assert_eq!(
            next_tier(ExplicitFollowUp, &progress(2, 0), 2),
            Some(SpecificityEscalation)
        );
        assert_eq!(
            next_tier(ForcedCitation, &progress(5, 0), 2),
            Some(SpecificityEscalation)
        );
        assert_eq!(next_tier(SpecificityEscalation, &progress(5, 0), 2), None);
        assert_eq!(next_tier(ForcedCitation, &progress(5, 3), 2), None);
    }

    #[tokio::test]
    async fn test_direct_parse_is_enough() {
        let (extractor, mock) = extractor(MockBackend::new("alpha"));
        let text = "See https://www.lesechos.fr/finance/neobanques-guide and \
                    https://www.capital.fr/comparatif-banques-2024 for details.";
        let result = extractor
            .extract(&Query::new("q", ""), &response("alpha", text), None)
            .await;

        assert_eq!(result.sources.len(), 2);
        assert_eq!(result.trace.tiers.len(), 1);
        assert_eq!(result.trace.prompts_issued(), 0);
        assert!(mock.prompts().is_empty());
        assert!(result.follow_ups.is_empty());
    }

    #[tokio::test]
    async fn test_escalates_to_explicit_follow_up() {
        let reply = "Source: Les Echos\nURL: https://www.lesechos.fr/finance/neobanques-guide\n\n\
                     Source: Capital\nURL: https://www.capital.fr/comparatif-banques-2024";
        let (extractor, mock) = extractor(MockBackend::new("alpha").on(EXPLICIT_SOURCES_MARKER, reply));

        let result = extractor
            .extract(&Query::new("q", ""), &response("alpha", "No links here."), None)
            .await;

        assert_eq!(mock.calls_containing(EXPLICIT_SOURCES_MARKER), 1);
        assert_eq!(mock.prompts().len(), 1);
        assert_eq!(result.sources.len(), 2);
        assert!(result.sources.iter().all(|s| s.tier == CascadeTier::ExplicitFollowUp));
        assert_eq!(result.follow_ups.len(), 1);
        let names: Vec<&str> = result.sources.iter().map(|s| s.display_name.as_str()).collect();
        assert!(names.contains(&"Les Echos"));
    }

    #[tokio::test]
    async fn test_full_cascade_when_nothing_works() {
        let (extractor, mock) = extractor(MockBackend::new("alpha").answer("I cannot cite anything."));
        let result = extractor
            .extract(&Query::new("q", ""), &response("alpha", "plain answer"), None)
            .await;

        assert!(result.sources.is_empty());
        let tiers: Vec<CascadeTier> = result.trace.tiers.iter().map(|t| t.tier).collect();
        assert_eq!(
            tiers,
            vec![
                CascadeTier::DirectParse,
                CascadeTier::ExplicitFollowUp,
                CascadeTier::ForcedCitation,
                CascadeTier::SpecificityEscalation,
            ]
        );
        assert_eq!(mock.calls_containing(FORCED_CITATION_MARKER), 1);
        assert_eq!(mock.calls_containing(SPECIFIC_PAGES_MARKER), 1);
    }

    #[tokio::test]
    async fn test_forced_citation_then_specificity() {
        let forced = "1. [Banque de France] - https://www.banque-france.fr\n\
                      2. [Les Echos] - https://www.lesechos.fr";
        let specific = "Source: Guide\nURL: https://www.lesechos.fr/finance/guide-neobanques\n\
                        ✅ https://www.moneyvox.fr/banque/comparatif-2024";
        let (extractor, mock) = extractor(
            MockBackend::new("alpha")
                .on(FORCED_CITATION_MARKER, forced)
                .on(SPECIFIC_PAGES_MARKER, specific)
                .answer("nothing useful"),
        );

        let result = extractor
            .extract(&Query::new("q", ""), &response("alpha", "plain"), None)
            .await;

        assert_eq!(result.sources.len(), 4);
        assert_eq!(result.trace.exploitable_progression(), vec![0, 0, 0, 2]);
        // Generic domains from the forced round are quoted back as rejected.
        let specific_prompt = mock
            .prompts()
            .into_iter()
            .find(|p| p.contains(SPECIFIC_PAGES_MARKER))
            .unwrap();
        assert!(specific_prompt.contains("https://www.banque-france.fr"));
        // Exploitable first in the final order.
        assert!(result.sources[0].seo_exploitable);
        assert!(result.sources[1].seo_exploitable);
        assert!(!result.sources[3].seo_exploitable);
    }

    #[tokio::test]
    async fn test_failed_follow_up_is_absorbed() {
        let (extractor, _mock) = extractor(MockBackend::new("alpha").failing());
        let result = extractor
            .extract(&Query::new("q", ""), &response("alpha", "plain"), None)
            .await;

        assert!(result.sources.is_empty());
        assert_eq!(result.trace.tiers.len(), 4);
        assert!(result.trace.tiers[1].error.is_some());
        assert!(result.follow_ups.is_empty());
    }

    #[tokio::test]
    async fn test_exploitable_count_never_decreases() {
        let direct = "https://www.site.fr and https://www.other.fr/banque";
        let specific = "✅ https://www.site.fr/guide/banques-2024";
        let (extractor, _mock) = extractor(
            MockBackend::new("alpha")
                .on(SPECIFIC_PAGES_MARKER, specific)
                .answer("https://www.site.fr/"),
        );
        let result = extractor
            .extract(&Query::new("q", ""), &response("alpha", direct), None)
            .await;

        let progression = result.trace.exploitable_progression();
        assert!(progression.windows(2).all(|w| w[0] <= w[1]), "{:?}", progression);
        assert_eq!(result.sources.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_mid_cascade_keeps_direct_sources() {
        let (extractor, mock) = extractor(
            MockBackend::new("alpha")
                .on(EXPLICIT_SOURCES_MARKER, "Source: Late\nURL: https://www.late.fr/guide")
                .slow_on(EXPLICIT_SOURCES_MARKER, Duration::from_secs(600)),
        );
        let deadline = Instant::now() + Duration::from_secs(5);
        let text = "Read https://www.lesechos.fr/finance/neobanques-guide first.";

        let result = extractor
            .extract(&Query::new("q", ""), &response("alpha", text), Some(deadline))
            .await;

        assert!(result.trace.deadline_reached);
        assert_eq!(mock.calls_containing(EXPLICIT_SOURCES_MARKER), 1);
        assert_eq!(result.sources.len(), 1);
        assert_eq!(
            result.sources[0].url,
            "https://www.lesechos.fr/finance/neobanques-guide"
        );
        assert_eq!(result.trace.tiers.len(), 2);
        assert!(result.trace.tiers[1].error.is_some());
        assert!(result.follow_ups.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_follow_up_after_deadline() {
        let (extractor, mock) = extractor(MockBackend::new("alpha").answer("anything"));
        let deadline = Instant::now();
        tokio::time::advance(Duration::from_secs(1)).await;

        let result = extractor
            .extract(&Query::new("q", ""), &response("alpha", "No links here."), Some(deadline))
            .await;

        assert!(result.trace.deadline_reached);
        assert!(mock.prompts().is_empty());
        assert_eq!(result.trace.tiers.len(), 1);
        assert_eq!(result.trace.prompts_issued(), 0);
    }

    #[test]
    fn test_accumulator_keeps_highest_confidence() {
        let mut acc = Accumulator::default();
        let plain = Candidate {
            raw_url: "https://www.site.fr/guide/".into(),
            label: None,
            offset: 0,
            pattern: "bare",
            citation_style: false,
            context: String::new(),
        };
        let cited = Candidate {
            raw_url: "https://WWW.site.fr/guide?utm_source=x".into(),
            label: Some("Site guide".into()),
            citation_style: true,
            ..plain.clone()
        };

        acc.absorb(&[plain], CascadeTier::ForcedCitation, "alpha");
        acc.absorb(&[cited], CascadeTier::DirectParse, "alpha");
        let sources = acc.into_sources();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].display_name, "Site guide");
        assert_eq!(sources[0].citation_order, 1);
        assert!((sources[0].extraction_confidence - 0.85).abs() < 1e-9);
    }
}
