//! Summary reports over the consolidated results.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::extract::BackendExtraction;
use crate::models::{
    CascadeTier, ConsensusResult, DetectionMethod, EntityType, ExtractedEntity, ExtractedSource,
    Sentiment, TrustTier,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UrlReport {
    pub total_sources: usize,
    pub exploitable: usize,
    pub per_backend: BTreeMap<String, usize>,
    pub unique_domains: usize,
    pub trust_distribution: BTreeMap<TrustTier, usize>,
    /// Sources per cascade tier that produced them
    pub extraction_methods: BTreeMap<CascadeTier, usize>,
    pub reachable: usize,
    pub unreachable: usize,
    pub unchecked: usize,
}

impl UrlReport {
    pub fn build(sources: &[ExtractedSource]) -> Self {
        let mut report = UrlReport {
            total_sources: sources.len(),
            ..Default::default()
        };
        let mut domains = BTreeSet::new();

        for source in sources {
            domains.insert(source.domain.as_str());
            if source.seo_exploitable {
                report.exploitable += 1;
            }
            for backend in &source.backends {
                *report.per_backend.entry(backend.clone()).or_default() += 1;
            }
            *report.trust_distribution.entry(source.domain_trust_tier).or_default() += 1;
            *report.extraction_methods.entry(source.tier).or_default() += 1;
            match source.reachable {
                Some(true) => report.reachable += 1,
                Some(false) => report.unreachable += 1,
                None => report.unchecked += 1,
            }
        }

        report.unique_domains = domains.len();
        report
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityReport {
    pub total_entities: usize,
    pub by_detection_method: BTreeMap<DetectionMethod, usize>,
    pub by_type: BTreeMap<EntityType, usize>,
    pub total_mentions: usize,
}

impl EntityReport {
    pub fn build(entities: &[ExtractedEntity]) -> Self {
        let mut report = EntityReport {
            total_entities: entities.len(),
            ..Default::default()
        };
        for entity in entities {
            for method in &entity.detection_methods {
                *report.by_detection_method.entry(*method).or_default() += 1;
            }
            *report.by_type.entry(entity.entity_type).or_default() += 1;
            report.total_mentions += entity.mention_count;
        }
        report
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendPerformance {
    pub entities: usize,
    pub sources: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub backends_used: Vec<String>,
    pub backends_failed: Vec<String>,
    pub extraction_performance: BTreeMap<String, BackendPerformance>,
    pub entity_sentiment: BTreeMap<Sentiment, usize>,
    pub source_sentiment: BTreeMap<Sentiment, usize>,
    pub urls: UrlReport,
    pub entities: EntityReport,
}

impl RunStatistics {
    pub fn build(
        backends_used: &[String],
        backends_failed: &[String],
        extractions: &[BackendExtraction],
        sources: &[ExtractedSource],
        entities: &[ExtractedEntity],
        entity_consensus: &BTreeMap<String, ConsensusResult>,
        source_consensus: &BTreeMap<String, ConsensusResult>,
    ) -> Self {
        let extraction_performance = extractions
            .iter()
            .map(|e| {
                (
                    e.backend_id.clone(),
                    BackendPerformance {
                        entities: e.entities.len(),
                        sources: e.sources.len(),
                        total: e.entities.len() + e.sources.len(),
                    },
                )
            })
            .collect();

        RunStatistics {
            backends_used: backends_used.to_vec(),
            backends_failed: backends_failed.to_vec(),
            extraction_performance,
            entity_sentiment: sentiment_distribution(entity_consensus),
            source_sentiment: sentiment_distribution(source_consensus),
            urls: UrlReport::build(sources),
            entities: EntityReport::build(entities),
        }
    }
}

fn sentiment_distribution(consensus: &BTreeMap<String, ConsensusResult>) -> BTreeMap<Sentiment, usize> {
    let mut distribution: BTreeMap<Sentiment, usize> =
        Sentiment::PRECEDENCE.iter().map(|s| (*s, 0)).collect();
    for result in consensus.values() {
        *distribution.entry(result.winning_sentiment).or_default() += 1;
    }
    distribution
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(url: &str, domain: &str, tier: TrustTier, reachable: Option<bool>) -> ExtractedSource {
        ExtractedSource {
            url: url.into(),
            display_name: domain.into(),
            domain: domain.into(),
            citation_order: 1,
            context_snippet: String::new(),
            extraction_confidence: 0.7,
            domain_trust_tier: tier,
            seo_exploitable: url.contains("guide"),
            exploitability_reason: String::new(),
            reachable,
            tier: CascadeTier::DirectParse,
            backends: BTreeSet::from(["a".to_string(), "b".to_string()]),
        }
    }

    #[test]
    fn test_url_report() {
        let sources = vec![
            source("https://www.site.fr/guide", "www.site.fr", TrustTier::Medium, Some(true)),
            source("https://www.site.fr/x", "www.site.fr", TrustTier::Medium, None),
            source("https://www.lesechos.fr/guide", "www.lesechos.fr", TrustTier::High, Some(false)),
        ];
        let report = UrlReport::build(&sources);
        assert_eq!(report.total_sources, 3);
        assert_eq!(report.exploitable, 2);
        assert_eq!(report.unique_domains, 2);
        assert_eq!(report.per_backend["a"], 3);
        assert_eq!(report.trust_distribution[&TrustTier::Medium], 2);
        assert_eq!(report.extraction_methods[&CascadeTier::DirectParse], 3);
        assert_eq!((report.reachable, report.unreachable, report.unchecked), (1, 1, 1));
    }

    #[test]
    fn test_entity_report() {
        let entity = ExtractedEntity {
            canonical_name: "qonto".into(),
            display_name: "Qonto".into(),
            description: String::new(),
            detection_methods: BTreeSet::from([
                DetectionMethod::StructuredSection,
                DetectionMethod::Capitalization,
            ]),
            mention_count: 4,
            entity_type: EntityType::Neobank,
            backends: BTreeSet::new(),
        };
        let report = EntityReport::build(&[entity.clone(), entity]);
        assert_eq!(report.total_entities, 2);
        assert_eq!(report.total_mentions, 8);
        assert_eq!(report.by_detection_method[&DetectionMethod::Capitalization], 2);
        assert_eq!(report.by_type[&EntityType::Neobank], 2);
    }

    #[test]
    fn test_empty_reports() {
        assert_eq!(UrlReport::build(&[]), UrlReport::default());
        assert_eq!(EntityReport::build(&[]), EntityReport::default());
    }
}
