//! Data model shared by the extraction, sentiment and consensus stages.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable input to one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub question: String,
    #[serde(default)]
    pub context: String,
}

impl Query {
    pub fn new(question: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            context: context.into(),
        }
    }
}

/// One backend's answer to one prompt round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendResponse {
    pub backend_id: String,
    pub model_name: String,
    pub prompt: String,
    pub response_text: String,
    pub tokens_used: Option<u32>,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Trust tier of a source domain. Ordering is ascending trust so that
/// `max()` and descending sorts do the obvious thing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    Unknown,
    Medium,
    High,
    VeryHigh,
}

/// Cascade tier that produced a candidate URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeTier {
    DirectParse,
    ExplicitFollowUp,
    ForcedCitation,
    SpecificityEscalation,
}

impl CascadeTier {
    /// Starting extraction confidence for candidates found at this tier.
    pub fn base_confidence(self) -> f64 {
        match self {
            CascadeTier::DirectParse => 0.70,
            CascadeTier::ExplicitFollowUp => 0.60,
            CascadeTier::SpecificityEscalation => 0.55,
            CascadeTier::ForcedCitation => 0.40,
        }
    }

    pub fn issues_prompt(self) -> bool {
        !matches!(self, CascadeTier::DirectParse)
    }
}

impl std::fmt::Display for CascadeTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CascadeTier::DirectParse => write!(f, "direct_parse"),
            CascadeTier::ExplicitFollowUp => write!(f, "explicit_follow_up"),
            CascadeTier::ForcedCitation => write!(f, "forced_citation"),
            CascadeTier::SpecificityEscalation => write!(f, "specificity_escalation"),
        }
    }
}

/// A validated source URL.
///
/// Before consolidation `backends` holds the single backend that produced
/// it; afterwards it is the union of every contributing backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedSource {
    /// Canonical URL, the deduplication key.
    pub url: String,
    pub display_name: String,
    pub domain: String,
    pub citation_order: usize,
    pub context_snippet: String,
    pub extraction_confidence: f64,
    pub domain_trust_tier: TrustTier,
    pub seo_exploitable: bool,
    pub exploitability_reason: String,
    pub reachable: Option<bool>,
    pub tier: CascadeTier,
    #[serde(default)]
    pub backends: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    StructuredSection,
    ContextualPattern,
    Capitalization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Bank,
    Insurance,
    Investment,
    Neobank,
    Company,
    Unknown,
}

/// A brand or organisation mention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    /// Normalised name, the deduplication key.
    pub canonical_name: String,
    pub display_name: String,
    pub description: String,
    pub detection_methods: BTreeSet<DetectionMethod>,
    pub mention_count: usize,
    pub entity_type: EntityType,
    #[serde(default)]
    pub backends: BTreeSet<String>,
}

/// A ranked element from the answer's ranking section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedCitation {
    pub position: usize,
    pub label: String,
    pub reason: String,
    pub importance: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    /// Tie-break order for consensus: earlier wins.
    pub const PRECEDENCE: [Sentiment; 3] =
        [Sentiment::Positive, Sentiment::Neutral, Sentiment::Negative];
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sentiment::Positive => write!(f, "positive"),
            Sentiment::Neutral => write!(f, "neutral"),
            Sentiment::Negative => write!(f, "negative"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Entity,
    Source,
}

/// Whether a sentiment record reflects the model's reply or a machine default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    Parsed,
    Fallback,
}

/// Subject-specific fields of a sentiment verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SentimentDetails {
    Entity {
        positioning: String,
        recommendation: String,
    },
    Source {
        reliability: String,
        authority: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentRecord {
    /// Canonical entity name or canonical source URL.
    pub subject_key: String,
    pub subject_kind: SubjectKind,
    pub backend_id: String,
    pub sentiment: Sentiment,
    /// 0..=100
    pub confidence: u8,
    pub justification: String,
    pub details: SentimentDetails,
    pub origin: RecordOrigin,
}

impl SentimentRecord {
    pub fn is_fallback(&self) -> bool {
        self.origin == RecordOrigin::Fallback
    }
}

/// Majority-vote verdict for one subject. Always rebuilt from records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub subject_key: String,
    pub subject_kind: SubjectKind,
    pub winning_sentiment: Sentiment,
    pub vote_counts: BTreeMap<Sentiment, usize>,
    pub total_voters: usize,
    pub consensus_score: f64,
    pub average_confidence: f64,
    pub fallback_votes: usize,
    pub fallback_only: bool,
    pub backends: BTreeSet<String>,
}
