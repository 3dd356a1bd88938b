//! Per-backend sentiment verdicts on the extracted entities and sources.
//!
//! One combined prompt is sent per backend. The reply is split into
//! `Label: value` blocks, each block is matched back to a subject, and every
//! subject without a usable block gets a tagged fallback record.

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PipelineSettings;
use crate::error::{BackendFailure, FailureStage};
use crate::extract::entities::canonical_key;
use crate::extract::urls::{bare_host, normalize_url};
use crate::llm::parsing::{clean_label, jaccard, strip_code_fences};
use crate::llm::{BackendRegistry, prompts};
use crate::models::{
    BackendResponse, ExtractedEntity, ExtractedSource, Query, RecordOrigin, Sentiment,
    SentimentDetails, SentimentRecord, SubjectKind,
};

pub const FALLBACK_CONFIDENCE: u8 = 30;
pub const DEFAULT_CONFIDENCE: u8 = 50;
const SIMILARITY_THRESHOLD: f64 = 0.8;

static RE_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\s\-*•#>]*\**([\p{L}][\p{L} ']*?)\**\s*:\s*\**\s*(.*?)\s*\**\s*$").unwrap()
});
static RE_INTEGER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-?\d+").unwrap());
static RE_URL_IN_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:https?://|www\.)\S+").unwrap());
static RE_NEGATED_POSITIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:not|no|pas|non|peu)[\s-]+(?:(?:very|really|très|trop|vraiment|si)\s+)?(?:positi\w*|favou?rable\w*|bon(?:ne)?s?|good)\b").unwrap()
});
static RE_NEGATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:n[ée]gati\w*|d[ée]favorable\w*|unfavou?rable|mauvais\w*|bad|critiques?|critical)\b").unwrap()
});
static RE_NEUTRAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:neutr\w*|mitig\w*|mixed|balanced|nuanc\w*)\b").unwrap()
});
static RE_POSITIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:positi\w*|favou?rable\w*|bon(?:ne)?s?|good|excellent\w*)\b").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Subject(SubjectKind),
    Sentiment,
    Confidence,
    Justification,
    Positioning,
    Recommendation,
    Reliability,
    Authority,
}

const FIELD_NAMES: &[(&str, Field)] = &[
    ("entity", Field::Subject(SubjectKind::Entity)),
    ("entité", Field::Subject(SubjectKind::Entity)),
    ("brand", Field::Subject(SubjectKind::Entity)),
    ("marque", Field::Subject(SubjectKind::Entity)),
    ("source", Field::Subject(SubjectKind::Source)),
    ("sentiment", Field::Sentiment),
    ("confidence", Field::Confidence),
    ("confiance", Field::Confidence),
    ("justification", Field::Justification),
    ("reason", Field::Justification),
    ("positioning", Field::Positioning),
    ("positionnement", Field::Positioning),
    ("perception", Field::Positioning),
    ("recommendation", Field::Recommendation),
    ("recommandation", Field::Recommendation),
    ("reliability", Field::Reliability),
    ("fiabilité", Field::Reliability),
    ("authority", Field::Authority),
    ("autorité", Field::Authority),
];

/// One `Entity:`/`Source:` block as written by the model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedBlock {
    pub kind: Option<SubjectKind>,
    pub label: String,
    pub sentiment: Option<Sentiment>,
    pub confidence: Option<u8>,
    pub justification: String,
    pub extra_primary: String,
    pub extra_secondary: String,
}

impl ParsedBlock {
    fn is_usable(&self) -> bool {
        self.kind.is_some() && self.sentiment.is_some() && !self.label.is_empty()
    }
}

/// Map a free-form label to a sentiment.
///
/// Only the head of the label counts: anything after a bracket or a comma
/// is commentary ("Neutre (bonne notoriété)"). Words match whole, a negated
/// positive reads as negative, and neutral wins over positive.
pub fn normalize_sentiment(raw: &str) -> Sentiment {
    let head = raw.split(['(', '[', ',', ';']).next().unwrap_or("");

    if RE_NEGATED_POSITIVE.is_match(head) || RE_NEGATIVE.is_match(head) {
        Sentiment::Negative
    } else if RE_NEUTRAL.is_match(head) {
        Sentiment::Neutral
    } else if RE_POSITIVE.is_match(head) {
        Sentiment::Positive
    } else {
        Sentiment::Neutral
    }
}

/// First integer in `raw`, clamped to 0..=100; 50 when there is none.
pub fn normalize_confidence(raw: &str) -> u8 {
    RE_INTEGER
        .find(raw)
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .map(|n| n.clamp(0, 100) as u8)
        .unwrap_or(DEFAULT_CONFIDENCE)
}

/// Split a sentiment reply into blocks. Blocks without a sentiment line are
/// dropped as unparseable.
pub fn parse_blocks(reply: &str) -> Vec<ParsedBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<ParsedBlock> = None;

    for line in strip_code_fences(reply).lines() {
        let Some(caps) = RE_FIELD.captures(line) else {
            continue;
        };
        let key = caps.get(1).map(|m| m.as_str().trim().to_lowercase()).unwrap_or_default();
        let value = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
        let Some(field) = FIELD_NAMES.iter().find(|(name, _)| *name == key).map(|(_, f)| *f) else {
            continue;
        };

        if let Field::Subject(kind) = field {
            if let Some(done) = current.take() {
                blocks.push(done);
            }
            current = Some(ParsedBlock {
                kind: Some(kind),
                label: clean_label(value),
                ..Default::default()
            });
            continue;
        }

        let Some(block) = current.as_mut() else {
            continue;
        };
        match field {
            Field::Sentiment => block.sentiment = Some(normalize_sentiment(value)),
            Field::Confidence => block.confidence = Some(normalize_confidence(value)),
            Field::Justification => block.justification = value.to_string(),
            Field::Positioning | Field::Reliability => block.extra_primary = value.to_string(),
            Field::Recommendation | Field::Authority => block.extra_secondary = value.to_string(),
            Field::Subject(_) => {}
        }
    }
    if let Some(done) = current {
        blocks.push(done);
    }

    blocks.retain(ParsedBlock::is_usable);
    blocks
}

/// A subject as the matcher sees it.
struct Subject {
    key: String,
    kind: SubjectKind,
    names: Vec<String>,
}

impl Subject {
    fn from_entity(entity: &ExtractedEntity) -> Self {
        Self {
            key: entity.canonical_name.clone(),
            kind: SubjectKind::Entity,
            names: vec![entity.display_name.clone()],
        }
    }

    fn from_source(source: &ExtractedSource) -> Self {
        Self {
            key: source.url.clone(),
            kind: SubjectKind::Source,
            names: vec![
                source.display_name.clone(),
                source.domain.clone(),
                bare_host(&source.domain).to_string(),
            ],
        }
    }

    fn matches_exactly(&self, block: &ParsedBlock) -> bool {
        let label = label_name(&block.label);
        let lower = label.to_lowercase();
        if self.names.iter().any(|n| n.to_lowercase() == lower) {
            return true;
        }
        match self.kind {
            SubjectKind::Entity => canonical_key(label) == self.key,
            SubjectKind::Source => RE_URL_IN_LABEL
                .find(&block.label)
                .and_then(|m| normalize_url(m.as_str()))
                .is_some_and(|url| url == self.key),
        }
    }

    fn similarity(&self, block: &ParsedBlock) -> f64 {
        let label = label_name(&block.label);
        self.names
            .iter()
            .map(|n| jaccard(n, label))
            .fold(0.0, f64::max)
    }
}

/// Label without a trailing "(https://...)" or " - https://..." part.
fn label_name(label: &str) -> &str {
    let cut = [" (", " - ", " – "]
        .iter()
        .filter_map(|sep| label.find(sep))
        .min()
        .unwrap_or(label.len());
    label[..cut].trim()
}

/// Pair every subject with at most one block: exact matches first, then the
/// most similar unused block above the threshold.
fn match_blocks(subjects: &[Subject], blocks: &[ParsedBlock]) -> Vec<Option<usize>> {
    let mut used = BTreeSet::new();
    let mut assignment: Vec<Option<usize>> = vec![None; subjects.len()];

    for (i, subject) in subjects.iter().enumerate() {
        if let Some(j) = blocks
            .iter()
            .enumerate()
            .find(|(j, b)| b.kind == Some(subject.kind) && !used.contains(j) && subject.matches_exactly(b))
            .map(|(j, _)| j)
        {
            used.insert(j);
            assignment[i] = Some(j);
        }
    }

    for (i, subject) in subjects.iter().enumerate() {
        if assignment[i].is_some() {
            continue;
        }
        let best = blocks
            .iter()
            .enumerate()
            .filter(|(j, b)| b.kind == Some(subject.kind) && !used.contains(j))
            .map(|(j, b)| (j, subject.similarity(b)))
            .filter(|(_, score)| *score >= SIMILARITY_THRESHOLD)
            .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(&a.0)));
        if let Some((j, _)) = best {
            used.insert(j);
            assignment[i] = Some(j);
        }
    }

    assignment
}

fn details_for(kind: SubjectKind, primary: String, secondary: String) -> SentimentDetails {
    match kind {
        SubjectKind::Entity => SentimentDetails::Entity {
            positioning: primary,
            recommendation: secondary,
        },
        SubjectKind::Source => SentimentDetails::Source {
            reliability: primary,
            authority: secondary,
        },
    }
}

/// Machine default for a subject the backend gave no verdict on.
pub fn fallback_record(subject_key: &str, kind: SubjectKind, backend: &str) -> SentimentRecord {
    let (primary, secondary) = match kind {
        SubjectKind::Entity => ("unknown", "neutral"),
        SubjectKind::Source => ("medium", "medium"),
    };
    SentimentRecord {
        subject_key: subject_key.to_string(),
        subject_kind: kind,
        backend_id: backend.to_string(),
        sentiment: Sentiment::Neutral,
        confidence: FALLBACK_CONFIDENCE,
        justification: format!("no verdict returned by {}", backend),
        details: details_for(kind, primary.to_string(), secondary.to_string()),
        origin: RecordOrigin::Fallback,
    }
}

/// Turn a reply into exactly one record per subject.
pub fn records_from_reply(
    reply: &str,
    entities: &[ExtractedEntity],
    sources: &[ExtractedSource],
    backend: &str,
) -> Vec<SentimentRecord> {
    let subjects: Vec<Subject> = entities
        .iter()
        .map(Subject::from_entity)
        .chain(sources.iter().map(Subject::from_source))
        .collect();
    let blocks = parse_blocks(reply);
    let assignment = match_blocks(&subjects, &blocks);

    subjects
        .iter()
        .zip(assignment)
        .map(|(subject, matched)| match matched.map(|j| &blocks[j]) {
            Some(block) => SentimentRecord {
                subject_key: subject.key.clone(),
                subject_kind: subject.kind,
                backend_id: backend.to_string(),
                sentiment: block.sentiment.unwrap_or(Sentiment::Neutral),
                confidence: block.confidence.unwrap_or(DEFAULT_CONFIDENCE),
                justification: block.justification.clone(),
                details: details_for(
                    subject.kind,
                    block.extra_primary.clone(),
                    block.extra_secondary.clone(),
                ),
                origin: RecordOrigin::Parsed,
            },
            None => fallback_record(&subject.key, subject.kind, backend),
        })
        .collect()
}

/// Outcome of the sentiment round for one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentAnalysis {
    pub backend_id: String,
    pub records: Vec<SentimentRecord>,
    pub response: Option<BackendResponse>,
    pub failure: Option<BackendFailure>,
}

#[derive(Clone)]
pub struct SentimentAnalyzer {
    registry: Arc<BackendRegistry>,
    excerpt_chars: usize,
}

impl SentimentAnalyzer {
    pub fn new(registry: Arc<BackendRegistry>, settings: &PipelineSettings) -> Self {
        Self {
            registry,
            excerpt_chars: settings.sentiment_excerpt_chars,
        }
    }

    pub async fn analyze(
        &self,
        query: &Query,
        response: &BackendResponse,
        entities: &[ExtractedEntity],
        sources: &[ExtractedSource],
    ) -> SentimentAnalysis {
        let backend = response.backend_id.as_str();
        let mut analysis = SentimentAnalysis {
            backend_id: backend.to_string(),
            records: Vec::new(),
            response: None,
            failure: None,
        };

        if entities.is_empty() && sources.is_empty() {
            debug!("{}: nothing to rate, skipping sentiment round", backend);
            return analysis;
        }

        let prompt = prompts::sentiment_prompt(
            query,
            &response.response_text,
            entities,
            sources,
            self.excerpt_chars,
        );

        let reply = match self.registry.query_one(backend, &prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("{}: sentiment round failed: {}", backend, e);
                analysis.failure = Some(BackendFailure::from_error(backend, FailureStage::Sentiment, &e));
                analysis.records = records_from_reply("", entities, sources, backend);
                return analysis;
            }
        };

        analysis.records = records_from_reply(&reply.response_text, entities, sources, backend);
        let fallbacks = analysis.records.iter().filter(|r| r.is_fallback()).count();
        info!(
            "{}: {} sentiment records ({} fallback)",
            backend,
            analysis.records.len(),
            fallbacks
        );
        analysis.response = Some(reply);
        analysis
    }
}
