//! Cross-backend consolidation and majority-vote consensus.
//!
//! Every function here is order-independent: records are grouped in ordered
//! maps and ties are broken on content, never on arrival order.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::extract::cascade::sort_sources;
use crate::extract::entities::canonical_key;
use crate::extract::urls::normalize_url;
use crate::models::{
    ConsensusResult, EntityType, ExtractedEntity, ExtractedSource, Sentiment, SentimentRecord,
    SubjectKind,
};

/// Merge every backend's sources into one record per canonical URL.
pub fn consolidate_sources<'a, I>(per_backend: I) -> Vec<ExtractedSource>
where
    I: IntoIterator<Item = &'a [ExtractedSource]>,
{
    let mut groups: BTreeMap<String, Vec<&ExtractedSource>> = BTreeMap::new();
    for sources in per_backend {
        for source in sources {
            let key = normalize_url(&source.url).unwrap_or_else(|| source.url.clone());
            groups.entry(key).or_default().push(source);
        }
    }

    let mut merged: Vec<ExtractedSource> = groups
        .into_iter()
        .filter_map(|(url, group)| {
            let best = group.iter().copied().max_by(|a, b| prefer_source(a, b))?;
            let mut merged = best.clone();
            merged.url = url;
            merged.backends = group.iter().flat_map(|s| s.backends.iter().cloned()).collect();
            merged.citation_order = group.iter().map(|s| s.citation_order).min().unwrap_or(0);
            merged.reachable = merge_reachability(&group);
            Some(merged)
        })
        .collect();

    sort_sources(&mut merged);
    merged
}

/// Total order used to pick the representative of a URL group.
fn prefer_source(a: &ExtractedSource, b: &ExtractedSource) -> Ordering {
    a.extraction_confidence
        .total_cmp(&b.extraction_confidence)
        .then_with(|| a.seo_exploitable.cmp(&b.seo_exploitable))
        .then_with(|| a.display_name.len().cmp(&b.display_name.len()))
        .then_with(|| b.display_name.cmp(&a.display_name))
        .then_with(|| b.tier.cmp(&a.tier))
}

fn merge_reachability(group: &[&ExtractedSource]) -> Option<bool> {
    let checked: Vec<bool> = group.iter().filter_map(|s| s.reachable).collect();
    if checked.is_empty() {
        None
    } else {
        Some(checked.into_iter().any(|r| r))
    }
}

/// Merge every backend's entities into one record per canonical key.
pub fn consolidate_entities<'a, I>(per_backend: I) -> Vec<ExtractedEntity>
where
    I: IntoIterator<Item = &'a [ExtractedEntity]>,
{
    let mut groups: BTreeMap<String, Vec<&ExtractedEntity>> = BTreeMap::new();
    for entities in per_backend {
        for entity in entities {
            groups
                .entry(canonical_key(&entity.canonical_name))
                .or_default()
                .push(entity);
        }
    }

    let mut merged: Vec<ExtractedEntity> = groups
        .into_iter()
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, group)| merge_entity_group(key, &group))
        .collect();

    merged.sort_by(|a, b| {
        b.backends
            .len()
            .cmp(&a.backends.len())
            .then_with(|| b.mention_count.cmp(&a.mention_count))
            .then_with(|| a.canonical_name.cmp(&b.canonical_name))
    });
    merged
}

fn merge_entity_group(key: String, group: &[&ExtractedEntity]) -> ExtractedEntity {
    let display_name = group
        .iter()
        .max_by(|a, b| {
            a.mention_count
                .cmp(&b.mention_count)
                .then_with(|| b.display_name.cmp(&a.display_name))
        })
        .map(|e| e.display_name.clone())
        .unwrap_or_else(|| key.clone());

    let descriptions: BTreeSet<&str> = group
        .iter()
        .map(|e| e.description.trim())
        .filter(|d| !d.is_empty())
        .collect();

    ExtractedEntity {
        canonical_name: key,
        display_name,
        description: descriptions.into_iter().collect::<Vec<_>>().join("; "),
        detection_methods: group
            .iter()
            .flat_map(|e| e.detection_methods.iter().copied())
            .collect(),
        mention_count: group.iter().map(|e| e.mention_count).sum(),
        entity_type: majority_type(group),
        backends: group.iter().flat_map(|e| e.backends.iter().cloned()).collect(),
    }
}

/// Most frequent known type; `Unknown` only when no backend knew better.
fn majority_type(group: &[&ExtractedEntity]) -> EntityType {
    let mut counts: BTreeMap<EntityType, usize> = BTreeMap::new();
    for entity in group.iter().filter(|e| e.entity_type != EntityType::Unknown) {
        *counts.entry(entity.entity_type).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map(|(t, _)| t)
        .unwrap_or(EntityType::Unknown)
}

/// Majority vote over one subject's records.
///
/// Fallback records only vote when no backend produced a parsed verdict.
/// Returns `None` when `records` is empty.
pub fn compute_consensus(
    subject_key: &str,
    subject_kind: SubjectKind,
    records: &[&SentimentRecord],
) -> Option<ConsensusResult> {
    let ballots = one_per_backend(records);
    let fallback_votes = ballots.iter().filter(|r| r.is_fallback()).count();
    let fallback_only = fallback_votes == ballots.len();

    let electorate: Vec<&SentimentRecord> = ballots
        .into_iter()
        .filter(|r| fallback_only || !r.is_fallback())
        .collect();
    if electorate.is_empty() {
        return None;
    }

    let mut vote_counts: BTreeMap<Sentiment, usize> =
        Sentiment::PRECEDENCE.iter().map(|s| (*s, 0)).collect();
    for record in &electorate {
        *vote_counts.entry(record.sentiment).or_default() += 1;
    }

    // PRECEDENCE order decides ties: the first label with the top count wins.
    let top = vote_counts.values().copied().max().unwrap_or(0);
    let winning_sentiment = Sentiment::PRECEDENCE
        .iter()
        .copied()
        .find(|s| vote_counts.get(s).copied().unwrap_or(0) == top)
        .unwrap_or(Sentiment::Neutral);

    let winners: Vec<f64> = electorate
        .iter()
        .filter(|r| r.sentiment == winning_sentiment)
        .map(|r| f64::from(r.confidence))
        .collect();
    let average_confidence = if winners.is_empty() {
        0.0
    } else {
        winners.iter().sum::<f64>() / winners.len() as f64
    };

    let total_voters = electorate.len();
    Some(ConsensusResult {
        subject_key: subject_key.to_string(),
        subject_kind,
        winning_sentiment,
        consensus_score: top as f64 / total_voters as f64,
        vote_counts,
        total_voters,
        average_confidence,
        fallback_votes,
        fallback_only,
        backends: electorate.iter().map(|r| r.backend_id.clone()).collect(),
    })
}

/// Keep one record per backend: parsed beats fallback, then higher confidence,
/// then sentiment precedence.
fn one_per_backend<'a>(records: &[&'a SentimentRecord]) -> Vec<&'a SentimentRecord> {
    let mut best: BTreeMap<&str, &'a SentimentRecord> = BTreeMap::new();
    for &record in records {
        best.entry(record.backend_id.as_str())
            .and_modify(|current| {
                if ballot_rank(record) > ballot_rank(current) {
                    *current = record;
                }
            })
            .or_insert(record);
    }
    best.into_values().collect()
}

fn ballot_rank(record: &SentimentRecord) -> (bool, u8, std::cmp::Reverse<Sentiment>) {
    (
        !record.is_fallback(),
        record.confidence,
        std::cmp::Reverse(record.sentiment),
    )
}

/// Consensus maps for entities and sources, keyed by subject key.
#[derive(Debug, Clone, Default)]
pub struct ConsensusMaps {
    pub entities: BTreeMap<String, ConsensusResult>,
    pub sources: BTreeMap<String, ConsensusResult>,
}

pub fn build_consensus<'a, I>(records: I) -> ConsensusMaps
where
    I: IntoIterator<Item = &'a SentimentRecord>,
{
    let mut groups: BTreeMap<(SubjectKind, &str), Vec<&SentimentRecord>> = BTreeMap::new();
    for record in records {
        groups
            .entry((record.subject_kind, record.subject_key.as_str()))
            .or_default()
            .push(record);
    }

    let mut maps = ConsensusMaps::default();
    for ((kind, key), group) in groups {
        let Some(result) = compute_consensus(key, kind, &group) else {
            continue;
        };
        match kind {
            SubjectKind::Entity => maps.entities.insert(key.to_string(), result),
            SubjectKind::Source => maps.sources.insert(key.to_string(), result),
        };
    }
    maps
}
