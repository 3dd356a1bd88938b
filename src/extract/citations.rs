//! Ranked citation order ("RANKING:" section or any numbered list).

use std::sync::LazyLock;

use regex::Regex;

use crate::llm::parsing::{clean_label, extract_section};
use crate::models::RankedCitation;

static RANKING_HEADINGS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?im)^\W*(?:RANKING|CLASSEMENT|HI[EÉ]RARCHIE)[^:\n]*:",
        r"(?im)^\W*(?:ORDER|ORDRE)\s+(?:OF|D['’])\s*IMPORTANCE[^:\n]*:",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static RE_RANKED_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)[.)]\s*(.+?)(?:\s+[-–]\s+(.+))?\s*$").unwrap()
});

/// Numbered lists outside a ranking section need this many items.
const MIN_LIST_ITEMS: usize = 3;

/// Importance decreases by 10 per position, floored at 0.
pub fn importance(position: usize) -> u32 {
    let penalty = position.saturating_sub(1).saturating_mul(10);
    100u32.saturating_sub(u32::try_from(penalty).unwrap_or(u32::MAX))
}

pub fn extract_ranking(text: &str) -> Vec<RankedCitation> {
    if let Some(section) = extract_section(text, &RANKING_HEADINGS) {
        let ranked = parse_ranked_lines(section);
        if !ranked.is_empty() {
            return ranked;
        }
    }

    let ranked = parse_ranked_lines(text);
    if ranked.len() >= MIN_LIST_ITEMS {
        ranked
    } else {
        Vec::new()
    }
}

fn parse_ranked_lines(text: &str) -> Vec<RankedCitation> {
    text.lines()
        .filter_map(|line| RE_RANKED_LINE.captures(line))
        .filter_map(|caps| {
            let position: usize = caps.get(1)?.as_str().parse().ok()?;
            let label = clean_label(caps.get(2)?.as_str());
            if label.is_empty() {
                return None;
            }
            let reason = caps
                .get(3)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            Some(RankedCitation {
                position,
                label,
                reason,
                importance: importance(position),
            })
        })
        .collect()
}
