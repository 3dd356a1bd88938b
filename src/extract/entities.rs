//! Heuristic brand and organisation detection.
//!
//! Three detectors run independently over the same answer and their
//! candidates are merged by canonical key:
//! - the labelled brands section, parsed as a list
//! - contextual patterns around offering verbs ("X offers", "chez X")
//! - capitalised spans that repeat or sit next to an offering verb

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::llm::parsing::{clean_label, context_window, count_case_insensitive, extract_section};
use crate::models::{DetectionMethod, EntityType, ExtractedEntity};

static SECTION_HEADINGS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?im)^\W*(?:BRANDS?|COMPANIES|ENTITIES|ORGANI[SZ]ATIONS)(?:\s+(?:AND|&)\s+\w+)?(?:\s+(?:MENTIONED|CITED|NAMED))?\s*\**\s*:",
        r"(?im)^\W*MARQUES?(?:\s+(?:ET|&)\s+ENTREPRISES?)?(?:\s+(?:MENTIONN[EÉ]ES?|CIT[EÉ]ES?))?\s*\**\s*:",
        r"(?im)^\W*ENTREPRISES?\s+CIT[EÉ]ES?\s*\**\s*:",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static RE_NUMBERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+[.)]\s*(.+)$").unwrap());
static RE_BULLET_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-*•]\s*(.+)$").unwrap());
static RE_CAPITALISED_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\**\[?\p{Lu}.+)$").unwrap());

static RE_OFFERING_AFTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\p{Lu}[\p{L}\p{N}&'!]+(?:[ \t]+\p{Lu}[\p{L}\p{N}&'!]+)?)[ \t]+(?:est|propose|offre|fournit|dispose|permet|offers|provides|charges|lets|allows)\b").unwrap()
});
static RE_PREPOSITION_BEFORE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:chez|avec|par|with|from|at)[ \t]+(\p{Lu}[\p{L}\p{N}&'!]+(?:[ \t]+\p{Lu}[\p{L}\p{N}&'!]+)?)").unwrap()
});
static RE_CATEGORY_BEFORE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?i:banque|société|groupe|entreprise|bank|company|insurer|broker|app)[ \t]+(\p{Lu}[\p{L}\p{N}&'!]+(?:[ \t]+\p{Lu}[\p{L}\p{N}&'!]+)?)").unwrap()
});
static RE_CAPITALISED_SPAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\p{Lu}[\p{Ll}\p{N}]+(?:[ \t]+\p{Lu}[\p{Ll}\p{N}]+)*\b").unwrap()
});

/// Contextual detectors; capture group 1 is the name.
static CONTEXT_PATTERNS: &[(&str, &LazyLock<Regex>)] = &[
    ("offering_verb", &RE_OFFERING_AFTER),
    ("preposition", &RE_PREPOSITION_BEFORE),
    ("category_noun", &RE_CATEGORY_BEFORE),
];

const NAME_SEPARATORS: &[&str] = &[" - ", " – ", " : ", " (", " |"];

const STOP_WORDS: &[&str] = &[
    "le", "la", "les", "un", "une", "des", "du", "de", "ce", "cette", "ces", "dans", "pour", "avec",
    "chez", "par", "sur", "et", "ou", "il", "elle", "ils", "elles", "on", "nous", "vous", "the",
    "a", "an", "this", "that", "these", "those", "in", "for", "with", "and", "or", "it", "they",
    "we", "you", "if", "when", "while", "also", "however", "but", "its", "their", "our", "your",
];

/// Capitalised words that are never brands on their own.
const GENERIC_WORDS: &[&str] = &[
    "france", "french", "european", "europe", "global", "international", "service", "services",
    "client", "clients", "customer", "customers", "premium", "standard", "classic", "basic",
    "advanced", "pro", "source", "sources", "url", "type", "ranking", "classement", "brands",
    "marques", "question", "context", "sentiment", "confidence", "justification", "reliability",
    "authority", "positioning", "recommendation", "note", "conclusion", "summary", "introduction",
    "rules", "why", "guide", "article", "comparison", "comparatif", "banque", "bank", "banks",
    "banques", "assurance", "insurance",
];

const ALIASES: &[(&str, &str)] = &[
    ("hello bank", "hellobank"),
    ("credit agricole", "creditagricole"),
    ("societe generale", "societegenerale"),
    ("bnp paribas", "bnpparibas"),
    ("boursorama banque", "boursorama"),
    ("boursobank", "boursorama"),
    ("la banque postale", "banquepostale"),
    ("banque postale", "banquepostale"),
    ("caisse depargne", "caissedepargne"),
    ("orange bank", "orangebank"),
];

const OFFERING_VERBS: &[&str] = &[
    "propose", "offre", "fournit", "dispose", "permet", "est une", "est un", "offers", "provides",
    "is a", "is an", "allows", "lets",
];
const OFFERING_PREPOSITIONS: &[&str] = &["chez", "avec", "par", "with", "at"];

const TYPE_KEYWORDS: &[(EntityType, &[&str])] = &[
    (
        EntityType::Neobank,
        &["néobanque", "neobanque", "neobank", "neo-bank", "fintech", "banque mobile", "mobile bank", "mobile-only"],
    ),
    (
        EntityType::Insurance,
        &["assurance", "assureur", "mutuelle", "insurance", "insurer"],
    ),
    (
        EntityType::Investment,
        &["investissement", "bourse", "trading", "courtier", "broker", "investment", "etf", "stock"],
    ),
    (
        EntityType::Bank,
        &["banque", "bank", "crédit", "credit", "compte", "account", "carte", "card", "prêt", "loan"],
    ),
];

const TYPE_CONTEXT_RADIUS: usize = 150;

/// A name proposed by one detector.
#[derive(Debug, Clone)]
struct RawMention {
    name: String,
    description: String,
    method: DetectionMethod,
}

/// Detect entities in one backend's answer.
pub fn extract_entities(text: &str, backend: &str) -> Vec<ExtractedEntity> {
    let mut mentions = from_section(text);
    mentions.extend(from_context_patterns(text));
    mentions.extend(from_capitalisation(text));
    merge(mentions, text, backend)
}

/// Normalised deduplication key: lower-cased, accent-folded, punctuation
/// stripped, whitespace collapsed, then aliased. Idempotent.
pub fn canonical_key(name: &str) -> String {
    let folded: String = name
        .to_lowercase()
        .chars()
        .flat_map(fold_accent)
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    let collapsed = folded.split_whitespace().collect::<Vec<_>>().join(" ");

    ALIASES
        .iter()
        .find(|(variant, _)| *variant == collapsed)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(collapsed)
}

fn fold_accent(c: char) -> Vec<char> {
    match c {
        'à' | 'á' | 'â' | 'ä' | 'ã' | 'å' => vec!['a'],
        'é' | 'è' | 'ê' | 'ë' => vec!['e'],
        'î' | 'ï' | 'í' | 'ì' => vec!['i'],
        'ô' | 'ö' | 'ó' | 'ò' | 'õ' => vec!['o'],
        'ù' | 'û' | 'ü' | 'ú' => vec!['u'],
        'ç' => vec!['c'],
        'ñ' => vec!['n'],
        'ÿ' => vec!['y'],
        'œ' => vec!['o', 'e'],
        'æ' => vec!['a', 'e'],
        other => vec![other],
    }
}

pub fn classify_entity_type(name: &str, text: &str) -> EntityType {
    let window = context_window(text, name, TYPE_CONTEXT_RADIUS);
    if window.is_empty() {
        return EntityType::Unknown;
    }
    let window = window.to_lowercase();

    TYPE_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| window.contains(k)))
        .map(|(entity_type, _)| *entity_type)
        .unwrap_or(EntityType::Company)
}

fn is_valid_name(name: &str) -> bool {
    let name = name.trim();
    if name.chars().count() < 2 || name.chars().all(|c| c.is_ascii_digit() || c.is_whitespace()) {
        return false;
    }
    if name.split_whitespace().count() > 5 {
        return false;
    }
    let lower = name.to_lowercase();
    if GENERIC_WORDS.contains(&lower.as_str()) || STOP_WORDS.contains(&lower.as_str()) {
        return false;
    }
    let first = lower.split_whitespace().next().unwrap_or("");
    if STOP_WORDS.contains(&first) {
        return false;
    }
    !lower.starts_with("http") && !lower.starts_with("www")
}

// =============================================================================
// Detectors
// =============================================================================

fn from_section(text: &str) -> Vec<RawMention> {
    let Some(section) = extract_section(text, &SECTION_HEADINGS) else {
        return Vec::new();
    };

    section
        .lines()
        .filter_map(parse_list_item)
        .filter_map(|item| {
            let (name, description) = split_name_description(&item);
            is_valid_name(&name).then_some(RawMention {
                name,
                description,
                method: DetectionMethod::StructuredSection,
            })
        })
        .collect()
}

fn parse_list_item(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    [&RE_NUMBERED_ITEM, &RE_BULLET_ITEM, &RE_CAPITALISED_LINE]
        .iter()
        .find_map(|re| re.captures(line))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Split "Name - description" on the first known separator.
fn split_name_description(item: &str) -> (String, String) {
    let split = NAME_SEPARATORS
        .iter()
        .filter_map(|sep| item.find(sep).map(|idx| (idx, sep.len())))
        .min_by_key(|(idx, _)| *idx);

    match split {
        Some((idx, len)) => {
            let name = clean_label(&item[..idx]);
            let description = item[idx + len..]
                .trim()
                .trim_end_matches(')')
                .trim()
                .to_string();
            (name, description)
        }
        None => (clean_label(item), String::new()),
    }
}

fn from_context_patterns(text: &str) -> Vec<RawMention> {
    let mut mentions = Vec::new();
    for (_, pattern) in CONTEXT_PATTERNS {
        for caps in pattern.captures_iter(text) {
            let Some(name) = caps.get(1).map(|m| clean_label(m.as_str())) else {
                continue;
            };
            if is_valid_name(&name) {
                mentions.push(RawMention {
                    name,
                    description: String::new(),
                    method: DetectionMethod::ContextualPattern,
                });
            }
        }
    }
    mentions
}

fn from_capitalisation(text: &str) -> Vec<RawMention> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for m in RE_CAPITALISED_SPAN.find_iter(text) {
        *counts.entry(m.as_str()).or_default() += 1;
    }

    let lower_words: BTreeSet<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().next().is_some_and(|c| c.is_lowercase()))
        .map(|w| w.to_string())
        .collect();

    counts
        .into_iter()
        .filter(|(name, _)| is_valid_name(name) && name.chars().count() > 2)
        // Single words that also appear in lower case are ordinary words.
        .filter(|(name, _)| {
            name.contains(' ') || !lower_words.contains(&name.to_lowercase())
        })
        .filter(|(name, count)| *count >= 2 || has_offering_context(text, name))
        .map(|(name, _)| RawMention {
            name: name.to_string(),
            description: String::new(),
            method: DetectionMethod::Capitalization,
        })
        .collect()
}

fn has_offering_context(text: &str, name: &str) -> bool {
    let lower = text.to_lowercase();
    let name = name.to_lowercase();
    OFFERING_VERBS
        .iter()
        .any(|v| lower.contains(&format!("{} {}", name, v)))
        || OFFERING_PREPOSITIONS
            .iter()
            .any(|p| lower.contains(&format!("{} {}", p, name)))
}

// =============================================================================
// Merge
// =============================================================================

fn merge(mentions: Vec<RawMention>, text: &str, backend: &str) -> Vec<ExtractedEntity> {
    let mut merged: BTreeMap<String, (ExtractedEntity, BTreeSet<String>)> = BTreeMap::new();

    for mention in mentions {
        let key = canonical_key(&mention.name);
        if key.is_empty() {
            continue;
        }

        let (entity, names) = merged.entry(key.clone()).or_insert_with(|| {
            (
                ExtractedEntity {
                    canonical_name: key,
                    display_name: mention.name.clone(),
                    description: String::new(),
                    detection_methods: BTreeSet::new(),
                    mention_count: 0,
                    entity_type: EntityType::Unknown,
                    backends: BTreeSet::from([backend.to_string()]),
                },
                BTreeSet::new(),
            )
        });

        entity.detection_methods.insert(mention.method);
        if mention.description.len() > entity.description.len() {
            entity.description = mention.description;
        }
        names.insert(mention.name);
    }

    let mut entities: Vec<ExtractedEntity> = merged
        .into_values()
        .map(|(mut entity, names)| {
            entity.mention_count = names
                .iter()
                .map(|n| count_case_insensitive(text, n))
                .max()
                .unwrap_or(0);
            entity.entity_type = classify_entity_type(&entity.display_name, text);
            entity
        })
        .collect();

    entities.sort_by(|a, b| {
        b.mention_count
            .cmp(&a.mention_count)
            .then_with(|| a.canonical_name.cmp(&b.canonical_name))
    });
    entities
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANSWER: &str = "For a free account, Boursorama Banque propose the cheapest offer. \
Revolut offers instant card controls and Revolut is popular with travellers. \
Many customers open an account chez Fortuneo.\n\n\
BRANDS MENTIONED:\n\
1. **Boursorama Banque** - online bank with free card\n\
2. [Revolut] - néobanque for travellers\n\
3. Hello bank! : mobile bank from BNP Paribas\n\
- Alan (health insurance)\n\n\
SOURCES:\n\
Source: Les Echos\n\
URL: https://www.lesechos.fr/finance/guide";

    fn find<'a>(entities: &'a [ExtractedEntity], key: &str) -> &'a ExtractedEntity {
        entities
            .iter()
            .find(|e| e.canonical_name == key)
            .unwrap_or_else(|| panic!("missing {} in {:?}", key, entities))
    }

    #[test]
    fn test_case_folded_name_in_text_does_not_panic() {
        let text = "Alanſé is a mutual insurer.\n\nBRANDS MENTIONED:\n1. Alans - health insurer";
        let entities = extract_entities(text, "x");
        assert!(entities.iter().any(|e| e.canonical_name == "alans"));
    }

    #[test]
    fn test_canonical_key() {
        assert_eq!(canonical_key("Hello bank!"), "hellobank");
        assert_eq!(canonical_key("Crédit Agricole"), "creditagricole");
        assert_eq!(canonical_key("  Société   Générale "), "societegenerale");
        assert_eq!(canonical_key("N26"), "n26");
        assert_eq!(canonical_key("L'Oréal"), "loreal");
    }

    #[test]
    fn test_canonical_key_is_idempotent() {
        for name in ["Hello bank!", "BNP Paribas", "Ma French Bank", "Qonto", "Boursorama Banque", "œil & Co"] {
            let once = canonical_key(name);
            assert_eq!(canonical_key(&once), once, "not idempotent for {}", name);
        }
    }

    #[test]
    fn test_split_name_description() {
        assert_eq!(
            split_name_description("**Qonto** - business account"),
            ("Qonto".to_string(), "business account".to_string())
        );
        assert_eq!(
            split_name_description("Alan (health insurance)"),
            ("Alan".to_string(), "health insurance".to_string())
        );
        assert_eq!(
            split_name_description("Shine"),
            ("Shine".to_string(), String::new())
        );
    }

    #[test]
    fn test_section_entities() {
        let entities = extract_entities(ANSWER, "openai");
        let hello = find(&entities, "hellobank");
        assert_eq!(hello.display_name, "Hello bank!");
        assert_eq!(hello.description, "mobile bank from BNP Paribas");
        assert!(hello.detection_methods.contains(&DetectionMethod::StructuredSection));

        let alan = find(&entities, "alan");
        assert_eq!(alan.description, "health insurance");
        assert!(alan.backends.contains("openai"));
    }

    #[test]
    fn test_merges_detectors_under_one_key() {
        let entities = extract_entities(ANSWER, "openai");
        let boursorama = find(&entities, "boursorama");
        assert!(boursorama.detection_methods.contains(&DetectionMethod::StructuredSection));
        assert!(boursorama.detection_methods.contains(&DetectionMethod::ContextualPattern));
        assert_eq!(boursorama.mention_count, 2);

        let revolut = find(&entities, "revolut");
        assert_eq!(revolut.mention_count, 3);
        assert!(revolut.detection_methods.contains(&DetectionMethod::Capitalization));
    }

    #[test]
    fn test_contextual_only_entity() {
        let entities = extract_entities(ANSWER, "openai");
        let fortuneo = find(&entities, "fortuneo");
        assert_eq!(
            fortuneo.detection_methods,
            BTreeSet::from([DetectionMethod::ContextualPattern, DetectionMethod::Capitalization])
        );
    }

    #[test]
    fn test_no_duplicate_keys() {
        let entities = extract_entities(ANSWER, "openai");
        let keys: BTreeSet<&str> = entities.iter().map(|e| e.canonical_name.as_str()).collect();
        assert_eq!(keys.len(), entities.len());
        assert!(entities.iter().all(|e| !e.canonical_name.is_empty()));
    }

    #[test]
    fn test_generic_words_rejected() {
        let text = "The Service is great. The Service is cheap. France has many banks. France again.";
        let entities = extract_entities(text, "x");
        assert!(entities.is_empty(), "{:?}", entities);
    }

    #[test]
    fn test_entity_types() {
        assert_eq!(
            classify_entity_type("Revolut", "Revolut is a néobanque with a bank card"),
            EntityType::Neobank
        );
        assert_eq!(
            classify_entity_type("Alan", "Alan sells health insurance"),
            EntityType::Insurance
        );
        assert_eq!(
            classify_entity_type("Degiro", "Degiro is a broker for ETF investors"),
            EntityType::Investment
        );
        assert_eq!(
            classify_entity_type("Fortuneo", "Fortuneo gives you a free card"),
            EntityType::Bank
        );
        assert_eq!(
            classify_entity_type("Acme", "Acme sells widgets"),
            EntityType::Company
        );
        assert_eq!(classify_entity_type("Ghost", "nothing here"), EntityType::Unknown);
    }

    #[test]
    fn test_empty_text() {
        assert!(extract_entities("", "x").is_empty());
    }
}
