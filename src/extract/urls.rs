//! URL candidates, normalisation and the validation pipeline.
//!
//! Everything here is pure: the cascade feeds raw text in and gets
//! validated [`ExtractedSource`] records out.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::llm::parsing::{clean_label, context_window};
use crate::models::{CascadeTier, ExtractedSource, TrustTier};

// =============================================================================
// Candidate patterns
// =============================================================================

static RE_STRUCTURED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[\s*_-]*Source\s*\**\s*:\s*\**\[?([^\]\n]+?)\]?\**\s*(?:[-–|]\s*|\n[\s*_-]*)URL\s*\**\s*:\s*\**<?(\S+?)>?\s*$").unwrap()
});
static RE_LABELLED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:source|sources|reference|référence|link|lien|url)\s*\**\s*:\s*\**<?((?:https?://|www\.)[^\s<>"'\])]+)"#).unwrap()
});
static RE_MARKDOWN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]\n]+)\]\(((?:https?://|www\.)[^)\s]+)\)").unwrap());
static RE_ANGLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<((?:https?://|www\.)[^>\s]+)>").unwrap());
static RE_QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["“«]\s*((?:https?://|www\.)[^"”»\s]+)\s*["”»]"#).unwrap());
static RE_BARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"'\])|]+"#).unwrap());
static RE_BARE_WWW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?:^|[\s(\[<"'])(www\.[^\s<>"'\])|]+)"#).unwrap());
static RE_NUMBERED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(\d+)[.)]\s*\**\[?([^\]\n]+?)\]?\**\s*[-–:]\s*<?((?:https?://|www\.)[^\s>]+)").unwrap()
});
static RE_CHECKMARK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"✅\s*<?((?:https?://|www\.)[^\s>]+)").unwrap());
static RE_DOMAIN_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[a-z0-9][a-z0-9-]*(?:\.[a-z0-9-]+)*\.[a-z]{2,}(?:[/?#].*)?$").unwrap()
});
static RE_YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"20\d\d").unwrap());

/// One URL-matching rule: which capture holds the URL and, optionally, a
/// human label for it.
struct UrlPattern {
    name: &'static str,
    regex: &'static LazyLock<Regex>,
    url_group: usize,
    label_group: Option<usize>,
}

static DIRECT_PATTERNS: &[UrlPattern] = &[
    UrlPattern {
        name: "structured",
        regex: &RE_STRUCTURED,
        url_group: 2,
        label_group: Some(1),
    },
    UrlPattern {
        name: "markdown",
        regex: &RE_MARKDOWN,
        url_group: 2,
        label_group: Some(1),
    },
    UrlPattern {
        name: "labelled",
        regex: &RE_LABELLED,
        url_group: 1,
        label_group: None,
    },
    UrlPattern {
        name: "angle",
        regex: &RE_ANGLE,
        url_group: 1,
        label_group: None,
    },
    UrlPattern {
        name: "quoted",
        regex: &RE_QUOTED,
        url_group: 1,
        label_group: None,
    },
    UrlPattern {
        name: "bare",
        regex: &RE_BARE,
        url_group: 0,
        label_group: None,
    },
    UrlPattern {
        name: "bare_www",
        regex: &RE_BARE_WWW,
        url_group: 1,
        label_group: None,
    },
];

static FOLLOW_UP_PATTERNS: &[UrlPattern] = &[
    UrlPattern {
        name: "structured",
        regex: &RE_STRUCTURED,
        url_group: 2,
        label_group: Some(1),
    },
    UrlPattern {
        name: "labelled",
        regex: &RE_LABELLED,
        url_group: 1,
        label_group: None,
    },
];

static FORCED_PATTERNS: &[UrlPattern] = &[UrlPattern {
    name: "numbered",
    regex: &RE_NUMBERED,
    url_group: 3,
    label_group: Some(2),
}];

static SPECIFIC_PATTERNS: &[UrlPattern] = &[
    UrlPattern {
        name: "structured",
        regex: &RE_STRUCTURED,
        url_group: 2,
        label_group: Some(1),
    },
    UrlPattern {
        name: "checkmark",
        regex: &RE_CHECKMARK,
        url_group: 1,
        label_group: None,
    },
    UrlPattern {
        name: "bare",
        regex: &RE_BARE,
        url_group: 0,
        label_group: None,
    },
];

fn patterns_for(tier: CascadeTier) -> &'static [UrlPattern] {
    match tier {
        CascadeTier::DirectParse => DIRECT_PATTERNS,
        CascadeTier::ExplicitFollowUp => FOLLOW_UP_PATTERNS,
        CascadeTier::ForcedCitation => FORCED_PATTERNS,
        CascadeTier::SpecificityEscalation => SPECIFIC_PATTERNS,
    }
}

// =============================================================================
// Static policy tables
// =============================================================================

const SEARCH_ENGINES: &[&str] = &["google.com", "bing.com", "yahoo.com", "duckduckgo.com"];
const SOCIAL_NETWORKS: &[&str] = &[
    "facebook.com",
    "twitter.com",
    "x.com",
    "linkedin.com",
    "instagram.com",
    "youtube.com",
    "tiktok.com",
];
const SHORTENERS: &[&str] = &["bit.ly", "tinyurl.com", "short.ly", "t.co", "goo.gl", "ow.ly"];

/// Path prefixes that turn a social-network URL into an official business page.
const OFFICIAL_PAGE_PREFIXES: &[&str] = &["/company/", "/pages/", "/showcase/", "/channel/", "/@"];

const GENERIC_PATHS: &[&str] = &["", "/", "/home", "/accueil", "/index"];
const BOILERPLATE_SECTIONS: &[&str] = &[
    "/contact",
    "/mentions-legales",
    "/legal",
    "/conditions",
    "/terms",
    "/cgu",
    "/privacy",
    "/confidentialite",
    "/about",
    "/a-propos",
];
const INFORMATIONAL_KEYWORDS: &[&str] = &[
    "article",
    "guide",
    "comparatif",
    "comparison",
    "compare",
    "conseil",
    "advice",
    "actualite",
    "news",
    "dossier",
    "analyse",
    "analysis",
    "test",
    "avis",
    "review",
    "selection",
    "meilleur",
    "best",
    "top-",
    "classement",
    "ranking",
];

const GOVERNMENT_SUFFIXES: &[&str] = &[".gouv.fr", ".gov", ".gov.uk", ".europa.eu", ".edu"];
const REGULATOR_DOMAINS: &[&str] = &[
    "banque-france.fr",
    "amf-france.org",
    "acpr.banque-france.fr",
    "cnil.fr",
    "service-public.fr",
    "insee.fr",
    "economie.gouv.fr",
    "ecb.europa.eu",
    "eba.europa.eu",
    "sec.gov",
    "fca.org.uk",
];
const PRESS_DOMAINS: &[&str] = &[
    "lemonde.fr",
    "lefigaro.fr",
    "liberation.fr",
    "lepoint.fr",
    "lesechos.fr",
    "latribune.fr",
    "bfmtv.com",
    "franceinfo.fr",
    "capital.fr",
    "challenges.fr",
    "60millions-mag.com",
    "quechoisir.org",
    "moneyvox.fr",
    "reuters.com",
    "ft.com",
    "bloomberg.com",
    "nytimes.com",
    "theguardian.com",
    "bbc.co.uk",
];

const CITATION_MARKERS: &[&str] = &[
    "source:",
    "url:",
    "reference:",
    "référence:",
    "link:",
    "lien:",
];

const TRACKING_PARAMS: &[&str] = &["gclid", "fbclid", "msclkid", "mc_cid", "mc_eid"];

// =============================================================================
// Candidates
// =============================================================================

/// A raw URL match before validation.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub raw_url: String,
    pub label: Option<String>,
    /// Byte offset of the match in the parsed text
    pub offset: usize,
    pub pattern: &'static str,
    pub citation_style: bool,
    pub context: String,
}

/// Apply the pattern set of `tier` to `text`. Candidates are deduplicated
/// by normalised URL; earlier patterns (which carry labels) win.
pub fn find_candidates(text: &str, tier: CascadeTier) -> Vec<Candidate> {
    let mut seen = BTreeSet::new();
    let mut candidates = Vec::new();

    for pattern in patterns_for(tier) {
        for caps in pattern.regex.captures_iter(text) {
            let Some(url_match) = caps.get(pattern.url_group) else {
                continue;
            };
            let raw_url = url_match.as_str().to_string();
            let Some(normalized) = normalize_url(&raw_url) else {
                continue;
            };
            if !seen.insert(normalized) {
                continue;
            }

            let label = pattern
                .label_group
                .and_then(|g| caps.get(g))
                .map(|m| clean_label(m.as_str()))
                .filter(|l| !l.is_empty());

            let offset = url_match.start();
            let citation_style = label.is_some() || has_citation_marker(text, offset);

            candidates.push(Candidate {
                context: context_window(text, &raw_url, 150),
                raw_url,
                label,
                offset,
                pattern: pattern.name,
                citation_style,
            });
        }
    }

    candidates.sort_by_key(|c| c.offset);
    candidates
}

/// Whether a citation label ("Source:", "URL:") appears just before `offset`.
fn has_citation_marker(text: &str, offset: usize) -> bool {
    let start = text[..offset]
        .char_indices()
        .rev()
        .take(40)
        .last()
        .map(|(i, _)| i)
        .unwrap_or(offset);
    let window = text[start..offset].to_lowercase();
    CITATION_MARKERS.iter().any(|m| window.contains(m))
}

// =============================================================================
// Normalisation
// =============================================================================

/// Characters never kept at the end of a URL: sentence punctuation and
/// closing wrappers picked up from the surrounding prose.
const TRAILING_NOISE: &[char] = &[
    '.', ',', ';', ':', '!', '?', '"', '\'', ')', ']', '}', '>', '*', '»', '”', '…',
];

/// Canonical form of a URL: trimmed, scheme added, host lower-cased,
/// tracking parameters, fragment, trailing slashes and trailing punctuation
/// removed.
///
/// Returns `None` for anything that is not an http(s) URL with a dotted host.
/// Normalising an already normalised URL returns it unchanged.
pub fn normalize_url(raw: &str) -> Option<String> {
    let trimmed = raw
        .trim()
        .trim_start_matches(['<', '(', '[', '"', '\'', '«', '“'])
        .trim_end_matches(TRAILING_NOISE);
    if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
        return None;
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else if RE_DOMAIN_LIKE.is_match(trimmed) {
        format!("https://{}", trimmed)
    } else {
        return None;
    };

    let parsed = Url::parse(&with_scheme).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?.trim_end_matches('.').to_lowercase();
    if !host.contains('.') {
        return None;
    }

    let port = parsed.port().map(|p| format!(":{}", p)).unwrap_or_default();
    // Dropping a slash or a tracking parameter can expose more trailing
    // noise, so both ends are trimmed until stable.
    let path = parsed
        .path()
        .trim_end_matches(|c: char| c == '/' || TRAILING_NOISE.contains(&c));
    let query = parsed
        .query()
        .map(|q| {
            q.split('&')
                .map(|pair| pair.trim_end_matches(TRAILING_NOISE))
                .filter(|pair| !pair.is_empty() && !is_tracking_param(pair))
                .collect::<Vec<_>>()
                .join("&")
        })
        .filter(|q| !q.is_empty())
        .map(|q| format!("?{}", q))
        .unwrap_or_default();

    Some(format!(
        "{}://{}{}{}{}",
        parsed.scheme(),
        host,
        port,
        path,
        query
    ))
}

fn is_tracking_param(pair: &str) -> bool {
    let key = pair.split('=').next().unwrap_or("").to_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Raw URLs that look cut off by the model ("https://site.fr/guide-...").
pub fn looks_truncated(raw: &str) -> bool {
    let raw = raw.trim();
    raw.contains("...")
        || raw.contains('…')
        || raw.ends_with('-')
        || raw.ends_with('_')
        || raw.ends_with('=')
}

// =============================================================================
// Validation policy
// =============================================================================

/// Host without a leading `www.`.
pub fn bare_host(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

/// Last two labels of the host, used for exclusion checks.
pub fn registrable_domain(host: &str) -> String {
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() <= 2 {
        return labels.join(".");
    }
    labels[labels.len() - 2..].join(".")
}

/// Search engines, shorteners and social networks are rejected, except for
/// social-network pages that denote an official business presence.
pub fn is_excluded(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return true;
    };
    let domain = registrable_domain(&host.to_lowercase());

    if SEARCH_ENGINES.contains(&domain.as_str()) || SHORTENERS.contains(&domain.as_str()) {
        return true;
    }
    if SOCIAL_NETWORKS.contains(&domain.as_str()) {
        let path = url.path().to_lowercase();
        return !OFFICIAL_PAGE_PREFIXES.iter().any(|p| path.starts_with(p));
    }
    false
}

/// Whether a URL points at a specific, content-bearing page.
pub fn classify_exploitability(url: &Url) -> (bool, &'static str) {
    let path = url.path().to_lowercase();
    let path = path.trim_end_matches('/');

    if GENERIC_PATHS.contains(&path) || path.starts_with("/index.") {
        return (false, "generic page (home or index)");
    }
    if path.len() < 3 {
        return (false, "path too short to be specific");
    }
    if BOILERPLATE_SECTIONS
        .iter()
        .any(|s| path == *s || path.starts_with(&format!("{}/", s)) || path.starts_with(&format!("{}.", s)))
    {
        return (false, "boilerplate section (contact, legal, about)");
    }
    if INFORMATIONAL_KEYWORDS.iter().any(|k| path.contains(k)) || RE_YEAR.is_match(path) {
        return (true, "specific page with informational content");
    }
    let segments = path.split('/').filter(|s| !s.is_empty()).count();
    if segments >= 2 {
        return (true, "structured path with specialised content");
    }
    (false, "single generic section")
}

pub fn trust_tier(host: &str) -> TrustTier {
    let host = bare_host(&host.to_lowercase()).to_string();
    if host.is_empty() {
        return TrustTier::Unknown;
    }
    let matches_domain = |d: &&str| host == *d || host.ends_with(&format!(".{}", d));

    if GOVERNMENT_SUFFIXES.iter().any(|s| host.ends_with(s)) || REGULATOR_DOMAINS.iter().any(matches_domain)
    {
        TrustTier::VeryHigh
    } else if PRESS_DOMAINS.iter().any(matches_domain) || host.ends_with(".org") {
        TrustTier::High
    } else {
        TrustTier::Medium
    }
}

/// Readable name derived from the host: `www.lesechos.fr` -> `Lesechos`.
pub fn display_name_from_host(host: &str) -> String {
    let first = bare_host(host).split('.').next().unwrap_or("");
    let mut chars = first.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => "Unknown source".to_string(),
    }
}

/// Extraction confidence for a candidate found at `tier`.
pub fn confidence_for(candidate: &Candidate, tier: CascadeTier) -> f64 {
    let mut confidence = tier.base_confidence();
    if candidate.citation_style {
        confidence += 0.15;
    }
    if looks_truncated(&candidate.raw_url) {
        confidence -= 0.25;
    }
    confidence.clamp(0.0, 1.0)
}

/// Run one candidate through the validation pipeline.
pub fn validate(
    candidate: &Candidate,
    tier: CascadeTier,
    citation_order: usize,
    backend: &str,
) -> Option<ExtractedSource> {
    let url = normalize_url(&candidate.raw_url)?;
    let parsed = Url::parse(&url).ok()?;
    if is_excluded(&parsed) {
        return None;
    }

    let host = parsed.host_str().unwrap_or("").to_string();
    let (seo_exploitable, reason) = classify_exploitability(&parsed);

    Some(ExtractedSource {
        display_name: candidate
            .label
            .clone()
            .unwrap_or_else(|| display_name_from_host(&host)),
        domain_trust_tier: trust_tier(&host),
        domain: host,
        citation_order,
        context_snippet: candidate.context.clone(),
        extraction_confidence: confidence_for(candidate, tier),
        seo_exploitable,
        exploitability_reason: reason.to_string(),
        reachable: None,
        tier,
        backends: BTreeSet::from([backend.to_string()]),
        url,
    })
}
