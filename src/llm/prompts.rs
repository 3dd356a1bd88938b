//! Prompt templates for every round the pipeline sends to a backend.
//!
//! Each follow-up template opens with an upper-case marker line so replies
//! (and scripted test backends) can tell the rounds apart.

use crate::llm::parsing::truncate_chars;
use crate::models::{ExtractedEntity, ExtractedSource, Query};

pub const EXPLICIT_SOURCES_MARKER: &str = "EXPLICIT SOURCES REQUEST";
pub const FORCED_CITATION_MARKER: &str = "FORCED CITATION REQUEST";
pub const SPECIFIC_PAGES_MARKER: &str = "SPECIFIC PAGES REQUEST";
pub const SENTIMENT_MARKER: &str = "SENTIMENT ASSESSMENT";

/// Characters of the previous answer quoted back in follow-up prompts.
const FOLLOW_UP_EXCERPT_CHARS: usize = 500;

/// Initial research prompt sent to every backend.
pub fn research_prompt(query: &Query) -> String {
    let context = if query.context.trim().is_empty() {
        String::new()
    } else {
        format!("\nContext: {}\n", query.context.trim())
    };

    format!(
        r#"Question: "{question}"
{context}
Answer the question thoroughly, then add the three sections below exactly as titled.

BRANDS MENTIONED:
1. [Brand name] - one-line description of what it offers
2. ...

SOURCES:
Source: [Name of the article, guide or study]
URL: https://full-address-of-the-specific-page
(one block per source, give at least 3 specific pages, never a bare home page)

RANKING:
1. [Brand or source] - why it ranks here
2. ...

Rules:
- Name real organisations only
- Every URL must be complete (https://) and point to a specific article, guide or comparison
- Keep each description on one line"#,
        question = query.question.trim(),
        context = context,
    )
}

/// Tier 2: ask again, explicitly, for named sources with URLs.
pub fn explicit_sources_prompt(query: &Query, previous_answer: &str) -> String {
    format!(
        r#"{marker}

You just answered this question: "{question}"

Your previous answer began with:
{excerpt}...

List the sources behind that answer. Use this exact format for each one:

Source: [Precise name of the article or guide]
URL: https://www.site.com/section/detailed-article
Type: [Article/Guide/Comparison/Study]

Give at least 3 different sources. Home pages and generic section pages are not accepted."#,
        marker = EXPLICIT_SOURCES_MARKER,
        question = query.question.trim(),
        excerpt = truncate_chars(previous_answer.trim(), FOLLOW_UP_EXCERPT_CHARS),
    )
}

/// Tier 3: demand a numbered list of reference domains, nothing else.
pub fn forced_citation_prompt(query: &Query) -> String {
    format!(
        r#"{marker}

Question: "{question}"

Give 5 reference websites you know that are relevant to this question. Well-known
domains are acceptable even if you cannot recall an exact page.

Answer ONLY with a numbered list in this format:

1. [Organisation name] - https://www.domain.com
   Type: [Institution/Media/Comparison site/Regulator]
2. [Organisation name] - https://www.domain.com
   Type: ...

Every line must contain a complete URL starting with https://."#,
        marker = FORCED_CITATION_MARKER,
        question = query.question.trim(),
    )
}

/// Tier 4: reject generic pages and ask for deep article URLs.
pub fn specific_pages_prompt(query: &Query, rejected: &[String]) -> String {
    let rejected = if rejected.is_empty() {
        String::new()
    } else {
        let list: Vec<String> = rejected.iter().take(10).map(|u| format!("- {}", u)).collect();
        format!(
            "\nThese URLs were rejected as too generic:\n{}\n",
            list.join("\n")
        )
    };

    format!(
        r#"{marker}

Question: "{question}"
{rejected}
Home pages (www.site.com) and single generic sections (www.site.com/bank) are useless.
Give 3 to 5 URLs of SPECIFIC pages: articles, guides, comparisons or rankings with a
detailed path, for example https://www.site.com/finance/comparison-online-banks-2024

Format:
Source: [Title of the page]
URL: https://...
✅ https://... (repeat the URL on this line)"#,
        marker = SPECIFIC_PAGES_MARKER,
        question = query.question.trim(),
        rejected = rejected,
    )
}

/// One combined prompt rating every entity and source found in `answer`.
pub fn sentiment_prompt(
    query: &Query,
    answer: &str,
    entities: &[ExtractedEntity],
    sources: &[ExtractedSource],
    excerpt_chars: usize,
) -> String {
    let mut subjects = String::new();
    if !entities.is_empty() {
        subjects.push_str("Brands:\n");
        for entity in entities {
            subjects.push_str(&format!("- {}\n", entity.display_name));
        }
    }
    if !sources.is_empty() {
        subjects.push_str("Sources:\n");
        for source in sources {
            subjects.push_str(&format!("- {} ({})\n", source.display_name, source.url));
        }
    }

    format!(
        r#"{marker}

Question: "{question}"

Answer under review:
{excerpt}

Subjects to assess:
{subjects}
For EACH brand write one block:

Entity: [brand name exactly as listed]
Sentiment: positive | neutral | negative
Confidence: [0-100]
Justification: [one sentence]
Positioning: [premium / mainstream / low-cost / specialist]
Recommendation: [recommended / neutral / not recommended]

For EACH source write one block:

Source: [source name exactly as listed]
Sentiment: positive | neutral | negative
Confidence: [0-100]
Justification: [one sentence]
Reliability: [very high / high / medium / low]
Authority: [reference / recognised / minor]

Separate blocks with a blank line and add nothing else."#,
        marker = SENTIMENT_MARKER,
        question = query.question.trim(),
        excerpt = truncate_chars(answer.trim(), excerpt_chars),
        subjects = subjects,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_research_prompt_includes_sections() {
        let query = Query::new("Best online banks?", "France, 2024");
        let prompt = research_prompt(&query);
        assert!(prompt.contains("Best online banks?"));
        assert!(prompt.contains("Context: France, 2024"));
        assert!(prompt.contains("BRANDS MENTIONED:"));
        assert!(prompt.contains("SOURCES:"));
        assert!(prompt.contains("RANKING:"));
    }

    #[test]
    fn test_research_prompt_omits_empty_context() {
        let prompt = research_prompt(&Query::new("q", "  "));
        assert!(!prompt.contains("Context:"));
    }

    #[test]
    fn test_follow_up_prompts_carry_markers() {
        let query = Query::new("q", "");
        let long_answer = "é".repeat(2000);
        let explicit = explicit_sources_prompt(&query, &long_answer);
        assert!(explicit.starts_with(EXPLICIT_SOURCES_MARKER));
        assert!(explicit.chars().filter(|c| *c == 'é').count() == FOLLOW_UP_EXCERPT_CHARS);

        assert!(forced_citation_prompt(&query).starts_with(FORCED_CITATION_MARKER));

        let specific = specific_pages_prompt(&query, &["https://www.site.fr".to_string()]);
        assert!(specific.starts_with(SPECIFIC_PAGES_MARKER));
        assert!(specific.contains("- https://www.site.fr"));
    }
}
