//! Shared text utilities for handling raw LLM answers.
//!
//! LLM responses are unpredictable: they may wrap the requested format in
//! markdown fences, decorate labels with emphasis, or add prose before and
//! after. Every helper here is pure and char-boundary safe.

use std::collections::HashSet;
use std::ops::Range;

use regex::Regex;

/// Strip markdown code fences (``` or ```text) from around content.
pub fn strip_code_fences(s: &str) -> &str {
    let s = s.trim();

    if s.starts_with("```")
        && let Some(first_newline) = s.find('\n')
    {
        let inner = &s[first_newline + 1..];
        if let Some(closing) = inner.rfind("```") {
            return inner[..closing].trim();
        }
    }

    s
}

/// Remove markdown emphasis and bracket wrappers around a label,
/// e.g. `**[Boursorama]**` -> `Boursorama`.
pub fn clean_label(s: &str) -> String {
    s.trim()
        .trim_matches(|c: char| matches!(c, '*' | '_' | '`' | '[' | ']' | '"' | '\''))
        .trim()
        .to_string()
}

/// Truncate to at most `max_chars` characters.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Up to `radius` characters on each side of the first occurrence of
/// `needle` (case-insensitive). Empty when `needle` does not occur.
pub fn context_window(text: &str, needle: &str, radius: usize) -> String {
    let Some(found) = find_case_insensitive(text, needle) else {
        return String::new();
    };
    // Case folding can change the byte length, so use the matched range.
    let (start, end) = (found.start, found.end);

    let before: usize = text[..start]
        .char_indices()
        .rev()
        .take(radius)
        .last()
        .map(|(i, _)| i)
        .unwrap_or(start);
    let after: usize = text[end..]
        .char_indices()
        .nth(radius)
        .map(|(i, _)| end + i)
        .unwrap_or(text.len());

    text[before..after].trim().to_string()
}

/// Byte range of the first case-insensitive occurrence of `needle`.
pub fn find_case_insensitive(text: &str, needle: &str) -> Option<Range<usize>> {
    if needle.is_empty() {
        return None;
    }
    let pattern = Regex::new(&format!("(?i){}", regex::escape(needle))).ok()?;
    pattern.find(text).map(|m| m.range())
}

/// Number of non-overlapping case-insensitive occurrences of `needle`.
pub fn count_case_insensitive(text: &str, needle: &str) -> usize {
    if needle.trim().is_empty() {
        return 0;
    }
    match Regex::new(&format!("(?i){}", regex::escape(needle))) {
        Ok(pattern) => pattern.find_iter(text).count(),
        Err(_) => 0,
    }
}

/// Text following the first heading that matches one of `headings`, up to
/// the next blank-line-separated heading or the end of the text.
pub fn extract_section<'a>(text: &'a str, headings: &[Regex]) -> Option<&'a str> {
    let start = headings
        .iter()
        .filter_map(|h| h.find(text))
        .min_by_key(|m| m.start())?
        .end();

    let rest = &text[start..];
    let end = next_section_start(rest).unwrap_or(rest.len());
    let section = rest[..end].trim();
    (!section.is_empty()).then_some(section)
}

/// Offset of the next section heading: a blank line followed by a
/// non-alphanumeric marker (emoji, `#`) or an upper-case label ending in ':'.
fn next_section_start(text: &str) -> Option<usize> {
    let mut offset = 0;
    for block in text.split("\n\n") {
        if offset > 0 {
            let head = block.trim_start();
            if is_heading_line(head.lines().next().unwrap_or("")) {
                return Some(offset);
            }
        }
        offset += block.len() + 2;
    }
    None
}

fn is_heading_line(line: &str) -> bool {
    let line = line.trim();
    let Some(first) = line.chars().next() else {
        return false;
    };
    if first == '#' || first == '=' {
        return true;
    }
    if !first.is_alphanumeric() && !matches!(first, '-' | '*' | '•' | '[' | '(' | '"') {
        return true;
    }
    // Upper-case label such as "SOURCES:" or "RANKING BY IMPORTANCE:"
    if let Some(label) = line.strip_suffix(':') {
        let letters: Vec<char> = label.chars().filter(|c| c.is_alphabetic()).collect();
        return letters.len() >= 2 && letters.iter().all(|c| c.is_uppercase());
    }
    false
}

/// Lower-cased whitespace token set.
pub fn token_set(s: &str) -> HashSet<String> {
    s.split_whitespace()
        .map(|t| {
            t.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
        .collect()
}

/// Jaccard similarity of the token sets of `a` and `b`.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let a = token_set(a);
    let b = token_set(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(&b).count();
    let union = a.union(&b).count();
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_code_fences("```text\nEntity: A\n```"), "Entity: A");
        assert_eq!(strip_code_fences("```\nhello\n```"), "hello");
        assert_eq!(strip_code_fences("no fences"), "no fences");
    }

    #[test]
    fn test_clean_label() {
        assert_eq!(clean_label("**Boursorama**"), "Boursorama");
        assert_eq!(clean_label(" [Les Echos] "), "Les Echos");
        assert_eq!(clean_label("Hello bank!"), "Hello bank!");
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("néobanque", 3), "néo");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_context_window() {
        let text = "The best option is Revolut because fees are low.";
        assert_eq!(context_window(text, "revolut", 4), "is Revolut bec");
        assert_eq!(context_window(text, "missing", 4), "");
    }

    #[test]
    fn test_context_window_multibyte() {
        let text = "éééé Qonto éééé";
        assert_eq!(context_window(text, "Qonto", 2), "é Qonto é");
    }

    #[test]
    fn test_context_window_case_fold_changes_length() {
        // 'ſ' (2 bytes) folds to 's' (1 byte), the Kelvin sign (3 bytes) to 'k'.
        assert_eq!(context_window("Alanſé is nice.", "Alans", 5), "Alanſé is");
        assert_eq!(context_window("the \u{212A}lub card", "klub", 3), "he \u{212A}lub ca");
        assert_eq!(find_case_insensitive("xAlanſ", "alans"), Some(1..7));
    }

    #[test]
    fn test_count_case_insensitive() {
        let text = "Qonto is great. QONTO has an app. qonto!";
        assert_eq!(count_case_insensitive(text, "Qonto"), 3);
        assert_eq!(count_case_insensitive(text, ""), 0);
        assert_eq!(count_case_insensitive("a.b axb", "a.b"), 1);
    }

    #[test]
    fn test_extract_section_stops_at_next_heading() {
        let text = "Intro text.\n\nBRANDS MENTIONED:\n1. Qonto - business account\n2. Shine - freelancers\n\nSOURCES:\nSource: x";
        let headings = vec![Regex::new(r"(?i)BRANDS\s+MENTIONED\s*:").unwrap()];
        let section = extract_section(text, &headings).unwrap();
        assert!(section.contains("Qonto"));
        assert!(section.contains("Shine"));
        assert!(!section.contains("Source: x"));
    }

    #[test]
    fn test_extract_section_missing_heading() {
        let headings = vec![Regex::new(r"(?i)RANKING\s*:").unwrap()];
        assert!(extract_section("nothing here", &headings).is_none());
    }

    #[test]
    fn test_heading_detection() {
        assert!(is_heading_line("🔗 SOURCES:"));
        assert!(is_heading_line("## Ranking"));
        assert!(is_heading_line("RANKING BY IMPORTANCE:"));
        assert!(!is_heading_line("1. Qonto - bank"));
        assert!(!is_heading_line("Qonto offers a card"));
        assert!(!is_heading_line("- bullet"));
    }

    #[test]
    fn test_jaccard() {
        assert!((jaccard("Hello Bank", "hello bank") - 1.0).abs() < 1e-9);
        assert!((jaccard("Boursorama Banque", "Boursorama") - 0.5).abs() < 1e-9);
        assert_eq!(jaccard("", "x"), 0.0);
    }
}
