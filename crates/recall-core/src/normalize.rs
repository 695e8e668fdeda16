//! Pure text canonicalization. Deterministic, no I/O, no external calls.

use crate::RecallEvent;

/// Corporate suffixes stripped from the tail of a normalized name, one word
/// at a time, as long as more than one word remains.
const COMPANY_SUFFIXES: &[&str] = &[
    "incorporated",
    "limited",
    "company",
    "corp",
    "inc",
    "llc",
    "ltd",
    "co",
];

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Canonicalize a free-text company name into its lookup form.
///
/// Lowercase, trim, `&` becomes `and`, everything outside word characters
/// and whitespace is dropped, whitespace runs collapse, then trailing
/// corporate suffixes are stripped. Idempotent.
pub fn normalize_name(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase().replace('&', "and");
    let stripped: String = lowered
        .chars()
        .filter(|c| is_word_char(*c) || c.is_whitespace())
        .collect();

    let mut words: Vec<&str> = stripped.split_whitespace().collect();
    while words.len() > 1 {
        match words.last() {
            Some(last) if COMPANY_SUFFIXES.contains(last) => {
                words.pop();
            }
            _ => break,
        }
    }
    words.join(" ")
}

/// One text blob per event for downstream search surfaces. Empty fields are
/// omitted; parts are space-joined.
pub fn build_search_text(event: &RecallEvent) -> String {
    let mut parts: Vec<String> = Vec::new();

    if !event.title.is_empty() {
        parts.push(event.title.clone());
    }
    if let Some(summary) = &event.summary {
        if !summary.is_empty() {
            parts.push(summary.clone());
        }
    }
    if !event.raw_company_name.is_empty() {
        parts.push(event.raw_company_name.clone());
    }
    parts.extend(event.brand_names.iter().filter(|b| !b.is_empty()).cloned());
    parts.extend(
        event
            .product_keywords
            .iter()
            .filter(|k| !k.is_empty())
            .cloned(),
    );
    parts.push(event.category.as_str().to_string());
    parts.push(event.source.as_str().to_string());
    if !event.source_identifiers.is_empty() {
        parts.push(
            event
                .source_identifiers
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(" "),
        );
    }

    parts.join(" ")
}

/// Lowercased tokens longer than two characters, first-seen order, no
/// duplicates.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let spaced: String = lowered
        .chars()
        .map(|c| if is_word_char(c) { c } else { ' ' })
        .collect();

    let mut keywords: Vec<String> = Vec::new();
    for token in spaced.split_whitespace() {
        if token.chars().count() > 2 && !keywords.iter().any(|k| k == token) {
            keywords.push(token.to_string());
        }
    }
    keywords
}

/// URL-safe slug: lowercase, word characters and hyphens only, whitespace
/// runs become a single hyphen, hyphen runs collapse, ends trimmed.
pub fn slugify(text: &str) -> String {
    let lowered = text.to_lowercase();
    let kept: String = lowered
        .chars()
        .filter(|c| is_word_char(*c) || c.is_whitespace() || *c == '-')
        .collect();
    let hyphenated = kept.split_whitespace().collect::<Vec<_>>().join("-");

    let mut out = String::with_capacity(hyphenated.len());
    let mut prev_hyphen = false;
    for c in hyphenated.chars() {
        if c == '-' {
            if prev_hyphen {
                continue;
            }
            prev_hyphen = true;
        } else {
            prev_hyphen = false;
        }
        out.push(c);
    }
    out.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Category, SourceAgency};
    use std::collections::BTreeMap;
    use uuid::Uuid;

    #[test]
    fn normalize_name_strips_punctuation_and_suffixes() {
        assert_eq!(normalize_name("Acme Inc"), "acme");
        assert_eq!(normalize_name("ACME, INC."), "acme");
        assert_eq!(normalize_name("Acme Incorporated"), "acme");
        assert_eq!(normalize_name("Johnson & Johnson"), "johnson and johnson");
    }

    #[test]
    fn normalize_name_is_idempotent() {
        for raw in ["Acme Inc", "ACME, INC.", "Big Wheel Co., Ltd.", "  Plain  "] {
            let once = normalize_name(raw);
            assert_eq!(normalize_name(&once), once);
        }
    }

    #[test]
    fn normalize_name_strips_stacked_suffixes_but_keeps_last_word() {
        assert_eq!(normalize_name("Big Wheel Co., Ltd."), "big wheel");
        // A name that is nothing but a suffix keeps its single word.
        assert_eq!(normalize_name("Company"), "company");
        assert_eq!(normalize_name("Inc Inc"), "inc");
    }

    #[test]
    fn extract_keywords_drops_short_tokens_and_duplicates() {
        let keywords = extract_keywords("The Big Recall of Toys");
        assert_eq!(keywords, vec!["the", "big", "recall", "toys"]);

        let repeated = extract_keywords("toys, TOYS, toys!");
        assert_eq!(repeated, vec!["toys"]);
    }

    #[test]
    fn slugify_examples() {
        assert_eq!(slugify("Johnson & Johnson"), "johnson-johnson");
        assert_eq!(slugify("  Infant Swing -- Model X  "), "infant-swing-model-x");
        assert_eq!(slugify("---"), "");
    }

    fn sample_event() -> RecallEvent {
        let mut identifiers = BTreeMap::new();
        identifiers.insert("recall_number".to_string(), "24-101".to_string());
        RecallEvent {
            id: Uuid::new_v4(),
            title: "Infant Swing Recall".to_string(),
            summary: Some("Restraint can detach".to_string()),
            category: Category::Consumer,
            source: SourceAgency::Cpsc,
            raw_company_name: "Acme Inc".to_string(),
            normalized_company_name: "acme".to_string(),
            brand_names: vec!["SwingKing".to_string()],
            product_keywords: vec!["infant".to_string(), "swing".to_string()],
            source_identifiers: identifiers,
            slug: "infant-swing-recall".to_string(),
            search_text: String::new(),
            published_at: None,
            raw_record_hash: "abc".to_string(),
        }
    }

    #[test]
    fn search_text_concatenates_populated_fields() {
        let text = build_search_text(&sample_event());
        assert_eq!(
            text,
            "Infant Swing Recall Restraint can detach Acme Inc SwingKing infant swing consumer cpsc recall_number=24-101"
        );
    }

    #[test]
    fn search_text_omits_empty_fields() {
        let mut event = sample_event();
        event.summary = None;
        event.brand_names.clear();
        event.source_identifiers.clear();
        let text = build_search_text(&event);
        assert_eq!(
            text,
            "Infant Swing Recall Acme Inc infant swing consumer cpsc"
        );
    }
}
