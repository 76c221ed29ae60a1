//! Hybrid text matcher (spec §4.H / component I): tokenises content and
//! queries, scores keyword overlap as the fraction of query tokens present.

use std::collections::HashSet;

const MIN_TOKEN_LENGTH: usize = 2;

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "is", "are", "was", "were", "be", "been", "being", "to",
    "of", "in", "on", "at", "for", "with", "by", "from", "as", "it", "this", "that", "these",
    "those", "i", "you", "he", "she", "we", "they", "do", "does", "did", "has", "have", "had",
];

/// Lower-case, punctuation-stripped word tokens with stopwords and
/// sub-minimum-length tokens removed. The full text is tokenised regardless
/// of size — no document-length cap.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() >= MIN_TOKEN_LENGTH && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Result of matching a query against a document's text.
#[derive(Debug, Clone)]
pub struct TextMatch {
    pub score: f32,
    pub matched_tokens: Vec<String>,
}

/// Score is the fraction of distinct query tokens present in `text`,
/// capped at 1.0.
pub fn score_text(query: &str, text: &str) -> TextMatch {
    let query_tokens: HashSet<String> = tokenize(query).into_iter().collect();
    if query_tokens.is_empty() {
        return TextMatch { score: 0.0, matched_tokens: Vec::new() };
    }
    let doc_tokens: HashSet<String> = tokenize(text).into_iter().collect();
    let matched: Vec<String> = query_tokens.intersection(&doc_tokens).cloned().collect();
    let score = (matched.len() as f32 / query_tokens.len() as f32).min(1.0);
    TextMatch { score, matched_tokens: matched }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_strips_punctuation_and_stopwords() {
        let tokens = tokenize("David Smith is a software engineer at Google.");
        assert!(tokens.contains(&"david".to_string()));
        assert!(tokens.contains(&"smith".to_string()));
        assert!(!tokens.contains(&"is".to_string()));
        assert!(!tokens.contains(&"a".to_string()));
    }

    #[test]
    fn score_text_matches_david_smith_scenario() {
        let m = score_text("David Smith", "David Smith is a software engineer at Google");
        assert!((m.score - 1.0).abs() < 1e-6);
        assert!(m.matched_tokens.contains(&"david".to_string()));
        assert!(m.matched_tokens.contains(&"smith".to_string()));
    }

    #[test]
    fn score_text_partial_overlap_is_fractional() {
        let m = score_text("alpha beta gamma", "alpha only here");
        assert!((m.score - 1.0 / 3.0).abs() < 1e-3);
    }

    #[test]
    fn no_fifty_word_cap_on_long_documents() {
        let long_doc = (0..500).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ") + " target";
        let m = score_text("target", &long_doc);
        assert!((m.score - 1.0).abs() < 1e-6);
    }
}
