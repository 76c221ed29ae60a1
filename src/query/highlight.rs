//! Highlighter (spec §4.H / component J): extracts text+semantic match spans
//! from structured or plain content, tagged with a detected content category.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::text::tokenize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Word,
    Sentence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Text,
    Semantic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentCategory {
    Heading,
    Code,
    Prose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    TipTap,
    Slate,
    QuillDelta,
    Html,
    Markdown,
    Json,
    PlainText,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub text: String,
    pub position: (usize, usize),
    pub score: f32,
    pub match_type: MatchType,
    pub content_category: ContentCategory,
}

/// Sniff structured-editor JSON shapes before falling back to markup/plain
/// text heuristics.
pub fn detect_content_type(text: &str) -> ContentType {
    let trimmed = text.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            if value.get("type").and_then(Value::as_str) == Some("doc") && value.get("content").is_some() {
                return ContentType::TipTap;
            }
            if value.is_array() && value.as_array().unwrap().iter().any(|n| n.get("children").is_some()) {
                return ContentType::Slate;
            }
            if value.get("ops").and_then(Value::as_array).is_some() {
                return ContentType::QuillDelta;
            }
            return ContentType::Json;
        }
    }
    if trimmed.starts_with('<') && trimmed.contains('>') {
        return ContentType::Html;
    }
    if trimmed.lines().any(|l| l.starts_with('#') || l.starts_with("```") || l.starts_with("- ")) {
        return ContentType::Markdown;
    }
    ContentType::PlainText
}

fn categorize_line(line: &str, content_type: ContentType) -> ContentCategory {
    let trimmed = line.trim_start();
    match content_type {
        ContentType::Markdown if trimmed.starts_with('#') => ContentCategory::Heading,
        ContentType::Markdown if trimmed.starts_with("```") || trimmed.starts_with("    ") => ContentCategory::Code,
        ContentType::Html if trimmed.starts_with("<h") => ContentCategory::Heading,
        ContentType::Html if trimmed.starts_with("<pre") || trimmed.starts_with("<code") => ContentCategory::Code,
        _ => ContentCategory::Prose,
    }
}

/// Extract the plain prose a structured document wraps, for tokenisation.
fn plain_text_for(content_type: ContentType, text: &str) -> String {
    match content_type {
        ContentType::TipTap | ContentType::Slate | ContentType::QuillDelta | ContentType::Json => {
            serde_json::from_str::<Value>(text)
                .map(|v| extract_strings(&v).join(" "))
                .unwrap_or_else(|_| text.to_string())
        }
        ContentType::Html => strip_tags(text),
        _ => text.to_string(),
    }
}

fn extract_strings(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().flat_map(extract_strings).collect(),
        Value::Object(map) => map
            .iter()
            .filter(|(k, _)| *k == "text" || *k == "insert" || *k == "content" || *k == "children")
            .flat_map(|(_, v)| extract_strings(v))
            .chain(map.iter().filter(|(k, _)| *k != "text" && *k != "insert").flat_map(|(_, v)| extract_strings(v)))
            .collect(),
        _ => Vec::new(),
    }
}

fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// The same granularity chunks `highlight` scores, exposed standalone so a
/// caller can embed each chunk and hand the resulting similarity scores back
/// in as `semantic_spans`.
pub fn candidate_spans(text: &str, granularity: Granularity, content_type: Option<ContentType>) -> Vec<(usize, usize, String)> {
    let content_type = content_type.unwrap_or_else(|| detect_content_type(text));
    let plain = plain_text_for(content_type, text);
    match granularity {
        Granularity::Word => word_offsets(&plain)
            .into_iter()
            .map(|(start, word)| (start, start + word.len(), word.to_string()))
            .collect(),
        Granularity::Sentence => sentence_offsets(&plain)
            .into_iter()
            .map(|(start, sentence)| (start, start + sentence.len(), sentence.trim().to_string()))
            .collect(),
    }
}

/// Highlight text-keyword matches for `query` against `text`. Exact token
/// matches always score 1.0; semantic spans (pre-scored by the caller) are
/// merged in without overriding an overlapping exact match. Deterministic:
/// repeat calls with the same input return identical spans.
pub fn highlight(
    query: &str,
    text: &str,
    granularity: Granularity,
    threshold: f32,
    content_type: Option<ContentType>,
    semantic_spans: &[(usize, usize, f32)],
) -> Vec<Span> {
    let content_type = content_type.unwrap_or_else(|| detect_content_type(text));
    let plain = plain_text_for(content_type, text);
    let query_tokens: Vec<String> = tokenize(query);

    let mut spans = Vec::new();
    let mut text_covered: Vec<(usize, usize)> = Vec::new();

    match granularity {
        Granularity::Word => {
            for (start, word) in word_offsets(&plain) {
                let lower = word.to_lowercase();
                let cleaned: String = lower.chars().filter(|c| c.is_alphanumeric()).collect();
                if query_tokens.contains(&cleaned) && cleaned.len() >= 2 {
                    let end = start + word.len();
                    text_covered.push((start, end));
                    spans.push(Span {
                        text: word.to_string(),
                        position: (start, end),
                        score: 1.0,
                        match_type: MatchType::Text,
                        content_category: categorize_line(line_for(&plain, start), content_type),
                    });
                }
            }
        }
        Granularity::Sentence => {
            for (start, sentence) in sentence_offsets(&plain) {
                let sentence_tokens: Vec<String> = tokenize(sentence);
                let hits = query_tokens.iter().filter(|t| sentence_tokens.contains(t)).count();
                if !query_tokens.is_empty() && hits > 0 {
                    let score = (hits as f32 / query_tokens.len() as f32).min(1.0);
                    if score >= threshold {
                        let end = start + sentence.len();
                        text_covered.push((start, end));
                        spans.push(Span {
                            text: sentence.trim().to_string(),
                            position: (start, end),
                            score,
                            match_type: MatchType::Text,
                            content_category: categorize_line(sentence, content_type),
                        });
                    }
                }
            }
        }
    }

    for &(start, end, score) in semantic_spans {
        if score < threshold {
            continue;
        }
        let overlaps = text_covered.iter().any(|&(s, e)| start < e && end > s);
        if overlaps {
            continue;
        }
        let snippet = plain.get(start..end).unwrap_or("").to_string();
        spans.push(Span {
            text: snippet,
            position: (start, end),
            score,
            match_type: MatchType::Semantic,
            content_category: categorize_line(line_for(&plain, start), content_type),
        });
    }

    spans.sort_by_key(|s| s.position.0);
    spans
}

fn word_offsets(text: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut idx = 0;
    for word in text.split_whitespace() {
        if let Some(pos) = text[idx..].find(word) {
            let start = idx + pos;
            out.push((start, word));
            idx = start + word.len();
        }
    }
    out
}

fn sentence_offsets(text: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if c == '.' || c == '!' || c == '?' {
            let end = i + c.len_utf8();
            if end > start {
                out.push((start, &text[start..end]));
            }
            start = end;
        }
    }
    if start < text.len() {
        out.push((start, &text[start..]));
    }
    out
}

fn line_for(text: &str, pos: usize) -> &str {
    let line_start = text[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line_end = text[pos..].find('\n').map(|i| pos + i).unwrap_or(text.len());
    &text[line_start..line_end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_tiptap_json() {
        let doc = r#"{"type":"doc","content":[{"type":"paragraph"}]}"#;
        assert_eq!(detect_content_type(doc), ContentType::TipTap);
    }

    #[test]
    fn detects_markdown_heading() {
        assert_eq!(detect_content_type("# Title\nsome text"), ContentType::Markdown);
    }

    #[test]
    fn detects_html() {
        assert_eq!(detect_content_type("<p>hello</p>"), ContentType::Html);
    }

    #[test]
    fn exact_word_matches_score_one() {
        let spans = highlight("david smith", "David Smith works here.", Granularity::Word, 0.0, None, &[]);
        assert!(spans.iter().any(|s| s.text.to_lowercase().contains("david") && s.score == 1.0));
    }

    #[test]
    fn highlight_is_deterministic() {
        let a = highlight("david smith", "David Smith works here.", Granularity::Word, 0.0, None, &[]);
        let b = highlight("david smith", "David Smith works here.", Granularity::Word, 0.0, None, &[]);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.position, y.position);
            assert_eq!(x.score, y.score);
        }
    }

    #[test]
    fn semantic_span_does_not_override_exact_match() {
        let text = "David Smith works here.";
        let semantic = vec![(0usize, 12usize, 0.9f32)];
        let spans = highlight("david smith", text, Granularity::Word, 0.0, None, &semantic);
        let exact_count = spans.iter().filter(|s| s.match_type == MatchType::Text).count();
        assert!(exact_count >= 1);
        let overlapping_semantic =
            spans.iter().any(|s| s.match_type == MatchType::Semantic && s.position.0 < 12);
        assert!(!overlapping_semantic);
    }
}
