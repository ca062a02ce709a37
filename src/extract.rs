//! Tolerant extraction of a JSON object from free-form model output.
//!
//! Model responses arrive as pure JSON, JSON fenced in a markdown code block,
//! or JSON buried in conversational prose. Each recovery layer is a plain
//! function tried in order; the first one that yields a JSON object wins.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("The model returned an empty response")]
    Empty,
    #[error("Could not find valid JSON in the model response (starts with: {preview:?})")]
    Unparseable { preview: String },
}

/// A single recovery layer: returns the parsed object or gives up.
pub type Strategy = fn(&str) -> Option<Value>;

/// Recovery layers in the order they are attempted.
pub const STRATEGIES: &[(&str, Strategy)] = &[
    ("direct", direct),
    ("strip_fences", strip_fences),
    ("brace_slice", brace_slice),
    ("repair", repair),
];

/// Characters of the raw response kept in the error message.
const PREVIEW_CHARS: usize = 80;

/// Pull the first JSON object out of `text`, trying each layer in turn.
pub fn extract_json(text: &str) -> Result<Value, ExtractError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ExtractError::Empty);
    }

    for (name, strategy) in STRATEGIES {
        if let Some(value) = strategy(trimmed) {
            log::debug!("Extracted JSON using the {name} layer");
            return Ok(value);
        }
        log::trace!("Layer {name} found no JSON object");
    }

    Err(ExtractError::Unparseable {
        preview: trimmed.chars().take(PREVIEW_CHARS).collect(),
    })
}

/// Only objects count: a bare string or array is not an analysis.
fn parse_object(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text)
        .ok()
        .filter(Value::is_object)
}

/// Layer 1: the whole response is JSON.
pub fn direct(text: &str) -> Option<Value> {
    parse_object(text.trim())
}

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").unwrap());

static OPEN_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*)$").unwrap());

/// Layer 2: JSON inside a markdown code fence. A response truncated before
/// its closing fence still counts.
pub fn strip_fences(text: &str) -> Option<Value> {
    for caps in FENCE_RE.captures_iter(text) {
        if let Some(value) = parse_object(caps[1].trim()) {
            return Some(value);
        }
    }

    OPEN_FENCE_RE
        .captures(text.trim())
        .and_then(|caps| parse_object(caps[1].trim()))
}

/// Slice from the first `{` to the last `}`, inclusive.
fn outermost_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Layer 3: JSON surrounded by prose.
pub fn brace_slice(text: &str) -> Option<Value> {
    parse_object(outermost_braces(text)?)
}

static TRAILING_COMMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[}\]])").unwrap());

static UNQUOTED_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?P<pre>[{,]\s*)(?P<key>[A-Za-z_][A-Za-z0-9_]*)\s*:"#).unwrap()
});

static SINGLE_QUOTED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?P<pre>[{\[,:]\s*)'(?P<body>[^'"\\\n]*)'"#).unwrap()
});

static PYTHON_NONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?P<pre>[:\[,]\s*)None\b").unwrap());

/// Layer 4: superficial syntax repairs on the brace slice (or the whole text
/// when there are no braces), then parse.
pub fn repair(text: &str) -> Option<Value> {
    let candidate = outermost_braces(text).unwrap_or(text);
    parse_object(&repair_syntax(candidate))
}

/// Rewrite the common ways models break JSON syntax.
///
/// Content of double-quoted string literals is never touched.
pub fn repair_syntax(text: &str) -> String {
    let text = map_outside_strings(text, |s| {
        s.replace(['\u{201C}', '\u{201D}'], "\"")
            .replace(['\u{2018}', '\u{2019}'], "'")
    });
    let text = map_outside_strings(&text, |s| {
        SINGLE_QUOTED_RE.replace_all(s, "$pre\"$body\"").into_owned()
    });
    map_outside_strings(&text, |s| {
        let s = UNQUOTED_KEY_RE.replace_all(s, "$pre\"$key\":");
        let s = PYTHON_NONE_RE.replace_all(&s, "${pre}null");
        TRAILING_COMMA_RE.replace_all(&s, "$1").into_owned()
    })
}

/// Apply `f` to every stretch of `text` outside double-quoted strings.
/// An unterminated literal runs to the end of the text.
fn map_outside_strings(text: &str, f: impl Fn(&str) -> String) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('"') {
        out.push_str(&f(&rest[..open]));
        let close = literal_len(&rest[open..]).map_or(rest.len(), |n| open + n);
        out.push_str(&rest[open..close]);
        rest = &rest[close..];
    }
    out.push_str(&f(rest));
    out
}

/// Byte length of the string literal opening `s`, both quotes included.
fn literal_len(s: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in s.char_indices().skip(1) {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => return Some(i + 1),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fenced_example() {
        let text = "```json\n{\"key\":\"C Major\",\"chords\":[]}\n```";
        let v = extract_json(text).unwrap();
        assert_eq!(v, json!({"key": "C Major", "chords": []}));
    }

    #[test]
    fn test_direct() {
        assert_eq!(direct(r#" {"a": 1} "#), Some(json!({"a": 1})));
        assert_eq!(direct("[1, 2]"), None);
        assert_eq!(direct("Sure! {\"a\": 1}"), None);
    }

    #[test]
    fn test_strip_fences_without_language_tag() {
        let text = "Here you go:\n```\n{\"bpm\": 92}\n```\nEnjoy.";
        assert_eq!(strip_fences(text), Some(json!({"bpm": 92})));
    }

    #[test]
    fn test_strip_fences_skips_non_json_block() {
        let text = "```text\nnot json\n```\n\n```json\n{\"bpm\": 92}\n```";
        assert_eq!(strip_fences(text), Some(json!({"bpm": 92})));
    }

    #[test]
    fn test_strip_fences_truncated() {
        let text = "```json\n{\"key\": \"D Minor\"}";
        assert_eq!(strip_fences(text), Some(json!({"key": "D Minor"})));
    }

    #[test]
    fn test_brace_slice_in_prose() {
        let text = "Based on my analysis, here is the result: {\"key\": \"E Dorian\", \"chords\": [{\"chord\": \"Em7\"}]} Let me know!";
        assert_eq!(
            brace_slice(text),
            Some(json!({"key": "E Dorian", "chords": [{"chord": "Em7"}]}))
        );
    }

    #[test]
    fn test_prose_wrapped_matches_isolated_parse() {
        let isolated = r#"{"key":"A Minor","chords":[{"chord":"Am","start":0.0}],"sections":[]}"#;
        let direct_parse: Value = serde_json::from_str(isolated).unwrap();
        let wrappings = [
            isolated.to_string(),
            format!("```json\n{isolated}\n```"),
            format!("Sure, here it is:\n\n{isolated}\n\nHope that helps."),
            format!("Analysis below.\n```\n{isolated}\n```\nThanks"),
        ];
        for wrapped in &wrappings {
            assert_eq!(extract_json(wrapped).unwrap(), direct_parse, "failed for {wrapped:?}");
        }
    }

    #[test]
    fn test_repair_trailing_commas() {
        let text = r#"{"chords": [{"chord": "C",}, {"chord": "G"},],}"#;
        assert_eq!(
            extract_json(text).unwrap(),
            json!({"chords": [{"chord": "C"}, {"chord": "G"}]})
        );
    }

    #[test]
    fn test_repair_unquoted_keys() {
        let text = "Result: {key: \"F Major\", bpm: 120, chords: []}";
        assert_eq!(
            extract_json(text).unwrap(),
            json!({"key": "F Major", "bpm": 120, "chords": []})
        );
    }

    #[test]
    fn test_repair_single_quotes_and_none() {
        let text = "{'key': 'G Major', 'modulations': None}";
        assert_eq!(
            extract_json(text).unwrap(),
            json!({"key": "G Major", "modulations": null})
        );
    }

    #[test]
    fn test_repair_keeps_apostrophes_in_strings() {
        let text = r#"{"summary": "It's a ii-V-I", "bpm": 100,}"#;
        assert_eq!(
            extract_json(text).unwrap(),
            json!({"summary": "It's a ii-V-I", "bpm": 100})
        );
    }

    #[test]
    fn test_repair_leaves_string_content_alone() {
        let text = r#"{"summary": "Intro, chorus: big lift, None, ok,]", "bpm": 100,}"#;
        assert_eq!(
            extract_json(text).unwrap(),
            json!({"summary": "Intro, chorus: big lift, None, ok,]", "bpm": 100})
        );

        let escaped = r#"{"summary": "say \"hi, there: x\"", key: 'D Major',}"#;
        assert_eq!(
            extract_json(escaped).unwrap(),
            json!({"summary": "say \"hi, there: x\"", "key": "D Major"})
        );
    }

    #[test]
    fn test_smart_quotes() {
        let text = "{\u{201C}key\u{201D}: \u{201C}B Minor\u{201D}}";
        assert_eq!(extract_json(text).unwrap(), json!({"key": "B Minor"}));
    }

    #[test]
    fn test_empty_and_unparseable() {
        assert!(matches!(extract_json("   \n"), Err(ExtractError::Empty)));
        match extract_json("I could not analyze this audio, sorry.") {
            Err(ExtractError::Unparseable { preview }) => {
                assert!(preview.starts_with("I could not"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_layers_are_ordered() {
        let names: Vec<&str> = STRATEGIES.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, ["direct", "strip_fences", "brace_slice", "repair"]);
    }
}
