//! Cleaning and decoding of raw model output
//!
//! Decoding never panics and never retries; callers receive a [`ParseError`]
//! and pick their own degraded path.

use super::client::truncate_str;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::OnceLock;
use thiserror::Error;

const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("response was empty")]
    Empty,
    #[error("no JSON found in response: {preview}")]
    NoJson { preview: String },
    #[error("invalid JSON ({message}): {preview}")]
    Invalid { message: String, preview: String },
}

/// Strip markdown code fences from a JSON response
pub fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest
    } else {
        trimmed
    };
    let clean = clean.strip_suffix("```").unwrap_or(clean);
    clean.trim()
}

/// Strip fences from a source-code response.
///
/// Handles a leading fence with any language tag and, when the model wrapped
/// the code in prose, keeps only the first fenced block. A response that opens
/// with a fence closes at its last fence, so fences inside docstrings survive.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let opens_with_fence = trimmed.starts_with("```");

    let body = if opens_with_fence {
        trimmed
    } else if let Some(start) = trimmed.find("\n```") {
        &trimmed[start + 1..]
    } else {
        return trimmed.to_string();
    };

    let Some(after_open) = body.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let after_tag = match after_open.split_once('\n') {
        Some((tag, rest)) if is_fence_tag(tag) => rest,
        _ => after_open,
    };
    let closing = if opens_with_fence {
        after_tag.rfind("\n```")
    } else {
        after_tag.find("\n```")
    };
    let code = match closing {
        Some(end) => &after_tag[..end],
        None => after_tag.strip_suffix("```").unwrap_or(after_tag),
    };
    code.trim().to_string()
}

fn is_fence_tag(tag: &str) -> bool {
    tag.trim()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '_' | '.'))
}

/// Extract a JSON fragment between matching delimiters
fn extract_json_fragment(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if start <= end {
        Some(&text[start..=end])
    } else {
        None
    }
}

/// A comma followed only by whitespace before `]` or `}`
fn trailing_comma() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r",\s*([\]}])").ok())
        .as_ref()
}

/// Try to fix common JSON issues from LLM responses
fn fix_json_issues(json: &str) -> String {
    let mut fixed = match trailing_comma() {
        Some(pattern) => pattern.replace_all(json, "$1").into_owned(),
        None => json.replace(",]", "]").replace(",}", "}"),
    };

    fixed = fixed.replace('\u{201C}', "\"");
    fixed = fixed.replace('\u{201D}', "\"");
    fixed = fixed.replace('\u{2018}', "'");
    fixed = fixed.replace('\u{2019}', "'");

    fixed
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// Decode a JSON object from a model response.
///
/// Attempts, in order: the fence-stripped text, its repaired form, the
/// outermost `{...}` fragment, and the repaired fragment.
pub fn parse_json_response<T: DeserializeOwned>(response: &str) -> Result<T, ParseError> {
    let clean = strip_markdown_fences(response);
    if clean.is_empty() {
        return Err(ParseError::Empty);
    }

    let first_error = match serde_json::from_str::<T>(clean) {
        Ok(parsed) => return Ok(parsed),
        Err(e) => e,
    };

    let repaired = fix_json_issues(clean);
    if let Ok(parsed) = serde_json::from_str::<T>(&repaired) {
        return Ok(parsed);
    }

    let Some(fragment) = extract_json_fragment(clean, '{', '}') else {
        return Err(ParseError::NoJson {
            preview: truncate_str(clean, PREVIEW_CHARS).to_string(),
        });
    };
    if let Ok(parsed) = serde_json::from_str::<T>(fragment) {
        return Ok(parsed);
    }
    serde_json::from_str::<T>(&fix_json_issues(fragment)).map_err(|_| ParseError::Invalid {
        message: first_error.to_string(),
        preview: truncate_str(clean, PREVIEW_CHARS).to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        value: u32,
    }

    #[test]
    fn test_strip_markdown_fences() {
        assert_eq!(strip_markdown_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_markdown_fences("```\n[]\n```"), "[]");
        assert_eq!(strip_markdown_fences("  {}  "), "{}");
    }

    #[test]
    fn test_strip_code_fences_with_language_tag() {
        let raw = "```python\ndef add(a, b):\n    return a + b\n```";
        assert_eq!(strip_code_fences(raw), "def add(a, b):\n    return a + b");
    }

    #[test]
    fn test_strip_code_fences_plain_code_untouched() {
        let raw = "x = 1\nprint(x)\n";
        assert_eq!(strip_code_fences(raw), "x = 1\nprint(x)");
    }

    #[test]
    fn test_strip_code_fences_inside_prose() {
        let raw = "Here is the fixed file:\n```py\nx = 2\n```\nLet me know!";
        assert_eq!(strip_code_fences(raw), "x = 2");
    }

    #[test]
    fn test_strip_code_fences_keeps_fences_inside_docstring() {
        let raw = "```python\n\"\"\"Calculator.\n\n```python\nadd(1, 2)\n```\n\"\"\"\n\ndef add(a, b):\n    return a + b\n```";
        let code = strip_code_fences(raw);
        assert!(code.starts_with("\"\"\"Calculator."));
        assert!(code.contains("add(1, 2)\n```\n\"\"\""));
        assert!(code.ends_with("    return a + b"));
    }

    #[test]
    fn test_strip_code_fences_bare_fence() {
        assert_eq!(strip_code_fences("```\nx = 3\n```"), "x = 3");
    }

    #[test]
    fn test_parse_json_response_plain_and_fenced() {
        let parsed: Sample = parse_json_response("{\"value\": 3}").unwrap();
        assert_eq!(parsed, Sample { value: 3 });
        let parsed: Sample = parse_json_response("```json\n{\"value\": 4}\n```").unwrap();
        assert_eq!(parsed.value, 4);
    }

    #[test]
    fn test_parse_json_response_repairs_trailing_comma_and_noise() {
        let parsed: Sample = parse_json_response("Sure! {\"value\": 5,} hope it helps").unwrap();
        assert_eq!(parsed.value, 5);
    }

    #[test]
    fn test_parse_json_response_repairs_pretty_printed_trailing_commas() {
        #[derive(Debug, Deserialize)]
        struct Audit {
            issues: Vec<Sample>,
        }
        let raw = "{\n  \"issues\": [\n    {\"value\": 1},\n    {\"value\": 2,\n    },\n  ],\n}";
        let parsed: Audit = parse_json_response(raw).unwrap();
        assert_eq!(parsed.issues, vec![Sample { value: 1 }, Sample { value: 2 }]);
    }

    #[test]
    fn test_parse_json_response_errors_are_typed() {
        assert_eq!(parse_json_response::<Sample>("   "), Err(ParseError::Empty));
        assert!(matches!(
            parse_json_response::<Sample>("no json here"),
            Err(ParseError::NoJson { .. })
        ));
        assert!(matches!(
            parse_json_response::<Sample>("{\"value\": \"nope\"}"),
            Err(ParseError::Invalid { .. })
        ));
    }
}
