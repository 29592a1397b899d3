//! Parsing of free-text model output into structured artifacts.
//!
//! Every function here is pure: it takes the raw text and either returns a
//! complete value or a [`ParseError`]. Nothing is partially populated.
//!
//! Model output carries a JSON payload, either inside a fenced code block
//! (the first fence holding valid JSON wins) or as the outermost `{...}` /
//! `[...]` span of the text.

mod change;
mod generation;

pub use change::{parse_change_analysis, parse_change_set, scope_change_set};
pub use generation::parse_generation_output;

use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::LazyLock;
use thiserror::Error;

use crate::core::FileArtifact;

/// Ways model output can fail to parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The text holds nothing that looks like JSON.
    #[error("no JSON payload found in model output")]
    NoPayload,

    /// A payload was found but is not valid JSON.
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),

    /// A required top-level section is absent or null.
    #[error("missing required section '{0}'")]
    MissingSection(&'static str),

    /// A section is present but has the wrong JSON type.
    #[error("section '{section}' has the wrong shape: expected {expected}")]
    WrongShape {
        /// The offending section.
        section: &'static str,
        /// What the section should have been.
        expected: &'static str,
    },

    /// The file list is empty.
    #[error("artifact set is empty")]
    EmptyArtifactSet,

    /// The analysis named neither files to modify nor files to create.
    #[error("change analysis selected no files")]
    NoFilesSelected,

    /// A file item lacks a string field.
    #[error("item {index} is malformed: missing or non-string '{field}'")]
    MalformedItem {
        /// Zero-based position of the item.
        index: usize,
        /// The missing field.
        field: &'static str,
    },

    /// A path is empty, absolute, or escapes the project root.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath {
        /// The rejected path.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The same path appears twice.
    #[error("duplicate path '{0}'")]
    DuplicatePath(String),

    /// A rewritten path was not selected by the change analysis.
    #[error("path '{0}' was not selected by the change analysis")]
    UnexpectedPath(String),
}

#[allow(clippy::expect_used)]
static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)```").expect("fence pattern is valid")
});

/// Extracts the JSON payload embedded in raw model output.
pub fn extract_payload(raw: &str) -> Result<Value, ParseError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ParseError::NoPayload);
    }

    let mut first_error: Option<String> = None;
    for caps in FENCED_BLOCK.captures_iter(text) {
        let Some(body) = caps.get(1) else { continue };
        match serde_json::from_str::<Value>(body.as_str().trim()) {
            Ok(value) => return Ok(value),
            Err(e) => {
                first_error.get_or_insert_with(|| e.to_string());
            }
        }
    }

    for span in outermost_spans(text) {
        match serde_json::from_str::<Value>(span) {
            Ok(value) => return Ok(value),
            Err(e) => {
                first_error.get_or_insert_with(|| e.to_string());
            }
        }
    }

    Err(first_error.map_or(ParseError::NoPayload, ParseError::InvalidJson))
}

/// Candidate `{...}` and `[...]` spans, earliest opener first.
fn outermost_spans(text: &str) -> Vec<&str> {
    let mut spans: Vec<(usize, &str)> = [('{', '}'), ('[', ']')]
        .into_iter()
        .filter_map(|(open, close)| {
            let start = text.find(open)?;
            let end = text.rfind(close)?;
            (end > start).then(|| (start, &text[start..=end]))
        })
        .collect();
    spans.sort_by_key(|(start, _)| *start);
    spans.into_iter().map(|(_, span)| span).collect()
}

/// Validates a relative project path and returns its normalized form.
pub(crate) fn normalize_path(path: &str) -> Result<String, ParseError> {
    let trimmed = path.trim();
    let invalid = |reason| ParseError::InvalidPath {
        path: path.to_string(),
        reason,
    };

    let normalized = trimmed.trim_start_matches("./");
    if normalized.is_empty() {
        return Err(invalid("path is empty"));
    }
    if normalized.starts_with(['/', '\\']) || has_drive_prefix(normalized) {
        return Err(invalid("path must be relative"));
    }
    if normalized.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(invalid("path escapes the project root"));
    }

    Ok(normalized.to_string())
}

/// True for a bare or rooted Windows drive such as `C:` or `C:/site`.
fn has_drive_prefix(path: &str) -> bool {
    match path.as_bytes() {
        [letter, b':'] => letter.is_ascii_alphabetic(),
        [letter, b':', b'/' | b'\\', ..] => letter.is_ascii_alphabetic(),
        _ => false,
    }
}

/// Parses an array of `{ "path", "content" }` items.
///
/// Fails on the first malformed item; the set must be non-empty and paths
/// unique after normalization.
pub(crate) fn parse_file_items(items: &[Value]) -> Result<Vec<FileArtifact>, ParseError> {
    if items.is_empty() {
        return Err(ParseError::EmptyArtifactSet);
    }

    let mut seen = HashSet::with_capacity(items.len());
    let mut files = Vec::with_capacity(items.len());

    for (index, item) in items.iter().enumerate() {
        let path = item
            .get("path")
            .and_then(Value::as_str)
            .ok_or(ParseError::MalformedItem { index, field: "path" })?;
        let content = item
            .get("content")
            .and_then(Value::as_str)
            .ok_or(ParseError::MalformedItem { index, field: "content" })?;

        let path = normalize_path(path)?;
        if !seen.insert(path.clone()) {
            return Err(ParseError::DuplicatePath(path));
        }
        files.push(FileArtifact::new(path, content));
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_extract_from_fenced_block() {
        let raw = "Here you go:\n```json\n{\"a\": 1}\n```\nEnjoy!";
        assert_eq!(extract_payload(raw).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_extract_skips_non_json_fence() {
        let raw = "```html\n<div></div>\n```\n\n```json\n{\"b\": 2}\n```";
        assert_eq!(extract_payload(raw).unwrap(), json!({"b": 2}));
    }

    #[test]
    fn test_extract_bare_object() {
        let raw = "Sure! {\"files\": []} Let me know.";
        assert_eq!(extract_payload(raw).unwrap(), json!({"files": []}));
    }

    #[test]
    fn test_extract_bare_array() {
        let raw = "[{\"path\": \"a\", \"content\": \"b\"}]";
        assert_eq!(
            extract_payload(raw).unwrap(),
            json!([{"path": "a", "content": "b"}])
        );
    }

    #[test]
    fn test_extract_no_payload() {
        assert_eq!(extract_payload(""), Err(ParseError::NoPayload));
        assert_eq!(
            extract_payload("I could not build that."),
            Err(ParseError::NoPayload)
        );
    }

    #[test]
    fn test_extract_invalid_json() {
        let result = extract_payload("{\"files\": [}");
        assert!(matches!(result, Err(ParseError::InvalidJson(_))));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("./src/app.js").unwrap(), "src/app.js");
        assert_eq!(normalize_path(" index.html ").unwrap(), "index.html");

        assert!(matches!(normalize_path(""), Err(ParseError::InvalidPath { .. })));
        assert!(matches!(normalize_path("/etc/passwd"), Err(ParseError::InvalidPath { .. })));
        assert!(matches!(normalize_path("C:\\site"), Err(ParseError::InvalidPath { .. })));
        assert!(matches!(normalize_path("src/../../x"), Err(ParseError::InvalidPath { .. })));
        assert!(matches!(normalize_path("D:"), Err(ParseError::InvalidPath { .. })));
        assert!(matches!(normalize_path("c:/site"), Err(ParseError::InvalidPath { .. })));
        assert_eq!(normalize_path("a:b.txt").unwrap(), "a:b.txt");
        assert_eq!(normalize_path("1:/notes.md").unwrap(), "1:/notes.md");
    }

    #[test]
    fn test_parse_file_items_rejects_missing_content() {
        let items = vec![
            json!({"path": "index.html", "content": "<html></html>"}),
            json!({"path": "app.js"}),
        ];
        assert_eq!(
            parse_file_items(&items),
            Err(ParseError::MalformedItem { index: 1, field: "content" })
        );
    }

    #[test]
    fn test_parse_file_items_rejects_duplicates_after_normalization() {
        let items = vec![
            json!({"path": "app.js", "content": "a"}),
            json!({"path": "./app.js", "content": "b"}),
        ];
        assert_eq!(
            parse_file_items(&items),
            Err(ParseError::DuplicatePath("app.js".to_string()))
        );
    }

    #[test]
    fn test_parse_file_items_allows_empty_content() {
        let items = vec![json!({"path": ".nojekyll", "content": ""})];
        let files = parse_file_items(&items).unwrap();
        assert_eq!(files, vec![FileArtifact::new(".nojekyll", "")]);
    }
}
