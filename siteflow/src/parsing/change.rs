//! Parsing of change-analysis and rewrite output.

use serde_json::{Map, Value};

use super::{extract_payload, normalize_path, parse_file_items, ParseError};
use crate::core::{ChangeAnalysis, ChangeSet, RawModelOutput};

/// Extracts which paths a change modifies and creates.
///
/// Accepts `modify`/`files_to_modify` and `create`/`files_to_create` string
/// arrays plus an optional `notes` string. At least one path must be named.
pub fn parse_change_analysis(raw: &RawModelOutput) -> Result<ChangeAnalysis, ParseError> {
    let payload = extract_payload(raw.as_str())?;
    let sections = payload.as_object().ok_or(ParseError::WrongShape {
        section: "payload",
        expected: "object",
    })?;

    let modify = path_list(sections, "modify", "files_to_modify")?;
    let create = path_list(sections, "create", "files_to_create")?;
    let (modify, create) = match (modify, create) {
        (None, None) => return Err(ParseError::MissingSection("modify")),
        (modify, create) => (modify.unwrap_or_default(), create.unwrap_or_default()),
    };

    let notes = match sections.get("notes") {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text.trim().to_string()).filter(|t| !t.is_empty()),
        Some(_) => {
            return Err(ParseError::WrongShape {
                section: "notes",
                expected: "string",
            })
        }
    };

    let analysis = ChangeAnalysis {
        modify,
        create,
        notes,
    };
    if analysis.is_empty() {
        return Err(ParseError::NoFilesSelected);
    }
    Ok(analysis)
}

/// Reads an optional array of paths, normalized and de-duplicated in order.
fn path_list(
    sections: &Map<String, Value>,
    key: &'static str,
    alias: &'static str,
) -> Result<Option<Vec<String>>, ParseError> {
    let Some(value) = sections.get(key).or_else(|| sections.get(alias)) else {
        return Ok(None);
    };
    let wrong_shape = ParseError::WrongShape {
        section: key,
        expected: "array of strings",
    };

    let items = value.as_array().ok_or_else(|| wrong_shape.clone())?;
    let mut paths: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let path = normalize_path(item.as_str().ok_or_else(|| wrong_shape.clone())?)?;
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    Ok(Some(paths))
}

/// Extracts the rewritten files from a rewrite response.
///
/// The payload is either an array of `{ "path", "content" }` items or an
/// object with such an array under `files`. Any malformed item fails the
/// whole set.
pub fn parse_change_set(raw: &RawModelOutput) -> Result<ChangeSet, ParseError> {
    let payload = extract_payload(raw.as_str())?;

    let items = match &payload {
        Value::Array(items) => items,
        Value::Object(sections) => sections
            .get("files")
            .ok_or(ParseError::MissingSection("files"))?
            .as_array()
            .ok_or(ParseError::WrongShape {
                section: "files",
                expected: "array",
            })?,
        _ => {
            return Err(ParseError::WrongShape {
                section: "payload",
                expected: "array or object",
            })
        }
    };

    Ok(ChangeSet::new(parse_file_items(items)?))
}

/// Confines a rewrite to the paths the analysis selected.
///
/// Any path outside `modify` and `create` fails the whole set.
pub fn scope_change_set(set: ChangeSet, analysis: &ChangeAnalysis) -> Result<ChangeSet, ParseError> {
    let selected = |path: &str| {
        analysis
            .modify
            .iter()
            .chain(&analysis.create)
            .any(|allowed| allowed == path)
    };
    if let Some(path) = set.paths().into_iter().find(|path| !selected(path)) {
        return Err(ParseError::UnexpectedPath(path.to_string()));
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn raw(text: &str) -> RawModelOutput {
        RawModelOutput::new(text)
    }

    #[test]
    fn test_analysis_with_all_sections() {
        let text = r#"```json
{"modify": ["index.html", "./styles.css", "index.html"], "create": ["theme.js"], "notes": " use localStorage "}
```"#;
        let analysis = parse_change_analysis(&raw(text)).unwrap();

        assert_eq!(analysis.modify, vec!["index.html", "styles.css"]);
        assert_eq!(analysis.create, vec!["theme.js"]);
        assert_eq!(analysis.notes.as_deref(), Some("use localStorage"));
    }

    #[test]
    fn test_analysis_accepts_aliases() {
        let text = r#"{"files_to_modify": ["app.js"], "files_to_create": []}"#;
        let analysis = parse_change_analysis(&raw(text)).unwrap();

        assert_eq!(analysis.modify, vec!["app.js"]);
        assert!(analysis.create.is_empty());
        assert_eq!(analysis.notes, None);
    }

    #[test]
    fn test_analysis_without_lists_is_missing() {
        let text = r#"{"notes": "nothing to do"}"#;
        assert_eq!(
            parse_change_analysis(&raw(text)),
            Err(ParseError::MissingSection("modify"))
        );
    }

    #[test]
    fn test_analysis_selecting_nothing_fails() {
        let text = r#"{"modify": [], "create": []}"#;
        assert_eq!(
            parse_change_analysis(&raw(text)),
            Err(ParseError::NoFilesSelected)
        );
    }

    #[test]
    fn test_analysis_rejects_non_string_paths() {
        let text = r#"{"modify": [1, 2]}"#;
        assert!(matches!(
            parse_change_analysis(&raw(text)),
            Err(ParseError::WrongShape { section: "modify", .. })
        ));
    }

    #[test]
    fn test_change_set_from_array() {
        let text = r#"[{"path": "index.html", "content": "<button>dark</button>"}]"#;
        let set = parse_change_set(&raw(text)).unwrap();
        assert_eq!(set.paths(), vec!["index.html"]);
    }

    #[test]
    fn test_change_set_from_object() {
        let text = r#"{"files": [{"path": "a.css", "content": "body{}"}, {"path": "b.js", "content": ""}]}"#;
        let set = parse_change_set(&raw(text)).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_change_set_with_malformed_item_fails_whole_set() {
        let text = r#"[
            {"path": "index.html", "content": "<button>dark</button>"},
            {"path": "theme.js"}
        ]"#;
        assert_eq!(
            parse_change_set(&raw(text)),
            Err(ParseError::MalformedItem {
                index: 1,
                field: "content",
            })
        );
    }

    #[test]
    fn test_change_set_rejects_scalar_payload() {
        let text = "```json\n42\n```";
        assert!(matches!(
            parse_change_set(&raw(text)),
            Err(ParseError::WrongShape { section: "payload", .. })
        ));
    }

    #[test]
    fn test_scope_rejects_unselected_path() {
        let analysis = ChangeAnalysis {
            modify: vec!["src/App.jsx".to_string()],
            create: vec!["src/Toggle.jsx".to_string()],
            notes: None,
        };
        let text = r#"[{"path": "./src/App.jsx", "content": "a"}, {"path": "src/Toggle.jsx", "content": "b"}]"#;
        let set = scope_change_set(parse_change_set(&raw(text)).unwrap(), &analysis).unwrap();
        assert_eq!(set.paths(), vec!["src/App.jsx", "src/Toggle.jsx"]);

        let text = r#"[{"path": "src/App.jsx", "content": "a"}, {"path": "package.json", "content": "{}"}]"#;
        assert_eq!(
            scope_change_set(parse_change_set(&raw(text)).unwrap(), &analysis),
            Err(ParseError::UnexpectedPath("package.json".to_string()))
        );
    }
}
