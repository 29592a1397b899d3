//! Parsing of generation-service output.

use serde_json::Value;

use super::{extract_payload, parse_file_items, ParseError};
use crate::core::{GeneratedArtifactSet, ProjectStructure, RawModelOutput};

/// Extracts the structure and ordered file set from a generation response.
///
/// The payload must be an object with a non-null `structure` and a non-empty
/// `files` array of `{ "path", "content" }` items.
pub fn parse_generation_output(raw: &RawModelOutput) -> Result<GeneratedArtifactSet, ParseError> {
    let payload = extract_payload(raw.as_str())?;
    let sections = payload.as_object().ok_or(ParseError::WrongShape {
        section: "payload",
        expected: "object",
    })?;

    let structure = match sections.get("structure") {
        None | Some(Value::Null) => return Err(ParseError::MissingSection("structure")),
        Some(Value::String(text)) if text.trim().is_empty() => {
            return Err(ParseError::MissingSection("structure"))
        }
        Some(value) => ProjectStructure::new(value.clone()),
    };

    let items = sections
        .get("files")
        .ok_or(ParseError::MissingSection("files"))?
        .as_array()
        .ok_or(ParseError::WrongShape {
            section: "files",
            expected: "array",
        })?;

    let files = parse_file_items(items)?;
    Ok(GeneratedArtifactSet::new(structure, files))
}
