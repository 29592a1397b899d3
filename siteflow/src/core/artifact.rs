//! File artifacts, structural descriptions, and change requests.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single (path, content) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileArtifact {
    /// Path relative to the project root.
    pub path: String,
    /// Full file content.
    pub content: String,
}

impl FileArtifact {
    /// Creates a file artifact.
    #[must_use]
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Parsed description of a project's file and module layout.
///
/// The generation service chooses the shape; it is kept as JSON and handed
/// back verbatim as context for later change requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectStructure(serde_json::Value);

impl ProjectStructure {
    /// Wraps a structure value.
    #[must_use]
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Returns the underlying value.
    #[must_use]
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Renders the structure for inclusion in a prompt.
    #[must_use]
    pub fn to_prompt_text(&self) -> String {
        match &self.0 {
            serde_json::Value::String(text) => text.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        }
    }
}

/// Files and structure extracted from a generation response.
///
/// Only produced by [`crate::parsing::parse_generation_output`], which
/// guarantees the set is non-empty and paths are unique.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedArtifactSet {
    structure: ProjectStructure,
    files: Vec<FileArtifact>,
}

impl GeneratedArtifactSet {
    pub(crate) fn new(structure: ProjectStructure, files: Vec<FileArtifact>) -> Self {
        Self { structure, files }
    }

    /// Returns the structural description.
    #[must_use]
    pub fn structure(&self) -> &ProjectStructure {
        &self.structure
    }

    /// Returns the files in generation order.
    #[must_use]
    pub fn files(&self) -> &[FileArtifact] {
        &self.files
    }

    /// Returns the file paths in generation order.
    #[must_use]
    pub fn paths(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.path.as_str()).collect()
    }

    /// Returns the number of files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Always false for a parsed set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Splits the set into structure and files.
    #[must_use]
    pub fn into_parts(self) -> (ProjectStructure, Vec<FileArtifact>) {
        (self.structure, self.files)
    }
}

/// Rewritten files produced by the modification pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    files: Vec<FileArtifact>,
}

impl ChangeSet {
    pub(crate) fn new(files: Vec<FileArtifact>) -> Self {
        Self { files }
    }

    /// Returns the rewritten files.
    #[must_use]
    pub fn files(&self) -> &[FileArtifact] {
        &self.files
    }

    /// Returns the rewritten paths.
    #[must_use]
    pub fn paths(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.path.as_str()).collect()
    }

    /// Returns the number of files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Always false for a parsed set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Consumes the set, returning its files.
    #[must_use]
    pub fn into_files(self) -> Vec<FileArtifact> {
        self.files
    }
}

/// Decision of which files a change touches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeAnalysis {
    /// Existing paths that need edits.
    #[serde(default, alias = "files_to_modify")]
    pub modify: Vec<String>,
    /// New paths to create.
    #[serde(default, alias = "files_to_create")]
    pub create: Vec<String>,
    /// Auxiliary notes for the rewrite stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl ChangeAnalysis {
    /// Returns true if no path was named.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modify.is_empty() && self.create.is_empty()
    }
}

/// A natural-language requirement against the current structure.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRequest {
    /// What the user asked for.
    pub requirement: String,
    /// Structure of the project the change applies to.
    pub structure: ProjectStructure,
}

impl ChangeRequest {
    /// Creates a change request.
    #[must_use]
    pub fn new(requirement: impl Into<String>, structure: ProjectStructure) -> Self {
        Self {
            requirement: requirement.into(),
            structure,
        }
    }

    /// Composes the prompt for the analysis stage.
    #[must_use]
    pub fn analysis_prompt(&self) -> String {
        format!(
            "Requirement:\n{}\n\nCurrent project structure:\n{}\n\n\
             Respond with a JSON object containing \"modify\" (existing paths to edit), \
             \"create\" (new paths to add) and optional \"notes\".",
            self.requirement.trim(),
            self.structure.to_prompt_text(),
        )
    }

    /// Composes the prompt for the rewrite stage.
    #[must_use]
    pub fn rewrite_prompt(&self, analysis: &ChangeAnalysis) -> String {
        let mut prompt = format!("Requirement:\n{}\n", self.requirement.trim());
        if !analysis.create.is_empty() {
            prompt.push_str(&format!("\nNew files to create: {}\n", analysis.create.join(", ")));
        }
        if let Some(ref notes) = analysis.notes {
            prompt.push_str(&format!("\nNotes:\n{notes}\n"));
        }
        prompt.push_str(
            "\nRespond with a JSON array of {\"path\", \"content\"} objects holding the full \
             new content of every changed or created file.",
        );
        prompt
    }
}

/// Unstructured text returned by the generation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawModelOutput(String);

impl RawModelOutput {
    /// Wraps raw text.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Returns the raw text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RawModelOutput {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for RawModelOutput {
    fn from(text: String) -> Self {
        Self(text)
    }
}

/// Location of a packaged file tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArchiveRef(String);

impl ArchiveRef {
    /// Wraps an archive location.
    #[must_use]
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    /// Returns the location.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArchiveRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result reported by the write service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WriteOutcome {
    /// Every file was persisted.
    Ack {
        /// Number of files written.
        written: usize,
    },
    /// Some files were not persisted.
    Partial {
        /// Paths that were written.
        #[serde(default)]
        written: Vec<String>,
        /// Paths that were not written.
        failed: Vec<String>,
    },
}
