//! Error types for the siteflow orchestrator.
//!
//! [`ServiceError`] is what a collaborator port returns. [`PipelineError`] is
//! what a pipeline run surfaces, tagged with the [`Stage`] that failed.

use serde_json::json;
use std::collections::HashMap;
use thiserror::Error;

use crate::core::{RunKind, Stage};
use crate::parsing::ParseError;

/// Errors returned by external collaborators.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// The requested resource does not exist.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The service answered with an error status.
    #[error("Service rejected request (status {status}): {message}")]
    Rejected {
        /// Status code reported by the service.
        status: u16,
        /// Error body or reason.
        message: String,
    },

    /// The request never got an answer.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The answer could not be decoded.
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ServiceError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Creates a rejected error.
    #[must_use]
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Creates a transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Returns true if this is a not-found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_)) || matches!(self, Self::Rejected { status: 404, .. })
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::rejected(status.as_u16(), err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Terminal failure of a pipeline run or command.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// A project, record, or file does not exist.
    #[error("Not found: {resource}")]
    NotFound {
        /// What was missing.
        resource: String,
        /// The stage that looked for it.
        stage: Option<Stage>,
    },

    /// Model output could not be parsed.
    #[error("Parse failure in stage '{stage}': {source}")]
    ParseFailure {
        /// The stage whose output was malformed.
        stage: Stage,
        /// What was wrong with it.
        #[source]
        source: ParseError,
    },

    /// The write service persisted only some files.
    #[error("Partial write in stage '{stage}': {} file(s) not persisted", .failed.len())]
    PartialWriteFailure {
        /// The write stage.
        stage: Stage,
        /// Paths that were not written.
        failed: Vec<String>,
    },

    /// An external call failed or timed out.
    #[error("Upstream failure in stage '{stage}': {message}")]
    UpstreamFailure {
        /// The stage whose call failed.
        stage: Stage,
        /// Failure detail.
        message: String,
    },

    /// Another run is already active for the project.
    #[error("Run rejected: project '{project}' already has an active {active_kind} run")]
    DuplicateRunRejected {
        /// Project key that is occupied.
        project: String,
        /// Kind of the run holding it.
        active_kind: RunKind,
    },

    /// The deployment exists but writing it to the project store failed.
    #[error("Recording failure: {message}")]
    RecordingFailure {
        /// Failure detail.
        message: String,
    },

    /// The task driving the run ended without an outcome.
    #[error("Pipeline run aborted: {0}")]
    Aborted(String),
}

impl PipelineError {
    /// Maps a collaborator error raised during `stage`.
    #[must_use]
    pub fn from_service(stage: Stage, err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(resource) => Self::NotFound {
                resource,
                stage: Some(stage),
            },
            other if other.is_not_found() => Self::NotFound {
                resource: other.to_string(),
                stage: Some(stage),
            },
            other => Self::UpstreamFailure {
                stage,
                message: other.to_string(),
            },
        }
    }

    /// Creates a parse failure for `stage`.
    #[must_use]
    pub fn parse(stage: Stage, source: ParseError) -> Self {
        Self::ParseFailure { stage, source }
    }

    /// Returns the stage that failed, if any.
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::NotFound { stage, .. } => *stage,
            Self::ParseFailure { stage, .. }
            | Self::PartialWriteFailure { stage, .. }
            | Self::UpstreamFailure { stage, .. } => Some(*stage),
            Self::RecordingFailure { .. } => Some(Stage::Record),
            Self::DuplicateRunRejected { .. } | Self::Aborted(_) => None,
        }
    }

    /// Stable code for the failure kind.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::ParseFailure { .. } => "PARSE_FAILURE",
            Self::PartialWriteFailure { .. } => "PARTIAL_WRITE_FAILURE",
            Self::UpstreamFailure { .. } => "UPSTREAM_FAILURE",
            Self::DuplicateRunRejected { .. } => "DUPLICATE_RUN_REJECTED",
            Self::RecordingFailure { .. } => "RECORDING_FAILURE",
            Self::Aborted(_) => "ABORTED",
        }
    }

    /// The single human-readable message shown for this failure.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound { resource, .. } => format!("Could not find {resource}."),
            Self::ParseFailure { stage, .. } => format!(
                "The generated response could not be understood ({stage}). Please try again."
            ),
            Self::PartialWriteFailure { failed, .. } => format!(
                "Saving the project files failed for {} file(s). Please try again.",
                failed.len()
            ),
            Self::UpstreamFailure { stage, .. } => {
                format!("A required service failed during {stage}. Please try again.")
            }
            Self::DuplicateRunRejected { .. } => {
                "This project is already being processed. Please wait for it to finish."
                    .to_string()
            }
            Self::RecordingFailure { .. } => {
                "The preview was deployed but could not be saved to the project.".to_string()
            }
            Self::Aborted(_) => "The request stopped unexpectedly. Please try again.".to_string(),
        }
    }

    /// Converts to a dictionary representation for event payloads.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), json!(self.code()));
        map.insert("message".to_string(), json!(self.to_string()));
        if let Some(stage) = self.stage() {
            map.insert("stage".to_string(), json!(stage.as_str()));
        }

        match self {
            Self::PartialWriteFailure { failed, .. } => {
                map.insert("failed".to_string(), json!(failed));
            }
            Self::DuplicateRunRejected {
                project,
                active_kind,
            } => {
                map.insert("project".to_string(), json!(project));
                map.insert("active_kind".to_string(), json!(active_kind));
            }
            _ => {}
        }

        map
    }
}
