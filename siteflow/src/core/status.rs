//! Run kind, stage, and lifecycle enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of pipeline a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// The "create project" sequence ending in a preview URL.
    Generate,
    /// The "apply a change" sequence on an existing file tree.
    Modify,
    /// Removal of the project record.
    Delete,
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generate => write!(f, "generate"),
            Self::Modify => write!(f, "modify"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// One step of a pipeline run.
///
/// Every failure surfaced by a pipeline names the stage it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Fetching the project record (short-circuit check or status fetch).
    LoadProject,
    /// Submitting the prompt to the generation service.
    Generate,
    /// Extracting structure and files from raw model output.
    Parse,
    /// Holding the structure as the current project context.
    PersistStructure,
    /// Submitting files to the write service.
    WriteFiles,
    /// Requesting an archive reference for the written tree.
    Package,
    /// Building the archive and deploying a preview.
    BuildDeploy,
    /// Writing the deployment back to the project store.
    Record,
    /// Asking the generation service which files a change touches.
    Analyze,
    /// Fetching the live contents of the files to modify.
    ResolveFiles,
    /// Asking the generation service to rewrite the resolved files.
    Rewrite,
}

impl Stage {
    /// Generation stages in execution order.
    pub const GENERATION: [Self; 8] = [
        Self::LoadProject,
        Self::Generate,
        Self::Parse,
        Self::PersistStructure,
        Self::WriteFiles,
        Self::Package,
        Self::BuildDeploy,
        Self::Record,
    ];

    /// Modification stages in execution order.
    pub const MODIFICATION: [Self; 4] = [
        Self::Analyze,
        Self::ResolveFiles,
        Self::Rewrite,
        Self::WriteFiles,
    ];

    /// Returns the snake_case stage name used in logs and events.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoadProject => "load_project",
            Self::Generate => "generate",
            Self::Parse => "parse",
            Self::PersistStructure => "persist_structure",
            Self::WriteFiles => "write_files",
            Self::Package => "package",
            Self::BuildDeploy => "build_deploy",
            Self::Record => "record",
            Self::Analyze => "analyze",
            Self::ResolveFiles => "resolve_files",
            Self::Rewrite => "rewrite",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// The run has not reached a terminal stage yet.
    #[default]
    Pending,
    /// Every stage completed.
    Success,
    /// A stage failed and the remaining stages were skipped.
    Failure,
}

impl RunOutcome {
    /// Returns true if the outcome is final.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

/// Display state of a project session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No command has been issued yet.
    #[default]
    Idle,
    /// A command is running.
    Loading,
    /// A preview URL is available.
    Ready,
    /// The last command failed.
    Error,
}

impl LifecycleState {
    /// Returns true if moving from `self` to `next` is a legal transition.
    ///
    /// `idle -> loading -> {ready, error}`, and `ready`/`error` may re-enter
    /// `loading` on a new command.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle | Self::Ready | Self::Error, Self::Loading)
                | (Self::Loading, Self::Ready | Self::Error)
        )
    }

    /// Returns true if the state ends a command.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Error)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Loading => write!(f, "loading"),
            Self::Ready => write!(f, "ready"),
            Self::Error => write!(f, "error"),
        }
    }
}
