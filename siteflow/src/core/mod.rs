//! Core domain model types for siteflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Project records and their persisted status
//! - File artifacts, structures, and change requests
//! - Run kind, stage, and lifecycle enums

mod artifact;
mod project;
mod status;

pub use artifact::{
    ArchiveRef, ChangeAnalysis, ChangeRequest, ChangeSet, FileArtifact, GeneratedArtifactSet,
    ProjectStructure, RawModelOutput, WriteOutcome,
};
pub use project::{NewProject, Project, ProjectId, ProjectPatch, ProjectStatus};
pub use status::{LifecycleState, RunKind, RunOutcome, Stage};
