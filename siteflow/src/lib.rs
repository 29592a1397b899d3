//! # Siteflow
//!
//! Orchestrates natural-language web projects through generation and
//! modification pipelines.
//!
//! Siteflow provides:
//!
//! - **Generation pipeline**: prompt to parsed files to packaged, deployed
//!   preview, recorded back on the project
//! - **Modification pipeline**: requirement to selected files to rewritten
//!   files written in place
//! - **Dedup guard**: at most one in-flight run per project, with repeats of
//!   the in-flight request absorbed
//! - **Session state machine**: `idle -> loading -> {ready, error}` with a
//!   watchable status and an append-only message log
//! - **Typed ports**: every external service behind an `async_trait`, with
//!   `reqwest` clients and in-memory fakes
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use siteflow::prelude::*;
//!
//! let config = OrchestratorConfig::from_env()?;
//! let orchestrator = Orchestrator::new(StagePorts::http(&config.endpoints), config);
//!
//! let session = orchestrator.session_for("42");
//! if let CommandOutcome::Completed(report) = session.generate("A todo app").await? {
//!     println!("Preview: {}", report.preview_url);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

#[cfg(feature = "http")]
pub mod clients;
pub mod config;
pub mod core;
pub mod dedup;
pub mod errors;
pub mod events;
pub mod observability;
pub mod orchestrator;
pub mod parsing;
pub mod pipeline;
pub mod ports;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{OrchestratorConfig, RecordingPolicy, ServiceEndpoints};
    pub use crate::core::{
        ChangeRequest, FileArtifact, LifecycleState, NewProject, Project, ProjectId,
        ProjectStatus, ProjectStructure, RunKind, Stage,
    };
    pub use crate::dedup::{Admission, DedupGuard, RunPermit};
    pub use crate::errors::{PipelineError, ServiceError};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::orchestrator::{
        CommandOutcome, InitRequest, MessageRole, Orchestrator, ProjectSession, SessionMessage,
        SessionStatus,
    };
    pub use crate::parsing::ParseError;
    pub use crate::pipeline::{ChangeReport, GenerationReport, RecordingStatus};
    pub use crate::ports::{
        BuildService, FileSelectionService, GenerationService, PackagingService, ProjectStore,
        StagePorts, WriteService,
    };
}
