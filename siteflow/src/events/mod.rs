//! Event sink system for observability.
//!
//! Pipelines report progress and side-channel failures through an
//! [`EventSink`] injected into the orchestrator.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names emitted by pipelines and the orchestrator.
pub mod types {
    /// A pipeline run was admitted and started.
    pub const PIPELINE_STARTED: &str = "pipeline.started";
    /// A pipeline run finished successfully.
    pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
    /// A pipeline run failed.
    pub const PIPELINE_FAILED: &str = "pipeline.failed";
    /// A generation returned the recorded deployment without running.
    pub const PIPELINE_SHORT_CIRCUITED: &str = "pipeline.short_circuited";
    /// The deployment could not be written back to the project store.
    pub const RECORDING_FAILED: &str = "pipeline.recording_failed";
    /// A stage started.
    pub const STAGE_STARTED: &str = "stage.started";
    /// A stage completed.
    pub const STAGE_COMPLETED: &str = "stage.completed";
    /// A stage failed.
    pub const STAGE_FAILED: &str = "stage.failed";
    /// A repeat of an in-flight request was absorbed.
    pub const DEDUP_ABSORBED: &str = "dedup.absorbed";
    /// A conflicting request was rejected.
    pub const DEDUP_REJECTED: &str = "dedup.rejected";

    /// Returns true for event types that report a failure.
    #[must_use]
    pub fn is_failure(event_type: &str) -> bool {
        matches!(
            event_type,
            PIPELINE_FAILED | RECORDING_FAILED | STAGE_FAILED | DEDUP_REJECTED
        )
    }
}
