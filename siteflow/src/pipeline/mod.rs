//! Pipeline execution.
//!
//! This module provides:
//! - The generation pipeline (prompt to preview URL)
//! - The modification pipeline (requirement to rewritten files)
//! - Per-run bookkeeping and the shared structure context

mod context;
mod generation;
mod modification;
mod run;

pub use context::StructureContext;
pub use generation::{
    GenerationEntry, GenerationPipeline, GenerationReport, GenerationRequest, RecordingStatus,
};
pub use modification::{ChangeReport, ModificationPipeline};
pub use run::PipelineRun;
