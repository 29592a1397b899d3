//! Testing utilities for siteflow orchestrators.
//!
//! This module provides:
//! - In-memory fakes for every collaborator port
//! - Raw model output fixtures
//! - Assertions over pipeline errors and emitted events

mod assertions;
pub mod fixtures;
mod mocks;

pub use assertions::{assert_event_count, assert_failed_at, assert_stages_started};
pub use mocks::{
    store_with, FakeBuild, FakePackaging, InMemoryProjectStore, RecordingWriteService,
    ScriptedGenerationService, StaticFileSelection, TestServices,
};
