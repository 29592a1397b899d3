//! Test assertions for pipeline outcomes.

use crate::core::Stage;
use crate::errors::PipelineError;
use crate::events::CollectingEventSink;

/// Asserts that `err` has `code` and names `stage`.
pub fn assert_failed_at(err: &PipelineError, code: &str, stage: Stage) {
    assert_eq!(err.code(), code, "Expected {code}, got: {err}");
    assert_eq!(
        err.stage(),
        Some(stage),
        "Expected failure in stage {stage}, got {:?}",
        err.stage()
    );
}

/// Asserts that the sink saw `expected` events of `event_type`.
pub fn assert_event_count(sink: &CollectingEventSink, event_type: &str, expected: usize) {
    assert_eq!(
        sink.count_of(event_type),
        expected,
        "Expected {expected} '{event_type}' events. Events: {:?}",
        sink.event_types()
    );
}

/// Asserts the order of the stages that started.
pub fn assert_stages_started(sink: &CollectingEventSink, expected: &[Stage]) {
    let started: Vec<String> = sink
        .events_of_type(crate::events::types::STAGE_STARTED)
        .into_iter()
        .filter_map(|(_, data)| data?.get("stage")?.as_str().map(ToString::to_string))
        .collect();
    let expected: Vec<String> = expected.iter().map(|s| s.as_str().to_string()).collect();
    assert_eq!(started, expected, "Unexpected stage sequence");
}
