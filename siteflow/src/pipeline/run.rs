//! Per-run bookkeeping and the stage call wrapper.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::core::{FileArtifact, RunKind, RunOutcome, Stage, WriteOutcome};
use crate::errors::{PipelineError, ServiceError};
use crate::events::{types, EventSink};
use crate::observability::SpanTimer;
use crate::ports::WriteService;

/// One execution of a pipeline for one project.
///
/// Lives only in memory for the duration of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRun {
    /// Unique run id, shared with the dedup permit.
    pub run_id: Uuid,
    /// Project key the run occupies.
    pub project: String,
    /// Which pipeline the run executes.
    pub kind: RunKind,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    current_stage: Option<Stage>,
    outcome: RunOutcome,
}

impl PipelineRun {
    /// Creates a pending run.
    #[must_use]
    pub fn new(run_id: Uuid, project: impl Into<String>, kind: RunKind) -> Self {
        Self {
            run_id,
            project: project.into(),
            kind,
            started_at: Utc::now(),
            current_stage: None,
            outcome: RunOutcome::Pending,
        }
    }

    /// Returns the stage currently (or last) executing.
    #[must_use]
    pub fn current_stage(&self) -> Option<Stage> {
        self.current_stage
    }

    /// Returns the run outcome.
    #[must_use]
    pub fn outcome(&self) -> RunOutcome {
        self.outcome
    }

    /// Milliseconds since the run started.
    #[must_use]
    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds()
    }

    fn event_data(&self) -> serde_json::Value {
        json!({
            "run_id": self.run_id.to_string(),
            "project": self.project,
            "kind": self.kind,
        })
    }
}

/// Drives the stages of one run.
///
/// Every stage goes through [`StageRunner::stage`], which applies the stage
/// timeout, tags failures with the stage, and reports progress to the sink.
pub(crate) struct StageRunner {
    run: PipelineRun,
    sink: Arc<dyn EventSink>,
    timeout: Duration,
}

impl StageRunner {
    pub(crate) fn new(run: PipelineRun, sink: Arc<dyn EventSink>, timeout: Duration) -> Self {
        Self { run, sink, timeout }
    }

    pub(crate) fn run(&self) -> &PipelineRun {
        &self.run
    }

    pub(crate) fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    pub(crate) fn start(&self) {
        tracing::info!(
            project = %self.run.project,
            run_id = %self.run.run_id,
            kind = %self.run.kind,
            "Pipeline run started"
        );
        self.sink.try_emit(types::PIPELINE_STARTED, Some(self.run.event_data()));
    }

    /// Runs one stage under the stage timeout.
    pub(crate) async fn stage<T, F>(&mut self, stage: Stage, fut: F) -> Result<T, PipelineError>
    where
        F: Future<Output = Result<T, PipelineError>>,
    {
        self.run.current_stage = Some(stage);
        let timer = SpanTimer::start(stage.as_str());
        tracing::debug!(project = %self.run.project, run_id = %self.run.run_id, %stage, "Stage started");
        self.sink.try_emit(
            types::STAGE_STARTED,
            Some(json!({"run_id": self.run.run_id.to_string(), "stage": stage})),
        );

        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::UpstreamFailure {
                stage,
                message: format!("timed out after {:.1}s", self.timeout.as_secs_f64()),
            }),
        };
        let duration_ms = timer.finish();

        match &result {
            Ok(_) => {
                tracing::debug!(
                    project = %self.run.project,
                    run_id = %self.run.run_id,
                    %stage,
                    duration_ms,
                    "Stage completed"
                );
                self.sink.try_emit(
                    types::STAGE_COMPLETED,
                    Some(json!({
                        "run_id": self.run.run_id.to_string(),
                        "stage": stage,
                        "duration_ms": duration_ms,
                    })),
                );
            }
            Err(err) => {
                tracing::debug!(
                    project = %self.run.project,
                    run_id = %self.run.run_id,
                    %stage,
                    duration_ms,
                    error = %err,
                    "Stage failed"
                );
                self.sink.try_emit(
                    types::STAGE_FAILED,
                    Some(json!({
                        "run_id": self.run.run_id.to_string(),
                        "stage": stage,
                        "duration_ms": duration_ms,
                        "error": err.to_dict(),
                    })),
                );
            }
        }
        result
    }

    /// Runs a collaborator call as a stage.
    pub(crate) async fn call<T, F>(&mut self, stage: Stage, fut: F) -> Result<T, PipelineError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        self.stage(stage, async move {
            fut.await.map_err(|err| PipelineError::from_service(stage, err))
        })
        .await
    }

    /// Marks the run successful.
    pub(crate) fn complete(mut self, detail: serde_json::Value) -> PipelineRun {
        self.run.outcome = RunOutcome::Success;
        let elapsed_ms = self.run.elapsed_ms();
        tracing::info!(
            project = %self.run.project,
            run_id = %self.run.run_id,
            kind = %self.run.kind,
            elapsed_ms,
            "Pipeline run completed"
        );
        let mut data = self.run.event_data();
        if let (Some(map), serde_json::Value::Object(extra)) = (data.as_object_mut(), detail) {
            map.extend(extra);
        }
        self.sink.try_emit(types::PIPELINE_COMPLETED, Some(data));
        self.run
    }

    /// Marks the run failed.
    pub(crate) fn fail(mut self, err: &PipelineError) -> PipelineRun {
        self.run.outcome = RunOutcome::Failure;
        tracing::error!(
            project = %self.run.project,
            run_id = %self.run.run_id,
            kind = %self.run.kind,
            stage = ?self.run.current_stage,
            code = err.code(),
            error = %err,
            "Pipeline run failed"
        );
        let mut data = self.run.event_data();
        if let Some(map) = data.as_object_mut() {
            map.insert("error".to_string(), json!(err.to_dict()));
        }
        self.sink.try_emit(types::PIPELINE_FAILED, Some(data));
        self.run
    }
}

/// Writes `files` and fails unless every one was persisted.
pub(crate) async fn write_all(
    writer: &dyn WriteService,
    files: &[FileArtifact],
    base_directory: Option<PathBuf>,
) -> Result<usize, PipelineError> {
    let outcome = writer
        .write_files(files, base_directory)
        .await
        .map_err(|err| PipelineError::from_service(Stage::WriteFiles, err))?;
    match outcome {
        WriteOutcome::Ack { written } if written == files.len() => Ok(written),
        WriteOutcome::Ack { written } => {
            tracing::warn!(
                acknowledged = written,
                requested = files.len(),
                "Write acknowledgement does not cover every file"
            );
            Err(partial_write(files.iter().map(|file| file.path.clone()).collect()))
        }
        WriteOutcome::Partial { failed, .. } if !failed.is_empty() => Err(partial_write(failed)),
        WriteOutcome::Partial { written, .. } => {
            let missing: Vec<String> = files
                .iter()
                .filter(|file| !written.contains(&file.path))
                .map(|file| file.path.clone())
                .collect();
            if missing.is_empty() {
                // Reported partial but names nothing missing; none can be trusted.
                Err(partial_write(files.iter().map(|file| file.path.clone()).collect()))
            } else {
                Err(partial_write(missing))
            }
        }
    }
}

fn partial_write(failed: Vec<String>) -> PipelineError {
    PipelineError::PartialWriteFailure {
        stage: Stage::WriteFiles,
        failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::parsing::ParseError;
    use crate::ports::MockWriteService;
    use crate::testing::RecordingWriteService;

    fn runner(sink: Arc<CollectingEventSink>, timeout: Duration) -> StageRunner {
        let run = PipelineRun::new(Uuid::new_v4(), "42", RunKind::Generate);
        StageRunner::new(run, sink, timeout)
    }

    #[tokio::test]
    async fn test_stage_success_emits_events() {
        let sink = Arc::new(CollectingEventSink::new());
        let mut runner = runner(Arc::clone(&sink), Duration::from_secs(1));

        let value = runner.stage(Stage::Parse, async { Ok::<_, PipelineError>(7) }).await.unwrap();

        assert_eq!(value, 7);
        assert_eq!(runner.run().current_stage(), Some(Stage::Parse));
        assert_eq!(sink.event_types(), vec![types::STAGE_STARTED, types::STAGE_COMPLETED]);
    }

    #[tokio::test]
    async fn test_call_maps_service_error_to_stage() {
        let sink = Arc::new(CollectingEventSink::new());
        let mut runner = runner(Arc::clone(&sink), Duration::from_secs(1));

        let err = runner
            .call(Stage::Package, async { Err::<(), _>(ServiceError::rejected(503, "busy")) })
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::UpstreamFailure { stage: Stage::Package, .. }));
        assert_eq!(sink.count_of(types::STAGE_FAILED), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_timeout_is_upstream_failure() {
        let sink = Arc::new(CollectingEventSink::new());
        let mut runner = runner(sink, Duration::from_millis(50));

        let err = runner
            .call(Stage::BuildDeploy, async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, ServiceError>("https://late.example".to_string())
            })
            .await
            .unwrap_err();

        match err {
            PipelineError::UpstreamFailure { stage, message } => {
                assert_eq!(stage, Stage::BuildDeploy);
                assert!(message.contains("timed out"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_complete_and_fail_set_outcome() {
        let sink = Arc::new(CollectingEventSink::new());
        let run = runner(Arc::clone(&sink), Duration::from_secs(1)).complete(json!({"files": 2}));
        assert_eq!(run.outcome(), RunOutcome::Success);

        let err = PipelineError::parse(Stage::Parse, ParseError::NoPayload);
        let run = runner(Arc::clone(&sink), Duration::from_secs(1)).fail(&err);
        assert_eq!(run.outcome(), RunOutcome::Failure);

        let completed = sink.events_of_type(types::PIPELINE_COMPLETED);
        assert_eq!(completed[0].1.as_ref().unwrap()["files"], 2);
        assert_eq!(sink.count_of(types::PIPELINE_FAILED), 1);
    }

    #[tokio::test]
    async fn test_write_all_partial_is_failure() {
        let writer = RecordingWriteService::new();
        let files = vec![FileArtifact::new("a.js", "a"), FileArtifact::new("b.js", "b")];
        assert_eq!(write_all(&writer, &files, None).await.unwrap(), 2);

        writer.fail_paths(&["b.js"]);
        let err = write_all(&writer, &files, None).await.unwrap_err();
        match err {
            PipelineError::PartialWriteFailure { stage, failed } => {
                assert_eq!(stage, Stage::WriteFiles);
                assert_eq!(failed, vec!["b.js".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    fn writer_returning(outcome: WriteOutcome) -> MockWriteService {
        let mut writer = MockWriteService::new();
        writer
            .expect_write_files()
            .times(1)
            .returning(move |_, _| Ok(outcome.clone()));
        writer
    }

    fn failed_paths(err: PipelineError) -> Vec<String> {
        match err {
            PipelineError::PartialWriteFailure { stage, failed } => {
                assert_eq!(stage, Stage::WriteFiles);
                failed
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_write_all_partial_without_failed_list_is_failure() {
        let files = vec![FileArtifact::new("index.html", "a"), FileArtifact::new("src/App.jsx", "b")];
        let writer = writer_returning(WriteOutcome::Partial {
            written: vec!["index.html".to_string()],
            failed: Vec::new(),
        });

        let err = write_all(&writer, &files, None).await.unwrap_err();
        assert_eq!(failed_paths(err), vec!["src/App.jsx".to_string()]);
    }

    #[tokio::test]
    async fn test_write_all_partial_naming_nothing_missing_is_failure() {
        let files = vec![FileArtifact::new("index.html", "a")];
        let writer = writer_returning(WriteOutcome::Partial {
            written: vec!["index.html".to_string()],
            failed: Vec::new(),
        });

        let err = write_all(&writer, &files, None).await.unwrap_err();
        assert_eq!(failed_paths(err), vec!["index.html".to_string()]);
    }

    #[tokio::test]
    async fn test_write_all_short_ack_is_failure() {
        let files = vec![FileArtifact::new("index.html", "a"), FileArtifact::new("src/App.jsx", "b")];
        let writer = writer_returning(WriteOutcome::Ack { written: 1 });

        let err = write_all(&writer, &files, None).await.unwrap_err();
        assert_eq!(failed_paths(err).len(), 2);
    }
}
