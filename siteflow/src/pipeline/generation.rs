//! The "create project" pipeline.
//!
//! A run either returns the deployment already recorded for the project or
//! walks generate, parse, persist structure, write, package, build/deploy and
//! record, in that order. The first failing stage ends the run.

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::context::StructureContext;
use super::run::{write_all, PipelineRun, StageRunner};
use crate::config::{OrchestratorConfig, RecordingPolicy};
use crate::core::{ProjectId, ProjectPatch, ProjectStatus, ProjectStructure, Stage};
use crate::errors::PipelineError;
use crate::events::{types, EventSink};
use crate::parsing::parse_generation_output;
use crate::ports::StagePorts;

/// Input of a generation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Project the result is recorded against, if bound to one.
    pub project_id: Option<ProjectId>,
    /// What to build.
    pub prompt: String,
}

impl GenerationRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(project_id: Option<ProjectId>, prompt: impl Into<String>) -> Self {
        Self {
            project_id,
            prompt: prompt.into(),
        }
    }
}

/// How a generation run begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationEntry {
    /// The project already has a deployment; nothing else runs.
    AlreadyDeployed {
        /// The project.
        project_id: ProjectId,
        /// Its recorded deployment URL.
        url: String,
    },
    /// Run every stage.
    Fresh {
        /// The project to record against, if any.
        project_id: Option<ProjectId>,
    },
}

/// What happened to the deployment write-back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordingStatus {
    /// The store now holds the new URL with status `ready`.
    Recorded,
    /// The URL came from the store; nothing was written.
    AlreadyRecorded,
    /// The run is not bound to a project.
    Unbound,
    /// Writing failed; the preview URL is still valid.
    Failed {
        /// Failure detail.
        message: String,
    },
}

/// Result of a successful generation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationReport {
    /// Run that produced the report.
    pub run_id: Uuid,
    /// Live preview URL.
    pub preview_url: String,
    /// Structure parsed from the generation output. `None` on short-circuit.
    pub structure: Option<ProjectStructure>,
    /// Paths written, in order.
    pub files_written: Vec<String>,
    /// Deployment write-back result.
    pub recording: RecordingStatus,
}

impl GenerationReport {
    /// Returns true if the URL was the store's recorded deployment.
    #[must_use]
    pub fn short_circuited(&self) -> bool {
        self.recording == RecordingStatus::AlreadyRecorded
    }
}

/// Runs generation against a set of ports.
#[derive(Clone)]
pub struct GenerationPipeline {
    ports: StagePorts,
    sink: Arc<dyn EventSink>,
    stage_timeout: Duration,
    recording_policy: RecordingPolicy,
}

impl std::fmt::Debug for GenerationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationPipeline")
            .field("stage_timeout", &self.stage_timeout)
            .field("recording_policy", &self.recording_policy)
            .finish_non_exhaustive()
    }
}

impl GenerationPipeline {
    /// Creates a pipeline.
    #[must_use]
    pub fn new(ports: StagePorts, sink: Arc<dyn EventSink>, config: &OrchestratorConfig) -> Self {
        Self {
            ports,
            sink,
            stage_timeout: config.stage_timeout(),
            recording_policy: config.recording_policy,
        }
    }

    /// Executes one run.
    ///
    /// `context` receives the parsed structure during the persist-structure
    /// stage.
    pub async fn run(
        &self,
        run: PipelineRun,
        request: GenerationRequest,
        context: &StructureContext,
    ) -> Result<GenerationReport, PipelineError> {
        let mut runner = StageRunner::new(run, Arc::clone(&self.sink), self.stage_timeout);
        runner.start();

        match self.execute(&mut runner, request, context).await {
            Ok(report) => {
                runner.complete(json!({
                    "preview_url": report.preview_url,
                    "files": report.files_written.len(),
                    "short_circuited": report.short_circuited(),
                }));
                Ok(report)
            }
            Err(err) => {
                runner.fail(&err);
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        runner: &mut StageRunner,
        request: GenerationRequest,
        context: &StructureContext,
    ) -> Result<GenerationReport, PipelineError> {
        match self.entry(runner, request.project_id).await? {
            GenerationEntry::AlreadyDeployed { project_id, url } => {
                tracing::info!(
                    project = %project_id,
                    run_id = %runner.run().run_id,
                    preview_url = %url,
                    "Project already deployed, returning recorded URL"
                );
                runner.sink().try_emit(
                    types::PIPELINE_SHORT_CIRCUITED,
                    Some(json!({"project": project_id, "preview_url": url})),
                );
                Ok(GenerationReport {
                    run_id: runner.run().run_id,
                    preview_url: url,
                    structure: None,
                    files_written: Vec::new(),
                    recording: RecordingStatus::AlreadyRecorded,
                })
            }
            GenerationEntry::Fresh { project_id } => {
                if let Some(ref id) = project_id {
                    self.patch_status(runner, id, ProjectStatus::Building).await;
                }
                let result = self
                    .generate_and_deploy(runner, project_id.as_ref(), &request.prompt, context)
                    .await;
                if let (Err(_), Some(id)) = (&result, &project_id) {
                    self.patch_status(runner, id, ProjectStatus::Error).await;
                }
                result
            }
        }
    }

    async fn entry(
        &self,
        runner: &mut StageRunner,
        project_id: Option<ProjectId>,
    ) -> Result<GenerationEntry, PipelineError> {
        let Some(project_id) = project_id else {
            return Ok(GenerationEntry::Fresh { project_id: None });
        };
        let project = runner
            .call(Stage::LoadProject, self.ports.project_store.get(&project_id))
            .await?;
        Ok(match project.recorded_deployment() {
            Some(url) => GenerationEntry::AlreadyDeployed {
                project_id,
                url: url.to_string(),
            },
            None => GenerationEntry::Fresh {
                project_id: Some(project_id),
            },
        })
    }

    async fn generate_and_deploy(
        &self,
        runner: &mut StageRunner,
        project_id: Option<&ProjectId>,
        prompt: &str,
        context: &StructureContext,
    ) -> Result<GenerationReport, PipelineError> {
        let raw = runner
            .call(Stage::Generate, self.ports.generation.generate(prompt))
            .await?;

        let artifacts = runner
            .stage(Stage::Parse, async {
                parse_generation_output(&raw).map_err(|e| PipelineError::parse(Stage::Parse, e))
            })
            .await?;
        let (structure, files) = artifacts.into_parts();

        runner
            .stage(Stage::PersistStructure, async {
                context.replace(structure.clone());
                Ok(())
            })
            .await?;

        runner
            .stage(Stage::WriteFiles, write_all(self.ports.writer.as_ref(), &files, None))
            .await?;

        let archive = runner
            .call(Stage::Package, self.ports.packaging.package_current_tree())
            .await?;

        let preview_url = runner
            .call(Stage::BuildDeploy, self.ports.build.build_and_deploy(&archive))
            .await?;

        let recording = match project_id {
            Some(id) => self.record(runner, id, &preview_url).await?,
            None => RecordingStatus::Unbound,
        };

        Ok(GenerationReport {
            run_id: runner.run().run_id,
            preview_url,
            structure: Some(structure),
            files_written: files.into_iter().map(|f| f.path).collect(),
            recording,
        })
    }

    async fn record(
        &self,
        runner: &mut StageRunner,
        project_id: &ProjectId,
        preview_url: &str,
    ) -> Result<RecordingStatus, PipelineError> {
        let patch = ProjectPatch::deployed(preview_url);
        match runner
            .call(Stage::Record, self.ports.project_store.update(project_id, patch))
            .await
        {
            Ok(_) => Ok(RecordingStatus::Recorded),
            Err(err) => {
                let message = err.to_string();
                match self.recording_policy {
                    RecordingPolicy::Strict => Err(PipelineError::RecordingFailure { message }),
                    RecordingPolicy::Lenient => {
                        tracing::warn!(
                            project = %project_id,
                            run_id = %runner.run().run_id,
                            preview_url,
                            error = %message,
                            "Deployment succeeded but could not be recorded"
                        );
                        runner.sink().try_emit(
                            types::RECORDING_FAILED,
                            Some(json!({
                                "project": project_id,
                                "preview_url": preview_url,
                                "error": message,
                            })),
                        );
                        Ok(RecordingStatus::Failed { message })
                    }
                }
            }
        }
    }

    /// Best-effort status bookkeeping. Never fails the run.
    async fn patch_status(&self, runner: &StageRunner, project_id: &ProjectId, status: ProjectStatus) {
        let update = self
            .ports
            .project_store
            .update(project_id, ProjectPatch::status(status));
        let error = match tokio::time::timeout(self.stage_timeout, update).await {
            Ok(Ok(_)) => return,
            Ok(Err(err)) => err.to_string(),
            Err(_) => "timed out".to_string(),
        };
        tracing::warn!(
            project = %project_id,
            run_id = %runner.run().run_id,
            %status,
            error = %error,
            "Failed to update project status"
        );
        runner.sink().try_emit(
            types::RECORDING_FAILED,
            Some(json!({"project": project_id, "status": status, "error": error})),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Project, RunKind};
    use crate::errors::ServiceError;
    use crate::events::CollectingEventSink;
    use crate::ports::{MockBuildService, MockGenerationService, MockPackagingService, MockWriteService};
    use crate::testing::{
        assert_event_count, assert_failed_at, assert_stages_started, fixtures, store_with,
        InMemoryProjectStore, TestServices,
    };
    use pretty_assertions::assert_eq;

    fn pipeline(
        services: &TestServices,
        sink: &Arc<CollectingEventSink>,
        config: &OrchestratorConfig,
    ) -> GenerationPipeline {
        GenerationPipeline::new(services.ports(), sink.clone(), config)
    }

    fn new_run(project: &str) -> PipelineRun {
        PipelineRun::new(Uuid::new_v4(), project, RunKind::Generate)
    }

    #[tokio::test]
    async fn test_fresh_run_executes_every_stage_in_order() {
        let services = TestServices::with_store(store_with("42", ProjectStatus::Pending, None));
        services.build.set_url("https://preview.example/42");
        let sink = Arc::new(CollectingEventSink::new());
        let context = StructureContext::new();

        let report = pipeline(&services, &sink, &OrchestratorConfig::default())
            .run(
                new_run("42"),
                GenerationRequest::new(Some(ProjectId::new("42")), "todo app"),
                &context,
            )
            .await
            .unwrap();

        assert_eq!(report.preview_url, "https://preview.example/42");
        assert_eq!(report.files_written, vec!["index.html", "src/App.jsx"]);
        assert_eq!(report.recording, RecordingStatus::Recorded);
        assert!(context.is_set());
        assert_stages_started(&sink, &Stage::GENERATION);

        let project = services.store.project("42").unwrap();
        assert_eq!(project.status, ProjectStatus::Ready);
        assert_eq!(project.deployment_url.as_deref(), Some("https://preview.example/42"));

        let statuses: Vec<_> = services.store.updates().into_iter().map(|(_, p)| p.status).collect();
        assert_eq!(statuses, vec![Some(ProjectStatus::Building), Some(ProjectStatus::Ready)]);
    }

    #[tokio::test]
    async fn test_recorded_deployment_short_circuits() {
        let store = store_with("42", ProjectStatus::Ready, Some("https://preview.example/42"));
        let services = TestServices::with_store(store);
        let sink = Arc::new(CollectingEventSink::new());

        let report = pipeline(&services, &sink, &OrchestratorConfig::default())
            .run(
                new_run("42"),
                GenerationRequest::new(Some(ProjectId::new("42")), "todo app"),
                &StructureContext::new(),
            )
            .await
            .unwrap();

        assert!(report.short_circuited());
        assert_eq!(report.preview_url, "https://preview.example/42");
        assert_eq!(services.pipeline_call_count(), 0);
        assert!(services.store.updates().is_empty());
        assert_event_count(&sink, types::PIPELINE_SHORT_CIRCUITED, 1);
    }

    #[tokio::test]
    async fn test_short_circuit_never_calls_mocked_stages() {
        let store = store_with("42", ProjectStatus::Error, Some("https://preview.example/42"));
        let mut generation = MockGenerationService::new();
        generation.expect_generate().times(0);
        let mut writer = MockWriteService::new();
        writer.expect_write_files().times(0);
        let mut packaging = MockPackagingService::new();
        packaging.expect_package_current_tree().times(0);
        let mut build = MockBuildService::new();
        build.expect_build_and_deploy().times(0);

        let ports = StagePorts::new(
            Arc::new(store),
            Arc::new(generation),
            Arc::new(crate::testing::StaticFileSelection::new()),
            Arc::new(writer),
            Arc::new(packaging),
            Arc::new(build),
        );
        let pipeline = GenerationPipeline::new(
            ports,
            Arc::new(CollectingEventSink::new()),
            &OrchestratorConfig::default(),
        );

        let report = pipeline
            .run(
                new_run("42"),
                GenerationRequest::new(Some(ProjectId::new("42")), "anything"),
                &StructureContext::new(),
            )
            .await
            .unwrap();
        assert!(report.short_circuited());
    }

    #[tokio::test]
    async fn test_unknown_project_is_not_found() {
        let services = TestServices::new();
        let sink = Arc::new(CollectingEventSink::new());

        let err = pipeline(&services, &sink, &OrchestratorConfig::default())
            .run(
                new_run("404"),
                GenerationRequest::new(Some(ProjectId::new("404")), "todo app"),
                &StructureContext::new(),
            )
            .await
            .unwrap_err();

        assert_failed_at(&err, "NOT_FOUND", Stage::LoadProject);
        assert_eq!(services.generation.generate_count(), 0);
    }

    #[tokio::test]
    async fn test_unbound_run_skips_store() {
        let services = TestServices::new();
        let sink = Arc::new(CollectingEventSink::new());

        let report = pipeline(&services, &sink, &OrchestratorConfig::default())
            .run(new_run("session"), GenerationRequest::new(None, "todo app"), &StructureContext::new())
            .await
            .unwrap();

        assert_eq!(report.recording, RecordingStatus::Unbound);
        assert_eq!(services.store.get_count(), 0);
        assert_eq!(services.writer.writes()[0].1, None);
    }

    #[tokio::test]
    async fn test_missing_structure_fails_parse_without_writes() {
        let services = TestServices::with_store(store_with("42", ProjectStatus::Pending, None));
        services.generation.set_generate(Ok(fixtures::fenced(&serde_json::json!({
            "files": [{"path": "index.html", "content": "<html></html>"}]
        }))));
        let sink = Arc::new(CollectingEventSink::new());
        let context = StructureContext::new();

        let err = pipeline(&services, &sink, &OrchestratorConfig::default())
            .run(
                new_run("42"),
                GenerationRequest::new(Some(ProjectId::new("42")), "todo app"),
                &context,
            )
            .await
            .unwrap_err();

        assert_failed_at(&err, "PARSE_FAILURE", Stage::Parse);
        assert!(!context.is_set());
        assert_eq!(services.writer.write_count(), 0);
        assert_eq!(services.store.project("42").unwrap().status, ProjectStatus::Error);
    }

    #[tokio::test]
    async fn test_partial_write_stops_before_build() {
        let services = TestServices::with_store(store_with("42", ProjectStatus::Pending, None));
        services.writer.fail_paths(&["src/App.jsx"]);
        let sink = Arc::new(CollectingEventSink::new());

        let err = pipeline(&services, &sink, &OrchestratorConfig::default())
            .run(
                new_run("42"),
                GenerationRequest::new(Some(ProjectId::new("42")), "todo app"),
                &StructureContext::new(),
            )
            .await
            .unwrap_err();

        assert_failed_at(&err, "PARTIAL_WRITE_FAILURE", Stage::WriteFiles);
        assert_eq!(services.packaging.call_count(), 0);
        assert_eq!(services.build.call_count(), 0);
        let project = services.store.project("42").unwrap();
        assert_eq!(project.status, ProjectStatus::Error);
        assert_eq!(project.deployment_url, None);
    }

    #[tokio::test]
    async fn test_build_failure_names_stage() {
        let services = TestServices::new();
        services.build.fail_with(ServiceError::rejected(500, "compile error"));
        let sink = Arc::new(CollectingEventSink::new());

        let err = pipeline(&services, &sink, &OrchestratorConfig::default())
            .run(new_run("s"), GenerationRequest::new(None, "todo app"), &StructureContext::new())
            .await
            .unwrap_err();

        assert_failed_at(&err, "UPSTREAM_FAILURE", Stage::BuildDeploy);
        assert_event_count(&sink, types::PIPELINE_FAILED, 1);
    }

    #[tokio::test]
    async fn test_lenient_recording_failure_still_succeeds() {
        let store = store_with("42", ProjectStatus::Pending, None);
        store.fail_recording(ServiceError::transport("connection reset"));
        let services = TestServices::with_store(store);
        services.build.set_url("https://preview.example/42");
        let sink = Arc::new(CollectingEventSink::new());

        let report = pipeline(&services, &sink, &OrchestratorConfig::default())
            .run(
                new_run("42"),
                GenerationRequest::new(Some(ProjectId::new("42")), "todo app"),
                &StructureContext::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.preview_url, "https://preview.example/42");
        assert!(matches!(report.recording, RecordingStatus::Failed { .. }));
        assert_event_count(&sink, types::RECORDING_FAILED, 1);
        assert_event_count(&sink, types::PIPELINE_COMPLETED, 1);
    }

    #[tokio::test]
    async fn test_strict_recording_failure_fails_run() {
        let store = store_with("42", ProjectStatus::Pending, None);
        store.fail_recording(ServiceError::transport("connection reset"));
        let services = TestServices::with_store(store);
        let sink = Arc::new(CollectingEventSink::new());
        let config = OrchestratorConfig::default().with_recording_policy(RecordingPolicy::Strict);

        let err = pipeline(&services, &sink, &config)
            .run(
                new_run("42"),
                GenerationRequest::new(Some(ProjectId::new("42")), "todo app"),
                &StructureContext::new(),
            )
            .await
            .unwrap_err();

        assert_failed_at(&err, "RECORDING_FAILURE", Stage::Record);
        assert_eq!(services.store.project("42").unwrap().status, ProjectStatus::Error);
    }

    #[tokio::test]
    async fn test_status_bookkeeping_failure_is_side_channel_only() {
        let store = InMemoryProjectStore::with_project(Project::new("42"));
        store.fail_updates(ServiceError::transport("store down"));
        let services = TestServices::with_store(store);
        let sink = Arc::new(CollectingEventSink::new());

        let report = pipeline(&services, &sink, &OrchestratorConfig::default())
            .run(
                new_run("42"),
                GenerationRequest::new(Some(ProjectId::new("42")), "todo app"),
                &StructureContext::new(),
            )
            .await
            .unwrap();

        assert!(matches!(report.recording, RecordingStatus::Failed { .. }));
        // building patch plus the deployment write-back
        assert_event_count(&sink, types::RECORDING_FAILED, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_generation_times_out() {
        let services = TestServices::new();
        services.generation.set_delay(Duration::from_secs(600));
        let sink = Arc::new(CollectingEventSink::new());
        let config = OrchestratorConfig::default().with_stage_timeout(5.0);

        let err = pipeline(&services, &sink, &config)
            .run(new_run("s"), GenerationRequest::new(None, "todo app"), &StructureContext::new())
            .await
            .unwrap_err();

        assert_failed_at(&err, "UPSTREAM_FAILURE", Stage::Generate);
        assert_eq!(services.writer.write_count(), 0);
    }
}
