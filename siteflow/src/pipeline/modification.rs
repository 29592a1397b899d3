//! The "apply a change" pipeline.
//!
//! Analyze the requirement, resolve the live contents of the files it
//! touches, rewrite them, and write the result into the project's working
//! directory. The project record is never touched and nothing is redeployed.

use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::run::{write_all, PipelineRun, StageRunner};
use crate::config::OrchestratorConfig;
use crate::core::{ChangeAnalysis, ChangeRequest, FileArtifact, ProjectId, Stage};
use crate::errors::PipelineError;
use crate::events::EventSink;
use crate::parsing::{parse_change_analysis, parse_change_set, scope_change_set};
use crate::ports::StagePorts;

/// Result of a successful modification run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeReport {
    /// Run that produced the report.
    pub run_id: Uuid,
    /// Human-readable summary of what changed.
    pub summary: String,
    /// Every path written, in order.
    pub files: Vec<String>,
    /// Paths that did not exist before.
    pub created: Vec<String>,
    /// Notes from the analysis stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl ChangeReport {
    fn new(run_id: Uuid, files: Vec<String>, analysis: &ChangeAnalysis) -> Self {
        let created: Vec<String> = files
            .iter()
            .filter(|path| !analysis.modify.contains(path))
            .cloned()
            .collect();
        let modified = files.len() - created.len();

        let mut summary = format!("Applied the requested change to {} file(s)", files.len());
        if modified > 0 {
            summary.push_str(&format!("; updated {modified}"));
        }
        if !created.is_empty() {
            summary.push_str(&format!("; created {}", created.join(", ")));
        }
        summary.push_str(&format!(": {}.", files.join(", ")));

        Self {
            run_id,
            summary,
            files,
            created,
            notes: analysis.notes.clone(),
        }
    }
}

/// Runs modifications against a set of ports.
#[derive(Clone)]
pub struct ModificationPipeline {
    ports: StagePorts,
    sink: Arc<dyn EventSink>,
    stage_timeout: Duration,
    config: OrchestratorConfig,
}

impl std::fmt::Debug for ModificationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModificationPipeline")
            .field("stage_timeout", &self.stage_timeout)
            .field("workspace_root", &self.config.workspace_root)
            .finish_non_exhaustive()
    }
}

impl ModificationPipeline {
    /// Creates a pipeline.
    #[must_use]
    pub fn new(ports: StagePorts, sink: Arc<dyn EventSink>, config: &OrchestratorConfig) -> Self {
        Self {
            ports,
            sink,
            stage_timeout: config.stage_timeout(),
            config: config.clone(),
        }
    }

    /// Executes one run.
    pub async fn run(
        &self,
        run: PipelineRun,
        project_id: &ProjectId,
        request: &ChangeRequest,
    ) -> Result<ChangeReport, PipelineError> {
        let mut runner = StageRunner::new(run, Arc::clone(&self.sink), self.stage_timeout);
        runner.start();

        let working_directory = self.config.working_directory(project_id);
        match self.execute(&mut runner, &working_directory, request).await {
            Ok(report) => {
                runner.complete(json!({
                    "files": report.files,
                    "created": report.created,
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
        working_directory: &Path,
        request: &ChangeRequest,
    ) -> Result<ChangeReport, PipelineError> {
        let analysis_prompt = request.analysis_prompt();
        let analysis = runner
            .stage(Stage::Analyze, async {
                let raw = self
                    .ports
                    .generation
                    .analyze_change(&analysis_prompt)
                    .await
                    .map_err(|e| PipelineError::from_service(Stage::Analyze, e))?;
                parse_change_analysis(&raw).map_err(|e| PipelineError::parse(Stage::Analyze, e))
            })
            .await?;

        let resolved = runner
            .stage(
                Stage::ResolveFiles,
                self.resolve(&analysis.modify, working_directory),
            )
            .await?;

        let rewrite_prompt = request.rewrite_prompt(&analysis);
        let change_set = runner
            .stage(Stage::Rewrite, async {
                let raw = self
                    .ports
                    .generation
                    .rewrite_files(&resolved, &rewrite_prompt)
                    .await
                    .map_err(|e| PipelineError::from_service(Stage::Rewrite, e))?;
                parse_change_set(&raw)
                    .and_then(|set| scope_change_set(set, &analysis))
                    .map_err(|e| PipelineError::parse(Stage::Rewrite, e))
            })
            .await?;

        runner
            .stage(
                Stage::WriteFiles,
                write_all(
                    self.ports.writer.as_ref(),
                    change_set.files(),
                    Some(PathBuf::from(working_directory)),
                ),
            )
            .await?;

        let files = change_set.into_files().into_iter().map(|f| f.path).collect();
        Ok(ChangeReport::new(runner.run().run_id, files, &analysis))
    }

    /// Fetches every path in `paths`, in that order.
    ///
    /// A path the service does not return is `NotFound`; anything extra it
    /// returns is dropped.
    async fn resolve(
        &self,
        paths: &[String],
        working_directory: &Path,
    ) -> Result<Vec<FileArtifact>, PipelineError> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let returned = self
            .ports
            .file_selection
            .resolve_files(paths, working_directory)
            .await
            .map_err(|e| PipelineError::from_service(Stage::ResolveFiles, e))?;

        let mut by_path: HashMap<String, FileArtifact> = returned
            .into_iter()
            .map(|f| (f.path.trim().trim_start_matches("./").to_string(), f))
            .collect();

        paths
            .iter()
            .map(|path| {
                by_path.remove(path).ok_or_else(|| PipelineError::NotFound {
                    resource: format!("file '{path}'"),
                    stage: Some(Stage::ResolveFiles),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ProjectStructure, RunKind};
    use crate::errors::ServiceError;
    use crate::events::CollectingEventSink;
    use crate::parsing::ParseError;
    use crate::testing::{assert_failed_at, assert_stages_started, fixtures, StaticFileSelection, TestServices};
    use pretty_assertions::assert_eq;

    fn services() -> TestServices {
        TestServices::new().with_files(
            StaticFileSelection::new()
                .with_file("src/App.jsx", "export default function App() {}")
                .with_file("src/styles.css", "body {}"),
        )
    }

    fn request(requirement: &str) -> ChangeRequest {
        ChangeRequest::new(
            requirement,
            ProjectStructure::new(json!({"files": ["src/App.jsx", "src/styles.css"]})),
        )
    }

    async fn run(
        services: &TestServices,
        sink: &Arc<CollectingEventSink>,
        requirement: &str,
    ) -> Result<ChangeReport, PipelineError> {
        let config = OrchestratorConfig::default().with_workspace_root("/srv/sites");
        ModificationPipeline::new(services.ports(), sink.clone(), &config)
            .run(
                PipelineRun::new(Uuid::new_v4(), "42", RunKind::Modify),
                &ProjectId::new("42"),
                &request(requirement),
            )
            .await
    }

    #[tokio::test]
    async fn test_change_runs_every_stage() {
        let services = services();
        services.generation.set_analysis(Ok(fixtures::analysis_output(
            &["src/App.jsx"],
            &["src/ThemeToggle.jsx"],
        )));
        services.generation.set_rewrite(Ok(fixtures::rewrite_output(&[
            ("src/App.jsx", "import ThemeToggle from './ThemeToggle';"),
            ("src/ThemeToggle.jsx", "export default function ThemeToggle() {}"),
        ])));
        let sink = Arc::new(CollectingEventSink::new());

        let report = run(&services, &sink, "Add a dark mode toggle").await.unwrap();

        assert_eq!(report.files, vec!["src/App.jsx", "src/ThemeToggle.jsx"]);
        assert_eq!(report.created, vec!["src/ThemeToggle.jsx"]);
        assert!(report.summary.contains("2 file(s)"));
        assert!(report.summary.contains("created src/ThemeToggle.jsx"));
        assert_stages_started(&sink, &Stage::MODIFICATION);

        let writes = services.writer.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1, Some(PathBuf::from("/srv/sites/42")));
        assert_eq!(
            services.files.requests(),
            vec![(vec!["src/App.jsx".to_string()], PathBuf::from("/srv/sites/42"))]
        );
        assert!(services.generation.prompts()[0].contains("Add a dark mode toggle"));
    }

    #[tokio::test]
    async fn test_empty_analysis_is_parse_failure() {
        let services = services();
        services.generation.set_analysis(Ok(fixtures::analysis_output(&[], &[])));
        let sink = Arc::new(CollectingEventSink::new());

        let err = run(&services, &sink, "do nothing").await.unwrap_err();

        assert_failed_at(&err, "PARSE_FAILURE", Stage::Analyze);
        assert!(matches!(
            err,
            PipelineError::ParseFailure { source: ParseError::NoFilesSelected, .. }
        ));
        assert_eq!(services.generation.rewrite_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let services = services();
        services
            .generation
            .set_analysis(Ok(fixtures::analysis_output(&["src/App.jsx", "src/Missing.jsx"], &[])));
        let sink = Arc::new(CollectingEventSink::new());

        let err = run(&services, &sink, "touch two files").await.unwrap_err();

        assert_failed_at(&err, "NOT_FOUND", Stage::ResolveFiles);
        assert!(err.to_string().contains("src/Missing.jsx"));
        assert_eq!(services.generation.rewrite_count(), 0);
    }

    #[tokio::test]
    async fn test_extra_resolved_files_are_dropped() {
        let services = services();
        services.files.set_return_all(true);
        let sink = Arc::new(CollectingEventSink::new());
        let pipeline = ModificationPipeline::new(
            services.ports(),
            sink.clone(),
            &OrchestratorConfig::default(),
        );

        let resolved = pipeline
            .resolve(&["src/App.jsx".to_string()], Path::new("/w"))
            .await
            .unwrap();

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].path, "src/App.jsx");
    }

    #[tokio::test]
    async fn test_malformed_rewrite_item_writes_nothing() {
        let services = services();
        services.generation.set_rewrite(Ok(fixtures::fenced(&json!([
            {"path": "src/App.jsx", "content": "ok"},
            {"path": "src/styles.css"}
        ]))));
        let sink = Arc::new(CollectingEventSink::new());

        let err = run(&services, &sink, "dark mode").await.unwrap_err();

        assert_failed_at(&err, "PARSE_FAILURE", Stage::Rewrite);
        assert_eq!(services.writer.write_count(), 0);
    }

    #[tokio::test]
    async fn test_rewrite_outside_analysis_writes_nothing() {
        let services = services();
        services.generation.set_rewrite(Ok(fixtures::rewrite_output(&[
            ("src/App.jsx", "export default function App() {}"),
            ("package.json", "{\"name\": \"hijacked\"}"),
        ])));
        let sink = Arc::new(CollectingEventSink::new());

        let err = run(&services, &sink, "dark mode").await.unwrap_err();

        assert_failed_at(&err, "PARSE_FAILURE", Stage::Rewrite);
        assert!(matches!(
            err,
            PipelineError::ParseFailure { source: ParseError::UnexpectedPath(ref path), .. }
                if path == "package.json"
        ));
        assert_eq!(services.writer.write_count(), 0);
    }

    #[tokio::test]
    async fn test_partial_write_reports_failed_paths() {
        let services = services();
        services.writer.fail_paths(&["src/App.jsx"]);
        let sink = Arc::new(CollectingEventSink::new());

        let err = run(&services, &sink, "dark mode").await.unwrap_err();

        assert_failed_at(&err, "PARTIAL_WRITE_FAILURE", Stage::WriteFiles);
    }

    #[tokio::test]
    async fn test_never_touches_project_store() {
        let services = services();
        let sink = Arc::new(CollectingEventSink::new());

        run(&services, &sink, "dark mode").await.unwrap();
        services.generation.set_analysis(Err(ServiceError::transport("down")));
        let _ = run(&services, &sink, "dark mode").await.unwrap_err();

        assert_eq!(services.store.get_count(), 0);
        assert!(services.store.updates().is_empty());
        assert_eq!(services.build.call_count(), 0);
        assert_eq!(services.packaging.call_count(), 0);
    }
}
