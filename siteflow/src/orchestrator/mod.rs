//! The orchestrator and its per-project sessions.
//!
//! An [`Orchestrator`] owns the collaborators, configuration, and the dedup
//! guard shared by every session it creates. A [`ProjectSession`] holds one
//! project's lifecycle state and exposes the commands.

mod session;


pub use session::{
    CommandOutcome, InitRequest, MessageRole, ProjectSession, SessionMessage, SessionStatus,
};

use std::future::Future;
use std::sync::Arc;

use crate::config::OrchestratorConfig;
use crate::core::{NewProject, Project, ProjectId, RunKind, Stage};
use crate::dedup::{fingerprint_request, Admission, DedupGuard};
use crate::errors::{PipelineError, ServiceError};
use crate::events::{EventSink, LoggingEventSink};
use crate::pipeline::{GenerationPipeline, ModificationPipeline};
use crate::ports::StagePorts;
use session::SessionParts;

/// Entry point for driving projects through their pipelines.
#[derive(Clone)]
pub struct Orchestrator {
    ports: StagePorts,
    config: Arc<OrchestratorConfig>,
    guard: DedupGuard,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("active_runs", &self.guard.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator that logs its events.
    #[must_use]
    pub fn new(ports: StagePorts, config: OrchestratorConfig) -> Self {
        Self {
            ports,
            config: Arc::new(config),
            guard: DedupGuard::new(),
            sink: Arc::new(LoggingEventSink::default()),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Shares an existing dedup guard, e.g. across orchestrators in one
    /// process.
    #[must_use]
    pub fn with_guard(mut self, guard: DedupGuard) -> Self {
        self.guard = guard;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Returns the dedup guard.
    #[must_use]
    pub fn guard(&self) -> &DedupGuard {
        &self.guard
    }

    /// Opens a session not yet bound to a project.
    #[must_use]
    pub fn session(&self) -> ProjectSession {
        ProjectSession::new(self.session_parts(), None)
    }

    /// Opens a session bound to `project_id` without fetching anything.
    ///
    /// Use [`ProjectSession::initialize`] to load its status.
    #[must_use]
    pub fn session_for(&self, project_id: impl Into<ProjectId>) -> ProjectSession {
        ProjectSession::new(self.session_parts(), Some(project_id.into()))
    }

    /// Creates a project record and returns a session bound to it.
    pub async fn open_new_project(&self, data: NewProject) -> Result<ProjectSession, PipelineError> {
        let project = self
            .store_call(self.ports.project_store.create(data))
            .await?;
        tracing::info!(project = %project.id, owner = ?project.owner_id, "Project created");
        Ok(self.session_for(project.id))
    }

    /// Lists the projects of an owner.
    pub async fn projects_for_owner(&self, owner_id: &str) -> Result<Vec<Project>, PipelineError> {
        self.store_call(self.ports.project_store.list_by_owner(owner_id))
            .await
    }

    /// Deletes a project. Refused while a run is active for it.
    ///
    /// The project key stays occupied until the store call returns, so no run
    /// can start on a project being deleted.
    pub async fn delete_project(&self, project_id: &ProjectId) -> Result<(), PipelineError> {
        let key = project_id.as_str();
        let fingerprint = fingerprint_request(RunKind::Delete, key, "");
        let _permit = match self.guard.admit(key, RunKind::Delete, fingerprint) {
            Admission::Admitted(permit) => permit,
            Admission::Rejected(rejection) => {
                return Err(PipelineError::DuplicateRunRejected {
                    project: project_id.to_string(),
                    active_kind: rejection.active.kind,
                });
            }
        };
        self.store_call(self.ports.project_store.delete(project_id))
            .await?;
        tracing::info!(project = %project_id, "Project deleted");
        Ok(())
    }

    async fn store_call<T>(
        &self,
        fut: impl Future<Output = Result<T, ServiceError>>,
    ) -> Result<T, PipelineError> {
        match tokio::time::timeout(self.config.stage_timeout(), fut).await {
            Ok(result) => result.map_err(|e| PipelineError::from_service(Stage::LoadProject, e)),
            Err(_) => Err(PipelineError::UpstreamFailure {
                stage: Stage::LoadProject,
                message: "project store timed out".to_string(),
            }),
        }
    }

    fn session_parts(&self) -> SessionParts {
        SessionParts {
            store: Arc::clone(&self.ports.project_store),
            guard: self.guard.clone(),
            sink: Arc::clone(&self.sink),
            stage_timeout: self.config.stage_timeout(),
            generation: GenerationPipeline::new(
                self.ports.clone(),
                Arc::clone(&self.sink),
                &self.config,
            ),
            modification: ModificationPipeline::new(
                self.ports.clone(),
                Arc::clone(&self.sink),
                &self.config,
            ),
        }
    }
}
