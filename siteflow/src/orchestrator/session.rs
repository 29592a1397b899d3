//! Per-project session: lifecycle state, commands, and the message log.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use crate::core::{ChangeRequest, LifecycleState, ProjectId, ProjectStructure, RunKind, Stage};
use crate::dedup::{fingerprint_request, Admission, DedupGuard, RunPermit};
use crate::errors::PipelineError;
use crate::events::{types, EventSink};
use crate::pipeline::{
    ChangeReport, GenerationPipeline, GenerationReport, GenerationRequest, ModificationPipeline,
    PipelineRun, StructureContext,
};
use crate::ports::ProjectStore;

/// Read-only view of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    /// Lifecycle state.
    pub state: LifecycleState,
    /// Project the session is bound to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    /// Preview URL, present only in `ready`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    /// Message for the last failure, present only in `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable code of the last failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

/// How a command started.
#[derive(Debug, Clone)]
pub enum InitRequest {
    /// Open a project that already exists in the store.
    Existing {
        /// The project.
        project_id: ProjectId,
        /// Its structural description, if the caller has one.
        structure: Option<ProjectStructure>,
    },
    /// Generate a new project from a prompt.
    Generate {
        /// What to build.
        prompt: String,
    },
}

/// Result of a command that goes through the dedup guard.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome<T> {
    /// The command ran to completion.
    Completed(T),
    /// The same request is already running; this one was dropped.
    Absorbed,
}

impl<T> CommandOutcome<T> {
    /// Returns true if the command was absorbed.
    #[must_use]
    pub fn is_absorbed(&self) -> bool {
        matches!(self, Self::Absorbed)
    }

    /// Returns the completed value, if any.
    #[must_use]
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Absorbed => None,
        }
    }
}

/// Author of a message log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// A requirement the user submitted.
    User,
    /// A successful outcome.
    Assistant,
    /// A failed outcome.
    Failure,
}

/// One entry of the append-only message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMessage {
    /// Who the entry is from.
    pub role: MessageRole,
    /// Entry text.
    pub text: String,
    /// When it was appended.
    pub at: DateTime<Utc>,
}

pub(crate) struct SessionParts {
    pub(crate) store: Arc<dyn ProjectStore>,
    pub(crate) guard: DedupGuard,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) stage_timeout: Duration,
    pub(crate) generation: GenerationPipeline,
    pub(crate) modification: ModificationPipeline,
}

struct SessionInner {
    session_id: Uuid,
    parts: SessionParts,
    project_id: RwLock<Option<ProjectId>>,
    context: StructureContext,
    status: watch::Sender<SessionStatus>,
    messages: RwLock<Vec<SessionMessage>>,
}

/// A project as seen by one user session.
///
/// Cloning shares the session. Commands that run a pipeline execute on a
/// spawned task: dropping the returned future does not stop the run, skip
/// its state update, or leak its dedup slot.
#[derive(Clone)]
pub struct ProjectSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for ProjectSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectSession")
            .field("session_id", &self.inner.session_id)
            .field("project_id", &*self.inner.project_id.read())
            .field("status", &*self.inner.status.borrow())
            .finish_non_exhaustive()
    }
}

impl ProjectSession {
    pub(crate) fn new(parts: SessionParts, project_id: Option<ProjectId>) -> Self {
        let (status, _) = watch::channel(SessionStatus {
            project_id: project_id.clone(),
            ..SessionStatus::default()
        });
        Self {
            inner: Arc::new(SessionInner {
                session_id: Uuid::new_v4(),
                parts,
                project_id: RwLock::new(project_id),
                context: StructureContext::new(),
                status,
                messages: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Unique id of the session.
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    /// Project the session is bound to.
    #[must_use]
    pub fn project_id(&self) -> Option<ProjectId> {
        self.inner.project_id.read().clone()
    }

    /// Current structural description.
    #[must_use]
    pub fn structure(&self) -> Option<ProjectStructure> {
        self.inner.context.current()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.inner.status.borrow().clone()
    }

    /// Subscribes to status changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    /// Returns the message log in order.
    #[must_use]
    pub fn messages(&self) -> Vec<SessionMessage> {
        self.inner.messages.read().clone()
    }

    /// Returns true while a run holds this session's project key.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.inner.parts.guard.is_active(&self.inner.key())
    }

    /// Starts the session.
    ///
    /// `Existing` only fetches the project's status: a recorded deployment
    /// moves the session to `ready`, anything else to `error`. `Generate`
    /// runs the generation pipeline.
    pub async fn initialize(
        &self,
        request: InitRequest,
    ) -> Result<CommandOutcome<SessionStatus>, PipelineError> {
        match request {
            InitRequest::Existing {
                project_id,
                structure,
            } => self.open_existing(project_id, structure).await,
            InitRequest::Generate { prompt } => {
                Ok(match self.generate(prompt).await? {
                    CommandOutcome::Completed(_) => CommandOutcome::Completed(self.status()),
                    CommandOutcome::Absorbed => CommandOutcome::Absorbed,
                })
            }
        }
    }

    async fn open_existing(
        &self,
        project_id: ProjectId,
        structure: Option<ProjectStructure>,
    ) -> Result<CommandOutcome<SessionStatus>, PipelineError> {
        let inner = &self.inner;
        // Neither the session's own run nor one on the target project may be in flight.
        for key in [inner.key(), project_id.as_str().to_string()] {
            if let Some(active) = inner.parts.guard.active_run(&key) {
                return Err(inner.rejected(&key, RunKind::Generate, active.kind));
            }
        }

        *inner.project_id.write() = Some(project_id.clone());
        if let Some(structure) = structure {
            inner.context.replace(structure);
        }
        inner.transition(LifecycleState::Loading, |status| {
            status.project_id = Some(project_id.clone());
        });

        let fetched = tokio::time::timeout(
            inner.parts.stage_timeout,
            inner.parts.store.get(&project_id),
        )
        .await;
        let project = match fetched {
            Ok(Ok(project)) => project,
            Ok(Err(err)) => {
                let err = PipelineError::from_service(Stage::LoadProject, err);
                inner.fail(&err);
                return Err(err);
            }
            Err(_) => {
                let err = PipelineError::UpstreamFailure {
                    stage: Stage::LoadProject,
                    message: "timed out".to_string(),
                };
                inner.fail(&err);
                return Err(err);
            }
        };

        match project.recorded_deployment() {
            Some(url) => inner.ready(url),
            None => inner.transition(LifecycleState::Error, |status| {
                status.preview_url = None;
                status.error = Some(format!(
                    "Project {project_id} has no deployment yet (status: {}).",
                    project.status
                ));
                status.error_code = Some("NOT_DEPLOYED".to_string());
            }),
        }
        Ok(CommandOutcome::Completed(self.status()))
    }

    /// Runs the generation pipeline for `prompt`.
    ///
    /// A repeat of the in-flight request is absorbed; a different request
    /// for the same project is rejected. Neither changes the state.
    pub async fn generate(
        &self,
        prompt: impl Into<String>,
    ) -> Result<CommandOutcome<GenerationReport>, PipelineError> {
        let prompt = prompt.into();
        let inner = Arc::clone(&self.inner);
        let Some(permit) = inner.admit(RunKind::Generate, &prompt)? else {
            return Ok(CommandOutcome::Absorbed);
        };

        inner.transition(LifecycleState::Loading, |status| {
            status.error = None;
            status.error_code = None;
        });

        let task_inner = Arc::clone(&inner);
        let result = spawn_run(&inner, async move {
            let run = PipelineRun::new(permit.run_id(), permit.key(), RunKind::Generate);
            let request = GenerationRequest::new(task_inner.project_id.read().clone(), prompt);
            let result = task_inner
                .parts
                .generation
                .run(run, request, &task_inner.context)
                .await;
            if task_inner.key() == permit.key() {
                match &result {
                    Ok(report) => task_inner.ready(&report.preview_url),
                    Err(err) => task_inner.fail(err),
                }
            } else {
                tracing::warn!(
                    run_key = permit.key(),
                    session_key = %task_inner.key(),
                    "Session was rebound during the run; status left unchanged"
                );
            }
            drop(permit);
            result
        })
        .await;

        if let Err(err @ PipelineError::Aborted(_)) = &result {
            inner.fail(err);
        }
        result.map(CommandOutcome::Completed)
    }

    /// Runs the modification pipeline for `requirement`.
    ///
    /// Never changes the lifecycle state or the recorded deployment. The
    /// requirement and its outcome are appended to the message log.
    pub async fn apply_change(
        &self,
        requirement: impl Into<String>,
    ) -> Result<CommandOutcome<ChangeReport>, PipelineError> {
        let requirement = requirement.into();
        let inner = Arc::clone(&self.inner);

        let project_id = inner.project_id.read().clone();
        let structure = inner.context.current();
        let (project_id, structure) = match (project_id, structure) {
            (Some(project_id), Some(structure)) => (project_id, structure),
            (project_id, _) => {
                let err = PipelineError::NotFound {
                    resource: match project_id {
                        Some(id) => format!("structure of project {id}"),
                        None => "a project for this session".to_string(),
                    },
                    stage: None,
                };
                inner.push_message(MessageRole::User, &requirement);
                inner.push_message(MessageRole::Failure, &err.user_message());
                return Err(err);
            }
        };

        let Some(permit) = inner.admit(RunKind::Modify, &requirement)? else {
            return Ok(CommandOutcome::Absorbed);
        };
        inner.push_message(MessageRole::User, &requirement);

        let task_inner = Arc::clone(&inner);
        let result = spawn_run(&inner, async move {
            let run = PipelineRun::new(permit.run_id(), permit.key(), RunKind::Modify);
            let request = ChangeRequest::new(requirement, structure);
            let result = task_inner
                .parts
                .modification
                .run(run, &project_id, &request)
                .await;
            match &result {
                Ok(report) => task_inner.push_message(MessageRole::Assistant, &report.summary),
                Err(err) => task_inner.push_message(MessageRole::Failure, &err.user_message()),
            }
            drop(permit);
            result
        })
        .await;

        if let Err(err @ PipelineError::Aborted(_)) = &result {
            inner.push_message(MessageRole::Failure, &err.user_message());
        }
        result.map(CommandOutcome::Completed)
    }
}

/// Runs `fut` on its own task and waits for it.
async fn spawn_run<T, F>(inner: &SessionInner, fut: F) -> Result<T, PipelineError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, PipelineError>> + Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(result) => result,
        Err(join_error) => {
            tracing::error!(
                session = %inner.session_id,
                project = %inner.key(),
                error = %join_error,
                "Pipeline task ended without an outcome"
            );
            Err(PipelineError::Aborted(join_error.to_string()))
        }
    }
}

impl SessionInner {
    /// Dedup identity: the project id, else the session id.
    fn key(&self) -> String {
        self.project_id
            .read()
            .as_ref()
            .map_or_else(|| self.session_id.to_string(), |id| id.as_str().to_string())
    }

    /// Admits a run, or returns `None` for an absorbed repeat.
    fn admit(&self, kind: RunKind, payload: &str) -> Result<Option<RunPermit>, PipelineError> {
        let key = self.key();
        let fingerprint = fingerprint_request(kind, &key, payload);
        match self.parts.guard.admit(&key, kind, fingerprint.clone()) {
            Admission::Admitted(permit) => Ok(Some(permit)),
            Admission::Rejected(rejection) if rejection.is_same_request(&fingerprint) => {
                tracing::info!(
                    project = %key,
                    run_id = %rejection.active.run_id,
                    %kind,
                    "Repeat of in-flight request absorbed"
                );
                self.parts.sink.try_emit(
                    types::DEDUP_ABSORBED,
                    Some(json!({
                        "project": key,
                        "kind": kind,
                        "active_run_id": rejection.active.run_id.to_string(),
                    })),
                );
                Ok(None)
            }
            Admission::Rejected(rejection) => Err(self.rejected(&key, kind, rejection.active.kind)),
        }
    }

    fn rejected(&self, key: &str, requested: RunKind, active_kind: RunKind) -> PipelineError {
        tracing::warn!(
            project = key,
            requested = %requested,
            active = %active_kind,
            "Conflicting request rejected"
        );
        self.parts.sink.try_emit(
            types::DEDUP_REJECTED,
            Some(json!({"project": key, "requested": requested, "active": active_kind})),
        );
        PipelineError::DuplicateRunRejected {
            project: key.to_string(),
            active_kind,
        }
    }

    /// Moves to `next` if the transition is legal, applying `update`.
    fn transition(&self, next: LifecycleState, update: impl FnOnce(&mut SessionStatus)) {
        self.status.send_if_modified(|status| {
            if status.state != next && !status.state.can_transition_to(next) {
                tracing::warn!(
                    session = %self.session_id,
                    from = %status.state,
                    to = %next,
                    "Ignoring illegal state transition"
                );
                return false;
            }
            status.state = next;
            update(status);
            true
        });
    }

    fn ready(&self, preview_url: &str) {
        let url = preview_url.to_string();
        self.transition(LifecycleState::Ready, |status| {
            status.preview_url = Some(url);
            status.error = None;
            status.error_code = None;
        });
    }

    fn fail(&self, err: &PipelineError) {
        self.transition(LifecycleState::Error, |status| {
            status.preview_url = None;
            status.error = Some(err.user_message());
            status.error_code = Some(err.code().to_string());
        });
    }

    fn push_message(&self, role: MessageRole, text: &str) {
        self.messages.write().push(SessionMessage {
            role,
            text: text.to_string(),
            at: Utc::now(),
        });
    }
}
