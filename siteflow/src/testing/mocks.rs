//! In-memory collaborators for testing.
//!
//! Each fake counts its calls and can be told to fail, so tests can assert
//! both outcomes and which stages ran.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::fixtures;
use crate::core::{
    ArchiveRef, FileArtifact, NewProject, Project, ProjectId, ProjectPatch, ProjectStatus,
    RawModelOutput, WriteOutcome,
};
use crate::errors::ServiceError;
use crate::ports::{
    BuildService, FileSelectionService, GenerationService, PackagingService, ProjectStore,
    StagePorts, WriteService,
};

/// A project store backed by a map.
#[derive(Debug, Default)]
pub struct InMemoryProjectStore {
    projects: Mutex<HashMap<ProjectId, Project>>,
    updates: Mutex<Vec<(ProjectId, ProjectPatch)>>,
    get_count: Mutex<usize>,
    next_id: Mutex<u64>,
    update_failure: Mutex<Option<ServiceError>>,
    record_failure: Mutex<Option<ServiceError>>,
    delete_delay: Mutex<Option<Duration>>,
}

impl InMemoryProjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every `delete`.
    pub fn delay_deletes(&self, delay: Duration) {
        *self.delete_delay.lock() = Some(delay);
    }

    /// Creates a store holding `project`.
    #[must_use]
    pub fn with_project(project: Project) -> Self {
        let store = Self::new();
        store.insert(project);
        store
    }

    /// Inserts or replaces a project.
    pub fn insert(&self, project: Project) {
        self.projects.lock().insert(project.id.clone(), project);
    }

    /// Returns a stored project.
    #[must_use]
    pub fn project(&self, id: &str) -> Option<Project> {
        self.projects.lock().get(&ProjectId::new(id)).cloned()
    }

    /// Fails every update with `err`.
    pub fn fail_updates(&self, err: ServiceError) {
        *self.update_failure.lock() = Some(err);
    }

    /// Fails only updates that record a deployment URL.
    pub fn fail_recording(&self, err: ServiceError) {
        *self.record_failure.lock() = Some(err);
    }

    /// Returns every successful update in order.
    #[must_use]
    pub fn updates(&self) -> Vec<(ProjectId, ProjectPatch)> {
        self.updates.lock().clone()
    }

    /// Returns the number of `get` calls.
    #[must_use]
    pub fn get_count(&self) -> usize {
        *self.get_count.lock()
    }
}

#[async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn get(&self, id: &ProjectId) -> Result<Project, ServiceError> {
        *self.get_count.lock() += 1;
        self.projects
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| ServiceError::not_found(format!("project {id}")))
    }

    async fn create(&self, data: NewProject) -> Result<Project, ServiceError> {
        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            ProjectId::new(format!("project-{}", *next))
        };
        let mut project = Project::new(id).with_owner(data.owner_id);
        project.name = Some(data.name);
        project.created_at = Some(chrono::Utc::now());
        self.insert(project.clone());
        Ok(project)
    }

    async fn update(&self, id: &ProjectId, patch: ProjectPatch) -> Result<Project, ServiceError> {
        if let Some(err) = self.update_failure.lock().clone() {
            return Err(err);
        }
        if patch.deployment_url.is_some() {
            if let Some(err) = self.record_failure.lock().clone() {
                return Err(err);
            }
        }
        let mut projects = self.projects.lock();
        let project = projects
            .get_mut(id)
            .ok_or_else(|| ServiceError::not_found(format!("project {id}")))?;
        patch.apply_to(project);
        self.updates.lock().push((id.clone(), patch));
        Ok(project.clone())
    }

    async fn delete(&self, id: &ProjectId) -> Result<(), ServiceError> {
        let delay = *self.delete_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.projects
            .lock()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ServiceError::not_found(format!("project {id}")))
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Project>, ServiceError> {
        let mut projects: Vec<Project> = self
            .projects
            .lock()
            .values()
            .filter(|p| p.owner_id.as_deref() == Some(owner_id))
            .cloned()
            .collect();
        projects.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(projects)
    }
}

/// A generation service returning scripted outputs.
#[derive(Debug)]
pub struct ScriptedGenerationService {
    generate_output: Mutex<Result<RawModelOutput, ServiceError>>,
    analysis_output: Mutex<Result<RawModelOutput, ServiceError>>,
    rewrite_output: Mutex<Result<RawModelOutput, ServiceError>>,
    delay: Mutex<Option<Duration>>,
    prompts: Mutex<Vec<String>>,
    generate_count: Mutex<usize>,
    analyze_count: Mutex<usize>,
    rewrite_count: Mutex<usize>,
}

impl Default for ScriptedGenerationService {
    fn default() -> Self {
        Self {
            generate_output: Mutex::new(Ok(fixtures::todo_app_output())),
            analysis_output: Mutex::new(Ok(fixtures::analysis_output(&["src/App.jsx"], &[]))),
            rewrite_output: Mutex::new(Ok(fixtures::rewrite_output(&[(
                "src/App.jsx",
                "export default function App() { return null; }",
            )]))),
            delay: Mutex::new(None),
            prompts: Mutex::new(Vec::new()),
            generate_count: Mutex::new(0),
            analyze_count: Mutex::new(0),
            rewrite_count: Mutex::new(0),
        }
    }
}

impl ScriptedGenerationService {
    /// Creates a service scripted with the todo app fixtures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the `generate` result.
    pub fn set_generate(&self, output: Result<RawModelOutput, ServiceError>) {
        *self.generate_output.lock() = output;
    }

    /// Sets the `analyze_change` result.
    pub fn set_analysis(&self, output: Result<RawModelOutput, ServiceError>) {
        *self.analysis_output.lock() = output;
    }

    /// Sets the `rewrite_files` result.
    pub fn set_rewrite(&self, output: Result<RawModelOutput, ServiceError>) {
        *self.rewrite_output.lock() = output;
    }

    /// Delays every call.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Returns the number of `generate` calls.
    #[must_use]
    pub fn generate_count(&self) -> usize {
        *self.generate_count.lock()
    }

    /// Returns the number of `analyze_change` calls.
    #[must_use]
    pub fn analyze_count(&self) -> usize {
        *self.analyze_count.lock()
    }

    /// Returns the number of `rewrite_files` calls.
    #[must_use]
    pub fn rewrite_count(&self) -> usize {
        *self.rewrite_count.lock()
    }

    /// Returns every prompt received, in order.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    async fn respond(
        &self,
        prompt: &str,
        counter: &Mutex<usize>,
        output: &Mutex<Result<RawModelOutput, ServiceError>>,
    ) -> Result<RawModelOutput, ServiceError> {
        *counter.lock() += 1;
        self.prompts.lock().push(prompt.to_string());
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        output.lock().clone()
    }
}

#[async_trait]
impl GenerationService for ScriptedGenerationService {
    async fn generate(&self, prompt: &str) -> Result<RawModelOutput, ServiceError> {
        self.respond(prompt, &self.generate_count, &self.generate_output).await
    }

    async fn analyze_change(&self, prompt: &str) -> Result<RawModelOutput, ServiceError> {
        self.respond(prompt, &self.analyze_count, &self.analysis_output).await
    }

    async fn rewrite_files(
        &self,
        _files: &[FileArtifact],
        prompt: &str,
    ) -> Result<RawModelOutput, ServiceError> {
        self.respond(prompt, &self.rewrite_count, &self.rewrite_output).await
    }
}

/// A file selection service over a fixed file map.
#[derive(Debug, Default)]
pub struct StaticFileSelection {
    files: Mutex<Vec<FileArtifact>>,
    return_all: Mutex<bool>,
    requests: Mutex<Vec<(Vec<String>, PathBuf)>>,
}

impl StaticFileSelection {
    /// Creates a selection service with no files.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file.
    #[must_use]
    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.files.lock().push(FileArtifact::new(path, content));
        self
    }

    /// Returns every known file regardless of the request.
    pub fn set_return_all(&self, return_all: bool) {
        *self.return_all.lock() = return_all;
    }

    /// Returns every request received.
    #[must_use]
    pub fn requests(&self) -> Vec<(Vec<String>, PathBuf)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl FileSelectionService for StaticFileSelection {
    async fn resolve_files(
        &self,
        paths: &[String],
        working_directory: &Path,
    ) -> Result<Vec<FileArtifact>, ServiceError> {
        self.requests
            .lock()
            .push((paths.to_vec(), working_directory.to_path_buf()));
        let files = self.files.lock();
        if *self.return_all.lock() {
            return Ok(files.clone());
        }
        Ok(files
            .iter()
            .filter(|f| paths.contains(&f.path))
            .cloned()
            .collect())
    }
}

/// A write service that records every write.
#[derive(Debug, Default)]
pub struct RecordingWriteService {
    writes: Mutex<Vec<(Vec<FileArtifact>, Option<PathBuf>)>>,
    failed_paths: Mutex<Vec<String>>,
    error: Mutex<Option<ServiceError>>,
}

impl RecordingWriteService {
    /// Creates a service acknowledging every write.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports these paths as not persisted.
    pub fn fail_paths(&self, paths: &[&str]) {
        *self.failed_paths.lock() = paths.iter().map(ToString::to_string).collect();
    }

    /// Fails every write with `err`.
    pub fn fail_with(&self, err: ServiceError) {
        *self.error.lock() = Some(err);
    }

    /// Returns the number of write calls.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.lock().len()
    }

    /// Returns every write received.
    #[must_use]
    pub fn writes(&self) -> Vec<(Vec<FileArtifact>, Option<PathBuf>)> {
        self.writes.lock().clone()
    }
}

#[async_trait]
impl WriteService for RecordingWriteService {
    async fn write_files(
        &self,
        files: &[FileArtifact],
        base_directory: Option<PathBuf>,
    ) -> Result<WriteOutcome, ServiceError> {
        self.writes.lock().push((files.to_vec(), base_directory));
        if let Some(err) = self.error.lock().clone() {
            return Err(err);
        }
        let failed = self.failed_paths.lock().clone();
        if failed.is_empty() {
            return Ok(WriteOutcome::Ack {
                written: files.len(),
            });
        }
        Ok(WriteOutcome::Partial {
            written: files
                .iter()
                .filter(|f| !failed.contains(&f.path))
                .map(|f| f.path.clone())
                .collect(),
            failed,
        })
    }
}

/// A packaging service handing out numbered archives.
#[derive(Debug, Default)]
pub struct FakePackaging {
    count: Mutex<usize>,
    error: Mutex<Option<ServiceError>>,
}

impl FakePackaging {
    /// Creates a packaging service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every call with `err`.
    pub fn fail_with(&self, err: ServiceError) {
        *self.error.lock() = Some(err);
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.count.lock()
    }
}

#[async_trait]
impl PackagingService for FakePackaging {
    async fn package_current_tree(&self) -> Result<ArchiveRef, ServiceError> {
        let n = {
            let mut count = self.count.lock();
            *count += 1;
            *count
        };
        if let Some(err) = self.error.lock().clone() {
            return Err(err);
        }
        Ok(ArchiveRef::new(format!("archive://tree-{n}.zip")))
    }
}

/// A build service returning a fixed preview URL.
#[derive(Debug)]
pub struct FakeBuild {
    url: Mutex<String>,
    archives: Mutex<Vec<ArchiveRef>>,
    error: Mutex<Option<ServiceError>>,
}

impl Default for FakeBuild {
    fn default() -> Self {
        Self {
            url: Mutex::new("https://preview.example/site".to_string()),
            archives: Mutex::new(Vec::new()),
            error: Mutex::new(None),
        }
    }
}

impl FakeBuild {
    /// Creates a build service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the preview URL returned.
    pub fn set_url(&self, url: impl Into<String>) {
        *self.url.lock() = url.into();
    }

    /// Fails every call with `err`.
    pub fn fail_with(&self, err: ServiceError) {
        *self.error.lock() = Some(err);
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.archives.lock().len()
    }

    /// Returns every archive built.
    #[must_use]
    pub fn archives(&self) -> Vec<ArchiveRef> {
        self.archives.lock().clone()
    }
}

#[async_trait]
impl BuildService for FakeBuild {
    async fn build_and_deploy(&self, archive: &ArchiveRef) -> Result<String, ServiceError> {
        self.archives.lock().push(archive.clone());
        if let Some(err) = self.error.lock().clone() {
            return Err(err);
        }
        Ok(self.url.lock().clone())
    }
}

/// One of each fake, kept typed so tests can inspect them.
#[derive(Debug, Clone)]
pub struct TestServices {
    /// Project store.
    pub store: Arc<InMemoryProjectStore>,
    /// Generation service.
    pub generation: Arc<ScriptedGenerationService>,
    /// File selection service.
    pub files: Arc<StaticFileSelection>,
    /// Write service.
    pub writer: Arc<RecordingWriteService>,
    /// Packaging service.
    pub packaging: Arc<FakePackaging>,
    /// Build service.
    pub build: Arc<FakeBuild>,
}

impl Default for TestServices {
    fn default() -> Self {
        Self::with_store(InMemoryProjectStore::new())
    }
}

impl TestServices {
    /// Creates fakes with an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates fakes around `store`.
    #[must_use]
    pub fn with_store(store: InMemoryProjectStore) -> Self {
        Self {
            store: Arc::new(store),
            generation: Arc::new(ScriptedGenerationService::new()),
            files: Arc::new(StaticFileSelection::new()),
            writer: Arc::new(RecordingWriteService::new()),
            packaging: Arc::new(FakePackaging::new()),
            build: Arc::new(FakeBuild::new()),
        }
    }

    /// Replaces the file selection service.
    #[must_use]
    pub fn with_files(mut self, files: StaticFileSelection) -> Self {
        self.files = Arc::new(files);
        self
    }

    /// Bundles the fakes as ports.
    #[must_use]
    pub fn ports(&self) -> StagePorts {
        StagePorts::new(
            self.store.clone(),
            self.generation.clone(),
            self.files.clone(),
            self.writer.clone(),
            self.packaging.clone(),
            self.build.clone(),
        )
    }

    /// Total calls to generate, write, package, and build.
    #[must_use]
    pub fn pipeline_call_count(&self) -> usize {
        self.generation.generate_count()
            + self.writer.write_count()
            + self.packaging.call_count()
            + self.build.call_count()
    }
}

/// Convenience for a store holding one project in `status`.
#[must_use]
pub fn store_with(id: &str, status: ProjectStatus, url: Option<&str>) -> InMemoryProjectStore {
    let mut project = Project::new(id).with_status(status);
    project.deployment_url = url.map(ToString::to_string);
    InMemoryProjectStore::with_project(project)
}
