//! Ports: the external collaborators a pipeline run depends on.
//!
//! Each service is a narrow `async_trait` so pipelines receive only typed
//! capabilities. [`StagePorts`] bundles them for injection.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::{
    ArchiveRef, FileArtifact, NewProject, Project, ProjectId, ProjectPatch, RawModelOutput,
    WriteOutcome,
};
use crate::errors::ServiceError;

#[cfg(test)]
use mockall::automock;

/// Long-term owner of project records.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Fetches a project.
    async fn get(&self, id: &ProjectId) -> Result<Project, ServiceError>;

    /// Creates a project.
    async fn create(&self, data: NewProject) -> Result<Project, ServiceError>;

    /// Applies a partial update and returns the new record.
    async fn update(&self, id: &ProjectId, patch: ProjectPatch) -> Result<Project, ServiceError>;

    /// Deletes a project.
    async fn delete(&self, id: &ProjectId) -> Result<(), ServiceError>;

    /// Lists the projects of an owner.
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Project>, ServiceError>;
}

/// Natural-language code generation.
///
/// Every call returns unstructured text; callers parse it.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Generates a whole project from a prompt.
    async fn generate(&self, prompt: &str) -> Result<RawModelOutput, ServiceError>;

    /// Decides which files a change touches.
    async fn analyze_change(&self, prompt: &str) -> Result<RawModelOutput, ServiceError>;

    /// Rewrites the given files to satisfy a prompt.
    async fn rewrite_files(
        &self,
        files: &[FileArtifact],
        prompt: &str,
    ) -> Result<RawModelOutput, ServiceError>;
}

/// Reads live file contents from a project's source tree.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FileSelectionService: Send + Sync {
    /// Returns the contents of `paths` under `working_directory`.
    async fn resolve_files(
        &self,
        paths: &[String],
        working_directory: &Path,
    ) -> Result<Vec<FileArtifact>, ServiceError>;
}

/// Persists files.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WriteService: Send + Sync {
    /// Writes `files`, into `base_directory` when given or a fresh tree
    /// otherwise.
    async fn write_files(
        &self,
        files: &[FileArtifact],
        base_directory: Option<PathBuf>,
    ) -> Result<WriteOutcome, ServiceError>;
}

/// Packages the written file tree.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PackagingService: Send + Sync {
    /// Returns a reference to an archive of the current tree.
    async fn package_current_tree(&self) -> Result<ArchiveRef, ServiceError>;
}

/// Builds and deploys an archive.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BuildService: Send + Sync {
    /// Builds the archive and returns the preview URL.
    async fn build_and_deploy(&self, archive: &ArchiveRef) -> Result<String, ServiceError>;
}

/// All collaborators a pipeline run may call.
#[derive(Clone)]
pub struct StagePorts {
    /// Project record store.
    pub project_store: Arc<dyn ProjectStore>,
    /// Code generation service.
    pub generation: Arc<dyn GenerationService>,
    /// File selection service.
    pub file_selection: Arc<dyn FileSelectionService>,
    /// File write service.
    pub writer: Arc<dyn WriteService>,
    /// Packaging service.
    pub packaging: Arc<dyn PackagingService>,
    /// Build and deploy service.
    pub build: Arc<dyn BuildService>,
}

impl std::fmt::Debug for StagePorts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagePorts").finish_non_exhaustive()
    }
}

impl StagePorts {
    /// Bundles the collaborators.
    #[must_use]
    pub fn new(
        project_store: Arc<dyn ProjectStore>,
        generation: Arc<dyn GenerationService>,
        file_selection: Arc<dyn FileSelectionService>,
        writer: Arc<dyn WriteService>,
        packaging: Arc<dyn PackagingService>,
        build: Arc<dyn BuildService>,
    ) -> Self {
        Self {
            project_store,
            generation,
            file_selection,
            writer,
            packaging,
            build,
        }
    }

    /// Replaces the project store.
    #[must_use]
    pub fn with_project_store(mut self, store: Arc<dyn ProjectStore>) -> Self {
        self.project_store = store;
        self
    }

    /// Replaces the generation service.
    #[must_use]
    pub fn with_generation(mut self, generation: Arc<dyn GenerationService>) -> Self {
        self.generation = generation;
        self
    }
}
