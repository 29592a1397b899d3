//! HTTP implementations of the collaborator ports.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::transport::HttpTransport;
use crate::core::{
    ArchiveRef, FileArtifact, NewProject, Project, ProjectId, ProjectPatch, RawModelOutput,
    WriteOutcome,
};
use crate::errors::ServiceError;
use crate::ports::{
    BuildService, FileSelectionService, GenerationService, PackagingService, ProjectStore,
    WriteService,
};

/// Project store over a REST API.
#[derive(Debug, Clone)]
pub struct HttpProjectStore {
    transport: HttpTransport,
}

impl HttpProjectStore {
    /// Creates a store client.
    #[must_use]
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl ProjectStore for HttpProjectStore {
    async fn get(&self, id: &ProjectId) -> Result<Project, ServiceError> {
        let request = self.transport.get(&format!("projects/{id}"));
        self.transport.send_json(request).await
    }

    async fn create(&self, data: NewProject) -> Result<Project, ServiceError> {
        let request = self.transport.post("projects", &data);
        self.transport.send_json(request).await
    }

    async fn update(&self, id: &ProjectId, patch: ProjectPatch) -> Result<Project, ServiceError> {
        let request = self.transport.patch(&format!("projects/{id}"), &patch);
        self.transport.send_json(request).await
    }

    async fn delete(&self, id: &ProjectId) -> Result<(), ServiceError> {
        let request = self.transport.delete(&format!("projects/{id}"));
        self.transport.send_empty(request).await
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Project>, ServiceError> {
        let request = self.transport.get("projects").query(&[("owner_id", owner_id)]);
        self.transport.send_json(request).await
    }
}

#[derive(Serialize)]
struct PromptBody<'a> {
    prompt: &'a str,
}

#[derive(Serialize)]
struct RewriteBody<'a> {
    files: &'a [FileArtifact],
    prompt: &'a str,
}

/// Generation service client. Responses are returned as raw text.
#[derive(Debug, Clone)]
pub struct HttpGenerationService {
    transport: HttpTransport,
}

impl HttpGenerationService {
    /// Creates a generation client.
    #[must_use]
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }

    async fn prompt(&self, path: &str, prompt: &str) -> Result<RawModelOutput, ServiceError> {
        let request = self.transport.post(path, &PromptBody { prompt });
        self.transport.send_text(request).await.map(RawModelOutput::from)
    }
}

#[async_trait]
impl GenerationService for HttpGenerationService {
    async fn generate(&self, prompt: &str) -> Result<RawModelOutput, ServiceError> {
        self.prompt("generate", prompt).await
    }

    async fn analyze_change(&self, prompt: &str) -> Result<RawModelOutput, ServiceError> {
        self.prompt("analyze", prompt).await
    }

    async fn rewrite_files(
        &self,
        files: &[FileArtifact],
        prompt: &str,
    ) -> Result<RawModelOutput, ServiceError> {
        let request = self.transport.post("rewrite", &RewriteBody { files, prompt });
        self.transport.send_text(request).await.map(RawModelOutput::from)
    }
}

#[derive(Serialize)]
struct SelectBody<'a> {
    paths: &'a [String],
    working_directory: &'a Path,
}

#[derive(Serialize)]
struct WriteBody<'a> {
    files: &'a [FileArtifact],
    #[serde(skip_serializing_if = "Option::is_none")]
    base_directory: Option<PathBuf>,
}

/// File selection and write client.
#[derive(Debug, Clone)]
pub struct HttpFileService {
    transport: HttpTransport,
}

impl HttpFileService {
    /// Creates a file service client.
    #[must_use]
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl FileSelectionService for HttpFileService {
    async fn resolve_files(
        &self,
        paths: &[String],
        working_directory: &Path,
    ) -> Result<Vec<FileArtifact>, ServiceError> {
        let body = SelectBody {
            paths,
            working_directory,
        };
        let request = self.transport.post("files/select", &body);
        self.transport.send_json(request).await
    }
}

#[async_trait]
impl WriteService for HttpFileService {
    async fn write_files(
        &self,
        files: &[FileArtifact],
        base_directory: Option<PathBuf>,
    ) -> Result<WriteOutcome, ServiceError> {
        let body = WriteBody {
            files,
            base_directory,
        };
        let request = self.transport.post("files/write", &body);
        self.transport.send_json(request).await
    }
}

#[derive(Serialize)]
struct DeployBody<'a> {
    archive: &'a ArchiveRef,
}

#[derive(Deserialize)]
struct PackageResponse {
    archive: ArchiveRef,
}

#[derive(Deserialize)]
struct DeployResponse {
    #[serde(alias = "previewUrl", alias = "url")]
    preview_url: String,
}

/// Packaging and build/deploy client.
///
/// Packaging and building usually live on different hosts, so each side has
/// its own transport.
#[derive(Debug, Clone)]
pub struct HttpDeployService {
    packaging: HttpTransport,
    build: HttpTransport,
}

impl HttpDeployService {
    /// Creates a deploy client.
    #[must_use]
    pub fn new(packaging: HttpTransport, build: HttpTransport) -> Self {
        Self { packaging, build }
    }
}

#[async_trait]
impl PackagingService for HttpDeployService {
    async fn package_current_tree(&self) -> Result<ArchiveRef, ServiceError> {
        let request = self.packaging.post("package", &serde_json::json!({}));
        let response: PackageResponse = self.packaging.send_json(request).await?;
        Ok(response.archive)
    }
}

#[async_trait]
impl BuildService for HttpDeployService {
    async fn build_and_deploy(&self, archive: &ArchiveRef) -> Result<String, ServiceError> {
        let request = self.build.post("deploy", &DeployBody { archive });
        let response: DeployResponse = self.build.send_json(request).await?;
        if response.preview_url.trim().is_empty() {
            return Err(ServiceError::Decode("deploy response has an empty preview URL".into()));
        }
        Ok(response.preview_url)
    }
}
