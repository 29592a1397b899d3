//! Project records as held by the external project store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque project identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    /// Creates a project id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ProjectId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Persisted lifecycle status of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    /// Created but never built.
    #[default]
    Pending,
    /// A generation run is in progress.
    Building,
    /// A deployment exists.
    Ready,
    /// The last generation run failed.
    Error,
}

impl ProjectStatus {
    /// Returns true if the store may move from `self` to `next`.
    ///
    /// `pending -> building -> {ready, error}`; `ready` and `error` may only
    /// re-enter `building`.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending | Self::Ready | Self::Error, Self::Building)
                | (Self::Building, Self::Ready | Self::Error)
        )
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Building => write!(f, "building"),
            Self::Ready => write!(f, "ready"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A project record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Project identity.
    pub id: ProjectId,

    /// Owner of the project.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "ownerId")]
    pub owner_id: Option<String>,

    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// URL of the live preview, once deployed.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "deploymentUrl")]
    pub deployment_url: Option<String>,

    /// Persisted lifecycle status.
    #[serde(default)]
    pub status: ProjectStatus,

    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,

    /// Last update time.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "updatedAt")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Project {
    /// Creates a pending project with no deployment.
    #[must_use]
    pub fn new(id: impl Into<ProjectId>) -> Self {
        Self {
            id: id.into(),
            owner_id: None,
            name: None,
            deployment_url: None,
            status: ProjectStatus::Pending,
            created_at: None,
            updated_at: None,
        }
    }

    /// Sets the owner.
    #[must_use]
    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: ProjectStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the deployment URL and marks the project ready.
    #[must_use]
    pub fn deployed_at(mut self, url: impl Into<String>) -> Self {
        self.deployment_url = Some(url.into());
        self.status = ProjectStatus::Ready;
        self
    }

    /// Returns the recorded deployment URL, ignoring blank values.
    #[must_use]
    pub fn recorded_deployment(&self) -> Option<&str> {
        self.deployment_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

/// Data for creating a new project record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProject {
    /// Owner of the project.
    pub owner_id: String,
    /// Display name.
    pub name: String,
    /// The prompt the project was created from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl NewProject {
    /// Creates a new project request.
    #[must_use]
    pub fn new(owner_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            name: name.into(),
            prompt: None,
        }
    }

    /// Sets the originating prompt.
    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }
}

/// Partial update of a project record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectPatch {
    /// New deployment URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_url: Option<String>,
    /// New status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ProjectStatus>,
}

impl ProjectPatch {
    /// Patch that only changes the status.
    #[must_use]
    pub fn status(status: ProjectStatus) -> Self {
        Self {
            deployment_url: None,
            status: Some(status),
        }
    }

    /// Patch recording a successful deployment.
    #[must_use]
    pub fn deployed(url: impl Into<String>) -> Self {
        Self {
            deployment_url: Some(url.into()),
            status: Some(ProjectStatus::Ready),
        }
    }

    /// Applies the patch to a record in place.
    pub fn apply_to(&self, project: &mut Project) {
        if let Some(ref url) = self.deployment_url {
            project.deployment_url = Some(url.clone());
        }
        if let Some(status) = self.status {
            project.status = status;
        }
        project.updated_at = Some(Utc::now());
    }
}
