//! Orchestrator configuration.
//!
//! Every field has a serde default, so a partial JSON file or an empty
//! environment yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::core::ProjectId;

/// Prefix of every environment variable read by [`OrchestratorConfig::from_env`].
pub const ENV_PREFIX: &str = "SITEFLOW_";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Io {
        /// File that was read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for this schema.
    #[error("invalid config file '{path}': {source}")]
    Json {
        /// File that was parsed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A variable or field holds an unusable value.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable or field name.
        key: String,
        /// What was wrong.
        reason: String,
    },
}

/// What a generation run does when the deployment cannot be recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingPolicy {
    /// Return the preview URL anyway and report the failure as an event.
    #[default]
    Lenient,
    /// Fail the run with `RecordingFailure`.
    Strict,
}

impl std::str::FromStr for RecordingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(Self::Lenient),
            "strict" => Ok(Self::Strict),
            other => Err(format!("expected 'lenient' or 'strict', got '{other}'")),
        }
    }
}

/// Base URLs of the external services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoints {
    /// Project record store.
    #[serde(default = "default_project_store_url")]
    pub project_store_url: String,
    /// Code generation service.
    #[serde(default = "default_generation_url")]
    pub generation_url: String,
    /// File selection and write service.
    #[serde(default = "default_files_url")]
    pub files_url: String,
    /// Packaging service.
    #[serde(default = "default_packaging_url")]
    pub packaging_url: String,
    /// Build and deploy service.
    #[serde(default = "default_build_url")]
    pub build_url: String,
}

fn default_project_store_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_generation_url() -> String {
    "http://localhost:8081".to_string()
}

fn default_files_url() -> String {
    "http://localhost:8082".to_string()
}

fn default_packaging_url() -> String {
    "http://localhost:8083".to_string()
}

fn default_build_url() -> String {
    "http://localhost:8084".to_string()
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            project_store_url: default_project_store_url(),
            generation_url: default_generation_url(),
            files_url: default_files_url(),
            packaging_url: default_packaging_url(),
            build_url: default_build_url(),
        }
    }
}

/// Configuration shared by every session of an orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound on a single stage call, in seconds.
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_seconds: f64,
    /// Handling of a failed deployment write-back.
    #[serde(default)]
    pub recording_policy: RecordingPolicy,
    /// Directory under which each project's file tree lives.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    /// External service locations.
    #[serde(default)]
    pub endpoints: ServiceEndpoints,
}

fn default_stage_timeout() -> f64 {
    120.0
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("./workspaces")
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stage_timeout_seconds: default_stage_timeout(),
            recording_policy: RecordingPolicy::default(),
            workspace_root: default_workspace_root(),
            endpoints: ServiceEndpoints::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the stage timeout.
    #[must_use]
    pub fn with_stage_timeout(mut self, seconds: f64) -> Self {
        self.stage_timeout_seconds = seconds;
        self
    }

    /// Sets the recording policy.
    #[must_use]
    pub fn with_recording_policy(mut self, policy: RecordingPolicy) -> Self {
        self.recording_policy = policy;
        self
    }

    /// Sets the workspace root.
    #[must_use]
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    /// Sets the service endpoints.
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: ServiceEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Gets the stage timeout as a Duration.
    #[must_use]
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.stage_timeout_seconds)
    }

    /// Returns the directory holding a project's file tree.
    ///
    /// Characters outside `[A-Za-z0-9_-]` are replaced so an id can never
    /// escape the workspace root.
    #[must_use]
    pub fn working_directory(&self, project_id: &ProjectId) -> PathBuf {
        let segment: String = project_id
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.workspace_root.join(segment)
    }

    /// Checks values serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.stage_timeout_seconds.is_finite() || self.stage_timeout_seconds <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "stage_timeout_seconds".to_string(),
                reason: format!("must be a positive number, got {}", self.stage_timeout_seconds),
            });
        }
        Ok(())
    }

    /// Loads configuration from `SITEFLOW_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let invalid = |name: &str, reason: String| ConfigError::InvalidValue {
            key: format!("{ENV_PREFIX}{name}"),
            reason,
        };

        let mut config = Self::default();

        if let Some(value) = var("STAGE_TIMEOUT_SECONDS") {
            config.stage_timeout_seconds = value
                .parse()
                .map_err(|e: std::num::ParseFloatError| invalid("STAGE_TIMEOUT_SECONDS", e.to_string()))?;
        }
        if let Some(value) = var("RECORDING_POLICY") {
            config.recording_policy = value
                .parse()
                .map_err(|e: String| invalid("RECORDING_POLICY", e))?;
        }
        if let Some(value) = var("WORKSPACE_ROOT") {
            config.workspace_root = PathBuf::from(value);
        }

        let endpoints = &mut config.endpoints;
        for (name, slot) in [
            ("PROJECT_STORE_URL", &mut endpoints.project_store_url),
            ("GENERATION_URL", &mut endpoints.generation_url),
            ("FILES_URL", &mut endpoints.files_url),
            ("PACKAGING_URL", &mut endpoints.packaging_url),
            ("BUILD_URL", &mut endpoints.build_url),
        ] {
            if let Some(value) = var(name) {
                *slot = value;
            }
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.stage_timeout(), Duration::from_secs(120));
        assert_eq!(config.recording_policy, RecordingPolicy::Lenient);
        assert_eq!(config.workspace_root, PathBuf::from("./workspaces"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let config = OrchestratorConfig::new()
            .with_stage_timeout(2.5)
            .with_recording_policy(RecordingPolicy::Strict)
            .with_workspace_root("/srv/sites");

        assert_eq!(config.stage_timeout(), Duration::from_millis(2500));
        assert_eq!(config.recording_policy, RecordingPolicy::Strict);
        assert_eq!(
            config.working_directory(&ProjectId::new("42")),
            PathBuf::from("/srv/sites/42")
        );
    }

    #[test]
    fn test_working_directory_cannot_escape_root() {
        let config = OrchestratorConfig::new().with_workspace_root("/srv/sites");
        let dir = config.working_directory(&ProjectId::new("../etc"));
        assert_eq!(dir, PathBuf::from("/srv/sites/___etc"));
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("SITEFLOW_STAGE_TIMEOUT_SECONDS", "30"),
            ("SITEFLOW_RECORDING_POLICY", "Strict"),
            ("SITEFLOW_BUILD_URL", "https://build.internal"),
            ("SITEFLOW_FILES_URL", "  "),
        ]
        .into_iter()
        .collect();

        let config =
            OrchestratorConfig::from_lookup(|k| vars.get(k).map(ToString::to_string)).unwrap();

        assert_eq!(config.stage_timeout_seconds, 30.0);
        assert_eq!(config.recording_policy, RecordingPolicy::Strict);
        assert_eq!(config.endpoints.build_url, "https://build.internal");
        assert_eq!(config.endpoints.files_url, default_files_url());
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let err = OrchestratorConfig::from_lookup(|k| {
            (k == "SITEFLOW_RECORDING_POLICY").then(|| "sometimes".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("SITEFLOW_RECORDING_POLICY"));

        let err = OrchestratorConfig::from_lookup(|k| {
            (k == "SITEFLOW_STAGE_TIMEOUT_SECONDS").then(|| "0".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_from_json_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"recording_policy": "strict", "endpoints": {{"generation_url": "http://gen:9000"}}}}"#
        )
        .unwrap();

        let config = OrchestratorConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.recording_policy, RecordingPolicy::Strict);
        assert_eq!(config.endpoints.generation_url, "http://gen:9000");
        assert_eq!(config.endpoints.build_url, default_build_url());
        assert_eq!(config.stage_timeout_seconds, 120.0);
    }

    #[test]
    fn test_from_json_file_errors() {
        let err = OrchestratorConfig::from_json_file("/nonexistent/siteflow.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = OrchestratorConfig::from_json_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Json { .. }));
    }
}
