//! Subcommands.

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use siteflow::config::OrchestratorConfig;
use siteflow::core::{ProjectId, ProjectStructure};
use siteflow::orchestrator::{CommandOutcome, InitRequest, Orchestrator, ProjectSession};
use siteflow::ports::StagePorts;
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a project and print its preview URL
    Generate {
        /// What to build
        prompt: String,

        /// Project to record the deployment on
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Show a project's deployment status
    Status {
        /// Project ID
        project: String,
    },

    /// Apply a change to a deployed project
    ApplyChange {
        /// Project ID
        project: String,

        /// What to change
        requirement: String,

        /// JSON file with the project's structural description
        #[arg(short, long)]
        structure: PathBuf,
    },

    /// List the projects of an owner
    Projects {
        /// Owner ID
        owner: String,
    },
}

pub async fn handle_command(command: Commands, config: OrchestratorConfig, json: bool) -> Result<()> {
    let orchestrator = Orchestrator::new(StagePorts::http(&config.endpoints), config);

    match command {
        Commands::Generate { prompt, project } => {
            let session = match project {
                Some(id) => orchestrator.session_for(id),
                None => orchestrator.session(),
            };
            let report = match session.generate(prompt).await {
                Ok(CommandOutcome::Completed(report)) => report,
                Ok(CommandOutcome::Absorbed) => bail!("An identical request is already running"),
                Err(err) => bail!("{}", err.user_message()),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.short_circuited() {
                println!("Already deployed: {}", report.preview_url);
            } else {
                println!("Preview: {}", report.preview_url);
                println!("Files written: {}", report.files_written.len());
            }
        }
        Commands::Status { project } => {
            let session = orchestrator.session();
            let request = InitRequest::Existing {
                project_id: ProjectId::new(project),
                structure: None,
            };
            if let Err(err) = session.initialize(request).await {
                bail!("{}", err.user_message());
            }
            print_status(&session, json)?;
        }
        Commands::ApplyChange {
            project,
            requirement,
            structure,
        } => {
            let session = orchestrator.session();
            let request = InitRequest::Existing {
                project_id: ProjectId::new(project),
                structure: Some(read_structure(&structure)?),
            };
            if let Err(err) = session.initialize(request).await {
                bail!("{}", err.user_message());
            }
            let report = match session.apply_change(requirement).await {
                Ok(CommandOutcome::Completed(report)) => report,
                Ok(CommandOutcome::Absorbed) => bail!("An identical change is already running"),
                Err(err) => bail!("{}", err.user_message()),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.summary);
            }
        }
        Commands::Projects { owner } => {
            let projects = match orchestrator.projects_for_owner(&owner).await {
                Ok(projects) => projects,
                Err(err) => bail!("{}", err.user_message()),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&projects)?);
            } else if projects.is_empty() {
                println!("No projects found for {owner}");
            } else {
                for project in projects {
                    println!(
                        "{}\t{}\t{}\t{}",
                        project.id,
                        project.status,
                        project.name.as_deref().unwrap_or("-"),
                        project.deployment_url.as_deref().unwrap_or("-"),
                    );
                }
            }
        }
    }
    Ok(())
}

fn print_status(session: &ProjectSession, json: bool) -> Result<()> {
    let status = session.status();
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }
    println!("State: {}", status.state);
    if let Some(url) = status.preview_url {
        println!("Preview: {url}");
    }
    if let Some(error) = status.error {
        println!("Error: {error}");
    }
    Ok(())
}

fn read_structure(path: &Path) -> Result<ProjectStructure> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read structure file {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("Structure file {} is not valid JSON", path.display()))?;
    if value.is_null() {
        bail!("Structure file {} is empty", path.display());
    }
    tracing::debug!(path = %path.display(), "Loaded structure");
    Ok(ProjectStructure::new(value))
}
