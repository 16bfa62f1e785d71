//! Compose orchestration
//!
//! Facade over the external compose tool. Every operation is a subprocess;
//! a nonzero exit surfaces as `ComposeFailed` with the project and operation.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::module::traits::{CommandRunner, ModuleError};
use crate::utils::timeout::with_deadline;

/// The single service defined by a module compose file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeService {
    pub name: String,
    pub container_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ComposeDocument {
    #[serde(default)]
    services: BTreeMap<String, Option<ServiceDocument>>,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceDocument {
    #[serde(default)]
    container_name: Option<String>,
}

/// Parse a compose file and return its only service
///
/// Module compose files carry one service each; anything else is rejected.
pub fn parse_compose_file(path: &Path) -> Result<ComposeService, ModuleError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ModuleError::io(path, "Failed to read compose file", e))?;
    parse_compose_str(&contents, path)
}

fn parse_compose_str(contents: &str, path: &Path) -> Result<ComposeService, ModuleError> {
    let invalid = |reason: String| ModuleError::ComposeFileInvalid {
        path: path.display().to_string(),
        reason,
    };

    let document: ComposeDocument =
        serde_yaml::from_str(contents).map_err(|e| invalid(e.to_string()))?;
    if document.services.len() != 1 {
        return Err(invalid(format!(
            "expected exactly one service, found {}",
            document.services.len()
        )));
    }

    let (name, service) = document
        .services
        .into_iter()
        .next()
        .ok_or_else(|| invalid("no services".to_string()))?;
    Ok(ComposeService {
        name,
        container_name: service.unwrap_or_default().container_name,
    })
}

#[derive(Debug, Deserialize)]
struct ProjectRow {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "ConfigFiles", default)]
    config_files: String,
}

/// Compose orchestrator
pub struct ComposeOrchestrator {
    command: Vec<String>,
    runner: Arc<dyn CommandRunner>,
    timeout: Option<Duration>,
}

impl ComposeOrchestrator {
    /// `command` is the compose invocation prefix, e.g. `["docker", "compose"]`
    pub fn new(command: Vec<String>, runner: Arc<dyn CommandRunner>, timeout: Option<Duration>) -> Self {
        Self {
            command,
            runner,
            timeout,
        }
    }

    fn split_command(&self, args: Vec<String>) -> (String, Vec<String>) {
        let mut full: Vec<String> = self.command.iter().skip(1).cloned().collect();
        full.extend(args);
        let program = self
            .command
            .first()
            .cloned()
            .unwrap_or_else(|| "docker".to_string());
        (program, full)
    }

    async fn invoke(
        &self,
        op: &str,
        project: &str,
        args: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<(), ModuleError> {
        let (program, args) = self.split_command(args);
        let label = format!("compose {} {}", op, project);
        let exit_code = with_deadline(
            self.runner.run(&program, &args, cancel),
            self.timeout,
            cancel,
            &label,
        )
        .await?;
        if exit_code != 0 {
            return Err(ModuleError::ComposeFailed {
                op: op.to_string(),
                project: project.to_string(),
                exit_code,
            });
        }
        Ok(())
    }

    fn file_args(project: &str, files: &[PathBuf]) -> Vec<String> {
        let mut args = vec!["-p".to_string(), project.to_string()];
        for file in files {
            args.push("-f".to_string());
            args.push(file.display().to_string());
        }
        args
    }

    /// `compose -p P -f ... up -d --remove-orphans --quiet-pull`; no files is a no-op
    pub async fn start_project(
        &self,
        project: &str,
        files: &[PathBuf],
        cancel: &CancellationToken,
    ) -> Result<(), ModuleError> {
        if files.is_empty() {
            debug!("No compose files for project {}, nothing to start", project);
            return Ok(());
        }
        info!("Starting compose project {} ({} files)", project, files.len());
        let mut args = Self::file_args(project, files);
        args.extend(["up", "-d", "--remove-orphans", "--quiet-pull"].map(String::from));
        self.invoke("up", project, args, cancel).await
    }

    /// Stop a whole project, or only the named services
    pub async fn stop_project(
        &self,
        project: &str,
        services: &[String],
        cancel: &CancellationToken,
    ) -> Result<(), ModuleError> {
        if services.is_empty() {
            info!("Stopping compose project {}", project);
            let args = vec!["-p".to_string(), project.to_string(), "stop".to_string()];
            return self.invoke("stop", project, args, cancel).await;
        }

        let project_files = self.list_project_files(project, cancel).await?;
        let mut parsed = Vec::with_capacity(project_files.len());
        for file in project_files {
            let service = parse_compose_file(&file)?;
            parsed.push((file, service));
        }

        for wanted in services {
            let file = parsed
                .iter()
                .find(|(_, service)| &service.name == wanted)
                .map(|(file, _)| file.clone())
                .ok_or_else(|| ModuleError::UnknownService {
                    project: project.to_string(),
                    service: wanted.clone(),
                })?;
            info!("Stopping service {} of compose project {}", wanted, project);
            let mut args = Self::file_args(project, &[file]);
            args.push("stop".to_string());
            args.push(wanted.clone());
            self.invoke("stop", project, args, cancel).await?;
        }
        Ok(())
    }

    /// `compose -p P down [--volumes]`
    pub async fn down_project(
        &self,
        project: &str,
        include_volumes: bool,
        cancel: &CancellationToken,
    ) -> Result<(), ModuleError> {
        info!(
            "Taking down compose project {}{}",
            project,
            if include_volumes { " with volumes" } else { "" }
        );
        let mut args = vec!["-p".to_string(), project.to_string(), "down".to_string()];
        if include_volumes {
            args.push("--volumes".to_string());
        }
        self.invoke("down", project, args, cancel).await
    }

    /// Compose files of a known project; empty when the project is unknown
    pub async fn list_project_files(
        &self,
        project: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>, ModuleError> {
        let args = ["ls", "--all", "--format", "json"].map(String::from).to_vec();
        let (program, args) = self.split_command(args);
        let output = with_deadline(
            self.runner.capture(&program, &args, cancel),
            self.timeout,
            cancel,
            "compose ls",
        )
        .await?;
        if output.exit_code != 0 {
            return Err(ModuleError::ComposeFailed {
                op: "ls".to_string(),
                project: project.to_string(),
                exit_code: output.exit_code,
            });
        }
        parse_project_files(&output.stdout, project)
    }
}

fn parse_project_files(listing: &str, project: &str) -> Result<Vec<PathBuf>, ModuleError> {
    let listing = listing.trim();
    if listing.is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<ProjectRow> =
        serde_json::from_str(listing).map_err(|e| ModuleError::BadResponse {
            command: "compose ls".to_string(),
            reason: e.to_string(),
        })?;
    Ok(rows
        .into_iter()
        .find(|row| row.name == project)
        .map(|row| {
            row.config_files
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default())
}
