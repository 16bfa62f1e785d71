//! Module system traits and shared types
//!
//! Defines the error taxonomy used across the engine, the container state
//! model, and the seams (container transport, command runner) through which
//! the engine talks to the outside world.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// State of an adapter container as seen by the container engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerState {
    /// Container exists and is running
    Running,
    /// Container exists but is not running
    Stopped,
    /// No container with that name exists
    Missing,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerState::Running => write!(f, "running"),
            ContainerState::Stopped => write!(f, "stopped"),
            ContainerState::Missing => write!(f, "missing"),
        }
    }
}

/// Classification of an installed module after discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleStatus {
    /// Adapter running and configuration metadata fetched
    Healthy,
    /// Artifacts are fine but the global adapter is not running yet
    EligibleToStart,
    /// Something about the module cannot be used
    Broken,
}

/// Summary of a container reported by the container engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    /// Engine-assigned container id
    pub id: String,
    /// Container name without the leading slash
    pub name: String,
    /// Current state
    pub state: ContainerState,
}

/// Output of a completed, non-interactive exec session
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Everything the process wrote to stdout
    pub stdout: Vec<u8>,
    /// Everything the process wrote to stderr
    pub stderr: String,
    /// Process exit code
    pub exit_code: i64,
}

/// Standard streams handed to an interactive exec session
pub struct InteractiveIo {
    pub stdin: Box<dyn AsyncRead + Send + Unpin>,
    pub stdout: Box<dyn AsyncWrite + Send + Unpin>,
    pub stderr: Box<dyn AsyncWrite + Send + Unpin>,
}

impl InteractiveIo {
    /// Attach the current process' standard streams
    pub fn inherit() -> Self {
        Self {
            stdin: Box::new(tokio::io::stdin()),
            stdout: Box::new(tokio::io::stdout()),
            stderr: Box::new(tokio::io::stderr()),
        }
    }
}

/// Container engine seam used by the adapter RPC layer
///
/// The production implementation talks to the Docker daemon; tests plug in
/// a scripted in-memory engine.
#[async_trait]
pub trait ContainerTransport: Send + Sync {
    /// Run `command` inside the named container, optionally writing `stdin`
    /// (already framed) before closing the input stream.
    async fn exec(
        &self,
        container: &str,
        command: &[String],
        stdin: Option<Vec<u8>>,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, ModuleError>;

    /// Run `command` with the caller's streams attached. `preamble` is written
    /// to the process' stdin before raw forwarding begins. Returns the exit code.
    async fn exec_interactive(
        &self,
        container: &str,
        command: &[String],
        preamble: Vec<u8>,
        io: InteractiveIo,
        cancel: &CancellationToken,
    ) -> Result<i64, ModuleError>;

    /// Look up a container by name; `None` when it does not exist
    async fn inspect(&self, container: &str) -> Result<Option<ContainerInfo>, ModuleError>;

    /// List every container known to the engine, running or not
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, ModuleError>;
}

/// Captured output of a subprocess
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
}

/// Subprocess seam used by the compose orchestrator
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command with inherited stdio, returning its exit code
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<i32, ModuleError>;

    /// Run a command capturing stdout (stderr stays inherited)
    async fn capture(
        &self,
        program: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ModuleError>;
}

/// A single parameter-level validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterError {
    /// Slash-separated path of the parameter inside its module settings
    pub path: String,
    pub message: String,
}

impl fmt::Display for ParameterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

fn join_parameter_errors(errors: &[ParameterError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Engine errors
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Module not installed: {0}")]
    ModuleNotInstalled(String),

    #[error("Malformed module descriptor {path}: {reason}")]
    DescriptorMalformed { path: String, reason: String },

    #[error("Unsafe path in module package: {0}")]
    UnsafePath(String),

    #[error("Module dependency missing: {0}")]
    DependencyMissing(String),

    #[error("Duplicate module: {0}")]
    DuplicateModule(String),

    #[error("Global adapter missing for module {0}")]
    GlobalAdapterMissing(String),

    #[error("Global adapter for module {module} unreachable: {reason}")]
    GlobalAdapterUnreachable { module: String, reason: String },

    #[error("Global adapter runtime file error for module {module}: {reason}")]
    GlobalAdapterRuntimeFileError { module: String, reason: String },

    #[error("Failed to load configuration for module {module}: {reason}")]
    ConfigurationLoadError { module: String, reason: String },

    #[error("Failed to parse settings {path}: {reason}")]
    SettingsParseError { path: String, reason: String },

    #[error("Failed to write settings {path}: {reason}")]
    SettingsWriteError { path: String, reason: String },

    #[error("Atomic settings commit failed: {0}")]
    AtomicCommitFailed(String),

    #[error("Invalid configuration metadata: {0}")]
    MetadataInvalid(String),

    #[error("Failed to render template {template}: {reason}")]
    TemplateRenderError { template: String, reason: String },

    #[error("Validation failed: {}", join_parameter_errors(.errors))]
    ValidationFailed { errors: Vec<ParameterError> },

    #[error("Adapter command {command} failed (exit code {exit_code}): {stderr}")]
    RpcFailed {
        command: String,
        exit_code: i64,
        stderr: String,
    },

    #[error("Adapter command {0} returned an empty response")]
    EmptyResponse(String),

    #[error("Adapter command {command} returned a bad response: {reason}")]
    BadResponse { command: String, reason: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Container gone: {0}")]
    ContainerGone(String),

    #[error("Compose {op} failed for project {project} (exit code {exit_code})")]
    ComposeFailed {
        op: String,
        project: String,
        exit_code: i32,
    },

    #[error("Invalid compose file {path}: {reason}")]
    ComposeFileInvalid { path: String, reason: String },

    #[error("Unknown service {service} in project {project}")]
    UnknownService { project: String, service: String },

    #[error("Permission denied: {path}: {reason}")]
    PermissionDenied { path: String, reason: String },

    #[error("Modules have not been loaded")]
    ModulesNotLoaded,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Timeout after {after:?} waiting for {operation}")]
    Timeout { operation: String, after: Duration },

    #[error("Container engine error: {0}")]
    Docker(String),

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl ModuleError {
    /// Wrap an I/O error, promoting permission problems to `PermissionDenied`
    pub fn io(path: impl AsRef<Path>, context: &str, source: std::io::Error) -> Self {
        let path = path.as_ref().display().to_string();
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            ModuleError::PermissionDenied {
                path,
                reason: format!("{}: {}", context, source),
            }
        } else {
            ModuleError::Io {
                context: format!("{} {}", context, path),
                source,
            }
        }
    }

    /// Whether the caller should retry with elevated privileges
    pub fn requires_elevation(&self) -> bool {
        matches!(self, ModuleError::PermissionDenied { .. })
    }
}

impl From<serde_json::Error> for ModuleError {
    fn from(e: serde_json::Error) -> Self {
        ModuleError::SerializationError(e.to_string())
    }
}

impl From<serde_yaml::Error> for ModuleError {
    fn from(e: serde_yaml::Error) -> Self {
        ModuleError::SerializationError(e.to_string())
    }
}

impl From<bollard::errors::Error> for ModuleError {
    fn from(e: bollard::errors::Error) -> Self {
        ModuleError::Docker(e.to_string())
    }
}
