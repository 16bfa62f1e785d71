//! Engine configuration
//!
//! `HyperdriveConfig` is passed explicitly into every constructor. It can be
//! loaded from a JSON or TOML file and overridden by environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::env::{env_int, env_opt, env_words};

/// Compose project that hosts every module's global adapter
pub const GLOBAL_ADAPTER_PROJECT: &str = "hd-global-adapter";

/// Settings namespace for Hyperdrive's own parameters in template paths
pub const HYPERDRIVE_NAMESPACE: &str = "hd";

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Log filter (e.g. "info", "hyperdrive::management=debug").
    /// RUST_LOG takes precedence when set.
    #[serde(default)]
    pub filter: Option<String>,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json_format: bool,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HyperdriveConfig {
    /// System directory (installed modules, templates, overrides)
    #[serde(default = "default_system_dir")]
    pub system_dir: PathBuf,

    /// User directory (settings, runtime files, module data)
    #[serde(default = "default_user_dir")]
    pub user_dir: PathBuf,

    /// Root for generated global-adapter compose files
    /// (defaults to `<system_dir>/global-adapter`)
    #[serde(default)]
    pub global_adapter_dir: Option<PathBuf>,

    /// Compose command line prefix
    #[serde(default = "default_compose_command")]
    pub compose_command: Vec<String>,

    /// Adapter RPC timeout in seconds (interactive `run` never times out)
    #[serde(default = "default_adapter_timeout_secs")]
    pub adapter_timeout_secs: u64,

    /// Compose command timeout in seconds (none by default)
    #[serde(default)]
    pub compose_timeout_secs: Option<u64>,

    /// Docker daemon socket; local defaults when unset
    #[serde(default)]
    pub docker_socket: Option<String>,

    /// Project name used when creating fresh settings
    #[serde(default = "default_project_name")]
    pub default_project_name: String,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_system_dir() -> PathBuf {
    PathBuf::from("/usr/share/hyperdrive")
}

fn default_user_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".hyperdrive"))
        .unwrap_or_else(|| PathBuf::from(".hyperdrive"))
}

fn default_compose_command() -> Vec<String> {
    vec!["docker".to_string(), "compose".to_string()]
}

fn default_adapter_timeout_secs() -> u64 {
    30
}

fn default_project_name() -> String {
    "hyperdrive".to_string()
}

impl Default for HyperdriveConfig {
    fn default() -> Self {
        Self {
            system_dir: default_system_dir(),
            user_dir: default_user_dir(),
            global_adapter_dir: None,
            compose_command: default_compose_command(),
            adapter_timeout_secs: default_adapter_timeout_secs(),
            compose_timeout_secs: None,
            docker_socket: None,
            default_project_name: default_project_name(),
            logging: LoggingConfig::default(),
        }
    }
}

impl HyperdriveConfig {
    /// Configuration rooted at explicit system and user directories
    pub fn with_dirs<P: AsRef<Path>, Q: AsRef<Path>>(system_dir: P, user_dir: Q) -> Self {
        Self {
            system_dir: system_dir.as_ref().to_path_buf(),
            user_dir: user_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Load configuration from a JSON or TOML file (chosen by extension)
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: HyperdriveConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&contents)?,
            _ => serde_json::from_str(&contents)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_json_file(&self, path: &Path) -> anyhow::Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply environment variable overrides
    ///
    /// `HD_SYSTEM_DIR`, `HD_USER_DIR`, `HD_COMPOSE_COMMAND` (whitespace
    /// separated) and `HD_ADAPTER_TIMEOUT` (seconds).
    pub fn apply_env_overrides(mut self) -> Self {
        if let Some(dir) = env_opt("HD_SYSTEM_DIR") {
            self.system_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_opt("HD_USER_DIR") {
            self.user_dir = PathBuf::from(dir);
        }
        if let Some(command) = env_words("HD_COMPOSE_COMMAND") {
            self.compose_command = command;
        }
        if let Some(secs) = env_int::<u64>("HD_ADAPTER_TIMEOUT") {
            self.adapter_timeout_secs = secs;
        }
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.system_dir.as_os_str().is_empty() {
            anyhow::bail!("system_dir cannot be empty");
        }
        if self.user_dir.as_os_str().is_empty() {
            anyhow::bail!("user_dir cannot be empty");
        }
        if self.compose_command.is_empty() || self.compose_command[0].is_empty() {
            anyhow::bail!("compose_command cannot be empty");
        }
        if self.adapter_timeout_secs == 0 {
            anyhow::bail!("adapter_timeout_secs must be greater than zero");
        }
        if self.default_project_name.is_empty() {
            anyhow::bail!("default_project_name cannot be empty");
        }
        Ok(())
    }

    /// Directory holding installed module packages
    pub fn modules_dir(&self) -> PathBuf {
        self.system_dir.join("modules")
    }

    /// Root directory for generated global-adapter compose files
    pub fn global_adapter_root(&self) -> PathBuf {
        self.global_adapter_dir
            .clone()
            .unwrap_or_else(|| self.system_dir.join("global-adapter"))
    }

    /// Hyperdrive base container templates
    pub fn system_templates_dir(&self) -> PathBuf {
        self.system_dir.join("templates")
    }

    /// System-provided compose overrides
    pub fn system_override_dir(&self) -> PathBuf {
        self.system_dir.join("override")
    }

    /// Adapter RPC timeout
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }

    /// Compose command timeout, if any
    pub fn compose_timeout(&self) -> Option<Duration> {
        self.compose_timeout_secs.map(Duration::from_secs)
    }
}
