//! Hyperdrive settings envelope
//!
//! The root settings document: Hyperdrive's own base parameters plus one
//! `ModuleInstance` per module keyed by FQMN.

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::OnceLock;

use super::instance::ConfigInstance;
use super::metadata::ConfigMetadata;
use crate::config::{HyperdriveConfig, HYPERDRIVE_NAMESPACE};
use crate::module::traits::ParameterError;

/// Version of the engine written into new settings files
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Logging settings passed to Hyperdrive's containers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub add_source: bool,
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    #[serde(default = "default_max_backups")]
    pub max_backups: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "logfmt".to_string()
}

fn default_max_size() -> u64 {
    20
}

fn default_max_backups() -> u64 {
    3
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            add_source: false,
            max_size: default_max_size(),
            max_backups: default_max_backups(),
        }
    }
}

/// One module's entry in the settings document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModuleInstance {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub settings: Map<String, Value>,
    /// Services to restart on the next apply; cleared after commit
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restart: Vec<String>,
}

impl ModuleInstance {
    /// Disabled instance holding the metadata's literal defaults
    pub fn with_defaults(version: &str, metadata: &ConfigMetadata) -> Self {
        Self {
            enabled: false,
            version: version.to_string(),
            settings: ConfigInstance::create_defaults(metadata).to_map(),
            restart: Vec::new(),
        }
    }
}

/// Root settings document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HyperdriveSettings {
    pub version: String,
    pub project_name: String,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default, rename = "enableIPv6")]
    pub enable_ipv6: bool,
    pub user_data_path: PathBuf,
    /// Comma-separated list of extra networks joined by every container
    #[serde(default)]
    pub additional_docker_networks: String,
    /// Seconds
    #[serde(default = "default_client_timeout")]
    pub client_timeout: u64,
    #[serde(default = "default_container_tag")]
    pub container_tag: String,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub modules: IndexMap<String, ModuleInstance>,
}

fn default_api_port() -> u16 {
    8080
}

fn default_client_timeout() -> u64 {
    30
}

fn default_container_tag() -> String {
    "latest".to_string()
}

fn project_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9_-]{0,62}$").unwrap_or_else(|e| unreachable!("{}", e))
    })
}

impl HyperdriveSettings {
    /// Compose project for one module under this user's project
    pub fn module_project_name(&self, shortcut: &str) -> String {
        module_project_name(&self.project_name, shortcut)
    }

    /// Enabled module instances in file order
    pub fn enabled_modules(&self) -> impl Iterator<Item = (&String, &ModuleInstance)> {
        self.modules.iter().filter(|(_, instance)| instance.enabled)
    }

    /// Check the base parameters
    pub fn validate_base(&self) -> Vec<ParameterError> {
        let mut errors = Vec::new();
        let mut fail = |field: &str, message: String| {
            errors.push(ParameterError {
                path: format!("{}:{}", HYPERDRIVE_NAMESPACE, field),
                message,
            })
        };
        if !project_name_pattern().is_match(&self.project_name) {
            fail(
                "projectName",
                format!("{:?} is not a valid compose project name", self.project_name),
            );
        }
        if self.api_port == 0 {
            fail("apiPort", "must be greater than zero".to_string());
        }
        if self.user_data_path.as_os_str().is_empty() {
            fail("userDataPath", "cannot be empty".to_string());
        }
        if self.client_timeout == 0 {
            fail("clientTimeout", "must be greater than zero".to_string());
        }
        if semver::Version::parse(&self.version).is_err() {
            fail("version", format!("{:?} is not a semantic version", self.version));
        }
        errors
    }

    /// Clear every module's restart list
    pub fn clear_restart_lists(&mut self) {
        for instance in self.modules.values_mut() {
            instance.restart.clear();
        }
    }
}

/// Compose project name for a module: `<project>-<shortcut>`
pub fn module_project_name(project_name: &str, shortcut: &str) -> String {
    format!("{}-{}", project_name, shortcut)
}

/// What the factory needs to know about a module
#[derive(Debug, Clone, Copy)]
pub struct ModuleDefaults<'a> {
    pub fqmn: &'a str,
    pub version: &'a str,
    pub metadata: &'a ConfigMetadata,
}

/// Builds fresh settings documents
#[derive(Debug, Clone)]
pub struct SettingsFactory {
    project_name: String,
    user_data_path: PathBuf,
}

impl SettingsFactory {
    pub fn new(config: &HyperdriveConfig) -> Self {
        Self {
            project_name: config.default_project_name.clone(),
            user_data_path: config.user_dir.join("data"),
        }
    }

    /// Fresh settings with a disabled default instance per module
    pub fn create(&self, modules: &[ModuleDefaults<'_>]) -> HyperdriveSettings {
        let mut settings = HyperdriveSettings {
            version: ENGINE_VERSION.to_string(),
            project_name: self.project_name.clone(),
            api_port: default_api_port(),
            enable_ipv6: false,
            user_data_path: self.user_data_path.clone(),
            additional_docker_networks: String::new(),
            client_timeout: default_client_timeout(),
            container_tag: default_container_tag(),
            logging: LoggingSettings::default(),
            modules: IndexMap::new(),
        };
        self.backfill(&mut settings, modules);
        settings
    }

    /// Add default instances for modules the settings do not mention yet;
    /// returns the FQMNs that were added
    pub fn backfill(
        &self,
        settings: &mut HyperdriveSettings,
        modules: &[ModuleDefaults<'_>],
    ) -> Vec<String> {
        let mut added = Vec::new();
        for module in modules {
            if settings.modules.contains_key(module.fqmn) {
                continue;
            }
            settings.modules.insert(
                module.fqmn.to_string(),
                ModuleInstance::with_defaults(module.version, module.metadata),
            );
            added.push(module.fqmn.to_string());
        }
        added
    }
}
