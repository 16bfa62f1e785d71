//! Data sources templates are rendered against

use std::path::{Path, PathBuf};

use super::eval::TemplateData;
use super::value::TemplateValue;
use crate::config::HYPERDRIVE_NAMESPACE;
use crate::settings::SettingsSnapshot;

/// Which adapter flavour a compose file is rendered for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterMode {
    /// Shared, read-only metadata adapter
    Global,
    /// Authenticated adapter inside a user's project
    Project,
}

impl AdapterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterMode::Global => "global",
            AdapterMode::Project => "project",
        }
    }
}

/// In-container mount points handed to a project adapter
pub const ADAPTER_CONFIG_MOUNT: &str = "/hd/config";
pub const ADAPTER_LOG_MOUNT: &str = "/hd/logs";
pub const ADAPTER_COMPOSE_MOUNT: &str = "/hd/compose";
pub const ADAPTER_KEY_MOUNT: &str = "/hd/secrets/adapter.key";

/// Host paths and names available to a project-mode adapter template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectAdapterPaths {
    pub module_dir: PathBuf,
    pub config_dir: PathBuf,
    pub log_dir: PathBuf,
    pub compose_dir: PathBuf,
    pub override_dir: PathBuf,
    pub metrics_dir: PathBuf,
    pub key_file: PathBuf,
    pub network: String,
    pub compose_project: String,
}

/// Data for rendering a module's `adapter.tmpl`
#[derive(Debug, Clone)]
pub struct AdapterDataSource {
    pub container_name: String,
    pub mode: AdapterMode,
    pub project: Option<ProjectAdapterPaths>,
}

impl AdapterDataSource {
    /// Global mode: no per-project values
    pub fn global(container_name: &str) -> Self {
        Self {
            container_name: container_name.to_string(),
            mode: AdapterMode::Global,
            project: None,
        }
    }

    /// Project mode
    pub fn project(container_name: &str, paths: ProjectAdapterPaths) -> Self {
        Self {
            container_name: container_name.to_string(),
            mode: AdapterMode::Project,
            project: Some(paths),
        }
    }

    /// Environment passed to the adapter container
    pub fn environment_variables(&self) -> Vec<String> {
        let mut vars = vec![format!("HD_ADAPTER_MODE={}", self.mode.as_str())];
        if let Some(paths) = &self.project {
            vars.push(format!("HD_CONFIG_DIR={}", ADAPTER_CONFIG_MOUNT));
            vars.push(format!("HD_LOG_DIR={}", ADAPTER_LOG_MOUNT));
            vars.push(format!("HD_KEY_FILE={}", ADAPTER_KEY_MOUNT));
            vars.push(format!("HD_COMPOSE_DIR={}", ADAPTER_COMPOSE_MOUNT));
            vars.push(format!("HD_COMPOSE_PROJECT={}", paths.compose_project));
        }
        vars
    }

    /// Volume mounts for the adapter container
    pub fn volumes(&self) -> Vec<String> {
        match &self.project {
            None => Vec::new(),
            Some(paths) => vec![
                format!("{}:{}", paths.config_dir.display(), ADAPTER_CONFIG_MOUNT),
                format!("{}:{}", paths.log_dir.display(), ADAPTER_LOG_MOUNT),
                format!("{}:{}", paths.compose_dir.display(), ADAPTER_COMPOSE_MOUNT),
                format!("{}:{}:ro", paths.key_file.display(), ADAPTER_KEY_MOUNT),
            ],
        }
    }
}

fn path_value(path: &Path) -> TemplateValue {
    TemplateValue::String(path.display().to_string())
}

fn no_arguments(name: &str, args: &[TemplateValue]) -> Result<(), String> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(format!("{} takes no arguments", name))
    }
}

impl TemplateData for AdapterDataSource {
    fn lookup(&self, name: &str, args: &[TemplateValue]) -> Result<TemplateValue, String> {
        no_arguments(name, args)?;
        match name {
            "AdapterContainerName" => return Ok(self.container_name.as_str().into()),
            "AdapterEnvironmentVariables" => return Ok(self.environment_variables().into()),
            "AdapterVolumes" => return Ok(self.volumes().into()),
            "AdapterMode" => return Ok(self.mode.as_str().into()),
            _ => {}
        }

        let paths = self
            .project
            .as_ref()
            .ok_or_else(|| format!("{} is not available in global mode", name))?;
        Ok(match name {
            "ModuleDir" => path_value(&paths.module_dir),
            "ModuleConfigDir" => path_value(&paths.config_dir),
            "ModuleLogDir" => path_value(&paths.log_dir),
            "ModuleComposeDir" => path_value(&paths.compose_dir),
            "ModuleOverrideDir" => path_value(&paths.override_dir),
            "ModuleMetricsDir" => path_value(&paths.metrics_dir),
            "AdapterKeyFile" => path_value(&paths.key_file),
            "ModuleNetwork" => paths.network.as_str().into(),
            "ModuleComposeProject" => paths.compose_project.as_str().into(),
            _ => return Err(format!("can't evaluate field {}", name)),
        })
    }
}

fn string_arg<'a>(name: &str, args: &'a [TemplateValue], index: usize) -> Result<&'a str, String> {
    match args.get(index) {
        Some(TemplateValue::String(s)) => Ok(s),
        Some(other) => Err(format!(
            "{} argument {} must be a string, got {}",
            name,
            index + 1,
            other.kind()
        )),
        None => Err(format!("{} is missing argument {}", name, index + 1)),
    }
}

/// `GetValue` / `GetValueArray` against a settings snapshot
fn settings_method(
    snapshot: &SettingsSnapshot,
    fqmn: &str,
    name: &str,
    args: &[TemplateValue],
) -> Option<Result<TemplateValue, String>> {
    let result = match name {
        "GetValue" => string_arg(name, args, 0)
            .and_then(|path| snapshot.lookup(fqmn, path))
            .map(TemplateValue::from),
        "GetValueArray" => string_arg(name, args, 0).and_then(|path| {
            let separator = string_arg(name, args, 1)?;
            let value = snapshot.lookup(fqmn, path)?;
            Ok(match value {
                serde_json::Value::Array(_) => TemplateValue::from(value),
                other => {
                    let text = match other {
                        serde_json::Value::String(s) => s.clone(),
                        serde_json::Value::Null => String::new(),
                        v => v.to_string(),
                    };
                    TemplateValue::List(
                        text.split(separator)
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(TemplateValue::from)
                            .collect(),
                    )
                }
            })
        }),
        _ => return None,
    };
    Some(result)
}

/// Data for rendering a module's per-service templates
#[derive(Debug, Clone)]
pub struct ServiceDataSource<'a> {
    pub snapshot: &'a SettingsSnapshot,
    pub fqmn: String,
    pub project_name: String,
    pub adapter: ProjectAdapterPaths,
}

impl TemplateData for ServiceDataSource<'_> {
    fn lookup(&self, name: &str, args: &[TemplateValue]) -> Result<TemplateValue, String> {
        if let Some(result) = settings_method(self.snapshot, &self.fqmn, name, args) {
            return result;
        }
        no_arguments(name, args)?;
        let paths = &self.adapter;
        Ok(match name {
            "ProjectName" => self.project_name.as_str().into(),
            "ModuleDir" => path_value(&paths.module_dir),
            "ModuleConfigDir" => path_value(&paths.config_dir),
            "ModuleLogDir" => path_value(&paths.log_dir),
            "ModuleComposeDir" => path_value(&paths.compose_dir),
            "ModuleOverrideDir" => path_value(&paths.override_dir),
            "ModuleMetricsDir" => path_value(&paths.metrics_dir),
            "ModuleNetwork" => paths.network.as_str().into(),
            "ModuleComposeProject" => paths.compose_project.as_str().into(),
            _ => return Err(format!("can't evaluate field {}", name)),
        })
    }
}

/// Data for rendering Hyperdrive's own base container templates
#[derive(Debug, Clone)]
pub struct BaseDataSource<'a> {
    pub snapshot: &'a SettingsSnapshot,
    pub project_name: String,
    pub runtime_dir: PathBuf,
}

impl TemplateData for BaseDataSource<'_> {
    fn lookup(&self, name: &str, args: &[TemplateValue]) -> Result<TemplateValue, String> {
        if let Some(result) = settings_method(self.snapshot, HYPERDRIVE_NAMESPACE, name, args) {
            return result;
        }
        no_arguments(name, args)?;
        match name {
            "ProjectName" => Ok(self.project_name.as_str().into()),
            "RuntimeDir" => Ok(path_value(&self.runtime_dir)),
            _ => Err(format!("can't evaluate field {}", name)),
        }
    }
}

/// Data for resolving a dynamic metadata property
#[derive(Debug, Clone)]
pub struct PropertyDataSource<'a> {
    pub snapshot: &'a SettingsSnapshot,
    pub fqmn: &'a str,
    /// Literal default of the property being resolved
    pub default: TemplateValue,
}

impl TemplateData for PropertyDataSource<'_> {
    fn lookup(&self, name: &str, args: &[TemplateValue]) -> Result<TemplateValue, String> {
        if let Some(result) = settings_method(self.snapshot, self.fqmn, name, args) {
            return result;
        }
        match name {
            "UseDefault" => {
                no_arguments(name, args)?;
                Ok(self.default.clone())
            }
            _ => Err(format!("can't evaluate field {}", name)),
        }
    }
}
