//! Deployment rendering
//!
//! Materializes everything compose needs for a user's project: the runtime
//! directory, copied overrides, base container files, and for each module
//! its directories, adapter key, project adapter file and service files.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::HyperdriveConfig;
use crate::module::ipc::AdapterKey;
use crate::module::registry::descriptor::{ADAPTER_TEMPLATE, SERVICE_TEMPLATES_DIR};
use crate::module::registry::ModuleDescriptor;
use crate::module::traits::ModuleError;
use crate::settings::SettingsSnapshot;
use crate::template::{
    AdapterDataSource, BaseDataSource, ProjectAdapterPaths, ServiceDataSource, Template,
};
use crate::utils::fs::{
    copy_dir_no_overwrite, ensure_dir, recreate_dir, write_file, DIR_MODE, FILE_MODE,
    SECRET_DIR_MODE,
};

/// Hyperdrive's own containers, rendered from `<system>/templates/<name>.tmpl`
///
/// None are defined at the moment; the pipeline still runs.
pub const BASE_CONTAINERS: &[&str] = &[];

/// Directories created for every deployed module
pub const MODULE_SUBDIRS: [&str; 5] = ["config", "logs", "compose", "override", "metrics"];

/// Directory and file name of a module's adapter key
pub const MODULE_SECRETS_DIR: &str = "secrets";
pub const ADAPTER_KEY_FILE: &str = "adapter.key";

const TEMPLATE_EXTENSION: &str = "tmpl";

/// Files rendered for one module
#[derive(Debug, Clone)]
pub struct ModuleDeployment {
    pub paths: ProjectAdapterPaths,
    /// Project adapter compose file (part of the user's project)
    pub adapter_file: PathBuf,
    /// Service compose files (part of the module's own project)
    pub service_files: Vec<PathBuf>,
}

/// Renders deployment artifacts under the user directory
#[derive(Debug, Clone)]
pub struct DeploymentRenderer {
    system_templates_dir: PathBuf,
    system_override_dir: PathBuf,
    user_dir: PathBuf,
}

/// Drop top-level `version:` stanzas that current compose rejects
pub fn strip_compose_version(contents: &str) -> String {
    let mut out = String::with_capacity(contents.len());
    for line in contents.split_inclusive('\n') {
        if line.starts_with("version:") {
            continue;
        }
        out.push_str(line);
    }
    out
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    )
}

impl DeploymentRenderer {
    pub fn new(config: &HyperdriveConfig) -> Self {
        Self {
            system_templates_dir: config.system_templates_dir(),
            system_override_dir: config.system_override_dir(),
            user_dir: config.user_dir.clone(),
        }
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.user_dir.join("runtime")
    }

    pub fn override_dir(&self) -> PathBuf {
        self.user_dir.join("override")
    }

    /// `<user>/modules/<name>`
    pub fn module_dir(&self, descriptor: &ModuleDescriptor) -> PathBuf {
        self.user_dir.join("modules").join(&descriptor.name)
    }

    /// Host paths handed to a module's project adapter
    pub fn module_paths(&self, descriptor: &ModuleDescriptor, project_name: &str) -> ProjectAdapterPaths {
        let module_dir = self.module_dir(descriptor);
        ProjectAdapterPaths {
            config_dir: module_dir.join("config"),
            log_dir: module_dir.join("logs"),
            compose_dir: module_dir.join("compose"),
            override_dir: module_dir.join("override"),
            metrics_dir: module_dir.join("metrics"),
            key_file: module_dir.join(MODULE_SECRETS_DIR).join(ADAPTER_KEY_FILE),
            network: descriptor.module_network(project_name),
            compose_project: descriptor.module_project(project_name),
            module_dir,
        }
    }

    /// Clear the runtime directory and copy system overrides into the user
    /// override directory without overwriting anything
    pub fn prepare_runtime(&self) -> Result<(), ModuleError> {
        recreate_dir(&self.runtime_dir(), DIR_MODE)?;
        let copied = copy_dir_no_overwrite(&self.system_override_dir, &self.override_dir())?;
        for file in copied.iter().filter(|f| is_yaml(f)) {
            let contents = fs::read_to_string(file)
                .map_err(|e| ModuleError::io(file, "Failed to read override", e))?;
            let stripped = strip_compose_version(&contents);
            if stripped != contents {
                debug!("Removed version stanza from {:?}", file);
                write_file(file, stripped.as_bytes(), FILE_MODE)?;
            }
        }
        Ok(())
    }

    /// Render the base container templates into the runtime directory
    pub fn render_base(
        &self,
        snapshot: &SettingsSnapshot,
        project_name: &str,
    ) -> Result<Vec<PathBuf>, ModuleError> {
        let runtime_dir = self.runtime_dir();
        let data = BaseDataSource {
            snapshot,
            project_name: project_name.to_string(),
            runtime_dir: runtime_dir.clone(),
        };
        let mut files = Vec::with_capacity(BASE_CONTAINERS.len());
        for name in BASE_CONTAINERS {
            let source = self
                .system_templates_dir
                .join(format!("{}.{}", name, TEMPLATE_EXTENSION));
            let dest = runtime_dir.join(format!("{}.yml", name));
            Template::from_file(&source)?.render_to_file(&data, &dest)?;
            files.push(dest);
        }
        Ok(files)
    }

    /// Create a module's directories and adapter key
    pub fn prepare_module(
        &self,
        descriptor: &ModuleDescriptor,
        project_name: &str,
    ) -> Result<ProjectAdapterPaths, ModuleError> {
        let paths = self.module_paths(descriptor, project_name);
        ensure_dir(&paths.module_dir, DIR_MODE)?;
        for sub in MODULE_SUBDIRS {
            ensure_dir(&paths.module_dir.join(sub), DIR_MODE)?;
        }
        ensure_dir(&paths.module_dir.join(MODULE_SECRETS_DIR), SECRET_DIR_MODE)?;
        AdapterKey::load_or_create(&paths.key_file)?;
        Ok(paths)
    }

    /// Render `adapter.tmpl` in project mode into the runtime directory
    pub fn render_project_adapter(
        &self,
        package_dir: &Path,
        descriptor: &ModuleDescriptor,
        paths: &ProjectAdapterPaths,
        project_name: &str,
    ) -> Result<PathBuf, ModuleError> {
        let runtime_dir = self.runtime_dir();
        ensure_dir(&runtime_dir, DIR_MODE)?;
        let dest = runtime_dir.join(format!("{}_adapter.yml", descriptor.name));
        let data = AdapterDataSource::project(
            &descriptor.project_adapter_container(project_name),
            paths.clone(),
        );
        Template::from_file(&package_dir.join(ADAPTER_TEMPLATE))?.render_to_file(&data, &dest)?;
        Ok(dest)
    }

    /// Render every `templates/*.tmpl` of a module into its compose directory
    pub fn render_services(
        &self,
        package_dir: &Path,
        descriptor: &ModuleDescriptor,
        paths: &ProjectAdapterPaths,
        snapshot: &SettingsSnapshot,
        project_name: &str,
    ) -> Result<Vec<PathBuf>, ModuleError> {
        recreate_dir(&paths.compose_dir, DIR_MODE)?;
        let templates_dir = package_dir.join(SERVICE_TEMPLATES_DIR);
        if !templates_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut sources = Vec::new();
        let entries = fs::read_dir(&templates_dir)
            .map_err(|e| ModuleError::io(&templates_dir, "Failed to read templates", e))?;
        for entry in entries {
            let path = entry
                .map_err(|e| ModuleError::io(&templates_dir, "Failed to read templates", e))?
                .path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(TEMPLATE_EXTENSION) {
                sources.push(path);
            }
        }
        sources.sort();

        let data = ServiceDataSource {
            snapshot,
            fqmn: descriptor.fqmn(),
            project_name: project_name.to_string(),
            adapter: paths.clone(),
        };
        let mut files = Vec::with_capacity(sources.len());
        for source in sources {
            let stem = source
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let dest = paths.compose_dir.join(format!("{}.yml", stem));
            Template::from_file(&source)?.render_to_file(&data, &dest)?;
            files.push(dest);
        }
        Ok(files)
    }

    /// Directories, key, adapter file and service files for one module
    pub fn deploy_module(
        &self,
        package_dir: &Path,
        descriptor: &ModuleDescriptor,
        snapshot: &SettingsSnapshot,
        project_name: &str,
    ) -> Result<ModuleDeployment, ModuleError> {
        let paths = self.prepare_module(descriptor, project_name)?;
        let adapter_file = self.render_project_adapter(package_dir, descriptor, &paths, project_name)?;
        let service_files =
            self.render_services(package_dir, descriptor, &paths, snapshot, project_name)?;
        info!(
            "Deployed {} ({} service files)",
            descriptor.fqmn(),
            service_files.len()
        );
        Ok(ModuleDeployment {
            paths,
            adapter_file,
            service_files,
        })
    }
}
