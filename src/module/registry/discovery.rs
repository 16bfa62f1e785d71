//! Module discovery
//!
//! Scans the modules directory and records every installed module along
//! with whatever went wrong loading it. Broken modules never abort a scan.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::module::process::compose::parse_compose_file;
use crate::module::registry::descriptor::{ModuleDescriptor, ADAPTER_COMPOSE_FILE, DESCRIPTOR_FILE};
use crate::module::traits::{ContainerInfo, ContainerState, ModuleError, ModuleStatus};

/// An installed module as found on disk
#[derive(Debug)]
pub struct InstalledModule {
    /// Module directory under the modules root
    pub directory: PathBuf,
    pub descriptor_path: PathBuf,
    /// Generated global-adapter compose file
    pub global_adapter_file: PathBuf,
    /// Parsed descriptor (absent when it failed to load)
    pub descriptor: Option<ModuleDescriptor>,
    /// Global-adapter container name, from the compose file when it sets one
    pub adapter_container: Option<String>,
    /// First load error: descriptor, runtime file or duplicate FQMN
    pub error: Option<ModuleError>,
    /// Global-adapter container state
    pub adapter_state: ContainerState,
}

impl InstalledModule {
    /// Directory name, used to identify modules without a descriptor
    pub fn dir_name(&self) -> String {
        self.directory
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn fqmn(&self) -> Option<String> {
        self.descriptor.as_ref().map(ModuleDescriptor::fqmn)
    }

    /// FQMN when known, directory name otherwise
    pub fn label(&self) -> String {
        self.fqmn().unwrap_or_else(|| self.dir_name())
    }

    /// Classify from on-disk artifacts and container state alone
    ///
    /// `Healthy` here means the adapter is running; the coordinator demotes
    /// it if metadata cannot be fetched.
    pub fn status(&self) -> ModuleStatus {
        if self.error.is_some() || self.descriptor.is_none() {
            return ModuleStatus::Broken;
        }
        match self.adapter_state {
            ContainerState::Running => ModuleStatus::Healthy,
            ContainerState::Stopped | ContainerState::Missing => ModuleStatus::EligibleToStart,
        }
    }
}

/// Module discovery scanner
pub struct ModuleDiscovery {
    /// Base directory to scan for modules
    modules_dir: PathBuf,
    /// Root of the generated global-adapter compose files
    global_adapter_root: PathBuf,
}

impl ModuleDiscovery {
    /// Create a new module discovery scanner
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(modules_dir: P, global_adapter_root: Q) -> Self {
        Self {
            modules_dir: modules_dir.as_ref().to_path_buf(),
            global_adapter_root: global_adapter_root.as_ref().to_path_buf(),
        }
    }

    /// Discover all modules in the modules directory, sorted by directory name
    pub fn discover(&self) -> Result<Vec<InstalledModule>, ModuleError> {
        info!("Discovering modules in {:?}", self.modules_dir);

        if !self.modules_dir.exists() {
            debug!("Modules directory {:?} does not exist", self.modules_dir);
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.modules_dir)
            .map_err(|e| ModuleError::io(&self.modules_dir, "Failed to read modules directory", e))?;
        let mut directories = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| ModuleError::io(&self.modules_dir, "Failed to read entry", e))?;
            let path = entry.path();
            if entry.file_name().to_string_lossy().starts_with('.') {
                debug!("Skipping hidden directory {:?}", path);
                continue;
            }
            if path.is_dir() {
                directories.push(path);
            }
        }
        directories.sort();

        let mut modules = Vec::new();
        let mut seen = HashSet::new();
        for directory in directories {
            let Some(mut module) = self.load(&directory) else {
                continue;
            };
            if let Some(fqmn) = module.fqmn() {
                if !seen.insert(fqmn.clone()) && module.error.is_none() {
                    warn!("Module {} is installed more than once ({:?})", fqmn, directory);
                    module.error = Some(ModuleError::DuplicateModule(fqmn));
                }
            }
            modules.push(module);
        }

        info!("Discovered {} modules", modules.len());
        Ok(modules)
    }

    /// Load one module directory; `None` when it holds no descriptor
    fn load(&self, directory: &Path) -> Option<InstalledModule> {
        let descriptor_path = directory.join(DESCRIPTOR_FILE);
        if !descriptor_path.exists() {
            debug!("No {} found in {:?}, skipping", DESCRIPTOR_FILE, directory);
            return None;
        }

        let dir_name = directory
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut module = InstalledModule {
            directory: directory.to_path_buf(),
            descriptor_path: descriptor_path.clone(),
            global_adapter_file: self
                .global_adapter_root
                .join(&dir_name)
                .join(ADAPTER_COMPOSE_FILE),
            descriptor: None,
            adapter_container: None,
            error: None,
            adapter_state: ContainerState::Missing,
        };

        let descriptor = match ModuleDescriptor::from_file(&descriptor_path) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!("Failed to load descriptor in {:?}: {}", directory, e);
                module.error = Some(e);
                return Some(module);
            }
        };

        module.global_adapter_file = self
            .global_adapter_root
            .join(&descriptor.name)
            .join(ADAPTER_COMPOSE_FILE);
        match parse_compose_file(&module.global_adapter_file) {
            Ok(service) => {
                module.adapter_container = Some(
                    service
                        .container_name
                        .unwrap_or_else(|| descriptor.global_adapter_container()),
                );
            }
            Err(e) => {
                warn!(
                    "Global adapter file for {} is unusable: {}",
                    descriptor.fqmn(),
                    e
                );
                module.adapter_container = Some(descriptor.global_adapter_container());
                module.error = Some(ModuleError::GlobalAdapterRuntimeFileError {
                    module: descriptor.fqmn(),
                    reason: e.to_string(),
                });
            }
        }
        module.descriptor = Some(descriptor);
        Some(module)
    }
}

/// Record each module's global-adapter container state from a container listing
pub fn apply_container_states(modules: &mut [InstalledModule], containers: &[ContainerInfo]) {
    for module in modules.iter_mut() {
        module.adapter_state = module
            .adapter_container
            .as_deref()
            .and_then(|name| containers.iter().find(|c| c.name == name))
            .map(|c| c.state)
            .unwrap_or(ContainerState::Missing);
    }
}
