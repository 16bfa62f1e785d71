//! Module descriptor parsing
//!
//! Handles parsing `descriptor.json` and naming the resources derived from it.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::GLOBAL_ADAPTER_PROJECT;
use crate::module::registry::dependencies::DependencySpec;
use crate::module::traits::ModuleError;
use crate::module::validation::{DescriptorValidator, ValidationResult};

/// Descriptor file at the top of every module package
pub const DESCRIPTOR_FILE: &str = "descriptor.json";
/// Adapter compose template at the top of every module package
pub const ADAPTER_TEMPLATE: &str = "adapter.tmpl";
/// Directory holding per-service compose templates
pub const SERVICE_TEMPLATES_DIR: &str = "templates";
/// Name of a generated adapter compose file
pub const ADAPTER_COMPOSE_FILE: &str = "adapter.yml";

/// Module descriptor (descriptor.json structure)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Module name
    pub name: String,
    /// Short alias used in compose project and container names
    pub shortcut: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Module version (semantic versioning)
    pub version: String,
    /// Module author
    pub author: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub email: String,
    /// Required modules: `author/name [op version]`
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl ModuleDescriptor {
    /// Parse and validate descriptor bytes; `origin` names the source in errors
    pub fn from_slice(bytes: &[u8], origin: &str) -> Result<Self, ModuleError> {
        let descriptor: ModuleDescriptor =
            serde_json::from_slice(bytes).map_err(|e| ModuleError::DescriptorMalformed {
                path: origin.to_string(),
                reason: e.to_string(),
            })?;

        match DescriptorValidator::new().validate(&descriptor) {
            ValidationResult::Valid => Ok(descriptor),
            ValidationResult::Invalid(errors) => Err(ModuleError::DescriptorMalformed {
                path: origin.to_string(),
                reason: errors.join("; "),
            }),
        }
    }

    /// Load descriptor from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ModuleError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| ModuleError::io(path, "Failed to read descriptor", e))?;
        Self::from_slice(&bytes, &path.display().to_string())
    }

    /// Fully-qualified module name: `author/name`
    pub fn fqmn(&self) -> String {
        format!("{}/{}", self.author, self.name)
    }

    /// Parsed version; descriptors are validated on load so this only
    /// fails for hand-built values
    pub fn semver(&self) -> Result<semver::Version, ModuleError> {
        semver::Version::parse(&self.version).map_err(|e| ModuleError::DescriptorMalformed {
            path: self.fqmn(),
            reason: format!("invalid version {:?}: {}", self.version, e),
        })
    }

    /// Parsed dependency list
    pub fn dependency_specs(&self) -> Result<Vec<DependencySpec>, ModuleError> {
        self.dependencies
            .iter()
            .map(|raw| {
                raw.parse::<DependencySpec>()
                    .map_err(|reason| ModuleError::DescriptorMalformed {
                        path: self.fqmn(),
                        reason,
                    })
            })
            .collect()
    }

    /// Container name of this module's global adapter
    pub fn global_adapter_container(&self) -> String {
        format!("{}-{}", GLOBAL_ADAPTER_PROJECT, self.name)
    }

    /// Container name of this module's adapter inside a user project
    pub fn project_adapter_container(&self, project_name: &str) -> String {
        format!("{}-{}_adapter", project_name, self.shortcut)
    }

    /// Compose project holding this module's services
    pub fn module_project(&self, project_name: &str) -> String {
        crate::settings::module_project_name(project_name, &self.shortcut)
    }

    /// Per-module network inside a user project
    pub fn module_network(&self, project_name: &str) -> String {
        format!("{}_net", self.module_project(project_name))
    }
}
