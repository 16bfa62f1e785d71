//! Module registry
//!
//! Descriptor parsing, package installation, discovery of installed modules
//! and dependency resolution.

pub mod dependencies;
pub mod descriptor;
pub mod discovery;
pub mod installer;

pub use dependencies::{DependencyResolution, DependencySpec, ModuleDependencies, VersionOp};
pub use descriptor::ModuleDescriptor;
pub use discovery::{apply_container_states, InstalledModule, ModuleDiscovery};
pub use installer::ModuleInstaller;
