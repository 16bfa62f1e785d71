//! Flow results
//!
//! Lifecycle flows advance each module independently. Per-module failures
//! are collected here instead of aborting the flow.

use std::fmt;
use std::path::PathBuf;

use crate::module::registry::ModuleDescriptor;
use crate::module::traits::ModuleError;
use crate::settings::ConfigMetadata;
use crate::storage::CommitOutcome;

/// Step of a lifecycle flow a module failed at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStep {
    Restart,
    Deploy,
    SetSettings,
    Start,
    Stop,
    Down,
    Upgrade,
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowStep::Restart => "restart",
            FlowStep::Deploy => "deploy",
            FlowStep::SetSettings => "set-settings",
            FlowStep::Start => "start",
            FlowStep::Stop => "stop",
            FlowStep::Down => "down",
            FlowStep::Upgrade => "upgrade",
        };
        f.write_str(name)
    }
}

/// A module that failed one step of a flow
#[derive(Debug)]
pub struct ModuleFailure {
    pub fqmn: String,
    pub step: FlowStep,
    pub error: ModuleError,
}

impl fmt::Display for ModuleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.fqmn, self.step, self.error)
    }
}

/// Outcome of a lifecycle flow that completed its mandatory steps
#[derive(Debug, Default)]
pub struct FlowReport {
    /// Non-mandatory per-module failures
    pub failures: Vec<ModuleFailure>,
    /// Result of committing pending settings, when a commit happened
    pub commit: Option<CommitOutcome>,
}

impl FlowReport {
    pub fn record(&mut self, fqmn: &str, step: FlowStep, error: ModuleError) {
        self.failures.push(ModuleFailure {
            fqmn: fqmn.to_string(),
            step,
            error,
        });
    }

    /// No module failed
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// FQMNs that failed any step
    pub fn failed_modules(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.failures.iter().map(|f| f.fqmn.as_str()).collect();
        names.dedup();
        names
    }

    /// Human-readable warnings, one per failure
    pub fn warnings(&self) -> Vec<String> {
        self.failures.iter().map(ToString::to_string).collect()
    }
}

/// A module whose adapter is running and whose metadata was fetched
#[derive(Debug, Clone)]
pub struct HealthyModule {
    pub descriptor: ModuleDescriptor,
    /// Installed package directory
    pub directory: PathBuf,
    pub global_adapter_file: PathBuf,
    pub global_adapter_container: String,
    pub metadata: ConfigMetadata,
}

impl HealthyModule {
    pub fn fqmn(&self) -> String {
        self.descriptor.fqmn()
    }
}

/// A module that cannot be used, and why
#[derive(Debug)]
pub struct BrokenModule {
    /// FQMN when the descriptor loaded, directory name otherwise
    pub label: String,
    pub directory: PathBuf,
    pub descriptor: Option<ModuleDescriptor>,
    pub error: ModuleError,
}

/// Result of `load_modules`; every discovered module is in exactly one list
#[derive(Debug, Default)]
pub struct LoadedModules {
    /// Healthy modules in dependency order
    pub healthy: Vec<HealthyModule>,
    pub broken: Vec<BrokenModule>,
}

impl LoadedModules {
    pub fn healthy(&self, fqmn: &str) -> Option<&HealthyModule> {
        self.healthy.iter().find(|m| m.descriptor.fqmn() == fqmn)
    }

    pub fn broken(&self, label: &str) -> Option<&BrokenModule> {
        self.broken.iter().find(|m| m.label == label)
    }

    /// Every installed module with a readable descriptor
    pub fn descriptors(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.healthy
            .iter()
            .map(|m| &m.descriptor)
            .chain(self.broken.iter().filter_map(|m| m.descriptor.as_ref()))
    }
}
