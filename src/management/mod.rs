//! Lifecycle management
//!
//! The coordinator that drives module loading, settings commits and the
//! start/stop/down/upgrade flows, plus the rendering and restart planning it
//! relies on.

pub mod deploy;
pub mod manager;
pub mod report;
pub mod restart;

pub use deploy::{strip_compose_version, DeploymentRenderer, ModuleDeployment, BASE_CONTAINERS};
pub use manager::HyperdriveManager;
pub use report::{BrokenModule, FlowReport, FlowStep, HealthyModule, LoadedModules, ModuleFailure};
pub use restart::{plan_restart, RestartPlan};
