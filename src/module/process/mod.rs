//! Subprocess management
//!
//! Runs the external compose tool on behalf of the lifecycle coordinator.

pub mod compose;
pub mod runner;

pub use compose::{parse_compose_file, ComposeOrchestrator, ComposeService};
pub use runner::ProcessRunner;
