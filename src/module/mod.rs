//! Module system
//!
//! Everything the engine knows about modules: the registry of installed
//! packages, the adapter RPC layer, and the compose subprocess layer.
//!
//! ## Architecture
//!
//! - **Registry**: descriptors, discovery, installation, dependency order
//! - **IPC**: authenticated exec-based RPC to adapter containers
//! - **Process**: compose orchestration through a subprocess runner
//! - **Traits**: error taxonomy and the container/subprocess seams

pub mod ipc;
pub mod process;
pub mod registry;
pub mod traits;
pub mod validation;

pub use traits::{
    CommandOutput, CommandRunner, ContainerInfo, ContainerState, ContainerTransport, ExecOutput,
    InteractiveIo, ModuleError, ModuleStatus, ParameterError,
};
