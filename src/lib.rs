//! Hyperdrive - module lifecycle and configuration engine
//!
//! Installs third-party service modules, talks to each module's adapter
//! container over an authenticated exec-based RPC, keeps the user's settings
//! in a pending/current pair with atomic commit, renders compose files from
//! templates and drives `docker compose` through the start, stop, down and
//! upgrade flows.
//!
//! ## Layers
//!
//! 1. **settings**: metadata, typed instances, validation, diffs, the settings document
//! 2. **template**: the compose/property template dialect
//! 3. **storage**: pending/current settings files and backups
//! 4. **module**: registry, adapter RPC, compose subprocesses
//! 5. **management**: the lifecycle coordinator
//!
//! ## Design Principles
//!
//! 1. **Adapters own module semantics**: the engine never interprets module settings beyond metadata
//! 2. **Per-module isolation**: one broken module never blocks the others
//! 3. **Crash-safe settings**: the current file is only ever replaced by rename

pub mod config;
pub mod management;
pub mod module;
pub mod settings;
pub mod storage;
pub mod template;
pub mod utils;

pub use config::{HyperdriveConfig, GLOBAL_ADAPTER_PROJECT, HYPERDRIVE_NAMESPACE};
pub use management::{FlowReport, HyperdriveManager, LoadedModules};
pub use module::{ModuleError, ModuleStatus};
pub use settings::{ConfigMetadata, HyperdriveSettings, ModuleInstance};
pub use storage::SettingsStore;
pub use template::Template;
