//! Configuration metadata model and settings documents
//!
//! Metadata trees come from module adapters; settings are the user's values
//! for them. This module types, validates, diffs and upgrades settings
//! against their metadata.

pub mod diff;
pub mod dynamic;
pub mod hyperdrive;
pub mod instance;
pub mod metadata;
pub mod parameter;
pub mod snapshot;
pub mod upgrade;
pub mod validate;
pub mod value;

pub use diff::{diff, DiffEntry, ParameterChange, SettingsDiff};
pub use dynamic::{DynamicProperty, PropertyContext, PropertyType};
pub use hyperdrive::{
    module_project_name, HyperdriveSettings, LoggingSettings, ModuleDefaults, ModuleInstance,
    SettingsFactory, ENGINE_VERSION,
};
pub use instance::{ConfigInstance, InstanceNode, SectionValues};
pub use metadata::{ConfigMetadata, ParameterContainer, Section};
pub use parameter::{ChoiceOption, Parameter, ParameterKind, Pattern};
pub use snapshot::{SettingPath, SettingsSnapshot};
pub use upgrade::apply_upgrade_defaults;
pub use validate::{ensure_valid, validate_instance};
pub use value::ParameterValue;
