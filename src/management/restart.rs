//! Restart deltas
//!
//! Which services of a module must be stopped before a settings change is
//! applied: whatever the adapter asks for, every service listed by a changed
//! parameter's `affectedContainers`, and the instance's stored restart list.

use std::collections::BTreeSet;

use crate::module::traits::ModuleError;
use crate::settings::{diff, ConfigInstance, ConfigMetadata, ModuleInstance};

/// Restart set for one module
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestartPlan {
    /// Services to stop, sorted
    pub services: BTreeSet<String>,
    /// Slash paths of the parameters that changed
    pub changed_parameters: Vec<String>,
}

impl RestartPlan {
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn services(&self) -> Vec<String> {
        self.services.iter().cloned().collect()
    }
}

/// Compute the restart set between two instances of the same module
pub fn plan_restart(
    metadata: &ConfigMetadata,
    current: &ModuleInstance,
    pending: &ModuleInstance,
    adapter_services: &[String],
) -> Result<RestartPlan, ModuleError> {
    let old = ConfigInstance::from_map(metadata, &current.settings)?;
    let new = ConfigInstance::from_map(metadata, &pending.settings)?;
    let changes = diff(metadata, &old, &new);

    let mut services = changes.affected_containers();
    services.extend(adapter_services.iter().cloned());
    services.extend(pending.restart.iter().cloned());

    Ok(RestartPlan {
        services,
        changed_parameters: changes.changes().into_iter().map(|(path, _)| path).collect(),
    })
}
