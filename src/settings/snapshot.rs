//! Cross-module settings lookup
//!
//! Templates reference settings with paths of the form
//! `[fqmn:]segment[/segment...]`. Without an FQMN the path is local to the
//! module being rendered; the `hd` namespace addresses Hyperdrive's own base
//! parameters.

use indexmap::IndexMap;
use serde_json::{Map, Value};

use super::hyperdrive::HyperdriveSettings;
use crate::config::HYPERDRIVE_NAMESPACE;
use crate::module::traits::ModuleError;

/// A parsed settings path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingPath {
    /// Module the path refers to; `None` means the local module
    pub fqmn: Option<String>,
    pub segments: Vec<String>,
}

impl SettingPath {
    pub fn parse(path: &str) -> Result<Self, String> {
        let (fqmn, rest) = match path.split_once(':') {
            Some((fqmn, rest)) => {
                if fqmn.is_empty() {
                    return Err(format!("empty module name in path {:?}", path));
                }
                (Some(fqmn.to_string()), rest)
            }
            None => (None, path),
        };
        let segments: Vec<String> = rest.split('/').map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(format!("empty segment in path {:?}", path));
        }
        Ok(Self { fqmn, segments })
    }
}

/// Read-only view of every module's settings plus the base parameters
#[derive(Debug, Clone, Default)]
pub struct SettingsSnapshot {
    base: Map<String, Value>,
    modules: IndexMap<String, Map<String, Value>>,
}

impl SettingsSnapshot {
    /// Snapshot of a full settings document
    pub fn from_settings(settings: &HyperdriveSettings) -> Result<Self, ModuleError> {
        let mut base = match serde_json::to_value(settings)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        base.remove("modules");
        let modules = settings
            .modules
            .iter()
            .map(|(fqmn, instance)| (fqmn.clone(), instance.settings.clone()))
            .collect();
        Ok(Self { base, modules })
    }

    /// Replace one module's settings in the snapshot
    pub fn with_module(mut self, fqmn: &str, settings: Map<String, Value>) -> Self {
        self.modules.insert(fqmn.to_string(), settings);
        self
    }

    /// Resolve `path` relative to `local_fqmn`
    pub fn lookup(&self, local_fqmn: &str, path: &str) -> Result<&Value, String> {
        let parsed = SettingPath::parse(path)?;
        let fqmn = parsed.fqmn.as_deref().unwrap_or(local_fqmn);
        let root = if fqmn == HYPERDRIVE_NAMESPACE {
            &self.base
        } else {
            self.modules
                .get(fqmn)
                .ok_or_else(|| format!("no settings for module {}", fqmn))?
        };

        let (last, parents) = parsed
            .segments
            .split_last()
            .ok_or_else(|| format!("empty path {:?}", path))?;
        let mut current = root;
        for segment in parents {
            current = match current.get(segment) {
                Some(Value::Object(map)) => map,
                _ => return Err(format!("no section {:?} in path {:?}", segment, path)),
            };
        }
        current
            .get(last)
            .ok_or_else(|| format!("no value at path {:?}", path))
    }
}
