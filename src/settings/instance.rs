//! Settings instances
//!
//! A typed mirror of the metadata tree holding one value per parameter.
//! Converts to and from the schemaless maps stored in settings files.

use indexmap::IndexMap;
use serde_json::{Map, Value};

use super::metadata::{child_path, ConfigMetadata, ParameterContainer};
use super::value::ParameterValue;
use crate::module::traits::{ModuleError, ParameterError};

/// Key carrying the instance version in the wire form
pub const VERSION_KEY: &str = "version";

#[derive(Debug, Clone, PartialEq)]
pub enum InstanceNode {
    Value(ParameterValue),
    Section(SectionValues),
}

/// Values of one section, keyed by id in metadata order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SectionValues {
    pub entries: IndexMap<String, InstanceNode>,
}

impl SectionValues {
    pub fn value(&self, id: &str) -> Option<&ParameterValue> {
        match self.entries.get(id) {
            Some(InstanceNode::Value(v)) => Some(v),
            _ => None,
        }
    }

    pub fn section(&self, id: &str) -> Option<&SectionValues> {
        match self.entries.get(id) {
            Some(InstanceNode::Section(s)) => Some(s),
            _ => None,
        }
    }

    fn to_map(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|(id, node)| {
                let value = match node {
                    InstanceNode::Value(v) => v.to_json(),
                    InstanceNode::Section(s) => Value::Object(s.to_map()),
                };
                (id.clone(), value)
            })
            .collect()
    }
}

/// A module's settings, typed against its metadata
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigInstance {
    pub version: Option<String>,
    pub root: SectionValues,
}

impl ConfigInstance {
    /// Literal defaults for every parameter (templates are not evaluated)
    pub fn create_defaults(metadata: &ConfigMetadata) -> Self {
        Self {
            version: None,
            root: defaults_for(metadata),
        }
    }

    /// Convert a raw settings map
    ///
    /// Missing parameters take their literal default; keys that the metadata
    /// does not know are dropped. Type mismatches are collected and reported
    /// together.
    pub fn from_map(metadata: &ConfigMetadata, map: &Map<String, Value>) -> Result<Self, ModuleError> {
        let mut errors = Vec::new();
        let root = values_from_map(metadata, map, "", &mut errors);
        if !errors.is_empty() {
            return Err(ModuleError::ValidationFailed { errors });
        }
        let version = map
            .get(VERSION_KEY)
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Self { version, root })
    }

    /// Raw map in metadata order, without the version key
    pub fn to_map(&self) -> Map<String, Value> {
        self.root.to_map()
    }

    /// Wire form: `{ version, <id>: ... }`
    pub fn to_wire(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if let Some(version) = &self.version {
            map.insert(VERSION_KEY.to_string(), Value::String(version.clone()));
        }
        map.extend(self.root.to_map());
        map
    }

    /// Look up a value by slash-separated path
    pub fn get(&self, path: &str) -> Option<&ParameterValue> {
        let segments: Vec<&str> = path.split('/').collect();
        let (last, parents) = segments.split_last()?;
        let mut section = &self.root;
        for segment in parents {
            section = section.section(segment)?;
        }
        section.value(last)
    }

    /// Replace a value by slash-separated path; returns false when the path
    /// does not name an existing parameter
    pub fn set(&mut self, path: &str, value: ParameterValue) -> bool {
        let segments: Vec<&str> = path.split('/').collect();
        let Some((last, parents)) = segments.split_last() else {
            return false;
        };
        let mut section = &mut self.root;
        for segment in parents {
            section = match section.entries.get_mut(*segment) {
                Some(InstanceNode::Section(s)) => s,
                _ => return false,
            };
        }
        match section.entries.get_mut(*last) {
            Some(InstanceNode::Value(slot)) => {
                *slot = value;
                true
            }
            _ => false,
        }
    }
}

fn defaults_for(container: &dyn ParameterContainer) -> SectionValues {
    let mut entries = IndexMap::new();
    for parameter in container.parameters() {
        entries.insert(
            parameter.id.clone(),
            InstanceNode::Value(parameter.kind.literal_default()),
        );
    }
    for section in container.sections() {
        entries.insert(section.id.clone(), InstanceNode::Section(defaults_for(section)));
    }
    SectionValues { entries }
}

fn values_from_map(
    container: &dyn ParameterContainer,
    map: &Map<String, Value>,
    prefix: &str,
    errors: &mut Vec<ParameterError>,
) -> SectionValues {
    let mut entries = IndexMap::new();
    for parameter in container.parameters() {
        let value = match map.get(&parameter.id) {
            None | Some(Value::Null) => parameter.kind.literal_default(),
            Some(raw) => match parameter.kind.coerce(raw) {
                Ok(v) => v,
                Err(message) => {
                    errors.push(ParameterError {
                        path: child_path(prefix, &parameter.id),
                        message,
                    });
                    parameter.kind.literal_default()
                }
            },
        };
        entries.insert(parameter.id.clone(), InstanceNode::Value(value));
    }
    for section in container.sections() {
        let path = child_path(prefix, &section.id);
        let child = match map.get(&section.id) {
            Some(Value::Object(child)) => values_from_map(section, child, &path, errors),
            None | Some(Value::Null) => defaults_for(section),
            Some(other) => {
                errors.push(ParameterError {
                    path: path.clone(),
                    message: format!("expected section, got {}", other),
                });
                defaults_for(section)
            }
        };
        entries.insert(section.id.clone(), InstanceNode::Section(child));
    }
    SectionValues { entries }
}
