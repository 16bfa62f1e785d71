//! Configuration metadata tree
//!
//! Fetched from a module's adapter at runtime. Sections nest parameters and
//! further sections; ids are unique within their container.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::dynamic::DynamicProperty;
use super::parameter::{Parameter, ParameterKind};
use crate::module::traits::ModuleError;

/// An interior node of the metadata tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: DynamicProperty<String>,
    #[serde(default)]
    pub disabled: DynamicProperty<bool>,
    #[serde(default)]
    pub hidden: DynamicProperty<bool>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub sections: Vec<Section>,
}

impl Section {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            description: DynamicProperty::default(),
            disabled: DynamicProperty::default(),
            hidden: DynamicProperty::default(),
            parameters: Vec::new(),
            sections: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_section(mut self, section: Section) -> Self {
        self.sections.push(section);
        self
    }
}

/// Root of a module's metadata tree
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfigMetadata {
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub sections: Vec<Section>,
}

/// Anything holding parameters and child sections
pub trait ParameterContainer {
    fn parameters(&self) -> &[Parameter];
    fn sections(&self) -> &[Section];
}

impl ParameterContainer for ConfigMetadata {
    fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    fn sections(&self) -> &[Section] {
        &self.sections
    }
}

impl ParameterContainer for Section {
    fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    fn sections(&self) -> &[Section] {
        &self.sections
    }
}

/// Join a parent path and an id with `/`
pub fn child_path(parent: &str, id: &str) -> String {
    if parent.is_empty() {
        id.to_string()
    } else {
        format!("{}/{}", parent, id)
    }
}

impl ConfigMetadata {
    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_section(mut self, section: Section) -> Self {
        self.sections.push(section);
        self
    }

    /// Decode an adapter's `get-config-metadata` response and check its shape
    pub fn from_json(value: serde_json::Value) -> Result<Self, ModuleError> {
        let metadata: ConfigMetadata = serde_json::from_value(value)
            .map_err(|e| ModuleError::MetadataInvalid(e.to_string()))?;
        metadata.check()?;
        Ok(metadata)
    }

    /// Structural checks: non-empty ids unique per container, ordered
    /// bounds, and choice defaults present among the options
    pub fn check(&self) -> Result<(), ModuleError> {
        let mut problems = Vec::new();
        check_container(self, "", &mut problems);
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ModuleError::MetadataInvalid(problems.join("; ")))
        }
    }

    /// Look up a parameter by slash-separated path
    pub fn parameter(&self, path: &str) -> Option<&Parameter> {
        let segments: Vec<&str> = path.split('/').collect();
        let (last, parents) = segments.split_last()?;
        let mut container: &dyn ParameterContainer = self;
        for segment in parents {
            container = container.sections().iter().find(|s| s.id == *segment)?;
        }
        container.parameters().iter().find(|p| p.id == *last)
    }

    /// Every parameter with its path, in pre-order
    pub fn walk(&self) -> Vec<(String, &Parameter)> {
        let mut out = Vec::new();
        walk_container(self, "", &mut out);
        out
    }
}

fn walk_container<'a>(
    container: &'a dyn ParameterContainer,
    prefix: &str,
    out: &mut Vec<(String, &'a Parameter)>,
) {
    for parameter in container.parameters() {
        out.push((child_path(prefix, &parameter.id), parameter));
    }
    for section in container.sections() {
        walk_container(section, &child_path(prefix, &section.id), out);
    }
}

fn check_container(container: &dyn ParameterContainer, prefix: &str, problems: &mut Vec<String>) {
    let mut seen = HashSet::new();
    let ids = container
        .parameters()
        .iter()
        .map(|p| p.id.as_str())
        .chain(container.sections().iter().map(|s| s.id.as_str()));
    for id in ids {
        if id.is_empty() {
            problems.push(format!("empty id under {:?}", prefix));
        } else if id == "version" && prefix.is_empty() {
            problems.push("top-level id \"version\" is reserved".to_string());
        } else if !seen.insert(id) {
            problems.push(format!("duplicate id {:?}", child_path(prefix, id)));
        }
    }

    for parameter in container.parameters() {
        let path = child_path(prefix, &parameter.id);
        match &parameter.kind {
            ParameterKind::Int { min: Some(lo), max: Some(hi), .. } if lo > hi => {
                problems.push(format!("{}: min greater than max", path))
            }
            ParameterKind::Uint { min: Some(lo), max: Some(hi), .. } if lo > hi => {
                problems.push(format!("{}: min greater than max", path))
            }
            ParameterKind::Float { min: Some(lo), max: Some(hi), .. } if lo > hi => {
                problems.push(format!("{}: min greater than max", path))
            }
            ParameterKind::Choice { default, options } => {
                if options.is_empty() {
                    problems.push(format!("{}: choice without options", path));
                } else if !options.iter().any(|o| o.value == default.default) {
                    problems.push(format!(
                        "{}: default {:?} is not one of the options",
                        path, default.default
                    ));
                }
            }
            _ => {}
        }
    }

    for section in container.sections() {
        check_container(section, &child_path(prefix, &section.id), problems);
    }
}
