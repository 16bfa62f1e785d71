//! Constraint validation of settings against metadata
//!
//! Validation is bottom-up and reports every failing parameter. Choice
//! options hidden by their dynamic `hidden` flag are not selectable.

use super::dynamic::PropertyContext;
use super::instance::{ConfigInstance, SectionValues};
use super::metadata::{child_path, ConfigMetadata, ParameterContainer};
use super::parameter::{Parameter, ParameterKind};
use super::value::ParameterValue;
use crate::module::traits::{ModuleError, ParameterError};

/// Validate every parameter of `instance`, returning all failures
pub fn validate_instance(
    metadata: &ConfigMetadata,
    instance: &ConfigInstance,
    ctx: &PropertyContext<'_>,
) -> Vec<ParameterError> {
    let mut errors = Vec::new();
    validate_container(metadata, &instance.root, "", ctx, &mut errors);
    errors
}

/// Like `validate_instance` but as a `Result`
pub fn ensure_valid(
    metadata: &ConfigMetadata,
    instance: &ConfigInstance,
    ctx: &PropertyContext<'_>,
) -> Result<(), ModuleError> {
    let errors = validate_instance(metadata, instance, ctx);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ModuleError::ValidationFailed { errors })
    }
}

fn validate_container(
    container: &dyn ParameterContainer,
    values: &SectionValues,
    prefix: &str,
    ctx: &PropertyContext<'_>,
    errors: &mut Vec<ParameterError>,
) {
    for section in container.sections() {
        let path = child_path(prefix, &section.id);
        match values.section(&section.id) {
            Some(child) => validate_container(section, child, &path, ctx, errors),
            None => errors.push(ParameterError {
                path,
                message: "missing section".to_string(),
            }),
        }
    }
    for parameter in container.parameters() {
        let path = child_path(prefix, &parameter.id);
        let result = match values.value(&parameter.id) {
            Some(value) => check_parameter(parameter, value, ctx),
            None => Err("missing value".to_string()),
        };
        if let Err(message) = result {
            errors.push(ParameterError { path, message });
        }
    }
}

fn check_bounds<T: PartialOrd + std::fmt::Display>(
    value: T,
    min: Option<T>,
    max: Option<T>,
) -> Result<(), String> {
    if let Some(min) = min {
        if value < min {
            return Err(format!("{} is below the minimum of {}", value, min));
        }
    }
    if let Some(max) = max {
        if value > max {
            return Err(format!("{} is above the maximum of {}", value, max));
        }
    }
    Ok(())
}

/// Check one value against its parameter's constraints
pub fn check_parameter(
    parameter: &Parameter,
    value: &ParameterValue,
    ctx: &PropertyContext<'_>,
) -> Result<(), String> {
    match (&parameter.kind, value) {
        (ParameterKind::Bool { .. }, ParameterValue::Bool(_)) => Ok(()),
        (ParameterKind::Int { min, max, .. }, ParameterValue::Int(v)) => check_bounds(*v, *min, *max),
        (ParameterKind::Uint { min, max, .. }, ParameterValue::Uint(v)) => {
            check_bounds(*v, *min, *max)
        }
        (ParameterKind::Float { min, max, .. }, ParameterValue::Float(v)) => {
            check_bounds(*v, *min, *max)
        }
        (ParameterKind::String { max_length, regex, .. }, ParameterValue::String(v)) => {
            if let Some(max_length) = max_length {
                let length = v.chars().count() as u64;
                if length > *max_length {
                    return Err(format!(
                        "length {} exceeds the maximum of {}",
                        length, max_length
                    ));
                }
            }
            if let Some(pattern) = regex {
                if !pattern.full_match(v) {
                    return Err(format!("{:?} does not match pattern {}", v, pattern.as_str()));
                }
            }
            Ok(())
        }
        (ParameterKind::Choice { options, .. }, ParameterValue::String(v)) => {
            let option = options
                .iter()
                .find(|o| &o.value == v)
                .ok_or_else(|| format!("{:?} is not a valid option", v))?;
            let hidden = option.hidden.resolve(ctx).map_err(|e| e.to_string())?;
            if hidden {
                return Err(format!("option {:?} is not currently available", v));
            }
            Ok(())
        }
        (kind, value) => Err(format!(
            "expected {} value, got {:?}",
            kind.type_name(),
            value
        )),
    }
}
