//! Descriptor validation
//!
//! Validates module descriptors for identifier format, semantic version and
//! dependency syntax. Every violation is reported, not just the first.

use regex::Regex;
use tracing::{debug, warn};

use crate::module::registry::dependencies::DependencySpec;
use crate::module::registry::descriptor::ModuleDescriptor;

/// Validation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Descriptor is valid
    Valid,
    /// Descriptor is invalid with specific errors
    Invalid(Vec<String>),
}

/// Descriptor validator
pub struct DescriptorValidator {
    name_pattern: Regex,
    shortcut_pattern: Regex,
    author_pattern: Regex,
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| unreachable!("invalid built-in pattern: {}", e))
}

impl DescriptorValidator {
    /// Create a new descriptor validator
    pub fn new() -> Self {
        Self {
            name_pattern: compile(r"^[a-z0-9][a-z0-9_-]{0,63}$"),
            shortcut_pattern: compile(r"^[a-z0-9]{1,16}$"),
            author_pattern: compile(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,63}$"),
        }
    }

    /// Validate a module descriptor
    pub fn validate(&self, descriptor: &ModuleDescriptor) -> ValidationResult {
        let mut errors = Vec::new();

        if !self.name_pattern.is_match(&descriptor.name) {
            errors.push(format!(
                "Invalid module name: {:?} (lowercase letters, digits, dashes and underscores)",
                descriptor.name
            ));
        }

        if !self.shortcut_pattern.is_match(&descriptor.shortcut) {
            errors.push(format!(
                "Invalid shortcut: {:?} (1-16 lowercase letters or digits)",
                descriptor.shortcut
            ));
        }

        if !self.author_pattern.is_match(&descriptor.author) {
            errors.push(format!("Invalid author: {:?}", descriptor.author));
        }

        if let Err(e) = semver::Version::parse(&descriptor.version) {
            errors.push(format!(
                "Invalid version format: {} (expected semantic versioning: {})",
                descriptor.version, e
            ));
        }

        for dependency in &descriptor.dependencies {
            if let Err(e) = dependency.parse::<DependencySpec>() {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            debug!("Descriptor validation passed for module: {}", descriptor.name);
            ValidationResult::Valid
        } else {
            warn!(
                "Descriptor validation failed for module {}: {:?}",
                descriptor.name, errors
            );
            ValidationResult::Invalid(errors)
        }
    }
}

impl Default for DescriptorValidator {
    fn default() -> Self {
        Self::new()
    }
}
