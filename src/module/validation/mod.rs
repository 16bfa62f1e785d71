//! Module validation framework
//!
//! Provides descriptor validation: identifier patterns, semantic versions
//! and dependency syntax.

pub mod descriptor_validator;

pub use descriptor_validator::{DescriptorValidator, ValidationResult};
