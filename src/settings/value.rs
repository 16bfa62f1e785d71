//! Typed parameter values

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The value of a single parameter; choices are stored by option value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    String(String),
}

impl ParameterValue {
    /// Raw settings representation
    pub fn to_json(&self) -> Value {
        match self {
            ParameterValue::Bool(b) => Value::Bool(*b),
            ParameterValue::Int(i) => Value::from(*i),
            ParameterValue::Uint(u) => Value::from(*u),
            ParameterValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ParameterValue::String(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Bool(b) => write!(f, "{}", b),
            ParameterValue::Int(i) => write!(f, "{}", i),
            ParameterValue::Uint(u) => write!(f, "{}", u),
            ParameterValue::Float(x) => write!(f, "{}", x),
            ParameterValue::String(s) => f.write_str(s),
        }
    }
}
