//! Parameter definitions

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::dynamic::DynamicProperty;
use super::value::ParameterValue;

/// A string constraint pattern, compiled once at load
///
/// Matching is anchored: the whole value must match.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    compiled: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        let compiled = Regex::new(&format!("^(?:{})$", source))?;
        Ok(Self {
            source: source.to_string(),
            compiled,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn full_match(&self, value: &str) -> bool {
        self.compiled.is_match(value)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Pattern::new(&source).map_err(serde::de::Error::custom)
    }
}

/// One option of a choice parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub value: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: DynamicProperty<String>,
    /// Hidden options are not selectable
    #[serde(default)]
    pub hidden: DynamicProperty<bool>,
}

/// Type-specific part of a parameter, tagged by `type` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParameterKind {
    Bool {
        default: DynamicProperty<bool>,
    },
    Int {
        default: DynamicProperty<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<i64>,
    },
    Uint {
        default: DynamicProperty<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<u64>,
    },
    Float {
        default: DynamicProperty<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    String {
        default: DynamicProperty<String>,
        #[serde(
            default,
            rename = "maxLength",
            skip_serializing_if = "Option::is_none"
        )]
        max_length: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        regex: Option<Pattern>,
    },
    Choice {
        default: DynamicProperty<String>,
        options: Vec<ChoiceOption>,
    },
}

impl ParameterKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ParameterKind::Bool { .. } => "bool",
            ParameterKind::Int { .. } => "int",
            ParameterKind::Uint { .. } => "uint",
            ParameterKind::Float { .. } => "float",
            ParameterKind::String { .. } => "string",
            ParameterKind::Choice { .. } => "choice",
        }
    }

    /// Literal default (never the template result)
    pub fn literal_default(&self) -> ParameterValue {
        match self {
            ParameterKind::Bool { default } => ParameterValue::Bool(default.default),
            ParameterKind::Int { default, .. } => ParameterValue::Int(default.default),
            ParameterKind::Uint { default, .. } => ParameterValue::Uint(default.default),
            ParameterKind::Float { default, .. } => ParameterValue::Float(default.default),
            ParameterKind::String { default, .. } | ParameterKind::Choice { default, .. } => {
                ParameterValue::String(default.default.clone())
            }
        }
    }

    /// Convert a raw settings value into this parameter's type
    ///
    /// Numerics are re-normalized: an integral float is accepted for integer
    /// kinds and an integer for float kinds.
    pub fn coerce(&self, raw: &Value) -> Result<ParameterValue, String> {
        let mismatch = || format!("expected {}, got {}", self.type_name(), raw);
        match self {
            ParameterKind::Bool { .. } => raw.as_bool().map(ParameterValue::Bool).ok_or_else(mismatch),
            ParameterKind::Int { .. } => raw
                .as_i64()
                .or_else(|| integral_f64(raw).filter(|f| f.abs() < 9.2e18).map(|f| f as i64))
                .map(ParameterValue::Int)
                .ok_or_else(mismatch),
            ParameterKind::Uint { .. } => raw
                .as_u64()
                .or_else(|| {
                    integral_f64(raw)
                        .filter(|f| *f >= 0.0 && *f < 1.8e19)
                        .map(|f| f as u64)
                })
                .map(ParameterValue::Uint)
                .ok_or_else(mismatch),
            ParameterKind::Float { .. } => raw.as_f64().map(ParameterValue::Float).ok_or_else(mismatch),
            ParameterKind::String { .. } | ParameterKind::Choice { .. } => raw
                .as_str()
                .map(|s| ParameterValue::String(s.to_string()))
                .ok_or_else(mismatch),
        }
    }
}

fn integral_f64(raw: &Value) -> Option<f64> {
    raw.as_f64().filter(|f| f.fract() == 0.0 && raw.is_f64())
}

/// A leaf of the metadata tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: DynamicProperty<String>,
    #[serde(flatten)]
    pub kind: ParameterKind,
    #[serde(default)]
    pub advanced: bool,
    #[serde(default)]
    pub disabled: DynamicProperty<bool>,
    #[serde(default)]
    pub hidden: DynamicProperty<bool>,
    #[serde(default)]
    pub overwrite_on_upgrade: bool,
    #[serde(default)]
    pub affected_containers: Vec<String>,
}

impl Parameter {
    pub fn new(id: &str, kind: ParameterKind) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            description: DynamicProperty::default(),
            kind,
            advanced: false,
            disabled: DynamicProperty::default(),
            hidden: DynamicProperty::default(),
            overwrite_on_upgrade: false,
            affected_containers: Vec::new(),
        }
    }

    pub fn with_affected_containers(mut self, containers: &[&str]) -> Self {
        self.affected_containers = containers.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn overwriting_on_upgrade(mut self) -> Self {
        self.overwrite_on_upgrade = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let param: Parameter = serde_json::from_value(json!({
            "id": "port",
            "name": "Port",
            "description": "API port",
            "type": "uint",
            "default": 8080,
            "max": 65535,
            "affectedContainers": ["server"]
        }))
        .unwrap();
        assert!(matches!(
            param.kind,
            ParameterKind::Uint { max: Some(65535), min: None, .. }
        ));
        assert_eq!(param.affected_containers, vec!["server"]);
        assert_eq!(param.description, DynamicProperty::literal("API port".to_string()));

        let wire = serde_json::to_value(&param).unwrap();
        assert_eq!(wire["type"], json!("uint"));
        assert_eq!(wire["default"], json!({"default": 8080}));
        assert_eq!(wire["overwriteOnUpgrade"], json!(false));
    }

    #[test]
    fn test_regex_is_anchored() {
        let pattern = Pattern::new("[a-z]+").unwrap();
        assert!(pattern.full_match("abc"));
        assert!(!pattern.full_match("abc1"));
        assert!(Pattern::new("(").is_err());

        let bad = serde_json::from_value::<Parameter>(json!({
            "id": "s", "type": "string", "default": "", "regex": "("
        }));
        assert!(bad.is_err());
    }

    #[test]
    fn test_coerce_normalizes_numerics() {
        let float = ParameterKind::Float {
            default: DynamicProperty::literal(50.0),
            min: None,
            max: None,
        };
        assert_eq!(float.coerce(&json!(80)).unwrap(), ParameterValue::Float(80.0));

        let int = ParameterKind::Int {
            default: DynamicProperty::literal(0),
            min: None,
            max: None,
        };
        assert_eq!(int.coerce(&json!(3.0)).unwrap(), ParameterValue::Int(3));
        assert!(int.coerce(&json!(3.5)).is_err());
        assert!(int.coerce(&json!("3")).is_err());

        let uint = ParameterKind::Uint {
            default: DynamicProperty::literal(0),
            min: None,
            max: None,
        };
        assert!(uint.coerce(&json!(-1)).is_err());
    }
}
