//! Values flowing through template evaluation

use std::cmp::Ordering;
use std::fmt;

/// A value produced or consumed while rendering a template
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    String(String),
    List(Vec<TemplateValue>),
}

impl TemplateValue {
    /// Truthiness used by `if`, `and`, `or` and `not`
    pub fn is_truthy(&self) -> bool {
        match self {
            TemplateValue::Null => false,
            TemplateValue::Bool(b) => *b,
            TemplateValue::Int(i) => *i != 0,
            TemplateValue::Uint(u) => *u != 0,
            TemplateValue::Float(f) => *f != 0.0,
            TemplateValue::String(s) => !s.is_empty(),
            TemplateValue::List(items) => !items.is_empty(),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            TemplateValue::Int(i) => Some(*i as f64),
            TemplateValue::Uint(u) => Some(*u as f64),
            TemplateValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Name of the value's kind, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            TemplateValue::Null => "nil",
            TemplateValue::Bool(_) => "bool",
            TemplateValue::Int(_) => "int",
            TemplateValue::Uint(_) => "uint",
            TemplateValue::Float(_) => "float",
            TemplateValue::String(_) => "string",
            TemplateValue::List(_) => "list",
        }
    }

    /// Equality used by `eq`/`ne`: numbers compare by value across kinds
    pub fn loose_eq(&self, other: &TemplateValue) -> bool {
        match (self, other) {
            (TemplateValue::Int(a), TemplateValue::Int(b)) => a == b,
            (TemplateValue::Uint(a), TemplateValue::Uint(b)) => a == b,
            (TemplateValue::Int(a), TemplateValue::Uint(b))
            | (TemplateValue::Uint(b), TemplateValue::Int(a)) => {
                *a >= 0 && (*a as u64) == *b
            }
            (a, b) if a.as_f64().is_some() && b.as_f64().is_some() => a.as_f64() == b.as_f64(),
            (a, b) => a == b,
        }
    }

    /// Ordering used by `lt`/`le`/`gt`/`ge`
    pub fn compare(&self, other: &TemplateValue) -> Option<Ordering> {
        match (self, other) {
            (TemplateValue::String(a), TemplateValue::String(b)) => Some(a.cmp(b)),
            (TemplateValue::Int(a), TemplateValue::Int(b)) => Some(a.cmp(b)),
            (TemplateValue::Uint(a), TemplateValue::Uint(b)) => Some(a.cmp(b)),
            (a, b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        }
    }
}

impl fmt::Display for TemplateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateValue::Null => Ok(()),
            TemplateValue::Bool(b) => write!(f, "{}", b),
            TemplateValue::Int(i) => write!(f, "{}", i),
            TemplateValue::Uint(u) => write!(f, "{}", u),
            TemplateValue::Float(x) => write!(f, "{}", x),
            TemplateValue::String(s) => f.write_str(s),
            TemplateValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<bool> for TemplateValue {
    fn from(b: bool) -> Self {
        TemplateValue::Bool(b)
    }
}

impl From<i64> for TemplateValue {
    fn from(i: i64) -> Self {
        TemplateValue::Int(i)
    }
}

impl From<u64> for TemplateValue {
    fn from(u: u64) -> Self {
        TemplateValue::Uint(u)
    }
}

impl From<f64> for TemplateValue {
    fn from(x: f64) -> Self {
        TemplateValue::Float(x)
    }
}

impl From<String> for TemplateValue {
    fn from(s: String) -> Self {
        TemplateValue::String(s)
    }
}

impl From<&str> for TemplateValue {
    fn from(s: &str) -> Self {
        TemplateValue::String(s.to_string())
    }
}

impl From<Vec<String>> for TemplateValue {
    fn from(items: Vec<String>) -> Self {
        TemplateValue::List(items.into_iter().map(TemplateValue::String).collect())
    }
}

impl From<&serde_json::Value> for TemplateValue {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => TemplateValue::Null,
            serde_json::Value::Bool(b) => TemplateValue::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    TemplateValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    TemplateValue::Uint(u)
                } else {
                    TemplateValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => TemplateValue::String(s.clone()),
            serde_json::Value::Array(items) => {
                TemplateValue::List(items.iter().map(TemplateValue::from).collect())
            }
            serde_json::Value::Object(_) => TemplateValue::String(value.to_string()),
        }
    }
}
