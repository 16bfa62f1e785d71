//! Dynamic properties
//!
//! A property holds a literal default and an optional template. The template
//! is rendered against the current settings each time the property is read
//! and its output parsed into the property's type. Numbers tolerate
//! surrounding whitespace; bools and strings take the output verbatim.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::snapshot::SettingsSnapshot;
use crate::module::traits::ModuleError;
use crate::template::{render_str, PropertyDataSource, TemplateValue};

/// Types a dynamic property can hold
pub trait PropertyType: Clone {
    /// Parse rendered template output
    fn parse_rendered(text: &str) -> Result<Self, String>;

    fn to_template_value(&self) -> TemplateValue;
}

impl PropertyType for bool {
    fn parse_rendered(text: &str) -> Result<Self, String> {
        match text {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(format!("invalid bool {:?}", other)),
        }
    }

    fn to_template_value(&self) -> TemplateValue {
        TemplateValue::Bool(*self)
    }
}

impl PropertyType for i64 {
    fn parse_rendered(text: &str) -> Result<Self, String> {
        let text = text.trim();
        if text.starts_with('+') {
            return Err(format!("invalid integer {:?}", text));
        }
        text.parse()
            .map_err(|e| format!("invalid integer {:?}: {}", text, e))
    }

    fn to_template_value(&self) -> TemplateValue {
        TemplateValue::Int(*self)
    }
}

impl PropertyType for u64 {
    fn parse_rendered(text: &str) -> Result<Self, String> {
        let text = text.trim();
        if text.starts_with('+') {
            return Err(format!("invalid unsigned integer {:?}", text));
        }
        text.parse()
            .map_err(|e| format!("invalid unsigned integer {:?}: {}", text, e))
    }

    fn to_template_value(&self) -> TemplateValue {
        TemplateValue::Uint(*self)
    }
}

impl PropertyType for f64 {
    fn parse_rendered(text: &str) -> Result<Self, String> {
        let text = text.trim();
        text.parse()
            .map_err(|e| format!("invalid float {:?}: {}", text, e))
    }

    fn to_template_value(&self) -> TemplateValue {
        TemplateValue::Float(*self)
    }
}

impl PropertyType for String {
    fn parse_rendered(text: &str) -> Result<Self, String> {
        Ok(text.to_string())
    }

    fn to_template_value(&self) -> TemplateValue {
        TemplateValue::String(self.clone())
    }
}

/// Where a dynamic property is being read
#[derive(Debug, Clone, Copy)]
pub struct PropertyContext<'a> {
    pub snapshot: &'a SettingsSnapshot,
    /// Module owning the property; local paths resolve against it
    pub fqmn: &'a str,
}

/// A literal default plus an optional template
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DynamicProperty<T> {
    pub default: T,
    pub template: Option<String>,
}

impl<T> DynamicProperty<T> {
    pub fn literal(default: T) -> Self {
        Self {
            default,
            template: None,
        }
    }

    pub fn templated(default: T, template: &str) -> Self {
        Self {
            default,
            template: Some(template.to_string()),
        }
    }
}

impl<T: PropertyType> DynamicProperty<T> {
    /// Current value: the literal default, or the parsed template output
    pub fn resolve(&self, ctx: &PropertyContext<'_>) -> Result<T, ModuleError> {
        let template = match self.template.as_deref() {
            None | Some("") => return Ok(self.default.clone()),
            Some(t) => t,
        };
        let data = PropertyDataSource {
            snapshot: ctx.snapshot,
            fqmn: ctx.fqmn,
            default: self.default.to_template_value(),
        };
        let rendered = render_str(ctx.fqmn, template, &data)?;
        T::parse_rendered(&rendered).map_err(|reason| ModuleError::TemplateRenderError {
            template: template.to_string(),
            reason,
        })
    }
}

#[derive(Serialize)]
struct CanonicalRef<'a, T> {
    default: &'a T,
    #[serde(skip_serializing_if = "Option::is_none")]
    template: Option<&'a String>,
}

impl<T: Serialize> Serialize for DynamicProperty<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        CanonicalRef {
            default: &self.default,
            template: self.template.as_ref(),
        }
        .serialize(serializer)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Repr<T> {
    Full {
        default: T,
        #[serde(default)]
        template: Option<String>,
    },
    Flat(T),
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for DynamicProperty<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Repr::<T>::deserialize(deserializer)? {
            Repr::Full { default, template } => Self { default, template },
            Repr::Flat(default) => Self::literal(default),
        })
    }
}
