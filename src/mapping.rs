//! # Data Mapping
//!
//! Shapes a trigger payload into the input a reaction expects. A mapping is a
//! JSON object whose keys are output fields and whose values are one of:
//!
//! - a path string (`"issue.title"` or `"{{issue.title}}"`), copied as-is;
//!   a string that resolves to nothing is kept as a literal
//! - a template string containing placeholders (`"New issue: {{issue.title}}"`)
//! - a transform object `{"type": ..., "source": ..., "template": ..., "format": ..., "default": ...}`
//!   with type `string`, `number`, `boolean`, `template` or `format`
//! - any other JSON value, copied as a literal
//!
//! With no mapping the payload passes through unchanged.

use crate::orchestration::condition::{lookup, value_as_text};
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MappingError {
    #[error("Mapping must be a JSON object, got {0}")]
    InvalidMapping(String),

    #[error("Unknown transform type '{transform}' for field '{field}'")]
    UnknownTransform { field: String, transform: String },

    #[error("Cannot convert field '{field}': {reason}")]
    TypeConversion { field: String, reason: String },
}

/// Applies a link's data mapping to a payload
pub trait DataMapper: Send + Sync {
    fn map(&self, mapping: Option<&Value>, payload: &Value) -> Result<Value, MappingError>;
}

/// Default mapper supporting paths, templates and typed transforms
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateDataMapper;

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("placeholder regex"))
}

impl TemplateDataMapper {
    pub fn new() -> Self {
        Self
    }

    /// Replace every `{{path}}` with the string form of the resolved value
    pub fn render_template(template: &str, payload: &Value) -> String {
        placeholder()
            .replace_all(template, |caps: &Captures<'_>| {
                lookup(payload, &caps[1])
                    .map(value_as_text)
                    .unwrap_or_default()
            })
            .into_owned()
    }

    fn map_string(spec: &str, payload: &Value) -> Value {
        let trimmed = spec.trim();
        let is_single_placeholder = trimmed.starts_with("{{")
            && trimmed.ends_with("}}")
            && placeholder().find_iter(trimmed).count() == 1;

        if is_single_placeholder {
            return lookup(payload, trimmed).cloned().unwrap_or(Value::Null);
        }
        if placeholder().is_match(spec) {
            return Value::String(Self::render_template(spec, payload));
        }
        lookup(payload, spec)
            .cloned()
            .unwrap_or_else(|| Value::String(spec.to_string()))
    }

    fn map_transform(
        field: &str,
        spec: &Map<String, Value>,
        payload: &Value,
    ) -> Result<Value, MappingError> {
        let transform = spec.get("type").and_then(Value::as_str).unwrap_or("string");
        let source = spec
            .get("source")
            .and_then(Value::as_str)
            .and_then(|path| lookup(payload, path))
            .filter(|v| !v.is_null())
            .cloned();
        let default = spec.get("default").cloned();

        let mapped = match transform {
            "string" => source.map(|v| Value::String(value_as_text(&v))),
            "number" => match source {
                Some(v) => Some(to_number(field, &v)?),
                None => None,
            },
            "boolean" => source.map(|v| Value::Bool(to_bool(&v))),
            "template" => spec
                .get("template")
                .and_then(Value::as_str)
                .map(|template| Value::String(Self::render_template(template, payload))),
            "format" => {
                let format = spec.get("format").and_then(Value::as_str).unwrap_or("");
                match source {
                    Some(v) => Some(apply_format(field, format, &v)?),
                    None => None,
                }
            }
            other => {
                return Err(MappingError::UnknownTransform {
                    field: field.to_string(),
                    transform: other.to_string(),
                })
            }
        };

        Ok(mapped.or(default).unwrap_or(Value::Null))
    }
}

impl DataMapper for TemplateDataMapper {
    fn map(&self, mapping: Option<&Value>, payload: &Value) -> Result<Value, MappingError> {
        let mapping = match mapping {
            None | Some(Value::Null) => return Ok(payload.clone()),
            Some(Value::Object(map)) => map,
            Some(other) => return Err(MappingError::InvalidMapping(other.to_string())),
        };

        let mut output = Map::with_capacity(mapping.len());
        for (field, spec) in mapping {
            let value = match spec {
                Value::String(s) => Self::map_string(s, payload),
                Value::Object(transform) if transform.contains_key("type") => {
                    Self::map_transform(field, transform, payload)?
                }
                literal => literal.clone(),
            };
            output.insert(field.clone(), value);
        }

        Ok(Value::Object(output))
    }
}

fn to_number(field: &str, value: &Value) -> Result<Value, MappingError> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::Bool(b) => Ok(Value::from(u8::from(*b))),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                return Ok(Value::from(i));
            }
            s.parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| MappingError::TypeConversion {
                    field: field.to_string(),
                    reason: format!("'{s}' is not a number"),
                })
        }
        other => Err(MappingError::TypeConversion {
            field: field.to_string(),
            reason: format!("{other} is not a number"),
        }),
    }
}

fn to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1" | "on"),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Null => false,
    }
}

fn apply_format(field: &str, format: &str, value: &Value) -> Result<Value, MappingError> {
    let text = value_as_text(value);
    let formatted = match format {
        "uppercase" => text.to_uppercase(),
        "lowercase" => text.to_lowercase(),
        "trim" => text.trim().to_string(),
        "json" => value.to_string(),
        "" => text,
        // Any other format string is a template where `{}` receives the value
        template if template.contains("{}") => template.replace("{}", &text),
        unknown => {
            return Err(MappingError::UnknownTransform {
                field: field.to_string(),
                transform: format!("format:{unknown}"),
            })
        }
    };
    Ok(Value::String(formatted))
}
