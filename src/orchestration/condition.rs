//! # Link Filter Conditions
//!
//! Typed filter expressions attached to action links. Conditions are parsed
//! once from their JSON authoring form and evaluated against trigger payloads.
//!
//! ```text
//! {"operator": "and", "conditions": [ ... ]}
//! {"operator": "or",  "conditions": [ ... ]}
//! {"operator": "not", "condition": { ... }}
//! {"field": "pull_request.state", "operator": "equals", "value": "open"}
//! ```
//!
//! Field paths are dot separated and may be wrapped in `{{ }}`. A missing
//! operator on a field comparison means `equals`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConditionError {
    #[error("Condition must be a JSON object, got {0}")]
    NotAnObject(String),

    #[error("Condition is missing required key '{0}'")]
    MissingKey(&'static str),

    #[error("Unknown condition operator '{0}'")]
    UnknownOperator(String),

    #[error("Invalid regex '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    GreaterEqual,
    LessEqual,
}

impl ComparisonOperator {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "equals" => Self::Equals,
            "not_equals" => Self::NotEquals,
            "contains" => Self::Contains,
            "not_contains" => Self::NotContains,
            "starts_with" => Self::StartsWith,
            "ends_with" => Self::EndsWith,
            "greater_than" => Self::GreaterThan,
            "less_than" => Self::LessThan,
            "greater_equal" => Self::GreaterEqual,
            "less_equal" => Self::LessEqual,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::GreaterEqual => "greater_equal",
            Self::LessEqual => "less_equal",
        }
    }
}

/// Parsed filter expression
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Condition {
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
    Compare {
        field: String,
        operator: ComparisonOperator,
        value: Value,
    },
    /// Full-match regular expression over the field's string form
    Matches { field: String, pattern: Regex },
    Exists { field: String },
    NotExists { field: String },
}

impl Condition {
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Compare {
            field: field.into(),
            operator: ComparisonOperator::Equals,
            value: value.into(),
        }
    }

    pub fn parse(value: &Value) -> Result<Self, ConditionError> {
        let object = value
            .as_object()
            .ok_or_else(|| ConditionError::NotAnObject(value.to_string()))?;

        let operator = object.get("operator").and_then(Value::as_str);

        match operator {
            Some("and") => Ok(Self::All(parse_list(object)?)),
            Some("or") => Ok(Self::Any(parse_list(object)?)),
            Some("not") => {
                let inner = object
                    .get("condition")
                    .ok_or(ConditionError::MissingKey("condition"))?;
                Ok(Self::Not(Box::new(Self::parse(inner)?)))
            }
            _ => parse_field_condition(object, operator.unwrap_or("equals")),
        }
    }

    /// Evaluate against a payload; a comparison on a missing field is false
    pub fn evaluate(&self, payload: &Value) -> bool {
        match self {
            Self::All(conditions) => conditions.iter().all(|c| c.evaluate(payload)),
            Self::Any(conditions) => conditions.iter().any(|c| c.evaluate(payload)),
            Self::Not(inner) => !inner.evaluate(payload),
            Self::Exists { field } => lookup(payload, field).is_some_and(|v| !v.is_null()),
            Self::NotExists { field } => lookup(payload, field).map_or(true, Value::is_null),
            Self::Matches { field, pattern } => lookup(payload, field)
                .filter(|v| !v.is_null())
                .is_some_and(|v| pattern.is_match(&value_as_text(v))),
            Self::Compare {
                field,
                operator,
                value,
            } => match lookup(payload, field) {
                Some(actual) if !actual.is_null() => compare(actual, *operator, value),
                _ => false,
            },
        }
    }

    fn to_value(&self) -> Value {
        let mut object = Map::new();
        match self {
            Self::All(conditions) | Self::Any(conditions) => {
                let operator = if matches!(self, Self::All(_)) { "and" } else { "or" };
                object.insert("operator".into(), operator.into());
                object.insert(
                    "conditions".into(),
                    Value::Array(conditions.iter().map(Condition::to_value).collect()),
                );
            }
            Self::Not(inner) => {
                object.insert("operator".into(), "not".into());
                object.insert("condition".into(), inner.to_value());
            }
            Self::Compare {
                field,
                operator,
                value,
            } => {
                object.insert("field".into(), field.clone().into());
                object.insert("operator".into(), operator.as_str().into());
                object.insert("value".into(), value.clone());
            }
            Self::Matches { field, pattern } => {
                object.insert("field".into(), field.clone().into());
                object.insert("operator".into(), "regex".into());
                object.insert("value".into(), strip_anchors(pattern.as_str()).into());
            }
            Self::Exists { field } | Self::NotExists { field } => {
                let operator = if matches!(self, Self::Exists { .. }) {
                    "exists"
                } else {
                    "not_exists"
                };
                object.insert("field".into(), field.clone().into());
                object.insert("operator".into(), operator.into());
            }
        }
        Value::Object(object)
    }
}

impl TryFrom<Value> for Condition {
    type Error = ConditionError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Condition::parse(&value)
    }
}

impl From<Condition> for Value {
    fn from(condition: Condition) -> Self {
        condition.to_value()
    }
}

fn parse_list(object: &Map<String, Value>) -> Result<Vec<Condition>, ConditionError> {
    let conditions = object
        .get("conditions")
        .and_then(Value::as_array)
        .ok_or(ConditionError::MissingKey("conditions"))?;
    conditions.iter().map(Condition::parse).collect()
}

fn parse_field_condition(
    object: &Map<String, Value>,
    operator: &str,
) -> Result<Condition, ConditionError> {
    let field = object
        .get("field")
        .and_then(Value::as_str)
        .ok_or(ConditionError::MissingKey("field"))?
        .to_string();
    let value = object.get("value").cloned().unwrap_or(Value::Null);

    match operator {
        "exists" => Ok(Condition::Exists { field }),
        "not_exists" => Ok(Condition::NotExists { field }),
        "regex" => {
            let source = value_as_text(&value);
            let pattern = Regex::new(&format!("^(?:{source})$")).map_err(|e| {
                ConditionError::InvalidRegex {
                    pattern: source.clone(),
                    reason: e.to_string(),
                }
            })?;
            Ok(Condition::Matches { field, pattern })
        }
        other => {
            let operator = ComparisonOperator::parse(other)
                .ok_or_else(|| ConditionError::UnknownOperator(other.to_string()))?;
            Ok(Condition::Compare {
                field,
                operator,
                value,
            })
        }
    }
}

fn strip_anchors(pattern: &str) -> &str {
    pattern
        .strip_prefix("^(?:")
        .and_then(|p| p.strip_suffix(")$"))
        .unwrap_or(pattern)
}

/// Resolve a dot path such as `a.b.0.c` or `{{a.b}}` inside a payload
pub fn lookup<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    let path = path
        .strip_prefix("{{")
        .and_then(|p| p.strip_suffix("}}"))
        .unwrap_or(path)
        .trim();

    if path.is_empty() {
        return Some(payload);
    }

    path.split('.').try_fold(payload, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// String form used by text operators; strings are not re-quoted
pub fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => value_as_text(actual) == value_as_text(expected),
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::Array(items) => items.iter().any(|item| loosely_equal(item, expected)),
        Value::Object(map) => map.contains_key(&value_as_text(expected)),
        other => value_as_text(other).contains(&value_as_text(expected)),
    }
}

fn compare(actual: &Value, operator: ComparisonOperator, expected: &Value) -> bool {
    use ComparisonOperator::*;

    match operator {
        Equals => loosely_equal(actual, expected),
        NotEquals => !loosely_equal(actual, expected),
        Contains => contains(actual, expected),
        NotContains => !contains(actual, expected),
        StartsWith => value_as_text(actual).starts_with(&value_as_text(expected)),
        EndsWith => value_as_text(actual).ends_with(&value_as_text(expected)),
        GreaterThan | LessThan | GreaterEqual | LessEqual => {
            let ordering = match (as_number(actual), as_number(expected)) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            };
            match (operator, ordering) {
                (GreaterThan, Some(o)) => o == Ordering::Greater,
                (LessThan, Some(o)) => o == Ordering::Less,
                (GreaterEqual, Some(o)) => o != Ordering::Less,
                (LessEqual, Some(o)) => o != Ordering::Greater,
                _ => false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn condition(value: Value) -> Condition {
        Condition::parse(&value).unwrap()
    }

    #[test]
    fn test_simple_comparisons() {
        let payload = json!({
            "action": "opened",
            "pull_request": {"number": 42, "title": "Fix flaky test", "labels": ["bug", "ci"]},
        });

        assert!(condition(json!({"field": "action", "value": "opened"})).evaluate(&payload));
        assert!(condition(json!({"field": "{{pull_request.number}}", "operator": "greater_than", "value": 10})).evaluate(&payload));
        assert!(condition(json!({"field": "pull_request.number", "operator": "equals", "value": "42"})).evaluate(&payload));
        assert!(condition(json!({"field": "pull_request.labels", "operator": "contains", "value": "bug"})).evaluate(&payload));
        assert!(condition(json!({"field": "pull_request.title", "operator": "starts_with", "value": "Fix"})).evaluate(&payload));
        assert!(!condition(json!({"field": "pull_request.title", "operator": "ends_with", "value": "Fix"})).evaluate(&payload));
        assert!(condition(json!({"field": "pull_request.labels.1", "operator": "equals", "value": "ci"})).evaluate(&payload));
    }

    #[test]
    fn test_missing_field_is_false_except_not_exists() {
        let payload = json!({"a": 1});

        assert!(!condition(json!({"field": "b", "operator": "not_equals", "value": 1})).evaluate(&payload));
        assert!(condition(json!({"field": "b", "operator": "not_exists"})).evaluate(&payload));
        assert!(condition(json!({"field": "a", "operator": "exists"})).evaluate(&payload));
    }

    #[test]
    fn test_compound_conditions() {
        let payload = json!({"branch": "main", "commits": 3});
        let expr = condition(json!({
            "operator": "and",
            "conditions": [
                {"field": "branch", "value": "main"},
                {"operator": "not", "condition": {"field": "commits", "operator": "less_than", "value": 1}},
                {"operator": "or", "conditions": [
                    {"field": "commits", "operator": "greater_equal", "value": 3},
                    {"field": "forced", "operator": "exists"}
                ]}
            ]
        }));

        assert!(expr.evaluate(&payload));
        assert!(!expr.evaluate(&json!({"branch": "dev", "commits": 3})));
        assert!(condition(json!({"operator": "and", "conditions": []})).evaluate(&payload));
        assert!(!condition(json!({"operator": "or", "conditions": []})).evaluate(&payload));
    }

    #[test]
    fn test_regex_is_full_match() {
        let expr = condition(json!({"field": "ref", "operator": "regex", "value": "refs/heads/release-\\d+"}));

        assert!(expr.evaluate(&json!({"ref": "refs/heads/release-12"})));
        assert!(!expr.evaluate(&json!({"ref": "refs/heads/release-12-hotfix"})));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Condition::parse(&json!("branch == main")),
            Err(ConditionError::NotAnObject(_))
        ));
        assert!(matches!(
            Condition::parse(&json!({"field": "a", "operator": "approximately", "value": 1})),
            Err(ConditionError::UnknownOperator(_))
        ));
        assert!(matches!(
            Condition::parse(&json!({"field": "a", "operator": "regex", "value": "("})),
            Err(ConditionError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn test_condition_deserializes_through_serde() {
        let expr: Condition =
            serde_json::from_value(json!({"field": "channel", "operator": "regex", "value": "#ops-.*"}))
                .unwrap();
        let back = serde_json::to_value(&expr).unwrap();

        assert_eq!(back, json!({"field": "channel", "operator": "regex", "value": "#ops-.*"}));
    }
}
