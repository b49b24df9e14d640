//! Strict parse-then-validate boundary for model-written plans.
//!
//! Checks run in a fixed order and stop at the first violation:
//! intent, analysis, contextObservations, proposedActions, requiredTools.
//! Every error carries the complete raw text.

use super::{Intent, Plan};
use crate::error::{ErrorKind, PlanError};
use crate::tools::ToolName;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Validate raw model output into a [`Plan`].
pub fn validate_plan(raw: &str) -> Result<Plan, PlanError> {
    let value: Value = match serde_json::from_str(strip_code_fence(raw)) {
        Ok(value) => value,
        // Prose around a fenced block: fall back to the first line-anchored fence.
        Err(e) => embedded_fence(raw)
            .and_then(|body| serde_json::from_str(body).ok())
            .ok_or_else(|| {
                PlanError::new(ErrorKind::MalformedPlan, format!("not valid JSON: {}", e), raw)
            })?,
    };

    let Value::Object(object) = &value else {
        return Err(PlanError::new(
            ErrorKind::MalformedPlan,
            format!("expected a JSON object, found {}", json_type(&value)),
            raw,
        ));
    };

    validate_object(object, raw)
}

/// Validate an already-parsed plan object. `raw` is used for error reporting.
pub(crate) fn validate_object(object: &Map<String, Value>, raw: &str) -> Result<Plan, PlanError> {
    let fail = |kind: ErrorKind, detail: String| PlanError::new(kind, detail, raw);

    let intent = match object.get("intent") {
        Some(Value::String(s)) if s == "QUERY" => Intent::Query,
        Some(Value::String(s)) if s == "MODIFICATION" => Intent::Modification,
        Some(other) => {
            return Err(fail(
                ErrorKind::InvalidIntent,
                format!("intent must be QUERY or MODIFICATION, found {}", other),
            ))
        }
        None => {
            return Err(fail(
                ErrorKind::InvalidIntent,
                "intent is missing; expected QUERY or MODIFICATION".to_string(),
            ))
        }
    };

    let analysis = required_text(object, "analysis").map_err(|d| fail(ErrorKind::MissingField, d))?;
    let context_observations =
        required_text(object, "contextObservations").map_err(|d| fail(ErrorKind::MissingField, d))?;

    let proposed_actions = match object.get("proposedActions") {
        Some(Value::Array(items)) => {
            let mut actions = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::String(s) => actions.push(s.clone()),
                    other => {
                        return Err(fail(
                            ErrorKind::MissingField,
                            format!(
                                "proposedActions[{}] must be text, found {}",
                                i,
                                json_type(other)
                            ),
                        ))
                    }
                }
            }
            actions
        }
        Some(other) => {
            return Err(fail(
                ErrorKind::MissingField,
                format!("proposedActions must be a list, found {}", json_type(other)),
            ))
        }
        None => {
            return Err(fail(
                ErrorKind::MissingField,
                "proposedActions is missing".to_string(),
            ))
        }
    };

    let tool_values = match object.get("requiredTools") {
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(fail(
                ErrorKind::MissingField,
                format!("requiredTools must be a list, found {}", json_type(other)),
            ))
        }
        None => {
            return Err(fail(
                ErrorKind::MissingField,
                "requiredTools is missing".to_string(),
            ))
        }
    };

    let mut tool_names = Vec::with_capacity(tool_values.len());
    for (i, item) in tool_values.iter().enumerate() {
        match item {
            Value::String(s) => tool_names.push(s.as_str()),
            other => {
                return Err(fail(
                    ErrorKind::InvalidToolFormat,
                    format!("requiredTools[{}] must be text, found {}", i, other),
                ))
            }
        }
    }

    let unknown: Vec<&str> = tool_names
        .iter()
        .copied()
        .filter(|name| ToolName::from_str(name).is_none())
        .collect();
    if !unknown.is_empty() {
        return Err(fail(
            ErrorKind::UnknownTool,
            format!("unknown tools: {}", unknown.join(", ")),
        ));
    }
    let required_tools = tool_names
        .into_iter()
        .filter_map(ToolName::from_str)
        .collect();

    Ok(Plan {
        intent,
        analysis,
        context_observations,
        proposed_actions,
        required_tools,
    })
}

fn required_text(object: &Map<String, Value>, field: &str) -> Result<String, String> {
    match object.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(format!("{} is empty", field)),
        Some(other) => Err(format!("{} must be text, found {}", field, json_type(other))),
        None => Err(format!("{} is missing", field)),
    }
}

/// Trimmed input with a leading ```` ```json ```` fence line and a trailing
/// ```` ``` ```` removed. Text that does not start with a fence is only trimmed.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Body of the first fence that opens at the start of a line.
fn embedded_fence(raw: &str) -> Option<&str> {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*```[ \t]*(?i:json)?[ \t]*\r?\n([\s\S]*?)^[ \t]*```")
            .expect("valid regex")
    });
    fence
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|body| body.as_str().trim())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "text",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
