//! Typed arguments of the tools that have handlers.
//!
//! Model-emitted arguments are untrusted JSON. They are decoded here, at
//! dispatch time, into a closed set of argument types.

use super::ToolName;
use crate::error::{ActionFailure, ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateNodeArgs {
    #[serde(rename = "type")]
    pub node_type: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRelationshipArgs {
    pub from_node_id: String,
    pub to_node_id: String,
    pub relation_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolArgs {
    CreateNode(CreateNodeArgs),
    CreateRelationship(CreateRelationshipArgs),
}

impl ToolArgs {
    /// Decode the arguments of a tool with a handler. Arguments given as a
    /// JSON-encoded string are decoded first.
    pub fn parse(tool: ToolName, arguments: &Value) -> Result<Self, ActionFailure> {
        let decoded;
        let arguments = match arguments {
            Value::String(text) => {
                decoded = serde_json::from_str::<Value>(text)
                    .map_err(|e| invalid(tool, format!("arguments are not JSON: {}", e)))?;
                &decoded
            }
            other => other,
        };

        match tool {
            ToolName::CreateNode => {
                let args: CreateNodeArgs = serde_json::from_value(arguments.clone())
                    .map_err(|e| invalid(tool, e.to_string()))?;
                require_text(tool, "name", &args.name)?;
                require_text(tool, "type", &args.node_type)?;
                Ok(ToolArgs::CreateNode(CreateNodeArgs {
                    node_type: args.node_type.trim().to_string(),
                    name: args.name.trim().to_string(),
                    description: args.description.trim().to_string(),
                }))
            }
            ToolName::CreateRelationship => {
                let args: CreateRelationshipArgs = serde_json::from_value(arguments.clone())
                    .map_err(|e| invalid(tool, e.to_string()))?;
                require_text(tool, "fromNodeId", &args.from_node_id)?;
                require_text(tool, "toNodeId", &args.to_node_id)?;
                require_text(tool, "relationType", &args.relation_type)?;
                Ok(ToolArgs::CreateRelationship(args))
            }
            other => Err(invalid(other, "tool has no handler")),
        }
    }
}

fn require_text(tool: ToolName, field: &str, value: &str) -> Result<(), ActionFailure> {
    if value.trim().is_empty() {
        Err(invalid(tool, format!("'{}' must be non-empty text", field)))
    } else {
        Ok(())
    }
}

fn invalid(tool: ToolName, detail: impl AsRef<str>) -> ActionFailure {
    ActionFailure::new(
        ErrorKind::InvalidToolArguments,
        format!("{}: {}", tool, detail.as_ref()),
    )
}
