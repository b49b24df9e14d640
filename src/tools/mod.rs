pub mod args;
pub mod dispatch;

use crate::agent::model::ToolSpec;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

pub use args::{CreateNodeArgs, CreateRelationshipArgs, ToolArgs};
pub use dispatch::{Stage, StagedCall, ToolDispatcher};

/// The closed tool vocabulary a plan may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    VectorSearch,
    CreateNode,
    UpdateNode,
    CreateRelationship,
    UpdateRelationship,
    DeleteNodeWithStrategy,
    AskForMoreInformation,
    GenerateSummary,
    ProvideInsights,
}

impl ToolName {
    pub const ALL: [ToolName; 9] = [
        ToolName::VectorSearch,
        ToolName::CreateNode,
        ToolName::UpdateNode,
        ToolName::CreateRelationship,
        ToolName::UpdateRelationship,
        ToolName::DeleteNodeWithStrategy,
        ToolName::AskForMoreInformation,
        ToolName::GenerateSummary,
        ToolName::ProvideInsights,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::VectorSearch => "vector_search",
            ToolName::CreateNode => "create_node",
            ToolName::UpdateNode => "update_node",
            ToolName::CreateRelationship => "create_relationship",
            ToolName::UpdateRelationship => "update_relationship",
            ToolName::DeleteNodeWithStrategy => "delete_node_with_strategy",
            ToolName::AskForMoreInformation => "ask_for_more_information",
            ToolName::GenerateSummary => "generate_summary",
            ToolName::ProvideInsights => "provide_insights",
        }
    }

    /// Exact, case-sensitive lookup.
    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Only these tools execute; the rest of the vocabulary stays pending.
    pub fn has_handler(&self) -> bool {
        matches!(self, ToolName::CreateNode | ToolName::CreateRelationship)
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schema of `create_node`. The entity type list is embedded so the model
/// sees the allowed vocabulary.
pub fn create_node_spec(allowed_entity_types: &[String]) -> ToolSpec {
    let mut type_schema = json!({
        "type": "string",
        "description": "Entity type of the new node"
    });
    if !allowed_entity_types.is_empty() {
        type_schema["enum"] = json!(allowed_entity_types);
    }
    ToolSpec {
        name: ToolName::CreateNode.as_str().to_string(),
        description: "Create a knowledge-graph node. Use the exact name later actions will refer to."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "type": type_schema,
                "name": { "type": "string", "description": "Human-readable name of the entity" },
                "description": { "type": "string", "description": "Optional free-text description" }
            },
            "required": ["type", "name"]
        }),
    }
}

pub fn create_relationship_spec() -> ToolSpec {
    ToolSpec {
        name: ToolName::CreateRelationship.as_str().to_string(),
        description: "Link two existing nodes. Endpoints may be node ids or node names.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "fromNodeId": { "type": "string", "description": "Source node id or name" },
                "toNodeId": { "type": "string", "description": "Target node id or name" },
                "relationType": { "type": "string", "description": "Relationship label, e.g. WORKS_AT" }
            },
            "required": ["fromNodeId", "toNodeId", "relationType"]
        }),
    }
}

/// Specs for every tool that has a handler.
pub fn handled_tool_specs(allowed_entity_types: &[String]) -> Vec<ToolSpec> {
    vec![
        create_node_spec(allowed_entity_types),
        create_relationship_spec(),
    ]
}
