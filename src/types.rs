use crate::agent::model::ToolCall;
use crate::error::ActionFailure;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ========== Retrieved Context ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContextKind {
    Node,
    Relationship,
    Note,
}

impl ContextKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKind::Node => "NODE",
            ContextKind::Relationship => "RELATIONSHIP",
            ContextKind::Note => "NOTE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NODE" => Some(ContextKind::Node),
            "RELATIONSHIP" => Some(ContextKind::Relationship),
            "NOTE" => Some(ContextKind::Note),
            _ => None,
        }
    }
}

/// Kind-specific fields of a retrieved fact. Serialized with a `kind` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContextAttributes {
    #[serde(rename_all = "camelCase")]
    Node {
        name: String,
        #[serde(rename = "type")]
        node_type: String,
    },
    #[serde(rename_all = "camelCase")]
    Relationship {
        from_id: String,
        from_name: String,
        from_type: String,
        to_id: String,
        to_name: String,
        to_type: String,
        relation_type: String,
    },
    #[serde(rename_all = "camelCase")]
    Note {
        author: String,
        parent_node_id: String,
        #[serde(default)]
        content: String,
    },
}

/// A single retrieved fact. Snapshotted once per run and never refreshed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    pub id: String,
    /// Similarity in [0, 1]. Informational only.
    pub score: f32,
    #[serde(flatten)]
    pub attributes: ContextAttributes,
}

impl ContextItem {
    pub fn node(id: impl Into<String>, name: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            score: 0.0,
            attributes: ContextAttributes::Node {
                name: name.into(),
                node_type: node_type.into(),
            },
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    pub fn kind(&self) -> ContextKind {
        match self.attributes {
            ContextAttributes::Node { .. } => ContextKind::Node,
            ContextAttributes::Relationship { .. } => ContextKind::Relationship,
            ContextAttributes::Note { .. } => ContextKind::Note,
        }
    }

    /// Name of a NODE item; `None` for other kinds.
    pub fn node_name(&self) -> Option<&str> {
        match &self.attributes {
            ContextAttributes::Node { name, .. } => Some(name),
            _ => None,
        }
    }

    /// One-line rendering used in prompts and as the text that gets embedded
    /// when the item is indexed.
    pub fn describe(&self) -> String {
        match &self.attributes {
            ContextAttributes::Node { name, node_type } => {
                format!("[NODE {}] {} ({})", self.id, name, node_type)
            }
            ContextAttributes::Relationship {
                from_id,
                from_name,
                from_type,
                to_id,
                to_name,
                to_type,
                relation_type,
            } => format!(
                "[RELATIONSHIP {}] {} ({}, {}) -[{}]-> {} ({}, {})",
                self.id, from_name, from_type, from_id, relation_type, to_name, to_type, to_id
            ),
            ContextAttributes::Note {
                author,
                parent_node_id,
                content,
            } => {
                if content.trim().is_empty() {
                    format!("[NOTE {}] by {} on node {}", self.id, author, parent_node_id)
                } else {
                    format!(
                        "[NOTE {}] by {} on node {}: {}",
                        self.id, author, parent_node_id, content
                    )
                }
            }
        }
    }
}

// ========== Run State ==========

/// An entity created by the current run. Keyed case-insensitively by
/// `reference_name` for later resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedEntity {
    pub reference_name: String,
    pub id: String,
    pub entity_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Succeeded,
    Failed,
    /// Tool is in the plan vocabulary but has no handler yet.
    Pending,
    /// Tool name is outside the vocabulary; never executed.
    Ignored,
}

/// Outcome of one tool call emitted while processing an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool: String,
    pub arguments: Value,
    pub status: InvocationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_entity: Option<CreatedEntity>,
}

impl ToolInvocation {
    fn base(tool: &str, arguments: Value, status: InvocationStatus) -> Self {
        Self {
            tool: tool.to_string(),
            arguments,
            status,
            output: None,
            error: None,
            created_entity: None,
        }
    }

    pub fn succeeded(tool: &str, arguments: Value, output: impl Into<String>) -> Self {
        let mut invocation = Self::base(tool, arguments, InvocationStatus::Succeeded);
        invocation.output = Some(output.into());
        invocation
    }

    pub fn created(tool: &str, arguments: Value, output: impl Into<String>, entity: CreatedEntity) -> Self {
        let mut invocation = Self::succeeded(tool, arguments, output);
        invocation.created_entity = Some(entity);
        invocation
    }

    pub fn failed(tool: &str, arguments: Value, failure: ActionFailure) -> Self {
        let mut invocation = Self::base(tool, arguments, InvocationStatus::Failed);
        invocation.error = Some(failure);
        invocation
    }

    pub fn pending(tool: &str, arguments: Value) -> Self {
        Self::base(tool, arguments, InvocationStatus::Pending)
    }

    pub fn ignored(tool: &str, arguments: Value) -> Self {
        Self::base(tool, arguments, InvocationStatus::Ignored)
    }
}

/// Whether the model produced usable tool calls for an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolCallOutcome {
    Parsed { calls: Vec<ToolCall> },
    Failed { error: ActionFailure },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub invocations: Vec<ToolInvocation>,
}

/// Append-only audit entry for one proposed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    /// 1-based position in the plan's action list.
    pub step_number: usize,
    pub action: String,
    pub analysis_output: String,
    pub tool_call_outcome: ToolCallOutcome,
    pub dispatch_result: Option<DispatchResult>,
    pub created_entities_snapshot: Vec<CreatedEntity>,
}

impl ExecutionRecord {
    pub fn invocations(&self) -> &[ToolInvocation] {
        self.dispatch_result
            .as_ref()
            .map(|d| d.invocations.as_slice())
            .unwrap_or(&[])
    }

    /// Every failure recorded for this action, analysis first.
    pub fn failures(&self) -> Vec<&ActionFailure> {
        let mut failures = Vec::new();
        if let ToolCallOutcome::Failed { error } = &self.tool_call_outcome {
            failures.push(error);
        }
        failures.extend(self.invocations().iter().filter_map(|i| i.error.as_ref()));
        failures
    }

    pub fn succeeded(&self) -> bool {
        self.failures().is_empty()
    }

    /// Tool calls that were accepted but have no handler.
    pub fn pending_tools(&self) -> Vec<&str> {
        self.invocations()
            .iter()
            .filter(|i| i.status == InvocationStatus::Pending)
            .map(|i| i.tool.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn context_item_serializes_with_kind_tag() {
        let item = ContextItem::node("n-1", "Acme", "Company").with_score(0.8);
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["kind"], "NODE");
        assert_eq!(value["name"], "Acme");
        assert_eq!(value["type"], "Company");

        let back: ContextItem = serde_json::from_value(value).unwrap();
        assert_eq!(back, item);
        assert_eq!(back.kind(), ContextKind::Node);
    }

    #[test]
    fn relationship_item_parses_camel_case_fields() {
        let item: ContextItem = serde_json::from_value(json!({
            "kind": "RELATIONSHIP",
            "id": "r-1",
            "score": 0.5,
            "fromId": "a", "fromName": "Alice", "fromType": "Person",
            "toId": "b", "toName": "Acme", "toType": "Company",
            "relationType": "WORKS_AT"
        }))
        .unwrap();
        assert_eq!(item.kind(), ContextKind::Relationship);
        assert!(item.node_name().is_none());
        assert!(item.describe().contains("-[WORKS_AT]->"));
    }

    #[test]
    fn record_collects_failures_in_order() {
        let record = ExecutionRecord {
            step_number: 1,
            action: "link things".into(),
            analysis_output: String::new(),
            tool_call_outcome: ToolCallOutcome::Parsed { calls: vec![] },
            dispatch_result: Some(DispatchResult {
                invocations: vec![
                    ToolInvocation::succeeded("create_node", json!({}), "ok"),
                    ToolInvocation::failed(
                        "create_relationship",
                        json!({}),
                        ActionFailure::new(ErrorKind::UnresolvedEntityReference, "toNodeId 'B'"),
                    ),
                    ToolInvocation::pending("update_node", json!({})),
                ],
            }),
            created_entities_snapshot: vec![],
        };

        assert!(!record.succeeded());
        assert_eq!(record.failures().len(), 1);
        assert_eq!(record.failures()[0].kind, ErrorKind::UnresolvedEntityReference);
        assert_eq!(record.pending_tools(), vec!["update_node"]);
    }

    #[test]
    fn kind_from_str_is_case_insensitive() {
        assert_eq!(ContextKind::from_str("note"), Some(ContextKind::Note));
        assert_eq!(ContextKind::from_str("Node"), Some(ContextKind::Node));
        assert_eq!(ContextKind::from_str("edge"), None);
    }
}
