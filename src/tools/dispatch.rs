use super::args::{CreateNodeArgs, ToolArgs};
use super::ToolName;
use crate::agent::model::ToolCall;
use crate::error::{ActionFailure, ErrorKind};
use crate::graph::GraphStore;
use crate::resolver::{EntityRef, EntityResolver};
use crate::types::{CreatedEntity, ToolInvocation};
use serde_json::json;
use std::sync::Arc;

/// A validated write, ready to hit the graph.
#[derive(Debug, Clone, PartialEq)]
pub enum StagedCall {
    /// `node_type` is the vocabulary's spelling of the requested type.
    CreateNode(CreateNodeArgs),
    CreateRelationship {
        from: EntityRef,
        to: EntityRef,
        relation_type: String,
    },
}

/// What the dispatcher decided about one tool call before executing anything.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Ready(StagedCall),
    Rejected(ActionFailure),
    /// In the vocabulary, no handler.
    Pending(ToolName),
    /// Outside the vocabulary.
    Ignored,
}

/// Turns model tool calls into graph writes.
#[derive(Clone)]
pub struct ToolDispatcher {
    graph: Arc<dyn GraphStore>,
    allowed_entity_types: Vec<String>,
}

impl ToolDispatcher {
    /// An empty `allowed_entity_types` rejects every `create_node`.
    pub fn new(graph: Arc<dyn GraphStore>, allowed_entity_types: Vec<String>) -> Self {
        Self {
            graph,
            allowed_entity_types,
        }
    }

    pub fn allowed_entity_types(&self) -> &[String] {
        &self.allowed_entity_types
    }

    pub fn with_entity_types(&self, allowed_entity_types: Vec<String>) -> Self {
        Self {
            graph: Arc::clone(&self.graph),
            allowed_entity_types,
        }
    }

    /// Validate a call and resolve relationship endpoints. Touches nothing.
    pub fn stage(&self, call: &ToolCall, resolver: &EntityResolver<'_>) -> Stage {
        let Some(tool) = ToolName::from_str(&call.function_name) else {
            return Stage::Ignored;
        };
        if !tool.has_handler() {
            return Stage::Pending(tool);
        }

        let args = match ToolArgs::parse(tool, &call.arguments) {
            Ok(args) => args,
            Err(failure) => return Stage::Rejected(failure),
        };

        match args {
            ToolArgs::CreateNode(args) => match self.vocabulary_entry(&args.node_type) {
                Some(node_type) => Stage::Ready(StagedCall::CreateNode(CreateNodeArgs {
                    node_type: node_type.to_string(),
                    ..args
                })),
                None => Stage::Rejected(ActionFailure::new(
                    ErrorKind::InvalidEntityType,
                    format!(
                        "entity type '{}' for '{}' is not one of [{}]",
                        args.node_type,
                        args.name,
                        self.allowed_entity_types.join(", ")
                    ),
                )),
            },
            ToolArgs::CreateRelationship(args) => {
                let from = resolver.resolve(&args.from_node_id);
                let to = resolver.resolve(&args.to_node_id);
                match (from, to) {
                    (Some(from), Some(to)) => Stage::Ready(StagedCall::CreateRelationship {
                        from,
                        to,
                        relation_type: args.relation_type,
                    }),
                    (from, to) => {
                        let mut missing = Vec::new();
                        if from.is_none() {
                            missing.push(format!("fromNodeId '{}'", args.from_node_id));
                        }
                        if to.is_none() {
                            missing.push(format!("toNodeId '{}'", args.to_node_id));
                        }
                        Stage::Rejected(ActionFailure::new(
                            ErrorKind::UnresolvedEntityReference,
                            format!("could not resolve {}", missing.join(" and ")),
                        ))
                    }
                }
            }
        }
    }

    /// Perform a staged write through the graph store.
    pub async fn execute(&self, call: &ToolCall, staged: StagedCall) -> ToolInvocation {
        let tool = call.function_name.as_str();
        let arguments = call.arguments.clone();

        match staged {
            StagedCall::CreateNode(args) => {
                match self
                    .graph
                    .create_node(&args.node_type, &args.name, &args.description)
                    .await
                {
                    Ok(id) => {
                        tracing::info!("created {} node '{}' ({})", args.node_type, args.name, id);
                        let output =
                            json!({ "id": id, "name": args.name, "type": args.node_type })
                                .to_string();
                        ToolInvocation::created(
                            tool,
                            arguments,
                            output,
                            CreatedEntity {
                                reference_name: args.name,
                                id,
                                entity_type: args.node_type,
                            },
                        )
                    }
                    Err(e) => execution_failure(tool, arguments, e),
                }
            }
            StagedCall::CreateRelationship {
                from,
                to,
                relation_type,
            } => match self
                .graph
                .create_relationship(&from.id, &to.id, &relation_type)
                .await
            {
                Ok(id) => {
                    tracing::info!("linked {} -[{}]-> {} ({})", from.id, relation_type, to.id, id);
                    let output = json!({
                        "id": id,
                        "fromNodeId": from.id,
                        "toNodeId": to.id,
                        "relationType": relation_type
                    })
                    .to_string();
                    ToolInvocation::succeeded(tool, arguments, output)
                }
                Err(e) => execution_failure(tool, arguments, e),
            },
        }
    }

    /// Stage then execute one call.
    pub async fn dispatch(&self, call: &ToolCall, resolver: &EntityResolver<'_>) -> ToolInvocation {
        match self.stage(call, resolver) {
            Stage::Ready(staged) => self.execute(call, staged).await,
            Stage::Rejected(failure) => {
                tracing::warn!("{} rejected: {}", call.function_name, failure);
                ToolInvocation::failed(&call.function_name, call.arguments.clone(), failure)
            }
            Stage::Pending(tool) => {
                tracing::info!("{} has no handler; left pending", tool);
                ToolInvocation::pending(&call.function_name, call.arguments.clone())
            }
            Stage::Ignored => {
                tracing::warn!("ignoring call to unknown tool '{}'", call.function_name);
                ToolInvocation::ignored(&call.function_name, call.arguments.clone())
            }
        }
    }

    /// Exact, case-sensitive membership in the vocabulary.
    fn vocabulary_entry(&self, requested: &str) -> Option<&str> {
        let requested = requested.trim();
        self.allowed_entity_types
            .iter()
            .map(|t| t.trim())
            .find(|t| *t == requested)
    }
}

fn execution_failure(tool: &str, arguments: serde_json::Value, err: anyhow::Error) -> ToolInvocation {
    let failure = ActionFailure::new(ErrorKind::ToolExecutionError, format!("{:#}", err));
    tracing::warn!("{} failed: {}", tool, failure);
    ToolInvocation::failed(tool, arguments, failure)
}
