//! Prompt construction for planning, per-action analysis and summarizing.

use super::Plan;
use crate::tools::ToolName;
use crate::types::{ContextItem, CreatedEntity, ExecutionRecord, InvocationStatus, ToolCallOutcome};

pub fn plan_system_prompt(allowed_entity_types: &[String]) -> String {
    let tools = ToolName::ALL
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"You plan changes to a knowledge graph.

Answer with a single JSON object and nothing else, using exactly these fields:
{{
  "intent": "QUERY" or "MODIFICATION",
  "analysis": "why the request needs these steps",
  "contextObservations": "what the retrieved context does and does not contain",
  "proposedActions": ["one action per entry, in execution order"],
  "requiredTools": ["tool names"]
}}

Allowed tools: {tools}
Allowed entity types: {types}

Rules:
- Use only the allowed tools and entity types.
- Refer to existing entities by the names or ids shown in the context.
- Create an entity before any action that links to it."#,
        tools = tools,
        types = vocabulary(allowed_entity_types),
    )
}

pub fn plan_user_prompt(prompt: &str, context: &[ContextItem]) -> String {
    format!(
        "Request:\n{}\n\nRetrieved context:\n{}",
        prompt.trim(),
        render_context(context)
    )
}

pub fn action_system_prompt(allowed_entity_types: &[String]) -> String {
    format!(
        "You carry out one step of an approved plan against a knowledge graph.\n\
         Briefly state what you will do, then call the tools needed for this step only.\n\
         Node types must be one of: {}.\n\
         For relationships, pass entity names or ids as fromNodeId and toNodeId.\n\
         If the step needs no tool, answer with text only.",
        vocabulary(allowed_entity_types)
    )
}

pub struct ActionPrompt<'a> {
    pub prompt: &'a str,
    pub plan: &'a Plan,
    pub step_number: usize,
    pub action: &'a str,
    pub context: &'a [ContextItem],
    pub prior_records: &'a [ExecutionRecord],
    pub created: &'a [CreatedEntity],
}

pub fn action_user_prompt(input: &ActionPrompt<'_>) -> String {
    let mut out = String::new();
    out.push_str(&format!("Original request:\n{}\n\n", input.prompt.trim()));
    out.push_str(&format!("Plan analysis:\n{}\n\n", input.plan.analysis()));
    out.push_str(&format!(
        "Current step {} of {}:\n{}\n\n",
        input.step_number,
        input.plan.proposed_actions().len(),
        input.action
    ));
    out.push_str(&format!(
        "Retrieved context:\n{}\n\n",
        render_context(input.context)
    ));

    out.push_str("Entities created so far in this run:\n");
    if input.created.is_empty() {
        out.push_str("(none)\n");
    } else {
        for entity in input.created {
            out.push_str(&format!(
                "- {} ({}) id={}\n",
                entity.reference_name, entity.entity_type, entity.id
            ));
        }
    }

    out.push_str("\nResults of earlier steps:\n");
    if input.prior_records.is_empty() {
        out.push_str("(none)\n");
    } else {
        for record in input.prior_records {
            out.push_str(&format!("- {}\n", render_record(record)));
        }
    }
    out
}

pub fn summary_system_prompt() -> String {
    "You report on a completed knowledge-graph run. Be concise. State what was done, \
     what failed and why, and what is still unimplemented. Do not claim success for \
     failed or pending steps."
        .to_string()
}

pub fn summary_user_prompt(prompt: &str, plan: &Plan, records: &[ExecutionRecord]) -> String {
    let required: Vec<String> = plan
        .required_tools()
        .iter()
        .map(|tool| {
            if tool.has_handler() {
                tool.to_string()
            } else {
                format!("{} (not implemented)", tool)
            }
        })
        .collect();
    let mut out = format!(
        "Request:\n{}\n\nIntent: {}\nPlan analysis:\n{}\nRequired tools: {}\n\nStep results:\n",
        prompt.trim(),
        plan.intent().as_str(),
        plan.analysis(),
        if required.is_empty() { "(none)".to_string() } else { required.join(", ") }
    );
    if records.is_empty() {
        out.push_str("(the plan had no actions)\n");
    }
    for record in records {
        out.push_str(&format!("- {}\n", render_record(record)));
    }
    out
}

fn vocabulary(allowed_entity_types: &[String]) -> String {
    if allowed_entity_types.is_empty() {
        "(none; do not create nodes)".to_string()
    } else {
        allowed_entity_types.join(", ")
    }
}

fn render_context(context: &[ContextItem]) -> String {
    if context.is_empty() {
        return "(nothing relevant found)".to_string();
    }
    context
        .iter()
        .map(|item| format!("- {} (score {:.2})", item.describe(), item.score))
        .collect::<Vec<_>>()
        .join("\n")
}

/// One line per record: step, action, and the outcome of each tool call.
pub fn render_record(record: &ExecutionRecord) -> String {
    let mut line = format!("step {}: {}", record.step_number, record.action);
    if let ToolCallOutcome::Failed { error } = &record.tool_call_outcome {
        line.push_str(&format!(" => FAILED ({})", error));
        return line;
    }
    let invocations = record.invocations();
    if invocations.is_empty() {
        line.push_str(" => no tool calls");
        return line;
    }
    let parts: Vec<String> = invocations
        .iter()
        .map(|inv| match inv.status {
            InvocationStatus::Succeeded => format!("{} succeeded", inv.tool),
            InvocationStatus::Failed => format!(
                "{} FAILED ({})",
                inv.tool,
                inv.error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_default()
            ),
            InvocationStatus::Pending => format!("{} pending (not implemented)", inv.tool),
            InvocationStatus::Ignored => format!("{} ignored (unknown tool)", inv.tool),
        })
        .collect();
    line.push_str(&format!(" => {}", parts.join("; ")));
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_prompt_lists_vocabularies() {
        let prompt = plan_system_prompt(&["Person".into(), "Company".into()]);
        assert!(prompt.contains("Person, Company"));
        assert!(prompt.contains("delete_node_with_strategy"));
        assert!(prompt.contains("\"intent\""));
    }

    #[test]
    fn summary_prompt_marks_unimplemented_tools() {
        let plan = crate::planner::validate_plan(
            r#"{"intent":"MODIFICATION","analysis":"Rename Acme","contextObservations":"Acme exists",
                "proposedActions":["Rename Acme"],"requiredTools":["create_node","update_node"]}"#,
        )
        .unwrap();
        let prompt = summary_user_prompt("rename Acme", &plan, &[]);
        assert!(prompt.contains("Required tools: create_node, update_node (not implemented)"));
    }

    #[test]
    fn empty_context_is_called_out() {
        let prompt = plan_user_prompt("add Acme", &[]);
        assert!(prompt.contains("nothing relevant found"));
    }
}
