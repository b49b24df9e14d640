//! Deterministic execution report appended to every run summary.

use crate::planner::Plan;
use crate::types::{ExecutionRecord, InvocationStatus, ToolCallOutcome};
use serde::{Deserialize, Serialize};

/// Invocation counts across a run. A failed analysis counts as one failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub succeeded: usize,
    pub failed: usize,
    pub pending: usize,
    pub ignored: usize,
}

impl Tally {
    pub fn of(records: &[ExecutionRecord]) -> Self {
        let mut tally = Tally::default();
        for record in records {
            tally.add(record);
        }
        tally
    }

    pub fn add(&mut self, record: &ExecutionRecord) {
        if let ToolCallOutcome::Failed { .. } = record.tool_call_outcome {
            self.failed += 1;
        }
        for invocation in record.invocations() {
            match invocation.status {
                InvocationStatus::Succeeded => self.succeeded += 1,
                InvocationStatus::Failed => self.failed += 1,
                InvocationStatus::Pending => self.pending += 1,
                InvocationStatus::Ignored => self.ignored += 1,
            }
        }
    }
}

/// Render the report. Every failure is listed with its kind and reason.
pub fn execution_report(plan: &Plan, records: &[ExecutionRecord]) -> String {
    let mut succeeded = Vec::new();
    let mut failed = Vec::new();
    let mut pending = Vec::new();
    let mut ignored = Vec::new();
    let mut idle = Vec::new();

    for record in records {
        let step = format!("step {} ({})", record.step_number, record.action);
        if let ToolCallOutcome::Failed { error } = &record.tool_call_outcome {
            failed.push(format!("{}: {}", step, error));
            continue;
        }
        if record.invocations().is_empty() {
            idle.push(step);
            continue;
        }
        for invocation in record.invocations() {
            match invocation.status {
                InvocationStatus::Succeeded => {
                    let created = invocation
                        .created_entity
                        .as_ref()
                        .map(|e| format!(" created {} '{}' ({})", e.entity_type, e.reference_name, e.id))
                        .unwrap_or_default();
                    succeeded.push(format!("{}: {}{}", step, invocation.tool, created));
                }
                InvocationStatus::Failed => {
                    let reason = invocation
                        .error
                        .as_ref()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "unknown failure".to_string());
                    failed.push(format!("{}: {} {}", step, invocation.tool, reason));
                }
                InvocationStatus::Pending => pending.push(format!(
                    "{}: {} is not implemented yet",
                    step, invocation.tool
                )),
                InvocationStatus::Ignored => {
                    ignored.push(format!("{}: unknown tool {}", step, invocation.tool))
                }
            }
        }
    }

    // Required tools without a handler are unimplemented even if no call named them.
    for tool in plan.required_tools().iter().filter(|t| !t.has_handler()) {
        let named = records
            .iter()
            .flat_map(|r| r.invocations())
            .any(|i| i.status == InvocationStatus::Pending && i.tool == tool.as_str());
        if !named {
            pending.push(format!("{} is required by the plan but not implemented yet", tool));
        }
    }

    let tally = Tally::of(records);
    let mut out = format!(
        "Execution report: intent {}, {} action(s), {} succeeded, {} failed, {} pending\n",
        plan.intent().as_str(),
        plan.proposed_actions().len(),
        tally.succeeded,
        tally.failed,
        tally.pending,
    );
    section(&mut out, "Succeeded", &succeeded);
    section(&mut out, "Failed", &failed);
    section(&mut out, "Not implemented", &pending);
    section(&mut out, "Ignored", &ignored);
    section(&mut out, "No tool calls", &idle);
    out.trim_end().to_string()
}

fn section(out: &mut String, title: &str, lines: &[String]) {
    if lines.is_empty() {
        return;
    }
    out.push_str(&format!("{}:\n", title));
    for line in lines {
        out.push_str(&format!("  - {}\n", line));
    }
}
