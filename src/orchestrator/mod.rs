//! Run orchestration
//!
//! Drives a request through embedding, retrieval, planning, validation,
//! per-action execution and summarizing. Every stage is a named durable step,
//! so re-running with the same run id replays finished work instead of
//! repeating it. Step names:
//!
//! `embed-prompt`, `retrieve-context`, `generate-plan`, `validate-plan`, then for
//! each action `n` (1-based) `analyze-action-n`, `execute-action-n-call-k` and
//! `notify-action-n`, then `generate-summary` and `notify-complete`.

pub mod builder;
pub mod summary;

use crate::durable::{StepExecutor, StepJournal};
use crate::embeddings::Embedder;
use crate::error::{ActionFailure, AgentError, ErrorKind};
use crate::notify::{EventType, NotificationDispatcher, NotificationEvent};
use crate::planner::{validate_plan, Plan, PlanGenerator};
use crate::resolver::EntityResolver;
use crate::retrieval::{ContextFilter, ContextRetriever};
use crate::tools::ToolDispatcher;
use crate::types::{
    ContextItem, CreatedEntity, DispatchResult, ExecutionRecord, ToolCallOutcome, ToolInvocation,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use builder::OrchestratorBuilder;
pub use summary::{execution_report, Tally};

/// Shared stop switch. In-flight calls finish; no further step is scheduled.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A run request. Unset fields fall back to the orchestrator defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    pub prompt: String,
    pub allowed_entity_types: Option<Vec<String>>,
    pub context_filter: Option<ContextFilter>,
    /// Reusing a run id resumes that run from its journal.
    pub run_id: Option<String>,
    /// Progress events go to this consumer when a notifier is configured.
    pub consumer_id: Option<String>,
    pub top_k: Option<usize>,
}

impl RunRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_entity_types(mut self, types: Vec<String>) -> Self {
        self.allowed_entity_types = Some(types);
        self
    }

    pub fn with_context_filter(mut self, filter: ContextFilter) -> Self {
        self.context_filter = Some(filter);
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_consumer(mut self, consumer_id: impl Into<String>) -> Self {
        self.consumer_id = Some(consumer_id.into());
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    pub run_id: String,
    pub plan: Plan,
    pub execution_records: Vec<ExecutionRecord>,
    pub summary: String,
}

/// Analysis step result as journaled.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AnalyzedAction {
    analysis_output: String,
    tool_call_outcome: ToolCallOutcome,
}

/// Per-run state. Rebuilt from the journal on replay.
struct RunState<'a> {
    steps: StepExecutor,
    request: &'a RunRequest,
    cancel: &'a CancellationFlag,
    entity_types: Vec<String>,
    registry: Vec<CreatedEntity>,
    records: Vec<ExecutionRecord>,
}

impl RunState<'_> {
    fn run_id(&self) -> &str {
        self.steps.run_id()
    }

    fn ensure_active(&self, step: &str) -> Result<(), AgentError> {
        if self.cancel.is_cancelled() {
            info!(run_id = %self.run_id(), step, "run cancelled");
            return Err(AgentError::Cancelled {
                run_id: self.run_id().to_string(),
                step: step.to_string(),
            });
        }
        Ok(())
    }
}

/// The agent pipeline. Reentrant: all run state lives in the call.
pub struct Orchestrator {
    embedder: Arc<dyn Embedder>,
    retriever: Arc<dyn ContextRetriever>,
    planner: PlanGenerator,
    dispatcher: ToolDispatcher,
    journal: Arc<dyn StepJournal>,
    notifier: Option<NotificationDispatcher>,
    top_k: usize,
    default_filter: Option<ContextFilter>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Run `prompt` with an explicit entity vocabulary and optional filter.
    pub async fn run(
        &self,
        prompt: &str,
        allowed_entity_types: &[String],
        context_filter: Option<ContextFilter>,
    ) -> Result<RunOutput, AgentError> {
        let mut request = RunRequest::new(prompt).with_entity_types(allowed_entity_types.to_vec());
        request.context_filter = context_filter;
        self.run_request(request).await
    }

    pub async fn run_request(&self, request: RunRequest) -> Result<RunOutput, AgentError> {
        self.run_cancellable(request, &CancellationFlag::new()).await
    }

    pub async fn run_cancellable(
        &self,
        request: RunRequest,
        cancel: &CancellationFlag,
    ) -> Result<RunOutput, AgentError> {
        let run_id = request
            .run_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let entity_types = request
            .allowed_entity_types
            .clone()
            .unwrap_or_else(|| self.dispatcher.allowed_entity_types().to_vec());

        let mut state = RunState {
            steps: StepExecutor::new(run_id.clone(), self.journal.clone()),
            request: &request,
            cancel,
            entity_types,
            registry: Vec::new(),
            records: Vec::new(),
        };

        info!(run_id = %run_id, "starting run");
        match self.drive(&mut state).await {
            Ok(output) => {
                info!(run_id = %run_id, "run finished");
                Ok(output)
            }
            Err(err) => {
                error!(run_id = %run_id, kind = %err.kind(), "run failed: {}", err);
                if !matches!(err, AgentError::Cancelled { .. }) {
                    self.report_failure(&state, &err).await;
                }
                Err(err)
            }
        }
    }

    async fn drive(&self, state: &mut RunState<'_>) -> Result<RunOutput, AgentError> {
        let request = state.request;

        state.ensure_active("embed-prompt")?;
        let vector: Vec<f32> = state
            .steps
            .run("embed-prompt", || async {
                self.embedder
                    .embed(&request.prompt)
                    .await
                    .map_err(|e| AgentError::Embedding(format!("{:#}", e)))
            })
            .await?;

        state.ensure_active("retrieve-context")?;
        let top_k = request.top_k.unwrap_or(self.top_k);
        let filter = request
            .context_filter
            .clone()
            .or_else(|| self.default_filter.clone());
        let context: Vec<ContextItem> = state
            .steps
            .run("retrieve-context", || async {
                self.retriever
                    .query(&vector, top_k, filter.as_ref())
                    .await
                    .map_err(|e| AgentError::Retrieval(format!("{:#}", e)))
            })
            .await?;
        info!(run_id = %state.run_id(), items = context.len(), "context retrieved");

        state.ensure_active("generate-plan")?;
        let entity_types = state.entity_types.clone();
        let raw_plan: String = state
            .steps
            .run("generate-plan", || async {
                self.planner
                    .generate(&request.prompt, &context, &entity_types)
                    .await
                    .map_err(|e| AgentError::PlanGeneration(format!("{:#}", e)))
            })
            .await?;

        state.ensure_active("validate-plan")?;
        let plan: Plan = state
            .steps
            .run("validate-plan", || async {
                validate_plan(&raw_plan).map_err(AgentError::from)
            })
            .await?;
        info!(
            run_id = %state.run_id(),
            intent = plan.intent().as_str(),
            actions = plan.proposed_actions().len(),
            "plan validated"
        );

        for (index, action) in plan.proposed_actions().iter().enumerate() {
            let record = self.execute_action(state, &plan, &context, index + 1, action).await?;
            self.notify_action(state, &record).await?;
            state.records.push(record);
        }

        state.ensure_active("generate-summary")?;
        let records = state.records.clone();
        let summary: String = state
            .steps
            .run("generate-summary", || async {
                Ok(self.summarize(&request.prompt, &plan, &records).await)
            })
            .await?;

        let tally = Tally::of(&state.records);
        self.notify(
            state,
            "notify-complete",
            EventType::Complete,
            json!({
                "runId": state.run_id(),
                "summary": summary,
                "succeeded": tally.succeeded,
                "failed": tally.failed,
                "pending": tally.pending,
            }),
        )
        .await?;

        Ok(RunOutput {
            run_id: state.run_id().to_string(),
            plan,
            execution_records: std::mem::take(&mut state.records),
            summary,
        })
    }

    /// Analyze one action and dispatch its tool calls. Failures are recorded,
    /// never returned; only cancellation and journal errors escape.
    async fn execute_action(
        &self,
        state: &mut RunState<'_>,
        plan: &Plan,
        context: &[ContextItem],
        step_number: usize,
        action: &str,
    ) -> Result<ExecutionRecord, AgentError> {
        let analyze_step = format!("analyze-action-{}", step_number);
        state.ensure_active(&analyze_step)?;

        let prompt = PlanGenerator::action_prompt(
            &state.request.prompt,
            plan,
            step_number,
            context,
            &state.records,
            &state.registry,
        );
        let entity_types = &state.entity_types;
        let analyzed: AnalyzedAction = state
            .steps
            .run(&analyze_step, || async {
                Ok(match self.planner.analyze_action(&prompt, entity_types).await {
                    Ok(analysis) => AnalyzedAction {
                        analysis_output: analysis.analysis,
                        tool_call_outcome: ToolCallOutcome::Parsed {
                            calls: analysis.tool_calls,
                        },
                    },
                    Err(e) => {
                        warn!(step = step_number, "action analysis failed: {:#}", e);
                        AnalyzedAction {
                            analysis_output: String::new(),
                            tool_call_outcome: ToolCallOutcome::Failed {
                                error: ActionFailure::new(
                                    ErrorKind::AnalysisError,
                                    format!("{:#}", e),
                                ),
                            },
                        }
                    }
                })
            })
            .await?;

        let mut invocations = Vec::new();
        if let ToolCallOutcome::Parsed { calls } = &analyzed.tool_call_outcome {
            let dispatcher = self.dispatcher.with_entity_types(state.entity_types.clone());
            for (call_index, call) in calls.iter().enumerate() {
                let call_step = format!("execute-action-{}-call-{}", step_number, call_index + 1);
                state.ensure_active(&call_step)?;

                let resolver = EntityResolver::new(&state.registry, context);
                let invocation: ToolInvocation = state
                    .steps
                    .run(&call_step, || async { Ok(dispatcher.dispatch(call, &resolver).await) })
                    .await?;

                if let Some(failure) = &invocation.error {
                    warn!(step = step_number, tool = %invocation.tool, "tool call failed: {}", failure);
                }
                if let Some(entity) = &invocation.created_entity {
                    debug!(name = %entity.reference_name, id = %entity.id, "registered created entity");
                    state.registry.push(entity.clone());
                }
                invocations.push(invocation);
            }
        }

        Ok(ExecutionRecord {
            step_number,
            action: action.to_string(),
            analysis_output: analyzed.analysis_output,
            dispatch_result: match &analyzed.tool_call_outcome {
                ToolCallOutcome::Parsed { .. } => Some(DispatchResult { invocations }),
                ToolCallOutcome::Failed { .. } => None,
            },
            tool_call_outcome: analyzed.tool_call_outcome,
            created_entities_snapshot: state.registry.clone(),
        })
    }

    async fn notify_action(
        &self,
        state: &RunState<'_>,
        record: &ExecutionRecord,
    ) -> Result<(), AgentError> {
        let failures: Vec<Value> = record
            .failures()
            .into_iter()
            .map(|f| json!({ "kind": f.kind, "message": f.message }))
            .collect();
        let payload = json!({
            "runId": state.run_id(),
            "stepNumber": record.step_number,
            "action": record.action,
            "status": if failures.is_empty() { "succeeded" } else { "failed" },
            "failures": failures,
            "pending": record.pending_tools(),
        });
        let step = format!("notify-action-{}", record.step_number);
        self.notify(state, &step, EventType::Progress, payload).await
    }

    /// Deliver one event as a durable step. A no-op without a notifier or
    /// consumer. Only the fatal policy turns an undeliverable event into an
    /// error.
    async fn notify(
        &self,
        state: &RunState<'_>,
        step: &str,
        event_type: EventType,
        payload: Value,
    ) -> Result<(), AgentError> {
        let (Some(notifier), Some(consumer)) = (&self.notifier, &state.request.consumer_id) else {
            return Ok(());
        };
        state.ensure_active(step)?;
        let event = NotificationEvent::new(consumer.clone(), event_type, payload);
        let outcome = state
            .steps
            .run(step, || async { notifier.notify(&event).await })
            .await?;
        if !outcome.is_delivered() {
            warn!(run_id = %state.run_id(), step, "continuing without delivering notification");
        }
        Ok(())
    }

    /// Best-effort error event. Not journaled, so each failed attempt reports.
    async fn report_failure(&self, state: &RunState<'_>, err: &AgentError) {
        let (Some(notifier), Some(consumer)) = (&self.notifier, &state.request.consumer_id) else {
            return;
        };
        let event = NotificationEvent::error(
            consumer.clone(),
            json!({
                "runId": state.run_id(),
                "kind": err.kind(),
                "message": err.to_string(),
            }),
        );
        let outcome = notifier.deliver(&event).await;
        if !outcome.is_delivered() {
            warn!(run_id = %state.run_id(), "error notification undeliverable");
        }
    }

    async fn summarize(&self, prompt: &str, plan: &Plan, records: &[ExecutionRecord]) -> String {
        let report = execution_report(plan, records);
        match self.planner.summarize(prompt, plan, records).await {
            Ok(narrative) if !narrative.trim().is_empty() => {
                format!("{}\n\n{}", narrative.trim(), report)
            }
            Ok(_) => report,
            Err(e) => {
                warn!("summary generation failed, using the report alone: {:#}", e);
                report
            }
        }
    }
}
