//! Plan generation and the validated [`Plan`] type.

pub mod prompts;
pub mod validator;

use crate::agent::model::{
    parse_thinking_tokens, GenerationConfig, LanguageModel, ModelResponse, ToolCall, ToolSpec,
};
use crate::error::{ErrorKind, PlanError};
use crate::tools::{handled_tool_specs, ToolName};
use crate::types::{ContextItem, CreatedEntity, ExecutionRecord};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub use prompts::ActionPrompt;
pub use validator::validate_plan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    Query,
    Modification,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Query => "QUERY",
            Intent::Modification => "MODIFICATION",
        }
    }
}

/// A validated plan. Only [`validate_plan`] constructs one, and deserializing
/// goes through the same checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "Value")]
pub struct Plan {
    intent: Intent,
    analysis: String,
    context_observations: String,
    proposed_actions: Vec<String>,
    required_tools: Vec<ToolName>,
}

impl Plan {
    pub fn intent(&self) -> Intent {
        self.intent
    }

    pub fn analysis(&self) -> &str {
        &self.analysis
    }

    pub fn context_observations(&self) -> &str {
        &self.context_observations
    }

    pub fn proposed_actions(&self) -> &[String] {
        &self.proposed_actions
    }

    pub fn required_tools(&self) -> &[ToolName] {
        &self.required_tools
    }
}

impl TryFrom<Value> for Plan {
    type Error = PlanError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match &value {
            Value::Object(object) => validator::validate_object(object, &value.to_string()),
            other => Err(PlanError::new(
                ErrorKind::MalformedPlan,
                "expected a JSON object",
                other.to_string(),
            )),
        }
    }
}

/// Text and tool calls the model produced for one proposed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionAnalysis {
    pub analysis: String,
    pub tool_calls: Vec<ToolCall>,
    /// Reasoning the model emitted before answering, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// All language-model calls of a run.
#[derive(Clone)]
pub struct PlanGenerator {
    model: Arc<dyn LanguageModel>,
    generation: GenerationConfig,
}

impl PlanGenerator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            generation: GenerationConfig::default(),
        }
    }

    pub fn with_generation_config(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    /// Raw plan text for `prompt`. No validation happens here.
    pub async fn generate(
        &self,
        prompt: &str,
        context: &[ContextItem],
        allowed_entity_types: &[String],
    ) -> Result<String> {
        let response = self
            .complete(
                "plan",
                &prompts::plan_system_prompt(allowed_entity_types),
                &prompts::plan_user_prompt(prompt, context),
                None,
            )
            .await?;
        Ok(response.content)
    }

    /// Ask for the tool calls of one action, offering the handled tools.
    pub async fn analyze_action(
        &self,
        input: &ActionPrompt<'_>,
        allowed_entity_types: &[String],
    ) -> Result<ActionAnalysis> {
        let tools = handled_tool_specs(allowed_entity_types);
        let response = self
            .complete(
                "analysis",
                &prompts::action_system_prompt(allowed_entity_types),
                &prompts::action_user_prompt(input),
                Some(&tools),
            )
            .await?;
        Ok(ActionAnalysis {
            analysis: response.content,
            tool_calls: response.tool_calls,
            reasoning: response.reasoning,
        })
    }

    pub async fn summarize(
        &self,
        prompt: &str,
        plan: &Plan,
        records: &[ExecutionRecord],
    ) -> Result<String> {
        let response = self
            .complete(
                "summary",
                &prompts::summary_system_prompt(),
                &prompts::summary_user_prompt(prompt, plan, records),
                None,
            )
            .await?;
        Ok(response.content)
    }

    /// One model call with `<think>` blocks moved from the content into `reasoning`.
    async fn complete(
        &self,
        stage: &'static str,
        system_prompt: &str,
        user_prompt: &str,
        tools: Option<&[ToolSpec]>,
    ) -> Result<ModelResponse> {
        let mut response = self
            .model
            .complete(system_prompt, user_prompt, tools, &self.generation)
            .await?;
        let (reasoning, content) = parse_thinking_tokens(&response.content);
        response.content = content;
        if response.reasoning.is_none() {
            response.reasoning = reasoning;
        }

        let usage = response.usage.as_ref();
        debug!(
            stage,
            model = %response.model,
            finish_reason = response.finish_reason.as_deref().unwrap_or("unknown"),
            prompt_tokens = usage.map_or(0, |u| u.prompt_tokens),
            completion_tokens = usage.map_or(0, |u| u.completion_tokens),
            tool_calls = response.tool_calls.len(),
            reasoning = response.reasoning.is_some(),
            "model call finished"
        );
        Ok(response)
    }

    /// Convenience for callers holding a registry snapshot.
    pub fn action_prompt<'a>(
        prompt: &'a str,
        plan: &'a Plan,
        step_number: usize,
        context: &'a [ContextItem],
        prior_records: &'a [ExecutionRecord],
        created: &'a [CreatedEntity],
    ) -> ActionPrompt<'a> {
        ActionPrompt {
            prompt,
            plan,
            step_number,
            action: &plan.proposed_actions()[step_number - 1],
            context,
            prior_records,
            created,
        }
    }
}
