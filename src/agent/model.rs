//! Language Model Abstraction Layer
//!
//! Defines the capability the pipeline uses to talk to a chat-completion model.
//! Providers translate a system prompt, a user prompt and an optional set of
//! tool definitions into a [`ModelResponse`] carrying text and tool calls.

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

/// Configuration for model generation requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Sampling temperature (0.0 - 2.0)
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Top-p sampling
    pub top_p: Option<f32>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: Some(0.2),
            max_tokens: Some(2048),
            top_p: Some(1.0),
        }
    }
}

/// A tool the model may call, described by a JSON schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Tool call from a model response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this tool call
    pub id: String,
    /// Name of the function/tool to call
    pub function_name: String,
    /// Arguments as JSON
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, function_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            function_name: function_name.into(),
            arguments,
        }
    }
}

/// Parse thinking/reasoning tokens from model response
///
/// Extracts content between `<think>` and `</think>` tags as reasoning,
/// and returns the content after `</think>` as the main response.
///
/// # Example
/// ```
/// use kg_agent::agent::model::parse_thinking_tokens;
///
/// let response = "<think>Let me consider this...</think>Here's my answer.";
/// let (reasoning, content) = parse_thinking_tokens(response);
/// assert_eq!(reasoning, Some("Let me consider this...".to_string()));
/// assert_eq!(content, "Here's my answer.");
/// ```
pub fn parse_thinking_tokens(response: &str) -> (Option<String>, String) {
    static THINK: OnceLock<Regex> = OnceLock::new();
    let think_pattern =
        THINK.get_or_init(|| Regex::new(r"<think>([\s\S]*?)</think>").expect("valid regex"));

    let reasoning = think_pattern
        .captures(response)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().trim().to_string());

    // Everything after the closing tag is the answer; no tag means no reasoning.
    let content = match response.find("</think>") {
        Some(end_idx) => response[end_idx + "</think>".len()..].trim().to_string(),
        None => response.to_string(),
    };

    (reasoning, content)
}

/// Response from a model generation request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Generated content (with thinking tokens removed if present)
    pub content: String,
    /// Model used for generation
    pub model: String,
    /// Token usage statistics
    pub usage: Option<TokenUsage>,
    /// Finish reason
    pub finish_reason: Option<String>,
    /// Tool calls from the model, in emission order
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Reasoning/thinking content extracted from <think> tags (if present)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl ModelResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_tool_call(mut self, call: ToolCall) -> Self {
        self.tool_calls.push(call);
        self
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Types of model providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Mock,
    #[cfg(feature = "openai")]
    OpenAI,
}

impl ProviderKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mock" => Some(ProviderKind::Mock),
            #[cfg(feature = "openai")]
            "openai" => Some(ProviderKind::OpenAI),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Mock => "mock",
            #[cfg(feature = "openai")]
            ProviderKind::OpenAI => "openai",
        }
    }
}

/// Stateless chat-completion capability. One call per invocation.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete a conversation made of a system prompt and a user prompt.
    /// When `tools` is given the model may answer with tool calls.
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        tools: Option<&[ToolSpec]>,
        config: &GenerationConfig,
    ) -> Result<ModelResponse>;
}
