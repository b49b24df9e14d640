//! Mock Model Provider
//!
//! A scripted provider for tests and offline runs. Responses are returned in
//! order and cycle once exhausted; every prompt received is recorded.

use crate::agent::model::{
    GenerationConfig, LanguageModel, ModelResponse, TokenUsage, ToolSpec,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// One prompt pair the mock has seen, plus the tool names offered with it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPrompt {
    pub system: String,
    pub user: String,
    pub tools: Vec<String>,
}

const OFFLINE_PLAN: &str = r#"{
  "intent": "QUERY",
  "analysis": "Offline mock model: answer from retrieved context only.",
  "contextObservations": "Context was retrieved from the local index.",
  "proposedActions": ["Review the retrieved context"],
  "requiredTools": ["vector_search"]
}"#;

/// A scripted reply: either a response or a provider error.
#[derive(Debug, Clone)]
enum Scripted {
    Reply(ModelResponse),
    Fail(String),
}

/// Mock provider that returns predefined responses
#[derive(Debug, Clone)]
pub struct MockProvider {
    /// Canned responses to cycle through
    responses: Vec<Scripted>,
    /// Current response index
    current_index: Arc<Mutex<usize>>,
    /// Prompts received so far
    prompts: Arc<Mutex<Vec<RecordedPrompt>>>,
    /// Model name to report
    model_name: String,
}

impl MockProvider {
    /// Create a new mock provider with a single text response
    pub fn new(response: impl Into<String>) -> Self {
        Self::with_responses(vec![ModelResponse::text(response)])
    }

    /// Create a new mock provider with multiple responses
    pub fn with_responses(responses: Vec<ModelResponse>) -> Self {
        Self {
            responses: responses.into_iter().map(Scripted::Reply).collect(),
            current_index: Arc::new(Mutex::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
            model_name: "mock-model".to_string(),
        }
    }

    /// Create a provider from plain text replies
    pub fn with_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_responses(texts.into_iter().map(ModelResponse::text).collect())
    }

    /// Append a reply that fails with the given message
    pub fn then_fail(mut self, message: impl Into<String>) -> Self {
        self.responses.push(Scripted::Fail(message.into()));
        self
    }

    /// Append a reply
    pub fn then(mut self, response: ModelResponse) -> Self {
        self.responses.push(Scripted::Reply(response));
        self
    }

    /// Plan, action analysis and summary for a one-action QUERY run, so the
    /// binary completes offline with `provider = "mock"`.
    pub fn offline() -> Self {
        Self::with_texts([
            OFFLINE_PLAN,
            "The retrieved context already answers this; no graph change is needed.",
            "Answered from the stored context without modifying the graph.",
        ])
    }

    /// Set the model name
    pub fn with_model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = model_name.into();
        self
    }

    /// Prompts received so far, oldest first
    pub fn prompts(&self) -> Vec<RecordedPrompt> {
        self.prompts.lock().unwrap().clone()
    }

    /// Number of completions requested
    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    /// Get the next response (cycles through available responses)
    fn next_response(&self) -> Option<Scripted> {
        if self.responses.is_empty() {
            return None;
        }
        let mut index = self.current_index.lock().unwrap();
        let response = self.responses[*index % self.responses.len()].clone();
        *index += 1;
        Some(response)
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new("This is a mock response from the test provider.")
    }
}

#[async_trait]
impl LanguageModel for MockProvider {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        tools: Option<&[ToolSpec]>,
        _config: &GenerationConfig,
    ) -> Result<ModelResponse> {
        self.prompts.lock().unwrap().push(RecordedPrompt {
            system: system_prompt.to_string(),
            user: user_prompt.to_string(),
            tools: tools
                .unwrap_or(&[])
                .iter()
                .map(|t| t.name.clone())
                .collect(),
        });

        let mut response = match self.next_response() {
            Some(Scripted::Reply(response)) => response,
            Some(Scripted::Fail(message)) => return Err(anyhow!(message)),
            None => return Err(anyhow!("mock provider has no scripted responses")),
        };

        let prompt_tokens = (system_prompt.len() + user_prompt.len()) as u32 / 4;
        let completion_tokens = response.content.split_whitespace().count() as u32;
        if response.model.is_empty() {
            response.model = self.model_name.clone();
        }
        response.usage.get_or_insert(TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        });
        response.finish_reason.get_or_insert_with(|| {
            if response.tool_calls.is_empty() {
                "stop".to_string()
            } else {
                "tool_calls".to_string()
            }
        });
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::model::ToolCall;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_provider_generate() {
        let provider = MockProvider::new("Hello, world!");
        let config = GenerationConfig::default();

        let response = provider
            .complete("system", "test prompt", None, &config)
            .await
            .unwrap();

        assert_eq!(response.content, "Hello, world!");
        assert_eq!(response.model, "mock-model");
        assert!(response.usage.is_some());
        assert_eq!(response.finish_reason, Some("stop".to_string()));
    }

    #[tokio::test]
    async fn test_mock_provider_cycles_responses() {
        let provider = MockProvider::with_texts(["First", "Second"]);
        let config = GenerationConfig::default();

        let r1 = provider.complete("s", "p", None, &config).await.unwrap();
        let r2 = provider.complete("s", "p", None, &config).await.unwrap();
        let r3 = provider.complete("s", "p", None, &config).await.unwrap();
        assert_eq!(r1.content, "First");
        assert_eq!(r2.content, "Second");
        assert_eq!(r3.content, "First");
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_provider_records_tools_and_failures() {
        let provider = MockProvider::with_responses(vec![ModelResponse::text("")
            .with_tool_call(ToolCall::new("c1", "create_node", json!({"name": "A"})))])
        .then_fail("provider offline");
        let tools = vec![ToolSpec {
            name: "create_node".into(),
            description: "d".into(),
            parameters: json!({}),
        }];
        let config = GenerationConfig::default();

        let first = provider
            .complete("sys", "user", Some(&tools), &config)
            .await
            .unwrap();
        assert_eq!(first.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(first.tool_calls.len(), 1);

        let second = provider.complete("sys", "user", None, &config).await;
        assert!(second.unwrap_err().to_string().contains("offline"));

        let prompts = provider.prompts();
        assert_eq!(prompts[0].tools, vec!["create_node".to_string()]);
        assert!(prompts[1].tools.is_empty());
    }

    #[tokio::test]
    async fn offline_script_starts_with_a_valid_plan() {
        let provider = MockProvider::offline();
        let first = provider
            .complete("s", "p", None, &GenerationConfig::default())
            .await
            .unwrap();
        assert!(crate::planner::validate_plan(&first.content).is_ok());
    }
}
