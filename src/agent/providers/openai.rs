//! OpenAI Model Provider
//!
//! Chat completions through `async-openai`. Any OpenAI-compatible endpoint can be
//! targeted by overriding the API base.

use crate::agent::function_calling::tool_to_openai_function;
use crate::agent::model::{
    parse_thinking_tokens, GenerationConfig, LanguageModel, ModelResponse, TokenUsage, ToolCall,
    ToolSpec,
};
use anyhow::{anyhow, Result};
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use serde_json::Value;

/// OpenAI provider
#[derive(Debug, Clone)]
pub struct OpenAIProvider {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAIProvider {
    /// Create a provider using `OPENAI_API_KEY` from the environment
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            model: "gpt-4o-mini".to_string(),
        }
    }

    /// Create a provider with an explicit API key
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        Self {
            client: Client::with_config(config),
            model: "gpt-4o-mini".to_string(),
        }
    }

    /// Create a provider from a fully customized OpenAI configuration
    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        Self {
            client: Client::with_config(config),
            model: model.into(),
        }
    }

    /// Override the model identifier for future requests
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn build_messages(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Vec<ChatCompletionRequestMessage>> {
        let mut messages = Vec::with_capacity(2);

        if !system_prompt.is_empty() {
            let system_message = ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()
                .map_err(|e| anyhow!("Failed to build system message: {}", e))?;
            messages.push(ChatCompletionRequestMessage::System(system_message));
        }

        let user_message = ChatCompletionRequestUserMessageArgs::default()
            .content(user_prompt)
            .build()
            .map_err(|e| anyhow!("Failed to build user message: {}", e))?;
        messages.push(ChatCompletionRequestMessage::User(user_message));

        Ok(messages)
    }
}

impl Default for OpenAIProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert SDK tool calls, keeping unparseable argument strings as JSON strings
/// so the dispatcher can report them as invalid arguments.
fn convert_tool_calls(calls: &[ChatCompletionMessageToolCall]) -> Vec<ToolCall> {
    calls
        .iter()
        .map(|call| {
            let arguments = serde_json::from_str(&call.function.arguments)
                .unwrap_or_else(|_| Value::String(call.function.arguments.clone()));
            ToolCall {
                id: call.id.clone(),
                function_name: call.function.name.clone(),
                arguments,
            }
        })
        .collect()
}

#[async_trait]
impl LanguageModel for OpenAIProvider {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        tools: Option<&[ToolSpec]>,
        config: &GenerationConfig,
    ) -> Result<ModelResponse> {
        let messages = self.build_messages(system_prompt, user_prompt)?;

        let mut request_builder = CreateChatCompletionRequestArgs::default();
        request_builder.model(&self.model).messages(messages);

        if let Some(temp) = config.temperature {
            request_builder.temperature(temp);
        }
        if let Some(max_tokens) = config.max_tokens {
            request_builder.max_tokens(max_tokens);
        }
        if let Some(top_p) = config.top_p {
            request_builder.top_p(top_p);
        }

        if let Some(specs) = tools.filter(|t| !t.is_empty()) {
            let tools = specs
                .iter()
                .map(|s| tool_to_openai_function(&s.name, &s.description, &s.parameters))
                .collect::<Vec<_>>();
            request_builder.tools(tools);
        }

        let request = request_builder
            .build()
            .map_err(|e| anyhow!("Failed to build OpenAI request: {}", e))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| anyhow!("OpenAI API error: {}", e))?;

        let choice = response
            .choices
            .first()
            .ok_or_else(|| anyhow!("No response choices returned"))?;

        let raw_content = choice.message.content.clone().unwrap_or_default();
        let (reasoning, content) = parse_thinking_tokens(&raw_content);

        let tool_calls = choice
            .message
            .tool_calls
            .as_deref()
            .map(convert_tool_calls)
            .unwrap_or_default();

        let usage = response.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ModelResponse {
            content,
            model: response.model,
            usage,
            finish_reason: choice.finish_reason.as_ref().map(|r| format!("{:?}", r)),
            tool_calls,
            reasoning,
        })
    }
}
