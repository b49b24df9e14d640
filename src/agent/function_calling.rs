//! OpenAI Function Calling Integration
//!
//! Converts [`ToolSpec`](crate::agent::model::ToolSpec) schemas into OpenAI's
//! `ChatCompletionTool` format.

use async_openai::types::{ChatCompletionTool, ChatCompletionToolType, FunctionObject};
use serde_json::{json, Value};

/// Normalize a parameter schema to an OpenAI object schema
fn parameters_to_openai_schema(params: &Value) -> Value {
    let properties = params
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    let required: Vec<String> = params
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

/// Converts a tool definition into OpenAI ChatCompletionTool format
pub fn tool_to_openai_function(
    name: &str,
    description: &str,
    parameters: &Value,
) -> ChatCompletionTool {
    let schema = parameters_to_openai_schema(parameters);

    ChatCompletionTool {
        r#type: ChatCompletionToolType::Function,
        function: FunctionObject {
            name: name.to_string(),
            description: Some(description.to_string()),
            parameters: Some(schema),
            strict: Some(false),
        },
    }
}
