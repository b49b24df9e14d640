pub mod factory;
pub mod function_calling;
pub mod model;
pub mod providers;

pub use factory::{create_embeddings_client, create_provider};
pub use model::{
    GenerationConfig, LanguageModel, ModelResponse, ProviderKind, TokenUsage, ToolCall, ToolSpec,
};
