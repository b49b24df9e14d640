pub mod agent_config;

// Re-export common types for convenience
pub use agent_config::{
    AppConfig, DatabaseConfig, EmbeddingsConfig, LoggingConfig, ModelConfig, NotificationConfig,
    PipelineConfig,
};
