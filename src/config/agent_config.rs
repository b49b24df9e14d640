//! Application-level configuration
//!
//! Defines the top-level configuration: database location, chat model and
//! embedding providers, pipeline defaults, notification delivery, and logging.

use crate::agent::model::GenerationConfig;
use crate::notify::{FailurePolicy, RetryPolicy};
use crate::retrieval::ContextFilter;
use crate::types::ContextKind;
use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Embedded default configuration file
const DEFAULT_CONFIG: &str = include_str!("../../kg-agent.config.toml");

/// Configuration file name
const CONFIG_FILE_NAME: &str = "kg-agent.config.toml";

/// Environment variable pointing at an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "KG_AGENT_CONFIG";

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Chat model provider configuration
    #[serde(default)]
    pub model: ModelConfig,
    /// Embedding provider configuration
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    /// Pipeline defaults
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Notification delivery
    #[serde(default)]
    pub notifications: NotificationConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from the first location that has a file, or create
    /// a default configuration in the working directory.
    pub fn load() -> Result<Self> {
        // Try to load from kg-agent.config.toml in current directory
        if let Ok(content) = std::fs::read_to_string(CONFIG_FILE_NAME) {
            return Self::parse(&content, Path::new(CONFIG_FILE_NAME));
        }

        // Try to load from ~/.kg-agent/kg-agent.config.toml
        if let Some(base_dirs) = BaseDirs::new() {
            let home_config = base_dirs.home_dir().join(".kg-agent").join(CONFIG_FILE_NAME);
            if let Ok(content) = std::fs::read_to_string(&home_config) {
                return Self::parse(&content, &home_config);
            }
        }

        if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(config_path);
            if let Ok(content) = std::fs::read_to_string(&path) {
                return Self::parse(&content, &path);
            }
        }

        // No config file found - create one from embedded default
        tracing::info!(
            "No configuration file found; creating {} with default settings",
            CONFIG_FILE_NAME
        );
        if let Err(e) = std::fs::write(CONFIG_FILE_NAME, DEFAULT_CONFIG) {
            tracing::warn!(
                "Could not create {}: {}; continuing with in-memory defaults",
                CONFIG_FILE_NAME,
                e
            );
        }

        Self::embedded_default()
    }

    /// Load configuration from a specific file path.
    /// If the file doesn't exist, creates it with default settings.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content, path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(
                    "Configuration file not found at {}; creating with default settings",
                    path.display()
                );

                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)
                            .context(format!("Failed to create directory {}", parent.display()))?;
                    }
                }

                std::fs::write(path, DEFAULT_CONFIG).context(format!(
                    "Failed to create config file at {}",
                    path.display()
                ))?;

                Self::embedded_default()
            }
            Err(e) => Err(anyhow::anyhow!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            )),
        }
    }

    /// The configuration compiled into the binary
    pub fn embedded_default() -> Result<Self> {
        toml::from_str(DEFAULT_CONFIG)
            .map_err(|e| anyhow::anyhow!("Failed to parse embedded default config: {}", e))
    }

    fn parse(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.model.provider.is_empty() {
            return Err(anyhow::anyhow!("Model provider cannot be empty"));
        }
        // Known names are checked independent of compile-time feature flags
        let known = ["mock", "openai"];
        if !known.contains(&self.model.provider.to_lowercase().as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid model provider: {}",
                self.model.provider
            ));
        }
        if !known.contains(&self.embeddings.provider.to_lowercase().as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid embeddings provider: {}",
                self.embeddings.provider
            ));
        }

        if self.model.temperature < 0.0 || self.model.temperature > 2.0 {
            return Err(anyhow::anyhow!(
                "Temperature must be between 0.0 and 2.0, got {}",
                self.model.temperature
            ));
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(anyhow::anyhow!("Invalid log level: {}", self.logging.level)),
        }

        if self.notifications.max_attempts == 0 {
            return Err(anyhow::anyhow!(
                "notifications.max_attempts must be at least 1"
            ));
        }
        if self.pipeline.top_k == 0 {
            return Err(anyhow::anyhow!("pipeline.top_k must be at least 1"));
        }
        if self.embeddings.dimensions == Some(0) {
            return Err(anyhow::anyhow!("embeddings.dimensions cannot be 0"));
        }

        Ok(())
    }

    /// Apply environment variable overrides to the configuration
    pub fn apply_env_overrides(&mut self) {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        }

        if let Some(provider) = var("KG_AGENT_PROVIDER") {
            self.model.provider = provider;
        }
        if let Some(model_name) = var("KG_AGENT_MODEL") {
            self.model.model_name = Some(model_name);
        }
        if let Some(api_key_source) = var("KG_AGENT_API_KEY_SOURCE") {
            self.model.api_key_source = Some(api_key_source);
        }
        if let Some(db_path) = var("KG_AGENT_DB_PATH") {
            self.database.path = PathBuf::from(db_path);
        }
        if let Some(level) = var("KG_AGENT_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(policy) = var("KG_AGENT_NOTIFY_POLICY") {
            match FailurePolicy::from_str(&policy) {
                Some(policy) => self.notifications.failure_policy = policy,
                None => tracing::warn!("Ignoring unknown KG_AGENT_NOTIFY_POLICY '{}'", policy),
            }
        }
    }

    /// Get a summary of the configuration
    pub fn summary(&self) -> String {
        let mut summary = String::new();
        summary.push_str("Configuration loaded:\n");
        summary.push_str(&format!("Database: {}\n", self.database.path.display()));
        summary.push_str(&format!("Model Provider: {}\n", self.model.provider));
        if let Some(model) = &self.model.model_name {
            summary.push_str(&format!("Model Name: {}\n", model));
        }
        summary.push_str(&format!("Embeddings Provider: {}\n", self.embeddings.provider));
        summary.push_str(&format!("Top K: {}\n", self.pipeline.top_k));
        summary.push_str(&format!(
            "Entity Types: {}\n",
            self.pipeline.allowed_entity_types.join(", ")
        ));
        summary.push_str(&format!(
            "Notification Policy: {} ({} attempts)\n",
            self.notifications.failure_policy.as_str(),
            self.notifications.max_attempts
        ));
        summary.push_str(&format!("Logging Level: {}\n", self.logging.level));
        summary
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the database file; `~` is expanded
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.kg-agent/kg_agent.duckdb"),
        }
    }
}

/// Model provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider name ("openai" or "mock")
    pub provider: String,
    /// Model name to use
    #[serde(default)]
    pub model_name: Option<String>,
    /// API key source (`env:VAR`, `file:PATH`, or a literal key)
    #[serde(default)]
    pub api_key_source: Option<String>,
    /// Custom OpenAI-compatible endpoint
    #[serde(default)]
    pub api_base: Option<String>,
    /// Sampling temperature (0.0 to 2.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.2
}

impl ModelConfig {
    pub fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            temperature: Some(self.temperature),
            max_tokens: self.max_tokens.or(GenerationConfig::default().max_tokens),
            ..GenerationConfig::default()
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model_name: None,
            api_key_source: None,
            api_base: None,
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    /// Provider name ("openai" or "mock")
    #[serde(default = "default_embeddings_provider")]
    pub provider: String,
    /// Embedding model name
    #[serde(default)]
    pub model: Option<String>,
    /// Expected vector length; checked on every embedding
    #[serde(default)]
    pub dimensions: Option<usize>,
    #[serde(default)]
    pub api_key_source: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
}

fn default_embeddings_provider() -> String {
    "mock".to_string()
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: default_embeddings_provider(),
            model: None,
            dimensions: None,
            api_key_source: None,
            api_base: None,
        }
    }
}

/// Pipeline defaults used when a run does not override them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum number of context items retrieved per run
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Entity types the tool dispatcher accepts
    #[serde(default)]
    pub allowed_entity_types: Vec<String>,
    /// Restrict retrieval to these kinds
    #[serde(default)]
    pub context_kinds: Option<Vec<ContextKind>>,
}

fn default_top_k() -> usize {
    10
}

impl PipelineConfig {
    pub fn context_filter(&self) -> Option<ContextFilter> {
        self.context_kinds
            .as_ref()
            .map(|kinds| ContextFilter::kinds(kinds.iter().copied()))
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            allowed_entity_types: Vec::new(),
            context_kinds: None,
        }
    }
}

/// Notification delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl NotificationConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.retry_delay_ms),
        )
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_default_is_valid() {
        let config = AppConfig::embedded_default().unwrap();
        config.validate().unwrap();
        assert_eq!(config.model.provider, "mock");
        assert_eq!(config.notifications.max_attempts, 5);
        assert_eq!(config.notifications.retry_delay_ms, 1000);
        assert_eq!(config.notifications.failure_policy, FailurePolicy::NonFatal);
        assert!(config
            .pipeline
            .allowed_entity_types
            .contains(&"Person".to_string()));
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut config = AppConfig::default();
        config.notifications.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn context_kinds_parse_into_filter() {
        let config: AppConfig = toml::from_str(
            r#"
            [pipeline]
            top_k = 3
            context_kinds = ["NODE", "NOTE"]
            "#,
        )
        .unwrap();
        let filter = config.pipeline.context_filter().unwrap();
        assert!(filter.accepts(ContextKind::Node));
        assert!(!filter.accepts(ContextKind::Relationship));
    }

    #[test]
    fn generation_config_uses_model_settings() {
        let model = ModelConfig {
            temperature: 0.9,
            max_tokens: Some(64),
            ..ModelConfig::default()
        };
        let generation = model.generation_config();
        assert_eq!(generation.temperature, Some(0.9));
        assert_eq!(generation.max_tokens, Some(64));
    }
}
