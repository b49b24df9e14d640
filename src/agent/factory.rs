//! Provider Factory
//!
//! Creates chat model and embedding provider instances from configuration.

use crate::agent::model::{LanguageModel, ProviderKind};
use crate::agent::providers::MockProvider;
#[cfg(feature = "openai")]
use crate::agent::providers::OpenAIProvider;
use crate::config::{EmbeddingsConfig, ModelConfig};
#[cfg(feature = "openai")]
use crate::embeddings::OpenAIEmbeddingsService;
use crate::embeddings::{EmbeddingsClient, MockEmbeddingsService};
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;

/// Create a chat model provider from configuration
pub fn create_provider(config: &ModelConfig) -> Result<Arc<dyn LanguageModel>> {
    let provider_kind = ProviderKind::from_str(&config.provider)
        .ok_or_else(|| anyhow!("Unknown provider: {}", config.provider))?;

    match provider_kind {
        ProviderKind::Mock => {
            let provider = if let Some(model_name) = &config.model_name {
                MockProvider::offline().with_model_name(model_name.clone())
            } else {
                MockProvider::offline()
            };
            Ok(Arc::new(provider))
        }

        #[cfg(feature = "openai")]
        ProviderKind::OpenAI => {
            let api_key = match &config.api_key_source {
                Some(source) => resolve_api_key(source)?,
                None => load_api_key_from_env("OPENAI_API_KEY")?,
            };

            let mut openai_config =
                async_openai::config::OpenAIConfig::new().with_api_key(api_key);
            if let Some(api_base) = &config.api_base {
                openai_config = openai_config.with_api_base(api_base.clone());
            }
            let mut provider = OpenAIProvider::with_config(openai_config, "gpt-4o-mini");

            if let Some(model_name) = &config.model_name {
                provider = provider.with_model(model_name.clone());
            }

            Ok(Arc::new(provider))
        }
    }
}

/// Create an embeddings client from configuration
pub fn create_embeddings_client(config: &EmbeddingsConfig) -> Result<EmbeddingsClient> {
    let provider_kind = ProviderKind::from_str(&config.provider)
        .ok_or_else(|| anyhow!("Unknown embeddings provider: {}", config.provider))?;

    let client = match provider_kind {
        ProviderKind::Mock => {
            let model = config.model.clone().unwrap_or_else(|| "mock-embedding".to_string());
            EmbeddingsClient::with_service(
                model,
                Arc::new(MockEmbeddingsService::new(
                    config
                        .dimensions
                        .unwrap_or(MockEmbeddingsService::DEFAULT_DIMENSIONS),
                )),
            )
        }

        #[cfg(feature = "openai")]
        ProviderKind::OpenAI => {
            let api_key = match &config.api_key_source {
                Some(source) => resolve_api_key(source)?,
                None => load_api_key_from_env("OPENAI_API_KEY")?,
            };
            let mut openai_config =
                async_openai::config::OpenAIConfig::new().with_api_key(api_key);
            if let Some(api_base) = &config.api_base {
                openai_config = openai_config.with_api_base(api_base.clone());
            }
            let model = config
                .model
                .clone()
                .unwrap_or_else(|| "text-embedding-3-small".to_string());
            EmbeddingsClient::with_service(
                model,
                Arc::new(OpenAIEmbeddingsService::with_config(openai_config)),
            )
        }
    };

    Ok(match config.dimensions {
        Some(dimensions) => client.with_dimensions(dimensions),
        None => client,
    })
}

/// Resolve API key from a source string
///
/// Supports the following formats:
/// - `env:VAR_NAME` - Load from environment variable
/// - `file:PATH` - Load from file
/// - Any other string - Use as-is (direct API key)
pub fn resolve_api_key(source: &str) -> Result<String> {
    if let Some(env_var) = source.strip_prefix("env:") {
        load_api_key_from_env(env_var)
    } else if let Some(path) = source.strip_prefix("file:") {
        load_api_key_from_file(path)
    } else {
        Ok(source.to_string())
    }
}

/// Load API key from environment variable
pub fn load_api_key_from_env(env_var: &str) -> Result<String> {
    std::env::var(env_var).context(format!("Environment variable {} not set", env_var))
}

/// Load API key from file
pub fn load_api_key_from_file(path: &str) -> Result<String> {
    let expanded_path = crate::persistence::expand_tilde(std::path::Path::new(path))?;

    std::fs::read_to_string(&expanded_path)
        .context(format!("Failed to read API key from file: {}", path))
        .map(|s| s.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::model::GenerationConfig;
    use serial_test::serial;

    #[tokio::test]
    async fn test_create_mock_provider() {
        let config = ModelConfig {
            provider: "mock".to_string(),
            model_name: Some("test-model".to_string()),
            ..ModelConfig::default()
        };

        let provider = create_provider(&config).unwrap();
        let response = provider
            .complete("system", "user", None, &GenerationConfig::default())
            .await
            .unwrap();
        assert_eq!(response.model, "test-model");
    }

    #[test]
    fn test_create_unknown_provider() {
        let config = ModelConfig {
            provider: "unknown-provider".to_string(),
            ..ModelConfig::default()
        };

        assert!(create_provider(&config).is_err());
    }

    #[tokio::test]
    async fn test_create_mock_embeddings_with_dimensions() {
        let config = EmbeddingsConfig {
            dimensions: Some(32),
            ..EmbeddingsConfig::default()
        };
        let client = create_embeddings_client(&config).unwrap();
        let vector = client.embed("hello graph").await.unwrap();
        assert_eq!(vector.len(), 32);
    }

    #[test]
    #[serial]
    fn test_resolve_api_key_from_env() {
        unsafe {
            std::env::set_var("KG_AGENT_TEST_RESOLVE_KEY", "env-resolved-value");
        }
        let key = resolve_api_key("env:KG_AGENT_TEST_RESOLVE_KEY").unwrap();
        assert_eq!(key, "env-resolved-value");
        unsafe {
            std::env::remove_var("KG_AGENT_TEST_RESOLVE_KEY");
        }
    }

    #[test]
    fn test_load_api_key_env_var_missing() {
        assert!(load_api_key_from_env("KG_AGENT_NONEXISTENT_VAR").is_err());
    }

    #[test]
    fn test_resolve_api_key_direct() {
        let key = resolve_api_key("sk-direct-api-key").unwrap();
        assert_eq!(key, "sk-direct-api-key");
    }

    #[test]
    fn test_resolve_api_key_from_file() {
        use std::io::Write;
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("test_api_key.txt");
        let mut file = std::fs::File::create(&file_path).unwrap();
        writeln!(file, "  file-api-key-value  ").unwrap();

        let key = resolve_api_key(&format!("file:{}", file_path.display())).unwrap();
        assert_eq!(key, "file-api-key-value");
    }
}
