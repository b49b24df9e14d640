use anyhow::{anyhow, Context, Result};
use async_openai::{
    config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client as OpenAIClient,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Trait that describes an embeddings-capable service.
#[async_trait]
pub trait EmbeddingsService: Send + Sync + 'static {
    /// Generate embeddings for the provided inputs using the given model name.
    async fn create_embeddings(&self, model: &str, inputs: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

/// Turns text into a fixed-length vector. This is what the pipeline depends on.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Client that wraps an embeddings service and keeps track of the model name.
#[derive(Clone)]
pub struct EmbeddingsClient {
    model: String,
    service: Arc<dyn EmbeddingsService>,
    /// Expected vector length. Unchecked when `None`.
    dimensions: Option<usize>,
}

impl EmbeddingsClient {
    /// Create a client that uses the default OpenAI configuration (OPENAI_API_KEY).
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_service(
            model,
            Arc::new(OpenAIEmbeddingsService::new()) as Arc<dyn EmbeddingsService>,
        )
    }

    /// Create a client that uses the provided OpenAI configuration.
    pub fn with_config(model: impl Into<String>, config: OpenAIConfig) -> Self {
        let service = OpenAIEmbeddingsService::with_config(config);
        Self::with_service(model, Arc::new(service))
    }

    /// Create a client around a custom embeddings service implementation.
    pub fn with_service(model: impl Into<String>, service: Arc<dyn EmbeddingsService>) -> Self {
        Self {
            model: model.into(),
            service,
            dimensions: None,
        }
    }

    /// Reject vectors whose length differs from `dimensions`.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Ask the underlying service for embeddings for a batch of inputs.
    pub async fn embed_batch<T>(&self, inputs: &[T]) -> Result<Vec<Vec<f32>>>
    where
        T: AsRef<str>,
    {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let sanitized_inputs = inputs
            .iter()
            .map(|input| sanitize_embedding_input(input.as_ref()))
            .collect::<Vec<_>>();

        let embeddings = self
            .service
            .create_embeddings(&self.model, sanitized_inputs)
            .await?;

        if embeddings.len() != inputs.len() {
            return Err(anyhow!(
                "embeddings service returned {} vectors for {} inputs",
                embeddings.len(),
                inputs.len()
            ));
        }
        for embedding in &embeddings {
            validate_embedding(embedding, self.dimensions)?;
        }
        Ok(embeddings)
    }

    /// Ask the underlying service for an embedding for a single input.
    pub async fn embed(&self, input: &str) -> Result<Vec<f32>> {
        let inputs = [input];
        let mut embeddings = self.embed_batch(&inputs).await?;
        embeddings
            .pop()
            .ok_or_else(|| anyhow!("embeddings service returned no vector"))
    }
}

#[async_trait]
impl Embedder for EmbeddingsClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        EmbeddingsClient::embed(self, text).await
    }
}

/// A usable embedding is non-empty, finite, and of the expected length.
pub fn validate_embedding(embedding: &[f32], dimensions: Option<usize>) -> Result<()> {
    if embedding.is_empty() {
        return Err(anyhow!("embedding is empty"));
    }
    if let Some(expected) = dimensions {
        if embedding.len() != expected {
            return Err(anyhow!(
                "embedding has {} dimensions, expected {}",
                embedding.len(),
                expected
            ));
        }
    }
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(anyhow!("embedding contains non-finite values"));
    }
    Ok(())
}

fn sanitize_embedding_input(input: &str) -> String {
    const MAX_LEN: usize = 4096;
    let mut processed = input
        .replace('\\', "\\\\")
        .replace('\r', "\\r")
        .replace('\n', "\\n");

    if processed.len() > MAX_LEN {
        let mut cut = MAX_LEN;
        while !processed.is_char_boundary(cut) {
            cut -= 1;
        }
        processed.truncate(cut);
        processed.push_str("\\n[truncated]");
    }

    processed
}

#[cfg(test)]
mod embedding_sanitizer_tests {
    use super::sanitize_embedding_input;

    #[test]
    fn sanitizes_newlines_and_backslashes() {
        let raw = "line1\nline2\r\npath\\to\\file";
        let sanitized = sanitize_embedding_input(raw);
        assert_eq!(sanitized, "line1\\nline2\\r\\npath\\\\to\\\\file");
    }

    #[test]
    fn truncates_long_payloads_on_char_boundary() {
        let raw = "é".repeat(3000);
        let sanitized = sanitize_embedding_input(&raw);
        assert!(sanitized.ends_with("\\n[truncated]"));
        assert!(sanitized.len() <= 4096 + "\\n[truncated]".len());
    }
}

/// Default service implementation that uses the async-openai client.
#[derive(Clone)]
pub struct OpenAIEmbeddingsService {
    client: OpenAIClient<OpenAIConfig>,
}

impl OpenAIEmbeddingsService {
    /// Create a service with the default OpenAI configuration.
    pub fn new() -> Self {
        Self {
            client: OpenAIClient::new(),
        }
    }

    /// Create a service with a custom OpenAI configuration.
    pub fn with_config(config: OpenAIConfig) -> Self {
        Self {
            client: OpenAIClient::with_config(config),
        }
    }
}

impl Default for OpenAIEmbeddingsService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingsService for OpenAIEmbeddingsService {
    async fn create_embeddings(&self, model: &str, inputs: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let request = CreateEmbeddingRequestArgs::default()
            .model(model)
            .input(inputs)
            .build()
            .context("Failed to build embedding request")?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .context("OpenAI embeddings request failed")?;

        let embeddings = response
            .data
            .into_iter()
            .map(|item| item.embedding)
            .collect::<Vec<_>>();

        if embeddings.is_empty() {
            Err(anyhow!("OpenAI embeddings response was empty"))
        } else {
            Ok(embeddings)
        }
    }
}

/// Offline embeddings derived from a blake3 hash of the input.
///
/// Identical text always yields the identical unit vector, so lookups of text
/// that was indexed verbatim score 1.0. No semantic similarity beyond that.
#[derive(Debug, Clone)]
pub struct MockEmbeddingsService {
    dimensions: usize,
}

impl MockEmbeddingsService {
    pub const DEFAULT_DIMENSIONS: usize = 64;

    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn vector_for(&self, input: &str) -> Vec<f32> {
        let mut reader = blake3::Hasher::new()
            .update(input.as_bytes())
            .finalize_xof();
        let mut bytes = vec![0u8; self.dimensions * 4];
        reader.fill(&mut bytes);

        let mut vector: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|chunk| {
                let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                (raw as f32 / u32::MAX as f32) * 2.0 - 1.0
            })
            .collect();

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

impl Default for MockEmbeddingsService {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSIONS)
    }
}

#[async_trait]
impl EmbeddingsService for MockEmbeddingsService {
    async fn create_embeddings(&self, _model: &str, inputs: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(inputs.iter().map(|input| self.vector_for(input)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::Arc;

    #[derive(Clone)]
    struct DummyService {
        embeddings: Vec<Vec<f32>>,
        fail: bool,
    }

    impl DummyService {
        fn ok_single(embedding: Vec<f32>) -> Self {
            Self {
                embeddings: vec![embedding],
                fail: false,
            }
        }

        fn ok_batch(embeddings: Vec<Vec<f32>>) -> Self {
            Self {
                embeddings,
                fail: false,
            }
        }

        fn err() -> Self {
            Self {
                embeddings: Vec::new(),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl EmbeddingsService for DummyService {
        async fn create_embeddings(
            &self,
            _model: &str,
            _inputs: Vec<String>,
        ) -> Result<Vec<Vec<f32>>> {
            if self.fail {
                return Err(anyhow!("boom"));
            }
            Ok(self.embeddings.clone())
        }
    }

    #[tokio::test]
    async fn embed_returns_the_service_embedding() {
        let embedding = vec![0.1, 0.2];
        let service = Arc::new(DummyService::ok_single(embedding.clone()));
        let client = EmbeddingsClient::with_service("model", service);

        let result = client.embed("input").await.unwrap();

        assert_eq!(result, embedding);
    }

    #[tokio::test]
    async fn embed_propagates_errors() {
        let service = Arc::new(DummyService::err());
        let client = EmbeddingsClient::with_service("model", service);

        assert!(client.embed("input").await.is_err());
    }

    #[tokio::test]
    async fn embed_batch_returns_all_embeddings() {
        let service = Arc::new(DummyService::ok_batch(vec![vec![0.1, 0.2], vec![0.3, 0.4]]));
        let client = EmbeddingsClient::with_service("model", service);

        let inputs = ["first", "second"];
        let result = client.embed_batch(&inputs).await.unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result[1], vec![0.3, 0.4]);
    }

    #[tokio::test]
    async fn wrong_dimensions_are_rejected() {
        let service = Arc::new(DummyService::ok_single(vec![0.1, 0.2, 0.3]));
        let client = EmbeddingsClient::with_service("model", service).with_dimensions(2);

        let err = client.embed("input").await.unwrap_err();
        assert!(err.to_string().contains("expected 2"));
    }

    #[tokio::test]
    async fn non_finite_and_empty_vectors_are_rejected() {
        let nan = EmbeddingsClient::with_service(
            "model",
            Arc::new(DummyService::ok_single(vec![f32::NAN, 0.1])),
        );
        assert!(nan.embed("x").await.is_err());

        let empty =
            EmbeddingsClient::with_service("model", Arc::new(DummyService::ok_single(vec![])));
        assert!(empty.embed("x").await.is_err());
    }

    #[tokio::test]
    async fn mock_service_is_deterministic_and_normalized() {
        let client =
            EmbeddingsClient::with_service("mock", Arc::new(MockEmbeddingsService::new(16)));
        let a = client.embed("Acme Corp").await.unwrap();
        let b = client.embed("Acme Corp").await.unwrap();
        let c = client.embed("Globex").await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }
}
