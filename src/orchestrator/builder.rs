//! Orchestrator construction, by hand or from an [`AppConfig`].

use super::Orchestrator;
use crate::agent::factory::{create_embeddings_client, create_provider};
use crate::agent::model::{GenerationConfig, LanguageModel};
use crate::config::AppConfig;
use crate::durable::{MemoryJournal, StepJournal};
use crate::embeddings::Embedder;
use crate::graph::GraphStore;
use crate::notify::{FailurePolicy, NotificationChannel, NotificationDispatcher, RetryPolicy};
use crate::persistence::Persistence;
use crate::planner::PlanGenerator;
use crate::retrieval::{ContextFilter, ContextRetriever, GraphIndex};
use crate::tools::ToolDispatcher;
use anyhow::{anyhow, Result};
use std::sync::Arc;

/// Builder for [`Orchestrator`].
///
/// Embedder, retriever, graph store and model are required. The journal
/// defaults to an in-memory one, which only resumes within the process.
#[derive(Default)]
pub struct OrchestratorBuilder {
    embedder: Option<Arc<dyn Embedder>>,
    retriever: Option<Arc<dyn ContextRetriever>>,
    graph: Option<Arc<dyn GraphStore>>,
    model: Option<Arc<dyn LanguageModel>>,
    generation: GenerationConfig,
    journal: Option<Arc<dyn StepJournal>>,
    channel: Option<Arc<dyn NotificationChannel>>,
    retry: RetryPolicy,
    failure_policy: FailurePolicy,
    entity_types: Vec<String>,
    top_k: usize,
    default_filter: Option<ContextFilter>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            top_k: 10,
            ..Self::default()
        }
    }

    /// Wire every collaborator from configuration over one DuckDB file: the
    /// database is the journal, the graph store and the context index.
    pub fn from_config(config: &AppConfig, db: Persistence) -> Result<Self> {
        let model = create_provider(&config.model)?;
        let embedder: Arc<dyn Embedder> = Arc::new(create_embeddings_client(&config.embeddings)?);
        let index = Arc::new(GraphIndex::new(db.clone(), embedder.clone()));

        Ok(Self::new()
            .with_embedder(embedder)
            .with_retriever(index.clone())
            .with_graph_store(index)
            .with_model(model)
            .with_generation_config(config.model.generation_config())
            .with_journal(Arc::new(db))
            .with_retry_policy(config.notifications.retry_policy())
            .with_failure_policy(config.notifications.failure_policy)
            .with_entity_types(config.pipeline.allowed_entity_types.clone())
            .with_top_k(config.pipeline.top_k)
            .with_default_filter(config.pipeline.context_filter()))
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn ContextRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_graph_store(mut self, graph: Arc<dyn GraphStore>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn with_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_generation_config(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_journal(mut self, journal: Arc<dyn StepJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Enables progress notifications for requests that name a consumer.
    pub fn with_notification_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    /// Vocabulary used when a request does not bring its own.
    pub fn with_entity_types(mut self, entity_types: Vec<String>) -> Self {
        self.entity_types = entity_types;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_default_filter(mut self, filter: Option<ContextFilter>) -> Self {
        self.default_filter = filter;
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let embedder = self.embedder.ok_or_else(|| anyhow!("orchestrator needs an embedder"))?;
        let retriever = self
            .retriever
            .ok_or_else(|| anyhow!("orchestrator needs a context retriever"))?;
        let graph = self.graph.ok_or_else(|| anyhow!("orchestrator needs a graph store"))?;
        let model = self.model.ok_or_else(|| anyhow!("orchestrator needs a language model"))?;
        if self.top_k == 0 {
            return Err(anyhow!("top_k must be greater than zero"));
        }

        let notifier = self.channel.map(|channel| {
            NotificationDispatcher::new(channel)
                .with_retry(self.retry)
                .with_failure_policy(self.failure_policy)
        });

        Ok(Orchestrator {
            embedder,
            retriever,
            planner: PlanGenerator::new(model).with_generation_config(self.generation),
            dispatcher: ToolDispatcher::new(graph, self.entity_types),
            journal: self
                .journal
                .unwrap_or_else(|| Arc::new(MemoryJournal::new())),
            notifier,
            top_k: self.top_k,
            default_filter: self.default_filter,
        })
    }
}
