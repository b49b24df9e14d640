//! Context retrieval over the vector index.

use crate::embeddings::Embedder;
use crate::persistence::Persistence;
use crate::types::{ContextItem, ContextKind};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Restricts retrieval to some context kinds. An empty filter restricts nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextFilter {
    pub kinds: Vec<ContextKind>,
}

impl ContextFilter {
    pub fn kinds(kinds: impl IntoIterator<Item = ContextKind>) -> Self {
        let mut collected: Vec<ContextKind> = Vec::new();
        for kind in kinds {
            if !collected.contains(&kind) {
                collected.push(kind);
            }
        }
        Self { kinds: collected }
    }

    pub fn accepts(&self, kind: ContextKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }

    /// Parse a comma separated list such as `NODE,NOTE`.
    pub fn parse(list: &str) -> Result<Self> {
        let mut kinds = Vec::new();
        for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let kind = ContextKind::from_str(part)
                .ok_or_else(|| anyhow::anyhow!("unknown context kind '{}'", part))?;
            kinds.push(kind);
        }
        Ok(Self::kinds(kinds))
    }
}

/// Ranked similarity search over stored context.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    /// At most `top_k` items sorted by descending score. Unfiltered when
    /// `filter` is `None`.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&ContextFilter>,
    ) -> Result<Vec<ContextItem>>;
}

/// The DuckDB-backed knowledge graph together with its context index.
///
/// Items are embedded from their one-line description when indexed, so the
/// same embedder must be used for indexing and for prompts.
#[derive(Clone)]
pub struct GraphIndex {
    db: Persistence,
    embedder: Arc<dyn Embedder>,
}

impl GraphIndex {
    pub fn new(db: Persistence, embedder: Arc<dyn Embedder>) -> Self {
        Self { db, embedder }
    }

    pub fn persistence(&self) -> &Persistence {
        &self.db
    }

    /// Embed and store one context item.
    pub async fn index(&self, item: &ContextItem) -> Result<()> {
        let embedding = self.embedder.embed(&item.describe()).await?;
        let db = self.db.clone();
        let item = item.clone();
        tokio::task::spawn_blocking(move || db.index_context_item(&item, &embedding)).await??;
        Ok(())
    }

    /// Index a batch, returning how many were stored.
    pub async fn index_all(&self, items: &[ContextItem]) -> Result<usize> {
        for item in items {
            self.index(item).await?;
        }
        Ok(items.len())
    }
}

#[async_trait]
impl ContextRetriever for GraphIndex {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&ContextFilter>,
    ) -> Result<Vec<ContextItem>> {
        let db = self.db.clone();
        let vector = vector.to_vec();
        let kinds = filter
            .filter(|f| !f.kinds.is_empty())
            .map(|f| f.kinds.clone());
        tokio::task::spawn_blocking(move || db.search_context(&vector, top_k, kinds.as_deref()))
            .await?
    }
}
