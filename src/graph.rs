//! Graph write capability used by the tool dispatcher.

use crate::persistence::Persistence;
use crate::retrieval::GraphIndex;
use crate::types::{ContextAttributes, ContextItem};
use anyhow::{anyhow, Result};
use async_trait::async_trait;

/// Atomic node and relationship creation. Errors carry a human-readable reason.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn create_node(&self, node_type: &str, name: &str, description: &str) -> Result<String>;

    async fn create_relationship(
        &self,
        from_id: &str,
        to_id: &str,
        relation_type: &str,
    ) -> Result<String>;
}

#[async_trait]
impl GraphStore for Persistence {
    async fn create_node(&self, node_type: &str, name: &str, description: &str) -> Result<String> {
        if name.trim().is_empty() {
            return Err(anyhow!("node name cannot be empty"));
        }
        let db = self.clone();
        let (node_type, name, description) =
            (node_type.to_string(), name.to_string(), description.to_string());
        tokio::task::spawn_blocking(move || db.insert_node(&node_type, &name, &description))
            .await?
    }

    async fn create_relationship(
        &self,
        from_id: &str,
        to_id: &str,
        relation_type: &str,
    ) -> Result<String> {
        if relation_type.trim().is_empty() {
            return Err(anyhow!("relationship type cannot be empty"));
        }
        let db = self.clone();
        let (from_id, to_id, relation_type) =
            (from_id.to_string(), to_id.to_string(), relation_type.to_string());
        tokio::task::spawn_blocking(move || db.insert_relationship(&from_id, &to_id, &relation_type))
            .await?
    }
}

/// Writes go to the graph and are then indexed so later runs can retrieve
/// them. An indexing failure is logged and does not undo the write.
#[async_trait]
impl GraphStore for GraphIndex {
    async fn create_node(&self, node_type: &str, name: &str, description: &str) -> Result<String> {
        let id = self
            .persistence()
            .create_node(node_type, name, description)
            .await?;
        let item = ContextItem::node(id.clone(), name, node_type);
        if let Err(e) = self.index(&item).await {
            tracing::warn!("node {} created but not indexed: {:#}", id, e);
        }
        Ok(id)
    }

    async fn create_relationship(
        &self,
        from_id: &str,
        to_id: &str,
        relation_type: &str,
    ) -> Result<String> {
        let id = self
            .persistence()
            .create_relationship(from_id, to_id, relation_type)
            .await?;

        // Only relationships between graph-held nodes have names to index.
        let db = self.persistence().clone();
        let (from, to) = (from_id.to_string(), to_id.to_string());
        let endpoints =
            tokio::task::spawn_blocking(move || -> Result<_> { Ok((db.get_node(&from)?, db.get_node(&to)?)) })
                .await?;
        match endpoints {
            Ok((Some(from), Some(to))) => {
                let item = ContextItem {
                    id: id.clone(),
                    score: 0.0,
                    attributes: ContextAttributes::Relationship {
                        from_id: from.id,
                        from_name: from.name,
                        from_type: from.node_type,
                        to_id: to.id,
                        to_name: to.name,
                        to_type: to.node_type,
                        relation_type: relation_type.to_string(),
                    },
                };
                if let Err(e) = self.index(&item).await {
                    tracing::warn!("relationship {} created but not indexed: {:#}", id, e);
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("relationship {} endpoints not readable: {:#}", id, e),
        }
        Ok(id)
    }
}
