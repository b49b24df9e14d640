//! Resolves a name-or-id reference to a concrete entity id.
//!
//! Lookup order:
//! 1. name of an entity created in this run (case-insensitive, latest first)
//! 2. id (exact) or name (case-insensitive) of a retrieved NODE context item
//! 3. id of an entity created in this run (exact)
//!
//! Scores of context items never take part in resolution; the first matching
//! item in snapshot order wins.

use crate::types::{ContextAttributes, ContextItem, CreatedEntity};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefSource {
    CreatedName,
    ContextNode,
    CreatedId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
    pub source: RefSource,
}

/// Borrowed view of a run's identity sources at one point in time.
#[derive(Debug, Clone, Copy)]
pub struct EntityResolver<'a> {
    created: &'a [CreatedEntity],
    context: &'a [ContextItem],
}

impl<'a> EntityResolver<'a> {
    pub fn new(created: &'a [CreatedEntity], context: &'a [ContextItem]) -> Self {
        Self { created, context }
    }

    pub fn resolve(&self, reference: &str) -> Option<EntityRef> {
        let reference = reference.trim();
        if reference.is_empty() {
            return None;
        }

        if let Some(entity) = self
            .created
            .iter()
            .rev()
            .find(|e| same_name(&e.reference_name, reference))
        {
            return Some(EntityRef {
                id: entity.id.clone(),
                source: RefSource::CreatedName,
            });
        }

        if let Some(item) = self.context.iter().find(|item| match &item.attributes {
            ContextAttributes::Node { name, .. } => {
                item.id == reference || same_name(name, reference)
            }
            _ => false,
        }) {
            return Some(EntityRef {
                id: item.id.clone(),
                source: RefSource::ContextNode,
            });
        }

        self.created
            .iter()
            .find(|e| e.id == reference)
            .map(|e| EntityRef {
                id: e.id.clone(),
                source: RefSource::CreatedId,
            })
    }
}

fn same_name(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created(name: &str, id: &str) -> CreatedEntity {
        CreatedEntity {
            reference_name: name.into(),
            id: id.into(),
            entity_type: "Company".into(),
        }
    }

    #[test]
    fn created_entity_wins_over_context() {
        let created = vec![created("Acme", "new-1")];
        let context = vec![ContextItem::node("old-1", "Acme", "Company")];
        let resolver = EntityResolver::new(&created, &context);

        let resolved = resolver.resolve("acme").unwrap();
        assert_eq!(resolved.id, "new-1");
        assert_eq!(resolved.source, RefSource::CreatedName);
    }

    #[test]
    fn context_node_by_id_or_name() {
        let context = vec![
            ContextItem::node("old-1", "Acme", "Company").with_score(0.2),
            ContextItem::node("old-2", "ACME", "Company").with_score(0.9),
        ];
        let resolver = EntityResolver::new(&[], &context);

        assert_eq!(resolver.resolve("old-2").unwrap().id, "old-2");
        // Snapshot order, not score, decides between equal names.
        assert_eq!(resolver.resolve("Acme").unwrap().id, "old-1");
        assert_eq!(resolver.resolve("OLD-1"), None);
    }

    #[test]
    fn created_id_is_checked_last() {
        let created = vec![created("Globex", "g-1")];
        let context = vec![ContextItem::node("x", "g-1", "Company")];
        let resolver = EntityResolver::new(&created, &context);

        // A context node named like the id takes precedence over the raw id.
        assert_eq!(resolver.resolve("g-1").unwrap().id, "x");
        assert_eq!(
            EntityResolver::new(&created, &[]).resolve("g-1").unwrap().source,
            RefSource::CreatedId
        );
    }

    #[test]
    fn latest_duplicate_creation_wins() {
        let created = vec![created("Acme", "first"), created("acme", "second")];
        let resolver = EntityResolver::new(&created, &[]);
        assert_eq!(resolver.resolve("Acme").unwrap().id, "second");
    }

    #[test]
    fn non_node_context_is_not_a_target() {
        let context = vec![ContextItem {
            id: "note-1".into(),
            score: 1.0,
            attributes: ContextAttributes::Note {
                author: "ana".into(),
                parent_node_id: "n".into(),
                content: String::new(),
            },
        }];
        let resolver = EntityResolver::new(&[], &context);
        assert!(resolver.resolve("note-1").is_none());
        assert!(resolver.resolve("   ").is_none());
    }
}
