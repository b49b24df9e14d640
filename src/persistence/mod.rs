pub mod migrations;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use directories::BaseDirs;
use duckdb::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::types::{ContextAttributes, ContextItem, ContextKind};

#[derive(Clone)]
pub struct Persistence {
    conn: Arc<Mutex<Connection>>,
}

impl Persistence {
    /// Create or open the database at the provided path and run migrations.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = expand_tilde(db_path.as_ref())?;
        if let Some(dir) = db_path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).context("creating DB directory")?;
            }
        }
        let conn = Connection::open(&db_path).context("opening DuckDB")?;
        migrations::run(&conn).context("running migrations")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// A throwaway database that lives only as long as this value.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory DuckDB")?;
        migrations::run(&conn).context("running migrations")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates or opens the default database at ~/.kg-agent/kg_agent.duckdb
    pub fn new_default() -> Result<Self> {
        let base = BaseDirs::new().context("base directories not available")?;
        let path = base.home_dir().join(".kg-agent").join("kg_agent.duckdb");
        Self::new(path)
    }

    /// Checkpoint the database so all WAL data reaches the main database file.
    pub fn checkpoint(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch("CHECKPOINT;")
            .context("checkpointing database")
    }

    /// Exclusive access to the shared connection. Never hold the guard across
    /// an await point.
    pub fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .expect("database connection mutex poisoned")
    }

    // ---------- Step Journal ----------

    pub fn journal_get(&self, run_id: &str, step_name: &str) -> Result<Option<String>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT result FROM step_journal WHERE run_id = ? AND step_name = ?")?;
        let mut rows = stmt.query(params![run_id, step_name])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    /// Store a step result. The first stored result wins; returns `false` when
    /// a result already existed and was left untouched.
    pub fn journal_put(&self, run_id: &str, step_name: &str, result: &str) -> Result<bool> {
        let conn = self.conn();
        conn.execute_batch("BEGIN TRANSACTION;")?;
        let outcome = (|| -> Result<bool> {
            let mut check = conn
                .prepare("SELECT COUNT(*) FROM step_journal WHERE run_id = ? AND step_name = ?")?;
            let existing: i64 = check.query_row(params![run_id, step_name], |row| row.get(0))?;
            if existing > 0 {
                return Ok(false);
            }
            let mut ins = conn.prepare(
                "INSERT INTO step_journal (run_id, step_name, result, completed_at) VALUES (?, ?, ?, CURRENT_TIMESTAMP)",
            )?;
            ins.execute(params![run_id, step_name, result])?;
            Ok(true)
        })();

        match outcome {
            Ok(inserted) => {
                conn.execute_batch("COMMIT;")?;
                Ok(inserted)
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK;");
                Err(e)
            }
        }
    }

    /// Completed step names of a run, in completion order.
    pub fn journal_steps(&self, run_id: &str) -> Result<Vec<JournalEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT step_name, CAST(completed_at AS TEXT) FROM step_journal WHERE run_id = ? ORDER BY completed_at, step_name",
        )?;
        let mut rows = stmt.query(params![run_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let step_name: String = row.get(0)?;
            let completed_at: String = row.get(1)?;
            out.push(JournalEntry {
                step_name,
                completed_at: parse_timestamp(&completed_at),
            });
        }
        Ok(out)
    }

    /// Forget a run so it can be started from scratch.
    pub fn journal_clear(&self, run_id: &str) -> Result<usize> {
        let conn = self.conn();
        let removed = conn.execute("DELETE FROM step_journal WHERE run_id = ?", params![run_id])?;
        Ok(removed)
    }

    // ---------- Graph ----------

    pub fn insert_node(&self, node_type: &str, name: &str, description: &str) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO kg_nodes (id, node_type, name, description) VALUES (?, ?, ?, ?)",
            params![id, node_type, name, description],
        )
        .context("inserting node")?;
        Ok(id)
    }

    pub fn get_node(&self, id: &str) -> Result<Option<NodeRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, node_type, name, description, CAST(created_at AS TEXT) FROM kg_nodes WHERE id = ?",
        )?;
        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(NodeRecord::from_row(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, node_type, name, description, CAST(created_at AS TEXT) FROM kg_nodes ORDER BY created_at, name",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(NodeRecord::from_row(row)?);
        }
        Ok(out)
    }

    pub fn insert_relationship(
        &self,
        from_id: &str,
        to_id: &str,
        relation_type: &str,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO kg_relationships (id, from_id, to_id, relation_type) VALUES (?, ?, ?, ?)",
            params![id, from_id, to_id, relation_type],
        )
        .context("inserting relationship")?;
        Ok(id)
    }

    pub fn list_relationships(&self) -> Result<Vec<RelationshipRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, from_id, to_id, relation_type, CAST(created_at AS TEXT) FROM kg_relationships ORDER BY created_at",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let created_at: String = row.get(4)?;
            out.push(RelationshipRecord {
                id: row.get(0)?,
                from_id: row.get(1)?,
                to_id: row.get(2)?,
                relation_type: row.get(3)?,
                created_at: parse_timestamp(&created_at),
            });
        }
        Ok(out)
    }

    // ---------- Context Index ----------

    /// Index a context item under its entity id, replacing any earlier entry
    /// for the same entity and kind.
    pub fn index_context_item(&self, item: &ContextItem, embedding: &[f32]) -> Result<()> {
        let attributes = serde_json::to_string(&item.attributes)?;
        let embedding_json = serde_json::to_string(embedding)?;
        let kind = item.kind().as_str();

        let conn = self.conn();
        conn.execute_batch("BEGIN TRANSACTION;")?;
        {
            let mut del = conn.prepare("DELETE FROM context_index WHERE entity_id = ? AND kind = ?")?;
            let _ = del.execute(params![item.id, kind])?;
            let mut ins = conn.prepare(
                "INSERT INTO context_index (id, entity_id, kind, attributes, embedding) VALUES (?, ?, ?, ?, ?)",
            )?;
            let _ = ins.execute(params![
                Uuid::new_v4().to_string(),
                item.id,
                kind,
                attributes,
                embedding_json
            ])?;
        }
        conn.execute_batch("COMMIT;")?;
        Ok(())
    }

    /// Top-k context items by cosine similarity, highest first. Scores are
    /// clamped to [0, 1]; ties keep insertion order.
    pub fn search_context(
        &self,
        query_embedding: &[f32],
        k: usize,
        kinds: Option<&[ContextKind]>,
    ) -> Result<Vec<ContextItem>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT entity_id, kind, attributes, embedding FROM context_index ORDER BY created_at, id",
        )?;
        let mut rows = stmt.query([])?;
        let mut scored: Vec<ContextItem> = Vec::new();
        while let Some(row) = rows.next()? {
            let entity_id: String = row.get(0)?;
            let kind: String = row.get(1)?;
            if let Some(allowed) = kinds {
                match ContextKind::from_str(&kind) {
                    Some(k) if allowed.contains(&k) => {}
                    _ => continue,
                }
            }
            let attributes_text: String = row.get(2)?;
            let embedding_text: String = row.get(3)?;
            let attributes: ContextAttributes = match serde_json::from_str(&attributes_text) {
                Ok(attributes) => attributes,
                Err(e) => {
                    tracing::warn!("skipping unreadable context entry {}: {}", entity_id, e);
                    continue;
                }
            };
            let embedding: Vec<f32> = serde_json::from_str(&embedding_text).unwrap_or_default();
            let score = cosine_similarity(query_embedding, &embedding).clamp(0.0, 1.0);
            scored.push(ContextItem {
                id: entity_id,
                score,
                attributes,
            });
        }
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }

    pub fn count_context_items(&self) -> Result<i64> {
        let conn = self.conn();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM context_index", [], |row| row.get(0))?;
        Ok(count)
    }
}

/// One completed step of a run.
#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub step_name: String,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub id: String,
    pub node_type: String,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl NodeRecord {
    fn from_row(row: &duckdb::Row) -> Result<Self> {
        let created_at: String = row.get(4)?;
        Ok(Self {
            id: row.get(0)?,
            node_type: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            created_at: parse_timestamp(&created_at),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipRecord {
    pub id: String,
    pub from_id: String,
    pub to_id: String,
    pub relation_type: String,
    pub created_at: DateTime<Utc>,
}

fn parse_timestamp(text: &str) -> DateTime<Utc> {
    text.parse().unwrap_or_else(|_| {
        chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .unwrap_or_else(|_| Utc::now())
    })
}

pub fn expand_tilde(path: &Path) -> Result<PathBuf> {
    let path_str = path.to_string_lossy();
    if path_str == "~" {
        let base = BaseDirs::new().context("base directories not available")?;
        Ok(base.home_dir().to_path_buf())
    } else if let Some(stripped) = path_str.strip_prefix("~/") {
        let base = BaseDirs::new().context("base directories not available")?;
        Ok(base.home_dir().join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for i in 0..a.len() {
        dot += a[i] * b[i];
        na += a[i] * a[i];
        nb += b[i] * b[i];
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn expands_home_directory_prefix() {
        let base = BaseDirs::new().expect("home directory available");
        let expected = base.home_dir().join("demo.db");
        let result = expand_tilde(Path::new("~/demo.db")).expect("path expansion succeeds");
        assert_eq!(result, expected);
    }

    #[test]
    fn leaves_regular_paths_unchanged() {
        let input = Path::new("relative/path.db");
        let result = expand_tilde(input).expect("path expansion succeeds");
        assert_eq!(result, input);
    }

    #[test]
    fn cosine_of_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn journal_first_write_wins() {
        let db = Persistence::in_memory().unwrap();
        assert!(db.journal_put("run-1", "embed-prompt", "[1.0]").unwrap());
        assert!(!db.journal_put("run-1", "embed-prompt", "[2.0]").unwrap());
        assert_eq!(
            db.journal_get("run-1", "embed-prompt").unwrap().as_deref(),
            Some("[1.0]")
        );
        assert!(db.journal_get("run-2", "embed-prompt").unwrap().is_none());
    }

    #[test]
    fn context_search_filters_and_ranks() {
        let db = Persistence::in_memory().unwrap();
        db.index_context_item(&ContextItem::node("a", "Acme", "Company"), &[1.0, 0.0])
            .unwrap();
        db.index_context_item(&ContextItem::node("b", "Bolt", "Company"), &[0.6, 0.8])
            .unwrap();
        let note = ContextItem {
            id: "n".into(),
            score: 0.0,
            attributes: ContextAttributes::Note {
                author: "ana".into(),
                parent_node_id: "a".into(),
                content: "call back".into(),
            },
        };
        db.index_context_item(&note, &[1.0, 0.0]).unwrap();

        let all = db.search_context(&[1.0, 0.0], 10, None).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all[0].score >= all[1].score && all[1].score >= all[2].score);
        assert_eq!(all[2].id, "b");

        let nodes = db
            .search_context(&[1.0, 0.0], 10, Some(&[ContextKind::Node]))
            .unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].id, "a");
    }
}
