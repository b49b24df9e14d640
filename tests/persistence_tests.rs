use kg_agent::durable::StepJournal;
use kg_agent::graph::GraphStore;
use kg_agent::persistence::{migrations, Persistence};
use kg_agent::types::{ContextItem, ContextKind};
use tempfile::tempdir;

fn temp_db_path() -> std::path::PathBuf {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.duckdb");
    // Keep directory alive by leaking it for test duration to avoid drop before use
    Box::leak(Box::new(dir));
    path
}

#[test]
fn db_initializes_and_tables_exist() {
    let path = temp_db_path();
    let p = Persistence::new(&path).expect("init db");
    let conn = p.conn();
    for table in ["step_journal", "kg_nodes", "kg_relationships", "context_index"].iter() {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        let mut stmt = conn.prepare(&sql).unwrap();
        let count: i64 = stmt.query_row([], |row| row.get(0)).unwrap();
        assert_eq!(count, 0, "table {} should start empty", table);
    }
    assert!(migrations::current_version(&conn).unwrap() >= 2);
}

#[test]
fn journal_keeps_first_result_and_survives_reopen() {
    let path = temp_db_path();
    {
        let p = Persistence::new(&path).unwrap();
        assert!(p.journal_put("run-1", "generate-plan", "\"first\"").unwrap());
        assert!(!p.journal_put("run-1", "generate-plan", "\"second\"").unwrap());
        p.journal_put("run-2", "generate-plan", "\"other run\"").unwrap();
        p.checkpoint().unwrap();
    }

    let p = Persistence::new(&path).unwrap();
    assert_eq!(
        p.journal_get("run-1", "generate-plan").unwrap().as_deref(),
        Some("\"first\"")
    );
    assert_eq!(p.journal_get("run-1", "validate-plan").unwrap(), None);
    assert_eq!(p.journal_steps("run-1").unwrap().len(), 1);

    assert_eq!(p.journal_clear("run-1").unwrap(), 1);
    assert_eq!(p.journal_get("run-1", "generate-plan").unwrap(), None);
    assert!(p.journal_get("run-2", "generate-plan").unwrap().is_some());
}

#[tokio::test]
async fn journal_trait_goes_through_duckdb() {
    let p = Persistence::in_memory().unwrap();
    p.store("r", "embed-prompt", "[0.5]").await.unwrap();
    p.store("r", "embed-prompt", "[0.9]").await.unwrap();
    assert_eq!(p.load("r", "embed-prompt").await.unwrap().as_deref(), Some("[0.5]"));
}

#[tokio::test]
async fn graph_writes_are_listed() {
    let p = Persistence::in_memory().unwrap();
    let ann = p.create_node("Person", "Ann", "engineer").await.unwrap();
    let acme = p.create_node("Company", "Acme", "").await.unwrap();
    let link = p.create_relationship(&ann, &acme, "WORKS_AT").await.unwrap();

    let nodes = p.list_nodes().unwrap();
    assert_eq!(nodes.len(), 2);
    let stored = p.get_node(&ann).unwrap().unwrap();
    assert_eq!(stored.name, "Ann");
    assert_eq!(stored.node_type, "Person");

    let links = p.list_relationships().unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].id, link);
    assert_eq!(links[0].relation_type, "WORKS_AT");

    assert!(p.create_node("Person", "  ", "").await.is_err());
    assert!(p.create_relationship(&ann, &acme, "").await.is_err());
}

#[test]
fn context_search_ranks_and_filters() {
    let p = Persistence::in_memory().unwrap();
    let acme = ContextItem::node("n-1", "Acme", "Company");
    let ann = ContextItem::node("n-2", "Ann", "Person");
    p.index_context_item(&acme, &[1.0, 0.0]).unwrap();
    p.index_context_item(&ann, &[0.6, 0.8]).unwrap();
    // Re-indexing replaces the earlier entry for the same entity.
    p.index_context_item(&ann, &[0.0, 1.0]).unwrap();
    assert_eq!(p.count_context_items().unwrap(), 2);

    let hits = p.search_context(&[0.0, 1.0], 10, None).unwrap();
    assert_eq!(hits[0].id, "n-2");
    assert!((hits[0].score - 1.0).abs() < 1e-6);
    assert_eq!(hits[1].score, 0.0);

    let top = p.search_context(&[0.0, 1.0], 1, None).unwrap();
    assert_eq!(top.len(), 1);

    let notes = p
        .search_context(&[0.0, 1.0], 10, Some(&[ContextKind::Note]))
        .unwrap();
    assert!(notes.is_empty());
}
