use anyhow::Result;
use async_trait::async_trait;
use kg_agent::agent::model::{ModelResponse, ToolCall};
use kg_agent::agent::providers::MockProvider;
use kg_agent::durable::{MemoryJournal, StepJournal};
use kg_agent::embeddings::{EmbeddingsClient, MockEmbeddingsService};
use kg_agent::error::{AgentError, ErrorKind};
use kg_agent::notify::{
    Ack, EventType, FailurePolicy, NotificationChannel, NotificationEvent, NotificationHub,
    RetryPolicy,
};
use kg_agent::orchestrator::{Orchestrator, OrchestratorBuilder, RunRequest};
use kg_agent::persistence::Persistence;
use kg_agent::retrieval::{ContextFilter, ContextRetriever};
use kg_agent::types::{ContextItem, InvocationStatus};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;
use tokio::time::Instant;

/// Returns the same snapshot for every query.
struct FixedContext(Vec<ContextItem>);

#[async_trait]
impl ContextRetriever for FixedContext {
    async fn query(
        &self,
        _vector: &[f32],
        top_k: usize,
        filter: Option<&ContextFilter>,
    ) -> Result<Vec<ContextItem>> {
        Ok(self
            .0
            .iter()
            .filter(|item| filter.map_or(true, |f| f.accepts(item.kind())))
            .take(top_k)
            .cloned()
            .collect())
    }
}

/// Never acknowledges; records when each attempt arrived.
#[derive(Default)]
struct DeafChannel {
    attempts: Mutex<Vec<Instant>>,
}

#[async_trait]
impl NotificationChannel for DeafChannel {
    async fn publish(&self, _consumer_id: &str, _event: &NotificationEvent) -> Result<Ack> {
        self.attempts.lock().unwrap().push(Instant::now());
        Ok(Ack { acked: false })
    }
}

fn plan(actions: &[&str], tools: &[&str]) -> String {
    format!(
        "```json\n{}\n```",
        json!({
            "intent": "MODIFICATION",
            "analysis": "The request adds entities and links them.",
            "contextObservations": "Some entities already exist.",
            "proposedActions": actions,
            "requiredTools": tools
        })
    )
}

fn call(tool: &str, arguments: Value) -> ModelResponse {
    ModelResponse::text(format!("calling {}", tool)).with_tool_call(ToolCall::new("call-1", tool, arguments))
}

fn builder(model: MockProvider, db: &Persistence, context: Vec<ContextItem>) -> OrchestratorBuilder {
    let embedder = Arc::new(EmbeddingsClient::with_service(
        "mock",
        Arc::new(MockEmbeddingsService::new(16)),
    ));
    Orchestrator::builder()
        .with_embedder(embedder)
        .with_retriever(Arc::new(FixedContext(context)))
        .with_graph_store(Arc::new(db.clone()))
        .with_model(Arc::new(model))
        .with_entity_types(vec!["Person".into(), "Company".into()])
}

fn types() -> Vec<String> {
    vec!["Person".into(), "Company".into()]
}

#[tokio::test]
async fn one_failed_action_does_not_stop_the_others() {
    let db = Persistence::in_memory().unwrap();
    let model = MockProvider::new(plan(
        &["create node A", "create relationship A->B", "create node C"],
        &["create_node", "create_relationship"],
    ))
    .then(call("create_node", json!({"type": "Person", "name": "A"})))
    .then(call(
        "create_relationship",
        json!({"fromNodeId": "A", "toNodeId": "B", "relationType": "KNOWS"}),
    ))
    .then(call("create_node", json!({"type": "Person", "name": "C"})))
    .then(ModelResponse::text("Created A and C; could not link A to B."));
    let agent = builder(model, &db, vec![]).build().unwrap();

    let output = agent.run("add A, B link and C", &types(), None).await.unwrap();

    let records = &output.execution_records;
    assert_eq!(records.len(), 3);
    assert_eq!(
        records.iter().map(|r| r.step_number).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(records[0].succeeded());

    let failures = records[1].failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, ErrorKind::UnresolvedEntityReference);
    assert!(failures[0].message.contains("toNodeId 'B'"));
    assert!(!failures[0].message.contains("fromNodeId"));

    assert!(records[2].succeeded());
    assert_eq!(records[2].created_entities_snapshot.len(), 2);

    assert!(output.summary.contains("could not resolve toNodeId 'B'"));
    assert_eq!(db.list_nodes().unwrap().len(), 2);
    assert!(db.list_relationships().unwrap().is_empty());
}

#[tokio::test]
async fn entity_created_in_run_beats_context_match() {
    let db = Persistence::in_memory().unwrap();
    let context = vec![
        ContextItem::node("old-1", "Acme", "Company").with_score(0.9),
        ContextItem::node("old-2", "Ada Lovelace", "Person").with_score(0.8),
    ];
    let model = MockProvider::new(plan(
        &["create company Acme", "link Ada to Acme"],
        &["create_node", "create_relationship"],
    ))
    .then(call("create_node", json!({"type": "Company", "name": "Acme"})))
    .then(call(
        "create_relationship",
        json!({"fromNodeId": "ada lovelace", "toNodeId": "ACME", "relationType": "WORKS_AT"}),
    ))
    .then(ModelResponse::text("done"));
    let agent = builder(model, &db, context).build().unwrap();

    let output = agent.run("Ada works at the new Acme", &types(), None).await.unwrap();

    let created = &output.execution_records[0].created_entities_snapshot[0];
    assert_eq!(created.reference_name, "Acme");
    assert_eq!(created.entity_type, "Company");
    assert_ne!(created.id, "old-1");

    let links = db.list_relationships().unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].from_id, "old-2");
    assert_eq!(links[0].to_id, created.id);
}

#[tokio::test]
async fn invalid_entity_type_is_recorded() {
    let db = Persistence::in_memory().unwrap();
    let model = MockProvider::new(plan(&["create planet Mars"], &["create_node"]))
        .then(call("create_node", json!({"type": "Planet", "name": "Mars"})))
        .then(ModelResponse::text("nothing created"));
    let agent = builder(model, &db, vec![]).build().unwrap();

    let output = agent.run("add Mars", &types(), None).await.unwrap();
    let record = &output.execution_records[0];
    assert_eq!(record.failures()[0].kind, ErrorKind::InvalidEntityType);
    assert!(db.list_nodes().unwrap().is_empty());
}

#[tokio::test]
async fn pending_and_unknown_tools_are_not_executed() {
    let db = Persistence::in_memory().unwrap();
    let model = MockProvider::new(plan(&["rename Acme"], &["update_node"]))
        .then(
            ModelResponse::text("renaming")
                .with_tool_call(ToolCall::new("1", "update_node", json!({"id": "old-1"})))
                .with_tool_call(ToolCall::new("2", "drop_database", json!({}))),
        )
        .then(ModelResponse::text("rename is not supported yet"));
    let agent = builder(model, &db, vec![]).build().unwrap();

    let output = agent.run("rename Acme", &types(), None).await.unwrap();
    let statuses: Vec<InvocationStatus> = output.execution_records[0]
        .invocations()
        .iter()
        .map(|i| i.status)
        .collect();
    assert_eq!(statuses, vec![InvocationStatus::Pending, InvocationStatus::Ignored]);
    assert!(output.summary.contains("update_node is not implemented yet"));
}

#[tokio::test]
async fn required_tools_without_handlers_reach_the_summary() {
    let db = Persistence::in_memory().unwrap();
    let model = MockProvider::new(plan(&["rename Acme to Acme Corp"], &["update_node"]))
        .then(ModelResponse::text("Acme should be renamed to Acme Corp."))
        .then(ModelResponse::text("Summary."));
    let agent = builder(model.clone(), &db, vec![]).build().unwrap();

    let output = agent.run("rename Acme", &types(), None).await.unwrap();

    assert!(output.execution_records[0].invocations().is_empty());
    assert!(output.summary.starts_with("Summary."));
    assert!(output.summary.contains("Not implemented:"));
    assert!(output
        .summary
        .contains("update_node is required by the plan but not implemented yet"));

    let summary_prompt = &model.prompts()[2].user;
    assert!(summary_prompt.contains("Required tools: update_node (not implemented)"));
}

#[tokio::test]
async fn invalid_plan_aborts_with_raw_text() {
    let db = Persistence::in_memory().unwrap();
    let raw = plan(&["wipe it"], &["delete_everything"]);
    let model = MockProvider::new(raw.clone());
    let agent = builder(model.clone(), &db, vec![]).build().unwrap();

    let err = agent.run("delete everything", &types(), None).await.unwrap_err();

    match &err {
        AgentError::Plan(plan_error) => {
            assert_eq!(plan_error.kind, ErrorKind::UnknownTool);
            assert!(plan_error.detail.contains("delete_everything"));
            assert_eq!(plan_error.raw, raw);
        }
        other => panic!("unexpected error {other}"),
    }
    assert!(err.to_string().contains(&raw));
    assert_eq!(model.call_count(), 1);
}

#[tokio::test]
async fn plan_generation_failure_is_transient() {
    let db = Persistence::in_memory().unwrap();
    let model = MockProvider::with_responses(vec![]).then_fail("rate limited");
    let agent = builder(model, &db, vec![]).build().unwrap();

    let err = agent.run("anything", &types(), None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PlanGenerationError);
    assert!(err.is_transient());
}

#[tokio::test(start_paused = true)]
async fn undeliverable_notifications_do_not_fail_the_run() {
    let db = Persistence::in_memory().unwrap();
    let channel = Arc::new(DeafChannel::default());
    let model = MockProvider::new(plan(&["look around"], &["vector_search"]))
        .then(ModelResponse::text("nothing to do"))
        .then(ModelResponse::text("done"));
    let agent = builder(model, &db, vec![])
        .with_journal(Arc::new(MemoryJournal::new()))
        .with_notification_channel(channel.clone())
        .build()
        .unwrap();

    let output = agent
        .run_request(RunRequest::new("look around").with_consumer("ui-7"))
        .await
        .unwrap();
    assert_eq!(output.execution_records.len(), 1);

    // notify-action-1 then notify-complete, five attempts each.
    let attempts = channel.attempts.lock().unwrap().clone();
    assert_eq!(attempts.len(), 10);
    for pair in attempts[..5].windows(2) {
        assert_eq!(pair[1] - pair[0], Duration::from_secs(1));
    }
}

#[tokio::test(start_paused = true)]
async fn fatal_notification_policy_aborts_the_run() {
    let db = Persistence::in_memory().unwrap();
    let model = MockProvider::new(plan(&["look around"], &["vector_search"]))
        .then(ModelResponse::text("nothing to do"));
    let agent = builder(model, &db, vec![])
        .with_notification_channel(Arc::new(DeafChannel::default()))
        .with_retry_policy(RetryPolicy::new(2, Duration::from_millis(10)))
        .with_failure_policy(FailurePolicy::Fatal)
        .build()
        .unwrap();

    let err = agent
        .run_request(RunRequest::new("look around").with_consumer("ui-7"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AgentError::NotificationUndeliverable { attempts: 2, ref consumer_id } if consumer_id == "ui-7"
    ));
}

#[tokio::test]
async fn subscribed_consumer_sees_progress_and_completion() {
    let db = Persistence::in_memory().unwrap();
    let hub = Arc::new(NotificationHub::new());
    let mut events = hub.subscribe("ui-1");
    let model = MockProvider::new(plan(&["create Ann"], &["create_node"]))
        .then(call("create_node", json!({"type": "Person", "name": "Ann"})))
        .then(ModelResponse::text("Ann created"));
    let agent = builder(model, &db, vec![])
        .with_notification_channel(hub.clone())
        .build()
        .unwrap();

    let output = agent
        .run_request(RunRequest::new("add Ann").with_consumer("ui-1"))
        .await
        .unwrap();

    let progress = events.recv().await.unwrap();
    assert_eq!(progress.event_type, EventType::Progress);
    assert_eq!(progress.payload["stepNumber"], 1);
    assert_eq!(progress.payload["status"], "succeeded");

    let complete = events.recv().await.unwrap();
    assert_eq!(complete.event_type, EventType::Complete);
    assert_eq!(complete.payload["summary"], output.summary.as_str());
    assert_eq!(complete.payload["runId"], output.run_id.as_str());
}

#[tokio::test]
async fn rerun_with_same_id_replays_from_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("runs.duckdb");
    let actions = ["create Ann", "create Bob"];

    let first = {
        let db = Persistence::new(&path).unwrap();
        let model = MockProvider::new(plan(&actions, &["create_node"]))
            .then(call("create_node", json!({"type": "Person", "name": "Ann"})))
            .then(call("create_node", json!({"type": "Person", "name": "Bob"})))
            .then(ModelResponse::text("both created"));
        let agent = builder(model, &db, vec![])
            .with_journal(Arc::new(db.clone()))
            .build()
            .unwrap();
        let output = agent
            .run_request(RunRequest::new("add Ann and Bob").with_run_id("run-42"))
            .await
            .unwrap();
        db.checkpoint().unwrap();
        output
    };

    let db = Persistence::new(&path).unwrap();
    let offline = MockProvider::with_responses(vec![]).then_fail("model must not be called");
    let agent = builder(offline.clone(), &db, vec![])
        .with_journal(Arc::new(db.clone()))
        .build()
        .unwrap();
    let second = agent
        .run_request(RunRequest::new("add Ann and Bob").with_run_id("run-42"))
        .await
        .unwrap();

    assert_eq!(offline.call_count(), 0);
    assert_eq!(second.plan, first.plan);
    assert_eq!(second.execution_records, first.execution_records);
    assert_eq!(second.summary, first.summary);
    assert_eq!(db.list_nodes().unwrap().len(), 2);

    let steps: Vec<String> = db
        .journal_steps("run-42")
        .unwrap()
        .into_iter()
        .map(|e| e.step_name)
        .collect();
    for step in [
        "embed-prompt",
        "retrieve-context",
        "generate-plan",
        "validate-plan",
        "analyze-action-1",
        "execute-action-1-call-1",
        "analyze-action-2",
        "execute-action-2-call-1",
        "generate-summary",
    ] {
        assert!(steps.contains(&step.to_string()), "missing step {}", step);
    }
}

#[tokio::test]
async fn aborted_run_resumes_without_repeating_writes() {
    let db = Persistence::in_memory().unwrap();
    let journal: Arc<dyn StepJournal> = Arc::new(MemoryJournal::new());
    let request = || {
        RunRequest::new("add Ann")
            .with_run_id("abort-then-resume")
            .with_consumer("ui")
    };

    // The write lands, then the fatal notification policy aborts the run.
    let model = MockProvider::new(plan(&["create Ann"], &["create_node"]))
        .then(call("create_node", json!({"type": "Person", "name": "Ann"})));
    let aborted = builder(model, &db, vec![])
        .with_journal(journal.clone())
        .with_notification_channel(Arc::new(DeafChannel::default()))
        .with_retry_policy(RetryPolicy::new(1, Duration::ZERO))
        .with_failure_policy(FailurePolicy::Fatal)
        .build()
        .unwrap();
    let err = aborted.run_request(request()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotificationUndeliverable);
    assert_eq!(db.list_nodes().unwrap().len(), 1);

    let retry_model = MockProvider::new("Ann was added.");
    let agent = builder(retry_model.clone(), &db, vec![])
        .with_journal(journal)
        .build()
        .unwrap();
    let output = agent.run_request(request()).await.unwrap();

    // Only the summary needed the model; the node was not created twice.
    assert_eq!(retry_model.call_count(), 1);
    assert_eq!(db.list_nodes().unwrap().len(), 1);
    assert!(output.execution_records[0].succeeded());
    assert_eq!(
        output.execution_records[0].created_entities_snapshot[0].reference_name,
        "Ann"
    );
    assert!(output.summary.starts_with("Ann was added."));
}
