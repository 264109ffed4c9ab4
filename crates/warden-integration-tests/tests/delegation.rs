//! Delegation, messaging, and at-most-once tool calls wired through
//! the full executor stack (policy + audit + store).

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use warden_audit::AuditSink;
use warden_core::{AgentId, CallContext, SessionId, TaskId};
use warden_policy::{PolicyEngine, PolicyFile, PolicySnapshot};
use warden_store::{Store, TaskStatus};
use warden_tasks::{
    DelegateTaskAsyncTool, DelegateTaskTool, DelegationCollector, SendMessageTool, SpawnTaskTool,
    ToolExecutor, ToolHandler,
};

async fn runtime(dir: &tempfile::TempDir, policy_yaml: &str) -> (Store, ToolExecutor) {
    warden_integration_tests::init_tracing();
    let store = Store::in_memory().await.unwrap();
    let audit = Arc::new(AuditSink::open(dir.path().join("audit.jsonl")).unwrap());
    let file: PolicyFile = serde_yaml::from_str(policy_yaml).unwrap();
    let snapshot = PolicySnapshot::from_file(&file).unwrap();
    let policy = Arc::new(PolicyEngine::with_snapshot(
        snapshot,
        dir.path().join("policy.yaml"),
        audit,
    ));

    let mut executor = ToolExecutor::new(store.clone(), policy);
    executor.register(Arc::new(SpawnTaskTool::new(store.clone())) as Arc<dyn ToolHandler>);
    executor.register(Arc::new(DelegateTaskTool::new(store.clone())) as Arc<dyn ToolHandler>);
    executor
        .register(Arc::new(DelegateTaskAsyncTool::new(store.clone())) as Arc<dyn ToolHandler>);
    executor.register(Arc::new(SendMessageTool::new(store.clone())) as Arc<dyn ToolHandler>);
    (store, executor)
}

const FULL_GRANTS: &str = "allow_capabilities: [tools.spawn_task, tools.delegate_task, tools.delegate_task_async, tools.send_message]\n";

async fn seeded_ctx(store: &Store) -> CallContext {
    store.upsert_agent(&AgentId::from("agent-a"), "parent").await.unwrap();
    store.upsert_agent(&AgentId::from("agent-b"), "child").await.unwrap();
    let session = SessionId::new();
    store.ensure_session(&session).await.unwrap();
    CallContext::new(AgentId::from("agent-a"), session)
}

#[tokio::test]
async fn self_delegation_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let (store, executor) = runtime(&dir, FULL_GRANTS).await;
    let ctx = seeded_ctx(&store).await;

    let err = executor
        .execute(
            "delegate_task",
            json!({
                "target_agent": "agent-a",
                "prompt": "x",
                "session_id": ctx.session_id.to_string(),
            }),
            &ctx,
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cannot delegate to yourself"));
}

#[tokio::test]
async fn delegation_cancellation_aborts_the_child() {
    let dir = tempfile::tempdir().unwrap();
    let (store, executor) = runtime(&dir, FULL_GRANTS).await;
    let ctx = seeded_ctx(&store).await;

    let canceller = ctx.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let outcome = executor
        .execute(
            "delegate_task",
            json!({
                "target_agent": "agent-b",
                "prompt": "x",
                "session_id": ctx.session_id.to_string(),
            }),
            &ctx,
        )
        .await
        .unwrap();

    assert_eq!(outcome["status"], "CANCELED");
    let task_id = outcome["task_id"].as_str().unwrap();
    assert!(!task_id.is_empty());

    // The backing task is terminal in the store: no orphaned worker.
    let task = store
        .get_task(&TaskId::parse(task_id).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(task.status.is_terminal());
    assert_eq!(task.status, TaskStatus::Canceled);
}

#[tokio::test]
async fn policy_denied_tool_call_is_fatal_and_audited() {
    let dir = tempfile::tempdir().unwrap();
    let (store, executor) = runtime(&dir, "allow_capabilities: []\n").await;
    let ctx = seeded_ctx(&store).await;

    let err = executor
        .execute(
            "send_message",
            json!({"to_agent": "agent-b", "content": "hi"}),
            &ctx,
        )
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "policy denied capability \"tools.send_message\""
    );

    let audit = std::fs::read_to_string(dir.path().join("audit.jsonl")).unwrap();
    assert!(audit.contains("\"decision\":\"deny\""));
    assert!(audit.contains("tools.send_message"));
}

#[tokio::test]
async fn dedup_law_holds_across_tasks_and_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let (store, executor) = runtime(&dir, FULL_GRANTS).await;
    let base = seeded_ctx(&store).await;

    let parent = store
        .create_task(warden_store::NewTask {
            session_id: base.session_id.clone(),
            agent_id: base.agent_id.clone(),
            parent_task_id: None,
            payload: "{}".to_string(),
            priority: 0,
        })
        .await
        .unwrap();
    let ctx = base.clone().with_task(parent.id.clone());

    let spawn_args = json!({
        "description": "work",
        "payload": "{}",
        "parent_task_id": parent.id.to_string(),
        "session_id": ctx.session_id.to_string(),
    });

    // Same task, same canonical input: one spawn, replayed result.
    let first = executor.execute("spawn_task", spawn_args.clone(), &ctx).await.unwrap();
    let second = executor.execute("spawn_task", spawn_args.clone(), &ctx).await.unwrap();
    assert_eq!(first["task_id"], second["task_id"]);
    assert_eq!(store.list_session_tasks(&ctx.session_id).await.unwrap().len(), 2);

    // A different task context executes the side effect again.
    let other_parent = store
        .create_task(warden_store::NewTask {
            session_id: base.session_id.clone(),
            agent_id: base.agent_id.clone(),
            parent_task_id: None,
            payload: "{}".to_string(),
            priority: 0,
        })
        .await
        .unwrap();
    let other_ctx = base.clone().with_task(other_parent.id.clone());
    let third = executor.execute("spawn_task", spawn_args, &other_ctx).await.unwrap();
    assert_ne!(first["task_id"], third["task_id"]);
}

#[tokio::test]
async fn async_delegation_result_injected_once() {
    let dir = tempfile::tempdir().unwrap();
    let (store, executor) = runtime(&dir, FULL_GRANTS).await;
    let ctx = seeded_ctx(&store).await;

    let queued = executor
        .execute(
            "delegate_task_async",
            json!({
                "target_agent": "agent-b",
                "prompt": "compute",
                "session_id": ctx.session_id.to_string(),
            }),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(queued["status"], "queued");
    let delegation_id = warden_core::DelegationId::parse(
        queued["delegation_id"].as_str().unwrap(),
    )
    .unwrap();

    // A worker picks up the backing task and finishes it; the
    // runtime marks the delegation completed.
    let task = store
        .claim_task(&AgentId::from("agent-b"), "worker-1")
        .await
        .unwrap()
        .unwrap();
    store.complete_task(&task.id, "42").await.unwrap();
    store.complete_delegation(&delegation_id, "42").await.unwrap();

    let collector = DelegationCollector::new(store.clone());
    let messages = collector.collect(&ctx.agent_id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, "system");
    assert!(messages[0].content.contains("42"));

    // Injected exactly once.
    assert!(collector.collect(&ctx.agent_id).await.unwrap().is_empty());
}
