//! Readiness propagation and structural rules across engine and orchestrator.

use taskweave::core::{AgentStatus, EdgeKind, Task, TaskStatus};
use taskweave::engine::ResolveOutcome;
use taskweave::notify::NotificationKind;
use taskweave::orchestration::NewTask;
use taskweave::Error;

use crate::fixtures::{abc_plan, Harness, WORKSPACE};

/// Test: A/B/C scenario
/// Given A (todo), B (waits on A), C (human-gated)
/// When A completes
/// Then B becomes ready, C stays blocked until resolved, and the agent
/// returns to active once C is resolved
#[tokio::test]
async fn test_abc_scenario() {
    let h = Harness::scripted(abc_plan());
    let plan = h.orchestrator.create_agent("ship it").await.unwrap();
    let agent = plan.agent.id;
    let a = h.task_by_title(&agent, "A").await;
    let b = h.task_by_title(&agent, "B").await;
    let c = h.task_by_title(&agent, "C").await;

    assert_eq!(a.status, TaskStatus::Todo);
    assert_eq!(b.status, TaskStatus::Blocked);
    assert_eq!(c.status, TaskStatus::Blocked);
    assert!(c.is_dependency);

    h.engine.start_task(&a.id).await.unwrap();
    let completion = h.engine.complete_task(&a.id, None).await.unwrap();
    assert_eq!(completion.newly_ready, vec![b.id]);

    let ready: Vec<_> = h.engine.ready_tasks(Some(&agent)).await.iter().map(|t| t.id).collect();
    assert_eq!(ready, vec![b.id]);
    assert_eq!(h.engine.task(&c.id).await.unwrap().status, TaskStatus::Blocked);

    let report = h.orchestrator.drive_agent(&agent).await.unwrap();
    assert_eq!(report.completed, vec![b.id]);
    assert_eq!(report.status, AgentStatus::Blocked);
    assert_eq!(h.engine.task(&c.id).await.unwrap().status, TaskStatus::Blocked);

    h.sink.clear();
    let outcome = h.orchestrator.resolve(&c.id).await.unwrap();
    assert!(matches!(outcome, ResolveOutcome::Resolved(_)));

    let changes: Vec<_> = h
        .sink
        .events()
        .into_iter()
        .filter(|n| n.kind == NotificationKind::AgentStatusChanged)
        .map(|n| n.metadata["to"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(changes.first().map(String::as_str), Some("active"));

    let agent = h.orchestrator.agent(&agent).await.unwrap();
    assert_eq!(agent.status, AgentStatus::Completed);
}

/// Test: agent status follows its tasks
/// Given the A/B/C plan
/// Then the agent is blocked while nothing runs, active while a task is in
/// progress, and blocked again the moment a task is escalated to a human
#[tokio::test]
async fn test_agent_blocked_exactly_when_idle_with_blocked_task() {
    let h = Harness::scripted(abc_plan());
    let plan = h.orchestrator.create_agent("ship it").await.unwrap();
    let agent = plan.agent.id;
    assert_eq!(plan.agent.status, AgentStatus::Blocked);

    let a = h.task_by_title(&agent, "A").await;
    h.engine.start_task(&a.id).await.unwrap();
    assert_eq!(h.orchestrator.refresh_status(&agent).await.unwrap(), AgentStatus::Active);

    let mut gate = NewTask::new("D");
    gate.human_reason = Some("needs legal review".to_string());
    h.orchestrator.create_task(&agent, gate).await.unwrap();
    assert_eq!(h.orchestrator.agent(&agent).await.unwrap().status, AgentStatus::Active);

    h.engine.complete_task(&a.id, None).await.unwrap();
    let b = h.task_by_title(&agent, "B").await;
    assert_eq!(b.status, TaskStatus::Todo);
    h.engine.require_human(&b.id, "needs a decision").await.unwrap();
    assert_eq!(h.orchestrator.agent(&agent).await.unwrap().status, AgentStatus::Blocked);
}

/// Test: agent stays blocked while another human task is unresolved
#[tokio::test]
async fn test_agent_stays_blocked_with_second_human_task() {
    let mut plan = abc_plan();
    plan.push(taskweave::orchestration::CandidateTask::human(
        "D",
        "second sign-off",
        "needs legal review",
    ));
    let h = Harness::scripted(plan);
    let (plan, report) = h.orchestrator.start_agent("ship it").await.unwrap();
    assert_eq!(report.status, AgentStatus::Blocked);

    let c = h.task_by_title(&plan.agent.id, "C").await;
    h.orchestrator.resolve(&c.id).await.unwrap();
    let agent = h.orchestrator.agent(&plan.agent.id).await.unwrap();
    assert_eq!(agent.status, AgentStatus::Blocked);
}

/// Test: cycle rejected
/// Given edge A -> B
/// When B -> A is proposed
/// Then it is rejected as a cycle and nothing changes
#[tokio::test]
async fn test_reverse_edge_is_rejected_as_cycle() {
    let h = Harness::keyword();
    let a = h.engine.register_task(Task::new("A", "").in_workspace(WORKSPACE)).await.unwrap();
    let b = h.engine.register_task(Task::new("B", "").in_workspace(WORKSPACE)).await.unwrap();
    h.engine.add_edge(&a.id, &b.id, EdgeKind::FinishToStart).await.unwrap();

    let check = h.engine.can_add_edge(&b.id, &a.id).await;
    assert!(!check.allowed);
    assert!(check.reason.unwrap().contains("cycle"));

    let err = h.engine.add_edge(&b.id, &a.id, EdgeKind::FinishToStart).await.unwrap_err();
    assert!(matches!(err, Error::Structural(_)));
    assert!(!err.is_retryable());
    assert_eq!(h.engine.metrics().await.total_edges, 1);
    assert_eq!(h.store.snapshot().edges.len(), 1);
}

/// Test: duplicate and unknown edges are structural violations
#[tokio::test]
async fn test_duplicate_and_unknown_edges_rejected() {
    let h = Harness::keyword();
    let a = h.engine.register_task(Task::new("A", "").in_workspace(WORKSPACE)).await.unwrap();
    let b = h.engine.register_task(Task::new("B", "").in_workspace(WORKSPACE)).await.unwrap();
    h.engine.add_edge(&a.id, &b.id, EdgeKind::StartToStart).await.unwrap();

    let dup = h.engine.add_edge(&a.id, &b.id, EdgeKind::FinishToStart).await;
    assert!(matches!(dup, Err(Error::Structural(_))));

    let ghost = Task::new("ghost", "");
    let unknown = h.engine.add_edge(&a.id, &ghost.id, EdgeKind::FinishToStart).await;
    assert!(matches!(unknown, Err(Error::Structural(_))));
}

/// Test: deleting a task with a dependent fails loudly
#[tokio::test]
async fn test_delete_with_dependent_fails() {
    let h = Harness::scripted(abc_plan());
    let plan = h.orchestrator.create_agent("ship it").await.unwrap();
    let a = h.task_by_title(&plan.agent.id, "A").await;
    let b = h.task_by_title(&plan.agent.id, "B").await;

    let err = h.engine.delete_task(&a.id).await.unwrap_err();
    assert!(matches!(err, Error::Structural(_)));
    assert!(h.engine.task(&a.id).await.is_some());
    assert!(h.store.snapshot().tasks.iter().any(|t| t.id == a.id));

    h.engine.delete_task(&b.id).await.unwrap();
    h.engine.delete_task(&a.id).await.unwrap();
    assert!(h.engine.task(&a.id).await.is_none());
}

/// Test: resolve twice
/// Then the second call changes nothing and emits nothing
#[tokio::test]
async fn test_resolve_twice_is_idempotent() {
    let h = Harness::scripted(abc_plan());
    let plan = h.orchestrator.create_agent("ship it").await.unwrap();
    let c = h.task_by_title(&plan.agent.id, "C").await;

    h.orchestrator.resolve(&c.id).await.unwrap();
    let writes = h.store.task_writes();
    let events = h.sink.events().len();

    let second = h.orchestrator.resolve(&c.id).await.unwrap();
    assert_eq!(second, ResolveOutcome::AlreadyDone);
    assert_eq!(h.store.task_writes(), writes);
    assert_eq!(h.sink.events().len(), events);
    assert_eq!(h.count(NotificationKind::HumanResolved), 1);
}

/// Test: resolving an autonomous task is a guard violation
#[tokio::test]
async fn test_resolve_autonomous_task_rejected() {
    let h = Harness::scripted(abc_plan());
    let plan = h.orchestrator.create_agent("ship it").await.unwrap();
    let b = h.task_by_title(&plan.agent.id, "B").await;

    let err = h.orchestrator.resolve(&b.id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
}

/// Test: recompute twice with no change in between writes nothing
#[tokio::test]
async fn test_recompute_twice_writes_nothing() {
    let h = Harness::scripted(abc_plan());
    let plan = h.orchestrator.create_agent("ship it").await.unwrap();
    let ids: Vec<_> = plan.tasks.iter().map(|t| t.id).collect();

    let writes = h.store.task_writes();
    for _ in 0..2 {
        for id in &ids {
            h.engine.recompute_readiness(id).await.unwrap();
        }
    }
    assert_eq!(h.store.task_writes(), writes);
}

/// Test: human-gated tasks keep a reason until resolved
#[tokio::test]
async fn test_human_tasks_stay_blocked_with_reason() {
    let h = Harness::keyword();
    let (plan, _) = h
        .orchestrator
        .start_agent("Launch a campaign and hire a designer")
        .await
        .unwrap();

    for task in h.engine.tasks_for_agent(&plan.agent.id).await {
        if task.is_dependency {
            assert_eq!(task.status, TaskStatus::Blocked);
            assert!(!task.blocked_reason.unwrap_or_default().trim().is_empty());
        }
    }
}

/// Test: store outage
/// Given the store goes offline
/// When a transition is attempted
/// Then a retryable error comes back and the graph is unchanged
#[tokio::test]
async fn test_store_outage_leaves_graph_untouched() {
    let h = Harness::scripted(abc_plan());
    let plan = h.orchestrator.create_agent("ship it").await.unwrap();
    let a = h.task_by_title(&plan.agent.id, "A").await;
    let before = h.engine.snapshot().await.edges();
    let events = h.sink.events().len();

    h.store.set_available(false);
    let err = h.engine.start_task(&a.id).await.unwrap_err();
    assert!(matches!(err, Error::StoreUnavailable(_)));
    assert!(err.is_retryable());
    assert_eq!(h.engine.task(&a.id).await.unwrap().status, TaskStatus::Todo);
    assert_eq!(h.engine.snapshot().await.edges(), before);
    assert_eq!(h.sink.events().len(), events);

    h.store.set_available(true);
    assert!(h.engine.start_task(&a.id).await.is_ok());
}
