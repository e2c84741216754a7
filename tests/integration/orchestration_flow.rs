//! Orchestrator behaviour end to end.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use taskweave::core::{AgentStatus, TaskStatus};
use taskweave::notify::NotificationKind;
use taskweave::orchestration::{KeywordDecomposer, NewTask, REVIEW_TITLE};
use taskweave::store::MemoryStore;
use taskweave::Error;

use crate::fixtures::{
    abc_plan, FailingDecomposer, FlakyWork, HangingDecomposer, Harness, OutageWork,
    ScriptedDecomposer, TrackingWork,
};

/// Test: provider failure
/// Then the agent gets the fixed plan and is never left without tasks
#[tokio::test]
async fn test_failed_decomposition_falls_back() {
    let h = Harness::new(
        Arc::new(FailingDecomposer),
        Arc::new(FlakyWork::new(0)),
    );
    let (plan, report) = h.orchestrator.start_agent("do something").await.unwrap();

    assert!(plan.used_fallback);
    assert_eq!(h.count(NotificationKind::DecompositionFallback), 1);
    assert_eq!(report.completed.len(), 1);
    assert_eq!(report.status, AgentStatus::Blocked);

    let review = h.task_by_title(&plan.agent.id, REVIEW_TITLE).await;
    assert!(review.awaiting_human());
}

/// Test: provider hangs past the timeout
#[tokio::test(start_paused = true)]
async fn test_slow_decomposition_times_out_to_fallback() {
    let h = Harness::new(Arc::new(HangingDecomposer), Arc::new(FlakyWork::new(0)));
    let orchestrator = h.orchestrator.with_decompose_timeout(Duration::from_secs(2));

    let plan = orchestrator.create_agent("write a blog post").await.unwrap();
    assert!(plan.used_fallback);
    assert_eq!(plan.tasks.len(), 2);
}

/// Test: plan violating the invariants is replaced by the fallback
#[tokio::test]
async fn test_invalid_plan_falls_back() {
    let only_autonomous = vec![taskweave::orchestration::CandidateTask::autonomous("solo", "")];
    let h = Harness::scripted(only_autonomous);
    let plan = h.orchestrator.create_agent("anything").await.unwrap();

    assert!(plan.used_fallback);
    assert!(plan.tasks.iter().any(|t| t.is_dependency));
}

/// Test: work failure
/// Then the task returns to todo with one more attempt, the loop stops,
/// and the next drive retries it
#[tokio::test]
async fn test_work_failure_retries_on_next_drive() {
    let h = Harness::new(
        Arc::new(ScriptedDecomposer(abc_plan())),
        Arc::new(FlakyWork::new(1)),
    );
    let (plan, report) = h.orchestrator.start_agent("ship it").await.unwrap();
    let a = h.task_by_title(&plan.agent.id, "A").await;

    assert_eq!(report.failed, Some(a.id));
    assert!(report.completed.is_empty());
    assert_eq!(a.status, TaskStatus::Todo);
    assert_eq!(a.attempts, 1);
    assert_eq!(h.count(NotificationKind::TaskFailed), 1);
    assert_ne!(report.status, AgentStatus::Completed);

    let report = h.orchestrator.drive_agent(&plan.agent.id).await.unwrap();
    assert_eq!(report.completed.len(), 2);
    assert_eq!(report.status, AgentStatus::Blocked);
}

/// Test: store outage while a task runs
/// Then the task is not stranded in progress: the next drive releases it
/// with one more attempt and runs it again
#[tokio::test]
async fn test_store_outage_during_work_does_not_strand_task() {
    let store = Arc::new(MemoryStore::new());
    let h = Harness::with_store(
        store.clone(),
        Arc::new(ScriptedDecomposer(abc_plan())),
        Arc::new(OutageWork::new(store.clone())),
    );
    let plan = h.orchestrator.create_agent("ship it").await.unwrap();
    let agent = plan.agent.id;

    let err = h.orchestrator.drive_agent(&agent).await.unwrap_err();
    assert!(matches!(err, Error::StoreUnavailable(_)));
    store.set_available(true);

    let report = h.orchestrator.drive_agent(&agent).await.unwrap();
    assert_eq!(report.completed.len(), 2);
    assert_eq!(report.status, AgentStatus::Blocked);

    let a = h.task_by_title(&agent, "A").await;
    assert_eq!(a.status, TaskStatus::Done);
    assert_eq!(a.attempts, 1);
    assert_eq!(h.count(NotificationKind::TaskFailed), 1);
    assert!(h
        .engine
        .tasks_for_agent(&agent)
        .await
        .iter()
        .all(|t| t.status != TaskStatus::InProgress));
}

/// Test: pause is cooperative
#[tokio::test]
async fn test_pause_and_resume() {
    let h = Harness::scripted(abc_plan());
    let plan = h.orchestrator.create_agent("ship it").await.unwrap();
    let agent = plan.agent.id;

    h.orchestrator.pause_agent(&agent).await.unwrap();
    let report = h.orchestrator.drive_agent(&agent).await.unwrap();
    assert!(report.completed.is_empty());
    assert_eq!(h.orchestrator.agent(&agent).await.unwrap().status, AgentStatus::Paused);

    // resolving while paused does not resume the agent
    let c = h.task_by_title(&agent, "C").await;
    h.orchestrator.resolve(&c.id).await.unwrap();
    assert_eq!(h.orchestrator.agent(&agent).await.unwrap().status, AgentStatus::Paused);
    assert_eq!(h.task_by_title(&agent, "A").await.status, TaskStatus::Todo);

    let report = h.orchestrator.resume_agent(&agent).await.unwrap();
    assert_eq!(report.completed.len(), 2);
    assert_eq!(report.status, AgentStatus::Completed);
}

/// Test: executing one task keeps going through its newly ready dependents
#[tokio::test]
async fn test_execute_autonomous_task_continues_downstream() {
    let h = Harness::scripted(abc_plan());
    let plan = h.orchestrator.create_agent("ship it").await.unwrap();
    let a = h.task_by_title(&plan.agent.id, "A").await;
    let b = h.task_by_title(&plan.agent.id, "B").await;

    let report = h.orchestrator.execute_autonomous_task(&a.id).await.unwrap();
    assert_eq!(report.completed, vec![a.id, b.id]);
    assert_eq!(report.status, AgentStatus::Blocked);

    let a = h.engine.task(&a.id).await.unwrap();
    assert!(a.completed_at.is_some());
    assert!(a.started_at.is_some());
}

/// Test: human-created tasks join the agent's queue
#[tokio::test]
async fn test_created_task_runs_after_its_upstream() {
    let h = Harness::scripted(abc_plan());
    let plan = h.orchestrator.create_agent("ship it").await.unwrap();
    let agent = plan.agent.id;
    let b = h.task_by_title(&agent, "B").await;

    let mut new = NewTask::new("E");
    new.depends_on = Some(b.id);
    let e = h.orchestrator.create_task(&agent, new).await.unwrap();
    assert_eq!(e.status, TaskStatus::Blocked);

    let mut gate = NewTask::new("F");
    gate.human_reason = Some("pick a vendor".to_string());
    let f = h.orchestrator.create_task(&agent, gate).await.unwrap();
    assert!(f.awaiting_human());

    let report = h.orchestrator.drive_agent(&agent).await.unwrap();
    assert_eq!(report.completed.len(), 3);
    assert_eq!(report.completed.last(), Some(&e.id));
}

/// Test: at most one task in progress per agent, agents run concurrently
#[tokio::test]
async fn test_one_task_per_agent_across_concurrent_agents() {
    let tracker = Arc::new(TrackingWork::new(Duration::from_millis(20)));
    let h = Harness::new(Arc::new(KeywordDecomposer::new().unwrap()), tracker.clone());

    let goals = [
        "Write a blog post",
        "Build an api",
        "Hire a sales lead",
    ];
    let mut agents = Vec::new();
    for goal in goals {
        agents.push(h.orchestrator.create_agent(goal).await.unwrap().agent.id);
    }

    // two drivers per agent race for the same tasks
    let drives = agents
        .iter()
        .flat_map(|id| [h.orchestrator.drive_agent(id), h.orchestrator.drive_agent(id)]);
    let reports = join_all(drives).await;
    assert!(reports.iter().all(|r| r.is_ok()));

    assert_eq!(tracker.max_per_agent(), 1);
    assert!(tracker.max_overall() > 1);

    for id in &agents {
        let tasks = h.engine.tasks_for_agent(id).await;
        assert!(tasks.iter().all(|t| t.status != TaskStatus::InProgress));
        assert!(tasks.iter().filter(|t| !t.is_dependency).all(|t| t.is_done()));
    }
}

/// Test: agents of one workspace share the graph but not their queues
#[tokio::test]
async fn test_agents_do_not_run_each_others_tasks() {
    let h = Harness::keyword();
    let first = h.orchestrator.create_agent("Write a blog post").await.unwrap();
    let second = h.orchestrator.create_agent("Build an api").await.unwrap();

    let report = h.orchestrator.drive_agent(&first.agent.id).await.unwrap();
    assert_eq!(report.completed.len(), 3);

    let untouched = h.engine.tasks_for_agent(&second.agent.id).await;
    assert!(untouched.iter().all(|t| !t.is_done()));
    assert_eq!(h.orchestrator.agents().await.unwrap().len(), 2);
}
