mod common;
use common::init_tracing;

use std::path::Path;
use std::sync::Arc;

use tempfile::tempdir;
use tokio::process::Command;
use tokio::sync::watch;

use dagforge::agent::{AgentStatus, TaskOutcome};
use dagforge::context::{RunContext, ValidationMode};
use dagforge::engine::{EventSink, OverallStatus, Orchestrator};
use dagforge::plan::{Plan, ValidatedPlan, TaskGraph};
use dagforge::state::TaskState;
use dagforge::vcs::VcsCoordinator;
use dagforge::workspace::WorktreePool;

use dagforge_test_utils::builders::{PlanBuilder, TaskBuilder};
use dagforge_test_utils::fakes::FakeAgentRunner;

async fn run_git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .await
        .unwrap();
    assert!(status.success(), "git {args:?} failed in {dir:?}");
}

async fn init_repo(dir: &Path) {
    run_git(dir, &["init", "-q"]).await;
    run_git(dir, &["config", "user.email", "test@test.com"]).await;
    run_git(dir, &["config", "user.name", "Test"]).await;
    run_git(dir, &["commit", "--allow-empty", "-m", "initial"]).await;
}

fn validated(plan: Plan) -> ValidatedPlan {
    let graph = TaskGraph::build(&plan).unwrap();
    ValidatedPlan { plan, graph }
}

async fn orchestrator_for(
    repo_root: &Path,
    agent: FakeAgentRunner,
    ctx: RunContext,
) -> Orchestrator {
    let shadow = repo_root.join(".dagforge/shadows");
    let pool = Arc::new(WorktreePool::new(
        repo_root.to_path_buf(),
        shadow,
        ctx.branch_prefix.clone(),
    ));
    let backend: Arc<dyn dagforge::vcs::VcsBackend> =
        Arc::new(dagforge_test_utils::fakes::FakeVcsBackend::new());
    let vcs = VcsCoordinator::new(backend, ctx.vcs_mode, ctx.branch_prefix.clone(), ctx.conflict_policy);
    let (sink, _events) = EventSink::new();
    Orchestrator::new(ctx, Arc::new(agent), pool, vcs, sink)
}

fn success(files: &[&str]) -> TaskOutcome {
    TaskOutcome {
        status: AgentStatus::Completed,
        exit_code: Some(0),
        stdout: String::new(),
        stderr: String::new(),
        files_touched: files.iter().map(|s| s.to_string()).collect(),
    }
}

fn failed() -> TaskOutcome {
    TaskOutcome {
        status: AgentStatus::Failed,
        exit_code: Some(1),
        stdout: String::new(),
        stderr: "boom".to_string(),
        files_touched: Vec::new(),
    }
}

fn timed_out() -> TaskOutcome {
    TaskOutcome {
        status: AgentStatus::Timeout,
        exit_code: None,
        stdout: String::new(),
        stderr: String::new(),
        files_touched: Vec::new(),
    }
}

#[tokio::test]
async fn s1_linear_success() {
    init_tracing();
    let repo = tempdir().unwrap();
    init_repo(repo.path()).await;

    let plan = PlanBuilder::new("s1")
        .with_task(TaskBuilder::new("a").file("f1.ts").build())
        .with_task(TaskBuilder::new("b").file("f2.ts").depends_on("a").build())
        .with_task(TaskBuilder::new("c").file("f3.ts").depends_on("b").build())
        .build();

    let agent = FakeAgentRunner::new()
        .with_outcome("a", success(&["f1.ts"]))
        .with_outcome("b", success(&["f2.ts"]))
        .with_outcome("c", success(&["f3.ts"]));

    let ctx = RunContext::default();
    let orchestrator = orchestrator_for(repo.path(), agent, ctx).await;
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let result = orchestrator
        .run(repo.path(), validated(plan), cancel_rx)
        .await
        .unwrap();

    assert_eq!(result.overall_status, OverallStatus::Success);
    assert!(result.per_task.iter().all(|t| t.final_state == TaskState::Completed));
    let stack = result.stack.expect("worktree-parallel mode always stacks completed tasks");
    assert_eq!(stack.branches, vec!["task/a", "task/b", "task/c"]);
}

#[tokio::test]
async fn s2_diamond_with_parallelism() {
    init_tracing();
    let repo = tempdir().unwrap();
    init_repo(repo.path()).await;

    let plan = PlanBuilder::new("s2")
        .with_task(TaskBuilder::new("a").file("fa.ts").build())
        .with_task(TaskBuilder::new("b").file("fb.ts").depends_on("a").build())
        .with_task(TaskBuilder::new("c").file("fc.ts").depends_on("a").build())
        .with_task(
            TaskBuilder::new("d")
                .file("fd.ts")
                .depends_on("b")
                .depends_on("c")
                .build(),
        )
        .build();

    let agent = FakeAgentRunner::new()
        .with_outcome("a", success(&["fa.ts"]))
        .with_outcome("b", success(&["fb.ts"]))
        .with_outcome("c", success(&["fc.ts"]))
        .with_outcome("d", success(&["fd.ts"]));

    let mut ctx = RunContext::default();
    ctx.concurrency_cap = 2;
    let orchestrator = orchestrator_for(repo.path(), agent, ctx).await;
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let result = orchestrator
        .run(repo.path(), validated(plan), cancel_rx)
        .await
        .unwrap();

    assert_eq!(result.overall_status, OverallStatus::Success);
    assert_eq!(result.per_task.len(), 4);
    assert!(result.per_task.iter().all(|t| t.final_state == TaskState::Completed));
    let stack = result.stack.unwrap();
    assert_eq!(stack.branches.len(), 4);
    assert_eq!(stack.branches[0], "task/a");
    assert_eq!(stack.branches[3], "task/d");
}

#[tokio::test]
async fn s3_failure_propagation() {
    init_tracing();
    let repo = tempdir().unwrap();
    init_repo(repo.path()).await;

    let plan = PlanBuilder::new("s3")
        .with_task(TaskBuilder::new("a").file("fa.ts").build())
        .with_task(TaskBuilder::new("b").file("fb.ts").depends_on("a").build())
        .with_task(TaskBuilder::new("c").file("fc.ts").depends_on("a").build())
        .build();

    let agent = FakeAgentRunner::new().with_outcome("a", failed());

    let mut ctx = RunContext::default();
    ctx.retry_policy.max_retries = 0;
    let orchestrator = orchestrator_for(repo.path(), agent, ctx).await;
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let result = orchestrator
        .run(repo.path(), validated(plan), cancel_rx)
        .await
        .unwrap();

    assert_eq!(result.overall_status, OverallStatus::Failed);
    let state_of = |id: &str| {
        result
            .per_task
            .iter()
            .find(|t| t.id == id)
            .unwrap()
            .final_state
    };
    assert_eq!(state_of("a"), TaskState::Failed);
    assert_eq!(state_of("b"), TaskState::Skipped);
    assert_eq!(state_of("c"), TaskState::Skipped);
    assert!(result.stack.is_none());
}

#[tokio::test]
async fn s4_retry_then_success() {
    init_tracing();
    let repo = tempdir().unwrap();
    init_repo(repo.path()).await;

    let plan = PlanBuilder::new("s4")
        .with_task(TaskBuilder::new("a").file("fa.ts").build())
        .build();

    let agent = FakeAgentRunner::new()
        .with_outcome("a", timed_out())
        .with_outcome("a", success(&["fa.ts"]));

    let mut ctx = RunContext::default();
    ctx.retry_policy.max_retries = 1;
    let orchestrator = orchestrator_for(repo.path(), agent, ctx).await;
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let result = orchestrator
        .run(repo.path(), validated(plan), cancel_rx)
        .await
        .unwrap();

    assert_eq!(result.overall_status, OverallStatus::Success);
    let a = result.per_task.iter().find(|t| t.id == "a").unwrap();
    assert_eq!(a.final_state, TaskState::Completed);
    assert_eq!(a.retries, 1);
}

#[tokio::test]
async fn s5_scope_violation_strict_fails_permissive_warns() {
    init_tracing();

    let plan = || {
        PlanBuilder::new("s5")
            .with_task(TaskBuilder::new("a").file("f1.ts").build())
            .with_task(TaskBuilder::new("b").file("f2.ts").build())
            .build()
    };

    // Strict: touching another task's declared scope fails the task and
    // skips nothing else in this plan (b has no dependency on a, so it
    // still runs).
    {
        let repo = tempdir().unwrap();
        init_repo(repo.path()).await;
        let agent = FakeAgentRunner::new()
            .with_outcome("a", success(&["f1.ts", "f2.ts"]))
            .with_outcome("b", success(&["f2.ts"]));
        let mut ctx = RunContext::default();
        ctx.validation_mode = ValidationMode::Strict;
        let orchestrator = orchestrator_for(repo.path(), agent, ctx).await;
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let result = orchestrator
            .run(repo.path(), validated(plan()), cancel_rx)
            .await
            .unwrap();

        let a = result.per_task.iter().find(|t| t.id == "a").unwrap();
        assert_eq!(a.final_state, TaskState::Failed);
        assert!(a
            .violations
            .iter()
            .any(|v| v.kind == dagforge::scope::ViolationKind::OwnedByOtherTask));
    }

    // Permissive: the same touched-file set only warns; the task completes.
    {
        let repo = tempdir().unwrap();
        init_repo(repo.path()).await;
        let agent = FakeAgentRunner::new()
            .with_outcome("a", success(&["f1.ts", "f2.ts"]))
            .with_outcome("b", success(&["f2.ts"]));
        let mut ctx = RunContext::default();
        ctx.validation_mode = ValidationMode::Permissive;
        let orchestrator = orchestrator_for(repo.path(), agent, ctx).await;
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let result = orchestrator
            .run(repo.path(), validated(plan()), cancel_rx)
            .await
            .unwrap();

        let a = result.per_task.iter().find(|t| t.id == "a").unwrap();
        assert_eq!(a.final_state, TaskState::Completed);
        assert!(a
            .violations
            .is_empty());
    }
}
