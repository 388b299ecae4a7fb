// src/engine/orchestrator.rs

//! The async IO shell that drives [`Scheduler`] to completion (spec §4.2,
//! §5). This is the single logical owner of all `TaskRecord` mutation:
//! spawned agent executions only report raw outcomes back over an mpsc
//! channel, and the scope check, commit, and every state transition happen
//! here, one completion at a time.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::agent::{AgentRunner, AgentStatus, TaskOutcome};
use crate::context::RunContext;
use crate::engine::events::{EventSink, RuntimeEvent};
use crate::engine::scheduler::{FailureReason, Scheduler};
use crate::errors::Result;
use crate::plan::{Plan, Task, ValidatedPlan};
use crate::scope::{FileScopeGuard, Violation};
use crate::state::{TaskState, Transition};
use crate::vcs::{CompletedTask, VcsCoordinator};
use crate::workspace::{WorkspaceHandle, WorktreePool};

/// Debugging export of a finished run's full history (spec §6 "an
/// exportable transcript"), not just the final per-task summary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunTranscript {
    pub states: HashMap<String, TaskState>,
    pub transitions: HashMap<String, Vec<Transition>>,
    pub dependencies: HashMap<String, Vec<String>>,
}

/// One task's final outcome, as reported in [`RunResult`] (spec §6).
#[derive(Debug, Clone)]
pub struct TaskSummary {
    pub id: String,
    pub final_state: TaskState,
    pub commit: Option<String>,
    pub branch: Option<String>,
    pub retries: u32,
    pub duration_ms: Option<i64>,
    pub violations: Vec<Violation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverallStatus {
    Success,
    Partial,
    Failed,
    Cancelled,
}

impl OverallStatus {
    /// Exit code proportional to severity (spec §7).
    pub fn exit_code(self) -> i32 {
        match self {
            OverallStatus::Success => 0,
            OverallStatus::Partial => 1,
            OverallStatus::Failed => 2,
            OverallStatus::Cancelled => 130,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub per_task: Vec<TaskSummary>,
    pub stack: Option<crate::vcs::StackResult>,
    pub aggregate: HashMap<TaskState, usize>,
    pub overall_status: OverallStatus,
    pub transcript: RunTranscript,
}

/// Raw report from a spawned agent execution, before any scheduler state
/// mutation happens.
enum AgentReport {
    /// The agent binary itself could not be spawned (spec §4.3: spawn
    /// error is never retryable).
    SpawnError { task_id: String, message: String },
    Finished {
        task_id: String,
        handle: WorkspaceHandle,
        outcome: TaskOutcome,
    },
}

/// Drives one run end to end.
pub struct Orchestrator {
    ctx: RunContext,
    agent: Arc<dyn AgentRunner>,
    pool: Arc<WorktreePool>,
    vcs: VcsCoordinator,
    sink: EventSink,
}

impl Orchestrator {
    pub fn new(
        ctx: RunContext,
        agent: Arc<dyn AgentRunner>,
        pool: Arc<WorktreePool>,
        vcs: VcsCoordinator,
        sink: EventSink,
    ) -> Self {
        Self {
            ctx,
            agent,
            pool,
            vcs,
            sink,
        }
    }

    pub async fn run(
        &self,
        repo_root: &std::path::Path,
        validated: ValidatedPlan,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<RunResult> {
        let ValidatedPlan { plan, graph } = validated;

        if plan.tasks.is_empty() {
            info!("plan has no tasks, nothing to run");
            return Ok(RunResult {
                per_task: Vec::new(),
                stack: None,
                aggregate: HashMap::new(),
                overall_status: OverallStatus::Success,
                transcript: RunTranscript::default(),
            });
        }

        self.vcs.initialize(repo_root).await?;
        let scope_guard = FileScopeGuard::new(&plan, &graph)?;

        let mut scheduler = Scheduler::new(graph.clone(), &self.ctx.retry_policy);
        let (tx, mut rx) = mpsc::unbounded_channel::<AgentReport>();

        let mut cancelled = false;

        while !scheduler.is_terminal() {
            if *cancel.borrow() {
                warn!("run cancelled, marking in-flight tasks failed/skipped");
                let pending = scheduler.running_count();
                scheduler.cancel_all_in_flight();
                cancelled = true;
                self.drain_cancelled(&mut rx, pending).await;
                break;
            }

            let cap = if self.vcs.capabilities().supports_parallel_dispatch {
                self.ctx.concurrency_cap
            } else {
                1
            };
            let slots = cap.saturating_sub(scheduler.running_count() + scheduler.queued_count());
            for id in scheduler.pick_dispatch(slots) {
                scheduler.mark_queued(&id);
            }

            let to_kick = scheduler.queued_ids();
            let dispatched_any = !to_kick.is_empty();
            for task_id in to_kick {
                scheduler.mark_running(&task_id);
                self.sink.emit(RuntimeEvent::TaskStateChanged {
                    task: task_id.clone(),
                    from: TaskState::Queued,
                    to: TaskState::Running,
                });
                self.spawn_task(&plan, &task_id, tx.clone(), cancel.clone());
            }

            let in_flight = scheduler.running_count();
            if !dispatched_any && in_flight == 0 {
                // Nothing ready, nothing running, but not terminal: every
                // remaining task is permanently blocked, which `StateMachine`
                // cannot produce from a validated acyclic plan. Treat as a
                // terminal deadlock rather than spinning.
                warn!("scheduler made no progress with tasks remaining; stopping run");
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.changed() => {
                    continue;
                }
                maybe_report = rx.recv() => {
                    let Some(report) = maybe_report else { break };
                    self.apply_report(&mut scheduler, &plan, &scope_guard, report).await;
                }
            }
        }

        let reaped = self.pool.reap_orphans().await.unwrap_or(0);
        if reaped > 0 {
            info!(reaped, "reaped orphaned worktrees on shutdown");
        }

        let stack = if cancelled {
            None
        } else {
            self.finalize_stack(repo_root, &plan, &scheduler).await?
        };
        if let Some(result) = &stack {
            for conflict in &result.conflicts {
                self.sink.emit(RuntimeEvent::ConflictDetected {
                    task: conflict.task_id.clone(),
                    branch: conflict.branch.clone(),
                    message: conflict.message.clone(),
                });
            }
        }

        let per_task = build_summaries(&scheduler);
        let aggregate = crate::state::StateMachine::compute_stats(
            &per_task.iter().map(|t| t.final_state).collect::<Vec<_>>(),
        );
        let overall_status = if cancelled {
            OverallStatus::Cancelled
        } else {
            overall_status_of(&per_task)
        };
        let transcript = build_transcript(&scheduler);

        self.sink.emit(RuntimeEvent::RunCompleted {
            overall_status: format!("{overall_status:?}").to_lowercase(),
        });

        Ok(RunResult {
            per_task,
            stack,
            aggregate,
            overall_status,
            transcript,
        })
    }

    /// After `cancel_all_in_flight` has already marked every running task's
    /// record terminal, the spawned background futures for those tasks are
    /// still finishing up (their agent subprocess sees the cancel signal
    /// and exits promptly). Wait for exactly `pending` of them to report
    /// back and release any workspace they acquired, so cancellation still
    /// leaves no orphaned worktrees (spec §9 "every acquire is paired with
    /// a release on every exit path including cancellation").
    async fn drain_cancelled(&self, rx: &mut mpsc::UnboundedReceiver<AgentReport>, pending: usize) {
        for _ in 0..pending {
            match rx.recv().await {
                Some(AgentReport::Finished { task_id, handle, .. }) => {
                    if let Err(e) = self.pool.release(&handle).await {
                        warn!(task = %task_id, error = %e, "failed to release workspace after cancellation");
                    }
                    self.sink.emit(RuntimeEvent::WorkspaceReleased { task: task_id });
                }
                Some(AgentReport::SpawnError { .. }) | None => {}
            }
        }
    }

    fn spawn_task(
        &self,
        plan: &Plan,
        task_id: &str,
        tx: mpsc::UnboundedSender<AgentReport>,
        cancel: watch::Receiver<bool>,
    ) {
        let task = plan
            .task(task_id)
            .expect("task id picked by the scheduler must exist in the plan")
            .clone();
        let base_ref = self.ctx.base_ref.clone();
        let pool = self.pool.clone();
        let agent = self.agent.clone();
        let timeout = self.ctx.per_task_timeout;
        let sink = self.sink.clone();

        tokio::spawn(async move {
            let report = acquire_and_execute(&task, &base_ref, pool, agent, timeout, cancel, &sink).await;
            let _ = tx.send(report);
        });
    }

    async fn apply_report(
        &self,
        scheduler: &mut Scheduler,
        plan: &Plan,
        scope_guard: &FileScopeGuard<'_>,
        report: AgentReport,
    ) {
        let (task_id, handle, outcome) = match report {
            AgentReport::SpawnError { task_id, message } => {
                warn!(task = %task_id, %message, "agent spawn failed");
                let outcome = scheduler.handle_failure(
                    &task_id,
                    FailureReason::AgentSpawn,
                    Vec::new(),
                    &self.ctx.retry_policy,
                );
                self.emit_failure_events(&task_id, &outcome);
                return;
            }
            AgentReport::Finished { task_id, handle, outcome } => (task_id, handle, outcome),
        };

        if let Some(reason) = failure_reason_of(outcome.status) {
            scheduler.set_workspace(&task_id, handle);
            let outcome = scheduler.handle_failure(&task_id, reason, Vec::new(), &self.ctx.retry_policy);
            self.release_after_failure(scheduler, &task_id, &outcome).await;
            self.emit_failure_events(&task_id, &outcome);
            return;
        }

        let task = plan.task(&task_id).expect("task must exist");
        let check = scope_guard.check(task, &outcome.files_touched, self.ctx.validation_mode);
        if !check.ok {
            scheduler.set_workspace(&task_id, handle);
            let outcome = scheduler.handle_failure(
                &task_id,
                FailureReason::ScopeViolation,
                check.violations,
                &self.ctx.retry_policy,
            );
            self.release_after_failure(scheduler, &task_id, &outcome).await;
            self.emit_failure_events(&task_id, &outcome);
            return;
        }

        let message = format!("[{}] {}\n\n{}", task.id, task.name, task.description);
        match self.vcs.commit(&handle.absolute_path, &message).await {
            Ok(commit) => {
                scheduler.set_workspace(&task_id, handle);
                self.sink.emit(RuntimeEvent::CommitCreated {
                    task: task_id.clone(),
                    commit: commit.clone(),
                });
                let branch = format!("{}{}", self.ctx.branch_prefix, task_id);
                let files_touched = outcome.files_touched.len();
                let moved =
                    scheduler.handle_success(&task_id, commit, branch, files_touched, check.warnings);
                self.release_workspace(scheduler, &task_id, true);
                self.sink.emit(RuntimeEvent::TaskStateChanged {
                    task: task_id,
                    from: TaskState::Running,
                    to: TaskState::Completed,
                });
                for (id, from, to) in moved {
                    self.sink.emit(RuntimeEvent::TaskStateChanged { task: id, from, to });
                }
            }
            Err(e) => {
                warn!(task = %task_id, error = %e, "commit failed");
                scheduler.set_workspace(&task_id, handle);
                let outcome =
                    scheduler.handle_failure(&task_id, FailureReason::CommitError, Vec::new(), &self.ctx.retry_policy);
                self.release_after_failure(scheduler, &task_id, &outcome).await;
                self.emit_failure_events(&task_id, &outcome);
            }
        }
    }

    fn emit_failure_events(&self, task_id: &str, outcome: &crate::engine::scheduler::SchedulerOutcome) {
        if outcome.retried {
            self.sink.emit(RuntimeEvent::TaskStateChanged {
                task: task_id.to_string(),
                from: TaskState::Running,
                to: TaskState::Queued,
            });
        } else {
            self.sink.emit(RuntimeEvent::TaskStateChanged {
                task: task_id.to_string(),
                from: TaskState::Running,
                to: TaskState::Failed,
            });
            for (id, from, to) in &outcome.moved {
                self.sink.emit(RuntimeEvent::TaskStateChanged {
                    task: id.clone(),
                    from: *from,
                    to: *to,
                });
            }
        }
    }

    /// Dispose of a failed attempt's workspace. A retry is about to
    /// re-acquire a workspace for the same task id, so its stale worktree
    /// and branch must be fully gone *before* this returns - unlike the
    /// fire-and-forget cleanup below, this is awaited inline rather than
    /// spawned, closing the race where the next dispatch loop iteration's
    /// `acquire` could run before a backgrounded release finished. A
    /// terminal (non-retried) failure has no such deadline, so it keeps
    /// going through `release_workspace` and `cleanup_on_failure`.
    async fn release_after_failure(
        &self,
        scheduler: &mut Scheduler,
        task_id: &str,
        outcome: &crate::engine::scheduler::SchedulerOutcome,
    ) {
        if !outcome.retried {
            self.release_workspace(scheduler, task_id, false);
            return;
        }
        let Some(handle) = scheduler.take_workspace(task_id) else {
            return;
        };
        if let Err(e) = self.pool.discard(&handle).await {
            warn!(task = %task_id, error = %e, "failed to discard failed attempt before retry");
        }
        self.sink.emit(RuntimeEvent::WorkspaceReleased {
            task: task_id.to_string(),
        });
    }

    /// Detach the workspace from the scheduler's record. Whether the
    /// worktree itself is deleted depends on `cleanup_on_success`/
    /// `cleanup_on_failure`: a caller debugging a failed task can set
    /// `cleanup_on_failure = false` (the default) to leave the worktree on
    /// disk, still tracked by the pool, for inspection.
    fn release_workspace(&self, scheduler: &mut Scheduler, task_id: &str, success: bool) {
        let should_cleanup = if success {
            self.ctx.cleanup_on_success
        } else {
            self.ctx.cleanup_on_failure
        };

        let Some(handle) = scheduler.take_workspace(task_id) else {
            return;
        };

        if !should_cleanup {
            info!(task = %task_id, path = %handle.absolute_path.display(), "leaving workspace on disk for inspection");
            return;
        }

        let pool = self.pool.clone();
        let sink = self.sink.clone();
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = pool.release(&handle).await {
                warn!(task = %task_id, error = %e, "failed to release workspace (logged, not fatal)");
            }
            sink.emit(RuntimeEvent::WorkspaceReleased { task: task_id });
        });
    }

    async fn finalize_stack(
        &self,
        repo_root: &std::path::Path,
        plan: &Plan,
        scheduler: &Scheduler,
    ) -> Result<Option<crate::vcs::StackResult>> {
        let completed: Vec<CompletedTask> = scheduler
            .records()
            .iter()
            .filter(|(_, r)| r.state == TaskState::Completed)
            .filter_map(|(id, r)| {
                let task = plan.task(id)?;
                Some(CompletedTask {
                    task_id: id.clone(),
                    commit: r.commit.clone()?,
                    complexity: task.complexity,
                    files_touched: r.files_touched,
                })
            })
            .collect();

        if completed.is_empty() {
            return Ok(None);
        }

        self.vcs
            .finalize(
                repo_root,
                &self.ctx.base_ref,
                &completed,
                scheduler.graph(),
                self.ctx.stacking_strategy,
            )
            .await
    }
}

fn failure_reason_of(status: AgentStatus) -> Option<FailureReason> {
    match status {
        AgentStatus::Timeout => Some(FailureReason::AgentTimeout),
        AgentStatus::Cancelled => Some(FailureReason::AgentCancelled),
        AgentStatus::Failed => Some(FailureReason::AgentNonzeroExit),
        AgentStatus::Completed => None,
    }
}

async fn acquire_and_execute(
    task: &Task,
    base_ref: &str,
    pool: Arc<WorktreePool>,
    agent: Arc<dyn AgentRunner>,
    timeout: std::time::Duration,
    cancel: watch::Receiver<bool>,
    sink: &EventSink,
) -> AgentReport {
    let handle = match pool.acquire(&task.id, base_ref).await {
        Ok(h) => h,
        Err(e) => {
            return AgentReport::SpawnError {
                task_id: task.id.clone(),
                message: format!("workspace acquisition failed: {e}"),
            };
        }
    };
    sink.emit(RuntimeEvent::WorkspaceCreated {
        task: task.id.clone(),
        path: handle.absolute_path.display().to_string(),
    });

    let outcome = match agent.execute(task, &handle, timeout, cancel).await {
        Ok(o) => o,
        Err(e) => {
            if let Err(release_err) = pool.release(&handle).await {
                tracing::warn!(task = %task.id, error = %release_err, "failed to release workspace after agent spawn error");
            }
            return AgentReport::SpawnError {
                task_id: task.id.clone(),
                message: format!("agent execution error: {e}"),
            };
        }
    };

    if !outcome.stdout.is_empty() {
        sink.emit(RuntimeEvent::AgentStdout {
            task: task.id.clone(),
            chunk: outcome.stdout.clone(),
        });
    }
    if !outcome.stderr.is_empty() {
        sink.emit(RuntimeEvent::AgentStderr {
            task: task.id.clone(),
            chunk: outcome.stderr.clone(),
        });
    }

    AgentReport::Finished {
        task_id: task.id.clone(),
        handle,
        outcome,
    }
}

fn build_summaries(scheduler: &Scheduler) -> Vec<TaskSummary> {
    let mut ids: Vec<&String> = scheduler.records().keys().collect();
    ids.sort();
    ids.into_iter()
        .map(|id| {
            let record = &scheduler.records()[id];
            TaskSummary {
                id: id.clone(),
                final_state: record.state,
                commit: record.commit.clone(),
                branch: record.branch.clone(),
                retries: record.retry_count,
                duration_ms: record.duration().map(|d| d.num_milliseconds()),
                violations: record.violations.clone(),
            }
        })
        .collect()
}

fn build_transcript(scheduler: &Scheduler) -> RunTranscript {
    let mut transcript = RunTranscript::default();
    for (id, record) in scheduler.records() {
        transcript.states.insert(id.clone(), record.state);
        transcript
            .transitions
            .insert(id.clone(), record.transition_history.clone());
        transcript
            .dependencies
            .insert(id.clone(), scheduler.graph().dependencies_of(id).to_vec());
    }
    transcript
}

fn overall_status_of(per_task: &[TaskSummary]) -> OverallStatus {
    let completed = per_task.iter().filter(|t| t.final_state == TaskState::Completed).count();
    if completed == per_task.len() {
        OverallStatus::Success
    } else if completed > 0 {
        OverallStatus::Partial
    } else {
        OverallStatus::Failed
    }
}
