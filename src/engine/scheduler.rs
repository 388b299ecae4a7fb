// src/engine/scheduler.rs

//! Pure DAG-driving state, analogous to the teacher's `CoreRuntime`: all
//! `TaskRecord` mutation happens here, behind plain synchronous methods, so
//! the actual IO (agent subprocesses, git, filesystem) can live in
//! [`crate::engine::orchestrator`] as a thin async shell around it.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, warn};

use crate::context::RetryPolicy;
use crate::plan::TaskGraph;
use crate::scope::Violation;
use crate::state::{StateMachine, TaskRecord, TaskState, Transition};
use crate::workspace::WorkspaceHandle;

/// Scheduler's verdict on why a task failed, used to decide retry
/// eligibility (spec §4.2, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    WorkspaceCreate,
    AgentSpawn,
    AgentTimeout,
    AgentNonzeroExit,
    AgentCancelled,
    ScopeViolation,
    CommitError,
}

impl FailureReason {
    fn retryable_kind(self) -> Option<crate::context::RetryableKind> {
        use crate::context::RetryableKind::*;
        match self {
            FailureReason::AgentTimeout => Some(Timeout),
            FailureReason::AgentNonzeroExit => Some(NonzeroExit),
            FailureReason::CommitError => Some(TransientVcsError),
            FailureReason::WorkspaceCreate
            | FailureReason::AgentSpawn
            | FailureReason::AgentCancelled
            | FailureReason::ScopeViolation => None,
        }
    }
}

/// Owns every task's [`TaskRecord`] and the graph they run over. No field
/// here is touched except through `&mut self` methods, so two transitions
/// for the same task can never interleave (spec §5).
pub struct Scheduler {
    graph: TaskGraph,
    records: HashMap<String, TaskRecord>,
}

impl Scheduler {
    pub fn new(graph: TaskGraph, retry_policy: &RetryPolicy) -> Self {
        let mut records: HashMap<String, TaskRecord> = graph
            .tasks()
            .map(|id| (id.to_string(), TaskRecord::new(retry_policy.max_retries)))
            .collect();

        // Leaves (no dependencies) become ready immediately (spec §3 lifecycle).
        let leaf_ids: Vec<String> = graph
            .tasks()
            .filter(|id| graph.dependencies_of(id).is_empty())
            .map(|id| id.to_string())
            .collect();
        for id in leaf_ids {
            Self::transition(records.get_mut(&id).unwrap(), &id, TaskState::Ready, "leaf task");
        }

        Self { graph, records }
    }

    fn transition(record: &mut TaskRecord, task_id: &str, to: TaskState, reason: &str) {
        StateMachine::assert_legal(record.state, to);
        debug!(task = task_id, from = %record.state, %to, reason, "task state transition");
        record.transition_history.push(Transition {
            from: record.state,
            to,
            at: Utc::now(),
            reason: reason.to_string(),
        });
        record.state = to;
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn record(&self, task_id: &str) -> Option<&TaskRecord> {
        self.records.get(task_id)
    }

    pub fn records(&self) -> &HashMap<String, TaskRecord> {
        &self.records
    }

    pub fn is_terminal(&self) -> bool {
        self.records.values().all(|r| r.state.is_terminal())
    }

    fn dependent_states(&self, task_id: &str) -> Vec<TaskState> {
        self.graph
            .dependencies_of(task_id)
            .iter()
            .map(|dep| self.records[dep].state)
            .collect()
    }

    /// Re-evaluate every task that isn't yet terminal against its
    /// dependencies' current states, applying whatever `StateMachine`
    /// prescribes. Called after any transition that could unblock others.
    /// Returns `(task_id, prior_state, new_state)` for everything that
    /// moved, so callers can emit accurate transition events instead of
    /// guessing the prior state.
    fn reevaluate_all(&mut self) -> Vec<(String, TaskState, TaskState)> {
        let mut moved = Vec::new();
        let ids: Vec<String> = self.graph.tasks().map(|s| s.to_string()).collect();
        for id in ids {
            let current = self.records[&id].state;
            if current.is_terminal() || current.is_executable() {
                continue;
            }
            let deps = self.dependent_states(&id);
            if let Some(next) = StateMachine::next_from_dependencies(current, &deps) {
                let record = self.records.get_mut(&id).unwrap();
                Self::transition(record, &id, next, "dependency state changed");
                moved.push((id, current, next));
            }
        }
        moved
    }

    /// Pick up to `slots` ready tasks to dispatch, fewest-dependents-
    /// remaining first, ties broken by topological index (spec §4.2 step 1).
    pub fn pick_dispatch(&self, slots: usize) -> Vec<String> {
        if slots == 0 {
            return Vec::new();
        }
        let mut ready: Vec<&str> = self
            .records
            .iter()
            .filter(|(_, r)| r.state == TaskState::Ready)
            .map(|(id, _)| id.as_str())
            .collect();

        ready.sort_by(|a, b| {
            let remaining = self
                .graph
                .dependents_remaining_count(a)
                .cmp(&self.graph.dependents_remaining_count(b));
            if remaining != std::cmp::Ordering::Equal {
                return remaining;
            }
            self.graph.topo_index(a).cmp(&self.graph.topo_index(b))
        });

        ready.into_iter().take(slots).map(|s| s.to_string()).collect()
    }

    pub fn mark_queued(&mut self, task_id: &str) {
        let record = self.records.get_mut(task_id).unwrap();
        Self::transition(record, task_id, TaskState::Queued, "dispatched");
    }

    pub fn mark_running(&mut self, task_id: &str) {
        let record = self.records.get_mut(task_id).unwrap();
        Self::transition(record, task_id, TaskState::Running, "dispatched to agent runner");
        record.started_at = Some(Utc::now());
    }

    pub fn set_workspace(&mut self, task_id: &str, workspace: WorkspaceHandle) {
        self.records.get_mut(task_id).unwrap().workspace = Some(workspace);
    }

    pub fn take_workspace(&mut self, task_id: &str) -> Option<WorkspaceHandle> {
        self.records.get_mut(task_id).unwrap().workspace.take()
    }

    pub fn running_count(&self) -> usize {
        self.records.values().filter(|r| r.state == TaskState::Running).count()
    }

    pub fn queued_count(&self) -> usize {
        self.records.values().filter(|r| r.state == TaskState::Queued).count()
    }

    /// Every task currently sitting in `queued` (freshly dispatched or
    /// queued back up after a retryable failure) and ready to be kicked off.
    pub fn queued_ids(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|(_, r)| r.state == TaskState::Queued)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Record a successful scope check + commit, transition the task to
    /// `completed`, and re-evaluate dependents. Returns newly-ready tasks.
    pub fn handle_success(
        &mut self,
        task_id: &str,
        commit: String,
        branch: String,
        files_touched: usize,
        warnings: Vec<Violation>,
    ) -> Vec<(String, TaskState, TaskState)> {
        let record = self.records.get_mut(task_id).unwrap();
        Self::transition(record, task_id, TaskState::Completed, "agent succeeded, scope ok, committed");
        record.commit = Some(commit);
        record.branch = Some(branch);
        record.files_touched = files_touched;
        record.warnings = warnings;
        record.finished_at = Some(Utc::now());
        self.reevaluate_all()
    }

    /// Record a failure. Retries if the policy allows; otherwise marks
    /// `failed` and propagates `skipped` to dependents. Returns newly-ready
    /// and newly-skipped task ids (for workspace/event bookkeeping by the
    /// caller).
    pub fn handle_failure(
        &mut self,
        task_id: &str,
        reason: FailureReason,
        violations: Vec<Violation>,
        policy: &RetryPolicy,
    ) -> SchedulerOutcome {
        let retryable = reason
            .retryable_kind()
            .map(|kind| policy.allows(kind))
            .unwrap_or(false);

        let record = self.records.get_mut(task_id).unwrap();
        let can_retry = retryable && record.retry_count < record.max_retries;

        if can_retry {
            record.retry_count += 1;
            record.violations = violations;
            // The failed attempt's workspace is left on the record for the
            // caller to take and discard (worktree + stale branch) before
            // redispatching - clearing it here would leak both, since
            // nothing else still holds the handle.
            // `running -> queued` isn't a legal direct transition; a retry
            // passes through `failed` first, same as a terminal failure,
            // before looping back to `queued`.
            Self::transition(record, task_id, TaskState::Failed, "failed, retry eligible");
            Self::transition(record, task_id, TaskState::Queued, "retrying after retryable failure");
            return SchedulerOutcome {
                moved: Vec::new(),
                retried: true,
            };
        }

        record.violations = violations;
        record.finished_at = Some(Utc::now());
        Self::transition(record, task_id, TaskState::Failed, "failure exhausted retries");

        let moved = self.reevaluate_all();
        SchedulerOutcome {
            moved,
            retried: false,
        }
    }

    /// Mark every non-terminal task `skipped` via the forced-failed path,
    /// used on run-level cancellation (spec §4.2 "Cancellation").
    pub fn cancel_all_in_flight(&mut self) {
        let ids: Vec<String> = self
            .records
            .iter()
            .filter(|(_, r)| !r.state.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            let record = self.records.get_mut(&id).unwrap();
            // `Failed` is only a legal target from `Running`; every other
            // non-terminal state cancels into `Skipped` instead.
            let target = if record.state == TaskState::Running {
                TaskState::Failed
            } else {
                TaskState::Skipped
            };
            if StateMachine::is_legal(record.state, target) {
                Self::transition(record, &id, target, "run cancelled");
                record.finished_at = Some(Utc::now());
            } else {
                warn!(task = %id, state = %record.state, "cannot legally transition on cancel, leaving as-is");
            }
        }
    }
}

pub struct SchedulerOutcome {
    /// `(task_id, prior_state, new_state)` for every dependent that moved
    /// as a result of this failure (into `ready` or `skipped`).
    pub moved: Vec<(String, TaskState, TaskState)>,
    pub retried: bool,
}
