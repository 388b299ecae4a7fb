// src/state/record.rs

//! Per-task runtime state (spec §3 `TaskState`, `TaskRecord`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workspace::WorkspaceHandle;

/// One node's lifecycle state. Legal transitions are the fixed table in
/// [`crate::state::machine::StateMachine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Ready,
    Blocked,
    Queued,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed | TaskState::Skipped)
    }

    pub fn is_executable(self) -> bool {
        matches!(self, TaskState::Ready | TaskState::Queued)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Ready => "ready",
            TaskState::Blocked => "blocked",
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// One entry in a task's append-only transition log.
#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub from: TaskState,
    pub to: TaskState,
    pub at: DateTime<Utc>,
    pub reason: String,
}

/// Runtime state for one task, owned exclusively by the scheduler
/// (spec §3 `TaskRecord`).
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub state: TaskState,
    pub transition_history: Vec<Transition>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub workspace: Option<WorkspaceHandle>,
    pub commit: Option<String>,
    pub branch: Option<String>,
    pub violations: Vec<crate::scope::Violation>,
    pub warnings: Vec<crate::scope::Violation>,
    pub files_touched: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: TaskState::Pending,
            transition_history: Vec::new(),
            retry_count: 0,
            max_retries,
            workspace: None,
            commit: None,
            branch: None,
            violations: Vec::new(),
            warnings: Vec::new(),
            files_touched: 0,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(s), Some(f)) => Some(f - s),
            _ => None,
        }
    }
}
