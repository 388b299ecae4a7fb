use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use dagforge::agent::{AgentRunner, AgentStatus, TaskOutcome};
use dagforge::errors::Result;
use dagforge::plan::Task;
use dagforge::vcs::{BackendCapabilities, VcsBackend};
use dagforge::workspace::WorkspaceHandle;

/// A fake [`AgentRunner`] that never spawns a process: it records which
/// tasks it was asked to execute and returns a canned [`TaskOutcome`] per
/// task id, so the scheduler's concurrency and failure-propagation logic
/// can be exercised deterministically.
pub struct FakeAgentRunner {
    /// A queue of outcomes per task id, popped front-to-back on each
    /// invocation, so a test can script "fails, then succeeds" without a
    /// real retry loop (spec S4 "retry then success").
    outcomes: Mutex<HashMap<String, VecDeque<TaskOutcome>>>,
    default_files: Vec<String>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl FakeAgentRunner {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(HashMap::new()),
            default_files: Vec::new(),
            executed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every task not given an explicit outcome via [`Self::with_outcome`]
    /// succeeds and reports having touched these files.
    pub fn with_default_files(mut self, files: Vec<String>) -> Self {
        self.default_files = files;
        self
    }

    /// Queue `outcome` to be returned the next time `task_id` is executed.
    /// Calling this more than once for the same id queues multiple
    /// outcomes in order (first call gets the first queued outcome).
    pub fn with_outcome(self, task_id: &str, outcome: TaskOutcome) -> Self {
        self.outcomes
            .lock()
            .unwrap()
            .entry(task_id.to_string())
            .or_default()
            .push_back(outcome);
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

impl Default for FakeAgentRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn default_success(files: Vec<String>) -> TaskOutcome {
    TaskOutcome {
        status: AgentStatus::Completed,
        exit_code: Some(0),
        stdout: String::new(),
        stderr: String::new(),
        files_touched: files,
    }
}

impl AgentRunner for FakeAgentRunner {
    fn execute<'a>(
        &'a self,
        task: &'a Task,
        _workspace: &'a WorkspaceHandle,
        _timeout_dur: Duration,
        mut cancel: watch::Receiver<bool>,
    ) -> Pin<Box<dyn Future<Output = Result<TaskOutcome>> + Send + 'a>> {
        Box::pin(async move {
            self.executed.lock().unwrap().push(task.id.clone());

            if *cancel.borrow() {
                return Ok(TaskOutcome {
                    status: AgentStatus::Cancelled,
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    files_touched: Vec::new(),
                });
            }

            let queued = self
                .outcomes
                .lock()
                .unwrap()
                .get_mut(&task.id)
                .and_then(VecDeque::pop_front);
            let outcome = queued.unwrap_or_else(|| default_success(self.default_files.clone()));
            Ok(outcome)
        })
    }
}

/// A fake [`VcsBackend`] that never shells out to git: `commit` hands back
/// an incrementing fake sha, and every other operation succeeds
/// unconditionally unless configured otherwise, so stacking and conflict
/// handling can be exercised without a real repository.
pub struct FakeVcsBackend {
    next_commit: Mutex<u64>,
    conflicting_branches: Vec<String>,
    capabilities: BackendCapabilities,
}

impl FakeVcsBackend {
    pub fn new() -> Self {
        Self {
            next_commit: Mutex::new(1),
            conflicting_branches: Vec::new(),
            capabilities: BackendCapabilities {
                supports_restack: false,
                supports_submit: false,
                supports_parallel_dispatch: true,
            },
        }
    }

    /// `cherry_pick` onto these branches reports a conflict instead of a
    /// clean apply.
    pub fn with_conflicting_branches(mut self, branches: Vec<String>) -> Self {
        self.conflicting_branches = branches;
        self
    }

    pub fn with_capabilities(mut self, capabilities: BackendCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

impl Default for FakeVcsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VcsBackend for FakeVcsBackend {
    fn is_available<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move { true })
    }

    fn init<'a>(&'a self, _repo_root: &'a Path) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move { Ok(()) })
    }

    fn create_branch<'a>(
        &'a self,
        _repo_root: &'a Path,
        _branch: &'a str,
        _base_ref: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move { Ok(()) })
    }

    fn commit<'a>(
        &'a self,
        _worktree: &'a Path,
        _message: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let mut next = self.next_commit.lock().unwrap();
            let sha = format!("{:040x}", *next);
            *next += 1;
            Ok(sha)
        })
    }

    fn cherry_pick<'a>(
        &'a self,
        _repo_root: &'a Path,
        branch: &'a str,
        _commit: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        let conflicts = self.conflicting_branches.contains(&branch.to_string());
        Box::pin(async move { Ok(!conflicts) })
    }

    fn has_conflicts<'a>(
        &'a self,
        _repo_root: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move { Ok(false) })
    }

    fn abort_merge<'a>(&'a self, _repo_root: &'a Path) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move { Ok(()) })
    }

    fn restack<'a>(
        &'a self,
        _repo_root: &'a Path,
        _branch: &'a str,
        _onto: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move { Ok(()) })
    }

    fn submit<'a>(
        &'a self,
        _repo_root: &'a Path,
        _branch: &'a str,
        _draft: bool,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + 'a>> {
        Box::pin(async move { Ok(Some("https://example.invalid/pr/1".to_string())) })
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }
}
