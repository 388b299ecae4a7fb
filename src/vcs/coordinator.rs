// src/vcs/coordinator.rs

//! One port in front of the three VCS isolation strategies (spec §4.6).

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::context::{ConflictPolicy, StackingStrategy, VcsMode};
use crate::errors::Result;
use crate::plan::TaskGraph;
use crate::vcs::backend::{BackendCapabilities, VcsBackend};
use crate::vcs::stack_builder::{CompletedTask, StackBuilder, StackResult};

/// Coordinates VCS side effects across a run without the scheduler caring
/// which of the three isolation strategies is active (spec §4.6, §5).
pub struct VcsCoordinator {
    backend: Arc<dyn VcsBackend>,
    mode: VcsMode,
    branch_prefix: String,
    conflict_policy: ConflictPolicy,
}

impl VcsCoordinator {
    pub fn new(
        backend: Arc<dyn VcsBackend>,
        mode: VcsMode,
        branch_prefix: String,
        conflict_policy: ConflictPolicy,
    ) -> Self {
        Self {
            backend,
            mode,
            branch_prefix,
            conflict_policy,
        }
    }

    /// One-time setup before any task work begins.
    pub async fn initialize(&self, repo_root: &Path) -> Result<()> {
        debug!(mode = ?self.mode, "initializing vcs coordinator");
        self.backend.init(repo_root).await
    }

    /// Per-task preparation. In `flat` mode there is no per-task branch to
    /// create up front; `worktree-parallel`/`stacked` pre-create the task's
    /// eventual home branch isn't needed either since `WorktreePool::acquire`
    /// already creates the working branch. This is a hook for backends that
    /// need extra bookkeeping (e.g. registering the branch with a forge).
    pub async fn prepare(&self, _task_id: &str) -> Result<()> {
        Ok(())
    }

    /// Commit a task's work in its own workspace.
    pub async fn commit(&self, worktree: &Path, message: &str) -> Result<String> {
        self.backend.commit(worktree, message).await
    }

    /// Assemble the run's final output.
    ///
    /// `flat` mode has already committed everything onto the caller's
    /// current branch incrementally (spec §5 "flat = mutex-serialized main
    /// workdir"), so there is no stack to build. `worktree-parallel` and
    /// `stacked` both go through `StackBuilder`; the difference between
    /// them is whether the scheduler allowed parallel dispatch, not how
    /// finalize runs.
    pub async fn finalize(
        &self,
        repo_root: &Path,
        base_ref: &str,
        completed: &[CompletedTask],
        graph: &TaskGraph,
        strategy: StackingStrategy,
    ) -> Result<Option<StackResult>> {
        match self.mode {
            VcsMode::Flat => Ok(None),
            VcsMode::WorktreeParallel | VcsMode::Stacked => {
                let builder = StackBuilder::new(
                    self.backend.clone(),
                    self.branch_prefix.clone(),
                    self.conflict_policy,
                );
                let result = builder
                    .finalize(repo_root, base_ref, completed, graph, strategy)
                    .await?;
                Ok(Some(result))
            }
        }
    }

    pub fn capabilities(&self) -> BackendCapabilities {
        let mut caps = self.backend.capabilities();
        if self.mode == VcsMode::Flat {
            caps.supports_parallel_dispatch = false;
        }
        caps
    }
}
