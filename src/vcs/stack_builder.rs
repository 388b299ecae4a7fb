// src/vcs/stack_builder.rs

//! Assembling completed per-task commits into a reviewable stack of
//! branches (spec §4.7).

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::context::{ConflictPolicy, StackingStrategy};
use crate::errors::Result;
use crate::plan::{Complexity, TaskGraph};
use crate::vcs::backend::VcsBackend;

/// One completed task's commit, ready to be stitched into the stack.
#[derive(Debug, Clone)]
pub struct CompletedTask {
    pub task_id: String,
    pub commit: String,
    pub complexity: Complexity,
    pub files_touched: usize,
}

#[derive(Debug, Clone)]
pub struct ConflictRecord {
    pub task_id: String,
    pub branch: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct StackResult {
    pub branches: Vec<String>,
    pub conflicts: Vec<ConflictRecord>,
    pub review_urls: Vec<String>,
}

/// Chains completed tasks' commits into `<prefix>/<id>` branches, each
/// rooted on the previous branch in the chosen order (spec §4.7).
pub struct StackBuilder {
    backend: Arc<dyn VcsBackend>,
    branch_prefix: String,
    conflict_policy: ConflictPolicy,
}

impl StackBuilder {
    pub fn new(
        backend: Arc<dyn VcsBackend>,
        branch_prefix: String,
        conflict_policy: ConflictPolicy,
    ) -> Self {
        Self {
            backend,
            branch_prefix,
            conflict_policy,
        }
    }

    /// Compute stack order per `strategy`. All three strategies respect the
    /// topological order; they differ only in how ties among
    /// simultaneously-unblocked tasks are broken (spec §4.7).
    pub fn order(
        &self,
        completed: &[CompletedTask],
        graph: &TaskGraph,
        strategy: StackingStrategy,
    ) -> Vec<CompletedTask> {
        let mut ordered = completed.to_vec();
        ordered.sort_by(|a, b| {
            let topo = graph.topo_index(&a.task_id).cmp(&graph.topo_index(&b.task_id));
            if topo != std::cmp::Ordering::Equal {
                return topo;
            }
            match strategy {
                StackingStrategy::DependencyOrder => std::cmp::Ordering::Equal,
                StackingStrategy::ComplexityFirst => a.complexity.cmp(&b.complexity),
                StackingStrategy::FileImpact => a.files_touched.cmp(&b.files_touched),
            }
        });
        ordered
    }

    /// Build the stack: create `<prefix>/<id>` for each task in order,
    /// chained onto the previous branch, cherry-picking each task's
    /// isolated-worktree commit across.
    pub async fn finalize(
        &self,
        repo_root: &Path,
        base_ref: &str,
        completed: &[CompletedTask],
        graph: &TaskGraph,
        strategy: StackingStrategy,
    ) -> Result<StackResult> {
        let ordered = self.order(completed, graph, strategy);
        let mut result = StackResult::default();
        let mut previous_branch = base_ref.to_string();

        for task in ordered {
            let branch = format!("{}{}", self.branch_prefix, task.task_id);
            self.backend.create_branch(repo_root, &branch, &previous_branch).await?;

            let applied = self.backend.cherry_pick(repo_root, &branch, &task.commit).await?;
            if !applied {
                let message = format!(
                    "cherry-pick of {} onto {} produced a conflict",
                    task.commit, branch
                );
                match self.conflict_policy {
                    ConflictPolicy::Auto => {
                        warn!(task = %task.task_id, "auto conflict policy: dropping and continuing");
                        self.backend.abort_merge(repo_root).await?;
                        result.conflicts.push(ConflictRecord {
                            task_id: task.task_id.clone(),
                            branch: branch.clone(),
                            message,
                        });
                        continue;
                    }
                    ConflictPolicy::Manual => {
                        info!(task = %task.task_id, "manual conflict policy: halting for remediation");
                        result.conflicts.push(ConflictRecord {
                            task_id: task.task_id.clone(),
                            branch: branch.clone(),
                            message,
                        });
                        break;
                    }
                    ConflictPolicy::Fail => {
                        self.backend.abort_merge(repo_root).await?;
                        return Err(crate::errors::DagforgeError::StackConflict {
                            branch,
                            message,
                        });
                    }
                }
            }

            info!(task = %task.task_id, %branch, "stacked branch created");
            result.branches.push(branch.clone());
            previous_branch = branch;
        }

        Ok(result)
    }
}
