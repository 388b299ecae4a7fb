// src/workspace/pool.rs

//! Git-worktree-backed task isolation (spec §4.3).
//!
//! Every operation shells out to the `git` binary the same way the rest of
//! the corpus talks to git: no `git2`, plain `tokio::process::Command`. This
//! is deliberately independent of [`crate::vcs::VcsBackend`] - worktree
//! mechanics are the same regardless of which stacking backend a run uses.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::{DagforgeError, Result};

/// A checked-out, isolated workspace for one task (spec §3 `WorkspaceHandle`).
#[derive(Debug, Clone)]
pub struct WorkspaceHandle {
    pub task_id: String,
    pub absolute_path: PathBuf,
    pub branch_name: String,
    pub base_ref: String,
    pub created_at: DateTime<Utc>,
}

async fn run_git(repo_root: &Path, args: &[&str]) -> Result<std::process::Output> {
    Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .output()
        .await
        .map_err(DagforgeError::Io)
}

fn ok_or_workspace_err(task: &str, output: &std::process::Output) -> Result<()> {
    if output.status.success() {
        Ok(())
    } else {
        Err(DagforgeError::Workspace {
            task: task.to_string(),
            message: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Pool of per-task worktrees rooted under `shadow_path` (spec §4.3).
///
/// Acquisition is serialized through an internal registry lock so two tasks
/// racing on a colliding branch name can't both win the `git worktree add`.
pub struct WorktreePool {
    repo_root: PathBuf,
    shadow_path: PathBuf,
    branch_prefix: String,
    registry: Mutex<Vec<WorkspaceHandle>>,
}

impl WorktreePool {
    pub fn new(repo_root: PathBuf, shadow_path: PathBuf, branch_prefix: String) -> Self {
        Self {
            repo_root,
            shadow_path,
            branch_prefix,
            registry: Mutex::new(Vec::new()),
        }
    }

    fn branch_for(&self, task_id: &str) -> String {
        format!("{}{}", self.branch_prefix, task_id)
    }

    /// Acquire a fresh worktree for `task_id` rooted at `base_ref`.
    ///
    /// On branch-name collision (e.g. a stale branch from a prior crashed
    /// run) this retries once with a numeric suffix, then gives up (spec
    /// §4.3 "retried once with a numeric suffix, then the task fails").
    pub async fn acquire(&self, task_id: &str, base_ref: &str) -> Result<WorkspaceHandle> {
        let mut guard = self.registry.lock().await;

        tokio::fs::create_dir_all(&self.shadow_path)
            .await
            .map_err(DagforgeError::Io)?;

        let primary_branch = self.branch_for(task_id);
        match self.try_create(task_id, &primary_branch, base_ref).await {
            Ok(handle) => {
                guard.push(handle.clone());
                Ok(handle)
            }
            Err(first_err) => {
                warn!(task = task_id, error = %first_err, "worktree create collided, retrying with suffix");
                let fallback_branch = format!("{primary_branch}-2");
                match self.try_create(task_id, &fallback_branch, base_ref).await {
                    Ok(handle) => {
                        guard.push(handle.clone());
                        Ok(handle)
                    }
                    Err(_) => Err(first_err),
                }
            }
        }
    }

    async fn try_create(
        &self,
        task_id: &str,
        branch_name: &str,
        base_ref: &str,
    ) -> Result<WorkspaceHandle> {
        let path = self.shadow_path.join(task_id);
        if path.exists() {
            let _ = run_git(
                &self.repo_root,
                &["worktree", "remove", path.to_str().unwrap_or_default(), "--force"],
            )
            .await;
        }

        let output = run_git(
            &self.repo_root,
            &[
                "worktree",
                "add",
                path.to_str().ok_or_else(|| DagforgeError::Workspace {
                    task: task_id.to_string(),
                    message: "worktree path is not valid UTF-8".to_string(),
                })?,
                "-b",
                branch_name,
                base_ref,
            ],
        )
        .await?;
        ok_or_workspace_err(task_id, &output)?;

        info!(task = task_id, branch = branch_name, "acquired worktree");

        Ok(WorkspaceHandle {
            task_id: task_id.to_string(),
            absolute_path: path,
            branch_name: branch_name.to_string(),
            base_ref: base_ref.to_string(),
            created_at: Utc::now(),
        })
    }

    /// Release a worktree. Idempotent: releasing an already-released or
    /// never-acquired handle is a no-op, not an error (spec §4.3).
    pub async fn release(&self, handle: &WorkspaceHandle) -> Result<()> {
        let mut guard = self.registry.lock().await;

        if !handle.absolute_path.exists() {
            debug!(task = %handle.task_id, "release: worktree already gone");
        } else {
            let output = run_git(
                &self.repo_root,
                &[
                    "worktree",
                    "remove",
                    handle.absolute_path.to_str().unwrap_or_default(),
                    "--force",
                ],
            )
            .await?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.contains("is not a working tree") {
                    return Err(DagforgeError::Workspace {
                        task: handle.task_id.clone(),
                        message: stderr.into_owned(),
                    });
                }
            }
        }

        guard.retain(|h| h.task_id != handle.task_id);
        Ok(())
    }

    /// Discard a failed attempt's worktree *and* its branch, used before a
    /// task is retried. Unlike `release`, which leaves a completed task's
    /// branch in place for `StackBuilder` to cherry-pick, a retried
    /// attempt's branch must be gone before the next `acquire` tries to
    /// recreate it under the same name (spec §9 "every acquire is paired
    /// with a release on every exit path").
    pub async fn discard(&self, handle: &WorkspaceHandle) -> Result<()> {
        self.release(handle).await?;
        let _ = run_git(&self.repo_root, &["branch", "-D", &handle.branch_name]).await;
        Ok(())
    }

    /// All workspaces the pool currently knows about.
    pub async fn list(&self) -> Vec<WorkspaceHandle> {
        self.registry.lock().await.clone()
    }

    /// Sweep `shadow_path` for worktree directories the registry doesn't
    /// know about (spec §4.3 `reap_orphans`, e.g. after a crashed run) and
    /// remove them. Returns the count reaped.
    pub async fn reap_orphans(&self) -> Result<usize> {
        let guard = self.registry.lock().await;
        let known: std::collections::HashSet<&str> =
            guard.iter().map(|h| h.task_id.as_str()).collect();

        if !self.shadow_path.exists() {
            return Ok(0);
        }

        let mut reaped = 0usize;
        let mut entries = tokio::fs::read_dir(&self.shadow_path)
            .await
            .map_err(DagforgeError::Io)?;
        while let Some(entry) = entries.next_entry().await.map_err(DagforgeError::Io)? {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if known.contains(name) {
                continue;
            }
            warn!(task = name, "reaping orphaned worktree");
            let _ = run_git(
                &self.repo_root,
                &["worktree", "remove", path.to_str().unwrap_or_default(), "--force"],
            )
            .await;
            reaped += 1;
        }

        Ok(reaped)
    }

    /// Files touched relative to `handle.base_ref`, used as the
    /// authoritative input to `FileScopeGuard::check` (spec §9).
    pub async fn files_touched(&self, handle: &WorkspaceHandle) -> Result<Vec<String>> {
        let output = Command::new("git")
            .args(["diff", "--name-only", &handle.base_ref])
            .current_dir(&handle.absolute_path)
            .output()
            .await
            .map_err(DagforgeError::Io)?;
        ok_or_workspace_err(&handle.task_id, &output)?;

        let untracked = Command::new("git")
            .args(["ls-files", "--others", "--exclude-standard"])
            .current_dir(&handle.absolute_path)
            .output()
            .await
            .map_err(DagforgeError::Io)?;
        ok_or_workspace_err(&handle.task_id, &untracked)?;

        let mut files: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .chain(String::from_utf8_lossy(&untracked.stdout).lines())
            .map(|s| s.to_string())
            .collect();
        files.sort();
        files.dedup();
        Ok(files)
    }

    /// Commit the worktree's current state with `message`. Returns the new
    /// commit sha. No-op commits are rejected by the caller via
    /// `files_touched` + `FileScopeGuard` before this is reached.
    pub async fn commit(&self, handle: &WorkspaceHandle, message: &str) -> Result<String> {
        let add = run_git(
            &handle.absolute_path,
            &["add", "-A"],
        )
        .await?;
        ok_or_workspace_err(&handle.task_id, &add)?;

        let commit = Command::new("git")
            .args(["commit", "-m", message])
            .current_dir(&handle.absolute_path)
            .output()
            .await
            .map_err(DagforgeError::Io)?;
        if !commit.status.success() {
            return Err(DagforgeError::Commit {
                task: handle.task_id.clone(),
                message: String::from_utf8_lossy(&commit.stderr).into_owned(),
            });
        }

        let rev_parse = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(&handle.absolute_path)
            .output()
            .await
            .map_err(DagforgeError::Io)?;
        ok_or_workspace_err(&handle.task_id, &rev_parse)?;

        Ok(String::from_utf8_lossy(&rev_parse.stdout).trim().to_string())
    }
}
