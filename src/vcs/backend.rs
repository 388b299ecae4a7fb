// src/vcs/backend.rs

//! Pluggable VCS backend port (spec §4.6).
//!
//! Mirrors the `ExecutorBackend` pattern elsewhere in this crate: a narrow
//! trait with boxed-future methods so production code (`GitCliBackend`)
//! and test fakes both implement the same dyn-compatible port.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::context::VcsMode;
use crate::errors::{DagforgeError, Result};

/// What a backend supports, so callers degrade gracefully instead of
/// calling an unsupported method and panicking (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub supports_restack: bool,
    pub supports_submit: bool,
    pub supports_parallel_dispatch: bool,
}

pub trait VcsBackend: Send + Sync {
    fn is_available<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

    fn init<'a>(&'a self, repo_root: &'a Path) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn create_branch<'a>(
        &'a self,
        repo_root: &'a Path,
        branch: &'a str,
        base_ref: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn commit<'a>(
        &'a self,
        worktree: &'a Path,
        message: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

    /// Cherry-pick `commit` onto `branch` in `repo_root`. Returns `Ok(true)`
    /// on a clean apply, `Ok(false)` if it left the repo mid-conflict
    /// (caller decides how to proceed per `ConflictPolicy`).
    fn cherry_pick<'a>(
        &'a self,
        repo_root: &'a Path,
        branch: &'a str,
        commit: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;

    fn has_conflicts<'a>(
        &'a self,
        repo_root: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;

    fn abort_merge<'a>(&'a self, repo_root: &'a Path) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Restack `branch` onto `onto`. Backends without native restacking
    /// support return `DagforgeError::Unsupported` rather than attempting
    /// a best-effort rebase (spec §4.6).
    fn restack<'a>(
        &'a self,
        repo_root: &'a Path,
        branch: &'a str,
        onto: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Submit `branch` for review (e.g. open a PR). Backends without
    /// submit support return `DagforgeError::Unsupported`.
    fn submit<'a>(
        &'a self,
        repo_root: &'a Path,
        branch: &'a str,
        draft: bool,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + 'a>>;

    fn capabilities(&self) -> BackendCapabilities;
}

async fn run_git(cwd: &Path, args: &[&str]) -> Result<std::process::Output> {
    Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .await
        .map_err(DagforgeError::Io)
}

/// Default backend: plain `git` CLI, no forge integration. `restack` and
/// `submit` are unsupported since they require a hosting API this backend
/// doesn't have.
pub struct GitCliBackend;

impl VcsBackend for GitCliBackend {
    fn is_available<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            Command::new("git")
                .arg("--version")
                .output()
                .await
                .map(|o| o.status.success())
                .unwrap_or(false)
        })
    }

    fn init<'a>(&'a self, repo_root: &'a Path) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let output = run_git(repo_root, &["rev-parse", "--git-dir"]).await?;
            if !output.status.success() {
                return Err(DagforgeError::BackendUnavailable {
                    mode: VcsMode::Flat,
                    message: "not a git repository".to_string(),
                });
            }
            Ok(())
        })
    }

    fn create_branch<'a>(
        &'a self,
        repo_root: &'a Path,
        branch: &'a str,
        base_ref: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let output = run_git(repo_root, &["branch", branch, base_ref]).await?;
            if !output.status.success() {
                return Err(DagforgeError::Commit {
                    task: branch.to_string(),
                    message: String::from_utf8_lossy(&output.stderr).into_owned(),
                });
            }
            Ok(())
        })
    }

    fn commit<'a>(
        &'a self,
        worktree: &'a Path,
        message: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let add = run_git(worktree, &["add", "-A"]).await?;
            if !add.status.success() {
                return Err(DagforgeError::Commit {
                    task: worktree.display().to_string(),
                    message: String::from_utf8_lossy(&add.stderr).into_owned(),
                });
            }
            let commit = run_git(worktree, &["commit", "-m", message]).await?;
            if !commit.status.success() {
                return Err(DagforgeError::Commit {
                    task: worktree.display().to_string(),
                    message: String::from_utf8_lossy(&commit.stderr).into_owned(),
                });
            }
            let rev = run_git(worktree, &["rev-parse", "HEAD"]).await?;
            Ok(String::from_utf8_lossy(&rev.stdout).trim().to_string())
        })
    }

    fn cherry_pick<'a>(
        &'a self,
        repo_root: &'a Path,
        branch: &'a str,
        commit: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            let checkout = run_git(repo_root, &["checkout", branch]).await?;
            if !checkout.status.success() {
                return Err(DagforgeError::StackConflict {
                    branch: branch.to_string(),
                    message: String::from_utf8_lossy(&checkout.stderr).into_owned(),
                });
            }

            let pick = run_git(repo_root, &["cherry-pick", commit]).await?;
            if pick.status.success() {
                return Ok(true);
            }

            let stderr = String::from_utf8_lossy(&pick.stderr);
            if stderr.contains("conflict") || stderr.contains("CONFLICT") {
                debug!(branch, commit, "cherry-pick left a conflict");
                return Ok(false);
            }
            Err(DagforgeError::StackConflict {
                branch: branch.to_string(),
                message: stderr.into_owned(),
            })
        })
    }

    fn has_conflicts<'a>(
        &'a self,
        repo_root: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            let output = run_git(repo_root, &["diff", "--name-only", "--diff-filter=U"]).await?;
            Ok(!output.stdout.is_empty())
        })
    }

    fn abort_merge<'a>(&'a self, repo_root: &'a Path) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let output = run_git(repo_root, &["cherry-pick", "--abort"]).await?;
            if !output.status.success() {
                warn!(
                    error = %String::from_utf8_lossy(&output.stderr),
                    "abort_merge: cherry-pick --abort failed, repo may already be clean"
                );
            }
            Ok(())
        })
    }

    fn restack<'a>(
        &'a self,
        _repo_root: &'a Path,
        _branch: &'a str,
        _onto: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            Err(DagforgeError::Unsupported(
                "restack is not supported by the plain git CLI backend".to_string(),
            ))
        })
    }

    fn submit<'a>(
        &'a self,
        _repo_root: &'a Path,
        _branch: &'a str,
        _draft: bool,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + 'a>> {
        Box::pin(async move {
            Err(DagforgeError::Unsupported(
                "submit is not supported by the plain git CLI backend".to_string(),
            ))
        })
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_restack: false,
            supports_submit: false,
            supports_parallel_dispatch: true,
        }
    }
}
