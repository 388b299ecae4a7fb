// src/context.rs

//! `RunContext`: the immutable per-run configuration envelope (spec §3, §6).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which VCS isolation strategy the run uses (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[clap(rename_all = "kebab-case")]
pub enum VcsMode {
    Flat,
    WorktreeParallel,
    Stacked,
}

impl VcsMode {
    pub fn requires_worktrees(self) -> bool {
        !matches!(self, VcsMode::Flat)
    }

    pub fn allows_parallel_dispatch(self) -> bool {
        !matches!(self, VcsMode::Flat)
    }
}

/// Tie-break rule `StackBuilder` uses once the topological order is fixed
/// (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[clap(rename_all = "kebab-case")]
pub enum StackingStrategy {
    DependencyOrder,
    ComplexityFirst,
    FileImpact,
}

/// What to do when a cherry-pick/restack conflicts (spec §4.7, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
#[clap(rename_all = "lowercase")]
pub enum ConflictPolicy {
    Auto,
    Manual,
    Fail,
}

/// Whether `FileScopeGuard::check` downgrades `out_of_scope` to a warning
/// (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
#[clap(rename_all = "lowercase")]
pub enum ValidationMode {
    Strict,
    Permissive,
}

/// Failure kinds eligible for retry (spec §6 `retryPolicy.retryableKinds`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryableKind {
    Timeout,
    NonzeroExit,
    TransientVcsError,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retryable_kinds: Vec<RetryableKind>,
}

impl RetryPolicy {
    pub fn allows(&self, kind: RetryableKind) -> bool {
        self.retryable_kinds.contains(&kind)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            retryable_kinds: vec![
                RetryableKind::Timeout,
                RetryableKind::NonzeroExit,
                RetryableKind::TransientVcsError,
            ],
        }
    }
}

/// Immutable per-run configuration (spec §3 `RunContext`, §6 Configuration).
///
/// Constructed once from CLI flags and handed by reference to every
/// component; nothing in the engine mutates it.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub concurrency_cap: usize,
    pub per_task_timeout: Duration,
    pub retry_policy: RetryPolicy,
    pub vcs_mode: VcsMode,
    pub stacking_strategy: StackingStrategy,
    pub conflict_policy: ConflictPolicy,
    pub validation_mode: ValidationMode,
    pub cleanup_on_success: bool,
    pub cleanup_on_failure: bool,
    pub branch_prefix: String,
    pub shadow_path: PathBuf,
    pub base_ref: String,
    pub trunk: String,
    pub submit: bool,
    pub draft: bool,
    pub auto_merge: bool,
}

impl Default for RunContext {
    fn default() -> Self {
        Self {
            concurrency_cap: 4,
            per_task_timeout: Duration::from_secs(600),
            retry_policy: RetryPolicy::default(),
            vcs_mode: VcsMode::WorktreeParallel,
            stacking_strategy: StackingStrategy::DependencyOrder,
            conflict_policy: ConflictPolicy::Auto,
            validation_mode: ValidationMode::Strict,
            cleanup_on_success: true,
            cleanup_on_failure: false,
            branch_prefix: "task/".to_string(),
            shadow_path: PathBuf::from(".dagforge/shadows"),
            base_ref: "HEAD".to_string(),
            trunk: "main".to_string(),
            submit: false,
            draft: false,
            auto_merge: false,
        }
    }
}
