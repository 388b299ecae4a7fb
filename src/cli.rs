// src/cli.rs

//! Command-line surface (spec §6 External Interfaces, SPEC A.4).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::context::{ConflictPolicy, StackingStrategy, ValidationMode, VcsMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Decompose-and-execute a feature plan across isolated agent workspaces.
#[derive(Debug, Parser)]
#[command(name = "dagforge", version, about)]
pub struct CliArgs {
    /// Log level. Falls back to DAGFORGE_LOG, then info.
    #[arg(long, global = true, value_enum)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Execute a plan's tasks to completion.
    Run {
        /// Path to the plan document (JSON or YAML).
        #[arg(long)]
        plan: PathBuf,

        /// Repository root to operate in. Defaults to the current directory.
        #[arg(long)]
        repo: Option<PathBuf>,

        /// Max tasks dispatched concurrently (ignored in flat mode).
        #[arg(long)]
        concurrency: Option<usize>,

        /// Per-task timeout in seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Max retries for a retryable failure.
        #[arg(long)]
        max_retries: Option<u32>,

        #[arg(long, value_enum)]
        vcs_mode: Option<VcsMode>,

        #[arg(long, value_enum)]
        stacking_strategy: Option<StackingStrategy>,

        #[arg(long, value_enum)]
        conflict_policy: Option<ConflictPolicy>,

        #[arg(long, value_enum)]
        validation_mode: Option<ValidationMode>,

        /// Branch name prefix for per-task/stacked branches.
        #[arg(long)]
        branch_prefix: Option<String>,

        /// Base ref every task's workspace is rooted at.
        #[arg(long)]
        base_ref: Option<String>,

        /// Path to the external agent binary to spawn per task.
        #[arg(long)]
        agent_binary: String,

        /// Load and validate the plan, print the dispatch order, do not
        /// execute anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Load and semantically validate a plan without executing it.
    Validate {
        #[arg(long)]
        plan: PathBuf,
    },
}
