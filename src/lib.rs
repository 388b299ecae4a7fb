// src/lib.rs

pub mod agent;
pub mod cli;
pub mod context;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod plan;
pub mod scope;
pub mod state;
pub mod vcs;
pub mod workspace;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::info;

use crate::agent::ProcessAgentRunner;
use crate::cli::{CliArgs, Command};
use crate::context::RunContext;
use crate::engine::{EventSink, Orchestrator};
use crate::plan::load_and_validate;
use crate::vcs::{GitCliBackend, VcsCoordinator};
use crate::workspace::WorktreePool;

/// High-level entry point used by `main.rs`. Returns the process exit code
/// a non-interactive caller should use (spec §7).
pub async fn run(args: CliArgs) -> Result<i32> {
    match args.command {
        Command::Validate { plan } => {
            let validated = load_and_validate(&plan)
                .with_context(|| format!("failed to load plan from {}", plan.display()))?;
            print_plan_summary(&validated);
            Ok(0)
        }
        Command::Run {
            plan,
            repo,
            concurrency,
            timeout_secs,
            max_retries,
            vcs_mode,
            stacking_strategy,
            conflict_policy,
            validation_mode,
            branch_prefix,
            base_ref,
            agent_binary,
            dry_run,
        } => {
            let validated = load_and_validate(&plan)
                .with_context(|| format!("failed to load plan from {}", plan.display()))?;

            if dry_run {
                print_plan_summary(&validated);
                return Ok(0);
            }

            let repo_root = repo.unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

            let mut ctx = RunContext::default();
            if let Some(c) = concurrency {
                ctx.concurrency_cap = c;
            }
            if let Some(t) = timeout_secs {
                ctx.per_task_timeout = Duration::from_secs(t);
            }
            if let Some(r) = max_retries {
                ctx.retry_policy.max_retries = r;
            }
            if let Some(m) = vcs_mode {
                ctx.vcs_mode = m;
            }
            if let Some(s) = stacking_strategy {
                ctx.stacking_strategy = s;
            }
            if let Some(p) = conflict_policy {
                ctx.conflict_policy = p;
            }
            if let Some(v) = validation_mode {
                ctx.validation_mode = v;
            }
            if let Some(b) = branch_prefix {
                ctx.branch_prefix = b;
            }
            if let Some(b) = base_ref {
                ctx.base_ref = b;
            }

            let shadow_path = repo_root.join(&ctx.shadow_path);
            let pool = Arc::new(WorktreePool::new(
                repo_root.clone(),
                shadow_path,
                ctx.branch_prefix.clone(),
            ));
            let agent: Arc<dyn crate::agent::AgentRunner> =
                Arc::new(ProcessAgentRunner::new(agent_binary, pool.clone()));
            let backend: Arc<dyn crate::vcs::VcsBackend> = Arc::new(GitCliBackend);
            let vcs = VcsCoordinator::new(
                backend,
                ctx.vcs_mode,
                ctx.branch_prefix.clone(),
                ctx.conflict_policy,
            );
            let (sink, mut events) = EventSink::new();
            tokio::spawn(async move { while events.recv().await.is_some() {} });

            let (cancel_tx, cancel_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("ctrl-c received, requesting cancellation");
                    let _ = cancel_tx.send(true);
                }
            });

            let orchestrator = Orchestrator::new(ctx, agent, pool, vcs, sink);
            let result = orchestrator.run(&repo_root, validated, cancel_rx).await?;

            info!(
                overall_status = ?result.overall_status,
                tasks = result.per_task.len(),
                "run finished"
            );
            for task in &result.per_task {
                println!(
                    "{:<16} {:<10} retries={} commit={}",
                    task.id,
                    task.final_state.to_string(),
                    task.retries,
                    task.commit.as_deref().unwrap_or("-")
                );
            }
            if let Some(stack) = &result.stack {
                println!("stacked branches: {}", stack.branches.join(", "));
                if !stack.conflicts.is_empty() {
                    println!("conflicts: {}", stack.conflicts.len());
                }
            }

            Ok(result.overall_status.exit_code())
        }
    }
}

fn print_plan_summary(validated: &crate::plan::ValidatedPlan) {
    println!("plan: {}", validated.plan.name);
    println!("tasks ({}):", validated.plan.tasks.len());
    for id in validated.graph.topo_order() {
        let task = validated.plan.task(id).expect("topo order only lists known tasks");
        let deps = validated.graph.dependencies_of(id);
        if deps.is_empty() {
            println!("  - {id} [{}]", task.complexity);
        } else {
            println!("  - {id} [{}] (after: {})", task.complexity, deps.join(", "));
        }
    }
}
