//! Property tests over the pure [`dagforge::engine::Scheduler`] simulation
//! loop. No agent runner, no VCS, no filesystem - just the state machine
//! driven through a scripted sequence of dispatch/success/failure events,
//! the same shape as the teacher's `tests/property/scheduler.rs`.

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;

use dagforge::context::{RetryPolicy, RetryableKind};
use dagforge::engine::scheduler::{FailureReason, Scheduler};
use dagforge::plan::{Plan, TaskGraph};
use dagforge::state::{StateMachine, TaskState};

use dagforge_test_utils::builders::{PlanBuilder, TaskBuilder};

/// Generates an acyclic plan of `num_tasks` tasks: task `i` may depend only
/// on tasks `0..i`, and each task's declared file is unique to it, so
/// property 2 (no two running tasks share a file) holds by construction and
/// the interesting thing under test is that the scheduler never violates it.
fn dag_plan_strategy(max_tasks: usize) -> impl Strategy<Value = Plan> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        let deps_strat = proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..num_tasks.max(1)),
            num_tasks,
        );
        deps_strat.prop_map(move |raw_deps| {
            let mut builder = PlanBuilder::new("property-plan");
            for (i, potential_deps) in raw_deps.into_iter().enumerate() {
                let id = format!("t{i}");
                let mut task = TaskBuilder::new(&id).file(&format!("f{i}.ts"));
                let mut seen = HashSet::new();
                for raw in potential_deps {
                    if i == 0 {
                        break;
                    }
                    let dep_idx = raw % i;
                    if seen.insert(dep_idx) {
                        task = task.depends_on(&format!("t{dep_idx}"));
                    }
                }
                builder = builder.with_task(task.build());
            }
            builder.build()
        })
    })
}

/// Drives `scheduler` to completion, dispatching up to `cap` concurrent
/// tasks at a time and resolving each with a scripted success/failure,
/// checking invariants 1, 3, 4 and 5 (spec-equivalent numbering from the
/// testable-properties list) at every event boundary. Returns the final
/// per-task state map for the round-trip check in the caller.
fn run_simulation(
    scheduler: &mut Scheduler,
    cap: usize,
    failing: &HashSet<String>,
    policy: &RetryPolicy,
) -> HashMap<String, TaskState> {
    let mut running: HashSet<String> = HashSet::new();
    let mut steps = 0;
    let max_steps = 10_000;

    loop {
        if scheduler.is_terminal() {
            break;
        }
        steps += 1;
        assert!(steps < max_steps, "simulation did not terminate");

        let slots = cap.saturating_sub(scheduler.running_count() + scheduler.queued_count());
        let dispatched = scheduler.pick_dispatch(slots);
        for id in &dispatched {
            scheduler.mark_queued(id);
        }
        assert!(
            scheduler.running_count() + scheduler.queued_count() <= cap,
            "running + queued exceeded concurrency cap"
        );

        let queued = scheduler.queued_ids();
        if queued.is_empty() && running.is_empty() {
            // Nothing dispatched and nothing in flight: every remaining task
            // must be blocked on a dependency, or the run is stuck for a
            // reason other than concurrency - either way there is nothing
            // left for this loop to drive forward.
            break;
        }

        for id in queued {
            scheduler.mark_running(&id);
            running.insert(id);
        }
        assert!(
            scheduler.running_count() + scheduler.queued_count() <= cap,
            "running + queued exceeded concurrency cap after dispatch"
        );

        let Some(id) = running.iter().next().cloned() else {
            continue;
        };
        running.remove(&id);

        if failing.contains(&id) {
            scheduler.handle_failure(&id, FailureReason::AgentNonzeroExit, Vec::new(), policy);
        } else {
            scheduler.handle_success(&id, format!("sha-{id}"), format!("task/{id}"), 1, Vec::new());
        }
    }

    scheduler
        .records()
        .iter()
        .map(|(id, record)| (id.clone(), record.state))
        .collect()
}

proptest! {
    #[test]
    fn scheduler_invariants_hold_across_random_dags(
        plan in dag_plan_strategy(8),
        cap in 1usize..=4,
        failing_indices in proptest::collection::vec(0usize..8, 0..4),
    ) {
        let graph = TaskGraph::build(&plan).unwrap();
        let task_ids: HashSet<String> = plan.tasks.iter().map(|t| t.id.clone()).collect();
        let failing: HashSet<String> = failing_indices
            .into_iter()
            .map(|i| format!("t{i}"))
            .filter(|id| task_ids.contains(id))
            .collect();

        let policy = RetryPolicy {
            max_retries: 0,
            retryable_kinds: vec![RetryableKind::NonzeroExit],
        };

        let mut scheduler = Scheduler::new(graph, &policy);
        let final_states = run_simulation(&mut scheduler, cap, &failing, &policy);

        // Property 4: every task ends up in a terminal state.
        for (id, state) in &final_states {
            prop_assert!(state.is_terminal(), "task {id} ended in non-terminal state {state}");
        }

        // Property 1: every recorded transition is legal.
        for (id, record) in scheduler.records() {
            for transition in &record.transition_history {
                prop_assert!(
                    StateMachine::is_legal(transition.from, transition.to),
                    "task {id} recorded illegal transition {:?} -> {:?}",
                    transition.from,
                    transition.to
                );
            }
        }

        // Property 5: a completed task's dependencies are all completed.
        for task in &plan.tasks {
            if final_states[&task.id] == TaskState::Completed {
                for dep in &task.dependencies {
                    prop_assert_eq!(
                        final_states[dep],
                        TaskState::Completed,
                        "task {} completed but dependency {} did not",
                        task.id,
                        dep
                    );
                }
            }
        }

        // A task fails only if it was actually scheduled as a "failing" id,
        // or it was skipped because a dependency failed/was skipped.
        for task in &plan.tasks {
            if final_states[&task.id] == TaskState::Failed {
                prop_assert!(failing.contains(&task.id));
            }
        }

        // Property 6 (round-trip): replaying each task's transition history
        // from `Pending` reproduces its recorded final state.
        for (id, record) in scheduler.records() {
            let mut replayed = TaskState::Pending;
            for transition in &record.transition_history {
                prop_assert_eq!(replayed, transition.from);
                replayed = transition.to;
            }
            prop_assert_eq!(replayed, record.state, "replay mismatch for task {}", id);
        }
    }
}
