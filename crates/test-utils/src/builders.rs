#![allow(dead_code)]

use dagforge::plan::{Complexity, Plan, Task};

/// Builder for a [`Plan`], used to exercise the scheduler and orchestrator
/// against hand-assembled DAGs without going through `load_and_validate`.
pub struct PlanBuilder {
    name: String,
    strategy: Option<String>,
    tasks: Vec<Task>,
}

impl PlanBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            strategy: None,
            tasks: Vec::new(),
        }
    }

    pub fn strategy(mut self, strategy: &str) -> Self {
        self.strategy = Some(strategy.to_string());
        self
    }

    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn build(self) -> Plan {
        Plan {
            name: self.name,
            strategy: self.strategy,
            tasks: self.tasks,
        }
    }
}

impl Default for PlanBuilder {
    fn default() -> Self {
        Self::new("test-plan")
    }
}

/// Builder for a [`Task`].
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            task: Task {
                id: id.to_string(),
                name: id.to_string(),
                description: String::new(),
                complexity: Complexity::S,
                files: Vec::new(),
                dependencies: Vec::new(),
                acceptance_criteria: Vec::new(),
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.task.name = name.to_string();
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.task.description = description.to_string();
        self
    }

    pub fn complexity(mut self, complexity: Complexity) -> Self {
        self.task.complexity = complexity;
        self
    }

    pub fn file(mut self, pattern: &str) -> Self {
        self.task.files.push(pattern.to_string());
        self
    }

    pub fn depends_on(mut self, dep: &str) -> Self {
        self.task.dependencies.push(dep.to_string());
        self
    }

    pub fn acceptance(mut self, criterion: &str) -> Self {
        self.task.acceptance_criteria.push(criterion.to_string());
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}
