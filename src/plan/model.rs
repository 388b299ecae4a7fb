// src/plan/model.rs

//! The `Plan`/`Task` document produced by the (out-of-scope) `PlanProducer`
//! (spec §3, §6).

use serde::{Deserialize, Serialize};

/// Advisory sizing used only by quality gates; never interpreted by the
/// scheduler itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum Complexity {
    #[serde(rename = "XS")]
    Xs,
    #[serde(rename = "S")]
    S,
    #[serde(rename = "M")]
    M,
    #[serde(rename = "L")]
    L,
    #[serde(rename = "XL")]
    Xl,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Complexity::Xs => "XS",
            Complexity::S => "S",
            Complexity::M => "M",
            Complexity::L => "L",
            Complexity::Xl => "XL",
        };
        f.write_str(s)
    }
}

/// The atomic unit of work (spec §3 `Task`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub complexity: Complexity,
    /// Path globs (exact path, or directory prefix when ending in `/`) this
    /// task may create or modify.
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
}

/// `{ name, strategy, tasks }` (spec §3 `Plan`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Plan {
    pub name: String,
    #[serde(default)]
    pub strategy: Option<String>,
    pub tasks: Vec<Task>,
}

impl Plan {
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }
}
