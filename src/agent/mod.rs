// src/agent/mod.rs

//! External code-generation agent adapter (spec §4.3 `AgentRunner`).

pub mod runner;

pub use runner::{AgentRunner, AgentStatus, ProcessAgentRunner, TaskOutcome};
