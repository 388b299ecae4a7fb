// src/errors.rs

//! Crate-wide error taxonomy (spec §7).

use thiserror::Error;

use crate::context::VcsMode;
use crate::scope::ViolationKind;

#[derive(Error, Debug)]
pub enum DagforgeError {
    #[error("plan invalid: {0}")]
    PlanInvalid(String),

    #[error("could not parse plan document: {0}")]
    PlanFormat(String),

    #[error("workspace error for task '{task}': {message}")]
    Workspace { task: String, message: String },

    #[error("agent execution failed for task '{task}': {message}")]
    AgentExecution { task: String, message: String },

    #[error("agent timed out for task '{task}' after {elapsed_ms}ms")]
    AgentTimeout { task: String, elapsed_ms: u64 },

    #[error("agent cancelled for task '{task}'")]
    AgentCancelled { task: String },

    #[error("scope violation for task '{task}': {kind:?} on '{path}'")]
    ScopeViolation {
        task: String,
        kind: ViolationKind,
        path: String,
    },

    #[error("commit failed for task '{task}': {message}")]
    Commit { task: String, message: String },

    #[error("stack conflict assembling '{branch}': {message}")]
    StackConflict { branch: String, message: String },

    #[error("vcs backend unavailable for mode {mode:?}: {message}")]
    BackendUnavailable { mode: VcsMode, message: String },

    #[error("vcs operation unsupported by backend: {0}")]
    Unsupported(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DagforgeError>;
