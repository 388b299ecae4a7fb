// src/workspace/mod.rs

//! Per-task git worktree isolation (spec §3 `WorkspaceHandle`, §4.3 `WorktreePool`).

pub mod pool;

pub use pool::{WorkspaceHandle, WorktreePool};
