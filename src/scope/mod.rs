// src/scope/mod.rs

//! File-scope declaration and enforcement (spec §3 `files`, §4.5).

pub mod guard;

pub use guard::{FileScopeGuard, ValidationReport, Violation, ViolationKind};
