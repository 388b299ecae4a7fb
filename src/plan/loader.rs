// src/plan/loader.rs

use std::path::Path;

use crate::errors::{DagforgeError, Result};
use crate::plan::model::Plan;
use crate::plan::validate::{self, ValidatedPlan};

/// Parse a `Plan` document. Accepted in JSON or YAML (spec §6), selected by
/// the file extension; falls back to trying both parsers for an unknown or
/// missing extension so a pipe or an extensionless temp file still works.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Plan> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)?;

    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&contents)
            .map_err(|e| DagforgeError::PlanFormat(format!("invalid JSON plan: {e}"))),
        Some("yaml") | Some("yml") => serde_yaml::from_str(&contents)
            .map_err(|e| DagforgeError::PlanFormat(format!("invalid YAML plan: {e}"))),
        _ => serde_json::from_str(&contents)
            .or_else(|_| serde_yaml::from_str(&contents))
            .map_err(|_| {
                DagforgeError::PlanFormat(
                    "plan document is neither valid JSON nor valid YAML".to_string(),
                )
            }),
    }
}

/// Load a plan from disk and run full semantic validation (spec §6: missing
/// dependency, cycle, duplicate id, unknown complexity all rejected here).
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ValidatedPlan> {
    let plan = load_from_path(path)?;
    validate::validate(plan)
}
