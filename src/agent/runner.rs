// src/agent/runner.rs

//! Driving external code-generation agents inside a task's workspace
//! (spec §4.3).

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::errors::{DagforgeError, Result};
use crate::plan::Task;
use crate::workspace::{WorkspaceHandle, WorktreePool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

/// Result of one `AgentRunner::execute` call (spec §3/§4.3 `TaskOutcome`).
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub status: AgentStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub files_touched: Vec<String>,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        self.status == AgentStatus::Completed
    }
}

/// Port to an external code-generation agent.
///
/// Modeled on `ExecutorBackend` in the same corpus: a boxed future so the
/// trait stays dyn-compatible, letting production code use
/// `ProcessAgentRunner` and tests swap in a fake that never spawns a
/// process.
pub trait AgentRunner: Send + Sync {
    fn execute<'a>(
        &'a self,
        task: &'a Task,
        workspace: &'a WorkspaceHandle,
        timeout_dur: Duration,
        cancel: watch::Receiver<bool>,
    ) -> Pin<Box<dyn Future<Output = Result<TaskOutcome>> + Send + 'a>>;
}

/// Production `AgentRunner`: spawns `agent_binary` with cwd = the
/// workspace path, pipes the task description on stdin, and streams
/// stdout/stderr without blocking on either (spec §4.3).
pub struct ProcessAgentRunner {
    agent_binary: String,
    pool: std::sync::Arc<WorktreePool>,
}

impl ProcessAgentRunner {
    pub fn new(agent_binary: impl Into<String>, pool: std::sync::Arc<WorktreePool>) -> Self {
        Self {
            agent_binary: agent_binary.into(),
            pool,
        }
    }
}

impl AgentRunner for ProcessAgentRunner {
    fn execute<'a>(
        &'a self,
        task: &'a Task,
        workspace: &'a WorkspaceHandle,
        timeout_dur: Duration,
        mut cancel: watch::Receiver<bool>,
    ) -> Pin<Box<dyn Future<Output = Result<TaskOutcome>> + Send + 'a>> {
        Box::pin(async move {
            info!(task = %task.id, binary = %self.agent_binary, "spawning agent process");

            let mut cmd = Command::new(&self.agent_binary);
            cmd.current_dir(&workspace.absolute_path)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            let mut child = cmd.spawn().map_err(|e| DagforgeError::AgentExecution {
                task: task.id.clone(),
                message: format!("failed to spawn agent binary '{}': {e}", self.agent_binary),
            })?;

            if let Some(mut stdin) = child.stdin.take() {
                if let Err(e) = stdin.write_all(task.description.as_bytes()).await {
                    warn!(task = %task.id, error = %e, "failed writing task description to agent stdin");
                }
            }

            let stdout_pipe = child.stdout.take();
            let stderr_pipe = child.stderr.take();
            let stdout_task = tokio::spawn(async move {
                let mut buf = Vec::new();
                if let Some(mut s) = stdout_pipe {
                    let _ = s.read_to_end(&mut buf).await;
                }
                buf
            });
            let stderr_task = tokio::spawn(async move {
                let mut buf = Vec::new();
                if let Some(mut s) = stderr_pipe {
                    let _ = s.read_to_end(&mut buf).await;
                }
                buf
            });

            let exit_status = loop {
                tokio::select! {
                    res = timeout(timeout_dur, child.wait()) => {
                        match res {
                            Ok(Ok(status)) => break status,
                            Ok(Err(e)) => {
                                return Err(DagforgeError::AgentExecution {
                                    task: task.id.clone(),
                                    message: e.to_string(),
                                });
                            }
                            Err(_) => {
                                debug!(task = %task.id, "agent timed out, process killed on drop");
                                return Ok(TaskOutcome {
                                    status: AgentStatus::Timeout,
                                    exit_code: None,
                                    stdout: String::new(),
                                    stderr: String::new(),
                                    files_touched: Vec::new(),
                                });
                            }
                        }
                    }
                    changed = cancel.changed() => {
                        if changed.is_err() || *cancel.borrow() {
                            info!(task = %task.id, "cancellation requested, killing agent process");
                            return Ok(TaskOutcome {
                                status: AgentStatus::Cancelled,
                                exit_code: None,
                                stdout: String::new(),
                                stderr: String::new(),
                                files_touched: Vec::new(),
                            });
                        }
                        // Spurious wakeup (watch still false): loop back and
                        // keep waiting on the child with the same deadline.
                    }
                }
            };

            let stdout_bytes = stdout_task.await.unwrap_or_default();
            let stderr_bytes = stderr_task.await.unwrap_or_default();
            let output = std::process::Output {
                status: exit_status,
                stdout: stdout_bytes,
                stderr: stderr_bytes,
            };

            let files_touched = self.pool.files_touched(workspace).await?;
            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            let exit_code = output.status.code();
            let status = if output.status.success() {
                AgentStatus::Completed
            } else {
                AgentStatus::Failed
            };

            info!(
                task = %task.id,
                exit_code,
                success = output.status.success(),
                "agent process exited"
            );

            Ok(TaskOutcome {
                status,
                exit_code,
                stdout,
                stderr,
                files_touched,
            })
        })
    }
}
