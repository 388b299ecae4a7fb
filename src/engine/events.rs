// src/engine/events.rs

//! Run event stream (spec §6): a multi-writer, single-reader, non-blocking
//! channel the same way the teacher models its `RuntimeEvent` sink, just
//! widened to the payloads this domain needs.

use tokio::sync::mpsc;

use crate::state::TaskState;

#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    TaskStateChanged {
        task: String,
        from: TaskState,
        to: TaskState,
    },
    AgentStdout {
        task: String,
        chunk: String,
    },
    AgentStderr {
        task: String,
        chunk: String,
    },
    WorkspaceCreated {
        task: String,
        path: String,
    },
    WorkspaceReleased {
        task: String,
    },
    CommitCreated {
        task: String,
        commit: String,
    },
    ConflictDetected {
        task: String,
        branch: String,
        message: String,
    },
    RunCompleted {
        overall_status: String,
    },
}

/// Non-blocking fan-out sink for [`RuntimeEvent`]s (spec §5 "event sink is
/// multi-writer single-reader, non-blocking").
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<RuntimeEvent>,
}

impl EventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RuntimeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Best-effort: a run must never stall because nobody is draining the
    /// event stream, so a dropped receiver is silently tolerated.
    pub fn emit(&self, event: RuntimeEvent) {
        let _ = self.tx.send(event);
    }
}
