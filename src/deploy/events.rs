// ABOUTME: Progress events emitted by workflows as they run.
// ABOUTME: Delivered over a tokio broadcast channel shared by all workflows of an orchestrator.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use super::status::DeploymentStatus;

/// Capacity of the orchestrator's event channel. Slow subscribers see `Lagged`.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Started,
    StepStarted,
    StepCompleted,
    StepFailed,
    StepSkipped,
    RollbackStarted,
    RollbackFinished,
    Completed,
    Failed,
    Aborted,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowEvent {
    /// Workflow name, or the orchestrator id when started through one.
    pub workflow: String,
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    pub status: DeploymentStatus,
    pub progress: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Optional sender half. Sending with no subscribers is not an error.
#[derive(Debug, Clone, Default)]
pub struct EventSink(Option<broadcast::Sender<WorkflowEvent>>);

impl EventSink {
    pub fn new(tx: broadcast::Sender<WorkflowEvent>) -> Self {
        Self(Some(tx))
    }

    pub fn disabled() -> Self {
        Self(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.0.is_some()
    }

    pub fn emit(&self, event: WorkflowEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(event);
        }
    }
}
