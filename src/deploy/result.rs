// ABOUTME: Serializable result records for steps, workflows, and rollbacks.
// ABOUTME: These are the stable shapes handed to callers and embedded in state snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::backup::Phase;
use super::state::DeploymentState;
use super::status::DeploymentStatus;
use crate::step::{StepError, StepOutput};

/// Outcome of one step execution as recorded in the deployment state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    pub status: DeploymentStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl StepResult {
    pub fn succeeded(status: DeploymentStatus, output: StepOutput) -> Self {
        Self {
            success: true,
            status,
            message: output.message,
            error: None,
            data: (!output.data.is_empty()).then_some(output.data),
        }
    }

    pub fn failed(step_index: usize, step_name: &str, error: &StepError) -> Self {
        Self {
            success: false,
            status: DeploymentStatus::Failed,
            message: format!("Step {step_index} ({step_name}) failed"),
            error: Some(error.to_string()),
            data: None,
        }
    }
}

/// Outcome of restoring from a backup point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl RollbackResult {
    pub fn restored(phase: Phase, backup_id: impl Into<String>) -> Self {
        Self {
            success: true,
            phase: Some(phase),
            backup_id: Some(backup_id.into()),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(phase: Option<Phase>, backup_id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            phase,
            backup_id,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Terminal summary of a workflow run, or an orchestrator acknowledgement.
///
/// `data` carries the flattened `DeploymentState` snapshot for workflow
/// outcomes, plus `rollback_executed`/`rollback_result` when a rollback was
/// attempted and `workflow_id` on orchestrator responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub success: bool,
    pub status: DeploymentStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl WorkflowResult {
    /// Build a result whose status and error mirror the given state.
    pub fn from_state(state: &DeploymentState, message: impl Into<String>) -> Self {
        Self {
            success: state.status() == DeploymentStatus::Completed,
            status: state.status(),
            message: message.into(),
            error: state.error().map(str::to_string),
            data: state_data(state),
        }
    }

    pub fn failure(
        status: DeploymentStatus,
        message: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            status,
            message: message.into(),
            error: Some(error.into()),
            data: Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Serialize) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.data.insert(key.to_string(), value);
        }
        self
    }

    /// Reconstruct the embedded state snapshot, if this result carries one.
    pub fn state(&self) -> Option<DeploymentState> {
        if !self.data.contains_key("status") {
            return None;
        }
        serde_json::from_value(Value::Object(self.data.clone())).ok()
    }

    pub fn rollback_executed(&self) -> bool {
        self.data
            .get("rollback_executed")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn rollback_result(&self) -> Option<RollbackResult> {
        self.data
            .get("rollback_result")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }
}

fn state_data(state: &DeploymentState) -> Map<String, Value> {
    match serde_json::to_value(state) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}
