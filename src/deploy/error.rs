// ABOUTME: Error types for backups and the multi-workflow orchestrator.
// ABOUTME: Orchestrator errors use SNAFU with a kind() accessor for programmatic handling.

use snafu::Snafu;
use std::path::PathBuf;

use super::result::WorkflowResult;
use super::status::DeploymentStatus;
use crate::config::ConfigError;
use crate::types::WorkflowId;

/// Errors from creating, restoring, or discarding backup points.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("failed to create backup of {source_dir}: {reason}")]
    Create { source_dir: PathBuf, reason: String },

    #[error("failed to restore backup {id}: {reason}")]
    Restore { id: String, reason: String },

    #[error("failed to discard backup {id}: {reason}")]
    Discard { id: String, reason: String },

    #[error("no rollback points available")]
    NoBackupPoint,

    #[error("backup cancelled")]
    Cancelled,

    #[error("backup task did not finish: {0}")]
    Join(String),
}

/// Unified error for orchestrator operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum OrchestrationError {
    #[snafu(display("deployment {id} is already running"))]
    AlreadyRunning { id: WorkflowId },

    #[snafu(display("no active deployment {id}"))]
    NotFound { id: WorkflowId },

    #[snafu(display("deployment {id} is already finishing"))]
    Finishing { id: WorkflowId },

    #[snafu(display("invalid configuration for deployment {id}: {source}"))]
    Configuration { id: WorkflowId, source: ConfigError },

    #[snafu(display("cannot start deployment {id} outside a tokio runtime"))]
    NoRuntime { id: WorkflowId },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestrationErrorKind {
    AlreadyRunning,
    NotFound,
    Finishing,
    Configuration,
    NoRuntime,
}

impl OrchestrationError {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> OrchestrationErrorKind {
        match self {
            OrchestrationError::AlreadyRunning { .. } => OrchestrationErrorKind::AlreadyRunning,
            OrchestrationError::NotFound { .. } => OrchestrationErrorKind::NotFound,
            OrchestrationError::Finishing { .. } => OrchestrationErrorKind::Finishing,
            OrchestrationError::Configuration { .. } => OrchestrationErrorKind::Configuration,
            OrchestrationError::NoRuntime { .. } => OrchestrationErrorKind::NoRuntime,
        }
    }

    pub fn workflow_id(&self) -> &WorkflowId {
        match self {
            OrchestrationError::AlreadyRunning { id }
            | OrchestrationError::NotFound { id }
            | OrchestrationError::Finishing { id }
            | OrchestrationError::Configuration { id, .. }
            | OrchestrationError::NoRuntime { id } => id,
        }
    }

    /// Render as a failed result for callers that want the uniform result shape.
    pub fn to_result(&self) -> WorkflowResult {
        WorkflowResult::failure(
            DeploymentStatus::Failed,
            format!("deployment {} was not changed", self.workflow_id()),
            self.to_string(),
        )
        .with_field("workflow_id", self.workflow_id().as_str())
    }
}
