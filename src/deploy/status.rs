// ABOUTME: Deployment status enumeration and its ordering rules.
// ABOUTME: Terminal statuses are sticky; in-progress statuses only move forward.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    #[default]
    Pending,
    Validating,
    Building,
    Testing,
    Deploying,
    Completed,
    Failed,
    Aborted,
}

impl DeploymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeploymentStatus::Completed | DeploymentStatus::Failed | DeploymentStatus::Aborted
        )
    }

    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            DeploymentStatus::Validating
                | DeploymentStatus::Building
                | DeploymentStatus::Testing
                | DeploymentStatus::Deploying
        )
    }

    /// Position in the forward walk. All terminal statuses share the last rank.
    pub fn rank(self) -> u8 {
        match self {
            DeploymentStatus::Pending => 0,
            DeploymentStatus::Validating => 1,
            DeploymentStatus::Building => 2,
            DeploymentStatus::Testing => 3,
            DeploymentStatus::Deploying => 4,
            DeploymentStatus::Completed | DeploymentStatus::Failed | DeploymentStatus::Aborted => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Validating => "validating",
            DeploymentStatus::Building => "building",
            DeploymentStatus::Testing => "testing",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Completed => "completed",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Aborted => "aborted",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
