// ABOUTME: Mutable status record for a single workflow run.
// ABOUTME: All mutation goes through transition methods; terminal statuses are sticky.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::result::StepResult;
use super::status::DeploymentStatus;

/// Version of the serialized `DeploymentState` layout.
pub const STATE_SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    STATE_SCHEMA_VERSION
}

/// State of one deployment run.
///
/// Transitions return `false` and change nothing once the state is terminal,
/// so a late write from a cancelled task can never overwrite the outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentState {
    #[serde(default = "default_schema_version")]
    schema_version: u32,
    #[serde(default)]
    status: DeploymentStatus,
    #[serde(default)]
    current_step: Option<String>,
    #[serde(default)]
    completed_steps: Vec<String>,
    #[serde(default)]
    failed_steps: Vec<String>,
    #[serde(default)]
    step_results: BTreeMap<String, StepResult>,
    #[serde(default)]
    start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    total_steps: usize,
}

impl Default for DeploymentState {
    fn default() -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            status: DeploymentStatus::Pending,
            current_step: None,
            completed_steps: Vec::new(),
            failed_steps: Vec::new(),
            step_results: BTreeMap::new(),
            start_time: None,
            end_time: None,
            error: None,
            progress: 0.0,
            total_steps: 0,
        }
    }
}

impl DeploymentState {
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn status(&self) -> DeploymentStatus {
        self.status
    }

    pub fn current_step(&self) -> Option<&str> {
        self.current_step.as_deref()
    }

    pub fn completed_steps(&self) -> &[String] {
        &self.completed_steps
    }

    pub fn failed_steps(&self) -> &[String] {
        &self.failed_steps
    }

    pub fn step_results(&self) -> &BTreeMap<String, StepResult> {
        &self.step_results
    }

    pub fn step_result(&self, name: &str) -> Option<&StepResult> {
        self.step_results.get(name)
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Executable steps not yet completed or failed.
    pub fn remaining_steps(&self) -> usize {
        self.total_steps
            .saturating_sub(self.completed_steps.len() + self.failed_steps.len())
    }

    /// Record how many steps this run will execute. Only valid before the run starts.
    pub fn plan(&mut self, total_steps: usize) -> bool {
        if self.status != DeploymentStatus::Pending {
            return false;
        }
        self.total_steps = total_steps;
        true
    }

    /// Move to a new status and label the current activity.
    ///
    /// In-progress statuses never move backwards; a lower one only updates the label.
    pub fn update_status(&mut self, status: DeploymentStatus, current_step: impl Into<String>) -> bool {
        if self.is_terminal() {
            tracing::debug!(
                current = %self.status,
                requested = %status,
                "ignoring transition on terminal state"
            );
            return false;
        }

        self.current_step = Some(current_step.into());

        if status.rank() >= self.status.rank() {
            self.status = status;
        }

        let now = Utc::now();
        if status.is_in_progress() && self.start_time.is_none() {
            self.start_time = Some(now);
        }
        if status.is_terminal() {
            self.end_time.get_or_insert(now);
            if status == DeploymentStatus::Completed {
                self.progress = 1.0;
            }
        }

        true
    }

    pub fn mark_step_completed(&mut self, name: &str, result: StepResult) -> bool {
        if self.is_terminal() || self.is_recorded(name) {
            return false;
        }

        self.completed_steps.push(name.to_string());
        self.step_results.insert(name.to_string(), result);
        self.recompute_progress();
        true
    }

    pub fn mark_step_failed(&mut self, name: &str, result: StepResult) -> bool {
        if self.is_terminal() || self.is_recorded(name) {
            return false;
        }

        self.failed_steps.push(name.to_string());
        self.error = result.error.clone();
        self.step_results.insert(name.to_string(), result);
        self.status = DeploymentStatus::Failed;
        self.end_time.get_or_insert_with(Utc::now);
        true
    }

    /// Fail the run for a reason outside any single step.
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        let error = error.into();
        if !self.update_status(DeploymentStatus::Failed, error.clone()) {
            return false;
        }
        self.error = Some(error);
        true
    }

    /// Stop the run on request.
    pub fn abort(&mut self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        if !self.update_status(DeploymentStatus::Aborted, reason.clone()) {
            return false;
        }
        self.error = Some(reason);
        true
    }

    fn is_recorded(&self, name: &str) -> bool {
        self.completed_steps.iter().any(|s| s == name) || self.failed_steps.iter().any(|s| s == name)
    }

    fn recompute_progress(&mut self) {
        if self.total_steps == 0 {
            return;
        }
        let computed = (self.completed_steps.len() as f64 / self.total_steps as f64).min(1.0);
        self.progress = self.progress.max(computed);
    }
}
