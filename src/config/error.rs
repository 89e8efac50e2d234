// ABOUTME: Configuration error types.
// ABOUTME: Raised before any step runs, so a bad config never starts a workflow.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("project name is required")]
    EmptyProjectName,

    #[error("no deployment steps configured")]
    NoSteps,

    #[error("invalid step index {0}: expected a subset of [1, 2, 3, 4, 5]")]
    InvalidStepIndex(u8),

    #[error("step {next} cannot follow step {previous}: steps must be strictly increasing")]
    StepOrder { previous: u8, next: u8 },

    #[error("duplicate step name: {0}")]
    DuplicateStepName(String),

    #[error("{key} is set but blank")]
    BlankCommand { key: &'static str },

    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("working directory does not exist: {0}")]
    WorkingDirMissing(PathBuf),

    #[error("backup directory {backup} contains the working directory {working}")]
    BackupDirContainsWorkingDir { backup: PathBuf, working: PathBuf },

    #[error("invalid backup exclude pattern '{pattern}': {reason}")]
    InvalidExcludePattern { pattern: String, reason: String },

    #[error("invalid workflow id: {0}")]
    InvalidWorkflowId(String),
}
