// ABOUTME: Application-wide error types for rollout.
// ABOUTME: Uses thiserror for ergonomic error handling.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::deploy::OrchestrationError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("configuration file not found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("project name mismatch: requested '{requested}', configured '{configured}'")]
    ProjectMismatch {
        requested: String,
        configured: String,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("orchestration error: {0}")]
    Orchestration(#[from] OrchestrationError),

    #[error("cannot skip step {position}: the workflow has {total} steps")]
    InvalidSkip { position: usize, total: usize },

    #[error("deployment failed: {0}")]
    Deploy(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
