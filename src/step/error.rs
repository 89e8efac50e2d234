// ABOUTME: Error type returned by step execution.
// ABOUTME: Every failure inside a step surfaces as one of these, never as a panic.

use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;

/// Longest stderr excerpt carried in an exit status error.
const STDERR_EXCERPT: usize = 512;

#[derive(Debug, Error)]
pub enum StepError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("no command configured for step {0}")]
    MissingCommand(String),

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("`{command}` failed with exit code {code}{}", excerpt(.stderr))]
    ExitStatus {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("`{command}` was terminated by a signal")]
    Terminated { command: String },

    #[error("step timed out after {0:?}")]
    Timeout(Duration),

    #[error("step was cancelled")]
    Cancelled,

    #[error("step panicked: {0}")]
    Panicked(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StepError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StepError::Cancelled)
    }
}

fn excerpt(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let start = trimmed
        .char_indices()
        .rev()
        .nth(STDERR_EXCERPT - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    format!(": {}", &trimmed[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_status_mentions_code_and_stderr() {
        let err = StepError::ExitStatus {
            command: "exit 1".to_string(),
            code: 1,
            stderr: "boom\n".to_string(),
        };
        assert_eq!(err.to_string(), "`exit 1` failed with exit code 1: boom");
    }

    #[test]
    fn exit_status_without_stderr() {
        let err = StepError::ExitStatus {
            command: "false".to_string(),
            code: 1,
            stderr: "  ".to_string(),
        };
        assert_eq!(err.to_string(), "`false` failed with exit code 1");
    }

    #[test]
    fn long_stderr_keeps_tail() {
        let stderr = format!("{}END", "x".repeat(2000));
        let err = StepError::ExitStatus {
            command: "build".to_string(),
            code: 2,
            stderr,
        };
        let message = err.to_string();
        assert!(message.ends_with("END"));
        assert!(message.len() < 600);
    }

    #[test]
    fn timeout_is_human_readable() {
        assert_eq!(
            StepError::Timeout(Duration::from_secs(90)).to_string(),
            "step timed out after 90s"
        );
    }
}
