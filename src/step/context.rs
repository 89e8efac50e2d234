// ABOUTME: Immutable execution context handed to each step.
// ABOUTME: Carries the resolved command, environment, timeout, and cancellation token.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::deploy::CancelToken;

/// Timeout used when a workflow has no configuration bound.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct StepContext {
    /// 1-based position of the step in the workflow.
    pub step_index: usize,
    pub step_name: String,
    pub command: Option<String>,
    pub config: Option<Arc<Config>>,
    pub working_dir: PathBuf,
    pub env: HashMap<String, String>,
    pub timeout: Duration,
    pub cancel: CancelToken,
}

impl StepContext {
    /// Context with no configuration, running in the current directory.
    pub fn detached(step_index: usize, step_name: impl Into<String>, cancel: CancelToken) -> Self {
        Self {
            step_index,
            step_name: step_name.into(),
            command: None,
            config: None,
            working_dir: PathBuf::from("."),
            env: HashMap::new(),
            timeout: DEFAULT_STEP_TIMEOUT,
            cancel,
        }
    }

    /// Variables exported to step commands on top of the configured environment.
    pub fn process_env(&self) -> HashMap<String, String> {
        let mut env = self.env.clone();
        env.insert("ROLLOUT_STEP".to_string(), self.step_name.clone());
        env.insert("ROLLOUT_STEP_INDEX".to_string(), self.step_index.to_string());
        if let Some(config) = &self.config {
            env.insert("ROLLOUT_PROJECT".to_string(), config.project.name.clone());
            if let Some(version) = &config.project.version {
                env.insert("ROLLOUT_VERSION".to_string(), version.clone());
            }
        }
        env
    }
}
