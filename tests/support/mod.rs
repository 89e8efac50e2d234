// ABOUTME: Test support utilities.
// ABOUTME: Provides scripted steps, config builders, and tracing setup for integration tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use rollout::config::Config;
use rollout::deploy::DeploymentStatus;
use rollout::step::{Step, StepContext, StepError, StepOutput};
use std::path::Path;
use std::sync::{Arc, Once};
use std::time::Duration;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env().add_directive("rollout=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Names of steps in the order they were invoked.
#[allow(dead_code)]
pub type Calls = Arc<Mutex<Vec<String>>>;

#[allow(dead_code)]
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Succeed,
    Fail,
    /// Block until the run is cancelled.
    Hang,
}

/// A step that records its invocation and does what its behavior says.
#[allow(dead_code)]
#[derive(Debug)]
pub struct ScriptedStep {
    name: String,
    status: DeploymentStatus,
    behavior: Behavior,
    calls: Calls,
}

#[allow(dead_code)]
impl ScriptedStep {
    pub fn new(name: &str, status: DeploymentStatus, behavior: Behavior, calls: &Calls) -> Arc<dyn Step> {
        Arc::new(Self {
            name: name.to_string(),
            status,
            behavior,
            calls: Arc::clone(calls),
        })
    }
}

#[async_trait]
impl Step for ScriptedStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "scripted test step"
    }

    fn status(&self) -> DeploymentStatus {
        self.status
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        self.calls.lock().push(self.name.clone());
        match self.behavior {
            Behavior::Succeed => Ok(StepOutput::new(format!("{} ok", self.name))
                .with_data("position", ctx.step_index as u64)),
            Behavior::Fail => Err(StepError::ExitStatus {
                command: format!("{}.sh", self.name),
                code: 1,
                stderr: "scripted failure".to_string(),
            }),
            Behavior::Hang => {
                ctx.cancel.cancelled().await;
                Err(StepError::Cancelled)
            }
        }
    }
}

/// The four canonical statuses used by scripted workflows, in pipeline order.
#[allow(dead_code)]
pub const PIPELINE: [(&str, DeploymentStatus); 4] = [
    ("validate", DeploymentStatus::Validating),
    ("build", DeploymentStatus::Building),
    ("test", DeploymentStatus::Testing),
    ("deploy", DeploymentStatus::Deploying),
];

/// Scripted steps for `PIPELINE`, with the given behavior per position.
#[allow(dead_code)]
pub fn pipeline(behaviors: [Behavior; 4], calls: &Calls) -> Vec<Arc<dyn Step>> {
    PIPELINE
        .iter()
        .zip(behaviors)
        .map(|((name, status), behavior)| ScriptedStep::new(name, *status, behavior, calls))
        .collect()
}

/// Parse `yaml` as a configuration rooted at `dir`.
#[allow(dead_code)]
pub fn config_in(dir: &Path, yaml: &str) -> Config {
    let mut config = Config::from_yaml(yaml).unwrap();
    config.base_dir = Some(dir.to_path_buf());
    config
}

/// Poll until `check` holds or `timeout` elapses.
#[allow(dead_code)]
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
