// ABOUTME: Build, test, and deploy steps: each runs one shell command.
// ABOUTME: Output is captured into the step result; non-zero exit fails the step.

use async_trait::async_trait;

use super::{Step, StepContext, StepError, StepKind, StepOutput};
use crate::config::DeploymentConfig;
use crate::deploy::{DeploymentStatus, Phase};
use crate::process::run_shell;

#[derive(Debug, Clone, Copy)]
pub struct CommandStep {
    kind: StepKind,
}

impl CommandStep {
    pub fn new(kind: StepKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Step for CommandStep {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn description(&self) -> &str {
        self.kind.description()
    }

    fn status(&self) -> DeploymentStatus {
        self.kind.status()
    }

    fn phase(&self) -> Phase {
        self.kind.phase()
    }

    fn command(&self, deployment: Option<&DeploymentConfig>) -> Option<String> {
        self.kind.resolve_command(deployment)
    }

    #[tracing::instrument(skip_all, fields(step = %self.kind))]
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let command = ctx
            .command
            .as_deref()
            .ok_or_else(|| StepError::MissingCommand(self.kind.name().to_string()))?;

        tracing::info!(command, "running {} command", self.kind);

        let output = run_shell(command, &ctx.working_dir, &ctx.process_env(), ctx.timeout, &ctx.cancel)
            .await?
            .into_result()?;

        Ok(StepOutput::new(format!("{} succeeded", self.kind.description()))
            .with_data("command", output.command)
            .with_data("stdout", output.stdout)
            .with_data("stderr", output.stderr)
            .with_data("exit_code", output.exit_code)
            .with_data("duration_ms", output.duration.as_millis() as u64))
    }
}
