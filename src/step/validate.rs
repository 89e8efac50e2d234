// ABOUTME: Step 1: structural checks of the bound configuration and deployment target.
// ABOUTME: Runs the optional validation_command once the checks pass.

use async_trait::async_trait;

use super::{Step, StepContext, StepError, StepKind, StepOutput};
use crate::config::DeploymentConfig;
use crate::deploy::{DeploymentStatus, Phase};
use crate::process::run_shell;

#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateStep;

#[async_trait]
impl Step for ValidateStep {
    fn name(&self) -> &str {
        StepKind::Validate.name()
    }

    fn description(&self) -> &str {
        StepKind::Validate.description()
    }

    fn status(&self) -> DeploymentStatus {
        StepKind::Validate.status()
    }

    fn phase(&self) -> Phase {
        StepKind::Validate.phase()
    }

    fn command(&self, deployment: Option<&DeploymentConfig>) -> Option<String> {
        StepKind::Validate.resolve_command(deployment)
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let config = ctx
            .config
            .as_ref()
            .ok_or_else(|| StepError::Validation("no configuration data provided".to_string()))?;

        let problems = config.problems();
        if !problems.is_empty() {
            let summary = problems
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(StepError::Validation(summary));
        }

        let mut output = StepOutput::new(format!("Configuration for {} is valid", config.project.name))
            .with_data("project", config.project.name.as_str())
            .with_data("working_dir", ctx.working_dir.display().to_string());

        if let Some(command) = &ctx.command {
            let result = run_shell(command, &ctx.working_dir, &ctx.process_env(), ctx.timeout, &ctx.cancel)
                .await?
                .into_result()?;
            output = output
                .with_data("command", result.command)
                .with_data("stdout", result.stdout)
                .with_data("stderr", result.stderr)
                .with_data("exit_code", result.exit_code);
        }

        tracing::debug!(project = %config.project.name, "configuration validated");
        Ok(output)
    }
}
