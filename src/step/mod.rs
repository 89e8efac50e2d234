// ABOUTME: The step abstraction and the canonical step kinds of a deployment.
// ABOUTME: A closed StepKind enum with an exhaustive factory maps indices 1-5 to steps.

mod command;
mod context;
mod error;
mod output;
mod validate;

pub use command::CommandStep;
pub use context::{DEFAULT_STEP_TIMEOUT, StepContext};
pub use error::StepError;
pub use output::StepOutput;
pub use validate::ValidateStep;

use async_trait::async_trait;
use nonempty::NonEmpty;
use std::fmt;
use std::sync::Arc;

use crate::config::{ConfigError, DeploymentConfig, validate_step_indices};
use crate::deploy::{DeploymentStatus, Phase};

/// One unit of work in a deployment workflow.
///
/// Steps are stateless templates. They never touch the deployment state and
/// report every failure through `Err(StepError)`.
#[async_trait]
pub trait Step: Send + Sync + fmt::Debug {
    /// Unique within a workflow.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Status the workflow enters while this step runs.
    fn status(&self) -> DeploymentStatus;

    /// Phase whose backup point guards this step.
    fn phase(&self) -> Phase {
        Phase::PreDeployment
    }

    /// Command this step runs under the given deployment settings, if any.
    fn command(&self, _deployment: Option<&DeploymentConfig>) -> Option<String> {
        None
    }

    async fn execute(&self, ctx: &StepContext) -> Result<StepOutput, StepError>;
}

/// Which of the two deploy invocations a Deploy step is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeployTarget {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    Validate,
    Build,
    Test,
    Deploy(DeployTarget),
}

impl StepKind {
    pub const ALL: [StepKind; 5] = [
        StepKind::Validate,
        StepKind::Build,
        StepKind::Test,
        StepKind::Deploy(DeployTarget::Primary),
        StepKind::Deploy(DeployTarget::Secondary),
    ];

    pub fn from_index(index: u8) -> Option<StepKind> {
        match index {
            1 => Some(StepKind::Validate),
            2 => Some(StepKind::Build),
            3 => Some(StepKind::Test),
            4 => Some(StepKind::Deploy(DeployTarget::Primary)),
            5 => Some(StepKind::Deploy(DeployTarget::Secondary)),
            _ => None,
        }
    }

    pub fn index(self) -> u8 {
        match self {
            StepKind::Validate => 1,
            StepKind::Build => 2,
            StepKind::Test => 3,
            StepKind::Deploy(DeployTarget::Primary) => 4,
            StepKind::Deploy(DeployTarget::Secondary) => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StepKind::Validate => "validate",
            StepKind::Build => "build",
            StepKind::Test => "test",
            StepKind::Deploy(DeployTarget::Primary) => "deploy",
            StepKind::Deploy(DeployTarget::Secondary) => "release",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            StepKind::Validate => "Validate configuration and deployment target",
            StepKind::Build => "Build the project",
            StepKind::Test => "Run the test suite",
            StepKind::Deploy(DeployTarget::Primary) => "Deploy the project",
            StepKind::Deploy(DeployTarget::Secondary) => "Release the deployed project",
        }
    }

    pub fn status(self) -> DeploymentStatus {
        match self {
            StepKind::Validate => DeploymentStatus::Validating,
            StepKind::Build => DeploymentStatus::Building,
            StepKind::Test => DeploymentStatus::Testing,
            StepKind::Deploy(_) => DeploymentStatus::Deploying,
        }
    }

    pub fn phase(self) -> Phase {
        Phase::for_step_index(self.index())
    }

    pub fn default_command(self) -> Option<&'static str> {
        match self {
            StepKind::Validate => None,
            StepKind::Build => Some("cargo build --release"),
            StepKind::Test => Some("cargo test"),
            StepKind::Deploy(_) => Some("./deploy.sh"),
        }
    }

    /// Configured command, falling back to the release then default command.
    pub fn resolve_command(self, deployment: Option<&DeploymentConfig>) -> Option<String> {
        let configured = deployment.and_then(|d| match self {
            StepKind::Validate => d.validation_command.clone(),
            StepKind::Build => d.build_command.clone(),
            StepKind::Test => d.test_command.clone(),
            StepKind::Deploy(DeployTarget::Primary) => d.deploy_command.clone(),
            StepKind::Deploy(DeployTarget::Secondary) => d
                .release_command
                .clone()
                .or_else(|| d.deploy_command.clone()),
        });

        configured.or_else(|| self.default_command().map(str::to_string))
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Build the step implementing `kind`.
pub fn create_step(kind: StepKind) -> Arc<dyn Step> {
    match kind {
        StepKind::Validate => Arc::new(ValidateStep),
        StepKind::Build | StepKind::Test | StepKind::Deploy(_) => Arc::new(CommandStep::new(kind)),
    }
}

pub fn create_step_for_index(index: u8) -> Option<Arc<dyn Step>> {
    StepKind::from_index(index).map(create_step)
}

/// Turn configured indices into an ordered, non-empty step plan.
pub fn plan_steps(indices: &[u8]) -> Result<NonEmpty<StepKind>, ConfigError> {
    validate_step_indices(indices)?;

    let kinds = indices
        .iter()
        .map(|&i| StepKind::from_index(i).ok_or(ConfigError::InvalidStepIndex(i)))
        .collect::<Result<Vec<_>, _>>()?;

    NonEmpty::from_vec(kinds).ok_or(ConfigError::NoSteps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_round_trips_for_every_kind() {
        for kind in StepKind::ALL {
            assert_eq!(StepKind::from_index(kind.index()), Some(kind));
        }
    }

    #[test]
    fn unknown_index_yields_no_step() {
        assert!(StepKind::from_index(0).is_none());
        assert!(StepKind::from_index(6).is_none());
        assert!(create_step_for_index(9).is_none());
    }

    #[test]
    fn canonical_names_are_unique() {
        let mut names: Vec<_> = StepKind::ALL.iter().map(|k| k.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), StepKind::ALL.len());
    }

    #[test]
    fn deploy_steps_share_status_but_not_phase() {
        let primary = StepKind::Deploy(DeployTarget::Primary);
        let secondary = StepKind::Deploy(DeployTarget::Secondary);
        assert_eq!(primary.status(), secondary.status());
        assert_eq!(primary.phase(), Phase::MainDeployment);
        assert_eq!(secondary.phase(), Phase::PostDeployment);
    }

    #[test]
    fn release_command_falls_back_to_deploy_command() {
        let deployment = DeploymentConfig {
            deploy_command: Some("./ship.sh".to_string()),
            ..DeploymentConfig::default()
        };
        let release = StepKind::Deploy(DeployTarget::Secondary);
        assert_eq!(
            release.resolve_command(Some(&deployment)).as_deref(),
            Some("./ship.sh")
        );

        assert_eq!(
            StepKind::Build.resolve_command(None).as_deref(),
            Some("cargo build --release")
        );
        assert_eq!(StepKind::Validate.resolve_command(None), None);
    }

    #[test]
    fn plan_preserves_configured_order() {
        let plan = plan_steps(&[1, 3, 4, 5]).unwrap();
        let names: Vec<_> = plan.iter().map(|k| k.name()).collect();
        assert_eq!(names, ["validate", "test", "deploy", "release"]);
    }

    #[test]
    fn plan_rejects_invalid_indices() {
        assert_eq!(plan_steps(&[1, 7]), Err(ConfigError::InvalidStepIndex(7)));
        assert_eq!(plan_steps(&[]), Err(ConfigError::NoSteps));
    }

    #[test]
    fn factory_builds_named_steps() {
        let step = create_step(StepKind::Test);
        assert_eq!(step.name(), "test");
        assert_eq!(step.status(), DeploymentStatus::Testing);
    }
}
