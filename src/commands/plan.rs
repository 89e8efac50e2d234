// ABOUTME: Step plan rendering shared by the steps command and deploy --dry-run.
// ABOUTME: Lists each configured step with its command, status, and backup phase.

use rollout::config::Config;
use rollout::deploy::{DeploymentStatus, Phase};
use rollout::error::{Error, Result};
use rollout::output::Output;
use rollout::step::plan_steps;
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Serialize)]
pub struct PlannedStep {
    pub position: usize,
    pub index: u8,
    pub name: &'static str,
    pub status: DeploymentStatus,
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub skipped: bool,
}

/// Resolve the configured steps, marking skipped positions.
pub fn plan(config: &Config, skip: &BTreeSet<usize>) -> Result<Vec<PlannedStep>> {
    let kinds = plan_steps(&config.deployment.steps)?;
    let total = kinds.len();

    if let Some(&position) = skip.iter().find(|&&p| p == 0 || p > total) {
        return Err(Error::InvalidSkip { position, total });
    }

    Ok(kinds
        .into_iter()
        .enumerate()
        .map(|(i, kind)| PlannedStep {
            position: i + 1,
            index: kind.index(),
            name: kind.name(),
            status: kind.status(),
            phase: kind.phase(),
            command: kind.resolve_command(Some(&config.deployment)),
            skipped: skip.contains(&(i + 1)),
        })
        .collect())
}

/// Phases that would hold a backup point, in the order rollback tries them.
fn rollback_order(config: &Config, steps: &[PlannedStep]) -> Vec<Phase> {
    if !config.backup.enabled {
        return Vec::new();
    }

    let mut phases = BTreeSet::from([Phase::PreDeployment]);
    if config.backup.per_phase {
        phases.extend(steps.iter().filter(|s| !s.skipped).map(|s| s.phase));
    }
    phases.into_iter().rev().collect()
}

pub fn print_plan(config: &Config, skip: &BTreeSet<usize>, output: &Output) -> Result<()> {
    let steps = plan(config, skip)?;

    output.progress(&format!("Deployment plan for {}:", config.project.name));
    for step in &steps {
        let marker = if step.skipped { "-" } else { "→" };
        let command = step.command.as_deref().unwrap_or("(checks only)");
        output.progress(&format!(
            "  {marker} {}. {:<8} [{}] {}",
            step.position, step.name, step.phase, command
        ));
        output.record(step);
    }

    let order = rollback_order(config, &steps);
    if order.is_empty() {
        output.progress("Backups: disabled");
    } else {
        let names: Vec<_> = order.iter().map(|p| p.as_str()).collect();
        output.progress(&format!("Rollback order: {}", names.join(", ")));
    }

    Ok(())
}

pub fn steps(config: &Config, output: &Output) -> Result<()> {
    print_plan(config, &BTreeSet::new(), output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_marks_skipped_positions() {
        let config = Config::template();
        let steps = plan(&config, &BTreeSet::from([2])).unwrap();

        assert_eq!(steps.len(), 4);
        assert_eq!(steps[1].name, "test");
        assert!(steps[1].skipped);
        assert!(!steps[0].skipped);
        assert_eq!(steps[3].command.as_deref(), Some("./deploy.sh production"));
    }

    #[test]
    fn skip_beyond_plan_is_rejected() {
        let config = Config::template();
        let err = plan(&config, &BTreeSet::from([5])).unwrap_err();
        assert!(matches!(err, Error::InvalidSkip { position: 5, total: 4 }));
    }

    #[test]
    fn rollback_order_walks_latest_phase_first() {
        let mut config = Config::template();
        config.backup.per_phase = true;
        let steps = plan(&config, &BTreeSet::new()).unwrap();

        assert_eq!(
            rollback_order(&config, &steps),
            [Phase::PostDeployment, Phase::MainDeployment, Phase::PreDeployment]
        );
    }

    #[test]
    fn rollback_order_empty_without_backups() {
        let mut config = Config::template();
        config.backup.enabled = false;
        let steps = plan(&config, &BTreeSet::new()).unwrap();
        assert!(rollback_order(&config, &steps).is_empty());
    }
}
