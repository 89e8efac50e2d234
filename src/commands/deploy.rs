// ABOUTME: Deploy command implementation.
// ABOUTME: Starts the workflow through the orchestrator, reports events, and aborts on Ctrl-C.

use super::plan::print_plan;
use rollout::config::{Config, ConfigError};
use rollout::deploy::{DeploymentOrchestrator, EventKind, WorkflowEvent, WorkflowResult};
use rollout::error::{Error, Result};
use rollout::output::Output;
use rollout::types::WorkflowId;
use std::collections::BTreeSet;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

pub struct DeployOptions {
    pub project: Option<String>,
    pub skip_steps: BTreeSet<usize>,
    pub dry_run: bool,
    pub id: Option<String>,
}

pub async fn deploy(config: Config, options: DeployOptions, mut output: Output) -> Result<()> {
    if let Some(requested) = &options.project
        && requested != &config.project.name
    {
        return Err(Error::ProjectMismatch {
            requested: requested.clone(),
            configured: config.project.name.clone(),
        });
    }

    if let Some(problem) = config.problems().into_iter().next() {
        return Err(problem.into());
    }

    if options.dry_run {
        print_plan(&config, &options.skip_steps, &output)?;
        output.success("Dry run: nothing was executed");
        return Ok(());
    }

    // Reject bad skip positions before anything runs.
    super::plan::plan(&config, &options.skip_steps)?;

    let id = workflow_id(options.id.as_deref(), &config.project.name)?;
    let name = config.project.name.clone();

    output.start_timer();
    output.progress(&format!("Deploying {name} ({id})"));

    let orchestrator = DeploymentOrchestrator::new();
    let mut events = orchestrator.subscribe();
    orchestrator.start_deployment_with(id.clone(), &name, config, options.skip_steps)?;

    let wait = orchestrator.wait_for(&id);
    tokio::pin!(wait);
    let mut aborting = false;

    let result = loop {
        tokio::select! {
            result = &mut wait => break result,
            event = events.recv() => match event {
                Ok(event) => report(&output, &event),
                Err(RecvError::Lagged(missed)) => tracing::debug!(missed, "event receiver lagged"),
                Err(RecvError::Closed) => {}
            },
            _ = tokio::signal::ctrl_c(), if !aborting => {
                aborting = true;
                output.warning("Interrupted, aborting deployment...");
                if let Err(e) = orchestrator.abort_deployment(&id) {
                    tracing::debug!(error = %e, "deployment not aborted");
                }
            }
        }
    };

    // Events emitted just before the outcome settled.
    loop {
        match events.try_recv() {
            Ok(event) => report(&output, &event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }

    let result = result.ok_or_else(|| Error::Deploy(format!("deployment {id} was not registered")))?;
    finish(&output, &id, result)
}

/// Longest project slug kept in a generated id, leaving room for the timestamp.
const ID_SLUG_LEN: usize = 64;

fn workflow_id(requested: Option<&str>, project: &str) -> Result<WorkflowId> {
    let raw = match requested {
        Some(id) => id.to_string(),
        None => {
            let slug: String = project
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
                .take(ID_SLUG_LEN)
                .collect();
            format!("{slug}-{}", chrono::Utc::now().format("%Y%m%d%H%M%S"))
        }
    };

    WorkflowId::new(&raw).map_err(|e| Error::Config(ConfigError::InvalidWorkflowId(e.to_string())))
}

fn report(output: &Output, event: &WorkflowEvent) {
    output.record(event);

    let step = event.step_name.as_deref().unwrap_or_default();
    let detail = event.message.as_deref().unwrap_or_default();
    let line = match event.kind {
        EventKind::StepStarted => format!("  → {step}..."),
        EventKind::StepCompleted => format!("  ✓ {step} ({:.0}%)", event.progress * 100.0),
        EventKind::StepFailed => format!("  ✗ {step}: {detail}"),
        EventKind::StepSkipped => format!("  - {step} (skipped)"),
        EventKind::RollbackStarted => "  → Rolling back...".to_string(),
        EventKind::RollbackFinished if event.message.is_none() => "  ✓ Rollback complete".to_string(),
        EventKind::RollbackFinished => format!("  ✗ Rollback failed: {detail}"),
        EventKind::Started | EventKind::Completed | EventKind::Failed | EventKind::Aborted => return,
    };
    output.progress(&line);
}

fn finish(output: &Output, id: &WorkflowId, result: WorkflowResult) -> Result<()> {
    output.record(&result);

    if let Some(warnings) = result.data.get("warnings").and_then(|w| w.as_array()) {
        for warning in warnings {
            if let Some(message) = warning.get("message").and_then(|m| m.as_str()) {
                output.warning(message);
            }
        }
    }

    if result.success {
        output.success(&format!("Deployment {id} completed"));
        return Ok(());
    }

    if let Some(rollback) = result.rollback_result() {
        match (rollback.success, rollback.backup_id) {
            (true, Some(backup)) => output.progress(&format!("Restored backup {backup}")),
            _ => output.warning(&format!(
                "Rollback did not restore a backup: {}",
                rollback.error.unwrap_or_default()
            )),
        }
    }

    Err(Error::Deploy(result.error.unwrap_or(result.message)))
}
