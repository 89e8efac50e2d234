// ABOUTME: Sequential executor for one deployment run.
// ABOUTME: Wraps the steps in backup points, records results in state, rolls back on failure.

use futures::FutureExt;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::{BTreeSet, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

use super::backup::{BackupManager, BackupSettings, Phase};
use super::cancel::CancelToken;
use super::error::BackupError;
use super::events::{EventKind, EventSink, WorkflowEvent};
use super::result::{StepResult, WorkflowResult};
use super::state::DeploymentState;
use super::status::DeploymentStatus;
use crate::config::{Config, ConfigError, exclude_matcher, resolve_env_map};
use crate::diagnostics::{Diagnostics, Warning};
use crate::step::{Step, StepContext, StepError, create_step, plan_steps};

/// Error recorded when a run is stopped through its cancellation token.
pub const ABORT_REASON: &str = "aborted by caller";

pub struct DeploymentWorkflow {
    name: String,
    steps: Vec<Arc<dyn Step>>,
    config: Option<Arc<Config>>,
    backups: BackupSettings,
    rollback_on_failure: bool,
    state: Arc<RwLock<DeploymentState>>,
    events: EventSink,
    event_label: String,
    started: AtomicBool,
    outcome: watch::Sender<Option<WorkflowResult>>,
}

impl std::fmt::Debug for DeploymentWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentWorkflow")
            .field("name", &self.name)
            .field("steps", &self.step_names())
            .field("status", &self.state.read().status())
            .finish_non_exhaustive()
    }
}

impl DeploymentWorkflow {
    /// Workflow over explicit steps with no configuration bound and backups off.
    pub fn new(name: impl Into<String>, steps: Vec<Arc<dyn Step>>) -> Result<Self, ConfigError> {
        if steps.is_empty() {
            return Err(ConfigError::NoSteps);
        }

        let mut seen = HashSet::new();
        if let Some(dup) = steps.iter().find(|s| !seen.insert(s.name().to_string())) {
            return Err(ConfigError::DuplicateStepName(dup.name().to_string()));
        }

        let name = name.into();
        let (outcome, _) = watch::channel(None);
        Ok(Self {
            event_label: name.clone(),
            name,
            steps,
            config: None,
            backups: BackupSettings::disabled(),
            rollback_on_failure: true,
            state: Arc::new(RwLock::new(DeploymentState::default())),
            events: EventSink::disabled(),
            started: AtomicBool::new(false),
            outcome,
        })
    }

    /// Workflow over the canonical steps listed in the configuration.
    pub fn from_config(name: impl Into<String>, config: Config) -> Result<Self, ConfigError> {
        let plan = plan_steps(&config.deployment.steps)?;
        exclude_matcher(&config.working_dir(), &config.backup.exclude)?;
        config.check_backup_dir()?;

        let steps = plan.into_iter().map(create_step).collect();
        let backups = BackupSettings::from_config(&config);
        let rollback_on_failure = config.rollback_on_failure;

        let mut workflow = Self::new(name, steps)?;
        workflow.backups = backups;
        workflow.rollback_on_failure = rollback_on_failure;
        workflow.config = Some(Arc::new(config));
        Ok(workflow)
    }

    /// Publish progress events to `sink`, tagged with `label`.
    pub fn with_events(mut self, sink: EventSink, label: impl Into<String>) -> Self {
        self.events = sink;
        self.event_label = label.into();
        self
    }

    pub fn with_backups(mut self, backups: BackupSettings) -> Self {
        self.backups = backups;
        self
    }

    pub fn with_rollback_on_failure(mut self, enabled: bool) -> Self {
        self.rollback_on_failure = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Arc<dyn Step>] {
        &self.steps
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn config(&self) -> Option<&Config> {
        self.config.as_deref()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> DeploymentState {
        self.state.read().clone()
    }

    /// Final result, if the run has finished.
    pub fn outcome_now(&self) -> Option<WorkflowResult> {
        self.outcome.borrow().clone()
    }

    /// Wait for the run to finish and return its result.
    pub async fn outcome(&self) -> WorkflowResult {
        let mut rx = self.outcome.subscribe();
        // The sender lives in self, so the channel stays open while we wait.
        match rx.wait_for(Option::is_some).await {
            Ok(result) => result.clone().unwrap_or_else(|| self.snapshot_result()),
            Err(_) => self.snapshot_result(),
        }
    }

    /// Record the final result. The first result wins; later ones are ignored.
    pub(crate) fn settle(&self, result: WorkflowResult) -> WorkflowResult {
        self.outcome.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(result);
            true
        });
        self.outcome_now().unwrap_or_else(|| self.snapshot_result())
    }

    /// Force the run into ABORTED from outside its task.
    ///
    /// Returns `None` when the run already reached a terminal status. Its task still owns
    /// the outcome then, for example while a failed run is rolling back.
    pub(crate) fn abort(&self, reason: &str) -> Option<WorkflowResult> {
        if !self.state.write().abort(reason) {
            return None;
        }
        tracing::warn!(workflow = %self.name, reason, "deployment aborted");
        self.emit(EventKind::Aborted, None, Some(reason.to_string()));
        Some(self.settle(WorkflowResult::from_state(&self.state(), "Deployment aborted")))
    }

    /// Fail the run for a reason outside any step, such as a crashed task.
    pub(crate) fn fail(&self, error: &str) -> WorkflowResult {
        let transitioned = self.state.write().fail(error);
        if transitioned {
            tracing::error!(workflow = %self.name, error, "deployment failed");
            self.emit(EventKind::Failed, None, Some(error.to_string()));
        }
        self.settle(WorkflowResult::from_state(&self.state(), "Deployment failed"))
    }

    fn snapshot_result(&self) -> WorkflowResult {
        let state = self.state();
        let message = format!("Deployment {}", state.status());
        WorkflowResult::from_state(&state, message)
    }

    /// Run every non-skipped step in order. Positions in `steps_to_skip` are 1-based.
    ///
    /// Never panics and never returns an error: every outcome is a `WorkflowResult`.
    #[tracing::instrument(skip_all, fields(workflow = %self.name))]
    pub async fn execute(&self, steps_to_skip: &BTreeSet<usize>, cancel: CancelToken) -> WorkflowResult {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("workflow already executed");
            return WorkflowResult::failure(
                self.state().status(),
                format!("Workflow {} has already been executed", self.name),
                "workflow already executed",
            );
        }

        let result = self.run(steps_to_skip, &cancel).await;
        self.settle(result)
    }

    async fn run(&self, steps_to_skip: &BTreeSet<usize>, cancel: &CancelToken) -> WorkflowResult {
        let planned: Vec<&Arc<dyn Step>> = self
            .positions()
            .filter(|(position, _)| !steps_to_skip.contains(position))
            .map(|(_, step)| step)
            .collect();

        {
            let mut state = self.state.write();
            state.plan(planned.len());
            if let Some(first) = planned.first() {
                state.update_status(first.status(), first.name());
            }
        }

        tracing::info!(steps = planned.len(), skipped = steps_to_skip.len(), "starting deployment");
        self.emit(EventKind::Started, None, None);

        let mut backups = BackupManager::new(self.backups.clone()).with_cancel(cancel.clone());
        let mut diagnostics = Diagnostics::default();

        if self.backups.enabled
            && let Err(e) = backups.create(Phase::PreDeployment).await
        {
            if matches!(e, BackupError::Cancelled) {
                return self.aborted();
            }
            tracing::error!(error = %e, "pre-deployment backup failed");
            self.state.write().fail(format!("Failed to create backup: {e}"));
            self.emit(EventKind::Failed, None, Some(e.to_string()));
            return WorkflowResult::from_state(&self.state(), "Deployment failed before any step ran");
        }

        // Nothing ran yet, so the point guards no change.
        if cancel.is_cancelled() {
            for error in backups.discard_all().await {
                tracing::warn!(error = %error, "could not discard backup of aborted run");
            }
            return self.aborted();
        }

        for (position, step) in self.positions() {
            if steps_to_skip.contains(&position) {
                tracing::debug!(step = step.name(), position, "skipping step");
                self.emit(EventKind::StepSkipped, Some(step.name()), None);
                continue;
            }

            if cancel.is_cancelled() {
                return self.aborted();
            }

            if self.backups.enabled && self.backups.per_phase {
                self.record_phase_backup(&mut backups, step.phase(), &mut diagnostics)
                    .await;
                if cancel.is_cancelled() {
                    return self.aborted();
                }
            }

            let transitioned = self.state.write().update_status(step.status(), step.name());
            if !transitioned {
                return self.snapshot_result();
            }
            tracing::info!(step = step.name(), position, "step started");
            self.emit(EventKind::StepStarted, Some(step.name()), None);

            let outcome = match self.context(position, step.as_ref(), cancel) {
                Ok(ctx) => AssertUnwindSafe(step.execute(&ctx))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(StepError::Panicked(panic_message(payload)))),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(output) => {
                    let result = StepResult::succeeded(step.status(), output);
                    let recorded = self.state.write().mark_step_completed(step.name(), result);
                    if !recorded {
                        return self.snapshot_result();
                    }
                    tracing::info!(step = step.name(), "step completed");
                    self.emit(EventKind::StepCompleted, Some(step.name()), None);
                }
                Err(e) if e.is_cancelled() => return self.aborted(),
                Err(e) => {
                    tracing::error!(step = step.name(), position, error = %e, "step failed");
                    let result = StepResult::failed(position, step.name(), &e);
                    let recorded = self.state.write().mark_step_failed(step.name(), result);
                    if !recorded {
                        return self.snapshot_result();
                    }
                    self.emit(EventKind::StepFailed, Some(step.name()), Some(e.to_string()));
                    return self.failed(position, step.name(), &backups).await;
                }
            }
        }

        self.completed(&mut backups, diagnostics).await
    }

    fn positions(&self) -> impl Iterator<Item = (usize, &Arc<dyn Step>)> {
        self.steps.iter().enumerate().map(|(i, step)| (i + 1, step))
    }

    fn context(
        &self,
        position: usize,
        step: &dyn Step,
        cancel: &CancelToken,
    ) -> Result<StepContext, StepError> {
        let mut ctx = StepContext::detached(position, step.name(), cancel.clone());
        ctx.command = step.command(self.config.as_deref().map(|c| &c.deployment));

        if let Some(config) = &self.config {
            ctx.env = resolve_env_map(&config.deployment.environment)?;
            ctx.working_dir = config.working_dir();
            ctx.timeout = config.deployment.timeout_for(step.name());
            ctx.config = Some(Arc::clone(config));
        }

        Ok(ctx)
    }

    async fn record_phase_backup(
        &self,
        backups: &mut BackupManager,
        phase: Phase,
        diagnostics: &mut Diagnostics,
    ) {
        if phase == Phase::PreDeployment || backups.point(phase).is_some() {
            return;
        }

        match backups.create(phase).await {
            Ok(_) | Err(BackupError::Cancelled) => {}
            Err(e) => {
                diagnostics.warn(Warning::phase_backup(format!("{phase} backup skipped: {e}")));
            }
        }
    }

    fn aborted(&self) -> WorkflowResult {
        let transitioned = self.state.write().abort(ABORT_REASON);
        if transitioned {
            tracing::warn!("deployment cancelled");
            self.emit(EventKind::Aborted, None, Some(ABORT_REASON.to_string()));
        }
        WorkflowResult::from_state(&self.state(), "Deployment aborted")
    }

    async fn failed(&self, position: usize, step_name: &str, backups: &BackupManager) -> WorkflowResult {
        let message = format!("Deployment failed at step {position} ({step_name})");

        if !self.rollback_on_failure {
            self.emit(EventKind::Failed, Some(step_name), None);
            return WorkflowResult::from_state(&self.state(), message);
        }

        self.emit(EventKind::RollbackStarted, Some(step_name), None);
        let rollback = backups.rollback().await;
        if rollback.success {
            tracing::info!(backup_id = ?rollback.backup_id, "rollback completed");
        } else {
            tracing::error!(error = ?rollback.error, "rollback did not restore a backup");
        }
        self.emit(EventKind::RollbackFinished, Some(step_name), rollback.error.clone());
        self.emit(EventKind::Failed, Some(step_name), None);

        WorkflowResult::from_state(&self.state(), message)
            .with_field("rollback_executed", rollback.success)
            .with_field("rollback_result", &rollback)
    }

    async fn completed(&self, backups: &mut BackupManager, mut diagnostics: Diagnostics) -> WorkflowResult {
        let transitioned = self
            .state
            .write()
            .update_status(DeploymentStatus::Completed, "completed");
        if !transitioned {
            return self.snapshot_result();
        }

        for error in backups.discard_all().await {
            diagnostics.warn(Warning::backup_discard(error.to_string()));
        }

        tracing::info!("deployment completed");
        self.emit(EventKind::Completed, None, None);

        let result = WorkflowResult::from_state(&self.state(), "Deployment completed successfully");
        if diagnostics.has_warnings() {
            result.with_field("warnings", diagnostics.into_warnings())
        } else {
            result
        }
    }

    fn emit(&self, kind: EventKind, step_name: Option<&str>, message: Option<String>) {
        if !self.events.is_enabled() {
            return;
        }

        let (status, progress) = {
            let state = self.state.read();
            (state.status(), state.progress())
        };
        self.events.emit(WorkflowEvent {
            workflow: self.event_label.clone(),
            kind,
            step_name: step_name.map(str::to_string),
            status,
            progress,
            timestamp: chrono::Utc::now(),
            message,
        });
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
