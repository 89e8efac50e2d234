// ABOUTME: Registry running many deployment workflows concurrently, one tokio task each.
// ABOUTME: Supports non-blocking status polls, cooperative abort, and awaiting outcomes.

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::cancel::CancelToken;
use super::error::OrchestrationError;
use super::events::{EVENT_CHANNEL_CAPACITY, EventSink, WorkflowEvent};
use super::result::WorkflowResult;
use super::state::DeploymentState;
use super::status::DeploymentStatus;
use super::workflow::{ABORT_REASON, DeploymentWorkflow};
use crate::config::Config;
use crate::types::WorkflowId;

/// Reason recorded for runs still active when the orchestrator is dropped.
const SHUTDOWN_REASON: &str = "orchestrator shut down";

/// How long a cancelled task may take to clean up before it is aborted.
pub const ABORT_GRACE: Duration = Duration::from_secs(5);

struct ActiveRun {
    workflow: Arc<DeploymentWorkflow>,
    handle: JoinHandle<WorkflowResult>,
    cancel: CancelToken,
    runtime: Handle,
}

impl ActiveRun {
    /// A run is over once its outcome settles, even if the task is still unwinding.
    fn is_running(&self) -> bool {
        !self.handle.is_finished() && self.workflow.outcome_now().is_none()
    }

    /// Signal cancellation and let the task finish its cleanup, aborting it after `ABORT_GRACE`.
    fn stop(self, id: &WorkflowId) {
        self.cancel.cancel();
        let mut handle = self.handle;
        let id = id.clone();
        self.runtime.spawn(async move {
            if tokio::time::timeout(ABORT_GRACE, &mut handle).await.is_err() {
                tracing::warn!(id = %id, "deployment task ignored cancellation, aborting it");
                handle.abort();
            }
        });
    }
}

/// Runs workflows in the background, keyed by caller-chosen ids.
///
/// Lock order is `active` then `workflows`; neither is held across `.await`.
pub struct DeploymentOrchestrator {
    /// Every workflow ever started, kept as history.
    workflows: RwLock<HashMap<WorkflowId, Arc<DeploymentWorkflow>>>,
    active: Mutex<HashMap<WorkflowId, ActiveRun>>,
    events: broadcast::Sender<WorkflowEvent>,
}

impl Default for DeploymentOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl DeploymentOrchestrator {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            workflows: RwLock::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Receive progress events from every workflow started after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    /// Start a run of the configured steps under `id`.
    pub fn start_deployment(
        &self,
        id: WorkflowId,
        name: &str,
        config: Config,
    ) -> Result<WorkflowResult, OrchestrationError> {
        self.start_deployment_with(id, name, config, BTreeSet::new())
    }

    /// Start a run, skipping the given 1-based step positions.
    ///
    /// Fails without side effects if `id` is still running. An id whose
    /// previous run has finished may be reused.
    pub fn start_deployment_with(
        &self,
        id: WorkflowId,
        name: &str,
        config: Config,
        steps_to_skip: BTreeSet<usize>,
    ) -> Result<WorkflowResult, OrchestrationError> {
        let runtime = Handle::try_current().map_err(|_| OrchestrationError::NoRuntime { id: id.clone() })?;

        let mut active = self.active.lock();
        if active.get(&id).is_some_and(ActiveRun::is_running) {
            return Err(OrchestrationError::AlreadyRunning { id });
        }

        let workflow = DeploymentWorkflow::from_config(name, config)
            .map_err(|source| OrchestrationError::Configuration {
                id: id.clone(),
                source,
            })?
            .with_events(EventSink::new(self.events.clone()), id.as_str());
        let workflow = Arc::new(workflow);

        let cancel = CancelToken::new();
        let span = tracing::info_span!("deployment", id = %id);
        let handle = runtime.spawn(
            run_workflow(Arc::clone(&workflow), steps_to_skip, cancel.clone()).instrument(span),
        );

        active.insert(
            id.clone(),
            ActiveRun {
                workflow: Arc::clone(&workflow),
                handle,
                cancel,
                runtime,
            },
        );
        self.workflows.write().insert(id.clone(), workflow);
        drop(active);

        tracing::info!(id = %id, name, "deployment started");

        Ok(WorkflowResult {
            success: true,
            status: DeploymentStatus::Pending,
            message: format!("Deployment {id} started"),
            error: None,
            data: serde_json::Map::new(),
        }
        .with_field("workflow_id", id.as_str()))
    }

    /// Current state snapshot for `id`, running or finished. Never blocks on the run.
    pub fn get_deployment_status(&self, id: &WorkflowId) -> Option<DeploymentState> {
        self.prune(id);
        self.workflows.read().get(id).map(|w| w.state())
    }

    /// Stop a running deployment and mark it ABORTED.
    ///
    /// A run that already failed or completed but has not settled its outcome, such as
    /// one still rolling back, is left alone and reported as `Finishing`.
    pub fn abort_deployment(&self, id: &WorkflowId) -> Result<WorkflowResult, OrchestrationError> {
        let (run, result) = {
            let mut active = self.active.lock();
            match active.get(id) {
                Some(run) if run.is_running() => {
                    // State first: terminal is sticky, so the task cannot overwrite it on its way out.
                    let Some(result) = run.workflow.abort(ABORT_REASON) else {
                        return Err(OrchestrationError::Finishing { id: id.clone() });
                    };
                    (active.remove(id), result)
                }
                Some(_) => {
                    active.remove(id);
                    return Err(OrchestrationError::NotFound { id: id.clone() });
                }
                None => return Err(OrchestrationError::NotFound { id: id.clone() }),
            }
        };

        if let Some(run) = run {
            run.stop(id);
        }

        tracing::info!(id = %id, status = %result.status, "deployment abort requested");
        Ok(result.with_field("workflow_id", id.as_str()))
    }

    /// Wait for the run under `id` to finish.
    pub async fn wait_for(&self, id: &WorkflowId) -> Option<WorkflowResult> {
        let workflow = self.workflow(id)?;
        let result = workflow.outcome().await;
        self.prune(id);
        Some(result)
    }

    pub fn is_active(&self, id: &WorkflowId) -> bool {
        self.active.lock().get(id).is_some_and(ActiveRun::is_running)
    }

    /// Ids with a run in flight, sorted.
    pub fn active_ids(&self) -> Vec<WorkflowId> {
        let mut active = self.active.lock();
        active.retain(|_, run| run.is_running());
        let mut ids: Vec<_> = active.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn workflow(&self, id: &WorkflowId) -> Option<Arc<DeploymentWorkflow>> {
        self.workflows.read().get(id).cloned()
    }

    fn prune(&self, id: &WorkflowId) {
        let mut active = self.active.lock();
        if active.get(id).is_some_and(|run| !run.is_running()) {
            active.remove(id);
            tracing::debug!(id = %id, "pruned finished deployment");
        }
    }
}

impl Drop for DeploymentOrchestrator {
    fn drop(&mut self) {
        for (id, run) in self.active.get_mut().drain() {
            if !run.is_running() {
                continue;
            }
            // Runs past a terminal status finish on their own.
            if run.workflow.abort(SHUTDOWN_REASON).is_some() {
                run.stop(&id);
            }
        }
    }
}

async fn run_workflow(
    workflow: Arc<DeploymentWorkflow>,
    steps_to_skip: BTreeSet<usize>,
    cancel: CancelToken,
) -> WorkflowResult {
    let outcome = AssertUnwindSafe(workflow.execute(&steps_to_skip, cancel))
        .catch_unwind()
        .await;

    match outcome {
        Ok(result) => result,
        Err(_) => workflow.fail("deployment task panicked"),
    }
}
