// ABOUTME: Deployment engine: status state machine, workflow executor, and orchestrator.
// ABOUTME: Also owns backup/rollback points and the cancellation token threaded into steps.

mod backup;
mod cancel;
mod error;
mod events;
mod orchestrator;
mod result;
mod state;
mod status;
mod workflow;

pub use backup::{BackupManager, BackupPoint, BackupSettings, MANIFEST_FILENAME, Phase};
pub use cancel::CancelToken;
pub use error::{BackupError, OrchestrationError, OrchestrationErrorKind};
pub use events::{EVENT_CHANNEL_CAPACITY, EventKind, EventSink, WorkflowEvent};
pub use orchestrator::{ABORT_GRACE, DeploymentOrchestrator};
pub use result::{RollbackResult, StepResult, WorkflowResult};
pub use state::{DeploymentState, STATE_SCHEMA_VERSION};
pub use status::DeploymentStatus;
pub use workflow::{ABORT_REASON, DeploymentWorkflow};
