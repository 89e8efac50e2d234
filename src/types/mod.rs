// ABOUTME: Validated domain types shared across the orchestrator.
// ABOUTME: Workflow identifiers are checked once at the boundary.

mod workflow_id;

pub use workflow_id::{WorkflowId, WorkflowIdError};
