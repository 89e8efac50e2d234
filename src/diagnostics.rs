// ABOUTME: Diagnostics accumulator for non-fatal warnings during a workflow run.
// ABOUTME: Collects warnings that shouldn't fail a deployment but should be shown to users.

use serde::Serialize;

/// Collects non-fatal warnings during workflow execution.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    /// Record a warning, auto-logging it via tracing.
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!(kind = ?warning.kind, "{}", warning.message);
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }
}

/// A non-fatal warning collected during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    /// A backup point could not be removed after a successful run.
    pub fn backup_discard(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::BackupDiscard,
            message: message.into(),
        }
    }

    /// A per-phase backup point could not be recorded; earlier points still guard the run.
    pub fn phase_backup(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::PhaseBackup,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Snapshot directory left on disk.
    BackupDiscard,
    /// Per-phase snapshot missing.
    PhaseBackup,
}
