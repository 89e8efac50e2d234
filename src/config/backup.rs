// ABOUTME: Backup snapshot configuration.
// ABOUTME: Controls where snapshots live, which phases get one, and what is excluded.

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::ConfigError;

/// Entries never copied into a snapshot, on top of user patterns.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    ".git/",
    "target/",
    "node_modules/",
    "__pycache__/",
    "*.pyc",
    "venv/",
    ".venv/",
    "env/",
];

#[derive(Debug, Clone, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Snapshot root, relative to the working directory unless absolute.
    #[serde(default = "default_dir")]
    pub dir: PathBuf,

    /// Record an extra point before the main and post deployment phases.
    #[serde(default)]
    pub per_phase: bool,

    /// Additional gitignore-style patterns to leave out of snapshots.
    #[serde(default)]
    pub exclude: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_dir() -> PathBuf {
    PathBuf::from(".rollout/backups")
}

impl Default for BackupConfig {
    fn default() -> Self {
        BackupConfig {
            enabled: default_enabled(),
            dir: default_dir(),
            per_phase: false,
            exclude: Vec::new(),
        }
    }
}

/// Compile the default exclusions plus `extra` into one gitignore matcher rooted at `root`.
pub fn exclude_matcher(root: &Path, extra: &[String]) -> Result<Gitignore, ConfigError> {
    let mut builder = GitignoreBuilder::new(root);

    let patterns = DEFAULT_EXCLUDES
        .iter()
        .copied()
        .chain(extra.iter().map(String::as_str));
    for pattern in patterns {
        builder
            .add_line(None, pattern)
            .map_err(|e| ConfigError::InvalidExcludePattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
    }

    builder
        .build()
        .map_err(|e| ConfigError::InvalidExcludePattern {
            pattern: extra.join(", "),
            reason: e.to_string(),
        })
}
