// ABOUTME: Configuration types and parsing for rollout.yml.
// ABOUTME: Handles YAML parsing, step plan checks, env interpolation, and path resolution.

mod backup;
mod deserialize;
mod env_value;
mod error;
mod init;

pub use backup::{BackupConfig, DEFAULT_EXCLUDES, exclude_matcher};
pub use env_value::{EnvValue, resolve_env_map};
pub use error::ConfigError;
pub use init::init_config;

use crate::error::{Error, Result};
use deserialize::deserialize_timeouts;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "rollout.yml";
pub const CONFIG_FILENAME_ALT: &str = "rollout.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".rollout/config.yml";

/// Step indices used when the configuration does not list any: build is skipped.
pub const DEFAULT_STEPS: [u8; 4] = [1, 3, 4, 5];

/// Highest canonical step index.
pub const MAX_STEP_INDEX: u8 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub project: ProjectConfig,

    pub deployment: DeploymentConfig,

    #[serde(default = "default_rollback_on_failure")]
    pub rollback_on_failure: bool,

    #[serde(default)]
    pub backup: BackupConfig,

    /// Directory the configuration was loaded from; relative paths resolve here.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default = "default_steps")]
    pub steps: Vec<u8>,

    #[serde(default)]
    pub validation_command: Option<String>,

    #[serde(default)]
    pub build_command: Option<String>,

    #[serde(default)]
    pub test_command: Option<String>,

    #[serde(default)]
    pub deploy_command: Option<String>,

    /// Command for the second deploy invocation (step 5). Falls back to `deploy_command`.
    #[serde(default)]
    pub release_command: Option<String>,

    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    #[serde(default = "default_step_timeout", with = "humantime_serde")]
    pub step_timeout: Duration,

    /// Per-step timeout overrides keyed by step name.
    #[serde(default, deserialize_with = "deserialize_timeouts")]
    pub timeouts: HashMap<String, Duration>,

    #[serde(default)]
    pub environment: HashMap<String, EnvValue>,
}

fn default_rollback_on_failure() -> bool {
    true
}

fn default_steps() -> Vec<u8> {
    DEFAULT_STEPS.to_vec()
}

fn default_step_timeout() -> Duration {
    Duration::from_secs(300)
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        DeploymentConfig {
            steps: default_steps(),
            validation_command: None,
            build_command: None,
            test_command: None,
            deploy_command: None,
            release_command: None,
            working_dir: None,
            step_timeout: default_step_timeout(),
            timeouts: HashMap::new(),
            environment: HashMap::new(),
        }
    }
}

impl DeploymentConfig {
    /// Timeout for a step, honoring per-step overrides.
    pub fn timeout_for(&self, step_name: &str) -> Duration {
        self.timeouts
            .get(step_name)
            .copied()
            .unwrap_or(self.step_timeout)
    }

    fn commands(&self) -> [(&'static str, Option<&String>); 5] {
        [
            ("validation_command", self.validation_command.as_ref()),
            ("build_command", self.build_command.as_ref()),
            ("test_command", self.test_command.as_ref()),
            ("deploy_command", self.deploy_command.as_ref()),
            ("release_command", self.release_command.as_ref()),
        ]
    }
}

/// Check that step indices are non-empty, canonical, and strictly increasing.
/// Resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other),
        }
    }
    out
}

pub fn validate_step_indices(steps: &[u8]) -> std::result::Result<(), ConfigError> {
    if steps.is_empty() {
        return Err(ConfigError::NoSteps);
    }

    if let Some(&bad) = steps.iter().find(|&&i| i == 0 || i > MAX_STEP_INDEX) {
        return Err(ConfigError::InvalidStepIndex(bad));
    }

    if let Some(pair) = steps.windows(2).find(|pair| pair[0] >= pair[1]) {
        return Err(ConfigError::StepOrder {
            previous: pair[0],
            next: pair[1],
        });
    }

    Ok(())
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;
        config.base_dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(|dir| match dir.file_name() {
                // .rollout/config.yml belongs to the project one level up
                Some(name) if name == ".rollout" => dir.parent().unwrap_or(dir).to_path_buf(),
                _ => dir.to_path_buf(),
            });
        Ok(config)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Directory steps run in and backups snapshot.
    pub fn working_dir(&self) -> PathBuf {
        let base = self
            .base_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        match &self.deployment.working_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => base.join(dir),
            None => base,
        }
    }

    /// Snapshot root for this project.
    pub fn backup_dir(&self) -> PathBuf {
        if self.backup.dir.is_absolute() {
            self.backup.dir.clone()
        } else {
            self.working_dir().join(&self.backup.dir)
        }
    }

    /// Refuse a backup root at or above the working directory. Restoring into it would
    /// clear the snapshots themselves.
    pub fn check_backup_dir(&self) -> std::result::Result<(), ConfigError> {
        if !self.backup.enabled {
            return Ok(());
        }

        let working = self.working_dir();
        let backup = self.backup_dir();
        let lexical = normalize(&working).starts_with(normalize(&backup));
        let resolved = match (working.canonicalize(), backup.canonicalize()) {
            (Ok(w), Ok(b)) => w.starts_with(b),
            _ => false,
        };

        if lexical || resolved {
            return Err(ConfigError::BackupDirContainsWorkingDir { backup, working });
        }
        Ok(())
    }

    /// Collect every structural problem with this configuration.
    pub fn problems(&self) -> Vec<ConfigError> {
        let mut problems = Vec::new();

        if self.project.name.trim().is_empty() {
            problems.push(ConfigError::EmptyProjectName);
        }

        if let Err(e) = validate_step_indices(&self.deployment.steps) {
            problems.push(e);
        }

        for (key, command) in self.deployment.commands() {
            if command.is_some_and(|c| c.trim().is_empty()) {
                problems.push(ConfigError::BlankCommand { key });
            }
        }

        if let Err(e) = resolve_env_map(&self.deployment.environment) {
            problems.push(e);
        }

        let working_dir = self.working_dir();
        if let Err(e) = exclude_matcher(&working_dir, &self.backup.exclude) {
            problems.push(e);
        }

        if let Err(e) = self.check_backup_dir() {
            problems.push(e);
        }

        if !working_dir.is_dir() {
            problems.push(ConfigError::WorkingDirMissing(working_dir));
        }

        problems
    }

    /// Fail with the first structural problem, if any.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        match self.problems().into_iter().next() {
            Some(problem) => Err(problem),
            None => Ok(()),
        }
    }

    pub fn template() -> Self {
        Config {
            project: ProjectConfig {
                name: "my-app".to_string(),
                version: Some("1.0.0".to_string()),
                description: None,
            },
            deployment: DeploymentConfig {
                test_command: Some("cargo test".to_string()),
                deploy_command: Some("./deploy.sh staging".to_string()),
                release_command: Some("./deploy.sh production".to_string()),
                ..DeploymentConfig::default()
            },
            rollback_on_failure: default_rollback_on_failure(),
            backup: BackupConfig::default(),
            base_dir: None,
        }
    }
}
