// ABOUTME: Filesystem backup points taken around deployment phases and restored on failure.
// ABOUTME: Snapshots honor gitignore-style exclusions; all filesystem work runs on spawn_blocking.

use chrono::{DateTime, Utc};
use ignore::gitignore::Gitignore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::cancel::CancelToken;
use super::error::BackupError;
use super::result::RollbackResult;
use crate::config::{Config, exclude_matcher};

pub const MANIFEST_FILENAME: &str = "backup.json";
const TREE_DIRNAME: &str = "tree";

/// Deployment phase a backup point guards. Ordered pre < main < post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    PreDeployment,
    MainDeployment,
    PostDeployment,
}

impl Phase {
    /// Phase a canonical step index belongs to.
    pub fn for_step_index(index: u8) -> Phase {
        match index {
            0..=3 => Phase::PreDeployment,
            4 => Phase::MainDeployment,
            _ => Phase::PostDeployment,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::PreDeployment => "pre_deployment",
            Phase::MainDeployment => "main_deployment",
            Phase::PostDeployment => "post_deployment",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded snapshot of the deployment target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupPoint {
    pub id: String,
    /// Directory holding the manifest and the snapshot tree.
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub phase: Phase,
}

impl BackupPoint {
    fn tree(&self) -> PathBuf {
        self.path.join(TREE_DIRNAME)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    id: String,
    phase: Phase,
    created_at: DateTime<Utc>,
    host: String,
    source: PathBuf,
}

/// Where and how a workflow takes its snapshots.
#[derive(Debug, Clone)]
pub struct BackupSettings {
    pub enabled: bool,
    pub per_phase: bool,
    /// Directory being snapshotted and restored.
    pub source: PathBuf,
    /// Directory snapshots are written under.
    pub root: PathBuf,
    /// User patterns on top of the default exclusions.
    pub exclude: Vec<String>,
}

impl BackupSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            enabled: config.backup.enabled,
            per_phase: config.backup.per_phase,
            source: config.working_dir(),
            root: config.backup_dir(),
            exclude: config.backup.exclude.clone(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            per_phase: false,
            source: PathBuf::from("."),
            root: PathBuf::from(".rollout/backups"),
            exclude: Vec::new(),
        }
    }
}

/// Rollback points for a single run, keyed by phase.
#[derive(Debug)]
pub struct BackupManager {
    settings: BackupSettings,
    points: BTreeMap<Phase, BackupPoint>,
    cancel: CancelToken,
}

impl BackupManager {
    pub fn new(settings: BackupSettings) -> Self {
        Self {
            settings,
            points: BTreeMap::new(),
            cancel: CancelToken::new(),
        }
    }

    /// Stop snapshots in progress when `cancel` fires. Restores always run to completion.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn settings(&self) -> &BackupSettings {
        &self.settings
    }

    pub fn points(&self) -> &BTreeMap<Phase, BackupPoint> {
        &self.points
    }

    pub fn point(&self, phase: Phase) -> Option<&BackupPoint> {
        self.points.get(&phase)
    }

    /// Snapshot the source directory as the point for `phase`.
    ///
    /// A cancelled snapshot removes its partial point and returns `BackupError::Cancelled`.
    pub async fn create(&mut self, phase: Phase) -> Result<BackupPoint, BackupError> {
        let created_at = Utc::now();
        let id = format!("{}_{}", phase.as_str(), created_at.format("%Y%m%d_%H%M%S_%3f"));
        let source = self.settings.source.clone();
        let root = self.settings.root.clone();
        let exclude = self.settings.exclude.clone();
        let job_id = id.clone();
        let cancel = self.cancel.clone();

        let path = tokio::task::spawn_blocking(move || {
            snapshot(&source, &root, &exclude, &job_id, phase, created_at, &cancel)
        })
        .await
        .map_err(|e| BackupError::Join(e.to_string()))??;

        tracing::info!(backup_id = %id, phase = %phase, path = %path.display(), "backup point created");

        let point = BackupPoint {
            id,
            path,
            created_at,
            phase,
        };
        self.points.insert(phase, point.clone());
        Ok(point)
    }

    /// Restore from the latest recorded point, walking post, main, pre.
    pub async fn rollback(&self) -> RollbackResult {
        let Some(point) = self.points.values().next_back().cloned() else {
            return RollbackResult::failed(None, None, BackupError::NoBackupPoint.to_string());
        };

        tracing::info!(backup_id = %point.id, phase = %point.phase, "restoring backup point");

        match self.restore(&point).await {
            Ok(()) => RollbackResult::restored(point.phase, point.id),
            Err(e) => {
                tracing::error!(backup_id = %point.id, error = %e, "restore failed");
                RollbackResult::failed(Some(point.phase), Some(point.id), e.to_string())
            }
        }
    }

    async fn restore(&self, point: &BackupPoint) -> Result<(), BackupError> {
        let source = self.settings.source.clone();
        let root = self.settings.root.clone();
        let exclude = self.settings.exclude.clone();
        let tree = point.tree();
        let id = point.id.clone();

        tokio::task::spawn_blocking(move || restore_tree(&tree, &source, &root, &exclude, &id))
            .await
            .map_err(|e| BackupError::Join(e.to_string()))?
    }

    /// Remove every point of this run. Returns one error per point that could not be removed.
    pub async fn discard_all(&mut self) -> Vec<BackupError> {
        let points = std::mem::take(&mut self.points);
        if points.is_empty() {
            return Vec::new();
        }

        let result = tokio::task::spawn_blocking(move || {
            points
                .into_values()
                .filter_map(|point| {
                    fs::remove_dir_all(&point.path)
                        .err()
                        .filter(|e| e.kind() != io::ErrorKind::NotFound)
                        .map(|e| BackupError::Discard {
                            id: point.id,
                            reason: e.to_string(),
                        })
                })
                .collect::<Vec<_>>()
        })
        .await;

        match result {
            Ok(errors) => errors,
            Err(e) => vec![BackupError::Join(e.to_string())],
        }
    }
}

/// Entries that must not be copied or cleared.
struct Exclusions {
    matcher: Gitignore,
    backup_root: PathBuf,
}

impl Exclusions {
    fn build(source: &Path, root: &Path, exclude: &[String]) -> Result<Self, String> {
        let matcher = exclude_matcher(source, exclude).map_err(|e| e.to_string())?;
        Ok(Self {
            matcher,
            backup_root: root.to_path_buf(),
        })
    }

    fn none(backup_root: &Path) -> Self {
        Self {
            matcher: Gitignore::empty(),
            backup_root: backup_root.to_path_buf(),
        }
    }

    fn skips(&self, path: &Path, rel: &Path, is_dir: bool) -> bool {
        path == self.backup_root
            || self
                .matcher
                .matched_path_or_any_parents(rel, is_dir)
                .is_ignore()
    }
}

fn snapshot(
    source: &Path,
    root: &Path,
    exclude: &[String],
    id: &str,
    phase: Phase,
    created_at: DateTime<Utc>,
    cancel: &CancelToken,
) -> Result<PathBuf, BackupError> {
    let create_err = |reason: String| BackupError::Create {
        source_dir: source.to_path_buf(),
        reason,
    };

    let source = source.canonicalize().map_err(|e| create_err(e.to_string()))?;
    fs::create_dir_all(root).map_err(|e| create_err(e.to_string()))?;
    let root = root.canonicalize().map_err(|e| create_err(e.to_string()))?;
    let exclusions = Exclusions::build(&source, &root, exclude).map_err(&create_err)?;

    let point_dir = root.join(id);
    let tree = point_dir.join(TREE_DIRNAME);
    fs::create_dir_all(&tree).map_err(|e| create_err(e.to_string()))?;

    let copied = copy_tree(&source, &tree, Path::new(""), &exclusions, cancel);
    let manifest = copied.and_then(|()| {
        write_manifest(
            &point_dir,
            &Manifest {
                id: id.to_string(),
                phase,
                created_at,
                host: gethostname::gethostname().to_string_lossy().into_owned(),
                source: source.clone(),
            },
        )
    });

    if let Err(e) = manifest {
        // Leave no half-written point behind.
        let _ = fs::remove_dir_all(&point_dir);
        if e.kind() == io::ErrorKind::Interrupted && cancel.is_cancelled() {
            tracing::debug!(backup_id = id, "backup cancelled");
            return Err(BackupError::Cancelled);
        }
        return Err(create_err(e.to_string()));
    }

    Ok(point_dir)
}

fn write_manifest(point_dir: &Path, manifest: &Manifest) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(manifest).map_err(io::Error::other)?;
    fs::write(point_dir.join(MANIFEST_FILENAME), json)
}

fn restore_tree(
    tree: &Path,
    target: &Path,
    root: &Path,
    exclude: &[String],
    id: &str,
) -> Result<(), BackupError> {
    let restore_err = |reason: String| BackupError::Restore {
        id: id.to_string(),
        reason,
    };

    if !tree.is_dir() {
        return Err(restore_err(format!("backup not found: {}", tree.display())));
    }

    let target = target.canonicalize().map_err(|e| restore_err(e.to_string()))?;
    let root = root.canonicalize().map_err(|e| restore_err(e.to_string()))?;
    let exclusions = Exclusions::build(&target, &root, exclude).map_err(&restore_err)?;

    clear_tree(&target, Path::new(""), &exclusions).map_err(|e| restore_err(e.to_string()))?;
    copy_tree(tree, &target, Path::new(""), &Exclusions::none(&root), &CancelToken::new())
        .map_err(|e| restore_err(e.to_string()))
}

fn copy_tree(
    src: &Path,
    dst: &Path,
    rel: &Path,
    exclusions: &Exclusions,
    cancel: &CancelToken,
) -> io::Result<()> {
    fs::create_dir_all(dst)?;

    for entry in fs::read_dir(src)? {
        if cancel.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "backup cancelled"));
        }
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        let rel = rel.join(entry.file_name());
        let target = dst.join(entry.file_name());

        if exclusions.skips(&path, &rel, file_type.is_dir()) {
            continue;
        }

        if file_type.is_dir() {
            copy_tree(&path, &target, &rel, exclusions, cancel)?;
        } else if file_type.is_symlink() {
            copy_symlink(&path, &target)?;
        } else {
            fs::copy(&path, &target)?;
        }
    }

    Ok(())
}

#[cfg(unix)]
fn copy_symlink(path: &Path, target: &Path) -> io::Result<()> {
    let link = fs::read_link(path)?;
    std::os::unix::fs::symlink(link, target)
}

#[cfg(not(unix))]
fn copy_symlink(path: &Path, target: &Path) -> io::Result<()> {
    fs::copy(path, target).map(|_| ())
}

/// Remove everything under `dir` except excluded entries and the backup root.
fn clear_tree(dir: &Path, rel: &Path, exclusions: &Exclusions) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        let rel = rel.join(entry.file_name());

        if exclusions.skips(&path, &rel, file_type.is_dir()) {
            continue;
        }

        if file_type.is_dir() {
            if exclusions.backup_root.starts_with(&path) {
                // Ancestor of the backup root: keep it, clear around it.
                clear_tree(&path, &rel, exclusions)?;
            } else {
                fs::remove_dir_all(&path)?;
            }
        } else {
            fs::remove_file(&path)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings(dir: &TempDir, exclude: &[&str]) -> BackupSettings {
        BackupSettings {
            enabled: true,
            per_phase: false,
            source: dir.path().to_path_buf(),
            root: dir.path().join(".rollout/backups"),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn phase_for_step_index() {
        assert_eq!(Phase::for_step_index(1), Phase::PreDeployment);
        assert_eq!(Phase::for_step_index(3), Phase::PreDeployment);
        assert_eq!(Phase::for_step_index(4), Phase::MainDeployment);
        assert_eq!(Phase::for_step_index(5), Phase::PostDeployment);
    }

    #[test]
    fn phases_order_pre_main_post() {
        assert!(Phase::PreDeployment < Phase::MainDeployment);
        assert!(Phase::MainDeployment < Phase::PostDeployment);
    }

    #[tokio::test]
    async fn snapshot_skips_excluded_entries() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/main.rs", "fn main() {}");
        write(dir.path(), "target/debug/app", "binary");
        write(dir.path(), ".git/HEAD", "ref");
        write(dir.path(), "app.log", "noise");

        let mut manager = BackupManager::new(settings(&dir, &["*.log"]));
        let point = manager.create(Phase::PreDeployment).await.unwrap();

        assert!(point.id.starts_with("pre_deployment_"));
        let tree = point.path.join(TREE_DIRNAME);
        assert!(tree.join("src/main.rs").is_file());
        assert!(!tree.join("target").exists());
        assert!(!tree.join(".git").exists());
        assert!(!tree.join("app.log").exists());
        assert!(!tree.join(".rollout/backups").exists());
    }

    #[tokio::test]
    async fn manifest_records_phase_and_source() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "index.html", "v1");

        let mut manager = BackupManager::new(settings(&dir, &[]));
        let point = manager.create(Phase::MainDeployment).await.unwrap();

        let raw = fs::read_to_string(point.path.join(MANIFEST_FILENAME)).unwrap();
        let manifest: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(manifest["id"], point.id.as_str());
        assert_eq!(manifest["phase"], "main_deployment");
        assert!(manifest["host"].is_string());
    }

    #[tokio::test]
    async fn rollback_restores_latest_point() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "index.html", "v1");
        write(dir.path(), "node_modules/dep/index.js", "dep");

        let mut manager = BackupManager::new(settings(&dir, &[]));
        manager.create(Phase::PreDeployment).await.unwrap();

        write(dir.path(), "index.html", "v2");
        write(dir.path(), "stray.txt", "new file");

        let result = manager.rollback().await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.phase, Some(Phase::PreDeployment));

        assert_eq!(fs::read_to_string(dir.path().join("index.html")).unwrap(), "v1");
        assert!(!dir.path().join("stray.txt").exists());
        // Excluded entries are left alone on restore.
        assert!(dir.path().join("node_modules/dep/index.js").is_file());
        // The snapshot itself survives the restore.
        assert!(manager.point(Phase::PreDeployment).unwrap().path.is_dir());
    }

    #[tokio::test]
    async fn rollback_prefers_latest_phase() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "index.html", "v1");

        let mut manager = BackupManager::new(settings(&dir, &[]));
        manager.create(Phase::PreDeployment).await.unwrap();
        write(dir.path(), "index.html", "v2");
        manager.create(Phase::MainDeployment).await.unwrap();
        write(dir.path(), "index.html", "v3");

        let result = manager.rollback().await;
        assert_eq!(result.phase, Some(Phase::MainDeployment));
        assert_eq!(fs::read_to_string(dir.path().join("index.html")).unwrap(), "v2");
    }

    #[tokio::test]
    async fn rollback_without_points_fails() {
        let dir = TempDir::new().unwrap();
        let manager = BackupManager::new(settings(&dir, &[]));

        let result = manager.rollback().await;
        assert!(!result.success);
        assert!(result.phase.is_none());
        assert_eq!(result.error.as_deref(), Some("no rollback points available"));
    }

    #[tokio::test]
    async fn discard_all_removes_points() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "index.html", "v1");

        let mut manager = BackupManager::new(settings(&dir, &[]));
        let path = manager.create(Phase::PreDeployment).await.unwrap().path.clone();

        assert!(manager.discard_all().await.is_empty());
        assert!(!path.exists());
        assert!(manager.points().is_empty());
    }

    #[tokio::test]
    async fn missing_source_fails_create() {
        let dir = TempDir::new().unwrap();
        let mut s = settings(&dir, &[]);
        s.source = dir.path().join("missing");

        let mut manager = BackupManager::new(s);
        let err = manager.create(Phase::PreDeployment).await.unwrap_err();
        assert!(matches!(err, BackupError::Create { .. }));
        assert!(manager.points().is_empty());
    }

    #[tokio::test]
    async fn cancelled_create_leaves_no_point() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "index.html", "v1");
        write(dir.path(), "assets/app.js", "js");

        let cancel = CancelToken::new();
        cancel.cancel();
        let mut manager = BackupManager::new(settings(&dir, &[])).with_cancel(cancel);

        let err = manager.create(Phase::PreDeployment).await.unwrap_err();
        assert!(matches!(err, BackupError::Cancelled), "{err:?}");
        assert!(manager.points().is_empty());

        let root = dir.path().join(".rollout/backups");
        assert_eq!(fs::read_dir(&root).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn rollback_ignores_cancellation() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "index.html", "v1");

        let cancel = CancelToken::new();
        let mut manager = BackupManager::new(settings(&dir, &[])).with_cancel(cancel.clone());
        manager.create(Phase::PreDeployment).await.unwrap();

        write(dir.path(), "index.html", "v2");
        cancel.cancel();

        assert!(manager.rollback().await.success);
        assert_eq!(fs::read_to_string(dir.path().join("index.html")).unwrap(), "v1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinks_are_recreated() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "releases/v1/index.html", "v1");
        std::os::unix::fs::symlink("releases/v1", dir.path().join("current")).unwrap();

        let mut manager = BackupManager::new(settings(&dir, &[]));
        manager.create(Phase::PreDeployment).await.unwrap();

        fs::remove_file(dir.path().join("current")).unwrap();
        assert!(manager.rollback().await.success);

        let link = fs::read_link(dir.path().join("current")).unwrap();
        assert_eq!(link, PathBuf::from("releases/v1"));
    }
}
