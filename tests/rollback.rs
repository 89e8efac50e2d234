// ABOUTME: Integration tests for backup points and rollback on failure.
// ABOUTME: Runs real shell steps against a temporary project directory.

#![cfg(unix)]

mod support;

use rollout::deploy::{CancelToken, DeploymentStatus, DeploymentWorkflow, Phase};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use support::config_in;

fn project(dir: &Path) {
    fs::write(dir.join("index.html"), "v1\n").unwrap();
    fs::create_dir_all(dir.join("assets")).unwrap();
    fs::write(dir.join("assets/app.js"), "console.log(1)\n").unwrap();
}

fn read(dir: &Path, rel: &str) -> String {
    fs::read_to_string(dir.join(rel)).unwrap()
}

async fn run(dir: &Path, yaml: &str) -> (DeploymentWorkflow, rollout::deploy::WorkflowResult) {
    support::init_tracing();
    let workflow = DeploymentWorkflow::from_config("site", config_in(dir, yaml)).unwrap();
    let result = workflow.execute(&BTreeSet::new(), CancelToken::new()).await;
    (workflow, result)
}

#[tokio::test]
async fn failed_deploy_restores_pre_deployment_point() {
    let dir = tempfile::tempdir().unwrap();
    project(dir.path());

    let (_, result) = run(
        dir.path(),
        r#"
project:
  name: site
deployment:
  steps: [1, 4]
  deploy_command: "echo v2 > index.html && rm assets/app.js && touch stray.txt && exit 1"
"#,
    )
    .await;

    assert_eq!(result.status, DeploymentStatus::Failed);
    assert!(result.rollback_executed(), "{result:?}");
    let rollback = result.rollback_result().unwrap();
    assert!(rollback.success);
    assert_eq!(rollback.phase, Some(Phase::PreDeployment));
    assert!(rollback.backup_id.unwrap().starts_with("pre_deployment_"));

    assert_eq!(read(dir.path(), "index.html"), "v1\n");
    assert_eq!(read(dir.path(), "assets/app.js"), "console.log(1)\n");
    assert!(!dir.path().join("stray.txt").exists());
}

#[tokio::test]
async fn excluded_paths_survive_rollback() {
    let dir = tempfile::tempdir().unwrap();
    project(dir.path());
    fs::create_dir_all(dir.path().join("node_modules")).unwrap();
    fs::write(dir.path().join("node_modules/cache"), "old").unwrap();
    fs::write(dir.path().join("debug.log"), "old").unwrap();

    let (_, result) = run(
        dir.path(),
        r#"
project:
  name: site
deployment:
  steps: [4]
  deploy_command: "echo new > node_modules/cache && echo new > debug.log && exit 1"
backup:
  exclude: ["*.log"]
"#,
    )
    .await;

    assert!(result.rollback_executed(), "{result:?}");
    assert_eq!(read(dir.path(), "node_modules/cache"), "new\n");
    assert_eq!(read(dir.path(), "debug.log"), "new\n");
    assert_eq!(read(dir.path(), "index.html"), "v1\n");
}

#[tokio::test]
async fn per_phase_rollback_uses_latest_point() {
    let dir = tempfile::tempdir().unwrap();
    project(dir.path());

    let (_, result) = run(
        dir.path(),
        r#"
project:
  name: site
deployment:
  steps: [1, 4, 5]
  deploy_command: "echo v2 > index.html"
  release_command: "echo v3 > index.html && exit 1"
backup:
  per_phase: true
"#,
    )
    .await;

    assert_eq!(result.status, DeploymentStatus::Failed);
    let rollback = result.rollback_result().unwrap();
    assert!(rollback.success, "{rollback:?}");
    assert_eq!(rollback.phase, Some(Phase::PostDeployment));
    // The post point was taken after deploy wrote v2.
    assert_eq!(read(dir.path(), "index.html"), "v2\n");
}

#[tokio::test]
async fn successful_run_discards_its_points() {
    let dir = tempfile::tempdir().unwrap();
    project(dir.path());

    let (_, result) = run(
        dir.path(),
        r#"
project:
  name: site
deployment:
  steps: [1, 4, 5]
  deploy_command: "echo v2 > index.html"
backup:
  per_phase: true
"#,
    )
    .await;

    assert!(result.success, "{result:?}");
    assert!(!result.data.contains_key("warnings"));
    assert_eq!(read(dir.path(), "index.html"), "v2\n");

    let root = dir.path().join(".rollout/backups");
    assert!(root.is_dir());
    assert_eq!(fs::read_dir(&root).unwrap().count(), 0);
}

#[tokio::test]
async fn failed_run_keeps_points_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    project(dir.path());

    let (_, result) = run(
        dir.path(),
        r#"
project:
  name: site
deployment:
  steps: [4]
  deploy_command: "exit 3"
"#,
    )
    .await;

    assert!(result.error.as_deref().unwrap().contains("exit code 3"));
    let points: Vec<_> = fs::read_dir(dir.path().join(".rollout/backups"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(points.len(), 1);
    assert!(points[0].join("backup.json").is_file());
    assert_eq!(read(&points[0], "tree/index.html"), "v1\n");
}

#[tokio::test]
async fn rollback_disabled_leaves_changes_in_place() {
    let dir = tempfile::tempdir().unwrap();
    project(dir.path());

    let (_, result) = run(
        dir.path(),
        r#"
project:
  name: site
deployment:
  steps: [4]
  deploy_command: "echo v2 > index.html && exit 1"
rollback_on_failure: false
"#,
    )
    .await;

    assert_eq!(result.status, DeploymentStatus::Failed);
    assert!(!result.rollback_executed());
    assert!(result.rollback_result().is_none());
    assert_eq!(read(dir.path(), "index.html"), "v2\n");
}

#[tokio::test]
async fn unwritable_backup_dir_fails_before_any_step() {
    let dir = tempfile::tempdir().unwrap();
    project(dir.path());
    fs::write(dir.path().join("blocker"), "not a directory").unwrap();

    let (workflow, result) = run(
        dir.path(),
        r#"
project:
  name: site
deployment:
  steps: [4]
  deploy_command: "touch ran.txt"
backup:
  dir: blocker/backups
"#,
    )
    .await;

    assert_eq!(result.status, DeploymentStatus::Failed);
    assert!(
        result.error.as_deref().unwrap().starts_with("Failed to create backup"),
        "{result:?}"
    );
    assert!(!dir.path().join("ran.txt").exists());
    assert!(workflow.state().completed_steps().is_empty());
    assert!(workflow.state().failed_steps().is_empty());
}
