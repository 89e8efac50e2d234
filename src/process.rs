// ABOUTME: Shell command execution for deployment steps.
// ABOUTME: Enforces timeouts and cancellation; children are killed when their future is dropped.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

use crate::deploy::CancelToken;
use crate::step::StepError;

/// Upper bound on captured stdout/stderr per stream. The tail is kept.
pub const MAX_CAPTURED_OUTPUT: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub command: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Convert a non-zero exit into a step error.
    pub fn into_result(self) -> Result<ProcessOutput, StepError> {
        match self.exit_code {
            Some(0) => Ok(self),
            Some(code) => Err(StepError::ExitStatus {
                command: self.command,
                code,
                stderr: self.stderr,
            }),
            None => Err(StepError::Terminated {
                command: self.command,
            }),
        }
    }
}

#[cfg(unix)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

/// Run `command` through the platform shell and capture its output.
///
/// A non-zero exit is not an error here; see [`ProcessOutput::into_result`].
pub async fn run_shell(
    command: &str,
    working_dir: &Path,
    env: &HashMap<String, String>,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<ProcessOutput, StepError> {
    if cancel.is_cancelled() {
        return Err(StepError::Cancelled);
    }

    tracing::debug!(command, dir = %working_dir.display(), "spawning command");

    let child = shell(command)
        .current_dir(working_dir)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| StepError::Spawn {
            command: command.to_string(),
            source,
        })?;

    let started = Instant::now();

    // Dropping the wait future drops the child, which kills it.
    let output = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::warn!(command, "command cancelled");
            return Err(StepError::Cancelled);
        }
        result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
            Ok(output) => output?,
            Err(_) => {
                tracing::warn!(command, ?timeout, "command timed out");
                return Err(StepError::Timeout(timeout));
            }
        },
    };

    let output = ProcessOutput {
        command: command.to_string(),
        exit_code: output.status.code(),
        stdout: capture(&output.stdout),
        stderr: capture(&output.stderr),
        duration: started.elapsed(),
    };

    if output.success() {
        tracing::debug!(command, elapsed = ?output.duration, "command finished");
    } else {
        tracing::warn!(command, exit_code = ?output.exit_code, "command failed");
    }

    Ok(output)
}

fn capture(bytes: &[u8]) -> String {
    if bytes.len() <= MAX_CAPTURED_OUTPUT {
        return String::from_utf8_lossy(bytes).into_owned();
    }

    let tail = &bytes[bytes.len() - MAX_CAPTURED_OUTPUT..];
    format!("[truncated]\n{}", String::from_utf8_lossy(tail))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn run(command: &str, timeout: Duration) -> Result<ProcessOutput, StepError> {
        let dir = TempDir::new().unwrap();
        run_shell(command, dir.path(), &HashMap::new(), timeout, &CancelToken::new()).await
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let output = run("echo hello", Duration::from_secs(5)).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported_not_raised() {
        let output = run("echo oops >&2; exit 3", Duration::from_secs(5)).await.unwrap();
        assert_eq!(output.exit_code, Some(3));

        let err = output.into_result().unwrap_err();
        assert!(err.to_string().contains("exit code 3: oops"));
    }

    #[tokio::test]
    async fn environment_and_working_dir_are_applied() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker"), "").unwrap();
        let env = HashMap::from([("GREETING".to_string(), "hi".to_string())]);

        let output = run_shell(
            "ls marker && echo $GREETING",
            dir.path(),
            &env,
            Duration::from_secs(5),
            &CancelToken::new(),
        )
        .await
        .unwrap();

        assert!(output.success());
        assert!(output.stdout.contains("hi"));
    }

    #[tokio::test]
    async fn timeout_kills_long_commands() {
        let err = run("sleep 5", Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, StepError::Timeout(_)));
    }

    #[tokio::test]
    async fn cancellation_stops_running_command() {
        let dir = TempDir::new().unwrap();
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = run_shell("sleep 5", dir.path(), &HashMap::new(), Duration::from_secs(10), &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn missing_working_dir_is_a_spawn_error() {
        let err = run_shell(
            "true",
            Path::new("/nonexistent/rollout"),
            &HashMap::new(),
            Duration::from_secs(1),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, StepError::Spawn { .. }));
    }

    #[test]
    fn oversized_output_keeps_tail() {
        let mut bytes = vec![b'a'; MAX_CAPTURED_OUTPUT + 10];
        bytes.extend_from_slice(b"END");
        let captured = capture(&bytes);
        assert!(captured.starts_with("[truncated]"));
        assert!(captured.ends_with("END"));
    }
}
