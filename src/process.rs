//! Subprocess execution helpers shared by the provisioner and executor:
//! a single-threaded, blocking-subprocess model for local and in-container
//! command execution.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// The outcome of running one external command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl CommandResult {
    fn from_output(output: std::process::Output) -> Self {
        let exit_code = output.status.code().unwrap_or(-1);
        Self {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            success: output.status.success(),
        }
    }
}

/// Options shared by local and container command execution.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
    pub timeout: Option<Duration>,
}

/// Runs `command` through the host's `sh -c` (or `cmd /c` on windows).
pub async fn run_local(command: &str, options: &ExecuteOptions) -> Result<CommandResult> {
    let mut cmd = shell_command(command);
    if let Some(cwd) = &options.cwd {
        cmd.current_dir(cwd);
    }
    for (k, v) in &options.env {
        cmd.env(k, v);
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    run_with_timeout(cmd, options.timeout, command).await
}

/// Runs `command` inside `container` via `docker exec` (or `podman exec`).
pub async fn run_in_container(
    runtime: &str,
    container: &str,
    command: &str,
    options: &ExecuteOptions,
) -> Result<CommandResult> {
    let mut cmd = Command::new(runtime);
    cmd.arg("exec").arg("-i");
    if let Some(cwd) = &options.cwd {
        cmd.arg("-w").arg(cwd);
    }
    for (k, v) in &options.env {
        cmd.arg("-e").arg(format!("{k}={v}"));
    }
    cmd.arg(container).arg("sh").arg("-c").arg(command);
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    run_with_timeout(cmd, options.timeout, command).await
}

async fn run_with_timeout(
    mut cmd: Command,
    timeout: Option<Duration>,
    description: &str,
) -> Result<CommandResult> {
    debug!(command = description, "spawning subprocess");
    let child = cmd
        .spawn()
        .map_err(|e| Error::StepFailed {
            phase: "exec".into(),
            step: description.to_string(),
            message: format!("failed to spawn: {e}"),
        })?;

    let output = match timeout {
        Some(duration) => tokio::time::timeout(duration, child.wait_with_output())
            .await
            .map_err(|_| {
                warn!(command = description, ?duration, "subprocess timed out");
                Error::Timeout(description.to_string())
            })?
            .map_err(Error::Io)?,
        None => child.wait_with_output().await.map_err(Error::Io)?,
    };

    let result = CommandResult::from_output(output);
    if !result.success {
        warn!(command = description, exit_code = result.exit_code, "subprocess exited non-zero");
    } else {
        debug!(command = description, "subprocess exited successfully");
    }
    Ok(result)
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

/// Copies a local path into a running container (`docker cp`).
pub async fn copy_into_container(runtime: &str, src: &Path, container: &str, dest: &str) -> Result<()> {
    let dest_spec = format!("{container}:{dest}");
    let status = Command::new(runtime)
        .arg("cp")
        .arg(src)
        .arg(&dest_spec)
        .status()
        .await
        .map_err(Error::Io)?;
    if !status.success() {
        return Err(Error::ProvisionError {
            sandbox: "container".into(),
            message: format!("docker cp to {dest_spec} failed"),
        });
    }
    Ok(())
}

/// Returns true if `container` is running, per `docker inspect`.
pub async fn is_container_running(runtime: &str, container: &str) -> bool {
    let output = Command::new(runtime)
        .arg("inspect")
        .arg("-f")
        .arg("{{.State.Running}}")
        .arg(container)
        .output()
        .await;
    matches!(output, Ok(o) if o.status.success() && String::from_utf8_lossy(&o.stdout).trim() == "true")
}

/// Resolves the first available container runtime from `preference`.
pub async fn detect_runtime(preference: &[String]) -> Result<String> {
    for candidate in preference {
        if which::which(candidate).is_ok() {
            return Ok(candidate.clone());
        }
    }
    Err(Error::RuntimeNotAvailable(format!(
        "none of {preference:?} found on PATH"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_simple_local_command() {
        let result = run_local("echo hello", &ExecuteOptions::default()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn captures_nonzero_exit_code() {
        let result = run_local("exit 3", &ExecuteOptions::default()).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, 3);
    }

    #[tokio::test]
    async fn times_out_long_running_command() {
        let options = ExecuteOptions {
            timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let result = run_local("sleep 5", &options).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn detect_runtime_fails_when_none_on_path() {
        let result = detect_runtime(&["definitely-not-a-real-binary".to_string()]).await;
        assert!(result.is_err());
    }
}
