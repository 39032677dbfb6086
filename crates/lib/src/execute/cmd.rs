//! Shell command execution.
//!
//! Commands run with an isolated environment: everything inherited is
//! cleared and only the variables prepared by the executor are set.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{Action, ActionOutput, ActionRunner, ExecuteError};
use crate::label::Label;

/// Runs actions through a system shell.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
  shell: Option<String>,
}

impl ShellRunner {
  pub fn new(shell: Option<String>) -> Self {
    Self { shell }
  }
}

#[async_trait]
impl ActionRunner for ShellRunner {
  async fn run(&self, action: &Action) -> Result<ActionOutput, ExecuteError> {
    run_command(
      &action.label,
      &action.command,
      &action.env,
      &action.work_dir,
      action.timeout,
      self.shell.as_deref(),
    )
    .await
  }
}

/// Run `cmd` in `work_dir` with exactly `env`.
///
/// The child is killed if `timeout` elapses first.
pub async fn run_command(
  label: &Label,
  cmd: &str,
  env: &BTreeMap<String, String>,
  work_dir: &Path,
  timeout: Duration,
  shell: Option<&str>,
) -> Result<ActionOutput, ExecuteError> {
  info!(label = %label, cmd = %cmd, "executing command");

  let (shell_cmd, shell_args) = get_shell(shell);

  let mut command = Command::new(&shell_cmd);
  command
    .args(&shell_args)
    .arg(cmd)
    .current_dir(work_dir)
    .env_clear()
    .envs(env)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

  debug!(shell = %shell_cmd, work_dir = ?work_dir, "spawning process");

  let child = command.spawn().map_err(|source| ExecuteError::Spawn {
    label: label.clone(),
    source,
  })?;

  let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
    Ok(result) => result.map_err(|source| ExecuteError::Spawn {
      label: label.clone(),
      source,
    })?,
    Err(_) => {
      return Err(ExecuteError::Timeout {
        label: label.clone(),
        timeout,
      });
    }
  };

  let stdout = String::from_utf8_lossy(&output.stdout).to_string();
  let stderr = String::from_utf8_lossy(&output.stderr).to_string();

  if !output.status.success() {
    if !stderr.is_empty() {
      debug!(label = %label, stderr = %stderr, "command stderr");
    }
    return Err(ExecuteError::CmdFailed {
      label: label.clone(),
      code: output.status.code(),
      stderr: stderr.trim().to_string(),
    });
  }

  if !stdout.is_empty() {
    debug!(label = %label, stdout = %stdout.trim(), "command output");
  }

  Ok(ActionOutput { stdout, stderr })
}

/// Get the shell command and arguments for the current platform.
///
/// `/bin/sh` is used rather than `$SHELL`, which may source profile files and
/// break isolation. An explicit override picks its argument style by name.
fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec!["-NoProfile".to_string(), "-Command".to_string()]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    (
      "powershell.exe".to_string(),
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ],
    )
  }
}
