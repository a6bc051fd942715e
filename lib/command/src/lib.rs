use std::{
  path::{Path, PathBuf},
  process::Stdio,
  sync::OnceLock,
};

use deployer_types::{LogLine, now_ms, sanitize_log};

mod output;

pub use output::*;
use tokio::process::Command;

/// Commands are run directly, and cannot include '&&'.
pub async fn run_standard_command_logged(
  stage: &str,
  path: impl Into<Option<&Path>>,
  command: impl Into<String>,
) -> LogLine {
  let command = command.into();
  let start_ts = now_ms();
  let output = run_standard_command(&command, path).await;
  output_into_log(stage, command, start_ts, output)
}

/// Commands are wrapped in `sh -c`, and can include '&&'.
pub async fn run_shell_command_logged(
  stage: &str,
  path: impl Into<Option<&Path>>,
  command: impl Into<String>,
) -> LogLine {
  let command = command.into();
  let start_ts = now_ms();
  let output = run_shell_command(&command, path).await;
  output_into_log(stage, command, start_ts, output)
}

pub fn output_into_log(
  stage: &str,
  command: String,
  start_ts: i64,
  output: CommandOutput,
) -> LogLine {
  let success = output.success();
  LogLine {
    stage: sanitize_log(stage),
    command: sanitize_log(&command),
    stdout: sanitize_log(&output.stdout),
    stderr: sanitize_log(&output.stderr),
    success,
    start_ts,
    end_ts: now_ms(),
  }
}

/// Commands are run directly, and cannot include '&&'.
pub async fn run_standard_command(
  command: &str,
  path: impl Into<Option<&Path>>,
) -> CommandOutput {
  let lexed = match shlex::split(command) {
    Some(lexed) if !lexed.is_empty() => lexed,
    _ => {
      return CommandOutput::from_err(std::io::Error::other(
        "command lexed into empty args",
      ));
    }
  };

  let mut cmd = Command::new(&lexed[0]);
  cmd
    .args(&lexed[1..])
    .kill_on_drop(true)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

  if let Some(path) = path.into() {
    match path.canonicalize() {
      Ok(path) => {
        cmd.current_dir(path);
      }
      Err(e) => return CommandOutput::from_err(e),
    }
  }

  CommandOutput::from(cmd.output().await)
}

fn shell() -> &'static str {
  static DEFAULT_SHELL: OnceLock<String> = OnceLock::new();
  DEFAULT_SHELL.get_or_init(|| {
    if PathBuf::from("/bin/bash").exists()
      || PathBuf::from("/usr/bin/bash").exists()
    {
      String::from("bash")
    } else {
      String::from("sh")
    }
  })
}

/// Commands are wrapped in `sh -c`, and can include '&&'.
pub async fn run_shell_command(
  command: &str,
  path: impl Into<Option<&Path>>,
) -> CommandOutput {
  let mut cmd = Command::new(shell());
  cmd.args(["-c", command]).kill_on_drop(true).stdin(Stdio::null());

  if let Some(path) = path.into() {
    match path.canonicalize() {
      Ok(path) => {
        cmd.current_dir(path);
      }
      Err(e) => return CommandOutput::from_err(e),
    }
  }

  cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
  CommandOutput::from(cmd.output().await)
}
