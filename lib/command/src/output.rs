use std::{
  io,
  os::unix::process::ExitStatusExt,
  process::{ExitStatus, Output},
};

#[derive(Debug, Clone)]
pub struct CommandOutput {
  pub status: ExitStatus,
  pub stdout: String,
  pub stderr: String,
}

impl CommandOutput {
  pub fn from(output: io::Result<Output>) -> Self {
    match output {
      Ok(output) => Self {
        status: output.status,
        stdout: String::from_utf8(output.stdout)
          .unwrap_or_else(|_| "failed to decode stdout".to_string()),
        stderr: String::from_utf8(output.stderr)
          .unwrap_or_else(|_| "failed to decode stderr".to_string()),
      },
      Err(e) => CommandOutput::from_err(e),
    }
  }

  pub fn from_err(e: io::Error) -> Self {
    Self {
      status: ExitStatus::from_raw(1),
      stdout: String::new(),
      stderr: format!("{e:#}"),
    }
  }

  pub fn success(&self) -> bool {
    self.status.success()
  }

  pub fn combined(&self) -> String {
    if self.stderr.is_empty() {
      self.stdout.clone()
    } else {
      format!("{}\n{}", self.stdout, self.stderr)
    }
  }
}
