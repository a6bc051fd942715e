use thiserror::Error;

/// Surface error kinds from spec §7. Variants carry enough context for
/// the Orchestrator to map them onto `deployment.status=failed` with a
/// phase tag, without scanning a stack trace for a string.
#[derive(Debug, Error)]
pub enum DeployerError {
  #[error("job payload could not be serialized: {0}")]
  NotSerializable(String),

  #[error("queue store unavailable: {0}")]
  QueueUnavailable(String),

  #[error("source unavailable: {0}")]
  SourceUnavailable(String),

  #[error("invalid archive: {0}")]
  InvalidArchive(String),

  #[error("unsupported source type: {0}")]
  UnsupportedSourceType(String),

  #[error("build failed: {stderr_tail}")]
  BuildFailed { stderr_tail: String },

  #[error("unknown builder: {0}")]
  UnknownBuilder(String),

  #[error("quota exceeded: {0}")]
  QuotaExceeded(String),

  #[error("stack convergence timed out after {0:?}")]
  ConvergenceTimeout(std::time::Duration),

  #[error("startup health check failed: {0}")]
  HealthCheckFailed(String),

  #[error("certificate renewal failed: {0}")]
  RenewalFailed(String),

  #[error("transient docker error: {0}")]
  TransientDockerError(String),

  #[error("{0}")]
  Other(#[from] anyhow::Error),
}

impl DeployerError {
  /// The phase tag recorded on the deployment when this error aborts it,
  /// used instead of scanning the error message for the step that failed.
  pub fn phase_tag(&self) -> &'static str {
    match self {
      DeployerError::SourceUnavailable(_)
      | DeployerError::InvalidArchive(_)
      | DeployerError::UnsupportedSourceType(_) => "pulling_source",
      DeployerError::BuildFailed { .. }
      | DeployerError::UnknownBuilder(_) => "building",
      DeployerError::QuotaExceeded(_)
      | DeployerError::ConvergenceTimeout(_)
      | DeployerError::TransientDockerError(_) => "deploying",
      DeployerError::HealthCheckFailed(_) => "active",
      DeployerError::NotSerializable(_)
      | DeployerError::QueueUnavailable(_)
      | DeployerError::RenewalFailed(_)
      | DeployerError::Other(_) => "unknown",
    }
  }

  /// Whether the owning job should be retried by the queue's backoff
  /// policy rather than failing the deployment outright.
  pub fn is_transient(&self) -> bool {
    matches!(
      self,
      DeployerError::QueueUnavailable(_)
        | DeployerError::TransientDockerError(_)
    )
  }
}
