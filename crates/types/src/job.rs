use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::Display;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum JobKind {
  Deploy,
  Rollback,
  Update,
  Remove,
  Scale,
  Build,
  Cleanup,
  HealthCheck,
  RenewCertificate,
  DeployUpload,
  UpdateTraefikConfig,
  SendAlertNotification,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
  Waiting,
  Delayed,
  Active,
  Completed,
  Failed,
  Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackoffPolicy {
  Fixed { delay_ms: u64 },
  Exponential { base_delay_ms: u64 },
}

impl BackoffPolicy {
  /// Delay before retrying `attempt` (1-indexed). Spec §8 "Retry math":
  /// attempt k is delayed >= b * 2^(k-1) for exponential backoff base b.
  pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
    match self {
      BackoffPolicy::Fixed { delay_ms } => *delay_ms,
      BackoffPolicy::Exponential { base_delay_ms } => {
        let exponent = attempt.saturating_sub(1);
        base_delay_ms.saturating_mul(1u64 << exponent.min(32))
      }
    }
  }
}

impl Default for BackoffPolicy {
  fn default() -> Self {
    BackoffPolicy::Exponential { base_delay_ms: 1_000 }
  }
}

#[derive(Debug, Clone)]
pub struct EnqueueOptions {
  /// Lower priority value is serviced first.
  pub priority: i32,
  pub delay_ms: u64,
  pub max_attempts: u32,
  pub backoff: BackoffPolicy,
  pub remove_on_complete: usize,
  pub remove_on_fail: usize,
  pub deployment_id: Option<String>,
  pub stack_id: Option<String>,
}

impl Default for EnqueueOptions {
  fn default() -> Self {
    Self {
      priority: 10,
      delay_ms: 0,
      max_attempts: 3,
      backoff: BackoffPolicy::default(),
      remove_on_complete: 10,
      remove_on_fail: 25,
      deployment_id: None,
      stack_id: None,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
  pub success: bool,
  pub message: String,
  #[serde(default)]
  pub fields: HashMap<String, serde_json::Value>,
}

impl JobResult {
  pub fn ok(message: impl Into<String>) -> Self {
    Self {
      success: true,
      message: message.into(),
      fields: HashMap::new(),
    }
  }

  pub fn err(message: impl Into<String>) -> Self {
    Self {
      success: false,
      message: message.into(),
      fields: HashMap::new(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
  pub id: String,
  pub kind: JobKind,
  pub payload: serde_json::Value,
  pub status: JobStatus,
  pub progress: u8,
  pub attempts: u32,
  pub max_attempts: u32,
  pub priority: i32,
  pub eligible_at: i64,
  pub backoff: BackoffPolicy,
  pub remove_on_complete: usize,
  pub remove_on_fail: usize,
  pub created_at: i64,
  pub started_at: Option<i64>,
  pub finished_at: Option<i64>,
  pub claim_expires_at: Option<i64>,
  pub deployment_id: Option<String>,
  pub stack_id: Option<String>,
  pub error: Option<String>,
  pub result: Option<JobResult>,
  pub logs: Vec<crate::LogLine>,
}

impl Job {
  pub fn new(
    kind: JobKind,
    payload: serde_json::Value,
    opts: EnqueueOptions,
  ) -> Self {
    let now = crate::now_ms();
    Self {
      id: crate::new_id(),
      kind,
      payload,
      status: if opts.delay_ms > 0 {
        JobStatus::Delayed
      } else {
        JobStatus::Waiting
      },
      progress: 0,
      attempts: 0,
      max_attempts: opts.max_attempts,
      priority: opts.priority,
      eligible_at: now + opts.delay_ms as i64,
      backoff: opts.backoff,
      remove_on_complete: opts.remove_on_complete,
      remove_on_fail: opts.remove_on_fail,
      created_at: now,
      started_at: None,
      finished_at: None,
      claim_expires_at: None,
      deployment_id: opts.deployment_id,
      stack_id: opts.stack_id,
      error: None,
      result: None,
      logs: Vec::new(),
    }
  }

  pub fn payload_as<T: serde::de::DeserializeOwned>(
    &self,
  ) -> anyhow::Result<T> {
    serde_json::from_value(self.payload.clone())
      .map_err(anyhow::Error::from)
  }
}
