pub mod alert;
pub mod cert;
pub mod config;
pub mod deployment;
pub mod error;
pub mod health;
pub mod job;
pub mod metrics;
pub mod payloads;
pub mod service;
pub mod stack;
pub mod subdomain;

pub use alert::*;
pub use cert::*;
pub use deployment::*;
pub use error::*;
pub use health::*;
pub use job::*;
pub use metrics::*;
pub use payloads::*;
pub use service::*;
pub use stack::*;
pub use subdomain::*;

use chrono::Utc;

/// Milliseconds since the unix epoch, used for every timestamp field.
pub fn now_ms() -> i64 {
  Utc::now().timestamp_millis()
}

/// Generates a fresh random id for a new resource.
pub fn new_id() -> String {
  uuid::Uuid::new_v4().to_string()
}

/// Strips NUL bytes from a log message before it is persisted, per
/// the Orchestrator's "log sanitization" invariant (spec §4.8).
/// Logging must never fail the deployment, so this never errors.
pub fn sanitize_log(message: &str) -> String {
  message.chars().filter(|c| *c != '\0').collect()
}

/// Serializes arbitrary metadata to a JSON string, falling back to `{}`
/// on any serialization failure rather than propagating the error.
pub fn sanitize_metadata<T: serde::Serialize>(metadata: &T) -> String {
  serde_json::to_string(metadata).unwrap_or_else(|_| "{}".to_string())
}

/// A single captured command execution, attached to jobs and
/// deployments. Mirrors the teacher's `command::output_into_log` shape.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LogLine {
  pub stage: String,
  pub command: String,
  pub stdout: String,
  pub stderr: String,
  pub success: bool,
  pub start_ts: i64,
  pub end_ts: i64,
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn strips_nul_bytes() {
    let sanitized = sanitize_log("hello\0world\0");
    assert_eq!(sanitized, "helloworld");
    assert!(!sanitized.contains('\0'));
  }

  #[test]
  fn metadata_falls_back_to_empty_object() {
    // f64::NAN fails to serialize to JSON.
    let bad = f64::NAN;
    assert_eq!(sanitize_metadata(&bad), "{}");
  }
}
