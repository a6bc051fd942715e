use serde::{Deserialize, Serialize};
use strum::Display;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HealthStatus {
  Healthy,
  Unhealthy,
  Timeout,
  Error,
  #[default]
  Unknown,
}

impl HealthStatus {
  pub fn is_healthy(self) -> bool {
    matches!(self, HealthStatus::Healthy)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StackHealthRollup {
  Healthy,
  Degraded,
  Unhealthy,
}

impl StackHealthRollup {
  /// Spec §4.9: healthy >= 90%, degraded >= 50%, else unhealthy.
  pub fn from_ratio(healthy_ratio: f64) -> Self {
    if healthy_ratio >= 0.9 {
      StackHealthRollup::Healthy
    } else if healthy_ratio >= 0.5 {
      StackHealthRollup::Degraded
    } else {
      StackHealthRollup::Unhealthy
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
  pub service_id: String,
  pub stack_id: String,
  pub timestamp: i64,
  pub endpoint: String,
  pub status: HealthStatus,
  pub response_time_ms: u64,
  pub status_code: Option<u16>,
  pub error_message: Option<String>,
}
