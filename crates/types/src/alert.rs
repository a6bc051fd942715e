use serde::{Deserialize, Serialize};
use strum::Display;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AlertType {
  Cpu,
  Memory,
  Storage,
  Network,
  Health,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AlertSeverity {
  Warning,
  Critical,
}

/// (scope, type) de-duplication key, spec §3 "Invariants".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlertScope {
  pub stack_id: String,
  pub service_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
  pub id: String,
  pub stack_id: String,
  pub service_id: Option<String>,
  pub alert_type: AlertType,
  pub severity: AlertSeverity,
  pub threshold: f64,
  pub current_value: f64,
  pub message: String,
  pub opened_at: i64,
  pub is_resolved: bool,
  pub resolved_at: Option<i64>,
  /// Consecutive healthy probes observed since opening, used by the
  /// health recovery sweep (spec §4.9).
  pub consecutive_healthy_probes: u32,
}

impl Alert {
  pub fn new(
    stack_id: impl Into<String>,
    service_id: Option<String>,
    alert_type: AlertType,
    severity: AlertSeverity,
    threshold: f64,
    current_value: f64,
    message: impl Into<String>,
  ) -> Self {
    Self {
      id: crate::new_id(),
      stack_id: stack_id.into(),
      service_id,
      alert_type,
      severity,
      threshold,
      current_value,
      message: message.into(),
      opened_at: crate::now_ms(),
      is_resolved: false,
      resolved_at: None,
      consecutive_healthy_probes: 0,
    }
  }

  pub fn scope(&self) -> AlertScope {
    AlertScope {
      stack_id: self.stack_id.clone(),
      service_id: self.service_id.clone(),
    }
  }
}
