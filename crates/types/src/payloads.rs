//! Job payload wire shapes (spec §6 "External Interfaces"). Every
//! `Job::payload` is a `serde_json::Value` produced by serializing one
//! of these; `validate_payload` lets the enqueue path reject a bad
//! shape before it is ever persisted (Design Notes: "this also powers
//! the enqueue-side payload validator").

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{DomainMapping, SourceSpec};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployPayload {
  pub deployment_id: String,
  pub service_id: String,
  pub project_id: String,
  pub source_spec: SourceSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackPayload {
  pub deployment_id: String,
  pub target_deployment_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployUploadPayload {
  pub upload_id: String,
  pub service_id: String,
  pub deployment_id: String,
  pub extract_path: String,
  #[serde(default)]
  pub environment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTraefikConfigPayload {
  pub stack_id: String,
  pub stack_name: String,
  pub domain_mappings: Vec<DomainMapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewCertificatePayload {
  pub domain: String,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum CleanupType {
  UnusedImages,
  StoppedContainers,
  DanglingNetworks,
  Volumes,
  All,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupPayload {
  pub stack_id: String,
  pub stack_name: String,
  pub cleanup_type: CleanupType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckPayload {
  pub stack_id: String,
  pub stack_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertNotificationPayload {
  pub stack_id: String,
  #[serde(default)]
  pub service_id: Option<String>,
  pub alert_type: crate::AlertType,
  pub severity: crate::AlertSeverity,
  pub message: String,
  pub threshold: f64,
  pub current_value: f64,
  pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendAlertNotificationPayload {
  pub alert: AlertNotificationPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePayload {
  pub deployment_id: String,
  #[serde(default)]
  pub fields: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovePayload {
  pub stack_id: String,
  pub stack_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalePayload {
  pub stack_id: String,
  pub stack_name: String,
  pub replicas: HashMap<String, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildPayload {
  pub deployment_id: String,
  pub service_id: String,
  pub project_id: String,
}

/// Deserializes `payload` into the shape `kind` expects, purely to
/// reject a malformed enqueue before it is persisted. Returns the kind
/// name on failure so the caller can build a `NotSerializable` error.
pub fn validate_payload(
  kind: crate::JobKind,
  payload: &serde_json::Value,
) -> Result<(), String> {
  use crate::JobKind::*;
  let result = match kind {
    Deploy => serde_json::from_value::<DeployPayload>(payload.clone())
      .map(|_| ()),
    Rollback => serde_json::from_value::<RollbackPayload>(payload.clone())
      .map(|_| ()),
    DeployUpload => {
      serde_json::from_value::<DeployUploadPayload>(payload.clone())
        .map(|_| ())
    }
    UpdateTraefikConfig => {
      serde_json::from_value::<UpdateTraefikConfigPayload>(payload.clone())
        .map(|_| ())
    }
    RenewCertificate => {
      serde_json::from_value::<RenewCertificatePayload>(payload.clone())
        .map(|_| ())
    }
    Cleanup => serde_json::from_value::<CleanupPayload>(payload.clone())
      .map(|_| ()),
    HealthCheck => {
      serde_json::from_value::<HealthCheckPayload>(payload.clone())
        .map(|_| ())
    }
    SendAlertNotification => {
      serde_json::from_value::<SendAlertNotificationPayload>(
        payload.clone(),
      )
      .map(|_| ())
    }
    Update => serde_json::from_value::<UpdatePayload>(payload.clone())
      .map(|_| ()),
    Remove => serde_json::from_value::<RemovePayload>(payload.clone())
      .map(|_| ()),
    Scale => serde_json::from_value::<ScalePayload>(payload.clone())
      .map(|_| ()),
    Build => serde_json::from_value::<BuildPayload>(payload.clone())
      .map(|_| ()),
  };
  result.map_err(|e| format!("payload for {kind} does not match its schema: {e}"))
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn rejects_payload_missing_required_fields() {
    let err =
      validate_payload(crate::JobKind::Deploy, &serde_json::json!({}))
        .unwrap_err();
    assert!(err.contains("deploy"));
  }

  #[test]
  fn accepts_well_formed_rollback_payload() {
    let payload = serde_json::json!({
      "deploymentId": "d1",
      "targetDeploymentId": "d0",
    });
    validate_payload(crate::JobKind::Rollback, &payload).unwrap();
  }
}
