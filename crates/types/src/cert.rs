use serde::{Deserialize, Serialize};
use strum::Display;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RenewalStatus {
  Pending,
  InProgress,
  Completed,
  Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SslCertificate {
  /// Domain is the primary key.
  pub domain: String,
  pub project_id: String,
  pub issuer: String,
  pub auto_renew: bool,
  pub expires_at: i64,
  pub renewal_status: RenewalStatus,
  pub last_renewal_attempt: Option<i64>,
  pub error_message: Option<String>,
  pub cert_path: String,
  pub key_path: String,
  pub fingerprint: Option<String>,
  pub serial: Option<String>,
  pub sans: Vec<String>,
  pub valid: bool,
}

impl SslCertificate {
  pub fn new(domain: impl Into<String>, project_id: impl Into<String>) -> Self {
    let domain = domain.into();
    Self {
      cert_path: format!("/certificates/{domain}.crt"),
      key_path: format!("/certificates/{domain}.key"),
      domain,
      project_id: project_id.into(),
      issuer: "letsencrypt".to_string(),
      auto_renew: true,
      expires_at: 0,
      renewal_status: RenewalStatus::Pending,
      last_renewal_attempt: None,
      error_message: None,
      fingerprint: None,
      serial: None,
      sans: Vec::new(),
      valid: false,
    }
  }

  /// True if `expires_at` is within `window_ms` of `now`.
  pub fn expires_within(&self, now: i64, window_ms: i64) -> bool {
    self.expires_at - now < window_ms
  }
}
