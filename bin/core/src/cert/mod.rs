//! Certificate Coordinator (spec §4.6): tracks `SslCertificate` rows
//! per domain and drives the expiry-scan / file-validation duties the
//! Scheduler triggers periodically. ACME issuance itself is delegated
//! to Traefik; this component only records what it observes on disk.

use std::path::Path;

use async_trait::async_trait;
use database::{bson::doc, find_collect};
use deployer_types::{
  Alert, AlertSeverity, AlertType, EnqueueOptions, JobKind, RenewalStatus,
  SslCertificate, now_ms,
};
use mongodb::Collection;
use tracing::{info, warn};
use x509_parser::prelude::*;

use crate::queue::JobStore;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[async_trait]
pub trait CertStore: Send + Sync {
  async fn upsert(&self, cert: SslCertificate) -> anyhow::Result<()>;
  async fn get(&self, domain: &str) -> anyhow::Result<Option<SslCertificate>>;
  async fn list_auto_renew(&self) -> anyhow::Result<Vec<SslCertificate>>;
  async fn list_all(&self) -> anyhow::Result<Vec<SslCertificate>>;
}

pub struct MongoCertStore {
  certificates: Collection<SslCertificate>,
}

impl MongoCertStore {
  pub fn new(certificates: Collection<SslCertificate>) -> Self {
    Self { certificates }
  }
}

#[async_trait]
impl CertStore for MongoCertStore {
  async fn upsert(&self, cert: SslCertificate) -> anyhow::Result<()> {
    self
      .certificates
      .replace_one(doc! { "domain": &cert.domain }, &cert)
      .upsert(true)
      .await?;
    Ok(())
  }

  async fn get(&self, domain: &str) -> anyhow::Result<Option<SslCertificate>> {
    Ok(self.certificates.find_one(doc! { "domain": domain }).await?)
  }

  async fn list_auto_renew(&self) -> anyhow::Result<Vec<SslCertificate>> {
    find_collect(&self.certificates, doc! { "auto_renew": true }, None).await
  }

  async fn list_all(&self) -> anyhow::Result<Vec<SslCertificate>> {
    find_collect(&self.certificates, doc! {}, None).await
  }
}

pub struct CertCoordinator<S: CertStore, J: JobStore> {
  store: S,
  jobs: J,
  cert_dir: std::path::PathBuf,
}

impl<S: CertStore, J: JobStore> CertCoordinator<S, J> {
  pub fn new(store: S, jobs: J, cert_dir: impl Into<std::path::PathBuf>) -> Self {
    Self { store, jobs, cert_dir: cert_dir.into() }
  }

  /// Daily duty: enqueue renewal for certs within 7 days of expiry, log
  /// a warning for the 7-30 day window (spec §4.6).
  pub async fn expiry_scan(&self) -> anyhow::Result<()> {
    let now = now_ms();
    for cert in self.store.list_auto_renew().await? {
      if cert.expires_within(now, 7 * DAY_MS) {
        self.renew_certificate(&cert.domain).await?;
      } else if cert.expires_within(now, 30 * DAY_MS) {
        warn!(
          "certificate for {} expires within 30 days (at {})",
          cert.domain, cert.expires_at
        );
      }
    }
    Ok(())
  }

  /// Every-6h duty: re-parse every on-disk cert, refresh expiry/SANs/
  /// fingerprint, mark invalid if unreadable or expired.
  pub async fn file_validation(&self) -> anyhow::Result<()> {
    for mut cert in self.store.list_all().await? {
      match parse_cert_file(&self.cert_dir, &cert.domain).await {
        Ok(info) => {
          cert.expires_at = info.expires_at;
          cert.sans = info.sans;
          cert.fingerprint = Some(info.fingerprint);
          cert.valid = info.expires_at > now_ms();
        }
        Err(e) => {
          warn!("certificate file validation failed for {}: {e}", cert.domain);
          cert.valid = false;
        }
      }
      self.store.upsert(cert).await?;
    }
    Ok(())
  }

  /// Transitions `renewal_status` pending -> in-progress, enqueues the
  /// renewal job with priority 1 and exponential backoff (base 10s, max
  /// 5 attempts).
  pub async fn renew_certificate(&self, domain: &str) -> anyhow::Result<()> {
    let Some(mut cert) = self.store.get(domain).await? else {
      anyhow::bail!("no certificate row for domain {domain}");
    };
    cert.renewal_status = RenewalStatus::InProgress;
    cert.last_renewal_attempt = Some(now_ms());
    self.store.upsert(cert).await?;

    self
      .jobs
      .enqueue(
        JobKind::RenewCertificate,
        serde_json::json!({ "domain": domain }),
        EnqueueOptions {
          priority: 1,
          max_attempts: 5,
          backoff: deployer_types::BackoffPolicy::Exponential { base_delay_ms: 10_000 },
          ..Default::default()
        },
      )
      .await?;
    info!("enqueued certificate renewal for {domain}");
    Ok(())
  }

  /// Records the outcome of a renewal attempt observed by a subsequent
  /// file validation pass. On persistent failure, raises a critical
  /// `certificate` alert and leaves the cert marked invalid.
  pub async fn record_renewal_outcome(
    &self,
    domain: &str,
    success: bool,
    error: Option<String>,
  ) -> Option<Alert> {
    let Ok(Some(mut cert)) = self.store.get(domain).await else {
      return None;
    };
    if success {
      cert.renewal_status = RenewalStatus::Completed;
      cert.error_message = None;
      let _ = self.store.upsert(cert).await;
      None
    } else {
      cert.renewal_status = RenewalStatus::Failed;
      cert.error_message = error.clone();
      cert.valid = false;
      let _ = self.store.upsert(cert).await;
      Some(Alert::new(
        domain,
        None,
        AlertType::Health,
        AlertSeverity::Critical,
        0.0,
        0.0,
        error.unwrap_or_else(|| {
          format!("certificate renewal for {domain} failed persistently")
        }),
      ))
    }
  }
}

struct ParsedCert {
  expires_at: i64,
  sans: Vec<String>,
  fingerprint: String,
}

async fn parse_cert_file(
  cert_dir: &Path,
  domain: &str,
) -> anyhow::Result<ParsedCert> {
  let path = cert_dir.join(format!("{domain}.crt"));
  let pem_bytes = tokio::fs::read(&path).await?;
  let (_, pem) = x509_parser::pem::parse_x509_pem(&pem_bytes)
    .map_err(|e| anyhow::anyhow!("failed to parse PEM for {domain}: {e}"))?;
  let cert = pem
    .parse_x509()
    .map_err(|e| anyhow::anyhow!("failed to parse certificate for {domain}: {e}"))?;

  let expires_at = cert.validity().not_after.timestamp() * 1000;
  let sans = cert
    .subject_alternative_name()
    .ok()
    .flatten()
    .map(|ext| {
      ext
        .value
        .general_names
        .iter()
        .filter_map(|name| match name {
          GeneralName::DNSName(dns) => Some(dns.to_string()),
          _ => None,
        })
        .collect()
    })
    .unwrap_or_default();
  let fingerprint = cert
    .raw
    .iter()
    .fold(String::new(), |mut acc, byte| {
      acc.push_str(&format!("{byte:02x}"));
      acc
    });

  Ok(ParsedCert { expires_at, sans, fingerprint })
}

#[cfg(test)]
mod test {
  use super::*;
  use std::sync::Mutex;

  #[derive(Default)]
  struct MemoryCertStore {
    certs: Mutex<Vec<SslCertificate>>,
  }

  #[async_trait]
  impl CertStore for MemoryCertStore {
    async fn upsert(&self, cert: SslCertificate) -> anyhow::Result<()> {
      let mut certs = self.certs.lock().unwrap();
      if let Some(slot) = certs.iter_mut().find(|c| c.domain == cert.domain) {
        *slot = cert;
      } else {
        certs.push(cert);
      }
      Ok(())
    }
    async fn get(&self, domain: &str) -> anyhow::Result<Option<SslCertificate>> {
      Ok(self.certs.lock().unwrap().iter().find(|c| c.domain == domain).cloned())
    }
    async fn list_auto_renew(&self) -> anyhow::Result<Vec<SslCertificate>> {
      Ok(self.certs.lock().unwrap().iter().filter(|c| c.auto_renew).cloned().collect())
    }
    async fn list_all(&self) -> anyhow::Result<Vec<SslCertificate>> {
      Ok(self.certs.lock().unwrap().clone())
    }
  }

  #[tokio::test]
  async fn expiry_scan_enqueues_within_seven_days() {
    let store = MemoryCertStore::default();
    let jobs = crate::queue::MemoryJobStore::default();
    let mut cert = SslCertificate::new("app.example.test", "proj");
    cert.expires_at = now_ms() + 3 * DAY_MS;
    store.upsert(cert).await.unwrap();

    let coordinator = CertCoordinator::new(store, jobs, "/certificates");
    coordinator.expiry_scan().await.unwrap();

    let counts = coordinator.jobs.counts().await.unwrap();
    assert_eq!(counts.waiting, 1);
  }
}
