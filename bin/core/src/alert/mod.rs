//! Alert Store (spec §3 "Invariants", §4.9/§4.10 alerting rules):
//! durable `Alert` rows plus the (scope, type) de-dup/cooldown gate
//! shared by the Health Monitor and Metrics Collector, and the
//! notification sink the `send-alert-notification` job drives.

use async_trait::async_trait;
use database::{bson::doc, find_collect};
use deployer_types::{
  Alert, AlertScope, AlertSeverity, AlertType, EnqueueOptions, JobKind,
};
use mongodb::Collection;
use std::sync::Mutex;
use tracing::{error, warn};

use crate::queue::JobStore;
use crate::state::{open_alerts_cache, AlertScopeKey};

#[async_trait]
pub trait AlertStore: Send + Sync {
  async fn upsert(&self, alert: Alert) -> anyhow::Result<()>;
  async fn get_open(
    &self,
    scope: &AlertScope,
    alert_type: AlertType,
  ) -> anyhow::Result<Option<Alert>>;
  async fn list_open_for_stack(
    &self,
    stack_id: &str,
  ) -> anyhow::Result<Vec<Alert>>;
  /// Most recent alert for (scope, type), open or resolved — used to
  /// enforce the cooldown window against a just-resolved alert, since
  /// `get_open` alone can't see one that already closed.
  async fn get_last(
    &self,
    scope: &AlertScope,
    alert_type: AlertType,
  ) -> anyhow::Result<Option<Alert>>;
  /// Resolved alerts older than `before_ms`, for the daily metrics GC
  /// pass (spec §4.10: "resolved alerts older than 7 days").
  async fn delete_resolved_before(
    &self,
    before_ms: i64,
  ) -> anyhow::Result<u64>;
}

pub struct MongoAlertStore {
  alerts: Collection<Alert>,
}

impl MongoAlertStore {
  pub fn new(alerts: Collection<Alert>) -> Self {
    Self { alerts }
  }
}

#[async_trait]
impl AlertStore for MongoAlertStore {
  async fn upsert(&self, alert: Alert) -> anyhow::Result<()> {
    self
      .alerts
      .replace_one(doc! { "id": &alert.id }, &alert)
      .upsert(true)
      .await?;
    Ok(())
  }

  async fn get_open(
    &self,
    scope: &AlertScope,
    alert_type: AlertType,
  ) -> anyhow::Result<Option<Alert>> {
    let mut filter = doc! {
      "stack_id": &scope.stack_id,
      "alert_type": bson::to_bson(&alert_type)?,
      "is_resolved": false,
    };
    match &scope.service_id {
      Some(id) => {
        filter.insert("service_id", id);
      }
      None => {
        filter.insert("service_id", bson::Bson::Null);
      }
    }
    Ok(self.alerts.find_one(filter).await?)
  }

  async fn list_open_for_stack(
    &self,
    stack_id: &str,
  ) -> anyhow::Result<Vec<Alert>> {
    find_collect(
      &self.alerts,
      doc! { "stack_id": stack_id, "is_resolved": false },
      None,
    )
    .await
  }

  async fn get_last(
    &self,
    scope: &AlertScope,
    alert_type: AlertType,
  ) -> anyhow::Result<Option<Alert>> {
    let mut filter = doc! {
      "stack_id": &scope.stack_id,
      "alert_type": bson::to_bson(&alert_type)?,
    };
    match &scope.service_id {
      Some(id) => {
        filter.insert("service_id", id);
      }
      None => {
        filter.insert("service_id", bson::Bson::Null);
      }
    }
    let options = mongodb::options::FindOneOptions::builder()
      .sort(doc! { "opened_at": -1 })
      .build();
    Ok(self.alerts.find_one(filter).with_options(options).await?)
  }

  async fn delete_resolved_before(
    &self,
    before_ms: i64,
  ) -> anyhow::Result<u64> {
    let result = self
      .alerts
      .delete_many(doc! {
        "is_resolved": true,
        "resolved_at": { "$lt": before_ms },
      })
      .await?;
    Ok(result.deleted_count)
  }
}

/// In-process fake for monitor/collector unit tests.
#[derive(Default)]
pub struct MemoryAlertStore {
  alerts: Mutex<Vec<Alert>>,
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
  async fn upsert(&self, alert: Alert) -> anyhow::Result<()> {
    let mut alerts = self.alerts.lock().unwrap();
    if let Some(slot) = alerts.iter_mut().find(|a| a.id == alert.id) {
      *slot = alert;
    } else {
      alerts.push(alert);
    }
    Ok(())
  }

  async fn get_open(
    &self,
    scope: &AlertScope,
    alert_type: AlertType,
  ) -> anyhow::Result<Option<Alert>> {
    Ok(
      self
        .alerts
        .lock()
        .unwrap()
        .iter()
        .find(|a| {
          !a.is_resolved
            && a.stack_id == scope.stack_id
            && a.service_id == scope.service_id
            && a.alert_type == alert_type
        })
        .cloned(),
    )
  }

  async fn list_open_for_stack(
    &self,
    stack_id: &str,
  ) -> anyhow::Result<Vec<Alert>> {
    Ok(
      self
        .alerts
        .lock()
        .unwrap()
        .iter()
        .filter(|a| a.stack_id == stack_id && !a.is_resolved)
        .cloned()
        .collect(),
    )
  }

  async fn get_last(
    &self,
    scope: &AlertScope,
    alert_type: AlertType,
  ) -> anyhow::Result<Option<Alert>> {
    Ok(
      self
        .alerts
        .lock()
        .unwrap()
        .iter()
        .filter(|a| {
          a.stack_id == scope.stack_id
            && a.service_id == scope.service_id
            && a.alert_type == alert_type
        })
        .max_by_key(|a| a.opened_at)
        .cloned(),
    )
  }

  async fn delete_resolved_before(
    &self,
    before_ms: i64,
  ) -> anyhow::Result<u64> {
    let mut alerts = self.alerts.lock().unwrap();
    let before = alerts.len();
    alerts.retain(|a| {
      !(a.is_resolved && a.resolved_at.is_some_and(|t| t < before_ms))
    });
    Ok((before - alerts.len()) as u64)
  }
}

/// Delivers an already-persisted alert to whatever channel operators
/// read. The teacher's notification surface (email/webhook/Slack) is an
/// external collaborator, so this defaults to a structured log line;
/// swap in a real sink at startup without touching the alerting logic.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
  async fn notify(
    &self,
    payload: &deployer_types::AlertNotificationPayload,
  ) -> anyhow::Result<()>;
}

pub struct LogNotifier;

#[async_trait]
impl AlertNotifier for LogNotifier {
  async fn notify(
    &self,
    payload: &deployer_types::AlertNotificationPayload,
  ) -> anyhow::Result<()> {
    match payload.severity {
      AlertSeverity::Critical => error!(
        stack_id = %payload.stack_id,
        alert_type = %payload.alert_type,
        "{}",
        payload.message
      ),
      AlertSeverity::Warning => warn!(
        stack_id = %payload.stack_id,
        alert_type = %payload.alert_type,
        "{}",
        payload.message
      ),
    }
    Ok(())
  }
}

/// Opens a new alert and enqueues its notification job, unless one is
/// already open for the same (scope, type), or the prior alert of that
/// (scope, type) resolved less than `alert_cooldown_secs` ago (spec
/// Glossary: "Open alerts are de-duplicated by (scope, type) within a
/// cool-down window of 5 minutes" — guards against flap-storms where a
/// condition flickers across the alert/resolve boundary).
pub async fn raise<A: AlertStore, J: JobStore>(
  store: &A,
  jobs: &J,
  alert: Alert,
) -> anyhow::Result<Option<Alert>> {
  raise_with_priority(store, jobs, alert, EnqueueOptions::default().priority)
    .await
}

/// Same as [`raise`] but lets the caller pick the notification job's
/// priority — the Health Monitor uses priority 1 for critical alerts
/// (spec §4.9: "enqueue `send-alert-notification` with priority 1 for
/// critical").
pub async fn raise_with_priority<A: AlertStore, J: JobStore>(
  store: &A,
  jobs: &J,
  alert: Alert,
  priority: i32,
) -> anyhow::Result<Option<Alert>> {
  let scope = alert.scope();
  if store.get_open(&scope, alert.alert_type).await?.is_some() {
    return Ok(None);
  }

  if let Some(last) = store.get_last(&scope, alert.alert_type).await? {
    if let Some(resolved_at) = last.resolved_at {
      let cooldown_ms = crate::config::core_config().alert_cooldown_secs * 1000;
      if deployer_types::now_ms() - resolved_at < cooldown_ms {
        return Ok(None);
      }
    }
  }

  let key = AlertScopeKey { scope: scope.clone(), alert_type: alert.alert_type };
  open_alerts_cache().insert(key, alert.clone()).await;
  store.upsert(alert.clone()).await?;

  jobs
    .enqueue(
      JobKind::SendAlertNotification,
      serde_json::json!(deployer_types::SendAlertNotificationPayload {
        alert: deployer_types::AlertNotificationPayload {
          stack_id: alert.stack_id.clone(),
          service_id: alert.service_id.clone(),
          alert_type: alert.alert_type,
          severity: alert.severity,
          message: alert.message.clone(),
          threshold: alert.threshold,
          current_value: alert.current_value,
          timestamp: alert.opened_at,
        },
      }),
      EnqueueOptions { priority, ..Default::default() },
    )
    .await?;

  Ok(Some(alert))
}

/// Resolves an open alert once the recovery sweep has observed enough
/// consecutive healthy probes (spec §4.9).
pub async fn resolve<A: AlertStore>(
  store: &A,
  scope: &AlertScope,
  alert_type: AlertType,
) -> anyhow::Result<()> {
  if let Some(mut alert) = store.get_open(scope, alert_type).await? {
    alert.is_resolved = true;
    alert.resolved_at = Some(deployer_types::now_ms());
    store.upsert(alert).await?;
  }
  Ok(())
}

#[cfg(test)]
mod test {
  use super::*;
  use deployer_types::AlertType;

  #[tokio::test]
  async fn raise_is_a_no_op_while_an_alert_is_already_open() {
    let store = MemoryAlertStore::default();
    let jobs = crate::queue::MemoryJobStore::default();

    let first = Alert::new(
      "stack-1",
      None,
      AlertType::Cpu,
      AlertSeverity::Warning,
      75.0,
      82.0,
      "cpu high",
    );
    let opened = raise(&store, &jobs, first).await.unwrap();
    assert!(opened.is_some());

    let second = Alert::new(
      "stack-1",
      None,
      AlertType::Cpu,
      AlertSeverity::Critical,
      90.0,
      95.0,
      "cpu critical",
    );
    let suppressed = raise(&store, &jobs, second).await.unwrap();
    assert!(suppressed.is_none());

    let counts = jobs.counts().await.unwrap();
    assert_eq!(counts.waiting, 1);
  }

  #[tokio::test]
  async fn resolve_clears_the_open_alert_but_cooldown_suppresses_an_immediate_reopen() {
    let store = MemoryAlertStore::default();
    let jobs = crate::queue::MemoryJobStore::default();
    let scope = AlertScope { stack_id: "stack-1".to_string(), service_id: None };

    let alert = Alert::new(
      "stack-1",
      None,
      AlertType::Memory,
      AlertSeverity::Warning,
      80.0,
      85.0,
      "memory high",
    );
    raise(&store, &jobs, alert).await.unwrap();
    resolve(&store, &scope, AlertType::Memory).await.unwrap();

    assert!(store.get_open(&scope, AlertType::Memory).await.unwrap().is_none());

    // Flaps back within the same second the prior alert resolved — the
    // 5-minute cooldown must suppress this, not just the open-alert check.
    let reopened = Alert::new(
      "stack-1",
      None,
      AlertType::Memory,
      AlertSeverity::Warning,
      80.0,
      86.0,
      "memory high again",
    );
    assert!(raise(&store, &jobs, reopened).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn reopens_once_the_cooldown_window_has_elapsed() {
    let store = MemoryAlertStore::default();
    let jobs = crate::queue::MemoryJobStore::default();
    let scope = AlertScope { stack_id: "stack-1".to_string(), service_id: None };

    let alert = Alert::new(
      "stack-1",
      None,
      AlertType::Memory,
      AlertSeverity::Warning,
      80.0,
      85.0,
      "memory high",
    );
    raise(&store, &jobs, alert).await.unwrap();
    resolve(&store, &scope, AlertType::Memory).await.unwrap();

    // Back-date the resolution past the cooldown window, as if the flap
    // had genuinely settled rather than immediately recurring.
    let mut resolved =
      store.get_last(&scope, AlertType::Memory).await.unwrap().unwrap();
    resolved.resolved_at = Some(deployer_types::now_ms() - 6 * 60 * 1000);
    store.upsert(resolved).await.unwrap();

    let reopened = Alert::new(
      "stack-1",
      None,
      AlertType::Memory,
      AlertSeverity::Warning,
      80.0,
      86.0,
      "memory high again",
    );
    assert!(raise(&store, &jobs, reopened).await.unwrap().is_some());
  }
}
