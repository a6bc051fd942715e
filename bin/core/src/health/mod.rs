//! Health Monitor (spec §4.9): periodic HTTP probes per service of
//! every `running` stack, persisted as time-series `HealthCheck` rows,
//! driving the stack-level health rollup and the `health` alert class.

use std::time::Duration;

use async_trait::async_trait;
use database::{bson::doc, find_collect};
use deployer_types::{
  Alert, AlertScope, AlertSeverity, AlertType, DomainMapping, HealthCheck,
  HealthStatus, ServiceConfig, Stack, StackHealthRollup, StackStatus,
};
use mongodb::{options::FindOptions, Collection};
use std::sync::Mutex;
use tracing::warn;

use crate::alert::AlertStore;
use crate::queue::JobStore;
use crate::stack::StackStore;

#[async_trait]
pub trait HealthCheckStore: Send + Sync {
  async fn record(&self, check: HealthCheck) -> anyhow::Result<()>;
  async fn recent_for_service(
    &self,
    stack_id: &str,
    service_name: &str,
    since_ms: i64,
  ) -> anyhow::Result<Vec<HealthCheck>>;
  async fn delete_before(&self, before_ms: i64) -> anyhow::Result<u64>;
}

pub struct MongoHealthCheckStore {
  checks: Collection<HealthCheck>,
}

impl MongoHealthCheckStore {
  pub fn new(checks: Collection<HealthCheck>) -> Self {
    Self { checks }
  }
}

#[async_trait]
impl HealthCheckStore for MongoHealthCheckStore {
  async fn record(&self, check: HealthCheck) -> anyhow::Result<()> {
    self.checks.insert_one(&check).await?;
    Ok(())
  }

  async fn recent_for_service(
    &self,
    stack_id: &str,
    service_name: &str,
    since_ms: i64,
  ) -> anyhow::Result<Vec<HealthCheck>> {
    let options = FindOptions::builder().sort(doc! { "timestamp": -1 }).build();
    find_collect(
      &self.checks,
      doc! {
        "stack_id": stack_id,
        "service_id": service_name,
        "timestamp": { "$gte": since_ms },
      },
      options,
    )
    .await
  }

  async fn delete_before(&self, before_ms: i64) -> anyhow::Result<u64> {
    let result = self
      .checks
      .delete_many(doc! { "timestamp": { "$lt": before_ms } })
      .await?;
    Ok(result.deleted_count)
  }
}

/// In-process fake for sweep unit tests.
#[derive(Default)]
pub struct MemoryHealthCheckStore {
  checks: Mutex<Vec<HealthCheck>>,
}

#[async_trait]
impl HealthCheckStore for MemoryHealthCheckStore {
  async fn record(&self, check: HealthCheck) -> anyhow::Result<()> {
    self.checks.lock().unwrap().push(check);
    Ok(())
  }

  async fn recent_for_service(
    &self,
    stack_id: &str,
    service_name: &str,
    since_ms: i64,
  ) -> anyhow::Result<Vec<HealthCheck>> {
    Ok(
      self
        .checks
        .lock()
        .unwrap()
        .iter()
        .filter(|c| {
          c.stack_id == stack_id
            && c.service_id == service_name
            && c.timestamp >= since_ms
        })
        .cloned()
        .collect(),
    )
  }

  async fn delete_before(&self, before_ms: i64) -> anyhow::Result<u64> {
    let mut checks = self.checks.lock().unwrap();
    let before = checks.len();
    checks.retain(|c| c.timestamp >= before_ms);
    Ok((before - checks.len()) as u64)
  }
}

/// Builds the endpoint a probe targets, in the preference order spec
/// §4.9 mandates: external domain with TLS, then the service's internal
/// Docker DNS name, then bare service name on its first declared port.
pub fn endpoint_for(
  stack: &Stack,
  service: &ServiceConfig,
) -> Option<String> {
  let path = service.health_check_path();
  if let Some(mapping) = find_domain_mapping(stack, &service.name) {
    return Some(format!("https://{}{path}", mapping.domain));
  }
  if let Some(&port) = service.ports.first() {
    return Some(format!(
      "http://{}_{}:{port}{path}",
      stack.name, service.name
    ));
  }
  None
}

fn find_domain_mapping<'a>(
  stack: &'a Stack,
  service_name: &str,
) -> Option<&'a DomainMapping> {
  stack.domain_mappings.iter().find(|m| m.service_name == service_name)
}

pub struct HealthMonitor<H: HealthCheckStore, A: AlertStore, S: StackStore, J: JobStore> {
  checks: H,
  alerts: A,
  stacks: S,
  jobs: J,
  client: reqwest::Client,
  probe_timeout: Duration,
}

impl<H: HealthCheckStore, A: AlertStore, S: StackStore, J: JobStore>
  HealthMonitor<H, A, S, J>
{
  pub fn new(
    checks: H,
    alerts: A,
    stacks: S,
    jobs: J,
    probe_timeout: Duration,
  ) -> Self {
    Self {
      checks,
      alerts,
      stacks,
      jobs,
      client: reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(3))
        .build()
        .unwrap_or_default(),
      probe_timeout,
    }
  }

  /// 30 s sweep: probes every service of every running stack.
  pub async fn sweep(&self) -> anyhow::Result<()> {
    for mut stack in self.stacks.list_all().await? {
      if stack.status != StackStatus::Running {
        continue;
      }
      self.sweep_stack(&mut stack).await;
      self.stacks.update(stack).await?;
    }
    Ok(())
  }

  async fn sweep_stack(&self, stack: &mut Stack) {
    let services = stack.compose_config.services.clone();
    let mut healthy_count = 0usize;
    let total = services.len();

    for service in &services {
      let check = self.probe_service(stack, service).await;
      let is_healthy = check.status.is_healthy();
      if is_healthy {
        healthy_count += 1;
      } else {
        self.raise_health_alert(stack, service, &check).await;
      }
      if let Err(e) = self.checks.record(check).await {
        warn!("failed to persist health check for {}: {e}", service.name);
      }
    }

    stack.last_health_check = Some(deployer_types::now_ms());
    stack.health_rollup = Some(if total == 0 {
      StackHealthRollup::Healthy
    } else {
      StackHealthRollup::from_ratio(healthy_count as f64 / total as f64)
    });
  }

  async fn probe_service(
    &self,
    stack: &Stack,
    service: &ServiceConfig,
  ) -> HealthCheck {
    let Some(endpoint) = endpoint_for(stack, service) else {
      return HealthCheck {
        service_id: service.name.clone(),
        stack_id: stack.id.clone(),
        timestamp: deployer_types::now_ms(),
        endpoint: String::new(),
        status: HealthStatus::Error,
        response_time_ms: 0,
        status_code: None,
        error_message: Some("service has no declared port".to_string()),
      };
    };

    let start = std::time::Instant::now();
    let response = self
      .client
      .get(&endpoint)
      .timeout(self.probe_timeout)
      .send()
      .await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    match response {
      Ok(resp) => {
        let status_code = resp.status().as_u16();
        let allowed = service.expected_status_codes();
        let body_matches = match &service.required_substring {
          None => true,
          Some(needle) => resp
            .text()
            .await
            .map(|body| body.contains(needle.as_str()))
            .unwrap_or(false),
        };
        let status = if allowed.contains(&status_code) && body_matches {
          HealthStatus::Healthy
        } else {
          HealthStatus::Unhealthy
        };
        HealthCheck {
          service_id: service.name.clone(),
          stack_id: stack.id.clone(),
          timestamp: deployer_types::now_ms(),
          endpoint,
          status,
          response_time_ms: elapsed_ms,
          status_code: Some(status_code),
          error_message: None,
        }
      }
      Err(e) if e.is_timeout() => HealthCheck {
        service_id: service.name.clone(),
        stack_id: stack.id.clone(),
        timestamp: deployer_types::now_ms(),
        endpoint,
        status: HealthStatus::Timeout,
        response_time_ms: elapsed_ms,
        status_code: None,
        error_message: Some(e.to_string()),
      },
      Err(e) => HealthCheck {
        service_id: service.name.clone(),
        stack_id: stack.id.clone(),
        timestamp: deployer_types::now_ms(),
        endpoint,
        status: HealthStatus::Error,
        response_time_ms: elapsed_ms,
        status_code: None,
        error_message: Some(e.to_string()),
      },
    }
  }

  async fn raise_health_alert(
    &self,
    stack: &Stack,
    service: &ServiceConfig,
    check: &HealthCheck,
  ) {
    let severity = match check.status {
      HealthStatus::Error => AlertSeverity::Critical,
      _ => AlertSeverity::Warning,
    };
    let mut alert = Alert::new(
      stack.id.clone(),
      Some(service.name.clone()),
      AlertType::Health,
      severity,
      0.0,
      0.0,
      format!(
        "service {} is {} ({})",
        service.name,
        check.status,
        check.error_message.as_deref().unwrap_or("no detail")
      ),
    );
    alert.consecutive_healthy_probes = 0;
    let priority = if matches!(severity, AlertSeverity::Critical) { 1 } else { 10 };
    if let Err(e) = crate::alert::raise_with_priority(
      &self.alerts,
      &self.jobs,
      alert,
      priority,
    )
    .await
    {
      warn!("failed to raise health alert: {e}");
    }
  }

  /// 5 min recovery sweep: resolves open health alerts once the service
  /// has logged >=2 consecutive healthy probes within the last 5 min.
  pub async fn recovery_sweep(&self) -> anyhow::Result<()> {
    let now = deployer_types::now_ms();
    let window_start = now - 5 * 60 * 1000;

    for stack in self.stacks.list_all().await? {
      for alert in self.alerts.list_open_for_stack(&stack.id).await? {
        if alert.alert_type != AlertType::Health {
          continue;
        }
        let Some(service_id) = &alert.service_id else { continue };
        let recent = self
          .checks
          .recent_for_service(&stack.id, service_id, window_start)
          .await?;
        let consecutive_healthy = recent
          .iter()
          .take_while(|c| c.status.is_healthy())
          .count();
        if consecutive_healthy >= 2 {
          crate::alert::resolve(
            &self.alerts,
            &AlertScope { stack_id: stack.id.clone(), service_id: Some(service_id.clone()) },
            AlertType::Health,
          )
          .await?;
        }
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use deployer_types::RestartPolicy;

  fn service(name: &str, port: u16) -> ServiceConfig {
    ServiceConfig {
      name: name.to_string(),
      image: "nginx".to_string(),
      command: None,
      env: Default::default(),
      cpu_limit: "1".to_string(),
      memory_limit: "256m".to_string(),
      replicas: 1,
      ports: vec![port],
      restart_policy: RestartPolicy::default(),
      health_check_path: None,
      expected_status_codes: Vec::new(),
      required_substring: None,
    }
  }

  #[test]
  fn endpoint_prefers_external_domain_over_internal_dns() {
    let mut stack = Stack::new("proj", "production");
    stack.name = "myapp".to_string();
    stack.domain_mappings.push(DomainMapping {
      service_name: "web".to_string(),
      domain: "web.example.test".to_string(),
      port: 80,
      cert_resolver: "letsencrypt".to_string(),
    });
    let svc = service("web", 80);
    assert_eq!(
      endpoint_for(&stack, &svc).unwrap(),
      "https://web.example.test/"
    );
  }

  #[test]
  fn endpoint_falls_back_to_internal_dns_name() {
    let mut stack = Stack::new("proj", "production");
    stack.name = "myapp".to_string();
    let svc = service("web", 8080);
    assert_eq!(
      endpoint_for(&stack, &svc).unwrap(),
      "http://myapp_web:8080/"
    );
  }

  #[test]
  fn endpoint_is_none_without_a_declared_port() {
    let stack = Stack::new("proj", "production");
    let mut svc = service("web", 0);
    svc.ports.clear();
    assert!(endpoint_for(&stack, &svc).is_none());
  }
}
