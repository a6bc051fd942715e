//! Metrics Collector (spec §4.10): samples container stats for every
//! `running` stack every 2 minutes, persists per-container and
//! aggregate rows, and raises CPU/memory/storage threshold alerts.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::{
  query_parameters::{ListContainersOptionsBuilder, StatsOptionsBuilder},
  Docker,
};
use database::{bson::doc, find_collect};
use deployer_types::{
  Alert, AlertSeverity, AlertType, Metric, Stack, StackStatus,
  CPU_THRESHOLDS, MEMORY_THRESHOLDS, STORAGE_THRESHOLDS,
};
use futures_util::StreamExt;
use mongodb::Collection;
use std::sync::Mutex;
use tracing::warn;

use crate::alert::AlertStore;
use crate::queue::JobStore;
use crate::stack::StackStore;

/// Label the Swarm Driver does not itself apply (it uses
/// `com.docker.stack.namespace`), but spec §4.10 names explicitly as
/// the container filter for sampling; kept faithful to the spec text
/// rather than silently aligned to the Swarm Driver's own label.
const STACK_PROJECT_LABEL: &str = "com.docker.compose.project";
const SYSTEM_STACK_ID: &str = "system";

#[async_trait]
pub trait MetricsStore: Send + Sync {
  async fn record(&self, metric: Metric) -> anyhow::Result<()>;
  async fn delete_before(&self, before_ms: i64) -> anyhow::Result<u64>;
}

pub struct MongoMetricsStore {
  metrics: Collection<Metric>,
}

impl MongoMetricsStore {
  pub fn new(metrics: Collection<Metric>) -> Self {
    Self { metrics }
  }
}

#[async_trait]
impl MetricsStore for MongoMetricsStore {
  async fn record(&self, metric: Metric) -> anyhow::Result<()> {
    self.metrics.insert_one(&metric).await?;
    Ok(())
  }

  async fn delete_before(&self, before_ms: i64) -> anyhow::Result<u64> {
    let result = self
      .metrics
      .delete_many(doc! { "timestamp": { "$lt": before_ms } })
      .await?;
    Ok(result.deleted_count)
  }
}

/// In-process fake for collector unit tests.
#[derive(Default)]
pub struct MemoryMetricsStore {
  metrics: Mutex<Vec<Metric>>,
}

#[async_trait]
impl MetricsStore for MemoryMetricsStore {
  async fn record(&self, metric: Metric) -> anyhow::Result<()> {
    self.metrics.lock().unwrap().push(metric);
    Ok(())
  }

  async fn delete_before(&self, before_ms: i64) -> anyhow::Result<u64> {
    let mut metrics = self.metrics.lock().unwrap();
    let before = metrics.len();
    metrics.retain(|m| m.timestamp >= before_ms);
    Ok((before - metrics.len()) as u64)
  }
}

/// One sampled container, already reduced to the dimensions the
/// threshold checks and persistence need.
#[derive(Debug, Clone, Default)]
struct Sample {
  container_id: String,
  cpu_percent: f64,
  memory_bytes: u64,
  memory_limit_bytes: u64,
  network_rx_mib: f64,
  network_tx_mib: f64,
  disk_read_mib: f64,
  disk_write_mib: f64,
  /// Writable-layer size and total container footprint, from the
  /// container list's `size=true` query; the closest thing container
  /// inspection offers to a "storage %" dimension (spec §4.10).
  size_rw_bytes: i64,
  size_root_fs_bytes: i64,
}

impl Sample {
  fn storage_percent(&self) -> f64 {
    if self.size_root_fs_bytes > 0 {
      (self.size_rw_bytes as f64 / self.size_root_fs_bytes as f64) * 100.0
    } else {
      0.0
    }
  }
}

impl Sample {
  fn into_metric(self, stack_id: &str) -> Metric {
    Metric {
      stack_id: stack_id.to_string(),
      container_id: Some(self.container_id),
      timestamp: deployer_types::now_ms(),
      cpu_percent: self.cpu_percent,
      memory_bytes: self.memory_bytes,
      memory_limit_bytes: self.memory_limit_bytes,
      network_rx_mib: self.network_rx_mib,
      network_tx_mib: self.network_tx_mib,
      disk_read_mib: self.disk_read_mib,
      disk_write_mib: self.disk_write_mib,
    }
  }
}

fn aggregate(stack_id: &str, samples: &[Sample]) -> Metric {
  let mut total = Metric { stack_id: stack_id.to_string(), ..Default::default() };
  total.timestamp = deployer_types::now_ms();
  if samples.is_empty() {
    return total;
  }
  for s in samples {
    total.cpu_percent += s.cpu_percent;
    total.memory_bytes += s.memory_bytes;
    total.memory_limit_bytes += s.memory_limit_bytes;
    total.network_rx_mib += s.network_rx_mib;
    total.network_tx_mib += s.network_tx_mib;
    total.disk_read_mib += s.disk_read_mib;
    total.disk_write_mib += s.disk_write_mib;
  }
  total
}

pub struct MetricsCollector<M: MetricsStore, A: AlertStore, S: StackStore, J: JobStore> {
  docker: Docker,
  metrics: M,
  alerts: A,
  stacks: S,
  jobs: J,
}

impl<M: MetricsStore, A: AlertStore, S: StackStore, J: JobStore>
  MetricsCollector<M, A, S, J>
{
  pub fn new(docker: Docker, metrics: M, alerts: A, stacks: S, jobs: J) -> Self {
    Self { docker, metrics, alerts, stacks, jobs }
  }

  /// 2 minute sweep over every running stack.
  pub async fn sweep(&self) -> anyhow::Result<()> {
    let mut system_samples = Vec::new();

    for stack in self.stacks.list_all().await? {
      if stack.status != StackStatus::Running {
        continue;
      }
      let samples = self.sample_stack(&stack).await;
      for sample in &samples {
        self.check_thresholds(&stack, sample).await;
        if let Err(e) = self.metrics.record(sample.clone().into_metric(&stack.id)).await {
          warn!("failed to persist container metric for stack {}: {e}", stack.id);
        }
      }
      if !samples.is_empty() {
        let stack_total = aggregate(&stack.id, &samples);
        if let Err(e) = self.metrics.record(stack_total).await {
          warn!("failed to persist stack-total metric for {}: {e}", stack.id);
        }
      }
      system_samples.extend(samples);
    }

    let system_total = aggregate(SYSTEM_STACK_ID, &system_samples);
    if let Err(e) = self.metrics.record(system_total).await {
      warn!("failed to persist system metric row: {e}");
    }
    Ok(())
  }

  async fn sample_stack(&self, stack: &Stack) -> Vec<Sample> {
    let mut filters = HashMap::new();
    filters.insert(
      "label".to_string(),
      vec![format!("{STACK_PROJECT_LABEL}={}", stack.id)],
    );
    let options = ListContainersOptionsBuilder::new()
      .filters(&filters)
      .size(true)
      .build();

    let containers = match self.docker.list_containers(Some(options)).await {
      Ok(containers) => containers,
      Err(e) => {
        warn!("failed to list containers for stack {}: {e}", stack.id);
        return Vec::new();
      }
    };

    let mut samples = Vec::with_capacity(containers.len());
    for container in containers {
      let Some(id) = container.id else { continue };
      let size_rw_bytes = container.size_rw.unwrap_or(0);
      let size_root_fs_bytes = container.size_root_fs.unwrap_or(0);
      match self.fetch_stats(&id).await {
        Ok(mut sample) => {
          sample.size_rw_bytes = size_rw_bytes;
          sample.size_root_fs_bytes = size_root_fs_bytes;
          samples.push(sample);
        }
        Err(e) => warn!("failed to sample stats for container {id}: {e}"),
      }
    }
    samples
  }

  async fn fetch_stats(&self, container_id: &str) -> anyhow::Result<Sample> {
    let options = StatsOptionsBuilder::new().stream(false).one_shot(true).build();
    let mut stream = self.docker.stats(container_id, Some(options));
    let stats = stream
      .next()
      .await
      .ok_or_else(|| anyhow::anyhow!("no stats frame returned"))??;

    let cpu_stats = stats.cpu_stats.unwrap_or_default();
    let precpu_stats = stats.precpu_stats.unwrap_or_default();
    let cpu_total = cpu_stats.cpu_usage.as_ref().and_then(|u| u.total_usage).unwrap_or(0);
    let precpu_total =
      precpu_stats.cpu_usage.as_ref().and_then(|u| u.total_usage).unwrap_or(0);
    let system_cpu = cpu_stats.system_cpu_usage.unwrap_or(0);
    let presystem_cpu = precpu_stats.system_cpu_usage.unwrap_or(0);

    let cpu_delta = cpu_total.saturating_sub(precpu_total) as f64;
    let system_delta = system_cpu.saturating_sub(presystem_cpu) as f64;
    let cpu_percent = if system_delta > 0.0 {
      (cpu_delta / system_delta) * 100.0
    } else {
      0.0
    };

    let memory_stats = stats.memory_stats.unwrap_or_default();
    let memory_bytes = memory_stats.usage.unwrap_or(0);
    let memory_limit_bytes = memory_stats.limit.unwrap_or(0);

    const MIB: f64 = 1024.0 * 1024.0;
    let (mut rx, mut tx) = (0u64, 0u64);
    for net in stats.networks.unwrap_or_default().values() {
      rx += net.rx_bytes.unwrap_or(0);
      tx += net.tx_bytes.unwrap_or(0);
    }

    let (mut read, mut write) = (0u64, 0u64);
    if let Some(blkio) = stats.blkio_stats {
      for entry in blkio.io_service_bytes_recursive.unwrap_or_default() {
        match entry.op.as_deref().unwrap_or_default() {
          "read" | "Read" => read += entry.value.unwrap_or(0),
          "write" | "Write" => write += entry.value.unwrap_or(0),
          _ => {}
        }
      }
    }

    Ok(Sample {
      container_id: container_id.to_string(),
      cpu_percent,
      memory_bytes,
      memory_limit_bytes,
      network_rx_mib: rx as f64 / MIB,
      network_tx_mib: tx as f64 / MIB,
      disk_read_mib: read as f64 / MIB,
      disk_write_mib: write as f64 / MIB,
    })
  }

  async fn check_thresholds(&self, stack: &Stack, sample: &Sample) {
    self
      .check_one(stack, AlertType::Cpu, CPU_THRESHOLDS, sample.cpu_percent)
      .await;
    let memory_percent = if sample.memory_limit_bytes > 0 {
      (sample.memory_bytes as f64 / sample.memory_limit_bytes as f64) * 100.0
    } else {
      0.0
    };
    self
      .check_one(stack, AlertType::Memory, MEMORY_THRESHOLDS, memory_percent)
      .await;
    self
      .check_one(stack, AlertType::Storage, STORAGE_THRESHOLDS, sample.storage_percent())
      .await;
  }

  async fn check_one(
    &self,
    stack: &Stack,
    alert_type: AlertType,
    thresholds: deployer_types::MetricThresholds,
    value: f64,
  ) {
    let severity = if value >= thresholds.critical {
      Some(AlertSeverity::Critical)
    } else if value >= thresholds.warning {
      Some(AlertSeverity::Warning)
    } else {
      None
    };
    let Some(severity) = severity else { return };

    let threshold = if matches!(severity, AlertSeverity::Critical) {
      thresholds.critical
    } else {
      thresholds.warning
    };
    let priority = if matches!(severity, AlertSeverity::Critical) { 1 } else { 10 };

    let alert = Alert::new(
      stack.id.clone(),
      None,
      alert_type,
      severity,
      threshold,
      value,
      format!("{alert_type} at {value:.1}% (threshold {threshold:.0}%)"),
    );
    if let Err(e) =
      crate::alert::raise_with_priority(&self.alerts, &self.jobs, alert, priority)
        .await
    {
      warn!("failed to raise {alert_type} alert for stack {}: {e}", stack.id);
    }
  }

  /// Daily GC: metrics older than 30 days, resolved alerts older than 7 days.
  pub async fn gc(&self) -> anyhow::Result<()> {
    const DAY_MS: i64 = 24 * 60 * 60 * 1000;
    let now = deployer_types::now_ms();
    let deleted_metrics = self.metrics.delete_before(now - 30 * DAY_MS).await?;
    let deleted_alerts =
      self.alerts.delete_resolved_before(now - 7 * DAY_MS).await?;
    tracing::info!(
      "metrics gc: removed {deleted_metrics} metric rows, {deleted_alerts} resolved alerts"
    );
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn aggregate_sums_every_sampled_container() {
    let samples = vec![
      Sample { container_id: "a".into(), cpu_percent: 10.0, memory_bytes: 100, memory_limit_bytes: 1000, ..Default::default() },
      Sample { container_id: "b".into(), cpu_percent: 20.0, memory_bytes: 200, memory_limit_bytes: 1000, ..Default::default() },
    ];
    let total = aggregate("stack-1", &samples);
    assert_eq!(total.cpu_percent, 30.0);
    assert_eq!(total.memory_bytes, 300);
  }

  #[test]
  fn aggregate_of_no_samples_is_zeroed() {
    let total = aggregate(SYSTEM_STACK_ID, &[]);
    assert_eq!(total.cpu_percent, 0.0);
    assert_eq!(total.stack_id, "system");
  }
}
