//! Scheduler (spec §4.11): spawns the periodic sweeps every other
//! component exposes but does not drive itself — Health Monitor,
//! Metrics Collector, Certificate Coordinator, job-tracking GC. Fixed
//! intervals use `tokio::time::interval`; calendar-anchored duties
//! (daily at a wall-clock hour) use `croner`, the teacher's cron
//! convention for "run at this time of day" schedules.
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tracing::error;

use crate::alert::AlertStore;
use crate::cert::CertStore;
use crate::health::HealthCheckStore;
use crate::metrics::MetricsStore;
use crate::queue::JobStore;
use crate::stack::StackStore;

pub struct Scheduler<H, M, C, A, S, J>
where
  H: HealthCheckStore + 'static,
  M: MetricsStore + 'static,
  C: CertStore + 'static,
  A: AlertStore + 'static,
  S: StackStore + 'static,
  J: JobStore + 'static,
{
  health: Arc<crate::health::HealthMonitor<H, A, S, J>>,
  metrics: Arc<crate::metrics::MetricsCollector<M, A, S, J>>,
  certs: Arc<crate::cert::CertCoordinator<C, J>>,
  jobs: Arc<J>,
}

impl<H, M, C, A, S, J> Scheduler<H, M, C, A, S, J>
where
  H: HealthCheckStore + 'static,
  M: MetricsStore + 'static,
  C: CertStore + 'static,
  A: AlertStore + 'static,
  S: StackStore + 'static,
  J: JobStore + 'static,
{
  pub fn new(
    health: Arc<crate::health::HealthMonitor<H, A, S, J>>,
    metrics: Arc<crate::metrics::MetricsCollector<M, A, S, J>>,
    certs: Arc<crate::cert::CertCoordinator<C, J>>,
    jobs: Arc<J>,
  ) -> Self {
    Self { health, metrics, certs, jobs }
  }

  /// Spawns every sweep as its own background task; returns immediately.
  pub fn spawn(self: Arc<Self>, health_sweep_interval: Duration, metrics_interval: Duration) {
    self.clone().spawn_interval_sweep("health sweep", health_sweep_interval, {
      let this = self.clone();
      move || {
        let this = this.clone();
        async move { this.health.sweep().await }
      }
    });

    self.clone().spawn_interval_sweep("health recovery sweep", Duration::from_secs(300), {
      let this = self.clone();
      move || {
        let this = this.clone();
        async move { this.health.recovery_sweep().await }
      }
    });

    self.clone().spawn_interval_sweep("metrics sweep", metrics_interval, {
      let this = self.clone();
      move || {
        let this = this.clone();
        async move { this.metrics.sweep().await }
      }
    });

    self.clone().spawn_daily_at("metrics gc", "0 3 * * *", {
      let this = self.clone();
      move || {
        let this = this.clone();
        async move { this.metrics.gc().await }
      }
    });

    self.clone().spawn_interval_sweep("certificate file validation", Duration::from_secs(6 * 3600), {
      let this = self.clone();
      move || {
        let this = this.clone();
        async move { this.certs.file_validation().await }
      }
    });

    self.clone().spawn_daily_at("job tracking gc", "0 2 * * *", {
      let this = self.clone();
      move || {
        let this = this.clone();
        async move { this.jobs.gc_retention().await.map(|_| ()) }
      }
    });

    self.clone().spawn_daily_at("certificate expiry scan", "0 2 * * *", {
      let this = self.clone();
      move || {
        let this = this.clone();
        async move { this.certs.expiry_scan().await }
      }
    });
  }

  fn spawn_interval_sweep<F, Fut>(self: Arc<Self>, name: &'static str, period: Duration, mut task: F)
  where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
  {
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(period);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        if let Err(e) = task().await {
          error!("{name} failed: {e:#}");
        }
      }
    });
  }

  /// Runs `task` once per day at the wall-clock time `cron_expr`
  /// describes (5-field cron, local time), sleeping until the next
  /// occurrence rather than polling.
  fn spawn_daily_at<F, Fut>(self: Arc<Self>, name: &'static str, cron_expr: &'static str, mut task: F)
  where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
  {
    tokio::spawn(async move {
      loop {
        let sleep_for = match next_occurrence_in(cron_expr) {
          Ok(d) => d,
          Err(e) => {
            error!("{name}: failed to compute next occurrence for `{cron_expr}`: {e:#}, retrying in 1h");
            Duration::from_secs(3600)
          }
        };
        tokio::time::sleep(sleep_for).await;
        if let Err(e) = task().await {
          error!("{name} failed: {e:#}");
        }
      }
    });
  }
}

fn next_occurrence_in(cron_expr: &str) -> anyhow::Result<Duration> {
  let cron = croner::Cron::new(cron_expr)
    .parse()
    .map_err(|e| anyhow::anyhow!("failed to parse cron expression `{cron_expr}`: {e}"))?;
  let now = Local::now();
  let next = cron
    .find_next_occurrence(&now, false)
    .map_err(|e| anyhow::anyhow!("failed to find next occurrence for `{cron_expr}`: {e}"))?;
  let delta = next.signed_duration_since(now);
  Ok(delta.to_std().unwrap_or(Duration::from_secs(1)))
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn daily_at_2am_resolves_to_a_future_instant() {
    let delay = next_occurrence_in("0 2 * * *").unwrap();
    assert!(delay <= Duration::from_secs(24 * 3600));
  }

  #[test]
  fn rejects_a_malformed_expression() {
    assert!(next_occurrence_in("not a cron").is_err());
  }
}
