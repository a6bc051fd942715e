use async_trait::async_trait;
use deployer_types::{EnqueueOptions, Job, JobKind, JobResult, JobStatus};

#[derive(Debug, Clone, Default)]
pub struct JobCounts {
  pub waiting: u64,
  pub delayed: u64,
  pub active: u64,
  pub completed: u64,
  pub failed: u64,
  pub cancelled: u64,
}

/// Durable FIFO-by-priority job store with delayed scheduling and
/// bounded retry (spec §4.1). Implementations must make `claim` atomic
/// with respect to concurrent callers.
#[async_trait]
pub trait JobStore: Send + Sync {
  async fn enqueue(
    &self,
    kind: JobKind,
    payload: serde_json::Value,
    opts: EnqueueOptions,
  ) -> anyhow::Result<String>;

  /// Atomically claims the highest-priority, not-delayed, `waiting` job
  /// and marks it `active`. Returns `None` when idle.
  async fn claim(
    &self,
    worker_id: &str,
    visibility_timeout_ms: i64,
  ) -> anyhow::Result<Option<Job>>;

  /// Best-effort; never fails the job.
  async fn progress(&self, job_id: &str, pct: u8) -> anyhow::Result<()>;

  async fn complete(
    &self,
    job_id: &str,
    result: JobResult,
  ) -> anyhow::Result<()>;

  /// Applies the retry/backoff algorithm: reschedules `delayed` if
  /// `attempts < max_attempts`, else moves the job to `failed`
  /// (dead-letter) with the final error preserved.
  async fn fail(&self, job_id: &str, error: String) -> anyhow::Result<()>;

  /// Reverts expired claims (crashed worker) back to `waiting`.
  async fn reclaim_expired(&self) -> anyhow::Result<u64>;

  async fn get_job(&self, job_id: &str) -> anyhow::Result<Option<Job>>;

  async fn list_by_kind(
    &self,
    kind: JobKind,
  ) -> anyhow::Result<Vec<Job>>;

  async fn list_by_status(
    &self,
    status: JobStatus,
  ) -> anyhow::Result<Vec<Job>>;

  async fn list_active_for_deployment(
    &self,
    deployment_id: &str,
  ) -> anyhow::Result<Vec<Job>>;

  /// Best-effort cooperative cancel; active jobs rely on the worker
  /// observing the cancellation token at its next suspension point.
  async fn cancel(&self, job_id: &str) -> anyhow::Result<()>;

  async fn retry(&self, job_id: &str) -> anyhow::Result<()>;

  /// Reverts an `active` claim back to `waiting` without counting it as
  /// an attempt — used when a job is bounced for queue-contention
  /// reasons (over a per-kind concurrency ceiling, or another job
  /// already active for the same deployment/stack) rather than because
  /// its handler actually ran and failed. Undoes the `attempts`
  /// increment `claim` applied when the job was picked up.
  async fn release(&self, job_id: &str) -> anyhow::Result<()>;

  async fn counts(&self) -> anyhow::Result<JobCounts>;

  /// Discards completed/failed jobs beyond the configured retention
  /// (spec §3 "kept counts: last 10 completed, last 25 failed per kind").
  async fn gc_retention(&self) -> anyhow::Result<u64>;
}
