use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use deployer_types::{Job, JobKind, JobResult};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::store::JobStore;

/// Context handed to every job handler: the claimed job, a cancellation
/// token honored at suspension points (spec §5), and a progress sink.
pub struct JobContext {
  pub job: Job,
  pub cancel: CancellationToken,
  store: Arc<dyn JobStore>,
}

impl JobContext {
  pub async fn progress(&self, pct: u8) {
    let _ = self.store.progress(&self.job.id, pct).await;
  }
}

pub type HandlerFuture =
  Pin<Box<dyn Future<Output = anyhow::Result<JobResult>> + Send>>;
pub type HandlerFn = Arc<dyn Fn(JobContext) -> HandlerFuture + Send + Sync>;

/// Drives N worker tasks pulling from a `JobStore`, dispatching each
/// claimed job through a static `kind -> handler` registry (spec §4.1,
/// Design Notes "decorator-driven job handlers -> explicit dispatch
/// table").
pub struct QueueDriver {
  store: Arc<dyn JobStore>,
  handlers: HashMap<JobKind, HandlerFn>,
  per_kind_limits: HashMap<JobKind, usize>,
  visibility_timeout_ms: i64,
  cancel_tokens: dashmap::DashMap<String, CancellationToken>,
  shutdown: CancellationToken,
}

impl QueueDriver {
  pub fn new(store: Arc<dyn JobStore>) -> Self {
    Self {
      store,
      handlers: HashMap::new(),
      per_kind_limits: HashMap::new(),
      visibility_timeout_ms: 60_000,
      cancel_tokens: dashmap::DashMap::new(),
      shutdown: CancellationToken::new(),
    }
  }

  pub fn register(mut self, kind: JobKind, handler: HandlerFn) -> Self {
    self.handlers.insert(kind, handler);
    self
  }

  pub fn with_kind_limit(mut self, kind: JobKind, limit: usize) -> Self {
    self.per_kind_limits.insert(kind, limit);
    self
  }

  pub fn shutdown_token(&self) -> CancellationToken {
    self.shutdown.clone()
  }

  pub fn cancel_job(&self, job_id: &str) {
    if let Some(token) = self.cancel_tokens.get(job_id) {
      token.cancel();
    }
  }

  /// Spawns `worker_count` worker loops; returns immediately.
  pub fn spawn_workers(self: Arc<Self>, worker_count: usize) {
    for i in 0..worker_count {
      let driver = self.clone();
      let worker_id = format!("worker-{i}");
      tokio::spawn(async move { driver.worker_loop(worker_id).await });
    }
    let reaper = self.clone();
    tokio::spawn(async move { reaper.reclaim_loop().await });
  }

  async fn worker_loop(self: Arc<Self>, worker_id: String) {
    let idle = Arc::new(Notify::new());
    loop {
      if self.shutdown.is_cancelled() {
        return;
      }
      match self.try_claim_and_run(&worker_id).await {
        Ok(true) => continue,
        Ok(false) => {
          tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_millis(250)) => {}
            _ = idle.notified() => {}
            _ = self.shutdown.cancelled() => return,
          }
        }
        Err(e) => {
          error!("queue worker {worker_id} error: {e:#}");
          tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
      }
    }
  }

  async fn try_claim_and_run(
    &self,
    worker_id: &str,
  ) -> anyhow::Result<bool> {
    let Some(job) = self
      .store
      .claim(worker_id, self.visibility_timeout_ms)
      .await?
    else {
      return Ok(false);
    };

    if let Some(limit) = self.per_kind_limits.get(&job.kind) {
      let active = self.store.list_by_status(
        deployer_types::JobStatus::Active,
      ).await?;
      let same_kind_active =
        active.iter().filter(|j| j.kind == job.kind).count();
      if same_kind_active > *limit {
        // Release back to waiting without burning an attempt; another
        // worker will pick up a different kind in the meantime.
        self.store.release(&job.id).await?;
        return Ok(false);
      }
    }

    // Serialize jobs touching the same deployment or stack (spec §5):
    // hold a per-key lock for the handler's whole duration so at most
    // one worker ever runs a job for a given deployment/stack at once,
    // then re-check for a sibling already active under that key —
    // `claim` can mark two jobs for the same key Active before either
    // worker reaches this point.
    let serialization_key = job
      .deployment_id
      .clone()
      .map(|id| format!("deployment:{id}"))
      .or_else(|| job.stack_id.clone().map(|id| format!("stack:{id}")));
    let _key_guard = match &serialization_key {
      Some(key) => Some(crate::state::lock_key(key).await),
      None => None,
    };

    if let Some(deployment_id) = &job.deployment_id {
      let siblings = self.store.list_active_for_deployment(deployment_id).await?;
      if siblings.iter().any(|j| j.id != job.id) {
        self.store.release(&job.id).await?;
        return Ok(false);
      }
    }

    let kind = job.kind;
    let job_id = job.id.clone();
    let deployment_id = job.deployment_id.clone();

    info!(
      "worker {worker_id} claimed job {job_id} ({kind}) attempt {}",
      job.attempts
    );

    let Some(handler) = self.handlers.get(&kind).cloned() else {
      self
        .store
        .fail(&job_id, format!("no handler registered for kind {kind}"))
        .await?;
      return Ok(true);
    };

    let token = CancellationToken::new();
    self.cancel_tokens.insert(job_id.clone(), token.clone());

    let ctx = JobContext {
      job,
      cancel: token,
      store: Arc::new(NoopProgressStore(self.store.clone())),
    };

    let result = handler(ctx).await;
    self.cancel_tokens.remove(&job_id);

    match result {
      Ok(result) => {
        self.store.complete(&job_id, result).await?;
      }
      Err(e) => {
        warn!(
          "job {job_id} ({kind}) failed{} | {e:#}",
          deployment_id
            .map(|d| format!(" deployment={d}"))
            .unwrap_or_default()
        );
        self.store.fail(&job_id, format!("{e:#}")).await?;
      }
    }
    Ok(true)
  }

  async fn reclaim_loop(self: Arc<Self>) {
    loop {
      if self.shutdown.is_cancelled() {
        return;
      }
      if let Err(e) = self.store.reclaim_expired().await {
        error!("failed to reclaim expired job claims | {e:#}");
      }
      tokio::select! {
        _ = tokio::time::sleep(std::time::Duration::from_secs(15)) => {}
        _ = self.shutdown.cancelled() => return,
      }
    }
  }
}

/// Thin wrapper so `JobContext::progress` can share the store handle
/// without re-deriving `Arc<dyn JobStore>` bounds at every call site.
struct NoopProgressStore(Arc<dyn JobStore>);

#[async_trait::async_trait]
impl JobStore for NoopProgressStore {
  async fn enqueue(
    &self,
    kind: JobKind,
    payload: serde_json::Value,
    opts: deployer_types::EnqueueOptions,
  ) -> anyhow::Result<String> {
    self.0.enqueue(kind, payload, opts).await
  }
  async fn claim(
    &self,
    worker_id: &str,
    visibility_timeout_ms: i64,
  ) -> anyhow::Result<Option<Job>> {
    self.0.claim(worker_id, visibility_timeout_ms).await
  }
  async fn progress(&self, job_id: &str, pct: u8) -> anyhow::Result<()> {
    self.0.progress(job_id, pct).await
  }
  async fn complete(
    &self,
    job_id: &str,
    result: JobResult,
  ) -> anyhow::Result<()> {
    self.0.complete(job_id, result).await
  }
  async fn fail(&self, job_id: &str, error: String) -> anyhow::Result<()> {
    self.0.fail(job_id, error).await
  }
  async fn reclaim_expired(&self) -> anyhow::Result<u64> {
    self.0.reclaim_expired().await
  }
  async fn get_job(&self, job_id: &str) -> anyhow::Result<Option<Job>> {
    self.0.get_job(job_id).await
  }
  async fn list_by_kind(&self, kind: JobKind) -> anyhow::Result<Vec<Job>> {
    self.0.list_by_kind(kind).await
  }
  async fn list_by_status(
    &self,
    status: deployer_types::JobStatus,
  ) -> anyhow::Result<Vec<Job>> {
    self.0.list_by_status(status).await
  }
  async fn list_active_for_deployment(
    &self,
    deployment_id: &str,
  ) -> anyhow::Result<Vec<Job>> {
    self.0.list_active_for_deployment(deployment_id).await
  }
  async fn cancel(&self, job_id: &str) -> anyhow::Result<()> {
    self.0.cancel(job_id).await
  }
  async fn retry(&self, job_id: &str) -> anyhow::Result<()> {
    self.0.retry(job_id).await
  }
  async fn release(&self, job_id: &str) -> anyhow::Result<()> {
    self.0.release(job_id).await
  }
  async fn counts(&self) -> anyhow::Result<super::store::JobCounts> {
    self.0.counts().await
  }
  async fn gc_retention(&self) -> anyhow::Result<u64> {
    self.0.gc_retention().await
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::queue::MemoryJobStore;
  use deployer_types::EnqueueOptions;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[tokio::test]
  async fn dispatches_registered_handler_and_completes_job() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = calls.clone();

    let driver = Arc::new(
      QueueDriver::new(store.clone()).register(
        JobKind::HealthCheck,
        Arc::new(move |_ctx| {
          let calls = calls2.clone();
          Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(JobResult::ok("done"))
          })
        }),
      ),
    );

    store
      .enqueue(
        JobKind::HealthCheck,
        serde_json::json!({"stackId": "s1"}),
        EnqueueOptions::default(),
      )
      .await
      .unwrap();

    assert!(driver.try_claim_and_run("test-worker").await.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let counts = store.counts().await.unwrap();
    assert_eq!(counts.completed, 1);
  }

  #[tokio::test]
  async fn missing_handler_fails_job() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::default());
    let driver = Arc::new(QueueDriver::new(store.clone()));

    store
      .enqueue(JobKind::Cleanup, serde_json::json!({}), EnqueueOptions {
        max_attempts: 1,
        ..Default::default()
      })
      .await
      .unwrap();

    assert!(driver.try_claim_and_run("test-worker").await.unwrap());
    let counts = store.counts().await.unwrap();
    assert_eq!(counts.failed, 1);
  }
}
