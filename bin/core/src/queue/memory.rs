use std::sync::Mutex;

use async_trait::async_trait;
use deployer_types::{
  EnqueueOptions, Job, JobKind, JobResult, JobStatus, now_ms,
};

use super::store::{JobCounts, JobStore};

/// In-process fake, used by orchestrator/monitor unit tests so they
/// don't need a live Mongo instance.
#[derive(Default)]
pub struct MemoryJobStore {
  jobs: Mutex<Vec<Job>>,
}

#[async_trait]
impl JobStore for MemoryJobStore {
  async fn enqueue(
    &self,
    kind: JobKind,
    payload: serde_json::Value,
    opts: EnqueueOptions,
  ) -> anyhow::Result<String> {
    // Verify the payload round-trips through the stable serialization
    // before persisting, per spec §4.1.
    serde_json::to_vec(&payload)
      .map_err(|e| anyhow::anyhow!("payload not serializable: {e}"))?;
    let job = Job::new(kind, payload, opts);
    let id = job.id.clone();
    self.jobs.lock().unwrap().push(job);
    Ok(id)
  }

  async fn claim(
    &self,
    _worker_id: &str,
    visibility_timeout_ms: i64,
  ) -> anyhow::Result<Option<Job>> {
    let now = now_ms();
    let mut jobs = self.jobs.lock().unwrap();
    let mut candidates: Vec<usize> = jobs
      .iter()
      .enumerate()
      .filter(|(_, j)| {
        matches!(j.status, JobStatus::Waiting | JobStatus::Delayed)
          && j.eligible_at <= now
      })
      .map(|(i, _)| i)
      .collect();
    candidates.sort_by(|&a, &b| {
      jobs[a]
        .priority
        .cmp(&jobs[b].priority)
        .then(jobs[a].created_at.cmp(&jobs[b].created_at))
    });
    let Some(&idx) = candidates.first() else {
      return Ok(None);
    };
    let job = &mut jobs[idx];
    job.status = JobStatus::Active;
    job.attempts += 1;
    job.started_at = Some(now);
    job.claim_expires_at = Some(now + visibility_timeout_ms);
    Ok(Some(job.clone()))
  }

  async fn progress(&self, job_id: &str, pct: u8) -> anyhow::Result<()> {
    let mut jobs = self.jobs.lock().unwrap();
    if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
      job.progress = pct.min(100);
    }
    Ok(())
  }

  async fn complete(
    &self,
    job_id: &str,
    result: JobResult,
  ) -> anyhow::Result<()> {
    let mut jobs = self.jobs.lock().unwrap();
    if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
      job.status = JobStatus::Completed;
      job.progress = 100;
      job.finished_at = Some(now_ms());
      job.result = Some(result);
    }
    Ok(())
  }

  async fn fail(&self, job_id: &str, error: String) -> anyhow::Result<()> {
    let mut jobs = self.jobs.lock().unwrap();
    if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
      job.error = Some(error);
      if job.attempts < job.max_attempts {
        job.status = JobStatus::Delayed;
        job.eligible_at =
          now_ms() + job.backoff.delay_for_attempt(job.attempts) as i64;
      } else {
        job.status = JobStatus::Failed;
        job.finished_at = Some(now_ms());
      }
    }
    Ok(())
  }

  async fn reclaim_expired(&self) -> anyhow::Result<u64> {
    let now = now_ms();
    let mut jobs = self.jobs.lock().unwrap();
    let mut count = 0;
    for job in jobs.iter_mut() {
      if job.status == JobStatus::Active
        && job.claim_expires_at.is_some_and(|exp| exp < now)
      {
        job.status = JobStatus::Waiting;
        job.claim_expires_at = None;
        count += 1;
      }
    }
    Ok(count)
  }

  async fn get_job(&self, job_id: &str) -> anyhow::Result<Option<Job>> {
    Ok(
      self
        .jobs
        .lock()
        .unwrap()
        .iter()
        .find(|j| j.id == job_id)
        .cloned(),
    )
  }

  async fn list_by_kind(&self, kind: JobKind) -> anyhow::Result<Vec<Job>> {
    Ok(
      self
        .jobs
        .lock()
        .unwrap()
        .iter()
        .filter(|j| j.kind == kind)
        .cloned()
        .collect(),
    )
  }

  async fn list_by_status(
    &self,
    status: JobStatus,
  ) -> anyhow::Result<Vec<Job>> {
    Ok(
      self
        .jobs
        .lock()
        .unwrap()
        .iter()
        .filter(|j| j.status == status)
        .cloned()
        .collect(),
    )
  }

  async fn list_active_for_deployment(
    &self,
    deployment_id: &str,
  ) -> anyhow::Result<Vec<Job>> {
    Ok(
      self
        .jobs
        .lock()
        .unwrap()
        .iter()
        .filter(|j| {
          j.status == JobStatus::Active
            && j.deployment_id.as_deref() == Some(deployment_id)
        })
        .cloned()
        .collect(),
    )
  }

  async fn cancel(&self, job_id: &str) -> anyhow::Result<()> {
    let mut jobs = self.jobs.lock().unwrap();
    if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
      job.status = JobStatus::Cancelled;
      job.finished_at = Some(now_ms());
    }
    Ok(())
  }

  async fn retry(&self, job_id: &str) -> anyhow::Result<()> {
    let mut jobs = self.jobs.lock().unwrap();
    if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
      job.status = JobStatus::Waiting;
      job.eligible_at = now_ms();
      job.error = None;
    }
    Ok(())
  }

  async fn release(&self, job_id: &str) -> anyhow::Result<()> {
    let mut jobs = self.jobs.lock().unwrap();
    if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
      job.status = JobStatus::Waiting;
      job.eligible_at = now_ms();
      job.attempts = job.attempts.saturating_sub(1);
      job.claim_expires_at = None;
    }
    Ok(())
  }

  async fn counts(&self) -> anyhow::Result<JobCounts> {
    let jobs = self.jobs.lock().unwrap();
    let mut counts = JobCounts::default();
    for job in jobs.iter() {
      match job.status {
        JobStatus::Waiting => counts.waiting += 1,
        JobStatus::Delayed => counts.delayed += 1,
        JobStatus::Active => counts.active += 1,
        JobStatus::Completed => counts.completed += 1,
        JobStatus::Failed => counts.failed += 1,
        JobStatus::Cancelled => counts.cancelled += 1,
      }
    }
    Ok(counts)
  }

  async fn gc_retention(&self) -> anyhow::Result<u64> {
    // Retention trimming is exercised against the Mongo store in
    // production; the in-memory fake keeps everything for inspection.
    Ok(0)
  }
}
