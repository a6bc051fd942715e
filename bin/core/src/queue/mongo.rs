use async_trait::async_trait;
use database::{bson::doc, find_collect, mongodb::options::FindOneAndUpdateOptions};
use deployer_types::{
  EnqueueOptions, Job, JobKind, JobResult, JobStatus, now_ms,
};
use mongodb::Collection;

use super::store::{JobCounts, JobStore};

pub struct MongoJobStore {
  jobs: Collection<Job>,
}

impl MongoJobStore {
  pub fn new(jobs: Collection<Job>) -> Self {
    Self { jobs }
  }
}

fn status_bson(status: JobStatus) -> bson::Bson {
  bson::to_bson(&status).expect("JobStatus always serializes")
}

#[async_trait]
impl JobStore for MongoJobStore {
  async fn enqueue(
    &self,
    kind: JobKind,
    payload: serde_json::Value,
    opts: EnqueueOptions,
  ) -> anyhow::Result<String> {
    serde_json::to_vec(&payload)
      .map_err(|e| anyhow::anyhow!("payload not serializable: {e}"))?;
    let job = Job::new(kind, payload, opts);
    let id = job.id.clone();
    self
      .jobs
      .insert_one(&job)
      .await
      .map_err(|e| anyhow::anyhow!("queue store unavailable: {e}"))?;
    Ok(id)
  }

  async fn claim(
    &self,
    _worker_id: &str,
    visibility_timeout_ms: i64,
  ) -> anyhow::Result<Option<Job>> {
    let now = now_ms();
    let filter = doc! {
      "status": { "$in": [status_bson(JobStatus::Waiting), status_bson(JobStatus::Delayed)] },
      "eligible_at": { "$lte": now },
    };
    let update = doc! {
      "$set": {
        "status": status_bson(JobStatus::Active),
        "started_at": now,
        "claim_expires_at": now + visibility_timeout_ms,
      },
      "$inc": { "attempts": 1 },
    };
    let options = FindOneAndUpdateOptions::builder()
      .sort(doc! { "priority": 1, "created_at": 1 })
      .return_document(mongodb::options::ReturnDocument::After)
      .build();
    let job = self
      .jobs
      .find_one_and_update(filter, update)
      .with_options(options)
      .await
      .map_err(|e| anyhow::anyhow!("queue store unavailable: {e}"))?;
    Ok(job)
  }

  async fn progress(&self, job_id: &str, pct: u8) -> anyhow::Result<()> {
    // Advisory only; never surfaces failure to the job.
    let _ = self
      .jobs
      .update_one(
        doc! { "id": job_id },
        doc! { "$set": { "progress": pct.min(100) as i32 } },
      )
      .await;
    Ok(())
  }

  async fn complete(
    &self,
    job_id: &str,
    result: JobResult,
  ) -> anyhow::Result<()> {
    let result_doc = bson::to_bson(&result)?;
    self
      .jobs
      .update_one(
        doc! { "id": job_id },
        doc! { "$set": {
          "status": status_bson(JobStatus::Completed),
          "progress": 100,
          "finished_at": now_ms(),
          "result": result_doc,
        } },
      )
      .await?;
    Ok(())
  }

  async fn fail(&self, job_id: &str, error: String) -> anyhow::Result<()> {
    let Some(job) = self.get_job(job_id).await? else {
      return Ok(());
    };
    if job.attempts < job.max_attempts {
      let delay = job.backoff.delay_for_attempt(job.attempts) as i64;
      self
        .jobs
        .update_one(
          doc! { "id": job_id },
          doc! { "$set": {
            "status": status_bson(JobStatus::Delayed),
            "eligible_at": now_ms() + delay,
            "error": &error,
          } },
        )
        .await?;
    } else {
      self
        .jobs
        .update_one(
          doc! { "id": job_id },
          doc! { "$set": {
            "status": status_bson(JobStatus::Failed),
            "finished_at": now_ms(),
            "error": &error,
          } },
        )
        .await?;
    }
    Ok(())
  }

  async fn reclaim_expired(&self) -> anyhow::Result<u64> {
    let now = now_ms();
    let result = self
      .jobs
      .update_many(
        doc! {
          "status": status_bson(JobStatus::Active),
          "claim_expires_at": { "$lt": now },
        },
        doc! { "$set": { "status": status_bson(JobStatus::Waiting) } },
      )
      .await?;
    Ok(result.modified_count)
  }

  async fn get_job(&self, job_id: &str) -> anyhow::Result<Option<Job>> {
    Ok(self.jobs.find_one(doc! { "id": job_id }).await?)
  }

  async fn list_by_kind(&self, kind: JobKind) -> anyhow::Result<Vec<Job>> {
    find_collect(&self.jobs, doc! { "kind": bson::to_bson(&kind)? }, None)
      .await
  }

  async fn list_by_status(
    &self,
    status: JobStatus,
  ) -> anyhow::Result<Vec<Job>> {
    find_collect(&self.jobs, doc! { "status": status_bson(status) }, None)
      .await
  }

  async fn list_active_for_deployment(
    &self,
    deployment_id: &str,
  ) -> anyhow::Result<Vec<Job>> {
    find_collect(
      &self.jobs,
      doc! {
        "status": status_bson(JobStatus::Active),
        "deployment_id": deployment_id,
      },
      None,
    )
    .await
  }

  async fn cancel(&self, job_id: &str) -> anyhow::Result<()> {
    self
      .jobs
      .update_one(
        doc! { "id": job_id },
        doc! { "$set": {
          "status": status_bson(JobStatus::Cancelled),
          "finished_at": now_ms(),
        } },
      )
      .await?;
    Ok(())
  }

  async fn retry(&self, job_id: &str) -> anyhow::Result<()> {
    self
      .jobs
      .update_one(
        doc! { "id": job_id },
        doc! { "$set": {
          "status": status_bson(JobStatus::Waiting),
          "eligible_at": now_ms(),
        }, "$unset": { "error": "" } },
      )
      .await?;
    Ok(())
  }

  async fn release(&self, job_id: &str) -> anyhow::Result<()> {
    self
      .jobs
      .update_one(
        doc! { "id": job_id },
        doc! {
          "$set": { "status": status_bson(JobStatus::Waiting), "eligible_at": now_ms() },
          "$unset": { "claim_expires_at": "" },
          "$inc": { "attempts": -1 },
        },
      )
      .await?;
    Ok(())
  }

  async fn counts(&self) -> anyhow::Result<JobCounts> {
    let mut counts = JobCounts::default();
    for (status, slot) in [
      (JobStatus::Waiting, &mut counts.waiting),
      (JobStatus::Delayed, &mut counts.delayed),
      (JobStatus::Active, &mut counts.active),
      (JobStatus::Completed, &mut counts.completed),
      (JobStatus::Failed, &mut counts.failed),
      (JobStatus::Cancelled, &mut counts.cancelled),
    ] {
      *slot = self
        .jobs
        .count_documents(doc! { "status": status_bson(status) })
        .await?;
    }
    Ok(counts)
  }

  /// Keeps only the most recent `removeOnComplete`/`removeOnFail` jobs
  /// per kind (spec §3: "last 10 completed, last 25 failed per kind").
  async fn gc_retention(&self) -> anyhow::Result<u64> {
    let mut removed = 0u64;
    for kind in [
      JobKind::Deploy,
      JobKind::Rollback,
      JobKind::Update,
      JobKind::Remove,
      JobKind::Scale,
      JobKind::Build,
      JobKind::Cleanup,
      JobKind::HealthCheck,
      JobKind::RenewCertificate,
      JobKind::DeployUpload,
      JobKind::UpdateTraefikConfig,
      JobKind::SendAlertNotification,
    ] {
      removed += self.trim_kind(kind, JobStatus::Completed, 10).await?;
      removed += self.trim_kind(kind, JobStatus::Failed, 25).await?;
    }
    Ok(removed)
  }
}

impl MongoJobStore {
  async fn trim_kind(
    &self,
    kind: JobKind,
    status: JobStatus,
    keep: usize,
  ) -> anyhow::Result<u64> {
    let mut jobs = find_collect(
      &self.jobs,
      doc! { "kind": bson::to_bson(&kind)?, "status": status_bson(status) },
      None,
    )
    .await?;
    if jobs.len() <= keep {
      return Ok(0);
    }
    jobs.sort_by_key(|j| j.finished_at.unwrap_or(j.created_at));
    jobs.reverse();
    let stale = &jobs[keep..];
    let ids: Vec<_> = stale.iter().map(|j| j.id.clone()).collect();
    if ids.is_empty() {
      return Ok(0);
    }
    let result = self
      .jobs
      .delete_many(doc! { "id": { "$in": ids } })
      .await?;
    Ok(result.deleted_count)
  }
}
