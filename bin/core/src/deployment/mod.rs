//! Deployment Store (spec §4.3 "Deployment Store"): append-mostly
//! history of every deploy/rollback attempt for a service, keyed by id
//! and queryable by service for the Orchestrator's rollback target
//! lookup and the UI's history view.

use async_trait::async_trait;
use database::{bson::doc, find_collect};
use deployer_types::Deployment;
use mongodb::{
  options::FindOptions,
  Collection,
};
use std::sync::Mutex;

#[async_trait]
pub trait DeploymentStore: Send + Sync {
  async fn create(&self, deployment: Deployment) -> anyhow::Result<Deployment>;
  async fn get(&self, id: &str) -> anyhow::Result<Option<Deployment>>;
  async fn update(&self, deployment: Deployment) -> anyhow::Result<()>;
  /// Most recent deployments for a service, newest first.
  async fn list_by_service(
    &self,
    service_id: &str,
    limit: i64,
  ) -> anyhow::Result<Vec<Deployment>>;
}

pub struct MongoDeploymentStore {
  deployments: Collection<Deployment>,
}

impl MongoDeploymentStore {
  pub fn new(deployments: Collection<Deployment>) -> Self {
    Self { deployments }
  }
}

#[async_trait]
impl DeploymentStore for MongoDeploymentStore {
  async fn create(
    &self,
    deployment: Deployment,
  ) -> anyhow::Result<Deployment> {
    self.deployments.insert_one(&deployment).await?;
    Ok(deployment)
  }

  async fn get(&self, id: &str) -> anyhow::Result<Option<Deployment>> {
    Ok(self.deployments.find_one(doc! { "id": id }).await?)
  }

  async fn update(&self, deployment: Deployment) -> anyhow::Result<()> {
    self
      .deployments
      .replace_one(doc! { "id": &deployment.id }, &deployment)
      .await?;
    Ok(())
  }

  async fn list_by_service(
    &self,
    service_id: &str,
    limit: i64,
  ) -> anyhow::Result<Vec<Deployment>> {
    let options = FindOptions::builder()
      .sort(doc! { "created_at": -1 })
      .limit(limit)
      .build();
    find_collect(
      &self.deployments,
      doc! { "service_id": service_id },
      options,
    )
    .await
  }
}

/// In-process fake for orchestrator unit tests.
#[derive(Default)]
pub struct MemoryDeploymentStore {
  deployments: Mutex<Vec<Deployment>>,
}

#[async_trait]
impl DeploymentStore for MemoryDeploymentStore {
  async fn create(
    &self,
    deployment: Deployment,
  ) -> anyhow::Result<Deployment> {
    self.deployments.lock().unwrap().push(deployment.clone());
    Ok(deployment)
  }

  async fn get(&self, id: &str) -> anyhow::Result<Option<Deployment>> {
    Ok(
      self
        .deployments
        .lock()
        .unwrap()
        .iter()
        .find(|d| d.id == id)
        .cloned(),
    )
  }

  async fn update(&self, deployment: Deployment) -> anyhow::Result<()> {
    let mut deployments = self.deployments.lock().unwrap();
    if let Some(slot) = deployments.iter_mut().find(|d| d.id == deployment.id)
    {
      *slot = deployment;
    }
    Ok(())
  }

  async fn list_by_service(
    &self,
    service_id: &str,
    limit: i64,
  ) -> anyhow::Result<Vec<Deployment>> {
    let mut matches: Vec<Deployment> = self
      .deployments
      .lock()
      .unwrap()
      .iter()
      .filter(|d| d.service_id == service_id)
      .cloned()
      .collect();
    matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    matches.truncate(limit.max(0) as usize);
    Ok(matches)
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use deployer_types::{DeploymentStatus, Environment, SourceSpec};

  fn sample(service_id: &str) -> Deployment {
    Deployment::new(
      service_id,
      "proj-1",
      Environment::Production,
      SourceSpec::Registry {
        image: "nginx".to_string(),
        tag: "latest".to_string(),
        pull_policy: deployer_types::PullPolicy::IfNotPresent,
        registry_auth: None,
      },
      "test-user",
    )
  }

  #[tokio::test]
  async fn list_by_service_orders_newest_first() {
    let store = MemoryDeploymentStore::default();
    let mut first = sample("svc-1");
    first.created_at = 100;
    let mut second = sample("svc-1");
    second.created_at = 200;
    store.create(first.clone()).await.unwrap();
    store.create(second.clone()).await.unwrap();

    let history = store.list_by_service("svc-1", 10).await.unwrap();
    assert_eq!(history[0].id, second.id);
    assert_eq!(history[1].id, first.id);
  }

  #[tokio::test]
  async fn update_persists_status_transition() {
    let store = MemoryDeploymentStore::default();
    let deployment = store.create(sample("svc-1")).await.unwrap();
    let mut updated = deployment.clone();
    updated.status = DeploymentStatus::Success;
    store.update(updated).await.unwrap();

    let fetched = store.get(&deployment.id).await.unwrap().unwrap();
    assert_eq!(fetched.status, DeploymentStatus::Success);
  }
}
