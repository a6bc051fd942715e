//! Service Store: read-only access to the minimal `ServiceRecord`
//! projection the Orchestrator, Builder and Resource Guard need.
//! Project/service CRUD itself is an external collaborator (spec §1);
//! this trait is the seam the Orchestrator is wired against.

use async_trait::async_trait;
use database::{bson::doc, find_collect};
use deployer_types::ServiceRecord;
use mongodb::Collection;
use std::sync::Mutex;

#[async_trait]
pub trait ServiceStore: Send + Sync {
  async fn get(&self, id: &str) -> anyhow::Result<Option<ServiceRecord>>;
  async fn list_by_project(
    &self,
    project_id: &str,
  ) -> anyhow::Result<Vec<ServiceRecord>>;
  async fn upsert(&self, service: ServiceRecord) -> anyhow::Result<()>;
}

pub struct MongoServiceStore {
  services: Collection<ServiceRecord>,
}

impl MongoServiceStore {
  pub fn new(services: Collection<ServiceRecord>) -> Self {
    Self { services }
  }
}

#[async_trait]
impl ServiceStore for MongoServiceStore {
  async fn get(&self, id: &str) -> anyhow::Result<Option<ServiceRecord>> {
    Ok(self.services.find_one(doc! { "id": id }).await?)
  }

  async fn list_by_project(
    &self,
    project_id: &str,
  ) -> anyhow::Result<Vec<ServiceRecord>> {
    find_collect(&self.services, doc! { "project_id": project_id }, None)
      .await
  }

  async fn upsert(&self, service: ServiceRecord) -> anyhow::Result<()> {
    self
      .services
      .replace_one(doc! { "id": &service.id }, &service)
      .upsert(true)
      .await?;
    Ok(())
  }
}

/// In-process fake for orchestrator unit tests.
#[derive(Default)]
pub struct MemoryServiceStore {
  services: Mutex<Vec<ServiceRecord>>,
}

impl MemoryServiceStore {
  pub fn seed(&self, service: ServiceRecord) {
    self.services.lock().unwrap().push(service);
  }
}

#[async_trait]
impl ServiceStore for MemoryServiceStore {
  async fn get(&self, id: &str) -> anyhow::Result<Option<ServiceRecord>> {
    Ok(
      self
        .services
        .lock()
        .unwrap()
        .iter()
        .find(|s| s.id == id)
        .cloned(),
    )
  }

  async fn list_by_project(
    &self,
    project_id: &str,
  ) -> anyhow::Result<Vec<ServiceRecord>> {
    Ok(
      self
        .services
        .lock()
        .unwrap()
        .iter()
        .filter(|s| s.project_id == project_id)
        .cloned()
        .collect(),
    )
  }

  async fn upsert(&self, service: ServiceRecord) -> anyhow::Result<()> {
    let mut services = self.services.lock().unwrap();
    if let Some(slot) = services.iter_mut().find(|s| s.id == service.id) {
      *slot = service;
    } else {
      services.push(service);
    }
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use deployer_types::{BuildConfig, BuilderKind, Environment};

  fn sample(id: &str, project_id: &str) -> ServiceRecord {
    ServiceRecord {
      id: id.to_string(),
      project_id: project_id.to_string(),
      name: "app".to_string(),
      environment: Environment::Production,
      build: BuildConfig {
        builder: BuilderKind::Static,
        dockerfile_path: None,
        build_args: Default::default(),
        start_command: None,
      },
      port: 8080,
      domains: Vec::new(),
      cpu_limit: "1".to_string(),
      memory_limit: "512m".to_string(),
      replicas: 1,
      env: Default::default(),
      health_check_path: None,
      expected_status_codes: Vec::new(),
    }
  }

  #[tokio::test]
  async fn memory_store_round_trips_and_filters_by_project() {
    let store = MemoryServiceStore::default();
    store.seed(sample("svc-1", "proj-a"));
    store.seed(sample("svc-2", "proj-b"));

    assert!(store.get("svc-1").await.unwrap().is_some());
    assert!(store.get("missing").await.unwrap().is_none());

    let proj_a = store.list_by_project("proj-a").await.unwrap();
    assert_eq!(proj_a.len(), 1);
    assert_eq!(proj_a[0].id, "svc-1");
  }

  #[tokio::test]
  async fn upsert_replaces_existing_record() {
    let store = MemoryServiceStore::default();
    store.seed(sample("svc-1", "proj-a"));

    let mut updated = sample("svc-1", "proj-a");
    updated.port = 9090;
    store.upsert(updated).await.unwrap();

    let fetched = store.get("svc-1").await.unwrap().unwrap();
    assert_eq!(fetched.port, 9090);
  }
}
