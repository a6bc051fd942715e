//! Stack Store (spec §4.2): CRUD over `Stack` entities with the
//! invariant that at most one stack is live for a given
//! `(project_id, environment)` pair at a time.

use async_trait::async_trait;
use database::{bson::doc, find_collect};
use deployer_types::{Stack, StackStatus};
use mongodb::Collection;
use std::sync::Mutex;

#[async_trait]
pub trait StackStore: Send + Sync {
  async fn create(&self, stack: Stack) -> anyhow::Result<Stack>;
  async fn get(&self, id: &str) -> anyhow::Result<Option<Stack>>;
  async fn get_live(
    &self,
    project_id: &str,
    environment: &str,
  ) -> anyhow::Result<Option<Stack>>;
  async fn update(&self, stack: Stack) -> anyhow::Result<()>;
  async fn list_by_project(
    &self,
    project_id: &str,
  ) -> anyhow::Result<Vec<Stack>>;
  async fn list_all(&self) -> anyhow::Result<Vec<Stack>>;
  async fn delete(&self, id: &str) -> anyhow::Result<()>;
}

pub struct MongoStackStore {
  stacks: Collection<Stack>,
}

impl MongoStackStore {
  pub fn new(stacks: Collection<Stack>) -> Self {
    Self { stacks }
  }
}

#[async_trait]
impl StackStore for MongoStackStore {
  async fn create(&self, stack: Stack) -> anyhow::Result<Stack> {
    if let Some(existing) = self
      .get_live(&stack.project_id, &stack.environment)
      .await?
    {
      anyhow::bail!(
        "stack {} already live for project {} environment {}",
        existing.id,
        stack.project_id,
        stack.environment
      );
    }
    self.stacks.insert_one(&stack).await?;
    Ok(stack)
  }

  async fn get(&self, id: &str) -> anyhow::Result<Option<Stack>> {
    Ok(self.stacks.find_one(doc! { "id": id }).await?)
  }

  async fn get_live(
    &self,
    project_id: &str,
    environment: &str,
  ) -> anyhow::Result<Option<Stack>> {
    Ok(
      self
        .stacks
        .find_one(doc! {
          "project_id": project_id,
          "environment": environment,
          "status": { "$ne": bson::to_bson(&StackStatus::Removing)? },
        })
        .await?,
    )
  }

  async fn update(&self, stack: Stack) -> anyhow::Result<()> {
    self
      .stacks
      .replace_one(doc! { "id": &stack.id }, &stack)
      .await?;
    Ok(())
  }

  async fn list_by_project(
    &self,
    project_id: &str,
  ) -> anyhow::Result<Vec<Stack>> {
    find_collect(&self.stacks, doc! { "project_id": project_id }, None)
      .await
  }

  async fn list_all(&self) -> anyhow::Result<Vec<Stack>> {
    find_collect(&self.stacks, doc! {}, None).await
  }

  async fn delete(&self, id: &str) -> anyhow::Result<()> {
    self.stacks.delete_one(doc! { "id": id }).await?;
    Ok(())
  }
}

/// In-process fake for orchestrator/monitor unit tests.
#[derive(Default)]
pub struct MemoryStackStore {
  stacks: Mutex<Vec<Stack>>,
}

#[async_trait]
impl StackStore for MemoryStackStore {
  async fn create(&self, stack: Stack) -> anyhow::Result<Stack> {
    let mut stacks = self.stacks.lock().unwrap();
    if stacks.iter().any(|s| {
      s.project_id == stack.project_id
        && s.environment == stack.environment
        && s.status != StackStatus::Removing
    }) {
      anyhow::bail!(
        "stack already live for project {} environment {}",
        stack.project_id,
        stack.environment
      );
    }
    stacks.push(stack.clone());
    Ok(stack)
  }

  async fn get(&self, id: &str) -> anyhow::Result<Option<Stack>> {
    Ok(self.stacks.lock().unwrap().iter().find(|s| s.id == id).cloned())
  }

  async fn get_live(
    &self,
    project_id: &str,
    environment: &str,
  ) -> anyhow::Result<Option<Stack>> {
    Ok(
      self
        .stacks
        .lock()
        .unwrap()
        .iter()
        .find(|s| {
          s.project_id == project_id
            && s.environment == environment
            && s.status != StackStatus::Removing
        })
        .cloned(),
    )
  }

  async fn update(&self, stack: Stack) -> anyhow::Result<()> {
    let mut stacks = self.stacks.lock().unwrap();
    if let Some(slot) = stacks.iter_mut().find(|s| s.id == stack.id) {
      *slot = stack;
    }
    Ok(())
  }

  async fn list_by_project(
    &self,
    project_id: &str,
  ) -> anyhow::Result<Vec<Stack>> {
    Ok(
      self
        .stacks
        .lock()
        .unwrap()
        .iter()
        .filter(|s| s.project_id == project_id)
        .cloned()
        .collect(),
    )
  }

  async fn list_all(&self) -> anyhow::Result<Vec<Stack>> {
    Ok(self.stacks.lock().unwrap().clone())
  }

  async fn delete(&self, id: &str) -> anyhow::Result<()> {
    self.stacks.lock().unwrap().retain(|s| s.id != id);
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn sample(project: &str, env: &str) -> Stack {
    Stack::new(project, env)
  }

  #[tokio::test]
  async fn rejects_second_live_stack_for_same_project_environment() {
    let store = MemoryStackStore::default();
    store.create(sample("proj-1", "production")).await.unwrap();
    let err = store
      .create(sample("proj-1", "production"))
      .await
      .unwrap_err();
    assert!(err.to_string().contains("already live"));
  }

  #[tokio::test]
  async fn allows_distinct_environments_for_same_project() {
    let store = MemoryStackStore::default();
    store.create(sample("proj-1", "production")).await.unwrap();
    store.create(sample("proj-1", "staging")).await.unwrap();
    assert_eq!(store.list_by_project("proj-1").await.unwrap().len(), 2);
  }
}
