use std::sync::OnceLock;

use cache::CloneCache;
use dashmap::DashMap;
use deployer_types::{Alert, AlertScope, Job, ServiceRecord, SslCertificate, Stack};
use mongodb::{Collection, Database};
use tokio::sync::Mutex;

use crate::config::core_config;

/// Typed collection handles, the concrete adapter behind the Job Store
/// and Stack Store traits (spec §4.1, §4.3 "Stack Store").
pub struct DbClient {
  pub jobs: Collection<Job>,
  pub stacks: Collection<Stack>,
  pub deployments: Collection<deployer_types::Deployment>,
  pub certificates: Collection<SslCertificate>,
  pub health_checks: Collection<deployer_types::HealthCheck>,
  pub metrics: Collection<deployer_types::Metric>,
  pub alerts: Collection<Alert>,
  pub services: Collection<ServiceRecord>,
}

impl DbClient {
  fn from_database(db: Database) -> Self {
    Self {
      jobs: db.collection("jobs"),
      stacks: db.collection("stacks"),
      deployments: db.collection("deployments"),
      certificates: db.collection("certificates"),
      health_checks: db.collection("health_checks"),
      metrics: db.collection("metrics"),
      alerts: db.collection("alerts"),
      services: db.collection("services"),
    }
  }
}

static DB_CLIENT: OnceLock<DbClient> = OnceLock::new();

/// Must be called once during startup before `db_client()` is used.
pub async fn init_db_client() -> anyhow::Result<()> {
  let config = core_config();
  let client = database::client(&config.database_uri).await?;
  let db = client.database(&config.database_name);
  DB_CLIENT
    .set(DbClient::from_database(db))
    .map_err(|_| anyhow::anyhow!("db client already initialized"))
}

pub fn db_client() -> &'static DbClient {
  DB_CLIENT.get().expect("db client not initialized, call init_db_client() first")
}

static DOCKER_CLIENT: OnceLock<bollard::Docker> = OnceLock::new();

pub fn init_docker_client() -> anyhow::Result<()> {
  let docker = bollard::Docker::connect_with_local_defaults()?;
  DOCKER_CLIENT
    .set(docker)
    .map_err(|_| anyhow::anyhow!("docker client already initialized"))
}

pub fn docker_client() -> &'static bollard::Docker {
  DOCKER_CLIENT
    .get()
    .expect("docker client not initialized, call init_docker_client() first")
}

/// Open-alert de-dup cache, keyed by (stack, service, alert type).
/// Spec §3: "An open alert cannot coexist with a second alert of the
/// same (scope, type)".
pub fn open_alerts_cache() -> &'static CloneCache<AlertScopeKey, Alert> {
  static CACHE: OnceLock<CloneCache<AlertScopeKey, Alert>> = OnceLock::new();
  CACHE.get_or_init(Default::default)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlertScopeKey {
  pub scope: AlertScope,
  pub alert_type: deployer_types::AlertType,
}

impl From<AlertScopeKey> for AlertScopeKey {
  fn from(value: AlertScopeKey) -> Self {
    value
  }
}

/// Per-key async mutex registry used to serialize jobs touching the
/// same deployment or stack id (spec §5 "Ordering guarantees").
pub fn key_locks() -> &'static DashMap<String, std::sync::Arc<Mutex<()>>> {
  static LOCKS: OnceLock<DashMap<String, std::sync::Arc<Mutex<()>>>> =
    OnceLock::new();
  LOCKS.get_or_init(DashMap::new)
}

pub async fn lock_key(key: &str) -> tokio::sync::OwnedMutexGuard<()> {
  let entry = key_locks()
    .entry(key.to_string())
    .or_insert_with(|| std::sync::Arc::new(Mutex::new(())))
    .clone();
  entry.lock_owned().await
}
