use std::sync::Arc;
use std::time::Duration;

use deployer_core::{
  alert::MongoAlertStore,
  cert::{CertCoordinator, MongoCertStore},
  config::core_config,
  deployment::MongoDeploymentStore,
  handlers,
  health::{HealthMonitor, MongoHealthCheckStore},
  metrics::{MetricsCollector, MongoMetricsStore},
  orchestrator::Orchestrator,
  queue::{MongoJobStore, QueueDriver},
  scheduler::Scheduler,
  service::MongoServiceStore,
  stack::MongoStackStore,
  state::{db_client, docker_client, init_db_client, init_docker_client},
  swarm::SwarmDriver,
};
use deployer_types::JobKind;

#[macro_use]
extern crate tracing;

async fn app() -> anyhow::Result<()> {
  let config = core_config();
  logger::init(&config.log)?;

  info!("deployer-core version: v{}", env!("CARGO_PKG_VERSION"));

  init_db_client().await?;
  init_docker_client()?;
  let db = db_client();
  let docker = docker_client();

  let jobs = Arc::new(MongoJobStore::new(db.jobs.clone()));
  let stacks = Arc::new(MongoStackStore::new(db.stacks.clone()));
  let deployments = MongoDeploymentStore::new(db.deployments.clone());
  let services = MongoServiceStore::new(db.services.clone());
  let certs_store = MongoCertStore::new(db.certificates.clone());
  let health_store = MongoHealthCheckStore::new(db.health_checks.clone());
  let metrics_store = MongoMetricsStore::new(db.metrics.clone());
  let alerts_store = Arc::new(MongoAlertStore::new(db.alerts.clone()));

  let swarm = Arc::new(SwarmDriver::new(
    docker.clone(),
    Duration::from_secs(config.convergence_timeout_secs),
  ));

  let orchestrator = Arc::new(Orchestrator::new(
    deployments,
    MongoStackStore::new(db.stacks.clone()),
    services,
    SwarmDriver::new(docker.clone(), Duration::from_secs(config.convergence_timeout_secs)),
    docker.clone(),
    config.workspace_dir.clone(),
    config.static_root.clone(),
    config.traefik_dynamic_config_path.clone(),
    Duration::from_secs(config.startup_deadline_secs),
  ));

  let certs = Arc::new(CertCoordinator::new(
    certs_store,
    MongoJobStore::new(db.jobs.clone()),
    config.cert_dir.clone(),
  ));

  let health_store_for_handlers = Arc::new(MongoHealthCheckStore::new(db.health_checks.clone()));
  let health = Arc::new(HealthMonitor::new(
    health_store,
    MongoAlertStore::new(db.alerts.clone()),
    MongoStackStore::new(db.stacks.clone()),
    MongoJobStore::new(db.jobs.clone()),
    Duration::from_secs(config.probe_timeout_secs),
  ));

  let metrics = Arc::new(MetricsCollector::new(
    docker.clone(),
    metrics_store,
    MongoAlertStore::new(db.alerts.clone()),
    MongoStackStore::new(db.stacks.clone()),
    MongoJobStore::new(db.jobs.clone()),
  ));

  let driver = QueueDriver::new(jobs.clone() as Arc<dyn deployer_core::queue::JobStore>)
    .with_kind_limit(JobKind::Deploy, config.deploy_concurrency_limit);
  let driver = handlers::register_all(
    driver,
    orchestrator,
    stacks,
    swarm,
    certs.clone(),
    health_store_for_handlers,
    alerts_store,
    config.traefik_dynamic_config_path.clone().into(),
    config.static_root.clone().into(),
  );
  Arc::new(driver).spawn_workers(config.queue_worker_count);

  let scheduler = Scheduler::new(health, metrics, certs, jobs);
  Arc::new(scheduler).spawn(
    Duration::from_secs(config.health_sweep_interval_secs),
    Duration::from_secs(config.metrics_interval_secs),
  );

  info!("deployer-core is up, {} queue workers running", config.queue_worker_count);

  std::future::pending::<()>().await;
  Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();

  let mut term_signal =
    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

  let handle = tokio::spawn(app());

  tokio::select! {
    res = handle => return res?,
    _ = tokio::signal::ctrl_c() => {
      info!("received ctrl-c, shutting down");
    }
    _ = term_signal.recv() => {
      info!("received SIGTERM, shutting down");
    }
  }

  Ok(())
}
