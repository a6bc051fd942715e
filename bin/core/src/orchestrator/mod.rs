//! Deployment Orchestrator (spec §4.8): the state machine that drives
//! a single deployment from `queued` through `active`, plus the
//! `rollback` job and the `cleanup` job kinds. Wires together the
//! Source Materializer, Builder, Resource Guard, Swarm Driver and
//! Traefik Renderer behind one coherent phase sequence.

use std::path::PathBuf;
use std::time::Duration;

use bollard::Docker;
use deployer_types::{
  ArtifactKind, BuildArtifact, CleanupPayload, CleanupType, DeployPayload,
  Deployment, DeploymentOutput, DeploymentPhase, DeploymentStatus,
  DomainMapping, JobResult, RollbackPayload, SourceSpec, StackStatus,
  now_ms, parse_cpu, parse_memory, sanitize_log,
};
use tracing::{info, warn};

use crate::deployment::DeploymentStore;
use crate::queue::{JobContext, JobStore};
use crate::quota;
use crate::service::ServiceStore;
use crate::stack::StackStore;
use crate::swarm::SwarmDriver;
use crate::traefik;

/// Retain-on-success rollback policy (spec §9 Open Question): every
/// deployment that reaches `success` keeps its `build::run_docker_build`
/// tag (`deployment-<id>:latest`) forever — default image pruning only
/// removes untagged images, so this survives `cleanup{unusedImages}`
/// without any extra bookkeeping. Rollback re-points the Swarm service's
/// image field at the target deployment's retained tag.
pub struct Orchestrator<D: DeploymentStore, St: StackStore, Sv: ServiceStore> {
  deployments: D,
  stacks: St,
  services: Sv,
  swarm: SwarmDriver,
  docker: Docker,
  workspace_dir: PathBuf,
  static_root: PathBuf,
  traefik_config_path: PathBuf,
  startup_deadline: Duration,
}

impl<D: DeploymentStore, St: StackStore, Sv: ServiceStore> Orchestrator<D, St, Sv> {
  pub fn new(
    deployments: D,
    stacks: St,
    services: Sv,
    swarm: SwarmDriver,
    docker: Docker,
    workspace_dir: impl Into<PathBuf>,
    static_root: impl Into<PathBuf>,
    traefik_config_path: impl Into<PathBuf>,
    startup_deadline: Duration,
  ) -> Self {
    Self {
      deployments,
      stacks,
      services,
      swarm,
      docker,
      workspace_dir: workspace_dir.into(),
      static_root: static_root.into(),
      traefik_config_path: traefik_config_path.into(),
      startup_deadline,
    }
  }

  async fn require_deployment(&self, id: &str) -> anyhow::Result<Deployment> {
    self
      .deployments
      .get(id)
      .await?
      .ok_or_else(|| anyhow::anyhow!("deployment {id} not found"))
  }

  async fn require_service(
    &self,
    id: &str,
  ) -> anyhow::Result<deployer_types::ServiceRecord> {
    self
      .services
      .get(id)
      .await?
      .ok_or_else(|| anyhow::anyhow!("service {id} not found"))
  }

  async fn audit(&self, deployment: &mut Deployment, stage: &str, message: &str, success: bool) {
    let sanitized = sanitize_log(message);
    deployment.push_log(deployer_types::LogLine {
      stage: stage.to_string(),
      command: String::new(),
      stdout: if success { sanitized.clone() } else { String::new() },
      stderr: if success { String::new() } else { sanitized },
      success,
      start_ts: now_ms(),
      end_ts: now_ms(),
    });
    let _ = self.deployments.update(deployment.clone()).await;
  }

  async fn persist_progress(&self, ctx: &JobContext, deployment: &mut Deployment) {
    let _ = self.deployments.update(deployment.clone()).await;
    ctx.progress(deployment.progress).await;
  }

  /// Drives `queued -> ... -> active` for one deploy job. Returns
  /// `Ok(None)` if the job's cancellation token fired mid-flight (the
  /// deployment is already written `cancelled` by the time this
  /// returns); `Err` for any fatal phase error (deployment left
  /// `failed`, workspace swept).
  pub async fn deploy(&self, ctx: &JobContext, payload: DeployPayload) -> anyhow::Result<JobResult> {
    let mut deployment = self.require_deployment(&payload.deployment_id).await?;
    let service = self.require_service(&payload.service_id).await?;

    match self.advance_deployment(ctx, &mut deployment, &service, &payload.source_spec).await {
      Ok(Some(output)) => {
        deployment.output = output;
        deployment.status = DeploymentStatus::Success;
        deployment.advance(DeploymentPhase::Active, 100);
        deployment.deploy_complete_at = Some(now_ms());
        self.deployments.update(deployment.clone()).await?;
        ctx.progress(100).await;
        Ok(JobResult::ok("deployment is active"))
      }
      Ok(None) => Ok(JobResult::ok("deployment cancelled")),
      Err(e) => {
        deployment.status = DeploymentStatus::Failed;
        deployment.advance(DeploymentPhase::Failed, deployment.progress);
        deployment.error = Some(sanitize_log(&format!("{e}")));
        self.audit(&mut deployment, e.phase_tag(), &e.to_string(), false).await;
        let _ = tokio::fs::remove_dir_all(self.workspace_dir.join(&deployment.id)).await;
        Err(anyhow::anyhow!("{e}"))
      }
    }
  }

  async fn check_cancelled(
    &self,
    ctx: &JobContext,
    deployment: &mut Deployment,
    service_name: &str,
  ) -> bool {
    if !ctx.cancel.is_cancelled() {
      return false;
    }
    info!("deployment {} cancelled, tearing down", deployment.id);
    if let Ok(Some(mut stack)) = self
      .stacks
      .get_live(&deployment.project_id, &deployment.environment.to_string())
      .await
    {
      self.teardown_service(&mut stack, service_name).await;
    }
    deployment.status = DeploymentStatus::Cancelled;
    deployment.advance(DeploymentPhase::Cancelled, deployment.progress);
    let _ = self.deployments.update(deployment.clone()).await;
    let _ = tokio::fs::remove_dir_all(self.workspace_dir.join(&deployment.id)).await;
    true
  }

  /// Removes the single Swarm service for `service_name`, drops its
  /// domain mapping, and re-renders Traefik. Best-effort: a failure here
  /// is logged, never propagated, since the caller is already on a
  /// cancellation or rollback path that must reach a terminal state.
  async fn teardown_service(&self, stack: &mut deployer_types::Stack, service_name: &str) {
    if let Err(e) = self.swarm.remove_one(stack, service_name).await {
      warn!("failed to stop swarm service for {service_name}: {e}");
    }
    stack.domain_mappings.retain(|m| m.service_name != service_name);
    let rendered = traefik::render(stack, &self.static_root);
    if let Err(e) = traefik::write_dynamic_config(&self.traefik_config_path, &rendered).await {
      warn!("failed to rewrite traefik config after teardown: {e}");
    }
    let _ = self.stacks.update(stack.clone()).await;
  }

  async fn advance_deployment(
    &self,
    ctx: &JobContext,
    deployment: &mut Deployment,
    service: &deployer_types::ServiceRecord,
    source_spec: &SourceSpec,
  ) -> Result<Option<DeploymentOutput>, deployer_types::DeployerError> {
    use deployer_types::DeployerError;

    // 1. queued -> pulling_source
    deployment.status = DeploymentStatus::Building;
    deployment.advance(DeploymentPhase::PullingSource, 10);
    self.persist_progress(ctx, deployment).await;

    let materialized = if matches!(source_spec, SourceSpec::Registry { .. }) {
      None
    } else {
      let m = crate::source::materialize(
        &self.workspace_dir,
        &deployment.id,
        source_spec,
        crate::config::core_config().max_source_archive_bytes,
      )
      .await
      .map_err(|e| DeployerError::SourceUnavailable(e.to_string()))?;
      Some(m)
    };
    self.audit(deployment, "pulling_source", "source materialized", true).await;

    if self.check_cancelled(ctx, deployment, &service.name).await {
      return Ok(None);
    }

    // 2. pulling_source -> building
    deployment.advance(DeploymentPhase::Building, 30);
    self.persist_progress(ctx, deployment).await;

    let artifact = self.build_artifact(ctx, deployment, service, source_spec, &materialized).await?;

    if matches!(artifact.kind, ArtifactKind::Static) {
      deployment.advance(DeploymentPhase::CopyingFiles, 50);
      self.persist_progress(ctx, deployment).await;
    }
    self.audit(deployment, "building", &format!("built artifact {}", artifact.reference), true).await;

    if self.check_cancelled(ctx, deployment, &service.name).await {
      return Ok(None);
    }

    // 3. building -> deploying
    deployment.status = DeploymentStatus::Deploying;
    deployment.advance(DeploymentPhase::Deploying, 75);
    self.persist_progress(ctx, deployment).await;

    let output = self.converge_stack(deployment, service, &artifact).await?;

    if self.check_cancelled(ctx, deployment, &service.name).await {
      return Ok(None);
    }

    // 4. deploying -> active
    if artifact.kind == ArtifactKind::Image {
      self.startup_probe(deployment, service).await?;
    }
    self.audit(deployment, "active", "startup probe passed", true).await;

    Ok(Some(output))
  }

  async fn build_artifact(
    &self,
    ctx: &JobContext,
    deployment: &Deployment,
    service: &deployer_types::ServiceRecord,
    source_spec: &SourceSpec,
    materialized: &Option<crate::source::Materialized>,
  ) -> Result<BuildArtifact, deployer_types::DeployerError> {
    use deployer_types::DeployerError;

    if let SourceSpec::Registry { image, tag, .. } = source_spec {
      return Ok(BuildArtifact { kind: ArtifactKind::Image, reference: format!("{image}:{tag}") });
    }

    let source_path = materialized
      .as_ref()
      .and_then(|m| m.path.as_deref())
      .ok_or_else(|| {
        DeployerError::SourceUnavailable("materialized source produced no path".to_string())
      })?;

    crate::build::build(
      ctx,
      source_path,
      &deployment.project_id,
      &service.id,
      &deployment.id,
      &self.static_root,
      &service.build,
    )
    .await
    .map_err(|e| DeployerError::BuildFailed { stderr_tail: e.to_string() })
  }

  async fn converge_stack(
    &self,
    deployment: &Deployment,
    service: &deployer_types::ServiceRecord,
    artifact: &BuildArtifact,
  ) -> Result<DeploymentOutput, deployer_types::DeployerError> {
    use deployer_types::DeployerError;

    let environment = deployment.environment.to_string();
    let mut stack = self
      .stacks
      .get_live(&deployment.project_id, &environment)
      .await
      .map_err(DeployerError::Other)?
      .unwrap_or_else(|| {
        deployer_types::Stack::new(deployment.project_id.as_str(), environment.clone())
      });
    let existing = !stack.id.is_empty()
      && self
        .stacks
        .get(&stack.id)
        .await
        .map_err(DeployerError::Other)?
        .is_some();

    let requested = service.requested_usage();
    let current = usage_excluding(&stack, &service.name);
    let check = quota::check(&current, &requested, &stack.resource_quotas);
    if !check.allowed {
      return Err(DeployerError::QuotaExceeded(check.violations.join("; ")));
    }

    let image_ref = match artifact.kind {
      ArtifactKind::Image => artifact.reference.clone(),
      ArtifactKind::Static => artifact.reference.clone(),
    };

    if artifact.kind == ArtifactKind::Image {
      let config = service.to_service_config(&image_ref);
      if let Some(slot) = stack.compose_config.services.iter_mut().find(|s| s.name == service.name)
      {
        *slot = config;
      } else {
        stack.compose_config.services.push(config);
      }
    } else {
      stack.compose_config.services.retain(|s| s.name != service.name);
    }

    let domain_url = if let Some(domain) = service.domains.first() {
      stack.domain_mappings.retain(|m| m.service_name != service.name);
      stack.domain_mappings.push(DomainMapping {
        service_name: service.name.clone(),
        domain: domain.clone(),
        port: service.port,
        cert_resolver: "letsencrypt".to_string(),
      });
      Some(format!("https://{domain}"))
    } else {
      None
    };

    stack.resource_usage = stack.requested_usage();
    stack.status = StackStatus::Updating;

    let stack = if existing {
      self.stacks.update(stack.clone()).await.map_err(DeployerError::Other)?;
      stack
    } else {
      self.stacks.create(stack).await.map_err(DeployerError::Other)?
    };

    if !stack.domain_mappings.is_empty() {
      let rendered = traefik::render(&stack, &self.static_root);
      traefik::write_dynamic_config(&self.traefik_config_path, &rendered)
        .await
        .map_err(DeployerError::Other)?;
    }

    if artifact.kind == ArtifactKind::Image {
      self.swarm.converge(&stack).await?;
    }

    let mut stack = stack;
    stack.status = StackStatus::Running;
    stack.last_deployed_at = Some(now_ms());
    self.stacks.update(stack).await.map_err(DeployerError::Other)?;

    let (commit, branch) = match &deployment.source_spec {
      SourceSpec::Git { branch, commit, .. } => (commit.clone(), Some(branch.clone())),
      _ => (None, None),
    };

    Ok(DeploymentOutput {
      container_id: None,
      image_tag: Some(image_ref),
      domain_url,
      commit,
      branch,
      deployment_type: Some(
        if artifact.kind == ArtifactKind::Static { "static" } else { "container" }.to_string(),
      ),
    })
  }

  /// Inline startup probe (spec §4.8 step 4): up to 30 retries at 2 s
  /// intervals, bounded overall by `startupDeadline`.
  async fn startup_probe(
    &self,
    deployment: &Deployment,
    service: &deployer_types::ServiceRecord,
  ) -> Result<(), deployer_types::DeployerError> {
    use deployer_types::DeployerError;

    let Some(domain) = service.domains.first() else {
      return Ok(());
    };
    let path = service.health_check_path.as_deref().unwrap_or("/");
    let url = format!("https://{domain}{path}");
    let client = reqwest::Client::builder()
      .redirect(reqwest::redirect::Policy::limited(3))
      .build()
      .unwrap_or_default();
    let expected = if service.expected_status_codes.is_empty() {
      vec![200, 204]
    } else {
      service.expected_status_codes.clone()
    };

    let deadline = tokio::time::Instant::now() + self.startup_deadline;
    for attempt in 1..=30u32 {
      match client.get(&url).timeout(Duration::from_secs(10)).send().await {
        Ok(resp) if expected.contains(&resp.status().as_u16()) => return Ok(()),
        _ => {}
      }
      if tokio::time::Instant::now() >= deadline || attempt == 30 {
        return Err(DeployerError::HealthCheckFailed(format!(
          "deployment {} startup probe against {url} never answered within {expected:?} after {attempt} attempts",
          deployment.id
        )));
      }
      tokio::time::sleep(Duration::from_secs(2)).await;
    }
    Ok(())
  }

  /// `rollback{deploymentId, targetDeploymentId}` (spec §4.8): stops the
  /// current deployment's service, restarts the target's retained image,
  /// re-registers its domain. On any failure the job fails and the
  /// system is left in the state reached — no auto-revert.
  pub async fn rollback(&self, payload: RollbackPayload) -> anyhow::Result<JobResult> {
    let mut current = self.require_deployment(&payload.deployment_id).await?;
    let mut target = self.require_deployment(&payload.target_deployment_id).await?;

    if current.service_id != target.service_id {
      anyhow::bail!(
        "rollback: deployments {} and {} belong to different services",
        current.id,
        target.id
      );
    }
    if target.status != DeploymentStatus::Success {
      anyhow::bail!(
        "rollback: target deployment {} is not in success status",
        target.id
      );
    }
    let Some(target_image) = target.output.image_tag.clone() else {
      anyhow::bail!(
        "rollback: target deployment {} has no retained image to restart",
        target.id
      );
    };

    let service = self.require_service(&current.service_id).await?;
    let environment = current.environment.to_string();
    let mut stack = self
      .stacks
      .get_live(&current.project_id, &environment)
      .await?
      .ok_or_else(|| {
        anyhow::anyhow!(
          "rollback: no live stack for project {} environment {environment}",
          current.project_id
        )
      })?;

    self.swarm.remove_one(&stack, &service.name).await?;
    self.audit(&mut current, "rollback", &format!("stopped service {}", service.name), true).await;

    let config = service.to_service_config(&target_image);
    if let Some(slot) = stack.compose_config.services.iter_mut().find(|s| s.name == service.name) {
      *slot = config;
    } else {
      stack.compose_config.services.push(config);
    }

    if let Some(domain) = service.domains.first() {
      stack.domain_mappings.retain(|m| m.service_name != service.name);
      stack.domain_mappings.push(DomainMapping {
        service_name: service.name.clone(),
        domain: domain.clone(),
        port: service.port,
        cert_resolver: "letsencrypt".to_string(),
      });
    }

    self.swarm.converge(&stack).await?;
    self.audit(&mut current, "rollback", &format!("restarted {target_image}"), true).await;

    if !stack.domain_mappings.is_empty() {
      let rendered = traefik::render(&stack, &self.static_root);
      traefik::write_dynamic_config(&self.traefik_config_path, &rendered).await?;
    }
    self.audit(&mut current, "rollback", "domain re-registered", true).await;

    stack.status = StackStatus::Running;
    stack.last_deployed_at = Some(now_ms());
    self.stacks.update(stack).await?;

    current.status = DeploymentStatus::Cancelled;
    current.advance(DeploymentPhase::Cancelled, current.progress);
    self.deployments.update(current).await?;

    target.status = DeploymentStatus::Success;
    self.deployments.update(target.clone()).await?;

    Ok(JobResult::ok(format!(
      "rolled back {} to {}",
      payload.deployment_id, payload.target_deployment_id
    )))
  }

  /// `cleanup{stackId, stackName, cleanupType}` (spec §4.10, §9 Open
  /// Question): real bollard prune calls, not a no-op. Default prune
  /// filters (no `label`/`until` filter) only remove dangling/untagged
  /// resources, so retained deployment images survive.
  pub async fn cleanup(&self, payload: CleanupPayload) -> anyhow::Result<JobResult> {
    let mut summary = Vec::new();

    if matches!(payload.cleanup_type, CleanupType::UnusedImages | CleanupType::All) {
      let result = self
        .docker
        .prune_images(None::<bollard::query_parameters::PruneImagesOptions>)
        .await?;
      summary.push(format!(
        "images: reclaimed {} bytes",
        result.space_reclaimed.unwrap_or(0)
      ));
    }
    if matches!(payload.cleanup_type, CleanupType::StoppedContainers | CleanupType::All) {
      let result = self
        .docker
        .prune_containers(None::<bollard::query_parameters::PruneContainersOptions>)
        .await?;
      summary.push(format!(
        "containers: reclaimed {} bytes",
        result.space_reclaimed.unwrap_or(0)
      ));
    }
    if matches!(payload.cleanup_type, CleanupType::DanglingNetworks | CleanupType::All) {
      let result = self
        .docker
        .prune_networks(None::<bollard::query_parameters::PruneNetworksOptions>)
        .await?;
      summary.push(format!(
        "networks: removed {}",
        result.networks_deleted.map(|v| v.len()).unwrap_or(0)
      ));
    }
    if matches!(payload.cleanup_type, CleanupType::Volumes | CleanupType::All) {
      let result = self
        .docker
        .prune_volumes(None::<bollard::query_parameters::PruneVolumesOptions>)
        .await?;
      summary.push(format!(
        "volumes: reclaimed {} bytes",
        result.space_reclaimed.unwrap_or(0)
      ));
    }

    info!("cleanup {} ({}) for stack {}: {}", payload.cleanup_type, payload.stack_name, payload.stack_id, summary.join("; "));
    Ok(JobResult::ok(summary.join("; ")))
  }
}

/// Sums requested resources across every service in `stack` except
/// `exclude_service`, so redeploying an existing service doesn't double
/// count its own prior footprint against the quota (spec §4.7).
fn usage_excluding(
  stack: &deployer_types::Stack,
  exclude_service: &str,
) -> deployer_types::ResourceUsage {
  let mut usage = deployer_types::ResourceUsage::default();
  for service in &stack.compose_config.services {
    if service.name == exclude_service {
      continue;
    }
    usage.cpu += parse_cpu(&service.cpu_limit).unwrap_or(0.0);
    usage.memory += parse_memory(&service.memory_limit).unwrap_or(0);
    usage.replicas += service.replicas;
    usage.services += 1;
  }
  usage
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::deployment::MemoryDeploymentStore;
  use crate::service::MemoryServiceStore;
  use crate::stack::MemoryStackStore;
  use deployer_types::{
    BuildConfig, BuilderKind, Deployment, Environment, PullPolicy, ServiceRecord,
  };

  fn service(name: &str) -> ServiceRecord {
    ServiceRecord {
      id: format!("svc-{name}"),
      project_id: "proj-1".to_string(),
      name: name.to_string(),
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
      memory_limit: "256m".to_string(),
      replicas: 1,
      env: Default::default(),
      health_check_path: None,
      expected_status_codes: Vec::new(),
    }
  }

  fn registry_deployment(service_id: &str) -> Deployment {
    Deployment::new(
      service_id,
      "proj-1",
      Environment::Production,
      SourceSpec::Registry {
        image: "nginx".to_string(),
        tag: "latest".to_string(),
        pull_policy: PullPolicy::IfNotPresent,
        registry_auth: None,
      },
      "test-user",
    )
  }

  #[test]
  fn usage_excluding_skips_the_named_service() {
    let mut stack = deployer_types::Stack::new("proj-1", "production");
    let mut svc = service("app");
    svc.cpu_limit = "1.5".to_string();
    stack.compose_config.services.push(svc.to_service_config("nginx"));

    let usage = usage_excluding(&stack, "app");
    assert_eq!(usage.cpu, 0.0);
    assert_eq!(usage.services, 0);
  }

  #[tokio::test]
  async fn rollback_rejects_mismatched_services() {
    let deployments = MemoryDeploymentStore::default();
    let stacks = MemoryStackStore::default();
    let services = MemoryServiceStore::default();
    services.seed(service("app"));

    let current = deployments.create(registry_deployment("svc-app")).await.unwrap();
    let mut other = registry_deployment("svc-other");
    other.status = DeploymentStatus::Success;
    let target = deployments.create(other).await.unwrap();

    let swarm = SwarmDriver::new(
      Docker::connect_with_local_defaults().expect("docker socket for test construction"),
      Duration::from_secs(1),
    );
    let orchestrator = Orchestrator::new(
      deployments,
      stacks,
      services,
      swarm,
      Docker::connect_with_local_defaults().expect("docker socket for test construction"),
      "/tmp/deployer-workspace-test",
      "/tmp/deployer-static-test",
      "/tmp/deployer-traefik-test.yml",
      Duration::from_secs(1),
    );

    let err = orchestrator
      .rollback(RollbackPayload { deployment_id: current.id, target_deployment_id: target.id })
      .await
      .unwrap_err();
    assert!(err.to_string().contains("different services"));
  }
}
