//! Swarm Driver (spec §4.4): converges a `Stack`'s desired compose
//! config onto Docker Swarm. Grounded on bollard's service API the
//! way the teacher's `docker/service.rs` wraps it, but drives
//! convergence directly rather than exposing raw inspect/list calls.

use std::{collections::HashMap, time::Duration};

use bollard::{
  Docker,
  query_parameters::{ListServicesOptionsBuilder, RemoveServiceOptions},
  secret::{
    EndpointPortConfig, EndpointPortConfigProtocolEnum,
    EndpointPortConfigPublishModeEnum, EndpointSpec, NetworkAttachmentConfig,
    RestartPolicy as SwarmRestartPolicy,
    RestartPolicyCondition as SwarmRestartPolicyCondition, Service,
    ServiceMode, ServiceModeReplicated, ServiceSpec as BollardServiceSpec,
    ServiceSpecEndpointSpec, ServiceSpecMode, ServiceUpdateResponse,
    TaskSpec, TaskSpecContainerSpec,
  },
};
use deployer_types::{
  DeployerError, ServiceConfig, Stack, cpu_to_nano, parse_cpu, parse_memory,
};
use tracing::{info, warn};

const STACK_NAMESPACE_LABEL: &str = "com.docker.stack.namespace";

pub struct SwarmDriver {
  docker: Docker,
  convergence_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ServiceStatus {
  pub name: String,
  pub desired_replicas: u64,
  pub current_replicas: u64,
  pub updated_replicas: u64,
  pub status: &'static str,
  pub ports: Vec<u16>,
}

#[derive(Debug, Clone)]
pub struct StackStatus {
  pub services: Vec<ServiceStatus>,
  pub overall: &'static str,
}

impl SwarmDriver {
  pub fn new(docker: Docker, convergence_timeout: Duration) -> Self {
    Self { docker, convergence_timeout }
  }

  fn service_name(stack: &Stack, service: &str) -> String {
    format!("{}_{}", stack.name, service)
  }

  /// Idempotent convergence: diffs desired services against observed
  /// ones under the stack's namespace label, creates/updates/removes
  /// as needed, then waits for the running task count to match desired
  /// replicas for every service (spec §4.4).
  pub async fn converge(&self, stack: &Stack) -> Result<(), DeployerError> {
    let observed = self.list_namespace_services(&stack.name).await?;
    let mut observed_names: HashMap<String, Service> = observed
      .into_iter()
      .filter_map(|s| s.spec.as_ref().and_then(|sp| sp.name.clone()).map(|n| (n, s)))
      .collect();

    for service in &stack.compose_config.services {
      let full_name = Self::service_name(stack, &service.name);
      let spec = build_service_spec(stack, service, &full_name);

      match observed_names.remove(&full_name) {
        Some(existing) => {
          let version = existing
            .version
            .as_ref()
            .and_then(|v| v.index)
            .ok_or_else(|| {
              DeployerError::TransientDockerError(
                "service missing version index".to_string(),
              )
            })?;
          self
            .docker
            .update_service(
              &full_name,
              spec,
              bollard::query_parameters::UpdateServiceOptionsBuilder::new()
                .version(version)
                .build(),
            )
            .await
            .map(|_: ServiceUpdateResponse| ())
            .map_err(|e| {
              DeployerError::TransientDockerError(format!(
                "update_service {full_name}: {e}"
              ))
            })?;
        }
        None => {
          self
            .docker
            .create_service(spec, None)
            .await
            .map_err(|e| {
              DeployerError::TransientDockerError(format!(
                "create_service {full_name}: {e}"
              ))
            })?;
        }
      }
    }

    // Anything left in `observed_names` is no longer desired; remove it.
    for (name, _) in observed_names {
      info!("removing swarm service {name}, no longer in desired stack");
      self
        .docker
        .remove_service(&name, None::<RemoveServiceOptions>)
        .await
        .map_err(|e| {
          DeployerError::TransientDockerError(format!(
            "remove_service {name}: {e}"
          ))
        })?;
    }

    self.wait_for_convergence(stack).await
  }

  pub async fn scale(
    &self,
    stack: &Stack,
    replicas: &HashMap<String, u32>,
  ) -> Result<(), DeployerError> {
    for (service_name, desired) in replicas {
      let full_name = Self::service_name(stack, service_name);
      let existing = self
        .docker
        .inspect_service(&full_name, None)
        .await
        .map_err(|e| {
          DeployerError::TransientDockerError(format!(
            "inspect_service {full_name}: {e}"
          ))
        })?;
      let version = existing
        .version
        .as_ref()
        .and_then(|v| v.index)
        .ok_or_else(|| {
          DeployerError::TransientDockerError(
            "service missing version index".to_string(),
          )
        })?;
      let mut spec = existing.spec.unwrap_or_default();
      spec.mode = Some(ServiceSpecMode {
        replicated: Some(ServiceModeReplicated { replicas: Some(*desired as i64) }),
        ..Default::default()
      });
      self
        .docker
        .update_service(
          &full_name,
          spec,
          bollard::query_parameters::UpdateServiceOptionsBuilder::new()
            .version(version)
            .build(),
        )
        .await
        .map(|_: ServiceUpdateResponse| ())
        .map_err(|e| {
          DeployerError::TransientDockerError(format!(
            "scale {full_name}: {e}"
          ))
        })?;
    }
    Ok(())
  }

  pub async fn remove(&self, stack: &Stack) -> Result<(), DeployerError> {
    let observed = self.list_namespace_services(&stack.name).await?;
    for service in observed {
      let Some(name) = service.spec.and_then(|s| s.name) else { continue };
      self
        .docker
        .remove_service(&name, None::<RemoveServiceOptions>)
        .await
        .map_err(|e| {
          DeployerError::TransientDockerError(format!(
            "remove_service {name}: {e}"
          ))
        })?;
    }
    Ok(())
  }

  /// Removes a single service by name, leaving the rest of the stack's
  /// services running. Used by cancellation teardown and rollback, where
  /// whole-stack [`Self::remove`] would take down unrelated services.
  pub async fn remove_one(
    &self,
    stack: &Stack,
    service_name: &str,
  ) -> Result<(), DeployerError> {
    let full_name = Self::service_name(stack, service_name);
    match self
      .docker
      .remove_service(&full_name, None::<RemoveServiceOptions>)
      .await
    {
      Ok(()) => Ok(()),
      Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
      Err(e) => Err(DeployerError::TransientDockerError(format!(
        "remove_service {full_name}: {e}"
      ))),
    }
  }

  pub async fn status(
    &self,
    stack: &Stack,
  ) -> Result<StackStatus, DeployerError> {
    let observed = self.list_namespace_services(&stack.name).await?;
    let mut services = Vec::new();
    let mut any_updating = false;
    let mut any_running = false;

    for service in observed {
      let name =
        service.spec.as_ref().and_then(|s| s.name.clone()).unwrap_or_default();
      let desired = service
        .spec
        .as_ref()
        .and_then(|s| s.mode.as_ref())
        .and_then(|m| m.replicated.as_ref())
        .and_then(|r| r.replicas)
        .unwrap_or(0) as u64;
      let running = service
        .service_status
        .as_ref()
        .and_then(|s| s.running_tasks)
        .unwrap_or(0) as u64;
      let updated = service
        .service_status
        .as_ref()
        .and_then(|s| s.desired_tasks)
        .unwrap_or(0) as u64;
      let ports = service
        .endpoint
        .as_ref()
        .and_then(|e| e.ports.as_ref())
        .map(|ports| {
          ports
            .iter()
            .filter_map(|p| p.published_port.map(|port| port as u16))
            .collect()
        })
        .unwrap_or_default();

      let status = if running == desired && desired > 0 {
        any_running = true;
        "running"
      } else {
        any_updating = true;
        "updating"
      };

      services.push(ServiceStatus {
        name,
        desired_replicas: desired,
        current_replicas: running,
        updated_replicas: updated,
        status,
        ports,
      });
    }

    let overall = if services.is_empty() {
      "stopped"
    } else if any_updating {
      "deploying"
    } else if any_running {
      "running"
    } else {
      "stopped"
    };

    Ok(StackStatus { services, overall })
  }

  async fn list_namespace_services(
    &self,
    stack_name: &str,
  ) -> Result<Vec<Service>, DeployerError> {
    let mut filters = HashMap::new();
    filters.insert(
      "label".to_string(),
      vec![format!("{STACK_NAMESPACE_LABEL}={stack_name}")],
    );
    self
      .docker
      .list_services(Some(
        ListServicesOptionsBuilder::new().filters(&filters).build(),
      ))
      .await
      .map_err(|e| {
        DeployerError::TransientDockerError(format!("list_services: {e}"))
      })
  }

  async fn wait_for_convergence(
    &self,
    stack: &Stack,
  ) -> Result<(), DeployerError> {
    let deadline = tokio::time::Instant::now() + self.convergence_timeout;
    loop {
      let status = self.status(stack).await?;
      let converged = status
        .services
        .iter()
        .all(|s| s.current_replicas == s.desired_replicas);
      if converged {
        return Ok(());
      }
      if tokio::time::Instant::now() >= deadline {
        return Err(DeployerError::ConvergenceTimeout(self.convergence_timeout));
      }
      log_unready(&stack.name);
      tokio::time::sleep(Duration::from_secs(2)).await;
    }
  }
}

fn build_service_spec(
  stack: &Stack,
  service: &ServiceConfig,
  full_name: &str,
) -> BollardServiceSpec {
  let cpu_nano = parse_cpu(&service.cpu_limit)
    .map(cpu_to_nano)
    .unwrap_or(0);
  let memory_bytes = parse_memory(&service.memory_limit).unwrap_or(0) as i64;

  let mut labels = HashMap::new();
  labels.insert(STACK_NAMESPACE_LABEL.to_string(), stack.name.clone());

  let env: Vec<String> =
    service.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

  let ports = if service.ports.is_empty() {
    None
  } else {
    Some(
      service
        .ports
        .iter()
        .map(|port| EndpointPortConfig {
          protocol: Some(EndpointPortConfigProtocolEnum::TCP),
          target_port: Some(*port as i64),
          published_port: Some(*port as i64),
          publish_mode: Some(EndpointPortConfigPublishModeEnum::INGRESS),
          name: None,
        })
        .collect(),
    )
  };

  BollardServiceSpec {
    name: Some(full_name.to_string()),
    labels: Some(labels),
    task_template: Some(TaskSpec {
      container_spec: Some(TaskSpecContainerSpec {
        image: Some(service.image.clone()),
        env: Some(env),
        command: service.command.clone(),
        ..Default::default()
      }),
      restart_policy: Some(SwarmRestartPolicy {
        condition: Some(restart_condition(&service.restart_policy.condition)),
        max_attempts: Some(service.restart_policy.max_attempts as i64),
        ..Default::default()
      }),
      resources: Some(bollard::secret::ResourceRequirements {
        limits: Some(bollard::secret::Limit {
          nano_cpus: Some(cpu_nano),
          memory_bytes: Some(memory_bytes),
          ..Default::default()
        }),
        ..Default::default()
      }),
      networks: Some(vec![NetworkAttachmentConfig {
        target: Some(stack.name.clone()),
        ..Default::default()
      }]),
      ..Default::default()
    }),
    mode: Some(ServiceSpecMode {
      replicated: Some(ServiceModeReplicated {
        replicas: Some(service.replicas as i64),
      }),
      ..Default::default()
    }),
    endpoint_spec: ports.map(|ports| ServiceSpecEndpointSpec {
      mode: None,
      ports: Some(ports),
    }),
    ..Default::default()
  }
}

fn restart_condition(condition: &str) -> SwarmRestartPolicyCondition {
  match condition {
    "none" => SwarmRestartPolicyCondition::NONE,
    "any" => SwarmRestartPolicyCondition::ANY,
    _ => SwarmRestartPolicyCondition::ON_FAILURE,
  }
}

fn log_unready(stack: &str) {
  warn!("swarm stack {stack} not yet converged");
}

#[cfg(test)]
mod test {
  use super::*;
  use deployer_types::{RestartPolicy, ServiceConfig};

  #[test]
  fn builds_service_spec_with_stack_namespace_label() {
    let stack = Stack::new("proj", "production");
    let service = ServiceConfig {
      name: "app".to_string(),
      image: "nginx:latest".to_string(),
      command: None,
      env: Default::default(),
      cpu_limit: "1.5".to_string(),
      memory_limit: "512m".to_string(),
      replicas: 2,
      ports: vec![80],
      restart_policy: RestartPolicy::default(),
      health_check_path: None,
      expected_status_codes: Vec::new(),
      required_substring: None,
    };
    let spec = build_service_spec(&stack, &service, "proj-production_app");
    assert_eq!(spec.name.as_deref(), Some("proj-production_app"));
    assert_eq!(
      spec.labels.unwrap().get(STACK_NAMESPACE_LABEL),
      Some(&stack.name)
    );
    let task = spec.task_template.unwrap();
    assert_eq!(
      task.resources.unwrap().limits.unwrap().nano_cpus,
      Some(1_500_000_000)
    );
  }
}
