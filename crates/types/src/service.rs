use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Minimal read-only projection of a service, the slice the Resource
/// Guard, Builder and Orchestrator need to act. Full CRUD over
/// projects/services is an external collaborator (spec §1); this
/// record only carries what deployment orchestration reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
  pub id: String,
  pub project_id: String,
  pub name: String,
  pub environment: crate::Environment,
  pub build: crate::BuildConfig,
  pub port: u16,
  #[serde(default)]
  pub domains: Vec<String>,
  /// CPU in cores, e.g. "1.5".
  pub cpu_limit: String,
  /// Memory as e.g. "512m", "2g".
  pub memory_limit: String,
  pub replicas: u32,
  #[serde(default)]
  pub env: HashMap<String, String>,
  #[serde(default)]
  pub health_check_path: Option<String>,
  #[serde(default)]
  pub expected_status_codes: Vec<u16>,
}

impl ServiceRecord {
  /// Projects this record into a desired `ServiceConfig` for the stack's
  /// compose config, given the build artifact produced for it.
  pub fn to_service_config(
    &self,
    image_or_placeholder: &str,
  ) -> crate::ServiceConfig {
    crate::ServiceConfig {
      name: self.name.clone(),
      image: image_or_placeholder.to_string(),
      command: None,
      env: self.env.clone(),
      cpu_limit: self.cpu_limit.clone(),
      memory_limit: self.memory_limit.clone(),
      replicas: self.replicas,
      ports: vec![self.port],
      restart_policy: crate::RestartPolicy::default(),
      health_check_path: self.health_check_path.clone(),
      expected_status_codes: self.expected_status_codes.clone(),
      required_substring: None,
    }
  }

  pub fn requested_usage(&self) -> crate::ResourceUsage {
    crate::ResourceUsage {
      cpu: crate::parse_cpu(&self.cpu_limit).unwrap_or(0.0),
      memory: crate::parse_memory(&self.memory_limit).unwrap_or(0),
      services: 1,
      replicas: self.replicas,
    }
  }
}
