use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::Display;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StackStatus {
  Creating,
  Running,
  Updating,
  Paused,
  Removing,
  Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceQuotas {
  /// CPU cores.
  pub cpu: f64,
  /// Bytes.
  pub memory: u64,
  pub max_services: u32,
  pub max_replicas: u32,
}

impl Default for ResourceQuotas {
  fn default() -> Self {
    Self {
      cpu: 2.0,
      memory: 4 * 1024 * 1024 * 1024,
      max_services: 10,
      max_replicas: 10,
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
  pub cpu: f64,
  pub memory: u64,
  pub services: u32,
  pub replicas: u32,
}

impl ResourceUsage {
  pub fn plus(&self, other: &ResourceUsage) -> ResourceUsage {
    ResourceUsage {
      cpu: self.cpu + other.cpu,
      memory: self.memory + other.memory,
      services: self.services + other.services,
      replicas: self.replicas + other.replicas,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainMapping {
  pub service_name: String,
  pub domain: String,
  pub port: u16,
  #[serde(default = "default_cert_resolver")]
  pub cert_resolver: String,
}

fn default_cert_resolver() -> String {
  "letsencrypt".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartPolicy {
  pub condition: String,
  pub max_attempts: u32,
}

impl Default for RestartPolicy {
  fn default() -> Self {
    Self {
      condition: "on-failure".to_string(),
      max_attempts: 3,
    }
  }
}

/// Desired state for a single service within a stack's compose config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
  pub name: String,
  pub image: String,
  #[serde(default)]
  pub command: Option<Vec<String>>,
  #[serde(default)]
  pub env: HashMap<String, String>,
  /// CPU in cores, e.g. "1.5".
  pub cpu_limit: String,
  /// Memory as e.g. "512m", "2g".
  pub memory_limit: String,
  pub replicas: u32,
  /// Published ports, 1:1 host:container.
  #[serde(default)]
  pub ports: Vec<u16>,
  #[serde(default)]
  pub restart_policy: RestartPolicy,
  /// Path the Health Monitor probes, relative to the service's
  /// endpoint URL (spec §4.9). Defaults to `/`.
  #[serde(default)]
  pub health_check_path: Option<String>,
  /// Status codes the Health Monitor accepts as healthy. Empty means
  /// the default `{200, 204}` (spec §4.9).
  #[serde(default)]
  pub expected_status_codes: Vec<u16>,
  /// Optional substring the probe response body must contain.
  #[serde(default)]
  pub required_substring: Option<String>,
}

impl ServiceConfig {
  pub fn health_check_path(&self) -> &str {
    self.health_check_path.as_deref().unwrap_or("/")
  }

  pub fn expected_status_codes(&self) -> &[u16] {
    if self.expected_status_codes.is_empty() {
      &[200, 204]
    } else {
      &self.expected_status_codes
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComposeConfig {
  pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stack {
  pub id: String,
  pub name: String,
  pub project_id: String,
  pub environment: String,
  pub compose_config: ComposeConfig,
  pub resource_quotas: ResourceQuotas,
  pub domain_mappings: Vec<DomainMapping>,
  pub status: StackStatus,
  pub last_deployed_at: Option<i64>,
  pub last_health_check: Option<i64>,
  pub error_message: Option<String>,
  pub resource_usage: ResourceUsage,
  /// Stack-level health rollup written by the Health Monitor's sweep
  /// (spec §4.9), alongside `last_health_check`.
  pub health_rollup: Option<crate::StackHealthRollup>,
}

impl Stack {
  pub fn new(
    project_id: impl Into<String>,
    environment: impl Into<String>,
  ) -> Self {
    let project_id = project_id.into();
    let environment = environment.into();
    Self {
      id: crate::new_id(),
      name: crate::stack_name(&project_id, &environment),
      project_id,
      environment,
      compose_config: ComposeConfig::default(),
      resource_quotas: ResourceQuotas::default(),
      domain_mappings: Vec::new(),
      status: StackStatus::Creating,
      last_deployed_at: None,
      last_health_check: None,
      error_message: None,
      resource_usage: ResourceUsage::default(),
      health_rollup: None,
    }
  }

  /// Sums requested resources across every service in the desired
  /// compose config, used by the Resource Guard.
  pub fn requested_usage(&self) -> ResourceUsage {
    let mut usage = ResourceUsage {
      services: self.compose_config.services.len() as u32,
      ..Default::default()
    };
    for service in &self.compose_config.services {
      usage.cpu += parse_cpu(&service.cpu_limit).unwrap_or(0.0);
      usage.memory += parse_memory(&service.memory_limit).unwrap_or(0);
      usage.replicas += service.replicas;
    }
    usage
  }
}

/// Parses CPU strings like `"1.5"` into cores. Spec §4.4: `"1.5" -> 1.5`.
pub fn parse_cpu(input: &str) -> Option<f64> {
  input.trim().parse::<f64>().ok()
}

/// Converts a CPU core count to nano-CPUs, as the Swarm API expects.
pub fn cpu_to_nano(cores: f64) -> i64 {
  (cores * 1_000_000_000.0).round() as i64
}

/// Parses memory strings with the unit suffixes from spec §4.4:
/// k/kb/m/mb/g/gb/t/tb (decimal) and Ki/Mi/Gi (binary).
pub fn parse_memory(input: &str) -> Option<u64> {
  let input = input.trim();
  if input.is_empty() {
    return None;
  }
  let lower = input.to_lowercase();
  let split_at = lower.find(|c: char| !c.is_ascii_digit() && c != '.')?;
  let (number, unit) = if split_at == 0 {
    (input, "")
  } else {
    (&input[..split_at], &lower[split_at..])
  };
  let value: f64 = number.parse().ok()?;
  let multiplier: f64 = match unit {
    "" | "b" => 1.0,
    "k" | "kb" => 1_000.0,
    "m" | "mb" => 1_000_000.0,
    "g" | "gb" => 1_000_000_000.0,
    "t" | "tb" => 1_000_000_000_000.0,
    "ki" => 1024.0,
    "mi" => 1024.0 * 1024.0,
    "gi" => 1024.0 * 1024.0 * 1024.0,
    "ti" => 1024.0f64.powi(4),
    _ => return None,
  };
  Some((value * multiplier).round() as u64)
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn parses_decimal_memory_units() {
    assert_eq!(parse_memory("512m"), Some(512_000_000));
    assert_eq!(parse_memory("2g"), Some(2_000_000_000));
  }

  #[test]
  fn parses_binary_memory_units() {
    assert_eq!(parse_memory("512Mi"), Some(512 * 1024 * 1024));
    assert_eq!(parse_memory("1Gi"), Some(1024 * 1024 * 1024));
  }

  #[test]
  fn parses_bare_bytes() {
    assert_eq!(parse_memory("1024"), Some(1024));
  }

  #[test]
  fn cpu_parses_fractional_cores() {
    assert_eq!(parse_cpu("1.5"), Some(1.5));
    assert_eq!(cpu_to_nano(1.5), 1_500_000_000);
  }
}
