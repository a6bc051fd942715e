//! Resource Guard (spec §4.7): validates a stack's requested resources
//! against per-project quotas before the Orchestrator converges it.

use deployer_types::{ResourceQuotas, ResourceUsage};

#[derive(Debug, Clone, Default)]
pub struct QuotaCheck {
  pub allowed: bool,
  pub violations: Vec<String>,
}

/// Sums `current` usage (summed across a project/environment's live
/// stacks) with the `requested` delta and compares against `quotas`.
/// Any single violation implies `allowed = false`.
pub fn check(
  current: &ResourceUsage,
  requested: &ResourceUsage,
  quotas: &ResourceQuotas,
) -> QuotaCheck {
  let projected = current.plus(requested);
  let mut violations = Vec::new();

  if projected.cpu > quotas.cpu {
    violations.push(format!(
      "requested CPU {:.2} cores exceeds quota of {:.2} cores",
      projected.cpu, quotas.cpu
    ));
  }
  if projected.memory > quotas.memory {
    violations.push(format!(
      "requested memory {} bytes exceeds quota of {} bytes",
      projected.memory, quotas.memory
    ));
  }
  if projected.services > quotas.max_services {
    violations.push(format!(
      "requested service count {} exceeds quota of {}",
      projected.services, quotas.max_services
    ));
  }
  if projected.replicas > quotas.max_replicas {
    violations.push(format!(
      "requested replica count {} exceeds quota of {}",
      projected.replicas, quotas.max_replicas
    ));
  }

  QuotaCheck { allowed: violations.is_empty(), violations }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn allows_within_quota() {
    let current = ResourceUsage::default();
    let requested = ResourceUsage { cpu: 1.0, memory: 1_000_000, services: 1, replicas: 1 };
    let quotas = ResourceQuotas::default();
    let result = check(&current, &requested, &quotas);
    assert!(result.allowed);
    assert!(result.violations.is_empty());
  }

  #[test]
  fn denies_when_cpu_exceeds_quota() {
    let current = ResourceUsage { cpu: 1.5, ..Default::default() };
    let requested = ResourceUsage { cpu: 1.0, ..Default::default() };
    let quotas = ResourceQuotas { cpu: 2.0, ..Default::default() };
    let result = check(&current, &requested, &quotas);
    assert!(!result.allowed);
    assert_eq!(result.violations.len(), 1);
  }
}
