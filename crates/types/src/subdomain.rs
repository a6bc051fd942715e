use validations::to_docker_compatible_name;

/// Inputs that influence subdomain generation, per spec §6.
#[derive(Debug, Default, Clone)]
pub struct SubdomainContext<'a> {
  pub production: bool,
  pub custom_name: Option<&'a str>,
  pub pr_number: Option<u64>,
  pub branch: Option<&'a str>,
  pub environment: &'a str,
}

/// Builds `<service>-<project>` style subdomains, sanitizing each
/// segment. Priority order (spec §6):
/// production -> custom_name -> pr -> branch -> else `<service>-<env>-<project>`.
pub fn generate_subdomain(
  service: &str,
  project: &str,
  ctx: &SubdomainContext,
) -> String {
  let service = to_docker_compatible_name(service);
  let project = to_docker_compatible_name(project);

  let stem = if ctx.production {
    format!("{service}-{project}")
  } else if let Some(custom) = ctx.custom_name {
    let custom = to_docker_compatible_name(custom);
    format!("{custom}-{service}-{project}")
  } else if let Some(pr) = ctx.pr_number {
    format!("pr-{pr}-{service}-{project}")
  } else if let Some(branch) = ctx.branch {
    let branch = to_docker_compatible_name(branch);
    format!("{branch}-{service}-{project}")
  } else {
    let environment = to_docker_compatible_name(ctx.environment);
    format!("{service}-{environment}-{project}")
  };

  to_docker_compatible_name(&stem)
}

/// Stack naming: `<project>-<environment>` unless a per-service stack is
/// requested, in which case `<project>-<service>` (spec §3 "Stack").
pub fn stack_name(project: &str, environment_or_service: &str) -> String {
  format!(
    "{}-{}",
    to_docker_compatible_name(project),
    to_docker_compatible_name(environment_or_service)
  )
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn production_drops_environment() {
    let ctx = SubdomainContext {
      production: true,
      environment: "production",
      ..Default::default()
    };
    assert_eq!(generate_subdomain("app", "proj", &ctx), "app-proj");
  }

  #[test]
  fn pr_takes_priority_over_branch() {
    let ctx = SubdomainContext {
      pr_number: Some(42),
      branch: Some("feature-x"),
      environment: "preview",
      ..Default::default()
    };
    assert_eq!(generate_subdomain("app", "proj", &ctx), "pr-42-app-proj");
  }

  #[test]
  fn default_includes_environment() {
    let ctx = SubdomainContext {
      environment: "staging",
      ..Default::default()
    };
    assert_eq!(generate_subdomain("app", "proj", &ctx), "app-staging-proj");
  }
}
