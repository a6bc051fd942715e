//! Traefik Renderer (spec §4.5): a pure function of a stack's desired
//! domain mappings into a Traefik dynamic configuration file, written
//! atomically (write-temp, rename) to the shared volume Traefik reads
//! from.

use std::{collections::BTreeMap, path::Path};

use deployer_types::{DomainMapping, ServiceConfig, Stack};
use serde::Serialize;
use validations::to_docker_compatible_name;

#[derive(Debug, Serialize, Default)]
struct DynamicConfig {
  http: HttpConfig,
}

#[derive(Debug, Serialize, Default)]
struct HttpConfig {
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  routers: BTreeMap<String, Router>,
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  services: BTreeMap<String, TraefikService>,
}

#[derive(Debug, Serialize)]
struct Router {
  rule: String,
  entrypoints: Vec<String>,
  service: String,
  tls: RouterTls,
}

#[derive(Debug, Serialize)]
struct RouterTls {
  #[serde(rename = "certResolver")]
  cert_resolver: String,
}

#[derive(Debug, Serialize)]
struct TraefikService {
  #[serde(rename = "loadBalancer", skip_serializing_if = "Option::is_none")]
  load_balancer: Option<LoadBalancer>,
}

#[derive(Debug, Serialize)]
struct LoadBalancer {
  servers: Vec<LoadBalancerServer>,
}

#[derive(Debug, Serialize)]
struct LoadBalancerServer {
  url: String,
}

/// Renders the dynamic configuration fragment for one stack. Container
/// services route through the internal Docker DNS name; static sites
/// with no container route through a `file://` server path that the
/// static file server answers on (the file-provider fragment).
pub fn render(stack: &Stack, static_root: &Path) -> String {
  let mut config = DynamicConfig::default();

  for mapping in &stack.domain_mappings {
    let router_name = to_docker_compatible_name(&mapping.domain);
    config.http.routers.insert(
      router_name.clone(),
      Router {
        rule: format!("Host(`{}`)", mapping.domain),
        entrypoints: vec!["websecure".to_string()],
        service: router_name.clone(),
        tls: RouterTls { cert_resolver: mapping.cert_resolver.clone() },
      },
    );

    let server_url = match find_service(stack, &mapping.service_name) {
      Some(_) => format!(
        "http://{}_{}:{}",
        stack.name, mapping.service_name, mapping.port
      ),
      None => format!(
        "file://{}",
        static_root
          .join(&stack.project_id)
          .join(&mapping.service_name)
          .display()
      ),
    };

    config.http.services.insert(
      router_name,
      TraefikService {
        load_balancer: Some(LoadBalancer {
          servers: vec![LoadBalancerServer { url: server_url }],
        }),
      },
    );
  }

  serde_yaml_ng::to_string(&config).unwrap_or_default()
}

fn find_service<'a>(
  stack: &'a Stack,
  name: &str,
) -> Option<&'a ServiceConfig> {
  stack.compose_config.services.iter().find(|s| s.name == name)
}

/// Canonical label set for a container service with domains attached,
/// applied to the Swarm service spec alongside the shared dynamic
/// config file (§6 "External Interfaces").
pub fn labels_for_service(
  stack_name: &str,
  mapping: &DomainMapping,
) -> BTreeMap<String, String> {
  let router_name = to_docker_compatible_name(&mapping.domain);
  let mut labels = BTreeMap::new();
  labels.insert("traefik.enable".to_string(), "true".to_string());
  labels.insert(
    format!("traefik.http.routers.{router_name}.rule"),
    format!("Host(`{}`)", mapping.domain),
  );
  labels.insert(
    format!("traefik.http.routers.{router_name}.entrypoints"),
    "websecure".to_string(),
  );
  labels.insert(
    format!("traefik.http.routers.{router_name}.tls.certresolver"),
    mapping.cert_resolver.clone(),
  );
  labels.insert(
    format!(
      "traefik.http.services.{router_name}.loadbalancer.server.port"
    ),
    mapping.port.to_string(),
  );
  labels.insert("com.docker.stack.namespace".to_string(), stack_name.to_string());
  labels
}

/// Writes the rendered configuration atomically: write to a sibling
/// temp file, then rename over the target, so Traefik's file watcher
/// never observes a partial write.
pub async fn write_dynamic_config(
  path: &Path,
  contents: &str,
) -> anyhow::Result<()> {
  let parent = path.parent().unwrap_or(path);
  tokio::fs::create_dir_all(parent).await?;
  let tmp_path = parent.join(format!(
    ".{}.tmp",
    path.file_name().and_then(|n| n.to_str()).unwrap_or("deployer")
  ));
  tokio::fs::write(&tmp_path, contents).await?;
  tokio::fs::rename(&tmp_path, path).await?;
  Ok(())
}

/// Re-renders and returns the updated config; the caller is responsible
/// for writing the file and enqueuing a convergence job afterward
/// (spec §4.5 `updateDomainMappings`).
pub fn update_domain_mappings(
  stack: &mut Stack,
  mappings: Vec<DomainMapping>,
  static_root: &Path,
) -> String {
  stack.domain_mappings = mappings;
  render(stack, static_root)
}

#[cfg(test)]
mod test {
  use super::*;
  use deployer_types::RestartPolicy;

  #[test]
  fn render_is_deterministic_for_identical_inputs() {
    let mut stack = Stack::new("proj", "production");
    stack.compose_config.services.push(ServiceConfig {
      name: "app".to_string(),
      image: "nginx".to_string(),
      command: None,
      env: Default::default(),
      cpu_limit: "1".to_string(),
      memory_limit: "256m".to_string(),
      replicas: 1,
      ports: vec![80],
      restart_policy: RestartPolicy::default(),
      health_check_path: None,
      expected_status_codes: Vec::new(),
      required_substring: None,
    });
    stack.domain_mappings.push(DomainMapping {
      service_name: "app".to_string(),
      domain: "app.example.test".to_string(),
      port: 80,
      cert_resolver: "letsencrypt".to_string(),
    });

    let static_root = Path::new("/app/static");
    let first = render(&stack, static_root);
    let second = render(&stack, static_root);
    assert_eq!(first, second);
    assert!(first.contains("app.example.test"));
  }

  #[test]
  fn static_service_routes_to_file_path() {
    let mut stack = Stack::new("proj", "production");
    stack.domain_mappings.push(DomainMapping {
      service_name: "site".to_string(),
      domain: "site.example.test".to_string(),
      port: 80,
      cert_resolver: "letsencrypt".to_string(),
    });
    let rendered = render(&stack, Path::new("/app/static"));
    assert!(rendered.contains("file:///app/static/proj/site"));
  }

  #[test]
  fn removing_a_domain_drops_its_router() {
    let mut stack = Stack::new("proj", "production");
    stack.domain_mappings.push(DomainMapping {
      service_name: "app".to_string(),
      domain: "app.example.test".to_string(),
      port: 80,
      cert_resolver: "letsencrypt".to_string(),
    });
    let with_domain = render(&stack, Path::new("/app/static"));
    assert!(with_domain.contains("app-example-test"));

    stack.domain_mappings.clear();
    let without_domain = render(&stack, Path::new("/app/static"));
    assert!(!without_domain.contains("app-example-test"));
  }
}
