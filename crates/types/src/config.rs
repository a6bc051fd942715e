use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdioLogMode {
  #[default]
  Standard,
  Json,
  None,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  Error,
  Warn,
  #[default]
  Info,
  Debug,
  Trace,
}

impl From<LogLevel> for tracing::Level {
  fn from(value: LogLevel) -> Self {
    match value {
      LogLevel::Error => tracing::Level::ERROR,
      LogLevel::Warn => tracing::Level::WARN,
      LogLevel::Info => tracing::Level::INFO,
      LogLevel::Debug => tracing::Level::DEBUG,
      LogLevel::Trace => tracing::Level::TRACE,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
  pub level: LogLevel,
  pub stdio: StdioLogMode,
  pub pretty: bool,
  pub otlp_endpoint: String,
  pub otel_service_name: String,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: LogLevel::Info,
      stdio: StdioLogMode::Standard,
      pretty: false,
      otlp_endpoint: String::new(),
      otel_service_name: "deployer-core".to_string(),
    }
  }
}

/// Top-level process configuration, loaded once at startup via
/// `dotenvy` + `envy` and exposed through `core_config()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployerConfig {
  /// Root directory the Source Materializer extracts/clones into.
  pub workspace_dir: String,
  /// Root directory static bundles are copied into.
  pub static_root: String,
  /// Root directory TLS material is read from / written to.
  pub cert_dir: String,
  /// Suffix appended to generated subdomains.
  pub traefik_domain: String,
  /// Path to the Traefik dynamic configuration file we render.
  pub traefik_dynamic_config_path: String,
  /// Docker daemon socket path / URI (unix:// or tcp://).
  pub docker_host: String,
  /// MongoDB connection string backing the Job Store / Stack Store.
  pub database_uri: String,
  pub database_name: String,
  /// Number of parallel queue workers.
  pub queue_worker_count: usize,
  /// Per-kind concurrency ceiling for `deploy` jobs.
  pub deploy_concurrency_limit: usize,
  pub convergence_timeout_secs: u64,
  pub startup_deadline_secs: u64,
  pub probe_timeout_secs: u64,
  pub health_sweep_interval_secs: u64,
  pub metrics_interval_secs: u64,
  pub alert_cooldown_secs: i64,
  /// Safe-extract policy size cap (spec §4.2): max raw archive bytes
  /// read from an upload/S3 object, and max cumulative decompressed
  /// bytes unpacked from it.
  pub max_source_archive_bytes: u64,
  pub log: LogConfig,
}

impl Default for DeployerConfig {
  fn default() -> Self {
    Self {
      workspace_dir: "/tmp/deployer-workspace".to_string(),
      static_root: "/app/static".to_string(),
      cert_dir: "/certificates".to_string(),
      traefik_domain: "example.test".to_string(),
      traefik_dynamic_config_path:
        "/etc/traefik/dynamic/deployer.yml".to_string(),
      docker_host: "unix:///var/run/docker.sock".to_string(),
      database_uri: "mongodb://localhost:27017".to_string(),
      database_name: "deployer".to_string(),
      queue_worker_count: 4,
      deploy_concurrency_limit: 2,
      convergence_timeout_secs: 300,
      startup_deadline_secs: 60,
      probe_timeout_secs: 10,
      health_sweep_interval_secs: 30,
      metrics_interval_secs: 120,
      alert_cooldown_secs: 300,
      max_source_archive_bytes: 512 * 1024 * 1024,
      log: LogConfig::default(),
    }
  }
}
