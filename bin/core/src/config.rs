use std::sync::OnceLock;

use anyhow::Context;
use deployer_types::config::DeployerConfig;

/// Loads configuration once from `.env` + process environment and
/// exposes it through a global accessor, in the teacher's
/// `core_config()` convention.
pub fn core_config() -> &'static DeployerConfig {
  static CONFIG: OnceLock<DeployerConfig> = OnceLock::new();
  CONFIG.get_or_init(|| {
    load_config().expect("failed to load deployer configuration")
  })
}

fn load_config() -> anyhow::Result<DeployerConfig> {
  // Missing .env is fine; env vars and defaults still apply.
  let _ = dotenvy::dotenv();

  let defaults = DeployerConfig::default();
  let overrides: DeployerConfig = envy::prefixed("DEPLOYER_")
    .from_env()
    .unwrap_or(defaults);

  Ok(overrides)
}
