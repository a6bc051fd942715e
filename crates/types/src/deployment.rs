use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{Display, EnumString};

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Environment {
  Production,
  Staging,
  Preview,
  Development,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeploymentStatus {
  Queued,
  Building,
  Deploying,
  Success,
  Failed,
  Cancelled,
}

/// Fine-grained progress tag within `DeploymentStatus`, exposed to the UI.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeploymentPhase {
  Queued,
  PullingSource,
  Building,
  CopyingFiles,
  Deploying,
  Active,
  Failed,
  Cancelled,
}

impl DeploymentPhase {
  /// True for the two terminal phases that are allowed to jump the
  /// otherwise-monotonic ordering (spec §8 "Progress monotonicity").
  pub fn is_terminal_jump(self) -> bool {
    matches!(self, DeploymentPhase::Failed | DeploymentPhase::Cancelled)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceSpec {
  Git {
    url: String,
    branch: String,
    commit: Option<String>,
    access_token: Option<String>,
  },
  Upload {
    file_path: String,
  },
  S3 {
    bucket: String,
    key: String,
    region: String,
    access_key: String,
    secret_key: String,
  },
  Embedded {
    content: HashMap<String, String>,
  },
  Registry {
    image: String,
    tag: String,
    pull_policy: PullPolicy,
    registry_auth: Option<RegistryAuth>,
  },
}

impl SourceSpec {
  pub fn kind(&self) -> &'static str {
    match self {
      SourceSpec::Git { .. } => "git",
      SourceSpec::Upload { .. } => "upload",
      SourceSpec::S3 { .. } => "s3",
      SourceSpec::Embedded { .. } => "embedded",
      SourceSpec::Registry { .. } => "registry",
    }
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PullPolicy {
  Always,
  IfNotPresent,
  Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryAuth {
  pub username: String,
  pub password: String,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BuilderKind {
  Static,
  Dockerfile,
  Node,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
  pub builder: BuilderKind,
  #[serde(default)]
  pub dockerfile_path: Option<String>,
  #[serde(default)]
  pub build_args: HashMap<String, String>,
  #[serde(default)]
  pub start_command: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
  Image,
  Static,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildArtifact {
  pub kind: ArtifactKind,
  /// Image tag for `Image`, absolute static path for `Static`.
  pub reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentOutput {
  pub container_id: Option<String>,
  pub image_tag: Option<String>,
  pub domain_url: Option<String>,
  pub commit: Option<String>,
  pub branch: Option<String>,
  pub deployment_type: Option<String>,
}

impl Default for DeploymentOutput {
  fn default() -> Self {
    Self {
      container_id: None,
      image_tag: None,
      domain_url: None,
      commit: None,
      branch: None,
      deployment_type: None,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
  pub id: String,
  pub service_id: String,
  pub project_id: String,
  pub environment: Environment,
  pub status: DeploymentStatus,
  pub phase: DeploymentPhase,
  pub progress: u8,
  pub source_spec: SourceSpec,
  pub triggered_by: String,
  pub created_at: i64,
  pub build_start_at: Option<i64>,
  pub deploy_complete_at: Option<i64>,
  pub output: DeploymentOutput,
  pub error: Option<String>,
  pub logs: Vec<crate::LogLine>,
}

impl Deployment {
  pub fn new(
    service_id: impl Into<String>,
    project_id: impl Into<String>,
    environment: Environment,
    source_spec: SourceSpec,
    triggered_by: impl Into<String>,
  ) -> Self {
    Self {
      id: crate::new_id(),
      service_id: service_id.into(),
      project_id: project_id.into(),
      environment,
      status: DeploymentStatus::Queued,
      phase: DeploymentPhase::Queued,
      progress: 0,
      source_spec,
      triggered_by: triggered_by.into(),
      created_at: crate::now_ms(),
      build_start_at: None,
      deploy_complete_at: None,
      output: DeploymentOutput::default(),
      error: None,
      logs: Vec::new(),
    }
  }

  /// Advances phase/progress together, enforcing the monotonic ordering
  /// invariant unless the target is one of the terminal jump phases.
  pub fn advance(&mut self, phase: DeploymentPhase, progress: u8) {
    debug_assert!(
      phase.is_terminal_jump() || phase >= self.phase,
      "deployment phase must be monotonic: {:?} -> {:?}",
      self.phase,
      phase
    );
    self.phase = phase;
    self.progress = progress;
  }

  pub fn push_log(&mut self, log: crate::LogLine) {
    self.logs.push(log);
  }
}
