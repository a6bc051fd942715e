//! Builder (spec §4.3): turns a materialized source tree into a
//! `BuildArtifact`, using one of three strategies chosen by the
//! service's declared builder.

use std::path::Path;

use deployer_types::{ArtifactKind, BuildArtifact, BuildConfig, BuilderKind};

use crate::queue::JobContext;

const NODE_DOCKERFILE: &str = "FROM node:18-alpine\n\
WORKDIR /app\n\
COPY . .\n\
RUN [ -f package-lock.json ] && npm ci || npm install\n\
RUN npm run build --if-present\n\
CMD [\"npm\", \"start\"]\n";

pub async fn build(
  ctx: &JobContext,
  source_path: &Path,
  project_id: &str,
  service_id: &str,
  deployment_id: &str,
  static_root: &Path,
  config: &BuildConfig,
) -> anyhow::Result<BuildArtifact> {
  ctx.progress(10).await;
  match config.builder {
    BuilderKind::Static => build_static(source_path, project_id, service_id, static_root).await,
    BuilderKind::Dockerfile => {
      build_dockerfile(ctx, source_path, deployment_id, config).await
    }
    BuilderKind::Node => build_node(ctx, source_path, deployment_id, config).await,
  }
}

async fn build_static(
  source_path: &Path,
  project_id: &str,
  service_id: &str,
  static_root: &Path,
) -> anyhow::Result<BuildArtifact> {
  let dest = static_root.join(project_id).join(service_id);
  if dest.exists() {
    tokio::fs::remove_dir_all(&dest).await?;
  }
  tokio::fs::create_dir_all(&dest).await?;
  copy_tree(source_path, &dest).await?;
  Ok(BuildArtifact {
    kind: ArtifactKind::Static,
    reference: dest.to_string_lossy().to_string(),
  })
}

fn copy_tree<'a>(
  src: &'a Path,
  dst: &'a Path,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send + 'a>> {
  Box::pin(async move {
    let mut entries = tokio::fs::read_dir(src).await?;
    while let Some(entry) = entries.next_entry().await? {
      let file_type = entry.file_type().await?;
      let target = dst.join(entry.file_name());
      if file_type.is_dir() {
        tokio::fs::create_dir_all(&target).await?;
        copy_tree(&entry.path(), &target).await?;
      } else if file_type.is_file() {
        tokio::fs::copy(entry.path(), &target).await?;
      }
    }
    Ok(())
  })
}

async fn build_dockerfile(
  ctx: &JobContext,
  source_path: &Path,
  deployment_id: &str,
  config: &BuildConfig,
) -> anyhow::Result<BuildArtifact> {
  let dockerfile_path =
    config.dockerfile_path.clone().unwrap_or_else(|| "./Dockerfile".to_string());
  run_docker_build(ctx, source_path, deployment_id, &dockerfile_path, &config.build_args)
    .await
}

async fn build_node(
  ctx: &JobContext,
  source_path: &Path,
  deployment_id: &str,
  config: &BuildConfig,
) -> anyhow::Result<BuildArtifact> {
  let dockerfile_path = source_path.join("Dockerfile");
  if !dockerfile_path.exists() {
    let mut contents = NODE_DOCKERFILE.to_string();
    if let Some(start) = &config.start_command {
      contents = contents.replace(
        "CMD [\"npm\", \"start\"]",
        &format!("CMD [\"sh\", \"-c\", \"{start}\"]"),
      );
    }
    tokio::fs::write(&dockerfile_path, contents).await?;
  }
  run_docker_build(ctx, source_path, deployment_id, "./Dockerfile", &config.build_args)
    .await
}

async fn run_docker_build(
  ctx: &JobContext,
  source_path: &Path,
  deployment_id: &str,
  dockerfile_path: &str,
  build_args: &std::collections::HashMap<String, String>,
) -> anyhow::Result<BuildArtifact> {
  let tag = format!("deployment-{deployment_id}:latest");
  let mut command = format!(
    "docker build -f {dockerfile_path} -t {tag}"
  );
  for (key, value) in build_args {
    command.push_str(&format!(" --build-arg {key}={value}"));
  }
  command.push_str(" .");

  ctx.progress(30).await;
  let output = command::run_standard_command(&command, Some(source_path)).await;
  ctx.progress(60).await;

  if !output.success() {
    let tail: String = output
      .stderr
      .lines()
      .rev()
      .take(40)
      .collect::<Vec<_>>()
      .into_iter()
      .rev()
      .collect::<Vec<_>>()
      .join("\n");
    anyhow::bail!("build failed: {tail}");
  }

  Ok(BuildArtifact { kind: ArtifactKind::Image, reference: tag })
}

#[cfg(test)]
mod test {
  use super::*;

  #[tokio::test]
  async fn static_builder_copies_tree() {
    let src = std::env::temp_dir().join(format!("deployer-build-src-{}", deployer_types::new_id()));
    let root = std::env::temp_dir().join(format!("deployer-build-root-{}", deployer_types::new_id()));
    tokio::fs::create_dir_all(&src).await.unwrap();
    tokio::fs::write(src.join("index.html"), "hi").await.unwrap();

    let artifact = build_static(&src, "proj", "svc", &root).await.unwrap();
    assert_eq!(artifact.kind, ArtifactKind::Static);
    let copied = root.join("proj").join("svc").join("index.html");
    assert_eq!(tokio::fs::read_to_string(copied).await.unwrap(), "hi");

    let _ = tokio::fs::remove_dir_all(&src).await;
    let _ = tokio::fs::remove_dir_all(&root).await;
  }
}
