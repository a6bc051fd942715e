//! Source Materializer (spec §4.2): turns a `SourceSpec` into a local
//! working directory for the Builder.

use std::path::{Path, PathBuf};

use deployer_types::SourceSpec;
use tracing::info;
use validations::{check_size_cap, is_safe_archive_entry};

/// Result of materializing a source. `registry` sources never produce a
/// path; the Orchestrator skips the Build phase when this is `None`.
pub struct Materialized {
  pub path: Option<PathBuf>,
}

pub async fn materialize(
  workspace_dir: &Path,
  deployment_id: &str,
  spec: &SourceSpec,
  max_archive_bytes: u64,
) -> anyhow::Result<Materialized> {
  let target = workspace_dir.join(deployment_id);
  let result = match spec {
    SourceSpec::Git { url, branch, commit, access_token } => {
      materialize_git(&target, url, branch, commit.as_deref(), access_token.as_deref())
        .await
    }
    SourceSpec::Upload { file_path } => {
      materialize_archive(&target, Path::new(file_path), max_archive_bytes).await
    }
    SourceSpec::S3 { bucket, key, region, access_key, secret_key } => {
      materialize_s3(&target, bucket, key, region, access_key, secret_key, max_archive_bytes)
        .await
    }
    SourceSpec::Embedded { content } => {
      materialize_embedded(&target, content).await
    }
    SourceSpec::Registry { .. } => return Ok(Materialized { path: None }),
  };

  match result {
    Ok(()) => Ok(Materialized { path: Some(target) }),
    Err(e) => {
      // Leave no partial tree behind on failure (spec §4.2).
      let _ = tokio::fs::remove_dir_all(&target).await;
      Err(e)
    }
  }
}

async fn materialize_git(
  target: &Path,
  url: &str,
  branch: &str,
  commit: Option<&str>,
  access_token: Option<&str>,
) -> anyhow::Result<()> {
  let clone_url = match access_token {
    // Token never appears in logs: interpolated only into the argv
    // passed directly to the child process, not into any log line.
    Some(token) => inject_credential(url, token)?,
    None => url.to_string(),
  };

  let parent = target.parent().unwrap_or(target);
  tokio::fs::create_dir_all(parent).await?;

  let output = command::run_standard_command(
    &format!(
      "git clone --depth 1 --branch {branch} {clone_url} {}",
      target.display()
    ),
    None,
  )
  .await;
  if !output.success() {
    anyhow::bail!(
      "source unavailable: git clone failed: {}",
      output.combined()
    );
  }

  if let Some(commit) = commit {
    let output = command::run_standard_command(
      &format!("git fetch --depth 1 origin {commit}"),
      Some(target),
    )
    .await;
    if !output.success() {
      anyhow::bail!(
        "source unavailable: git fetch {commit} failed: {}",
        output.combined()
      );
    }
    let output =
      command::run_standard_command(&format!("git checkout {commit}"), Some(target))
        .await;
    if !output.success() {
      anyhow::bail!(
        "source unavailable: git checkout {commit} failed: {}",
        output.combined()
      );
    }
  }

  Ok(())
}

fn inject_credential(url: &str, token: &str) -> anyhow::Result<String> {
  let Some(rest) = url.strip_prefix("https://") else {
    anyhow::bail!("unsupported source type: git token auth requires an https url");
  };
  Ok(format!("https://x-access-token:{token}@{rest}"))
}

async fn materialize_archive(
  target: &Path,
  archive_path: &Path,
  max_bytes: u64,
) -> anyhow::Result<()> {
  let metadata = tokio::fs::metadata(archive_path)
    .await
    .map_err(|e| anyhow::anyhow!("source unavailable: {e}"))?;
  check_size_cap(metadata.len(), max_bytes, "uploaded archive")?;
  let bytes = tokio::fs::read(archive_path)
    .await
    .map_err(|e| anyhow::anyhow!("source unavailable: {e}"))?;
  extract_tar_gz(target, &bytes, max_bytes)
}

fn extract_tar_gz(target: &Path, bytes: &[u8], max_decompressed_bytes: u64) -> anyhow::Result<()> {
  std::fs::create_dir_all(target)?;
  let decoder = flate2::read::GzDecoder::new(bytes);
  let mut archive = tar::Archive::new(decoder);
  let mut decompressed_bytes = 0u64;
  for entry in archive
    .entries()
    .map_err(|e| anyhow::anyhow!("invalid archive: {e}"))?
  {
    let mut entry = entry.map_err(|e| anyhow::anyhow!("invalid archive: {e}"))?;
    let path = entry.path().map_err(|e| anyhow::anyhow!("invalid archive: {e}"))?;
    let path_str = path.to_string_lossy().to_string();
    if !is_safe_archive_entry(&path_str) {
      anyhow::bail!("invalid archive: unsafe entry path {path_str}");
    }
    if entry.header().entry_type().is_symlink()
      || entry.header().entry_type().is_hard_link()
    {
      anyhow::bail!("invalid archive: links are not permitted in uploads");
    }
    decompressed_bytes = decompressed_bytes.saturating_add(entry.header().size().unwrap_or(0));
    check_size_cap(decompressed_bytes, max_decompressed_bytes, "decompressed archive contents")?;
    entry
      .unpack_in(target)
      .map_err(|e| anyhow::anyhow!("invalid archive: {e}"))?;
  }
  Ok(())
}

async fn materialize_s3(
  target: &Path,
  bucket: &str,
  key: &str,
  region: &str,
  access_key: &str,
  secret_key: &str,
  max_bytes: u64,
) -> anyhow::Result<()> {
  let operator = opendal::Operator::new(
    opendal::services::S3::default()
      .bucket(bucket)
      .region(region)
      .access_key_id(access_key)
      .secret_access_key(secret_key),
  )
  .map_err(|e| anyhow::anyhow!("source unavailable: {e}"))?
  .finish();

  if let Ok(meta) = operator.stat(key).await {
    check_size_cap(meta.content_length(), max_bytes, "S3 source object")?;
  }

  let bytes = operator
    .read(key)
    .await
    .map_err(|e| anyhow::anyhow!("source unavailable: {e}"))?
    .to_vec();
  check_size_cap(bytes.len() as u64, max_bytes, "S3 source object")?;

  extract_tar_gz(target, &bytes, max_bytes)
}

async fn materialize_embedded(
  target: &Path,
  content: &std::collections::HashMap<String, String>,
) -> anyhow::Result<()> {
  tokio::fs::create_dir_all(target).await?;
  for (name, contents) in content {
    if !is_safe_archive_entry(name) {
      anyhow::bail!("invalid archive: unsafe entry path {name}");
    }
    let path = target.join(name);
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, contents).await?;
  }
  info!("materialized {} embedded files into {}", content.len(), target.display());
  Ok(())
}

#[cfg(test)]
mod test {
  use super::*;
  use std::collections::HashMap;

  #[tokio::test]
  async fn materializes_embedded_files() {
    let dir = tempdir();
    let mut content = HashMap::new();
    content.insert("index.html".to_string(), "<h1>hi</h1>".to_string());
    let spec = SourceSpec::Embedded { content };
    let result = materialize(&dir, "dep-1", &spec, 1024 * 1024).await.unwrap();
    let path = result.path.unwrap();
    let written =
      tokio::fs::read_to_string(path.join("index.html")).await.unwrap();
    assert_eq!(written, "<h1>hi</h1>");
  }

  #[tokio::test]
  async fn rejects_embedded_path_escape() {
    let dir = tempdir();
    let mut content = HashMap::new();
    content.insert("../escape.txt".to_string(), "x".to_string());
    let spec = SourceSpec::Embedded { content };
    let err = materialize(&dir, "dep-2", &spec, 1024 * 1024).await.unwrap_err();
    assert!(err.to_string().contains("unsafe entry path"));
  }

  #[tokio::test]
  async fn registry_source_produces_no_path() {
    let dir = tempdir();
    let spec = SourceSpec::Registry {
      image: "nginx".to_string(),
      tag: "latest".to_string(),
      pull_policy: deployer_types::PullPolicy::IfNotPresent,
      registry_auth: None,
    };
    let result = materialize(&dir, "dep-3", &spec, 1024 * 1024).await.unwrap();
    assert!(result.path.is_none());
  }

  fn tempdir() -> PathBuf {
    let dir = std::env::temp_dir()
      .join(format!("deployer-source-test-{}", deployer_types::new_id()));
    dir
  }
}
