//! Input validation helpers shared across source materialization,
//! subdomain generation, and stack naming.

use std::sync::OnceLock;

use anyhow::anyhow;
use regex::Regex;

/// Lowercases and strips everything but `[a-z0-9-]`, collapsing runs of
/// `-` and trimming them from both ends. Used for subdomain segments and
/// docker-compatible stack/service names (§6 "Subdomain generation").
pub fn to_docker_compatible_name(input: &str) -> String {
  static NON_ALNUM: OnceLock<Regex> = OnceLock::new();
  static DASH_RUN: OnceLock<Regex> = OnceLock::new();
  let non_alnum = NON_ALNUM
    .get_or_init(|| Regex::new(r"[^a-z0-9-]").expect("valid regex"));
  let dash_run =
    DASH_RUN.get_or_init(|| Regex::new(r"-{2,}").expect("valid regex"));

  let lowered = input.to_lowercase();
  let replaced = non_alnum.replace_all(&lowered, "-");
  let collapsed = dash_run.replace_all(&replaced, "-");
  collapsed.trim_matches('-').to_string()
}

/// Validates a string has no control characters and respects a max length.
/// Used before writing anything derived from user input into the
/// filesystem (workspace paths, static bundle paths).
pub fn validate_path_segment(
  input: &str,
  max_length: usize,
) -> anyhow::Result<()> {
  if input.is_empty() {
    return Err(anyhow!("path segment cannot be empty"));
  }
  if input.len() > max_length {
    return Err(anyhow!(
      "path segment too long, must be at most {max_length} characters"
    ));
  }
  for (index, char) in input.chars().enumerate() {
    if char.is_control() {
      return Err(anyhow!(
        "control character at index {index} in path segment"
      ));
    }
    if char == '/' || char == '\\' || (char == '.' && input == "..") {
      return Err(anyhow!(
        "path segment cannot escape its parent directory"
      ));
    }
  }
  Ok(())
}

/// Rejects archive entry paths that would escape the extraction root
/// (`..` components or absolute paths) — the "safe-extract policy" from
/// the Source Materializer spec.
pub fn is_safe_archive_entry(entry_path: &str) -> bool {
  if entry_path.starts_with('/') {
    return false;
  }
  std::path::Path::new(entry_path)
    .components()
    .all(|c| !matches!(c, std::path::Component::ParentDir))
}

/// Part of the "safe-extract policy" alongside [`is_safe_archive_entry`]:
/// rejects a raw or cumulative decompressed byte count once it exceeds
/// `cap_bytes`, bounding decompression bombs and oversized uploads.
pub fn check_size_cap(observed_bytes: u64, cap_bytes: u64, what: &str) -> anyhow::Result<()> {
  if observed_bytes > cap_bytes {
    return Err(anyhow!(
      "{what} exceeds the {cap_bytes} byte size cap ({observed_bytes} bytes)"
    ));
  }
  Ok(())
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn sanitizes_subdomain_segments() {
    assert_eq!(to_docker_compatible_name("My App!!"), "my-app");
    assert_eq!(to_docker_compatible_name("foo___bar"), "foo-bar");
    assert_eq!(to_docker_compatible_name("--edge--"), "edge");
  }

  #[test]
  fn rejects_path_escapes() {
    assert!(!is_safe_archive_entry("../../etc/passwd"));
    assert!(!is_safe_archive_entry("/etc/passwd"));
    assert!(is_safe_archive_entry("src/main.rs"));
  }
}
