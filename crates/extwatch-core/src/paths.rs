use anyhow::{bail, Result};

fn strip_leading_dot_slash(mut s: String) -> String {
  while let Some(rest) = s.strip_prefix("./") {
    s = rest.to_string();
  }
  s
}

/// Vault-relative POSIX form of a path an extension passed to the host.
pub fn normalize_vault_path(input: &str) -> Result<String> {
  let mut trimmed = input.trim().replace('\\', "/");
  trimmed = trimmed.trim_start_matches('/').to_string();
  trimmed = strip_leading_dot_slash(trimmed);
  if trimmed.is_empty() {
    bail!("path is required");
  }
  if trimmed.split('/').any(|p| p.is_empty() || p == "." || p == "..") {
    bail!("invalid path");
  }
  Ok(trimmed)
}

pub fn file_name(path: &str) -> &str {
  path.rsplit('/').next().unwrap_or(path)
}

/// Lowercased text after the last dot of the final segment, empty when there is none.
pub fn file_extension(path: &str) -> String {
  let name = file_name(path);
  match name.rsplit_once('.') {
    Some((_, ext)) => ext.to_ascii_lowercase(),
    None => String::new(),
  }
}

pub fn parent_dir(path: &str) -> Option<&str> {
  path.rsplit_once('/').map(|(parent, _)| parent)
}

/// Name of the folder directly containing `path`.
pub fn parent_folder_name(path: &str) -> Option<&str> {
  let parent = parent_dir(path)?;
  let name = file_name(parent);
  if name.is_empty() {
    return None;
  }
  Some(name)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn normalize_rejects_empty_and_traversal() {
    assert!(normalize_vault_path("  ").is_err());
    assert!(normalize_vault_path("../a.md").is_err());
    assert!(normalize_vault_path("a//b.md").is_err());
  }

  #[test]
  fn normalize_strips_prefixes_and_backslashes() {
    assert_eq!(normalize_vault_path("./a.md").unwrap(), "a.md");
    assert_eq!(normalize_vault_path("///a.md").unwrap(), "a.md");
    assert_eq!(normalize_vault_path(r#"notes\b.md"#).unwrap(), "notes/b.md");
  }

  #[test]
  fn extension_is_lowercased_last_suffix() {
    assert_eq!(file_extension("notes/Daily.MD"), "md");
    assert_eq!(file_extension("a/b.tar.gz"), "gz");
    assert_eq!(file_extension("a.dir/README"), "");
  }

  #[test]
  fn parent_folder_is_last_directory_segment() {
    assert_eq!(parent_folder_name("notes/daily/today.md"), Some("daily"));
    assert_eq!(parent_folder_name("today.md"), None);
    assert_eq!(parent_folder_name("/today.md"), None);
    assert_eq!(parent_dir("notes/daily/today.md"), Some("notes/daily"));
    assert_eq!(file_name("notes/daily/today.md"), "today.md");
  }
}
