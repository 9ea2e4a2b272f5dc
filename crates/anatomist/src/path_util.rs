//! Path normalization for tree-relative keys.

use std::path::{Path, PathBuf};

use crate::AnatomistError;

/// Canonicalizes a project root with `dunce` (no `\\?\` prefix on Windows).
///
/// # Errors
/// - `AnatomistError::IoError` if the root does not exist or is unreadable.
pub fn canonical_root(path: &Path) -> Result<PathBuf, AnatomistError> {
    Ok(dunce::canonicalize(path)?)
}

/// Lexically joins `spec` onto the tree-relative directory `dir` and folds
/// `.` and `..` segments.
///
/// Returns `None` when the result would escape the tree root. A leading `/`
/// in `spec` anchors it at the root instead of `dir`.
///
/// # Example
/// ```
/// use anatomist::path_util::join_relative;
///
/// assert_eq!(join_relative("src/app", "../lib/util").as_deref(), Some("src/lib/util"));
/// assert_eq!(join_relative("src", "/config").as_deref(), Some("config"));
/// assert_eq!(join_relative("", "../outside"), None);
/// ```
pub fn join_relative(dir: &str, spec: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    let rest = match spec.strip_prefix('/') {
        Some(anchored) => anchored,
        None => {
            parts.extend(dir.split('/').filter(|s| !s.is_empty()));
            spec
        }
    };

    for segment in rest.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

/// Directory portion of a tree-relative key (`""` for top-level files).
pub fn parent_key(key: &str) -> &str {
    key.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_root_manifest_dir() {
        let dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();
        let root = canonical_root(Path::new(&dir)).unwrap();
        assert!(root.join("Cargo.toml").is_file());
    }

    #[test]
    fn test_canonical_root_missing() {
        assert!(canonical_root(Path::new("/this/does/not/exist/nowhere")).is_err());
    }

    #[test]
    fn test_join_relative_folds_segments() {
        assert_eq!(join_relative("a/b", "./c").as_deref(), Some("a/b/c"));
        assert_eq!(join_relative("a/b", "../../c").as_deref(), Some("c"));
        assert_eq!(join_relative("a", "../../c"), None);
    }

    #[test]
    fn test_parent_key() {
        assert_eq!(parent_key("src/app/App.tsx"), "src/app");
        assert_eq!(parent_key("index.js"), "");
    }
}
