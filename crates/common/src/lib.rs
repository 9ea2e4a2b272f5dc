//! Shared primitives for every Warden engine: configuration, the tool-home
//! directory layout, source-tree walking and content hashing.

pub mod config;
pub mod layout;
pub mod walk;

pub use config::{ConfigError, WardenConfig};
pub use layout::ToolHome;
pub use walk::{SourceFilter, TreeFile};

use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Version string mixed into every content-addressed key so that a tool
/// upgrade never serves stale cache entries.
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Content-addressed key for a parsed unit: BLAKE3 over
/// `(content, file identity, tool version)`, hex encoded.
///
/// # Examples
/// ```
/// # use common::content_key;
/// let a = content_key(b"let x = 1;", "src/a.js");
/// let b = content_key(b"let x = 1;", "src/a.js");
/// assert_eq!(a, b);
/// assert_ne!(a, content_key(b"let x = 1;", "src/b.js"));
/// ```
pub fn content_key(content: &[u8], identity: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(content);
    hasher.update(&[0]);
    hasher.update(identity.as_bytes());
    hasher.update(&[0]);
    hasher.update(TOOL_VERSION.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Milliseconds since the Unix epoch (0 if the clock is before 1970).
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Tree-relative key for `path`: UTF-8, forward slashes, no leading `./`.
///
/// Returns `None` when `path` is not under `root`.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let key = rel.to_string_lossy().replace('\\', "/");
    Some(key.trim_start_matches("./").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_content_key_depends_on_identity() {
        let a = content_key(b"x", "a.js");
        let b = content_key(b"x", "b.js");
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_relative_key() {
        let root = PathBuf::from("/project");
        let file = PathBuf::from("/project/src/App.tsx");
        assert_eq!(relative_key(&root, &file).as_deref(), Some("src/App.tsx"));
        assert!(relative_key(&root, &PathBuf::from("/elsewhere/x.js")).is_none());
    }
}
