//! Resolved-package result cache
//!
//! Advisory snapshots of a resolved package list, one JSON file per tag
//! (typically the machine model). A missing or unreadable entry only means
//! resolution has to run again; it never affects install decisions.

use crate::error::Result;
use crate::hash;
use crate::package::Package;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Hex digits of the tag digest kept in entry file names
const TAG_DIGEST_LEN: usize = 12;

#[derive(Debug, Clone)]
pub struct ResultCache {
    dir: PathBuf,
}

impl ResultCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cached packages for `tag`, `None` when absent or unreadable
    pub fn get(&self, tag: &str) -> Option<Vec<Package>> {
        let path = self.entry_path(tag);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(tag, "Cache miss");
                return None;
            }
            Err(e) => {
                warn!(tag, error = %e, "Ignoring unreadable cache entry");
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(packages) => Some(packages),
            Err(e) => {
                warn!(tag, error = %e, "Ignoring corrupt cache entry");
                None
            }
        }
    }

    /// Store packages under `tag`, replacing any previous entry
    pub fn put(&self, tag: &str, packages: &[Package]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string(packages)?;
        fs::write(self.entry_path(tag), json)?;
        debug!(tag, count = packages.len(), "Cached resolved packages");
        Ok(())
    }

    /// Drop the entry for `tag`; deleting a missing entry is not an error
    pub fn delete(&self, tag: &str) -> Result<()> {
        match fs::remove_file(self.entry_path(tag)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// `<sanitized tag>-<digest of raw tag>.json`; distinct tags never share a file
    fn entry_path(&self, tag: &str) -> PathBuf {
        let safe: String = tag
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let digest = hash::sha256_bytes(tag.as_bytes());
        self.dir.join(format!("{}-{}.json", safe, &digest[..TAG_DIGEST_LEN]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn packages() -> Vec<Package> {
        vec![
            Package::new("a", "Audio", "Audio", "1.0".parse().unwrap()),
            Package::new("b", "BIOS UEFI", "BIOS", "1.54".parse().unwrap()),
        ]
    }

    #[test]
    fn test_put_then_get() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::new(dir.path().join("cache"));
        cache.put("20XW", &packages()).unwrap();
        assert_eq!(cache.get("20XW"), Some(packages()));
    }

    #[test]
    fn test_missing_entry_is_none() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::new(dir.path());
        assert_eq!(cache.get("nothing"), None);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::new(dir.path());
        cache.put("20XW", &packages()).unwrap();
        cache.delete("20XW").unwrap();
        cache.delete("20XW").unwrap();
        assert_eq!(cache.get("20XW"), None);
    }

    #[test]
    fn test_corrupt_entry_is_ignored() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::new(dir.path());
        fs::write(cache.entry_path("20XW"), "[{").unwrap();
        assert_eq!(cache.get("20XW"), None);
    }

    #[test]
    fn test_tag_is_sanitized() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::new(dir.path());
        cache.put("../model 20XW", &packages()).unwrap();
        let entry = cache.entry_path("../model 20XW");
        assert_eq!(entry.parent(), Some(dir.path()));
        let name = entry.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("___model_20XW-"));
        assert!(entry.exists());
    }

    #[test]
    fn test_tags_that_sanitize_alike_stay_separate() {
        let dir = TempDir::new().unwrap();
        let cache = ResultCache::new(dir.path());
        let other = vec![Package::new("c", "Video", "Video", "2.0".parse().unwrap())];
        cache.put("a/b", &packages()).unwrap();
        cache.put("a_b", &other).unwrap();

        assert_ne!(cache.entry_path("a/b"), cache.entry_path("a_b"));
        assert_eq!(cache.get("a/b"), Some(packages()));
        assert_eq!(cache.get("a_b"), Some(other));

        cache.delete("a_b").unwrap();
        assert_eq!(cache.get("a/b"), Some(packages()));
    }
}
