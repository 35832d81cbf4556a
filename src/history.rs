//! Install History Store
//!
//! Persisted ledger of install attempts, keyed by package ID. The ledger is
//! a JSON array rewritten as a whole on every save; there is no locking, the
//! engine assumes a single writer process.

use crate::error::Result;
use crate::package::{Package, PackageVersion};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Outcome of the latest install attempt for one package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: String,
    pub category: String,
    pub title: String,
    pub version: PackageVersion,
    pub is_installed: bool,
    pub updated_at: DateTime<Utc>,
    /// Empty on success
    #[serde(default)]
    pub error_message: String,
}

impl HistoryItem {
    /// Record a successful install of `package`
    pub fn installed(package: &Package) -> Self {
        Self::from_package(package, true, String::new())
    }

    /// Record a failed install of `package`
    pub fn failed(package: &Package, error: impl Into<String>) -> Self {
        Self::from_package(package, false, error.into())
    }

    fn from_package(package: &Package, is_installed: bool, error_message: String) -> Self {
        Self {
            id: package.id.clone(),
            category: package.category.clone(),
            title: package.title.clone(),
            version: package.version,
            is_installed,
            updated_at: Utc::now(),
            error_message,
        }
    }
}

/// JSON-file backed history ledger
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every item, creating an empty ledger on first use
    pub fn load(&self) -> Result<Vec<HistoryItem>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "Creating empty history ledger");
            self.save(&[])?;
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    /// Load the item for one package ID
    pub fn load_item(&self, id: &str) -> Result<Option<HistoryItem>> {
        Ok(self.load()?.into_iter().find(|item| item.id == id))
    }

    /// Replace the whole ledger
    pub fn save(&self, items: &[HistoryItem]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(items)?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, json)?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }

    /// Replace the item sharing `item.id` in place, or append it
    pub fn upsert(&self, item: HistoryItem) -> Result<()> {
        let mut items = self.load()?;
        match items.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => *existing = item,
            None => items.push(item),
        }
        self.save(&items)
    }
}
