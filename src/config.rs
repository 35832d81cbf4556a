//! Deployment configuration file handling.
//!
//! A single JSON document names the per-machine paths the engine reads and
//! writes, plus the few switches that change resolution and download
//! behavior. Every field has a default, so a partial file is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Engine configuration that can be saved/loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Root of per-package directories (`<download_dir>/<ID>/`)
    pub download_dir: PathBuf,
    pub history_path: PathBuf,
    pub cache_dir: PathBuf,
    /// Firmware pending-action flag file
    pub pending_action_path: PathBuf,

    /// Unsupported dependency predicates evaluate false instead of true
    pub strict_dependencies: bool,
    /// Re-download payloads even when a valid copy is on disk
    pub force_download: bool,
    pub proxy: Option<String>,
    pub progress_interval_ms: u64,

    /// Volume checked for disk encryption before flashing firmware
    pub os_volume: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        let root = default_state_root();
        Self {
            download_dir: root.join("downloads"),
            history_path: root.join("history.json"),
            cache_dir: root.join("cache"),
            pending_action_path: root.join("pending_action.json"),
            strict_dependencies: false,
            force_download: false,
            proxy: None,
            progress_interval_ms: 500,
            os_volume: default_os_volume().to_string(),
        }
    }
}

impl DeployConfig {
    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load_from_file(path)
        } else {
            tracing::info!(path = ?path.as_ref(), "No configuration file, using defaults");
            Ok(Self::default())
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let paths = [
            ("download_dir", &self.download_dir),
            ("history_path", &self.history_path),
            ("cache_dir", &self.cache_dir),
            ("pending_action_path", &self.pending_action_path),
        ];
        for (name, path) in paths {
            if path.as_os_str().is_empty() {
                anyhow::bail!("{} must be specified", name);
            }
        }

        if let Some(proxy) = &self.proxy {
            url::Url::parse(proxy).with_context(|| format!("Invalid proxy URL: {}", proxy))?;
        }

        if self.progress_interval_ms == 0 {
            anyhow::bail!("progress_interval_ms must be greater than zero");
        }

        if self.os_volume.trim().is_empty() {
            anyhow::bail!("os_volume must be specified");
        }

        Ok(())
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

#[cfg(windows)]
fn default_state_root() -> PathBuf {
    std::env::var_os("ProgramData")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(r"C:\ProgramData"))
        .join("updeploy")
}

#[cfg(not(windows))]
fn default_state_root() -> PathBuf {
    PathBuf::from("/var/lib/updeploy")
}

#[cfg(windows)]
fn default_os_volume() -> &'static str {
    "C:"
}

#[cfg(not(windows))]
fn default_os_volume() -> &'static str {
    "/"
}
