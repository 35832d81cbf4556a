//! updeploy Library
//!
//! Core engine for unattended vendor update deployment: decides which
//! firmware, driver and software packages apply to this machine, fetches
//! their payloads and installs them one at a time.

pub mod bios;
pub mod cache;
pub mod cli;
pub mod command_runner;
pub mod config;
pub mod download;
pub mod error;
pub mod facts;
pub mod hash;
pub mod history;
pub mod install_state;
pub mod installer;
pub mod logic;
pub mod package;
pub mod sanity;
pub mod types;

// Re-export main types for convenience
pub use bios::{BiosUpdateResult, BiosUpdater, DiskEncryption, PendingAction, PendingActionStore};
pub use command_runner::{CommandOutput, CommandRunner, Invocation, SystemRunner};
pub use config::DeployConfig;
pub use download::{DownloadManager, DownloadReport, PayloadFetcher};
pub use error::{DeployError, Result};
pub use facts::Facts;
pub use history::{HistoryItem, HistoryStore};
pub use install_state::{PackageProgress, PackageStage};
pub use installer::{InstallOutcome, Installer};
pub use logic::dependency::{DependencyEvaluator, DependencyNode, Probe, UnsupportedPolicy};
pub use package::{ExtractInfo, InstallInfo, Package, PackageVersion};
pub use types::{ActionNeeded, InstallType, Severity};
