//! Install Orchestrator
//!
//! Drives each package through download, extraction and its install
//! strategy, one package at a time, and records every terminal outcome in
//! the history ledger before moving on.
//!
//! # Strategies
//!
//! | Package                  | Strategy | Success codes |
//! |--------------------------|----------|---------------|
//! | firmware/BIOS category   | [`BiosUpdater`] | declared |
//! | `InstallType::CommandLine` | install command via the interpreter | declared |
//! | `InstallType::DriverInf` | elevated `pnputil /add-driver <inf>` | declared ∪ {0, 3010} |
//! | `InstallType::Unsupported` | none, fails without running anything | n/a |
//!
//! An empty declared set counts as `{0}`.
//!
//! Per-package failures never stop the run; they end up in history and in
//! the returned [`InstallOutcome`] list.

use crate::bios::{BiosUpdateResult, BiosUpdater, DiskEncryption, PendingAction, PendingActionStore};
use crate::command_runner::{CommandRunner, Invocation};
use crate::download::{PARTIAL_SUFFIX, PayloadFetcher};
use crate::error::{DeployError, Result};
use crate::hash;
use crate::history::{HistoryItem, HistoryStore};
use crate::install_state::{PackageProgress, PackageStage};
use crate::package::Package;
use crate::types::InstallType;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Vendor install commands sometimes carry this misspelled switch
pub const MISSPELLED_FLAG: &str = "-overwirte";
pub const CORRECTED_FLAG: &str = "-overwrite";

/// OS driver-install utility
pub const DRIVER_UTILITY: &str = "pnputil";

/// Exit codes every driver install accepts ("success", "success, reboot required").
///
/// Accepted even when the package does not declare them. This would mask a
/// vendor that gives 3010 another meaning; review before widening further.
pub const IMPLICIT_DRIVER_SUCCESS: [i32; 2] = [0, 3010];

/// Success code assumed when a package declares none
const DEFAULT_SUCCESS: i32 = 0;

/// Rewrite the known misspelled vendor switch to its correct form
pub fn correct_install_command(command: &str) -> String {
    command.replace(MISSPELLED_FLAG, CORRECTED_FLAG)
}

/// Install strategy selected for a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Firmware,
    CommandLine,
    DriverInf,
    Unsupported(String),
}

impl Strategy {
    /// Firmware category wins over the declared install type
    pub fn for_package(package: &Package) -> Self {
        if package.is_firmware() {
            return Self::Firmware;
        }
        match &package.install.install_type {
            InstallType::CommandLine => Self::CommandLine,
            InstallType::DriverInf => Self::DriverInf,
            InstallType::Unsupported(tag) => Self::Unsupported(tag.clone()),
        }
    }
}

/// Terminal result for one package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub package_id: String,
    /// `Installed` or `Failed`
    pub stage: PackageStage,
    /// Stage the package was in when it failed
    pub failed_at: Option<PackageStage>,
    /// Installer exit code, when an installer ran
    pub exit_code: Option<i32>,
    /// Diagnostic text, empty on success
    pub message: String,
    pub bios: Option<BiosUpdateResult>,
}

impl InstallOutcome {
    pub fn is_installed(&self) -> bool {
        self.stage == PackageStage::Installed
    }
}

/// What an installer strategy reported
struct Attempt {
    installed: bool,
    exit_code: i32,
    message: String,
    bios: Option<BiosUpdateResult>,
}

impl Attempt {
    fn judged(exit_code: i32, accepted: &BTreeSet<i32>, failure: impl FnOnce() -> String) -> Self {
        let installed = accepted.contains(&exit_code);
        Self {
            installed,
            exit_code,
            message: if installed { String::new() } else { failure() },
            bios: None,
        }
    }
}

/// Sequential per-package install orchestrator
pub struct Installer<'a> {
    download_root: PathBuf,
    fetcher: &'a dyn PayloadFetcher,
    runner: &'a dyn CommandRunner,
    encryption: &'a dyn DiskEncryption,
    pending: &'a dyn PendingActionStore,
    history: &'a HistoryStore,
}

impl<'a> Installer<'a> {
    pub fn new(
        download_root: impl Into<PathBuf>,
        fetcher: &'a dyn PayloadFetcher,
        runner: &'a dyn CommandRunner,
        encryption: &'a dyn DiskEncryption,
        pending: &'a dyn PendingActionStore,
        history: &'a HistoryStore,
    ) -> Self {
        Self {
            download_root: download_root.into(),
            fetcher,
            runner,
            encryption,
            pending,
            history,
        }
    }

    /// Install packages in the given order, one fully before the next
    pub fn install_all(&self, packages: &[Package]) -> Vec<InstallOutcome> {
        packages.iter().map(|p| self.install_package(p)).collect()
    }

    /// Install one package and record the outcome in history
    pub fn install_package(&self, package: &Package) -> InstallOutcome {
        info!(
            package = %package.id,
            title = %package.title,
            version = %package.version,
            "Installing package"
        );
        let mut progress = PackageProgress::new(&package.id);

        let mut informational = false;
        let outcome = match self.drive(package, &mut progress) {
            Ok(attempt) => {
                let stage = progress.finish(attempt.installed).unwrap_or_else(|e| {
                    warn!(package = %package.id, error = %e, "Unexpected stage transition");
                    progress.fail();
                    PackageStage::Failed
                });
                InstallOutcome {
                    package_id: package.id.clone(),
                    stage,
                    failed_at: progress.failed_at(),
                    exit_code: Some(attempt.exit_code),
                    message: attempt.message,
                    bios: attempt.bios,
                }
            }
            Err(e) => {
                progress.fail();
                informational = e.is_informational();
                InstallOutcome {
                    package_id: package.id.clone(),
                    stage: PackageStage::Failed,
                    failed_at: progress.failed_at(),
                    exit_code: None,
                    message: e.to_string(),
                    bios: None,
                }
            }
        };

        if outcome.is_installed() {
            info!(package = %package.id, "Package installed");
        } else if informational {
            info!(package = %package.id, reason = %outcome.message, "Package skipped");
        } else {
            warn!(
                package = %package.id,
                failed_at = ?outcome.failed_at,
                reason = %outcome.message,
                "Package not installed"
            );
        }

        debug!(package = %package.id, stages = ?progress.stage_history(), "Stage timeline");

        let item = if outcome.is_installed() {
            HistoryItem::installed(package)
        } else {
            HistoryItem::failed(package, &outcome.message)
        };
        if let Err(e) = self.history.upsert(item) {
            warn!(package = %package.id, error = %e, "Could not write install history");
        }
        outcome
    }

    fn drive(&self, package: &Package, progress: &mut PackageProgress) -> Result<Attempt> {
        let dir = package.directory(&self.download_root);

        self.ensure_download(package);
        if holds_no_payload(&dir) {
            return Err(DeployError::ExtractionSkipped(dir));
        }
        progress.transition_to(PackageStage::Downloaded)?;

        self.extract(package, &dir)?;
        progress.transition_to(PackageStage::Extracted)?;

        let attempt = match Strategy::for_package(package) {
            Strategy::Firmware => self.install_firmware(package, &dir)?,
            Strategy::CommandLine => self.install_command(package, &dir)?,
            Strategy::DriverInf => self.install_driver(package, &dir)?,
            Strategy::Unsupported(tag) => {
                return Err(DeployError::install_failure(format!(
                    "unsupported install type `{}`",
                    tag
                )));
            }
        };
        progress.transition_to(PackageStage::Attempted)?;
        Ok(attempt)
    }

    /// Fetch the payload when it is missing; a failed fetch surfaces later
    /// as a package directory with no payload in it
    fn ensure_download(&self, package: &Package) {
        let payload = package.payload_path(&self.download_root);
        if payload.is_file() {
            debug!(package = %package.id, "Payload already present");
            return;
        }
        if let Err(e) = self.fetcher.fetch(package) {
            warn!(package = %package.id, error = %e, "Payload download failed");
        }
    }

    fn extract(&self, package: &Package, dir: &Path) -> Result<()> {
        let command = package.extract.command.trim();
        if command.is_empty() {
            debug!(package = %package.id, "No extraction command");
            return Ok(());
        }
        let out = self.runner.run(&Invocation::shell(command).in_dir(dir))?;
        if out.exit_code != 0 {
            warn!(
                package = %package.id,
                exit_code = out.exit_code,
                "Extraction command returned non-zero"
            );
        }
        Ok(())
    }

    fn install_firmware(&self, package: &Package, dir: &Path) -> Result<Attempt> {
        let result = BiosUpdater::new(self.runner, self.encryption).run(dir)?;
        if !result.was_run {
            return Err(DeployError::firmware_not_applicable(
                "package contains no supported firmware installer",
            ));
        }

        let accepted = declared_success_codes(package);
        let mut attempt = Attempt::judged(result.exit_code, &accepted, || {
            format!(
                "firmware update exit code {}: {}",
                result.exit_code,
                result.log_message.trim()
            )
        });
        if attempt.installed {
            self.record_pending_action(package, &result);
        }
        attempt.bios = Some(result);
        Ok(attempt)
    }

    fn install_command(&self, package: &Package, dir: &Path) -> Result<Attempt> {
        let command = correct_install_command(&package.install.command);
        let out = self.runner.run(&Invocation::shell(command).in_dir(dir))?;
        let accepted = declared_success_codes(package);
        Ok(Attempt::judged(out.exit_code, &accepted, || out.diagnostics()))
    }

    fn install_driver(&self, package: &Package, dir: &Path) -> Result<Attempt> {
        let inf = package
            .install
            .inf_file
            .clone()
            .unwrap_or_else(|| package.install.command.clone());
        let invocation =
            Invocation::executable(DRIVER_UTILITY, ["/add-driver", inf.as_str(), "/install"])
                .in_dir(dir)
                .elevated();
        let out = self.runner.run(&invocation)?;

        let mut accepted = package.install.success_codes.clone();
        accepted.extend(IMPLICIT_DRIVER_SUCCESS);
        Ok(Attempt::judged(out.exit_code, &accepted, || out.diagnostics()))
    }

    /// Best-effort write of the pending firmware action flag
    fn record_pending_action(&self, package: &Package, result: &BiosUpdateResult) {
        let package_hash = if package.extract.file_checksum.trim().is_empty() {
            hash::sha256_file(&package.payload_path(&self.download_root)).unwrap_or_default()
        } else {
            package.extract.file_checksum.trim().to_ascii_lowercase()
        };
        let action = PendingAction {
            timestamp: result.timestamp.timestamp(),
            action: result.action_needed,
            package_hash,
        };
        if let Err(e) = self.pending.record(&action) {
            warn!(package = %package.id, error = %e, "Could not record pending firmware action");
        }
    }
}

fn declared_success_codes(package: &Package) -> BTreeSet<i32> {
    if package.install.success_codes.is_empty() {
        BTreeSet::from([DEFAULT_SUCCESS])
    } else {
        package.install.success_codes.clone()
    }
}

/// True when `dir` is missing or holds nothing but interrupted transfers
fn holds_no_payload(dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return true;
    };
    !entries.flatten().any(|entry| {
        let name = entry.file_name();
        !name.to_string_lossy().ends_with(PARTIAL_SUFFIX)
    })
}
