//! BIOS Update Handler
//!
//! Firmware packages ship one of two vendor flashing styles:
//!
//! | Style   | Marker file   | Invocation              | Log          | Follow-up |
//! |---------|---------------|-------------------------|--------------|-----------|
//! | Updater | `winuptp.exe` | `winuptp.exe -s`        | `winuptp.log`| Reboot    |
//! | Flasher | `Flash.cmd`   | `Flash.cmd /quiet /sccm /ign` | stdout | Shutdown  |
//!
//! A directory with neither marker is not an error: the result reports
//! `was_run = false` and the caller decides what to record.
//!
//! Before either style runs, active disk encryption on the OS volume is
//! suspended for exactly one boot so the flash is not blocked.

use crate::command_runner::{CommandRunner, Invocation};
use crate::error::{DeployError, Result};
use crate::types::ActionNeeded;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const UPDATER_EXE: &str = "winuptp.exe";
pub const UPDATER_LOG: &str = "winuptp.log";
const UPDATER_ARGS: [&str; 1] = ["-s"];

pub const FLASHER_SCRIPT: &str = "Flash.cmd";
const FLASHER_ARGS: &str = "/quiet /sccm /ign";

/// Recognized firmware flashing style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareStyle {
    /// Silent updater executable writing its own log file
    Updater,
    /// Batch flasher script whose stdout is the log
    Flasher,
}

impl FirmwareStyle {
    /// Detect the style from marker files in `dir`; the updater wins if both exist
    pub fn detect(dir: &Path) -> Option<Self> {
        if find_file(dir, UPDATER_EXE).is_some() {
            Some(Self::Updater)
        } else if find_file(dir, FLASHER_SCRIPT).is_some() {
            Some(Self::Flasher)
        } else {
            None
        }
    }

    pub fn action_needed(self) -> ActionNeeded {
        match self {
            Self::Updater => ActionNeeded::Reboot,
            Self::Flasher => ActionNeeded::Shutdown,
        }
    }
}

/// Outcome of one firmware update attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiosUpdateResult {
    /// False when no recognized style was found
    pub was_run: bool,
    pub timestamp: DateTime<Utc>,
    pub exit_code: i32,
    pub log_message: String,
    pub action_needed: ActionNeeded,
}

impl BiosUpdateResult {
    fn not_run() -> Self {
        Self {
            was_run: false,
            timestamp: Utc::now(),
            exit_code: -1,
            log_message: String::new(),
            action_needed: ActionNeeded::default(),
        }
    }
}

// ============================================================================
// Disk encryption
// ============================================================================

/// Capability to inspect and suspend OS volume encryption
pub trait DiskEncryption {
    fn is_active(&self) -> Result<bool>;
    /// Suspend protection until after the next reboot
    fn suspend_for_next_boot(&self) -> Result<()>;
}

impl<T: DiskEncryption + ?Sized> DiskEncryption for &T {
    fn is_active(&self) -> Result<bool> {
        (**self).is_active()
    }

    fn suspend_for_next_boot(&self) -> Result<()> {
        (**self).suspend_for_next_boot()
    }
}

/// Hosts without volume encryption support
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDiskEncryption;

impl DiskEncryption for NoDiskEncryption {
    fn is_active(&self) -> Result<bool> {
        Ok(false)
    }

    fn suspend_for_next_boot(&self) -> Result<()> {
        Ok(())
    }
}

/// BitLocker control through `manage-bde`
#[derive(Debug, Clone)]
pub struct ManageBde<R> {
    runner: R,
    volume: String,
}

impl<R: CommandRunner> ManageBde<R> {
    pub fn new(runner: R, volume: impl Into<String>) -> Self {
        Self {
            runner,
            volume: volume.into(),
        }
    }
}

impl<R: CommandRunner> DiskEncryption for ManageBde<R> {
    fn is_active(&self) -> Result<bool> {
        let status = self
            .runner
            .run(&Invocation::executable("manage-bde", ["-status", self.volume.as_str()]))?;
        Ok(status.exit_code == 0 && status.stdout.contains("Protection On"))
    }

    fn suspend_for_next_boot(&self) -> Result<()> {
        let out = self.runner.run(
            &Invocation::executable(
                "manage-bde",
                ["-protectors", "-disable", self.volume.as_str(), "-RebootCount", "1"],
            )
            .elevated(),
        )?;
        if out.exit_code == 0 {
            Ok(())
        } else {
            Err(DeployError::install_failure(format!(
                "suspending encryption on {} failed: {}",
                self.volume,
                out.diagnostics()
            )))
        }
    }
}

// ============================================================================
// Pending firmware action
// ============================================================================

/// Persisted record that a firmware flash awaits a reboot or shutdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Unix timestamp of the completed flash
    pub timestamp: i64,
    pub action: ActionNeeded,
    /// Checksum of the package payload that produced the flash
    pub package_hash: String,
}

/// Key-value persistence for the pending-action flag
pub trait PendingActionStore {
    /// Overwrite the stored flag
    fn record(&self, action: &PendingAction) -> Result<()>;
}

impl<T: PendingActionStore + ?Sized> PendingActionStore for &T {
    fn record(&self, action: &PendingAction) -> Result<()> {
        (**self).record(action)
    }
}

/// Pending-action flag stored as a small JSON document
#[derive(Debug, Clone)]
pub struct JsonPendingActionStore {
    path: PathBuf,
}

impl JsonPendingActionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Option<PendingAction>> {
        if !self.path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&fs::read_to_string(&self.path)?)?))
    }
}

impl PendingActionStore for JsonPendingActionStore {
    fn record(&self, action: &PendingAction) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| DeployError::persistence(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(action)?;
        fs::write(&self.path, json).map_err(|e| {
            DeployError::persistence(format!("{}: {}", self.path.display(), e))
        })
    }
}

// ============================================================================
// Updater
// ============================================================================

/// Runs firmware updates found in extracted package directories
pub struct BiosUpdater<R, E> {
    runner: R,
    encryption: E,
}

impl<R: CommandRunner, E: DiskEncryption> BiosUpdater<R, E> {
    pub fn new(runner: R, encryption: E) -> Self {
        Self { runner, encryption }
    }

    /// Detect the firmware style in `dir` and run it
    pub fn run(&self, dir: &Path) -> Result<BiosUpdateResult> {
        let Some(style) = FirmwareStyle::detect(dir) else {
            info!(dir = %dir.display(), "No recognized firmware update style");
            return Ok(BiosUpdateResult::not_run());
        };
        info!(dir = %dir.display(), ?style, "Running firmware update");

        self.suspend_encryption();

        let (exit_code, log_message) = match style {
            FirmwareStyle::Updater => self.run_updater(dir)?,
            FirmwareStyle::Flasher => self.run_flasher(dir)?,
        };

        Ok(BiosUpdateResult {
            was_run: true,
            timestamp: Utc::now(),
            exit_code,
            log_message,
            action_needed: style.action_needed(),
        })
    }

    fn suspend_encryption(&self) {
        match self.encryption.is_active() {
            Ok(true) => match self.encryption.suspend_for_next_boot() {
                Ok(()) => info!("Disk encryption suspended for one reboot"),
                Err(e) => warn!(error = %e, "Could not suspend disk encryption"),
            },
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Could not query disk encryption status"),
        }
    }

    fn run_updater(&self, dir: &Path) -> Result<(i32, String)> {
        let log_path = dir.join(UPDATER_LOG);
        if log_path.exists() {
            fs::remove_file(&log_path)?;
        }
        let exe = find_file(dir, UPDATER_EXE).unwrap_or_else(|| dir.join(UPDATER_EXE));
        let out = self
            .runner
            .run(&Invocation::executable(exe, UPDATER_ARGS).in_dir(dir))?;
        let log = fs::read(&log_path)
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
            .unwrap_or_default();
        Ok((out.exit_code, log))
    }

    fn run_flasher(&self, dir: &Path) -> Result<(i32, String)> {
        let out = self
            .runner
            .run(&Invocation::shell(format!("{} {}", FLASHER_SCRIPT, FLASHER_ARGS)).in_dir(dir))?;
        Ok((out.exit_code, out.stdout))
    }
}

/// Case-insensitive lookup of a file directly inside `dir`
fn find_file(dir: &Path, name: &str) -> Option<PathBuf> {
    fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .find(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.eq_ignore_ascii_case(name))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_runner::{CommandOutput, Program};
    use std::cell::{Cell, RefCell};
    use tempfile::TempDir;

    struct ScriptedRunner {
        exit_code: i32,
        stdout: String,
        writes_log: Option<String>,
        calls: RefCell<Vec<Invocation>>,
    }

    impl ScriptedRunner {
        fn new(exit_code: i32) -> Self {
            Self {
                exit_code,
                stdout: String::new(),
                writes_log: None,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
            if let (Some(log), Some(dir)) = (&self.writes_log, &invocation.working_dir) {
                fs::write(dir.join(UPDATER_LOG), log).unwrap();
            }
            self.calls.borrow_mut().push(invocation.clone());
            Ok(CommandOutput {
                stdout: self.stdout.clone(),
                stderr: String::new(),
                exit_code: self.exit_code,
            })
        }
    }

    struct FakeEncryption {
        active: bool,
        suspended: Cell<u32>,
    }

    impl DiskEncryption for FakeEncryption {
        fn is_active(&self) -> Result<bool> {
            Ok(self.active)
        }

        fn suspend_for_next_boot(&self) -> Result<()> {
            self.suspended.set(self.suspended.get() + 1);
            Ok(())
        }
    }

    fn encryption(active: bool) -> FakeEncryption {
        FakeEncryption {
            active,
            suspended: Cell::new(0),
        }
    }

    #[test]
    fn test_no_style_is_not_run() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("readme.txt"), "x").unwrap();
        let runner = ScriptedRunner::new(0);
        let enc = encryption(true);
        let result = BiosUpdater::new(&runner, &enc).run(dir.path()).unwrap();
        assert!(!result.was_run);
        assert!(runner.calls.borrow().is_empty());
        assert_eq!(enc.suspended.get(), 0);
    }

    #[test]
    fn test_updater_style_reads_fresh_log() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("WINUPTP.EXE"), "bin").unwrap();
        fs::write(dir.path().join(UPDATER_LOG), "stale").unwrap();
        let mut runner = ScriptedRunner::new(0);
        runner.writes_log = Some("flash ok".into());
        let enc = encryption(true);

        let result = BiosUpdater::new(&runner, &enc).run(dir.path()).unwrap();

        assert!(result.was_run);
        assert_eq!(result.action_needed, ActionNeeded::Reboot);
        assert_eq!(result.log_message, "flash ok");
        assert_eq!(enc.suspended.get(), 1);
        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert!(matches!(&calls[0].program, Program::Executable { args, .. } if args == &["-s"]));
    }

    #[test]
    fn test_updater_without_log_yields_empty_message() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(UPDATER_EXE), "bin").unwrap();
        fs::write(dir.path().join(UPDATER_LOG), "stale").unwrap();
        let runner = ScriptedRunner::new(1);
        let result = BiosUpdater::new(&runner, NoDiskEncryption)
            .run(dir.path())
            .unwrap();
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.log_message, "");
    }

    #[test]
    fn test_flasher_style_captures_stdout() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(FLASHER_SCRIPT), "@echo off").unwrap();
        let mut runner = ScriptedRunner::new(0);
        runner.stdout = "Flash complete".into();
        let enc = encryption(false);

        let result = BiosUpdater::new(&runner, &enc).run(dir.path()).unwrap();

        assert!(result.was_run);
        assert_eq!(result.action_needed, ActionNeeded::Shutdown);
        assert_eq!(result.log_message, "Flash complete");
        assert_eq!(enc.suspended.get(), 0);
        assert_eq!(
            runner.calls.borrow()[0].command_text(),
            "Flash.cmd /quiet /sccm /ign"
        );
    }

    #[test]
    fn test_pending_action_store_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = JsonPendingActionStore::new(dir.path().join("flags").join("bios.json"));
        assert_eq!(store.load().unwrap(), None);

        let first = PendingAction {
            timestamp: 1_700_000_000,
            action: ActionNeeded::Reboot,
            package_hash: "aa".into(),
        };
        let second = PendingAction {
            timestamp: 1_700_000_100,
            action: ActionNeeded::Shutdown,
            package_hash: "bb".into(),
        };
        store.record(&first).unwrap();
        store.record(&second).unwrap();
        assert_eq!(store.load().unwrap(), Some(second));
    }

    #[test]
    fn test_manage_bde_parses_status() {
        struct Status(&'static str);
        impl CommandRunner for Status {
            fn run(&self, _: &Invocation) -> Result<CommandOutput> {
                Ok(CommandOutput {
                    stdout: self.0.into(),
                    stderr: String::new(),
                    exit_code: 0,
                })
            }
        }
        let on = ManageBde::new(Status("    Protection Status:    Protection On"), "C:");
        let off = ManageBde::new(Status("    Protection Status:    Protection Off"), "C:");
        assert!(on.is_active().unwrap());
        assert!(!off.is_active().unwrap());
    }
}
