//! Per-package Install State Machine
//!
//! Every package the orchestrator handles moves through a fixed sequence of
//! stages. `PackageProgress` owns the current stage and rejects skipped or
//! backward transitions, so the orchestrator cannot report a package as
//! installed without it having been downloaded, extracted and attempted.
//!
//! # Stage Flow
//!
//! ```text
//! NotDownloaded
//!     ↓
//! Downloaded
//!     ↓
//! Extracted
//!     ↓
//! Attempted
//!     ↓
//! Installed | Failed
//!
//! (Any non-terminal stage can transition to Failed)
//! ```

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Install stages in sequential order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PackageStage {
    /// Payload not yet present in the package directory
    NotDownloaded = 0,
    /// Payload present
    Downloaded = 1,
    /// Extraction command has run
    Extracted = 2,
    /// Installer strategy has run
    Attempted = 3,
    /// Installer reported a success code (terminal)
    Installed = 4,
    /// Package could not be installed (terminal)
    Failed = 255,
}

impl PackageStage {
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Installed | Self::Failed)
    }

    /// Next stage on the success path, `None` from `Attempted` and terminal stages
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::NotDownloaded => Some(Self::Downloaded),
            Self::Downloaded => Some(Self::Extracted),
            Self::Extracted => Some(Self::Attempted),
            Self::Attempted | Self::Installed | Self::Failed => None,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::NotDownloaded => "Not downloaded",
            Self::Downloaded => "Downloaded",
            Self::Extracted => "Extracted",
            Self::Attempted => "Install attempted",
            Self::Installed => "Installed",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for PackageStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur during stage transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageTransitionError {
    #[error("Cannot move from {from} to {to}")]
    Invalid { from: PackageStage, to: PackageStage },

    #[error("Package is already {from}")]
    FromTerminalState { from: PackageStage },

    #[error("Cannot finish from {from}, the installer has not been attempted")]
    NotAttempted { from: PackageStage },
}

/// Stage tracker for one package
#[derive(Debug, Clone)]
pub struct PackageProgress {
    package_id: String,
    current: PackageStage,
    failed_at: Option<PackageStage>,
    /// Stages entered, with unix timestamps
    stage_history: Vec<(PackageStage, u64)>,
}

impl PackageProgress {
    pub fn new(package_id: impl Into<String>) -> Self {
        Self {
            package_id: package_id.into(),
            current: PackageStage::NotDownloaded,
            failed_at: None,
            stage_history: vec![(PackageStage::NotDownloaded, now())],
        }
    }

    #[inline]
    pub fn package_id(&self) -> &str {
        &self.package_id
    }

    #[inline]
    pub fn current_stage(&self) -> PackageStage {
        self.current
    }

    /// Stage at which the package failed, if it did
    #[inline]
    pub fn failed_at(&self) -> Option<PackageStage> {
        self.failed_at
    }

    pub fn stage_history(&self) -> &[(PackageStage, u64)] {
        &self.stage_history
    }

    /// Move forward to `stage`, which must be the immediate next stage
    pub fn transition_to(&mut self, stage: PackageStage) -> Result<(), StageTransitionError> {
        if self.current.is_terminal() {
            return Err(StageTransitionError::FromTerminalState { from: self.current });
        }
        if self.current.next() != Some(stage) {
            return Err(StageTransitionError::Invalid {
                from: self.current,
                to: stage,
            });
        }
        self.enter(stage);
        Ok(())
    }

    /// Finish an attempted install with its verdict
    pub fn finish(&mut self, installed: bool) -> Result<PackageStage, StageTransitionError> {
        match self.current {
            PackageStage::Attempted => {}
            stage if stage.is_terminal() => {
                return Err(StageTransitionError::FromTerminalState { from: stage });
            }
            stage => return Err(StageTransitionError::NotAttempted { from: stage }),
        }
        if installed {
            self.enter(PackageStage::Installed);
        } else {
            self.fail();
        }
        Ok(self.current)
    }

    /// Mark the package failed at its current stage; no-op once terminal
    pub fn fail(&mut self) {
        if self.current.is_terminal() {
            return;
        }
        self.failed_at = Some(self.current);
        self.enter(PackageStage::Failed);
    }

    fn enter(&mut self, stage: PackageStage) {
        tracing::debug!(
            package = %self.package_id,
            from = %self.current,
            to = %stage,
            "Stage transition"
        );
        self.current = stage;
        self.stage_history.push((stage, now()));
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
