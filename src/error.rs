//! Error handling module for updeploy
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Per-package failures during install are recorded to history rather than
//! propagated; the variants here cover everything that can cross a module
//! boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the deployment engine
#[derive(Error, Debug)]
pub enum DeployError {
    /// IO errors (file operations, directories)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An external probe command could not be started.
    ///
    /// Distinct from a probe that ran and returned a non-zero exit code.
    #[error("Failed to start probe command `{command}`: {source}")]
    ProbeExecution {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// An install, extraction or firmware command could not be started
    #[error("Failed to start command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A single payload transfer failed
    #[error("Download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    /// HTTP client construction or transport errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// Payload missing from the package directory, extraction was skipped
    #[error("Extraction skipped, package directory {} is empty", .0.display())]
    ExtractionSkipped(PathBuf),

    /// Installer ran but its exit code is not a declared success code
    #[error("Install failed: {0}")]
    InstallFailure(String),

    /// No recognized firmware update style in the package directory
    #[error("Firmware update not applicable: {0}")]
    FirmwareNotApplicable(String),

    /// Best-effort persistence writes (history, pending action, cache)
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Malformed package version string
    #[error("Invalid version `{0}`")]
    InvalidVersion(String),

    /// Malformed source or proxy URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Package stage machine transition errors
    #[error("Install transition error: {0}")]
    Transition(#[from] crate::install_state::StageTransitionError),
}

/// Result type alias for deployment operations
pub type Result<T> = std::result::Result<T, DeployError>;

// Convenient error constructors
impl DeployError {
    /// Create a download error for one URL
    pub fn download(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Download {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create an install failure
    pub fn install_failure(msg: impl Into<String>) -> Self {
        Self::InstallFailure(msg.into())
    }

    /// Create a firmware-not-applicable error
    pub fn firmware_not_applicable(msg: impl Into<String>) -> Self {
        Self::FirmwareNotApplicable(msg.into())
    }

    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Returns true for failures that are informational rather than faults
    pub fn is_informational(&self) -> bool {
        matches!(self, Self::FirmwareNotApplicable(_))
    }
}

impl From<reqwest::Error> for DeployError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<url::ParseError> for DeployError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}
