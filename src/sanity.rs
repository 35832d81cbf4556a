//! Pre-flight sanity checks for the host environment
//!
//! This module verifies the host before any package is touched:
//! - The operating system is one the engine knows how to drive
//! - The process runs with administrative privileges
//!
//! A failed check is a hard stop; the CLI prints the report and exits
//! before resolution starts.

use tracing::{debug, info, warn};

/// Result of environment verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanityCheckResult {
    pub os: &'static str,
    pub os_supported: bool,
    pub is_elevated: bool,
}

impl SanityCheckResult {
    /// Returns true if all checks passed
    pub fn is_ok(&self) -> bool {
        self.os_supported && self.is_elevated
    }

    /// Human-readable problems, one per failed check
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.os_supported {
            problems.push(format!(
                "Unsupported host operating system `{}` (supported: {})",
                self.os,
                SUPPORTED_OS.join(", ")
            ));
        }
        if !self.is_elevated {
            problems.push(
                "Administrative privileges required to flash firmware and install drivers"
                    .to_string(),
            );
        }
        problems
    }
}

/// Host operating systems the engine can drive
pub const SUPPORTED_OS: &[&str] = &["windows", "linux"];

/// Environment switch to skip the elevation check (development/testing)
pub const SKIP_ELEVATION_ENV: &str = "UPDEPLOY_SKIP_ELEVATION_CHECK";

pub fn is_supported_os(os: &str) -> bool {
    SUPPORTED_OS.contains(&os)
}

/// Check if running with administrative privileges
#[cfg(unix)]
pub fn is_elevated() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Check if running with administrative privileges
///
/// `net session` only succeeds from an elevated token.
#[cfg(windows)]
pub fn is_elevated() -> bool {
    use crate::command_runner::{CommandRunner, Invocation, SystemRunner};

    SystemRunner
        .run(&Invocation::executable("net", ["session"]))
        .map(|out| out.exit_code == 0)
        .unwrap_or(false)
}

#[cfg(not(any(unix, windows)))]
pub fn is_elevated() -> bool {
    false
}

/// Perform all sanity checks and return the result
pub fn verify_environment() -> SanityCheckResult {
    let os = std::env::consts::OS;
    SanityCheckResult {
        os,
        os_supported: is_supported_os(os),
        is_elevated: is_elevated(),
    }
}

/// Skip elevation check when `UPDEPLOY_SKIP_ELEVATION_CHECK=1`
pub fn should_skip_elevation_check() -> bool {
    std::env::var(SKIP_ELEVATION_ENV)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Verify the host, failing with every problem found
pub fn run_preflight_checks() -> anyhow::Result<SanityCheckResult> {
    debug!("Running pre-flight sanity checks...");

    let mut result = verify_environment();
    if !result.is_elevated && should_skip_elevation_check() {
        warn!("Elevation check skipped ({}=1)", SKIP_ELEVATION_ENV);
        result.is_elevated = true;
    }

    if !result.is_ok() {
        anyhow::bail!("Pre-flight check failed:\n  {}", result.problems().join("\n  "));
    }

    info!(os = result.os, "Pre-flight checks passed");
    Ok(result)
}
