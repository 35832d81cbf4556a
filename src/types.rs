//! Type-safe catalog vocabulary
//!
//! Replaces the vendor's stringly-typed catalog fields with closed enums that
//! provide exhaustive matching. Tags the engine does not know are kept in an
//! explicit `Unsupported` case instead of being dropped.

use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumIter, EnumString};

/// Vendor-assigned urgency of a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum Severity {
    Critical,
    #[default]
    Recommended,
    Optional,
}

/// Installer strategy declared by a package.
///
/// BIOS-category packages ignore this and always use the firmware handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InstallType {
    /// Run the declared install command through the command interpreter
    CommandLine,
    /// Add and install an INF driver with the OS driver utility
    DriverInf,
    /// Any tag the engine has no strategy for
    Unsupported(String),
}

impl InstallType {
    /// Parse a vendor install-type tag (`cmd`, `INF`, ...)
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "cmd" | "commandline" => Self::CommandLine,
            "inf" | "driverinf" => Self::DriverInf,
            _ => Self::Unsupported(tag.to_string()),
        }
    }
}

impl fmt::Display for InstallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommandLine => write!(f, "cmd"),
            Self::DriverInf => write!(f, "INF"),
            Self::Unsupported(tag) => write!(f, "{}", tag),
        }
    }
}

impl From<String> for InstallType {
    fn from(tag: String) -> Self {
        Self::from_tag(&tag)
    }
}

impl From<InstallType> for String {
    fn from(kind: InstallType) -> Self {
        kind.to_string()
    }
}

/// Follow-up action a firmware flash requires before it takes effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
pub enum ActionNeeded {
    #[default]
    Reboot,
    Shutdown,
}
