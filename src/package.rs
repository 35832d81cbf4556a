//! Package Model
//!
//! Normalized description of one catalog entry. Packages are built fresh by
//! the (external) catalog parser each run and treated as immutable inputs by
//! the engine, apart from the three resolution stamps `is_applicable`,
//! `is_installed` and `detected_version`.

use crate::error::{DeployError, Result};
use crate::logic::dependency::DependencyNode;
use crate::types::{InstallType, Severity};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

/// Reboot-type codes that install without user interaction
const UNATTENDED_REBOOT_TYPES: [i32; 2] = [0, 3];

/// Four-part numeric version (`major.minor.build.revision`).
///
/// Comparison is field-wise numeric; missing trailing fields count as zero,
/// so `1.2` equals `1.2.0.0` and `1.10` is newer than `1.9`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageVersion {
    parts: [u32; 4],
    /// Number of fields as declared, used for display only
    declared: usize,
}

impl PackageVersion {
    pub const fn new(major: u32, minor: u32, build: u32, revision: u32) -> Self {
        Self {
            parts: [major, minor, build, revision],
            declared: 4,
        }
    }

    pub fn parts(&self) -> [u32; 4] {
        self.parts
    }
}

impl FromStr for PackageVersion {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(DeployError::InvalidVersion(s.to_string()));
        }
        let fields: Vec<&str> = trimmed.split('.').collect();
        if fields.len() > 4 {
            return Err(DeployError::InvalidVersion(s.to_string()));
        }
        let mut parts = [0u32; 4];
        for (slot, field) in parts.iter_mut().zip(&fields) {
            *slot = field
                .parse()
                .map_err(|_| DeployError::InvalidVersion(s.to_string()))?;
        }
        Ok(Self {
            parts,
            declared: fields.len(),
        })
    }
}

impl TryFrom<String> for PackageVersion {
    type Error = DeployError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<PackageVersion> for String {
    fn from(v: PackageVersion) -> Self {
        v.to_string()
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown: Vec<String> = self.parts[..self.declared.max(1)]
            .iter()
            .map(u32::to_string)
            .collect();
        write!(f, "{}", shown.join("."))
    }
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

impl Eq for PackageVersion {}

impl Hash for PackageVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.parts.hash(state);
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts.cmp(&other.parts)
    }
}

/// How the downloaded payload is unpacked
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractInfo {
    /// Extraction command, run in the package directory (may be empty)
    pub command: String,
    /// Payload file name inside the package directory
    pub file_name: String,
    /// Declared payload size in bytes (0 when unknown)
    #[serde(default)]
    pub file_size: u64,
    /// Declared SHA-256 of the payload, hex encoded (empty when unknown)
    #[serde(default)]
    pub file_checksum: String,
}

/// How the extracted payload is installed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallInfo {
    /// True when the install needs no interactive prompts
    pub unattended: bool,
    pub install_type: InstallType,
    /// Exit codes the vendor declares as success (may be empty)
    #[serde(default)]
    pub success_codes: BTreeSet<i32>,
    /// INF file for `DriverInf` installs
    #[serde(default)]
    pub inf_file: Option<String>,
    /// Install command for `CommandLine` installs
    #[serde(default)]
    pub command: String,
}

impl Default for InstallInfo {
    fn default() -> Self {
        Self {
            unattended: false,
            install_type: InstallType::CommandLine,
            success_codes: BTreeSet::new(),
            inf_file: None,
            command: String::new(),
        }
    }
}

/// One catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    /// Stable across runs, join key with the history ledger
    pub id: String,
    pub category: String,
    pub title: String,
    pub version: PackageVersion,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub reboot_type: i32,
    /// URL of the package descriptor; payloads live next to it
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub extract: ExtractInfo,
    #[serde(default)]
    pub install: InstallInfo,
    /// Dependency tree roots, normally exactly one
    #[serde(default)]
    pub dependencies: Vec<DependencyNode>,
    #[serde(default)]
    pub is_applicable: bool,
    #[serde(default)]
    pub is_installed: bool,
    #[serde(default)]
    pub detected_version: Option<PackageVersion>,
}

impl Package {
    /// Create a package with default extract/install info
    pub fn new(
        id: impl Into<String>,
        category: impl Into<String>,
        title: impl Into<String>,
        version: PackageVersion,
    ) -> Self {
        let mut package = Self {
            id: id.into(),
            category: category.into(),
            title: title.into(),
            version,
            vendor: String::new(),
            severity: Severity::default(),
            reboot_type: 0,
            source_url: String::new(),
            extract: ExtractInfo::default(),
            install: InstallInfo::default(),
            dependencies: Vec::new(),
            is_applicable: false,
            is_installed: false,
            detected_version: None,
        };
        package.refresh_unattended();
        package
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = url.into();
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_reboot_type(mut self, reboot_type: i32) -> Self {
        self.reboot_type = reboot_type;
        self.refresh_unattended();
        self
    }

    pub fn with_extract(mut self, extract: ExtractInfo) -> Self {
        self.extract = extract;
        self
    }

    /// Set the installer strategy, command (or INF file) and success codes
    pub fn with_install(
        mut self,
        install_type: InstallType,
        command: impl Into<String>,
        success_codes: impl IntoIterator<Item = i32>,
    ) -> Self {
        let command = command.into();
        if install_type == InstallType::DriverInf {
            self.install.inf_file = Some(command.clone());
        }
        self.install.install_type = install_type;
        self.install.command = command;
        self.install.success_codes = success_codes.into_iter().collect();
        self.refresh_unattended();
        self
    }

    pub fn with_dependencies(mut self, roots: Vec<DependencyNode>) -> Self {
        self.dependencies = roots;
        self
    }

    /// Firmware packages are routed to the BIOS handler regardless of install type
    pub fn is_firmware(&self) -> bool {
        let category = self.category.to_ascii_lowercase();
        category.contains("bios") || category.contains("firmware")
    }

    /// Recompute `install.unattended` from reboot type, category and install type
    pub fn refresh_unattended(&mut self) {
        self.install.unattended = UNATTENDED_REBOOT_TYPES.contains(&self.reboot_type)
            || self.is_firmware()
            || self.install.install_type == InstallType::DriverInf;
    }

    /// Applicable and not yet installed
    pub fn needs_action(&self) -> bool {
        self.is_applicable && !self.is_installed
    }

    /// Directory holding this package's payload: `<root>/<id>`
    pub fn directory(&self, download_root: &Path) -> PathBuf {
        download_root.join(&self.id)
    }

    /// Full path of the payload file: `<root>/<id>/<file_name>`
    pub fn payload_path(&self, download_root: &Path) -> PathBuf {
        self.directory(download_root).join(&self.extract.file_name)
    }

    /// Payload URL: the descriptor URL with its last segment replaced by the file name
    pub fn payload_url(&self) -> Result<Url> {
        let base = Url::parse(&self.source_url)?;
        Ok(base.join(&self.extract.file_name)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> PackageVersion {
        s.parse().unwrap()
    }

    #[test]
    fn test_version_compares_numerically() {
        assert!(v("1.10") > v("1.9"));
        assert!(v("2.0.0.1") > v("2.0.0.0"));
        assert!(v("0.1.10.3") < v("0.2"));
        assert_eq!(v("1.2"), v("1.2.0.0"));
    }

    #[test]
    fn test_version_rejects_garbage() {
        assert!("".parse::<PackageVersion>().is_err());
        assert!("1.a".parse::<PackageVersion>().is_err());
        assert!("1.2.3.4.5".parse::<PackageVersion>().is_err());
    }

    #[test]
    fn test_version_display_keeps_declared_fields() {
        assert_eq!(v("1.25").to_string(), "1.25");
        assert_eq!(PackageVersion::new(1, 2, 3, 4).to_string(), "1.2.3.4");
    }

    #[test]
    fn test_unattended_rules() {
        let version = v("1.0");
        let interactive = Package::new("a", "Audio", "Audio driver", version)
            .with_reboot_type(1)
            .with_install(InstallType::CommandLine, "setup.exe", [0]);
        assert!(!interactive.install.unattended);

        let reboot3 = interactive.clone().with_reboot_type(3);
        assert!(reboot3.install.unattended);

        let firmware = Package::new("b", "BIOS UEFI", "BIOS", version).with_reboot_type(5);
        assert!(firmware.install.unattended);

        let inf = Package::new("c", "Chipset", "Chipset INF", version)
            .with_reboot_type(1)
            .with_install(InstallType::DriverInf, "chipset.inf", []);
        assert!(inf.install.unattended);
        assert_eq!(inf.install.inf_file.as_deref(), Some("chipset.inf"));
    }

    #[test]
    fn test_payload_url_replaces_descriptor_name() {
        let pkg = Package::new("n2hgc06w", "BIOS UEFI", "BIOS", v("1.0"))
            .with_source_url("https://download.example.com/pccbbs/mobiles/n2hgc06w_2_.xml")
            .with_extract(ExtractInfo {
                file_name: "n2hgc06w.exe".into(),
                ..Default::default()
            });
        assert_eq!(
            pkg.payload_url().unwrap().as_str(),
            "https://download.example.com/pccbbs/mobiles/n2hgc06w.exe"
        );
    }

    #[test]
    fn test_package_paths() {
        let pkg = Package::new("abc", "Audio", "Audio", v("1.0")).with_extract(ExtractInfo {
            file_name: "abc.exe".into(),
            ..Default::default()
        });
        let root = Path::new("/var/updeploy");
        assert_eq!(pkg.directory(root), root.join("abc"));
        assert_eq!(pkg.payload_path(root), root.join("abc").join("abc.exe"));
    }

    #[test]
    fn test_package_json_roundtrip_keeps_fields() {
        let pkg = Package::new("x1", "Networking", "Wi-Fi", v("22.110.1.1"))
            .with_severity(Severity::Critical)
            .with_install(InstallType::Unsupported("msu".into()), "", [0, 1641]);
        let json = serde_json::to_string(&pkg).unwrap();
        let back: Package = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pkg);
    }
}
