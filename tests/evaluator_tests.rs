//! Tests for dependency evaluation and package resolution
//!
//! These tests verify:
//! - Dependency trees parsed from catalog JSON evaluate against facts
//! - Resolution stamps applicability and install state from history
//! - Only applicable, uninstalled, unattended packages need action
//! - Real probe commands run through the system interpreter (Unix)

use chrono::Utc;
use std::cell::Cell;
use tempfile::TempDir;
use updeploy::cache::ResultCache;
use updeploy::facts::{Facts, keys};
use updeploy::history::HistoryItem;
use updeploy::logic::dependency::{DependencyEvaluator, DependencyNode, UnsupportedPolicy};
use updeploy::logic::resolver;
use updeploy::package::{Package, PackageVersion};
use updeploy::types::InstallType;
use updeploy::{DeployError, Result};

fn thinkpad_facts() -> Facts {
    Facts::builder()
        .value(keys::OS, "WIN11")
        .value(keys::CPU_ADDRESS_WIDTH, "64")
        .value(keys::BIOS, "N2HET71W")
        .value(keys::MODEL, "20XW")
        .values(keys::PNP_ID, ["PCI\\VEN_8086&DEV_2723", "HDAUDIO\\FUNC_01&VEN_10EC"])
        .build()
}

fn never_probe(command: &str) -> Result<i32> {
    panic!("unexpected probe: {}", command)
}

fn version(s: &str) -> PackageVersion {
    s.parse().unwrap()
}

fn driver(id: &str, roots: Vec<DependencyNode>) -> Package {
    Package::new(id, "Networking", id, version("22.150.0.3"))
        .with_install(InstallType::DriverInf, format!("{}.inf", id), [0])
        .with_dependencies(roots)
}

// =============================================================================
// Catalog trees
// =============================================================================

#[test]
fn test_tree_from_catalog_json() {
    let json = r#"{
        "And": [
            { "Predicate": { "key": "_OS", "value": "WIN1" } },
            { "Or": [
                "Not",
                { "Predicate": { "key": "_Bios", "value": "N2HET6" } },
                { "Predicate": { "key": "_PnPID", "value": "PCI\\VEN_8086&DEV_27" } }
            ] },
            { "Predicate": { "key": "_CPUAddressWidth", "value": "64" } }
        ]
    }"#;
    let tree: DependencyNode = serde_json::from_str(json).unwrap();

    let facts = thinkpad_facts();
    let evaluator = DependencyEvaluator::new(&facts, UnsupportedPolicy::Pass, &never_probe);
    assert!(evaluator.evaluate(&tree).unwrap());
}

#[test]
fn test_probe_only_runs_for_probe_nodes() {
    let facts = thinkpad_facts();
    let runs = Cell::new(0);
    let probe = |_: &str| -> Result<i32> {
        runs.set(runs.get() + 1);
        Ok(3)
    };
    let tree = DependencyNode::And(vec![
        DependencyNode::predicate(keys::OS, "WIN11"),
        DependencyNode::probe("check_fw.cmd", [0, 3]),
        DependencyNode::predicate(keys::EXTERNAL_DETECTION, "detect.cmd"),
    ]);
    let evaluator = DependencyEvaluator::new(&facts, UnsupportedPolicy::Pass, &probe);

    // Sentinel leaves only accept exit code 0
    assert!(!evaluator.evaluate(&tree).unwrap());
    assert_eq!(runs.get(), 2);
}

#[test]
fn test_strict_mode_flips_unknown_keys_only() {
    let facts = thinkpad_facts();
    let tree = DependencyNode::And(vec![
        DependencyNode::predicate(keys::MODEL, "20XW"),
        DependencyNode::predicate("_EmbeddedControllerVersion", "1.2"),
    ]);
    let lenient =
        DependencyEvaluator::new(&facts, UnsupportedPolicy::from_strict(false), &never_probe);
    let strict =
        DependencyEvaluator::new(&facts, UnsupportedPolicy::from_strict(true), &never_probe);
    assert!(lenient.evaluate(&tree).unwrap());
    assert!(!strict.evaluate(&tree).unwrap());
}

// =============================================================================
// Resolution
// =============================================================================

#[test]
fn test_resolve_stamps_every_field() {
    let facts = thinkpad_facts();
    let evaluator = DependencyEvaluator::new(&facts, UnsupportedPolicy::Pass, &never_probe);

    let wifi = driver("wifi", vec![DependencyNode::predicate(keys::PNP_ID, "PCI\\VEN_8086")]);
    let audio = driver("audio", vec![DependencyNode::predicate(keys::PNP_ID, "HDAUDIO")]);
    let nvme = driver("nvme", vec![DependencyNode::predicate(keys::PNP_ID, "PCI\\VEN_144D")]);
    let history = vec![
        HistoryItem {
            id: "audio".into(),
            category: "Networking".into(),
            title: "audio".into(),
            version: version("22.150.0.3"),
            is_installed: true,
            updated_at: Utc::now(),
            error_message: String::new(),
        },
        HistoryItem {
            id: "wifi".into(),
            category: "Networking".into(),
            title: "wifi".into(),
            version: version("21.0"),
            is_installed: true,
            updated_at: Utc::now(),
            error_message: String::new(),
        },
    ];

    let resolved = resolver::resolve(vec![wifi, audio, nvme], &evaluator, &history).unwrap();

    let ids: Vec<&str> = resolved.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, ["wifi", "audio", "nvme"], "catalog order preserved");

    assert!(resolved[0].is_applicable);
    assert!(!resolved[0].is_installed, "older version in history");
    assert_eq!(resolved[0].detected_version, Some(version("21.0")));

    assert!(resolved[1].is_applicable);
    assert!(resolved[1].is_installed);
    assert_eq!(resolved[1].detected_version, None);

    assert!(!resolved[2].is_applicable);

    let actionable = resolver::filter_actionable(resolved);
    assert_eq!(actionable.len(), 1);
    assert_eq!(actionable[0].id, "wifi");
}

#[test]
fn test_interactive_packages_are_not_actionable() {
    let facts = thinkpad_facts();
    let evaluator = DependencyEvaluator::new(&facts, UnsupportedPolicy::Pass, &never_probe);
    let app = Package::new("app", "Software", "Vantage", version("10.2"))
        .with_install(InstallType::CommandLine, "setup.exe", [0])
        .with_reboot_type(5);
    assert!(!app.install.unattended);

    let resolved = resolver::resolve(vec![app], &evaluator, &[]).unwrap();
    assert!(resolved[0].needs_action());
    assert!(resolver::filter_actionable(resolved).is_empty());
}

#[test]
fn test_probe_start_failure_aborts_resolution() {
    let facts = thinkpad_facts();
    let broken = |cmd: &str| -> Result<i32> {
        Err(DeployError::ProbeExecution {
            command: cmd.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        })
    };
    let evaluator = DependencyEvaluator::new(&facts, UnsupportedPolicy::Pass, &broken);
    let pkg = driver("wifi", vec![DependencyNode::probe("detect.exe", [0])]);

    let result = resolver::resolve(vec![pkg], &evaluator, &[]);
    assert!(matches!(result, Err(DeployError::ProbeExecution { .. })));
}

#[test]
fn test_cached_resolution_round_trips() {
    let dir = TempDir::new().unwrap();
    let cache = ResultCache::new(dir.path());
    let facts = thinkpad_facts();
    let evaluator = DependencyEvaluator::new(&facts, UnsupportedPolicy::Pass, &never_probe);
    let wifi = driver("wifi", vec![DependencyNode::predicate(keys::PNP_ID, "PCI\\VEN_8086")]);

    let resolved = resolver::resolve(vec![wifi], &evaluator, &[]).unwrap();
    cache.put("20XW", &resolved).unwrap();

    assert_eq!(cache.get("20XW"), Some(resolved));
    cache.delete("20XW").unwrap();
    assert_eq!(cache.get("20XW"), None);
}

// =============================================================================
// System probes
// =============================================================================

#[cfg(unix)]
#[test]
fn test_system_probe_exit_codes() {
    use updeploy::command_runner::{CommandProbe, SystemRunner};

    let facts = Facts::default();
    let probe = CommandProbe::new(SystemRunner);
    let evaluator = DependencyEvaluator::new(&facts, UnsupportedPolicy::Pass, &probe);

    assert!(evaluator.evaluate(&DependencyNode::probe("exit 0", [0])).unwrap());
    assert!(!evaluator.evaluate(&DependencyNode::probe("exit 1", [0])).unwrap());
    assert!(evaluator.evaluate(&DependencyNode::probe("exit 3", [0, 3])).unwrap());
    assert!(
        evaluator
            .evaluate(&DependencyNode::predicate(keys::EXTERNAL_DETECTION, "true"))
            .unwrap()
    );
}
