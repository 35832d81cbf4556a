//! Package Resolver
//!
//! Stamps freshly built packages with the three resolution fields and
//! filters them down to the ones that need action.
//!
//! # Resolution Rules
//!
//! | Field              | Source |
//! |--------------------|--------|
//! | `is_applicable`    | every dependency root evaluates true (no roots: true) |
//! | `is_installed`     | history has a successful entry with version >= package version |
//! | `detected_version` | installed history version, when it differs from the package version |
//!
//! Catalog order is preserved throughout; no cross-package ordering is computed.

use crate::error::Result;
use crate::history::HistoryItem;
use crate::logic::dependency::{DependencyEvaluator, Probe};
use crate::package::Package;
use std::collections::HashMap;
use tracing::{debug, info};

// ============================================================================
// Applicability
// ============================================================================

/// Evaluate one package's dependency roots
pub fn is_applicable<P: Probe + ?Sized>(
    package: &Package,
    evaluator: &DependencyEvaluator<'_, P>,
) -> Result<bool> {
    let results = evaluator.evaluate_roots(&package.dependencies)?;
    Ok(results.into_iter().all(|r| r))
}

/// Set `is_applicable` on every package.
///
/// A probe that cannot be started aborts resolution.
pub fn stamp_applicability<P: Probe + ?Sized>(
    packages: &mut [Package],
    evaluator: &DependencyEvaluator<'_, P>,
) -> Result<()> {
    for package in packages.iter_mut() {
        package.is_applicable = is_applicable(package, evaluator)?;
        debug!(package = %package.id, applicable = package.is_applicable, "Applicability resolved");
    }
    Ok(())
}

// ============================================================================
// Install state
// ============================================================================

/// Set `is_installed` and `detected_version` from the history ledger
pub fn stamp_installed(packages: &mut [Package], history: &[HistoryItem]) {
    let by_id: HashMap<&str, &HistoryItem> =
        history.iter().map(|item| (item.id.as_str(), item)).collect();

    for package in packages.iter_mut() {
        let Some(item) = by_id.get(package.id.as_str()) else {
            package.is_installed = false;
            package.detected_version = None;
            continue;
        };
        package.is_installed = item.is_installed && item.version >= package.version;
        package.detected_version =
            (item.is_installed && item.version != package.version).then_some(item.version);
    }
}

// ============================================================================
// Filtering
// ============================================================================

/// Keep packages that are applicable, not installed and unattended
pub fn filter_actionable(packages: Vec<Package>) -> Vec<Package> {
    packages
        .into_iter()
        .filter(|p| p.needs_action() && p.install.unattended)
        .collect()
}

/// Stamp all resolution fields, returning the packages in catalog order
pub fn resolve<P: Probe + ?Sized>(
    mut packages: Vec<Package>,
    evaluator: &DependencyEvaluator<'_, P>,
    history: &[HistoryItem],
) -> Result<Vec<Package>> {
    stamp_applicability(&mut packages, evaluator)?;
    stamp_installed(&mut packages, history);

    let actionable = packages.iter().filter(|p| p.needs_action()).count();
    info!(
        total = packages.len(),
        actionable, "Resolved package applicability"
    );
    Ok(packages)
}

// ============================================================================
// Tests
// ============================================================================
