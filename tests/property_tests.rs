//! Property-Based Tests for updeploy
//!
//! Uses proptest for testing invariants and edge cases
//!
//! These tests verify:
//! - Version ordering is numeric and field-wise
//! - Dependency evaluation is deterministic
//! - A negation marker affects exactly one following sibling
//! - Vendor typo correction never leaves the misspelled flag behind

use proptest::prelude::*;
use updeploy::facts::{Facts, keys};
use updeploy::installer::{CORRECTED_FLAG, MISSPELLED_FLAG, correct_install_command};
use updeploy::logic::dependency::{DependencyEvaluator, DependencyNode, UnsupportedPolicy};
use updeploy::package::PackageVersion;
use updeploy::types::Severity;
use updeploy::Result;

// =============================================================================
// PackageVersion Property Tests
// =============================================================================

fn version_fields() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(0u32..100_000, 1..=4)
}

fn parse(fields: &[u32]) -> PackageVersion {
    let text: Vec<String> = fields.iter().map(u32::to_string).collect();
    text.join(".").parse().expect("Should parse")
}

fn padded(fields: &[u32]) -> [u32; 4] {
    let mut parts = [0u32; 4];
    parts[..fields.len()].copy_from_slice(fields);
    parts
}

proptest! {
    /// Ordering matches lexicographic order of zero-padded numeric fields
    #[test]
    fn version_order_is_numeric(a in version_fields(), b in version_fields()) {
        let expected = padded(&a).cmp(&padded(&b));
        prop_assert_eq!(parse(&a).cmp(&parse(&b)), expected);
    }

    /// Trailing zero fields do not change equality
    #[test]
    fn version_trailing_zeros_are_equal(fields in prop::collection::vec(0u32..1000, 1..=3)) {
        let mut longer = fields.clone();
        longer.push(0);
        prop_assert_eq!(parse(&fields), parse(&longer));
    }

    /// Display → parse round-trip is identity
    #[test]
    fn version_display_roundtrip(fields in version_fields()) {
        let version = parse(&fields);
        let reparsed: PackageVersion = version.to_string().parse().expect("Should parse");
        prop_assert_eq!(version, reparsed);
        prop_assert_eq!(version.to_string().split('.').count(), fields.len());
    }
}

// =============================================================================
// Severity Enum Property Tests
// =============================================================================

fn severity_strategy() -> impl Strategy<Value = Severity> {
    prop_oneof![
        Just(Severity::Critical),
        Just(Severity::Recommended),
        Just(Severity::Optional),
    ]
}

proptest! {
    /// Severity parsing ignores case
    #[test]
    fn severity_parse_ignores_case(severity in severity_strategy(), upper in any::<bool>()) {
        let text = severity.to_string();
        let text = if upper { text.to_uppercase() } else { text.to_lowercase() };
        let parsed: Severity = text.parse().expect("Should parse");
        prop_assert_eq!(parsed, severity);
    }
}

// =============================================================================
// Dependency Evaluation Property Tests
// =============================================================================

fn facts() -> Facts {
    Facts::builder()
        .value(keys::OS, "WIN11")
        .value(keys::BIOS, "N2HET71W")
        .build()
}

fn no_probe(_: &str) -> Result<i32> {
    Ok(0)
}

fn leaf(pass: bool) -> DependencyNode {
    DependencyNode::predicate(keys::OS, if pass { "WIN11" } else { "WIN7" })
}

/// Arbitrary trees of bounded depth, including negation markers
fn tree_strategy() -> impl Strategy<Value = DependencyNode> {
    let leaves = prop_oneof![
        any::<bool>().prop_map(leaf),
        Just(DependencyNode::Not),
        Just(DependencyNode::predicate("_Unknown", "x")),
        Just(DependencyNode::predicate(keys::BIOS, "N2HET")),
    ];
    leaves.prop_recursive(4, 32, 5, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..5).prop_map(DependencyNode::And),
            prop::collection::vec(inner, 0..5).prop_map(DependencyNode::Or),
        ]
    })
}

proptest! {
    /// Same tree, same facts, same answer
    #[test]
    fn evaluation_is_deterministic(tree in tree_strategy(), strict in any::<bool>()) {
        let facts = facts();
        let policy = UnsupportedPolicy::from_strict(strict);
        let evaluator = DependencyEvaluator::new(&facts, policy, &no_probe);
        let first = evaluator.evaluate(&tree).unwrap();
        for _ in 0..3 {
            prop_assert_eq!(evaluator.evaluate(&tree).unwrap(), first);
        }
    }

    /// A marker flips the next sibling and leaves every later sibling alone
    #[test]
    fn negation_scope_is_one_sibling(values in prop::collection::vec(any::<bool>(), 1..8)) {
        let facts = facts();
        let evaluator = DependencyEvaluator::new(&facts, UnsupportedPolicy::Pass, &no_probe);

        let mut siblings = vec![DependencyNode::Not];
        siblings.extend(values.iter().copied().map(leaf));
        let results = evaluator.evaluate_roots(&siblings).unwrap();

        let mut expected = values.clone();
        expected[0] = !expected[0];
        prop_assert_eq!(results, expected);
    }

    /// Repeated markers toggle: an even run cancels out
    #[test]
    fn negation_markers_toggle(markers in 0usize..6, value in any::<bool>()) {
        let facts = facts();
        let evaluator = DependencyEvaluator::new(&facts, UnsupportedPolicy::Pass, &no_probe);

        let mut siblings = vec![DependencyNode::Not; markers];
        siblings.push(leaf(value));
        let results = evaluator.evaluate_roots(&siblings).unwrap();

        prop_assert_eq!(results, vec![value ^ (markers % 2 == 1)]);
    }
}

// =============================================================================
// Install Command Property Tests
// =============================================================================

proptest! {
    /// Corrected commands never contain the misspelled switch
    #[test]
    fn typo_correction_removes_misspelling(
        prefix in "[a-z ./-]{0,20}",
        suffix in "[a-z ./]{0,20}",
    ) {
        let command = format!("{}{}{}", prefix, MISSPELLED_FLAG, suffix);
        let corrected = correct_install_command(&command);
        prop_assert!(!corrected.contains(MISSPELLED_FLAG));
        prop_assert!(corrected.contains(CORRECTED_FLAG));
    }

    /// Commands without the misspelling are left untouched
    #[test]
    fn typo_correction_leaves_clean_commands(command in "[a-zA-Z0-9 ./]{0,40}") {
        prop_assert_eq!(correct_install_command(&command), command);
    }
}
