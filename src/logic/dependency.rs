//! Dependency Evaluator
//!
//! Decides whether a package applies to this machine by walking its typed
//! dependency tree against an immutable [`Facts`] snapshot. Predicates that
//! can only be answered by running a command go through an injected
//! [`Probe`], so the tree-combination logic stays pure and testable.
//!
//! # Sibling lists and negation
//!
//! Every child list (and the list of roots) is walked left to right with a
//! local negate flag that starts clear. A [`DependencyNode::Not`] marker
//! toggles the flag and yields no result of its own. The next sibling's raw
//! result is XORed with the flag and the flag is cleared again, so a marker
//! affects exactly one following sibling:
//!
//! ```text
//! [Not, A=false, B=false]  ->  [true, false]
//! ```

use crate::error::Result;
use crate::facts::{Facts, keys};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// Exit codes accepted for `_ExternalDetection` predicate leaves
const EXTERNAL_DETECTION_SUCCESS: i32 = 0;

/// Parsed dependency tree node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependencyNode {
    /// Passes if any fact value for `key` starts with `value`
    Predicate { key: String, value: String },
    /// Passes if every child passes
    And(Vec<DependencyNode>),
    /// Passes if at least one child passes
    Or(Vec<DependencyNode>),
    /// Flips the result of the next sibling only
    Not,
    /// Runs `command` and passes if its exit code is allowed
    ExternalProbe {
        command: String,
        allowed_exit_codes: BTreeSet<i32>,
    },
}

impl DependencyNode {
    pub fn predicate(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Predicate {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn probe(command: impl Into<String>, allowed: impl IntoIterator<Item = i32>) -> Self {
        Self::ExternalProbe {
            command: command.into(),
            allowed_exit_codes: allowed.into_iter().collect(),
        }
    }

    /// Build a composite from a catalog kind tag.
    ///
    /// Only `And` (with or without a leading underscore, any case) combines
    /// conjunctively; every other kind falls back to `Or`.
    pub fn composite(kind: &str, children: Vec<DependencyNode>) -> Self {
        if kind.trim_start_matches('_').eq_ignore_ascii_case("and") {
            Self::And(children)
        } else {
            Self::Or(children)
        }
    }
}

/// What an unsupported predicate (key missing from facts) evaluates to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnsupportedPolicy {
    /// Unsupported predicates pass
    #[default]
    Pass,
    /// Unsupported predicates fail (strict mode)
    Fail,
}

impl UnsupportedPolicy {
    pub fn from_strict(strict: bool) -> Self {
        if strict { Self::Fail } else { Self::Pass }
    }

    fn verdict(self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// Capability to run a command synchronously and report its exit code.
///
/// Returns an error only when the process could not be started; a command
/// that ran and failed reports its non-zero exit code.
pub trait Probe {
    fn probe(&self, command: &str) -> Result<i32>;
}

impl<F> Probe for F
where
    F: Fn(&str) -> Result<i32>,
{
    fn probe(&self, command: &str) -> Result<i32> {
        self(command)
    }
}

/// Evaluates dependency trees against one facts snapshot
pub struct DependencyEvaluator<'a, P: Probe + ?Sized> {
    facts: &'a Facts,
    policy: UnsupportedPolicy,
    probe: &'a P,
}

impl<'a, P: Probe + ?Sized> DependencyEvaluator<'a, P> {
    pub fn new(facts: &'a Facts, policy: UnsupportedPolicy, probe: &'a P) -> Self {
        Self {
            facts,
            policy,
            probe,
        }
    }

    /// Evaluate a single root node.
    ///
    /// A bare `Not` marker carries no condition and evaluates to true.
    pub fn evaluate(&self, node: &DependencyNode) -> Result<bool> {
        Ok(self.raw(node)?.unwrap_or(true))
    }

    /// Evaluate a list of roots with the sibling negation rule, one result
    /// per non-marker root
    pub fn evaluate_roots(&self, roots: &[DependencyNode]) -> Result<Vec<bool>> {
        self.evaluate_siblings(roots)
    }

    /// Walk a sibling list, applying each `Not` marker to the next sibling only
    fn evaluate_siblings(&self, nodes: &[DependencyNode]) -> Result<Vec<bool>> {
        let mut results = Vec::with_capacity(nodes.len());
        let mut negate = false;
        for node in nodes {
            match self.raw(node)? {
                None => negate = !negate,
                Some(raw) => {
                    results.push(raw ^ negate);
                    negate = false;
                }
            }
        }
        Ok(results)
    }

    /// Raw result of one node; `None` for a negation marker
    fn raw(&self, node: &DependencyNode) -> Result<Option<bool>> {
        let verdict = match node {
            DependencyNode::Not => return Ok(None),
            DependencyNode::And(children) => {
                self.evaluate_siblings(children)?.into_iter().all(|r| r)
            }
            DependencyNode::Or(children) => {
                self.evaluate_siblings(children)?.into_iter().any(|r| r)
            }
            DependencyNode::Predicate { key, value } => self.predicate(key, value)?,
            DependencyNode::ExternalProbe {
                command,
                allowed_exit_codes,
            } => self.external(command, allowed_exit_codes)?,
        };
        Ok(Some(verdict))
    }

    fn predicate(&self, key: &str, value: &str) -> Result<bool> {
        if key == keys::EXTERNAL_DETECTION {
            let code = self.probe.probe(value)?;
            return Ok(code == EXTERNAL_DETECTION_SUCCESS);
        }
        match self.facts.get(key) {
            Some(values) => {
                let pass = values.iter().any(|fact| fact.starts_with(value));
                debug!(key, value, pass, "Predicate evaluated");
                Ok(pass)
            }
            None => {
                let pass = self.policy.verdict();
                debug!(key, value, pass, "Unsupported predicate");
                Ok(pass)
            }
        }
    }

    fn external(&self, command: &str, allowed: &BTreeSet<i32>) -> Result<bool> {
        let code = self.probe.probe(command)?;
        let pass = allowed.contains(&code);
        debug!(command, code, pass, "External probe evaluated");
        Ok(pass)
    }
}
