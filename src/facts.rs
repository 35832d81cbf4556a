//! Local machine facts
//!
//! An immutable key → values snapshot built once per run and passed by
//! reference into dependency evaluation. Reading the facts from the host is
//! somebody else's job; this module only holds them.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Well-known predicate keys
pub mod keys {
    /// Operating system tag (e.g. `WIN10`, `WIN11`)
    pub const OS: &str = "_OS";
    /// CPU address width (`32` or `64`)
    pub const CPU_ADDRESS_WIDTH: &str = "_CPUAddressWidth";
    /// BIOS version string
    pub const BIOS: &str = "_Bios";
    /// Present Plug and Play device identifiers
    pub const PNP_ID: &str = "_PnPID";
    /// Machine type / model prefix
    pub const MODEL: &str = "_Model";
    /// Sentinel: predicate value is a command to probe, never a fact lookup
    pub const EXTERNAL_DETECTION: &str = "_ExternalDetection";
}

/// Immutable snapshot of local facts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Facts {
    values: BTreeMap<String, BTreeSet<String>>,
}

impl Facts {
    pub fn builder() -> FactsBuilder {
        FactsBuilder::default()
    }

    /// Values recorded for a key, `None` when the key is not supported
    pub fn get(&self, key: &str) -> Option<&BTreeSet<String>> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Load a facts snapshot from a JSON object of `key -> [values]`
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read facts from {:?}", path.as_ref()))?;
        let facts: Self = serde_json::from_str(&content).context("Failed to parse facts JSON")?;
        tracing::info!(keys = facts.len(), "Loaded local facts");
        Ok(facts)
    }
}

/// Accumulates facts before freezing them into a [`Facts`] snapshot
#[derive(Debug, Default)]
pub struct FactsBuilder {
    values: BTreeMap<String, BTreeSet<String>>,
}

impl FactsBuilder {
    /// Add one value for a key
    pub fn value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.entry(key.into()).or_default().insert(value.into());
        self
    }

    /// Add several values for a key
    pub fn values<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values
            .entry(key.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> Facts {
        Facts {
            values: self.values,
        }
    }
}
