//! Trend labels and snapshots: the values a refresh cycle produces.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::regions::{RegionCode, RegionRegistry};

/// The label recorded for a region that produced no usable entry this cycle.
pub const NO_DATA: &str = "No data";

/// Text associated with one region for one refresh cycle.
///
/// Empty and whitespace-only input normalizes to [`NO_DATA`].
///
/// # Examples
///
/// ```
/// use trendmap::trends::TrendLabel;
///
/// assert!(TrendLabel::new("   ").is_no_data());
/// assert_eq!(TrendLabel::new(" eclipse ").as_str(), "eclipse");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct TrendLabel(String);

impl TrendLabel {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            Self::no_data()
        } else if trimmed.len() == text.len() {
            Self(text)
        } else {
            Self(trimmed.to_owned())
        }
    }

    pub fn no_data() -> Self {
        Self(NO_DATA.to_owned())
    }

    pub fn is_no_data(&self) -> bool {
        self.0 == NO_DATA
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TrendLabel {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<TrendLabel> for String {
    fn from(label: TrendLabel) -> Self {
        label.0
    }
}

impl fmt::Display for TrendLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A slot the snapshot could not be assembled without.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("no label produced for region {0}")]
pub struct MissingRegion(pub RegionCode);

/// Total mapping from every region in a registry to exactly one label.
///
/// Snapshots are rebuilt from scratch each cycle and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrendSnapshot(BTreeMap<RegionCode, TrendLabel>);

impl TrendSnapshot {
    /// Assembles a snapshot keyed by exactly the codes in `registry`.
    ///
    /// Labels for codes outside the registry are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`MissingRegion`] naming the first registry code with no label.
    pub fn assemble(
        registry: &RegionRegistry,
        mut labels: BTreeMap<RegionCode, TrendLabel>,
    ) -> Result<Self, MissingRegion> {
        let mut slots = BTreeMap::new();
        for code in registry.codes() {
            let label = labels
                .remove(code)
                .ok_or_else(|| MissingRegion(code.clone()))?;
            slots.insert(code.clone(), label);
        }
        Ok(Self(slots))
    }

    pub fn get(&self, code: &RegionCode) -> Option<&TrendLabel> {
        self.0.get(code)
    }

    /// Looks a label up by its code's string form.
    pub fn label_for(&self, code: &str) -> Option<&TrendLabel> {
        self.0.get(&RegionCode::new(code))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RegionCode, &TrendLabel)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `true` when the key set equals the registry's key set.
    pub fn covers(&self, registry: &RegionRegistry) -> bool {
        self.0.len() == registry.len() && registry.codes().all(|code| self.0.contains_key(code))
    }

    pub fn no_data_count(&self) -> usize {
        self.0.values().filter(|label| label.is_no_data()).count()
    }

    /// Unique real labels in sorted order, followed by the sentinel if any
    /// region carries it.
    pub fn distinct_labels(&self) -> Vec<&TrendLabel> {
        let mut sentinel = None;
        let mut real = BTreeSet::new();
        for label in self.0.values() {
            if label.is_no_data() {
                sentinel = Some(label);
            } else {
                real.insert(label);
            }
        }
        real.into_iter().chain(sentinel).collect()
    }
}
