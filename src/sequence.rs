//! Ordered view over mixed-content entries
//!
//! A [`Sequence`] is how callers read a mixed-content property, both the
//! live one (via [`DataGraph::sequence`](crate::graph::DataGraph::sequence))
//! and the pre-recording one (via
//! [`ChangeSummary::old_sequence`](crate::summary::ChangeSummary::old_sequence)).

use crate::types::{MixedEntry, PropertyId, Value};

/// Ordered, heterogeneous `(property, value)` pairs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sequence {
    entries: Vec<MixedEntry>,
}

impl Sequence {
    /// Wrap entries in a sequence
    pub fn new(entries: Vec<MixedEntry>) -> Self {
        Self { entries }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the sequence has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Property of the entry at `index`
    pub fn property(&self, index: usize) -> Option<PropertyId> {
        self.entries.get(index).map(|e| e.property)
    }

    /// Value of the entry at `index`
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.entries.get(index).map(|e| &e.value)
    }

    /// Iterate over the entries in order
    pub fn iter(&self) -> std::slice::Iter<'_, MixedEntry> {
        self.entries.iter()
    }

    /// Values belonging to one property, in sequence order
    pub fn values_of(&self, property: PropertyId) -> Vec<Value> {
        self.entries
            .iter()
            .filter(|e| e.property == property)
            .map(|e| e.value.clone())
            .collect()
    }

    /// Distinct properties in order of first appearance
    pub fn properties(&self) -> Vec<PropertyId> {
        let mut seen = Vec::new();
        for entry in &self.entries {
            if !seen.contains(&entry.property) {
                seen.push(entry.property);
            }
        }
        seen
    }

    /// The underlying entries
    pub fn entries(&self) -> &[MixedEntry] {
        &self.entries
    }

    /// Convert back into a slot value
    pub fn into_value(self) -> Value {
        Value::Mixed(self.entries)
    }
}

impl From<Vec<MixedEntry>> for Sequence {
    fn from(entries: Vec<MixedEntry>) -> Self {
        Self::new(entries)
    }
}

impl<'a> IntoIterator for &'a Sequence {
    type Item = &'a MixedEntry;
    type IntoIter = std::slice::Iter<'a, MixedEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
