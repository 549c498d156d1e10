//! The change log: raw records, consolidation and derived views
//!
//! The log stores, per touched node, the chronological list of prior states
//! captured by the recorder, plus the nodes that entered (`attached`) or
//! left (`detached`) the tracked tree. Nothing is collapsed while recording;
//! [`ChangeLog::consolidate`] reduces each node's list to the earliest prior
//! state per property, which is exactly the pre-recording state.
//!
//! Derived views are cached behind explicit tokens:
//!
//! - the deleted set and old containment depend on the live graph, so they
//!   key on `(log revision, graph generation)`
//! - mixed-content expansion depends only on the log, so it keys on the log
//!   revision
//!
//! Every record, consolidation or reset bumps the revision, which discards
//! stale caches on the next query.

use crate::collections::{HashMap, HashSet, IndexMap, IndexSet};
use crate::error::Result;
use crate::graph::{DataGraph, NodeStore};
use crate::schema::PropertyKind;
use crate::types::{NodeId, PropertyId, SummaryStats, Value};
use chrono::{DateTime, Utc};
use tracing::{debug, trace};
use uuid::Uuid;

/// One recorded prior state of one property of one node
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureChange {
    /// Node whose property changed
    pub node: NodeId,
    /// The property
    pub property: PropertyId,
    /// Value immediately before the change
    pub value: Value,
    /// Whether the property was set immediately before the change
    pub is_set: bool,
}

/// Recording state of a log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No recorder attached
    Inactive,
    /// A recorder is attached and appending
    Recording,
}

/// Identity of a recording session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Unique session id
    pub id: Uuid,
    /// When `begin_logging` was called
    pub started_at: DateTime<Utc>,
    /// Roots whose containment closure is tracked
    pub roots: Vec<NodeId>,
}

#[derive(Debug)]
struct GraphCache<T> {
    revision: u64,
    generation: u64,
    value: T,
}

impl<T: Default> GraphCache<T> {
    fn empty() -> Self {
        Self {
            revision: u64::MAX,
            generation: u64::MAX,
            value: T::default(),
        }
    }

    fn is_stale(&self, revision: u64, generation: u64) -> bool {
        self.revision != revision || self.generation != generation
    }
}

/// Outcome of a consolidation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Consolidation {
    /// Raw records before the pass
    pub raw_changes: usize,
    /// Records kept
    pub kept_changes: usize,
    /// Records dropped because the property is back at its prior state
    pub pruned_changes: usize,
    /// Nodes left with at least one change
    pub nodes: usize,
}

/// Per-node change lists plus attach/detach bookkeeping
#[derive(Debug)]
pub struct ChangeLog {
    changes: IndexMap<NodeId, Vec<FeatureChange>>,
    attached: IndexSet<NodeId>,
    detached: Vec<NodeId>,
    baseline: HashSet<NodeId>,
    session: Option<SessionInfo>,
    state: SessionState,
    suspended: bool,
    revision: u64,
    deleted: GraphCache<IndexSet<NodeId>>,
    old_containment: GraphCache<HashMap<NodeId, (NodeId, PropertyId)>>,
    expanded: HashMap<NodeId, Vec<FeatureChange>>,
    expanded_revision: u64,
}

impl Default for ChangeLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeLog {
    /// Create an empty, inactive log
    pub fn new() -> Self {
        Self {
            changes: IndexMap::default(),
            attached: IndexSet::default(),
            detached: Vec::new(),
            baseline: HashSet::default(),
            session: None,
            state: SessionState::Inactive,
            suspended: false,
            revision: 0,
            deleted: GraphCache::empty(),
            old_containment: GraphCache::empty(),
            expanded: HashMap::default(),
            expanded_revision: 0,
        }
    }

    /// Current recording state
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    /// The current or most recent session
    pub fn session(&self) -> Option<&SessionInfo> {
        self.session.as_ref()
    }

    /// Whether notifications are currently ignored
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub(crate) fn set_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
    }

    /// Monotonic revision, bumped on every mutation of the log
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Start a fresh session: clears every record and cache
    pub(crate) fn reset(&mut self, roots: Vec<NodeId>, baseline: HashSet<NodeId>) {
        self.changes.clear();
        self.attached.clear();
        self.detached.clear();
        self.baseline = baseline;
        self.suspended = false;
        self.session = Some(SessionInfo {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            roots,
        });
        self.touch();
    }

    /// Add nodes to the pre-recording baseline (used when resuming)
    pub(crate) fn extend_baseline(&mut self, nodes: impl IntoIterator<Item = NodeId>) {
        self.baseline.extend(nodes);
        self.touch();
    }

    /// Drop all records after an undo; the session identity is kept
    pub(crate) fn clear_records(&mut self) {
        self.changes.clear();
        self.attached.clear();
        self.detached.clear();
        self.touch();
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    pub(crate) fn record(&mut self, change: FeatureChange) {
        trace!("Recording prior state of {}.{}", change.node, change.property.0);
        self.changes.entry(change.node).or_default().push(change);
        self.touch();
    }

    pub(crate) fn record_attached(&mut self, node: NodeId) {
        self.attached.insert(node);
        self.touch();
    }

    pub(crate) fn record_detached(&mut self, node: NodeId) {
        self.detached.push(node);
        self.touch();
    }

    /// Nodes with at least one record, in order of first touch
    pub fn touched_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.changes.keys().copied()
    }

    /// Raw (or, after consolidation, minimal) records of a node
    pub fn raw_changes(&self, node: NodeId) -> &[FeatureChange] {
        self.changes.get(&node).map_or(&[], Vec::as_slice)
    }

    /// Nodes that entered the tracked tree, in order of first entry
    pub fn attached(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.attached.iter().copied()
    }

    /// Nodes removed directly from the tracked tree, in removal order
    pub fn detached(&self) -> &[NodeId] {
        &self.detached
    }

    /// Whether `node` was part of the tracked tree when recording began
    pub fn in_baseline(&self, node: NodeId) -> bool {
        self.baseline.contains(&node)
    }

    /// Whether `node` entered the tracked tree during the session
    ///
    /// Nodes that were already tracked when recording began and were only
    /// moved around are not created.
    pub fn is_created(&self, node: NodeId) -> bool {
        self.attached.contains(&node) && !self.baseline.contains(&node)
    }

    /// Created nodes, in order of first entry
    pub fn created(&self) -> Vec<NodeId> {
        self.attached
            .iter()
            .copied()
            .filter(|n| !self.baseline.contains(n))
            .collect()
    }

    /// Reduce every node's records to the earliest prior state per property
    ///
    /// With `prune_unchanged`, records whose prior state equals the live
    /// state are dropped, and nodes left without records disappear from the
    /// log. Running the pass twice gives the same result as running it once.
    pub fn consolidate(&mut self, store: &NodeStore, prune_unchanged: bool) -> Result<Consolidation> {
        let mut report = Consolidation::default();
        let mut consolidated = IndexMap::default();

        for (node, records) in self.changes.drain(..) {
            report.raw_changes += records.len();
            let mut kept = Vec::new();
            for change in earliest_per_property(&records) {
                if prune_unchanged && matches_live(store, &change)? {
                    report.pruned_changes += 1;
                    continue;
                }
                kept.push(change);
            }
            if !kept.is_empty() {
                report.kept_changes += kept.len();
                consolidated.insert(node, kept);
            }
        }

        report.nodes = consolidated.len();
        self.changes = consolidated;
        self.expanded.clear();
        self.touch();
        debug!(
            "Consolidated {} raw changes into {} across {} nodes ({} pruned)",
            report.raw_changes, report.kept_changes, report.nodes, report.pruned_changes
        );
        Ok(report)
    }

    /// Earliest prior state per property of a node, without mutating the log
    pub fn consolidated_changes(&self, node: NodeId) -> Vec<FeatureChange> {
        earliest_per_property(self.raw_changes(node))
    }

    /// Nodes no longer reachable from the session roots
    ///
    /// The candidates are the containment closures of every attached and
    /// detached node. A moved node is reachable and therefore not deleted.
    pub fn deleted(&mut self, graph: &DataGraph) -> &IndexSet<NodeId> {
        if self.deleted.is_stale(self.revision, graph.generation()) {
            let roots = self.roots();
            let store = graph.store();
            let mut deleted = IndexSet::default();
            for candidate in self.detached.iter().chain(self.attached.iter()) {
                for node in store.contents(*candidate) {
                    if !store.is_reachable(node, &roots) {
                        deleted.insert(node);
                    }
                }
            }
            trace!("Computed {} deleted nodes", deleted.len());
            self.deleted = GraphCache {
                revision: self.revision,
                generation: graph.generation(),
                value: deleted,
            };
        }
        &self.deleted.value
    }

    /// Container and containment property each node had before recording
    ///
    /// Reconstructed from the consolidated prior values of containment and
    /// mixed-content properties. Only nodes mentioned by those values appear.
    pub fn old_containment(&mut self, graph: &DataGraph) -> Result<&HashMap<NodeId, (NodeId, PropertyId)>> {
        if self.old_containment.is_stale(self.revision, graph.generation()) {
            let store = graph.store();
            let schema = store.schema();
            let mut map = HashMap::default();
            for (node, records) in &self.changes {
                let type_id = store.type_of(*node)?;
                for change in earliest_per_property(records) {
                    let descriptor = schema.property(type_id, change.property)?;
                    match descriptor.kind {
                        PropertyKind::ContainmentReference => {
                            for child in change.value.nodes() {
                                map.entry(child).or_insert((*node, change.property));
                            }
                        }
                        PropertyKind::MixedContent => {
                            for entry in change.value.as_mixed().unwrap_or_default() {
                                if !schema.property(type_id, entry.property)?.is_containment() {
                                    continue;
                                }
                                if let Some(child) = entry.value.as_node() {
                                    map.entry(child).or_insert((*node, entry.property));
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            self.old_containment = GraphCache {
                revision: self.revision,
                generation: graph.generation(),
                value: map,
            };
        }
        Ok(&self.old_containment.value)
    }

    /// Consolidated records of a node with mixed content expanded
    ///
    /// The record of a mixed-content property is replaced by one holding the
    /// whole old sequence, followed by one synthetic record per member
    /// property that had entries, carrying that member's slice of the
    /// sequence. The expansion is memoized until the log changes.
    pub fn old_values(&mut self, store: &NodeStore, node: NodeId) -> Result<Vec<FeatureChange>> {
        if self.expanded_revision != self.revision {
            self.expanded.clear();
            self.expanded_revision = self.revision;
        }
        if let Some(cached) = self.expanded.get(&node) {
            return Ok(cached.clone());
        }

        let records = self.consolidated_changes(node);
        if records.is_empty() {
            return Ok(records);
        }
        let expanded = expand_mixed(store, node, records)?;
        self.expanded.insert(node, expanded.clone());
        Ok(expanded)
    }

    /// Every node touched in any way: deleted, then attached, then modified
    pub fn changed_objects(&mut self, graph: &DataGraph) -> Vec<NodeId> {
        let mut result: IndexSet<NodeId> = self.deleted(graph).clone();
        result.extend(self.attached.iter().copied());
        result.extend(self.changes.keys().copied());
        result.into_iter().collect()
    }

    /// Counts over the consolidated view
    pub fn stats(&mut self, graph: &DataGraph) -> SummaryStats {
        let deleted = self.deleted(graph).clone();
        let created = self.created();
        let modified = self
            .changes
            .keys()
            .filter(|n| !deleted.contains(*n) && !created.contains(n))
            .count();
        let feature_changes = self
            .changes
            .values()
            .map(|records| earliest_per_property(records).len())
            .sum();
        SummaryStats {
            created: created.len(),
            deleted: deleted.len(),
            modified,
            feature_changes,
        }
    }

    /// Session roots, or nothing before the first session
    pub fn roots(&self) -> Vec<NodeId> {
        self.session
            .as_ref()
            .map(|s| s.roots.clone())
            .unwrap_or_default()
    }

    /// Consolidated records of every node, in order of first touch
    pub(crate) fn all_consolidated(&self) -> Vec<FeatureChange> {
        self.changes
            .values()
            .flat_map(|records| earliest_per_property(records))
            .collect()
    }
}

/// Keep the first record per property, preserving chronological order
fn earliest_per_property(records: &[FeatureChange]) -> Vec<FeatureChange> {
    let mut seen: Vec<PropertyId> = Vec::new();
    let mut kept = Vec::new();
    for change in records {
        if !seen.contains(&change.property) {
            seen.push(change.property);
            kept.push(change.clone());
        }
    }
    kept
}

fn matches_live(store: &NodeStore, change: &FeatureChange) -> Result<bool> {
    let slot = store.slot(change.node, change.property)?;
    Ok(slot.is_set == change.is_set && slot.value == change.value)
}

fn expand_mixed(store: &NodeStore, node: NodeId, records: Vec<FeatureChange>) -> Result<Vec<FeatureChange>> {
    let schema = store.schema();
    let type_id = store.type_of(node)?;
    let features = schema.features(type_id)?;
    let mut expanded = Vec::with_capacity(records.len());
    let mut members = Vec::new();

    for change in records {
        if !schema.property(type_id, change.property)?.is_mixed() {
            expanded.push(change);
            continue;
        }
        let entries = change.value.as_mixed().unwrap_or_default();
        for (index, descriptor) in features.iter().enumerate() {
            if descriptor.mixed_owner() != Some(change.property) {
                continue;
            }
            let member = PropertyId(index as u32);
            let values: Vec<Value> = entries
                .iter()
                .filter(|e| e.property == member)
                .map(|e| e.value.clone())
                .collect();
            if values.is_empty() {
                continue;
            }
            let value = if descriptor.many {
                Value::List(values)
            } else {
                values.into_iter().next().unwrap_or(Value::Null)
            };
            members.push(FeatureChange {
                node,
                property: member,
                value,
                is_set: true,
            });
        }
        expanded.push(change);
    }

    expanded.extend(members);
    Ok(expanded)
}
