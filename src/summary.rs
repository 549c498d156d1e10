//! The change summary: public handle over a recording session
//!
//! A [`ChangeSummary`] owns a [`ChangeLog`] and, while logging, a
//! [`ChangeRecorder`] registered on the graph. Queries answer questions
//! about the session relative to the live graph, which is why most of them
//! take the graph as an argument.
//!
//! ## Lifecycle
//!
//! ```text
//! inactive --begin_logging--> recording --end_logging--> inactive
//!     ^                          |   ^                       |
//!     |                          |   +----resume_logging-----+
//!     +--------apply-------------+ (undo_changes ends first)
//! ```
//!
//! Ending a session without applying it keeps the edits and discards the
//! need to revert them; applying reverts the graph and clears the log.

use crate::apply::UndoEngine;
use crate::change_log::{ChangeLog, Consolidation, FeatureChange, SessionState};
use crate::collections::HashSet;
use crate::error::{Result, RewindError};
use crate::graph::DataGraph;
use crate::recorder::ChangeRecorder;
use crate::sequence::Sequence;
use crate::types::{ApplyResult, NodeId, ObserverId, PropertyId, SummaryConfig, SummaryStats};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Records changes to a [`DataGraph`] and can revert them
///
/// # Examples
///
/// ```rust
/// use rewind::{ChangeSummary, DataGraph, Value};
/// use rewind::schema::{DataType, PropertyDescriptor, Schema};
/// use std::sync::Arc;
///
/// let schema = Schema::builder()
///     .add_type("Person", vec![PropertyDescriptor::attribute("name", DataType::String)])
///     .build()?;
/// let mut graph = DataGraph::new(Arc::new(schema), "Person")?;
/// let root = graph.root();
/// let name = graph.property_id(root, "name")?;
/// graph.set(root, name, "foo")?;
///
/// let mut summary = ChangeSummary::new();
/// summary.begin_logging(&mut graph)?;
/// graph.set(root, name, "bar")?;
/// summary.end_logging(&mut graph)?;
///
/// let old = summary.old_value(&graph, root, name)?.expect("name changed");
/// assert_eq!(old.value, Value::from("foo"));
///
/// summary.apply(&mut graph)?;
/// assert_eq!(graph.get(root, name)?, Value::from("foo"));
/// # Ok::<(), rewind::RewindError>(())
/// ```
pub struct ChangeSummary {
    log: Arc<Mutex<ChangeLog>>,
    config: SummaryConfig,
    recorder: Option<ObserverId>,
}

impl std::fmt::Debug for ChangeSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let log = self.log.lock();
        f.debug_struct("ChangeSummary")
            .field("config", &self.config)
            .field("state", &log.state())
            .field("session", &log.session().map(|s| s.id))
            .field("touched_nodes", &log.touched_nodes().count())
            .finish()
    }
}

impl Default for ChangeSummary {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeSummary {
    /// Create a summary with the default configuration
    pub fn new() -> Self {
        Self::with_config(SummaryConfig::default())
    }

    /// Create a summary with a custom configuration
    pub fn with_config(config: SummaryConfig) -> Self {
        Self {
            log: Arc::new(Mutex::new(ChangeLog::new())),
            config,
            recorder: None,
        }
    }

    /// Start building a summary
    pub fn builder() -> ChangeSummaryBuilder {
        ChangeSummaryBuilder::new()
    }

    /// Active configuration
    pub fn config(&self) -> &SummaryConfig {
        &self.config
    }

    /// Whether a session is recording
    pub fn is_logging(&self) -> bool {
        self.log.lock().state() == SessionState::Recording
    }

    /// Id of the current or most recent session
    pub fn session_id(&self) -> Option<Uuid> {
        self.log.lock().session().map(|s| s.id)
    }

    /// When the current or most recent session began
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.log.lock().session().map(|s| s.started_at)
    }

    /// Start recording changes under the graph root
    pub fn begin_logging(&mut self, graph: &mut DataGraph) -> Result<()> {
        let root = graph.root();
        self.begin_logging_from(graph, &[root])
    }

    /// Start recording changes under the given roots
    ///
    /// Clears anything recorded by a previous session.
    ///
    /// # Errors
    ///
    /// - [`RewindError::AlreadyRecording`] if a session is active
    /// - [`RewindError::NodeNotFound`] if a root does not exist
    #[instrument(skip(self, graph))]
    pub fn begin_logging_from(&mut self, graph: &mut DataGraph, roots: &[NodeId]) -> Result<()> {
        if self.is_logging() {
            return Err(RewindError::AlreadyRecording);
        }
        for root in roots {
            graph.type_of(*root)?;
        }

        let tracked = closure(graph, roots);
        let baseline: HashSet<NodeId> = tracked.iter().copied().collect();
        self.log.lock().reset(roots.to_vec(), baseline);
        self.attach(graph, &tracked);

        info!(
            "Began logging session {:?} over {} nodes",
            self.session_id(),
            tracked.len()
        );
        Ok(())
    }

    /// Restart recording without discarding what was recorded so far
    ///
    /// Without a previous session this behaves like [`Self::begin_logging`].
    #[instrument(skip_all)]
    pub fn resume_logging(&mut self, graph: &mut DataGraph) -> Result<()> {
        if self.is_logging() {
            return Err(RewindError::AlreadyRecording);
        }
        let previous = self.log.lock().session().map(|s| s.roots.clone());
        let Some(roots) = previous else {
            return self.begin_logging(graph);
        };

        let tracked = closure(graph, &roots);
        {
            // Nodes that joined the tree while nothing was recording count as
            // pre-existing; they were never seen being created.
            let mut log = self.log.lock();
            let unseen: Vec<NodeId> = tracked
                .iter()
                .copied()
                .filter(|n| !log.in_baseline(*n) && !log.attached().any(|a| a == *n))
                .collect();
            log.extend_baseline(unseen);
        }
        self.attach(graph, &tracked);
        info!("Resumed logging over {} nodes", tracked.len());
        Ok(())
    }

    /// Stop recording; the log is kept for queries and undo
    ///
    /// # Errors
    ///
    /// [`RewindError::NotRecording`] if no session is active.
    #[instrument(skip_all)]
    pub fn end_logging(&mut self, graph: &mut DataGraph) -> Result<()> {
        if !self.is_logging() {
            return Err(RewindError::NotRecording);
        }
        if let Some(id) = self.recorder.take() {
            graph.unregister_observer(id);
        }
        let mut log = self.log.lock();
        log.set_state(SessionState::Inactive);
        log.set_suspended(false);
        info!(
            "Ended logging with {} touched nodes",
            log.touched_nodes().count()
        );
        Ok(())
    }

    /// Stop recording notifications while keeping the session active
    pub fn suspend_recording(&self) {
        self.log.lock().set_suspended(true);
    }

    /// Resume recording after [`Self::suspend_recording`]
    pub fn resume_recording(&self) {
        self.log.lock().set_suspended(false);
    }

    /// Whether recording is suspended
    pub fn is_suspended(&self) -> bool {
        self.log.lock().is_suspended()
    }

    /// Consolidate while recording
    ///
    /// # Errors
    ///
    /// [`RewindError::NotRecording`] if no session is active.
    pub fn summarize(&self, graph: &DataGraph) -> Result<Consolidation> {
        if !self.is_logging() {
            return Err(RewindError::NotRecording);
        }
        self.consolidate(graph)
    }

    /// Reduce the log to the minimal diff against the pre-recording state
    ///
    /// Allowed during and after a session; repeated calls are idempotent.
    ///
    /// # Errors
    ///
    /// [`RewindError::NotRecording`] if there has never been a session.
    pub fn consolidate(&self, graph: &DataGraph) -> Result<Consolidation> {
        let mut log = self.log.lock();
        if log.session().is_none() {
            return Err(RewindError::NotRecording);
        }
        log.consolidate(graph.store(), self.config.prune_unchanged)
    }

    /// Whether `node` entered the tracked tree during the session
    pub fn is_created(&self, node: NodeId) -> bool {
        self.log.lock().is_created(node)
    }

    /// Whether `node` is no longer reachable from the tracked roots
    pub fn is_deleted(&self, graph: &DataGraph, node: NodeId) -> bool {
        self.log.lock().deleted(graph).contains(&node)
    }

    /// Whether a pre-existing, still attached node had properties changed
    pub fn is_modified(&self, graph: &DataGraph, node: NodeId) -> bool {
        let mut log = self.log.lock();
        if log.raw_changes(node).is_empty() || log.is_created(node) {
            return false;
        }
        !log.deleted(graph).contains(&node)
    }

    /// Nodes that entered the tracked tree, in order of first entry
    pub fn created_objects(&self) -> Vec<NodeId> {
        self.log.lock().created()
    }

    /// Nodes no longer reachable from the tracked roots
    pub fn deleted_objects(&self, graph: &DataGraph) -> Vec<NodeId> {
        self.log.lock().deleted(graph).iter().copied().collect()
    }

    /// Every node touched during the session, without duplicates
    pub fn changed_objects(&self, graph: &DataGraph) -> Vec<NodeId> {
        self.log.lock().changed_objects(graph)
    }

    /// Pre-recording state of every changed property of `node`
    ///
    /// Mixed content is expanded into one entry per member property that
    /// had content plus one for the whole sequence. Empty if nothing changed.
    pub fn old_values(&self, graph: &DataGraph, node: NodeId) -> Result<Vec<FeatureChange>> {
        self.log.lock().old_values(graph.store(), node)
    }

    /// Pre-recording state of one property, if it changed
    pub fn old_value(
        &self,
        graph: &DataGraph,
        node: NodeId,
        property: PropertyId,
    ) -> Result<Option<FeatureChange>> {
        Ok(self
            .old_values(graph, node)?
            .into_iter()
            .find(|c| c.property == property))
    }

    /// Pre-recording mixed-content sequence of `node`, if it changed
    pub fn old_sequence(&self, graph: &DataGraph, node: NodeId) -> Result<Option<Sequence>> {
        let type_id = graph.type_of(node)?;
        let Some(mixed) = graph.schema().mixed_property(type_id) else {
            return Ok(None);
        };
        Ok(self
            .old_value(graph, node, mixed)?
            .and_then(|c| c.value.as_mixed().map(|entries| Sequence::new(entries.to_vec()))))
    }

    /// Container `node` had before recording began
    ///
    /// `None` for created nodes and for nodes that had no container.
    pub fn old_container(&self, graph: &DataGraph, node: NodeId) -> Result<Option<NodeId>> {
        Ok(self.old_containment(graph, node)?.map(|(container, _)| container))
    }

    /// Containment property that held `node` before recording began
    pub fn old_containment_property(&self, graph: &DataGraph, node: NodeId) -> Result<Option<PropertyId>> {
        Ok(self.old_containment(graph, node)?.map(|(_, property)| property))
    }

    fn old_containment(&self, graph: &DataGraph, node: NodeId) -> Result<Option<(NodeId, PropertyId)>> {
        let mut log = self.log.lock();
        if log.is_created(node) {
            return Ok(None);
        }
        if let Some(old) = log.old_containment(graph)?.get(&node) {
            return Ok(Some(*old));
        }
        Ok(graph.container(node))
    }

    /// Counts over the consolidated view
    pub fn stats(&self, graph: &DataGraph) -> SummaryStats {
        self.log.lock().stats(graph)
    }

    /// Revert every recorded change and clear the log
    ///
    /// # Errors
    ///
    /// - [`RewindError::ApplyDuringRecording`] while a session is active
    /// - [`RewindError::NotRecording`] if there has never been a session
    /// - [`RewindError::UndoInconsistent`] if verification is enabled and
    ///   the reverted graph does not match the pre-recording tree
    ///
    /// Any other error leaves the graph partially reverted; discard it.
    #[instrument(skip_all)]
    pub fn apply(&mut self, graph: &mut DataGraph) -> Result<ApplyResult> {
        if self.is_logging() {
            return Err(RewindError::ApplyDuringRecording);
        }
        let mut log = self.log.lock();
        if log.session().is_none() {
            return Err(RewindError::NotRecording);
        }
        let result = UndoEngine::new(graph, &self.config).run(&mut log);
        if let Err(e) = &result {
            warn!("Undo aborted: {}", e);
        }
        result
    }

    /// End the session if needed, then revert every recorded change
    pub fn undo_changes(&mut self, graph: &mut DataGraph) -> Result<ApplyResult> {
        if self.is_logging() {
            self.end_logging(graph)?;
        }
        self.apply(graph)
    }

    fn attach(&mut self, graph: &mut DataGraph, tracked: &[NodeId]) {
        let recorder = ChangeRecorder::new(self.log.clone(), self.config.clone());
        let id = graph.register_observer(Box::new(recorder));
        for node in tracked {
            graph.subscribe(id, *node);
        }
        self.recorder = Some(id);
        self.log.lock().set_state(SessionState::Recording);
        debug!("Recorder {:?} subscribed to {} nodes", id, tracked.len());
    }
}

/// Containment closure of `roots`, without duplicates
fn closure(graph: &DataGraph, roots: &[NodeId]) -> Vec<NodeId> {
    let mut seen = HashSet::default();
    let mut nodes = Vec::new();
    for root in roots {
        for node in graph.contents(*root) {
            if seen.insert(node) {
                nodes.push(node);
            }
        }
    }
    nodes
}

/// Builder for [`ChangeSummary`]
///
/// # Examples
///
/// ```rust
/// use rewind::ChangeSummaryBuilder;
///
/// let summary = ChangeSummaryBuilder::new()
///     .prune_unchanged(false)
///     .strict_read_only(false)
///     .build();
/// assert!(!summary.config().prune_unchanged);
/// assert!(summary.config().verify_undo);
/// ```
///
/// # Default Values
///
/// - `prune_unchanged`: true
/// - `verify_undo`: true
/// - `strict_read_only`: true
#[derive(Debug, Default)]
pub struct ChangeSummaryBuilder {
    config: SummaryConfig,
}

impl ChangeSummaryBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop consolidated changes that ended back at their prior state
    pub fn prune_unchanged(mut self, prune: bool) -> Self {
        self.config.prune_unchanged = prune;
        self
    }

    /// Check tree consistency after undo
    pub fn verify_undo(mut self, verify: bool) -> Self {
        self.config.verify_undo = verify;
        self
    }

    /// Veto read-only writes instead of recording them with a warning
    pub fn strict_read_only(mut self, strict: bool) -> Self {
        self.config.strict_read_only = strict;
        self
    }

    /// Build the summary
    pub fn build(self) -> ChangeSummary {
        ChangeSummary::with_config(self.config)
    }
}
