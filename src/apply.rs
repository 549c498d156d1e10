//! Reverting a graph to its pre-recording state
//!
//! The engine works from the consolidated log, where every record holds the
//! state a property had before recording began. Restoration runs in phases
//! so that no intermediate state violates the single-container rule:
//!
//! 1. containment: every changed containment and mixed-content slot is
//!    emptied first, then refilled with its prior contents
//! 2. everything else: attributes and cross-references get their prior
//!    value back, or are unset when they were unset
//! 3. verification (optional): created nodes must have left the tree and
//!    nodes removed during the session must be back in it
//!
//! Emptying all changed slots before refilling any of them means a child
//! that moved between two changed containers is never claimed by both.

use crate::change_log::{ChangeLog, FeatureChange};
use crate::error::{Result, RewindError};
use crate::graph::DataGraph;
use crate::types::{ApplyResult, SummaryConfig};
use std::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

/// Applies a consolidated change log in reverse
pub(crate) struct UndoEngine<'a> {
    graph: &'a mut DataGraph,
    config: &'a SummaryConfig,
    result: ApplyResult,
}

impl<'a> UndoEngine<'a> {
    pub(crate) fn new(graph: &'a mut DataGraph, config: &'a SummaryConfig) -> Self {
        Self {
            graph,
            config,
            result: ApplyResult::default(),
        }
    }

    /// Revert every recorded change and clear the log
    #[instrument(skip_all)]
    pub(crate) fn run(mut self, log: &mut ChangeLog) -> Result<ApplyResult> {
        let start = Instant::now();
        self.result.session_id = log.session().map(|s| s.id);

        log.consolidate(self.graph.store(), self.config.prune_unchanged)?;
        let changes = log.all_consolidated();
        info!("Reverting {} consolidated changes", changes.len());

        let mut structural = Vec::new();
        let mut plain = Vec::new();
        for change in changes {
            let descriptor = self.graph.store().descriptor(change.node, change.property)?;
            if descriptor.is_containment() || descriptor.is_mixed() {
                structural.push(change);
            } else {
                plain.push(change);
            }
        }

        let mut touched: Vec<_> = structural.iter().chain(&plain).map(|c| c.node).collect();
        touched.sort_unstable();
        touched.dedup();
        self.result.nodes_touched = touched.len();

        self.restore_containment(&structural)?;
        self.restore_properties(&plain)?;

        if self.config.verify_undo {
            self.verify(log)?;
        }

        log.clear_records();
        self.result.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Undo complete: {} containment slots, {} properties, {} nodes detached in {}ms",
            self.result.containment_restored,
            self.result.properties_restored,
            self.result.nodes_detached,
            self.result.duration_ms
        );
        Ok(self.result)
    }

    fn restore_containment(&mut self, changes: &[FeatureChange]) -> Result<()> {
        for change in changes {
            let empty = self
                .graph
                .store()
                .descriptor(change.node, change.property)?
                .unset_value();
            trace!("Emptying {}.{}", change.node, change.property.0);
            self.graph.set(change.node, change.property, empty)?;
        }
        for change in changes {
            self.restore(change)?;
            self.result.containment_restored += 1;
        }
        debug!("Restored {} containment slots", changes.len());
        Ok(())
    }

    fn restore_properties(&mut self, changes: &[FeatureChange]) -> Result<()> {
        for change in changes {
            self.restore(change)?;
            self.result.properties_restored += 1;
        }
        debug!("Restored {} properties", changes.len());
        Ok(())
    }

    fn restore(&mut self, change: &FeatureChange) -> Result<()> {
        if change.is_set {
            self.graph
                .set(change.node, change.property, change.value.clone())
        } else {
            self.graph.unset(change.node, change.property)
        }
    }

    fn verify(&mut self, log: &ChangeLog) -> Result<()> {
        let roots = log.roots();
        let store = self.graph.store();

        for node in log.created() {
            if store.is_reachable(node, &roots) {
                return Err(RewindError::UndoInconsistent(format!(
                    "created node {} is still attached after undo",
                    node
                )));
            }
            self.result.nodes_detached += 1;
        }

        for node in log.detached() {
            if log.is_created(*node) {
                continue;
            }
            if !store.is_reachable(*node, &roots) {
                if log.in_baseline(*node) {
                    return Err(RewindError::UndoInconsistent(format!(
                        "node {} was not restored to the tree",
                        node
                    )));
                }
                let message = format!("node {} left the tree but was never tracked from the start", node);
                warn!("{}", message);
                self.result.warnings.push(message);
            }
        }
        Ok(())
    }
}
