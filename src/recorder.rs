//! The observer that feeds a [`ChangeLog`]
//!
//! A [`ChangeRecorder`] is registered on the graph for the duration of a
//! logging session. For every notification on a tracked node it:
//!
//! 1. enforces read-only properties (veto in strict mode, warning otherwise)
//! 2. follows containment: children entering the tracked tree are
//!    subscribed together with their contents, children leaving are
//!    unsubscribed
//! 3. appends the property's prior value and was-set flag to the log
//!
//! Step 1 and the bookkeeping for steps 2 and 3 happen in the check phase.
//! Subscriptions and the log only change once every observer has accepted
//! the change. While the log is suspended only step 2 runs, so the
//! subscription set stays aligned with the tree.

use crate::change_log::{ChangeLog, FeatureChange};
use crate::error::{Result, RewindError};
use crate::graph::{NodeStore, Slot};
use crate::notify::{Notification, NotifyContext, Observer};
use crate::schema::PropertyKind;
use crate::types::{ChangeKind, MixedEntry, NodeId, PropertyId, SummaryConfig, Value};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{trace, warn};

/// Records prior states of tracked nodes into a shared [`ChangeLog`]
pub struct ChangeRecorder {
    log: Arc<Mutex<ChangeLog>>,
    config: SummaryConfig,
    pending: Option<Pending>,
}

/// What an accepted change will do to subscriptions and the log
struct Pending {
    node: NodeId,
    property: PropertyId,
    kind: ChangeKind,
    leaving: Vec<NodeId>,
    entering: Vec<NodeId>,
    prior: Slot,
}

impl ChangeRecorder {
    /// Create a recorder appending to `log`
    pub fn new(log: Arc<Mutex<ChangeLog>>, config: SummaryConfig) -> Self {
        Self {
            log,
            config,
            pending: None,
        }
    }
}

impl Observer for ChangeRecorder {
    fn check(&mut self, store: &NodeStore, notification: &Notification) -> Result<()> {
        self.pending = None;
        let type_id = store.type_of(notification.node)?;
        let schema = store.schema();
        let descriptor = schema.property(type_id, notification.property)?;

        if descriptor.read_only {
            if self.config.strict_read_only {
                return Err(RewindError::ReadOnlyPropertyViolation {
                    type_name: schema.type_name(type_id).to_string(),
                    property: descriptor.name.clone(),
                });
            }
            warn!(
                "Recording write to read-only property {}",
                schema.label(type_id, notification.property)
            );
        }

        let (leaving, entering) = containment_delta(store, notification, descriptor.kind)?;
        self.pending = Some(Pending {
            node: notification.node,
            property: notification.property,
            kind: notification.kind,
            leaving,
            entering,
            prior: store.slot(notification.node, notification.property)?.clone(),
        });
        Ok(())
    }

    fn notify(&mut self, ctx: &mut NotifyContext<'_>, notification: &Notification) {
        let pending = match self.pending.take() {
            Some(p)
                if p.node == notification.node
                    && p.property == notification.property
                    && p.kind == notification.kind =>
            {
                p
            }
            _ => {
                warn!(
                    "Unchecked {:?} on {} reached the recorder; not recorded",
                    notification.kind, notification.node
                );
                return;
            }
        };

        for child in &pending.leaving {
            let dropped = ctx.unsubscribe_contents(*child);
            trace!("{} left the tracked tree ({} nodes unsubscribed)", child, dropped.len());
        }
        for child in &pending.entering {
            let added = ctx.subscribe_contents(*child);
            trace!("{} entered the tracked tree ({} nodes subscribed)", child, added.len());
        }

        let mut log = self.log.lock();
        if log.is_suspended() {
            return;
        }
        for child in pending.leaving {
            log.record_detached(child);
        }
        for child in pending.entering {
            log.record_attached(child);
        }
        log.record(FeatureChange {
            node: pending.node,
            property: pending.property,
            value: pending.prior.value,
            is_set: pending.prior.is_set,
        });
    }

    fn name(&self) -> &str {
        "change-recorder"
    }
}

/// Children leaving and entering a containment slot because of a change
fn containment_delta(
    store: &NodeStore,
    notification: &Notification,
    kind: PropertyKind,
) -> Result<(Vec<NodeId>, Vec<NodeId>)> {
    let owned = |value: &Value| -> Result<Vec<NodeId>> {
        match kind {
            PropertyKind::ContainmentReference => Ok(value.nodes()),
            PropertyKind::MixedContent => contained_entries(
                store,
                notification.node,
                value.as_mixed().unwrap_or_default(),
            ),
            _ => Ok(Vec::new()),
        }
    };

    match notification.kind {
        ChangeKind::Move => Ok((Vec::new(), Vec::new())),
        ChangeKind::Add => Ok((Vec::new(), owned(&notification.new_value)?)),
        ChangeKind::Remove => Ok((owned(&notification.old_value)?, Vec::new())),
        ChangeKind::Set | ChangeKind::Unset => {
            let before = owned(&notification.old_value)?;
            let after = owned(&notification.new_value)?;
            let leaving = before.iter().copied().filter(|n| !after.contains(n)).collect();
            let entering = after.into_iter().filter(|n| !before.contains(n)).collect();
            Ok((leaving, entering))
        }
    }
}

fn contained_entries(store: &NodeStore, node: NodeId, entries: &[MixedEntry]) -> Result<Vec<NodeId>> {
    let mut children = Vec::new();
    for entry in entries {
        if store.descriptor(node, entry.property)?.is_containment() {
            children.extend(entry.value.as_node());
        }
    }
    Ok(children)
}
