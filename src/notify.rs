//! Notification substrate
//!
//! Every mutation of a [`DataGraph`](crate::graph::DataGraph) produces a
//! [`Notification`] that is delivered synchronously to the observers
//! subscribed to the mutated node, before the change is applied. The
//! notification carries the old value and the was-set flag as they are at
//! that moment.
//!
//! Delivery has two phases. Every subscribed observer first gets
//! [`Observer::check`], where returning an error vetoes the change. Only
//! when all of them accept does [`Observer::notify`] run, so no observer
//! acts on a change that another one rejected.
//!
//! Subscriptions are kept in an explicit registry keyed by node identity.
//! Observers may subscribe to or unsubscribe from any node while a
//! notification is being delivered, through the [`NotifyContext`] they
//! receive.

use crate::collections::{HashMap, HashSet};
use crate::error::Result;
use crate::graph::NodeStore;
use crate::types::{ChangeKind, NodeId, ObserverId, PropertyId, Value};
use std::fmt;
use tracing::{debug, trace};

/// A single property change, described before it takes effect
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Node whose property changes
    pub node: NodeId,
    /// The changing property
    pub property: PropertyId,
    /// What kind of change this is
    pub kind: ChangeKind,
    /// Value being replaced or removed (for `Move`, the source index)
    pub old_value: Value,
    /// Value being written or inserted
    pub new_value: Value,
    /// List position for `Add`, `Remove` and `Move`
    pub position: Option<usize>,
    /// Whether the property was set before this change
    pub was_set: bool,
}

/// Receiver of property change notifications
///
/// # Examples
///
/// ```rust
/// use rewind::graph::NodeStore;
/// use rewind::notify::{Notification, NotifyContext, Observer};
/// use rewind::{ChangeKind, Result, RewindError};
///
/// #[derive(Default)]
/// struct Counter {
///     seen: usize,
/// }
///
/// impl Observer for Counter {
///     fn check(&mut self, _store: &NodeStore, n: &Notification) -> Result<()> {
///         if n.kind == ChangeKind::Unset {
///             return Err(RewindError::internal("unset is not allowed here"));
///         }
///         Ok(())
///     }
///
///     fn notify(&mut self, _ctx: &mut NotifyContext<'_>, _n: &Notification) {
///         self.seen += 1;
///     }
/// }
/// ```
pub trait Observer {
    /// Inspect a change nobody has acted on yet
    ///
    /// Returning an error vetoes the change; the error is returned to the
    /// caller of the mutating operation and the graph is left untouched.
    fn check(&mut self, store: &NodeStore, notification: &Notification) -> Result<()> {
        let _ = (store, notification);
        Ok(())
    }

    /// Handle a change every observer accepted, just before it is applied
    fn notify(&mut self, ctx: &mut NotifyContext<'_>, notification: &Notification);

    /// Name used in logs
    fn name(&self) -> &str {
        "observer"
    }
}

/// What an observer can see and do while handling a notification
pub struct NotifyContext<'a> {
    store: &'a NodeStore,
    subscriptions: &'a mut Subscriptions,
    observer: ObserverId,
}

impl<'a> NotifyContext<'a> {
    pub(crate) fn new(
        store: &'a NodeStore,
        subscriptions: &'a mut Subscriptions,
        observer: ObserverId,
    ) -> Self {
        Self {
            store,
            subscriptions,
            observer,
        }
    }

    /// Read access to the graph in its pre-change state
    pub fn store(&self) -> &'a NodeStore {
        self.store
    }

    /// Id of the observer being notified
    pub fn observer(&self) -> ObserverId {
        self.observer
    }

    /// Start observing `node`
    pub fn subscribe(&mut self, node: NodeId) -> bool {
        self.subscriptions.subscribe(self.observer, node)
    }

    /// Stop observing `node`
    pub fn unsubscribe(&mut self, node: NodeId) -> bool {
        self.subscriptions.unsubscribe(self.observer, node)
    }

    /// Observe `node` and everything it contains; returns the nodes reached
    pub fn subscribe_contents(&mut self, node: NodeId) -> Vec<NodeId> {
        let contents = self.store.contents(node);
        for id in &contents {
            self.subscriptions.subscribe(self.observer, *id);
        }
        contents
    }

    /// Stop observing `node` and everything it contains
    pub fn unsubscribe_contents(&mut self, node: NodeId) -> Vec<NodeId> {
        let contents = self.store.contents(node);
        for id in &contents {
            self.subscriptions.unsubscribe(self.observer, *id);
        }
        contents
    }
}

/// Subscription registry keyed by node identity
#[derive(Debug, Default)]
pub struct Subscriptions {
    by_node: HashMap<NodeId, Vec<ObserverId>>,
    by_observer: HashMap<ObserverId, HashSet<NodeId>>,
}

impl Subscriptions {
    /// Subscribe; returns false if already subscribed
    pub fn subscribe(&mut self, observer: ObserverId, node: NodeId) -> bool {
        if !self.by_observer.entry(observer).or_default().insert(node) {
            return false;
        }
        self.by_node.entry(node).or_default().push(observer);
        true
    }

    /// Unsubscribe; returns false if not subscribed
    pub fn unsubscribe(&mut self, observer: ObserverId, node: NodeId) -> bool {
        let removed = self
            .by_observer
            .get_mut(&observer)
            .is_some_and(|nodes| nodes.remove(&node));
        if removed {
            if let Some(observers) = self.by_node.get_mut(&node) {
                observers.retain(|o| *o != observer);
                if observers.is_empty() {
                    self.by_node.remove(&node);
                }
            }
        }
        removed
    }

    /// Observers of `node`, in subscription order
    pub fn observers_of(&self, node: NodeId) -> Vec<ObserverId> {
        self.by_node.get(&node).cloned().unwrap_or_default()
    }

    /// Whether `observer` is subscribed to `node`
    pub fn is_subscribed(&self, observer: ObserverId, node: NodeId) -> bool {
        self.by_observer
            .get(&observer)
            .is_some_and(|nodes| nodes.contains(&node))
    }

    /// Number of nodes `observer` is subscribed to
    pub fn count(&self, observer: ObserverId) -> usize {
        self.by_observer.get(&observer).map_or(0, |nodes| nodes.len())
    }

    /// Drop every subscription of `observer`
    pub fn remove_observer(&mut self, observer: ObserverId) -> usize {
        let Some(nodes) = self.by_observer.remove(&observer) else {
            return 0;
        };
        for node in &nodes {
            if let Some(observers) = self.by_node.get_mut(node) {
                observers.retain(|o| *o != observer);
                if observers.is_empty() {
                    self.by_node.remove(node);
                }
            }
        }
        nodes.len()
    }
}

enum Slot {
    Vacant,
    Present(Box<dyn Observer>),
    Delivering,
}

/// Registered observers and their subscriptions
#[derive(Default)]
pub struct ObserverRegistry {
    slots: Vec<Slot>,
    pub(crate) subscriptions: Subscriptions,
}

impl fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let live = self
            .slots
            .iter()
            .filter(|s| !matches!(s, Slot::Vacant))
            .count();
        f.debug_struct("ObserverRegistry")
            .field("observers", &format!("<{} observers>", live))
            .field("subscriptions", &self.subscriptions)
            .finish()
    }
}

impl ObserverRegistry {
    /// Register an observer; it receives nothing until subscribed to nodes
    pub fn register(&mut self, observer: Box<dyn Observer>) -> ObserverId {
        if let Some(index) = self.slots.iter().position(|s| matches!(s, Slot::Vacant)) {
            self.slots[index] = Slot::Present(observer);
            return ObserverId(index as u32);
        }
        self.slots.push(Slot::Present(observer));
        ObserverId((self.slots.len() - 1) as u32)
    }

    /// Remove an observer and all of its subscriptions
    pub fn unregister(&mut self, id: ObserverId) -> Option<Box<dyn Observer>> {
        let slot = self.slots.get_mut(id.0 as usize)?;
        let observer = match std::mem::replace(slot, Slot::Vacant) {
            Slot::Present(observer) => Some(observer),
            Slot::Delivering | Slot::Vacant => None,
        };
        let dropped = self.subscriptions.remove_observer(id);
        trace!("Unregistered observer {:?} ({} subscriptions dropped)", id, dropped);
        observer
    }

    /// Whether `id` names a registered observer
    pub fn contains(&self, id: ObserverId) -> bool {
        matches!(
            self.slots.get(id.0 as usize),
            Some(Slot::Present(_) | Slot::Delivering)
        )
    }

    /// Ask every observer subscribed to the node whether the change may go ahead
    pub(crate) fn check(&mut self, store: &NodeStore, notification: &Notification) -> Result<()> {
        let observers = self.subscriptions.observers_of(notification.node);
        self.check_all(&observers, store, notification)
    }

    /// Deliver `notification` to every observer subscribed to its node
    ///
    /// Nothing is delivered unless every observer accepts the change.
    pub(crate) fn dispatch(&mut self, store: &NodeStore, notification: &Notification) -> Result<()> {
        let observers = self.subscriptions.observers_of(notification.node);
        self.check_all(&observers, store, notification)?;
        for id in observers {
            let Some(mut observer) = self.take(id) else {
                continue;
            };
            trace!(
                "Delivering {:?} on {} to {}",
                notification.kind,
                notification.node,
                observer.name()
            );
            {
                let mut ctx = NotifyContext::new(store, &mut self.subscriptions, id);
                observer.notify(&mut ctx, notification);
            }
            self.slots[id.0 as usize] = Slot::Present(observer);
        }
        Ok(())
    }

    fn check_all(
        &mut self,
        observers: &[ObserverId],
        store: &NodeStore,
        notification: &Notification,
    ) -> Result<()> {
        for id in observers {
            let Some(mut observer) = self.take(*id) else {
                continue;
            };
            let outcome = observer.check(store, notification);
            if let Err(err) = &outcome {
                debug!(
                    "{} vetoed {:?} on {}: {}",
                    observer.name(),
                    notification.kind,
                    notification.node,
                    err
                );
            }
            self.slots[id.0 as usize] = Slot::Present(observer);
            outcome?;
        }
        Ok(())
    }

    /// Move an observer out of its slot for the duration of a call
    fn take(&mut self, id: ObserverId) -> Option<Box<dyn Observer>> {
        let slot = self.slots.get_mut(id.0 as usize)?;
        match std::mem::replace(slot, Slot::Delivering) {
            Slot::Present(observer) => Some(observer),
            other => {
                // Vacant, or already handling an outer notification
                *slot = other;
                None
            }
        }
    }
}
