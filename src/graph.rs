//! The data object graph
//!
//! A [`DataGraph`] owns every node in a dense arena ([`NodeStore`]) and
//! addresses them by [`NodeId`]. Containment edges form a tree under the
//! graph root; each node records at most one `(container, property)` pair.
//! Cross-references are plain `Value::Node` entries and never own anything.
//!
//! All mutations go through the graph so that containment bookkeeping,
//! schema validation and notification stay in one place:
//!
//! 1. validate against the schema (kind, data type, reference targets,
//!    cycles)
//! 2. ask the target's observers whether the change may happen; a veto
//!    here leaves everything untouched
//! 3. detach children that are moving in from another container (this
//!    emits a `Remove` on the old parent first)
//! 4. deliver the [`Notification`] to subscribed observers; a veto at this
//!    point puts the detached children back
//! 5. write the slot, update container links and bump the generation
//!
//! Nodes are never freed. A node removed from the tree stays in the arena,
//! so a change log can always revert to it.
//!
//! ## Examples
//!
//! ```rust
//! use rewind::graph::DataGraph;
//! use rewind::schema::{DataType, PropertyDescriptor, Schema};
//! use std::sync::Arc;
//!
//! let schema = Schema::builder()
//!     .add_type("Folder", vec![
//!         PropertyDescriptor::attribute("name", DataType::String),
//!         PropertyDescriptor::containment("items", "Folder").many(),
//!     ])
//!     .build()?;
//!
//! let mut graph = DataGraph::new(Arc::new(schema), "Folder")?;
//! let root = graph.root();
//! let items = graph.property_id(root, "items")?;
//! let child = graph.create_node("Folder")?;
//! graph.add(root, items, child)?;
//! assert_eq!(graph.container(child), Some((root, items)));
//! # Ok::<(), rewind::RewindError>(())
//! ```

use crate::error::{Result, RewindError};
use crate::notify::{Notification, Observer, ObserverRegistry};
use crate::schema::{PropertyDescriptor, PropertyKind, Schema};
use crate::sequence::Sequence;
use crate::types::{ChangeKind, MixedEntry, NodeId, ObserverId, PropertyId, TypeId, Value};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Contents of one property of one node
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    /// Current value
    pub value: Value,
    /// Whether the property is set
    pub is_set: bool,
}

#[derive(Debug, Clone)]
struct NodeData {
    type_id: TypeId,
    slots: Vec<Slot>,
    container: Option<(NodeId, PropertyId)>,
}

/// Where a contained node sat, so a detach can be undone
#[derive(Debug, Clone, Copy)]
struct Placement {
    child: NodeId,
    parent: NodeId,
    /// The containment property, a mixed member for mixed content
    property: PropertyId,
    mixed: bool,
    /// Position in the list or sequence; `None` for single-valued slots
    index: Option<usize>,
}

/// Dense node arena with read-only graph queries
#[derive(Debug)]
pub struct NodeStore {
    schema: Arc<Schema>,
    nodes: Vec<NodeData>,
}

impl NodeStore {
    fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            nodes: Vec::new(),
        }
    }

    fn node(&self, id: NodeId) -> Result<&NodeData> {
        self.nodes.get(id.index()).ok_or(RewindError::NodeNotFound(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeData> {
        self.nodes
            .get_mut(id.index())
            .ok_or(RewindError::NodeNotFound(id))
    }

    /// The schema every node conforms to
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Number of nodes ever created
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check whether no nodes exist
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether `id` names a node of this store
    pub fn contains(&self, id: NodeId) -> bool {
        id.index() < self.nodes.len()
    }

    /// Type of a node
    pub fn type_of(&self, id: NodeId) -> Result<TypeId> {
        Ok(self.node(id)?.type_id)
    }

    /// Descriptor of a node's property
    pub fn descriptor(&self, id: NodeId, property: PropertyId) -> Result<&PropertyDescriptor> {
        self.schema.property(self.type_of(id)?, property)
    }

    /// Raw slot of a node's property
    ///
    /// Members of mixed content have no slot of their own; their slot is
    /// always empty and unset. Use [`NodeStore::get`] for their value.
    pub fn slot(&self, id: NodeId, property: PropertyId) -> Result<&Slot> {
        let node = self.node(id)?;
        node.slots
            .get(property.index())
            .ok_or_else(|| RewindError::UnknownProperty {
                type_name: self.schema.type_name(node.type_id).to_string(),
                property: property.0.to_string(),
            })
    }

    /// Current value of a property
    ///
    /// Mixed-content members are derived from the mixed sequence: a list of
    /// the matching entry values for many-valued members, the first matching
    /// value (or the default) otherwise.
    pub fn get(&self, id: NodeId, property: PropertyId) -> Result<Value> {
        let descriptor = self.descriptor(id, property)?;
        match descriptor.mixed_owner() {
            Some(mixed) => {
                let values = self.sequence(id, mixed)?.values_of(property);
                if descriptor.many {
                    Ok(Value::List(values))
                } else {
                    Ok(values.into_iter().next().unwrap_or_else(|| descriptor.default.clone()))
                }
            }
            None => Ok(self.slot(id, property)?.value.clone()),
        }
    }

    /// Whether a property is set
    pub fn is_set(&self, id: NodeId, property: PropertyId) -> Result<bool> {
        let descriptor = self.descriptor(id, property)?;
        match descriptor.mixed_owner() {
            Some(mixed) => Ok(self
                .sequence(id, mixed)?
                .iter()
                .any(|e| e.property == property)),
            None => Ok(self.slot(id, property)?.is_set),
        }
    }

    /// Mixed-content sequence held by `property`
    pub fn sequence(&self, id: NodeId, property: PropertyId) -> Result<Sequence> {
        match &self.slot(id, property)?.value {
            Value::Mixed(entries) => Ok(Sequence::new(entries.clone())),
            other => Err(RewindError::type_mismatch(
                self.schema.label(self.type_of(id)?, property),
                "mixed",
                other.kind_name(),
            )),
        }
    }

    /// Look up a property of a node's type by name
    pub fn property_id(&self, id: NodeId, name: &str) -> Result<PropertyId> {
        self.schema.property_id(self.type_of(id)?, name)
    }

    /// Current container and containment property of a node
    pub fn container(&self, id: NodeId) -> Option<(NodeId, PropertyId)> {
        self.nodes.get(id.index()).and_then(|n| n.container)
    }

    /// Direct children in property order (mixed entries in sequence order)
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        let Some(node) = self.nodes.get(id.index()) else {
            return Vec::new();
        };
        let Ok(features) = self.schema.features(node.type_id) else {
            return Vec::new();
        };
        let mut children = Vec::new();
        for (descriptor, slot) in features.iter().zip(&node.slots) {
            match descriptor.kind {
                PropertyKind::ContainmentReference if descriptor.mixed_owner().is_none() => {
                    children.extend(slot.value.nodes());
                }
                PropertyKind::MixedContent => {
                    if let Value::Mixed(entries) = &slot.value {
                        children.extend(
                            entries
                                .iter()
                                .filter(|e| features[e.property.index()].is_containment())
                                .filter_map(|e| e.value.as_node()),
                        );
                    }
                }
                _ => {}
            }
        }
        children
    }

    /// `id` and everything it transitively contains, in pre-order
    pub fn contents(&self, id: NodeId) -> Vec<NodeId> {
        if !self.contains(id) {
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            out.push(next);
            let children = self.children(next);
            stack.extend(children.into_iter().rev());
        }
        out
    }

    /// Whether `ancestor` is `id` or one of its containers
    pub fn is_ancestor_or_self(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.container(node).map(|(parent, _)| parent);
        }
        false
    }

    /// Whether `id` can be reached from any of `roots` through containment
    pub fn is_reachable(&self, id: NodeId, roots: &[NodeId]) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if roots.contains(&node) {
                return true;
            }
            current = self.container(node).map(|(parent, _)| parent);
        }
        false
    }
}

/// A mutable, typed, tree-shaped object graph with notification
#[derive(Debug)]
pub struct DataGraph {
    store: NodeStore,
    observers: ObserverRegistry,
    root: NodeId,
    generation: u64,
}

impl DataGraph {
    /// Create a graph whose root node has type `root_type`
    pub fn new(schema: Arc<Schema>, root_type: &str) -> Result<Self> {
        let mut graph = Self {
            store: NodeStore::new(schema),
            observers: ObserverRegistry::default(),
            root: NodeId(0),
            generation: 0,
        };
        graph.root = graph.create_node(root_type)?;
        debug!("Created data graph rooted at {} ({})", graph.root, root_type);
        Ok(graph)
    }

    /// Root of the containment tree
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Monotonic counter bumped by every applied change
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The schema every node conforms to
    pub fn schema(&self) -> &Arc<Schema> {
        self.store.schema()
    }

    /// Read-only view of the node arena
    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    /// Allocate a detached node of the named type with all properties unset
    pub fn create_node(&mut self, type_name: &str) -> Result<NodeId> {
        let type_id = self.store.schema.type_id(type_name)?;
        self.create_node_of(type_id)
    }

    /// Allocate a detached node of `type_id` with all properties unset
    pub fn create_node_of(&mut self, type_id: TypeId) -> Result<NodeId> {
        let slots = self
            .store
            .schema
            .features(type_id)?
            .iter()
            .map(|p| Slot {
                value: if p.mixed_owner().is_some() {
                    Value::Null
                } else {
                    p.unset_value()
                },
                is_set: false,
            })
            .collect();
        let id = NodeId(self.store.nodes.len() as u32);
        self.store.nodes.push(NodeData {
            type_id,
            slots,
            container: None,
        });
        trace!("Created node {} of type {}", id, self.store.schema.type_name(type_id));
        Ok(id)
    }

    /// Type of a node
    pub fn type_of(&self, id: NodeId) -> Result<TypeId> {
        self.store.type_of(id)
    }

    /// Look up a property of a node's type by name
    pub fn property_id(&self, id: NodeId, name: &str) -> Result<PropertyId> {
        self.store.property_id(id, name)
    }

    /// Current value of a property
    pub fn get(&self, id: NodeId, property: PropertyId) -> Result<Value> {
        self.store.get(id, property)
    }

    /// Whether a property is set
    pub fn is_set(&self, id: NodeId, property: PropertyId) -> Result<bool> {
        self.store.is_set(id, property)
    }

    /// Current mixed-content sequence of a node, if its type has one
    pub fn sequence(&self, id: NodeId) -> Result<Option<Sequence>> {
        match self.store.schema.mixed_property(self.type_of(id)?) {
            Some(mixed) => Ok(Some(self.store.sequence(id, mixed)?)),
            None => Ok(None),
        }
    }

    /// Current container and containment property of a node
    pub fn container(&self, id: NodeId) -> Option<(NodeId, PropertyId)> {
        self.store.container(id)
    }

    /// Direct children of a node
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.store.children(id)
    }

    /// `id` and everything it transitively contains
    pub fn contents(&self, id: NodeId) -> Vec<NodeId> {
        self.store.contents(id)
    }

    /// Whether `id` is contained (transitively) by the graph root
    pub fn is_attached(&self, id: NodeId) -> bool {
        self.store.is_reachable(id, &[self.root])
    }

    /// Register an observer; subscribe it to nodes to receive notifications
    pub fn register_observer(&mut self, observer: Box<dyn Observer>) -> ObserverId {
        self.observers.register(observer)
    }

    /// Remove an observer and every subscription it holds
    pub fn unregister_observer(&mut self, id: ObserverId) -> Option<Box<dyn Observer>> {
        self.observers.unregister(id)
    }

    /// Subscribe an observer to a node
    pub fn subscribe(&mut self, observer: ObserverId, node: NodeId) -> bool {
        self.observers.subscriptions.subscribe(observer, node)
    }

    /// Unsubscribe an observer from a node
    pub fn unsubscribe(&mut self, observer: ObserverId, node: NodeId) -> bool {
        self.observers.subscriptions.unsubscribe(observer, node)
    }

    /// Whether an observer is subscribed to a node
    pub fn is_subscribed(&self, observer: ObserverId, node: NodeId) -> bool {
        self.observers.subscriptions.is_subscribed(observer, node)
    }

    /// Number of nodes an observer is subscribed to
    pub fn subscription_count(&self, observer: ObserverId) -> usize {
        self.observers.subscriptions.count(observer)
    }

    /// Replace the whole value of a property
    ///
    /// For many-valued properties `value` must be a `List`; for the
    /// mixed-content property it must be `Mixed`. Containment children that
    /// are currently contained elsewhere are moved.
    pub fn set(&mut self, id: NodeId, property: PropertyId, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let type_id = self.type_of(id)?;
        self.store.schema.check_value(type_id, property, &value)?;
        self.check_targets(id, property, &value)?;

        let incoming = self.owned_nodes(id, property, &value)?;
        self.check_unique(id, property, &incoming)?;
        for child in &incoming {
            self.check_no_cycle(id, *child)?;
        }

        let slot = self.store.slot(id, property)?;
        let notification = Notification {
            node: id,
            property,
            kind: ChangeKind::Set,
            old_value: slot.value.clone(),
            new_value: value.clone(),
            position: None,
            was_set: slot.is_set,
        };
        // Children moving in leave their old containers only once the
        // target accepts them
        self.observers.check(&self.store, &notification)?;
        let moved = self.detach_foreign(id, property, &incoming)?;
        self.dispatch_or_restore(&notification, moved)?;

        let many = self.store.descriptor(id, property)?.many;
        let is_set = !many || !value.is_empty();
        self.write_slot(id, property, value, is_set)
    }

    /// Revert a property to its default and mark it unset
    pub fn unset(&mut self, id: NodeId, property: PropertyId) -> Result<()> {
        let descriptor = self.store.descriptor(id, property)?;
        if descriptor.mixed_owner().is_some() {
            return Err(RewindError::DerivedProperty(
                self.store.schema.label(self.type_of(id)?, property),
            ));
        }
        let unset_value = descriptor.unset_value();
        let slot = self.store.slot(id, property)?;
        let notification = Notification {
            node: id,
            property,
            kind: ChangeKind::Unset,
            old_value: slot.value.clone(),
            new_value: unset_value.clone(),
            position: None,
            was_set: slot.is_set,
        };
        self.observers.dispatch(&self.store, &notification)?;
        self.write_slot(id, property, unset_value, false)
    }

    /// Append an item to a many-valued property
    pub fn add(&mut self, id: NodeId, property: PropertyId, item: impl Into<Value>) -> Result<()> {
        let len = self.list(id, property)?.len();
        self.insert(id, property, len, item)
    }

    /// Insert an item into a many-valued property at `index`
    pub fn insert(
        &mut self,
        id: NodeId,
        property: PropertyId,
        index: usize,
        item: impl Into<Value>,
    ) -> Result<()> {
        let item = item.into();
        let type_id = self.type_of(id)?;
        let len = self.list(id, property)?.len();
        if index > len {
            return Err(RewindError::IndexOutOfBounds { index, len });
        }
        self.store.schema.check_item(type_id, property, &item)?;
        self.check_targets(id, property, &item)?;

        let containment = self.store.descriptor(id, property)?.is_containment();
        let incoming = item.as_node().filter(|_| containment);
        if let Some(child) = incoming {
            self.check_new_child(id, property, child)?;
        }
        // Removing a moved child from elsewhere never shortens this list
        let was_set = self.store.slot(id, property)?.is_set;
        let notification = Notification {
            node: id,
            property,
            kind: ChangeKind::Add,
            old_value: Value::Null,
            new_value: item.clone(),
            position: Some(index),
            was_set,
        };
        self.observers.check(&self.store, &notification)?;
        let moved = match incoming {
            Some(child) => self.detach_placed(child)?,
            None => Vec::new(),
        };
        self.dispatch_or_restore(&notification, moved)?;

        if let (true, Some(child)) = (containment, item.as_node()) {
            self.store.node_mut(child)?.container = Some((id, property));
        }
        let slot = self.slot_mut(id, property)?;
        if let Value::List(items) = &mut slot.value {
            items.insert(index, item);
        }
        slot.is_set = true;
        self.generation += 1;
        Ok(())
    }

    /// Remove and return the item at `index` of a many-valued property
    pub fn remove(&mut self, id: NodeId, property: PropertyId, index: usize) -> Result<Value> {
        let items = self.list(id, property)?;
        let item = items
            .get(index)
            .cloned()
            .ok_or(RewindError::IndexOutOfBounds {
                index,
                len: items.len(),
            })?;
        let notification = Notification {
            node: id,
            property,
            kind: ChangeKind::Remove,
            old_value: item.clone(),
            new_value: Value::Null,
            position: Some(index),
            was_set: true,
        };
        self.observers.dispatch(&self.store, &notification)?;

        if self.store.descriptor(id, property)?.is_containment() {
            if let Some(child) = item.as_node() {
                self.store.node_mut(child)?.container = None;
            }
        }
        let slot = self.slot_mut(id, property)?;
        if let Value::List(items) = &mut slot.value {
            items.remove(index);
            slot.is_set = !items.is_empty();
        }
        self.generation += 1;
        Ok(item)
    }

    /// Move the item at `from` to position `to` of a many-valued property
    pub fn move_item(&mut self, id: NodeId, property: PropertyId, from: usize, to: usize) -> Result<()> {
        let items = self.list(id, property)?;
        let len = items.len();
        if from >= len || to >= len {
            return Err(RewindError::IndexOutOfBounds {
                index: from.max(to),
                len,
            });
        }
        let notification = Notification {
            node: id,
            property,
            kind: ChangeKind::Move,
            old_value: Value::Int(from as i64),
            new_value: items[from].clone(),
            position: Some(to),
            was_set: true,
        };
        self.observers.dispatch(&self.store, &notification)?;

        let slot = self.slot_mut(id, property)?;
        if let Value::List(items) = &mut slot.value {
            let item = items.remove(from);
            items.insert(to, item);
        }
        self.generation += 1;
        Ok(())
    }

    /// Append an entry for `member` to the node's mixed content
    pub fn add_mixed(&mut self, id: NodeId, member: PropertyId, value: impl Into<Value>) -> Result<()> {
        let mixed = self.mixed_owner(id, member)?;
        let len = self.store.sequence(id, mixed)?.len();
        self.insert_mixed(id, len, member, value)
    }

    /// Insert an entry for `member` into the node's mixed content
    pub fn insert_mixed(
        &mut self,
        id: NodeId,
        index: usize,
        member: PropertyId,
        value: impl Into<Value>,
    ) -> Result<()> {
        let value = value.into();
        let type_id = self.type_of(id)?;
        let mixed = self.mixed_owner(id, member)?;
        let len = self.store.sequence(id, mixed)?.len();
        if index > len {
            return Err(RewindError::IndexOutOfBounds { index, len });
        }
        self.store
            .schema
            .check_mixed_entry(type_id, mixed, member, &value)?;
        self.check_targets(id, member, &value)?;

        let containment = self.store.descriptor(id, member)?.is_containment();
        let incoming = value.as_node().filter(|_| containment);
        if let Some(child) = incoming {
            self.check_new_child(id, mixed, child)?;
        }
        let entry = MixedEntry::new(member, value);
        let slot = self.store.slot(id, mixed)?;
        let notification = Notification {
            node: id,
            property: mixed,
            kind: ChangeKind::Add,
            old_value: Value::Null,
            new_value: Value::Mixed(vec![entry.clone()]),
            position: Some(index),
            was_set: slot.is_set,
        };
        self.observers.check(&self.store, &notification)?;
        let moved = match incoming {
            Some(child) => self.detach_placed(child)?,
            None => Vec::new(),
        };
        self.dispatch_or_restore(&notification, moved)?;

        if let (true, Some(child)) = (containment, entry.value.as_node()) {
            self.store.node_mut(child)?.container = Some((id, member));
        }
        let slot = self.slot_mut(id, mixed)?;
        if let Value::Mixed(entries) = &mut slot.value {
            entries.insert(index, entry);
        }
        slot.is_set = true;
        self.generation += 1;
        Ok(())
    }

    /// Remove and return the mixed-content entry at `index`
    pub fn remove_mixed(&mut self, id: NodeId, index: usize) -> Result<MixedEntry> {
        let type_id = self.type_of(id)?;
        let mixed = self
            .store
            .schema
            .mixed_property(type_id)
            .ok_or_else(|| RewindError::UnknownProperty {
                type_name: self.store.schema.type_name(type_id).to_string(),
                property: "<mixed content>".to_string(),
            })?;
        let sequence = self.store.sequence(id, mixed)?;
        let entry = sequence
            .entries()
            .get(index)
            .cloned()
            .ok_or(RewindError::IndexOutOfBounds {
                index,
                len: sequence.len(),
            })?;
        let notification = Notification {
            node: id,
            property: mixed,
            kind: ChangeKind::Remove,
            old_value: Value::Mixed(vec![entry.clone()]),
            new_value: Value::Null,
            position: Some(index),
            was_set: true,
        };
        self.observers.dispatch(&self.store, &notification)?;

        if self.store.descriptor(id, entry.property)?.is_containment() {
            if let Some(child) = entry.value.as_node() {
                self.store.node_mut(child)?.container = None;
            }
        }
        let slot = self.slot_mut(id, mixed)?;
        if let Value::Mixed(entries) = &mut slot.value {
            entries.remove(index);
            slot.is_set = !entries.is_empty();
        }
        self.generation += 1;
        Ok(entry)
    }

    /// Remove a node from its container; no-op for uncontained nodes
    pub fn detach(&mut self, id: NodeId) -> Result<()> {
        self.detach_placed(id).map(|_| ())
    }

    /// Where a contained node currently sits
    fn placement(&self, id: NodeId) -> Result<Option<Placement>> {
        let Some((parent, property)) = self.container(id) else {
            return Ok(None);
        };
        let descriptor = self.store.descriptor(parent, property)?;
        let index = if let Some(mixed) = descriptor.mixed_owner() {
            let index = self
                .store
                .sequence(parent, mixed)?
                .iter()
                .position(|e| e.property == property && e.value.as_node() == Some(id))
                .ok_or_else(|| RewindError::internal(format!("{} missing from its mixed container", id)))?;
            Some(index)
        } else if descriptor.many {
            let index = self
                .list(parent, property)?
                .iter()
                .position(|v| v.as_node() == Some(id))
                .ok_or_else(|| RewindError::internal(format!("{} missing from its container list", id)))?;
            Some(index)
        } else {
            None
        };
        Ok(Some(Placement {
            child: id,
            parent,
            property,
            mixed: descriptor.mixed_owner().is_some(),
            index,
        }))
    }

    /// Detach a node and report where it was
    fn detach_placed(&mut self, id: NodeId) -> Result<Vec<Placement>> {
        let Some(placement) = self.placement(id)? else {
            return Ok(Vec::new());
        };
        match (placement.mixed, placement.index) {
            (true, Some(index)) => {
                self.remove_mixed(placement.parent, index)?;
            }
            (false, Some(index)) => {
                self.remove(placement.parent, placement.property, index)?;
            }
            _ => self.set(placement.parent, placement.property, Value::Null)?,
        }
        Ok(vec![placement])
    }

    /// Put detached nodes back where they were, newest first
    fn reattach(&mut self, placements: Vec<Placement>) -> Result<()> {
        for placement in placements.into_iter().rev() {
            let Placement {
                child,
                parent,
                property,
                mixed,
                index,
            } = placement;
            match (mixed, index) {
                (true, Some(index)) => self.insert_mixed(parent, index, property, child)?,
                (false, Some(index)) => self.insert(parent, property, index, child)?,
                _ => self.set(parent, property, child)?,
            }
        }
        Ok(())
    }

    /// Deliver a change whose incoming children were already detached
    ///
    /// A veto at this point puts the children back before the error is
    /// returned.
    fn dispatch_or_restore(&mut self, notification: &Notification, moved: Vec<Placement>) -> Result<()> {
        let Err(err) = self.observers.dispatch(&self.store, notification) else {
            return Ok(());
        };
        if !moved.is_empty() {
            warn!(
                "{:?} on {} vetoed after {} children were detached; reattaching",
                notification.kind,
                notification.node,
                moved.len()
            );
            if let Err(restore) = self.reattach(moved) {
                warn!("Could not reattach moved children: {}", restore);
            }
        }
        Err(err)
    }

    fn list(&self, id: NodeId, property: PropertyId) -> Result<&[Value]> {
        let descriptor = self.store.descriptor(id, property)?;
        let label = || self.store.schema.label(descriptor_type(&self.store, id), property);
        if descriptor.mixed_owner().is_some() {
            return Err(RewindError::DerivedProperty(label()));
        }
        if !descriptor.many || descriptor.is_mixed() {
            return Err(RewindError::NotMany(label()));
        }
        match &self.store.slot(id, property)?.value {
            Value::List(items) => Ok(items),
            other => Err(RewindError::type_mismatch(label(), "list", other.kind_name())),
        }
    }

    fn slot_mut(&mut self, id: NodeId, property: PropertyId) -> Result<&mut Slot> {
        let node = self.store.node_mut(id)?;
        node.slots
            .get_mut(property.index())
            .ok_or_else(|| RewindError::internal(format!("slot {} missing on {}", property.0, id)))
    }

    fn mixed_owner(&self, id: NodeId, member: PropertyId) -> Result<PropertyId> {
        let type_id = self.type_of(id)?;
        self.store
            .descriptor(id, member)?
            .mixed_owner()
            .ok_or_else(|| {
                RewindError::type_mismatch(
                    self.store.schema.label(type_id, member),
                    "mixed-content member",
                    "plain property",
                )
            })
    }

    /// Nodes that `value` would make children of `id` through `property`
    fn owned_nodes(&self, id: NodeId, property: PropertyId, value: &Value) -> Result<Vec<NodeId>> {
        let type_id = self.type_of(id)?;
        let descriptor = self.store.schema.property(type_id, property)?;
        match (descriptor.kind, value) {
            (PropertyKind::ContainmentReference, v) => Ok(v.nodes()),
            (PropertyKind::MixedContent, Value::Mixed(entries)) => {
                let mut owned = Vec::new();
                for entry in entries {
                    if self.store.schema.property(type_id, entry.property)?.is_containment() {
                        owned.extend(entry.value.as_node());
                    }
                }
                Ok(owned)
            }
            _ => Ok(Vec::new()),
        }
    }

    fn check_targets(&self, id: NodeId, property: PropertyId, value: &Value) -> Result<()> {
        let type_id = self.type_of(id)?;
        let check = |member: PropertyId, node: NodeId| -> Result<()> {
            let actual = self.store.type_of(node)?;
            if self.store.schema.accepts_target(type_id, member, actual)? {
                Ok(())
            } else {
                Err(RewindError::type_mismatch(
                    self.store.schema.label(type_id, member),
                    self.store
                        .schema
                        .property(type_id, member)?
                        .target_type
                        .clone()
                        .unwrap_or_default(),
                    self.store.schema.type_name(actual),
                ))
            }
        };
        match value {
            Value::Mixed(entries) => {
                for entry in entries {
                    if let Some(node) = entry.value.as_node() {
                        check(entry.property, node)?;
                    }
                }
                Ok(())
            }
            other => {
                if self.store.schema.property(type_id, property)?.kind.is_reference() {
                    for node in other.nodes() {
                        check(property, node)?;
                    }
                }
                Ok(())
            }
        }
    }

    fn check_unique(&self, id: NodeId, property: PropertyId, incoming: &[NodeId]) -> Result<()> {
        for (i, node) in incoming.iter().enumerate() {
            if incoming[..i].contains(node) {
                return Err(RewindError::type_mismatch(
                    self.store.schema.label(self.type_of(id)?, property),
                    "distinct children",
                    format!("{} twice", node),
                ));
            }
        }
        Ok(())
    }

    fn check_no_cycle(&self, parent: NodeId, child: NodeId) -> Result<()> {
        if self.store.is_ancestor_or_self(child, parent) {
            return Err(RewindError::CircularContainment { parent, child });
        }
        Ok(())
    }

    /// Validate a child about to be inserted into `slot_property` of `parent`
    fn check_new_child(&self, parent: NodeId, slot_property: PropertyId, child: NodeId) -> Result<()> {
        self.check_no_cycle(parent, child)?;
        let already_here = self
            .store
            .slot(parent, slot_property)?
            .value
            .nodes()
            .contains(&child);
        if already_here {
            return Err(RewindError::type_mismatch(
                self.store.schema.label(self.type_of(parent)?, slot_property),
                "distinct children",
                format!("{} already present", child),
            ));
        }
        Ok(())
    }

    /// Detach incoming children that live in any slot other than the target
    fn detach_foreign(
        &mut self,
        parent: NodeId,
        property: PropertyId,
        incoming: &[NodeId],
    ) -> Result<Vec<Placement>> {
        let current = self.store.slot(parent, property)?.value.nodes();
        let mut moved = Vec::new();
        for child in incoming {
            if current.contains(child) {
                continue;
            }
            match self.detach_placed(*child) {
                Ok(placed) => moved.extend(placed),
                Err(err) => {
                    if let Err(restore) = self.reattach(moved) {
                        warn!("Could not reattach moved children: {}", restore);
                    }
                    return Err(err);
                }
            }
        }
        Ok(moved)
    }

    /// Write a whole slot and keep container links consistent
    fn write_slot(&mut self, id: NodeId, property: PropertyId, value: Value, is_set: bool) -> Result<()> {
        let type_id = self.type_of(id)?;
        let old_value = self.store.slot(id, property)?.value.clone();
        let outgoing = self.owned_nodes(id, property, &old_value)?;
        let incoming = self.owned_nodes(id, property, &value)?;

        for child in &outgoing {
            if !incoming.contains(child) {
                self.store.node_mut(*child)?.container = None;
            }
        }
        match &value {
            Value::Mixed(entries) => {
                for entry in entries {
                    if let (true, Some(child)) = (
                        self.store.schema.property(type_id, entry.property)?.is_containment(),
                        entry.value.as_node(),
                    ) {
                        self.store.node_mut(child)?.container = Some((id, entry.property));
                    }
                }
            }
            _ => {
                for child in &incoming {
                    self.store.node_mut(*child)?.container = Some((id, property));
                }
            }
        }

        let slot = self.slot_mut(id, property)?;
        slot.value = value;
        slot.is_set = is_set;
        self.generation += 1;
        Ok(())
    }
}

fn descriptor_type(store: &NodeStore, id: NodeId) -> TypeId {
    store.type_of(id).unwrap_or(TypeId(u32::MAX))
}
