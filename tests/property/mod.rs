//! Property-based testing for Rewind
//!
//! Uses proptest to check the session laws across randomly generated
//! edit sequences:
//! - undo after a session restores every pre-existing slot
//! - consolidating twice reports the same old values as consolidating once
//! - created, deleted and modified classifications agree with the live tree

use ::rewind::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

/// An edit expressed with indices resolved against the live tree
#[derive(Debug, Clone)]
pub enum EditOperation {
    SetName { node: usize, name: String },
    UnsetName { node: usize },
    SetSize { node: usize, size: i64 },
    AddChild { parent: usize },
    RemoveChild { parent: usize, index: usize },
    MoveChild { node: usize, to: usize },
    Reorder { parent: usize, from: usize, to: usize },
    Link { from: usize, to: Option<usize> },
    AppendNote { node: usize, text: String },
    AttachNote { node: usize },
    DropNote { node: usize, index: usize },
}

fn edit_strategy() -> impl Strategy<Value = EditOperation> {
    prop_oneof![
        (any::<usize>(), "[a-z]{1,6}").prop_map(|(node, name)| EditOperation::SetName { node, name }),
        any::<usize>().prop_map(|node| EditOperation::UnsetName { node }),
        (any::<usize>(), -100i64..100).prop_map(|(node, size)| EditOperation::SetSize { node, size }),
        any::<usize>().prop_map(|parent| EditOperation::AddChild { parent }),
        (any::<usize>(), any::<usize>()).prop_map(|(parent, index)| EditOperation::RemoveChild { parent, index }),
        (any::<usize>(), any::<usize>()).prop_map(|(node, to)| EditOperation::MoveChild { node, to }),
        (any::<usize>(), any::<usize>(), any::<usize>())
            .prop_map(|(parent, from, to)| EditOperation::Reorder { parent, from, to }),
        (any::<usize>(), prop::option::of(any::<usize>())).prop_map(|(from, to)| EditOperation::Link { from, to }),
        (any::<usize>(), "[a-z ]{1,8}").prop_map(|(node, text)| EditOperation::AppendNote { node, text }),
        any::<usize>().prop_map(|node| EditOperation::AttachNote { node }),
        (any::<usize>(), any::<usize>()).prop_map(|(node, index)| EditOperation::DropNote { node, index }),
    ]
}

struct Tree {
    graph: DataGraph,
    name: PropertyId,
    size: PropertyId,
    items: PropertyId,
    link: PropertyId,
    notes: PropertyId,
    text: PropertyId,
    attachment: PropertyId,
}

fn tree(width: usize) -> Tree {
    let schema = Schema::builder()
        .add_type("Item", vec![
            PropertyDescriptor::attribute("name", DataType::String),
            PropertyDescriptor::attribute("size", DataType::Int),
            PropertyDescriptor::containment("items", "Item").many(),
            PropertyDescriptor::reference("link", "Item"),
            PropertyDescriptor::mixed("notes"),
            PropertyDescriptor::attribute("text", DataType::String).many().member_of("notes"),
            PropertyDescriptor::containment("attachment", "Item").many().member_of("notes"),
        ])
        .build()
        .unwrap();
    let mut graph = DataGraph::new(Arc::new(schema), "Item").unwrap();
    let root = graph.root();
    let pid = |name: &str| graph.property_id(root, name).unwrap();
    let (name, size, items, link, notes, text, attachment) = (
        pid("name"),
        pid("size"),
        pid("items"),
        pid("link"),
        pid("notes"),
        pid("text"),
        pid("attachment"),
    );

    for i in 0..width {
        let child = graph.create_node("Item").unwrap();
        graph.set(child, name, format!("item{}", i)).unwrap();
        graph.add_mixed(child, text, "note").unwrap();
        graph.add(root, items, child).unwrap();
        let grandchild = graph.create_node("Item").unwrap();
        graph.add(child, items, grandchild).unwrap();
    }

    Tree { graph, name, size, items, link, notes, text, attachment }
}

impl Tree {
    fn pick(&self, index: usize) -> NodeId {
        let nodes = self.graph.contents(self.graph.root());
        nodes[index % nodes.len()]
    }

    /// Apply an edit; edits that the graph rejects are ignored
    fn apply(&mut self, op: &EditOperation) {
        let _ = self.try_apply(op);
    }

    fn try_apply(&mut self, op: &EditOperation) -> Result<()> {
        match op {
            EditOperation::SetName { node, name } => self.graph.set(self.pick(*node), self.name, name.as_str()),
            EditOperation::UnsetName { node } => self.graph.unset(self.pick(*node), self.name),
            EditOperation::SetSize { node, size } => self.graph.set(self.pick(*node), self.size, *size),
            EditOperation::AddChild { parent } => {
                let child = self.graph.create_node("Item")?;
                self.graph.add(self.pick(*parent), self.items, child)
            }
            EditOperation::RemoveChild { parent, index } => {
                let parent = self.pick(*parent);
                let len = self.graph.get(parent, self.items)?.len();
                if len == 0 {
                    return Ok(());
                }
                self.graph.remove(parent, self.items, index % len).map(|_| ())
            }
            EditOperation::MoveChild { node, to } => {
                let (node, to) = (self.pick(*node), self.pick(*to));
                self.graph.add(to, self.items, node)
            }
            EditOperation::Reorder { parent, from, to } => {
                let parent = self.pick(*parent);
                let len = self.graph.get(parent, self.items)?.len();
                if len == 0 {
                    return Ok(());
                }
                self.graph.move_item(parent, self.items, from % len, to % len)
            }
            EditOperation::Link { from, to } => {
                let target = to.map(|t| self.pick(t));
                self.graph.set(self.pick(*from), self.link, target)
            }
            EditOperation::AppendNote { node, text } => {
                self.graph.add_mixed(self.pick(*node), self.text, text.as_str())
            }
            EditOperation::AttachNote { node } => {
                let attachment = self.graph.create_node("Item")?;
                self.graph.add_mixed(self.pick(*node), self.attachment, attachment)
            }
            EditOperation::DropNote { node, index } => {
                let node = self.pick(*node);
                let len = self.graph.sequence(node)?.map_or(0, |s| s.len());
                if len == 0 {
                    return Ok(());
                }
                self.graph.remove_mixed(node, index % len).map(|_| ())
            }
        }
    }

    /// Every slot of every node that exists right now
    fn snapshot(&self) -> BTreeMap<(NodeId, usize), (Value, bool)> {
        let store = self.graph.store();
        let mut snapshot = BTreeMap::new();
        for index in 0..store.len() {
            let node = NodeId(index as u32);
            for property in [self.name, self.size, self.items, self.link, self.notes] {
                let slot = store.slot(node, property).unwrap();
                snapshot.insert((node, property.index()), (slot.value.clone(), slot.is_set));
            }
        }
        snapshot
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Undo restores every slot of every node that existed before the session
    #[test]
    fn undo_round_trip(
        width in 1..5usize,
        edits in prop::collection::vec(edit_strategy(), 1..40)
    ) {
        let mut tree = tree(width);
        let before = tree.snapshot();
        let containers: Vec<_> = (0..tree.graph.store().len())
            .map(|i| tree.graph.container(NodeId(i as u32)))
            .collect();

        let mut summary = ChangeSummary::new();
        summary.begin_logging(&mut tree.graph).unwrap();
        for edit in &edits {
            tree.apply(edit);
        }
        summary.end_logging(&mut tree.graph).unwrap();
        summary.apply(&mut tree.graph).unwrap();

        let after = tree.snapshot();
        for (key, value) in &before {
            prop_assert_eq!(after.get(key), Some(value), "slot {:?}", key);
        }
        for (index, container) in containers.iter().enumerate() {
            prop_assert_eq!(tree.graph.container(NodeId(index as u32)), *container);
        }
    }

    /// Consolidating twice reports what consolidating once reports
    #[test]
    fn consolidate_idempotent(
        prune in any::<bool>(),
        edits in prop::collection::vec(edit_strategy(), 1..40)
    ) {
        let mut tree = tree(3);
        let mut summary = ChangeSummaryBuilder::new().prune_unchanged(prune).build();
        summary.begin_logging(&mut tree.graph).unwrap();
        for edit in &edits {
            tree.apply(edit);
        }
        summary.end_logging(&mut tree.graph).unwrap();

        let nodes: Vec<NodeId> = (0..tree.graph.store().len()).map(|i| NodeId(i as u32)).collect();
        summary.consolidate(&tree.graph).unwrap();
        let once: Vec<_> = nodes.iter().map(|n| summary.old_values(&tree.graph, *n).unwrap()).collect();
        let changed_once = summary.changed_objects(&tree.graph);
        summary.consolidate(&tree.graph).unwrap();
        let twice: Vec<_> = nodes.iter().map(|n| summary.old_values(&tree.graph, *n).unwrap()).collect();

        prop_assert_eq!(once, twice);
        prop_assert_eq!(changed_once, summary.changed_objects(&tree.graph));
    }

    /// Classifications agree with each other and with live reachability
    #[test]
    fn classifications_consistent(
        edits in prop::collection::vec(edit_strategy(), 1..40)
    ) {
        let mut tree = tree(3);
        let root = tree.graph.root();
        let mut summary = ChangeSummary::new();
        summary.begin_logging(&mut tree.graph).unwrap();
        for edit in &edits {
            tree.apply(edit);
        }
        summary.end_logging(&mut tree.graph).unwrap();

        for node in summary.changed_objects(&tree.graph) {
            let deleted = summary.is_deleted(&tree.graph, node);
            if deleted {
                prop_assert!(!tree.graph.store().is_reachable(node, &[root]));
            }
            if summary.is_modified(&tree.graph, node) {
                prop_assert!(!deleted);
                prop_assert!(!summary.is_created(node));
            }
        }
        for node in summary.created_objects() {
            let reachable = tree.graph.store().is_reachable(node, &[root]);
            prop_assert_eq!(summary.is_deleted(&tree.graph, node), !reachable);
            prop_assert_eq!(summary.old_container(&tree.graph, node).unwrap(), None);
        }
    }
}
