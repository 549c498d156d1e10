//! Chaos testing for Rewind
//!
//! Throws long random edit storms at a tracked graph while other observers
//! subscribe and unsubscribe during delivery, recording is suspended and
//! resumed at random, and sessions are started and abandoned repeatedly.

use ::rewind::notify::{Notification, NotifyContext, Observer};
use ::rewind::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

/// Chaos testing framework
pub struct RewindChaosTest {
    pub graph: DataGraph,
    pub chaos_engine: ChaosEngine,
    name: PropertyId,
    weight: PropertyId,
    children: PropertyId,
    favourite: PropertyId,
}

/// Observer that follows containment on its own, like a second recorder
pub struct ShadowObserver {
    pub seen: Arc<AtomicUsize>,
}

impl Observer for ShadowObserver {
    fn notify(&mut self, ctx: &mut NotifyContext<'_>, n: &Notification) {
        self.seen.fetch_add(1, Ordering::Relaxed);
        match n.kind {
            ChangeKind::Add => {
                if let Some(child) = n.new_value.as_node() {
                    ctx.subscribe_contents(child);
                }
            }
            ChangeKind::Remove => {
                if let Some(child) = n.old_value.as_node() {
                    ctx.unsubscribe_contents(child);
                }
            }
            _ => {}
        }
    }

    fn name(&self) -> &str {
        "shadow"
    }
}

impl RewindChaosTest {
    pub fn new(seed: u64) -> Self {
        let schema = Schema::builder()
            .add_type("Node", vec![
                PropertyDescriptor::attribute("name", DataType::String),
                PropertyDescriptor::attribute("weight", DataType::Float).with_default(1.0),
                PropertyDescriptor::containment("children", "Node").many(),
                PropertyDescriptor::reference("favourite", "Node"),
            ])
            .build()
            .unwrap();
        let graph = DataGraph::new(Arc::new(schema), "Node").unwrap();
        let root = graph.root();
        Self {
            name: graph.property_id(root, "name").unwrap(),
            weight: graph.property_id(root, "weight").unwrap(),
            children: graph.property_id(root, "children").unwrap(),
            favourite: graph.property_id(root, "favourite").unwrap(),
            graph,
            chaos_engine: ChaosEngine::new(seed),
        }
    }

    /// Grow a random tree of `size` nodes
    pub fn grow(&mut self, size: usize) {
        let root = self.graph.root();
        for i in 0..size {
            let nodes = self.graph.contents(root);
            let parent = nodes[self.chaos_engine.pick(nodes.len())];
            let node = self.graph.create_node("Node").unwrap();
            self.graph.set(node, self.name, format!("n{}", i)).unwrap();
            self.graph.add(parent, self.children, node).unwrap();
        }
    }

    fn snapshot(&self) -> BTreeMap<(NodeId, PropertyId), (Value, bool)> {
        let store = self.graph.store();
        let mut snapshot = BTreeMap::new();
        for index in 0..store.len() {
            let node = NodeId(index as u32);
            for property in [self.name, self.weight, self.children, self.favourite] {
                let slot = store.slot(node, property).unwrap();
                snapshot.insert((node, property), (slot.value.clone(), slot.is_set));
            }
        }
        snapshot
    }

    /// One random edit; rejected edits count as failures
    pub fn storm_step(&mut self) -> bool {
        let root = self.graph.root();
        let nodes = self.graph.contents(root);
        let node = nodes[self.chaos_engine.pick(nodes.len())];
        let other = nodes[self.chaos_engine.pick(nodes.len())];
        let outcome = match self.chaos_engine.pick(7) {
            0 => self.graph.set(node, self.name, self.chaos_engine.word()),
            1 => self.graph.set(node, self.weight, self.chaos_engine.weight()),
            2 => self.graph.unset(node, self.weight),
            3 => self.graph.create_node("Node").and_then(|n| self.graph.add(node, self.children, n)),
            4 => {
                let len = self.graph.children(node).len();
                if len == 0 {
                    return true;
                }
                let index = self.chaos_engine.pick(len);
                self.graph.remove(node, self.children, index).map(|_| ())
            }
            5 => self.graph.add(other, self.children, node),
            _ => self.graph.set(node, self.favourite, other),
        };
        outcome.is_ok()
    }
}

/// Deterministic source of chaos
pub struct ChaosEngine {
    rng: StdRng,
}

impl ChaosEngine {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn pick(&mut self, len: usize) -> usize {
        self.rng.random_range(0..len)
    }

    pub fn chance(&mut self, p: f64) -> bool {
        self.rng.random_bool(p)
    }

    pub fn word(&mut self) -> String {
        let len = self.rng.random_range(1..8);
        (0..len).map(|_| self.rng.random_range(b'a'..=b'z') as char).collect()
    }

    pub fn weight(&mut self) -> f64 {
        self.rng.random_range(0.0..100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_edit_storm_with_shadow_observer() {
        let mut chaos = RewindChaosTest::new(42);
        chaos.grow(50);
        let root = chaos.graph.root();

        let seen = Arc::new(AtomicUsize::new(0));
        let shadow = chaos.graph.register_observer(Box::new(ShadowObserver { seen: seen.clone() }));
        for node in chaos.graph.contents(root) {
            chaos.graph.subscribe(shadow, node);
        }

        let before = chaos.snapshot();
        let mut summary = ChangeSummary::new();
        summary.begin_logging(&mut chaos.graph).unwrap();

        let mut rejected = 0;
        for _ in 0..2_000 {
            if !chaos.storm_step() {
                rejected += 1;
            }
        }
        info!("Storm finished with {} rejected edits", rejected);
        summary.end_logging(&mut chaos.graph).unwrap();

        // Both observers followed the same tree
        let tracked = chaos.graph.contents(root);
        assert_eq!(chaos.graph.subscription_count(shadow), tracked.len());
        assert!(seen.load(Ordering::Relaxed) > 0);

        let result = summary.apply(&mut chaos.graph).unwrap();
        info!("Undo touched {} nodes", result.nodes_touched);
        let after = chaos.snapshot();
        for (key, value) in &before {
            assert_eq!(after.get(key), Some(value), "slot {:?} not restored", key);
        }
    }

    #[test]
    #[traced_test]
    fn test_suspension_flapping() {
        let mut chaos = RewindChaosTest::new(7);
        chaos.grow(30);
        let root = chaos.graph.root();

        let mut summary = ChangeSummary::new();
        summary.begin_logging(&mut chaos.graph).unwrap();
        for _ in 0..500 {
            if chaos.chaos_engine.chance(0.1) {
                if summary.is_suspended() {
                    summary.resume_recording();
                } else {
                    summary.suspend_recording();
                }
            }
            chaos.storm_step();
        }
        summary.resume_recording();

        // Subscriptions never drift from the tree, suspended or not
        let weight = chaos.weight;
        for node in chaos.graph.contents(root) {
            let before = summary.old_value(&chaos.graph, node, weight).unwrap();
            chaos.graph.set(node, weight, 123.0).unwrap();
            summary.summarize(&chaos.graph).unwrap();
            let after = summary.old_value(&chaos.graph, node, weight).unwrap();
            assert!(after.is_some(), "{} not tracked", node);
            if let Some(before) = before {
                assert_eq!(after, Some(before));
            }
        }
        summary.end_logging(&mut chaos.graph).unwrap();
    }

    #[test]
    #[traced_test]
    fn test_abandoned_sessions() {
        let mut chaos = RewindChaosTest::new(1234);
        chaos.grow(20);

        let mut summary = ChangeSummary::new();
        for round in 0..25 {
            summary.begin_logging(&mut chaos.graph).unwrap();
            let id = summary.session_id();
            for _ in 0..40 {
                chaos.storm_step();
            }
            match round % 3 {
                0 => {
                    summary.end_logging(&mut chaos.graph).unwrap();
                }
                1 => {
                    let before = summary.stats(&chaos.graph);
                    summary.summarize(&chaos.graph).unwrap();
                    summary.end_logging(&mut chaos.graph).unwrap();
                    let after = summary.stats(&chaos.graph);
                    assert_eq!(before.created, after.created);
                    assert_eq!(before.deleted, after.deleted);
                }
                _ => {
                    if let Err(e) = summary.undo_changes(&mut chaos.graph) {
                        warn!("Undo failed: {}", e.user_message());
                        panic!("undo failed in round {}", round);
                    }
                    assert!(summary.changed_objects(&chaos.graph).is_empty());
                }
            }
            assert_eq!(summary.session_id(), id);
        }
    }
}
