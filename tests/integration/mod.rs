//! Integration tests for Rewind
//!
//! Builds realistic document trees, runs sessions of mixed edits over them
//! and checks both what the summary reports and what undo restores.

use ::rewind::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Snapshot of every slot of every node in the arena
pub type GraphSnapshot = BTreeMap<(NodeId, PropertyId), (Value, bool)>;

/// Test harness for document-shaped graphs
pub struct RewindTestHarness {
    pub graph: DataGraph,
    pub summary: ChangeSummary,
    pub props: DocumentProps,
    pub operation_log: Vec<TestOperation>,
    rng: StdRng,
}

/// Property ids of the document schema
#[derive(Debug, Clone, Copy)]
pub struct DocumentProps {
    pub title: PropertyId,
    pub sections: PropertyId,
    pub subsections: PropertyId,
    pub heading: PropertyId,
    pub paragraphs: PropertyId,
    pub see_also: PropertyId,
    pub content: PropertyId,
    pub text: PropertyId,
    pub emphasis: PropertyId,
    pub word: PropertyId,
}

#[derive(Debug, Clone)]
pub enum TestOperation {
    Rename { node: NodeId, heading: String },
    AddSection { parent: NodeId, section: NodeId },
    RemoveSection { parent: NodeId, index: usize },
    MoveSection { section: NodeId, to: NodeId },
    Reorder { parent: NodeId, from: usize, to: usize },
    Link { from: NodeId, to: Option<NodeId> },
    AppendText { paragraph: NodeId, text: String },
    Emphasize { paragraph: NodeId, word: NodeId },
    DropEntry { paragraph: NodeId, index: usize },
}

pub fn document_schema() -> Arc<Schema> {
    Arc::new(
        Schema::builder()
            .add_type("Document", vec![
                PropertyDescriptor::attribute("title", DataType::String),
                PropertyDescriptor::containment("sections", "Section").many(),
            ])
            .add_type("Section", vec![
                PropertyDescriptor::attribute("heading", DataType::String),
                PropertyDescriptor::containment("sections", "Section").many(),
                PropertyDescriptor::containment("paragraphs", "Paragraph").many(),
                PropertyDescriptor::reference("see_also", "Section"),
            ])
            .add_type("Paragraph", vec![
                PropertyDescriptor::mixed("content"),
                PropertyDescriptor::attribute("text", DataType::String)
                    .many()
                    .member_of("content"),
                PropertyDescriptor::containment("emphasis", "Word")
                    .many()
                    .member_of("content"),
            ])
            .add_type("Word", vec![PropertyDescriptor::attribute("word", DataType::String)])
            .build()
            .expect("document schema is valid"),
    )
}

impl RewindTestHarness {
    /// Create a harness with an empty document
    pub fn new(seed: u64) -> Self {
        let schema = document_schema();
        let graph = DataGraph::new(schema.clone(), "Document").unwrap();
        let root = graph.root();
        let section = schema.type_id("Section").unwrap();
        let paragraph = schema.type_id("Paragraph").unwrap();
        let word = schema.type_id("Word").unwrap();
        let props = DocumentProps {
            title: graph.property_id(root, "title").unwrap(),
            sections: graph.property_id(root, "sections").unwrap(),
            subsections: schema.property_id(section, "sections").unwrap(),
            heading: schema.property_id(section, "heading").unwrap(),
            paragraphs: schema.property_id(section, "paragraphs").unwrap(),
            see_also: schema.property_id(section, "see_also").unwrap(),
            content: schema.property_id(paragraph, "content").unwrap(),
            text: schema.property_id(paragraph, "text").unwrap(),
            emphasis: schema.property_id(paragraph, "emphasis").unwrap(),
            word: schema.property_id(word, "word").unwrap(),
        };
        Self {
            graph,
            summary: ChangeSummary::new(),
            props,
            operation_log: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Build `sections` top-level sections, each with nested sections and
    /// paragraphs of mixed text and emphasis
    pub fn generate_document(&mut self, sections: usize, depth: usize) -> anyhow::Result<()> {
        let root = self.graph.root();
        self.graph.set(root, self.props.title, "Generated")?;
        for i in 0..sections {
            let section = self.build_section(format!("S{}", i), depth)?;
            self.graph.add(root, self.props.sections, section)?;
        }
        Ok(())
    }

    fn build_section(&mut self, heading: String, depth: usize) -> anyhow::Result<NodeId> {
        let section = self.graph.create_node("Section")?;
        self.graph.set(section, self.props.heading, heading.clone())?;
        for p in 0..2 {
            let paragraph = self.graph.create_node("Paragraph")?;
            self.graph.add_mixed(paragraph, self.props.text, format!("{} para {} ", heading, p))?;
            let word = self.graph.create_node("Word")?;
            self.graph.set(word, self.props.word, "bold")?;
            self.graph.add_mixed(paragraph, self.props.emphasis, word)?;
            self.graph.add_mixed(paragraph, self.props.text, "tail")?;
            self.graph.add(section, self.props.paragraphs, paragraph)?;
        }
        if depth > 0 {
            for c in 0..2 {
                let child = self.build_section(format!("{}.{}", heading, c), depth - 1)?;
                self.graph.add(section, self.props.subsections, child)?;
            }
        }
        Ok(section)
    }

    /// Every reachable node of a type
    pub fn nodes_of(&self, type_name: &str) -> Vec<NodeId> {
        let type_id = self.graph.schema().type_id(type_name).unwrap();
        self.graph
            .contents(self.graph.root())
            .into_iter()
            .filter(|n| self.graph.type_of(*n).unwrap() == type_id)
            .collect()
    }

    /// Capture every slot of every node ever created
    pub fn snapshot(&self) -> GraphSnapshot {
        let store = self.graph.store();
        let mut snapshot = BTreeMap::new();
        for index in 0..store.len() {
            let node = NodeId(index as u32);
            let type_id = store.type_of(node).unwrap();
            for (p, _) in self.graph.schema().features(type_id).unwrap().iter().enumerate() {
                let property = PropertyId(p as u32);
                let slot = store.slot(node, property).unwrap();
                snapshot.insert((node, property), (slot.value.clone(), slot.is_set));
            }
        }
        snapshot
    }

    /// Apply `count` random edits, recording each in the operation log
    pub fn mutate(&mut self, count: usize) -> anyhow::Result<()> {
        for _ in 0..count {
            let sections = self.nodes_of("Section");
            let paragraphs = self.nodes_of("Paragraph");
            let op = match self.rng.random_range(0..9) {
                0 if !sections.is_empty() => TestOperation::Rename {
                    node: sections[self.rng.random_range(0..sections.len())],
                    heading: format!("H{}", self.rng.random_range(0..1000)),
                },
                1 if !sections.is_empty() => {
                    let parent = sections[self.rng.random_range(0..sections.len())];
                    let section = self.graph.create_node("Section")?;
                    TestOperation::AddSection { parent, section }
                }
                2 if !sections.is_empty() => {
                    let parent = sections[self.rng.random_range(0..sections.len())];
                    let len = self.graph.get(parent, self.props.subsections)?.len();
                    if len == 0 {
                        continue;
                    }
                    TestOperation::RemoveSection {
                        parent,
                        index: self.rng.random_range(0..len),
                    }
                }
                3 if sections.len() > 1 => {
                    let section = sections[self.rng.random_range(0..sections.len())];
                    let to = sections[self.rng.random_range(0..sections.len())];
                    if self.graph.store().is_ancestor_or_self(section, to)
                        || self.graph.container(section) == Some((to, self.props.subsections))
                    {
                        continue;
                    }
                    TestOperation::MoveSection { section, to }
                }
                4 if !sections.is_empty() => {
                    let parent = sections[self.rng.random_range(0..sections.len())];
                    let len = self.graph.get(parent, self.props.paragraphs)?.len();
                    if len < 2 {
                        continue;
                    }
                    TestOperation::Reorder {
                        parent,
                        from: self.rng.random_range(0..len),
                        to: self.rng.random_range(0..len),
                    }
                }
                5 if !sections.is_empty() => TestOperation::Link {
                    from: sections[self.rng.random_range(0..sections.len())],
                    to: if self.rng.random_bool(0.3) {
                        None
                    } else {
                        Some(sections[self.rng.random_range(0..sections.len())])
                    },
                },
                6 if !paragraphs.is_empty() => TestOperation::AppendText {
                    paragraph: paragraphs[self.rng.random_range(0..paragraphs.len())],
                    text: format!("w{}", self.rng.random_range(0..100)),
                },
                7 if !paragraphs.is_empty() => {
                    let paragraph = paragraphs[self.rng.random_range(0..paragraphs.len())];
                    let word = self.graph.create_node("Word")?;
                    TestOperation::Emphasize { paragraph, word }
                }
                8 if !paragraphs.is_empty() => {
                    let paragraph = paragraphs[self.rng.random_range(0..paragraphs.len())];
                    let len = self.graph.sequence(paragraph)?.map_or(0, |s| s.len());
                    if len == 0 {
                        continue;
                    }
                    TestOperation::DropEntry {
                        paragraph,
                        index: self.rng.random_range(0..len),
                    }
                }
                _ => continue,
            };
            self.apply_operation(&op)?;
            self.operation_log.push(op);
        }
        Ok(())
    }

    fn apply_operation(&mut self, op: &TestOperation) -> anyhow::Result<()> {
        let p = self.props;
        match op {
            TestOperation::Rename { node, heading } => self.graph.set(*node, p.heading, heading.as_str())?,
            TestOperation::AddSection { parent, section } => self.graph.add(*parent, p.subsections, *section)?,
            TestOperation::RemoveSection { parent, index } => {
                self.graph.remove(*parent, p.subsections, *index)?;
            }
            TestOperation::MoveSection { section, to } => self.graph.add(*to, p.subsections, *section)?,
            TestOperation::Reorder { parent, from, to } => self.graph.move_item(*parent, p.paragraphs, *from, *to)?,
            TestOperation::Link { from, to } => self.graph.set(*from, p.see_also, *to)?,
            TestOperation::AppendText { paragraph, text } => {
                self.graph.add_mixed(*paragraph, p.text, text.as_str())?
            }
            TestOperation::Emphasize { paragraph, word } => self.graph.add_mixed(*paragraph, p.emphasis, *word)?,
            TestOperation::DropEntry { paragraph, index } => {
                self.graph.remove_mixed(*paragraph, *index)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_random_session_round_trip() {
        let mut harness = RewindTestHarness::new(7);
        harness.generate_document(3, 2).unwrap();
        let before = harness.snapshot();

        harness.summary.begin_logging(&mut harness.graph).unwrap();
        harness.mutate(200).unwrap();
        harness.summary.end_logging(&mut harness.graph).unwrap();
        info!("Applied {} operations", harness.operation_log.len());

        let stats = harness.summary.stats(&harness.graph);
        assert!(stats.has_changes());

        harness.summary.apply(&mut harness.graph).unwrap();
        let after = harness.snapshot();
        for (key, value) in &before {
            assert_eq!(after.get(key), Some(value), "slot {:?} not restored", key);
        }
    }

    #[test]
    #[traced_test]
    fn test_many_sessions_in_sequence() {
        let mut harness = RewindTestHarness::new(99);
        harness.generate_document(2, 1).unwrap();

        for round in 0..10 {
            let before = harness.snapshot();
            harness.summary.begin_logging(&mut harness.graph).unwrap();
            harness.mutate(30).unwrap();

            if round % 2 == 0 {
                // Keep the edits
                harness.summary.end_logging(&mut harness.graph).unwrap();
            } else {
                harness.summary.undo_changes(&mut harness.graph).unwrap();
                let after = harness.snapshot();
                for (key, value) in &before {
                    assert_eq!(after.get(key), Some(value), "round {} slot {:?}", round, key);
                }
            }
        }
        assert!(logs_contain("Began logging session"));
    }

    #[test]
    #[traced_test]
    fn test_created_and_deleted_sets_are_consistent() {
        let mut harness = RewindTestHarness::new(3);
        harness.generate_document(2, 2).unwrap();
        harness.summary.begin_logging(&mut harness.graph).unwrap();
        harness.mutate(100).unwrap();
        harness.summary.summarize(&harness.graph).unwrap();

        let root = harness.graph.root();
        let graph = &harness.graph;
        for node in harness.summary.changed_objects(graph) {
            let deleted = harness.summary.is_deleted(graph, node);
            assert_eq!(deleted, !graph.store().is_reachable(node, &[root]));
            if harness.summary.is_modified(graph, node) {
                assert!(!deleted);
                assert!(!harness.summary.is_created(node));
            }
        }
        for node in harness.summary.created_objects() {
            let attached = graph.is_attached(node);
            assert_eq!(harness.summary.is_deleted(graph, node), !attached);
        }
    }

    #[test]
    #[traced_test]
    fn test_old_sequences_match_pre_session_state() {
        let mut harness = RewindTestHarness::new(11);
        harness.generate_document(2, 0).unwrap();
        let paragraphs = harness.nodes_of("Paragraph");
        let before: Vec<_> = paragraphs
            .iter()
            .map(|p| harness.graph.sequence(*p).unwrap().unwrap())
            .collect();

        harness.summary.begin_logging(&mut harness.graph).unwrap();
        let p = harness.props;
        for paragraph in &paragraphs {
            harness.graph.add_mixed(*paragraph, p.text, "extra").unwrap();
            harness.graph.remove_mixed(*paragraph, 0).unwrap();
        }
        harness.summary.end_logging(&mut harness.graph).unwrap();

        for (paragraph, old) in paragraphs.iter().zip(&before) {
            let recorded = harness
                .summary
                .old_sequence(&harness.graph, *paragraph)
                .unwrap()
                .unwrap();
            assert_eq!(&recorded, old);
            let words = harness
                .summary
                .old_value(&harness.graph, *paragraph, p.emphasis)
                .unwrap()
                .unwrap();
            assert_eq!(words.value.len(), 1);
        }
    }

    #[test]
    #[traced_test]
    fn test_lenient_read_only_warns() {
        let schema = Arc::new(
            Schema::builder()
                .add_type("Record", vec![PropertyDescriptor::attribute("id", DataType::Int).read_only()])
                .build()
                .unwrap(),
        );
        let mut graph = DataGraph::new(schema, "Record").unwrap();
        let root = graph.root();
        let id = graph.property_id(root, "id").unwrap();

        let mut summary = ChangeSummaryBuilder::new().strict_read_only(false).build();
        summary.begin_logging(&mut graph).unwrap();
        graph.set(root, id, 1).unwrap();
        summary.end_logging(&mut graph).unwrap();

        assert!(logs_contain("read-only"));
        assert!(summary.is_modified(&graph, root));
    }
}
