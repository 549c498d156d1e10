//! # Rewind - Change tracking and undo for typed object graphs
//!
//! A library that records every property change made to a tree of typed
//! nodes and can answer what the tree looked like before, or put it back.
//!
//! ## Overview
//!
//! Rewind provides a change summary over a [`DataGraph`], allowing you to:
//! - Record every change under a set of root nodes while a session is active
//! - Ask which nodes were created, deleted or modified
//! - Read the pre-recording value of any changed property
//! - Find where a moved or removed node used to live
//! - Revert the whole session in one call
//!
//! ## Architecture
//!
//! - **Data graph**: nodes live in an arena and are addressed by
//!   [`NodeId`]. Containment forms a tree; cross-references are plain ids
//! - **Notifications**: every mutation is announced to subscribed observers
//!   before it is applied. All of them are asked first and any one can veto
//!   it; only an accepted change is delivered
//! - **Recorder**: an observer that follows containment as nodes enter and
//!   leave the tracked tree and logs each property's prior state
//! - **Change log**: raw records per node, consolidated on demand into the
//!   minimal diff against the pre-recording state
//! - **Undo engine**: restores containment first, then attributes and
//!   cross-references
//!
//! ## Quick Start
//!
//! ```rust
//! use rewind::{ChangeSummary, DataGraph, Value};
//! use rewind::schema::{DataType, PropertyDescriptor, Schema};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let schema = Schema::builder()
//!     .add_type("Folder", vec![
//!         PropertyDescriptor::attribute("name", DataType::String),
//!         PropertyDescriptor::containment("items", "Folder").many(),
//!     ])
//!     .build()?;
//! let mut graph = DataGraph::new(Arc::new(schema), "Folder")?;
//! let root = graph.root();
//! let items = graph.property_id(root, "items")?;
//!
//! let mut summary = ChangeSummary::new();
//! summary.begin_logging(&mut graph)?;
//!
//! let child = graph.create_node("Folder")?;
//! graph.add(root, items, child)?;
//! summary.end_logging(&mut graph)?;
//!
//! assert!(summary.is_created(child));
//! summary.apply(&mut graph)?;
//! assert_eq!(graph.get(root, items)?, Value::List(vec![]));
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Concepts
//!
//! ### Sessions
//!
//! `begin_logging` snapshots the set of tracked nodes and clears the log.
//! `end_logging` stops recording but keeps the log, which is how edits are
//! committed. `resume_logging` continues into the same log.
//!
//! ### Consolidation
//!
//! The recorder never collapses anything. Consolidation keeps the earliest
//! prior state per property, which is exactly the pre-recording state, and
//! optionally drops properties that ended where they started.
//!
//! ### Created, deleted, modified
//!
//! - created: entered the tracked tree during the session
//! - deleted: involved in a structural change and no longer reachable
//! - modified: has changes but is neither created nor deleted
//!
//! A node can be both created and deleted. A moved node is neither.
//!
//! ### Mixed content
//!
//! A type may hold one ordered sequence of entries from several member
//! properties. Members are read as filtered views of the sequence, and old
//! values of such nodes are reported per member as well as whole.
//!
//! ## Error Handling
//!
//! All operations return `Result<T, RewindError>`. Contract violations
//! (`AlreadyRecording`, `NotRecording`, `ReadOnlyPropertyViolation`,
//! `ApplyDuringRecording`) leave everything untouched. A failure in the
//! middle of `apply` leaves the graph partially reverted.
//!
//! ## Module Organization
//!
//! - [`graph`]: the node arena and its mutation API
//! - [`schema`]: type and property descriptors
//! - [`notify`]: notifications and observers
//! - [`summary`]: the change summary handle and builder
//! - [`change_log`]: recorded changes and derived views
//! - [`types`]: common types and data structures
//! - [`error`]: error types and handling

// Public API modules
pub mod change_log;
pub mod error;
pub mod graph;
pub mod notify;
pub mod schema;
pub mod sequence;
pub mod summary;
pub mod types;

// Internal modules (not part of public API)
mod apply;
mod collections;
mod recorder;

// Re-export main types for convenience
pub use change_log::{ChangeLog, Consolidation, FeatureChange};
pub use error::{Result, RewindError};
pub use graph::DataGraph;
pub use recorder::ChangeRecorder;
pub use schema::{DataType, PropertyDescriptor, PropertyKind, Schema, SchemaBuilder};
pub use sequence::Sequence;
pub use summary::{ChangeSummary, ChangeSummaryBuilder};
pub use types::*;
