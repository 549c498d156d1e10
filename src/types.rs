//! Core data types used throughout the rewind library
//!
//! This module contains the identities and values shared by the graph,
//! the notification substrate and the change log.
//!
//! ## Overview
//!
//! - **Identities**: `NodeId`, `TypeId`, `PropertyId`, `ObserverId` - dense
//!   arena/table indices, compared by identity and never by value
//! - **Values**: `Value`, `MixedEntry` - property contents, including
//!   references to other nodes and mixed-content sequences
//! - **Notifications**: `ChangeKind` - the kinds of property change
//! - **Configuration**: `SummaryConfig` - change summary behaviour
//! - **Results**: `ApplyResult`, `SummaryStats`
//!
//! ## Examples
//!
//! ```rust
//! use rewind::types::{Value, NodeId};
//!
//! let name = Value::from("Fred");
//! assert_eq!(name.as_str(), Some("Fred"));
//!
//! let children = Value::List(vec![Value::Node(NodeId(1)), Value::Node(NodeId(2))]);
//! assert_eq!(children.nodes(), vec![NodeId(1), NodeId(2)]);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a node in a [`DataGraph`](crate::graph::DataGraph)
///
/// An index into the graph's dense node store. Two nodes are the same node
/// exactly when their ids are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Position in the node store
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of a type in a [`Schema`](crate::schema::Schema)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeId(pub u32);

impl TypeId {
    /// Position in the schema's type table
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a property in its type's descriptor table
///
/// Property ids are only meaningful together with the type that declares
/// them; slot `i` of a node holds the value of property `PropertyId(i)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyId(pub u32);

impl PropertyId {
    /// Position in the descriptor table and in the node's slots
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle of an observer registered with a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub u32);

/// Contents of a property slot
///
/// Single-valued properties hold a scalar, `Node` or `Null`. Many-valued
/// properties hold a `List`. Mixed-content properties hold a `Mixed`
/// sequence of entries tagged with the concrete property they belong to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    /// No value
    #[default]
    Null,
    /// Boolean attribute
    Bool(bool),
    /// Integer attribute
    Int(i64),
    /// Floating point attribute
    Float(f64),
    /// String attribute
    Str(String),
    /// Reference to a node (containment or cross-reference)
    Node(NodeId),
    /// Ordered values of a many-valued property
    List(Vec<Value>),
    /// Ordered, heterogeneous mixed-content entries
    Mixed(Vec<MixedEntry>),
}

impl Value {
    /// Check whether this is `Null`
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The referenced node, if this is a node reference
    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Value::Node(id) => Some(*id),
            _ => None,
        }
    }

    /// The string contents, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The integer contents, if this is an integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The list items, if this is a list
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// The mixed entries, if this is a mixed sequence
    pub fn as_mixed(&self) -> Option<&[MixedEntry]> {
        match self {
            Value::Mixed(entries) => Some(entries),
            _ => None,
        }
    }

    /// Every node referenced directly by this value, in order
    ///
    /// Looks one level into lists and mixed entries.
    pub fn nodes(&self) -> Vec<NodeId> {
        match self {
            Value::Node(id) => vec![*id],
            Value::List(items) => items.iter().filter_map(Value::as_node).collect(),
            Value::Mixed(entries) => entries.iter().filter_map(|e| e.value.as_node()).collect(),
            _ => Vec::new(),
        }
    }

    /// Number of items for lists and mixed sequences, 1 for a present scalar
    pub fn len(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::List(items) => items.len(),
            Value::Mixed(entries) => entries.len(),
            _ => 1,
        }
    }

    /// Check whether `len()` is zero
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short name of the variant, used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Node(_) => "node",
            Value::List(_) => "list",
            Value::Mixed(_) => "mixed",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<NodeId> for Value {
    fn from(id: NodeId) -> Self {
        Value::Node(id)
    }
}

impl From<Option<NodeId>> for Value {
    fn from(id: Option<NodeId>) -> Self {
        id.map_or(Value::Null, Value::Node)
    }
}

/// One item of a mixed-content sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixedEntry {
    /// Concrete property this entry belongs to
    pub property: PropertyId,
    /// The entry's value (a node for containment members)
    pub value: Value,
}

impl MixedEntry {
    /// Create an entry
    pub fn new(property: PropertyId, value: impl Into<Value>) -> Self {
        Self {
            property,
            value: value.into(),
        }
    }
}

/// Kind of property change carried by a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Whole value replaced
    Set,
    /// Value reverted to its default and marked unset
    Unset,
    /// Item inserted into a list
    Add,
    /// Item removed from a list
    Remove,
    /// Item moved within a list
    Move,
}

/// Configuration for a change summary
///
/// # Examples
///
/// ```rust
/// use rewind::types::SummaryConfig;
///
/// let config = SummaryConfig {
///     prune_unchanged: false,
///     ..Default::default()
/// };
/// assert!(config.verify_undo);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryConfig {
    /// Drop consolidated changes whose prior state equals the live state
    pub prune_unchanged: bool,
    /// Check created/baseline reachability after undo
    pub verify_undo: bool,
    /// Veto writes to read-only properties of tracked nodes
    pub strict_read_only: bool,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            prune_unchanged: true,
            verify_undo: true,
            strict_read_only: true,
        }
    }
}

/// Result of an undo (apply) operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyResult {
    /// Session whose changes were reverted
    pub session_id: Option<Uuid>,
    /// Nodes whose properties were written
    pub nodes_touched: usize,
    /// Containment properties restored
    pub containment_restored: usize,
    /// Attribute and cross-reference properties restored
    pub properties_restored: usize,
    /// Created nodes detached again by the reversal
    pub nodes_detached: usize,
    /// Time taken in milliseconds
    pub duration_ms: u64,
    /// Anything unusual noticed while reverting
    pub warnings: Vec<String>,
}

/// Counts describing a consolidated change summary
///
/// # Examples
///
/// ```rust
/// # use rewind::types::SummaryStats;
/// let stats = SummaryStats { created: 2, deleted: 1, modified: 3, feature_changes: 7 };
/// assert!(stats.has_changes());
/// assert_eq!(stats.total_objects(), 6);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryStats {
    /// Nodes that entered the tracked tree
    pub created: usize,
    /// Nodes no longer reachable from the tracked roots
    pub deleted: usize,
    /// Pre-existing nodes with changed properties
    pub modified: usize,
    /// Consolidated feature changes across all nodes
    pub feature_changes: usize,
}

impl SummaryStats {
    /// Check if anything changed
    pub fn has_changes(&self) -> bool {
        self.created > 0 || self.deleted > 0 || self.modified > 0
    }

    /// Created, deleted and modified nodes together
    pub fn total_objects(&self) -> usize {
        self.created + self.deleted + self.modified
    }
}
