//! Error types for the rewind library
//!
//! This module defines every error that session, query, mutation and undo
//! operations can report. Session contract violations (`AlreadyRecording`,
//! `NotRecording`, `ApplyDuringRecording`, `ReadOnlyPropertyViolation`) are
//! signalled synchronously at the offending call and are never retried.

use crate::types::NodeId;
use thiserror::Error;

/// Type alias for Results in the rewind library
pub type Result<T> = std::result::Result<T, RewindError>;

/// Main error type for all rewind operations
#[derive(Debug, Error)]
pub enum RewindError {
    /// `begin_logging` called while a session is already recording
    #[error("Already logging")]
    AlreadyRecording,

    /// Operation requires an active (or previous) recording session
    #[error("Not currently logging")]
    NotRecording,

    /// Mutation of a read-only property on a tracked node
    #[error("The property '{property}' of type '{type_name}' is read only")]
    ReadOnlyPropertyViolation {
        /// Name of the owning type
        type_name: String,
        /// Name of the read-only property
        property: String,
    },

    /// `apply` called while the session is still recording
    #[error("Cannot apply changes while logging is active")]
    ApplyDuringRecording,

    /// Node id does not belong to the graph
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Type name is not declared by the schema
    #[error("Unknown type: {0}")]
    UnknownType(String),

    /// Property name or index is not declared by the type
    #[error("Unknown property '{property}' on type '{type_name}'")]
    UnknownProperty {
        /// Name of the type that was searched
        type_name: String,
        /// The property name or index that was requested
        property: String,
    },

    /// Value does not fit the property's declared kind or data type
    #[error("Type mismatch for property '{property}' - expected: {expected}, found: {found}")]
    TypeMismatch {
        /// Property being written
        property: String,
        /// What the schema allows
        expected: String,
        /// What was supplied
        found: String,
    },

    /// List operation on a single-valued property
    #[error("Property '{0}' is not many-valued")]
    NotMany(String),

    /// List position outside the current bounds
    #[error("Index {index} out of bounds for list of length {len}")]
    IndexOutOfBounds {
        /// Requested position
        index: usize,
        /// Current list length
        len: usize,
    },

    /// Containment edit would make a node its own ancestor
    #[error("Circular containment: {child} cannot be contained by {parent}")]
    CircularContainment {
        /// Prospective container
        parent: NodeId,
        /// Node that would be contained
        child: NodeId,
    },

    /// Direct write to a property derived from mixed content
    #[error("Property '{0}' is derived from mixed content and cannot be written directly")]
    DerivedProperty(String),

    /// Schema definition is inconsistent
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// Post-undo consistency check failed; the graph must be discarded
    #[error("Undo left the graph inconsistent: {0}")]
    UndoInconsistent(String),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RewindError {
    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        RewindError::Internal(msg.into())
    }

    /// Create a schema error with a custom message
    pub fn invalid_schema(msg: impl Into<String>) -> Self {
        RewindError::InvalidSchema(msg.into())
    }

    /// Create a type mismatch error
    pub fn type_mismatch(
        property: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        RewindError::TypeMismatch {
            property: property.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Check if this error is a local violation of the session contract
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            RewindError::AlreadyRecording
                | RewindError::NotRecording
                | RewindError::ReadOnlyPropertyViolation { .. }
                | RewindError::ApplyDuringRecording
        )
    }

    /// Check if this error leaves the graph in an undefined state
    ///
    /// A failure in the middle of `apply` leaves the graph partially
    /// reverted. Callers must discard the graph in that case.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RewindError::UndoInconsistent(_) | RewindError::Internal(_)
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            RewindError::AlreadyRecording => {
                "A change summary is already logging. Call 'end_logging()' before starting a new session.".to_string()
            }
            RewindError::NotRecording => {
                "No logging session is active. Call 'begin_logging()' first.".to_string()
            }
            RewindError::ApplyDuringRecording => {
                "Changes cannot be applied while logging. Call 'end_logging()' first or use 'undo_changes()'.".to_string()
            }
            RewindError::UndoInconsistent(detail) => {
                format!("Undo aborted with the graph in an undefined state ({}). Discard this graph.", detail)
            }
            _ => self.to_string(),
        }
    }
}
