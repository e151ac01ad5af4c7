//! Error types for the sequencer
//!
//! Errors fall into three groups:
//! - Configuration errors: raised while building a tree, before any
//!   execution context exists
//! - Remote call failures: local to one leaf and reported as node FAILURE,
//!   never thrown through the tree
//! - Tick errors: unexpected failures while ticking, converted to a failed
//!   execution record by the driver

use crate::blackboard::ValueKind;
use thiserror::Error;

/// Errors raised while reading parameters or building a tree
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    // =========================================================================
    // Parameters
    // =========================================================================

    #[error("Parameter '{0}' is not set")]
    MissingParameter(String),

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter {
        name: String,
        reason: String,
    },

    #[error("Parameter 'bt_files' is empty")]
    EmptyTreeSources,

    // =========================================================================
    // Tree definitions
    // =========================================================================

    #[error("Failed to read tree definition '{path}': {reason}")]
    Io {
        path: String,
        reason: String,
    },

    #[error("Invalid tree definition in '{origin}': {reason}")]
    InvalidDefinition {
        origin: String,
        reason: String,
    },

    #[error("Tree '{0}' is not defined in any registered tree definition")]
    UnknownTreeName(String),

    #[error("Sub-tree '{0}' includes itself")]
    RecursiveSubTree(String),

    // =========================================================================
    // Node construction
    // =========================================================================

    #[error("Unknown node type '{type_name}' in tree '{tree}'")]
    UnknownNodeType {
        type_name: String,
        tree: String,
    },

    #[error("Node type '{0}' is already registered")]
    DuplicateNodeType(String),

    #[error("Node '{node}' ({type_name}) expects {expected} children, found {found}")]
    InvalidChildren {
        node: String,
        type_name: String,
        expected: String,
        found: usize,
    },

    #[error("Node '{node}' is missing required attribute '{attribute}'")]
    MissingAttribute {
        node: String,
        attribute: String,
    },

    #[error("Node '{node}' has invalid attribute '{attribute}': {reason}")]
    InvalidAttribute {
        node: String,
        attribute: String,
        reason: String,
    },

    // =========================================================================
    // Controls
    // =========================================================================

    #[error("Control '{0}' is not registered on the blackboard")]
    MissingControl(String),

    #[error("Control '{key}' is a {found} handle, expected {expected}")]
    ControlKindMismatch {
        key: String,
        expected: ValueKind,
        found: ValueKind,
    },
}

/// Kind-checked blackboard access failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BlackboardError {
    #[error("Blackboard entry '{key}' is not set")]
    Missing { key: String },

    #[error("Blackboard entry '{key}' holds a {found} value, expected {expected}")]
    KindMismatch {
        key: String,
        expected: ValueKind,
        found: ValueKind,
    },
}

/// Failures reported by the remote transport or detected by the adapters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("'{name}' rejected the call: {reason}")]
    Rejected {
        name: String,
        reason: String,
    },

    #[error("'{0}' is not available")]
    Unavailable(String),

    #[error("'{0}' was cancelled")]
    Cancelled(String),

    #[error("'{name}' timed out after {timeout_secs:.1}s")]
    Timeout {
        name: String,
        timeout_secs: f64,
    },

    #[error("Backend error on '{name}': {message}")]
    Backend {
        name: String,
        message: String,
    },
}

/// Result type for remote calls
pub type TransportResult<T> = Result<T, TransportError>;

/// Top-level error type of the sequencer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SequencerError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Blackboard(#[from] BlackboardError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Node '{node}' failed: {message}")]
    Tick {
        node: String,
        message: String,
    },

    #[error("Invalid executor state: {0}")]
    InvalidState(String),
}

pub type SequencerResult<T> = Result<T, SequencerError>;
