//! Scan-and-plan behavior tree sequencer
//!
//! Drives the multi-step robot workflow (scan, tool path planning, motion
//! planning, execution) by ticking a behavior tree whose leaves issue remote
//! calls against the robot backend and whose inner nodes gate the workflow on
//! operator input.
//!
//! The crate is split along the lifecycle of one run:
//!
//! - [`config`] reads the workflow parameters once at build time
//! - [`registry`] turns tree definitions into live [`tree::Tree`] instances
//! - [`nodes`] holds the built-in node catalog
//! - [`executor`] ticks a tree to completion on its own task
//! - [`logger`] renders every node status transition to a record sink

pub mod blackboard;
pub mod config;
pub mod controls;
pub mod definition;
pub mod error;
pub mod executor;
pub mod logger;
pub mod node;
pub mod nodes;
pub mod registry;
pub mod transport;
pub mod tree;

#[cfg(test)]
pub(crate) mod testing;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use blackboard::{Blackboard, BlackboardValue, SharedBlackboard, ValueKind, ERROR_MESSAGE_KEY};
pub use config::{ParameterSource, ParameterValue, StaticParameters, WorkflowConfig};
pub use controls::{ButtonHandle, ControlPanel, PageHandle, ProgressHandle};
pub use definition::{NodeDefinition, TreeDefinition};
pub use error::{
    BlackboardError, ConfigurationError, SequencerError, SequencerResult, TransportError,
    TransportResult,
};
pub use executor::{ExecutionDriver, ExecutionRecord, ExecutorEvent, ExecutorState, HaltHandle, RunHandle};
pub use logger::{render_transition, MemorySink, RecordSink, StatusLogger};
pub use node::{Behavior, NodeKind, TickContext, Transition, TreeNode};
pub use registry::{build_workflow_tree, NodeConfig, NodeRegistry};
pub use transport::{
    RemoteTimeouts, RemoteTransport, SharedTransport, TimeoutClass, TriggerResponse,
};
pub use tree::Tree;

/// Unique identifier of a node within one tree instance, assigned in build order
pub type NodeId = u32;

/// Result of ticking a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    Idle,
    Running,
    Success,
    Failure,
}

impl NodeStatus {
    /// SUCCESS or FAILURE
    pub fn is_completed(self) -> bool {
        matches!(self, NodeStatus::Success | NodeStatus::Failure)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NodeStatus::Idle => "IDLE",
            NodeStatus::Running => "RUNNING",
            NodeStatus::Success => "SUCCESS",
            NodeStatus::Failure => "FAILURE",
        };
        f.write_str(label)
    }
}
