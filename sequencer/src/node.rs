//! Node trait and runtime node wrapper
//!
//! Every node of a tree instance is a [`TreeNode`]: the bookkeeping shared
//! by all node kinds (identity, status, owned children) around a boxed
//! [`Behavior`] holding the kind-specific logic. Status changes are recorded
//! as [`Transition`]s on the [`TickContext`] and handed to observers by the
//! tree once the tick returns.

use crate::blackboard::Blackboard;
use crate::error::{SequencerError, SequencerResult};
use crate::{NodeId, NodeStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structural kind of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Leaf,
    Decorator,
    Composite,
}

impl NodeKind {
    /// Check a child count against this kind
    pub fn accepts_children(self, count: usize) -> bool {
        match self {
            NodeKind::Leaf => count == 0,
            NodeKind::Decorator => count == 1,
            NodeKind::Composite => count >= 1,
        }
    }

    pub fn expected_children(self) -> &'static str {
        match self {
            NodeKind::Leaf => "no",
            NodeKind::Decorator => "exactly one",
            NodeKind::Composite => "at least one",
        }
    }
}

/// One node status change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub uid: NodeId,
    pub name: String,
    pub type_name: String,
    pub previous: NodeStatus,
    pub status: NodeStatus,
    /// Failure reason, when the node reports one
    pub text: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Per-tick context passed down the tree
pub struct TickContext<'a> {
    blackboard: &'a Blackboard,
    transitions: &'a mut Vec<Transition>,
}

impl<'a> TickContext<'a> {
    pub fn new(blackboard: &'a Blackboard, transitions: &'a mut Vec<Transition>) -> Self {
        Self {
            blackboard,
            transitions,
        }
    }

    pub fn blackboard(&self) -> &'a Blackboard {
        self.blackboard
    }

    fn record(&mut self, transition: Transition) {
        self.transitions.push(transition);
    }
}

/// Kind-specific node logic
///
/// Behaviors never see their own status; [`TreeNode`] tracks it. Children are
/// passed in on every call so composites can tick and halt them.
pub trait Behavior: Send {
    /// Advance the node by one step. Must not block.
    fn tick(&mut self, children: &mut [TreeNode], ctx: &mut TickContext<'_>) -> SequencerResult<NodeStatus>;

    /// Stop any in-flight work. The default halts every child.
    fn halt(&mut self, children: &mut [TreeNode], ctx: &mut TickContext<'_>) {
        for child in children.iter_mut() {
            child.halt(ctx);
        }
    }

    /// Completion fraction of the current activation, if the node knows it
    fn completion(&self, _children: &[TreeNode]) -> Option<f64> {
        None
    }

    /// Reason attached to a FAILURE transition
    fn failure_reason(&self) -> Option<String> {
        None
    }
}

/// A live node owned by a tree instance
pub struct TreeNode {
    uid: NodeId,
    name: String,
    type_name: String,
    kind: NodeKind,
    status: NodeStatus,
    behavior: Box<dyn Behavior>,
    children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn new(
        uid: NodeId,
        name: impl Into<String>,
        type_name: impl Into<String>,
        kind: NodeKind,
        behavior: Box<dyn Behavior>,
        children: Vec<TreeNode>,
    ) -> Self {
        Self {
            uid,
            name: name.into(),
            type_name: type_name.into(),
            kind,
            status: NodeStatus::Idle,
            behavior,
            children,
        }
    }

    pub fn uid(&self) -> NodeId {
        self.uid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn children(&self) -> &[TreeNode] {
        &self.children
    }

    /// Completion fraction in [0, 1]; 1 once the node succeeded
    pub fn completion(&self) -> Option<f64> {
        match self.status {
            NodeStatus::Success => Some(1.0),
            _ => self
                .behavior
                .completion(&self.children)
                .map(|fraction| fraction.clamp(0.0, 1.0)),
        }
    }

    /// Tick the node and record any status change.
    ///
    /// Decorators and composites enter RUNNING before their children are
    /// ticked, so their activation is reported ahead of their children's.
    pub fn tick(&mut self, ctx: &mut TickContext<'_>) -> SequencerResult<NodeStatus> {
        if self.kind != NodeKind::Leaf && self.status != NodeStatus::Running {
            self.set_status(NodeStatus::Running, ctx);
        }

        let status = self.behavior.tick(&mut self.children, ctx)?;
        if status == NodeStatus::Idle {
            return Err(SequencerError::Tick {
                node: self.name.clone(),
                message: "tick returned IDLE".to_string(),
            });
        }

        self.set_status(status, ctx);
        Ok(status)
    }

    /// Halt the node and its subtree, resetting it to IDLE
    pub fn halt(&mut self, ctx: &mut TickContext<'_>) {
        self.behavior.halt(&mut self.children, ctx);
        self.set_status(NodeStatus::Idle, ctx);
    }

    fn set_status(&mut self, status: NodeStatus, ctx: &mut TickContext<'_>) {
        if status == self.status {
            return;
        }
        let text = match status {
            NodeStatus::Failure => self.behavior.failure_reason(),
            _ => None,
        };
        ctx.record(Transition {
            uid: self.uid,
            name: self.name.clone(),
            type_name: self.type_name.clone(),
            previous: self.status,
            status,
            text,
            timestamp: Utc::now(),
        });
        self.status = status;
    }

    /// Depth-first pre-order walk
    pub fn visit(&self, f: &mut dyn FnMut(&TreeNode)) {
        f(self);
        for child in &self.children {
            child.visit(f);
        }
    }

    /// First node in pre-order with the given name
    pub fn find(&self, name: &str) -> Option<&TreeNode> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }
}

impl std::fmt::Debug for TreeNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeNode")
            .field("uid", &self.uid)
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("status", &self.status)
            .field("children", &self.children)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubBehavior;

    fn leaf(uid: NodeId, name: &str, stub: &StubBehavior) -> TreeNode {
        TreeNode::new(uid, name, "Stub", NodeKind::Leaf, Box::new(stub.clone()), vec![])
    }

    #[test]
    fn test_leaf_transitions_only_on_change() {
        let bb = Blackboard::new();
        let mut transitions = Vec::new();
        let stub = StubBehavior::new(&[NodeStatus::Running, NodeStatus::Running, NodeStatus::Success]);
        let mut node = leaf(1, "scan", &stub);

        let mut ctx = TickContext::new(&bb, &mut transitions);
        assert_eq!(node.tick(&mut ctx).unwrap(), NodeStatus::Running);
        assert_eq!(node.tick(&mut ctx).unwrap(), NodeStatus::Running);
        assert_eq!(node.tick(&mut ctx).unwrap(), NodeStatus::Success);

        let pairs: Vec<_> = transitions.iter().map(|t| (t.previous, t.status)).collect();
        assert_eq!(
            pairs,
            vec![
                (NodeStatus::Idle, NodeStatus::Running),
                (NodeStatus::Running, NodeStatus::Success)
            ]
        );
        assert_eq!(stub.ticks(), 3);
    }

    #[test]
    fn test_failure_carries_reason() {
        let bb = Blackboard::new();
        let mut transitions = Vec::new();
        let stub = StubBehavior::new(&[NodeStatus::Failure]).with_reason("scan rejected");
        let mut node = leaf(1, "scan", &stub);

        let mut ctx = TickContext::new(&bb, &mut transitions);
        node.tick(&mut ctx).unwrap();
        assert_eq!(transitions[0].text.as_deref(), Some("scan rejected"));
    }

    #[test]
    fn test_idle_result_is_an_error() {
        let bb = Blackboard::new();
        let mut transitions = Vec::new();
        let stub = StubBehavior::new(&[NodeStatus::Idle]);
        let mut node = leaf(1, "broken", &stub);

        let mut ctx = TickContext::new(&bb, &mut transitions);
        assert!(matches!(node.tick(&mut ctx), Err(SequencerError::Tick { .. })));
    }

    #[test]
    fn test_halt_resets_to_idle() {
        let bb = Blackboard::new();
        let mut transitions = Vec::new();
        let stub = StubBehavior::new(&[NodeStatus::Running]);
        let mut node = leaf(1, "execute", &stub);

        let mut ctx = TickContext::new(&bb, &mut transitions);
        node.tick(&mut ctx).unwrap();
        node.halt(&mut ctx);
        assert_eq!(node.status(), NodeStatus::Idle);
        assert_eq!(stub.halts(), 1);
        assert_eq!(transitions.last().map(|t| t.status), Some(NodeStatus::Idle));
    }

    #[test]
    fn test_find_and_visit() {
        let a = StubBehavior::new(&[NodeStatus::Success]);
        let b = StubBehavior::new(&[NodeStatus::Success]);
        let root = TreeNode::new(
            0,
            "root",
            "Stub",
            NodeKind::Composite,
            Box::new(StubBehavior::new(&[NodeStatus::Success])),
            vec![leaf(1, "a", &a), leaf(2, "b", &b)],
        );

        assert_eq!(root.find("b").map(TreeNode::uid), Some(2));
        assert!(root.find("c").is_none());

        let mut names = Vec::new();
        root.visit(&mut |node| names.push(node.name().to_string()));
        assert_eq!(names, vec!["root", "a", "b"]);
    }

    #[test]
    fn test_kind_child_counts() {
        assert!(NodeKind::Leaf.accepts_children(0));
        assert!(!NodeKind::Leaf.accepts_children(1));
        assert!(NodeKind::Decorator.accepts_children(1));
        assert!(!NodeKind::Decorator.accepts_children(2));
        assert!(!NodeKind::Composite.accepts_children(0));
    }
}
