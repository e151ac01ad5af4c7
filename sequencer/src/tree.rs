//! Tree instance: the root node bound to a blackboard

use crate::blackboard::SharedBlackboard;
use crate::error::SequencerResult;
use crate::node::{TickContext, Transition, TreeNode};
use crate::NodeStatus;
use tokio::sync::mpsc;

/// One instantiated tree
///
/// Status transitions collected during a tick or halt are handed to every
/// subscriber once the call returns. Sending never blocks; closed
/// subscribers are dropped.
pub struct Tree {
    root: TreeNode,
    blackboard: SharedBlackboard,
    observers: Vec<mpsc::UnboundedSender<Transition>>,
}

impl Tree {
    pub fn new(root: TreeNode, blackboard: SharedBlackboard) -> Self {
        Self {
            root,
            blackboard,
            observers: Vec::new(),
        }
    }

    /// Receive every status transition from now on.
    ///
    /// The stream ends when the tree is dropped.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Transition> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.push(tx);
        rx
    }

    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    pub fn blackboard(&self) -> &SharedBlackboard {
        &self.blackboard
    }

    pub fn status(&self) -> NodeStatus {
        self.root.status()
    }

    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.root.visit(&mut |_| count += 1);
        count
    }

    /// Tick the root once
    pub fn tick_once(&mut self) -> SequencerResult<NodeStatus> {
        let mut transitions = Vec::new();
        let result = {
            let mut ctx = TickContext::new(&self.blackboard, &mut transitions);
            self.root.tick(&mut ctx)
        };
        self.dispatch(transitions);
        result
    }

    /// Halt every node, cancelling in-flight actions
    pub fn halt(&mut self) {
        let mut transitions = Vec::new();
        {
            let mut ctx = TickContext::new(&self.blackboard, &mut transitions);
            self.root.halt(&mut ctx);
        }
        self.dispatch(transitions);
    }

    fn dispatch(&mut self, transitions: Vec<Transition>) {
        if transitions.is_empty() {
            return;
        }
        self.observers.retain(|tx| !tx.is_closed());
        for transition in transitions {
            for tx in &self.observers {
                let _ = tx.send(transition.clone());
            }
        }
    }
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("root", &self.root)
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::Blackboard;
    use crate::node::NodeKind;
    use crate::nodes::control::SequenceWithMemory;
    use crate::testing::StubBehavior;

    fn two_step_tree(a: &StubBehavior, b: &StubBehavior) -> Tree {
        let children = vec![
            TreeNode::new(1, "a", "Stub", NodeKind::Leaf, Box::new(a.clone()), vec![]),
            TreeNode::new(2, "b", "Stub", NodeKind::Leaf, Box::new(b.clone()), vec![]),
        ];
        let root = TreeNode::new(
            0,
            "sequence",
            "SequenceWithMemory",
            NodeKind::Composite,
            Box::new(SequenceWithMemory::new()),
            children,
        );
        Tree::new(root, Blackboard::shared())
    }

    #[test]
    fn test_transitions_reach_subscribers_in_order() {
        let a = StubBehavior::new(&[NodeStatus::Success]);
        let b = StubBehavior::new(&[NodeStatus::Running, NodeStatus::Success]);
        let mut tree = two_step_tree(&a, &b);
        let mut rx = tree.subscribe();

        assert_eq!(tree.tick_once().unwrap(), NodeStatus::Running);
        assert_eq!(tree.tick_once().unwrap(), NodeStatus::Success);
        drop(tree);

        let mut seen = Vec::new();
        while let Ok(t) = rx.try_recv() {
            seen.push(format!("{}:{}->{}", t.name, t.previous, t.status));
        }
        assert_eq!(
            seen,
            vec![
                "sequence:IDLE->RUNNING",
                "a:IDLE->SUCCESS",
                "b:IDLE->RUNNING",
                "b:RUNNING->SUCCESS",
                "sequence:RUNNING->SUCCESS",
            ]
        );
    }

    #[test]
    fn test_completed_child_not_re_executed() {
        let a = StubBehavior::new(&[NodeStatus::Success]);
        let b = StubBehavior::new(&[NodeStatus::Running, NodeStatus::Running, NodeStatus::Success]);
        let mut tree = two_step_tree(&a, &b);

        while tree.tick_once().unwrap() == NodeStatus::Running {}
        assert_eq!(a.ticks(), 1);
        assert_eq!(b.ticks(), 3);
    }

    #[test]
    fn test_halt_resets_tree() {
        let a = StubBehavior::new(&[NodeStatus::Running]);
        let b = StubBehavior::new(&[NodeStatus::Success]);
        let mut tree = two_step_tree(&a, &b);
        tree.tick_once().unwrap();
        tree.halt();
        assert_eq!(tree.status(), NodeStatus::Idle);
        assert_eq!(a.halts(), 1);
        assert_eq!(tree.node_count(), 3);
    }

    #[test]
    fn test_closed_subscriber_is_dropped() {
        let a = StubBehavior::new(&[NodeStatus::Success]);
        let b = StubBehavior::new(&[NodeStatus::Success]);
        let mut tree = two_step_tree(&a, &b);
        drop(tree.subscribe());
        tree.tick_once().unwrap();
        assert!(tree.observers.is_empty());
    }
}
