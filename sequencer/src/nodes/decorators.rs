//! Single-child decorators

use crate::error::{SequencerError, SequencerResult};
use crate::node::{Behavior, TickContext, TreeNode};
use crate::NodeStatus;

fn only_child<'c>(name: &str, children: &'c mut [TreeNode]) -> SequencerResult<&'c mut TreeNode> {
    if children.len() != 1 {
        return Err(SequencerError::Tick {
            node: name.to_string(),
            message: format!("decorator has {} children, expected 1", children.len()),
        });
    }
    Ok(&mut children[0])
}

/// Writes the child's progress to a progress indicator.
///
/// The indicator moves from its value at activation towards `target` as the
/// child reports its completion fraction, and is set to `target` when the
/// child succeeds. A child without a completion fraction leaves the
/// indicator untouched until it succeeds. Failure leaves it where it is.
pub struct ProgressDecorator {
    name: String,
    key: String,
    target: f64,
    start: Option<f64>,
}

impl ProgressDecorator {
    pub fn new(name: impl Into<String>, key: impl Into<String>, target: f64) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            target: target.clamp(0.0, 100.0),
            start: None,
        }
    }
}

impl Behavior for ProgressDecorator {
    fn tick(&mut self, children: &mut [TreeNode], ctx: &mut TickContext<'_>) -> SequencerResult<NodeStatus> {
        let bar = ctx.blackboard().progress(&self.key)?;
        let start = *self.start.get_or_insert(bar.value() as f64);

        let child = only_child(&self.name, children)?;
        let status = child.tick(ctx)?;
        match status {
            NodeStatus::Running => {
                if let Some(fraction) = child.completion() {
                    bar.set(start + (self.target - start) * fraction);
                }
            }
            NodeStatus::Success => {
                bar.set(self.target);
                self.start = None;
            }
            _ => self.start = None,
        }
        Ok(status)
    }

    fn halt(&mut self, children: &mut [TreeNode], ctx: &mut TickContext<'_>) {
        self.start = None;
        for child in children.iter_mut() {
            child.halt(ctx);
        }
    }

    fn completion(&self, children: &[TreeNode]) -> Option<f64> {
        children.first().and_then(TreeNode::completion)
    }
}

/// Switches the paged view once per activation, then forwards its child
pub struct SetPage {
    name: String,
    key: String,
    index: usize,
    switched: bool,
}

impl SetPage {
    pub fn new(name: impl Into<String>, key: impl Into<String>, index: usize) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            index,
            switched: false,
        }
    }
}

impl Behavior for SetPage {
    fn tick(&mut self, children: &mut [TreeNode], ctx: &mut TickContext<'_>) -> SequencerResult<NodeStatus> {
        if !self.switched {
            let page = ctx.blackboard().page(&self.key)?;
            if page.set_current(self.index) {
                tracing::debug!("Switched to page {}", self.index);
            }
            self.switched = true;
        }

        let status = only_child(&self.name, children)?.tick(ctx)?;
        if status.is_completed() {
            self.switched = false;
        }
        Ok(status)
    }

    fn halt(&mut self, children: &mut [TreeNode], ctx: &mut TickContext<'_>) {
        self.switched = false;
        for child in children.iter_mut() {
            child.halt(ctx);
        }
    }

    fn completion(&self, children: &[TreeNode]) -> Option<f64> {
        children.first().and_then(TreeNode::completion)
    }
}

/// Swaps SUCCESS and FAILURE
pub struct Inverter {
    name: String,
}

impl Inverter {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Behavior for Inverter {
    fn tick(&mut self, children: &mut [TreeNode], ctx: &mut TickContext<'_>) -> SequencerResult<NodeStatus> {
        Ok(match only_child(&self.name, children)?.tick(ctx)? {
            NodeStatus::Success => NodeStatus::Failure,
            NodeStatus::Failure => NodeStatus::Success,
            other => other,
        })
    }
}

/// Reports FAILURE of its child as SUCCESS
pub struct ForceSuccess {
    name: String,
}

impl ForceSuccess {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Behavior for ForceSuccess {
    fn tick(&mut self, children: &mut [TreeNode], ctx: &mut TickContext<'_>) -> SequencerResult<NodeStatus> {
        Ok(match only_child(&self.name, children)?.tick(ctx)? {
            NodeStatus::Failure => NodeStatus::Success,
            other => other,
        })
    }

    fn completion(&self, children: &[TreeNode]) -> Option<f64> {
        children.first().and_then(TreeNode::completion)
    }
}
