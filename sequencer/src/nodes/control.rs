//! Composite control-flow nodes

use crate::error::SequencerResult;
use crate::node::{Behavior, TickContext, TreeNode};
use crate::NodeStatus;

/// Halt every child that is still running
fn halt_running(children: &mut [TreeNode], ctx: &mut TickContext<'_>) {
    for child in children.iter_mut().filter(|c| c.status() == NodeStatus::Running) {
        child.halt(ctx);
    }
}

/// Sequence that remembers its position across ticks.
///
/// Children that already succeeded in the current activation are not ticked
/// again. On a child FAILURE the children still running are halted and the
/// sequence starts over from the first child on its next activation.
#[derive(Default)]
pub struct SequenceWithMemory {
    current: usize,
}

impl SequenceWithMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Behavior for SequenceWithMemory {
    fn tick(&mut self, children: &mut [TreeNode], ctx: &mut TickContext<'_>) -> SequencerResult<NodeStatus> {
        while let Some(child) = children.get_mut(self.current) {
            match child.tick(ctx)? {
                NodeStatus::Success => self.current += 1,
                NodeStatus::Failure => {
                    halt_running(children, ctx);
                    self.current = 0;
                    return Ok(NodeStatus::Failure);
                }
                status => return Ok(status),
            }
        }
        self.current = 0;
        Ok(NodeStatus::Success)
    }

    fn halt(&mut self, children: &mut [TreeNode], ctx: &mut TickContext<'_>) {
        self.current = 0;
        for child in children.iter_mut() {
            child.halt(ctx);
        }
    }

    fn completion(&self, children: &[TreeNode]) -> Option<f64> {
        if children.is_empty() {
            return None;
        }
        let partial = children
            .get(self.current)
            .and_then(TreeNode::completion)
            .unwrap_or(0.0);
        Some((self.current as f64 + partial) / children.len() as f64)
    }
}

/// Stateless sequence: every tick starts again from the first child
#[derive(Default)]
pub struct Sequence;

impl Behavior for Sequence {
    fn tick(&mut self, children: &mut [TreeNode], ctx: &mut TickContext<'_>) -> SequencerResult<NodeStatus> {
        for index in 0..children.len() {
            match children[index].tick(ctx)? {
                NodeStatus::Success => continue,
                status => {
                    halt_running(&mut children[index + 1..], ctx);
                    return Ok(status);
                }
            }
        }
        Ok(NodeStatus::Success)
    }
}

/// Ticks children in order until one succeeds
#[derive(Default)]
pub struct Fallback {
    current: usize,
}

impl Behavior for Fallback {
    fn tick(&mut self, children: &mut [TreeNode], ctx: &mut TickContext<'_>) -> SequencerResult<NodeStatus> {
        while let Some(child) = children.get_mut(self.current) {
            match child.tick(ctx)? {
                NodeStatus::Failure => self.current += 1,
                NodeStatus::Success => {
                    self.current = 0;
                    return Ok(NodeStatus::Success);
                }
                status => return Ok(status),
            }
        }
        self.current = 0;
        Ok(NodeStatus::Failure)
    }

    fn halt(&mut self, children: &mut [TreeNode], ctx: &mut TickContext<'_>) {
        self.current = 0;
        for child in children.iter_mut() {
            child.halt(ctx);
        }
    }
}

/// Ticks all children every tick and completes on thresholds.
///
/// Succeeds once `success_threshold` children succeeded, fails once
/// `failure_threshold` children failed or success became unreachable.
/// Children that completed are not ticked again within one activation.
pub struct Parallel {
    success_threshold: usize,
    failure_threshold: usize,
    done: Vec<Option<NodeStatus>>,
}

impl Parallel {
    pub fn new(success_threshold: usize, failure_threshold: usize) -> Self {
        Self {
            success_threshold,
            failure_threshold,
            done: Vec::new(),
        }
    }

    fn finish(&mut self, children: &mut [TreeNode], ctx: &mut TickContext<'_>, status: NodeStatus) -> NodeStatus {
        halt_running(children, ctx);
        self.done.clear();
        status
    }
}

impl Behavior for Parallel {
    fn tick(&mut self, children: &mut [TreeNode], ctx: &mut TickContext<'_>) -> SequencerResult<NodeStatus> {
        if self.done.len() != children.len() {
            self.done = vec![None; children.len()];
        }

        for (child, done) in children.iter_mut().zip(self.done.iter_mut()) {
            if done.is_none() {
                let status = child.tick(ctx)?;
                if status.is_completed() {
                    *done = Some(status);
                }
            }
        }

        let successes = self.done.iter().filter(|s| **s == Some(NodeStatus::Success)).count();
        let failures = self.done.iter().filter(|s| **s == Some(NodeStatus::Failure)).count();

        if successes >= self.success_threshold {
            return Ok(self.finish(children, ctx, NodeStatus::Success));
        }
        if failures >= self.failure_threshold || children.len() - failures < self.success_threshold {
            return Ok(self.finish(children, ctx, NodeStatus::Failure));
        }
        Ok(NodeStatus::Running)
    }

    fn halt(&mut self, children: &mut [TreeNode], ctx: &mut TickContext<'_>) {
        self.done.clear();
        for child in children.iter_mut() {
            child.halt(ctx);
        }
    }
}
