//! Operator gating nodes

use crate::blackboard::Blackboard;
use crate::controls::ButtonHandle;
use crate::error::SequencerResult;
use crate::node::{Behavior, TickContext, TreeNode};
use crate::NodeStatus;

/// Waits for one click on a button.
///
/// Arming records the button's click count and enables it; a count above
/// that baseline on a later tick is exactly one click, so the node succeeds
/// once per click no matter how many ticks pass in between.
pub struct ButtonMonitor {
    key: String,
    baseline: Option<u64>,
}

impl ButtonMonitor {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            baseline: None,
        }
    }
}

impl Behavior for ButtonMonitor {
    fn tick(&mut self, _children: &mut [TreeNode], ctx: &mut TickContext<'_>) -> SequencerResult<NodeStatus> {
        let button = ctx.blackboard().button(&self.key)?;
        match self.baseline {
            None => {
                self.baseline = Some(button.click_count());
                button.set_enabled(true);
                Ok(NodeStatus::Running)
            }
            Some(baseline) if button.click_count() > baseline => {
                button.set_enabled(false);
                self.baseline = None;
                tracing::debug!("Button '{}' clicked", self.key);
                Ok(NodeStatus::Success)
            }
            Some(_) => Ok(NodeStatus::Running),
        }
    }

    fn halt(&mut self, _children: &mut [TreeNode], ctx: &mut TickContext<'_>) {
        if self.baseline.take().is_some() {
            disable(ctx.blackboard(), &self.key);
        }
    }
}

/// Approve/reject gate over two buttons
///
/// SUCCESS on an approve click, FAILURE on a reject click. When both were
/// clicked since the previous tick, approve wins.
pub struct ButtonApproval {
    approve_key: String,
    reject_key: String,
    baseline: Option<(u64, u64)>,
    reason: Option<String>,
}

impl ButtonApproval {
    pub fn new(approve_key: impl Into<String>, reject_key: impl Into<String>) -> Self {
        Self {
            approve_key: approve_key.into(),
            reject_key: reject_key.into(),
            baseline: None,
            reason: None,
        }
    }

    fn disarm(&mut self, approve: &ButtonHandle, reject: &ButtonHandle) {
        approve.set_enabled(false);
        reject.set_enabled(false);
        self.baseline = None;
    }
}

impl Behavior for ButtonApproval {
    fn tick(&mut self, _children: &mut [TreeNode], ctx: &mut TickContext<'_>) -> SequencerResult<NodeStatus> {
        let bb = ctx.blackboard();
        let approve = bb.button(&self.approve_key)?;
        let reject = bb.button(&self.reject_key)?;

        let Some((approve_base, reject_base)) = self.baseline else {
            self.reason = None;
            self.baseline = Some((approve.click_count(), reject.click_count()));
            approve.set_enabled(true);
            reject.set_enabled(true);
            return Ok(NodeStatus::Running);
        };

        if approve.click_count() > approve_base {
            self.disarm(&approve, &reject);
            tracing::info!("Operator approved via '{}'", self.approve_key);
            return Ok(NodeStatus::Success);
        }
        if reject.click_count() > reject_base {
            self.disarm(&approve, &reject);
            let reason = format!("Operator rejected via '{}'", self.reject_key);
            tracing::info!("{}", reason);
            bb.set_error_message(reason.as_str());
            self.reason = Some(reason);
            return Ok(NodeStatus::Failure);
        }
        Ok(NodeStatus::Running)
    }

    fn halt(&mut self, _children: &mut [TreeNode], ctx: &mut TickContext<'_>) {
        if self.baseline.take().is_some() {
            disable(ctx.blackboard(), &self.approve_key);
            disable(ctx.blackboard(), &self.reject_key);
        }
    }

    fn failure_reason(&self) -> Option<String> {
        self.reason.clone()
    }
}

fn disable(blackboard: &Blackboard, key: &str) {
    match blackboard.button(key) {
        Ok(button) => button.set_enabled(false),
        Err(e) => tracing::warn!("Cannot disable button on halt: {}", e),
    }
}
