//! Status logger
//!
//! Renders every node status transition of a tree into an append-only
//! record sink. The tree only enqueues transitions; rendering and appending
//! run on a separate task so a slow sink never stalls the tick loop.

use crate::error::{SequencerError, SequencerResult};
use crate::node::Transition;
use crate::tree::Tree;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Append-only text record
pub trait RecordSink: Send + Sync {
    fn append(&self, line: &str);

    /// Start a fresh record
    fn clear(&self) {}
}

/// Record sink keeping lines in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl RecordSink for MemorySink {
    fn append(&self, line: &str) {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).push(line.to_string());
    }

    fn clear(&self) {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// `[12:00:01.250] scan (RemoteTrigger): IDLE -> SUCCESS`, plus `: <text>`
/// when the transition carries one
pub fn render_transition(transition: &Transition) -> String {
    let mut line = format!(
        "[{}] {} ({}): {} -> {}",
        transition.timestamp.format("%H:%M:%S%.3f"),
        transition.name,
        transition.type_name,
        transition.previous,
        transition.status
    );
    if let Some(text) = transition.text.as_deref().filter(|t| !t.is_empty()) {
        line.push_str(": ");
        line.push_str(text);
    }
    line
}

/// Observer writing one line per transition
pub struct StatusLogger {
    worker: JoinHandle<usize>,
}

impl StatusLogger {
    /// Subscribe to `tree` and start the writer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach(tree: &mut Tree, sink: Arc<dyn RecordSink>) -> SequencerResult<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SequencerError::InvalidState(format!("Cannot attach logger without a tokio runtime: {}", e)))?;
        let mut transitions = tree.subscribe();

        let worker = runtime.spawn(async move {
            let mut written = 0;
            while let Some(transition) = transitions.recv().await {
                sink.append(&render_transition(&transition));
                written += 1;
            }
            written
        });

        Ok(Self { worker })
    }

    /// Wait until the tree is gone and every transition is written.
    ///
    /// Returns the number of lines written.
    pub async fn finish(self) -> usize {
        match self.worker.await {
            Ok(written) => written,
            Err(e) => {
                tracing::error!("Status logger worker failed: {}", e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::Blackboard;
    use crate::executor::ExecutionDriver;
    use crate::node::{NodeKind, TreeNode};
    use crate::testing::StubBehavior;
    use crate::NodeStatus;
    use chrono::{TimeZone, Utc};

    fn transition(text: Option<&str>) -> Transition {
        Transition {
            uid: 3,
            name: "plan".to_string(),
            type_name: "RemoteRequest".to_string(),
            previous: NodeStatus::Running,
            status: NodeStatus::Failure,
            text: text.map(str::to_string),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 1).unwrap(),
        }
    }

    #[test]
    fn test_render_transition() {
        assert_eq!(
            render_transition(&transition(None)),
            "[12:00:01.000] plan (RemoteRequest): RUNNING -> FAILURE"
        );
        assert_eq!(
            render_transition(&transition(Some("'plan' timed out after 5.0s"))),
            "[12:00:01.000] plan (RemoteRequest): RUNNING -> FAILURE: 'plan' timed out after 5.0s"
        );
        assert!(!render_transition(&transition(Some(""))).ends_with(": "));
    }

    #[test]
    fn test_attach_requires_runtime() {
        let root = TreeNode::new(0, "root", "Stub", NodeKind::Leaf, Box::new(StubBehavior::new(&[])), vec![]);
        let mut tree = Tree::new(root, Blackboard::shared());
        let sink: Arc<dyn RecordSink> = Arc::new(MemorySink::new());
        assert!(StatusLogger::attach(&mut tree, sink).is_err());
    }

    #[tokio::test]
    async fn test_every_transition_recorded() {
        let stub = StubBehavior::new(&[NodeStatus::Running, NodeStatus::Running, NodeStatus::Failure])
            .with_reason("part not found");
        let root = TreeNode::new(0, "scan", "Stub", NodeKind::Leaf, Box::new(stub), vec![]);
        let mut tree = Tree::new(root, Blackboard::shared());

        let sink = Arc::new(MemorySink::new());
        let logger = StatusLogger::attach(&mut tree, sink.clone()).unwrap();
        let record = ExecutionDriver::new(tree).start().unwrap().wait().await.unwrap();
        assert_eq!(record.status, NodeStatus::Failure);

        assert_eq!(logger.finish().await, 2);
        let lines = sink.lines();
        assert!(lines[0].ends_with("scan (Stub): IDLE -> RUNNING"));
        assert!(lines[1].ends_with("scan (Stub): RUNNING -> FAILURE: part not found"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_workflow_records_six_lines() {
        let transport = Arc::new(crate::testing::ScriptedTransport::new());
        let mut registry = crate::registry::NodeRegistry::with_catalog(transport, Default::default());
        registry
            .register_tree_definition(
                "snp.xml",
                r#"<root><BehaviorTree ID="snp">
                    <SequenceWithMemory name="workflow">
                        <RemoteTrigger name="scan" service="scan"/>
                        <RemoteRequest name="plan" service="plan"/>
                        <RemoteAction name="execute" action="execute"/>
                    </SequenceWithMemory>
                </BehaviorTree></root>"#,
            )
            .unwrap();
        let mut tree = registry.create_tree("snp", Blackboard::shared()).unwrap();

        let sink = Arc::new(MemorySink::new());
        let logger = StatusLogger::attach(&mut tree, sink.clone()).unwrap();
        let record = ExecutionDriver::new(tree).start().unwrap().wait().await.unwrap();
        assert_eq!((record.status, record.message.as_str()), (NodeStatus::Success, ""));

        assert_eq!(logger.finish().await, 6);
        let lines = sink.lines();
        assert!(lines[0].ends_with("workflow (SequenceWithMemory): IDLE -> RUNNING"));
        assert!(lines[3].ends_with("execute (RemoteAction): IDLE -> RUNNING"));
        assert!(lines[5].ends_with("workflow (SequenceWithMemory): RUNNING -> SUCCESS"));
    }

    #[test]
    fn test_memory_sink_clear() {
        let sink = MemorySink::new();
        sink.append("a");
        sink.append("b");
        assert_eq!(sink.lines().len(), 2);
        sink.clear();
        assert!(sink.lines().is_empty());
    }
}
