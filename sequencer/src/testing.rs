//! Test doubles shared by the unit tests

use crate::error::{SequencerResult, TransportError, TransportResult};
use crate::node::{Behavior, TickContext, TreeNode};
use crate::transport::{RemoteTransport, TriggerResponse};
use crate::NodeStatus;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Leaf behavior replaying a fixed list of statuses; the last one repeats
#[derive(Clone)]
pub struct StubBehavior {
    statuses: Arc<Mutex<VecDeque<NodeStatus>>>,
    last: Arc<Mutex<NodeStatus>>,
    ticks: Arc<AtomicUsize>,
    halts: Arc<AtomicUsize>,
    reason: Option<String>,
}

impl StubBehavior {
    pub fn new(statuses: &[NodeStatus]) -> Self {
        Self {
            statuses: Arc::new(Mutex::new(statuses.iter().copied().collect())),
            last: Arc::new(Mutex::new(NodeStatus::Success)),
            ticks: Arc::new(AtomicUsize::new(0)),
            halts: Arc::new(AtomicUsize::new(0)),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn ticks(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn halts(&self) -> usize {
        self.halts.load(Ordering::SeqCst)
    }
}

impl Behavior for StubBehavior {
    fn tick(&mut self, _children: &mut [TreeNode], _ctx: &mut TickContext<'_>) -> SequencerResult<NodeStatus> {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.statuses.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(*last)
    }

    fn halt(&mut self, _children: &mut [TreeNode], _ctx: &mut TickContext<'_>) {
        self.halts.fetch_add(1, Ordering::SeqCst);
    }

    fn failure_reason(&self) -> Option<String> {
        self.reason.clone()
    }
}

/// How the scripted backend answers one service or action
#[derive(Debug, Clone)]
pub enum Script {
    /// Answer with this payload (requests/actions) or acknowledge (triggers)
    Succeed(Value),
    /// Explicit rejection carrying a message
    Reject(String),
    /// Transport-level error
    Fail(TransportError),
    /// Never answer
    Hang,
    /// Action only: push feedback messages, then succeed with the payload
    Feedback(Vec<Value>, Value),
}

/// In-memory transport answering from a script keyed by call name
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<String>>,
    cancels: Mutex<Vec<String>>,
    published: Mutex<Vec<(String, Value)>>,
    spins: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, name: &str, script: Script) -> Self {
        self.scripts.lock().unwrap().insert(name.to_string(), script);
        self
    }

    fn lookup(&self, name: &str) -> Script {
        self.calls.lock().unwrap().push(name.to_string());
        self.scripts
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_else(|| Script::Succeed(json!({ "success": true })))
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == name).count()
    }

    pub fn cancels(&self) -> Vec<String> {
        self.cancels.lock().unwrap().clone()
    }

    pub fn published(&self) -> Vec<(String, Value)> {
        self.published.lock().unwrap().clone()
    }

    pub fn spins(&self) -> usize {
        self.spins.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteTransport for ScriptedTransport {
    async fn trigger(&self, service: &str) -> TransportResult<TriggerResponse> {
        match self.lookup(service) {
            Script::Succeed(_) | Script::Feedback(..) => Ok(TriggerResponse::ok()),
            Script::Reject(message) => Ok(TriggerResponse::rejected(message)),
            Script::Fail(err) => Err(err),
            Script::Hang => futures::future::pending().await,
        }
    }

    async fn request(&self, service: &str, request: Value) -> TransportResult<Value> {
        match self.lookup(service) {
            Script::Succeed(Value::Null) => Ok(request),
            Script::Succeed(response) | Script::Feedback(_, response) => Ok(response),
            Script::Reject(message) => Ok(json!({ "success": false, "message": message })),
            Script::Fail(err) => Err(err),
            Script::Hang => futures::future::pending().await,
        }
    }

    async fn run_action(
        &self,
        action: &str,
        _goal: Value,
        feedback: mpsc::UnboundedSender<Value>,
    ) -> TransportResult<Value> {
        let script = self.lookup(action);
        match script {
            Script::Succeed(result) => {
                tokio::task::yield_now().await;
                Ok(result)
            }
            Script::Feedback(steps, result) => {
                for step in steps {
                    let _ = feedback.send(step);
                }
                tokio::task::yield_now().await;
                Ok(result)
            }
            Script::Reject(message) => Ok(json!({ "error_code": -1, "error_string": message })),
            Script::Fail(err) => Err(err),
            Script::Hang => futures::future::pending().await,
        }
    }

    fn cancel_action(&self, action: &str) {
        self.cancels.lock().unwrap().push(action.to_string());
    }

    async fn publish(&self, topic: &str, message: Value) -> TransportResult<()> {
        self.published.lock().unwrap().push((topic.to_string(), message));
        Ok(())
    }

    fn spin_once(&self) {
        self.spins.fetch_add(1, Ordering::SeqCst);
    }
}
