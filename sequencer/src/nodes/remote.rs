//! Remote-call adapters
//!
//! Each adapter issues its call on the tick that activates it and then polls
//! the [`PendingCall`] once per tick. A call that already finished is
//! observed on the issuing tick; one that outlives its timeout becomes a
//! FAILURE. Every failure reason is also written to the blackboard's error
//! message so it reaches the execution record.

use crate::blackboard::{Blackboard, ValueKind};
use crate::error::{BlackboardError, SequencerResult, TransportError};
use crate::node::{Behavior, TickContext, TreeNode};
use crate::transport::{PendingCall, SharedTransport, TriggerResponse};
use crate::NodeStatus;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::task::Poll;
use std::time::Duration;
use tokio::sync::mpsc;

/// Attributes consumed by the adapters themselves and never sent as payload
pub const RESERVED_ATTRIBUTES: [&str; 6] = ["service", "action", "topic", "output", "timeout", "input"];

/// Strip the `{…}` of a blackboard reference
pub fn reference_key(raw: &str) -> Option<&str> {
    raw.strip_prefix('{').and_then(|s| s.strip_suffix('}'))
}

fn literal(raw: &str) -> Value {
    if let Ok(b) = raw.parse::<bool>() {
        return Value::Bool(b);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(raw.to_string())
}

fn resolve(blackboard: &Blackboard, key: &str) -> Result<Value, BlackboardError> {
    let value = blackboard.get(key).ok_or_else(|| BlackboardError::Missing {
        key: key.to_string(),
    })?;
    value.to_json().ok_or_else(|| BlackboardError::KindMismatch {
        key: key.to_string(),
        expected: ValueKind::Payload,
        found: value.kind(),
    })
}

/// Request or goal template built from a node's non-reserved attributes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayloadTemplate {
    fields: BTreeMap<String, String>,
}

impl PayloadTemplate {
    pub fn from_attributes(attributes: &BTreeMap<String, String>) -> Self {
        let fields = attributes
            .iter()
            .filter(|(k, _)| !RESERVED_ATTRIBUTES.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self { fields }
    }

    /// Build the JSON object, resolving `{key}` references
    pub fn render(&self, blackboard: &Blackboard) -> Result<Value, BlackboardError> {
        let mut object = Map::new();
        for (field, raw) in &self.fields {
            let value = match reference_key(raw) {
                Some(key) => resolve(blackboard, key)?,
                None => literal(raw),
            };
            object.insert(field.clone(), value);
        }
        Ok(Value::Object(object))
    }
}

/// Check the conventional status fields of a response.
///
/// `success: false` is a rejection carrying `message`; a non-zero
/// `error_code` is a failure carrying `error_string`.
fn check_response(name: &str, response: &Value) -> Result<(), String> {
    if response.get("success").and_then(Value::as_bool) == Some(false) {
        let message = response.get("message").and_then(Value::as_str).unwrap_or_default();
        return Err(rejection(name, message));
    }
    if let Some(code) = response.get("error_code").and_then(Value::as_i64) {
        if code != 0 {
            return Err(response
                .get("error_string")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("'{}' failed with error code {}", name, code)));
        }
    }
    Ok(())
}

fn rejection(name: &str, message: &str) -> String {
    if message.is_empty() {
        TransportError::Rejected {
            name: name.to_string(),
            reason: "no reason given".to_string(),
        }
        .to_string()
    } else {
        message.to_string()
    }
}

/// Failure bookkeeping shared by all adapters
#[derive(Debug, Default)]
struct FailureSlot {
    reason: Option<String>,
}

impl FailureSlot {
    fn clear(&mut self) {
        self.reason = None;
    }

    fn fail(&mut self, node: &str, blackboard: &Blackboard, reason: String) -> NodeStatus {
        tracing::warn!("{} failed: {}", node, reason);
        blackboard.set_error_message(reason.as_str());
        self.reason = Some(reason);
        NodeStatus::Failure
    }
}

/// Settings shared by request-shaped adapters
#[derive(Debug, Clone)]
pub struct CallSettings {
    pub node: String,
    pub target: String,
    pub timeout: Duration,
    pub output: String,
    pub payload: PayloadTemplate,
}

/// Fire-and-forget trigger with acknowledgement
pub struct RemoteTrigger {
    node: String,
    service: String,
    timeout: Duration,
    transport: SharedTransport,
    pending: Option<PendingCall<TriggerResponse>>,
    failure: FailureSlot,
}

impl RemoteTrigger {
    pub fn new(node: impl Into<String>, service: impl Into<String>, timeout: Duration, transport: SharedTransport) -> Self {
        Self {
            node: node.into(),
            service: service.into(),
            timeout,
            transport,
            pending: None,
            failure: FailureSlot::default(),
        }
    }
}

impl Behavior for RemoteTrigger {
    fn tick(&mut self, _children: &mut [TreeNode], ctx: &mut TickContext<'_>) -> SequencerResult<NodeStatus> {
        let call = self.pending.get_or_insert_with(|| {
            self.failure.clear();
            tracing::debug!("Calling trigger '{}'", self.service);
            let transport = self.transport.clone();
            let service = self.service.clone();
            PendingCall::issue(self.service.clone(), self.timeout, async move {
                transport.trigger(&service).await
            })
        });

        let Poll::Ready(result) = call.poll_now() else {
            return Ok(NodeStatus::Running);
        };
        self.pending = None;

        let bb = ctx.blackboard();
        Ok(match result {
            Ok(response) if response.success => NodeStatus::Success,
            Ok(response) => self.failure.fail(&self.node, bb, rejection(&self.service, &response.message)),
            Err(e) => self.failure.fail(&self.node, bb, e.to_string()),
        })
    }

    fn halt(&mut self, _children: &mut [TreeNode], _ctx: &mut TickContext<'_>) {
        if self.pending.take().is_some() {
            tracing::debug!("Abandoning trigger '{}'", self.service);
        }
    }

    fn failure_reason(&self) -> Option<String> {
        self.failure.reason.clone()
    }
}

/// Request/response call; the response is stored under the output key
pub struct RemoteRequest {
    settings: CallSettings,
    transport: SharedTransport,
    pending: Option<PendingCall<Value>>,
    failure: FailureSlot,
}

impl RemoteRequest {
    pub fn new(settings: CallSettings, transport: SharedTransport) -> Self {
        Self {
            settings,
            transport,
            pending: None,
            failure: FailureSlot::default(),
        }
    }
}

impl Behavior for RemoteRequest {
    fn tick(&mut self, _children: &mut [TreeNode], ctx: &mut TickContext<'_>) -> SequencerResult<NodeStatus> {
        let bb = ctx.blackboard();
        if self.pending.is_none() {
            self.failure.clear();
            let request = self.settings.payload.render(bb)?;
            tracing::debug!("Calling service '{}'", self.settings.target);
            let transport = self.transport.clone();
            let service = self.settings.target.clone();
            self.pending = Some(PendingCall::issue(
                self.settings.target.clone(),
                self.settings.timeout,
                async move { transport.request(&service, request).await },
            ));
        }

        let Some(call) = self.pending.as_mut() else {
            return Ok(NodeStatus::Running);
        };
        let Poll::Ready(result) = call.poll_now() else {
            return Ok(NodeStatus::Running);
        };
        self.pending = None;

        let settings = &self.settings;
        Ok(match result {
            Ok(response) => match check_response(&settings.target, &response) {
                Ok(()) => {
                    bb.set_payload(settings.output.as_str(), response);
                    NodeStatus::Success
                }
                Err(reason) => self.failure.fail(&settings.node, bb, reason),
            },
            Err(e) => self.failure.fail(&settings.node, bb, e.to_string()),
        })
    }

    fn halt(&mut self, _children: &mut [TreeNode], _ctx: &mut TickContext<'_>) {
        if self.pending.take().is_some() {
            tracing::debug!("Abandoning request to '{}'", self.settings.target);
        }
    }

    fn failure_reason(&self) -> Option<String> {
        self.failure.reason.clone()
    }
}

struct ActionCall {
    call: PendingCall<Value>,
    feedback: mpsc::UnboundedReceiver<Value>,
}

/// Long-running action with feedback and cancellation on halt
pub struct RemoteAction {
    settings: CallSettings,
    transport: SharedTransport,
    in_flight: Option<ActionCall>,
    fraction: Option<f64>,
    failure: FailureSlot,
}

impl RemoteAction {
    pub fn new(settings: CallSettings, transport: SharedTransport) -> Self {
        Self {
            settings,
            transport,
            in_flight: None,
            fraction: None,
            failure: FailureSlot::default(),
        }
    }

    fn drain_feedback(&mut self) {
        let Some(action) = self.in_flight.as_mut() else {
            return;
        };
        while let Ok(feedback) = action.feedback.try_recv() {
            tracing::debug!("Feedback from '{}': {}", self.settings.target, feedback);
            if let Some(progress) = feedback.get("progress").and_then(Value::as_f64) {
                self.fraction = Some(progress.clamp(0.0, 1.0));
            }
        }
    }
}

impl Behavior for RemoteAction {
    fn tick(&mut self, _children: &mut [TreeNode], ctx: &mut TickContext<'_>) -> SequencerResult<NodeStatus> {
        let bb = ctx.blackboard();
        if self.in_flight.is_none() {
            self.failure.clear();
            self.fraction = None;
            let goal = self.settings.payload.render(bb)?;
            tracing::info!("Sending goal to action '{}'", self.settings.target);
            let (tx, rx) = mpsc::unbounded_channel();
            let transport = self.transport.clone();
            let action = self.settings.target.clone();
            self.in_flight = Some(ActionCall {
                call: PendingCall::issue(self.settings.target.clone(), self.settings.timeout, async move {
                    transport.run_action(&action, goal, tx).await
                }),
                feedback: rx,
            });
        }

        let polled = match self.in_flight.as_mut() {
            Some(action) => action.call.poll_now(),
            None => Poll::Pending,
        };
        self.drain_feedback();

        let Poll::Ready(result) = polled else {
            return Ok(NodeStatus::Running);
        };
        self.in_flight = None;

        let settings = &self.settings;
        Ok(match result {
            Ok(outcome) => match check_response(&settings.target, &outcome) {
                Ok(()) => {
                    bb.set_payload(settings.output.as_str(), outcome);
                    NodeStatus::Success
                }
                Err(reason) => self.failure.fail(&settings.node, bb, reason),
            },
            Err(e @ TransportError::Timeout { .. }) => {
                // The backend may still be executing; ask it to stop
                self.transport.cancel_action(&settings.target);
                self.failure.fail(&settings.node, bb, e.to_string())
            }
            Err(e) => self.failure.fail(&settings.node, bb, e.to_string()),
        })
    }

    fn halt(&mut self, _children: &mut [TreeNode], _ctx: &mut TickContext<'_>) {
        if self.in_flight.take().is_some() {
            tracing::info!("Cancelling action '{}'", self.settings.target);
            self.transport.cancel_action(&self.settings.target);
        }
        self.fraction = None;
    }

    fn completion(&self, _children: &[TreeNode]) -> Option<f64> {
        self.fraction
    }

    fn failure_reason(&self) -> Option<String> {
        self.failure.reason.clone()
    }
}

/// Publishes a blackboard value on a topic
pub struct RemotePublish {
    node: String,
    topic: String,
    input: String,
    timeout: Duration,
    transport: SharedTransport,
    pending: Option<PendingCall<()>>,
    failure: FailureSlot,
}

impl RemotePublish {
    pub fn new(
        node: impl Into<String>,
        topic: impl Into<String>,
        input: impl Into<String>,
        timeout: Duration,
        transport: SharedTransport,
    ) -> Self {
        Self {
            node: node.into(),
            topic: topic.into(),
            input: input.into(),
            timeout,
            transport,
            pending: None,
            failure: FailureSlot::default(),
        }
    }
}

impl Behavior for RemotePublish {
    fn tick(&mut self, _children: &mut [TreeNode], ctx: &mut TickContext<'_>) -> SequencerResult<NodeStatus> {
        let bb = ctx.blackboard();
        if self.pending.is_none() {
            self.failure.clear();
            let message = match resolve(bb, &self.input) {
                Ok(message) => message,
                Err(e) => return Ok(self.failure.fail(&self.node, bb, e.to_string())),
            };
            let transport = self.transport.clone();
            let topic = self.topic.clone();
            self.pending = Some(PendingCall::issue(self.topic.clone(), self.timeout, async move {
                transport.publish(&topic, message).await
            }));
        }

        let Some(call) = self.pending.as_mut() else {
            return Ok(NodeStatus::Running);
        };
        let Poll::Ready(result) = call.poll_now() else {
            return Ok(NodeStatus::Running);
        };
        self.pending = None;

        Ok(match result {
            Ok(()) => {
                tracing::debug!("Published '{}' on '{}'", self.input, self.topic);
                NodeStatus::Success
            }
            Err(e) => self.failure.fail(&self.node, bb, e.to_string()),
        })
    }

    fn halt(&mut self, _children: &mut [TreeNode], _ctx: &mut TickContext<'_>) {
        self.pending = None;
    }

    fn failure_reason(&self) -> Option<String> {
        self.failure.reason.clone()
    }
}

/// Services the transport's callback queue; never completes on its own
pub struct RemoteSpinner {
    transport: SharedTransport,
}

impl RemoteSpinner {
    pub fn new(transport: SharedTransport) -> Self {
        Self { transport }
    }
}

impl Behavior for RemoteSpinner {
    fn tick(&mut self, _children: &mut [TreeNode], _ctx: &mut TickContext<'_>) -> SequencerResult<NodeStatus> {
        self.transport.spin_once();
        Ok(NodeStatus::Running)
    }
}
