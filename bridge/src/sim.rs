//! Simulated robot backend
//!
//! Implements the remote transport without a robot: triggers are
//! acknowledged, requests echo a success response and actions report
//! progress feedback before succeeding. Single services can be scripted to
//! reject or to never answer, which is enough for dry runs of a tree and for
//! the bridge tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use snp_sequencer::{RemoteTransport, TransportResult, TriggerResponse};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// Default number of feedback messages per action
pub const DEFAULT_FEEDBACK_STEPS: u32 = 3;

/// Default pause between two feedback messages
pub const DEFAULT_STEP_DELAY: Duration = Duration::from_millis(50);

/// How a scripted service or action answers
#[derive(Debug, Clone, PartialEq)]
pub enum SimulatedResponse {
    Succeed,
    Reject(String),
    Hang,
}

pub struct SimulatedBackend {
    feedback_steps: u32,
    step_delay: Duration,
    scripts: Mutex<HashMap<String, SimulatedResponse>>,
    calls: Mutex<Vec<String>>,
    cancels: Mutex<Vec<String>>,
    published: Mutex<Vec<(String, Value)>>,
    spins: AtomicU64,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self {
            feedback_steps: DEFAULT_FEEDBACK_STEPS,
            step_delay: DEFAULT_STEP_DELAY,
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            spins: AtomicU64::new(0),
        }
    }

    pub fn with_feedback_steps(mut self, steps: u32) -> Self {
        self.feedback_steps = steps;
        self
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Make `name` answer with `response` from now on
    pub fn script(&self, name: &str, response: SimulatedResponse) {
        lock(&self.scripts).insert(name.to_string(), response);
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn cancels(&self) -> Vec<String> {
        lock(&self.cancels).clone()
    }

    pub fn published(&self) -> Vec<(String, Value)> {
        lock(&self.published).clone()
    }

    pub fn spin_count(&self) -> u64 {
        self.spins.load(Ordering::Relaxed)
    }

    fn respond(&self, name: &str) -> SimulatedResponse {
        lock(&self.calls).push(name.to_string());
        lock(&self.scripts)
            .get(name)
            .cloned()
            .unwrap_or(SimulatedResponse::Succeed)
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl RemoteTransport for SimulatedBackend {
    async fn trigger(&self, service: &str) -> TransportResult<TriggerResponse> {
        match self.respond(service) {
            SimulatedResponse::Succeed => {
                tracing::info!("[SIM] Trigger '{}'", service);
                Ok(TriggerResponse::ok())
            }
            SimulatedResponse::Reject(message) => {
                tracing::info!("[SIM] Rejecting trigger '{}': {}", service, message);
                Ok(TriggerResponse::rejected(message))
            }
            SimulatedResponse::Hang => futures::future::pending().await,
        }
    }

    async fn request(&self, service: &str, request: Value) -> TransportResult<Value> {
        match self.respond(service) {
            SimulatedResponse::Succeed => {
                tracing::info!("[SIM] Request '{}': {}", service, request);
                let mut response = match request {
                    Value::Object(map) => Value::Object(map),
                    Value::Null => json!({}),
                    other => json!({ "request": other }),
                };
                response["success"] = json!(true);
                response["message"] = json!("");
                Ok(response)
            }
            SimulatedResponse::Reject(message) => {
                tracing::info!("[SIM] Rejecting request '{}': {}", service, message);
                Ok(json!({ "success": false, "message": message }))
            }
            SimulatedResponse::Hang => futures::future::pending().await,
        }
    }

    async fn run_action(
        &self,
        action: &str,
        goal: Value,
        feedback: mpsc::UnboundedSender<Value>,
    ) -> TransportResult<Value> {
        match self.respond(action) {
            SimulatedResponse::Succeed => {
                tracing::info!("[SIM] Action '{}' accepted goal {}", action, goal);
                for step in 1..=self.feedback_steps {
                    tokio::time::sleep(self.step_delay).await;
                    let progress = f64::from(step) / f64::from(self.feedback_steps);
                    let _ = feedback.send(json!({ "progress": progress }));
                }
                tokio::task::yield_now().await;
                Ok(json!({ "error_code": 0, "error_string": "" }))
            }
            SimulatedResponse::Reject(message) => {
                tracing::info!("[SIM] Aborting action '{}': {}", action, message);
                Ok(json!({ "error_code": -1, "error_string": message }))
            }
            SimulatedResponse::Hang => futures::future::pending().await,
        }
    }

    fn cancel_action(&self, action: &str) {
        tracing::info!("[SIM] Cancel requested for '{}'", action);
        lock(&self.cancels).push(action.to_string());
    }

    async fn publish(&self, topic: &str, message: Value) -> TransportResult<()> {
        tracing::debug!("[SIM] Publish on '{}'", topic);
        lock(&self.published).push((topic.to_string(), message));
        Ok(())
    }

    fn spin_once(&self) {
        self.spins.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[tokio::test]
    async fn test_trigger_and_request() {
        let backend = SimulatedBackend::new();
        assert!(backend.trigger("scan").await.unwrap().success);

        let response = backend.request("plan", json!({ "group": "manipulator" })).await.unwrap();
        assert_eq!(response["success"], json!(true));
        assert_eq!(response["group"], json!("manipulator"));
        assert_eq!(backend.calls(), vec!["scan", "plan"]);
    }

    #[tokio::test]
    async fn test_scripted_rejection() {
        let backend = SimulatedBackend::new();
        backend.script("scan", SimulatedResponse::Reject("camera offline".to_string()));
        let response = backend.trigger("scan").await.unwrap();
        assert!(!response.success);
        assert_eq!(response.message, "camera offline");

        backend.script("plan", SimulatedResponse::Reject("no solution".to_string()));
        let response = backend.request("plan", Value::Null).await.unwrap();
        assert_eq!(response["success"], json!(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_reports_feedback() {
        let backend = SimulatedBackend::new().with_feedback_steps(4);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = backend.run_action("execute", json!({}), tx).await.unwrap();
        assert_eq!(result["error_code"], json!(0));

        let mut progress = Vec::new();
        while let Ok(message) = rx.try_recv() {
            progress.push(message["progress"].as_f64().unwrap());
        }
        assert_eq!(progress, vec![0.25, 0.5, 0.75, 1.0]);
    }

    #[tokio::test]
    async fn test_hang_never_resolves() {
        let backend = SimulatedBackend::new();
        backend.script("execute", SimulatedResponse::Hang);
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(backend.run_action("execute", json!({}), tx).now_or_never().is_none());

        backend.cancel_action("execute");
        assert_eq!(backend.cancels(), vec!["execute"]);
    }
}
