//! Remote transport interface
//!
//! This module defines the three call shapes the remote-call adapters need
//! from the robot backend. The actual implementation is provided by the host;
//! the bridge crate ships a simulated backend.
//!
//! Calls are issued as futures and wrapped in a [`PendingCall`], which the
//! issuing node polls once per tick without blocking the tick loop.

use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Default timeout for quick operations
pub const DEFAULT_SHORT_TIMEOUT_SECS: f64 = 5.0;

/// Default timeout for multi-minute operations
pub const DEFAULT_LONG_TIMEOUT_SECS: f64 = 6000.0;

/// Deadline offset used when `now + timeout` is not representable
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Acknowledgement of a trigger call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

impl TriggerResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: String::new(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Call shapes offered by the robot backend
///
/// Implementations must not block: every call returns a future, and the
/// adapters observe its completion on a later tick.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Fire a trigger with no payload
    async fn trigger(&self, service: &str) -> TransportResult<TriggerResponse>;

    /// Request/response call
    async fn request(&self, service: &str, request: serde_json::Value) -> TransportResult<serde_json::Value>;

    /// Long-running action. Feedback messages are pushed on `feedback` while
    /// the action runs; the future resolves with the terminal result.
    async fn run_action(
        &self,
        action: &str,
        goal: serde_json::Value,
        feedback: mpsc::UnboundedSender<serde_json::Value>,
    ) -> TransportResult<serde_json::Value>;

    /// Ask the backend to cancel an in-flight action. Best effort; the caller
    /// does not wait for an acknowledgement.
    fn cancel_action(&self, action: &str);

    /// Fire-and-forget publication of a message on a topic
    async fn publish(&self, topic: &str, message: serde_json::Value) -> TransportResult<()>;

    /// Service the backend's own callback queue once
    fn spin_once(&self) {}
}

/// Shared transport handle
pub type SharedTransport = Arc<dyn RemoteTransport>;

/// Transport that acknowledges everything, for running trees without a robot
pub struct NullTransport;

#[async_trait]
impl RemoteTransport for NullTransport {
    async fn trigger(&self, service: &str) -> TransportResult<TriggerResponse> {
        tracing::info!("[NULL] Trigger '{}'", service);
        Ok(TriggerResponse::ok())
    }

    async fn request(&self, service: &str, _request: serde_json::Value) -> TransportResult<serde_json::Value> {
        tracing::info!("[NULL] Request '{}'", service);
        Ok(serde_json::json!({ "success": true }))
    }

    async fn run_action(
        &self,
        action: &str,
        _goal: serde_json::Value,
        _feedback: mpsc::UnboundedSender<serde_json::Value>,
    ) -> TransportResult<serde_json::Value> {
        tracing::info!("[NULL] Action '{}'", action);
        Ok(serde_json::json!({ "error_code": 0 }))
    }

    fn cancel_action(&self, action: &str) {
        tracing::info!("[NULL] Cancel action '{}'", action);
    }

    async fn publish(&self, topic: &str, _message: serde_json::Value) -> TransportResult<()> {
        tracing::debug!("[NULL] Publish on '{}'", topic);
        Ok(())
    }
}

/// Timeout class selected per adapter at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeoutClass {
    Short,
    Long,
}

impl FromStr for TimeoutClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "short" => Ok(TimeoutClass::Short),
            "long" => Ok(TimeoutClass::Long),
            other => Err(format!("expected 'short' or 'long', got '{}'", other)),
        }
    }
}

impl fmt::Display for TimeoutClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutClass::Short => f.write_str("short"),
            TimeoutClass::Long => f.write_str("long"),
        }
    }
}

/// The two timeout durations baked into every adapter built by one registry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemoteTimeouts {
    pub short: Duration,
    pub long: Duration,
}

impl RemoteTimeouts {
    /// Negative values clamp to zero, values too large for a [`Duration`]
    /// saturate.
    pub fn from_secs(short_secs: f64, long_secs: f64) -> Self {
        Self {
            short: saturating_secs(short_secs),
            long: saturating_secs(long_secs),
        }
    }

    pub fn for_class(&self, class: TimeoutClass) -> Duration {
        match class {
            TimeoutClass::Short => self.short,
            TimeoutClass::Long => self.long,
        }
    }
}

impl Default for RemoteTimeouts {
    fn default() -> Self {
        Self::from_secs(DEFAULT_SHORT_TIMEOUT_SECS, DEFAULT_LONG_TIMEOUT_SECS)
    }
}

fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

/// One in-flight remote call with its deadline
pub struct PendingCall<T> {
    name: String,
    future: BoxFuture<'static, TransportResult<T>>,
    timeout: Duration,
    deadline: Instant,
}

impl<T> PendingCall<T> {
    pub fn issue<F>(name: impl Into<String>, timeout: Duration, future: F) -> Self
    where
        F: Future<Output = TransportResult<T>> + Send + 'static,
    {
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        Self {
            name: name.into(),
            future: Box::pin(future),
            timeout,
            deadline,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Poll the call once without blocking.
    ///
    /// A call still pending at or past its deadline resolves to
    /// [`TransportError::Timeout`], so a zero timeout fails on the first poll
    /// unless the backend answered synchronously.
    pub fn poll_now(&mut self) -> Poll<TransportResult<T>> {
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        match self.future.as_mut().poll(&mut cx) {
            Poll::Ready(result) => Poll::Ready(result),
            Poll::Pending if Instant::now() >= self.deadline => Poll::Ready(Err(TransportError::Timeout {
                name: self.name.clone(),
                timeout_secs: self.timeout.as_secs_f64(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for PendingCall<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish()
    }
}
