//! Workflow event bus
//!
//! The control context publishes what happens to the workflow (runs
//! starting and finishing, configuration failures, resets) so a host UI can
//! follow along without polling. Every event carries a monotonically
//! increasing sequence number; slow subscribers lag instead of blocking the
//! publisher.

use serde::{Deserialize, Serialize};
use snp_sequencer::NodeStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default event buffer size
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
}

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkflowEventPayload {
    RunStarted { run_id: Uuid, tree: String },
    ConfigurationFailed { message: String },
    HaltRequested { run_id: Uuid },
    RunFinished {
        run_id: Uuid,
        status: NodeStatus,
        success: bool,
        message: String,
    },
    Reset,
}

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub event_id: u64,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    pub severity: EventSeverity,
    pub payload: WorkflowEventPayload,
}

/// Event bus statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventBusStats {
    pub events_published: u64,
    pub subscriber_count: usize,
}

/// Broadcast bus for workflow events
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
    sequence: AtomicU64,
    events_published: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sequence: AtomicU64::new(1),
            events_published: AtomicU64::new(0),
        }
    }

    /// Publish an event to all subscribers, returning its ID
    pub fn publish(&self, severity: EventSeverity, payload: WorkflowEventPayload) -> u64 {
        let event_id = self.sequence.fetch_add(1, Ordering::SeqCst);
        let event = WorkflowEvent {
            event_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
            severity,
            payload,
        };
        self.events_published.fetch_add(1, Ordering::Relaxed);

        // No receivers is fine
        let _ = self.sender.send(event);
        event_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            events_published: self.events_published.load(Ordering::Relaxed),
            subscriber_count: self.sender.receiver_count(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

/// Thread-safe shared event bus
pub type SharedEventBus = Arc<EventBus>;
