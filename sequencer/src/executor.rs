//! Execution driver
//!
//! Runs one tree instance to completion on its own tokio task. The driver
//! moves through `Built -> Running -> {Completed, Halted, Errored}`; the
//! initiator receives exactly one [`ExecutionRecord`] through the
//! [`RunHandle`] and may follow progress on the event broadcast.

use crate::error::{SequencerError, SequencerResult};
use crate::transport::SharedTransport;
use crate::tree::Tree;
use crate::NodeStatus;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

/// Default pause between two ticks of the root
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(10);

/// Message of a record produced by a halt
pub const HALTED_MESSAGE: &str = "Execution halted";

/// Commands that can be sent to a running driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorCommand {
    Halt,
}

/// State of the execution driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutorState {
    Built,
    Running,
    Completed,
    Halted,
    Errored,
}

impl ExecutorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutorState::Completed | ExecutorState::Halted | ExecutorState::Errored)
    }
}

/// Terminal outcome of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub run_id: Uuid,
    pub state: ExecutorState,
    /// Root status; FAILURE for errored runs, IDLE for halted ones
    pub status: NodeStatus,
    /// Error message, empty when there is none
    pub message: String,
    pub ticks: u64,
}

impl ExecutionRecord {
    pub fn is_success(&self) -> bool {
        self.state == ExecutorState::Completed && self.status == NodeStatus::Success
    }
}

/// Event emitted by the driver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutorEvent {
    StateChanged { run_id: Uuid, state: ExecutorState },
    Ticked { run_id: Uuid, tick: u64, status: NodeStatus },
    Finished(ExecutionRecord),
}

/// Requests a cooperative halt of a run
#[derive(Debug, Clone)]
pub struct HaltHandle {
    command_tx: mpsc::UnboundedSender<ExecutorCommand>,
}

impl HaltHandle {
    /// Returns false when the run already finished
    pub fn halt(&self) -> bool {
        self.command_tx.send(ExecutorCommand::Halt).is_ok()
    }
}

/// Handle to a started run
pub struct RunHandle {
    run_id: Uuid,
    halt: HaltHandle,
    state: Arc<StdRwLock<ExecutorState>>,
    completion: oneshot::Receiver<ExecutionRecord>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn halt_handle(&self) -> HaltHandle {
        self.halt.clone()
    }

    pub fn halt(&self) -> bool {
        self.halt.halt()
    }

    pub fn state(&self) -> ExecutorState {
        read_state(&self.state)
    }

    /// Wait for the execution record
    pub async fn wait(self) -> SequencerResult<ExecutionRecord> {
        self.completion
            .await
            .map_err(|_| SequencerError::InvalidState("execution task ended without a record".to_string()))
    }
}

fn read_state(state: &StdRwLock<ExecutorState>) -> ExecutorState {
    *state.read().unwrap_or_else(|e| e.into_inner())
}

fn write_state(state: &StdRwLock<ExecutorState>, value: ExecutorState) {
    *state.write().unwrap_or_else(|e| e.into_inner()) = value;
}

fn extract_panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

enum Outcome {
    Completed(NodeStatus),
    Halted,
    Errored(String),
}

/// Drives one tree instance
pub struct ExecutionDriver {
    tree: Option<Tree>,
    transport: Option<SharedTransport>,
    tick_period: Duration,
    run_id: Uuid,
    state: Arc<StdRwLock<ExecutorState>>,
    event_tx: broadcast::Sender<ExecutorEvent>,
}

impl ExecutionDriver {
    pub fn new(tree: Tree) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            tree: Some(tree),
            transport: None,
            tick_period: DEFAULT_TICK_PERIOD,
            run_id: Uuid::new_v4(),
            state: Arc::new(StdRwLock::new(ExecutorState::Built)),
            event_tx,
        }
    }

    /// Pump `transport` before every tick
    pub fn with_transport(mut self, transport: SharedTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period.max(Duration::from_millis(1));
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> ExecutorState {
        read_state(&self.state)
    }

    /// Subscribe to executor events
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutorEvent> {
        self.event_tx.subscribe()
    }

    /// Start ticking on a new task of the current tokio runtime
    pub fn start(&mut self) -> SequencerResult<RunHandle> {
        let state = self.state();
        if state != ExecutorState::Built {
            return Err(SequencerError::InvalidState(format!("Cannot start: executor is {:?}", state)));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SequencerError::InvalidState(format!("Cannot start without a tokio runtime: {}", e)))?;
        let mut tree = self
            .tree
            .take()
            .ok_or_else(|| SequencerError::InvalidState("No tree loaded".to_string()))?;

        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = oneshot::channel();

        let run_id = self.run_id;
        let state = self.state.clone();
        let event_tx = self.event_tx.clone();
        let transport = self.transport.clone();
        let tick_period = self.tick_period;

        write_state(&state, ExecutorState::Running);
        let _ = event_tx.send(ExecutorEvent::StateChanged {
            run_id,
            state: ExecutorState::Running,
        });
        tracing::info!("Run {} started", run_id);

        runtime.spawn(async move {
            let mut interval = tokio::time::interval(tick_period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut ticks: u64 = 0;
            let mut commands_open = true;

            let outcome = loop {
                tokio::select! {
                    biased;

                    command = command_rx.recv(), if commands_open => match command {
                        Some(ExecutorCommand::Halt) => break Outcome::Halted,
                        None => commands_open = false,
                    },
                    _ = interval.tick() => {
                        if let Some(transport) = &transport {
                            transport.spin_once();
                        }
                        ticks += 1;
                        match panic::catch_unwind(AssertUnwindSafe(|| tree.tick_once())) {
                            Ok(Ok(status)) => {
                                let _ = event_tx.send(ExecutorEvent::Ticked { run_id, tick: ticks, status });
                                if status.is_completed() {
                                    break Outcome::Completed(status);
                                }
                            }
                            Ok(Err(e)) => break Outcome::Errored(e.to_string()),
                            Err(payload) => {
                                break Outcome::Errored(format!("Panic during tick: {}", extract_panic_message(&payload)))
                            }
                        }
                    }
                }
            };

            let record = match outcome {
                Outcome::Completed(status) => {
                    tracing::info!("Run {} completed with {} after {} ticks", run_id, status, ticks);
                    // A recovered failure leaves its reason behind on the blackboard
                    let message = if status == NodeStatus::Success {
                        String::new()
                    } else {
                        tree.blackboard().error_message()
                    };
                    ExecutionRecord {
                        run_id,
                        state: ExecutorState::Completed,
                        status,
                        message,
                        ticks,
                    }
                }
                Outcome::Halted => {
                    tracing::info!("Run {} halted after {} ticks", run_id, ticks);
                    tree.halt();
                    ExecutionRecord {
                        run_id,
                        state: ExecutorState::Halted,
                        status: tree.status(),
                        message: HALTED_MESSAGE.to_string(),
                        ticks,
                    }
                }
                Outcome::Errored(message) => {
                    tracing::error!("Run {} errored: {}", run_id, message);
                    // Best effort: cancel whatever is still in flight
                    if panic::catch_unwind(AssertUnwindSafe(|| tree.halt())).is_err() {
                        tracing::warn!("Halting the tree after an error panicked");
                    }
                    ExecutionRecord {
                        run_id,
                        state: ExecutorState::Errored,
                        status: NodeStatus::Failure,
                        message,
                        ticks,
                    }
                }
            };

            write_state(&state, record.state);
            let _ = event_tx.send(ExecutorEvent::StateChanged {
                run_id,
                state: record.state,
            });
            let _ = event_tx.send(ExecutorEvent::Finished(record.clone()));
            if completion_tx.send(record).is_err() {
                tracing::debug!("Run {} finished with nobody waiting", run_id);
            }
        });

        Ok(RunHandle {
            run_id,
            halt: HaltHandle { command_tx },
            state: self.state.clone(),
            completion: completion_rx,
        })
    }
}
