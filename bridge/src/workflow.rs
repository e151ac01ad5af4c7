//! Workflow control context
//!
//! [`Workflow`] owns everything the operator interacts with: the control
//! panel, the blackboard the tree runs against, the parameter source, the
//! robot transport and the status record. It starts runs, reports their
//! outcome into the record and keeps the start/reset controls consistent so
//! the workflow can always be restarted.

use crate::error::{BridgeError, BridgeResult};
use crate::event::{EventSeverity, SharedEventBus, WorkflowEventPayload};
use anyhow::Context;
use snp_sequencer::executor::DEFAULT_TICK_PERIOD;
use snp_sequencer::{
    build_workflow_tree, Blackboard, ControlPanel, ExecutionDriver, ExecutionRecord, HaltHandle, NodeStatus,
    ParameterSource, RecordSink, SequencerError, SharedBlackboard, SharedTransport, StaticParameters, StatusLogger,
    WorkflowConfig,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Load a JSON parameter file
pub fn load_parameters(path: impl AsRef<Path>) -> anyhow::Result<StaticParameters> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read parameter file '{}'", path.display()))?;
    StaticParameters::from_json_str(&json)
        .with_context(|| format!("Failed to parse parameter file '{}'", path.display()))
}

/// Line appended to the status record when a run ends
pub fn completion_message(record: &ExecutionRecord) -> String {
    let mut message = if record.status == NodeStatus::Success {
        "Behavior tree completed successfully".to_string()
    } else {
        "Behavior tree did not complete successfully".to_string()
    };
    if !record.message.is_empty() {
        message.push_str(&format!(": '{}'", record.message));
    }
    message
}

struct ActiveRun {
    run_id: Uuid,
    halt: HaltHandle,
    running: Arc<AtomicBool>,
    completion: Option<JoinHandle<ExecutionRecord>>,
}

pub struct Workflow {
    panel: ControlPanel,
    blackboard: SharedBlackboard,
    parameters: Arc<dyn ParameterSource>,
    transport: SharedTransport,
    sink: Arc<dyn RecordSink>,
    events: SharedEventBus,
    tick_period: Duration,
    active: Mutex<Option<ActiveRun>>,
}

impl Workflow {
    pub fn new(parameters: Arc<dyn ParameterSource>, transport: SharedTransport, sink: Arc<dyn RecordSink>) -> Self {
        let panel = ControlPanel::new();
        panel.start.set_enabled(true);
        panel.reset.set_enabled(false);

        let blackboard = Blackboard::shared();
        blackboard.set_error_message("");
        panel.install(&blackboard);

        Self {
            panel,
            blackboard,
            parameters,
            transport,
            sink,
            events: SharedEventBus::default(),
            tick_period: DEFAULT_TICK_PERIOD,
            active: Mutex::new(None),
        }
    }

    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    pub fn with_event_bus(mut self, events: SharedEventBus) -> Self {
        self.events = events;
        self
    }

    pub fn panel(&self) -> &ControlPanel {
        &self.panel
    }

    pub fn blackboard(&self) -> &SharedBlackboard {
        &self.blackboard
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    /// True while a run is ticking or its completion is still being reported
    pub fn is_running(&self) -> bool {
        self.lock_active()
            .as_ref()
            .map(|run| run.running.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveRun>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a run of the configured tree.
    ///
    /// Configuration problems are returned before any execution context
    /// exists; the reset control stays enabled so the workflow can be reset
    /// and retried.
    pub fn start(&self) -> BridgeResult<Uuid> {
        // Held until the run is stored so concurrent starts serialize
        let mut active = self.lock_active();
        if !self.panel.start.is_enabled() {
            return Err(BridgeError::StartDisabled);
        }
        if active.as_ref().is_some_and(|run| run.running.load(Ordering::SeqCst)) {
            return Err(BridgeError::RunActive("start".to_string()));
        }

        self.panel.start.set_enabled(false);
        self.panel.reset.set_enabled(true);
        self.sink.clear();
        self.panel.page.set_current(0);
        self.panel.progress.set(0.0);

        let (mut tree, tree_name) = match self.build() {
            Ok(built) => built,
            Err(e) => {
                tracing::error!("Failed to build the workflow tree: {}", e);
                self.events.publish(
                    EventSeverity::Error,
                    WorkflowEventPayload::ConfigurationFailed { message: e.to_string() },
                );
                return Err(e);
            }
        };

        let logger = StatusLogger::attach(&mut tree, self.sink.clone())?;
        let mut driver = ExecutionDriver::new(tree)
            .with_transport(self.transport.clone())
            .with_tick_period(self.tick_period);
        let handle = driver.start()?;
        let run_id = handle.run_id();
        let halt = handle.halt_handle();
        let running = Arc::new(AtomicBool::new(true));

        let completion = {
            let sink = self.sink.clone();
            let reset = self.panel.reset.clone();
            let events = self.events.clone();
            let running = running.clone();
            tokio::spawn(async move {
                let record = match handle.wait().await {
                    Ok(record) => record,
                    Err(e) => ExecutionRecord {
                        run_id,
                        state: snp_sequencer::ExecutorState::Errored,
                        status: NodeStatus::Failure,
                        message: e.to_string(),
                        ticks: 0,
                    },
                };
                logger.finish().await;

                let line = completion_message(&record);
                tracing::info!("{}", line);
                sink.append(&line);
                reset.set_enabled(true);

                let severity = if record.is_success() { EventSeverity::Info } else { EventSeverity::Warning };
                events.publish(
                    severity,
                    WorkflowEventPayload::RunFinished {
                        run_id,
                        status: record.status,
                        success: record.is_success(),
                        message: record.message.clone(),
                    },
                );
                running.store(false, Ordering::SeqCst);
                record
            })
        };

        *active = Some(ActiveRun {
            run_id,
            halt,
            running,
            completion: Some(completion),
        });

        tracing::info!("Started run {} of tree '{}'", run_id, tree_name);
        self.events.publish(
            EventSeverity::Info,
            WorkflowEventPayload::RunStarted { run_id, tree: tree_name },
        );
        Ok(run_id)
    }

    fn build(&self) -> BridgeResult<(snp_sequencer::Tree, String)> {
        let config = WorkflowConfig::from_parameters(self.parameters.as_ref())?;
        let tree = build_workflow_tree(&config, self.transport.clone(), self.blackboard.clone())?;
        Ok((tree, config.tree))
    }

    /// Request a cooperative halt of the active run
    pub fn halt(&self) -> BridgeResult<()> {
        let guard = self.lock_active();
        let run = guard
            .as_ref()
            .filter(|run| run.running.load(Ordering::SeqCst))
            .ok_or(BridgeError::NoActiveRun)?;
        if !run.halt.halt() {
            return Err(BridgeError::NoActiveRun);
        }
        tracing::info!("Halt requested for run {}", run.run_id);
        self.events
            .publish(EventSeverity::Info, WorkflowEventPayload::HaltRequested { run_id: run.run_id });
        Ok(())
    }

    /// Re-arm the start control after a run
    pub fn reset(&self) -> BridgeResult<()> {
        let active = self.lock_active();
        if !self.panel.reset.is_enabled() {
            return Err(BridgeError::ResetDisabled);
        }
        if active.as_ref().is_some_and(|run| run.running.load(Ordering::SeqCst)) {
            return Err(BridgeError::RunActive("reset".to_string()));
        }
        self.panel.reset.set_enabled(false);
        self.panel.start.set_enabled(true);
        self.events.publish(EventSeverity::Info, WorkflowEventPayload::Reset);
        Ok(())
    }

    /// Wait for the active run to be reported and return its record
    pub async fn wait(&self) -> BridgeResult<ExecutionRecord> {
        let completion = self
            .lock_active()
            .as_mut()
            .and_then(|run| run.completion.take())
            .ok_or(BridgeError::NoActiveRun)?;
        completion
            .await
            .map_err(|e| SequencerError::InvalidState(format!("completion task failed: {}", e)).into())
    }
}
