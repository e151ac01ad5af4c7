//! Error types for the scan-and-plan bridge
//!
//! Everything the control context can report to its host:
//! - Sequencer errors: configuration and execution failures from the core
//! - Workflow errors: a control used while the workflow is in the wrong state
//! - System errors: logging initialisation and I/O

use snp_sequencer::{ConfigurationError, SequencerError};
use thiserror::Error;

/// Main error type of the bridge
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    // =========================================================================
    // Sequencer Errors
    // =========================================================================

    #[error(transparent)]
    Sequencer(#[from] SequencerError),

    // =========================================================================
    // Workflow State Errors
    // =========================================================================

    #[error("Workflow cannot start: the start control is disabled")]
    StartDisabled,

    #[error("Workflow cannot reset: the reset control is disabled")]
    ResetDisabled,

    #[error("A run is still active: {0}")]
    RunActive(String),

    #[error("No active run")]
    NoActiveRun,

    // =========================================================================
    // System Errors
    // =========================================================================

    #[error("Logging initialization failed: {0}")]
    LoggingInit(String),

    #[error("File I/O error: {0}")]
    Io(String),
}

impl BridgeError {
    /// Configuration problems are reported before any execution context starts
    pub fn is_configuration(&self) -> bool {
        matches!(self, BridgeError::Sequencer(SequencerError::Configuration(_)))
    }

    /// Message shown to the operator
    pub fn user_message(&self) -> String {
        match self {
            BridgeError::Sequencer(SequencerError::Configuration(e)) => format!("Configuration error: {}", e),
            BridgeError::StartDisabled | BridgeError::ResetDisabled => self.to_string(),
            BridgeError::RunActive(_) => "Halt the current run first".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<ConfigurationError> for BridgeError {
    fn from(e: ConfigurationError) -> Self {
        BridgeError::Sequencer(SequencerError::Configuration(e))
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        BridgeError::Io(e.to_string())
    }
}

impl From<anyhow::Error> for BridgeError {
    fn from(e: anyhow::Error) -> Self {
        BridgeError::Io(format!("{:#}", e))
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_is_classified() {
        let err: BridgeError = ConfigurationError::EmptyTreeSources.into();
        assert!(err.is_configuration());
        assert_eq!(err.user_message(), "Configuration error: Parameter 'bt_files' is empty");
        assert_eq!(err.to_string(), "Parameter 'bt_files' is empty");
    }

    #[test]
    fn test_anyhow_context_is_kept() {
        let err: BridgeError = anyhow::anyhow!("no such file")
            .context("Failed to load parameters from 'snp.json'")
            .into();
        assert_eq!(
            err,
            BridgeError::Io("Failed to load parameters from 'snp.json': no such file".to_string())
        );
        assert!(!err.is_configuration());
    }
}
