//! Error types for the journey harness
//!
//! Only configuration problems and run aborts travel as `Err`. Observation
//! failures inside a wait are absorbed by the poller, and step/journey
//! failures are recorded as values on their results.

use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::report::Report;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the journey harness
#[derive(Error, Debug)]
pub enum Error {
    // === Wait / convergence errors ===
    #[error("Invalid wait spec '{description}': {reason}")]
    InvalidWaitSpec { description: String, reason: String },

    #[error("Observation failed: {0}")]
    TransientObservation(String),

    #[error("Critical state change not observed within {timeout_ms} ms: {description}")]
    CriticalStateChange { description: String, timeout_ms: u64 },

    #[error("State change not observed within {timeout_ms} ms (continuing): {description}")]
    SoftStateChange { description: String, timeout_ms: u64 },

    // === Journey / run errors ===
    #[error("Step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: String },

    #[error("Run aborted: journey '{journey}' failed ({} of {} journeys attempted)", .report.results.len(), .report.registered)]
    OrchestratorAbort { journey: String, report: Box<Report> },

    #[error("Journey '{0}' is not registered")]
    JourneyNotFound(String),

    // === Collaborator errors ===
    #[error("Command '{command}' failed to run: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("Command '{command}' timed out after {}s", .timeout.as_secs())]
    CommandTimeout { command: String, timeout: Duration },

    #[error("adb not found. Searched: {0}")]
    AdbNotFound(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // === Configuration errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Invalid scenario: {0}")]
    Scenario(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid wait spec error
    pub fn invalid_wait_spec(description: &str, reason: impl Into<String>) -> Self {
        Self::InvalidWaitSpec {
            description: description.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a step failed error
    pub fn step_failed(step: &str, reason: impl Into<String>) -> Self {
        Self::StepFailed {
            step: step.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: &str, reason: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.to_string(),
            reason: reason.into(),
        }
    }

    /// Stable code used in reports and JSON output
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidWaitSpec { .. } | Error::Config(_) | Error::ConfigParse(_) => {
                "CONFIGURATION_ERROR"
            }
            Error::Scenario(_) => "SCENARIO_ERROR",
            Error::TransientObservation(_) => "TRANSIENT_OBSERVATION",
            Error::CriticalStateChange { .. } => "CRITICAL_STATE_CHANGE_FAILURE",
            Error::SoftStateChange { .. } => "SOFT_STATE_CHANGE_WARNING",
            Error::StepFailed { .. } => "STEP_FAILURE",
            Error::OrchestratorAbort { .. } => "ORCHESTRATOR_ABORT",
            Error::JourneyNotFound(_) => "JOURNEY_NOT_FOUND",
            Error::CommandFailed { .. } | Error::CommandTimeout { .. } | Error::AdbNotFound(_) => {
                "COMMAND_ERROR"
            }
            Error::Http(_) => "HTTP_ERROR",
            Error::Io(_) | Error::FileRead { .. } => "IO_ERROR",
            Error::Json(_) | Error::Yaml(_) => "SERIALIZATION_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the poller may retry past this error on its next iteration
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::TransientObservation(_)
                | Error::CommandFailed { .. }
                | Error::CommandTimeout { .. }
                | Error::Http(_)
                | Error::Io(_)
        )
    }

    /// The partial report carried by a run abort
    pub fn report(&self) -> Option<&Report> {
        match self {
            Error::OrchestratorAbort { report, .. } => Some(report.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            Error::invalid_wait_spec("x", "bad").kind(),
            "CONFIGURATION_ERROR"
        );
        assert_eq!(Error::step_failed("s", "r").kind(), "STEP_FAILURE");
        assert!(Error::TransientObservation("x".into()).is_transient());
        assert!(!Error::Config("x".into()).is_transient());
    }

    #[test]
    fn test_step_failed_message() {
        let err = Error::step_failed("login", "button missing");
        assert_eq!(err.to_string(), "Step 'login' failed: button missing");
    }
}
