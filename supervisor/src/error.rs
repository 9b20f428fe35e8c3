//! Supervisor-specific error types

use shared::{classifier::io_category, Categorized, ErrorCategory};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Service failed to start: {message}")]
    StartupError { message: String, exit_code: Option<i32> },

    #[error("Service did not become ready after {attempts} readiness probes")]
    ReadinessTimeout { attempts: u32 },

    #[error("Restart limit exceeded after {attempts} attempts")]
    RestartLimitExceeded { attempts: u32 },

    #[error("No available port after trying {attempts} ports from {start}")]
    NoPortAvailable { start: u16, attempts: u16 },

    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to signal service process {pid}: {message}")]
    SignalFailed { pid: u32, message: String },

    #[error("Configuration error: {field}: {message}")]
    ConfigurationError { field: String, message: String },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl SupervisorError {
    pub fn startup(message: impl Into<String>) -> Self {
        SupervisorError::StartupError { message: message.into(), exit_code: None }
    }

    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        SupervisorError::ConfigurationError { field: field.into(), message: message.into() }
    }
}

impl Categorized for SupervisorError {
    fn category(&self) -> Option<ErrorCategory> {
        match self {
            SupervisorError::ReadinessTimeout { .. } => Some(ErrorCategory::Timeout),
            SupervisorError::NoPortAvailable { .. } => Some(ErrorCategory::Network),
            SupervisorError::SpawnFailed { source, .. } => io_category(source),
            SupervisorError::IoError(source) => io_category(source),
            // Startup failures carry the child's raw stderr, which only string
            // matching can interpret.
            _ => None,
        }
    }
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;
