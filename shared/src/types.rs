//! Core shared types and identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies which part of the host emitted a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentId {
    /// Top-level application lifecycle owner
    Host,
    /// Supervisor of the spawned service process
    Supervisor,
    /// Self-update coordinator
    Updater,
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentId::Host => write!(f, "host"),
            ComponentId::Supervisor => write!(f, "supervisor"),
            ComponentId::Updater => write!(f, "updater"),
        }
    }
}

/// Broad failure category used to decide whether an operation is worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Network,
    Timeout,
    Disk,
    Permission,
    Integrity,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Disk => "disk",
            ErrorCategory::Permission => "permission",
            ErrorCategory::Integrity => "integrity",
            ErrorCategory::Unknown => "unknown",
        };
        f.write_str(name)
    }
}
