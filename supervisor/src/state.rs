//! Supervisor state snapshots and status events

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::ErrorCategory;

/// Lifecycle status of the supervised service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Restarting,
    /// Restart policy exhausted; only an explicit start clears it
    Failed,
}

/// Where the running service can be reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceEndpoint {
    pub host: String,
    pub port: u16,
    pub url: String,
}

impl ServiceEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let url = format!("http://{host}:{port}");
        Self { host, port, url }
    }
}

/// Read-only snapshot of the supervised process
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ServiceProcessState {
    pub pid: Option<u32>,
    pub port: Option<u16>,
    pub host: Option<String>,
    pub url: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub status: ServiceStatus,
    pub restart_attempts: u32,
    pub last_error: Option<String>,
}

impl ServiceProcessState {
    /// Endpoint of the current process, if one has been allocated
    pub fn endpoint(&self) -> Option<ServiceEndpoint> {
        match (&self.host, self.port) {
            (Some(host), Some(port)) => Some(ServiceEndpoint::new(host.clone(), port)),
            _ => None,
        }
    }
}

/// Events pushed to status subscribers, in emission order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorEvent {
    StatusChanged(ServiceProcessState),
    HealthCheckFailed { port: Option<u16> },
    RestartScheduled { attempt: u32, delay_ms: u64 },
    RestartFailed { attempt: u32, message: String, category: ErrorCategory },
    RestartLimitReached { attempts: u32 },
}
