//! Status reporting for the host
//!
//! Relays every supervisor and updater event into the log. A desktop shell
//! would forward the same events to its UI; the serialized payload is what
//! it would receive.

use serde::Serialize;
use shared::{component_info, component_warn, ComponentId, Subscription};
use supervisor::{ServiceStatus, SupervisorEvent};
use tokio::task::JoinHandle;
use updater::UpdateEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
}

/// Something an event can be rendered as for a status line
pub trait Reportable: Serialize + Send + 'static {
    fn describe(&self) -> (Severity, String);
}

impl Reportable for SupervisorEvent {
    fn describe(&self) -> (Severity, String) {
        match self {
            SupervisorEvent::StatusChanged(state) => {
                let severity = if state.status == ServiceStatus::Failed {
                    Severity::Warn
                } else {
                    Severity::Info
                };
                let message = match (&state.status, &state.url) {
                    (ServiceStatus::Running, Some(url)) => format!("Service running at {url}"),
                    (status, _) => match &state.last_error {
                        Some(error) if *status == ServiceStatus::Failed => format!("Service failed: {error}"),
                        _ => format!("Service {}", status_name(*status)),
                    },
                };
                (severity, message)
            }
            SupervisorEvent::HealthCheckFailed { port } => (
                Severity::Warn,
                match port {
                    Some(port) => format!("Service on port {port} is not responding"),
                    None => "Service is not responding".to_string(),
                },
            ),
            SupervisorEvent::RestartScheduled { attempt, delay_ms } => {
                (Severity::Info, format!("Restarting service (attempt {attempt}) in {delay_ms}ms"))
            }
            SupervisorEvent::RestartFailed { attempt, message, .. } => {
                (Severity::Warn, format!("Restart attempt {attempt} failed: {message}"))
            }
            SupervisorEvent::RestartLimitReached { attempts } => {
                (Severity::Warn, format!("Service gave up after {attempts} restart attempts"))
            }
        }
    }
}

impl Reportable for UpdateEvent {
    fn describe(&self) -> (Severity, String) {
        match self {
            UpdateEvent::CheckingStarted => (Severity::Info, "Checking for updates".to_string()),
            UpdateEvent::UpdateAvailable(info) => (Severity::Info, format!("Update {} is available", info.version)),
            UpdateEvent::UpdateNotAvailable { current_version } => {
                (Severity::Info, format!("Version {current_version} is up to date"))
            }
            UpdateEvent::DownloadProgress { percent } => (Severity::Info, format!("Downloading update: {percent}%")),
            UpdateEvent::UpdateDownloaded { version } => (Severity::Info, format!("Update {version} is ready to install")),
            UpdateEvent::Installing { version } => (Severity::Info, format!("Installing {version}")),
            UpdateEvent::Retrying { operation, attempt, delay_ms } => {
                (Severity::Info, format!("Retrying {operation} (attempt {attempt}) in {delay_ms}ms"))
            }
            UpdateEvent::Error { operation, message, terminal, .. } => {
                let suffix = if *terminal { "" } else { ", will retry" };
                (Severity::Warn, format!("Update {operation} failed: {message}{suffix}"))
            }
            UpdateEvent::AutoCheckDisabled { until } => {
                (Severity::Warn, format!("Automatic update checks paused until {}", until.to_rfc3339()))
            }
            UpdateEvent::AutoCheckReenabled => (Severity::Info, "Automatic update checks resumed".to_string()),
            UpdateEvent::RolledBack { version } => (Severity::Warn, format!("Update rolled back; staying on {version}")),
        }
    }
}

fn status_name(status: ServiceStatus) -> &'static str {
    match status {
        ServiceStatus::Stopped => "stopped",
        ServiceStatus::Starting => "starting",
        ServiceStatus::Running => "running",
        ServiceStatus::Restarting => "restarting",
        ServiceStatus::Failed => "failed",
    }
}

/// Log every event from `subscription` until its bus goes away
pub fn spawn_relay<E: Reportable>(component: ComponentId, mut subscription: Subscription<E>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            let payload = serde_json::to_string(&event).unwrap_or_default();
            match event.describe() {
                (Severity::Info, message) => {
                    component_info!(component, payload = %payload, "{}", message);
                }
                (Severity::Warn, message) => {
                    component_warn!(component, payload = %payload, "{}", message);
                }
            }
        }
    })
}
