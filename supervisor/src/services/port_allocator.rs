//! Free TCP port discovery for the supervised service

use tokio::net::TcpListener;

use crate::error::{SupervisorError, SupervisorResult};
use shared::{component_debug, ComponentId};

/// Finds a port the service can bind by probing upwards from a start port
#[derive(Debug, Clone)]
pub struct PortAllocator {
    host: String,
    max_attempts: u16,
}

impl PortAllocator {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into(), max_attempts: 100 }
    }

    /// Configure how many consecutive ports are tried (fluent API)
    pub fn with_max_attempts(mut self, max_attempts: u16) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// First bindable port at or above `start_port`
    ///
    /// A throwaway listener is bound and dropped for each candidate. Port 0
    /// asks the OS for an ephemeral port.
    pub async fn find_available_port(&self, start_port: u16) -> SupervisorResult<u16> {
        if start_port == 0 {
            let listener = TcpListener::bind((self.host.as_str(), 0)).await?;
            return Ok(listener.local_addr()?.port());
        }

        for offset in 0..self.max_attempts {
            let Some(port) = start_port.checked_add(offset) else {
                break;
            };
            match TcpListener::bind((self.host.as_str(), port)).await {
                Ok(listener) => {
                    drop(listener);
                    component_debug!(ComponentId::Supervisor, "🔌 Allocated port {}", port);
                    return Ok(port);
                }
                Err(e) => {
                    component_debug!(ComponentId::Supervisor, "Port {} unavailable: {}", port, e);
                }
            }
        }

        Err(SupervisorError::NoPortAvailable { start: start_port, attempts: self.max_attempts })
    }
}
