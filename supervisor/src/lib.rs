//! Supervision of the locally spawned service process
//!
//! This library finds a free port for the service, spawns it with a prepared
//! environment, waits for it to become ready, probes its health on a timer
//! and restarts it with bounded backoff when it stops answering.

pub mod config;
pub mod error;
pub mod services;
pub mod state;
pub mod supervisor;
pub mod traits;

// Re-export commonly used types
pub use config::{OutputPatterns, RestartPolicy, SupervisorConfig};
pub use error::{SupervisorError, SupervisorResult};
pub use services::{HttpHealthProbe, PortAllocator, TokioProcessLauncher};
pub use state::{ServiceEndpoint, ServiceProcessState, ServiceStatus, SupervisorEvent};
pub use supervisor::ProcessSupervisor;
pub use traits::{HealthProbe, LaunchSpec, LaunchedService, OutputLine, OutputStream, ProcessLauncher, ServiceExit, ServiceHandle};
