//! Trait definitions with mockall annotations for testing
//!
//! The supervisor reaches the operating system only through these seams:
//! a launcher that spawns the service and a probe that asks it whether it is
//! alive. Both are injected, so the lifecycle logic runs unchanged against
//! real processes or test doubles.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::error::SupervisorResult;
use crate::state::ServiceEndpoint;

/// Which pipe a line of child output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line of child output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub line: String,
}

/// How the child exited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceExit {
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
}

impl ServiceExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Everything needed to spawn the service once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Added on top of the inherited environment
    pub env: BTreeMap<String, String>,
}

/// A freshly spawned service and its output stream
pub struct LaunchedService {
    pub handle: Box<dyn ServiceHandle>,
    /// Closed once both stdout and stderr reach EOF
    pub output: mpsc::Receiver<OutputLine>,
}

impl std::fmt::Debug for LaunchedService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedService")
            .field("pid", &self.handle.pid())
            .finish_non_exhaustive()
    }
}

/// Control over one running child process
#[async_trait]
pub trait ServiceHandle: Send {
    fn pid(&self) -> Option<u32>;

    /// Ask the process to exit (SIGTERM on Unix)
    fn terminate(&mut self) -> SupervisorResult<()>;

    /// Force the process down
    fn kill(&mut self) -> SupervisorResult<()>;

    /// Wait for the process to exit; safe to cancel and call again
    async fn wait(&mut self) -> SupervisorResult<ServiceExit>;

    /// Exit status if the process has already exited
    fn try_wait(&mut self) -> SupervisorResult<Option<ServiceExit>>;
}

/// Spawns the supervised service
#[mockall::automock]
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, spec: LaunchSpec) -> SupervisorResult<LaunchedService>;
}

/// Liveness check against a running service
///
/// Implementations must resolve to `false` on any failure instead of erroring.
#[mockall::automock]
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, endpoint: &ServiceEndpoint) -> bool;
}
