//! Real process launching implementation
//!
//! Spawns the service with `tokio::process`, pipes its output through the
//! output handler and exposes graceful/forced termination.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::error::{SupervisorError, SupervisorResult};
use crate::services::process_output_handler::spawn_output_forwarder;
use crate::traits::{LaunchSpec, LaunchedService, OutputStream, ProcessLauncher, ServiceExit, ServiceHandle};
use shared::{component_debug, component_info, ComponentId};

/// Output lines that may queue before the readers wait
const OUTPUT_BUFFER: usize = 256;

/// Launcher backed by `tokio::process::Command`
#[derive(Debug, Clone, Default)]
pub struct TokioProcessLauncher;

impl TokioProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessLauncher for TokioProcessLauncher {
    async fn launch(&self, spec: LaunchSpec) -> SupervisorResult<LaunchedService> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| SupervisorError::SpawnFailed {
            program: spec.program.display().to_string(),
            source,
        })?;

        let (tx, rx) = mpsc::channel(OUTPUT_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            spawn_output_forwarder(stdout, OutputStream::Stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_output_forwarder(stderr, OutputStream::Stderr, tx);
        }

        let service = ChildService::new(child);
        component_info!(
            ComponentId::Supervisor,
            "🚀 Spawned {} (PID: {})",
            spec.program.display(),
            service.pid().map(|p| p.to_string()).unwrap_or_else(|| "unknown".to_string())
        );

        Ok(LaunchedService {
            handle: Box::new(service),
            output: rx,
        })
    }
}

/// A spawned child process
#[derive(Debug)]
pub struct ChildService {
    child: Child,
    pid: Option<u32>,
}

impl ChildService {
    pub fn new(child: Child) -> Self {
        let pid = child.id();
        Self { child, pid }
    }
}

#[async_trait]
impl ServiceHandle for ChildService {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> SupervisorResult<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return Ok(());
        };
        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => Ok(()),
            // Already gone between checks
            Err(Errno::ESRCH) => {
                component_debug!(ComponentId::Supervisor, "SIGTERM: process {} already exited", pid);
                Ok(())
            }
            Err(e) => Err(SupervisorError::SignalFailed { pid, message: e.to_string() }),
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> SupervisorResult<()> {
        // No graceful signal outside Unix; terminate immediately
        self.child.start_kill().map_err(SupervisorError::from)
    }

    fn kill(&mut self) -> SupervisorResult<()> {
        match self.child.start_kill() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn wait(&mut self) -> SupervisorResult<ServiceExit> {
        let status = self.child.wait().await?;
        Ok(ServiceExit { code: status.code() })
    }

    fn try_wait(&mut self) -> SupervisorResult<Option<ServiceExit>> {
        Ok(self.child.try_wait()?.map(|status| ServiceExit { code: status.code() }))
    }
}
