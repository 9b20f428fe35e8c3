//! Lifecycle owner of the supervised service
//!
//! State machine:
//!
//! ```text
//! Stopped ──start──► Starting ──ready──► Running
//!                                           │ probe fails
//!                                           ▼
//!                      Running ◄──ok── Restarting ──attempts exhausted──► Failed
//! ```
//!
//! `start`, `stop` and `restart` are serialised by one lifecycle lock. The
//! health monitor runs on its own task and performs recovery inline, so at
//! most one recovery is ever in flight.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, Interval, MissedTickBehavior};

use crate::config::{OutputSignal, SupervisorConfig};
use crate::error::{SupervisorError, SupervisorResult};
use crate::services::PortAllocator;
use crate::state::{ServiceEndpoint, ServiceProcessState, ServiceStatus, SupervisorEvent};
use crate::traits::{HealthProbe, LaunchSpec, LaunchedService, OutputLine, ProcessLauncher, ServiceHandle};
use shared::{
    component_debug, component_error, component_info, component_warn, Clock, ComponentId, ErrorClassifier, StatusBus,
    Subscription, SystemClock,
};

struct SupervisorInner<L, H> {
    config: SupervisorConfig,
    launcher: L,
    probe: H,
    allocator: PortAllocator,
    classifier: ErrorClassifier,
    clock: Arc<dyn Clock>,
    state: Mutex<ServiceProcessState>,
    process: Mutex<Option<Box<dyn ServiceHandle>>>,
    lifecycle: Mutex<()>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    events: StatusBus<SupervisorEvent>,
}

/// Supervises one service process; clones share the same process
pub struct ProcessSupervisor<L, H> {
    inner: Arc<SupervisorInner<L, H>>,
}

impl<L, H> Clone for ProcessSupervisor<L, H> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<L, H> ProcessSupervisor<L, H>
where
    L: ProcessLauncher + 'static,
    H: HealthProbe + 'static,
{
    pub fn new(config: SupervisorConfig, launcher: L, probe: H) -> Self {
        Self::with_clock(config, launcher, probe, Arc::new(SystemClock))
    }

    pub fn with_clock(config: SupervisorConfig, launcher: L, probe: H, clock: Arc<dyn Clock>) -> Self {
        let allocator = PortAllocator::new(config.host.clone()).with_max_attempts(config.port_search_limit);
        Self {
            inner: Arc::new(SupervisorInner {
                config,
                launcher,
                probe,
                allocator,
                classifier: ErrorClassifier::new(),
                clock,
                state: Mutex::new(ServiceProcessState::default()),
                process: Mutex::new(None),
                lifecycle: Mutex::new(()),
                monitor: Mutex::new(None),
                events: StatusBus::new(),
            }),
        }
    }

    /// Subscribe to status events
    pub fn subscribe(&self) -> Subscription<SupervisorEvent> {
        self.inner.events.subscribe()
    }

    /// Read-only snapshot of the supervised process
    pub async fn status(&self) -> ServiceProcessState {
        self.inner.state.lock().await.clone()
    }

    /// Start the service and the health monitor
    ///
    /// Returns immediately if the service is already running. Starting from
    /// `Failed` is treated as operator intervention and clears the restart
    /// counter.
    pub async fn start(&self) -> SupervisorResult<ServiceEndpoint> {
        let _guard = self.inner.lifecycle.lock().await;

        {
            let mut state = self.inner.state.lock().await;
            if state.status == ServiceStatus::Running {
                if let Some(endpoint) = state.endpoint() {
                    return Ok(endpoint);
                }
            }
            state.restart_attempts = 0;
        }

        match self.start_locked().await {
            Ok(endpoint) => {
                self.ensure_monitor().await;
                Ok(endpoint)
            }
            Err(e) => {
                self.mark_failed_start(&e, ServiceStatus::Failed).await;
                Err(e)
            }
        }
    }

    /// Stop the monitor, then the service; a no-op when already stopped
    pub async fn stop(&self) -> SupervisorResult<()> {
        self.cancel_monitor().await;

        let _guard = self.inner.lifecycle.lock().await;
        self.stop_child().await;

        let mut state = self.inner.state.lock().await;
        if *state != ServiceProcessState::default() {
            *state = ServiceProcessState::default();
            let snapshot = state.clone();
            drop(state);
            self.inner.events.emit(SupervisorEvent::StatusChanged(snapshot));
            component_info!(ComponentId::Supervisor, "🛑 Service stopped");
        }
        Ok(())
    }

    /// Stop the service and start it again after a backoff delay
    ///
    /// Fails with `RestartLimitExceeded` without launching anything once the
    /// attempt counter reaches the policy's limit. A successful restart also
    /// makes sure the health monitor is running.
    pub async fn restart(&self) -> SupervisorResult<ServiceEndpoint> {
        let _guard = self.inner.lifecycle.lock().await;
        let endpoint = self.restart_locked().await?;
        self.ensure_monitor().await;
        Ok(endpoint)
    }

    /// Single liveness probe; never errors
    pub async fn health_check(&self) -> bool {
        let endpoint = self.inner.state.lock().await.endpoint();
        match endpoint {
            Some(endpoint) => self.probe_endpoint(&endpoint).await,
            None => false,
        }
    }

    async fn probe_endpoint(&self, endpoint: &ServiceEndpoint) -> bool {
        timeout(self.inner.config.probe_timeout, self.inner.probe.probe(endpoint))
            .await
            .unwrap_or(false)
    }

    async fn restart_locked(&self) -> SupervisorResult<ServiceEndpoint> {
        let max_attempts = self.inner.config.restart.max_attempts;
        let attempt = {
            let mut state = self.inner.state.lock().await;
            state.restart_attempts = state.restart_attempts.saturating_add(1);
            let attempt = state.restart_attempts;
            if attempt >= max_attempts {
                self.set_status(&mut state, ServiceStatus::Failed);
                drop(state);
                self.inner.events.emit(SupervisorEvent::RestartLimitReached { attempts: attempt });
                component_error!(ComponentId::Supervisor, "⛔ Restart limit reached after {} attempts", attempt);
                return Err(SupervisorError::RestartLimitExceeded { attempts: attempt });
            }
            self.set_status(&mut state, ServiceStatus::Restarting);
            attempt
        };

        self.stop_child().await;

        let delay = self.inner.config.restart.delay_for(attempt);
        self.inner.events.emit(SupervisorEvent::RestartScheduled {
            attempt,
            delay_ms: delay.as_millis() as u64,
        });
        component_info!(
            ComponentId::Supervisor,
            "🔄 Restart attempt {}/{} in {:?}",
            attempt,
            max_attempts,
            delay
        );
        sleep(delay).await;

        match self.start_locked().await {
            Ok(endpoint) => {
                self.inner.state.lock().await.restart_attempts = 0;
                Ok(endpoint)
            }
            Err(e) => {
                // The next attempt reaches the limit check above
                self.mark_failed_start(&e, ServiceStatus::Restarting).await;
                let classification = self.inner.classifier.classify(&e);
                self.inner.events.emit(SupervisorEvent::RestartFailed {
                    attempt,
                    message: e.to_string(),
                    category: classification.category,
                });
                Err(e)
            }
        }
    }

    /// Allocate, spawn, wait for startup and readiness; caller holds the lifecycle lock
    async fn start_locked(&self) -> SupervisorResult<ServiceEndpoint> {
        let config = &self.inner.config;
        {
            let mut state = self.inner.state.lock().await;
            self.set_status(&mut state, ServiceStatus::Starting);
        }

        let port = self.inner.allocator.find_available_port(config.start_port).await?;
        let spec = LaunchSpec {
            program: config.program.clone(),
            args: config.args.clone(),
            working_dir: config.working_dir.clone(),
            env: config.build_environment(port)?,
        };

        let LaunchedService { mut handle, mut output } = self.inner.launcher.launch(spec).await?;
        let pid = handle.pid();

        if let Err(e) = self.wait_for_startup(handle.as_mut(), &mut output).await {
            Self::terminate_handle(handle, config.stop_grace).await;
            return Err(e);
        }
        // Forwarders keep draining the pipes after the receiver goes away
        drop(output);

        *self.inner.process.lock().await = Some(handle);

        let endpoint = ServiceEndpoint::new(config.host.clone(), port);
        {
            let mut state = self.inner.state.lock().await;
            state.pid = pid;
            state.port = Some(port);
            state.host = Some(endpoint.host.clone());
            state.url = Some(endpoint.url.clone());
            state.started_at = Some(self.inner.clock.now());
        }

        if let Err(e) = self.wait_for_server(&endpoint).await {
            self.stop_child().await;
            return Err(e);
        }

        {
            let mut state = self.inner.state.lock().await;
            state.last_error = None;
            self.set_status(&mut state, ServiceStatus::Running);
        }
        component_info!(ComponentId::Supervisor, "✅ Service ready at {}", endpoint.url);
        Ok(endpoint)
    }

    /// Watch output and exit status until readiness, fatal output, exit or timeout
    ///
    /// Timing out while the process is still alive counts as started; the
    /// readiness probe that follows has the final word.
    async fn wait_for_startup(
        &self,
        handle: &mut dyn ServiceHandle,
        output: &mut mpsc::Receiver<OutputLine>,
    ) -> SupervisorResult<()> {
        let patterns = &self.inner.config.patterns;
        let deadline = sleep(self.inner.config.startup_timeout);
        tokio::pin!(deadline);
        let mut output_open = true;

        loop {
            tokio::select! {
                line = output.recv(), if output_open => match line {
                    Some(line) => match patterns.scan(line.stream, &line.line) {
                        Some(OutputSignal::Ready) => {
                            component_debug!(ComponentId::Supervisor, "Readiness signalled: {}", line.line);
                            return Ok(());
                        }
                        Some(OutputSignal::Fatal(message)) => {
                            return Err(SupervisorError::StartupError { message, exit_code: None });
                        }
                        None => {}
                    },
                    None => output_open = false,
                },
                exit = handle.wait() => {
                    let exit = exit?;
                    return Err(SupervisorError::StartupError {
                        message: format!("service exited with {:?} before becoming ready", exit.code),
                        exit_code: exit.code,
                    });
                }
                _ = &mut deadline => {
                    return match handle.try_wait()? {
                        None => {
                            component_warn!(
                                ComponentId::Supervisor,
                                "⏱️ No readiness output within {:?}; assuming started",
                                self.inner.config.startup_timeout
                            );
                            Ok(())
                        }
                        Some(exit) => Err(SupervisorError::StartupError {
                            message: format!("service exited with {:?} before becoming ready", exit.code),
                            exit_code: exit.code,
                        }),
                    };
                }
            }
        }
    }

    /// Poll the liveness endpoint until it answers or attempts run out
    async fn wait_for_server(&self, endpoint: &ServiceEndpoint) -> SupervisorResult<()> {
        let attempts = self.inner.config.readiness_attempts;
        for attempt in 1..=attempts {
            if self.probe_endpoint(endpoint).await {
                component_debug!(ComponentId::Supervisor, "Readiness probe passed on attempt {}", attempt);
                return Ok(());
            }

            if let Some(handle) = self.inner.process.lock().await.as_mut() {
                if let Some(exit) = handle.try_wait()? {
                    return Err(SupervisorError::StartupError {
                        message: format!("service exited with {:?} while waiting for readiness", exit.code),
                        exit_code: exit.code,
                    });
                }
            }

            if attempt < attempts {
                sleep(self.inner.config.readiness_interval).await;
            }
        }
        Err(SupervisorError::ReadinessTimeout { attempts })
    }

    /// Gracefully stop the current child, escalating to a forced kill
    async fn stop_child(&self) {
        let handle = self.inner.process.lock().await.take();
        if let Some(handle) = handle {
            Self::terminate_handle(handle, self.inner.config.stop_grace).await;
        }
    }

    async fn terminate_handle(mut handle: Box<dyn ServiceHandle>, grace: Duration) {
        let pid = handle.pid();
        if let Err(e) = handle.terminate() {
            component_warn!(ComponentId::Supervisor, "Graceful stop of {:?} failed: {}", pid, e);
        }

        match timeout(grace, handle.wait()).await {
            Ok(Ok(exit)) => {
                component_debug!(ComponentId::Supervisor, "Service {:?} exited with {:?}", pid, exit.code);
                return;
            }
            Ok(Err(e)) => {
                component_warn!(ComponentId::Supervisor, "Error waiting for service {:?}: {}", pid, e);
            }
            Err(_) => {
                component_warn!(
                    ComponentId::Supervisor,
                    "Service {:?} still running after {:?}, forcing termination",
                    pid,
                    grace
                );
            }
        }

        if let Err(e) = handle.kill() {
            component_error!(ComponentId::Supervisor, "Force kill of {:?} failed: {}", pid, e);
            return;
        }
        if timeout(grace, handle.wait()).await.is_err() {
            component_error!(ComponentId::Supervisor, "Service {:?} did not exit after forced kill", pid);
        }
    }

    async fn mark_failed_start(&self, error: &SupervisorError, status: ServiceStatus) {
        let mut state = self.inner.state.lock().await;
        state.pid = None;
        state.started_at = None;
        state.last_error = Some(error.to_string());
        self.set_status(&mut state, status);
        drop(state);
        component_error!(ComponentId::Supervisor, "❌ Service start failed: {}", error);
    }

    fn set_status(&self, state: &mut MutexGuard<'_, ServiceProcessState>, status: ServiceStatus) {
        state.status = status;
        self.inner.events.emit(SupervisorEvent::StatusChanged((**state).clone()));
    }

    async fn ensure_monitor(&self) {
        let mut monitor = self.inner.monitor.lock().await;
        if monitor.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        *monitor = Some(Self::spawn_monitor(Arc::downgrade(&self.inner)));
    }

    async fn cancel_monitor(&self) {
        let task = self.inner.monitor.lock().await.take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
            component_debug!(ComponentId::Supervisor, "Health monitor cancelled");
        }
    }

    fn spawn_monitor(inner: Weak<SupervisorInner<L, H>>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = match inner.upgrade() {
                Some(inner) => inner.config.health_interval,
                None => return,
            };
            let mut ticker = interval_at_period(period);

            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                ProcessSupervisor { inner }.monitor_tick().await;
            }
        })
    }

    /// One health-monitor round: probe, and recover if the probe fails
    async fn monitor_tick(&self) {
        let status = self.inner.state.lock().await.status;
        if !matches!(status, ServiceStatus::Running | ServiceStatus::Restarting) {
            return;
        }
        if status == ServiceStatus::Running && self.health_check().await {
            return;
        }

        let port = self.inner.state.lock().await.port;
        self.inner.events.emit(SupervisorEvent::HealthCheckFailed { port });
        component_warn!(ComponentId::Supervisor, "💔 Health check failed for port {:?}", port);

        let _guard = self.inner.lifecycle.lock().await;
        // stop() may have won the race for the lock
        let status = self.inner.state.lock().await.status;
        if !matches!(status, ServiceStatus::Running | ServiceStatus::Restarting) {
            return;
        }

        match self.restart_locked().await {
            Ok(endpoint) => {
                component_info!(ComponentId::Supervisor, "✅ Service recovered at {}", endpoint.url);
            }
            Err(e) => {
                let classification = self.inner.classifier.classify(&e);
                component_error!(
                    ComponentId::Supervisor,
                    category = %classification.category,
                    retryable = classification.retryable,
                    "❌ Automatic restart failed: {}",
                    e
                );
            }
        }
    }
}

/// Interval whose first tick fires one full period from now
fn interval_at_period(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{MockHealthProbe, OutputStream, ServiceExit};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::watch;

    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    enum Behavior {
        /// Prints a readiness line and keeps running
        #[default]
        Ready,
        /// Keeps running without printing anything
        Silent,
        /// Prints a fatal error on stderr and keeps running
        Fatal,
        /// Exits straight away with the given code
        Exit(i32),
    }

    struct FakeChild {
        exit: Arc<watch::Sender<Option<ServiceExit>>>,
        terminated: Arc<AtomicBool>,
    }

    #[derive(Default)]
    struct FakeLauncherState {
        script: StdMutex<VecDeque<Behavior>>,
        fallback: StdMutex<Behavior>,
        launches: StdMutex<Vec<LaunchSpec>>,
        children: StdMutex<Vec<FakeChild>>,
    }

    /// Launcher that hands out scripted in-memory children
    #[derive(Clone, Default)]
    struct FakeLauncher {
        state: Arc<FakeLauncherState>,
    }

    impl FakeLauncher {
        fn script(&self, behaviors: impl IntoIterator<Item = Behavior>) {
            self.state.script.lock().unwrap().extend(behaviors);
        }

        fn set_fallback(&self, behavior: Behavior) {
            *self.state.fallback.lock().unwrap() = behavior;
        }

        fn launch_count(&self) -> usize {
            self.state.launches.lock().unwrap().len()
        }

        fn last_spec(&self) -> LaunchSpec {
            self.state.launches.lock().unwrap().last().cloned().unwrap()
        }

        fn was_terminated(&self, index: usize) -> bool {
            self.state.children.lock().unwrap()[index].terminated.load(Ordering::SeqCst)
        }

        fn crash(&self, index: usize, code: i32) {
            self.state.children.lock().unwrap()[index]
                .exit
                .send_replace(Some(ServiceExit { code: Some(code) }));
        }
    }

    #[async_trait]
    impl ProcessLauncher for FakeLauncher {
        async fn launch(&self, spec: LaunchSpec) -> SupervisorResult<LaunchedService> {
            let behavior = {
                let mut script = self.state.script.lock().unwrap();
                script.pop_front().unwrap_or(*self.state.fallback.lock().unwrap())
            };
            let pid = {
                let mut launches = self.state.launches.lock().unwrap();
                launches.push(spec);
                1000 + launches.len() as u32
            };

            let (exit_tx, exit_rx) = watch::channel(None);
            let (out_tx, out_rx) = mpsc::channel(8);
            match behavior {
                Behavior::Ready => {
                    out_tx
                        .try_send(OutputLine { stream: OutputStream::Stdout, line: "Server listening on port".into() })
                        .unwrap();
                }
                Behavior::Fatal => {
                    out_tx
                        .try_send(OutputLine {
                            stream: OutputStream::Stderr,
                            line: "Error: Cannot find module 'express'".into(),
                        })
                        .unwrap();
                }
                Behavior::Exit(code) => {
                    exit_tx.send_replace(Some(ServiceExit { code: Some(code) }));
                }
                Behavior::Silent => {}
            }

            let exit = Arc::new(exit_tx);
            let terminated = Arc::new(AtomicBool::new(false));
            self.state.children.lock().unwrap().push(FakeChild {
                exit: Arc::clone(&exit),
                terminated: Arc::clone(&terminated),
            });

            Ok(LaunchedService {
                handle: Box::new(FakeHandle { pid, exit, rx: exit_rx, terminated }),
                output: out_rx,
            })
        }
    }

    struct FakeHandle {
        pid: u32,
        exit: Arc<watch::Sender<Option<ServiceExit>>>,
        rx: watch::Receiver<Option<ServiceExit>>,
        terminated: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ServiceHandle for FakeHandle {
        fn pid(&self) -> Option<u32> {
            Some(self.pid)
        }

        fn terminate(&mut self) -> SupervisorResult<()> {
            self.terminated.store(true, Ordering::SeqCst);
            self.exit.send_if_modified(|exit| {
                if exit.is_none() {
                    *exit = Some(ServiceExit { code: None });
                    true
                } else {
                    false
                }
            });
            Ok(())
        }

        fn kill(&mut self) -> SupervisorResult<()> {
            self.terminate()
        }

        async fn wait(&mut self) -> SupervisorResult<ServiceExit> {
            loop {
                let current = *self.rx.borrow_and_update();
                if let Some(exit) = current {
                    return Ok(exit);
                }
                if self.rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }

        fn try_wait(&mut self) -> SupervisorResult<Option<ServiceExit>> {
            Ok(*self.rx.borrow())
        }
    }

    /// Probe whose answer can be flipped from the test
    fn switchable_probe(healthy: Arc<AtomicBool>) -> MockHealthProbe {
        let mut probe = MockHealthProbe::new();
        probe.expect_probe().returning(move |_| healthy.load(Ordering::SeqCst));
        probe
    }

    /// Probe that fails `failures` times, then answers healthy
    fn flaky_probe(failures: Arc<AtomicUsize>) -> MockHealthProbe {
        let mut probe = MockHealthProbe::new();
        probe.expect_probe().returning(move |_| {
            failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
        });
        probe
    }

    fn test_config() -> SupervisorConfig {
        SupervisorConfig::new("/opt/service/bin/server")
            .with_start_port(0)
            .with_env_override("SERVICE_MODE", "test")
    }

    fn supervisor(launcher: &FakeLauncher, probe: MockHealthProbe) -> ProcessSupervisor<FakeLauncher, MockHealthProbe> {
        ProcessSupervisor::new(test_config(), launcher.clone(), probe)
    }

    fn statuses(events: Vec<SupervisorEvent>) -> Vec<ServiceStatus> {
        events
            .into_iter()
            .filter_map(|event| match event {
                SupervisorEvent::StatusChanged(state) => Some(state.status),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_reports_running_endpoint() {
        let launcher = FakeLauncher::default();
        let supervisor = supervisor(&launcher, switchable_probe(Arc::new(AtomicBool::new(true))));
        let mut events = supervisor.subscribe();

        let endpoint = supervisor.start().await.unwrap();

        let state = supervisor.status().await;
        assert_eq!(state.status, ServiceStatus::Running);
        assert_eq!(state.pid, Some(1001));
        assert_eq!(state.port, Some(endpoint.port));
        assert_eq!(state.url.as_deref(), Some(endpoint.url.as_str()));
        assert!(state.started_at.is_some());
        assert_eq!(statuses(events.drain()), vec![ServiceStatus::Starting, ServiceStatus::Running]);

        let spec = launcher.last_spec();
        assert_eq!(spec.env.get("PORT"), Some(&endpoint.port.to_string()));
        assert_eq!(spec.env.get("SERVICE_MODE").map(String::as_str), Some("test"));

        supervisor.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_when_running_is_a_no_op() {
        let launcher = FakeLauncher::default();
        let supervisor = supervisor(&launcher, switchable_probe(Arc::new(AtomicBool::new(true))));

        let first = supervisor.start().await.unwrap();
        let second = supervisor.start().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(launcher.launch_count(), 1);
        supervisor.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let launcher = FakeLauncher::default();
        let supervisor = supervisor(&launcher, switchable_probe(Arc::new(AtomicBool::new(true))));
        let mut events = supervisor.subscribe();

        // Nothing to stop yet
        supervisor.stop().await.unwrap();
        assert!(events.drain().is_empty());

        supervisor.start().await.unwrap();
        events.drain();

        supervisor.stop().await.unwrap();
        assert!(launcher.was_terminated(0));
        assert_eq!(supervisor.status().await, ServiceProcessState::default());
        assert_eq!(statuses(events.drain()), vec![ServiceStatus::Stopped]);

        supervisor.stop().await.unwrap();
        assert!(events.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_service_is_started_after_startup_window() {
        let launcher = FakeLauncher::default();
        launcher.script([Behavior::Silent]);
        let supervisor = supervisor(&launcher, switchable_probe(Arc::new(AtomicBool::new(true))));

        let begun = Instant::now();
        supervisor.start().await.unwrap();

        assert!(begun.elapsed() >= Duration::from_secs(8));
        assert_eq!(supervisor.status().await.status, ServiceStatus::Running);
        supervisor.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_output_fails_startup() {
        let launcher = FakeLauncher::default();
        launcher.script([Behavior::Fatal]);
        let supervisor = supervisor(&launcher, switchable_probe(Arc::new(AtomicBool::new(true))));

        let err = supervisor.start().await.unwrap_err();

        match err {
            SupervisorError::StartupError { message, exit_code } => {
                assert!(message.contains("Cannot find module"));
                assert_eq!(exit_code, None);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(launcher.was_terminated(0));
        let state = supervisor.status().await;
        assert_eq!(state.status, ServiceStatus::Failed);
        assert!(state.pid.is_none());
        assert!(state.last_error.unwrap().contains("Cannot find module"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_exit_fails_startup_with_exit_code() {
        let launcher = FakeLauncher::default();
        launcher.script([Behavior::Exit(1)]);
        let supervisor = supervisor(&launcher, switchable_probe(Arc::new(AtomicBool::new(true))));

        let err = supervisor.start().await.unwrap_err();

        assert!(matches!(err, SupervisorError::StartupError { exit_code: Some(1), .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_timeout_after_configured_attempts() {
        let launcher = FakeLauncher::default();
        let config = test_config().with_readiness(Duration::from_secs(1), 3);
        let supervisor =
            ProcessSupervisor::new(config, launcher.clone(), switchable_probe(Arc::new(AtomicBool::new(false))));

        let err = supervisor.start().await.unwrap_err();

        assert!(matches!(err, SupervisorError::ReadinessTimeout { attempts: 3 }));
        assert!(launcher.was_terminated(0));
        assert_eq!(supervisor.status().await.status, ServiceStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_during_readiness_is_a_startup_error() {
        let launcher = FakeLauncher::default();
        let config = test_config().with_readiness(Duration::from_secs(1), 30);
        let supervisor =
            ProcessSupervisor::new(config, launcher.clone(), switchable_probe(Arc::new(AtomicBool::new(false))));

        let task = tokio::spawn({
            let supervisor = supervisor.clone();
            async move { supervisor.start().await }
        });
        tokio::time::sleep(Duration::from_millis(2500)).await;
        launcher.crash(0, 137);

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, SupervisorError::StartupError { exit_code: Some(137), .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_restart_resets_attempts() {
        let launcher = FakeLauncher::default();
        let supervisor = supervisor(&launcher, switchable_probe(Arc::new(AtomicBool::new(true))));
        supervisor.start().await.unwrap();

        let begun = Instant::now();
        supervisor.restart().await.unwrap();

        assert!(begun.elapsed() >= Duration::from_millis(2000));
        assert!(launcher.was_terminated(0));
        let state = supervisor.status().await;
        assert_eq!(state.status, ServiceStatus::Running);
        assert_eq!(state.pid, Some(1002));
        assert_eq!(state.restart_attempts, 0);
        supervisor.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_consecutive_restart_exceeds_limit() {
        let launcher = FakeLauncher::default();
        let supervisor = supervisor(&launcher, switchable_probe(Arc::new(AtomicBool::new(true))));
        supervisor.start().await.unwrap();
        launcher.set_fallback(Behavior::Fatal);
        let mut events = supervisor.subscribe();

        for attempt in 1..=2u32 {
            let err = supervisor.restart().await.unwrap_err();
            assert!(matches!(err, SupervisorError::StartupError { .. }), "attempt {attempt}: {err:?}");
            let state = supervisor.status().await;
            assert_eq!(state.restart_attempts, attempt);
            assert_eq!(state.status, ServiceStatus::Restarting);
        }

        let err = supervisor.restart().await.unwrap_err();
        assert!(matches!(err, SupervisorError::RestartLimitExceeded { attempts: 3 }), "{err:?}");
        assert_eq!(supervisor.status().await.status, ServiceStatus::Failed);
        // Nothing is launched once the limit is hit
        assert_eq!(launcher.launch_count(), 3);

        let err = supervisor.restart().await.unwrap_err();
        assert!(matches!(err, SupervisorError::RestartLimitExceeded { .. }));
        assert_eq!(launcher.launch_count(), 3);

        let delays: Vec<u64> = events
            .drain()
            .into_iter()
            .filter_map(|event| match event {
                SupervisorEvent::RestartScheduled { delay_ms, .. } => Some(delay_ms),
                _ => None,
            })
            .collect();
        assert_eq!(delays, vec![2000, 4000]);
        supervisor.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_from_failed_clears_restart_counter() {
        let launcher = FakeLauncher::default();
        let supervisor = supervisor(&launcher, switchable_probe(Arc::new(AtomicBool::new(true))));
        supervisor.start().await.unwrap();
        launcher.set_fallback(Behavior::Fatal);
        for _ in 0..3 {
            let _ = supervisor.restart().await;
        }
        assert_eq!(supervisor.status().await.status, ServiceStatus::Failed);

        launcher.set_fallback(Behavior::Ready);
        supervisor.start().await.unwrap();

        let state = supervisor.status().await;
        assert_eq!(state.status, ServiceStatus::Running);
        assert_eq!(state.restart_attempts, 0);
        assert!(state.last_error.is_none());
        supervisor.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_restarts_unhealthy_service() {
        let launcher = FakeLauncher::default();
        let failures = Arc::new(AtomicUsize::new(0));
        let supervisor = supervisor(&launcher, flaky_probe(Arc::clone(&failures)));
        supervisor.start().await.unwrap();
        let mut events = supervisor.subscribe();

        failures.store(1, Ordering::SeqCst);
        // First probe at 30s, 2s backoff, then the relaunch
        tokio::time::sleep(Duration::from_secs(40)).await;

        assert_eq!(launcher.launch_count(), 2);
        assert!(launcher.was_terminated(0));
        let state = supervisor.status().await;
        assert_eq!(state.status, ServiceStatus::Running);
        assert_eq!(state.restart_attempts, 0);

        let events = events.drain();
        assert!(events.iter().any(|e| matches!(e, SupervisorEvent::HealthCheckFailed { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, SupervisorEvent::RestartScheduled { attempt: 1, delay_ms: 2000 })));
        supervisor.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_gives_up_after_restart_policy_is_exhausted() {
        let launcher = FakeLauncher::default();
        let healthy = Arc::new(AtomicBool::new(true));
        let supervisor = supervisor(&launcher, switchable_probe(Arc::clone(&healthy)));
        supervisor.start().await.unwrap();
        let mut events = supervisor.subscribe();

        healthy.store(false, Ordering::SeqCst);
        launcher.set_fallback(Behavior::Fatal);
        tokio::time::sleep(Duration::from_secs(200)).await;

        let state = supervisor.status().await;
        assert_eq!(state.status, ServiceStatus::Failed);
        assert_eq!(state.restart_attempts, 3);
        // One initial launch and two failed relaunches; the third attempt hits the limit
        assert_eq!(launcher.launch_count(), 3);

        let events = events.drain();
        let failed: Vec<u32> = events
            .iter()
            .filter_map(|event| match event {
                SupervisorEvent::RestartFailed { attempt, .. } => Some(*attempt),
                _ => None,
            })
            .collect();
        assert_eq!(failed, vec![1, 2]);
        assert!(events
            .iter()
            .any(|e| matches!(e, SupervisorEvent::RestartLimitReached { attempts: 3 })));
        supervisor.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_from_stopped_starts_monitor() {
        let launcher = FakeLauncher::default();
        let healthy = Arc::new(AtomicBool::new(true));
        let supervisor = supervisor(&launcher, switchable_probe(Arc::clone(&healthy)));

        supervisor.restart().await.unwrap();
        assert_eq!(supervisor.status().await.status, ServiceStatus::Running);
        assert_eq!(launcher.launch_count(), 1);

        // The monitor notices the unhealthy service and relaunches it
        healthy.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(launcher.launch_count(), 2);
        supervisor.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_monitor() {
        let launcher = FakeLauncher::default();
        let healthy = Arc::new(AtomicBool::new(true));
        let supervisor = supervisor(&launcher, switchable_probe(Arc::clone(&healthy)));
        supervisor.start().await.unwrap();
        supervisor.stop().await.unwrap();

        healthy.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(launcher.launch_count(), 1);
        assert_eq!(supervisor.status().await.status, ServiceStatus::Stopped);
    }

    struct SlowProbe;

    #[async_trait]
    impl HealthProbe for SlowProbe {
        async fn probe(&self, _endpoint: &ServiceEndpoint) -> bool {
            sleep(Duration::from_secs(60)).await;
            true
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_is_false_without_process_or_on_timeout() {
        let supervisor = ProcessSupervisor::new(test_config(), FakeLauncher::default(), SlowProbe);
        assert!(!supervisor.health_check().await);

        {
            let mut state = supervisor.inner.state.lock().await;
            state.host = Some("127.0.0.1".into());
            state.port = Some(9000);
        }
        let begun = Instant::now();
        assert!(!supervisor.health_check().await);
        assert!(begun.elapsed() < Duration::from_secs(3));
    }
}
