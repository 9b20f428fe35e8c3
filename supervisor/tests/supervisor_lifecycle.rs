//! End-to-end supervision of real shell processes

#![cfg(unix)]

use std::time::Duration;
use supervisor::traits::MockHealthProbe;
use supervisor::{
    ProcessSupervisor, ServiceStatus, SupervisorConfig, SupervisorError, SupervisorEvent, TokioProcessLauncher,
};

fn shell_config(script: &str) -> SupervisorConfig {
    SupervisorConfig::new("/bin/sh")
        .with_args(vec!["-c".to_string(), script.to_string()])
        .with_start_port(0)
        .with_startup_timeout(Duration::from_secs(5))
        .with_readiness(Duration::from_millis(100), 5)
        .with_stop_grace(Duration::from_secs(2))
}

fn healthy_probe() -> MockHealthProbe {
    let mut probe = MockHealthProbe::new();
    probe.expect_probe().returning(|_| true);
    probe
}

#[tokio::test]
async fn test_real_service_starts_and_stops() {
    let supervisor = ProcessSupervisor::new(
        shell_config("echo \"listening on $PORT\"; exec sleep 30"),
        TokioProcessLauncher::new(),
        healthy_probe(),
    );
    let mut events = supervisor.subscribe();

    let endpoint = supervisor.start().await.unwrap();

    let state = supervisor.status().await;
    assert_eq!(state.status, ServiceStatus::Running);
    assert_eq!(state.port, Some(endpoint.port));
    assert!(state.pid.is_some());
    assert!(supervisor.health_check().await);

    supervisor.stop().await.unwrap();
    assert_eq!(supervisor.status().await.status, ServiceStatus::Stopped);

    let last = events.drain().pop();
    assert!(matches!(last, Some(SupervisorEvent::StatusChanged(state)) if state.status == ServiceStatus::Stopped));
}

#[tokio::test]
async fn test_missing_module_on_stderr_fails_startup() {
    let supervisor = ProcessSupervisor::new(
        shell_config("echo \"Error: Cannot find module 'express'\" >&2; exec sleep 30"),
        TokioProcessLauncher::new(),
        healthy_probe(),
    );

    let err = supervisor.start().await.unwrap_err();

    assert!(matches!(err, SupervisorError::StartupError { .. }), "{err:?}");
    assert_eq!(supervisor.status().await.status, ServiceStatus::Failed);
}

#[tokio::test]
async fn test_crashing_service_reports_exit_code() {
    let supervisor = ProcessSupervisor::new(shell_config("exit 42"), TokioProcessLauncher::new(), healthy_probe());

    let err = supervisor.start().await.unwrap_err();

    assert!(matches!(err, SupervisorError::StartupError { exit_code: Some(42), .. }), "{err:?}");
}

#[tokio::test]
async fn test_unknown_program_is_a_spawn_failure() {
    let config = SupervisorConfig::new("/nonexistent/service-binary").with_start_port(0);
    let supervisor = ProcessSupervisor::new(config, TokioProcessLauncher::new(), healthy_probe());

    let err = supervisor.start().await.unwrap_err();

    assert!(matches!(err, SupervisorError::SpawnFailed { .. }), "{err:?}");
}

#[tokio::test]
async fn test_service_sees_prepared_environment() {
    let data = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let config = shell_config("echo \"$SERVICE_MODE $PORT\" > \"$SERVICE_DATA_DIR/boot.txt\"; pwd > cwd.txt; echo ready; exec sleep 30")
        .with_data_dir(data.path().to_path_buf())
        .with_working_dir(Some(work.path().to_path_buf()))
        .with_env_override("SERVICE_MODE", "desktop");
    let supervisor = ProcessSupervisor::new(config, TokioProcessLauncher::new(), healthy_probe());

    let endpoint = supervisor.start().await.unwrap();

    let boot = std::fs::read_to_string(data.path().join("boot.txt")).unwrap();
    assert_eq!(boot.trim(), format!("desktop {}", endpoint.port));
    let cwd = std::fs::read_to_string(work.path().join("cwd.txt")).unwrap();
    assert_eq!(
        std::fs::canonicalize(cwd.trim()).unwrap(),
        std::fs::canonicalize(work.path()).unwrap()
    );

    supervisor.stop().await.unwrap();
}
