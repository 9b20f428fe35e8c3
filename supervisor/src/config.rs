//! Supervisor configuration
//!
//! Defaults follow the service's startup contract: an 8s startup window,
//! readiness polled once per second for up to 30 attempts, a 2s liveness
//! probe every 30s and a 5s grace period before forced termination.

use shared::BackoffPolicy;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{SupervisorError, SupervisorResult};
use crate::traits::OutputStream;

/// Environment variable carrying the allocated port
pub const PORT_ENV: &str = "PORT";
/// Environment variable carrying the bind host
pub const HOST_ENV: &str = "HOST";
/// Environment variable carrying the service's working-data directory
pub const DATA_DIR_ENV: &str = "SERVICE_DATA_DIR";

/// Bounded restart policy with capped exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(2000),
            max_delay: Duration::from_millis(10_000),
        }
    }
}

impl RestartPolicy {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::capped(self.base_delay, self.max_delay)
    }

    /// Delay inserted before restart attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff().delay_for(attempt)
    }
}

/// What a line of child output means for startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSignal {
    Ready,
    Fatal(String),
}

/// Substrings that mark readiness (stdout) or a fatal startup error (stderr)
///
/// Matching is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPatterns {
    pub ready: Vec<String>,
    pub fatal: Vec<String>,
}

impl Default for OutputPatterns {
    fn default() -> Self {
        Self {
            ready: vec!["listening on".into(), "server running".into(), "ready".into()],
            fatal: vec![
                "module not found".into(),
                "cannot find module".into(),
                "syntaxerror".into(),
                "syntax error".into(),
            ],
        }
    }
}

impl OutputPatterns {
    pub fn scan(&self, stream: OutputStream, line: &str) -> Option<OutputSignal> {
        let lowered = line.to_lowercase();
        let matches = |patterns: &[String]| patterns.iter().any(|p| lowered.contains(&p.to_lowercase()));
        match stream {
            OutputStream::Stderr if matches(&self.fatal) => Some(OutputSignal::Fatal(line.trim().to_string())),
            OutputStream::Stdout if matches(&self.ready) => Some(OutputSignal::Ready),
            _ => None,
        }
    }
}

/// Full configuration of a [`crate::ProcessSupervisor`]
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub data_dir: PathBuf,
    pub host: String,
    pub start_port: u16,
    pub port_search_limit: u16,
    pub health_path: String,
    pub env_overrides: BTreeMap<String, String>,
    pub extra_path: Vec<PathBuf>,
    pub proxy: Option<String>,
    pub patterns: OutputPatterns,
    pub startup_timeout: Duration,
    pub readiness_interval: Duration,
    pub readiness_attempts: u32,
    pub probe_timeout: Duration,
    pub health_interval: Duration,
    pub stop_grace: Duration,
    pub restart: RestartPolicy,
}

impl SupervisorConfig {
    /// Configuration for `program` with default timings
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            data_dir: PathBuf::from("./data"),
            host: "127.0.0.1".to_string(),
            start_port: 9000,
            port_search_limit: 100,
            health_path: "/health".to_string(),
            env_overrides: BTreeMap::new(),
            extra_path: Vec::new(),
            proxy: None,
            patterns: OutputPatterns::default(),
            startup_timeout: Duration::from_secs(8),
            readiness_interval: Duration::from_secs(1),
            readiness_attempts: 30,
            probe_timeout: Duration::from_secs(2),
            health_interval: Duration::from_secs(30),
            stop_grace: Duration::from_secs(5),
            restart: RestartPolicy::default(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_working_dir(mut self, working_dir: Option<PathBuf>) -> Self {
        self.working_dir = working_dir;
        self
    }

    pub fn with_data_dir(mut self, data_dir: PathBuf) -> Self {
        self.data_dir = data_dir;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_start_port(mut self, start_port: u16) -> Self {
        self.start_port = start_port;
        self
    }

    pub fn with_health_path(mut self, health_path: impl Into<String>) -> Self {
        self.health_path = health_path.into();
        self
    }

    pub fn with_env_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_overrides.insert(key.into(), value.into());
        self
    }

    pub fn with_extra_path(mut self, extra_path: Vec<PathBuf>) -> Self {
        self.extra_path = extra_path;
        self
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_patterns(mut self, patterns: OutputPatterns) -> Self {
        self.patterns = patterns;
        self
    }

    pub fn with_restart_policy(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    pub fn with_startup_timeout(mut self, startup_timeout: Duration) -> Self {
        self.startup_timeout = startup_timeout;
        self
    }

    pub fn with_readiness(mut self, interval: Duration, attempts: u32) -> Self {
        self.readiness_interval = interval;
        self.readiness_attempts = attempts;
        self
    }

    pub fn with_health_interval(mut self, health_interval: Duration) -> Self {
        self.health_interval = health_interval;
        self
    }

    pub fn with_stop_grace(mut self, stop_grace: Duration) -> Self {
        self.stop_grace = stop_grace;
        self
    }

    /// Environment additions for a child listening on `port`
    ///
    /// Operator overrides are applied last and win over everything else.
    pub fn build_environment(&self, port: u16) -> SupervisorResult<BTreeMap<String, String>> {
        let mut env = BTreeMap::new();
        env.insert(PORT_ENV.to_string(), port.to_string());
        env.insert(HOST_ENV.to_string(), self.host.clone());
        env.insert(DATA_DIR_ENV.to_string(), self.data_dir.to_string_lossy().into_owned());

        if !self.extra_path.is_empty() {
            let inherited = std::env::var_os("PATH").unwrap_or_default();
            let entries = self
                .extra_path
                .iter()
                .cloned()
                .chain(std::env::split_paths(&inherited));
            let joined = std::env::join_paths(entries)
                .map_err(|e| SupervisorError::config("extra_path", e.to_string()))?;
            env.insert("PATH".to_string(), joined.to_string_lossy().into_owned());
        }

        if let Some(proxy) = &self.proxy {
            for key in ["HTTP_PROXY", "HTTPS_PROXY", "http_proxy", "https_proxy"] {
                env.insert(key.to_string(), proxy.clone());
            }
        }

        for (key, value) in &self.env_overrides {
            env.insert(key.clone(), value.clone());
        }

        Ok(env)
    }
}
