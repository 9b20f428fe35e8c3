//! Command line interface of the host

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use supervisor::SupervisorConfig;
use updater::UpdaterConfig;
use url::Url;

/// Runs a local service under supervision and keeps the application current
#[derive(Parser, Debug)]
#[command(name = "host")]
#[command(about = "Supervises a local service process and applies self-updates")]
pub struct Args {
    /// Executable of the service to supervise
    #[arg(long)]
    pub service: PathBuf,

    /// Argument passed to the service (repeatable)
    #[arg(long = "service-arg", allow_hyphen_values = true)]
    pub service_args: Vec<String>,

    /// Working directory of the service
    #[arg(long)]
    pub working_dir: Option<PathBuf>,

    /// Working-data directory handed to the service
    #[arg(long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Address the service binds to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// First port tried for the service
    #[arg(long, default_value = "9000")]
    pub port: u16,

    /// Liveness endpoint of the service
    #[arg(long, default_value = "/health")]
    pub health_path: String,

    /// Extra environment for the service as KEY=VALUE (repeatable, wins over defaults)
    #[arg(long = "env", value_parser = parse_key_val)]
    pub env: Vec<(String, String)>,

    /// Directory prepended to the service's PATH (repeatable)
    #[arg(long)]
    pub extra_path: Vec<PathBuf>,

    /// Proxy URL exported to the service
    #[arg(long)]
    pub proxy: Option<String>,

    /// Seconds between liveness probes
    #[arg(long, default_value = "30")]
    pub health_interval: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Version of the running application
    #[arg(long, default_value = env!("CARGO_PKG_VERSION"))]
    pub app_version: String,

    /// Release manifest URL; updates are disabled without it
    #[arg(long)]
    pub update_feed: Option<Url>,

    /// Directory for update bookkeeping and staged downloads
    #[arg(long, default_value = "./state")]
    pub state_dir: PathBuf,

    /// Do not check for updates periodically
    #[arg(long)]
    pub no_auto_check: bool,

    /// Download updates as soon as they are found
    #[arg(long)]
    pub auto_download: bool,

    /// Install downloaded updates without waiting for the user
    #[arg(long)]
    pub auto_install: bool,
}

impl Args {
    pub fn supervisor_config(&self) -> SupervisorConfig {
        let mut config = SupervisorConfig::new(&self.service)
            .with_args(self.service_args.clone())
            .with_working_dir(self.working_dir.clone())
            .with_data_dir(self.data_dir.clone())
            .with_host(self.host.clone())
            .with_start_port(self.port)
            .with_health_path(self.health_path.clone())
            .with_extra_path(self.extra_path.clone())
            .with_proxy(self.proxy.clone())
            .with_health_interval(Duration::from_secs(self.health_interval.max(1)));
        for (key, value) in &self.env {
            config = config.with_env_override(key.clone(), value.clone());
        }
        config
    }

    pub fn updater_config(&self) -> UpdaterConfig {
        UpdaterConfig::new(self.app_version.clone())
            .with_auto_check(!self.no_auto_check)
            .with_auto_download(self.auto_download)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.state_dir.join("staging")
    }
}

/// Parse a single KEY=VALUE pair
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{s}`"))?;
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}
