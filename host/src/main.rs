mod args;
mod relay;

use anyhow::Context;
use clap::Parser;
use shared::logging::{self, log_error, log_shutdown, log_startup, log_success};
use shared::{component_info, component_warn, ComponentId, Subscription};
use std::time::Duration;
use supervisor::{HttpHealthProbe, ProcessSupervisor, TokioProcessLauncher};
use tokio::signal;
use tokio::sync::mpsc;
use updater::{FileStateStore, HttpUpdateProvider, UpdateCoordinator, UpdateEvent};

use crate::args::Args;

type Updater = UpdateCoordinator<HttpUpdateProvider, FileStateStore>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();
    let args = Args::parse();

    logging::init_tracing_with_level(Some(&args.log_level));
    log_startup(ComponentId::Host, &format!("service host {}", args.app_version));

    let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel::<()>();

    let supervisor_config = args.supervisor_config();
    let probe = HttpHealthProbe::new(supervisor_config.health_path.clone()).with_timeout(supervisor_config.probe_timeout);
    let supervisor = ProcessSupervisor::new(supervisor_config, TokioProcessLauncher::new(), probe);
    let mut relays = vec![relay::spawn_relay(ComponentId::Supervisor, supervisor.subscribe())];

    let updater = match &args.update_feed {
        Some(feed) => {
            std::fs::create_dir_all(&args.state_dir)
                .with_context(|| format!("failed to create state directory {}", args.state_dir.display()))?;
            let provider = HttpUpdateProvider::new(feed.clone(), args.staging_dir()).with_shutdown_signal(shutdown_tx.clone());
            let store = FileStateStore::new(args.state_dir.clone());
            let coordinator: Updater = UpdateCoordinator::new(args.updater_config(), provider, store);

            relays.push(relay::spawn_relay(ComponentId::Updater, coordinator.subscribe()));
            if args.auto_install {
                relays.push(spawn_auto_install(coordinator.clone(), coordinator.subscribe()));
            }
            coordinator.initialize().await;
            Some(coordinator)
        }
        None => {
            component_info!(ComponentId::Host, "No update feed configured; self-update disabled");
            None
        }
    };

    // A service that fails to start leaves the host up in a degraded state
    match supervisor.start().await {
        Ok(endpoint) => log_success(ComponentId::Host, &format!("Service available at {}", endpoint.url)),
        Err(e) => log_error(ComponentId::Host, "Service startup", &e),
    }

    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                log_shutdown(ComponentId::Host, "Received Ctrl+C signal");
                let _ = ctrl_c_tx.send(());
            }
            Err(e) => log_error(ComponentId::Host, "Listening for Ctrl+C", &e),
        }
    });

    shutdown_rx.recv().await;

    // Update timers go first so no check races the service shutdown
    if let Some(updater) = &updater {
        updater.shutdown().await;
    }
    if let Err(e) = tokio::time::timeout(Duration::from_secs(15), supervisor.stop()).await.unwrap_or_else(|_| {
        component_warn!(ComponentId::Host, "Timed out stopping the service");
        Ok(())
    }) {
        log_error(ComponentId::Host, "Stopping the service", &e);
    }

    for relay in relays {
        relay.abort();
    }
    log_success(ComponentId::Host, "Host shut down cleanly");
    Ok(())
}

/// Install each update as soon as it has been downloaded
fn spawn_auto_install(updater: Updater, mut events: Subscription<UpdateEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let UpdateEvent::UpdateDownloaded { version } = event {
                component_info!(ComponentId::Host, "Installing {} automatically", version);
                if let Err(e) = updater.install_update().await {
                    log_error(ComponentId::Host, "Automatic install", &e);
                }
            }
        }
    })
}
