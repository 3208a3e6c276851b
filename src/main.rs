use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use adb_courier::bridge::AdbProcess;
use adb_courier::command::CommandExecutor;
use adb_courier::connection::ConnectionManager;
use adb_courier::scheduler::{JobEvent, Scheduler};
use adb_courier::tasks::{TaskOrchestrator, UploadEvent};
use adb_courier::CourierConfig;

/// Courier - deliver staged uploads to Android devices over adb
#[derive(Parser)]
#[command(name = "courier", version, about)]
struct Cli {
    /// Configuration file (TOML); built-in defaults when omitted
    #[arg(short, long, env = "COURIER_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List configured devices with their reachability
    Devices,
    /// Connect every configured device
    Connect,
    /// Show whether one device is connected
    Status {
        /// Configured device name
        name: String,
    },
    /// Deliver a staged upload and run its deferred cleanup
    Deliver {
        /// Configured device name
        #[arg(short, long)]
        device: String,
        /// Upload time, unix seconds
        #[arg(short, long)]
        timestamp: i64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let config = match &cli.config {
        Some(path) => CourierConfig::load(path)?,
        None => CourierConfig::default(),
    };

    let bridge = Arc::new(AdbProcess::new(config.bridge.adb_path.clone()));
    let executor = Arc::new(CommandExecutor::new(bridge, config.executor_config()));
    let connections = Arc::new(ConnectionManager::new(
        Arc::new(config.registry()),
        executor,
    ));
    info!(
        "Courier starting: {} device(s) configured",
        connections.registry().len()
    );

    match cli.command {
        Command::Devices => {
            let connected: HashSet<String> =
                connections.connected_names().await.into_iter().collect();
            for name in connections.registry().names() {
                let state = if connected.contains(name) { "connected" } else { "offline" };
                println!("{}\t{}", name, state);
            }
            Ok(true)
        }
        Command::Connect => {
            let results = connections.connect_all().await;
            for name in connections.registry().names() {
                let ok = results.get(name).copied().unwrap_or(false);
                println!("{}\t{}", name, if ok { "connected" } else { "unreachable" });
            }
            Ok(results.values().all(|ok| *ok))
        }
        Command::Status { name } => {
            let connected = connections.is_connected(&name).await?;
            println!("{}\t{}", name, if connected { "connected" } else { "offline" });
            Ok(connected)
        }
        Command::Deliver { device, timestamp } => {
            let scheduler = Arc::new(Scheduler::new(config.scheduler_config()?));
            let orchestrator = Arc::new(TaskOrchestrator::new(
                connections,
                scheduler.clone(),
                config.delivery_settings()?,
            ));
            let mut events = scheduler.subscribe();
            scheduler.start();

            let receipt = orchestrator
                .handle_upload(UploadEvent {
                    device_name: device,
                    timestamp,
                })
                .await?;
            let delivered = receipt
                .immediate
                .await
                .context("Immediate task panicked")?;
            info!("Delivery of {} finished: success={}", receipt.bucket, delivered);

            if let Some(job) = receipt.cleanup_job {
                info!("Waiting for cleanup at {} (Ctrl-C to skip)", job.fire_at);
                tokio::select! {
                    outcome = wait_for_job(&mut events, &job.id) => match outcome {
                        Some(JobEvent::Fired(job)) => info!("Cleanup {} completed", job.key),
                        Some(JobEvent::Missed { job, late_by }) => {
                            warn!("Cleanup {} missed by {:?}", job.key, late_by)
                        }
                        None => warn!("Scheduler event channel closed"),
                    },
                    _ = tokio::signal::ctrl_c() => info!("Interrupted, cleanup abandoned"),
                }
            }

            scheduler.stop();
            Ok(delivered)
        }
    }
}

/// Wait for the terminal event of one job; `Fired` arrives after its callback ran
async fn wait_for_job(
    events: &mut broadcast::Receiver<JobEvent>,
    job_id: &str,
) -> Option<JobEvent> {
    loop {
        match events.recv().await {
            Ok(event) if event.job().id == job_id => return Some(event),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Skipped {} scheduler event(s)", skipped)
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
