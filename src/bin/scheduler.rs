//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Scheduler process: scans the event store for due notifications every
// EVENT_SCAN_FREQUENCY_SECS and publishes them to the notification queue.
//--------------------------------------------------------------------------------------------------
// cargo run --bin scheduler
// cargo run --bin scheduler -- --env-file ./deploy/scheduler.env

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use calendar_notify::{
    Config, EventUseCase, Scheduler, create_event_repository,
    outbounds::queue::connect_notification_queue, telemetry,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Publishes due calendar notifications")]
struct Args {
    /// Env file read before the configuration is loaded
    #[arg(short, long)]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    Config::load_env_file(args.env_file.as_deref())?;
    telemetry::init();
    let config = Config::from_env().context("invalid configuration")?;

    info!("Starting scheduler");

    let repository = create_event_repository(&config)
        .await
        .context("failed to open event storage")?;
    let calendar = Arc::new(EventUseCase::new(repository));

    let queue = connect_notification_queue(&config)
        .await
        .context("failed to connect to RabbitMQ")?;

    let scheduler = Scheduler::new(queue, calendar, config.event_scan_frequency);

    let cancel = CancellationToken::new();
    tokio::spawn(stop_on_signal(cancel.clone()));

    let result = scheduler.run(cancel).await;

    if let Err(err) = scheduler.shutdown().await {
        error!(error = %err, "failed to close the queue");
    }

    result.context("scheduler stopped")?;
    info!("Scheduler stopped");

    Ok(())
}

async fn stop_on_signal(cancel: CancellationToken) {
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received, stopping...");
            cancel.cancel();
        }
        Err(err) => error!(error = %err, "failed to listen for the shutdown signal"),
    }
}
