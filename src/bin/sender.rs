//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Sender process: consumes the notification queue with HANDLERS_NUMBER workers and flags each
// notified event in the event store.
//--------------------------------------------------------------------------------------------------
// cargo run --bin sender
// cargo run --bin sender -- --env-file ./deploy/sender.env

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use calendar_notify::{
    Config, EventUseCase, Sender, create_event_repository,
    outbounds::queue::connect_notification_queue, telemetry,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Marks calendar events as notified")]
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

    info!("Starting sender");

    let repository = create_event_repository(&config)
        .await
        .context("failed to open event storage")?;
    let calendar = Arc::new(EventUseCase::new(repository));

    let queue = connect_notification_queue(&config)
        .await
        .context("failed to connect to RabbitMQ")?;

    let sender = Sender::new(queue, calendar, config.ack_mode);

    let cancel = CancellationToken::new();
    tokio::spawn(stop_on_signal(cancel.clone()));

    let result = sender.run(cancel).await;

    if let Err(err) = sender.shutdown().await {
        error!(error = %err, "failed to close the queue");
    }

    result.context("sender stopped")?;
    info!("Sender stopped");

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
