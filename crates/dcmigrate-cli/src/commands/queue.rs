use anyhow::{Context, Result};
use dcmigrate_application::{DrainOutcome, DrainPolicy, QueueDrainWatcher};
use dcmigrate_core::MigrationStage;
use dcmigrate_core::queue::QueueLengthPoller;
use dcmigrate_infrastructure::MigrationSettings;
use dcmigrate_infrastructure::queue::HttpQueueLengthPoller;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::open_service;

fn poller(settings: &MigrationSettings) -> Result<HttpQueueLengthPoller> {
    let endpoint = settings
        .queue_endpoint
        .as_deref()
        .context("queue_endpoint is not configured")?;
    Ok(HttpQueueLengthPoller::new(endpoint)?)
}

pub async fn length(settings: &MigrationSettings, name: &str) -> Result<()> {
    match poller(settings)?.queue_length(name).await? {
        Some(pending) => println!("{}", pending),
        None => println!("Queue `{}` does not exist", name),
    }
    Ok(())
}

pub async fn await_drain(
    settings: &MigrationSettings,
    queue: &str,
    wait_stage: MigrationStage,
    next_stage: MigrationStage,
) -> Result<()> {
    let service = open_service(settings).await?;
    let watcher = QueueDrainWatcher::new(
        service.machine(),
        Arc::new(poller(settings)?),
        DrainPolicy::from(settings),
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    match watcher
        .await_queue_drain(queue, wait_stage, next_stage, &cancel)
        .await?
    {
        DrainOutcome::Drained => println!("Queue `{}` drained, now in {}", queue, next_stage),
        DrainOutcome::Abandoned { observed } => {
            println!("Stopped watching `{}`: migration is in {}", queue, observed)
        }
        DrainOutcome::Cancelled => println!("Interrupted, still in {}", wait_stage),
    }
    Ok(())
}
