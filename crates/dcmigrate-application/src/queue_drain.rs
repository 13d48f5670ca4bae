//! Advances a `*_WAIT` stage once the queue feeding it has drained.
//!
//! The stage machine never polls. Drivers run a [`QueueDrainWatcher`] for
//! the wait stage they are in; it polls the queue length and performs the
//! compare-and-swap transition out of the wait stage when the length hits
//! zero.

use dcmigrate_core::error::Result;
use dcmigrate_core::queue::QueueLengthPoller;
use dcmigrate_core::stage::{MigrationStage, MigrationStageMachine};
use dcmigrate_infrastructure::MigrationSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Polling cadence and connection retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainPolicy {
    pub poll_interval: Duration,
    pub max_backoff: Duration,
    pub max_connection_retries: u32,
}

impl DrainPolicy {
    /// Delay after the `failures`-th consecutive connection error:
    /// the poll interval doubled per failure, capped at `max_backoff`.
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1));
        self.poll_interval
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl From<&MigrationSettings> for DrainPolicy {
    fn from(settings: &MigrationSettings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            max_backoff: settings.max_backoff(),
            max_connection_retries: settings.max_connection_retries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The queue drained and the machine moved to the next stage.
    Drained,
    /// The migration left the wait stage by other means, e.g. a force reset.
    Abandoned { observed: MigrationStage },
    Cancelled,
}

pub struct QueueDrainWatcher {
    machine: Arc<MigrationStageMachine>,
    poller: Arc<dyn QueueLengthPoller>,
    policy: DrainPolicy,
}

impl QueueDrainWatcher {
    pub fn new(
        machine: Arc<MigrationStageMachine>,
        poller: Arc<dyn QueueLengthPoller>,
        policy: DrainPolicy,
    ) -> Self {
        Self {
            machine,
            poller,
            policy,
        }
    }

    /// Polls `queue` while the stored stage stays `wait_stage` and moves it
    /// to `next_stage` once the queue is empty.
    ///
    /// The stage is re-read from the store before every poll, so a reset
    /// issued by another process ends the watch.
    /// A queue that does not exist yet counts as not drained.
    ///
    /// # Errors
    ///
    /// - Queue API and request errors, immediately
    /// - Connection errors, once `max_connection_retries` consecutive
    ///   attempts have failed
    /// - Stage store errors from the stage reads and the final transition
    pub async fn await_queue_drain(
        &self,
        queue: &str,
        wait_stage: MigrationStage,
        next_stage: MigrationStage,
        cancel: &CancellationToken,
    ) -> Result<DrainOutcome> {
        let mut failures = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Ok(DrainOutcome::Cancelled);
            }
            let observed = self.machine.refresh().await?;
            if observed != wait_stage {
                tracing::info!(queue, %wait_stage, %observed, "Left wait stage, no longer watching queue");
                return Ok(DrainOutcome::Abandoned { observed });
            }

            let delay = match self.poller.queue_length(queue).await {
                Ok(Some(0)) => return self.advance(queue, wait_stage, next_stage).await,
                Ok(Some(pending)) => {
                    failures = 0;
                    tracing::debug!(queue, pending, "Queue not drained yet");
                    self.policy.poll_interval
                }
                Ok(None) => {
                    failures = 0;
                    tracing::debug!(queue, "Queue not provisioned yet");
                    self.policy.poll_interval
                }
                Err(e) if e.is_retryable() => {
                    failures += 1;
                    if failures > self.policy.max_connection_retries {
                        tracing::error!(queue, failures, "Giving up on queue API: {}", e);
                        return Err(e.into());
                    }
                    let delay = self.policy.backoff(failures);
                    tracing::warn!(
                        queue,
                        failures,
                        retry_in_secs = delay.as_secs(),
                        "Queue API unreachable: {}",
                        e
                    );
                    delay
                }
                Err(e) => {
                    tracing::error!(queue, "Queue lookup failed: {}", e);
                    return Err(e.into());
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => return Ok(DrainOutcome::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn advance(
        &self,
        queue: &str,
        wait_stage: MigrationStage,
        next_stage: MigrationStage,
    ) -> Result<DrainOutcome> {
        match self.machine.transition_from(wait_stage, next_stage).await {
            Ok(()) => {
                tracing::info!(queue, from = %wait_stage, to = %next_stage, "Queue drained");
                Ok(DrainOutcome::Drained)
            }
            Err(e) if e.is_invalid_transition() => {
                let observed = self.machine.current_stage();
                if observed != wait_stage {
                    Ok(DrainOutcome::Abandoned { observed })
                } else {
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }
}
